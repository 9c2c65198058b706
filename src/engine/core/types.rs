use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Output containers offered for conversion
pub const SUPPORTED_FORMATS: &[&str] = &["mp4", "mkv", "avi", "wmv", "mov", "flv", "mpeg", "3gp"];

/// Values that mean "let the encoder pick the bitrate"
const AUTO_BITRATE: &[&str] = &["auto", "自动"];

/// Named resolutions: (label, width, height)
pub const RESOLUTION_PRESETS: &[(&str, u32, u32)] = &[
    ("4k", 3840, 2160),
    ("2k", 2560, 1440),
    ("1080p", 1920, 1080),
    ("1080p-portrait", 1080, 1920),
    ("720p", 1280, 720),
    ("720p-portrait", 720, 1280),
    ("480p", 854, 480),
    ("480p-portrait", 480, 854),
    ("360p", 640, 360),
    ("360p-portrait", 360, 640),
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("Unsupported output format '{0}' (supported: {formats})", formats = SUPPORTED_FORMATS.join(", "))]
    UnsupportedFormat(String),

    #[error("Invalid resolution '{0}' (expected WxH, 'original' or a preset such as 1080p)")]
    InvalidResolution(String),

    #[error("Unknown encoder profile '{0}' (expected cpu, nvidia, amd, intel or auto)")]
    UnknownEncoder(String),

    #[error("Unknown quality preset '{0}' (expected high, balanced or fast)")]
    UnknownQuality(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Failed,
    Cancelled,
}

/// Encoder selection. Hardware profiles map to a GPU vendor's H.264 encoder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderProfile {
    #[default]
    Cpu,
    Nvidia,
    Amd,
    Intel,
}

impl EncoderProfile {
    /// ffmpeg video encoder name for this profile
    pub fn video_encoder(&self) -> &'static str {
        match self {
            Self::Cpu => "libx264",
            Self::Nvidia => "h264_nvenc",
            Self::Amd => "h264_amf",
            Self::Intel => "h264_qsv",
        }
    }

    pub fn is_hardware(&self) -> bool {
        !matches!(self, Self::Cpu)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Cpu => "CPU (libx264)",
            Self::Nvidia => "NVIDIA NVENC",
            Self::Amd => "AMD AMF",
            Self::Intel => "Intel Quick Sync",
        }
    }

    /// Pick the preferred hardware profile from a list of GPU adapter names.
    ///
    /// Priority is NVIDIA, then AMD, then Intel. Falls back to CPU when no
    /// known vendor is present.
    pub fn from_gpu_names<S: AsRef<str>>(gpus: &[S]) -> Self {
        let names: Vec<String> = gpus.iter().map(|g| g.as_ref().to_lowercase()).collect();
        let any = |needles: &[&str]| {
            names
                .iter()
                .any(|name| needles.iter().any(|needle| name.contains(needle)))
        };

        if any(&["nvidia"]) {
            Self::Nvidia
        } else if any(&["amd", "radeon"]) {
            Self::Amd
        } else if any(&["intel", "hd graphics", "iris"]) {
            Self::Intel
        } else {
            Self::Cpu
        }
    }
}

impl fmt::Display for EncoderProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for EncoderProfile {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" | "software" | "libx264" => Ok(Self::Cpu),
            "nvidia" | "nvenc" | "cuda" => Ok(Self::Nvidia),
            "amd" | "amf" | "vce" => Ok(Self::Amd),
            "intel" | "qsv" => Ok(Self::Intel),
            _ => Err(SettingsError::UnknownEncoder(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Parse a resolution choice, where "original" (or empty) means no scaling
    pub fn parse_choice(s: &str) -> Result<Option<Resolution>, SettingsError> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("original") {
            return Ok(None);
        }
        trimmed.parse().map(Some)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();

        if let Some((_, w, h)) = RESOLUTION_PRESETS
            .iter()
            .find(|(label, _, _)| *label == lowered)
        {
            return Ok(Self::new(*w, *h));
        }

        let invalid = || SettingsError::InvalidResolution(s.to_string());
        let (w, h) = lowered.split_once('x').ok_or_else(invalid)?;
        let width = w.trim().parse::<u32>().map_err(|_| invalid())?;
        let height = h.trim().parse::<u32>().map_err(|_| invalid())?;
        if width == 0 || height == 0 {
            return Err(invalid());
        }
        Ok(Self::new(width, height))
    }
}

/// Constant-quality value plus encoder speed preset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityPreset {
    pub crf: u8,
    pub speed: String,
}

impl QualityPreset {
    pub fn high() -> Self {
        Self {
            crf: 18,
            speed: "slow".to_string(),
        }
    }

    pub fn balanced() -> Self {
        Self {
            crf: 23,
            speed: "medium".to_string(),
        }
    }

    pub fn fast() -> Self {
        Self {
            crf: 28,
            speed: "veryfast".to_string(),
        }
    }
}

impl Default for QualityPreset {
    fn default() -> Self {
        Self::high()
    }
}

impl FromStr for QualityPreset {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Self::high()),
            "balanced" => Ok(Self::balanced()),
            "fast" => Ok(Self::fast()),
            _ => Err(SettingsError::UnknownQuality(s.to_string())),
        }
    }
}

/// Normalize a human bitrate ("10 Mbps") to ffmpeg's compact form ("10M").
///
/// Returns `None` for automatic bitrate, meaning no bitrate directive.
pub fn normalize_bitrate(raw: &str) -> Option<String> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() || AUTO_BITRATE.iter().any(|a| compact.eq_ignore_ascii_case(a)) {
        return None;
    }

    let lowered = compact.to_ascii_lowercase();
    for (unit, suffix) in [("mbps", "M"), ("kbps", "K"), ("gbps", "G")] {
        if lowered.ends_with(unit) {
            let number = &compact[..compact.len() - unit.len()];
            if number.is_empty() {
                return None;
            }
            return Some(format!("{}{}", number, suffix));
        }
    }

    Some(compact)
}

/// Check a container format against the supported list, returning it lowercased
pub fn parse_container_format(format: &str) -> Result<String, SettingsError> {
    let lowered = format.trim().trim_start_matches('.').to_ascii_lowercase();
    if SUPPORTED_FORMATS.contains(&lowered.as_str()) {
        Ok(lowered)
    } else {
        Err(SettingsError::UnsupportedFormat(format.to_string()))
    }
}

/// Choices shared by every job in a batch
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionSettings {
    pub container_format: String,
    pub resolution: Option<Resolution>,
    /// Human-readable bitrate; `None` means automatic
    pub bitrate: Option<String>,
    pub encoder_profile: EncoderProfile,
    pub quality_preset: QualityPreset,
}

impl Default for ConversionSettings {
    fn default() -> Self {
        Self {
            container_format: "mp4".to_string(),
            resolution: None,
            bitrate: None,
            encoder_profile: EncoderProfile::Cpu,
            quality_preset: QualityPreset::high(),
        }
    }
}

/// One input-file-to-output-file conversion request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSpec {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub container_format: String,
    pub resolution: Option<Resolution>,
    pub target_bitrate: Option<String>,
    pub encoder_profile: EncoderProfile,
    pub quality_preset: QualityPreset,
}

impl JobSpec {
    pub fn new(input_path: PathBuf, output_dir: &Path, settings: &ConversionSettings) -> Self {
        let output_path = derive_output_path(&input_path, output_dir, &settings.container_format);
        Self {
            input_path,
            output_path,
            container_format: settings.container_format.clone(),
            resolution: settings.resolution,
            target_bitrate: settings.bitrate.clone(),
            encoder_profile: settings.encoder_profile,
            quality_preset: settings.quality_preset.clone(),
        }
    }

    pub fn input_name(&self) -> String {
        self.input_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.input_path.display().to_string())
    }
}

/// `<output_dir>/<input_stem>_converted.<format>`
pub fn derive_output_path(input_path: &Path, output_dir: &Path, format: &str) -> PathBuf {
    let stem = input_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    output_dir.join(format!("{}_converted.{}", stem, format))
}
