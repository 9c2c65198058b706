// Global configuration management

use crate::engine::{
    ConversionSettings, EncoderProfile, QualityPreset, Resolution, RunnerSettings,
    parse_container_format,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub defaults: DefaultsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Explicit ffmpeg executable; skips the PATH / working-directory lookup
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Seconds to wait for ffmpeg to exit after its output closes
    #[serde(default = "default_finalize_timeout_secs")]
    pub finalize_timeout_secs: u64,

    /// Seconds between terminate and kill
    #[serde(default = "default_terminate_grace_secs")]
    pub terminate_grace_secs: u64,

    #[serde(default = "default_kill_grace_secs")]
    pub kill_grace_secs: u64,

    /// How long the worker blocks waiting for a line before re-checking for stop requests
    #[serde(default = "default_idle_backoff_ms")]
    pub idle_backoff_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Output container (mp4, mkv, avi, wmv, mov, flv, mpeg, 3gp)
    #[serde(default = "default_format")]
    pub format: String,

    /// "original", WxH, or a preset such as "1080p"
    #[serde(default = "default_original")]
    pub resolution: String,

    /// "auto" or a rate such as "10 Mbps"
    #[serde(default = "default_auto")]
    pub bitrate: String,

    /// cpu, nvidia, amd, intel, or auto (pick from detected GPUs)
    #[serde(default = "default_auto")]
    pub encoder: String,

    /// high, balanced or fast
    #[serde(default = "default_quality")]
    pub quality: String,

    /// Where converted files go when no --output-dir is given
    #[serde(default)]
    pub output_dir: Option<PathBuf>,

    /// Append every batch event to vidbatch.log in the working directory
    #[serde(default)]
    pub debug_log: bool,
}

fn default_finalize_timeout_secs() -> u64 {
    5
}

fn default_terminate_grace_secs() -> u64 {
    2
}

fn default_kill_grace_secs() -> u64 {
    1
}

fn default_idle_backoff_ms() -> u64 {
    50
}

fn default_format() -> String {
    "mp4".to_string()
}

fn default_original() -> String {
    "original".to_string()
}

fn default_auto() -> String {
    "auto".to_string()
}

fn default_quality() -> String {
    "high".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            path: None,
            finalize_timeout_secs: default_finalize_timeout_secs(),
            terminate_grace_secs: default_terminate_grace_secs(),
            kill_grace_secs: default_kill_grace_secs(),
            idle_backoff_ms: default_idle_backoff_ms(),
        }
    }
}

impl EngineConfig {
    pub fn runner_settings(&self) -> RunnerSettings {
        RunnerSettings {
            finalize_timeout: Duration::from_secs(self.finalize_timeout_secs),
            terminate_grace: Duration::from_secs(self.terminate_grace_secs),
            kill_grace: Duration::from_secs(self.kill_grace_secs),
            idle_backoff: Duration::from_millis(self.idle_backoff_ms.max(1)),
        }
    }
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            format: default_format(),
            resolution: default_original(),
            bitrate: default_auto(),
            encoder: default_auto(),
            quality: default_quality(),
            output_dir: None,
            debug_log: false,
        }
    }
}

impl DefaultsConfig {
    /// Resolve the textual choices into validated settings.
    /// `gpus` are adapter names used when the encoder is "auto".
    pub fn to_settings(&self, gpus: &[String]) -> Result<ConversionSettings> {
        let container_format = parse_container_format(&self.format)?;
        let resolution = Resolution::parse_choice(&self.resolution)?;

        let encoder_profile = if self.encoder.trim().eq_ignore_ascii_case("auto") {
            EncoderProfile::from_gpu_names(gpus)
        } else {
            self.encoder.parse::<EncoderProfile>()?
        };

        let quality_preset: QualityPreset = self.quality.parse()?;

        let bitrate = crate::engine::normalize_bitrate(&self.bitrate)
            .is_some()
            .then(|| self.bitrate.trim().to_string());

        Ok(ConversionSettings {
            container_format,
            resolution,
            bitrate,
            encoder_profile,
            quality_preset,
        })
    }
}

impl Config {
    /// Get the path to the config file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("vidbatch");

        Ok(config_dir.join("config.toml"))
    }

    /// Load config from disk, or create default if it doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            let contents = fs::read_to_string(&config_path).with_context(|| {
                format!("Failed to read config file: {}", config_path.display())
            })?;

            Self::from_toml(&contents)
                .with_context(|| format!("Failed to parse config file: {}", config_path.display()))
        } else {
            let config = Config::default();

            // Try to save the default config, but don't fail if we can't
            // (e.g., if the directory isn't writable)
            if let Err(e) = config.save() {
                tracing::warn!("Could not create default config file: {:#}", e);
            }

            Ok(config)
        }
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Save config to disk
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        // Create parent directory if it doesn't exist
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&config_path, contents)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// Check if config file exists
    pub fn exists() -> bool {
        Self::config_path().map(|p| p.exists()).unwrap_or(false)
    }

    /// Create a default config file if it doesn't exist
    pub fn ensure_default() -> Result<()> {
        if !Self::exists() {
            let config = Config::default();
            config.save()?;
        }
        Ok(())
    }
}
