use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;
use tracing::debug;

/// Bare program name the engine is looked up by
pub const ENGINE_PROGRAM: &str = "ffmpeg";

#[derive(Debug, Error)]
pub enum LocateError {
    #[error(
        "ffmpeg not found: '{program}' did not answer -version and {} does not exist. Is ffmpeg installed and in PATH?",
        .candidate.display()
    )]
    NotFound { program: String, candidate: PathBuf },

    #[error("Configured ffmpeg at {} is not usable: {reason}", .path.display())]
    Unusable { path: PathBuf, reason: String },
}

/// A verified engine executable
#[derive(Debug, Clone, PartialEq)]
pub struct EnginePath {
    pub path: PathBuf,
    /// First line of the `-version` banner, when the version check produced one
    pub version: Option<String>,
}

/// Platform executable name for a program (`ffmpeg.exe` on Windows)
pub fn executable_name(program: &str) -> String {
    if cfg!(windows) && !program.to_ascii_lowercase().ends_with(".exe") {
        format!("{}.exe", program)
    } else {
        program.to_string()
    }
}

/// Run `<program> -version` and return the first line of its banner
pub fn engine_version(program: &Path) -> Result<String> {
    let output = Command::new(program)
        .arg("-version")
        .stdin(Stdio::null())
        .output()
        .with_context(|| format!("Failed to execute {}", program.display()))?;

    if !output.status.success() {
        anyhow::bail!(
            "{} -version failed with status: {}",
            program.display(),
            output.status
        );
    }

    let version_output = String::from_utf8_lossy(&output.stdout);
    let first_line = version_output.lines().next().unwrap_or("Unknown version");

    Ok(first_line.to_string())
}

/// Resolves where the transcoding engine lives
#[derive(Debug, Clone)]
pub struct EngineLocator {
    program: String,
    search_dir: Option<PathBuf>,
    explicit: Option<PathBuf>,
}

impl Default for EngineLocator {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineLocator {
    pub fn new() -> Self {
        Self {
            program: ENGINE_PROGRAM.to_string(),
            search_dir: None,
            explicit: None,
        }
    }

    /// Look up a different bare program name
    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Directory for the fallback lookup (defaults to the current directory)
    pub fn search_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search_dir = Some(dir.into());
        self
    }

    /// Use exactly this executable; no fallback lookup is attempted
    pub fn explicit_path(mut self, path: Option<PathBuf>) -> Self {
        self.explicit = path;
        self
    }

    pub fn locate(&self) -> Result<EnginePath, LocateError> {
        if let Some(path) = &self.explicit {
            return match engine_version(path) {
                Ok(version) => Ok(EnginePath {
                    path: path.clone(),
                    version: Some(version),
                }),
                Err(e) => Err(LocateError::Unusable {
                    path: path.clone(),
                    reason: format!("{:#}", e),
                }),
            };
        }

        let bare = PathBuf::from(&self.program);
        match engine_version(&bare) {
            Ok(version) => {
                debug!(program = %self.program, %version, "engine found on PATH");
                return Ok(EnginePath {
                    path: bare,
                    version: Some(version),
                });
            }
            Err(e) => debug!(program = %self.program, error = %format!("{:#}", e), "PATH lookup failed"),
        }

        let dir = match &self.search_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        };
        let candidate = dir.join(executable_name(&self.program));

        if candidate.is_file() {
            debug!(path = %candidate.display(), "engine found in search directory");
            return Ok(EnginePath {
                version: engine_version(&candidate).ok(),
                path: candidate,
            });
        }

        Err(LocateError::NotFound {
            program: self.program.clone(),
            candidate,
        })
    }
}

/// Locate ffmpeg on PATH or in the current directory
pub fn locate_engine(explicit: Option<PathBuf>) -> Result<EnginePath, LocateError> {
    EngineLocator::new().explicit_path(explicit).locate()
}
