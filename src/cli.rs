use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "vidbatch")]
#[command(about = "Batch video converter driving ffmpeg", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Convert video files, one at a time
    Convert(ConvertArgs),

    /// Show ffmpeg commands without executing (dry run)
    DryRun(ConvertArgs),

    /// Check that ffmpeg can be found and started
    CheckFfmpeg {
        /// Use this ffmpeg executable instead of searching PATH
        #[arg(long, value_name = "PATH")]
        ffmpeg: Option<PathBuf>,
    },

    /// Show config status and location, or create default config if missing
    InitConfig,
}

#[derive(Args, Debug, Clone)]
pub struct ConvertArgs {
    /// Video files or directories (directories are scanned recursively)
    #[arg(value_name = "INPUT", required = true)]
    pub inputs: Vec<PathBuf>,

    /// Directory for converted files (defaults to config, then the current directory)
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Output container: mp4, mkv, avi, wmv, mov, flv, mpeg, 3gp
    #[arg(short, long)]
    pub format: Option<String>,

    /// "original", WxH, or a preset such as 1080p or 720p-portrait
    #[arg(short, long)]
    pub resolution: Option<String>,

    /// Target video bitrate such as "10 Mbps" or "auto"
    #[arg(short, long)]
    pub bitrate: Option<String>,

    /// cpu, nvidia, amd, intel or auto
    #[arg(short, long)]
    pub encoder: Option<String>,

    /// high, balanced or fast
    #[arg(short, long)]
    pub quality: Option<String>,

    /// GPU adapter name used by --encoder auto (repeatable)
    #[arg(long = "gpu", value_name = "NAME")]
    pub gpus: Vec<String>,

    /// Use this ffmpeg executable instead of searching PATH
    #[arg(long, value_name = "PATH")]
    pub ffmpeg: Option<PathBuf>,

    /// Print batch events as JSON lines
    #[arg(long)]
    pub json: bool,

    /// Echo raw ffmpeg output lines
    #[arg(long)]
    pub show_engine_output: bool,
}

pub fn parse() -> Cli {
    Cli::parse()
}
