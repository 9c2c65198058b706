mod ffmpeg_cmd;
mod ffmpeg_info;
mod log;
mod progress;
mod scan;
mod types;

pub use ffmpeg_cmd::{
    build_ffmpeg_args, build_ffmpeg_cmd, build_stream_copy_args, format_ffmpeg_cmd,
    quote_for_shell, shell_command_line,
};
pub use ffmpeg_info::{
    ENGINE_PROGRAM, EngineLocator, EnginePath, LocateError, engine_version, executable_name,
    locate_engine,
};
pub use log::{init_tracing, write_debug_log};
pub use progress::{
    DURATION_MARKER, MarkerUpdate, POSITION_MARKER, ProgressParser, ProgressState,
    overall_percent, parse_timestamp,
};
pub use scan::{build_job_queue, collect_inputs, is_video_file, scan, scan_streaming};
pub use types::{
    ConversionSettings, EncoderProfile, JobSpec, JobStatus, QualityPreset, RESOLUTION_PRESETS,
    Resolution, SUPPORTED_FORMATS, SettingsError, derive_output_path, normalize_bitrate,
    parse_container_format,
};
