use super::types::{JobSpec, normalize_bitrate};
use std::borrow::Cow;
use std::path::Path;
use std::process::Command;

/// Audio codec set explicitly alongside every video encoder
const AUDIO_CODEC: &str = "aac";

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Build the ffmpeg argument list for a job (program name excluded).
///
/// Order: overwrite + input, encoder, scale, bitrate, quality, output.
pub fn build_ffmpeg_args(job: &JobSpec) -> Vec<String> {
    let mut args = vec!["-y".to_string(), "-i".to_string(), path_arg(&job.input_path)];

    // Vendor encoders don't pick a usable audio codec on their own, so audio is always explicit
    args.push("-vcodec".to_string());
    args.push(job.encoder_profile.video_encoder().to_string());
    args.push("-acodec".to_string());
    args.push(AUDIO_CODEC.to_string());

    if let Some(resolution) = job.resolution {
        args.push("-s".to_string());
        args.push(resolution.to_string());
    }

    if let Some(bitrate) = job.target_bitrate.as_deref().and_then(normalize_bitrate) {
        args.push("-b:v".to_string());
        args.push(bitrate);
    }

    args.push("-crf".to_string());
    args.push(job.quality_preset.crf.to_string());
    args.push("-preset".to_string());
    args.push(job.quality_preset.speed.clone());

    args.push(path_arg(&job.output_path));
    args
}

/// Minimal remux command: copy every stream into the output container untouched
pub fn build_stream_copy_args(job: &JobSpec) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-i".to_string(),
        path_arg(&job.input_path),
        "-c".to_string(),
        "copy".to_string(),
        path_arg(&job.output_path),
    ]
}

/// Build a runnable command for a job against a located engine
pub fn build_ffmpeg_cmd(engine: &Path, job: &JobSpec) -> Command {
    let mut cmd = Command::new(engine);
    cmd.args(build_ffmpeg_args(job));
    cmd
}

/// Quote one argument for the platform command interpreter
pub fn quote_for_shell(arg: &str) -> Cow<'_, str> {
    if cfg!(windows) {
        Cow::Owned(format!("\"{}\"", arg.replace('"', "\\\"")))
    } else {
        // Arguments can't contain NUL bytes, so quoting only fails on input we never produce
        shlex::try_quote(arg).unwrap_or(Cow::Borrowed(arg))
    }
}

/// Render program + args as a single shell-interpretable line with every argument quoted
pub fn shell_command_line(program: &Path, args: &[String]) -> String {
    let program = path_arg(program);
    std::iter::once(program.as_str())
        .chain(args.iter().map(String::as_str))
        .map(quote_for_shell)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Human-readable command line for logs and dry runs
pub fn format_ffmpeg_cmd(program: &Path, args: &[String]) -> String {
    std::iter::once(path_arg(program))
        .chain(args.iter().cloned())
        .map(|arg| {
            if arg.contains(char::is_whitespace) || arg.is_empty() {
                quote_for_shell(&arg).into_owned()
            } else {
                arg
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
