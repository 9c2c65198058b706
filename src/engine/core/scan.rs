use super::types::{ConversionSettings, JobSpec};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Default video file extensions to scan for
const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "webm", "mov", "avi", "flv", "m4v", "wmv", "mpeg", "mpg", "3gp", "ts",
];

/// Check if a path has a video file extension
pub fn is_video_file(path: &Path) -> bool {
    if let Some(ext) = path.extension() {
        if let Some(ext_str) = ext.to_str() {
            return VIDEO_EXTENSIONS.contains(&ext_str.to_lowercase().as_str());
        }
    }
    false
}

/// Scan a directory recursively for video files and invoke a callback for each file found
pub fn scan_streaming<F>(root: &Path, mut on_file: F)
where
    F: FnMut(PathBuf),
{
    for entry in WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if path.is_file() && is_video_file(path) {
            on_file(path.to_path_buf());
        }
    }
}

/// Scan a directory recursively for video files
pub fn scan(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    scan_streaming(root, |path| files.push(path));
    files
}

/// Expand user-supplied inputs into a file list.
///
/// Directories are scanned for video files; explicit files are kept as given,
/// whatever their extension. Order follows the inputs.
pub fn collect_inputs(inputs: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            files.extend(scan(input));
        } else {
            files.push(input.clone());
        }
    }
    files
}

/// One job per input file, all sharing the same settings
pub fn build_job_queue(
    files: Vec<PathBuf>,
    output_dir: &Path,
    settings: &ConversionSettings,
) -> Vec<JobSpec> {
    files
        .into_iter()
        .map(|input_path| JobSpec::new(input_path, output_dir, settings))
        .collect()
}
