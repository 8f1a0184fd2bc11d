use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use log::{debug, info, warn};

/// Asset file extensions a pool may contain
pub const SUPPORTED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "mp4"];

/// Image extensions; everything else supported is treated as video
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Marker carried by every transient file the pipeline writes
pub const TEMP_MARKER: &str = ".reel-tmp";

/// Prefix left behind by older trim steps that wrote next to their source
const TRIMMED_PREFIX: &str = "trimmed_";

fn lowercase_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
}

/// True for files a pipeline step left behind; these are never candidates
pub fn is_temp_artifact(path: &Path) -> bool {
    match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => name.starts_with(TRIMMED_PREFIX) || name.contains(TEMP_MARKER),
        None => false,
    }
}

pub fn is_supported(path: &Path) -> bool {
    lowercase_extension(path)
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

pub fn is_image(path: &Path) -> bool {
    lowercase_extension(path)
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// List the candidate files of one pool directory, sorted by path.
///
/// Only direct children are considered. A missing or unreadable directory
/// yields an empty listing rather than an error; the caller decides which
/// pool to fall back to.
pub fn list_pool(dir: &Path) -> Vec<PathBuf> {
    if !dir.is_dir() {
        debug!("Pool directory does not exist: {}", dir.display());
        return Vec::new();
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).follow_links(true) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Error reading pool entry in {}: {}", dir.display(), e);
                continue;
            }
        };

        let path = entry.path();
        if !path.is_file() || !is_supported(path) || is_temp_artifact(path) {
            continue;
        }
        files.push(path.to_path_buf());
    }

    files.sort();
    files
}

/// Remove transient files a step may have written into the asset pools.
///
/// Returns the number of files removed. Failures are logged and skipped.
pub fn sweep_stray_files(content_root: &Path) -> usize {
    if !content_root.exists() {
        return 0;
    }

    let strays: Vec<PathBuf> = WalkDir::new(content_root)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_temp_artifact(e.path()))
        .map(|e| e.path().to_path_buf())
        .collect();

    let mut removed = 0;
    for stray in strays {
        match std::fs::remove_file(&stray) {
            Ok(()) => {
                info!("🗑️ Removed stray temp file: {}", stray.display());
                removed += 1;
            }
            Err(e) => warn!("Failed to remove stray temp file {}: {}", stray.display(), e),
        }
    }
    removed
}
