//! On-disk cache of fetched road networks.

use super::NetworkError;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

const CACHE_EXTENSION: &str = "geojson";

/// `$XDG_CACHE_HOME/landlensdb/network_cache`.
pub fn default_cache_dir() -> Result<PathBuf, NetworkError> {
    let xdg_dirs = xdg::BaseDirectories::new()?;
    Ok(xdg_dirs.get_cache_home().join("landlensdb").join("network_cache"))
}

/// Creates the default cache directory and returns its path.
pub fn create_network_cache_dir() -> Result<PathBuf, NetworkError> {
    let dir = default_cache_dir()?;
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Deletes cached networks in `cache_dir` (default directory when `None`).
///
/// With `older_than_days`, only files modified more than that many whole days
/// ago are removed. Files that cannot be removed are logged and skipped.
/// Returns the number of removed files.
pub fn clear_network_cache(cache_dir: Option<&Path>, older_than_days: Option<u64>) -> Result<usize, NetworkError> {
    let dir = match cache_dir {
        Some(dir) => dir.to_path_buf(),
        None => default_cache_dir()?,
    };
    if !dir.exists() {
        return Ok(0);
    }

    let now = SystemTime::now();
    let mut removed = 0;
    for entry in fs::read_dir(&dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(CACHE_EXTENSION) {
            continue;
        }
        if let Some(days) = older_than_days {
            let age = fs::metadata(&path)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or(Duration::ZERO);
            if age.as_secs() / 86_400 <= days {
                continue;
            }
        }
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(error) => tracing::warn!(path = %path.display(), %error, "failed to remove cached network"),
        }
    }
    tracing::info!(dir = %dir.display(), removed, "cleared network cache");
    Ok(removed)
}
