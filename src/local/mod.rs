//! Loading geotagged images from a local directory.

pub mod geotag;

pub use geotag::{Geotag, dms_to_decimal, extract_geotag, infer_camera_type, parse_rational, record_from_exif};

use crate::frame::GeoImageFrame;
use crate::frame::error::FrameError;
use bon::bon;
use exiftool::ExifTool;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

/// Extensions (lowercase) picked up by [`LocalImageLoader::load_images`].
pub const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

#[derive(Error, Debug)]
pub enum ExifError {
    #[error("No EXIF geotagging found")]
    NoGeotag,

    #[error("Invalid coordinates: latitude {latitude}, longitude {longitude}")]
    InvalidCoordinates { latitude: f64, longitude: f64 },

    #[error("Exiftool failed to execute or process the file")]
    Exiftool(#[from] exiftool::ExifToolError),

    #[error("Failed to walk directory: {0}")]
    Walk(#[from] walkdir::Error),

    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Builds a [`GeoImageFrame`] out of the geotagged photos in a directory.
///
/// ```rust,no_run
/// # use landlensdb::local::{LocalImageLoader, ExifError};
/// # fn main() -> Result<(), ExifError> {
/// let mut loader = LocalImageLoader::builder().build()?;
/// let frame = loader.load_images("photos/")?;
/// println!("{} geotagged images", frame.len());
/// # Ok(())
/// # }
/// ```
pub struct LocalImageLoader {
    exiftool: ExifTool,
    include_hidden: bool,
}

#[bon]
impl LocalImageLoader {
    /// # Builder Arguments
    ///
    /// * `exiftool_path` - An optional path to a specific `exiftool` executable. If `None`, `exiftool` is searched for in `PATH`.
    /// * `include_hidden` - (Default: `false`) Also descend into entries whose name starts with `.`.
    ///
    /// # Errors
    ///
    /// [`ExifError::Exiftool`] when the `exiftool` executable cannot be found or fails to start.
    #[builder]
    pub fn new(exiftool_path: Option<PathBuf>, #[builder(default)] include_hidden: bool) -> Result<Self, ExifError> {
        let exiftool = match exiftool_path {
            Some(path) => ExifTool::with_executable(&path)?,
            None => ExifTool::new()?,
        };
        Ok(Self {
            exiftool,
            include_hidden,
        })
    }

    /// Reads every `.png`/`.jpg`/`.jpeg` file below `directory`.
    ///
    /// Files without a usable geotag are skipped with a warning. Errors from
    /// walking the directory abort the load.
    pub fn load_images(&mut self, directory: impl AsRef<Path>) -> Result<GeoImageFrame, ExifError> {
        let directory = directory.as_ref();
        let files = list_image_files(directory, self.include_hidden)?;
        tracing::debug!(dir = %directory.display(), files = files.len(), "scanning images");

        let mut records = Vec::with_capacity(files.len());
        for file in files {
            let exif = match self.exiftool.json(&file, &["-n"]) {
                Ok(exif) => exif,
                Err(error) => {
                    tracing::warn!(path = %file.display(), %error, "could not read EXIF, skipped");
                    continue;
                }
            };
            match record_from_exif(&file, &exif) {
                Ok(record) => records.push(record),
                Err(error) => {
                    tracing::warn!(path = %file.display(), %error, "error extracting geotags, skipped");
                }
            }
        }

        tracing::info!(dir = %directory.display(), images = records.len(), "loaded local images");
        Ok(GeoImageFrame::new(records)?)
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .is_some_and(|s| s.starts_with('.'))
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.iter().any(|x| e.eq_ignore_ascii_case(x)))
}

/// Recursively lists image files, sorted by path.
pub fn list_image_files(dir: &Path, include_hidden: bool) -> Result<Vec<PathBuf>, walkdir::Error> {
    let mut files = WalkDir::new(dir)
        .into_iter()
        .filter_entry(|e| include_hidden || !is_hidden(e))
        .filter_map(|entry| match entry {
            Ok(entry) if entry.file_type().is_file() && has_image_extension(entry.path()) => {
                Some(Ok(entry.into_path()))
            }
            Ok(_) => None,
            Err(e) => Some(Err(e)),
        })
        .collect::<Result<Vec<_>, _>>()?;
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_list_image_files_filters_extension_and_hidden() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::create_dir_all(root.join(".cache")).unwrap();
        for name in ["a.jpg", "b.JPEG", "sub/c.png", "notes.txt", ".hidden.jpg", ".cache/d.jpg"] {
            fs::write(root.join(name), b"x").unwrap();
        }

        let files = list_image_files(root, false).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(names, vec!["a.jpg", "b.JPEG", "sub/c.png"]);

        let with_hidden = list_image_files(root, true).unwrap();
        assert_eq!(with_hidden.len(), 5);
    }

    #[test]
    fn test_list_image_files_missing_dir_errors() {
        assert!(list_image_files(Path::new("/definitely/not/here"), false).is_err());
    }

    #[test]
    #[ignore = "requires exiftool on PATH"]
    fn test_load_images_skips_untagged_files() {
        let dir = tempfile::tempdir().unwrap();
        image::RgbImage::new(8, 8).save(dir.path().join("plain.png")).unwrap();

        let mut loader = LocalImageLoader::builder().build().unwrap();
        let frame = loader.load_images(dir.path()).unwrap();
        assert!(frame.is_empty(), "an image without GPS tags must be skipped");
    }
}
