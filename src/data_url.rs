//! Base64 data URLs for inlining images and icons into standalone HTML.

use base64::{Engine as _, engine::general_purpose};
use image::ImageFormat;
use mime_guess::MimeGuess;
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataUrlError {
    #[error("Unsupported file type for data URL generation: {0}")]
    UnsupportedFileType(String),

    #[error("Failed to process image: {0}")]
    ImageProcessing(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Encodes raw bytes as `data:<mime>;base64,...`.
pub fn bytes_to_data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", general_purpose::STANDARD.encode(bytes))
}

/// Encodes an SVG document as a data URL.
pub fn svg_to_data_url(svg: &str) -> String {
    bytes_to_data_url("image/svg+xml", svg.as_bytes())
}

/// Reads a local image and returns it as a JPEG data URL, downscaled to fit
/// within `max_size` while preserving the aspect ratio.
pub fn file_to_data_url<P: AsRef<Path>>(path: P, max_size: (u32, u32)) -> Result<String, DataUrlError> {
    let path = path.as_ref();
    let mime = MimeGuess::from_path(path).first_or_octet_stream();

    if mime.type_() != "image" {
        return Err(DataUrlError::UnsupportedFileType(mime.to_string()));
    }

    let img = image::open(path)?;
    let thumbnail = if img.width() > max_size.0 || img.height() > max_size.1 {
        img.thumbnail(max_size.0, max_size.1)
    } else {
        img
    };
    let mut bytes = Cursor::new(Vec::new());
    thumbnail.to_rgb8().write_to(&mut bytes, ImageFormat::Jpeg)?;
    Ok(bytes_to_data_url("image/jpeg", &bytes.into_inner()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_svg_to_data_url() {
        let url = svg_to_data_url("<svg/>");
        assert_eq!(url, "data:image/svg+xml;base64,PHN2Zy8+");
    }

    #[test]
    fn test_generates_data_url_for_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tile.png");
        RgbImage::from_pixel(40, 20, Rgb([1, 2, 3])).save(&path).unwrap();

        let data_url = file_to_data_url(&path, (10, 10)).unwrap();

        assert!(
            data_url.starts_with("data:image/jpeg;base64,"),
            "Data URL should have the correct JPEG MIME type prefix"
        );
        assert!(data_url.len() > "data:image/jpeg;base64,".len());
    }

    #[test]
    fn test_errs_on_non_image_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "hello").unwrap();

        assert!(matches!(
            file_to_data_url(&path, (10, 10)),
            Err(DataUrlError::UnsupportedFileType(_))
        ));
    }

    #[test]
    fn test_errs_on_corrupted_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, "not a png").unwrap();

        assert!(matches!(
            file_to_data_url(&path, (10, 10)),
            Err(DataUrlError::ImageProcessing(_))
        ));
    }
}
