//! Equirectangular (360°) image helpers.

use image::{DynamicImage, Rgb, RgbImage};
use serde_json::Value;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PanoError {
    #[error("Output size must be non-zero, got {0}x{1}")]
    EmptyOutput(u32, u32),

    #[error("Field of view must be in (0, 180) degrees, got {0}")]
    InvalidFov(f64),

    #[error("Source image is empty")]
    EmptySource,

    #[error("Failed to read or write image: {0}")]
    Image(#[from] image::ImageError),
}

/// GPano projection type as reported by exiftool, under any of its group prefixes.
pub fn projection_type(exif: &Value) -> Option<&str> {
    exif.get("XMP-GPano:ProjectionType")
        .or_else(|| exif.get("GPano:ProjectionType"))
        .or_else(|| exif.get("ProjectionType"))
        .and_then(Value::as_str)
}

pub fn is_equirectangular(exif: &Value) -> bool {
    projection_type(exif).is_some_and(|s| s.eq_ignore_ascii_case("equirectangular"))
}

/// Renders a planar view out of an equirectangular panorama.
///
/// * `fov` - field of view of the output in degrees.
/// * `theta` - yaw in degrees, positive to the right.
/// * `phi` - pitch in degrees.
///
/// Sampling is bilinear and wraps around horizontally, so views across the
/// ±180° seam stay continuous.
pub fn equirectangular_to_perspective(
    img: &RgbImage,
    fov: f64,
    theta: f64,
    phi: f64,
    width: u32,
    height: u32,
) -> Result<RgbImage, PanoError> {
    if width == 0 || height == 0 {
        return Err(PanoError::EmptyOutput(width, height));
    }
    if !(fov > 0.0 && fov < 180.0) {
        return Err(PanoError::InvalidFov(fov));
    }
    if img.width() == 0 || img.height() == 0 {
        return Err(PanoError::EmptySource);
    }

    let src_w = f64::from(img.width());
    let src_h = f64::from(img.height());
    let half_extent = (fov.to_radians() / 2.0).tan();
    let (sin_t, cos_t) = theta.to_radians().sin_cos();
    let (sin_p, cos_p) = phi.to_radians().sin_cos();

    let out = RgbImage::from_par_fn(width, height, |x, y| {
        let gx = linspace(x, width) * half_extent;
        let gy = linspace(y, height) * half_extent;
        let norm = (gx * gx + gy * gy + 1.0).sqrt();
        let (vx, vy, vz) = (gx / norm, gy / norm, 1.0 / norm);

        let x_rot = vx * cos_t - vz * sin_t;
        let z_rot = vx * sin_t + vz * cos_t;
        let y_rot = vy * cos_p - z_rot * sin_p;
        let z_rot = vy * sin_p + z_rot * cos_p;

        let lon = x_rot.atan2(z_rot);
        let lat = y_rot.clamp(-1.0, 1.0).asin();
        let u = (lon + std::f64::consts::PI) / (2.0 * std::f64::consts::PI) * src_w;
        let v = (lat + std::f64::consts::FRAC_PI_2) / std::f64::consts::PI * src_h;
        sample_bilinear_wrap(img, u, v)
    });
    Ok(out)
}

/// Opens a panorama from disk and writes one perspective view next to it.
pub fn perspective_view_file(
    src: &Path,
    dest: &Path,
    fov: f64,
    theta: f64,
    phi: f64,
    size: (u32, u32),
) -> Result<(), PanoError> {
    let pano: RgbImage = image::open(src)?.to_rgb8();
    let view = equirectangular_to_perspective(&pano, fov, theta, phi, size.0, size.1)?;
    DynamicImage::ImageRgb8(view).save(dest)?;
    Ok(())
}

/// `i`-th of `n` evenly spaced values from -1 to 1 inclusive.
fn linspace(i: u32, n: u32) -> f64 {
    if n <= 1 {
        return 0.0;
    }
    -1.0 + 2.0 * f64::from(i) / f64::from(n - 1)
}

fn sample_bilinear_wrap(img: &RgbImage, u: f64, v: f64) -> Rgb<u8> {
    let w = i64::from(img.width());
    let h = i64::from(img.height());
    let x0 = u.floor();
    let y0 = v.floor();
    let fx = u - x0;
    let fy = v - y0;

    let px = |x: i64, y: i64| {
        let x = x.rem_euclid(w) as u32;
        let y = y.clamp(0, h - 1) as u32;
        img.get_pixel(x, y).0
    };
    let (x0, y0) = (x0 as i64, y0 as i64);
    let p00 = px(x0, y0);
    let p10 = px(x0 + 1, y0);
    let p01 = px(x0, y0 + 1);
    let p11 = px(x0 + 1, y0 + 1);

    let mut out = [0u8; 3];
    for c in 0..3 {
        let top = f64::from(p00[c]) * (1.0 - fx) + f64::from(p10[c]) * fx;
        let bottom = f64::from(p01[c]) * (1.0 - fx) + f64::from(p11[c]) * fx;
        out[c] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_is_equirectangular() {
        assert!(is_equirectangular(&json!({ "ProjectionType": "equirectangular" })));
        assert!(is_equirectangular(&json!({ "XMP-GPano:ProjectionType": "Equirectangular" })));
        assert!(!is_equirectangular(&json!({ "ProjectionType": "cylindrical" })));
        assert!(!is_equirectangular(&json!({})));
    }

    #[test]
    fn test_uniform_pano_gives_uniform_view() {
        let pano = RgbImage::from_pixel(64, 32, Rgb([10, 200, 30]));
        let view = equirectangular_to_perspective(&pano, 90.0, 45.0, 10.0, 16, 12).unwrap();
        assert_eq!(view.dimensions(), (16, 12));
        assert!(view.pixels().all(|p| *p == Rgb([10, 200, 30])));
    }

    #[test]
    fn test_view_direction_selects_pano_half() {
        // Left half red, right half blue. Yaw 0 looks at the center column,
        // yaw 180 at the seam, which wraps between the two halves.
        let pano = RgbImage::from_fn(360, 180, |x, _| if x < 180 { Rgb([255, 0, 0]) } else { Rgb([0, 0, 255]) });

        let forward = equirectangular_to_perspective(&pano, 60.0, 0.0, 0.0, 9, 9).unwrap();
        let left = forward.get_pixel(0, 4);
        let right = forward.get_pixel(8, 4);
        assert_eq!(*left, Rgb([255, 0, 0]), "left edge of a forward view is in the left half");
        assert_eq!(*right, Rgb([0, 0, 255]), "right edge of a forward view is in the right half");

        let back = equirectangular_to_perspective(&pano, 60.0, 180.0, 0.0, 9, 9).unwrap();
        assert_eq!(*back.get_pixel(0, 4), Rgb([0, 0, 255]));
        assert_eq!(*back.get_pixel(8, 4), Rgb([255, 0, 0]));
    }

    #[test]
    fn test_rejects_bad_arguments() {
        let pano = RgbImage::new(8, 4);
        assert!(matches!(
            equirectangular_to_perspective(&pano, 90.0, 0.0, 0.0, 0, 10),
            Err(PanoError::EmptyOutput(0, 10))
        ));
        assert!(matches!(
            equirectangular_to_perspective(&pano, 180.0, 0.0, 0.0, 4, 4),
            Err(PanoError::InvalidFov(_))
        ));
        assert!(matches!(
            equirectangular_to_perspective(&RgbImage::new(0, 0), 90.0, 0.0, 0.0, 4, 4),
            Err(PanoError::EmptySource)
        ));
    }
}
