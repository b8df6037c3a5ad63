use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, Rgba, RgbaImage};

/// Longest edge of images sent upstream as references.
pub(crate) const UPLOAD_MAX_DIM: u32 = 1024;

pub(crate) fn guess_image_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        _ => "image/png",
    }
}

/// Loads `path` as a bounded JPEG, flattening transparency onto white.
///
/// Files the decoder cannot read are passed through unchanged.
pub(crate) fn prepare_upload_image(path: &Path, max_dim: u32) -> Result<(Vec<u8>, String)> {
    let dim = max_dim.max(128);
    if let Ok(decoded) = image::open(path) {
        let rgba = decoded.to_rgba8();
        let mut flattened = RgbaImage::new(rgba.width(), rgba.height());
        for (x, y, pixel) in rgba.enumerate_pixels() {
            let alpha = u16::from(pixel[3]);
            let blend = |channel: u8| -> u8 {
                (((u16::from(channel) * alpha) + (255 * (255 - alpha))) / 255) as u8
            };
            flattened.put_pixel(
                x,
                y,
                Rgba([blend(pixel[0]), blend(pixel[1]), blend(pixel[2]), 255]),
            );
        }
        let flattened = DynamicImage::ImageRgba8(flattened);
        let resized = if flattened.width() > dim || flattened.height() > dim {
            flattened.resize(dim, dim, FilterType::Triangle)
        } else {
            flattened
        };
        let mut bytes = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut bytes, 90);
        if encoder
            .encode_image(&DynamicImage::ImageRgb8(resized.to_rgb8()))
            .is_ok()
        {
            return Ok((bytes, "image/jpeg".to_string()));
        }
    }

    let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
    Ok((bytes, guess_image_mime(path).to_string()))
}

pub(crate) fn image_data_url(path: &Path) -> Result<String> {
    let (bytes, mime) = prepare_upload_image(path, UPLOAD_MAX_DIM)?;
    Ok(format!("data:{mime};base64,{}", BASE64.encode(bytes)))
}
