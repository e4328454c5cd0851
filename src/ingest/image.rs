//! Image normalization: decode anything, downscale, re-encode as PNG

use crate::content::{ImageUnit, SourceRef};
use image::{DynamicImage, GenericImageView, ImageFormat};
use std::io::Cursor;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Failed to encode image: {0}")]
    Encode(String),
}

/// Decode `raw` and produce a PNG image unit that fits within `max_dimensions`.
///
/// Images whose larger side exceeds the larger bound are shrunk with the aspect
/// ratio preserved until they fit inside `max_dimensions`. Smaller images are
/// re-encoded at their original size.
pub fn normalize(
    raw: &[u8],
    max_dimensions: (u32, u32),
    source: SourceRef,
) -> Result<ImageUnit, ImageError> {
    let img = image::load_from_memory(raw).map_err(|e| ImageError::Decode(e.to_string()))?;
    let img = fit_within(img, max_dimensions);

    let dimensions = img.dimensions();
    let pixel_data = encode_png(&img)?;

    Ok(ImageUnit {
        source,
        pixel_data,
        dimensions,
    })
}

fn fit_within(img: DynamicImage, (max_w, max_h): (u32, u32)) -> DynamicImage {
    let (w, h) = img.dimensions();
    if w.max(h) > max_w.max(max_h) {
        img.thumbnail(max_w, max_h)
    } else {
        img
    }
}

pub(crate) fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, ImageError> {
    let mut png = Vec::new();
    img.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| ImageError::Encode(e.to_string()))?;
    Ok(png)
}
