//! Image preprocessing: decode, resample to the model's declared input
//! dimensions, and normalize pixel values.

use anyhow::{Context, Result};
use image::imageops::FilterType;

use crate::config::PixelNormalization;

/// Decode `bytes` and produce an NHWC float tensor body of length
/// `height * width * 3`, normalized per `normalization`.
pub fn image_to_tensor(
    bytes: &[u8],
    width: u32,
    height: u32,
    normalization: PixelNormalization,
) -> Result<Vec<f32>> {
    let img = image::load_from_memory(bytes).context("failed to decode image")?;
    let resized = img.resize_exact(width, height, FilterType::Triangle);
    let rgb = resized.to_rgb8();

    let mut tensor = Vec::with_capacity((width * height * 3) as usize);
    for pixel in rgb.pixels() {
        for &channel in &pixel.0 {
            tensor.push(normalize_channel(channel, normalization));
        }
    }

    Ok(tensor)
}

fn normalize_channel(value: u8, normalization: PixelNormalization) -> f32 {
    match normalization {
        PixelNormalization::ZeroToOne => f32::from(value) / 255.0,
        PixelNormalization::MinusOneToOne => f32::from(value) / 127.5 - 1.0,
    }
}
