//! Soft masks: moving alpha between a raster and a separate gray image.

use crate::sample::RasterImage;
use crate::{BridgeError, Result};

/// Split a raster into its color part and its alpha as a gray image.
///
/// Any alpha channel present becomes a mask, including a fully opaque one.
pub fn split_alpha(mut raster: RasterImage) -> (RasterImage, Option<RasterImage>) {
    let Some(alpha) = raster.alpha.take() else {
        return (raster, None);
    };

    let mask = RasterImage::new(raster.width, raster.height, 1, alpha);
    (raster, Some(mask))
}

/// Attach a decoded soft mask to a color raster as its alpha channel.
///
/// The mask must have the same dimensions as the image; it is never
/// resampled.
pub fn merge_alpha(mut color: RasterImage, mask: Option<RasterImage>) -> Result<RasterImage> {
    let Some(mask) = mask else {
        return Ok(color);
    };

    if mask.width != color.width || mask.height != color.height {
        return Err(BridgeError::MaskDimensionMismatch {
            width: color.width,
            height: color.height,
            mask_width: mask.width,
            mask_height: mask.height,
        });
    }

    if mask.channels != 1 {
        return Err(BridgeError::UnsupportedColorSpace(format!(
            "soft mask with {} channels",
            mask.channels
        )));
    }

    mask.validate()?;
    color.alpha = Some(mask.samples);
    Ok(color)
}

/// Interleave a trailing alpha sample after each pixel's color channels.
pub(crate) fn interleave(samples: &[u8], channels: usize, alpha: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() + alpha.len());
    for (pixel, &a) in samples.chunks_exact(channels).zip(alpha) {
        out.extend_from_slice(pixel);
        out.push(a);
    }
    out
}

/// Split pixels of `stride` samples, the last of which is alpha, into color
/// samples and an alpha plane.
pub(crate) fn deinterleave(pixels: &[u8], stride: usize) -> (Vec<u8>, Vec<u8>) {
    let count = pixels.len() / stride;
    let mut color = Vec::with_capacity(count * (stride - 1));
    let mut alpha = Vec::with_capacity(count);
    for pixel in pixels.chunks_exact(stride) {
        color.extend_from_slice(&pixel[..stride - 1]);
        alpha.push(pixel[stride - 1]);
    }
    (color, alpha)
}
