use image::{DynamicImage, ImageFormat};

use crate::{BridgeError, Result};

/// Decode JPEG data to interleaved 8-bit samples.
///
/// Grayscale JPEGs yield one component per pixel, everything else is
/// converted to RGB.
pub(crate) fn decode(data: &[u8]) -> Result<Vec<u8>> {
    let img = image::load_from_memory_with_format(data, ImageFormat::Jpeg)
        .map_err(|e| BridgeError::CorruptStream(format!("DCTDecode: {e}")))?;

    Ok(match img {
        DynamicImage::ImageLuma8(gray) => gray.into_raw(),
        other => other.to_rgb8().into_raw(),
    })
}
