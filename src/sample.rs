//! Conversion between packed PDF samples and 8-bit interleaved rasters.
//!
//! PDF rows are packed MSB-first and every row starts on a byte boundary.
//! Unpacking always produces 8 bits per channel: depths below 8 are scaled
//! up through a lookup table built from the decode array, 16-bit samples
//! keep their high byte.

use crate::color::{ColorSpace, DecodeArray};
use crate::{BridgeError, Result};

/// A decoded raster, channel-interleaved in row-major order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterImage {
    pub width: u32,
    pub height: u32,
    pub bits_per_sample: u8,
    pub channels: u8,
    pub samples: Vec<u8>,
    /// 8-bit alpha, one byte per pixel.
    pub alpha: Option<Vec<u8>>,
    /// RGB triples. When set, `channels` is 1 and each sample is an index.
    pub palette: Option<Vec<u8>>,
}

impl RasterImage {
    /// An 8-bit raster without alpha.
    pub fn new(width: u32, height: u32, channels: u8, samples: Vec<u8>) -> Self {
        Self {
            width,
            height,
            bits_per_sample: 8,
            channels,
            samples,
            alpha: None,
            palette: None,
        }
    }

    /// A raster of palette indices into `palette`, stored as RGB triples.
    pub fn indexed(width: u32, height: u32, indices: Vec<u8>, palette: Vec<u8>) -> Self {
        Self {
            palette: Some(palette),
            ..Self::new(width, height, 1, indices)
        }
    }

    pub fn with_alpha(mut self, alpha: Vec<u8>) -> Self {
        self.alpha = Some(alpha);
        self
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Resolve palette indices to RGB. Rasters without a palette are
    /// returned as they are.
    pub fn expand_palette(self) -> Result<RasterImage> {
        self.validate()?;
        let Some(palette) = &self.palette else {
            return Ok(self);
        };

        let samples = self
            .samples
            .iter()
            .flat_map(|&i| {
                let at = i as usize * 3;
                [palette[at], palette[at + 1], palette[at + 2]]
            })
            .collect();

        Ok(RasterImage {
            channels: 3,
            samples,
            palette: None,
            ..self
        })
    }

    /// Check the sample and alpha buffers against the geometry.
    pub fn validate(&self) -> Result<()> {
        if self.bits_per_sample != 8 {
            return Err(BridgeError::UnsupportedBitDepth(self.bits_per_sample as u32));
        }

        let pixels = (self.width as usize)
            .checked_mul(self.height as usize)
            .ok_or(BridgeError::DimensionMismatch {
                expected: usize::MAX,
                actual: self.samples.len(),
            })?;
        let expected = pixels.checked_mul(self.channels as usize).ok_or(
            BridgeError::DimensionMismatch {
                expected: usize::MAX,
                actual: self.samples.len(),
            },
        )?;
        if self.samples.len() != expected {
            return Err(BridgeError::DimensionMismatch {
                expected,
                actual: self.samples.len(),
            });
        }

        if let Some(alpha) = &self.alpha {
            if alpha.len() != pixels {
                return Err(BridgeError::DimensionMismatch {
                    expected: pixels,
                    actual: alpha.len(),
                });
            }
        }

        if let Some(palette) = &self.palette {
            if self.channels != 1 || palette.len() % 3 != 0 || !(3..=768).contains(&palette.len())
            {
                return Err(BridgeError::InvalidImageDict(format!(
                    "{}-byte palette for {} channels",
                    palette.len(),
                    self.channels
                )));
            }
            let entries = palette.len() / 3;
            if let Some(&index) = self.samples.iter().find(|&&i| i as usize >= entries) {
                return Err(BridgeError::InvalidImageDict(format!(
                    "index {index} past a {entries}-entry palette"
                )));
            }
        }

        Ok(())
    }
}

/// Bytes per packed row.
pub fn row_bytes(width: u32, bits_per_sample: u8, components: usize) -> usize {
    (width as usize * components * bits_per_sample as usize).div_ceil(8)
}

fn check_depth(bits_per_sample: u8) -> Result<()> {
    match bits_per_sample {
        1 | 2 | 4 | 8 | 16 => Ok(()),
        other => Err(BridgeError::UnsupportedBitDepth(other as u32)),
    }
}

/// Largest integer value a sample can hold once 16-bit samples are cut to
/// their high byte.
fn max_value(bits_per_sample: u8) -> u32 {
    (1u32 << bits_per_sample.min(8)) - 1
}

fn read_sample(row: &[u8], index: usize, bits_per_sample: u8) -> u8 {
    match bits_per_sample {
        8 => row[index],
        16 => row[index * 2],
        bps => {
            let bit = index * bps as usize;
            let shift = 8 - bps as usize - bit % 8;
            (row[bit / 8] >> shift) & ((1u8 << bps) - 1)
        }
    }
}

/// Read every packed sample as an integer, dropping row padding.
pub(crate) fn sample_values(
    raw: &[u8],
    width: u32,
    height: u32,
    bits_per_sample: u8,
    components: usize,
) -> Result<Vec<u8>> {
    check_depth(bits_per_sample)?;

    if components == 0 {
        return Err(BridgeError::UnsupportedColorSpace("zero components".into()));
    }
    if width == 0 || height == 0 {
        return Err(BridgeError::InvalidImageDict(format!(
            "image is {width}x{height}"
        )));
    }

    let mismatch = |expected| BridgeError::DimensionMismatch {
        expected,
        actual: raw.len(),
    };
    let per_row = (width as usize)
        .checked_mul(components)
        .ok_or(mismatch(usize::MAX))?;
    let stride = per_row
        .checked_mul(bits_per_sample as usize)
        .ok_or(mismatch(usize::MAX))?
        .div_ceil(8);
    let expected = stride
        .checked_mul(height as usize)
        .ok_or(mismatch(usize::MAX))?;
    if raw.len() != expected {
        return Err(mismatch(expected));
    }

    let mut values = Vec::with_capacity(per_row * height as usize);
    for row in raw.chunks_exact(stride) {
        if bits_per_sample == 8 {
            values.extend_from_slice(&row[..per_row]);
        } else {
            values.extend((0..per_row).map(|i| read_sample(row, i, bits_per_sample)));
        }
    }

    Ok(values)
}

/// Map every integer value of one component through `[dmin, dmax]` into
/// the 8-bit range.
fn component_lut(bits_per_sample: u8, dmin: f32, dmax: f32) -> Vec<u8> {
    let max = max_value(bits_per_sample);
    (0..=max)
        .map(|v| {
            let t = dmin + v as f32 * (dmax - dmin) / max as f32;
            (t.clamp(0.0, 1.0) * 255.0).round() as u8
        })
        .collect()
}

/// Expand packed samples to 8 bits per component with the identity mapping.
///
/// Used by the container readers, whose samples carry no decode array.
pub(crate) fn normalize(
    raw: &[u8],
    width: u32,
    height: u32,
    bits_per_sample: u8,
    components: usize,
) -> Result<Vec<u8>> {
    let values = sample_values(raw, width, height, bits_per_sample, components)?;
    if bits_per_sample >= 8 {
        return Ok(values);
    }

    let lut = component_lut(bits_per_sample, 0.0, 1.0);
    Ok(values.into_iter().map(|v| lut[v as usize]).collect())
}

/// The decode array to apply, after checking it covers every component.
fn decode_array(
    decode: Option<&DecodeArray>,
    color_space: &ColorSpace,
    bits_per_sample: u8,
) -> Result<DecodeArray> {
    let needed = 2 * color_space.components();
    match decode {
        Some(d) if d.len() >= needed => Ok(d.clone()),
        Some(d) => Err(BridgeError::InvalidImageDict(format!(
            "Decode has {} entries, {} needs {needed}",
            d.len(),
            color_space.name()
        ))),
        None => Ok(DecodeArray::default_for(color_space, bits_per_sample)),
    }
}

/// Unpack PDF image samples into an 8-bit raster.
///
/// Indexed images are resolved through their lookup table, so the result
/// has the base space's channel count. Palette indices beyond `hival` are
/// clamped to the last entry and reported once as a warning.
pub fn unpack(
    raw: &[u8],
    width: u32,
    height: u32,
    bits_per_sample: u8,
    color_space: &ColorSpace,
    decode: Option<&DecodeArray>,
) -> Result<RasterImage> {
    let components = color_space.components();
    let values = sample_values(raw, width, height, bits_per_sample, components)?;
    let decode = decode_array(decode, color_space, bits_per_sample)?;

    let samples = match color_space {
        ColorSpace::Indexed { .. } => {
            let palette = indexed_palette(color_space, bits_per_sample)?;
            let n = color_space.output_components();
            palette_indices(&values, bits_per_sample, palette.len() / n, &decode)
                .into_iter()
                .flat_map(|i| &palette[i as usize * n..i as usize * n + n])
                .copied()
                .collect()
        }
        _ => {
            let luts: Vec<Vec<u8>> = (0..components)
                .map(|c| {
                    let (dmin, dmax) = decode.range(c);
                    component_lut(bits_per_sample, dmin, dmax)
                })
                .collect();

            values
                .iter()
                .enumerate()
                .map(|(i, &v)| luts[i % components][v as usize])
                .collect()
        }
    };

    Ok(RasterImage::new(
        width,
        height,
        color_space.output_components() as u8,
        samples,
    ))
}

/// Unpack an Indexed image over an RGB base without resolving its
/// palette, so a container can store the indices as they are.
pub(crate) fn unpack_indexed(
    raw: &[u8],
    width: u32,
    height: u32,
    bits_per_sample: u8,
    color_space: &ColorSpace,
    decode: Option<&DecodeArray>,
) -> Result<RasterImage> {
    let palette = indexed_palette(color_space, bits_per_sample)?;
    if color_space.output_components() != 3 {
        return Err(BridgeError::UnsupportedColorSpace(format!(
            "Indexed over {} components",
            color_space.output_components()
        )));
    }

    let values = sample_values(raw, width, height, bits_per_sample, 1)?;
    let decode = decode_array(decode, color_space, bits_per_sample)?;
    let indices = palette_indices(&values, bits_per_sample, palette.len() / 3, &decode);

    Ok(RasterImage::indexed(width, height, indices, palette.to_vec()))
}

fn indexed_palette(color_space: &ColorSpace, bits_per_sample: u8) -> Result<&[u8]> {
    if bits_per_sample > 8 {
        return Err(BridgeError::UnsupportedBitDepth(bits_per_sample as u32));
    }
    color_space
        .palette()
        .ok_or_else(|| BridgeError::InvalidImageDict("Indexed lookup table is empty".into()))
}

/// Remap packed indices through the decode array and clamp them to the
/// last of `entries` palette colors.
fn palette_indices(
    values: &[u8],
    bits_per_sample: u8,
    entries: usize,
    decode: &DecodeArray,
) -> Vec<u8> {
    let max = max_value(bits_per_sample) as f32;
    let (dmin, dmax) = decode.range(0);
    let remap = dmin != 0.0 || dmax != max;
    let last = entries.saturating_sub(1).min(255) as u8;
    let mut clamped = 0usize;

    let indices = values
        .iter()
        .map(|&raw_index| {
            let index = if remap {
                (dmin + raw_index as f32 * (dmax - dmin) / max)
                    .round()
                    .clamp(0.0, 255.0) as u8
            } else {
                raw_index
            };
            if index > last {
                clamped += 1;
                last
            } else {
                index
            }
        })
        .collect();

    if clamped > 0 {
        log::warn!("{clamped} palette indices exceed the last entry {last}, clamped");
    }
    indices
}

/// Pack an 8-bit raster into PDF samples of `target_bps` bits.
///
/// Values are quantized to the nearest level of the target depth. The
/// returned decode array is always the identity: polarity is never
/// inferred from content.
pub fn pack(raster: &RasterImage, target_bps: u8) -> Result<(Vec<u8>, DecodeArray)> {
    check_depth(target_bps)?;
    raster.validate()?;

    let channels = raster.channels as usize;
    let per_row = raster.width as usize * channels;
    let stride = row_bytes(raster.width, target_bps, channels);
    let mut out = Vec::with_capacity(stride * raster.height as usize);

    for row in raster.samples.chunks_exact(per_row) {
        match target_bps {
            8 => out.extend_from_slice(row),
            16 => out.extend(row.iter().flat_map(|&v| [v, v])),
            bps => {
                let max = max_value(bps);
                let start = out.len();
                out.resize(start + stride, 0);
                for (i, &v) in row.iter().enumerate() {
                    let q = ((v as u32 * max + 127) / 255) as u8;
                    let bit = i * bps as usize;
                    let shift = 8 - bps as usize - bit % 8;
                    out[start + bit / 8] |= q << shift;
                }
            }
        }
    }

    Ok((out, DecodeArray::identity(channels)))
}

/// The smallest of 1, 2, 4 and 8 bits that represents every sample of
/// `samples` without loss.
pub fn smallest_depth(samples: &[u8]) -> u8 {
    [1u8, 2, 4]
        .into_iter()
        .find(|&bps| {
            let step = 255 / max_value(bps) as u8;
            samples.iter().all(|&v| v % step == 0)
        })
        .unwrap_or(8)
}
