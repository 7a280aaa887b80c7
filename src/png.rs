//! PNG reading and writing on top of the `png` crate.
//!
//! The writer always emits 8-bit samples, a fixed row filter and only
//! `IHDR`, `PLTE`, `tRNS`, `IDAT` and `IEND`, so a file written here reads
//! back into the same raster and writes out byte for byte the same.

use std::io::{self, Cursor};

use flate2::Crc;
use lopdf::{Dictionary, Object};
use png::{
    BitDepth, ColorType, Decoder, DecodingError, DeflateCompression, Encoder, EncodingError,
    Transformations,
};

use crate::color::ColorSpace;
use crate::filter::{Filter, FilterPipeline, FilterStep};
use crate::object::PassthroughImage;
use crate::sample::{self, RasterImage};
use crate::smask;
use crate::{BridgeError, BridgeOptions, Result, RowFilterStrategy};

pub const SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

const GRAY: u8 = 0;
const RGB: u8 = 2;
const PALETTE: u8 = 3;
const GRAY_ALPHA: u8 = 4;
const RGBA: u8 = 6;

/// Deflate cannot expand its input by more than this factor.
const MAX_INFLATE_RATIO: usize = 1032;

/// The fields of an `IHDR` chunk that matter here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PngHeader {
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
    pub color_type: u8,
    pub interlaced: bool,
}

impl PngHeader {
    /// Samples per pixel as stored.
    pub fn channels(&self) -> usize {
        match self.color_type {
            RGB => 3,
            GRAY_ALPHA => 2,
            RGBA => 4,
            _ => 1,
        }
    }
}

/// A parsed PNG file with its image data still compressed.
#[derive(Debug, Clone)]
pub struct PngFile<'a> {
    bytes: &'a [u8],
    header: PngHeader,
    palette: Option<Vec<u8>>,
    transparency: Option<Vec<u8>>,
    data: Vec<u8>,
}

impl<'a> PngFile<'a> {
    /// Read the header chunks and gather the raw `IDAT` payload.
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        if !bytes.starts_with(&SIGNATURE) {
            return Err(BridgeError::InvalidPngSignature);
        }

        let data = image_data(bytes)?;
        check_color_type(bytes)?;

        let reader = Decoder::new(Cursor::new(bytes))
            .read_info()
            .map_err(|e| decoding_error(e, BridgeError::CorruptChunk))?;
        let info = reader.info();

        let header = PngHeader {
            width: info.width,
            height: info.height,
            bit_depth: info.bit_depth as u8,
            color_type: info.color_type as u8,
            interlaced: info.interlaced,
        };

        if header.color_type == PALETTE && info.palette.is_none() {
            return Err(BridgeError::CorruptChunk("indexed PNG without PLTE".into()));
        }

        Ok(Self {
            bytes,
            header,
            palette: info.palette.as_ref().map(|p| p.to_vec()),
            transparency: info.trns.as_ref().map(|t| t.to_vec()),
            data,
        })
    }

    pub fn header(&self) -> &PngHeader {
        &self.header
    }

    pub fn has_transparency(&self) -> bool {
        self.transparency.is_some()
    }

    /// Whether the concatenated IDAT payload is a valid PDF Flate stream
    /// for the image as it stands: predictor 15 covers PNG row filters.
    pub fn can_passthrough(&self) -> bool {
        !self.header.interlaced
            && self.transparency.is_none()
            && matches!(self.header.color_type, GRAY | RGB)
    }

    /// The compressed payload described as a PDF image, without inflating.
    pub fn passthrough(self) -> Result<PassthroughImage> {
        if !self.can_passthrough() {
            return Err(BridgeError::UnsupportedPngColorType {
                color_type: self.header.color_type,
                bit_depth: self.header.bit_depth,
            });
        }

        let header = self.header;
        let mut parms = Dictionary::new();
        parms.set("Predictor", Object::Integer(15));
        parms.set("Colors", Object::Integer(header.channels() as i64));
        parms.set("BitsPerComponent", Object::Integer(header.bit_depth as i64));
        parms.set("Columns", Object::Integer(header.width as i64));

        Ok(PassthroughImage {
            width: header.width,
            height: header.height,
            bits_per_component: header.bit_depth,
            color_space: ColorSpace::for_channels(header.channels() as u8)?,
            pipeline: FilterPipeline::new(vec![FilterStep {
                filter: Filter::FlateDecode,
                params: Some(parms),
            }]),
            data: self.data,
        })
    }

    /// Inflate, unfilter and normalize to an 8-bit raster.
    ///
    /// Palette images keep their palette and one index per pixel.
    /// Transparency from `tRNS` or an alpha channel ends up in the raster's
    /// alpha.
    pub fn decode(&self) -> Result<RasterImage> {
        let mut decoder = Decoder::new(Cursor::new(self.bytes));
        decoder.set_transformations(Transformations::IDENTITY);
        let mut reader = decoder
            .read_info()
            .map_err(|e| decoding_error(e, BridgeError::CorruptChunk))?;

        let size = reader.output_buffer_size().ok_or_else(|| {
            BridgeError::CorruptStream("image does not fit in memory".into())
        })?;
        let ceiling = self.data.len().saturating_mul(MAX_INFLATE_RATIO);
        if size > ceiling {
            return Err(BridgeError::CorruptStream(format!(
                "{size} bytes of pixels cannot inflate from {} bytes of IDAT",
                self.data.len()
            )));
        }

        let mut raw = vec![0u8; size];
        let frame = reader
            .next_frame(&mut raw)
            .map_err(|e| decoding_error(e, BridgeError::CorruptStream))?;
        raw.truncate(frame.buffer_size());

        let header = &self.header;
        let (w, h, bd) = (header.width, header.height, header.bit_depth);

        match header.color_type {
            PALETTE => {
                let palette = self.palette.clone().unwrap_or_default();
                let entries = palette.len() / 3;
                let mut indices = sample::sample_values(&raw, w, h, bd, 1)?;

                let last = entries.saturating_sub(1) as u8;
                let clamped = indices.iter().filter(|&&i| i > last).count();
                if clamped > 0 {
                    log::warn!("{clamped} pixels index past the {entries}-entry PLTE, clamped");
                    indices.iter_mut().for_each(|i| *i = (*i).min(last));
                }

                let alpha = self.transparency.as_ref().map(|alphas| {
                    indices
                        .iter()
                        .map(|&i| alphas.get(i as usize).copied().unwrap_or(255))
                        .collect()
                });
                let image = RasterImage::indexed(w, h, indices, palette);
                Ok(match alpha {
                    Some(alpha) => image.with_alpha(alpha),
                    None => image,
                })
            }
            GRAY | RGB => {
                let channels = header.channels();
                let samples = sample::normalize(&raw, w, h, bd, channels)?;
                let image = RasterImage::new(w, h, channels as u8, samples);

                match &self.transparency {
                    Some(key) => {
                        let alpha = key_alpha(&raw, header, key)?;
                        Ok(image.with_alpha(alpha))
                    }
                    None => Ok(image),
                }
            }
            _ => {
                let stride = header.channels();
                let pixels = sample::normalize(&raw, w, h, bd, stride)?;
                let (color, alpha) = smask::deinterleave(&pixels, stride);
                Ok(RasterImage::new(w, h, (stride - 1) as u8, color).with_alpha(alpha))
            }
        }
    }
}

/// Parse and decode a PNG file.
pub fn decode(bytes: &[u8]) -> Result<RasterImage> {
    PngFile::parse(bytes)?.decode()
}

fn decoding_error(err: DecodingError, format: fn(String) -> BridgeError) -> BridgeError {
    match err {
        DecodingError::IoError(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            BridgeError::CorruptChunk("file ends inside a chunk".into())
        }
        DecodingError::IoError(e) => BridgeError::Io(e),
        DecodingError::Format(e) => format(e.to_string()),
        DecodingError::LimitsExceeded => {
            BridgeError::CorruptStream("decoder limits exceeded".into())
        }
        other => BridgeError::CorruptStream(other.to_string()),
    }
}

fn encoding_error(err: EncodingError) -> BridgeError {
    match err {
        EncodingError::IoError(e) => BridgeError::Io(e),
        other => BridgeError::CorruptStream(format!("PNG encoder: {other}")),
    }
}

fn chunk_name(kind: &[u8]) -> String {
    String::from_utf8_lossy(kind).into_owned()
}

fn chunk_crc(kind: &[u8], body: &[u8]) -> u32 {
    let mut crc = Crc::new();
    crc.update(kind);
    crc.update(body);
    crc.sum()
}

/// Walk the chunk sequence, verifying every CRC, and concatenate the
/// bodies of the `IDAT` chunks.
fn image_data(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    let mut pos = SIGNATURE.len();

    while pos < bytes.len() {
        let truncated = || BridgeError::CorruptChunk(format!("truncated chunk at offset {pos}"));

        let head = bytes.get(pos..pos + 8).ok_or_else(truncated)?;
        let length = u32::from_be_bytes([head[0], head[1], head[2], head[3]]) as usize;
        let kind = &head[4..8];

        let body_end = (pos + 8).checked_add(length).ok_or_else(truncated)?;
        let body = bytes.get(pos + 8..body_end).ok_or_else(truncated)?;
        let stored = bytes.get(body_end..body_end + 4).ok_or_else(truncated)?;
        if u32::from_be_bytes([stored[0], stored[1], stored[2], stored[3]]) != chunk_crc(kind, body)
        {
            return Err(BridgeError::CorruptChunk(format!(
                "CRC mismatch in {}",
                chunk_name(kind)
            )));
        }

        pos = body_end + 4;
        match kind {
            b"IDAT" => data.extend_from_slice(body),
            b"IEND" => break,
            _ => {}
        }
        if pos >= bytes.len() {
            log::warn!("PNG ends without IEND");
        }
    }

    if data.is_empty() {
        return Err(BridgeError::CorruptChunk("missing IDAT".into()));
    }
    Ok(data)
}

/// Reject color type and depth pairs the format does not define, before
/// the decoder reports them as a generic format error.
fn check_color_type(bytes: &[u8]) -> Result<()> {
    let (Some(&bit_depth), Some(&color_type)) = (bytes.get(24), bytes.get(25)) else {
        return Err(BridgeError::CorruptChunk("missing IHDR".into()));
    };

    let valid = match color_type {
        GRAY => matches!(bit_depth, 1 | 2 | 4 | 8 | 16),
        PALETTE => matches!(bit_depth, 1 | 2 | 4 | 8),
        RGB | GRAY_ALPHA | RGBA => matches!(bit_depth, 8 | 16),
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(BridgeError::UnsupportedPngColorType {
            color_type,
            bit_depth,
        })
    }
}

/// Alpha from a `tRNS` key color, compared at full sample precision.
fn key_alpha(raw: &[u8], header: &PngHeader, key: &[u8]) -> Result<Vec<u8>> {
    let channels = header.channels();
    if key.len() < 2 * channels {
        return Err(BridgeError::CorruptChunk(format!(
            "tRNS has {} bytes",
            key.len()
        )));
    }
    let key: Vec<u16> = key
        .chunks_exact(2)
        .take(channels)
        .map(|k| u16::from_be_bytes([k[0], k[1]]))
        .collect();

    // Sixteen-bit rows never carry padding.
    let values: Vec<u16> = if header.bit_depth == 16 {
        raw.chunks_exact(2)
            .map(|s| u16::from_be_bytes([s[0], s[1]]))
            .collect()
    } else {
        sample::sample_values(raw, header.width, header.height, header.bit_depth, channels)?
            .into_iter()
            .map(u16::from)
            .collect()
    };

    Ok(values
        .chunks_exact(channels)
        .map(|pixel| if pixel == key.as_slice() { 0 } else { 255 })
        .collect())
}

/// The color shared by every fully transparent pixel, when alpha is binary
/// and no opaque pixel uses that color. Such alpha fits in a `tRNS` chunk.
fn transparency_key(samples: &[u8], channels: usize, alpha: &[u8]) -> Option<Vec<u8>> {
    let mut key: Option<&[u8]> = None;

    for (pixel, &a) in samples.chunks_exact(channels).zip(alpha) {
        match a {
            0 => match key {
                None => key = Some(pixel),
                Some(k) if k != pixel => return None,
                Some(_) => {}
            },
            255 => {}
            _ => return None,
        }
    }

    let key = key?;
    let collides = samples
        .chunks_exact(channels)
        .zip(alpha)
        .any(|(pixel, &a)| a == 255 && pixel == key);

    (!collides).then(|| key.to_vec())
}

/// One alpha value per palette entry, when every pixel using an entry has
/// the same alpha. Trailing opaque entries are left out, except the first.
fn palette_alpha(indices: &[u8], entries: usize, alpha: &[u8]) -> Option<Vec<u8>> {
    let mut table = vec![255u8; entries];
    let mut seen = vec![false; entries];

    for (&index, &a) in indices.iter().zip(alpha) {
        let i = index as usize;
        if seen[i] && table[i] != a {
            return None;
        }
        seen[i] = true;
        table[i] = a;
    }

    let used = table.iter().rposition(|&a| a != 255).map_or(1, |i| i + 1);
    table.truncate(used);
    Some(table)
}

fn deflate_level(level: u32) -> DeflateCompression {
    match level.min(9) {
        0 => DeflateCompression::NoCompression,
        n => DeflateCompression::Level(n as u8),
    }
}

/// Encode an 8-bit gray, RGB or palette raster, with optional alpha, as PNG.
pub fn encode(raster: &RasterImage, options: &BridgeOptions) -> Result<Vec<u8>> {
    raster.validate()?;

    let channels = raster.channels as usize;
    let mut palette = None;
    let mut trns = None;

    let (color_type, pixels) = match (&raster.palette, &raster.alpha) {
        (Some(entries), alpha) => {
            if let Some(alpha) = alpha {
                match palette_alpha(&raster.samples, entries.len() / 3, alpha) {
                    Some(table) => trns = Some(table),
                    None => {
                        log::debug!("alpha varies within a palette entry, writing RGBA");
                        return encode(&raster.clone().expand_palette()?, options);
                    }
                }
            }
            palette = Some(entries.clone());
            (ColorType::Indexed, raster.samples.clone())
        }
        (None, alpha) => {
            let plain = match channels {
                1 => ColorType::Grayscale,
                3 => ColorType::Rgb,
                n => {
                    return Err(BridgeError::UnsupportedColorSpace(format!(
                        "{n} channels cannot be stored in PNG"
                    )))
                }
            };

            match alpha {
                None => (plain, raster.samples.clone()),
                Some(alpha) => match transparency_key(&raster.samples, channels, alpha) {
                    Some(key) => {
                        trns = Some(key.iter().flat_map(|&k| [0, k]).collect());
                        (plain, raster.samples.clone())
                    }
                    None => {
                        let with_alpha = if channels == 1 {
                            ColorType::GrayscaleAlpha
                        } else {
                            ColorType::Rgba
                        };
                        (with_alpha, smask::interleave(&raster.samples, channels, alpha))
                    }
                },
            }
        }
    };

    let mut out = Vec::new();
    let mut encoder = Encoder::new(&mut out, raster.width, raster.height);
    encoder.set_color(color_type);
    encoder.set_depth(BitDepth::Eight);
    if let Some(palette) = palette {
        encoder.set_palette(palette);
    }
    if let Some(trns) = trns {
        encoder.set_trns(trns);
    }
    encoder.set_deflate_compression(deflate_level(options.compression_level));
    encoder.set_filter(match options.png_filter {
        RowFilterStrategy::None => png::Filter::NoFilter,
        RowFilterStrategy::Adaptive => png::Filter::Adaptive,
    });

    let mut writer = encoder.write_header().map_err(encoding_error)?;
    writer.write_image_data(&pixels).map_err(encoding_error)?;
    writer.finish().map_err(encoding_error)?;

    Ok(out)
}
