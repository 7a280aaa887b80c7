//! TIFF reading and writing on top of the `tiff` crate.
//!
//! Only the first IFD is read. Written files hold a single IFD with a
//! single Deflate strip, in the machine's byte order.

use std::io::{self, Cursor};

use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::colortype::{self, ColorType};
use tiff::encoder::{Compression, DeflateLevel, TiffEncoder};
use tiff::tags::{ExtraSamples, Tag};
use tiff::{TiffError, TiffFormatError, TiffResult, TiffUnsupportedError};

use crate::color::ColorSpace;
use crate::filter::{Filter, FilterPipeline};
use crate::object::PassthroughImage;
use crate::sample::{self, RasterImage};
use crate::smask;
use crate::{BridgeError, BridgeOptions, Result};

const COMPRESSION_NONE: u16 = 1;
const COMPRESSION_LZW: u16 = 5;
const COMPRESSION_DEFLATE: u16 = 8;
const COMPRESSION_DEFLATE_OLD: u16 = 32946;
const COMPRESSION_PACKBITS: u16 = 32773;

const WHITE_IS_ZERO: u16 = 0;
const BLACK_IS_ZERO: u16 = 1;
const PHOTOMETRIC_RGB: u16 = 2;
const PHOTOMETRIC_PALETTE: u16 = 3;
const SEPARATED: u16 = 5;

const ASSOCIATED_ALPHA: u16 = 1;
const UNASSOCIATED_ALPHA: u16 = 2;

type TiffReader<'a> = Decoder<Cursor<&'a [u8]>>;

fn tiff_error(err: TiffError) -> BridgeError {
    match err {
        TiffError::IoError(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            BridgeError::CorruptChunk("TIFF data ends early".into())
        }
        TiffError::IoError(e) => BridgeError::Io(e),
        TiffError::FormatError(TiffFormatError::RequiredTagNotFound(tag)) => {
            BridgeError::MissingRequiredTag(format!("{tag:?}"))
        }
        TiffError::FormatError(e) => BridgeError::CorruptChunk(e.to_string()),
        TiffError::UnsupportedError(TiffUnsupportedError::UnsupportedCompressionMethod(m)) => {
            BridgeError::UnsupportedTiffCompression(m.to_u16() as u32)
        }
        TiffError::UnsupportedError(e) => BridgeError::UnsupportedTiffLayout(e.to_string()),
        TiffError::LimitsExceeded => {
            BridgeError::CorruptStream("TIFF decoder limits exceeded".into())
        }
        other => BridgeError::CorruptChunk(other.to_string()),
    }
}

fn tag_or(decoder: &mut TiffReader<'_>, tag: Tag, default: u16) -> Result<u16> {
    Ok(decoder
        .find_tag_unsigned::<u16>(tag)
        .map_err(tiff_error)?
        .unwrap_or(default))
}

fn tag_values(decoder: &mut TiffReader<'_>, tag: Tag) -> Result<Option<Vec<u64>>> {
    decoder.find_tag_unsigned_vec::<u64>(tag).map_err(tiff_error)
}

/// The first image of a TIFF file, with its strips still compressed.
#[derive(Debug, Clone)]
pub struct TiffFile<'a> {
    bytes: &'a [u8],
    width: u32,
    height: u32,
    bits_per_sample: u8,
    samples_per_pixel: u16,
    compression: u16,
    photometric: u16,
    fill_order: u16,
    planar: u16,
    predictor: u16,
    extra_samples: Vec<u16>,
    /// Offset and byte count of every strip.
    strips: Vec<(u64, u64)>,
}

impl<'a> TiffFile<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        let mut decoder = Decoder::new(Cursor::new(bytes)).map_err(tiff_error)?;
        let (width, height) = decoder.dimensions().map_err(tiff_error)?;
        if width == 0 || height == 0 {
            return Err(BridgeError::CorruptChunk(format!(
                "image is {width}x{height}"
            )));
        }

        let bits = tag_values(&mut decoder, Tag::BitsPerSample)?.unwrap_or_else(|| vec![1]);
        if bits.windows(2).any(|w| w[0] != w[1]) {
            return Err(BridgeError::UnsupportedTiffLayout(format!(
                "mixed bits per sample {bits:?}"
            )));
        }
        let first = bits.first().copied().unwrap_or(1);
        let bits_per_sample = u8::try_from(first)
            .map_err(|_| BridgeError::UnsupportedBitDepth(first.min(u32::MAX as u64) as u32))?;

        let photometric = decoder
            .find_tag_unsigned::<u16>(Tag::PhotometricInterpretation)
            .map_err(tiff_error)?
            .ok_or_else(|| BridgeError::MissingRequiredTag("PhotometricInterpretation".into()))?;

        let offsets = tag_values(&mut decoder, Tag::StripOffsets)?
            .ok_or_else(|| BridgeError::MissingRequiredTag("StripOffsets".into()))?;
        let counts = tag_values(&mut decoder, Tag::StripByteCounts)?
            .ok_or_else(|| BridgeError::MissingRequiredTag("StripByteCounts".into()))?;

        let extra_samples = decoder
            .find_tag_unsigned_vec::<u16>(Tag::ExtraSamples)
            .map_err(tiff_error)?
            .unwrap_or_default();

        Ok(Self {
            bytes,
            width,
            height,
            bits_per_sample,
            samples_per_pixel: tag_or(&mut decoder, Tag::SamplesPerPixel, 1)?,
            compression: tag_or(&mut decoder, Tag::Compression, COMPRESSION_NONE)?,
            photometric,
            fill_order: tag_or(&mut decoder, Tag::FillOrder, 1)?,
            planar: tag_or(&mut decoder, Tag::PlanarConfiguration, 1)?,
            predictor: tag_or(&mut decoder, Tag::Predictor, 1)?,
            extra_samples,
            strips: offsets.into_iter().zip(counts).collect(),
        })
    }

    pub fn compression(&self) -> u16 {
        self.compression
    }

    /// Color channels implied by the photometric interpretation.
    fn color_channels(&self) -> Result<usize> {
        match self.photometric {
            WHITE_IS_ZERO | BLACK_IS_ZERO => Ok(1),
            PHOTOMETRIC_RGB => Ok(3),
            SEPARATED => Ok(4),
            PHOTOMETRIC_PALETTE => Err(BridgeError::UnsupportedColorSpace(
                "TIFF palette images".into(),
            )),
            other => Err(BridgeError::UnsupportedColorSpace(format!(
                "TIFF photometric interpretation {other}"
            ))),
        }
    }

    /// Whether the single strip is a Flate stream PDF can store as-is.
    pub fn can_passthrough(&self) -> bool {
        matches!(
            self.compression,
            COMPRESSION_DEFLATE | COMPRESSION_DEFLATE_OLD
        ) && self.strips.len() == 1
            && self.predictor == 1
            && self.planar == 1
            && self.fill_order == 1
            && matches!(self.photometric, BLACK_IS_ZERO | PHOTOMETRIC_RGB | SEPARATED)
            && self.color_channels().ok() == Some(self.samples_per_pixel as usize)
            && matches!(self.bits_per_sample, 1 | 2 | 4 | 8)
    }

    /// The compressed strip described as a PDF image, without inflating.
    pub fn passthrough(self) -> Result<PassthroughImage> {
        if !self.can_passthrough() {
            return Err(BridgeError::UnsupportedTiffLayout(
                "strip cannot be stored as a Flate stream".into(),
            ));
        }

        let (offset, len) = self.strips[0];
        let strip = usize::try_from(offset)
            .ok()
            .zip(usize::try_from(len).ok())
            .and_then(|(start, len)| self.bytes.get(start..start.checked_add(len)?))
            .ok_or_else(|| {
                BridgeError::CorruptChunk(format!(
                    "{len} bytes at offset {offset} lie outside the file"
                ))
            })?;

        Ok(PassthroughImage {
            width: self.width,
            height: self.height,
            bits_per_component: self.bits_per_sample,
            color_space: ColorSpace::for_channels(self.samples_per_pixel as u8)?,
            pipeline: FilterPipeline::single(Filter::FlateDecode),
            data: strip.to_vec(),
        })
    }

    /// Reject layouts the strip reader does not handle.
    fn check_layout(&self) -> Result<()> {
        if self.planar != 1 {
            return Err(BridgeError::UnsupportedTiffLayout(format!(
                "planar configuration {}",
                self.planar
            )));
        }

        if !matches!(
            self.compression,
            COMPRESSION_NONE
                | COMPRESSION_LZW
                | COMPRESSION_DEFLATE
                | COMPRESSION_DEFLATE_OLD
                | COMPRESSION_PACKBITS
        ) {
            return Err(BridgeError::UnsupportedTiffCompression(self.compression as u32));
        }

        if !matches!(self.predictor, 1 | 2) {
            return Err(BridgeError::UnsupportedTiffLayout(format!(
                "predictor {}",
                self.predictor
            )));
        }

        // Reversed bit order is only undone on raw samples.
        match self.fill_order {
            1 => Ok(()),
            2 if self.compression == COMPRESSION_NONE && self.predictor == 1 => Ok(()),
            other => Err(BridgeError::UnsupportedTiffLayout(format!(
                "fill order {other} with compression {} and predictor {}",
                self.compression, self.predictor
            ))),
        }
    }

    /// Decompress every strip and normalize to an 8-bit raster.
    pub fn decode(&self) -> Result<RasterImage> {
        self.check_layout()?;

        let color = self.color_channels()?;
        let spp = self.samples_per_pixel as usize;
        if spp < color {
            return Err(BridgeError::UnsupportedTiffLayout(format!(
                "{spp} samples per pixel for photometric {}",
                self.photometric
            )));
        }
        if self.photometric == WHITE_IS_ZERO && spp > 1 {
            return Err(BridgeError::UnsupportedTiffLayout(
                "WhiteIsZero with extra samples".into(),
            ));
        }

        let mut decoder = Decoder::new(Cursor::new(self.bytes)).map_err(tiff_error)?;
        let mut data = match decoder.read_image().map_err(tiff_error)? {
            DecodingResult::U8(data) => data,
            DecodingResult::U16(data) => data.iter().flat_map(|v| v.to_be_bytes()).collect(),
            _ => return Err(BridgeError::UnsupportedBitDepth(self.bits_per_sample as u32)),
        };

        if self.fill_order == 2 {
            data.iter_mut().for_each(|b| *b = b.reverse_bits());
        }

        let (w, h) = (self.width, self.height);
        let pixels = sample::normalize(&data, w, h, self.bits_per_sample, spp)?;

        let (samples, alpha) = if spp == color {
            (pixels, None)
        } else {
            let kind = self.extra_samples.first().copied().unwrap_or(0);
            let (samples, alpha) = split_extra(&pixels, spp, color);
            match kind {
                ASSOCIATED_ALPHA | UNASSOCIATED_ALPHA => (samples, Some((kind, alpha))),
                _ => {
                    log::debug!("ignoring {} unspecified extra samples", spp - color);
                    (samples, None)
                }
            }
        };

        let image = RasterImage::new(w, h, color as u8, samples);
        Ok(match alpha {
            Some((ASSOCIATED_ALPHA, alpha)) => {
                let mut image = image;
                unpremultiply(&mut image.samples, color, &alpha);
                image.with_alpha(alpha)
            }
            Some((_, alpha)) => image.with_alpha(alpha),
            None => image,
        })
    }
}

/// Parse and decode a TIFF file.
pub fn decode(bytes: &[u8]) -> Result<RasterImage> {
    TiffFile::parse(bytes)?.decode()
}

/// Keep the first `color` samples of each pixel and the one after them.
fn split_extra(pixels: &[u8], spp: usize, color: usize) -> (Vec<u8>, Vec<u8>) {
    if spp == color + 1 {
        return smask::deinterleave(pixels, spp);
    }

    let mut samples = Vec::with_capacity(pixels.len() / spp * color);
    let mut alpha = Vec::with_capacity(pixels.len() / spp);
    for pixel in pixels.chunks_exact(spp) {
        samples.extend_from_slice(&pixel[..color]);
        alpha.push(pixel[color]);
    }
    (samples, alpha)
}

fn unpremultiply(samples: &mut [u8], channels: usize, alpha: &[u8]) {
    for (pixel, &a) in samples.chunks_exact_mut(channels).zip(alpha) {
        if a == 0 || a == 255 {
            continue;
        }
        for v in pixel {
            *v = ((*v as u32 * 255 + a as u32 / 2) / a as u32).min(255) as u8;
        }
    }
}

fn deflate_level(level: u32) -> DeflateLevel {
    match level {
        0..=3 => DeflateLevel::Fast,
        4..=6 => DeflateLevel::Balanced,
        _ => DeflateLevel::Best,
    }
}

fn write_strip<C: ColorType<Inner = u8>>(
    encoder: &mut TiffEncoder<&mut Cursor<Vec<u8>>>,
    raster: &RasterImage,
    pixels: &[u8],
) -> TiffResult<()> {
    let mut image = encoder.new_image::<C>(raster.width, raster.height)?;
    image.rows_per_strip(raster.height)?;
    if raster.alpha.is_some() {
        image.extra_samples(&[ExtraSamples::UnassociatedAlpha])?;
    }
    image.write_data(pixels)
}

/// Encode an 8-bit raster as a single-strip Deflate TIFF.
///
/// Photometric interpretation follows the channel count: BlackIsZero for
/// gray, RGB, and Separated for CMYK. Alpha is written as an unassociated
/// extra sample. Palettes are resolved to RGB first.
pub fn encode(raster: &RasterImage, options: &BridgeOptions) -> Result<Vec<u8>> {
    if raster.palette.is_some() {
        return encode(&raster.clone().expand_palette()?, options);
    }
    raster.validate()?;

    let channels = raster.channels as usize;
    let pixels = match &raster.alpha {
        Some(alpha) => smask::interleave(&raster.samples, channels, alpha),
        None => raster.samples.clone(),
    };

    let mut out = Cursor::new(Vec::new());
    {
        let mut encoder = TiffEncoder::new(&mut out)
            .map_err(tiff_error)?
            .with_compression(Compression::Deflate(deflate_level(options.compression_level)));

        match channels {
            1 => write_strip::<colortype::Gray8>(&mut encoder, raster, &pixels),
            3 => write_strip::<colortype::RGB8>(&mut encoder, raster, &pixels),
            4 => write_strip::<colortype::CMYK8>(&mut encoder, raster, &pixels),
            n => {
                return Err(BridgeError::UnsupportedColorSpace(format!(
                    "{n} channels cannot be stored in TIFF"
                )))
            }
        }
        .map_err(tiff_error)?;
    }

    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiff::encoder::colortype::{Gray16, Gray8};
    use tiff::tags::Predictor;

    const IMAGE_WIDTH: u16 = 256;
    const IMAGE_LENGTH: u16 = 257;
    const BITS_PER_SAMPLE: u16 = 258;
    const COMPRESSION: u16 = 259;
    const PHOTOMETRIC: u16 = 262;
    const FILL_ORDER: u16 = 266;
    const STRIP_OFFSETS: u16 = 273;
    const SAMPLES_PER_PIXEL: u16 = 277;
    const ROWS_PER_STRIP: u16 = 278;
    const STRIP_BYTE_COUNTS: u16 = 279;
    const PLANAR_CONFIGURATION: u16 = 284;
    const PREDICTOR: u16 = 317;
    const EXTRA_SAMPLES: u16 = 338;

    #[derive(Clone, Copy)]
    enum Order {
        Little,
        Big,
    }

    /// SHORT values, or LONG ones when `long` is set.
    struct Entry {
        tag: u16,
        long: bool,
        values: Vec<u32>,
    }

    fn short(tag: u16, values: &[u32]) -> Entry {
        Entry {
            tag,
            long: false,
            values: values.to_vec(),
        }
    }

    fn long(tag: u16, values: &[u32]) -> Entry {
        Entry {
            tag,
            long: true,
            values: values.to_vec(),
        }
    }

    /// Lay out header, strips, out-of-line values and one IFD by hand, for
    /// files the encoder cannot produce.
    fn assemble(order: Order, strips: &[Vec<u8>], mut entries: Vec<Entry>) -> Vec<u8> {
        let u16_bytes = |v: u16| match order {
            Order::Little => v.to_le_bytes(),
            Order::Big => v.to_be_bytes(),
        };
        let u32_bytes = |v: u32| match order {
            Order::Little => v.to_le_bytes(),
            Order::Big => v.to_be_bytes(),
        };
        let value_bytes = |e: &Entry| -> Vec<u8> {
            e.values
                .iter()
                .flat_map(|&v| {
                    if e.long {
                        u32_bytes(v).to_vec()
                    } else {
                        u16_bytes(v as u16).to_vec()
                    }
                })
                .collect()
        };

        let mut out = match order {
            Order::Little => b"II".to_vec(),
            Order::Big => b"MM".to_vec(),
        };
        out.extend_from_slice(&u16_bytes(42));
        out.extend_from_slice(&[0; 4]);

        let mut offsets = Vec::new();
        for strip in strips {
            offsets.push(out.len() as u32);
            out.extend_from_slice(strip);
            if out.len() % 2 == 1 {
                out.push(0);
            }
        }
        entries.push(long(STRIP_OFFSETS, &offsets));
        entries.push(long(
            STRIP_BYTE_COUNTS,
            &strips.iter().map(|s| s.len() as u32).collect::<Vec<_>>(),
        ));
        entries.sort_by_key(|e| e.tag);

        let mut fields = Vec::new();
        for entry in &entries {
            let bytes = value_bytes(entry);
            if bytes.len() > 4 {
                let at = out.len() as u32;
                out.extend_from_slice(&bytes);
                if out.len() % 2 == 1 {
                    out.push(0);
                }
                fields.push(u32_bytes(at).to_vec());
            } else {
                let mut inline = bytes;
                inline.resize(4, 0);
                fields.push(inline);
            }
        }

        let ifd = out.len() as u32;
        out[4..8].copy_from_slice(&u32_bytes(ifd));
        out.extend_from_slice(&u16_bytes(entries.len() as u16));
        for (entry, field) in entries.iter().zip(fields) {
            out.extend_from_slice(&u16_bytes(entry.tag));
            out.extend_from_slice(&u16_bytes(if entry.long { 4 } else { 3 }));
            out.extend_from_slice(&u32_bytes(entry.values.len() as u32));
            out.extend_from_slice(&field);
        }
        out.extend_from_slice(&[0; 4]);
        out
    }

    fn gray_entries(width: u32, height: u32, bits: u32, compression: u32) -> Vec<Entry> {
        vec![
            long(IMAGE_WIDTH, &[width]),
            long(IMAGE_LENGTH, &[height]),
            short(BITS_PER_SAMPLE, &[bits]),
            short(COMPRESSION, &[compression]),
            short(PHOTOMETRIC, &[BLACK_IS_ZERO as u32]),
            short(SAMPLES_PER_PIXEL, &[1]),
        ]
    }

    /// A file written by the `tiff` encoder with the given codec settings.
    fn encoded_gray(
        width: u32,
        height: u32,
        data: &[u8],
        compression: Compression,
        predictor: Predictor,
    ) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        TiffEncoder::new(&mut out)
            .unwrap()
            .with_compression(compression)
            .with_predictor(predictor)
            .write_image::<Gray8>(width, height, data)
            .unwrap();
        out.into_inner()
    }

    fn cmyk(width: u32, height: u32) -> RasterImage {
        let n = (width * height * 4) as usize;
        RasterImage::new(width, height, 4, (0..n).map(|i| (i * 37 % 256) as u8).collect())
    }

    // -- parse --------------------------------------------------------------

    #[test]
    fn rejects_bad_header() {
        assert!(matches!(
            TiffFile::parse(b"XX*\0\0\0\0\0"),
            Err(BridgeError::CorruptChunk(_))
        ));
        assert!(matches!(
            TiffFile::parse(b"II\x2c\0\x08\0\0\0"),
            Err(BridgeError::CorruptChunk(_))
        ));
    }

    #[test]
    fn missing_width_is_reported() {
        let mut entries = gray_entries(2, 1, 8, 1);
        entries.remove(0);
        let bytes = assemble(Order::Little, &[vec![1, 2]], entries);
        assert!(matches!(
            TiffFile::parse(&bytes),
            Err(BridgeError::MissingRequiredTag(tag)) if tag == "ImageWidth"
        ));
    }

    #[test]
    fn zero_width_is_corrupt() {
        let mut entries = gray_entries(0, 1, 8, 1);
        entries.push(short(PREDICTOR, &[2]));
        let bytes = assemble(Order::Little, &[vec![1]], entries);
        assert!(matches!(
            TiffFile::parse(&bytes),
            Err(BridgeError::CorruptChunk(_))
        ));
    }

    #[test]
    fn truncated_file_is_corrupt() {
        let mut bytes = assemble(Order::Little, &[vec![1, 2]], gray_entries(2, 1, 8, 1));
        bytes.truncate(9);
        assert!(matches!(
            TiffFile::parse(&bytes),
            Err(BridgeError::CorruptChunk(_))
        ));
    }

    // -- decode -------------------------------------------------------------

    #[test]
    fn uncompressed_big_endian_strips() {
        let mut entries = gray_entries(3, 2, 8, 1);
        entries.push(long(ROWS_PER_STRIP, &[1]));
        let bytes = assemble(Order::Big, &[vec![1, 2, 3], vec![4, 5, 6]], entries);
        let image = decode(&bytes).unwrap();
        assert_eq!(image.samples, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn every_codec_with_and_without_predictor() {
        let data: Vec<u8> = (0..64).map(|i| (i / 4 * 3) as u8).collect();
        for compression in [
            Compression::Lzw,
            Compression::Deflate(DeflateLevel::Balanced),
            Compression::Packbits,
        ] {
            for predictor in [Predictor::None, Predictor::Horizontal] {
                let bytes = encoded_gray(8, 8, &data, compression, predictor);
                assert_eq!(decode(&bytes).unwrap().samples, data);
            }
        }
    }

    #[test]
    fn packbits_strip() {
        // Literal run of 2, then 3 repeats of 9.
        let strip = vec![1, 10, 20, 0xFE, 9];
        let bytes = assemble(Order::Little, &[strip], gray_entries(5, 1, 8, 32773));
        assert_eq!(decode(&bytes).unwrap().samples, vec![10, 20, 9, 9, 9]);
    }

    #[test]
    fn unsupported_compression() {
        let bytes = assemble(Order::Little, &[vec![0]], gray_entries(1, 1, 8, 32809));
        let file = TiffFile::parse(&bytes).unwrap();
        assert_eq!(file.compression(), 32809);
        assert!(matches!(
            file.decode(),
            Err(BridgeError::UnsupportedTiffCompression(32809))
        ));
    }

    #[test]
    fn white_is_zero_is_inverted() {
        let mut entries = gray_entries(8, 1, 1, 1);
        entries[4] = short(PHOTOMETRIC, &[WHITE_IS_ZERO as u32]);
        let bytes = assemble(Order::Little, &[vec![0b1000_0001]], entries);
        assert_eq!(
            decode(&bytes).unwrap().samples,
            vec![0, 255, 255, 255, 255, 255, 255, 0]
        );
    }

    #[test]
    fn predictor_two() {
        let mut entries = gray_entries(4, 1, 8, 1);
        entries.push(short(PREDICTOR, &[2]));
        let bytes = assemble(Order::Little, &[vec![10, 1, 1, 1]], entries);
        assert_eq!(decode(&bytes).unwrap().samples, vec![10, 11, 12, 13]);
    }

    #[test]
    fn sixteen_bit_keeps_high_byte_in_both_orders() {
        let bytes = assemble(
            Order::Little,
            &[vec![0x34, 0x12, 0xFF, 0xAB]],
            gray_entries(2, 1, 16, 1),
        );
        assert_eq!(decode(&bytes).unwrap().samples, vec![0x12, 0xAB]);

        let bytes = assemble(
            Order::Big,
            &[vec![0x12, 0x34, 0xAB, 0xFF]],
            gray_entries(2, 1, 16, 1),
        );
        assert_eq!(decode(&bytes).unwrap().samples, vec![0x12, 0xAB]);

        let mut out = Cursor::new(Vec::new());
        TiffEncoder::new(&mut out)
            .unwrap()
            .write_image::<Gray16>(2, 1, &[0x1234, 0xABFF])
            .unwrap();
        assert_eq!(decode(&out.into_inner()).unwrap().samples, vec![0x12, 0xAB]);
    }

    #[test]
    fn fill_order_two_reverses_bits() {
        let mut entries = gray_entries(8, 1, 1, 1);
        entries.push(short(FILL_ORDER, &[2]));
        let bytes = assemble(Order::Little, &[vec![0b0000_0011]], entries);
        assert_eq!(
            decode(&bytes).unwrap().samples,
            vec![255, 255, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn fill_order_two_with_compression_rejected() {
        let mut entries = gray_entries(5, 1, 8, 32773);
        entries.push(short(FILL_ORDER, &[2]));
        let bytes = assemble(Order::Little, &[vec![1, 10, 20, 0xFE, 9]], entries);
        assert!(matches!(
            decode(&bytes),
            Err(BridgeError::UnsupportedTiffLayout(_))
        ));
    }

    #[test]
    fn palette_is_unsupported() {
        let mut entries = gray_entries(2, 1, 1, 1);
        entries[4] = short(PHOTOMETRIC, &[PHOTOMETRIC_PALETTE as u32]);
        let bytes = assemble(Order::Big, &[vec![0b0100_0000]], entries);
        assert!(matches!(
            decode(&bytes),
            Err(BridgeError::UnsupportedColorSpace(_))
        ));
    }

    #[test]
    fn associated_alpha_is_unpremultiplied() {
        let entries = vec![
            long(IMAGE_WIDTH, &[1]),
            long(IMAGE_LENGTH, &[1]),
            short(BITS_PER_SAMPLE, &[8, 8]),
            short(COMPRESSION, &[1]),
            short(PHOTOMETRIC, &[BLACK_IS_ZERO as u32]),
            short(SAMPLES_PER_PIXEL, &[2]),
            short(EXTRA_SAMPLES, &[ASSOCIATED_ALPHA as u32]),
        ];
        let bytes = assemble(Order::Little, &[vec![64, 128]], entries);
        let image = decode(&bytes).unwrap();
        assert_eq!(image.samples, vec![128]);
        assert_eq!(image.alpha, Some(vec![128]));
    }

    #[test]
    fn planar_separate_rejected() {
        let mut entries = gray_entries(1, 1, 8, 1);
        entries.push(short(PLANAR_CONFIGURATION, &[2]));
        let bytes = assemble(Order::Little, &[vec![0]], entries);
        assert!(matches!(
            decode(&bytes),
            Err(BridgeError::UnsupportedTiffLayout(_))
        ));
    }

    // -- encode -------------------------------------------------------------

    #[test]
    fn cmyk_round_trip() {
        let raster = cmyk(5, 3);
        let bytes = encode(&raster, &BridgeOptions::default()).unwrap();
        assert!(bytes.starts_with(b"II*\0") || bytes.starts_with(b"MM\0*"));

        let file = TiffFile::parse(&bytes).unwrap();
        assert_eq!(file.photometric, SEPARATED);
        assert_eq!(file.compression(), COMPRESSION_DEFLATE);
        assert_eq!(file.strips.len(), 1);
        assert_eq!(file.decode().unwrap(), raster);
    }

    #[test]
    fn alpha_written_as_extra_sample() {
        let raster = RasterImage::new(2, 1, 3, vec![1, 2, 3, 4, 5, 6]).with_alpha(vec![0, 200]);
        let bytes = encode(&raster, &BridgeOptions::default()).unwrap();
        let file = TiffFile::parse(&bytes).unwrap();
        assert_eq!(file.extra_samples, vec![UNASSOCIATED_ALPHA]);
        assert_eq!(file.samples_per_pixel, 4);
        assert!(!file.can_passthrough());
        assert_eq!(file.decode().unwrap(), raster);
    }

    #[test]
    fn palette_raster_is_written_as_rgb() {
        let raster = RasterImage::indexed(2, 1, vec![1, 0], vec![1, 2, 3, 4, 5, 6]);
        let bytes = encode(&raster, &BridgeOptions::default()).unwrap();
        let file = TiffFile::parse(&bytes).unwrap();
        assert_eq!(file.photometric, PHOTOMETRIC_RGB);
        assert_eq!(file.decode().unwrap().samples, vec![4, 5, 6, 1, 2, 3]);
    }

    #[test]
    fn write_read_write_is_identical() {
        let rasters = [
            cmyk(7, 2),
            RasterImage::new(3, 3, 1, (0..9).collect()),
            RasterImage::new(2, 2, 1, vec![9, 8, 7, 6]).with_alpha(vec![0, 50, 100, 255]),
            cmyk(2, 1).with_alpha(vec![10, 255]),
        ];
        for raster in rasters {
            for level in [0, 6, 9] {
                let options = BridgeOptions {
                    compression_level: level,
                    ..Default::default()
                };
                let first = encode(&raster, &options).unwrap();
                let reread = decode(&first).unwrap();
                assert_eq!(reread, raster);
                assert_eq!(encode(&reread, &options).unwrap(), first);
            }
        }
    }

    #[test]
    fn passthrough_reuses_strip() {
        let raster = cmyk(4, 4);
        let bytes = encode(&raster, &BridgeOptions::default()).unwrap();
        let file = TiffFile::parse(&bytes).unwrap();
        assert!(file.can_passthrough());

        let image = file.passthrough().unwrap();
        assert_eq!(image.color_space, ColorSpace::DeviceCmyk);
        assert_eq!(image.pipeline.decode(&image.data).unwrap(), raster.samples);
    }

    #[test]
    fn two_channel_raster_rejected() {
        let raster = RasterImage::new(1, 1, 2, vec![0, 0]);
        assert!(encode(&raster, &BridgeOptions::default()).is_err());
    }
}
