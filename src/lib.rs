//! PDF Image Bridge Library
//!
//! Converts between PDF image XObjects (filtered sample streams with a color
//! space, bit depth, optional decode array and optional soft mask) and
//! standalone PNG and TIFF files.
//!
//! The core functions work on in-memory buffers. [`file_ops`] adds the thin
//! local file layer used by the CLI.

pub mod color;
pub mod dispatch;
pub mod filter;
pub mod object;
pub mod png;
mod predictor;
pub mod sample;
pub mod smask;
pub mod tiff;

use lopdf::Stream;
use thiserror::Error;

pub use color::{ColorSpace, DecodeArray};
pub use dispatch::{choose_container, ContainerFormat, IngestStrategy};
pub use filter::{Filter, FilterPipeline};
pub use object::{from_container, to_container, ImageInfo, XRef};
pub use sample::{pack, unpack, RasterImage};
pub use smask::{merge_alpha, split_alpha};

/// Error type for image bridge operations
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Corrupt stream: {0}")]
    CorruptStream(String),
    #[error("Unsupported filter: {0}")]
    UnsupportedFilter(String),
    #[error("Unsupported color space: {0}")]
    UnsupportedColorSpace(String),
    #[error("Unsupported bit depth: {0}")]
    UnsupportedBitDepth(u32),
    #[error("Unsupported TIFF compression: {0}")]
    UnsupportedTiffCompression(u32),
    #[error("Unsupported TIFF layout: {0}")]
    UnsupportedTiffLayout(String),
    #[error("Dimension mismatch: expected {expected} bytes, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("Soft mask is {mask_width}x{mask_height}, image is {width}x{height}")]
    MaskDimensionMismatch {
        width: u32,
        height: u32,
        mask_width: u32,
        mask_height: u32,
    },
    #[error("Unrecognized container format")]
    UnknownContainer,
    #[error("Invalid PNG signature")]
    InvalidPngSignature,
    #[error("Unsupported PNG color type {color_type} with bit depth {bit_depth}")]
    UnsupportedPngColorType { color_type: u8, bit_depth: u8 },
    #[error("Corrupt chunk: {0}")]
    CorruptChunk(String),
    #[error("Missing required TIFF tag: {0}")]
    MissingRequiredTag(String),
    #[error("Invalid image dictionary: {0}")]
    InvalidImageDict(String),
    #[error("Soft mask error: {0}")]
    SoftMask(Box<BridgeError>),
    #[error("PDF object error: {0}")]
    Object(#[from] lopdf::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

/// How PNG scanlines are filtered before compression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowFilterStrategy {
    /// Filter type 0 on every row
    None,
    /// Per row, the filter with the smallest sum of absolute residuals
    Adaptive,
}

/// Options for image conversion
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    /// Row filter used by the PNG writer
    pub png_filter: RowFilterStrategy,
    /// Reuse a container's compressed payload as the PDF stream when possible
    pub passthrough: bool,
    /// Store ingested samples at the smallest depth that represents them exactly
    pub reduce_depth: bool,
    /// Deflate level (0-9) for streams and containers written by the bridge
    pub compression_level: u32,
    /// Log a summary line for every converted image
    pub verbose: bool,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            png_filter: RowFilterStrategy::Adaptive,
            passthrough: true,
            reduce_depth: true,
            compression_level: 6,
            verbose: false,
        }
    }
}

/// Convert an image XObject into container file bytes.
///
/// The container is chosen from the image's color space and is returned
/// alongside the bytes so the caller can name the file.
pub fn export_image<X: XRef>(
    stream: &Stream,
    xref: &X,
    options: &BridgeOptions,
) -> Result<(ContainerFormat, Vec<u8>)> {
    let info = ImageInfo::from_dict(&stream.dict, xref)?;
    let format = choose_container(&info.color_space)?;
    let raster = object::raster_from_info(stream, &info, xref)?;

    let bytes = match format {
        ContainerFormat::Png => png::encode(&raster, options)?,
        ContainerFormat::Tiff => tiff::encode(&raster, options)?,
    };

    if options.verbose {
        log::info!(
            "exported {}x{} {} image as {} ({} bytes)",
            info.width,
            info.height,
            info.color_space.name(),
            format.extension(),
            bytes.len()
        );
    }

    Ok((format, bytes))
}

/// Build an image XObject from PNG bytes.
///
/// A soft mask, if the PNG carries transparency, is allocated in `xref` and
/// referenced from the returned stream.
pub fn import_png<X: XRef>(bytes: &[u8], xref: &mut X, options: &BridgeOptions) -> Result<Stream> {
    let file = png::PngFile::parse(bytes)?;

    match IngestStrategy::for_png(&file, options) {
        IngestStrategy::Passthrough => object::from_passthrough(file.passthrough()?),
        IngestStrategy::Decode => from_container(file.decode()?, xref, options),
    }
}

/// Build an image XObject from TIFF bytes.
pub fn import_tiff<X: XRef>(bytes: &[u8], xref: &mut X, options: &BridgeOptions) -> Result<Stream> {
    let file = tiff::TiffFile::parse(bytes)?;

    match IngestStrategy::for_tiff(&file, options) {
        IngestStrategy::Passthrough => object::from_passthrough(file.passthrough()?),
        IngestStrategy::Decode => from_container(file.decode()?, xref, options),
    }
}

/// Build an image XObject from PNG or TIFF bytes, detected by signature.
pub fn import_image<X: XRef>(
    bytes: &[u8],
    xref: &mut X,
    options: &BridgeOptions,
) -> Result<Stream> {
    match ContainerFormat::detect(bytes) {
        Some(ContainerFormat::Png) => import_png(bytes, xref, options),
        Some(ContainerFormat::Tiff) => import_tiff(bytes, xref, options),
        None => Err(BridgeError::UnknownContainer),
    }
}

pub mod file_ops {
    use super::*;
    use std::fs;
    use std::path::{Path, PathBuf};

    /// Write an image XObject to disk.
    ///
    /// `stem` names the file without its extension. The extension is always
    /// replaced by the one matching the chosen container, and the resulting
    /// path is returned. Nothing is written if the conversion fails.
    pub fn write_image<X: XRef>(
        xref: &X,
        stream: &Stream,
        stem: &Path,
        options: &BridgeOptions,
    ) -> Result<PathBuf> {
        let (format, bytes) = export_image(stream, xref, options)?;
        let path = stem.with_extension(format.extension());
        fs::write(&path, bytes)?;
        Ok(path)
    }

    /// Read a PNG file into an image XObject
    pub fn read_png_file<X: XRef>(
        xref: &mut X,
        path: &Path,
        options: &BridgeOptions,
    ) -> Result<Stream> {
        let bytes = fs::read(path)?;
        import_png(&bytes, xref, options)
    }

    /// Read a TIFF file into an image XObject
    pub fn read_tiff_file<X: XRef>(
        xref: &mut X,
        path: &Path,
        options: &BridgeOptions,
    ) -> Result<Stream> {
        let bytes = fs::read(path)?;
        import_tiff(&bytes, xref, options)
    }

    /// Read a PNG or TIFF file into an image XObject
    pub fn read_image_file<X: XRef>(
        xref: &mut X,
        path: &Path,
        options: &BridgeOptions,
    ) -> Result<Stream> {
        let bytes = fs::read(path)?;
        import_image(&bytes, xref, options)
    }
}
