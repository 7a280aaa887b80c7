//! Choosing containers on export and strategies on import.

use crate::color::ColorSpace;
use crate::png::{PngFile, SIGNATURE};
use crate::tiff::TiffFile;
use crate::{BridgeError, BridgeOptions, Result};

/// Container formats the bridge reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerFormat {
    Png,
    Tiff,
}

impl ContainerFormat {
    /// File extension for this format. Always used for written files,
    /// whatever extension the caller asked for.
    pub fn extension(&self) -> &'static str {
        match self {
            ContainerFormat::Png => "png",
            ContainerFormat::Tiff => "tif",
        }
    }

    /// Recognize a container by its leading bytes.
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&SIGNATURE) {
            Some(ContainerFormat::Png)
        } else if bytes.starts_with(b"II*\0") || bytes.starts_with(b"MM\0*") {
            Some(ContainerFormat::Tiff)
        } else {
            None
        }
    }
}

/// The container an image with this color space is written to.
///
/// Four-component spaces go to TIFF since PNG cannot hold CMYK samples.
/// Gray and RGB, including palettes over them, go to PNG.
pub fn choose_container(color_space: &ColorSpace) -> Result<ContainerFormat> {
    match color_space.output_components() {
        4 => Ok(ContainerFormat::Tiff),
        1 | 3 => Ok(ContainerFormat::Png),
        n => Err(BridgeError::UnsupportedColorSpace(format!(
            "{} with {n} components",
            color_space.name()
        ))),
    }
}

/// How a container's pixel data becomes a PDF stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStrategy {
    /// Decode to a raster and re-encode with Flate.
    Decode,
    /// Store the container's compressed payload unchanged.
    Passthrough,
}

impl IngestStrategy {
    pub fn for_png(file: &PngFile<'_>, options: &BridgeOptions) -> Self {
        if options.passthrough && file.can_passthrough() {
            IngestStrategy::Passthrough
        } else {
            IngestStrategy::Decode
        }
    }

    pub fn for_tiff(file: &TiffFile<'_>, options: &BridgeOptions) -> Self {
        if options.passthrough && file.can_passthrough() {
            IngestStrategy::Passthrough
        } else {
            IngestStrategy::Decode
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::RasterImage;
    use crate::{png, tiff};

    fn no_passthrough() -> BridgeOptions {
        BridgeOptions {
            passthrough: false,
            ..Default::default()
        }
    }

    #[test]
    fn cmyk_routes_to_tiff() {
        assert_eq!(
            choose_container(&ColorSpace::DeviceCmyk).unwrap(),
            ContainerFormat::Tiff
        );
        assert_eq!(
            choose_container(&ColorSpace::IccBased { n: 4 }).unwrap(),
            ContainerFormat::Tiff
        );
        let indexed = ColorSpace::Indexed {
            base: Box::new(ColorSpace::DeviceCmyk),
            hival: 0,
            lookup: vec![0; 4],
        };
        assert_eq!(choose_container(&indexed).unwrap(), ContainerFormat::Tiff);
    }

    #[test]
    fn gray_and_rgb_route_to_png() {
        for cs in [
            ColorSpace::DeviceGray,
            ColorSpace::DeviceRgb,
            ColorSpace::IccBased { n: 1 },
        ] {
            assert_eq!(choose_container(&cs).unwrap(), ContainerFormat::Png);
        }
    }

    #[test]
    fn two_components_unsupported() {
        assert!(matches!(
            choose_container(&ColorSpace::IccBased { n: 2 }),
            Err(BridgeError::UnsupportedColorSpace(_))
        ));
    }

    #[test]
    fn detect_by_signature() {
        assert_eq!(ContainerFormat::detect(&SIGNATURE), Some(ContainerFormat::Png));
        assert_eq!(ContainerFormat::detect(b"II*\0...."), Some(ContainerFormat::Tiff));
        assert_eq!(ContainerFormat::detect(b"MM\0*...."), Some(ContainerFormat::Tiff));
        assert_eq!(ContainerFormat::detect(b"%PDF-1.7"), None);
        assert_eq!(ContainerFormat::Tiff.extension(), "tif");
    }

    #[test]
    fn strategy_honors_options() {
        let raster = RasterImage::new(2, 2, 1, vec![1, 2, 3, 4]);

        let png_bytes = png::encode(&raster, &BridgeOptions::default()).unwrap();
        let png = png::PngFile::parse(&png_bytes).unwrap();
        assert_eq!(
            IngestStrategy::for_png(&png, &BridgeOptions::default()),
            IngestStrategy::Passthrough
        );
        assert_eq!(
            IngestStrategy::for_png(&png, &no_passthrough()),
            IngestStrategy::Decode
        );

        let tiff_bytes = tiff::encode(&raster, &BridgeOptions::default()).unwrap();
        let tiff = tiff::TiffFile::parse(&tiff_bytes).unwrap();
        assert_eq!(
            IngestStrategy::for_tiff(&tiff, &BridgeOptions::default()),
            IngestStrategy::Passthrough
        );
        assert_eq!(
            IngestStrategy::for_tiff(&tiff, &no_passthrough()),
            IngestStrategy::Decode
        );
    }

    #[test]
    fn alpha_forces_decode() {
        let raster = RasterImage::new(2, 1, 1, vec![1, 2]).with_alpha(vec![0, 100]);
        let bytes = png::encode(&raster, &BridgeOptions::default()).unwrap();
        let png = png::PngFile::parse(&bytes).unwrap();
        assert_eq!(
            IngestStrategy::for_png(&png, &BridgeOptions::default()),
            IngestStrategy::Decode
        );
    }
}
