//! Color spaces and decode arrays of PDF images.

use lopdf::{Object, StringFormat};

use crate::{BridgeError, Result};

/// Color space of a PDF image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColorSpace {
    DeviceGray,
    DeviceRgb,
    DeviceCmyk,
    /// Each sample is an index into `lookup`, which holds `hival + 1` colors
    /// of the base space.
    Indexed {
        base: Box<ColorSpace>,
        hival: u8,
        lookup: Vec<u8>,
    },
    /// An ICC profile we don't interpret, read as `n` device components.
    IccBased { n: u8 },
}

impl ColorSpace {
    /// The device space for a raster's channel count.
    pub fn for_channels(channels: u8) -> Result<Self> {
        match channels {
            1 => Ok(ColorSpace::DeviceGray),
            3 => Ok(ColorSpace::DeviceRgb),
            4 => Ok(ColorSpace::DeviceCmyk),
            n => Err(BridgeError::UnsupportedColorSpace(format!(
                "{n} channels"
            ))),
        }
    }

    /// Components per packed sample. Indexed images have one.
    pub fn components(&self) -> usize {
        match self {
            ColorSpace::DeviceGray => 1,
            ColorSpace::DeviceRgb => 3,
            ColorSpace::DeviceCmyk => 4,
            ColorSpace::Indexed { .. } => 1,
            ColorSpace::IccBased { n } => *n as usize,
        }
    }

    /// Components per pixel once palette indices are resolved.
    pub fn output_components(&self) -> usize {
        match self {
            ColorSpace::Indexed { base, .. } => base.output_components(),
            other => other.components(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ColorSpace::DeviceGray => "DeviceGray",
            ColorSpace::DeviceRgb => "DeviceRGB",
            ColorSpace::DeviceCmyk => "DeviceCMYK",
            ColorSpace::Indexed { .. } => "Indexed",
            ColorSpace::IccBased { .. } => "ICCBased",
        }
    }

    /// Device space name for a component count, used when the original
    /// space cannot be written without a profile stream.
    fn device_name(components: usize) -> Result<&'static str> {
        match components {
            1 => Ok("DeviceGray"),
            3 => Ok("DeviceRGB"),
            4 => Ok("DeviceCMYK"),
            n => Err(BridgeError::UnsupportedColorSpace(format!(
                "{n} components"
            ))),
        }
    }

    /// The `ColorSpace` entry for an image dictionary.
    ///
    /// ICC-based spaces are written as the device space with the same number
    /// of components, since the profile itself is not carried along.
    pub fn to_object(&self) -> Result<Object> {
        Ok(match self {
            ColorSpace::Indexed {
                base,
                hival,
                lookup,
            } => Object::Array(vec![
                Object::Name(b"Indexed".to_vec()),
                base.to_object()?,
                Object::Integer(*hival as i64),
                Object::String(lookup.clone(), StringFormat::Hexadecimal),
            ]),
            ColorSpace::IccBased { n } => {
                Object::Name(Self::device_name(*n as usize)?.as_bytes().to_vec())
            }
            device => Object::Name(device.name().as_bytes().to_vec()),
        })
    }

    /// The usable part of an Indexed lookup table: at most `hival + 1`
    /// whole entries of the base space.
    pub(crate) fn palette(&self) -> Option<&[u8]> {
        let ColorSpace::Indexed {
            base,
            hival,
            lookup,
        } = self
        else {
            return None;
        };

        let n = base.output_components();
        let entries = (lookup.len() / n).min(*hival as usize + 1);
        (entries > 0).then(|| &lookup[..entries * n])
    }
}

/// Per-component `[min, max]` pairs remapping packed integers.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeArray(Vec<f32>);

impl DecodeArray {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    /// `[0 1]` for every component.
    pub fn identity(components: usize) -> Self {
        Self([0.0, 1.0].repeat(components))
    }

    /// `[1 0]` for every component.
    pub fn inverted(components: usize) -> Self {
        Self([1.0, 0.0].repeat(components))
    }

    /// The default array for a color space and bit depth.
    pub fn default_for(color_space: &ColorSpace, bits_per_component: u8) -> Self {
        match color_space {
            ColorSpace::Indexed { .. } => {
                let max = (1u32 << bits_per_component.min(8)) - 1;
                Self(vec![0.0, max as f32])
            }
            other => Self::identity(other.components()),
        }
    }

    pub fn values(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn range(&self, component: usize) -> (f32, f32) {
        (self.0[2 * component], self.0[2 * component + 1])
    }

    pub fn is_identity(&self) -> bool {
        self.0.chunks(2).all(|pair| pair == [0.0, 1.0])
    }

    /// Parse a `Decode` array of numbers.
    pub fn from_object(obj: &Object) -> Result<Self> {
        let Object::Array(items) = obj else {
            return Err(BridgeError::InvalidImageDict(
                "Decode is not an array".into(),
            ));
        };

        items
            .iter()
            .map(|item| match item {
                Object::Integer(n) => Ok(*n as f32),
                Object::Real(f) => Ok(*f),
                other => Err(BridgeError::InvalidImageDict(format!(
                    "Decode entry is not a number: {other:?}"
                ))),
            })
            .collect::<Result<Vec<_>>>()
            .map(Self)
    }

    pub fn to_object(&self) -> Object {
        Object::Array(
            self.0
                .iter()
                .map(|&v| {
                    if v.fract() == 0.0 {
                        Object::Integer(v as i64)
                    } else {
                        Object::Real(v)
                    }
                })
                .collect(),
        )
    }
}
