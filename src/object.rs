//! Reading and building image XObject dictionaries.

use lopdf::{Dictionary, Document, Object, ObjectId, Stream};

use crate::color::{ColorSpace, DecodeArray};
use crate::filter::{Filter, FilterPipeline};
use crate::sample::{self, RasterImage};
use crate::smask::{merge_alpha, split_alpha};
use crate::{BridgeError, BridgeOptions, Result};

/// Indirect references followed before giving up.
const MAX_REFERENCE_DEPTH: usize = 16;

/// Access to a document's indirect objects.
pub trait XRef {
    fn dereference(&self, id: ObjectId) -> Result<&Object>;

    /// Store `object` under a fresh object number.
    fn allocate(&mut self, object: Object) -> ObjectId;
}

impl XRef for Document {
    fn dereference(&self, id: ObjectId) -> Result<&Object> {
        Ok(self.get_object(id)?)
    }

    fn allocate(&mut self, object: Object) -> ObjectId {
        self.add_object(object)
    }
}

/// Follow references until a direct object is reached.
fn resolve<'a, X: XRef>(xref: &'a X, mut obj: &'a Object) -> Result<&'a Object> {
    for _ in 0..MAX_REFERENCE_DEPTH {
        match obj {
            Object::Reference(id) => obj = xref.dereference(*id)?,
            direct => return Ok(direct),
        }
    }

    Err(BridgeError::InvalidImageDict(
        "reference chain is too long".into(),
    ))
}

fn entry<'a, X: XRef>(dict: &'a Dictionary, key: &[u8], xref: &'a X) -> Result<Option<&'a Object>> {
    match dict.get(key) {
        Ok(obj) => resolve(xref, obj).map(Some),
        Err(_) => Ok(None),
    }
}

fn key_name(key: &[u8]) -> String {
    String::from_utf8_lossy(key).into_owned()
}

fn positive_int<X: XRef>(dict: &Dictionary, key: &[u8], xref: &X) -> Result<u32> {
    match entry(dict, key, xref)? {
        Some(Object::Integer(n)) if *n > 0 && *n <= u32::MAX as i64 => Ok(*n as u32),
        Some(Object::Real(f)) if *f >= 1.0 && *f <= u32::MAX as f32 => Ok(*f as u32),
        Some(other) => Err(BridgeError::InvalidImageDict(format!(
            "{} is not a positive integer: {other:?}",
            key_name(key)
        ))),
        None => Err(BridgeError::InvalidImageDict(format!(
            "missing {}",
            key_name(key)
        ))),
    }
}

/// The parsed view of an image XObject dictionary.
#[derive(Debug, Clone)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub bits_per_component: u8,
    pub color_space: ColorSpace,
    pub decode: Option<DecodeArray>,
    pub pipeline: FilterPipeline,
    pub smask: Option<ObjectId>,
    pub image_mask: bool,
}

impl ImageInfo {
    pub fn from_dict<X: XRef>(dict: &Dictionary, xref: &X) -> Result<Self> {
        if let Some(subtype) = entry(dict, b"Subtype", xref)? {
            if !matches!(subtype, Object::Name(n) if n == b"Image") {
                return Err(BridgeError::InvalidImageDict(format!(
                    "Subtype is {subtype:?}, not Image"
                )));
            }
        }

        let width = positive_int(dict, b"Width", xref)?;
        let height = positive_int(dict, b"Height", xref)?;
        let pipeline = FilterPipeline::from_dict(dict)?;

        let image_mask = matches!(entry(dict, b"ImageMask", xref)?, Some(Object::Boolean(true)));

        let (bits_per_component, color_space) = if image_mask {
            (1, ColorSpace::DeviceGray)
        } else {
            let bpc = positive_int(dict, b"BitsPerComponent", xref)?;
            let bpc = u8::try_from(bpc).map_err(|_| BridgeError::UnsupportedBitDepth(bpc))?;
            let cs = match entry(dict, b"ColorSpace", xref)? {
                Some(obj) => parse_color_space(obj, xref)?,
                None => {
                    return Err(BridgeError::InvalidImageDict("missing ColorSpace".into()));
                }
            };
            (bpc, cs)
        };

        let decode = entry(dict, b"Decode", xref)?
            .map(DecodeArray::from_object)
            .transpose()?;

        let smask = match dict.get(b"SMask") {
            Ok(Object::Reference(id)) => Some(*id),
            Ok(Object::Name(n)) if n == b"None" => None,
            Ok(other) => {
                log::warn!("ignoring SMask that is not an indirect reference: {other:?}");
                None
            }
            Err(_) => None,
        };

        Ok(Self {
            width,
            height,
            bits_per_component,
            color_space,
            decode,
            pipeline,
            smask,
            image_mask,
        })
    }

    fn ends_with(&self, filter: Filter) -> bool {
        self.pipeline.steps().last().map(|s| s.filter) == Some(filter)
    }
}

fn parse_color_space<X: XRef>(obj: &Object, xref: &X) -> Result<ColorSpace> {
    let obj = resolve(xref, obj)?;

    let unsupported = |name: &[u8]| {
        BridgeError::UnsupportedColorSpace(String::from_utf8_lossy(name).into_owned())
    };

    match obj {
        Object::Name(name) => match name.as_slice() {
            b"DeviceGray" | b"G" | b"CalGray" => Ok(ColorSpace::DeviceGray),
            b"DeviceRGB" | b"RGB" | b"CalRGB" => Ok(ColorSpace::DeviceRgb),
            b"DeviceCMYK" | b"CMYK" => Ok(ColorSpace::DeviceCmyk),
            other => Err(unsupported(other)),
        },
        Object::Array(items) => {
            let family = match items.first().map(|o| resolve(xref, o)).transpose()? {
                Some(Object::Name(name)) => name.as_slice(),
                _ => {
                    return Err(BridgeError::InvalidImageDict(
                        "color space array without a family name".into(),
                    ))
                }
            };

            match family {
                b"ICCBased" => {
                    let stream = match items.get(1).map(|o| resolve(xref, o)).transpose()? {
                        Some(Object::Stream(s)) => s,
                        _ => {
                            return Err(BridgeError::InvalidImageDict(
                                "ICCBased without a profile stream".into(),
                            ))
                        }
                    };
                    match entry(&stream.dict, b"N", xref)? {
                        Some(Object::Integer(n @ (1 | 3 | 4))) => Ok(ColorSpace::IccBased { n: *n as u8 }),
                        Some(Object::Integer(n)) => Err(BridgeError::UnsupportedColorSpace(
                            format!("ICCBased with {n} components"),
                        )),
                        _ => Err(BridgeError::InvalidImageDict(
                            "ICCBased profile without N".into(),
                        )),
                    }
                }
                b"Indexed" | b"I" => parse_indexed(items, xref),
                b"CalGray" => Ok(ColorSpace::DeviceGray),
                b"CalRGB" => Ok(ColorSpace::DeviceRgb),
                _ if items.len() == 1 => parse_color_space(&items[0], xref),
                other => Err(unsupported(other)),
            }
        }
        other => Err(BridgeError::InvalidImageDict(format!(
            "ColorSpace is {other:?}"
        ))),
    }
}

fn parse_indexed<X: XRef>(items: &[Object], xref: &X) -> Result<ColorSpace> {
    let [_, base, hival, lookup] = items else {
        return Err(BridgeError::InvalidImageDict(format!(
            "Indexed color space with {} entries",
            items.len()
        )));
    };

    let base = parse_color_space(base, xref)?;
    if matches!(base, ColorSpace::Indexed { .. }) {
        return Err(BridgeError::InvalidImageDict(
            "Indexed base cannot be Indexed".into(),
        ));
    }

    let hival = match resolve(xref, hival)? {
        Object::Integer(n) if (0..=255).contains(n) => *n as u8,
        other => {
            return Err(BridgeError::InvalidImageDict(format!(
                "Indexed hival is {other:?}"
            )))
        }
    };

    let lookup = match resolve(xref, lookup)? {
        Object::String(bytes, _) => bytes.clone(),
        Object::Stream(stream) => FilterPipeline::from_dict(&stream.dict)?.decode(&stream.content)?,
        other => {
            return Err(BridgeError::InvalidImageDict(format!(
                "Indexed lookup is {other:?}"
            )))
        }
    };

    let needed = (hival as usize + 1) * base.output_components();
    if lookup.len() < needed {
        log::warn!(
            "Indexed lookup has {} bytes, {} colors need {needed}",
            lookup.len(),
            hival as usize + 1
        );
    }

    Ok(ColorSpace::Indexed {
        base: Box::new(base),
        hival,
        lookup,
    })
}

/// Decode an image's samples and its soft mask into a raster.
pub fn raster_from_info<X: XRef>(stream: &Stream, info: &ImageInfo, xref: &X) -> Result<RasterImage> {
    let data = info.pipeline.decode(&stream.content)?;

    // JPEG decoding already produced 8-bit samples, converted to RGB when
    // the stream was not gray.
    let (bpc, color_space) = if info.ends_with(Filter::DctDecode) {
        let pixels = info.width as usize * info.height as usize;
        if info.color_space.components() == 4 && data.len() == pixels * 3 {
            log::debug!("JPEG decoder returned RGB for a CMYK image");
            (8, ColorSpace::DeviceRgb)
        } else {
            (8, info.color_space.clone())
        }
    } else {
        (info.bits_per_component, info.color_space.clone())
    };

    // Palettes over RGB stay indexed so PNG can store them as they are.
    let keep_palette = !info.ends_with(Filter::DctDecode)
        && matches!(&color_space, ColorSpace::Indexed { base, .. } if base.output_components() == 3);
    let unpack = if keep_palette {
        sample::unpack_indexed
    } else {
        sample::unpack
    };
    let raster = unpack(
        &data,
        info.width,
        info.height,
        bpc,
        &color_space,
        info.decode.as_ref(),
    )?;

    let mask = match info.smask {
        Some(id) => Some(load_soft_mask(id, xref).map_err(|e| BridgeError::SoftMask(Box::new(e)))?),
        None => None,
    };

    merge_alpha(raster, mask)
}

/// Resolve and decode a soft mask through its own pipeline.
fn load_soft_mask<X: XRef>(id: ObjectId, xref: &X) -> Result<RasterImage> {
    let stream = match xref.dereference(id)? {
        Object::Stream(s) => s,
        other => {
            return Err(BridgeError::InvalidImageDict(format!(
                "SMask {id:?} is {other:?}, not a stream"
            )))
        }
    };

    let info = ImageInfo::from_dict(&stream.dict, xref)?;
    if info.smask.is_some() {
        log::warn!("soft mask {id:?} has its own SMask, ignoring it");
    }
    if info.color_space.output_components() != 1 {
        return Err(BridgeError::UnsupportedColorSpace(format!(
            "soft mask in {}",
            info.color_space.name()
        )));
    }

    let data = info.pipeline.decode(&stream.content)?;
    let bpc = if info.ends_with(Filter::DctDecode) {
        8
    } else {
        info.bits_per_component
    };
    sample::unpack(
        &data,
        info.width,
        info.height,
        bpc,
        &info.color_space,
        info.decode.as_ref(),
    )
}

/// Decode an image XObject, with its soft mask as alpha, into a raster.
pub fn to_container<X: XRef>(stream: &Stream, xref: &X) -> Result<RasterImage> {
    let info = ImageInfo::from_dict(&stream.dict, xref)?;
    raster_from_info(stream, &info, xref)
}

fn image_dict(width: u32, height: u32, bits_per_component: u8, color_space: &ColorSpace) -> Result<Dictionary> {
    let mut dict = Dictionary::new();
    dict.set("Type", Object::Name(b"XObject".to_vec()));
    dict.set("Subtype", Object::Name(b"Image".to_vec()));
    dict.set("Width", Object::Integer(width as i64));
    dict.set("Height", Object::Integer(height as i64));
    dict.set("ColorSpace", color_space.to_object()?);
    dict.set("BitsPerComponent", Object::Integer(bits_per_component as i64));
    Ok(dict)
}

fn sample_depth(raster: &RasterImage, options: &BridgeOptions) -> u8 {
    if options.reduce_depth {
        sample::smallest_depth(&raster.samples)
    } else {
        8
    }
}

fn flate_image_stream(
    raster: &RasterImage,
    color_space: &ColorSpace,
    bpc: u8,
    options: &BridgeOptions,
) -> Result<Stream> {
    let (packed, decode) = sample::pack(raster, bpc)?;
    let pipeline = FilterPipeline::single(Filter::FlateDecode);
    let content = pipeline.encode(&packed, options.compression_level)?;

    let mut dict = image_dict(raster.width, raster.height, bpc, color_space)?;
    if !decode.is_identity() {
        dict.set("Decode", decode.to_object());
    }
    pipeline.write_to(&mut dict);
    dict.set("Length", Object::Integer(content.len() as i64));

    Ok(Stream::new(dict, content))
}

/// Build an image XObject from a raster.
///
/// Alpha, if any, is stored as a separate DeviceGray image allocated in
/// `xref` and referenced through `SMask`.
pub fn from_container<X: XRef>(
    raster: RasterImage,
    xref: &mut X,
    options: &BridgeOptions,
) -> Result<Stream> {
    raster.validate()?;

    let (mut color, mask) = split_alpha(raster);
    let (color_space, bpc) = match color.palette.take() {
        Some(lookup) => {
            // Spread indices over the sample range so packing keeps them exact.
            let entries = lookup.len() / 3;
            let bpc = [1u8, 2, 4, 8]
                .into_iter()
                .find(|&b| entries <= 1 << b && (options.reduce_depth || b == 8))
                .unwrap_or(8);
            let step = 255 / ((1u16 << bpc) - 1) as u8;
            color.samples.iter_mut().for_each(|i| *i *= step);

            let indexed = ColorSpace::Indexed {
                base: Box::new(ColorSpace::DeviceRgb),
                hival: (entries - 1) as u8,
                lookup,
            };
            (indexed, bpc)
        }
        None => (
            ColorSpace::for_channels(color.channels)?,
            sample_depth(&color, options),
        ),
    };
    let mut stream = flate_image_stream(&color, &color_space, bpc, options)?;

    if let Some(mask) = mask {
        let bpc = sample_depth(&mask, options);
        let mask_stream = flate_image_stream(&mask, &ColorSpace::DeviceGray, bpc, options)?;
        let id = xref.allocate(Object::Stream(mask_stream));
        stream.dict.set("SMask", Object::Reference(id));
        log::debug!("allocated soft mask {id:?}");
    }

    log::debug!(
        "built {}x{} {} image, {} bytes",
        color.width,
        color.height,
        color_space.name(),
        stream.content.len()
    );

    Ok(stream)
}

/// A container's compressed payload, described as a PDF image.
#[derive(Debug, Clone)]
pub struct PassthroughImage {
    pub width: u32,
    pub height: u32,
    pub bits_per_component: u8,
    pub color_space: ColorSpace,
    pub pipeline: FilterPipeline,
    pub data: Vec<u8>,
}

/// Build an image XObject around a payload that needs no re-encoding.
pub fn from_passthrough(image: PassthroughImage) -> Result<Stream> {
    let mut dict = image_dict(
        image.width,
        image.height,
        image.bits_per_component,
        &image.color_space,
    )?;
    image.pipeline.write_to(&mut dict);
    dict.set("Length", Object::Integer(image.data.len() as i64));

    log::debug!(
        "passing {} bytes through as a {}x{} {} image",
        image.data.len(),
        image.width,
        image.height,
        image.color_space.name()
    );

    Ok(Stream::new(dict, image.data))
}
