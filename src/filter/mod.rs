//! The filter pipeline runner and the default codec set.

mod ascii_85;
mod ascii_hex;
mod ccitt;
mod dct;
pub(crate) mod flate;
mod lzw;
mod run_length;

use lopdf::{Dictionary, Object};
use log::debug;

use crate::{BridgeError, Result};

/// A PDF stream filter.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Filter {
    AsciiHexDecode,
    Ascii85Decode,
    LzwDecode,
    FlateDecode,
    RunLengthDecode,
    CcittFaxDecode,
    Jbig2Decode,
    DctDecode,
    JpxDecode,
    Crypt,
}

impl Filter {
    /// Look a filter up by its full or abbreviated name.
    pub fn from_name(name: &[u8]) -> Result<Self> {
        Ok(match name {
            b"ASCIIHexDecode" | b"AHx" => Filter::AsciiHexDecode,
            b"ASCII85Decode" | b"A85" => Filter::Ascii85Decode,
            b"LZWDecode" | b"LZW" => Filter::LzwDecode,
            b"FlateDecode" | b"Fl" => Filter::FlateDecode,
            b"RunLengthDecode" | b"RL" => Filter::RunLengthDecode,
            b"CCITTFaxDecode" | b"CCF" => Filter::CcittFaxDecode,
            b"JBIG2Decode" => Filter::Jbig2Decode,
            b"DCTDecode" | b"DCT" => Filter::DctDecode,
            b"JPXDecode" => Filter::JpxDecode,
            b"Crypt" => Filter::Crypt,
            _ => {
                return Err(BridgeError::UnsupportedFilter(
                    String::from_utf8_lossy(name).into_owned(),
                ))
            }
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Filter::AsciiHexDecode => "ASCIIHexDecode",
            Filter::Ascii85Decode => "ASCII85Decode",
            Filter::LzwDecode => "LZWDecode",
            Filter::FlateDecode => "FlateDecode",
            Filter::RunLengthDecode => "RunLengthDecode",
            Filter::CcittFaxDecode => "CCITTFaxDecode",
            Filter::Jbig2Decode => "JBIG2Decode",
            Filter::DctDecode => "DCTDecode",
            Filter::JpxDecode => "JPXDecode",
            Filter::Crypt => "Crypt",
        }
    }

    pub fn decode(&self, data: &[u8], params: Option<&Dictionary>) -> Result<Vec<u8>> {
        match self {
            Filter::AsciiHexDecode => ascii_hex::decode(data).ok_or_else(|| self.corrupt()),
            Filter::Ascii85Decode => ascii_85::decode(data).ok_or_else(|| self.corrupt()),
            Filter::RunLengthDecode => run_length::decode(data).ok_or_else(|| self.corrupt()),
            Filter::LzwDecode => lzw::decode(data, params),
            Filter::FlateDecode => flate::decode(data, params),
            Filter::DctDecode => dct::decode(data),
            Filter::CcittFaxDecode => ccitt::decode(data, params),
            Filter::Jbig2Decode | Filter::JpxDecode | Filter::Crypt => {
                Err(BridgeError::UnsupportedFilter(self.name().to_string()))
            }
        }
    }

    /// Encode `data` so that [`Filter::decode`] restores it. `level` is the
    /// deflate level, used by `FlateDecode` only.
    pub fn encode(&self, data: &[u8], params: Option<&Dictionary>, level: u32) -> Result<Vec<u8>> {
        match self {
            Filter::AsciiHexDecode => Ok(ascii_hex::encode(data)),
            Filter::Ascii85Decode => Ok(ascii_85::encode(data)),
            Filter::RunLengthDecode => Ok(run_length::encode(data)),
            Filter::LzwDecode => lzw::encode(data, params),
            Filter::FlateDecode => flate::encode(data, params, level),
            _ => Err(BridgeError::UnsupportedFilter(format!(
                "{} (encoding)",
                self.name()
            ))),
        }
    }

    fn corrupt(&self) -> BridgeError {
        BridgeError::CorruptStream(format!("{}: malformed data", self.name()))
    }
}

/// One step of a filter pipeline.
#[derive(Debug, Clone)]
pub struct FilterStep {
    pub filter: Filter,
    pub params: Option<Dictionary>,
}

/// An ordered list of filters, stored in decode order.
#[derive(Debug, Clone, Default)]
pub struct FilterPipeline {
    steps: Vec<FilterStep>,
}

impl FilterPipeline {
    pub fn new(steps: Vec<FilterStep>) -> Self {
        Self { steps }
    }

    /// A pipeline with a single parameterless filter.
    pub fn single(filter: Filter) -> Self {
        Self::new(vec![FilterStep {
            filter,
            params: None,
        }])
    }

    pub fn steps(&self) -> &[FilterStep] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Read `Filter` and `DecodeParms` from a stream dictionary.
    ///
    /// Parameters must be direct dictionaries; `null` entries in a
    /// `DecodeParms` array mean "no parameters" for that step.
    pub fn from_dict(dict: &Dictionary) -> Result<Self> {
        let filters: Vec<Filter> = match dict.get(b"Filter") {
            Err(_) | Ok(Object::Null) => Vec::new(),
            Ok(Object::Name(name)) => vec![Filter::from_name(name)?],
            Ok(Object::Array(arr)) => arr
                .iter()
                .map(|o| match o {
                    Object::Name(name) => Filter::from_name(name),
                    other => Err(BridgeError::InvalidImageDict(format!(
                        "filter entry is not a name: {other:?}"
                    ))),
                })
                .collect::<Result<_>>()?,
            Ok(other) => {
                return Err(BridgeError::InvalidImageDict(format!(
                    "Filter is not a name or array: {other:?}"
                )))
            }
        };

        let params: Vec<Option<Dictionary>> = match dict.get(b"DecodeParms") {
            Ok(Object::Dictionary(d)) => vec![Some(d.clone())],
            Ok(Object::Array(arr)) => arr
                .iter()
                .map(|o| match o {
                    Object::Dictionary(d) => Some(d.clone()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        };

        let steps = filters
            .into_iter()
            .enumerate()
            .map(|(i, filter)| FilterStep {
                filter,
                params: params.get(i).cloned().flatten(),
            })
            .collect();

        Ok(Self { steps })
    }

    /// Write `Filter` and `DecodeParms` entries describing this pipeline.
    pub fn write_to(&self, dict: &mut Dictionary) {
        dict.remove(b"Filter");
        dict.remove(b"DecodeParms");

        match self.steps.as_slice() {
            [] => {}
            [step] => {
                dict.set("Filter", Object::Name(step.filter.name().as_bytes().to_vec()));
                if let Some(params) = &step.params {
                    dict.set("DecodeParms", Object::Dictionary(params.clone()));
                }
            }
            steps => {
                let names = steps
                    .iter()
                    .map(|s| Object::Name(s.filter.name().as_bytes().to_vec()))
                    .collect();
                dict.set("Filter", Object::Array(names));

                if steps.iter().any(|s| s.params.is_some()) {
                    let params = steps
                        .iter()
                        .map(|s| match &s.params {
                            Some(p) => Object::Dictionary(p.clone()),
                            None => Object::Null,
                        })
                        .collect();
                    dict.set("DecodeParms", Object::Array(params));
                }
            }
        }
    }

    /// Run every step's decoder, first to last.
    pub fn decode(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let mut data = payload.to_vec();

        for step in &self.steps {
            let before = data.len();
            data = step.filter.decode(&data, step.params.as_ref())?;
            debug!("{}: {} -> {} bytes", step.filter.name(), before, data.len());
        }

        Ok(data)
    }

    /// Run every step's encoder, last to first.
    pub fn encode(&self, payload: &[u8], level: u32) -> Result<Vec<u8>> {
        let mut data = payload.to_vec();

        for step in self.steps.iter().rev() {
            data = step.filter.encode(&data, step.params.as_ref(), level)?;
        }

        Ok(data)
    }
}

/// Read an integer from an optional parameter dictionary.
pub(crate) fn int_param(params: Option<&Dictionary>, key: &[u8]) -> Option<i64> {
    match params?.get(key).ok()? {
        Object::Integer(n) => Some(*n),
        Object::Real(f) => Some(*f as i64),
        Object::Boolean(b) => Some(*b as i64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(entries: &[(&str, i64)]) -> Dictionary {
        let mut dict = Dictionary::new();
        for (key, value) in entries {
            dict.set(*key, Object::Integer(*value));
        }
        dict
    }

    // -- Filter::from_name --------------------------------------------------

    #[test]
    fn names_and_abbreviations() {
        assert_eq!(Filter::from_name(b"FlateDecode").unwrap(), Filter::FlateDecode);
        assert_eq!(Filter::from_name(b"Fl").unwrap(), Filter::FlateDecode);
        assert_eq!(Filter::from_name(b"AHx").unwrap(), Filter::AsciiHexDecode);
        assert_eq!(Filter::from_name(b"CCF").unwrap(), Filter::CcittFaxDecode);
    }

    #[test]
    fn unknown_name_is_unsupported() {
        assert!(matches!(
            Filter::from_name(b"BrotliDecode"),
            Err(BridgeError::UnsupportedFilter(name)) if name == "BrotliDecode"
        ));
    }

    // -- FilterPipeline::from_dict / write_to -------------------------------

    #[test]
    fn no_filter_is_empty_pipeline() {
        let pipeline = FilterPipeline::from_dict(&Dictionary::new()).unwrap();
        assert!(pipeline.is_empty());
        assert_eq!(pipeline.decode(b"raw").unwrap(), b"raw");
    }

    #[test]
    fn single_filter_with_params() {
        let mut dict = Dictionary::new();
        dict.set("Filter", Object::Name(b"FlateDecode".to_vec()));
        dict.set(
            "DecodeParms",
            Object::Dictionary(params(&[("Colors", 4), ("Columns", 340)])),
        );

        let pipeline = FilterPipeline::from_dict(&dict).unwrap();
        assert_eq!(pipeline.steps().len(), 1);
        assert_eq!(int_param(pipeline.steps()[0].params.as_ref(), b"Colors"), Some(4));
    }

    #[test]
    fn filter_array_with_null_params() {
        let mut dict = Dictionary::new();
        dict.set(
            "Filter",
            Object::Array(vec![
                Object::Name(b"ASCII85Decode".to_vec()),
                Object::Name(b"FlateDecode".to_vec()),
            ]),
        );
        dict.set(
            "DecodeParms",
            Object::Array(vec![
                Object::Null,
                Object::Dictionary(params(&[("Predictor", 12)])),
            ]),
        );

        let pipeline = FilterPipeline::from_dict(&dict).unwrap();
        assert_eq!(pipeline.steps()[0].filter, Filter::Ascii85Decode);
        assert!(pipeline.steps()[0].params.is_none());
        assert_eq!(int_param(pipeline.steps()[1].params.as_ref(), b"Predictor"), Some(12));

        let mut written = Dictionary::new();
        pipeline.write_to(&mut written);
        let reread = FilterPipeline::from_dict(&written).unwrap();
        assert_eq!(reread.steps().len(), 2);
        assert_eq!(reread.steps()[1].filter, Filter::FlateDecode);
        assert!(reread.steps()[0].params.is_none());
    }

    #[test]
    fn non_name_filter_is_rejected() {
        let mut dict = Dictionary::new();
        dict.set("Filter", Object::Integer(3));
        assert!(matches!(
            FilterPipeline::from_dict(&dict),
            Err(BridgeError::InvalidImageDict(_))
        ));
    }

    // -- decode / encode ----------------------------------------------------

    #[test]
    fn chained_pipeline_round_trip() {
        let pipeline = FilterPipeline::new(vec![
            FilterStep {
                filter: Filter::AsciiHexDecode,
                params: None,
            },
            FilterStep {
                filter: Filter::FlateDecode,
                params: None,
            },
            FilterStep {
                filter: Filter::RunLengthDecode,
                params: None,
            },
        ]);
        let payload: Vec<u8> = (0..500u32).map(|i| (i / 7) as u8).collect();
        let encoded = pipeline.encode(&payload, 6).unwrap();
        assert!(encoded.iter().all(|b| b.is_ascii_hexdigit() || *b == b'>'));
        assert_eq!(pipeline.decode(&encoded).unwrap(), payload);
    }

    #[test]
    fn flate_level_is_applied() {
        let pipeline = FilterPipeline::single(Filter::FlateDecode);
        let payload = b"level zero stores the bytes as they are".repeat(20);
        let stored = pipeline.encode(&payload, 0).unwrap();
        let packed = pipeline.encode(&payload, 9).unwrap();
        assert!(stored.len() > payload.len());
        assert!(packed.len() < stored.len());
        assert_eq!(pipeline.decode(&stored).unwrap(), payload);
    }

    #[test]
    fn corrupt_flate_is_reported() {
        let pipeline = FilterPipeline::single(Filter::FlateDecode);
        assert!(matches!(
            pipeline.decode(&[0x78, 0x9c, 0xff, 0xff, 0xff]),
            Err(BridgeError::CorruptStream(_))
        ));
    }

    #[test]
    fn dct_cannot_encode() {
        let pipeline = FilterPipeline::single(Filter::DctDecode);
        assert!(matches!(
            pipeline.encode(b"pixels", 6),
            Err(BridgeError::UnsupportedFilter(_))
        ));
    }

    #[test]
    fn jbig2_is_unsupported() {
        assert!(matches!(
            Filter::Jbig2Decode.decode(b"", None),
            Err(BridgeError::UnsupportedFilter(_))
        ));
    }
}
