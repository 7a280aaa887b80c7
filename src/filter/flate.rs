use std::io::{Read, Write};

use flate2::read::{DeflateDecoder, ZlibDecoder};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use lopdf::Dictionary;

use crate::predictor::{self, PredictorParams};
use crate::{BridgeError, Result};

pub(crate) fn decode(data: &[u8], params: Option<&Dictionary>) -> Result<Vec<u8>> {
    let decoded = zlib(data)
        .or_else(|| deflate(data))
        .ok_or_else(|| BridgeError::CorruptStream("FlateDecode: invalid deflate data".into()))?;

    predictor::decode(decoded, &PredictorParams::from_params(params))
}

pub(crate) fn encode(data: &[u8], params: Option<&Dictionary>, level: u32) -> Result<Vec<u8>> {
    let predicted = predictor::encode(data, &PredictorParams::from_params(params))?;
    compress_level(&predicted, level)
}

/// Zlib-compress `data` at the default level.
#[cfg(test)]
pub(crate) fn compress(data: &[u8]) -> Result<Vec<u8>> {
    compress_level(data, Compression::default().level())
}

fn compress_level(data: &[u8], level: u32) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level.min(9)));
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Inflate a zlib stream.
fn zlib(data: &[u8]) -> Option<Vec<u8>> {
    let mut decoded = Vec::new();
    ZlibDecoder::new(data).read_to_end(&mut decoded).ok()?;
    Some(decoded)
}

// Some producers omit the zlib header.
fn deflate(data: &[u8]) -> Option<Vec<u8>> {
    let mut decoded = Vec::new();
    DeflateDecoder::new(data).read_to_end(&mut decoded).ok()?;
    Some(decoded)
}
