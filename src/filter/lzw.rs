use std::collections::HashMap;

use lopdf::Dictionary;

use crate::filter::int_param;
use crate::predictor::{self, PredictorParams};
use crate::{BridgeError, Result};

const CLEAR_TABLE: u16 = 256;
const EOD: u16 = 257;
const FIRST_CODE: u16 = 258;
const MAX_ENTRIES: usize = 4096;

pub(crate) fn decode(data: &[u8], params: Option<&Dictionary>) -> Result<Vec<u8>> {
    let decoded = decode_codes(data, early_change(params))
        .ok_or_else(|| BridgeError::CorruptStream("LZWDecode: invalid code stream".into()))?;

    predictor::decode(decoded, &PredictorParams::from_params(params))
}

pub(crate) fn encode(data: &[u8], params: Option<&Dictionary>) -> Result<Vec<u8>> {
    let predicted = predictor::encode(data, &PredictorParams::from_params(params))?;
    Ok(encode_codes(&predicted, early_change(params)))
}

fn early_change(params: Option<&Dictionary>) -> bool {
    int_param(params, b"EarlyChange").map_or(true, |e| e != 0)
}

/// Code width for a table whose next free slot is `next`.
fn code_length(next: usize, early_change: bool) -> u8 {
    let adjusted = next + usize::from(early_change);

    if adjusted >= 2048 {
        12
    } else if adjusted >= 1024 {
        11
    } else if adjusted >= 512 {
        10
    } else {
        9
    }
}

/// Decode an MSB-first LZW code stream. A missing EOD code is tolerated.
fn decode_codes(data: &[u8], early_change: bool) -> Option<Vec<u8>> {
    let mut table = Table::new();
    let mut reader = BitReader::new(data);
    let mut decoded = Vec::new();
    let mut prev: Option<usize> = None;

    loop {
        let Some(code) = reader.read(code_length(table.entries.len(), early_change)) else {
            return Some(decoded);
        };

        match code {
            CLEAR_TABLE => {
                table.clear();
                prev = None;
            }
            EOD => return Some(decoded),
            code => {
                let code = code as usize;

                if let Some(entry) = table.get(code) {
                    let first = entry[0];
                    decoded.extend_from_slice(entry);
                    if let Some(prev) = prev {
                        table.register(prev, first);
                    }
                } else {
                    let prev = prev?;
                    let first = table.get(prev)?[0];
                    if code != table.entries.len() {
                        return None;
                    }
                    table.register(prev, first);
                    decoded.extend_from_slice(table.get(code)?);
                }

                prev = Some(code);
            }
        }
    }
}

/// Encode into an MSB-first LZW code stream starting with a clear code and
/// ending with EOD.
fn encode_codes(data: &[u8], early_change: bool) -> Vec<u8> {
    let mut writer = BitWriter::default();
    let mut dict: HashMap<(u16, u8), u16> = HashMap::new();
    let mut next = FIRST_CODE as usize;
    let mut current: Option<u16> = None;

    // Decoders lag one table entry behind the encoder.
    let width = |next: usize| code_length(next - 1, early_change);

    writer.write(CLEAR_TABLE, width(next));

    for &byte in data {
        let Some(prefix) = current else {
            current = Some(byte as u16);
            continue;
        };

        if let Some(&code) = dict.get(&(prefix, byte)) {
            current = Some(code);
            continue;
        }

        writer.write(prefix, width(next));

        if next >= MAX_ENTRIES - 2 {
            writer.write(CLEAR_TABLE, width(next));
            dict.clear();
            next = FIRST_CODE as usize;
        } else {
            dict.insert((prefix, byte), next as u16);
            next += 1;
        }

        current = Some(byte as u16);
    }

    if let Some(prefix) = current {
        writer.write(prefix, width(next));
        // The decoder registers one more entry on reading the final code.
        if next > FIRST_CODE as usize {
            next += 1;
        }
    }
    writer.write(EOD, width(next));

    writer.finish()
}

struct Table {
    entries: Vec<Vec<u8>>,
}

impl Table {
    fn new() -> Self {
        let mut entries: Vec<Vec<u8>> = (0..=255u8).map(|b| vec![b]).collect();
        // Clear table and EOD don't have any data.
        entries.push(Vec::new());
        entries.push(Vec::new());
        Self { entries }
    }

    fn get(&self, code: usize) -> Option<&[u8]> {
        self.entries
            .get(code)
            .map(|e| &e[..])
            .filter(|e| !e.is_empty())
    }

    fn register(&mut self, prev: usize, byte: u8) {
        if self.entries.len() >= MAX_ENTRIES {
            return;
        }
        if let Some(prefix) = self.get(prev) {
            let mut entry = Vec::with_capacity(prefix.len() + 1);
            entry.extend_from_slice(prefix);
            entry.push(byte);
            self.entries.push(entry);
        }
    }

    fn clear(&mut self) {
        self.entries.truncate(FIRST_CODE as usize);
    }
}

struct BitReader<'a> {
    data: &'a [u8],
    bit_pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, bit_pos: 0 }
    }

    fn read(&mut self, bits: u8) -> Option<u16> {
        if self.bit_pos + bits as usize > self.data.len() * 8 {
            return None;
        }

        let mut value = 0u16;
        for _ in 0..bits {
            let byte = self.data[self.bit_pos / 8];
            let bit = (byte >> (7 - self.bit_pos % 8)) & 1;
            value = (value << 1) | bit as u16;
            self.bit_pos += 1;
        }
        Some(value)
    }
}

#[derive(Default)]
struct BitWriter {
    out: Vec<u8>,
    acc: u32,
    n_bits: u8,
}

impl BitWriter {
    fn write(&mut self, code: u16, bits: u8) {
        self.acc = (self.acc << bits) | code as u32;
        self.n_bits += bits;
        while self.n_bits >= 8 {
            self.n_bits -= 8;
            self.out.push((self.acc >> self.n_bits) as u8);
        }
        self.acc &= (1 << self.n_bits) - 1;
    }

    fn finish(mut self) -> Vec<u8> {
        if self.n_bits > 0 {
            self.out.push((self.acc << (8 - self.n_bits)) as u8);
        }
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_lzw() {
        let input = [0x80, 0x0B, 0x60, 0x50, 0x22, 0x0C, 0x0C, 0x85, 0x01];
        let decoded = decode(&input, None).unwrap();

        assert_eq!(decoded, vec![45, 45, 45, 45, 45, 65, 45, 45, 45, 66]);
    }

    #[test]
    fn encoder_matches_reference_stream() {
        let data = [45, 45, 45, 45, 45, 65, 45, 45, 45, 66];
        assert_eq!(
            encode(&data, None).unwrap(),
            vec![0x80, 0x0B, 0x60, 0x50, 0x22, 0x0C, 0x0C, 0x85, 0x01]
        );
    }

    #[test]
    fn round_trip_across_code_widths() {
        // Enough distinct sequences to grow past 12-bit codes and force a reset.
        let data: Vec<u8> = (0..40_000u32)
            .map(|i| ((i * 7919) ^ (i >> 3)) as u8)
            .collect();

        for early in [true, false] {
            let encoded = encode_codes(&data, early);
            assert_eq!(decode_codes(&encoded, early).unwrap(), data, "early {early}");
        }
    }

    #[test]
    fn round_trip_empty_and_single() {
        assert_eq!(decode_codes(&encode_codes(&[], true), true).unwrap(), b"");
        assert_eq!(decode_codes(&encode_codes(b"x", true), true).unwrap(), b"x");
    }

    #[test]
    fn invalid_code_is_corrupt() {
        // Clear table, then code 300 with an empty table.
        let mut writer = BitWriter::default();
        writer.write(CLEAR_TABLE, 9);
        writer.write(300, 9);
        let data = writer.finish();
        assert!(decode(&data, None).is_err());
    }
}
