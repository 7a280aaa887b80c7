//! Row predictors for the Flate and LZW stream codecs.

use lopdf::Dictionary;

use crate::{BridgeError, Result};

/// PNG row filter types, as stored in the first byte of each scanline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum RowFilter {
    None = 0,
    Sub = 1,
    Up = 2,
    Average = 3,
    Paeth = 4,
}

impl RowFilter {
    const ALL: [RowFilter; 5] = [
        RowFilter::None,
        RowFilter::Sub,
        RowFilter::Up,
        RowFilter::Average,
        RowFilter::Paeth,
    ];
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = a as i16 + b as i16 - c as i16;
    let pa = (p - a as i16).abs();
    let pb = (p - b as i16).abs();
    let pc = (p - c as i16).abs();
    // Tie-breaking order is fixed by the PNG format.
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

/// Reverse a PNG row filter in place. `prev` is the reconstructed previous
/// row (all zeros for the first row).
fn unfilter_row(filter: u8, bpp: usize, prev: &[u8], row: &mut [u8]) -> Result<()> {
    match filter {
        0 => {}
        1 => {
            for i in bpp..row.len() {
                row[i] = row[i].wrapping_add(row[i - bpp]);
            }
        }
        2 => {
            for (cur, up) in row.iter_mut().zip(prev) {
                *cur = cur.wrapping_add(*up);
            }
        }
        3 => {
            for i in 0..row.len() {
                let left = if i >= bpp { row[i - bpp] as u16 } else { 0 };
                let avg = (left + prev[i] as u16) / 2;
                row[i] = row[i].wrapping_add(avg as u8);
            }
        }
        4 => {
            for i in 0..row.len() {
                let (left, up_left) = if i >= bpp {
                    (row[i - bpp], prev[i - bpp])
                } else {
                    (0, 0)
                };
                row[i] = row[i].wrapping_add(paeth(left, prev[i], up_left));
            }
        }
        other => {
            return Err(BridgeError::CorruptStream(format!(
                "unknown PNG row filter {other}"
            )))
        }
    }

    Ok(())
}

/// Apply a PNG row filter, appending the filter byte and filtered row to `out`.
fn filter_row(filter: RowFilter, bpp: usize, prev: &[u8], row: &[u8], out: &mut Vec<u8>) {
    out.push(filter as u8);

    for i in 0..row.len() {
        let left = if i >= bpp { row[i - bpp] } else { 0 };
        let up = prev[i];
        let up_left = if i >= bpp { prev[i - bpp] } else { 0 };

        let predicted = match filter {
            RowFilter::None => 0,
            RowFilter::Sub => left,
            RowFilter::Up => up,
            RowFilter::Average => ((left as u16 + up as u16) / 2) as u8,
            RowFilter::Paeth => paeth(left, up, up_left),
        };
        out.push(row[i].wrapping_sub(predicted));
    }
}

/// Filter a row with whichever filter yields the smallest sum of absolute
/// residuals (read as signed bytes). Ties go to the lower filter type.
fn filter_row_adaptive(bpp: usize, prev: &[u8], row: &[u8], out: &mut Vec<u8>) {
    let mut best: Option<(u64, Vec<u8>)> = None;
    let mut candidate = Vec::with_capacity(row.len() + 1);

    for filter in RowFilter::ALL {
        candidate.clear();
        filter_row(filter, bpp, prev, row, &mut candidate);
        let score: u64 = candidate[1..]
            .iter()
            .map(|&b| (b as i8).unsigned_abs() as u64)
            .sum();

        if best.as_ref().map_or(true, |(s, _)| score < *s) {
            best = Some((score, candidate.clone()));
        }
    }

    if let Some((_, filtered)) = best {
        out.extend_from_slice(&filtered);
    }
}

/// Predictor parameters from a Flate or LZW `DecodeParms` dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PredictorParams {
    pub predictor: u8,
    pub colors: usize,
    pub bits_per_component: usize,
    pub columns: usize,
}

impl Default for PredictorParams {
    fn default() -> Self {
        Self {
            predictor: 1,
            colors: 1,
            bits_per_component: 8,
            columns: 1,
        }
    }
}

impl PredictorParams {
    pub fn from_params(params: Option<&Dictionary>) -> Self {
        let defaults = Self::default();
        let int = |key: &[u8]| crate::filter::int_param(params, key);

        Self {
            predictor: int(b"Predictor").map_or(defaults.predictor, |v| v.clamp(0, 255) as u8),
            colors: int(b"Colors").map_or(defaults.colors, |v| v.max(1) as usize),
            bits_per_component: int(b"BitsPerComponent")
                .map_or(defaults.bits_per_component, |v| v.max(1) as usize),
            columns: int(b"Columns").map_or(defaults.columns, |v| v.max(1) as usize),
        }
    }

    fn bytes_per_pixel(&self) -> usize {
        (self.colors * self.bits_per_component).div_ceil(8)
    }

    fn row_length(&self) -> Result<usize> {
        let bits = self
            .colors
            .checked_mul(self.bits_per_component)
            .and_then(|bits| bits.checked_mul(self.columns))
            .unwrap_or(0);
        match bits.div_ceil(8) {
            0 => Err(BridgeError::CorruptStream(format!(
                "predictor row is empty ({} colors, {} columns)",
                self.colors, self.columns
            ))),
            len => Ok(len),
        }
    }
}

/// Undo a stream predictor after decompression.
pub(crate) fn decode(data: Vec<u8>, params: &PredictorParams) -> Result<Vec<u8>> {
    match params.predictor {
        0 | 1 => Ok(data),
        2 => {
            let mut data = data;
            tiff_horizontal(&mut data, params, false)?;
            Ok(data)
        }
        10..=15 => {
            let row_length = params.row_length()?;
            let bpp = params.bytes_per_pixel();
            let stride = row_length + 1;

            if data.len() % stride != 0 {
                log::warn!(
                    "predicted stream has {} trailing bytes, ignoring them",
                    data.len() % stride
                );
            }

            let rows = data.len() / stride;
            let mut out = vec![0u8; rows * row_length];
            let zeros = vec![0u8; row_length];

            for (i, chunk) in data.chunks_exact(stride).enumerate() {
                let (done, rest) = out.split_at_mut(i * row_length);
                let prev = if i == 0 {
                    &zeros[..]
                } else {
                    &done[(i - 1) * row_length..]
                };
                let row = &mut rest[..row_length];
                row.copy_from_slice(&chunk[1..]);
                unfilter_row(chunk[0], bpp, prev, row)?;
            }

            Ok(out)
        }
        other => Err(BridgeError::UnsupportedFilter(format!("predictor {other}"))),
    }
}

/// Apply a stream predictor before compression.
pub(crate) fn encode(data: &[u8], params: &PredictorParams) -> Result<Vec<u8>> {
    match params.predictor {
        0 | 1 => Ok(data.to_vec()),
        2 => {
            let mut data = data.to_vec();
            tiff_horizontal(&mut data, params, true)?;
            Ok(data)
        }
        10..=15 => {
            let row_length = params.row_length()?;
            let bpp = params.bytes_per_pixel();

            if data.len() % row_length != 0 {
                return Err(BridgeError::DimensionMismatch {
                    expected: data.len().div_ceil(row_length) * row_length,
                    actual: data.len(),
                });
            }

            let mut out = Vec::with_capacity(data.len() + data.len() / row_length);
            let zeros = vec![0u8; row_length];
            let mut prev = &zeros[..];

            for row in data.chunks_exact(row_length) {
                match params.predictor {
                    10 => filter_row(RowFilter::None, bpp, prev, row, &mut out),
                    11 => filter_row(RowFilter::Sub, bpp, prev, row, &mut out),
                    12 => filter_row(RowFilter::Up, bpp, prev, row, &mut out),
                    13 => filter_row(RowFilter::Average, bpp, prev, row, &mut out),
                    14 => filter_row(RowFilter::Paeth, bpp, prev, row, &mut out),
                    _ => filter_row_adaptive(bpp, prev, row, &mut out),
                }
                prev = row;
            }

            Ok(out)
        }
        other => Err(BridgeError::UnsupportedFilter(format!("predictor {other}"))),
    }
}

/// TIFF predictor 2: horizontal differencing of 8-bit components.
fn tiff_horizontal(data: &mut [u8], params: &PredictorParams, encode: bool) -> Result<()> {
    if params.bits_per_component != 8 {
        return Err(BridgeError::UnsupportedFilter(format!(
            "TIFF predictor with {} bits per component",
            params.bits_per_component
        )));
    }

    let colors = params.colors;
    for row in data.chunks_mut(params.row_length()?) {
        if encode {
            for i in (colors..row.len()).rev() {
                row[i] = row[i].wrapping_sub(row[i - colors]);
            }
        } else {
            for i in colors..row.len() {
                row[i] = row[i].wrapping_add(row[i - colors]);
            }
        }
    }

    Ok(())
}
