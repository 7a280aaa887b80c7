use lopdf::Dictionary;

use crate::filter::int_param;
use crate::{BridgeError, Result};

/// Decode CCITT Group 4 fax data into 1-bit rows.
///
/// Rows are padded to a byte boundary. Unless `BlackIs1` is set, 0 bits are
/// black, which is the PDF default.
pub(crate) fn decode(data: &[u8], params: Option<&Dictionary>) -> Result<Vec<u8>> {
    let k = int_param(params, b"K").unwrap_or(0);
    if k >= 0 {
        return Err(BridgeError::UnsupportedFilter(format!(
            "CCITTFaxDecode with K={k}"
        )));
    }

    let columns = int_param(params, b"Columns").unwrap_or(1728);
    let width = u16::try_from(columns)
        .ok()
        .filter(|w| *w > 0)
        .ok_or_else(|| BridgeError::CorruptStream(format!("CCITTFaxDecode: Columns {columns}")))?;
    let height = int_param(params, b"Rows").and_then(|r| u16::try_from(r).ok());
    let black_is_1 = int_param(params, b"BlackIs1").unwrap_or(0) != 0;

    let bytes_per_row = (width as usize).div_ceil(8);
    let mut out = Vec::new();

    fax::decoder::decode_g4(data.iter().copied(), width, height, |transitions| {
        let row = pack_row_bits(transitions, width, black_is_1);
        out.extend_from_slice(&row);
    })
    .ok_or_else(|| BridgeError::CorruptStream("CCITTFaxDecode: invalid G4 data".into()))?;

    if out.is_empty() {
        return Err(BridgeError::CorruptStream(
            "CCITTFaxDecode: no rows decoded".into(),
        ));
    }

    debug_assert_eq!(out.len() % bytes_per_row, 0);
    Ok(out)
}

/// Convert fax transition positions into a packed 1-bit row.
fn pack_row_bits(transitions: &[u16], width: u16, black_is_1: bool) -> Vec<u8> {
    let bytes_per_row = (width as usize).div_ceil(8);
    let mut row = vec![0u8; bytes_per_row];

    let mut set_black_run = |start: u16, end: u16| {
        for col in start..end.min(width) {
            let byte_idx = col as usize / 8;
            let bit_idx = 7 - (col as usize % 8);
            row[byte_idx] |= 1 << bit_idx;
        }
    };

    let mut is_black = false;
    let mut prev_pos: u16 = 0;

    for &pos in transitions {
        if is_black {
            set_black_run(prev_pos, pos);
        }
        prev_pos = pos;
        is_black = !is_black;
    }

    if is_black {
        set_black_run(prev_pos, width);
    }

    if !black_is_1 {
        for byte in &mut row {
            *byte = !*byte;
        }
    }

    row
}
