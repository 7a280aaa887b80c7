pub(crate) fn decode(data: &[u8]) -> Option<Vec<u8>> {
    let mut digits = Vec::with_capacity(data.len());

    // We are lenient and don't require a > in the stream.
    for &byte in data {
        match byte {
            b'>' => break,
            b if b.is_ascii_hexdigit() => digits.push(b),
            b if is_white_space(b) => {}
            _ => return None,
        }
    }

    digits
        .chunks(2)
        // In case length is not a multiple of 2, pad with 0.
        .map(|pair| Some(val(pair[0])? << 4 | val(*pair.get(1).unwrap_or(&b'0'))?))
        .collect()
}

pub(crate) fn encode(data: &[u8]) -> Vec<u8> {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";

    let mut out = Vec::with_capacity(data.len() * 2 + 1);
    for &byte in data {
        out.push(HEX[(byte >> 4) as usize]);
        out.push(HEX[(byte & 0x0F) as usize]);
    }
    out.push(b'>');
    out
}

fn is_white_space(b: u8) -> bool {
    matches!(b, b'\0' | b'\t' | b'\n' | b'\x0C' | b'\r' | b' ')
}

fn val(c: u8) -> Option<u8> {
    match c {
        b'A'..=b'F' => Some(c - b'A' + 10),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'0'..=b'9' => Some(c - b'0'),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_simple() {
        let input = b"AF3E2901>";
        assert_eq!(decode(input).unwrap(), vec![0xaf, 0x3e, 0x29, 0x01]);
    }

    #[test]
    fn decode_whitespaces() {
        let input = b"AF3   E2 \n  901>";
        assert_eq!(decode(input).unwrap(), vec![0xaf, 0x3e, 0x29, 0x01]);
    }

    #[test]
    fn decode_with_padding() {
        let input = b"AF3E291>";
        assert_eq!(decode(input).unwrap(), vec![0xaf, 0x3e, 0x29, 0x10]);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode(b"AF3G>").is_none());
    }

    #[test]
    fn encode_appends_eod() {
        assert_eq!(encode(&[0x00, 0xAB, 0xFF]), b"00ABFF>");
    }
}
