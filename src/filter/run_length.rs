use log::warn;

pub(crate) fn decode(data: &[u8]) -> Option<Vec<u8>> {
    let mut decoded = vec![];

    if decode_inner(data, &mut decoded).is_none() {
        warn!("run-length decode stream ended prematurely");
    }

    Some(decoded)
}

fn decode_inner(mut data: &[u8], decoded: &mut Vec<u8>) -> Option<()> {
    loop {
        let (&length, rest) = data.split_first()?;
        data = rest;

        match length {
            128 => return Some(()),
            0..=127 => {
                let count = length as usize + 1;
                decoded.extend_from_slice(data.get(..count)?);
                data = &data[count..];
            }
            _ => {
                let (&byte, rest) = data.split_first()?;
                data = rest;
                decoded.extend(std::iter::repeat(byte).take(257 - length as usize));
            }
        }
    }
}

pub(crate) fn encode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 128 + 2);
    let mut literal_start = 0;
    let mut i = 0;

    let flush_literals = |out: &mut Vec<u8>, literals: &[u8]| {
        for chunk in literals.chunks(128) {
            out.push(chunk.len() as u8 - 1);
            out.extend_from_slice(chunk);
        }
    };

    while i < data.len() {
        let run = data[i..]
            .iter()
            .take(128)
            .take_while(|&&b| b == data[i])
            .count();

        if run >= 2 {
            flush_literals(&mut out, &data[literal_start..i]);
            out.push((257 - run) as u8);
            out.push(data[i]);
            i += run;
            literal_start = i;
        } else {
            i += 1;
        }
    }

    flush_literals(&mut out, &data[literal_start..]);
    out.push(128);
    out
}
