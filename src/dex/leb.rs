use crate::dex::error::DexError;

/// Appends the minimal unsigned LEB128 encoding of `value`, returning the byte count.
pub(crate) fn write_uleb128(out: &mut Vec<u8>, value: u32) -> usize {
    let mut remaining = value;
    let mut count = 0;

    loop {
        let mut byte = (remaining & 0x7F) as u8;
        remaining >>= 7;
        if remaining != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        count += 1;

        if remaining == 0 {
            break;
        }
    }

    count
}

/// Appends the minimal signed LEB128 encoding of `value`, returning the byte count.
pub(crate) fn write_sleb128(out: &mut Vec<u8>, value: i32) -> usize {
    let mut remaining = value;
    let mut count = 0;

    loop {
        let mut byte = (remaining & 0x7F) as u8;
        remaining >>= 7;

        let is_more =
            !((remaining == 0 && (byte & 0x40) == 0) || (remaining == -1 && (byte & 0x40) != 0));
        if is_more {
            byte |= 0x80;
        }

        out.push(byte);
        count += 1;

        if !is_more {
            break;
        }
    }

    count
}

pub(crate) fn decode_uleb128(encoded: &[u8]) -> Result<(u32, usize), DexError> {
    let mut value: u32 = 0;

    for (i, &byte) in encoded.iter().enumerate() {
        // 32-bit values never need more than 5 bytes
        if i == 5 {
            break;
        }
        value |= ((byte & 0x7F) as u32).wrapping_shl(7 * i as u32);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }

    Err(err!("unterminated uleb128 value"))
}

pub(crate) fn decode_sleb128(encoded: &[u8]) -> Result<(i32, usize), DexError> {
    let mut value: i32 = 0;

    for (i, &byte) in encoded.iter().enumerate() {
        if i == 5 {
            break;
        }
        let shift = 7 * i as u32;
        value |= ((byte & 0x7F) as i32).wrapping_shl(shift);
        if byte & 0x80 == 0 {
            // sign-extend from the last payload bit when the value did not fill 32 bits
            if shift + 7 < 32 && (byte & 0x40) != 0 {
                value |= (-1i32).wrapping_shl(shift + 7);
            }
            return Ok((value, i + 1));
        }
    }

    Err(err!("unterminated sleb128 value"))
}
