//! Position-tracked byte sink used by every pool.
//!
//! A [`DexWriter`] is created with the absolute file offset of its first byte, so
//! [`DexWriter::position`] always reports a file offset that can be stored directly
//! in index rows and offset fields. Fixed-width writes are range checked: a value
//! that does not fit means the model is inconsistent and the write fails with
//! [`ErrorKind::Encoding`](crate::dex::error::ErrorKind::Encoding).

use crate::dex::error::DexError;
use crate::dex::leb::{write_sleb128, write_uleb128};

// Encoded value type tags
pub const VALUE_BYTE: u8 = 0x00;
pub const VALUE_SHORT: u8 = 0x02;
pub const VALUE_CHAR: u8 = 0x03;
pub const VALUE_INT: u8 = 0x04;
pub const VALUE_LONG: u8 = 0x06;
pub const VALUE_FLOAT: u8 = 0x10;
pub const VALUE_DOUBLE: u8 = 0x11;
pub const VALUE_STRING: u8 = 0x17;
pub const VALUE_TYPE: u8 = 0x18;
pub const VALUE_FIELD: u8 = 0x19;
pub const VALUE_METHOD: u8 = 0x1a;
pub const VALUE_ENUM: u8 = 0x1b;
pub const VALUE_ARRAY: u8 = 0x1c;
pub const VALUE_ANNOTATION: u8 = 0x1d;
pub const VALUE_NULL: u8 = 0x1e;
pub const VALUE_BOOLEAN: u8 = 0x1f;

#[derive(Debug, Default)]
pub struct DexWriter {
    base: u32,
    buffer: Vec<u8>,
}

impl DexWriter {
    pub fn new(base: u32) -> Self {
        DexWriter {
            base,
            buffer: Vec::new(),
        }
    }

    /// Absolute offset of the next byte to be written.
    pub fn position(&self) -> u32 {
        self.base + self.buffer.len() as u32
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Raw little-endian code unit.
    pub fn write_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_ushort(&mut self, value: i64) -> Result<(), DexError> {
        if !(0..=0xffff).contains(&value) {
            fail!(Encoding, "ushort value out of range: {}", value);
        }
        self.buffer.extend_from_slice(&(value as u16).to_le_bytes());
        Ok(())
    }

    pub fn write_uint(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_uleb128(&mut self, value: u32) {
        write_uleb128(&mut self.buffer, value);
    }

    pub fn write_sleb128(&mut self, value: i32) {
        write_sleb128(&mut self.buffer, value);
    }

    /// Writes `index + 1`, with `None` encoded as 0.
    pub fn write_uleb128p1(&mut self, index: Option<u32>) {
        let raw = match index {
            Some(idx) => idx.wrapping_add(1),
            None => 0,
        };
        write_uleb128(&mut self.buffer, raw);
    }

    pub fn write_encoded_value_header(&mut self, value_type: u8, value_arg: u8) -> Result<(), DexError> {
        if value_type > 0x1f || value_arg > 7 {
            fail!(Encoding, "bad encoded value header: type 0x{:02x}, arg {}", value_type, value_arg);
        }
        self.buffer.push(value_type | (value_arg << 5));
        Ok(())
    }

    /// Sign-extended value in the fewest bytes that reproduce it.
    pub fn write_encoded_int(&mut self, value_type: u8, value: i64) -> Result<(), DexError> {
        let width = signed_width(value);
        self.write_encoded_value_header(value_type, (width - 1) as u8)?;
        self.buffer.extend_from_slice(&value.to_le_bytes()[..width]);
        Ok(())
    }

    /// Zero-extended value in the fewest bytes that reproduce it.
    pub fn write_encoded_uint(&mut self, value_type: u8, value: u64) -> Result<(), DexError> {
        let width = unsigned_width(value);
        self.write_encoded_value_header(value_type, (width - 1) as u8)?;
        self.buffer.extend_from_slice(&value.to_le_bytes()[..width]);
        Ok(())
    }

    pub fn write_encoded_float(&mut self, value_type: u8, value: f32) -> Result<(), DexError> {
        self.write_right_zero_extended(value_type, &value.to_bits().to_le_bytes())
    }

    pub fn write_encoded_double(&mut self, value_type: u8, value: f64) -> Result<(), DexError> {
        self.write_right_zero_extended(value_type, &value.to_bits().to_le_bytes())
    }

    // Drops low-order zero bytes, keeping at least one.
    fn write_right_zero_extended(&mut self, value_type: u8, le_bytes: &[u8]) -> Result<(), DexError> {
        let skip = le_bytes
            .iter()
            .take(le_bytes.len() - 1)
            .take_while(|b| **b == 0)
            .count();
        let kept = &le_bytes[skip..];
        self.write_encoded_value_header(value_type, (kept.len() - 1) as u8)?;
        self.buffer.extend_from_slice(kept);
        Ok(())
    }

    /// Modified UTF-8 body of a string: no length prefix, no terminator.
    pub fn write_string(&mut self, value: &str) {
        let encoded = cesu8::to_java_cesu8(value);
        self.buffer.extend_from_slice(&encoded);
    }

    /// Pads with zeros up to the next 4-byte boundary.
    pub fn align(&mut self) {
        while self.position() % 4 != 0 {
            self.buffer.push(0);
        }
    }

}

fn signed_width(value: i64) -> usize {
    let mut width = 1;
    while width < 8 {
        let shift = 64 - 8 * width as u32;
        if (value << shift) >> shift == value {
            break;
        }
        width += 1;
    }
    width
}

fn unsigned_width(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    std::cmp::max(1, (bits + 7) / 8)
}

/// Number of UTF-16 code units, which is what `string_data_item` records as its size.
pub fn utf16_length(value: &str) -> u32 {
    value.encode_utf16().count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::error::ErrorKind;

    #[test]
    fn positions_are_absolute() {
        let mut w = DexWriter::new(0x70);
        assert_eq!(w.position(), 0x70);
        w.write_u8(1);
        w.align();
        assert_eq!(w.position(), 0x74);
        assert_eq!(w.bytes(), &[1, 0, 0, 0]);
        w.align();
        assert_eq!(w.position(), 0x74);
    }

    #[test]
    fn ushorts_are_range_checked() {
        let mut w = DexWriter::new(0);
        assert!(w.write_ushort(0xffff).is_ok());
        assert_eq!(w.write_ushort(0x10000).unwrap_err().kind(), ErrorKind::Encoding);
        assert_eq!(w.write_ushort(-1).unwrap_err().kind(), ErrorKind::Encoding);
        assert_eq!(w.bytes(), &[0xff, 0xff]);
    }

    #[test]
    fn encoded_ints_use_fewest_bytes() {
        let cases: Vec<(i64, Vec<u8>)> = vec![
            (0, vec![0x04, 0x00]),
            (127, vec![0x04, 0x7f]),
            (128, vec![0x24, 0x80, 0x00]),
            (-1, vec![0x04, 0xff]),
            (-128, vec![0x04, 0x80]),
            (-129, vec![0x24, 0x7f, 0xff]),
            (0x12345678, vec![0x64, 0x78, 0x56, 0x34, 0x12]),
        ];

        for (value, expected) in cases {
            let mut w = DexWriter::new(0);
            w.write_encoded_int(VALUE_INT, value).unwrap();
            assert_eq!(w.bytes(), expected.as_slice(), "value {}", value);
        }
    }

    #[test]
    fn encoded_uints_are_zero_extended() {
        let cases: Vec<(u64, Vec<u8>)> = vec![
            (0, vec![0x17, 0x00]),
            (0xff, vec![0x17, 0xff]),
            (0x100, vec![0x37, 0x00, 0x01]),
            (0xffff_ffff, vec![0x77, 0xff, 0xff, 0xff, 0xff]),
        ];

        for (value, expected) in cases {
            let mut w = DexWriter::new(0);
            w.write_encoded_uint(VALUE_STRING, value).unwrap();
            assert_eq!(w.bytes(), expected.as_slice(), "value {}", value);
        }
    }

    #[test]
    fn floats_keep_high_order_bytes() {
        let mut w = DexWriter::new(0);
        // 1.0f = 0x3f800000: two significant high bytes
        w.write_encoded_float(VALUE_FLOAT, 1.0).unwrap();
        assert_eq!(w.bytes(), &[0x30, 0x80, 0x3f]);

        let mut w = DexWriter::new(0);
        w.write_encoded_double(VALUE_DOUBLE, 2.0).unwrap();
        assert_eq!(w.bytes(), &[0x11, 0x40]);

        let mut w = DexWriter::new(0);
        w.write_encoded_float(VALUE_FLOAT, 0.0).unwrap();
        assert_eq!(w.bytes(), &[0x10, 0x00]);
    }

    #[test]
    fn strings_are_modified_utf8() {
        let mut w = DexWriter::new(0);
        w.write_string("a\u{0}\u{e9}\u{20ac}");
        assert_eq!(w.bytes(), &[0x61, 0xc0, 0x80, 0xc3, 0xa9, 0xe2, 0x82, 0xac]);

        // supplementary characters become two 3-byte surrogates
        let mut w = DexWriter::new(0);
        w.write_string("\u{1f600}");
        assert_eq!(w.bytes(), &[0xed, 0xa0, 0xbd, 0xed, 0xb8, 0x80]);
        assert_eq!(utf16_length("\u{1f600}"), 2);
    }
}
