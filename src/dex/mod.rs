#[macro_use]
pub mod error;

pub(crate) mod leb;
pub mod writer;
pub mod opcodes;
pub mod instructions;
pub(crate) mod encoded_values;
pub mod pools;
pub mod map;
pub mod header;
pub mod dex_file;
pub mod reader;

use crate::dex::error::DexError;
use crate::dex::leb::{decode_sleb128, decode_uleb128};

/// Marker for an absent string/type index in fixed-width index fields.
pub const NO_INDEX: u32 = 0xffff_ffff;

// Basic type reading, shared by the verifying reader
pub(crate) fn read_u1(bytes: &[u8], ix: &mut usize) -> Result<u8, DexError>
{
    if bytes.len() < *ix + 1
    {
        fail!("Unexpected end of stream reading u1 at index {}", *ix);
    }
    let result = bytes[*ix];
    *ix += 1;
    Ok(result)
}

pub(crate) fn read_u2(bytes: &[u8], ix: &mut usize) -> Result<u16, DexError>
{
    if bytes.len() < *ix + 2
    {
        fail!("Unexpected end of stream reading u2 at index {}", *ix);
    }
    let result = u16::from_le_bytes([bytes[*ix], bytes[*ix + 1]]);
    *ix += 2;
    Ok(result)
}

pub(crate) fn read_u4(bytes: &[u8], ix: &mut usize) -> Result<u32, DexError>
{
    if bytes.len() < *ix + 4
    {
        fail!("Unexpected end of stream reading u4 at index {}", *ix);
    }
    let result = u32::from_le_bytes([bytes[*ix], bytes[*ix + 1], bytes[*ix + 2], bytes[*ix + 3]]);
    *ix += 4;
    Ok(result)
}

pub(crate) fn read_uleb128(bytes: &[u8], ix: &mut usize) -> Result<u32, DexError>
{
    if *ix > bytes.len()
    {
        fail!("Unexpected end of stream reading uleb128 at index {}", *ix);
    }
    let (val, size) = decode_uleb128(&bytes[*ix..])?;
    *ix += size;
    Ok(val)
}

pub(crate) fn read_sleb128(bytes: &[u8], ix: &mut usize) -> Result<i32, DexError>
{
    if *ix > bytes.len()
    {
        fail!("Unexpected end of stream reading sleb128 at index {}", *ix);
    }
    let (val, size) = decode_sleb128(&bytes[*ix..])?;
    *ix += size;
    Ok(val)
}

/// uleb128p1: the stored value is one more than the index, so 0 means "absent".
pub(crate) fn read_uleb128p1(bytes: &[u8], ix: &mut usize) -> Result<Option<u32>, DexError>
{
    let raw = read_uleb128(bytes, ix)?;
    Ok(raw.checked_sub(1))
}

pub(crate) fn read_x(bytes: &[u8], ix: &mut usize, length: usize) -> Result<Vec<u8>, DexError>
{
    if bytes.len() >= *ix && bytes.len() - *ix >= length
    {
        let v = bytes[*ix..*ix + length].to_vec();
        *ix += length;
        Ok(v)
    }
    else
    {
        Err(DexError::new(
            "buffer too short for array read",
        ))
    }
}
