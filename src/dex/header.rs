/* Dex header item and the final checksum/signature pass */

use adler::adler32_slice;
use log::debug;
use sha1::{Digest, Sha1};

use crate::dex::error::DexError;
use crate::dex::writer::DexWriter;
use crate::dex::{read_u4, read_x};

pub const HEADER_SIZE: u32 = 0x70;
pub const ENDIAN_CONSTANT: u32 = 0x12345678;
pub const REVERSE_ENDIAN_CONSTANT: u32 = 0x78563412;

// Offsets of the integrity fields inside the header
const CHECKSUM_OFFSET: usize = 8;
const SIGNATURE_OFFSET: usize = 12;
const SIGNED_FROM: usize = 32;

/// Lowest api level each container version is accepted by.
pub const DEFAULT_API_LEVEL: u32 = 15;

/// The eight magic bytes for the container version understood by `api_level`.
///
/// # Examples
///
/// ```
///  use dexwriter::dex::header::magic_for_api;
///
///  assert_eq!(&magic_for_api(15), b"dex\n035\0");
///  assert_eq!(&magic_for_api(28), b"dex\n039\0");
/// ```
pub fn magic_for_api(api_level: u32) -> [u8; 8] {
    let version: &[u8; 3] = match api_level {
        0..=23 => b"035",
        24..=25 => b"037",
        26..=27 => b"038",
        _ => b"039",
    };
    [b'd', b'e', b'x', b'\n', version[0], version[1], version[2], 0]
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Header {
    pub magic: [u8; 8],
    pub checksum: u32,
    pub signature: [u8; 20],
    pub file_size: u32,
    pub header_size: u32,
    pub endian_tag: u32,
    pub link_size: u32,
    pub link_off: u32,
    pub map_off: u32,
    pub string_ids_size: u32,
    pub string_ids_off: u32,
    pub type_ids_size: u32,
    pub type_ids_off: u32,
    pub proto_ids_size: u32,
    pub proto_ids_off: u32,
    pub field_ids_size: u32,
    pub field_ids_off: u32,
    pub method_ids_size: u32,
    pub method_ids_off: u32,
    pub class_defs_size: u32,
    pub class_defs_off: u32,
    pub data_size: u32,
    pub data_off: u32,
}

impl Header {
    pub fn new(api_level: u32) -> Header {
        Header {
            magic: magic_for_api(api_level),
            header_size: HEADER_SIZE,
            endian_tag: ENDIAN_CONSTANT,
            ..Header::default()
        }
    }

    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<Header, DexError> {
        if bytes.len() < HEADER_SIZE as usize {
            fail!(Malformed, "Not enough bytes for header");
        }

        let mut magic = [0u8; 8];
        magic.copy_from_slice(&read_x(bytes, ix, 8)?);
        if &magic[..4] != b"dex\n" { fail!(Malformed, "Invalid magic value"); }
        let checksum = read_u4(bytes, ix)?;
        let mut signature = [0u8; 20];
        signature.copy_from_slice(&read_x(bytes, ix, 20)?);

        let header = Header {
            magic,
            checksum,
            signature,
            file_size: read_u4(bytes, ix)?,
            header_size: read_u4(bytes, ix)?,
            endian_tag: read_u4(bytes, ix)?,
            link_size: read_u4(bytes, ix)?,
            link_off: read_u4(bytes, ix)?,
            map_off: read_u4(bytes, ix)?,
            string_ids_size: read_u4(bytes, ix)?,
            string_ids_off: read_u4(bytes, ix)?,
            type_ids_size: read_u4(bytes, ix)?,
            type_ids_off: read_u4(bytes, ix)?,
            proto_ids_size: read_u4(bytes, ix)?,
            proto_ids_off: read_u4(bytes, ix)?,
            field_ids_size: read_u4(bytes, ix)?,
            field_ids_off: read_u4(bytes, ix)?,
            method_ids_size: read_u4(bytes, ix)?,
            method_ids_off: read_u4(bytes, ix)?,
            class_defs_size: read_u4(bytes, ix)?,
            class_defs_off: read_u4(bytes, ix)?,
            data_size: read_u4(bytes, ix)?,
            data_off: read_u4(bytes, ix)?,
        };
        if header.endian_tag == REVERSE_ENDIAN_CONSTANT {
            fail!(Malformed, "Big-endian containers are not supported");
        }
        if header.endian_tag != ENDIAN_CONSTANT {
            fail!(Malformed, "Invalid endian tag 0x{:08x}", header.endian_tag);
        }
        Ok(header)
    }

    pub fn write(&self, writer: &mut DexWriter) {
        writer.write_bytes(&self.magic);
        writer.write_uint(self.checksum);
        writer.write_bytes(&self.signature);
        writer.write_uint(self.file_size);
        writer.write_uint(self.header_size);
        writer.write_uint(self.endian_tag);
        writer.write_uint(self.link_size);
        writer.write_uint(self.link_off);
        writer.write_uint(self.map_off);
        writer.write_uint(self.string_ids_size);
        writer.write_uint(self.string_ids_off);
        writer.write_uint(self.type_ids_size);
        writer.write_uint(self.type_ids_off);
        writer.write_uint(self.proto_ids_size);
        writer.write_uint(self.proto_ids_off);
        writer.write_uint(self.field_ids_size);
        writer.write_uint(self.field_ids_off);
        writer.write_uint(self.method_ids_size);
        writer.write_uint(self.method_ids_off);
        writer.write_uint(self.class_defs_size);
        writer.write_uint(self.class_defs_off);
        writer.write_uint(self.data_size);
        writer.write_uint(self.data_off);
    }

    /// Serializes the header into the first bytes of `file`, then fills in the signature
    /// and checksum. The signature covers everything after itself and the checksum covers
    /// everything after itself, so the signature has to be computed first.
    pub(crate) fn finalize(&mut self, file: &mut Vec<u8>) -> Result<(), DexError> {
        if file.len() < HEADER_SIZE as usize {
            fail!(ContractViolation, "file of {} bytes has no room for a header", file.len());
        }
        self.file_size = file.len() as u32;
        self.data_size = self.file_size.saturating_sub(self.data_off);

        self.overwrite(file);
        self.signature = signature_of(file);
        file[SIGNATURE_OFFSET..SIGNED_FROM].copy_from_slice(&self.signature);
        self.checksum = checksum_of(file);
        file[CHECKSUM_OFFSET..SIGNATURE_OFFSET].copy_from_slice(&self.checksum.to_le_bytes());

        debug!("[header] file_size=0x{:x} checksum=0x{:08x}", self.file_size, self.checksum);
        Ok(())
    }

    fn overwrite(&self, file: &mut [u8]) {
        let mut writer = DexWriter::new(0);
        self.write(&mut writer);
        file[..HEADER_SIZE as usize].copy_from_slice(writer.bytes());
    }
}

/// SHA-1 over everything following the signature field.
pub fn signature_of(file: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(&file[SIGNED_FROM..]);
    let digest = hasher.finalize();
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest);
    out
}

/// Adler-32 over everything following the checksum field.
pub fn checksum_of(file: &[u8]) -> u32 {
    adler32_slice(&file[SIGNATURE_OFFSET..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_tracks_api_level() {
        assert_eq!(&magic_for_api(DEFAULT_API_LEVEL), b"dex\n035\0");
        assert_eq!(&magic_for_api(24), b"dex\n037\0");
        assert_eq!(&magic_for_api(25), b"dex\n037\0");
        assert_eq!(&magic_for_api(26), b"dex\n038\0");
        assert_eq!(&magic_for_api(30), b"dex\n039\0");
    }

    #[test]
    fn test_header_round_trip() {
        let mut header = Header::new(26);
        header.string_ids_size = 3;
        header.string_ids_off = HEADER_SIZE;
        header.data_off = 0x100;

        let mut writer = DexWriter::new(0);
        header.write(&mut writer);
        assert_eq!(writer.bytes().len(), HEADER_SIZE as usize);

        let mut ix = 0;
        let decoded = Header::read(writer.bytes(), &mut ix).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(ix, HEADER_SIZE as usize);
    }

    #[test]
    fn finalize_fills_integrity_fields() {
        let mut header = Header::new(15);
        header.data_off = HEADER_SIZE;
        let mut file = vec![0u8; HEADER_SIZE as usize];
        file.extend_from_slice(&[1, 2, 3, 4]);
        header.finalize(&mut file).unwrap();

        let mut ix = 0;
        let decoded = Header::read(&file, &mut ix).unwrap();
        assert_eq!(decoded.file_size, 0x74);
        assert_eq!(decoded.data_size, 4);
        assert_eq!(decoded.signature, signature_of(&file));
        assert_eq!(decoded.checksum, checksum_of(&file));
    }

    #[test]
    fn rejects_bad_endian_tag() {
        let mut header = Header::new(15);
        header.endian_tag = REVERSE_ENDIAN_CONSTANT;
        let mut writer = DexWriter::new(0);
        header.write(&mut writer);
        assert!(Header::read(writer.bytes(), &mut 0).is_err());
    }
}
