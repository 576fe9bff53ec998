use log::debug;

use crate::dex::error::DexError;
use crate::dex::map::SectionInfo;
use crate::dex::pools::{Pool, StringKey};
use crate::dex::writer::{utf16_length, DexWriter};

/// Every string in the container: ids in the index area, contents in the data area.
#[derive(Debug)]
pub struct StringPool {
    ids: Pool<StringKey>,
    data_offsets: Vec<u32>,
    ids_offset: Option<u32>,
}

impl StringPool {
    pub fn new() -> Self {
        StringPool { ids: Pool::new("string"), data_offsets: vec![], ids_offset: None }
    }

    pub fn intern(&mut self, value: &str) {
        self.ids.intern(StringKey::new(value));
    }

    pub fn intern_opt(&mut self, value: Option<&str>) {
        if let Some(value) = value {
            self.intern(value);
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub(crate) fn assign_indices(&mut self) {
        self.ids.assign_indices();
    }

    pub fn index(&self, value: &str) -> Result<u32, DexError> {
        self.ids.position(&StringKey::new(value))
    }

    /// Writes `string_data_item`s in index order: utf-16 length, modified UTF-8, terminator.
    pub fn write_data(&mut self, writer: &mut DexWriter) {
        self.data_offsets.clear();
        for key in self.ids.keys() {
            self.data_offsets.push(writer.position());
            writer.write_uleb128(utf16_length(key.as_str()));
            writer.write_string(key.as_str());
            writer.write_u8(0);
        }
        debug!("[strings] wrote {} string data items", self.data_offsets.len());
    }

    pub fn write_ids(&mut self, writer: &mut DexWriter) -> Result<(), DexError> {
        if self.data_offsets.len() != self.ids.len() {
            fail!(ContractViolation, "string ids written before string data");
        }
        self.ids_offset = Some(writer.position());
        for offset in &self.data_offsets {
            writer.write_uint(*offset);
        }
        Ok(())
    }

    pub fn ids_section(&self) -> Option<SectionInfo> {
        self.ids_offset.map(|offset| SectionInfo { count: self.ids.len() as u32, offset })
    }

    pub fn data_section(&self) -> Option<SectionInfo> {
        self.data_offsets.first().map(|offset| SectionInfo { count: self.data_offsets.len() as u32, offset: *offset })
    }
}

impl Default for StringPool {
    fn default() -> Self {
        StringPool::new()
    }
}
