use crate::dex::error::DexError;
use crate::dex::map::SectionInfo;
use crate::dex::pools::strings::StringPool;
use crate::dex::pools::{Pool, StringKey};
use crate::dex::writer::DexWriter;

/// Type descriptors, sorted the same way as their strings.
#[derive(Debug)]
pub struct TypePool {
    ids: Pool<StringKey>,
}

impl TypePool {
    pub fn new() -> Self {
        TypePool { ids: Pool::new("type") }
    }

    pub fn intern(&mut self, descriptor: &str, strings: &mut StringPool) {
        if self.ids.intern(StringKey::new(descriptor)) {
            strings.intern(descriptor);
        }
    }

    pub fn intern_opt(&mut self, descriptor: Option<&str>, strings: &mut StringPool) {
        if let Some(descriptor) = descriptor {
            self.intern(descriptor, strings);
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

    pub fn index(&self, descriptor: &str) -> Result<u32, DexError> {
        self.ids.position(&StringKey::new(descriptor))
    }

    /// `type_id_item`: the descriptor's string index.
    pub fn write_ids(&mut self, writer: &mut DexWriter, strings: &StringPool) -> Result<(), DexError> {
        self.ids.mark_offset(writer.position());
        for key in self.ids.keys() {
            writer.write_uint(strings.index(key.as_str())?);
        }
        Ok(())
    }

    pub fn section(&self) -> Option<SectionInfo> {
        self.ids.section()
    }
}

impl Default for TypePool {
    fn default() -> Self {
        TypePool::new()
    }
}
