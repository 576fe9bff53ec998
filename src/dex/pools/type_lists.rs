use crate::dex::error::{DexError, ResultExt};
use crate::dex::map::SectionInfo;
use crate::dex::pools::strings::StringPool;
use crate::dex::pools::types::TypePool;
use crate::dex::pools::{Pool, StringKey};
use crate::dex::writer::DexWriter;

/// Parameter and interface lists. An empty list is never written and has offset 0.
#[derive(Debug)]
pub struct TypeListPool {
    lists: Pool<Vec<StringKey>>,
}

fn key_of(descriptors: &[String]) -> Vec<StringKey> {
    descriptors.iter().map(StringKey::from).collect()
}

impl TypeListPool {
    pub fn new() -> Self {
        TypeListPool { lists: Pool::new("type_list") }
    }

    pub fn intern(&mut self, descriptors: &[String], types: &mut TypePool, strings: &mut StringPool) {
        if descriptors.is_empty() {
            return;
        }
        if self.lists.intern(key_of(descriptors)) {
            for descriptor in descriptors {
                types.intern(descriptor, strings);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lists.len()
    }

    pub fn offset(&self, descriptors: &[String]) -> Result<u32, DexError> {
        if descriptors.is_empty() {
            return Ok(0);
        }
        self.lists.position(&key_of(descriptors))
    }

    /// `type_list`: aligned u32 size, then u16 type indices.
    pub fn write(&mut self, writer: &mut DexWriter, types: &TypePool) -> Result<(), DexError> {
        self.lists.write_each(writer, true, |writer, list| {
            writer.write_uint(list.len() as u32);
            for descriptor in list {
                let index = types.index(descriptor.as_str())?;
                writer.write_ushort(index as i64).context(|| format!("type list entry {}", descriptor))?;
            }
            Ok(())
        })
    }

    pub fn section(&self) -> Option<SectionInfo> {
        self.lists.section()
    }
}

impl Default for TypeListPool {
    fn default() -> Self {
        TypeListPool::new()
    }
}
