use crate::dex::error::{DexError, ResultExt};
use crate::dex::map::SectionInfo;
use crate::dex::pools::strings::StringPool;
use crate::dex::pools::types::TypePool;
use crate::dex::pools::{Pool, StringKey};
use crate::dex::writer::DexWriter;
use crate::types::FieldReference;

/// Field identity: defining class, name, type, in that sort order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldKey {
    pub class: StringKey,
    pub name: StringKey,
    pub field_type: StringKey,
}

impl FieldKey {
    pub fn of(field: &FieldReference) -> Self {
        FieldKey {
            class: StringKey::new(&field.defining_class),
            name: StringKey::new(&field.name),
            field_type: StringKey::new(&field.field_type),
        }
    }
}

#[derive(Debug)]
pub struct FieldPool {
    ids: Pool<FieldKey>,
}

impl FieldPool {
    pub fn new() -> Self {
        FieldPool { ids: Pool::new("field") }
    }

    pub fn intern(&mut self, field: &FieldReference, strings: &mut StringPool, types: &mut TypePool) {
        if self.ids.intern(FieldKey::of(field)) {
            types.intern(&field.defining_class, strings);
            strings.intern(&field.name);
            types.intern(&field.field_type, strings);
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub(crate) fn assign_indices(&mut self) {
        self.ids.assign_indices();
    }

    pub fn index(&self, key: &FieldKey) -> Result<u32, DexError> {
        self.ids.position(key)
    }

    /// `field_id_item`: u16 class, u16 type, u32 name.
    pub fn write_ids(&mut self, writer: &mut DexWriter, strings: &StringPool, types: &TypePool) -> Result<(), DexError> {
        self.ids.mark_offset(writer.position());
        for key in self.ids.keys() {
            let context = || format!("field {}->{}:{}", key.class, key.name, key.field_type);
            writer.write_ushort(types.index(key.class.as_str())? as i64).context(context)?;
            writer.write_ushort(types.index(key.field_type.as_str())? as i64).context(context)?;
            writer.write_uint(strings.index(key.name.as_str())?);
        }
        Ok(())
    }

    pub fn section(&self) -> Option<SectionInfo> {
        self.ids.section()
    }
}

impl Default for FieldPool {
    fn default() -> Self {
        FieldPool::new()
    }
}
