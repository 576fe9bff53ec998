use crate::dex::error::{DexError, ResultExt};
use crate::dex::map::SectionInfo;
use crate::dex::pools::protos::{ProtoKey, ProtoPool};
use crate::dex::pools::strings::StringPool;
use crate::dex::pools::type_lists::TypeListPool;
use crate::dex::pools::types::TypePool;
use crate::dex::pools::{Pool, StringKey};
use crate::dex::writer::DexWriter;
use crate::types::MethodReference;

/// Method identity: defining class, name, prototype, in that sort order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MethodKey {
    pub class: StringKey,
    pub name: StringKey,
    pub proto: ProtoKey,
}

impl MethodKey {
    pub fn of(method: &MethodReference) -> Self {
        MethodKey {
            class: StringKey::new(&method.defining_class),
            name: StringKey::new(&method.name),
            proto: ProtoKey::new(&method.return_type, &method.parameters),
        }
    }
}

#[derive(Debug)]
pub struct MethodPool {
    ids: Pool<MethodKey>,
}

impl MethodPool {
    pub fn new() -> Self {
        MethodPool { ids: Pool::new("method") }
    }

    pub fn intern(
        &mut self,
        method: &MethodReference,
        strings: &mut StringPool,
        types: &mut TypePool,
        type_lists: &mut TypeListPool,
        protos: &mut ProtoPool,
    ) {
        if self.ids.intern(MethodKey::of(method)) {
            types.intern(&method.defining_class, strings);
            strings.intern(&method.name);
            protos.intern(&method.return_type, &method.parameters, strings, types, type_lists);
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub(crate) fn assign_indices(&mut self) {
        self.ids.assign_indices();
    }

    pub fn index(&self, key: &MethodKey) -> Result<u32, DexError> {
        self.ids.position(key)
    }

    /// `method_id_item`: u16 class, u16 proto, u32 name.
    pub fn write_ids(
        &mut self,
        writer: &mut DexWriter,
        strings: &StringPool,
        types: &TypePool,
        protos: &ProtoPool,
    ) -> Result<(), DexError> {
        self.ids.mark_offset(writer.position());
        for key in self.ids.keys() {
            let context = || format!("method {}->{}", key.class, key.name);
            writer.write_ushort(types.index(key.class.as_str())? as i64).context(context)?;
            writer.write_ushort(protos.index(&key.proto)? as i64).context(context)?;
            writer.write_uint(strings.index(key.name.as_str())?);
        }
        Ok(())
    }

    pub fn section(&self) -> Option<SectionInfo> {
        self.ids.section()
    }
}

impl Default for MethodPool {
    fn default() -> Self {
        MethodPool::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::pools::IndexPools;

    #[test]
    fn method_interning_pulls_in_its_prototype() {
        let mut pools = IndexPools::default();
        let m = MethodReference::new("Ljava/io/PrintStream;", "println", &["Ljava/lang/String;"], "V");
        pools.intern_method(&m);
        pools.intern_method(&m);
        pools.assign_indices();

        assert_eq!(pools.methods.len(), 1);
        assert_eq!(pools.protos.len(), 1);
        assert_eq!(pools.type_lists.len(), 1);
        // class, parameter, return type
        assert_eq!(pools.types.len(), 3);
        assert!(pools.string_index("VL").is_ok());
        assert!(pools.string_index("println").is_ok());
        assert_eq!(pools.method_index(&m).unwrap(), 0);
    }

    #[test]
    fn overloads_order_by_prototype() {
        let mut pools = IndexPools::default();
        let long = MethodReference::new("LA;", "f", &["J"], "V");
        let int = MethodReference::new("LA;", "f", &["I"], "V");
        let ret = MethodReference::new("LA;", "f", &[], "I");
        pools.intern_method(&long);
        pools.intern_method(&int);
        pools.intern_method(&ret);
        pools.assign_indices();
        assert_eq!(pools.method_index(&ret).unwrap(), 0);
        assert_eq!(pools.method_index(&int).unwrap(), 1);
        assert_eq!(pools.method_index(&long).unwrap(), 2);
    }
}
