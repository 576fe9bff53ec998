use crate::dex::error::DexError;
use crate::dex::map::SectionInfo;
use crate::dex::pools::strings::StringPool;
use crate::dex::pools::type_lists::TypeListPool;
use crate::dex::pools::types::TypePool;
use crate::dex::pools::{Pool, StringKey};
use crate::dex::writer::DexWriter;

/// A method prototype. Sorts by return type, then by parameter list.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProtoKey {
    pub return_type: StringKey,
    pub parameters: Vec<StringKey>,
}

impl ProtoKey {
    pub fn new(return_type: &str, parameters: &[String]) -> Self {
        ProtoKey {
            return_type: StringKey::new(return_type),
            parameters: parameters.iter().map(StringKey::from).collect(),
        }
    }

    pub fn parameter_types(&self) -> Vec<String> {
        self.parameters.iter().map(|p| p.as_str().to_string()).collect()
    }

    /// Full method descriptor, e.g. `(ILjava/lang/String;)V`.
    pub fn descriptor(&self) -> String {
        let parameters: String = self.parameters.iter().map(|p| p.as_str()).collect();
        format!("({}){}", parameters, self.return_type)
    }

    /// Short-form descriptor: one character per type, `L` for any reference or array.
    pub fn shorty(&self) -> String {
        std::iter::once(&self.return_type)
            .chain(self.parameters.iter())
            .map(|t| shorty_char(t.as_str()))
            .collect()
    }
}

fn shorty_char(descriptor: &str) -> char {
    match descriptor.chars().next() {
        Some('L') | Some('[') => 'L',
        Some(c) => c,
        None => 'V',
    }
}

#[derive(Debug)]
pub struct ProtoPool {
    ids: Pool<ProtoKey>,
}

impl ProtoPool {
    pub fn new() -> Self {
        ProtoPool { ids: Pool::new("proto") }
    }

    pub fn intern(
        &mut self,
        return_type: &str,
        parameters: &[String],
        strings: &mut StringPool,
        types: &mut TypePool,
        type_lists: &mut TypeListPool,
    ) {
        let key = ProtoKey::new(return_type, parameters);
        let shorty = key.shorty();
        if self.ids.intern(key) {
            strings.intern(&shorty);
            types.intern(return_type, strings);
            type_lists.intern(parameters, types, strings);
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub(crate) fn assign_indices(&mut self) {
        self.ids.assign_indices();
    }

    pub fn index(&self, key: &ProtoKey) -> Result<u32, DexError> {
        self.ids.position(key)
    }

    /// `proto_id_item`: shorty string, return type, parameter list offset.
    pub fn write_ids(
        &mut self,
        writer: &mut DexWriter,
        strings: &StringPool,
        types: &TypePool,
        type_lists: &TypeListPool,
    ) -> Result<(), DexError> {
        self.ids.mark_offset(writer.position());
        for key in self.ids.keys() {
            writer.write_uint(strings.index(&key.shorty())?);
            writer.write_uint(types.index(key.return_type.as_str())?);
            writer.write_uint(type_lists.offset(&key.parameter_types())?);
        }
        Ok(())
    }

    pub fn section(&self) -> Option<SectionInfo> {
        self.ids.section()
    }
}

impl Default for ProtoPool {
    fn default() -> Self {
        ProtoPool::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shorty_collapses_references() {
        let key = ProtoKey::new("V", &["[I".to_string(), "Ljava/lang/String;".to_string(), "J".to_string()]);
        assert_eq!(key.shorty(), "VLLJ");
    }

    #[test]
    fn protos_sort_by_return_then_parameters() {
        let a = ProtoKey::new("I", &["J".to_string()]);
        let b = ProtoKey::new("V", &[]);
        let c = ProtoKey::new("V", &["I".to_string()]);
        let mut keys = vec![c.clone(), b.clone(), a.clone()];
        keys.sort();
        assert_eq!(keys, vec![a, b, c]);
    }
}
