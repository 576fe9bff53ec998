//! Interning pools, one per section of the container.
//!
//! Every pool follows the same two-phase life: entries are interned while the model is
//! walked, then the pool is placed (an index assigned or an offset recorded) when its
//! section is written. Asking for a position before that, or for something that was
//! never interned, is a [`ContractViolation`](crate::dex::error::ErrorKind::ContractViolation).
//!
//! Pools never hold references to each other: whatever a pool needs from another one is
//! passed in, `&mut` while interning and `&` while writing.

pub mod strings;
pub mod types;
pub mod type_lists;
pub mod protos;
pub mod fields;
pub mod methods;
pub mod annotations;
pub mod annotation_sets;
pub mod annotation_set_refs;
pub mod annotation_directories;
pub mod encoded_arrays;
pub mod debug_infos;
pub(crate) mod code_layout;
pub mod code_items;
pub mod class_defs;

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use crate::dex::error::DexError;
use crate::dex::instructions::Reference;
use crate::dex::map::SectionInfo;
use crate::dex::writer::DexWriter;
use crate::dex::NO_INDEX;
use crate::types::{FieldReference, MethodReference};

use self::annotation_directories::AnnotationDirectoryPool;
use self::annotation_set_refs::AnnotationSetRefPool;
use self::annotation_sets::AnnotationSetPool;
use self::annotations::AnnotationPool;
use self::code_items::CodeItemPool;
use self::debug_infos::DebugInfoPool;
use self::encoded_arrays::EncodedArrayPool;
use self::fields::{FieldKey, FieldPool};
use self::methods::{MethodKey, MethodPool};
use self::protos::ProtoPool;
use self::strings::StringPool;
use self::type_lists::TypeListPool;
use self::types::TypePool;

/// A string that orders by its UTF-16 code units, which is how the string and type
/// sections must be sorted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StringKey(String);

impl StringKey {
    pub fn new(value: &str) -> Self {
        StringKey(value.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Ord for StringKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.encode_utf16().cmp(other.0.encode_utf16())
    }
}

impl PartialOrd for StringKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<&str> for StringKey {
    fn from(value: &str) -> Self {
        StringKey::new(value)
    }
}

impl From<&String> for StringKey {
    fn from(value: &String) -> Self {
        StringKey::new(value)
    }
}

impl fmt::Display for StringKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a method lives in the class arena: class slot, then method slot within the class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MethodSlot {
    pub class: usize,
    pub method: usize,
}

/// Sorted map from key to position, shared by all pools.
#[derive(Debug)]
pub(crate) struct Pool<K: Ord> {
    name: &'static str,
    entries: BTreeMap<K, Option<u32>>,
    placed: bool,
    offset: Option<u32>,
}

impl<K: Ord + fmt::Debug> Pool<K> {
    pub fn new(name: &'static str) -> Self {
        Pool { name, entries: BTreeMap::new(), placed: false, offset: None }
    }

    /// Returns true when the key was not yet present.
    pub fn intern(&mut self, key: K) -> bool {
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(key, None);
        true
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    /// Numbers entries by sort order; used by the index sections.
    pub fn assign_indices(&mut self) {
        for (i, slot) in self.entries.values_mut().enumerate() {
            *slot = Some(i as u32);
        }
        self.placed = true;
    }

    /// Writes entries in key order, recording the offset of each one. `align` pads to four
    /// bytes before every entry.
    pub fn write_each<F>(&mut self, writer: &mut DexWriter, align: bool, mut write: F) -> Result<(), DexError>
    where
        F: FnMut(&mut DexWriter, &K) -> Result<(), DexError>,
    {
        for (key, slot) in self.entries.iter_mut() {
            if align {
                writer.align();
            }
            let position = writer.position();
            if self.offset.is_none() {
                self.offset = Some(position);
            }
            *slot = Some(position);
            write(writer, key)?;
        }
        self.placed = true;
        Ok(())
    }

    pub fn mark_offset(&mut self, offset: u32) {
        if !self.entries.is_empty() {
            self.offset = Some(offset);
        }
    }

    pub fn position(&self, key: &K) -> Result<u32, DexError> {
        if !self.placed {
            fail!(ContractViolation, "{} pool queried for {:?} before it was written", self.name, key);
        }
        match self.entries.get(key) {
            Some(Some(position)) => Ok(*position),
            _ => Err(err!(ContractViolation, "{:?} was never interned in the {} pool", key, self.name)),
        }
    }

    pub fn section(&self) -> Option<SectionInfo> {
        self.offset.map(|offset| SectionInfo { count: self.entries.len() as u32, offset })
    }
}

/// The pools addressed by index from instructions, values and other items.
#[derive(Debug)]
pub struct IndexPools {
    pub strings: StringPool,
    pub types: TypePool,
    pub type_lists: TypeListPool,
    pub protos: ProtoPool,
    pub fields: FieldPool,
    pub methods: MethodPool,
}

impl Default for IndexPools {
    fn default() -> Self {
        IndexPools {
            strings: StringPool::new(),
            types: TypePool::new(),
            type_lists: TypeListPool::new(),
            protos: ProtoPool::new(),
            fields: FieldPool::new(),
            methods: MethodPool::new(),
        }
    }
}

impl IndexPools {
    pub fn intern_string(&mut self, value: &str) {
        self.strings.intern(value);
    }

    pub fn intern_type(&mut self, descriptor: &str) {
        self.types.intern(descriptor, &mut self.strings);
    }

    pub fn intern_type_list(&mut self, descriptors: &[String]) {
        self.type_lists.intern(descriptors, &mut self.types, &mut self.strings);
    }

    pub fn intern_field(&mut self, field: &FieldReference) {
        self.fields.intern(field, &mut self.strings, &mut self.types);
    }

    pub fn intern_method(&mut self, method: &MethodReference) {
        self.methods.intern(method, &mut self.strings, &mut self.types, &mut self.type_lists, &mut self.protos);
    }

    pub fn intern_reference(&mut self, reference: &Reference) {
        match reference {
            Reference::String(s) => self.intern_string(s),
            Reference::Type(t) => self.intern_type(t),
            Reference::Field(f) => self.intern_field(f),
            Reference::Method(m) => self.intern_method(m),
        }
    }

    /// Fixes the index of every entry. Nothing may be interned afterwards.
    pub fn assign_indices(&mut self) {
        self.strings.assign_indices();
        self.types.assign_indices();
        self.protos.assign_indices();
        self.fields.assign_indices();
        self.methods.assign_indices();
    }

    pub fn string_index(&self, value: &str) -> Result<u32, DexError> {
        self.strings.index(value)
    }

    /// Index of an optional string, or [`NO_INDEX`] when absent.
    pub fn string_index_or_none(&self, value: Option<&str>) -> Result<u32, DexError> {
        value.map_or(Ok(NO_INDEX), |v| self.strings.index(v))
    }

    pub fn type_index(&self, descriptor: &str) -> Result<u32, DexError> {
        self.types.index(descriptor)
    }

    pub fn type_index_or_none(&self, descriptor: Option<&str>) -> Result<u32, DexError> {
        descriptor.map_or(Ok(NO_INDEX), |t| self.types.index(t))
    }

    pub fn field_index(&self, field: &FieldReference) -> Result<u32, DexError> {
        self.fields.index(&FieldKey::of(field))
    }

    pub fn method_index(&self, method: &MethodReference) -> Result<u32, DexError> {
        self.methods.index(&MethodKey::of(method))
    }

    pub fn reference_index(&self, reference: &Reference) -> Result<u32, DexError> {
        match reference {
            Reference::String(s) => self.string_index(s),
            Reference::Type(t) => self.type_index(t),
            Reference::Field(f) => self.field_index(f),
            Reference::Method(m) => self.method_index(m),
        }
    }
}

/// The pools of the data section, reached from other items by offset.
#[derive(Debug, Default)]
pub struct DataPools {
    pub encoded_arrays: EncodedArrayPool,
    pub annotations: AnnotationPool,
    pub annotation_sets: AnnotationSetPool,
    pub annotation_set_refs: AnnotationSetRefPool,
    pub annotation_directories: AnnotationDirectoryPool,
    pub debug_infos: DebugInfoPool,
    pub code_items: CodeItemPool,
}
