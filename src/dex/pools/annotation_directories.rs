use std::collections::BTreeMap;

use log::trace;

use crate::dex::error::{DexError, ResultExt};
use crate::dex::map::SectionInfo;
use crate::dex::pools::annotation_set_refs::{parameter_sets, AnnotationSetRefPool};
use crate::dex::pools::annotation_sets::{set_key, AnnotationSetPool};
use crate::dex::pools::annotations::AnnotationPool;
use crate::dex::pools::{IndexPools, Pool, StringKey};
use crate::dex::writer::DexWriter;
use crate::types::{Annotation, ClassDef, FieldReference, MethodReference};

/// Everything annotated inside one class.
#[derive(Debug)]
struct DirectoryEntry {
    class_annotations: Vec<Annotation>,
    fields: Vec<(FieldReference, Vec<Annotation>)>,
    methods: Vec<(MethodReference, Vec<Annotation>)>,
    parameters: Vec<(MethodReference, Vec<Vec<Annotation>>)>,
}

impl DirectoryEntry {
    fn of(class: &ClassDef) -> Self {
        let fields = class
            .fields
            .iter()
            .filter(|f| !f.annotations.is_empty())
            .map(|f| (f.reference(&class.class_type), f.annotations.clone()))
            .collect();
        let methods = class
            .methods
            .iter()
            .filter(|m| !m.annotations.is_empty())
            .map(|m| (m.reference(&class.class_type), m.annotations.clone()))
            .collect();
        let parameters = class
            .methods
            .iter()
            .filter_map(|m| {
                parameter_sets(m).map(|sets| (m.reference(&class.class_type), sets.iter().map(|s| s.to_vec()).collect()))
            })
            .collect();
        DirectoryEntry { class_annotations: class.annotations.clone(), fields, methods, parameters }
    }

    fn is_empty(&self) -> bool {
        self.class_annotations.is_empty() && self.has_no_members()
    }

    fn has_no_members(&self) -> bool {
        self.fields.is_empty() && self.methods.is_empty() && self.parameters.is_empty()
    }
}

/// `annotations_directory_item`s.
///
/// A class whose only annotations are its own can share a directory with every other
/// class carrying the same set, so those are keyed by the set. Any class with member
/// annotations gets a directory of its own, keyed by the class type.
#[derive(Debug)]
pub struct AnnotationDirectoryPool {
    shared: Pool<Vec<Annotation>>,
    per_class: Pool<StringKey>,
    entries: BTreeMap<StringKey, DirectoryEntry>,
}

impl AnnotationDirectoryPool {
    pub fn new() -> Self {
        AnnotationDirectoryPool {
            shared: Pool::new("annotations_directory"),
            per_class: Pool::new("annotations_directory"),
            entries: BTreeMap::new(),
        }
    }

    pub fn intern(
        &mut self,
        class: &ClassDef,
        refs: &mut AnnotationSetRefPool,
        sets: &mut AnnotationSetPool,
        annotations: &mut AnnotationPool,
        pools: &mut IndexPools,
    ) -> Result<(), DexError> {
        let entry = DirectoryEntry::of(class);
        if entry.is_empty() {
            return Ok(());
        }

        sets.intern(&entry.class_annotations, annotations, pools)?;
        for (field, set) in &entry.fields {
            sets.intern(set, annotations, pools).context(|| format!("field {}", field))?;
        }
        for (method, set) in &entry.methods {
            sets.intern(set, annotations, pools).context(|| format!("method {}", method))?;
        }
        for method in class.methods.iter() {
            refs.intern(method, sets, annotations, pools)
                .context(|| format!("parameters of {}", method.reference(&class.class_type)))?;
        }

        if entry.has_no_members() {
            self.shared.intern(set_key(&entry.class_annotations)?);
        } else {
            let key = StringKey::new(&class.class_type);
            self.per_class.intern(key.clone());
            self.entries.insert(key, entry);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.shared.len() + self.per_class.len()
    }

    pub fn offset(&self, class: &ClassDef) -> Result<u32, DexError> {
        let key = StringKey::new(&class.class_type);
        if self.per_class.contains(&key) {
            return self.per_class.position(&key);
        }
        if class.annotations.is_empty() {
            return Ok(0);
        }
        self.shared.position(&set_key(&class.annotations)?)
    }

    /// Shared directories first, then per-class ones; each aligned to four bytes.
    pub fn write(
        &mut self,
        writer: &mut DexWriter,
        pools: &IndexPools,
        sets: &AnnotationSetPool,
        refs: &AnnotationSetRefPool,
    ) -> Result<(), DexError> {
        self.shared.write_each(writer, true, |writer, class_set| {
            writer.write_uint(sets.offset(class_set)?);
            writer.write_uint(0);
            writer.write_uint(0);
            writer.write_uint(0);
            Ok(())
        })?;

        let entries = &self.entries;
        self.per_class.write_each(writer, true, |writer, class_type| {
            let entry = match entries.get(class_type) {
                Some(e) => e,
                None => fail!(ContractViolation, "no annotations recorded for {}", class_type),
            };
            trace!("[annotations] directory for {} at 0x{:x}", class_type, writer.position());

            let mut fields = Vec::with_capacity(entry.fields.len());
            for (field, set) in &entry.fields {
                fields.push((pools.field_index(field)?, sets.offset(set)?));
            }
            let mut methods = Vec::with_capacity(entry.methods.len());
            for (method, set) in &entry.methods {
                methods.push((pools.method_index(method)?, sets.offset(set)?));
            }
            let mut parameters = Vec::with_capacity(entry.parameters.len());
            for (method, list) in &entry.parameters {
                let slices: Vec<&[Annotation]> = list.iter().map(|s| s.as_slice()).collect();
                parameters.push((pools.method_index(method)?, refs.offset_of_sets(&slices)?));
            }
            fields.sort();
            methods.sort();
            parameters.sort();

            writer.write_uint(sets.offset(&entry.class_annotations)?);
            writer.write_uint(fields.len() as u32);
            writer.write_uint(methods.len() as u32);
            writer.write_uint(parameters.len() as u32);
            for (index, offset) in fields.iter().chain(methods.iter()).chain(parameters.iter()) {
                writer.write_uint(*index);
                writer.write_uint(*offset);
            }
            Ok(())
        })
        .context(|| "annotations directory".to_string())
    }

    pub fn section(&self) -> Option<SectionInfo> {
        let offset = self.shared.section().or_else(|| self.per_class.section())?.offset;
        Some(SectionInfo { count: self.len() as u32, offset })
    }
}

impl Default for AnnotationDirectoryPool {
    fn default() -> Self {
        AnnotationDirectoryPool::new()
    }
}
