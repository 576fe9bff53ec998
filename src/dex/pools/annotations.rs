use std::collections::BTreeSet;

use crate::dex::encoded_values::{intern_annotation_body, write_annotation_body};
use crate::dex::error::{DexError, ResultExt};
use crate::dex::map::SectionInfo;
use crate::dex::pools::{IndexPools, Pool, StringKey};
use crate::dex::writer::DexWriter;
use crate::types::Annotation;

/// `annotation_item`s, deduplicated by value. Element order does not matter for identity.
#[derive(Debug)]
pub struct AnnotationPool {
    items: Pool<Annotation>,
}

/// The canonical form of an annotation: elements sorted by name.
pub(crate) fn normalize(annotation: &Annotation) -> Annotation {
    let mut normalized = annotation.clone();
    normalized.elements.sort_by(|a, b| StringKey::new(&a.name).cmp(&StringKey::new(&b.name)));
    normalized
}

impl AnnotationPool {
    pub fn new() -> Self {
        AnnotationPool { items: Pool::new("annotation") }
    }

    pub fn intern(&mut self, annotation: &Annotation, pools: &mut IndexPools) -> Result<(), DexError> {
        let mut names = BTreeSet::new();
        for element in &annotation.elements {
            if !names.insert(element.name.as_str()) {
                fail!(
                    InvalidModel,
                    "annotation {} has more than one element named {}",
                    annotation.annotation_type,
                    element.name
                );
            }
        }
        if self.items.intern(normalize(annotation)) {
            intern_annotation_body(&annotation.annotation_type, &annotation.elements, pools);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn offset(&self, annotation: &Annotation) -> Result<u32, DexError> {
        self.items.position(&normalize(annotation))
    }

    /// Visibility byte followed by the encoded annotation. Unaligned.
    pub fn write(&mut self, writer: &mut DexWriter, pools: &IndexPools) -> Result<(), DexError> {
        self.items.write_each(writer, false, |writer, annotation| {
            writer.write_u8(annotation.visibility as u8);
            write_annotation_body(writer, &annotation.annotation_type, &annotation.elements, pools)
                .context(|| format!("annotation {}", annotation.annotation_type))
        })
    }

    pub fn section(&self) -> Option<SectionInfo> {
        self.items.section()
    }
}

impl Default for AnnotationPool {
    fn default() -> Self {
        AnnotationPool::new()
    }
}
