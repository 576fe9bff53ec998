use crate::dex::error::DexError;
use crate::dex::map::SectionInfo;
use crate::dex::pools::annotation_sets::{set_key, AnnotationSetPool};
use crate::dex::pools::annotations::AnnotationPool;
use crate::dex::pools::{IndexPools, Pool};
use crate::dex::writer::DexWriter;
use crate::types::{Annotation, Method};

/// Per-parameter annotation sets of a method, as an `annotation_set_ref_list`.
#[derive(Debug)]
pub struct AnnotationSetRefPool {
    lists: Pool<Vec<Vec<Annotation>>>,
}

/// One set per parameter, cut after the last parameter that has annotations.
/// `None` when no parameter is annotated.
pub(crate) fn parameter_sets(method: &Method) -> Option<Vec<&[Annotation]>> {
    let last = method.parameters.iter().rposition(|p| !p.annotations.is_empty())?;
    Some(method.parameters[..=last].iter().map(|p| p.annotations.as_slice()).collect())
}

fn list_key(sets: &[&[Annotation]]) -> Result<Vec<Vec<Annotation>>, DexError> {
    sets.iter().map(|s| set_key(s)).collect()
}

impl AnnotationSetRefPool {
    pub fn new() -> Self {
        AnnotationSetRefPool { lists: Pool::new("annotation_set_ref_list") }
    }

    pub fn intern(
        &mut self,
        method: &Method,
        sets: &mut AnnotationSetPool,
        annotations: &mut AnnotationPool,
        pools: &mut IndexPools,
    ) -> Result<(), DexError> {
        let Some(parameter_sets) = parameter_sets(method) else {
            return Ok(());
        };
        for set in &parameter_sets {
            sets.intern(set, annotations, pools)?;
        }
        self.lists.intern(list_key(&parameter_sets)?);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.lists.len()
    }

    pub fn offset(&self, method: &Method) -> Result<u32, DexError> {
        match parameter_sets(method) {
            Some(parameter_sets) => self.offset_of_sets(&parameter_sets),
            None => Ok(0),
        }
    }

    pub(crate) fn offset_of_sets(&self, parameter_sets: &[&[Annotation]]) -> Result<u32, DexError> {
        self.lists.position(&list_key(parameter_sets)?)
    }

    /// Aligned u32 count, then the set offset of each parameter (0 for an empty set).
    pub fn write(&mut self, writer: &mut DexWriter, sets: &AnnotationSetPool) -> Result<(), DexError> {
        self.lists.write_each(writer, true, |writer, list| {
            writer.write_uint(list.len() as u32);
            for set in list {
                writer.write_uint(sets.offset(set)?);
            }
            Ok(())
        })
    }

    pub fn section(&self) -> Option<SectionInfo> {
        self.lists.section()
    }
}

impl Default for AnnotationSetRefPool {
    fn default() -> Self {
        AnnotationSetRefPool::new()
    }
}
