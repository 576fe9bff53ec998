use crate::dex::error::DexError;
use crate::dex::map::SectionInfo;
use crate::dex::pools::annotations::{normalize, AnnotationPool};
use crate::dex::pools::{IndexPools, Pool, StringKey};
use crate::dex::writer::DexWriter;
use crate::types::Annotation;

/// `annotation_set_item`s. A set holds at most one annotation per type and is stored
/// sorted by type; the empty set is never written and has offset 0.
#[derive(Debug)]
pub struct AnnotationSetPool {
    sets: Pool<Vec<Annotation>>,
}

/// Sorted, normalized copy of a set, or an error when two annotations share a type.
pub(crate) fn set_key(annotations: &[Annotation]) -> Result<Vec<Annotation>, DexError> {
    let mut key: Vec<Annotation> = annotations.iter().map(normalize).collect();
    key.sort_by(|a, b| StringKey::new(&a.annotation_type).cmp(&StringKey::new(&b.annotation_type)));
    for pair in key.windows(2) {
        if pair[0].annotation_type == pair[1].annotation_type {
            fail!(InvalidModel, "annotation {} appears twice in one set", pair[0].annotation_type);
        }
    }
    Ok(key)
}

impl AnnotationSetPool {
    pub fn new() -> Self {
        AnnotationSetPool { sets: Pool::new("annotation_set") }
    }

    pub fn intern(
        &mut self,
        annotations: &[Annotation],
        annotation_pool: &mut AnnotationPool,
        pools: &mut IndexPools,
    ) -> Result<(), DexError> {
        if annotations.is_empty() {
            return Ok(());
        }
        let key = set_key(annotations)?;
        for annotation in annotations {
            annotation_pool.intern(annotation, pools)?;
        }
        self.sets.intern(key);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn offset(&self, annotations: &[Annotation]) -> Result<u32, DexError> {
        if annotations.is_empty() {
            return Ok(0);
        }
        self.sets.position(&set_key(annotations)?)
    }

    /// Aligned u32 size, then one annotation offset per entry.
    pub fn write(&mut self, writer: &mut DexWriter, annotation_pool: &AnnotationPool) -> Result<(), DexError> {
        self.sets.write_each(writer, true, |writer, set| {
            writer.write_uint(set.len() as u32);
            for annotation in set {
                writer.write_uint(annotation_pool.offset(annotation)?);
            }
            Ok(())
        })
    }

    pub fn section(&self) -> Option<SectionInfo> {
        self.sets.section()
    }
}

impl Default for AnnotationSetPool {
    fn default() -> Self {
        AnnotationSetPool::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::error::ErrorKind;
    use crate::types::AnnotationVisibility;

    #[test]
    fn sets_sort_by_type_and_reject_duplicates() {
        let b = Annotation::new(AnnotationVisibility::Runtime, "LB;");
        let a = Annotation::new(AnnotationVisibility::Build, "LA;");
        let key = set_key(&[b.clone(), a.clone()]).unwrap();
        assert_eq!(key[0].annotation_type, "LA;");

        let dup = Annotation::new(AnnotationVisibility::Runtime, "LA;");
        assert_eq!(set_key(&[a, dup]).unwrap_err().kind(), ErrorKind::InvalidModel);
    }

    #[test]
    fn empty_sets_have_offset_zero() {
        let mut pools = IndexPools::default();
        let mut annotations = AnnotationPool::new();
        let mut sets = AnnotationSetPool::new();
        sets.intern(&[], &mut annotations, &mut pools).unwrap();
        assert_eq!(sets.len(), 0);
        assert_eq!(sets.offset(&[]).unwrap(), 0);
    }

    #[test]
    fn set_order_does_not_split_items() {
        let mut pools = IndexPools::default();
        let mut annotations = AnnotationPool::new();
        let mut sets = AnnotationSetPool::new();
        let a = Annotation::new(AnnotationVisibility::Runtime, "LA;");
        let b = Annotation::new(AnnotationVisibility::Runtime, "LB;");
        sets.intern(&[a.clone(), b.clone()], &mut annotations, &mut pools).unwrap();
        sets.intern(&[b.clone(), a.clone()], &mut annotations, &mut pools).unwrap();
        assert_eq!(sets.len(), 1);

        pools.assign_indices();
        let mut writer = DexWriter::new(0x300);
        annotations.write(&mut writer, &pools).unwrap();
        sets.write(&mut writer, &annotations).unwrap();
        let offset = sets.offset(&[b, a]).unwrap();
        assert_eq!(offset % 4, 0);
    }
}
