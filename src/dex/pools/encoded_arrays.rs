use std::cmp::Ordering;

use crate::dex::encoded_values::{intern_value, write_array};
use crate::dex::error::{DexError, ResultExt};
use crate::dex::map::SectionInfo;
use crate::dex::pools::fields::FieldKey;
use crate::dex::pools::{IndexPools, Pool};
use crate::dex::writer::DexWriter;
use crate::types::{ClassDef, EncodedValue};

/// Static initializer list of one class. Shorter arrays sort first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayKey(Vec<EncodedValue>);

impl Ord for ArrayKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.len().cmp(&other.0.len()).then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for ArrayKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The `static_values` array of a class: one value per static field in field order,
/// stopping at the last field whose initializer differs from its type's default.
/// Earlier fields without an initializer get the default. `None` when nothing needs writing.
pub fn static_values_for(class: &ClassDef) -> Option<Vec<EncodedValue>> {
    let mut statics: Vec<_> = class.fields.iter().filter(|f| f.is_static()).collect();
    statics.sort_by_key(|f| FieldKey::of(&f.reference(&class.class_type)));

    let last = statics.iter().rposition(|f| match &f.initial_value {
        Some(value) => !value.is_default_for(&f.field_type),
        None => false,
    })?;
    Some(
        statics[..=last]
            .iter()
            .map(|f| f.initial_value.clone().unwrap_or_else(|| EncodedValue::default_for(&f.field_type)))
            .collect(),
    )
}

/// `encoded_array_item`s, shared between classes with identical initializers.
#[derive(Debug)]
pub struct EncodedArrayPool {
    arrays: Pool<ArrayKey>,
}

impl EncodedArrayPool {
    pub fn new() -> Self {
        EncodedArrayPool { arrays: Pool::new("encoded_array") }
    }

    pub fn intern(&mut self, class: &ClassDef, pools: &mut IndexPools) {
        if let Some(values) = static_values_for(class) {
            for value in &values {
                intern_value(value, pools);
            }
            self.arrays.intern(ArrayKey(values));
        }
    }

    pub fn len(&self) -> usize {
        self.arrays.len()
    }

    pub fn offset(&self, class: &ClassDef) -> Result<u32, DexError> {
        match static_values_for(class) {
            Some(values) => self.arrays.position(&ArrayKey(values)),
            None => Ok(0),
        }
    }

    pub fn write(&mut self, writer: &mut DexWriter, pools: &IndexPools) -> Result<(), DexError> {
        self.arrays.write_each(writer, false, |writer, key| {
            write_array(writer, &key.0, pools).context(|| "static values".to_string())
        })
    }

    pub fn section(&self) -> Option<SectionInfo> {
        self.arrays.section()
    }
}

impl Default for EncodedArrayPool {
    fn default() -> Self {
        EncodedArrayPool::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccessFlags, Field};

    fn static_field(name: &str, field_type: &str, value: Option<EncodedValue>) -> Field {
        let mut f = Field::new(name, field_type, AccessFlags::STATIC);
        f.initial_value = value;
        f
    }

    #[test]
    fn trailing_defaults_are_trimmed() {
        let mut class = ClassDef::new("LA;", AccessFlags::PUBLIC, Some("Ljava/lang/Object;"));
        class.fields.push(static_field("a", "I", None));
        class.fields.push(static_field("b", "I", Some(EncodedValue::Int(5))));
        class.fields.push(static_field("c", "I", Some(EncodedValue::Int(0))));
        class.fields.push(Field::new("d", "I", AccessFlags::PRIVATE));

        let values = static_values_for(&class).unwrap();
        assert_eq!(values, vec![EncodedValue::Int(0), EncodedValue::Int(5)]);
    }

    #[test]
    fn only_defaults_means_no_array() {
        let mut class = ClassDef::new("LA;", AccessFlags::PUBLIC, Some("Ljava/lang/Object;"));
        class.fields.push(static_field("a", "Ljava/lang/String;", Some(EncodedValue::Null)));
        class.fields.push(static_field("b", "Z", Some(EncodedValue::Boolean(false))));
        assert!(static_values_for(&class).is_none());
    }

    #[test]
    fn fields_follow_field_order_not_declaration_order() {
        let mut class = ClassDef::new("LA;", AccessFlags::PUBLIC, Some("Ljava/lang/Object;"));
        class.fields.push(static_field("z", "J", Some(EncodedValue::Long(1))));
        class.fields.push(static_field("a", "Ljava/lang/String;", Some(EncodedValue::String("s".to_string()))));
        let values = static_values_for(&class).unwrap();
        assert_eq!(values[0], EncodedValue::String("s".to_string()));
        assert_eq!(values[1], EncodedValue::Long(1));
    }

    #[test]
    fn identical_initializers_share_an_item() {
        let mut a = ClassDef::new("LA;", AccessFlags::PUBLIC, Some("Ljava/lang/Object;"));
        a.fields.push(static_field("x", "I", Some(EncodedValue::Int(7))));
        let mut b = a.clone();
        b.class_type = "LB;".to_string();

        let mut pools = IndexPools::default();
        let mut arrays = EncodedArrayPool::new();
        arrays.intern(&a, &mut pools);
        arrays.intern(&b, &mut pools);
        assert_eq!(arrays.len(), 1);

        pools.assign_indices();
        let mut writer = DexWriter::new(0x100);
        arrays.write(&mut writer, &pools).unwrap();
        assert_eq!(arrays.offset(&a).unwrap(), arrays.offset(&b).unwrap());
        // count 1, VALUE_INT with one byte, 7
        assert_eq!(writer.bytes(), &[1, 0x04, 7]);
    }
}
