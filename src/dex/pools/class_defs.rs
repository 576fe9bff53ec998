use std::collections::{BTreeMap, BTreeSet};

use log::{debug, trace};

use crate::dex::error::{DexError, ResultExt};
use crate::dex::map::SectionInfo;
use crate::dex::pools::code_items::CodeItemPool;
use crate::dex::pools::methods::MethodKey;
use crate::dex::pools::protos::ProtoKey;
use crate::dex::pools::{DataPools, IndexPools, MethodSlot, StringKey};
use crate::dex::writer::DexWriter;
use crate::types::ClassDef;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    Pending,
    InProgress,
    Written,
}

/// Every class of the container, kept in an arena in interning order.
///
/// Classes are written so that a superclass or interface defined in the same container
/// always comes before the classes extending it.
#[derive(Debug, Default)]
pub struct ClassDefPool {
    classes: Vec<ClassDef>,
    by_type: BTreeMap<StringKey, usize>,
    order: Vec<usize>,
    class_data_offsets: Vec<u32>,
    ids_offset: Option<u32>,
    class_data: Option<SectionInfo>,
}

impl ClassDefPool {
    pub fn new() -> Self {
        ClassDefPool::default()
    }

    /// Checks the class for duplicates, then interns it and everything it mentions.
    pub fn intern(&mut self, class: &ClassDef, pools: &mut IndexPools, data: &mut DataPools) -> Result<(), DexError> {
        let key = StringKey::new(&class.class_type);
        if self.by_type.contains_key(&key) {
            fail!(InvalidModel, "class {} is defined more than once", class.class_type);
        }
        check_members(class)?;

        let class_slot = self.classes.len();
        pools.intern_type(&class.class_type);
        pools.types.intern_opt(class.superclass.as_deref(), &mut pools.strings);
        pools.intern_type_list(&class.interfaces);
        pools.strings.intern_opt(class.source_file.as_deref());

        for field in &class.fields {
            pools.intern_field(&field.reference(&class.class_type));
        }
        for (method_slot, method) in class.methods.iter().enumerate() {
            let reference = method.reference(&class.class_type);
            pools.intern_method(&reference);
            let key = MethodKey::of(&reference);
            let slot = MethodSlot { class: class_slot, method: method_slot };
            data.debug_infos.intern(key.clone(), slot, method, pools);
            data.code_items.intern(key, slot, method, pools).context(|| format!("method {}", reference))?;
        }
        data.encoded_arrays.intern(class, pools);
        data.annotation_directories.intern(
            class,
            &mut data.annotation_set_refs,
            &mut data.annotation_sets,
            &mut data.annotations,
            pools,
        )?;

        trace!("[classdef] interned {} as slot {}", class.class_type, class_slot);
        self.classes.push(class.clone());
        self.by_type.insert(key, class_slot);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn classes(&self) -> &[ClassDef] {
        &self.classes
    }

    /// Class types in the order their rows are written.
    pub fn placement_order(&self) -> Vec<&str> {
        self.order.iter().map(|i| self.classes[*i].class_type.as_str()).collect()
    }

    /// Fixes the write order: classes by type, each preceded by its in-container supertypes.
    pub fn place(&mut self) -> Result<(), DexError> {
        let mut states = vec![Placement::Pending; self.classes.len()];
        let mut order = Vec::with_capacity(self.classes.len());
        for index in self.by_type.values() {
            self.visit(*index, &mut states, &mut order)?;
        }
        self.order = order;
        Ok(())
    }

    fn visit(&self, index: usize, states: &mut [Placement], order: &mut Vec<usize>) -> Result<(), DexError> {
        match states[index] {
            Placement::Written => return Ok(()),
            Placement::InProgress => fail!(InvalidModel, "class {} is its own supertype", self.classes[index].class_type),
            Placement::Pending => {}
        }
        states[index] = Placement::InProgress;
        let class = &self.classes[index];
        for supertype in class.superclass.iter().chain(class.interfaces.iter()) {
            if let Some(parent) = self.by_type.get(&StringKey::new(supertype)) {
                self.visit(*parent, states, order).context(|| format!("supertype of {}", class.class_type))?;
            }
        }
        states[index] = Placement::Written;
        order.push(index);
        Ok(())
    }

    fn check_placed(&self) -> Result<(), DexError> {
        if self.order.len() != self.classes.len() {
            fail!(ContractViolation, "class defs written before they were placed");
        }
        Ok(())
    }

    /// `class_data_item`s in placement order. Classes without members get none.
    pub fn write_class_data(
        &mut self,
        writer: &mut DexWriter,
        pools: &IndexPools,
        code_items: &CodeItemPool,
    ) -> Result<(), DexError> {
        self.check_placed()?;
        self.class_data_offsets = vec![0; self.classes.len()];
        let mut count = 0;
        let mut first = None;
        for index in &self.order {
            let class = &self.classes[*index];
            if class.fields.is_empty() && class.methods.is_empty() {
                continue;
            }
            let offset = writer.position();
            first.get_or_insert(offset);
            count += 1;
            self.class_data_offsets[*index] = offset;
            write_class_data_item(writer, class, pools, code_items).context(|| format!("class data of {}", class.class_type))?;
        }
        self.class_data = first.map(|offset| SectionInfo { count, offset });
        debug!("[classdef] {} class data items", count);
        Ok(())
    }

    /// `class_def_item` rows in placement order.
    pub fn write_ids(&mut self, writer: &mut DexWriter, pools: &IndexPools, data: &DataPools) -> Result<(), DexError> {
        self.check_placed()?;
        if self.class_data_offsets.len() != self.classes.len() {
            fail!(ContractViolation, "class defs written before class data");
        }
        self.ids_offset = Some(writer.position());
        for index in &self.order {
            let class = &self.classes[*index];
            write_class_def_row(writer, class, pools, data, self.class_data_offsets[*index])
                .context(|| format!("class {}", class.class_type))?;
        }
        Ok(())
    }

    pub fn ids_section(&self) -> Option<SectionInfo> {
        self.ids_offset.map(|offset| SectionInfo { count: self.classes.len() as u32, offset })
    }

    pub fn class_data_section(&self) -> Option<SectionInfo> {
        self.class_data
    }
}

fn write_class_def_row(
    writer: &mut DexWriter,
    class: &ClassDef,
    pools: &IndexPools,
    data: &DataPools,
    class_data_off: u32,
) -> Result<(), DexError> {
    writer.write_uint(pools.type_index(&class.class_type)?);
    writer.write_uint(class.access_flags.bits());
    writer.write_uint(pools.type_index_or_none(class.superclass.as_deref())?);
    writer.write_uint(pools.type_lists.offset(&class.interfaces)?);
    writer.write_uint(pools.string_index_or_none(class.source_file.as_deref())?);
    writer.write_uint(data.annotation_directories.offset(class)?);
    writer.write_uint(class_data_off);
    writer.write_uint(data.encoded_arrays.offset(class)?);
    Ok(())
}

fn check_members(class: &ClassDef) -> Result<(), DexError> {
    let mut fields = BTreeSet::new();
    for field in &class.fields {
        if !fields.insert((field.name.as_str(), field.field_type.as_str())) {
            fail!(InvalidModel, "field {}:{} is defined twice in {}", field.name, field.field_type, class.class_type);
        }
    }
    let mut methods = BTreeSet::new();
    for method in &class.methods {
        let proto = ProtoKey::new(&method.return_type, &method.parameter_types());
        if !methods.insert((method.name.as_str(), proto.clone())) {
            fail!(InvalidModel, "method {}{} is defined twice in {}", method.name, proto.descriptor(), class.class_type);
        }
    }
    Ok(())
}

// Four uleb counts, then each member list sorted by index with the index delta-encoded.
fn write_class_data_item(
    writer: &mut DexWriter,
    class: &ClassDef,
    pools: &IndexPools,
    code_items: &CodeItemPool,
) -> Result<(), DexError> {
    let mut static_fields = vec![];
    let mut instance_fields = vec![];
    for field in &class.fields {
        let entry = (pools.field_index(&field.reference(&class.class_type))?, field.access_flags.bits());
        if field.is_static() {
            static_fields.push(entry);
        } else {
            instance_fields.push(entry);
        }
    }

    let mut direct_methods = vec![];
    let mut virtual_methods = vec![];
    for method in &class.methods {
        let reference = method.reference(&class.class_type);
        let entry = (
            pools.method_index(&reference)?,
            method.access_flags.bits(),
            code_items.offset(&MethodKey::of(&reference))?,
        );
        if method.is_direct() {
            direct_methods.push(entry);
        } else {
            virtual_methods.push(entry);
        }
    }

    static_fields.sort();
    instance_fields.sort();
    direct_methods.sort();
    virtual_methods.sort();

    writer.write_uleb128(static_fields.len() as u32);
    writer.write_uleb128(instance_fields.len() as u32);
    writer.write_uleb128(direct_methods.len() as u32);
    writer.write_uleb128(virtual_methods.len() as u32);

    for fields in [&static_fields, &instance_fields] {
        let mut previous = 0;
        for (index, flags) in fields {
            writer.write_uleb128(index - previous);
            writer.write_uleb128(*flags);
            previous = *index;
        }
    }
    for methods in [&direct_methods, &virtual_methods] {
        let mut previous = 0;
        for (index, flags, code_off) in methods {
            writer.write_uleb128(index - previous);
            writer.write_uleb128(*flags);
            writer.write_uleb128(*code_off);
            previous = *index;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::error::ErrorKind;
    use crate::types::{AccessFlags, Field, Method};

    fn class(name: &str, superclass: &str) -> ClassDef {
        ClassDef::new(name, AccessFlags::PUBLIC, Some(superclass))
    }

    fn intern_all(classes: &[ClassDef]) -> Result<(ClassDefPool, IndexPools, DataPools), DexError> {
        let mut pool = ClassDefPool::new();
        let mut pools = IndexPools::default();
        let mut data = DataPools::default();
        for c in classes {
            pool.intern(c, &mut pools, &mut data)?;
        }
        Ok((pool, pools, data))
    }

    #[test]
    fn supertypes_are_placed_first() {
        let mut c = class("LA;", "LC;");
        c.interfaces.push("LI;".to_string());
        let b = class("LC;", "LB;");
        let i = ClassDef::new("LI;", AccessFlags::INTERFACE | AccessFlags::ABSTRACT, Some("Ljava/lang/Object;"));
        let base = class("LB;", "Ljava/lang/Object;");

        let (mut pool, _, _) = intern_all(&[c, b, i, base]).unwrap();
        pool.place().unwrap();
        assert_eq!(pool.placement_order(), vec!["LB;", "LC;", "LI;", "LA;"]);
    }

    #[test]
    fn cycles_are_rejected() {
        let (mut pool, _, _) = intern_all(&[class("LA;", "LB;"), class("LB;", "LA;")]).unwrap();
        assert_eq!(pool.place().unwrap_err().kind(), ErrorKind::InvalidModel);
    }

    #[test]
    fn duplicates_are_rejected() {
        let a = class("LA;", "Ljava/lang/Object;");
        assert_eq!(intern_all(&[a.clone(), a.clone()]).unwrap_err().kind(), ErrorKind::InvalidModel);

        let mut fields = a.clone();
        fields.fields.push(Field::new("x", "I", AccessFlags::PRIVATE));
        fields.fields.push(Field::new("x", "I", AccessFlags::STATIC));
        assert_eq!(intern_all(&[fields]).unwrap_err().kind(), ErrorKind::InvalidModel);

        // same name, different type is fine
        let mut overloads = a.clone();
        overloads.fields.push(Field::new("x", "I", AccessFlags::PRIVATE));
        overloads.fields.push(Field::new("x", "J", AccessFlags::PRIVATE));
        overloads.methods.push(Method::new("m", &["I"], "V", AccessFlags::ABSTRACT));
        overloads.methods.push(Method::new("m", &["J"], "V", AccessFlags::ABSTRACT));
        assert!(intern_all(&[overloads.clone()]).is_ok());

        overloads.methods.push(Method::new("m", &["I"], "V", AccessFlags::PUBLIC));
        assert_eq!(intern_all(&[overloads]).unwrap_err().kind(), ErrorKind::InvalidModel);
    }

    #[test]
    fn class_data_splits_and_delta_encodes_members() {
        let mut a = class("LA;", "Ljava/lang/Object;");
        a.fields.push(Field::new("b", "I", AccessFlags::PRIVATE));
        a.fields.push(Field::new("a", "I", AccessFlags::PRIVATE));
        a.fields.push(Field::new("s", "I", AccessFlags::STATIC));
        a.methods.push(Method::new("v", &[], "V", AccessFlags::ABSTRACT | AccessFlags::PUBLIC));
        a.methods.push(Method::new("<init>", &[], "V", AccessFlags::CONSTRUCTOR | AccessFlags::NATIVE));
        let empty = class("LE;", "Ljava/lang/Object;");

        let (mut pool, mut pools, data) = intern_all(&[a, empty]).unwrap();
        pools.assign_indices();
        pool.place().unwrap();
        let mut writer = DexWriter::new(0x200);
        pool.write_class_data(&mut writer, &pools, &data.code_items).unwrap();

        let section = pool.class_data_section().unwrap();
        assert_eq!(section.count, 1);
        assert_eq!(section.offset, 0x200);
        assert_eq!(
            writer.bytes(),
            &[
                1, 2, 1, 1, // counts
                2, 0x08, // s (field index 2)
                0, 0x02, 1, 0x02, // a then b
                0, 0x80, 0x82, 0x04, 0x00, // <init>: constructor | native, no code
                1, 0x81, 0x08, 0x00, // v: public | abstract
            ]
        );
    }
}
