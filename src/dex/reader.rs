/* Verifying reader: decodes a written container back into the class model */

use adler::adler32_slice;
use log::debug;
use sha1::{Digest, Sha1};

use crate::dex::encoded_values::{read_annotation_body, read_array, IndexResolver};
use crate::dex::error::{DexError, ResultExt};
use crate::dex::header::Header;
use crate::dex::instructions::{Instruction, Reference};
use crate::dex::map::{MapItem, MapList};
use crate::dex::opcodes::ReferenceType;
use crate::dex::pools::debug_infos::read_debug_info;
use crate::dex::{read_sleb128, read_u1, read_u2, read_u4, read_uleb128, read_x};
use crate::types::{
    AccessFlags, Annotation, AnnotationVisibility, ClassDef, ExceptionHandler, Field, FieldReference, Method,
    MethodImplementation, MethodParameter, MethodReference, TryBlock,
};

/// A decoded container.
#[derive(Debug)]
pub struct DexImage {
    pub header: Header,
    /// Classes in class_def order
    pub classes: Vec<ClassDef>,
    pub map: Vec<MapItem>,
}

// Index sections resolved to model values
struct Tables {
    strings: Vec<String>,
    types: Vec<String>,
    protos: Vec<(String, Vec<String>)>,
    fields: Vec<FieldReference>,
    methods: Vec<MethodReference>,
}

fn lookup<'a, T>(table: &'a [T], idx: u32, what: &str) -> Result<&'a T, DexError> {
    table.get(idx as usize).ok_or_else(|| err!(Malformed, "{} index {} out of range ({} entries)", what, idx, table.len()))
}

impl IndexResolver for Tables {
    fn string(&self, idx: u32) -> Result<String, DexError> {
        lookup(&self.strings, idx, "string").cloned()
    }

    fn type_desc(&self, idx: u32) -> Result<String, DexError> {
        lookup(&self.types, idx, "type").cloned()
    }

    fn field_ref(&self, idx: u32) -> Result<FieldReference, DexError> {
        lookup(&self.fields, idx, "field").cloned()
    }

    fn method_ref(&self, idx: u32) -> Result<MethodReference, DexError> {
        lookup(&self.methods, idx, "method").cloned()
    }
}

impl Tables {
    fn read(bytes: &[u8], header: &Header) -> Result<Tables, DexError> {
        let mut strings = Vec::with_capacity(header.string_ids_size as usize);
        for i in 0..header.string_ids_size {
            let mut ix = (header.string_ids_off + 4 * i) as usize;
            let data_off = read_u4(bytes, &mut ix)?;
            strings.push(read_string_data(bytes, data_off).context(|| format!("string {}", i))?);
        }

        let mut types = Vec::with_capacity(header.type_ids_size as usize);
        for i in 0..header.type_ids_size {
            let mut ix = (header.type_ids_off + 4 * i) as usize;
            types.push(lookup(&strings, read_u4(bytes, &mut ix)?, "string")?.clone());
        }

        let mut protos = Vec::with_capacity(header.proto_ids_size as usize);
        for i in 0..header.proto_ids_size {
            let mut ix = (header.proto_ids_off + 12 * i) as usize;
            let _shorty = read_u4(bytes, &mut ix)?;
            let return_type = lookup(&types, read_u4(bytes, &mut ix)?, "type")?.clone();
            let parameters = read_type_list(bytes, read_u4(bytes, &mut ix)?, &types)?;
            protos.push((return_type, parameters));
        }

        let mut fields = Vec::with_capacity(header.field_ids_size as usize);
        for i in 0..header.field_ids_size {
            let mut ix = (header.field_ids_off + 8 * i) as usize;
            let class = lookup(&types, read_u2(bytes, &mut ix)? as u32, "type")?;
            let field_type = lookup(&types, read_u2(bytes, &mut ix)? as u32, "type")?;
            let name = lookup(&strings, read_u4(bytes, &mut ix)?, "string")?;
            fields.push(FieldReference::new(class, name, field_type));
        }

        let mut methods = Vec::with_capacity(header.method_ids_size as usize);
        for i in 0..header.method_ids_size {
            let mut ix = (header.method_ids_off + 8 * i) as usize;
            let class = lookup(&types, read_u2(bytes, &mut ix)? as u32, "type")?;
            let (return_type, parameters) = lookup(&protos, read_u2(bytes, &mut ix)? as u32, "proto")?;
            let name = lookup(&strings, read_u4(bytes, &mut ix)?, "string")?;
            methods.push(MethodReference {
                defining_class: class.clone(),
                name: name.clone(),
                parameters: parameters.clone(),
                return_type: return_type.clone(),
            });
        }

        Ok(Tables { strings, types, protos, fields, methods })
    }

    fn reference(&self, reference_type: ReferenceType, idx: u32) -> Result<Reference, DexError> {
        let reference = match reference_type {
            ReferenceType::String => Reference::String(self.string(idx)?),
            ReferenceType::Type => Reference::Type(self.type_desc(idx)?),
            ReferenceType::Field => Reference::Field(self.field_ref(idx)?),
            ReferenceType::Method => Reference::Method(self.method_ref(idx)?),
            ReferenceType::None => fail!(UnrecognizedReference, "index {} for an opcode without references", idx),
        };
        Ok(reference)
    }
}

pub(crate) fn read_string_data(bytes: &[u8], offset: u32) -> Result<String, DexError> {
    let mut ix = offset as usize;
    let _utf16_size = read_uleb128(bytes, &mut ix)?;
    let start = ix;
    while read_u1(bytes, &mut ix)? != 0 {}
    match cesu8::from_java_cesu8(&bytes[start..ix - 1]) {
        Ok(s) => Ok(s.into_owned()),
        Err(_) => Err(err!(Malformed, "invalid modified UTF-8 at 0x{:x}", offset)),
    }
}

fn read_type_list(bytes: &[u8], offset: u32, types: &[String]) -> Result<Vec<String>, DexError> {
    if offset == 0 {
        return Ok(vec![]);
    }
    let mut ix = offset as usize;
    let size = read_u4(bytes, &mut ix)?;
    let mut list = Vec::with_capacity(size.min(256) as usize);
    for _ in 0..size {
        list.push(lookup(types, read_u2(bytes, &mut ix)? as u32, "type")?.clone());
    }
    Ok(list)
}

/// Decodes a container and every class in it.
pub fn read_dex(bytes: &[u8]) -> Result<DexImage, DexError> {
    let mut ix = 0;
    let header = Header::read(bytes, &mut ix)?;
    if header.file_size as usize != bytes.len() {
        fail!(Malformed, "header says {} bytes, got {}", header.file_size, bytes.len());
    }
    let map = MapList::read(bytes, header.map_off)?;
    let tables = Tables::read(bytes, &header)?;

    let mut classes = Vec::with_capacity(header.class_defs_size as usize);
    for i in 0..header.class_defs_size {
        let offset = header.class_defs_off + 32 * i;
        classes.push(read_class_def(bytes, offset, &tables).context(|| format!("class_def {}", i))?);
    }
    debug!("[reader] decoded {} classes from {} bytes", classes.len(), bytes.len());
    Ok(DexImage { header, classes, map })
}

fn optional(idx: u32) -> Option<u32> {
    if idx == crate::dex::NO_INDEX {
        None
    } else {
        Some(idx)
    }
}

fn read_class_def(bytes: &[u8], offset: u32, tables: &Tables) -> Result<ClassDef, DexError> {
    let mut ix = offset as usize;
    let class_type = tables.type_desc(read_u4(bytes, &mut ix)?)?;
    let access_flags = AccessFlags::from_bits_retain(read_u4(bytes, &mut ix)?);
    let superclass = optional(read_u4(bytes, &mut ix)?).map(|t| tables.type_desc(t)).transpose()?;
    let interfaces = read_type_list(bytes, read_u4(bytes, &mut ix)?, &tables.types)?;
    let source_file = optional(read_u4(bytes, &mut ix)?).map(|s| tables.string(s)).transpose()?;
    let annotations_off = read_u4(bytes, &mut ix)?;
    let class_data_off = read_u4(bytes, &mut ix)?;
    let static_values_off = read_u4(bytes, &mut ix)?;

    let mut class = ClassDef {
        class_type,
        access_flags,
        superclass,
        interfaces,
        source_file,
        annotations: vec![],
        fields: vec![],
        methods: vec![],
    };
    if class_data_off != 0 {
        read_class_data(bytes, class_data_off, tables, &mut class)?;
    }
    if static_values_off != 0 {
        let mut ix = static_values_off as usize;
        let values = read_array(bytes, &mut ix, tables)?;
        let statics = class.fields.iter_mut().filter(|f| f.is_static());
        let mut assigned = 0;
        for (field, value) in statics.zip(values.iter()) {
            field.initial_value = Some(value.clone());
            assigned += 1;
        }
        if assigned != values.len() {
            fail!(Malformed, "{} static values for {} static fields", values.len(), assigned);
        }
    }
    if annotations_off != 0 {
        read_annotations_directory(bytes, annotations_off, tables, &mut class)?;
    }
    Ok(class)
}

fn read_class_data(bytes: &[u8], offset: u32, tables: &Tables, class: &mut ClassDef) -> Result<(), DexError> {
    let mut ix = offset as usize;
    let static_fields = read_uleb128(bytes, &mut ix)?;
    let instance_fields = read_uleb128(bytes, &mut ix)?;
    let direct_methods = read_uleb128(bytes, &mut ix)?;
    let virtual_methods = read_uleb128(bytes, &mut ix)?;

    for count in [static_fields, instance_fields] {
        let mut index = 0u32;
        for _ in 0..count {
            index += read_uleb128(bytes, &mut ix)?;
            let access_flags = AccessFlags::from_bits_retain(read_uleb128(bytes, &mut ix)?);
            let reference = tables.field_ref(index)?;
            class.fields.push(Field::new(&reference.name, &reference.field_type, access_flags));
        }
    }
    for count in [direct_methods, virtual_methods] {
        let mut index = 0u32;
        for _ in 0..count {
            index += read_uleb128(bytes, &mut ix)?;
            let access_flags = AccessFlags::from_bits_retain(read_uleb128(bytes, &mut ix)?);
            let code_off = read_uleb128(bytes, &mut ix)?;
            let reference = tables.method_ref(index)?;
            let mut method = Method {
                name: reference.name.clone(),
                parameters: reference.parameters.iter().map(|p| MethodParameter::new(p)).collect(),
                return_type: reference.return_type.clone(),
                access_flags,
                annotations: vec![],
                implementation: None,
            };
            if code_off != 0 {
                read_code_item(bytes, code_off, tables, &mut method).context(|| format!("method {}", reference))?;
            }
            class.methods.push(method);
        }
    }
    Ok(())
}

fn read_code_item(bytes: &[u8], offset: u32, tables: &Tables, method: &mut Method) -> Result<(), DexError> {
    let mut ix = offset as usize;
    let register_count = read_u2(bytes, &mut ix)?;
    let _ins = read_u2(bytes, &mut ix)?;
    let _outs = read_u2(bytes, &mut ix)?;
    let tries_size = read_u2(bytes, &mut ix)?;
    let debug_info_off = read_u4(bytes, &mut ix)?;
    let insns_size = read_u4(bytes, &mut ix)? as usize;

    let mut units = Vec::with_capacity(insns_size.min(1 << 16));
    for _ in 0..insns_size {
        units.push(read_u2(bytes, &mut ix)?);
    }
    let mut instructions = vec![];
    let mut pc = 0;
    while pc < units.len() {
        let instruction = Instruction::decode(&units, pc, |rt, idx| tables.reference(rt, idx))?;
        pc += instruction.code_units();
        instructions.push(instruction);
    }

    let mut try_blocks = vec![];
    if tries_size > 0 {
        if insns_size % 2 == 1 {
            read_u2(bytes, &mut ix)?;
        }
        let mut tries = vec![];
        for _ in 0..tries_size {
            let start_address = read_u4(bytes, &mut ix)?;
            let code_unit_count = read_u2(bytes, &mut ix)?;
            let handler_off = read_u2(bytes, &mut ix)?;
            tries.push((start_address, code_unit_count, handler_off));
        }
        let handlers_base = ix;
        for (start_address, code_unit_count, handler_off) in tries {
            let handlers = read_handlers(bytes, handlers_base + handler_off as usize, tables)?;
            try_blocks.push(TryBlock { start_address, code_unit_count, handlers });
        }
    }

    let mut debug_items = vec![];
    if debug_info_off != 0 {
        let info = read_debug_info(bytes, debug_info_off, tables)?;
        for (parameter, name) in method.parameters.iter_mut().zip(info.parameter_names) {
            parameter.name = name;
        }
        debug_items = info.items;
    }

    method.implementation = Some(MethodImplementation { register_count, instructions, try_blocks, debug_items });
    Ok(())
}

fn read_handlers(bytes: &[u8], offset: usize, tables: &Tables) -> Result<Vec<ExceptionHandler>, DexError> {
    let mut ix = offset;
    let size = read_sleb128(bytes, &mut ix)?;
    let mut handlers = vec![];
    for _ in 0..size.unsigned_abs() {
        let exception_type = tables.type_desc(read_uleb128(bytes, &mut ix)?)?;
        let handler_address = read_uleb128(bytes, &mut ix)?;
        handlers.push(ExceptionHandler { exception_type: Some(exception_type), handler_address });
    }
    if size <= 0 {
        handlers.push(ExceptionHandler { exception_type: None, handler_address: read_uleb128(bytes, &mut ix)? });
    }
    Ok(handlers)
}

fn read_annotation(bytes: &[u8], offset: u32, tables: &Tables) -> Result<Annotation, DexError> {
    let mut ix = offset as usize;
    let raw = read_u1(bytes, &mut ix)?;
    let visibility = match AnnotationVisibility::from_u8(raw) {
        Some(v) => v,
        None => fail!(Malformed, "annotation visibility {} at 0x{:x}", raw, offset),
    };
    let (annotation_type, elements) = read_annotation_body(bytes, &mut ix, tables)?;
    Ok(Annotation { visibility, annotation_type, elements })
}

fn read_annotation_set(bytes: &[u8], offset: u32, tables: &Tables) -> Result<Vec<Annotation>, DexError> {
    if offset == 0 {
        return Ok(vec![]);
    }
    let mut ix = offset as usize;
    let size = read_u4(bytes, &mut ix)?;
    let mut annotations = Vec::with_capacity(size.min(64) as usize);
    for _ in 0..size {
        annotations.push(read_annotation(bytes, read_u4(bytes, &mut ix)?, tables)?);
    }
    Ok(annotations)
}

fn read_annotations_directory(bytes: &[u8], offset: u32, tables: &Tables, class: &mut ClassDef) -> Result<(), DexError> {
    let mut ix = offset as usize;
    class.annotations = read_annotation_set(bytes, read_u4(bytes, &mut ix)?, tables)?;
    let fields_size = read_u4(bytes, &mut ix)?;
    let methods_size = read_u4(bytes, &mut ix)?;
    let parameters_size = read_u4(bytes, &mut ix)?;

    for _ in 0..fields_size {
        let reference = tables.field_ref(read_u4(bytes, &mut ix)?)?;
        let annotations = read_annotation_set(bytes, read_u4(bytes, &mut ix)?, tables)?;
        let class_type = class.class_type.clone();
        match class.fields.iter_mut().find(|f| f.reference(&class_type) == reference) {
            Some(field) => field.annotations = annotations,
            None => fail!(Malformed, "annotations for field {} outside its class", reference),
        }
    }
    for _ in 0..methods_size {
        let reference = tables.method_ref(read_u4(bytes, &mut ix)?)?;
        let annotations = read_annotation_set(bytes, read_u4(bytes, &mut ix)?, tables)?;
        find_method(class, &reference)?.annotations = annotations;
    }
    for _ in 0..parameters_size {
        let reference = tables.method_ref(read_u4(bytes, &mut ix)?)?;
        let mut list_ix = read_u4(bytes, &mut ix)? as usize;
        let size = read_u4(bytes, &mut list_ix)?;
        let method = find_method(class, &reference)?;
        if size as usize > method.parameters.len() {
            fail!(Malformed, "{} parameter annotation sets for {}", size, reference);
        }
        for parameter in method.parameters.iter_mut().take(size as usize) {
            parameter.annotations = read_annotation_set(bytes, read_u4(bytes, &mut list_ix)?, tables)?;
        }
    }
    Ok(())
}

fn find_method<'a>(class: &'a mut ClassDef, reference: &MethodReference) -> Result<&'a mut Method, DexError> {
    let class_type = class.class_type.clone();
    match class.methods.iter_mut().find(|m| m.reference(&class_type) == *reference) {
        Some(method) => Ok(method),
        None => Err(err!(Malformed, "annotations for method {} outside its class", reference)),
    }
}

/// Recomputes the Adler-32 checksum and compares it with the header's.
pub fn verify_checksum(bytes: &[u8]) -> Result<(), DexError> {
    if bytes.len() < 0x70 {
        fail!(Malformed, "{} bytes is shorter than a header", bytes.len());
    }
    let mut ix = 8;
    let stored = read_u4(bytes, &mut ix)?;
    let computed = adler32_slice(&bytes[12..]);
    if stored != computed {
        fail!(Malformed, "checksum 0x{:08x} does not match computed 0x{:08x}", stored, computed);
    }
    Ok(())
}

/// Recomputes the SHA-1 signature and compares it with the header's.
pub fn verify_signature(bytes: &[u8]) -> Result<(), DexError> {
    if bytes.len() < 0x70 {
        fail!(Malformed, "{} bytes is shorter than a header", bytes.len());
    }
    let mut ix = 12;
    let stored = read_x(bytes, &mut ix, 20)?;
    let mut hasher = Sha1::new();
    hasher.update(&bytes[32..]);
    let computed = hasher.finalize();
    if stored.as_slice() != computed.as_slice() {
        fail!(Malformed, "signature does not match the file contents");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::dex_file::{build_dex, DexFileOptions};
    use crate::dex::error::ErrorKind;

    #[test]
    fn corrupted_bytes_fail_verification() {
        let class = ClassDef::new("LA;", AccessFlags::PUBLIC, Some("Ljava/lang/Object;"));
        let mut bytes = build_dex(&[class], DexFileOptions::default()).unwrap();
        verify_checksum(&bytes).unwrap();
        verify_signature(&bytes).unwrap();

        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert_eq!(verify_signature(&bytes).unwrap_err().kind(), ErrorKind::Malformed);
        assert_eq!(verify_checksum(&bytes).unwrap_err().kind(), ErrorKind::Malformed);
    }

    #[test]
    fn truncated_files_are_malformed() {
        let class = ClassDef::new("LA;", AccessFlags::PUBLIC, Some("Ljava/lang/Object;"));
        let bytes = build_dex(&[class], DexFileOptions::default()).unwrap();
        assert_eq!(read_dex(&bytes[..bytes.len() - 4]).unwrap_err().kind(), ErrorKind::Malformed);
        assert_eq!(read_dex(&bytes[..0x40]).unwrap_err().kind(), ErrorKind::Malformed);
    }

    #[test]
    fn handler_lists_decode_with_catch_all_last() {
        // count -1: one typed handler and a catch-all
        let tables = Tables {
            strings: vec![],
            types: vec!["LTypeA;".to_string()],
            protos: vec![],
            fields: vec![],
            methods: vec![],
        };
        let handlers = read_handlers(&[0x7f, 0, 10, 20], 0, &tables).unwrap();
        assert_eq!(handlers.len(), 2);
        assert_eq!(handlers[0].exception_type.as_deref(), Some("LTypeA;"));
        assert_eq!(handlers[1], ExceptionHandler { exception_type: None, handler_address: 20 });
    }
}
