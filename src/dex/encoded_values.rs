//! `encoded_value` encoding shared by static initializers and annotations.

use crate::dex::error::{DexError, ResultExt};
use crate::dex::pools::{IndexPools, StringKey};
use crate::dex::writer::*;
use crate::dex::{read_u1, read_uleb128};
use crate::types::{AnnotationElement, EncodedAnnotation, EncodedValue, FieldReference, MethodReference};

/// Resolves pool indices back into model values while decoding.
pub(crate) trait IndexResolver {
    fn string(&self, idx: u32) -> Result<String, DexError>;
    fn type_desc(&self, idx: u32) -> Result<String, DexError>;
    fn field_ref(&self, idx: u32) -> Result<FieldReference, DexError>;
    fn method_ref(&self, idx: u32) -> Result<MethodReference, DexError>;
}

/// Interns every string, type, field and method a value mentions, recursively.
pub(crate) fn intern_value(value: &EncodedValue, pools: &mut IndexPools) {
    match value {
        EncodedValue::String(s) => pools.intern_string(s),
        EncodedValue::Type(t) => pools.intern_type(t),
        EncodedValue::Field(f) | EncodedValue::Enum(f) => pools.intern_field(f),
        EncodedValue::Method(m) => pools.intern_method(m),
        EncodedValue::Array(values) => {
            for v in values {
                intern_value(v, pools);
            }
        }
        EncodedValue::Annotation(annotation) => intern_annotation_body(&annotation.annotation_type, &annotation.elements, pools),
        _ => {}
    }
}

pub(crate) fn intern_annotation_body(annotation_type: &str, elements: &[AnnotationElement], pools: &mut IndexPools) {
    pools.intern_type(annotation_type);
    for element in elements {
        pools.intern_string(&element.name);
        intern_value(&element.value, pools);
    }
}

/// Elements in the order they are written: by name, as the string section sorts them.
pub(crate) fn sorted_elements(elements: &[AnnotationElement]) -> Vec<&AnnotationElement> {
    let mut sorted: Vec<&AnnotationElement> = elements.iter().collect();
    sorted.sort_by(|a, b| StringKey::new(&a.name).cmp(&StringKey::new(&b.name)));
    sorted
}

pub(crate) fn write_value(writer: &mut DexWriter, value: &EncodedValue, pools: &IndexPools) -> Result<(), DexError> {
    match value {
        EncodedValue::Byte(v) => writer.write_encoded_int(VALUE_BYTE, *v as i64),
        EncodedValue::Short(v) => writer.write_encoded_int(VALUE_SHORT, *v as i64),
        EncodedValue::Char(v) => writer.write_encoded_uint(VALUE_CHAR, *v as u64),
        EncodedValue::Int(v) => writer.write_encoded_int(VALUE_INT, *v as i64),
        EncodedValue::Long(v) => writer.write_encoded_int(VALUE_LONG, *v),
        EncodedValue::Float(v) => writer.write_encoded_float(VALUE_FLOAT, *v),
        EncodedValue::Double(v) => writer.write_encoded_double(VALUE_DOUBLE, *v),
        EncodedValue::String(s) => writer.write_encoded_uint(VALUE_STRING, pools.string_index(s)? as u64),
        EncodedValue::Type(t) => writer.write_encoded_uint(VALUE_TYPE, pools.type_index(t)? as u64),
        EncodedValue::Field(f) => writer.write_encoded_uint(VALUE_FIELD, pools.field_index(f)? as u64),
        EncodedValue::Method(m) => writer.write_encoded_uint(VALUE_METHOD, pools.method_index(m)? as u64),
        EncodedValue::Enum(f) => writer.write_encoded_uint(VALUE_ENUM, pools.field_index(f)? as u64),
        EncodedValue::Array(values) => {
            writer.write_encoded_value_header(VALUE_ARRAY, 0)?;
            write_array(writer, values, pools)
        }
        EncodedValue::Annotation(annotation) => {
            writer.write_encoded_value_header(VALUE_ANNOTATION, 0)?;
            write_annotation_body(writer, &annotation.annotation_type, &annotation.elements, pools)
        }
        EncodedValue::Null => writer.write_encoded_value_header(VALUE_NULL, 0),
        EncodedValue::Boolean(b) => writer.write_encoded_value_header(VALUE_BOOLEAN, *b as u8),
    }
}

/// `encoded_array`: uleb count, then the values.
pub(crate) fn write_array(writer: &mut DexWriter, values: &[EncodedValue], pools: &IndexPools) -> Result<(), DexError> {
    writer.write_uleb128(values.len() as u32);
    for value in values {
        write_value(writer, value, pools)?;
    }
    Ok(())
}

/// `encoded_annotation`: type, element count, then name/value pairs sorted by name.
pub(crate) fn write_annotation_body(
    writer: &mut DexWriter,
    annotation_type: &str,
    elements: &[AnnotationElement],
    pools: &IndexPools,
) -> Result<(), DexError> {
    writer.write_uleb128(pools.type_index(annotation_type)?);
    writer.write_uleb128(elements.len() as u32);
    for element in sorted_elements(elements) {
        writer.write_uleb128(pools.string_index(&element.name)?);
        write_value(writer, &element.value, pools).context(|| format!("element {} of {}", element.name, annotation_type))?;
    }
    Ok(())
}

pub(crate) fn read_value(bytes: &[u8], ix: &mut usize, resolver: &impl IndexResolver) -> Result<EncodedValue, DexError> {
    let header_byte = read_u1(bytes, ix)?;
    let value_arg = header_byte >> 5;
    let value_type = header_byte & 0x1F;
    let size = (value_arg + 1) as usize;

    let value = match value_type {
        VALUE_BYTE => EncodedValue::Byte(read_signed(bytes, ix, size)? as i8),
        VALUE_SHORT => EncodedValue::Short(read_signed(bytes, ix, size)? as i16),
        VALUE_CHAR => EncodedValue::Char(read_unsigned(bytes, ix, size)? as u16),
        VALUE_INT => EncodedValue::Int(read_signed(bytes, ix, size)? as i32),
        VALUE_LONG => EncodedValue::Long(read_signed(bytes, ix, size)?),
        VALUE_FLOAT => {
            // right zero-extended: the stored bytes are the high-order ones
            let raw = read_unsigned(bytes, ix, size)? << (8 * (4 - size.min(4)));
            EncodedValue::Float(f32::from_bits(raw as u32))
        }
        VALUE_DOUBLE => {
            let raw = read_unsigned(bytes, ix, size)? << (8 * (8 - size));
            EncodedValue::Double(f64::from_bits(raw))
        }
        VALUE_STRING => EncodedValue::String(resolver.string(read_unsigned(bytes, ix, size)? as u32)?),
        VALUE_TYPE => EncodedValue::Type(resolver.type_desc(read_unsigned(bytes, ix, size)? as u32)?),
        VALUE_FIELD => EncodedValue::Field(resolver.field_ref(read_unsigned(bytes, ix, size)? as u32)?),
        VALUE_METHOD => EncodedValue::Method(resolver.method_ref(read_unsigned(bytes, ix, size)? as u32)?),
        VALUE_ENUM => EncodedValue::Enum(resolver.field_ref(read_unsigned(bytes, ix, size)? as u32)?),
        VALUE_ARRAY => EncodedValue::Array(read_array(bytes, ix, resolver)?),
        VALUE_ANNOTATION => {
            let (annotation_type, elements) = read_annotation_body(bytes, ix, resolver)?;
            EncodedValue::Annotation(EncodedAnnotation { annotation_type, elements })
        }
        VALUE_NULL => EncodedValue::Null,
        VALUE_BOOLEAN => EncodedValue::Boolean(value_arg != 0),
        _ => fail!(Malformed, "Unknown EncodedValue type 0x{:02x}", value_type),
    };
    Ok(value)
}

pub(crate) fn read_array(bytes: &[u8], ix: &mut usize, resolver: &impl IndexResolver) -> Result<Vec<EncodedValue>, DexError> {
    let size = read_uleb128(bytes, ix)? as usize;
    let mut values = Vec::with_capacity(size.min(1024));
    for _ in 0..size {
        values.push(read_value(bytes, ix, resolver)?);
    }
    Ok(values)
}

pub(crate) fn read_annotation_body(
    bytes: &[u8],
    ix: &mut usize,
    resolver: &impl IndexResolver,
) -> Result<(String, Vec<AnnotationElement>), DexError> {
    let annotation_type = resolver.type_desc(read_uleb128(bytes, ix)?)?;
    let size = read_uleb128(bytes, ix)? as usize;
    let mut elements = Vec::with_capacity(size.min(1024));
    for _ in 0..size {
        let name = resolver.string(read_uleb128(bytes, ix)?)?;
        let value = read_value(bytes, ix, resolver)?;
        elements.push(AnnotationElement { name, value });
    }
    Ok((annotation_type, elements))
}

fn read_unsigned(bytes: &[u8], ix: &mut usize, size: usize) -> Result<u64, DexError> {
    if size > 8 {
        fail!(Malformed, "encoded value of {} bytes", size);
    }
    let mut result = 0u64;
    for i in 0..size {
        let byte = read_u1(bytes, ix)?;
        result |= (byte as u64) << (8 * i);
    }
    Ok(result)
}

fn read_signed(bytes: &[u8], ix: &mut usize, size: usize) -> Result<i64, DexError> {
    let raw = read_unsigned(bytes, ix, size)? as i64;
    let shift = 64 - 8 * size as u32;
    Ok(if shift == 0 { raw } else { (raw << shift) >> shift })
}
