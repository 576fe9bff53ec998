/* Dex container writer: interning, layout and finalization */

use std::fs;
use std::path::Path;

use log::{debug, info};

use crate::dex::error::{DexError, ResultExt};
use crate::dex::header::{Header, DEFAULT_API_LEVEL, HEADER_SIZE};
use crate::dex::map::{ItemType, MapList, SectionInfo};
use crate::dex::pools::class_defs::ClassDefPool;
use crate::dex::pools::{DataPools, IndexPools};
use crate::dex::writer::DexWriter;
use crate::types::ClassDef;

// Fixed row sizes of the index sections
const STRING_ID_SIZE: u32 = 4;
const TYPE_ID_SIZE: u32 = 4;
const PROTO_ID_SIZE: u32 = 12;
const FIELD_ID_SIZE: u32 = 8;
const METHOD_ID_SIZE: u32 = 8;
const CLASS_DEF_SIZE: u32 = 32;

/// Options for building a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DexFileOptions {
    /// Lowest Android api level the container has to load on; selects the format version.
    pub api_level: u32,
}

impl Default for DexFileOptions {
    fn default() -> Self {
        DexFileOptions { api_level: DEFAULT_API_LEVEL }
    }
}

/// A container being built.
///
/// Classes are interned one at a time, which pulls every string, type, prototype, member
/// reference, annotation, initializer, code and debug item they need into the pools.
/// [`DexFile::write`] then lays the sections out and returns the finished bytes.
///
/// # Examples
///
/// ```
///  use dexwriter::dex::dex_file::{DexFile, DexFileOptions};
///  use dexwriter::types::{AccessFlags, ClassDef};
///
///  let mut dex = DexFile::new(DexFileOptions::default());
///  let class = ClassDef::new("Lcom/example/Empty;", AccessFlags::PUBLIC, Some("Ljava/lang/Object;"));
///  dex.intern_class(&class).unwrap();
///  let bytes = dex.write().unwrap();
///  assert_eq!(&bytes[..8], b"dex\n035\0");
/// ```
#[derive(Debug)]
pub struct DexFile {
    options: DexFileOptions,
    pools: IndexPools,
    data: DataPools,
    classes: ClassDefPool,
}

impl DexFile {
    pub fn new(options: DexFileOptions) -> Self {
        DexFile { options, pools: IndexPools::default(), data: DataPools::default(), classes: ClassDefPool::new() }
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    pub fn intern_class(&mut self, class: &ClassDef) -> Result<(), DexError> {
        self.classes
            .intern(class, &mut self.pools, &mut self.data)
            .context(|| format!("class {}", class.class_type))
    }

    pub fn intern_classes(&mut self, classes: &[ClassDef]) -> Result<(), DexError> {
        for class in classes {
            self.intern_class(class)?;
        }
        Ok(())
    }

    // Start of the data area, right after the index sections.
    fn data_offset(&self) -> u32 {
        HEADER_SIZE
            + STRING_ID_SIZE * self.pools.strings.len() as u32
            + TYPE_ID_SIZE * self.pools.types.len() as u32
            + PROTO_ID_SIZE * self.pools.protos.len() as u32
            + FIELD_ID_SIZE * self.pools.fields.len() as u32
            + METHOD_ID_SIZE * self.pools.methods.len() as u32
            + CLASS_DEF_SIZE * self.classes.len() as u32
    }

    /// Lays out and serializes the container.
    pub fn write(mut self) -> Result<Vec<u8>, DexError> {
        info!("[dexfile] writing {} classes", self.classes.len());
        self.pools.assign_indices();
        self.classes.place()?;

        let data_off = self.data_offset();
        let mut data = DexWriter::new(data_off);
        self.write_data(&mut data)?;

        let mut index = DexWriter::new(HEADER_SIZE);
        self.write_index(&mut index)?;
        if index.position() != data_off {
            fail!(
                ContractViolation,
                "index sections end at 0x{:x}, data was laid out from 0x{:x}",
                index.position(),
                data_off
            );
        }

        let mut map = MapList::new();
        self.add_sections(&mut map);
        let map_off = map.write(&mut data);

        let mut header = Header::new(self.options.api_level);
        header.map_off = map_off;
        header.data_off = data_off;
        self.fill_index_sections(&mut header);

        let mut file = Vec::with_capacity((data.position()) as usize);
        file.resize(HEADER_SIZE as usize, 0);
        file.extend_from_slice(index.bytes());
        file.extend_from_slice(data.bytes());
        header.finalize(&mut file)?;

        info!("[dexfile] wrote {} bytes, {} strings, {} methods", file.len(), self.pools.strings.len(), self.pools.methods.len());
        Ok(file)
    }

    pub fn write_to_file(self, path: &Path) -> Result<(), DexError> {
        let bytes = self.write()?;
        fs::write(path, bytes)
            .map_err(DexError::from)
            .context(|| format!("writing {}", path.display()))
    }

    fn write_data(&mut self, writer: &mut DexWriter) -> Result<(), DexError> {
        let classes = self.classes.classes();
        self.pools.strings.write_data(writer);
        self.pools.type_lists.write(writer, &self.pools.types)?;
        self.data.encoded_arrays.write(writer, &self.pools)?;
        self.data.annotations.write(writer, &self.pools)?;
        self.data.annotation_sets.write(writer, &self.data.annotations)?;
        self.data.annotation_set_refs.write(writer, &self.data.annotation_sets)?;
        self.data.annotation_directories.write(
            writer,
            &self.pools,
            &self.data.annotation_sets,
            &self.data.annotation_set_refs,
        )?;
        self.data.debug_infos.write(writer, classes, &self.pools)?;
        self.data.code_items.write(writer, classes, &self.pools, &self.data.debug_infos)?;
        self.classes.write_class_data(writer, &self.pools, &self.data.code_items)?;
        debug!("[dexfile] data area is 0x{:x} bytes", writer.bytes().len());
        Ok(())
    }

    fn write_index(&mut self, writer: &mut DexWriter) -> Result<(), DexError> {
        let pools = &mut self.pools;
        pools.strings.write_ids(writer)?;
        pools.types.write_ids(writer, &pools.strings)?;
        pools.protos.write_ids(writer, &pools.strings, &pools.types, &pools.type_lists)?;
        pools.fields.write_ids(writer, &pools.strings, &pools.types)?;
        pools.methods.write_ids(writer, &pools.strings, &pools.types, &pools.protos)?;
        self.classes.write_ids(writer, &self.pools, &self.data)?;
        Ok(())
    }

    fn add_sections(&self, map: &mut MapList) {
        let pools = &self.pools;
        let data = &self.data;
        map.add(ItemType::StringId, pools.strings.ids_section());
        map.add(ItemType::TypeId, pools.types.section());
        map.add(ItemType::ProtoId, pools.protos.section());
        map.add(ItemType::FieldId, pools.fields.section());
        map.add(ItemType::MethodId, pools.methods.section());
        map.add(ItemType::ClassDef, self.classes.ids_section());
        map.add(ItemType::StringData, pools.strings.data_section());
        map.add(ItemType::TypeList, pools.type_lists.section());
        map.add(ItemType::EncodedArray, data.encoded_arrays.section());
        map.add(ItemType::Annotation, data.annotations.section());
        map.add(ItemType::AnnotationSet, data.annotation_sets.section());
        map.add(ItemType::AnnotationSetRefList, data.annotation_set_refs.section());
        map.add(ItemType::AnnotationsDirectory, data.annotation_directories.section());
        map.add(ItemType::DebugInfo, data.debug_infos.section());
        map.add(ItemType::Code, data.code_items.section());
        map.add(ItemType::ClassData, self.classes.class_data_section());
    }

    fn fill_index_sections(&self, header: &mut Header) {
        let pools = &self.pools;
        let size_and_offset = |section: Option<SectionInfo>| match section {
            Some(s) if s.count > 0 => (s.count, s.offset),
            _ => (0, 0),
        };
        (header.string_ids_size, header.string_ids_off) = size_and_offset(pools.strings.ids_section());
        (header.type_ids_size, header.type_ids_off) = size_and_offset(pools.types.section());
        (header.proto_ids_size, header.proto_ids_off) = size_and_offset(pools.protos.section());
        (header.field_ids_size, header.field_ids_off) = size_and_offset(pools.fields.section());
        (header.method_ids_size, header.method_ids_off) = size_and_offset(pools.methods.section());
        (header.class_defs_size, header.class_defs_off) = size_and_offset(self.classes.ids_section());
    }
}

/// Interns `classes` into a fresh container and writes it.
pub fn build_dex(classes: &[ClassDef], options: DexFileOptions) -> Result<Vec<u8>, DexError> {
    let mut dex = DexFile::new(options);
    dex.intern_classes(classes)?;
    dex.write()
}
