/* The map_list catalog closing every container */

use log::debug;

use crate::dex::error::DexError;
use crate::dex::writer::DexWriter;
use crate::dex::{read_u2, read_u4};

/// Section kinds as they appear in a `map_item`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ItemType {
    Header = 0x0000,
    StringId = 0x0001,
    TypeId = 0x0002,
    ProtoId = 0x0003,
    FieldId = 0x0004,
    MethodId = 0x0005,
    ClassDef = 0x0006,
    MapList = 0x1000,
    TypeList = 0x1001,
    AnnotationSetRefList = 0x1002,
    AnnotationSet = 0x1003,
    ClassData = 0x2000,
    Code = 0x2001,
    StringData = 0x2002,
    DebugInfo = 0x2003,
    Annotation = 0x2004,
    EncodedArray = 0x2005,
    AnnotationsDirectory = 0x2006,
}

impl ItemType {
    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn from_code(code: u16) -> Option<ItemType> {
        let item_type = match code {
            0x0000 => ItemType::Header,
            0x0001 => ItemType::StringId,
            0x0002 => ItemType::TypeId,
            0x0003 => ItemType::ProtoId,
            0x0004 => ItemType::FieldId,
            0x0005 => ItemType::MethodId,
            0x0006 => ItemType::ClassDef,
            0x1000 => ItemType::MapList,
            0x1001 => ItemType::TypeList,
            0x1002 => ItemType::AnnotationSetRefList,
            0x1003 => ItemType::AnnotationSet,
            0x2000 => ItemType::ClassData,
            0x2001 => ItemType::Code,
            0x2002 => ItemType::StringData,
            0x2003 => ItemType::DebugInfo,
            0x2004 => ItemType::Annotation,
            0x2005 => ItemType::EncodedArray,
            0x2006 => ItemType::AnnotationsDirectory,
            _ => return None,
        };
        Some(item_type)
    }
}

/// Item count and file offset of a written section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionInfo {
    pub count: u32,
    pub offset: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapItem {
    pub item_type: ItemType,
    pub size: u32,
    pub offset: u32,
}

/// Catalog of sections, kept in the order they are added.
#[derive(Debug, Default)]
pub struct MapList {
    items: Vec<MapItem>,
}

impl MapList {
    pub fn new() -> Self {
        MapList { items: vec![MapItem { item_type: ItemType::Header, size: 1, offset: 0 }] }
    }

    /// Records a section; empty sections are left out.
    pub fn add(&mut self, item_type: ItemType, section: Option<SectionInfo>) {
        if let Some(section) = section {
            if section.count > 0 {
                self.items.push(MapItem { item_type, size: section.count, offset: section.offset });
            }
        }
    }

    /// Writes the list, including an entry for itself, and returns its offset.
    pub fn write(mut self, writer: &mut DexWriter) -> u32 {
        writer.align();
        let offset = writer.position();
        self.items.push(MapItem { item_type: ItemType::MapList, size: 1, offset });

        writer.write_uint(self.items.len() as u32);
        for item in &self.items {
            writer.write_u16(item.item_type.code());
            writer.write_u16(0);
            writer.write_uint(item.size);
            writer.write_uint(item.offset);
        }
        debug!("[map] {} entries at 0x{:x}", self.items.len(), offset);
        offset
    }

    pub fn read(bytes: &[u8], offset: u32) -> Result<Vec<MapItem>, DexError> {
        let mut ix = offset as usize;
        let count = read_u4(bytes, &mut ix)?;
        let mut items = Vec::with_capacity(count.min(64) as usize);
        for _ in 0..count {
            let code = read_u2(bytes, &mut ix)?;
            let _unused = read_u2(bytes, &mut ix)?;
            let size = read_u4(bytes, &mut ix)?;
            let offset = read_u4(bytes, &mut ix)?;
            let item_type = match ItemType::from_code(code) {
                Some(t) => t,
                None => fail!(Malformed, "unknown map item type 0x{:04x}", code),
            };
            items.push(MapItem { item_type, size, offset });
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_lists_itself_last() {
        let mut map = MapList::new();
        map.add(ItemType::StringId, Some(SectionInfo { count: 2, offset: 0x70 }));
        map.add(ItemType::TypeId, Some(SectionInfo { count: 0, offset: 0 }));
        map.add(ItemType::ProtoId, None);

        let mut writer = DexWriter::new(0x102);
        let offset = map.write(&mut writer);
        assert_eq!(offset, 0x104);

        let mut file = vec![0u8; 0x102];
        file.extend_from_slice(writer.bytes());
        let items = MapList::read(&file, offset).unwrap();
        let kinds: Vec<ItemType> = items.iter().map(|i| i.item_type).collect();
        assert_eq!(kinds, vec![ItemType::Header, ItemType::StringId, ItemType::MapList]);
        assert_eq!(items[2].offset, 0x104);
    }
}
