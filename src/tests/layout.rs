use crate::dex::dex_file::{build_dex, DexFileOptions};
use crate::dex::header::Header;
use crate::dex::map::ItemType;
use crate::dex::pools::StringKey;
use crate::dex::reader::{read_dex, read_string_data};
use crate::tests::fixtures::*;
use crate::types::{AccessFlags, ClassDef, Method, MethodImplementation};

fn u16_at(bytes: &[u8], at: u32) -> u32 {
    u16::from_le_bytes([bytes[at as usize], bytes[at as usize + 1]]) as u32
}

fn u32_at(bytes: &[u8], at: u32) -> u32 {
    let at = at as usize;
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn header_of(bytes: &[u8]) -> Header {
    let mut ix = 0;
    Header::read(bytes, &mut ix).unwrap()
}

fn assert_strictly_increasing<T: PartialOrd + std::fmt::Debug>(rows: &[T], section: &str) {
    for pair in rows.windows(2) {
        assert!(pair[0] < pair[1], "{} out of order: {:?} then {:?}", section, pair[0], pair[1]);
    }
}

#[test]
fn index_sections_are_sorted() {
    let bytes = build_dex(&sample_classes(), DexFileOptions::default()).unwrap();
    let h = header_of(&bytes);

    let strings: Vec<StringKey> = (0..h.string_ids_size)
        .map(|i| StringKey::new(&read_string_data(&bytes, u32_at(&bytes, h.string_ids_off + 4 * i)).unwrap()))
        .collect();
    assert_strictly_increasing(&strings, "string_ids");

    let types: Vec<u32> = (0..h.type_ids_size).map(|i| u32_at(&bytes, h.type_ids_off + 4 * i)).collect();
    assert_strictly_increasing(&types, "type_ids");

    // protos sort by return type first; equal return types fall back to the parameter lists
    let returns: Vec<u32> = (0..h.proto_ids_size).map(|i| u32_at(&bytes, h.proto_ids_off + 12 * i + 4)).collect();
    assert!(returns.windows(2).all(|w| w[0] <= w[1]), "proto_ids out of order: {:?}", returns);

    let fields: Vec<(u32, u32, u32)> = (0..h.field_ids_size)
        .map(|i| {
            let row = h.field_ids_off + 8 * i;
            (u16_at(&bytes, row), u32_at(&bytes, row + 4), u16_at(&bytes, row + 2))
        })
        .collect();
    assert_strictly_increasing(&fields, "field_ids");

    let methods: Vec<(u32, u32, u32)> = (0..h.method_ids_size)
        .map(|i| {
            let row = h.method_ids_off + 8 * i;
            (u16_at(&bytes, row), u32_at(&bytes, row + 4), u16_at(&bytes, row + 2))
        })
        .collect();
    assert_strictly_increasing(&methods, "method_ids");
}

fn printing_method(name: &str) -> Method {
    let mut method = Method::new(name, &[], "V", AccessFlags::PUBLIC | AccessFlags::STATIC);
    method.implementation = Some(MethodImplementation {
        register_count: 2,
        instructions: vec![invoke("invoke-virtual", vec![0, 1], println()), return_void()],
        ..Default::default()
    });
    method
}

#[test]
fn equal_references_share_one_entry() {
    // two separately built references to the same println
    let mut class = ClassDef::new("LX;", AccessFlags::PUBLIC, Some(OBJECT));
    class.methods = vec![printing_method("first"), printing_method("second")];
    let bytes = build_dex(&[class], DexFileOptions::default()).unwrap();
    let h = header_of(&bytes);

    // LX; Ljava/lang/Object; Ljava/io/PrintStream; Ljava/lang/String; V
    assert_eq!(h.type_ids_size, 5);
    // ()V and (Ljava/lang/String;)V
    assert_eq!(h.proto_ids_size, 2);
    // first, second, println
    assert_eq!(h.method_ids_size, 3);
}

#[test]
fn map_lists_sections_in_file_order() {
    let bytes = build_dex(&sample_classes(), DexFileOptions::default()).unwrap();
    let image = read_dex(&bytes).unwrap();

    let kinds: Vec<ItemType> = image.map.iter().map(|item| item.item_type).collect();
    assert_eq!(kinds.first(), Some(&ItemType::Header));
    assert_eq!(kinds.last(), Some(&ItemType::MapList));
    assert!(image.map.windows(2).all(|w| w[0].offset < w[1].offset), "map offsets not ascending");
    assert!(image.map.iter().all(|item| item.size > 0), "empty section listed in the map");
    for kind in [ItemType::Code, ItemType::DebugInfo, ItemType::EncodedArray, ItemType::AnnotationsDirectory] {
        assert!(kinds.contains(&kind), "{:?} missing from the map", kind);
    }
}

#[test]
fn data_items_keep_their_alignment() {
    let bytes = build_dex(&sample_classes(), DexFileOptions::default()).unwrap();
    let image = read_dex(&bytes).unwrap();
    let aligned = [
        ItemType::TypeList,
        ItemType::AnnotationSet,
        ItemType::AnnotationSetRefList,
        ItemType::AnnotationsDirectory,
        ItemType::Code,
        ItemType::MapList,
    ];
    for item in image.map.iter().filter(|item| aligned.contains(&item.item_type)) {
        assert_eq!(item.offset % 4, 0, "{:?} at 0x{:x} is not 4-byte aligned", item.item_type, item.offset);
    }
}
