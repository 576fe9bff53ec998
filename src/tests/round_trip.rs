use crate::dex::dex_file::{build_dex, DexFile, DexFileOptions};
use crate::dex::error::ErrorKind;
use crate::dex::instructions::{Instruction, Reference};
use crate::dex::reader::{read_dex, verify_checksum, verify_signature};
use crate::tests::fixtures::*;
use crate::types::{
    AccessFlags, ClassDef, DebugItem, EncodedValue, ExceptionHandler, Field, Method, MethodImplementation, TryBlock,
};

fn find<'a>(classes: &'a [ClassDef], class_type: &str) -> &'a ClassDef {
    classes.iter().find(|c| c.class_type == class_type).expect("class present after round trip")
}

#[test]
fn decodes_back_to_the_same_model() {
    let classes = sample_classes();
    let bytes = build_dex(&classes, DexFileOptions::default()).expect("encode sample classes");
    let image = read_dex(&bytes).expect("decode sample classes");

    assert_eq!(image.classes.len(), classes.len());
    for class in &classes {
        assert_eq!(find(&image.classes, &class.class_type), class, "{} changed after round trip", class.class_type);
    }
}

#[test]
fn superclasses_and_interfaces_are_written_first() {
    let bytes = build_dex(&sample_classes(), DexFileOptions::default()).unwrap();
    let image = read_dex(&bytes).unwrap();
    let order: Vec<&str> = image.classes.iter().map(|c| c.class_type.as_str()).collect();
    assert_eq!(order, vec!["Lcom/example/Greeter;", "Lcom/example/Parent;", "Lcom/example/Main;"]);
}

#[test]
fn output_is_deterministic() {
    let classes = sample_classes();
    let first = build_dex(&classes, DexFileOptions::default()).unwrap();
    let second = build_dex(&classes, DexFileOptions::default()).unwrap();
    assert_eq!(first, second);

    // interning order does not leak into the layout
    let reversed: Vec<ClassDef> = classes.into_iter().rev().collect();
    let third = build_dex(&reversed, DexFileOptions::default()).unwrap();
    assert_eq!(first, third);
}

#[test]
fn checksum_and_signature_validate() {
    let bytes = build_dex(&sample_classes(), DexFileOptions { api_level: 28 }).unwrap();
    assert_eq!(&bytes[..8], b"dex\n039\0");
    verify_signature(&bytes).expect("signature covers the body");
    verify_checksum(&bytes).expect("checksum covers signature and body");

    let image = read_dex(&bytes).unwrap();
    assert_eq!(image.header.file_size as usize, bytes.len());
    assert_eq!(image.header.header_size, 0x70);
    assert_eq!(image.header.data_off + image.header.data_size, bytes.len() as u32);
}

#[test]
fn line_table_decodes_to_two_observations() {
    let bytes = build_dex(&sample_classes(), DexFileOptions::default()).unwrap();
    let image = read_dex(&bytes).unwrap();
    let main = find(&image.classes, "Lcom/example/Main;");
    let method = main.methods.iter().find(|m| m.name == "main").unwrap();
    let implementation = method.implementation.as_ref().unwrap();

    let lines: Vec<(u32, u32)> = implementation
        .debug_items
        .iter()
        .filter_map(|item| match item {
            DebugItem::LineNumber { address, line } => Some((*address, *line)),
            _ => None,
        })
        .collect();
    assert_eq!(lines, vec![(0, 10), (4, 12)]);
    assert_eq!(method.parameters[0].name.as_deref(), Some("args"));
}

#[test]
fn static_values_stop_after_the_last_initializer() {
    let bytes = build_dex(&sample_classes(), DexFileOptions::default()).unwrap();
    let image = read_dex(&bytes).unwrap();
    let main = find(&image.classes, "Lcom/example/Main;");

    let statics: Vec<(&str, Option<&EncodedValue>)> = main
        .fields
        .iter()
        .filter(|f| f.is_static())
        .map(|f| (f.name.as_str(), f.initial_value.as_ref()))
        .collect();
    assert_eq!(
        statics,
        vec![("a", Some(&EncodedValue::Int(0))), ("b", Some(&EncodedValue::Int(5))), ("tag", None)]
    );
}

#[test]
fn catch_all_follows_typed_handlers() {
    let bytes = build_dex(&sample_classes(), DexFileOptions::default()).unwrap();
    let image = read_dex(&bytes).unwrap();
    let main = find(&image.classes, "Lcom/example/Main;");
    let method = main.methods.iter().find(|m| m.name == "main").unwrap();
    let handlers = &method.implementation.as_ref().unwrap().try_blocks[0].handlers;

    assert_eq!(handlers.len(), 2);
    assert_eq!(handlers[0].exception_type.as_deref(), Some("Ljava/lang/RuntimeException;"));
    assert_eq!(handlers[1].exception_type, None);
}

#[test]
fn abstract_methods_have_no_code() {
    let bytes = build_dex(&[greeter()], DexFileOptions::default()).unwrap();
    let image = read_dex(&bytes).unwrap();
    assert_eq!(image.classes[0].methods[0].implementation, None);
}

#[test]
fn invalid_models_are_rejected_with_context() {
    let mut dex = DexFile::new(DexFileOptions::default());
    dex.intern_class(&parent()).unwrap();
    let err = dex.intern_class(&parent()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidModel);
    assert_eq!(dex.class_count(), 1);

    let mut broken = ClassDef::new("Lcom/example/Broken;", AccessFlags::PUBLIC, Some(OBJECT));
    let mut method = constructor(OBJECT);
    method.implementation = Some(MethodImplementation {
        register_count: 1,
        try_blocks: vec![TryBlock { start_address: 0, code_unit_count: 1, handlers: vec![] }],
        ..Default::default()
    });
    broken.methods.push(method);
    let err = build_dex(&[broken], DexFileOptions::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidModel);
    assert!(err.to_string().contains("class Lcom/example/Broken;"), "missing context in {}", err);
}

#[test]
fn supertype_cycles_are_rejected() {
    let a = ClassDef::new("Lcom/example/A;", AccessFlags::PUBLIC, Some("Lcom/example/B;"));
    let b = ClassDef::new("Lcom/example/B;", AccessFlags::PUBLIC, Some("Lcom/example/A;"));
    let err = build_dex(&[a, b], DexFileOptions::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidModel);
}

#[test]
fn try_blocks_need_handlers() {
    let mut class = ClassDef::new("Lcom/example/Empty;", AccessFlags::PUBLIC, Some(OBJECT));
    let mut method = Method::new("run", &[], "V", AccessFlags::PUBLIC | AccessFlags::STATIC);
    method.implementation = Some(MethodImplementation {
        register_count: 0,
        instructions: vec![return_void(), return_void()],
        try_blocks: vec![TryBlock { start_address: 0, code_unit_count: 1, handlers: vec![] }],
        ..Default::default()
    });
    class.methods.push(method);
    let err = build_dex(&[class], DexFileOptions::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidModel);
}

#[test]
fn const_string_past_16_bit_indices_becomes_jumbo() {
    let mut class = ClassDef::new("Lcom/example/J;", AccessFlags::PUBLIC, Some(OBJECT));
    // enough names that "zzzz" sorts above index 0xFFFF
    class.fields = (0..70_000).map(|i| Field::new(&format!("f{:05}", i), "I", AccessFlags::PUBLIC)).collect();

    let mut method = Method::new("run", &[], "V", AccessFlags::PUBLIC | AccessFlags::STATIC);
    method.implementation = Some(MethodImplementation {
        register_count: 1,
        instructions: vec![
            Instruction::Format21c { opcode: op("const-string"), a: 0, reference: Reference::String("zzzz".to_string()) },
            Instruction::Format21t { opcode: op("if-eqz"), a: 0, offset: 3 },
            Instruction::Format10t { opcode: op("goto"), offset: -4 },
            return_void(),
        ],
        try_blocks: vec![TryBlock {
            start_address: 0,
            code_unit_count: 5,
            handlers: vec![ExceptionHandler { exception_type: None, handler_address: 5 }],
        }],
        debug_items: vec![DebugItem::LineNumber { address: 0, line: 1 }, DebugItem::LineNumber { address: 5, line: 2 }],
    });
    class.methods.push(method);

    let bytes = build_dex(&[class], DexFileOptions::default()).expect("jumbo string is encodable");
    let image = read_dex(&bytes).unwrap();
    let implementation = image.classes[0].methods[0].implementation.as_ref().unwrap();

    assert_eq!(
        implementation.instructions,
        vec![
            Instruction::Format31c {
                opcode: op("const-string/jumbo"),
                a: 0,
                reference: Reference::String("zzzz".to_string()),
            },
            Instruction::Format21t { opcode: op("if-eqz"), a: 0, offset: 3 },
            Instruction::Format10t { opcode: op("goto"), offset: -5 },
            return_void(),
        ]
    );
    let try_block = &implementation.try_blocks[0];
    assert_eq!((try_block.start_address, try_block.code_unit_count), (0, 6));
    assert_eq!(try_block.handlers[0].handler_address, 6);
    assert_eq!(
        implementation.debug_items,
        vec![DebugItem::LineNumber { address: 0, line: 1 }, DebugItem::LineNumber { address: 6, line: 2 }]
    );
}
