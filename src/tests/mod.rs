#[cfg(test)]
mod round_trip;
#[cfg(test)]
mod layout;

#[cfg(test)]
mod fixtures {
    use crate::dex::instructions::{Instruction, Reference};
    use crate::dex::opcodes::{opcode_by_name, Opcode};
    use crate::types::{
        AccessFlags, Annotation, AnnotationVisibility, ClassDef, DebugItem, EncodedValue, ExceptionHandler, Field,
        FieldReference, Method, MethodImplementation, MethodParameter, MethodReference, TryBlock,
    };

    pub const OBJECT: &str = "Ljava/lang/Object;";

    pub fn op(name: &str) -> &'static Opcode {
        opcode_by_name(name).unwrap()
    }

    pub fn return_void() -> Instruction {
        Instruction::Format10x { opcode: op("return-void") }
    }

    pub fn invoke(name: &str, registers: Vec<u8>, method: MethodReference) -> Instruction {
        Instruction::Format35c { opcode: op(name), registers, reference: Reference::Method(method) }
    }

    pub fn println() -> MethodReference {
        MethodReference::new("Ljava/io/PrintStream;", "println", &["Ljava/lang/String;"], "V")
    }

    pub fn constructor(superclass: &str) -> Method {
        let mut method = Method::new("<init>", &[], "V", AccessFlags::PUBLIC | AccessFlags::CONSTRUCTOR);
        method.implementation = Some(MethodImplementation {
            register_count: 1,
            instructions: vec![
                invoke("invoke-direct", vec![0], MethodReference::new(superclass, "<init>", &[], "V")),
                return_void(),
            ],
            ..Default::default()
        });
        method
    }

    /// `static main(String[] args)`: prints a string inside a try block, with a line table and one local.
    pub fn main_method() -> Method {
        let mut method = Method::new("main", &[], "V", AccessFlags::PUBLIC | AccessFlags::STATIC);
        method.parameters = vec![MethodParameter::named("[Ljava/lang/String;", "args")];
        method.implementation = Some(MethodImplementation {
            register_count: 3,
            instructions: vec![
                Instruction::Format21c {
                    opcode: op("sget-object"),
                    a: 0,
                    reference: Reference::Field(FieldReference::new("Ljava/lang/System;", "out", "Ljava/io/PrintStream;")),
                },
                Instruction::Format21c { opcode: op("const-string"), a: 1, reference: Reference::String("hello".to_string()) },
                invoke("invoke-virtual", vec![0, 1], println()),
                return_void(),
            ],
            try_blocks: vec![TryBlock {
                start_address: 0,
                code_unit_count: 7,
                handlers: vec![
                    ExceptionHandler { exception_type: Some("Ljava/lang/RuntimeException;".to_string()), handler_address: 7 },
                    ExceptionHandler { exception_type: None, handler_address: 7 },
                ],
            }],
            debug_items: vec![
                DebugItem::LineNumber { address: 0, line: 10 },
                DebugItem::StartLocal {
                    address: 2,
                    register: 1,
                    name: Some("message".to_string()),
                    local_type: Some("Ljava/lang/String;".to_string()),
                    signature: None,
                },
                DebugItem::LineNumber { address: 4, line: 12 },
                DebugItem::EndLocal { address: 7, register: 1 },
            ],
        });
        method
    }

    pub fn greeter() -> ClassDef {
        let flags = AccessFlags::PUBLIC | AccessFlags::INTERFACE | AccessFlags::ABSTRACT;
        let mut class = ClassDef::new("Lcom/example/Greeter;", flags, Some(OBJECT));
        class.methods.push(Method::new(
            "greet",
            &["Ljava/lang/String;"],
            "Ljava/lang/String;",
            AccessFlags::PUBLIC | AccessFlags::ABSTRACT,
        ));
        class
    }

    pub fn parent() -> ClassDef {
        let mut class = ClassDef::new("Lcom/example/Parent;", AccessFlags::PUBLIC, Some(OBJECT));
        class.methods.push(constructor(OBJECT));
        class
    }

    /// Subclass of `Parent` implementing `Greeter`, with static initializers and annotations
    /// on the class, a field, a method and a parameter.
    pub fn main_class() -> ClassDef {
        let mut class = ClassDef::new("Lcom/example/Main;", AccessFlags::PUBLIC, Some("Lcom/example/Parent;"));
        class.interfaces = vec!["Lcom/example/Greeter;".to_string()];
        class.source_file = Some("Main.java".to_string());
        class.annotations = vec![Annotation::new(AnnotationVisibility::Runtime, "Lcom/example/Marker;")
            .with_element("value", EncodedValue::String("main".to_string()))];

        let static_final = AccessFlags::PUBLIC | AccessFlags::STATIC | AccessFlags::FINAL;
        let mut a = Field::new("a", "I", static_final);
        a.initial_value = Some(EncodedValue::Int(0));
        let mut b = Field::new("b", "I", static_final);
        b.initial_value = Some(EncodedValue::Int(5));
        let tag = Field::new("tag", "Ljava/lang/String;", AccessFlags::PRIVATE | AccessFlags::STATIC);
        let mut count = Field::new("count", "J", AccessFlags::PRIVATE);
        count.annotations = vec![Annotation::new(AnnotationVisibility::Build, "Lcom/example/Counter;")];
        class.fields = vec![a, b, tag, count];

        let mut greet = Method::new("greet", &["Ljava/lang/String;"], "Ljava/lang/String;", AccessFlags::PUBLIC);
        greet.annotations = vec![Annotation::new(AnnotationVisibility::System, "Ldalvik/annotation/Throws;")
            .with_element("value", EncodedValue::Array(vec![EncodedValue::Type("Ljava/io/IOException;".to_string())]))];
        greet.parameters[0].annotations = vec![Annotation::new(AnnotationVisibility::Build, "Lcom/example/NotNull;")];
        greet.implementation = Some(MethodImplementation {
            register_count: 2,
            instructions: vec![Instruction::Format11x { opcode: op("return-object"), a: 1 }],
            ..Default::default()
        });

        class.methods = vec![constructor("Lcom/example/Parent;"), main_method(), greet];
        class
    }

    pub fn sample_classes() -> Vec<ClassDef> {
        vec![main_class(), greeter(), parent()]
    }
}
