/* In-memory class model consumed by the dex encoder */
/* Types are stored in descriptor (JNI) form e.g. Ljava/lang/Object; */

use std::cmp::Ordering;
use std::fmt;

use bitflags::bitflags;

use crate::dex::instructions::Instruction;

bitflags! {
    /// Access flags for classes, fields and methods.
    ///
    /// # Examples
    ///
    /// ```
    ///  use dexwriter::types::AccessFlags;
    ///
    ///  let f = AccessFlags::PUBLIC | AccessFlags::STATIC;
    ///  assert_eq!(f.bits(), 0x9);
    /// ```
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct AccessFlags: u32 {
        const PUBLIC = 0x1;
        const PRIVATE = 0x2;
        const PROTECTED = 0x4;
        const STATIC = 0x8;
        const FINAL = 0x10;
        const SYNCHRONIZED = 0x20;
        const VOLATILE = 0x40;
        const BRIDGE = 0x40;
        const TRANSIENT = 0x80;
        const VARARGS = 0x80;
        const NATIVE = 0x100;
        const INTERFACE = 0x200;
        const ABSTRACT = 0x400;
        const STRICT = 0x800;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
        const CONSTRUCTOR = 0x10000;
        const DECLARED_SYNCHRONIZED = 0x20000;
    }
}

/// True for the two primitive types that take a register pair.
pub fn is_wide_type(descriptor: &str) -> bool {
    descriptor == "J" || descriptor == "D"
}

/// Registers needed to hold `parameters`, plus the receiver unless `is_static`.
pub fn parameter_register_count<S: AsRef<str>>(parameters: &[S], is_static: bool) -> u32 {
    let receiver = if is_static { 0 } else { 1 };
    parameters
        .iter()
        .map(|p| if is_wide_type(p.as_ref()) { 2 } else { 1 })
        .sum::<u32>()
        + receiver
}

/// A reference to a field, possibly in another container.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldReference {
    pub defining_class: String,
    pub name: String,
    pub field_type: String,
}

impl FieldReference {
    pub fn new(defining_class: &str, name: &str, field_type: &str) -> Self {
        FieldReference {
            defining_class: defining_class.to_string(),
            name: name.to_string(),
            field_type: field_type.to_string(),
        }
    }
}

impl fmt::Display for FieldReference {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}->{}:{}", self.defining_class, self.name, self.field_type)
    }
}

/// A reference to a method, possibly in another container.
///
/// # Examples
///
/// ```
///  use dexwriter::types::MethodReference;
///
///  let m = MethodReference::new("Ljava/io/PrintStream;", "println", &["Ljava/lang/String;"], "V");
///  assert_eq!(m.to_string(), "Ljava/io/PrintStream;->println(Ljava/lang/String;)V");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MethodReference {
    pub defining_class: String,
    pub name: String,
    pub parameters: Vec<String>,
    pub return_type: String,
}

impl MethodReference {
    pub fn new(defining_class: &str, name: &str, parameters: &[&str], return_type: &str) -> Self {
        MethodReference {
            defining_class: defining_class.to_string(),
            name: name.to_string(),
            parameters: parameters.iter().map(|p| p.to_string()).collect(),
            return_type: return_type.to_string(),
        }
    }
}

impl fmt::Display for MethodReference {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}->{}({}){}", self.defining_class, self.name, self.parameters.concat(), self.return_type)
    }
}

/// Simple enum to represent annotation visibility: build, runtime, system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AnnotationVisibility {
    Build = 0,
    Runtime = 1,
    System = 2,
}

impl AnnotationVisibility {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(AnnotationVisibility::Build),
            1 => Some(AnnotationVisibility::Runtime),
            2 => Some(AnnotationVisibility::System),
            _ => None,
        }
    }
}

/// Name, value pair for annotation elements.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct AnnotationElement {
    pub name: String,
    pub value: EncodedValue,
}

/// An annotation nested inside an encoded value; it has no visibility of its own.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct EncodedAnnotation {
    pub annotation_type: String,
    pub elements: Vec<AnnotationElement>,
}

/// Annotation attached to a class, field, method or parameter.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Annotation {
    pub visibility: AnnotationVisibility,
    pub annotation_type: String,
    pub elements: Vec<AnnotationElement>,
}

impl Annotation {
    pub fn new(visibility: AnnotationVisibility, annotation_type: &str) -> Self {
        Annotation {
            visibility,
            annotation_type: annotation_type.to_string(),
            elements: vec![],
        }
    }

    pub fn with_element(mut self, name: &str, value: EncodedValue) -> Self {
        self.elements.push(AnnotationElement { name: name.to_string(), value });
        self
    }
}

/// Constant values used by field initializers and annotation elements.
///
/// Floating point values compare by their total order so that values can be used as
/// interning keys: `-0.0` and `0.0` are distinct, and equal NaN bit patterns are equal.
#[derive(Debug, Clone)]
pub enum EncodedValue {
    Byte(i8),
    Short(i16),
    Char(u16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Type(String),
    Field(FieldReference),
    Method(MethodReference),
    Enum(FieldReference),
    Array(Vec<EncodedValue>),
    Annotation(EncodedAnnotation),
    Null,
    Boolean(bool),
}

impl EncodedValue {
    /// The implicit value a field of type `descriptor` holds when it has no initializer.
    pub fn default_for(descriptor: &str) -> EncodedValue {
        match descriptor {
            "Z" => EncodedValue::Boolean(false),
            "B" => EncodedValue::Byte(0),
            "S" => EncodedValue::Short(0),
            "C" => EncodedValue::Char(0),
            "I" => EncodedValue::Int(0),
            "J" => EncodedValue::Long(0),
            "F" => EncodedValue::Float(0.0),
            "D" => EncodedValue::Double(0.0),
            _ => EncodedValue::Null,
        }
    }

    pub fn is_default_for(&self, descriptor: &str) -> bool {
        *self == EncodedValue::default_for(descriptor)
    }

    // Value type tag, which is also the primary sort key
    pub(crate) fn value_type(&self) -> u8 {
        use crate::dex::writer::*;
        match self {
            EncodedValue::Byte(_) => VALUE_BYTE,
            EncodedValue::Short(_) => VALUE_SHORT,
            EncodedValue::Char(_) => VALUE_CHAR,
            EncodedValue::Int(_) => VALUE_INT,
            EncodedValue::Long(_) => VALUE_LONG,
            EncodedValue::Float(_) => VALUE_FLOAT,
            EncodedValue::Double(_) => VALUE_DOUBLE,
            EncodedValue::String(_) => VALUE_STRING,
            EncodedValue::Type(_) => VALUE_TYPE,
            EncodedValue::Field(_) => VALUE_FIELD,
            EncodedValue::Method(_) => VALUE_METHOD,
            EncodedValue::Enum(_) => VALUE_ENUM,
            EncodedValue::Array(_) => VALUE_ARRAY,
            EncodedValue::Annotation(_) => VALUE_ANNOTATION,
            EncodedValue::Null => VALUE_NULL,
            EncodedValue::Boolean(_) => VALUE_BOOLEAN,
        }
    }
}

impl Ord for EncodedValue {
    fn cmp(&self, other: &Self) -> Ordering {
        use EncodedValue::*;
        match (self, other) {
            (Byte(a), Byte(b)) => a.cmp(b),
            (Short(a), Short(b)) => a.cmp(b),
            (Char(a), Char(b)) => a.cmp(b),
            (Int(a), Int(b)) => a.cmp(b),
            (Long(a), Long(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (Double(a), Double(b)) => a.total_cmp(b),
            (String(a), String(b)) => a.cmp(b),
            (Type(a), Type(b)) => a.cmp(b),
            (Field(a), Field(b)) => a.cmp(b),
            (Method(a), Method(b)) => a.cmp(b),
            (Enum(a), Enum(b)) => a.cmp(b),
            (Array(a), Array(b)) => a.cmp(b),
            (Annotation(a), Annotation(b)) => a.cmp(b),
            (Null, Null) => Ordering::Equal,
            (Boolean(a), Boolean(b)) => a.cmp(b),
            _ => self.value_type().cmp(&other.value_type()),
        }
    }
}

impl PartialOrd for EncodedValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for EncodedValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for EncodedValue {}

/// Handler for one exception type, or any exception when `exception_type` is `None`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExceptionHandler {
    pub exception_type: Option<String>,
    pub handler_address: u32,
}

/// A protected code range and its ordered handlers. A catch-all handler, if any, comes last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryBlock {
    pub start_address: u32,
    pub code_unit_count: u16,
    pub handlers: Vec<ExceptionHandler>,
}

/// Debug events, each taking effect at a code address (in code units).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugItem {
    LineNumber { address: u32, line: u32 },
    StartLocal {
        address: u32,
        register: u32,
        name: Option<String>,
        local_type: Option<String>,
        signature: Option<String>,
    },
    EndLocal { address: u32, register: u32 },
    RestartLocal { address: u32, register: u32 },
    PrologueEnd { address: u32 },
    EpilogueBegin { address: u32 },
    SetSourceFile { address: u32, source_file: Option<String> },
}

impl DebugItem {
    pub fn address(&self) -> u32 {
        match self {
            DebugItem::LineNumber { address, .. }
            | DebugItem::StartLocal { address, .. }
            | DebugItem::EndLocal { address, .. }
            | DebugItem::RestartLocal { address, .. }
            | DebugItem::PrologueEnd { address }
            | DebugItem::EpilogueBegin { address }
            | DebugItem::SetSourceFile { address, .. } => *address,
        }
    }
}

/// Code of a concrete method.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MethodImplementation {
    pub register_count: u16,
    pub instructions: Vec<Instruction>,
    pub try_blocks: Vec<TryBlock>,
    pub debug_items: Vec<DebugItem>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodParameter {
    /// Type descriptor of the parameter
    pub param_type: String,
    /// Debug name, written into the method's debug info
    pub name: Option<String>,
    pub annotations: Vec<Annotation>,
}

impl MethodParameter {
    pub fn new(param_type: &str) -> Self {
        MethodParameter {
            param_type: param_type.to_string(),
            name: None,
            annotations: vec![],
        }
    }

    pub fn named(param_type: &str, name: &str) -> Self {
        MethodParameter {
            param_type: param_type.to_string(),
            name: Some(name.to_string()),
            annotations: vec![],
        }
    }
}

/// Struct representing a Java field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Field name
    pub name: String,
    /// Type descriptor
    pub field_type: String,
    pub access_flags: AccessFlags,
    /// Constant initializer, only meaningful for static fields
    pub initial_value: Option<EncodedValue>,
    pub annotations: Vec<Annotation>,
}

impl Field {
    pub fn new(name: &str, field_type: &str, access_flags: AccessFlags) -> Self {
        Field {
            name: name.to_string(),
            field_type: field_type.to_string(),
            access_flags,
            initial_value: None,
            annotations: vec![],
        }
    }

    pub fn is_static(&self) -> bool {
        self.access_flags.contains(AccessFlags::STATIC)
    }

    pub fn reference(&self, defining_class: &str) -> FieldReference {
        FieldReference::new(defining_class, &self.name, &self.field_type)
    }
}

/// Struct representing a Java method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Method {
    /// Method name
    pub name: String,
    pub parameters: Vec<MethodParameter>,
    /// Return type descriptor
    pub return_type: String,
    pub access_flags: AccessFlags,
    pub annotations: Vec<Annotation>,
    /// Code, absent for abstract and native methods
    pub implementation: Option<MethodImplementation>,
}

impl Method {
    pub fn new(name: &str, parameters: &[&str], return_type: &str, access_flags: AccessFlags) -> Self {
        Method {
            name: name.to_string(),
            parameters: parameters.iter().map(|p| MethodParameter::new(p)).collect(),
            return_type: return_type.to_string(),
            access_flags,
            annotations: vec![],
            implementation: None,
        }
    }

    pub fn is_static(&self) -> bool {
        self.access_flags.contains(AccessFlags::STATIC)
    }

    /// Direct methods are static, private or constructors; everything else is virtual.
    pub fn is_direct(&self) -> bool {
        self.access_flags
            .intersects(AccessFlags::STATIC | AccessFlags::PRIVATE | AccessFlags::CONSTRUCTOR)
    }

    pub fn parameter_types(&self) -> Vec<String> {
        self.parameters.iter().map(|p| p.param_type.clone()).collect()
    }

    pub fn reference(&self, defining_class: &str) -> MethodReference {
        MethodReference {
            defining_class: defining_class.to_string(),
            name: self.name.clone(),
            parameters: self.parameter_types(),
            return_type: self.return_type.clone(),
        }
    }
}

/// Struct representing a class to be written into a dex container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDef {
    /// Type descriptor of this class
    pub class_type: String,
    pub access_flags: AccessFlags,
    /// Superclass descriptor, absent only for java.lang.Object
    pub superclass: Option<String>,
    /// Implemented interfaces, in declaration order
    pub interfaces: Vec<String>,
    /// The source filename, if known
    pub source_file: Option<String>,
    /// Class level annotations
    pub annotations: Vec<Annotation>,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
}

impl ClassDef {
    pub fn new(class_type: &str, access_flags: AccessFlags, superclass: Option<&str>) -> Self {
        ClassDef {
            class_type: class_type.to_string(),
            access_flags,
            superclass: superclass.map(|s| s.to_string()),
            interfaces: vec![],
            source_file: None,
            annotations: vec![],
            fields: vec![],
            methods: vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_counts_account_for_wide_types() {
        assert_eq!(parameter_register_count(&["I", "J", "Ljava/lang/String;"], true), 4);
        assert_eq!(parameter_register_count(&["D"], false), 3);
        assert_eq!(parameter_register_count::<&str>(&[], false), 1);
    }

    #[test]
    fn defaults_follow_the_field_type() {
        assert!(EncodedValue::Int(0).is_default_for("I"));
        assert!(!EncodedValue::Int(5).is_default_for("I"));
        assert!(EncodedValue::Null.is_default_for("Ljava/lang/String;"));
        assert!(EncodedValue::Boolean(false).is_default_for("Z"));
        assert!(!EncodedValue::Float(-0.0).is_default_for("F"));
        assert!(!EncodedValue::String(String::new()).is_default_for("Ljava/lang/String;"));
    }

    #[test]
    fn values_order_by_type_then_content() {
        let mut values = vec![
            EncodedValue::Null,
            EncodedValue::Int(3),
            EncodedValue::Byte(9),
            EncodedValue::Int(-1),
            EncodedValue::Double(f64::NAN),
            EncodedValue::Double(1.5),
        ];
        values.sort();
        assert_eq!(values[0], EncodedValue::Byte(9));
        assert_eq!(values[1], EncodedValue::Int(-1));
        assert_eq!(values[2], EncodedValue::Int(3));
        assert_eq!(values[3], EncodedValue::Double(1.5));
        assert_eq!(values[4], EncodedValue::Double(f64::NAN));
        assert_eq!(values[5], EncodedValue::Null);
    }

    #[test]
    fn direct_methods() {
        let ctor = Method::new("<init>", &[], "V", AccessFlags::PUBLIC | AccessFlags::CONSTRUCTOR);
        let virt = Method::new("run", &[], "V", AccessFlags::PUBLIC);
        assert!(ctor.is_direct());
        assert!(!virt.is_direct());
    }
}
