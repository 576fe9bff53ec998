//! The Dalvik opcode table.
//!
//! Only the standard opcodes that every container version understands are listed, together
//! with the three payload pseudo-opcodes. Values never vary with the target api level.

use std::collections::HashMap;

use bitflags::bitflags;
use once_cell::sync::Lazy;

/// Represents different types of references used by opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceType {
    None,
    String,
    Type,
    Field,
    Method,
}

// Defines various flags that can be associated with an opcode.
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpcodeFlags: u32 {
        const CAN_THROW = 0x1;
        const CAN_CONTINUE = 0x4;
        const SETS_RESULT = 0x8;
        const SETS_REGISTER = 0x10;
        const SETS_WIDE_REGISTER = 0x20;
        const STATIC_INVOKE = 0x40;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Format10t,
    Format10x,
    Format11n,
    Format11x,
    Format12x,
    Format20t,
    Format21c,
    Format21ih,
    Format21lh,
    Format21s,
    Format21t,
    Format22b,
    Format22c,
    Format22s,
    Format22t,
    Format22x,
    Format23x,
    Format30t,
    Format31c,
    Format31i,
    Format31t,
    Format32x,
    Format35c,
    Format3rc,
    Format51l,
    ArrayPayload,
    PackedSwitchPayload,
    SparseSwitchPayload,
}

impl Format {
    /// Size in 16-bit code units, or `None` for payloads whose size depends on their content.
    pub const fn code_units(&self) -> Option<usize> {
        match self {
            Format::Format10t
            | Format::Format10x
            | Format::Format11n
            | Format::Format11x
            | Format::Format12x => Some(1),

            Format::Format20t
            | Format::Format21c
            | Format::Format21ih
            | Format::Format21lh
            | Format::Format21s
            | Format::Format21t
            | Format::Format22b
            | Format::Format22c
            | Format::Format22s
            | Format::Format22t
            | Format::Format22x
            | Format::Format23x => Some(2),

            Format::Format30t
            | Format::Format31c
            | Format::Format31i
            | Format::Format31t
            | Format::Format32x
            | Format::Format35c
            | Format::Format3rc => Some(3),

            Format::Format51l => Some(5),

            Format::ArrayPayload
            | Format::PackedSwitchPayload
            | Format::SparseSwitchPayload => None,
        }
    }

    /// Indicates whether the format is a payload format.
    pub const fn is_payload_format(&self) -> bool {
        matches!(
            self,
            Format::ArrayPayload | Format::PackedSwitchPayload | Format::SparseSwitchPayload
        )
    }
}

/// Represents an opcode with its associated properties.
#[derive(Debug)]
pub struct Opcode {
    pub value: u16,
    pub name: &'static str,
    pub reference_type: ReferenceType,
    pub format: Format,
    pub flags: OpcodeFlags,
}

impl PartialEq for Opcode {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Eq for Opcode {}

impl Opcode {
    const fn new(value: u16, name: &'static str, reference_type: ReferenceType, format: Format, flags: OpcodeFlags) -> Self {
        Opcode { value, name, reference_type, format, flags }
    }

    /// Determines if the opcode can throw an exception.
    pub fn can_throw(&self) -> bool {
        self.flags.contains(OpcodeFlags::CAN_THROW)
    }

    /// Determines if execution can continue to the next instruction.
    pub fn can_continue(&self) -> bool {
        self.flags.contains(OpcodeFlags::CAN_CONTINUE)
    }

    /// Determines if the opcode sets the "hidden" result register.
    pub fn sets_result(&self) -> bool {
        self.flags.contains(OpcodeFlags::SETS_RESULT)
    }

    pub fn sets_register(&self) -> bool {
        self.flags.contains(OpcodeFlags::SETS_REGISTER)
    }

    pub fn sets_wide_register(&self) -> bool {
        self.flags.contains(OpcodeFlags::SETS_WIDE_REGISTER)
    }

    /// A static invoke passes no receiver, which matters for the outgoing register count.
    pub fn is_static_invoke(&self) -> bool {
        self.flags.contains(OpcodeFlags::STATIC_INVOKE)
    }
}

const NONE: OpcodeFlags = OpcodeFlags::empty();
const CONT: OpcodeFlags = OpcodeFlags::CAN_CONTINUE;
const SET: OpcodeFlags = OpcodeFlags::CAN_CONTINUE.union(OpcodeFlags::SETS_REGISTER);
const SET_WIDE: OpcodeFlags = SET.union(OpcodeFlags::SETS_WIDE_REGISTER);
const THROW: OpcodeFlags = OpcodeFlags::CAN_THROW;
const THROW_CONT: OpcodeFlags = OpcodeFlags::CAN_THROW.union(OpcodeFlags::CAN_CONTINUE);
const THROW_SET: OpcodeFlags = THROW_CONT.union(OpcodeFlags::SETS_REGISTER);
const THROW_SET_WIDE: OpcodeFlags = THROW_SET.union(OpcodeFlags::SETS_WIDE_REGISTER);
const INVOKE: OpcodeFlags = THROW_CONT.union(OpcodeFlags::SETS_RESULT);
const INVOKE_STATIC: OpcodeFlags = INVOKE.union(OpcodeFlags::STATIC_INVOKE);

// Array, instance and static accessors share one suffix order
const ACCESSOR_SUFFIXES: [&str; 7] = ["", "-wide", "-object", "-boolean", "-byte", "-char", "-short"];

const UNARY_OPS: [(&str, bool); 21] = [
    ("neg-int", false),
    ("not-int", false),
    ("neg-long", true),
    ("not-long", true),
    ("neg-float", false),
    ("neg-double", true),
    ("int-to-long", true),
    ("int-to-float", false),
    ("int-to-double", true),
    ("long-to-int", false),
    ("long-to-float", false),
    ("long-to-double", true),
    ("float-to-int", false),
    ("float-to-long", true),
    ("float-to-double", true),
    ("double-to-int", false),
    ("double-to-long", true),
    ("double-to-float", false),
    ("int-to-byte", false),
    ("int-to-char", false),
    ("int-to-short", false),
];

// (operation, result type, throws); integer division by zero throws
const BINARY_OPS: [(&str, &str, bool); 32] = [
    ("add", "int", false),
    ("sub", "int", false),
    ("mul", "int", false),
    ("div", "int", true),
    ("rem", "int", true),
    ("and", "int", false),
    ("or", "int", false),
    ("xor", "int", false),
    ("shl", "int", false),
    ("shr", "int", false),
    ("ushr", "int", false),
    ("add", "long", false),
    ("sub", "long", false),
    ("mul", "long", false),
    ("div", "long", true),
    ("rem", "long", true),
    ("and", "long", false),
    ("or", "long", false),
    ("xor", "long", false),
    ("shl", "long", false),
    ("shr", "long", false),
    ("ushr", "long", false),
    ("add", "float", false),
    ("sub", "float", false),
    ("mul", "float", false),
    ("div", "float", false),
    ("rem", "float", false),
    ("add", "double", false),
    ("sub", "double", false),
    ("mul", "double", false),
    ("div", "double", false),
    ("rem", "double", false),
];

const LIT16_OPS: [&str; 8] = ["add-int/lit16", "rsub-int", "mul-int/lit16", "div-int/lit16", "rem-int/lit16", "and-int/lit16", "or-int/lit16", "xor-int/lit16"];

const LIT8_OPS: [&str; 11] = [
    "add-int/lit8", "rsub-int/lit8", "mul-int/lit8", "div-int/lit8", "rem-int/lit8", "and-int/lit8",
    "or-int/lit8", "xor-int/lit8", "shl-int/lit8", "shr-int/lit8", "ushr-int/lit8",
];

const TEST_SUFFIXES: [&str; 6] = ["eq", "ne", "lt", "ge", "gt", "le"];

const INVOKE_KINDS: [&str; 5] = ["virtual", "super", "direct", "static", "interface"];

// Generated names must live as long as the table
fn leak(name: String) -> &'static str {
    Box::leak(name.into_boxed_str())
}

pub static OPCODES: Lazy<Vec<Opcode>> = Lazy::new(|| {
    use Format::*;
    use ReferenceType as R;

    let mut ops = vec![
        Opcode::new(0x00, "nop", R::None, Format10x, CONT),
        Opcode::new(0x01, "move", R::None, Format12x, SET),
        Opcode::new(0x02, "move/from16", R::None, Format22x, SET),
        Opcode::new(0x03, "move/16", R::None, Format32x, SET),
        Opcode::new(0x04, "move-wide", R::None, Format12x, SET_WIDE),
        Opcode::new(0x05, "move-wide/from16", R::None, Format22x, SET_WIDE),
        Opcode::new(0x06, "move-wide/16", R::None, Format32x, SET_WIDE),
        Opcode::new(0x07, "move-object", R::None, Format12x, SET),
        Opcode::new(0x08, "move-object/from16", R::None, Format22x, SET),
        Opcode::new(0x09, "move-object/16", R::None, Format32x, SET),
        Opcode::new(0x0a, "move-result", R::None, Format11x, SET),
        Opcode::new(0x0b, "move-result-wide", R::None, Format11x, SET_WIDE),
        Opcode::new(0x0c, "move-result-object", R::None, Format11x, SET),
        Opcode::new(0x0d, "move-exception", R::None, Format11x, SET),
        Opcode::new(0x0e, "return-void", R::None, Format10x, NONE),
        Opcode::new(0x0f, "return", R::None, Format11x, NONE),
        Opcode::new(0x10, "return-wide", R::None, Format11x, NONE),
        Opcode::new(0x11, "return-object", R::None, Format11x, NONE),
        Opcode::new(0x12, "const/4", R::None, Format11n, SET),
        Opcode::new(0x13, "const/16", R::None, Format21s, SET),
        Opcode::new(0x14, "const", R::None, Format31i, SET),
        Opcode::new(0x15, "const/high16", R::None, Format21ih, SET),
        Opcode::new(0x16, "const-wide/16", R::None, Format21s, SET_WIDE),
        Opcode::new(0x17, "const-wide/32", R::None, Format31i, SET_WIDE),
        Opcode::new(0x18, "const-wide", R::None, Format51l, SET_WIDE),
        Opcode::new(0x19, "const-wide/high16", R::None, Format21lh, SET_WIDE),
        Opcode::new(0x1a, "const-string", R::String, Format21c, THROW_SET),
        Opcode::new(0x1b, "const-string/jumbo", R::String, Format31c, THROW_SET),
        Opcode::new(0x1c, "const-class", R::Type, Format21c, THROW_SET),
        Opcode::new(0x1d, "monitor-enter", R::None, Format11x, THROW_CONT),
        Opcode::new(0x1e, "monitor-exit", R::None, Format11x, THROW_CONT),
        Opcode::new(0x1f, "check-cast", R::Type, Format21c, THROW_SET),
        Opcode::new(0x20, "instance-of", R::Type, Format22c, THROW_SET),
        Opcode::new(0x21, "array-length", R::None, Format12x, THROW_SET),
        Opcode::new(0x22, "new-instance", R::Type, Format21c, THROW_SET),
        Opcode::new(0x23, "new-array", R::Type, Format22c, THROW_SET),
        Opcode::new(0x24, "filled-new-array", R::Type, Format35c, INVOKE),
        Opcode::new(0x25, "filled-new-array/range", R::Type, Format3rc, INVOKE),
        Opcode::new(0x26, "fill-array-data", R::None, Format31t, CONT),
        Opcode::new(0x27, "throw", R::None, Format11x, THROW),
        Opcode::new(0x28, "goto", R::None, Format10t, NONE),
        Opcode::new(0x29, "goto/16", R::None, Format20t, NONE),
        Opcode::new(0x2a, "goto/32", R::None, Format30t, NONE),
        Opcode::new(0x2b, "packed-switch", R::None, Format31t, CONT),
        Opcode::new(0x2c, "sparse-switch", R::None, Format31t, CONT),
        Opcode::new(0x2d, "cmpl-float", R::None, Format23x, SET),
        Opcode::new(0x2e, "cmpg-float", R::None, Format23x, SET),
        Opcode::new(0x2f, "cmpl-double", R::None, Format23x, SET),
        Opcode::new(0x30, "cmpg-double", R::None, Format23x, SET),
        Opcode::new(0x31, "cmp-long", R::None, Format23x, SET),
    ];

    for (i, test) in TEST_SUFFIXES.iter().enumerate() {
        ops.push(Opcode::new(0x32 + i as u16, leak(format!("if-{}", test)), R::None, Format22t, CONT));
    }
    for (i, test) in TEST_SUFFIXES.iter().enumerate() {
        ops.push(Opcode::new(0x38 + i as u16, leak(format!("if-{}z", test)), R::None, Format21t, CONT));
    }

    // aget* 0x44, aput* 0x4b, iget* 0x52, iput* 0x59, sget* 0x60, sput* 0x67
    let accessors = [
        ("aget", 0x44, R::None, Format23x, true),
        ("aput", 0x4b, R::None, Format23x, false),
        ("iget", 0x52, R::Field, Format22c, true),
        ("iput", 0x59, R::Field, Format22c, false),
        ("sget", 0x60, R::Field, Format21c, true),
        ("sput", 0x67, R::Field, Format21c, false),
    ];
    for (prefix, base, reference_type, format, is_get) in accessors {
        for (i, suffix) in ACCESSOR_SUFFIXES.iter().enumerate() {
            let flags = match (is_get, i) {
                (true, 1) => THROW_SET_WIDE,
                (true, _) => THROW_SET,
                (false, _) => THROW_CONT,
            };
            ops.push(Opcode::new(base + i as u16, leak(format!("{}{}", prefix, suffix)), reference_type, format, flags));
        }
    }

    for (i, kind) in INVOKE_KINDS.into_iter().enumerate() {
        let flags = if kind == "static" { INVOKE_STATIC } else { INVOKE };
        ops.push(Opcode::new(0x6e + i as u16, leak(format!("invoke-{}", kind)), R::Method, Format35c, flags));
        ops.push(Opcode::new(0x74 + i as u16, leak(format!("invoke-{}/range", kind)), R::Method, Format3rc, flags));
    }

    for (i, (name, wide)) in UNARY_OPS.into_iter().enumerate() {
        let flags = if wide { SET_WIDE } else { SET };
        ops.push(Opcode::new(0x7b + i as u16, name, R::None, Format12x, flags));
    }

    for (i, (op, ty, throws)) in BINARY_OPS.into_iter().enumerate() {
        let mut flags = if ty == "long" || ty == "double" { SET_WIDE } else { SET };
        if throws {
            flags |= OpcodeFlags::CAN_THROW;
        }
        ops.push(Opcode::new(0x90 + i as u16, leak(format!("{}-{}", op, ty)), R::None, Format23x, flags));
        ops.push(Opcode::new(0xb0 + i as u16, leak(format!("{}-{}/2addr", op, ty)), R::None, Format12x, flags));
    }

    for (i, name) in LIT16_OPS.into_iter().enumerate() {
        let flags = if name.starts_with("div") || name.starts_with("rem") { THROW_SET } else { SET };
        ops.push(Opcode::new(0xd0 + i as u16, name, R::None, Format22s, flags));
    }
    for (i, name) in LIT8_OPS.into_iter().enumerate() {
        let flags = if name.starts_with("div") || name.starts_with("rem") { THROW_SET } else { SET };
        ops.push(Opcode::new(0xd8 + i as u16, name, R::None, Format22b, flags));
    }

    ops.push(Opcode::new(0x100, "packed-switch-payload", R::None, PackedSwitchPayload, NONE));
    ops.push(Opcode::new(0x200, "sparse-switch-payload", R::None, SparseSwitchPayload, NONE));
    ops.push(Opcode::new(0x300, "array-payload", R::None, ArrayPayload, NONE));

    ops.sort_by_key(|o| o.value);
    ops
});

static BY_VALUE: Lazy<HashMap<u16, &'static Opcode>> =
    Lazy::new(|| OPCODES.iter().map(|o| (o.value, o)).collect());

static BY_NAME: Lazy<HashMap<&'static str, &'static Opcode>> =
    Lazy::new(|| OPCODES.iter().map(|o| (o.name, o)).collect());

/// Looks up an opcode by its value; payload pseudo-opcodes use their full 16-bit ident.
pub fn opcode_by_value(value: u16) -> Option<&'static Opcode> {
    BY_VALUE.get(&value).copied()
}

/// Looks up an opcode by its mnemonic, e.g. `invoke-static/range`.
pub fn opcode_by_name(name: &str) -> Option<&'static Opcode> {
    BY_NAME.get(name).copied()
}
