//! Representation of the Dalvik bytecodes
//!
//! Each [`Instruction`] variant corresponds to one encoding format and carries the opcode it
//! was built for. Branch offsets are relative to the instruction, in code units, exactly as
//! they end up in the code item. Encoding never widens a branch: a value that does not fit its
//! slot fails with an `Encoding` error. The one rewrite, `const-string` to its jumbo form, is
//! done beforehand by `pools::code_layout`.

use crate::dex::error::DexError;
use crate::dex::opcodes::{opcode_by_value, Format, Opcode, ReferenceType};
use crate::types::{parameter_register_count, FieldReference, MethodReference};

/// Constant pool item an instruction refers to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Reference {
    String(String),
    Type(String),
    Field(FieldReference),
    Method(MethodReference),
}

impl Reference {
    pub fn reference_type(&self) -> ReferenceType {
        match self {
            Reference::String(_) => ReferenceType::String,
            Reference::Type(_) => ReferenceType::Type,
            Reference::Field(_) => ReferenceType::Field,
            Reference::Method(_) => ReferenceType::Method,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Instruction {
    Format10t { opcode: &'static Opcode, offset: i32 },
    Format10x { opcode: &'static Opcode },
    Format11n { opcode: &'static Opcode, a: u8, literal: i8 },
    Format11x { opcode: &'static Opcode, a: u8 },
    Format12x { opcode: &'static Opcode, a: u8, b: u8 },
    Format20t { opcode: &'static Opcode, offset: i32 },
    Format21c { opcode: &'static Opcode, a: u8, reference: Reference },
    /// `literal` holds the full 32-bit value; its low 16 bits must be zero.
    Format21ih { opcode: &'static Opcode, a: u8, literal: i32 },
    /// `literal` holds the full 64-bit value; its low 48 bits must be zero.
    Format21lh { opcode: &'static Opcode, a: u8, literal: i64 },
    Format21s { opcode: &'static Opcode, a: u8, literal: i16 },
    Format21t { opcode: &'static Opcode, a: u8, offset: i32 },
    Format22b { opcode: &'static Opcode, a: u8, b: u8, literal: i8 },
    Format22c { opcode: &'static Opcode, a: u8, b: u8, reference: Reference },
    Format22s { opcode: &'static Opcode, a: u8, b: u8, literal: i16 },
    Format22t { opcode: &'static Opcode, a: u8, b: u8, offset: i32 },
    Format22x { opcode: &'static Opcode, a: u8, b: u16 },
    Format23x { opcode: &'static Opcode, a: u8, b: u8, c: u8 },
    Format30t { opcode: &'static Opcode, offset: i32 },
    Format31c { opcode: &'static Opcode, a: u8, reference: Reference },
    Format31i { opcode: &'static Opcode, a: u8, literal: i32 },
    Format31t { opcode: &'static Opcode, a: u8, offset: i32 },
    Format32x { opcode: &'static Opcode, a: u16, b: u16 },
    Format35c { opcode: &'static Opcode, registers: Vec<u8>, reference: Reference },
    Format3rc { opcode: &'static Opcode, start_register: u16, register_count: u8, reference: Reference },
    Format51l { opcode: &'static Opcode, a: u8, literal: i64 },
    ArrayPayload { opcode: &'static Opcode, element_width: u16, elements: Vec<i64> },
    PackedSwitchPayload { opcode: &'static Opcode, first_key: i32, targets: Vec<i32> },
    SparseSwitchPayload { opcode: &'static Opcode, keys: Vec<i32>, targets: Vec<i32> },
}

impl Instruction {
    pub fn opcode(&self) -> &'static Opcode {
        match self {
            Instruction::Format10t { opcode, .. }
            | Instruction::Format10x { opcode }
            | Instruction::Format11n { opcode, .. }
            | Instruction::Format11x { opcode, .. }
            | Instruction::Format12x { opcode, .. }
            | Instruction::Format20t { opcode, .. }
            | Instruction::Format21c { opcode, .. }
            | Instruction::Format21ih { opcode, .. }
            | Instruction::Format21lh { opcode, .. }
            | Instruction::Format21s { opcode, .. }
            | Instruction::Format21t { opcode, .. }
            | Instruction::Format22b { opcode, .. }
            | Instruction::Format22c { opcode, .. }
            | Instruction::Format22s { opcode, .. }
            | Instruction::Format22t { opcode, .. }
            | Instruction::Format22x { opcode, .. }
            | Instruction::Format23x { opcode, .. }
            | Instruction::Format30t { opcode, .. }
            | Instruction::Format31c { opcode, .. }
            | Instruction::Format31i { opcode, .. }
            | Instruction::Format31t { opcode, .. }
            | Instruction::Format32x { opcode, .. }
            | Instruction::Format35c { opcode, .. }
            | Instruction::Format3rc { opcode, .. }
            | Instruction::Format51l { opcode, .. }
            | Instruction::ArrayPayload { opcode, .. }
            | Instruction::PackedSwitchPayload { opcode, .. }
            | Instruction::SparseSwitchPayload { opcode, .. } => opcode,
        }
    }

    /// The format this variant encodes, which must agree with the opcode's format.
    pub fn format(&self) -> Format {
        match self {
            Instruction::Format10t { .. } => Format::Format10t,
            Instruction::Format10x { .. } => Format::Format10x,
            Instruction::Format11n { .. } => Format::Format11n,
            Instruction::Format11x { .. } => Format::Format11x,
            Instruction::Format12x { .. } => Format::Format12x,
            Instruction::Format20t { .. } => Format::Format20t,
            Instruction::Format21c { .. } => Format::Format21c,
            Instruction::Format21ih { .. } => Format::Format21ih,
            Instruction::Format21lh { .. } => Format::Format21lh,
            Instruction::Format21s { .. } => Format::Format21s,
            Instruction::Format21t { .. } => Format::Format21t,
            Instruction::Format22b { .. } => Format::Format22b,
            Instruction::Format22c { .. } => Format::Format22c,
            Instruction::Format22s { .. } => Format::Format22s,
            Instruction::Format22t { .. } => Format::Format22t,
            Instruction::Format22x { .. } => Format::Format22x,
            Instruction::Format23x { .. } => Format::Format23x,
            Instruction::Format30t { .. } => Format::Format30t,
            Instruction::Format31c { .. } => Format::Format31c,
            Instruction::Format31i { .. } => Format::Format31i,
            Instruction::Format31t { .. } => Format::Format31t,
            Instruction::Format32x { .. } => Format::Format32x,
            Instruction::Format35c { .. } => Format::Format35c,
            Instruction::Format3rc { .. } => Format::Format3rc,
            Instruction::Format51l { .. } => Format::Format51l,
            Instruction::ArrayPayload { .. } => Format::ArrayPayload,
            Instruction::PackedSwitchPayload { .. } => Format::PackedSwitchPayload,
            Instruction::SparseSwitchPayload { .. } => Format::SparseSwitchPayload,
        }
    }

    /// Size of the encoded instruction in 16-bit code units.
    pub fn code_units(&self) -> usize {
        match self {
            Instruction::ArrayPayload { element_width, elements, .. } => {
                4 + (*element_width as usize * elements.len() + 1) / 2
            }
            Instruction::PackedSwitchPayload { targets, .. } => 4 + 2 * targets.len(),
            Instruction::SparseSwitchPayload { targets, .. } => 2 + 4 * targets.len(),
            _ => self.format().code_units().unwrap_or(0),
        }
    }

    pub fn reference(&self) -> Option<&Reference> {
        match self {
            Instruction::Format21c { reference, .. }
            | Instruction::Format22c { reference, .. }
            | Instruction::Format31c { reference, .. }
            | Instruction::Format35c { reference, .. }
            | Instruction::Format3rc { reference, .. } => Some(reference),
            _ => None,
        }
    }

    /// Registers a method call made by this instruction passes to its callee.
    pub(crate) fn outgoing_registers(&self) -> Option<u32> {
        match self.reference() {
            Some(Reference::Method(method)) => {
                Some(parameter_register_count(&method.parameters, self.opcode().is_static_invoke()))
            }
            _ => None,
        }
    }

    /// Checks the variant, the reference kind and the operand ranges, then produces the code
    /// units. `index_of` maps a reference to its pool index.
    pub(crate) fn encode<F>(&self, index_of: F) -> Result<Vec<u16>, DexError>
    where
        F: Fn(&Reference) -> Result<u32, DexError>,
    {
        let opcode = self.opcode();
        if opcode.format != self.format() {
            fail!(
                InvalidModel,
                "{} uses format {:?} but was given a {:?} instruction",
                opcode.name,
                opcode.format,
                self.format()
            );
        }
        if let Some(reference) = self.reference() {
            if reference.reference_type() != opcode.reference_type {
                fail!(
                    UnrecognizedReference,
                    "{} expects a {:?} reference, found {:?}",
                    opcode.name,
                    opcode.reference_type,
                    reference.reference_type()
                );
            }
        }

        let op = opcode.value;
        let name = opcode.name;
        let units = match self {
            Instruction::Format10x { .. } => vec![op],
            Instruction::Format10t { offset, .. } => {
                let offset = fit_i8(*offset as i64, name)?;
                vec![op | ((offset as u8 as u16) << 8)]
            }
            Instruction::Format11n { a, literal, .. } => {
                let a = nibble(*a, name)?;
                if !(-8..=7).contains(literal) {
                    fail!(Encoding, "literal {} does not fit in 4 bits for {}", literal, name);
                }
                vec![op | (a << 8) | (((*literal as u16) & 0xf) << 12)]
            }
            Instruction::Format11x { a, .. } => vec![op | ((*a as u16) << 8)],
            Instruction::Format12x { a, b, .. } => vec![op | (nibble(*a, name)? << 8) | (nibble(*b, name)? << 12)],
            Instruction::Format20t { offset, .. } => vec![op, fit_i16(*offset as i64, name)? as u16],
            Instruction::Format21c { a, reference, .. } => {
                vec![op | ((*a as u16) << 8), short_index(index_of(reference)?, name)?]
            }
            Instruction::Format21ih { a, literal, .. } => {
                if literal & 0xffff != 0 {
                    fail!(Encoding, "literal 0x{:x} has low bits set for {}", literal, name);
                }
                vec![op | ((*a as u16) << 8), (*literal >> 16) as u16]
            }
            Instruction::Format21lh { a, literal, .. } => {
                if literal & 0xffff_ffff_ffff != 0 {
                    fail!(Encoding, "literal 0x{:x} has low bits set for {}", literal, name);
                }
                vec![op | ((*a as u16) << 8), (*literal >> 48) as u16]
            }
            Instruction::Format21s { a, literal, .. } => vec![op | ((*a as u16) << 8), *literal as u16],
            Instruction::Format21t { a, offset, .. } => {
                vec![op | ((*a as u16) << 8), fit_i16(*offset as i64, name)? as u16]
            }
            Instruction::Format22b { a, b, literal, .. } => {
                vec![op | ((*a as u16) << 8), (*b as u16) | ((*literal as u8 as u16) << 8)]
            }
            Instruction::Format22c { a, b, reference, .. } => vec![
                op | (nibble(*a, name)? << 8) | (nibble(*b, name)? << 12),
                short_index(index_of(reference)?, name)?,
            ],
            Instruction::Format22s { a, b, literal, .. } => {
                vec![op | (nibble(*a, name)? << 8) | (nibble(*b, name)? << 12), *literal as u16]
            }
            Instruction::Format22t { a, b, offset, .. } => vec![
                op | (nibble(*a, name)? << 8) | (nibble(*b, name)? << 12),
                fit_i16(*offset as i64, name)? as u16,
            ],
            Instruction::Format22x { a, b, .. } => vec![op | ((*a as u16) << 8), *b],
            Instruction::Format23x { a, b, c, .. } => {
                vec![op | ((*a as u16) << 8), (*b as u16) | ((*c as u16) << 8)]
            }
            Instruction::Format30t { offset, .. } => {
                vec![op, *offset as u32 as u16, (*offset as u32 >> 16) as u16]
            }
            Instruction::Format31c { a, reference, .. } => {
                let index = index_of(reference)?;
                vec![op | ((*a as u16) << 8), index as u16, (index >> 16) as u16]
            }
            Instruction::Format31i { a, literal: value, .. } | Instruction::Format31t { a, offset: value, .. } => {
                vec![op | ((*a as u16) << 8), *value as u32 as u16, (*value as u32 >> 16) as u16]
            }
            Instruction::Format32x { a, b, .. } => vec![op, *a, *b],
            Instruction::Format35c { registers, reference, .. } => {
                if registers.len() > 5 {
                    fail!(Encoding, "{} registers passed to {}, at most 5 fit", registers.len(), name);
                }
                let mut regs = [0u16; 5];
                for (i, r) in registers.iter().enumerate() {
                    regs[i] = nibble(*r, name)?;
                }
                vec![
                    op | (regs[4] << 8) | ((registers.len() as u16) << 12),
                    short_index(index_of(reference)?, name)?,
                    regs[0] | (regs[1] << 4) | (regs[2] << 8) | (regs[3] << 12),
                ]
            }
            Instruction::Format3rc { start_register, register_count, reference, .. } => vec![
                op | ((*register_count as u16) << 8),
                short_index(index_of(reference)?, name)?,
                *start_register,
            ],
            Instruction::Format51l { a, literal, .. } => {
                let v = *literal as u64;
                vec![op | ((*a as u16) << 8), v as u16, (v >> 16) as u16, (v >> 32) as u16, (v >> 48) as u16]
            }
            Instruction::ArrayPayload { element_width, elements, .. } => encode_array_payload(op, *element_width, elements)?,
            Instruction::PackedSwitchPayload { first_key, targets, .. } => {
                let mut units = vec![op, short_count(targets.len(), name)?];
                push_i32(&mut units, *first_key);
                for t in targets {
                    push_i32(&mut units, *t);
                }
                units
            }
            Instruction::SparseSwitchPayload { keys, targets, .. } => {
                if keys.len() != targets.len() {
                    fail!(InvalidModel, "sparse switch has {} keys but {} targets", keys.len(), targets.len());
                }
                let mut units = vec![op, short_count(targets.len(), name)?];
                for k in keys {
                    push_i32(&mut units, *k);
                }
                for t in targets {
                    push_i32(&mut units, *t);
                }
                units
            }
        };
        Ok(units)
    }

    /// Decodes the instruction starting at `pc`. `resolve` turns a pool index into a reference.
    pub(crate) fn decode<F>(code: &[u16], pc: usize, resolve: F) -> Result<Instruction, DexError>
    where
        F: Fn(ReferenceType, u32) -> Result<Reference, DexError>,
    {
        let inst = unit_at(code, pc)?;
        let opcode = match inst {
            0x0100 | 0x0200 | 0x0300 => opcode_by_value(inst),
            _ => opcode_by_value(op(inst) as u16),
        };
        let opcode = match opcode {
            Some(o) => o,
            None => fail!("unknown opcode 0x{:04x} at code unit {}", inst, pc),
        };
        if let Some(size) = opcode.format.code_units() {
            require_cu(code, pc, size, opcode.name)?;
        }
        let u = |i: usize| code[pc + i];
        let wide = |i: usize| (u(i) as u32) | ((u(i + 1) as u32) << 16);
        let reference = |index: u32| resolve(opcode.reference_type, index);

        let instruction = match opcode.format {
            Format::Format10x => Instruction::Format10x { opcode },
            Format::Format10t => Instruction::Format10t { opcode, offset: a8(inst) as i8 as i32 },
            Format::Format11n => Instruction::Format11n { opcode, a: a4(inst), literal: s4(b4(inst)) },
            Format::Format11x => Instruction::Format11x { opcode, a: a8(inst) },
            Format::Format12x => Instruction::Format12x { opcode, a: a4(inst), b: b4(inst) },
            Format::Format20t => Instruction::Format20t { opcode, offset: u(1) as i16 as i32 },
            Format::Format21c => Instruction::Format21c { opcode, a: a8(inst), reference: reference(u(1) as u32)? },
            Format::Format21ih => Instruction::Format21ih { opcode, a: a8(inst), literal: ((u(1) as u32) << 16) as i32 },
            Format::Format21lh => Instruction::Format21lh { opcode, a: a8(inst), literal: ((u(1) as u64) << 48) as i64 },
            Format::Format21s => Instruction::Format21s { opcode, a: a8(inst), literal: u(1) as i16 },
            Format::Format21t => Instruction::Format21t { opcode, a: a8(inst), offset: u(1) as i16 as i32 },
            Format::Format22b => Instruction::Format22b {
                opcode,
                a: a8(inst),
                b: (u(1) & 0xff) as u8,
                literal: (u(1) >> 8) as u8 as i8,
            },
            Format::Format22c => Instruction::Format22c {
                opcode,
                a: a4(inst),
                b: b4(inst),
                reference: reference(u(1) as u32)?,
            },
            Format::Format22s => Instruction::Format22s { opcode, a: a4(inst), b: b4(inst), literal: u(1) as i16 },
            Format::Format22t => Instruction::Format22t { opcode, a: a4(inst), b: b4(inst), offset: u(1) as i16 as i32 },
            Format::Format22x => Instruction::Format22x { opcode, a: a8(inst), b: u(1) },
            Format::Format23x => Instruction::Format23x {
                opcode,
                a: a8(inst),
                b: (u(1) & 0xff) as u8,
                c: (u(1) >> 8) as u8,
            },
            Format::Format30t => Instruction::Format30t { opcode, offset: wide(1) as i32 },
            Format::Format31c => Instruction::Format31c { opcode, a: a8(inst), reference: reference(wide(1))? },
            Format::Format31i => Instruction::Format31i { opcode, a: a8(inst), literal: wide(1) as i32 },
            Format::Format31t => Instruction::Format31t { opcode, a: a8(inst), offset: wide(1) as i32 },
            Format::Format32x => Instruction::Format32x { opcode, a: u(1), b: u(2) },
            Format::Format35c => {
                let count = b4(inst) as usize;
                if count > 5 {
                    fail!("invalid register count {} for {} at code unit {}", count, opcode.name, pc);
                }
                let regs = [
                    (u(2) & 0xf) as u8,
                    ((u(2) >> 4) & 0xf) as u8,
                    ((u(2) >> 8) & 0xf) as u8,
                    ((u(2) >> 12) & 0xf) as u8,
                    a4(inst),
                ];
                Instruction::Format35c {
                    opcode,
                    registers: regs[..count].to_vec(),
                    reference: reference(u(1) as u32)?,
                }
            }
            Format::Format3rc => Instruction::Format3rc {
                opcode,
                start_register: u(2),
                register_count: a8(inst),
                reference: reference(u(1) as u32)?,
            },
            Format::Format51l => {
                let v = (u(1) as u64) | ((u(2) as u64) << 16) | ((u(3) as u64) << 32) | ((u(4) as u64) << 48);
                Instruction::Format51l { opcode, a: a8(inst), literal: v as i64 }
            }
            Format::ArrayPayload => decode_array_payload(opcode, code, pc)?,
            Format::PackedSwitchPayload => {
                require_cu(code, pc, 4, opcode.name)?;
                let size = u(1) as usize;
                require_cu(code, pc, 4 + 2 * size, opcode.name)?;
                Instruction::PackedSwitchPayload {
                    opcode,
                    first_key: wide(2) as i32,
                    targets: (0..size).map(|i| wide(4 + 2 * i) as i32).collect(),
                }
            }
            Format::SparseSwitchPayload => {
                require_cu(code, pc, 2, opcode.name)?;
                let size = u(1) as usize;
                require_cu(code, pc, 2 + 4 * size, opcode.name)?;
                Instruction::SparseSwitchPayload {
                    opcode,
                    keys: (0..size).map(|i| wide(2 + 2 * i) as i32).collect(),
                    targets: (0..size).map(|i| wide(2 + 2 * size + 2 * i) as i32).collect(),
                }
            }
        };
        Ok(instruction)
    }
}

fn encode_array_payload(op: u16, element_width: u16, elements: &[i64]) -> Result<Vec<u16>, DexError> {
    if ![1, 2, 4, 8].contains(&element_width) {
        fail!(Encoding, "array payload element width {} is not 1, 2, 4 or 8", element_width);
    }
    let width = element_width as usize;
    let mut bytes = Vec::with_capacity(width * elements.len() + 1);
    for &element in elements {
        if width < 8 {
            let bits = 8 * width as u32;
            let signed_ok = (element << (64 - bits)) >> (64 - bits) == element;
            let unsigned_ok = (element as u64) >> bits == 0;
            if !signed_ok && !unsigned_ok {
                fail!(Encoding, "array element {} does not fit in {} bytes", element, width);
            }
        }
        bytes.extend_from_slice(&element.to_le_bytes()[..width]);
    }
    if bytes.len() % 2 != 0 {
        bytes.push(0);
    }

    let mut units = vec![op, element_width];
    push_i32(&mut units, elements.len() as i32);
    units.extend(bytes.chunks(2).map(|pair| u16::from_le_bytes([pair[0], pair[1]])));
    Ok(units)
}

fn decode_array_payload(opcode: &'static Opcode, code: &[u16], pc: usize) -> Result<Instruction, DexError> {
    require_cu(code, pc, 4, opcode.name)?;
    let element_width = code[pc + 1];
    let count = (code[pc + 2] as u32 | ((code[pc + 3] as u32) << 16)) as usize;
    let width = element_width as usize;
    if ![1, 2, 4, 8].contains(&width) {
        fail!("invalid array payload element width {} at code unit {}", width, pc);
    }
    let data_units = (width * count + 1) / 2;
    require_cu(code, pc, 4 + data_units, opcode.name)?;

    let bytes: Vec<u8> = code[pc + 4..pc + 4 + data_units].iter().flat_map(|u| u.to_le_bytes()).collect();
    let elements = bytes
        .chunks(width)
        .take(count)
        .map(|chunk| {
            let mut raw = [0u8; 8];
            raw[..width].copy_from_slice(chunk);
            let value = i64::from_le_bytes(raw);
            let shift = 64 - 8 * width as u32;
            // sign extend from the element width
            if shift == 0 { value } else { (value << shift) >> shift }
        })
        .collect();
    Ok(Instruction::ArrayPayload { opcode, element_width, elements })
}

fn push_i32(units: &mut Vec<u16>, value: i32) {
    units.push(value as u32 as u16);
    units.push((value as u32 >> 16) as u16);
}

fn nibble(register: u8, name: &str) -> Result<u16, DexError> {
    if register > 15 {
        fail!(Encoding, "register v{} does not fit in 4 bits for {}", register, name);
    }
    Ok(register as u16)
}

fn fit_i8(value: i64, name: &str) -> Result<i8, DexError> {
    i8::try_from(value).map_err(|_| err!(Encoding, "offset {} does not fit in 8 bits for {}", value, name))
}

fn fit_i16(value: i64, name: &str) -> Result<i16, DexError> {
    i16::try_from(value).map_err(|_| err!(Encoding, "offset {} does not fit in 16 bits for {}", value, name))
}

fn short_index(index: u32, name: &str) -> Result<u16, DexError> {
    u16::try_from(index).map_err(|_| err!(Encoding, "index {} does not fit in 16 bits for {}", index, name))
}

fn short_count(count: usize, name: &str) -> Result<u16, DexError> {
    u16::try_from(count).map_err(|_| err!(Encoding, "{} entries do not fit in 16 bits for {}", count, name))
}

// Helpers for pulling format encoding
fn unit_at(code: &[u16], pc: usize) -> Result<u16, DexError> {
    match code.get(pc) {
        Some(u) => Ok(*u),
        None => Err(err!("code unit {} is past the end of the instructions", pc)),
    }
}

fn require_cu(code: &[u16], pc: usize, need: usize, opname: &str) -> Result<(), DexError> {
    if pc + need > code.len() {
        fail!("truncated {} at code unit {}: need {} units, have {}", opname, pc, need, code.len() - pc);
    }
    Ok(())
}

#[inline] fn op(inst: u16) -> u8 { (inst & 0x00ff) as u8 }
#[inline] fn a8(inst: u16) -> u8 { (inst >> 8) as u8 }
#[inline] fn a4(inst: u16) -> u8 { ((inst >> 8) & 0x0f) as u8 }
#[inline] fn b4(inst: u16) -> u8 { ((inst >> 12) & 0x0f) as u8 }
#[inline] fn s4(x: u8) -> i8 { ((x as i8) << 4) >> 4 }
