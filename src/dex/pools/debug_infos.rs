use std::collections::BTreeMap;

use log::trace;

use crate::dex::encoded_values::IndexResolver;
use crate::dex::error::{DexError, ResultExt};
use crate::dex::map::SectionInfo;
use crate::dex::pools::methods::MethodKey;
use crate::dex::pools::code_layout::CodeLayout;
use crate::dex::pools::{IndexPools, MethodSlot, Pool};
use crate::dex::writer::DexWriter;
use crate::dex::{read_sleb128, read_u1, read_uleb128, read_uleb128p1};
use crate::types::{ClassDef, DebugItem, Method};

const DBG_END_SEQUENCE: u8 = 0x00;
const DBG_ADVANCE_PC: u8 = 0x01;
const DBG_ADVANCE_LINE: u8 = 0x02;
const DBG_START_LOCAL: u8 = 0x03;
const DBG_START_LOCAL_EXTENDED: u8 = 0x04;
const DBG_END_LOCAL: u8 = 0x05;
const DBG_RESTART_LOCAL: u8 = 0x06;
const DBG_SET_PROLOGUE_END: u8 = 0x07;
const DBG_SET_EPILOGUE_BEGIN: u8 = 0x08;
const DBG_SET_FILE: u8 = 0x09;
const DBG_FIRST_SPECIAL: u8 = 0x0a;

const DBG_LINE_BASE: i64 = -4;
const DBG_LINE_RANGE: i64 = 15;

/// A method carries debug info when it has code and either named parameters or debug items.
pub fn has_debug_info(method: &Method) -> bool {
    match &method.implementation {
        Some(implementation) => {
            !implementation.debug_items.is_empty() || method.parameters.iter().any(|p| p.name.is_some())
        }
        None => false,
    }
}

/// `debug_info_item`s, one per method that has any, in method order.
#[derive(Debug)]
pub struct DebugInfoPool {
    items: Pool<MethodKey>,
    slots: BTreeMap<MethodKey, MethodSlot>,
}

impl DebugInfoPool {
    pub fn new() -> Self {
        DebugInfoPool { items: Pool::new("debug_info"), slots: BTreeMap::new() }
    }

    pub fn intern(&mut self, key: MethodKey, slot: MethodSlot, method: &Method, pools: &mut IndexPools) {
        if !has_debug_info(method) {
            return;
        }
        for parameter in &method.parameters {
            pools.strings.intern_opt(parameter.name.as_deref());
        }
        let items = method.implementation.iter().flat_map(|i| i.debug_items.iter());
        for item in items {
            match item {
                DebugItem::StartLocal { name, local_type, signature, .. } => {
                    pools.strings.intern_opt(name.as_deref());
                    pools.types.intern_opt(local_type.as_deref(), &mut pools.strings);
                    pools.strings.intern_opt(signature.as_deref());
                }
                DebugItem::SetSourceFile { source_file, .. } => pools.strings.intern_opt(source_file.as_deref()),
                _ => {}
            }
        }
        self.items.intern(key.clone());
        self.slots.insert(key, slot);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Offset of the method's debug info, or 0 when it has none.
    pub fn offset(&self, key: &MethodKey) -> Result<u32, DexError> {
        if !self.items.contains(key) {
            return Ok(0);
        }
        self.items.position(key)
    }

    pub fn write(&mut self, writer: &mut DexWriter, classes: &[ClassDef], pools: &IndexPools) -> Result<(), DexError> {
        let slots = &self.slots;
        self.items.write_each(writer, false, |writer, key| {
            let method = match slots.get(key) {
                Some(slot) => &classes[slot.class].methods[slot.method],
                None => fail!(ContractViolation, "no method recorded for {}->{}", key.class, key.name),
            };
            trace!("[debuginfo] {}->{} at 0x{:x}", key.class, key.name, writer.position());
            write_debug_info(writer, method, pools).context(|| format!("debug info of {}->{}", key.class, key.name))
        })
    }

    pub fn section(&self) -> Option<SectionInfo> {
        self.items.section()
    }
}

impl Default for DebugInfoPool {
    fn default() -> Self {
        DebugInfoPool::new()
    }
}

fn advance_pc(writer: &mut DexWriter, address: &mut u32, target: u32) {
    if target > *address {
        writer.write_u8(DBG_ADVANCE_PC);
        writer.write_uleb128(target - *address);
        *address = target;
    }
}

/// Encodes one method's line table and local variable events.
pub(crate) fn write_debug_info(writer: &mut DexWriter, method: &Method, pools: &IndexPools) -> Result<(), DexError> {
    let implementation = method.implementation.as_ref();
    let items: &[DebugItem] = implementation.map_or(&[][..], |i| i.debug_items.as_slice());
    let layout = implementation.map(|i| CodeLayout::new(&i.instructions, pools)).transpose()?;
    let line_start = items
        .iter()
        .find_map(|item| match item {
            DebugItem::LineNumber { line, .. } => Some(*line),
            _ => None,
        })
        .unwrap_or(0);

    writer.write_uleb128(line_start);
    writer.write_uleb128(method.parameters.len() as u32);
    for parameter in &method.parameters {
        let index = parameter.name.as_deref().map(|n| pools.string_index(n)).transpose()?;
        writer.write_uleb128p1(index);
    }

    let mut address = 0u32;
    let mut line = line_start as i64;
    for item in items {
        let target = layout.as_ref().map_or(item.address(), |l| l.address(item.address()));
        if target < address {
            fail!(InvalidModel, "debug item at 0x{:x} comes after address 0x{:x}", target, address);
        }
        match item {
            DebugItem::LineNumber { line: target_line, .. } => {
                let mut line_delta = *target_line as i64 - line;
                let mut address_delta = target - address;
                if line_delta < DBG_LINE_BASE || line_delta > DBG_LINE_BASE + DBG_LINE_RANGE - 1 {
                    let delta = match i32::try_from(line_delta) {
                        Ok(d) => d,
                        Err(_) => fail!(Encoding, "line jump of {} does not fit in 32 bits", line_delta),
                    };
                    writer.write_u8(DBG_ADVANCE_LINE);
                    writer.write_sleb128(delta);
                    line_delta = 0;
                }
                if (line_delta < 2 && address_delta > 16) || (line_delta > 1 && address_delta > 15) {
                    writer.write_u8(DBG_ADVANCE_PC);
                    writer.write_uleb128(address_delta);
                    address_delta = 0;
                }
                let special = DBG_FIRST_SPECIAL as i64 + (line_delta - DBG_LINE_BASE) + DBG_LINE_RANGE * address_delta as i64;
                writer.write_u8(special as u8);
                line = *target_line as i64;
                address = target;
            }
            DebugItem::StartLocal { register, name, local_type, signature, .. } => {
                advance_pc(writer, &mut address, target);
                let name = name.as_deref().map(|n| pools.string_index(n)).transpose()?;
                let local_type = local_type.as_deref().map(|t| pools.type_index(t)).transpose()?;
                match signature {
                    Some(signature) => {
                        writer.write_u8(DBG_START_LOCAL_EXTENDED);
                        writer.write_uleb128(*register);
                        writer.write_uleb128p1(name);
                        writer.write_uleb128p1(local_type);
                        writer.write_uleb128p1(Some(pools.string_index(signature)?));
                    }
                    None => {
                        writer.write_u8(DBG_START_LOCAL);
                        writer.write_uleb128(*register);
                        writer.write_uleb128p1(name);
                        writer.write_uleb128p1(local_type);
                    }
                }
            }
            DebugItem::EndLocal { register, .. } => {
                advance_pc(writer, &mut address, target);
                writer.write_u8(DBG_END_LOCAL);
                writer.write_uleb128(*register);
            }
            DebugItem::RestartLocal { register, .. } => {
                advance_pc(writer, &mut address, target);
                writer.write_u8(DBG_RESTART_LOCAL);
                writer.write_uleb128(*register);
            }
            DebugItem::PrologueEnd { .. } => {
                advance_pc(writer, &mut address, target);
                writer.write_u8(DBG_SET_PROLOGUE_END);
            }
            DebugItem::EpilogueBegin { .. } => {
                advance_pc(writer, &mut address, target);
                writer.write_u8(DBG_SET_EPILOGUE_BEGIN);
            }
            DebugItem::SetSourceFile { source_file, .. } => {
                advance_pc(writer, &mut address, target);
                writer.write_u8(DBG_SET_FILE);
                writer.write_uleb128p1(source_file.as_deref().map(|s| pools.string_index(s)).transpose()?);
            }
        }
    }
    writer.write_u8(DBG_END_SEQUENCE);
    Ok(())
}

/// Decoded `debug_info_item`: parameter names and the event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugInfo {
    pub parameter_names: Vec<Option<String>>,
    pub items: Vec<DebugItem>,
}

fn advanced(address: u32, delta: u32) -> Result<u32, DexError> {
    address.checked_add(delta).ok_or_else(|| err!(Malformed, "debug address overflows past 0x{:x}", address))
}

pub(crate) fn read_debug_info(bytes: &[u8], offset: u32, resolver: &impl IndexResolver) -> Result<DebugInfo, DexError> {
    let mut ix = offset as usize;
    let string_at = |index: Option<u32>| index.map(|i| resolver.string(i)).transpose();

    let mut line = read_uleb128(bytes, &mut ix)? as i64;
    let parameters_size = read_uleb128(bytes, &mut ix)?;
    let mut parameter_names = Vec::with_capacity(parameters_size.min(256) as usize);
    for _ in 0..parameters_size {
        parameter_names.push(string_at(read_uleb128p1(bytes, &mut ix)?)?);
    }

    let mut address = 0u32;
    let mut items = vec![];
    loop {
        let opcode = read_u1(bytes, &mut ix)?;
        match opcode {
            DBG_END_SEQUENCE => break,
            DBG_ADVANCE_PC => address = advanced(address, read_uleb128(bytes, &mut ix)?)?,
            DBG_ADVANCE_LINE => line += read_sleb128(bytes, &mut ix)? as i64,
            DBG_START_LOCAL | DBG_START_LOCAL_EXTENDED => {
                let register = read_uleb128(bytes, &mut ix)?;
                let name = string_at(read_uleb128p1(bytes, &mut ix)?)?;
                let local_type = read_uleb128p1(bytes, &mut ix)?.map(|t| resolver.type_desc(t)).transpose()?;
                let signature = if opcode == DBG_START_LOCAL_EXTENDED {
                    string_at(read_uleb128p1(bytes, &mut ix)?)?
                } else {
                    None
                };
                items.push(DebugItem::StartLocal { address, register, name, local_type, signature });
            }
            DBG_END_LOCAL => items.push(DebugItem::EndLocal { address, register: read_uleb128(bytes, &mut ix)? }),
            DBG_RESTART_LOCAL => items.push(DebugItem::RestartLocal { address, register: read_uleb128(bytes, &mut ix)? }),
            DBG_SET_PROLOGUE_END => items.push(DebugItem::PrologueEnd { address }),
            DBG_SET_EPILOGUE_BEGIN => items.push(DebugItem::EpilogueBegin { address }),
            DBG_SET_FILE => {
                let source_file = string_at(read_uleb128p1(bytes, &mut ix)?)?;
                items.push(DebugItem::SetSourceFile { address, source_file });
            }
            special => {
                let adjusted = (special - DBG_FIRST_SPECIAL) as i64;
                address = advanced(address, (adjusted / DBG_LINE_RANGE) as u32)?;
                line += DBG_LINE_BASE + adjusted % DBG_LINE_RANGE;
                let line = match u32::try_from(line) {
                    Ok(l) => l,
                    Err(_) => fail!(Malformed, "debug info at 0x{:x} reaches line {}", offset, line),
                };
                items.push(DebugItem::LineNumber { address, line });
            }
        }
    }
    Ok(DebugInfo { parameter_names, items })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::error::ErrorKind;
    use crate::types::{AccessFlags, FieldReference, MethodImplementation, MethodParameter, MethodReference};

    struct Strings(Vec<&'static str>);

    impl IndexResolver for Strings {
        fn string(&self, idx: u32) -> Result<String, DexError> {
            self.0.get(idx as usize).map(|s| s.to_string()).ok_or_else(|| err!("bad string {}", idx))
        }
        fn type_desc(&self, idx: u32) -> Result<String, DexError> {
            self.string(idx)
        }
        fn field_ref(&self, idx: u32) -> Result<FieldReference, DexError> {
            Err(err!("no field {}", idx))
        }
        fn method_ref(&self, idx: u32) -> Result<MethodReference, DexError> {
            Err(err!("no method {}", idx))
        }
    }

    fn method(items: Vec<DebugItem>) -> Method {
        let mut m = Method::new("f", &["I"], "V", AccessFlags::STATIC);
        m.implementation = Some(MethodImplementation { register_count: 1, debug_items: items, ..Default::default() });
        m
    }

    fn encode(m: &Method, pools: &mut IndexPools) -> Result<Vec<u8>, DexError> {
        let mut debug = DebugInfoPool::new();
        debug.intern(MethodKey::of(&m.reference("LA;")), MethodSlot { class: 0, method: 0 }, m, pools);
        pools.assign_indices();
        let mut writer = DexWriter::new(0);
        write_debug_info(&mut writer, m, pools)?;
        Ok(writer.into_bytes())
    }

    #[test]
    fn two_lines_use_special_opcodes() {
        let m = method(vec![
            DebugItem::LineNumber { address: 0, line: 10 },
            DebugItem::LineNumber { address: 4, line: 12 },
        ]);
        let bytes = encode(&m, &mut IndexPools::default()).unwrap();
        assert_eq!(bytes, vec![10, 1, 0, 0x0e, 0x4c, 0]);

        let info = read_debug_info(&bytes, 0, &Strings(vec![])).unwrap();
        assert_eq!(info.parameter_names, vec![None]);
        assert_eq!(info.items, m.implementation.unwrap().debug_items);
    }

    #[test]
    fn special_opcode_thresholds() {
        let cases = vec![
            // (line delta, address delta, explicit advances expected)
            (0, 16, 0),
            (0, 17, 1),
            (2, 15, 0),
            (2, 16, 1),
            (10, 15, 0),
            (11, 0, 1),
            (-4, 0, 0),
            (-5, 3, 1),
            (20, 40, 2),
        ];
        for (line_delta, address_delta, advances) in cases {
            let m = method(vec![
                DebugItem::LineNumber { address: 0, line: 100 },
                DebugItem::LineNumber { address: address_delta, line: (100 + line_delta) as u32 },
            ]);
            let bytes = encode(&m, &mut IndexPools::default()).unwrap();
            // line start, param count, no name, first special, ... , end
            let body = &bytes[4..bytes.len() - 1];
            let explicit = body.iter().filter(|b| **b == DBG_ADVANCE_LINE || **b == DBG_ADVANCE_PC).count();
            assert!(explicit >= advances, "({}, {}) encoded as {:?}", line_delta, address_delta, body);
            assert!(*body.last().unwrap() >= DBG_FIRST_SPECIAL);

            let info = read_debug_info(&bytes, 0, &Strings(vec![])).unwrap();
            assert_eq!(info.items, m.implementation.unwrap().debug_items);
        }
    }

    #[test]
    fn locals_and_names_round_trip() {
        let mut m = method(vec![
            DebugItem::PrologueEnd { address: 0 },
            DebugItem::StartLocal {
                address: 2,
                register: 0,
                name: Some("x".to_string()),
                local_type: Some("I".to_string()),
                signature: None,
            },
            DebugItem::StartLocal {
                address: 2,
                register: 1,
                name: Some("l".to_string()),
                local_type: Some("Ljava/util/List;".to_string()),
                signature: Some("Ljava/util/List<TT;>;".to_string()),
            },
            DebugItem::LineNumber { address: 3, line: 7 },
            DebugItem::EndLocal { address: 5, register: 0 },
            DebugItem::RestartLocal { address: 6, register: 0 },
            DebugItem::SetSourceFile { address: 6, source_file: Some("A.java".to_string()) },
            DebugItem::EpilogueBegin { address: 8 },
        ]);
        m.parameters = vec![MethodParameter::named("I", "p")];

        let mut pools = IndexPools::default();
        let bytes = encode(&m, &mut pools).unwrap();
        // sorted string pool: A.java, I, Ljava/util/List;, Ljava/util/List<TT;>;, l, p, x
        let strings = Strings(vec!["A.java", "I", "Ljava/util/List;", "Ljava/util/List<TT;>;", "l", "p", "x"]);
        assert_eq!(pools.string_index("x").unwrap(), 6);

        let info = read_debug_info(&bytes, 0, &TypesAsStrings(strings, &pools)).unwrap();
        assert_eq!(info.parameter_names, vec![Some("p".to_string())]);
        assert_eq!(info.items, m.implementation.unwrap().debug_items);
    }

    // Type indices differ from string indices, so map them through the pools.
    struct TypesAsStrings<'a>(Strings, &'a IndexPools);

    impl IndexResolver for TypesAsStrings<'_> {
        fn string(&self, idx: u32) -> Result<String, DexError> {
            self.0.string(idx)
        }
        fn type_desc(&self, idx: u32) -> Result<String, DexError> {
            for candidate in &self.0 .0 {
                if self.1.types.index(candidate).ok() == Some(idx) {
                    return Ok(candidate.to_string());
                }
            }
            Err(err!("bad type {}", idx))
        }
        fn field_ref(&self, idx: u32) -> Result<FieldReference, DexError> {
            self.0.field_ref(idx)
        }
        fn method_ref(&self, idx: u32) -> Result<MethodReference, DexError> {
            self.0.method_ref(idx)
        }
    }

    #[test]
    fn backwards_addresses_are_rejected() {
        let m = method(vec![
            DebugItem::LineNumber { address: 4, line: 1 },
            DebugItem::LineNumber { address: 2, line: 2 },
        ]);
        let err = encode(&m, &mut IndexPools::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidModel);
    }

    #[test]
    fn abstract_methods_have_no_debug_info() {
        let mut m = Method::new("f", &["I"], "V", AccessFlags::ABSTRACT);
        m.parameters[0].name = Some("p".to_string());
        assert!(!has_debug_info(&m));
        m.implementation = Some(MethodImplementation::default());
        assert!(has_debug_info(&m));
    }
}
