use std::collections::{BTreeMap, BTreeSet};

use log::{trace, warn};

use crate::dex::error::{DexError, ResultExt};
use crate::dex::map::SectionInfo;
use crate::dex::pools::code_layout::CodeLayout;
use crate::dex::pools::debug_infos::{has_debug_info, DebugInfoPool};
use crate::dex::pools::methods::MethodKey;
use crate::dex::pools::{IndexPools, MethodSlot, Pool};
use crate::dex::writer::DexWriter;
use crate::types::{parameter_register_count, ClassDef, ExceptionHandler, Method, MethodImplementation};

/// `code_item`s, one per method with instructions or debug info, sorted by method.
#[derive(Debug)]
pub struct CodeItemPool {
    items: Pool<MethodKey>,
    slots: BTreeMap<MethodKey, MethodSlot>,
}

impl CodeItemPool {
    pub fn new() -> Self {
        CodeItemPool { items: Pool::new("code"), slots: BTreeMap::new() }
    }

    /// Validates the implementation and interns everything its instructions and handlers
    /// refer to.
    pub fn intern(
        &mut self,
        key: MethodKey,
        slot: MethodSlot,
        method: &Method,
        pools: &mut IndexPools,
    ) -> Result<(), DexError> {
        let implementation = match &method.implementation {
            Some(implementation) => implementation,
            None => return Ok(()),
        };
        if implementation.instructions.is_empty() {
            if !implementation.try_blocks.is_empty() {
                fail!(InvalidModel, "{} try blocks in a method without instructions", implementation.try_blocks.len());
            }
            if !has_debug_info(method) {
                return Ok(());
            }
        }

        for (i, instruction) in implementation.instructions.iter().enumerate() {
            if let Some(reference) = instruction.reference() {
                let opcode = instruction.opcode();
                if reference.reference_type() != opcode.reference_type {
                    fail!(
                        UnrecognizedReference,
                        "instruction {} ({}) takes a {:?} reference, got {:?}",
                        i,
                        opcode.name,
                        opcode.reference_type,
                        reference.reference_type()
                    );
                }
                pools.intern_reference(reference);
            }
        }

        for try_block in &implementation.try_blocks {
            check_handlers(&try_block.handlers)?;
            for handler in &try_block.handlers {
                if let Some(exception_type) = &handler.exception_type {
                    pools.intern_type(exception_type);
                }
            }
        }

        self.items.intern(key.clone());
        self.slots.insert(key, slot);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Offset of the method's code, or 0 when it has none.
    pub fn offset(&self, key: &MethodKey) -> Result<u32, DexError> {
        if !self.items.contains(key) {
            return Ok(0);
        }
        self.items.position(key)
    }

    pub fn write(
        &mut self,
        writer: &mut DexWriter,
        classes: &[ClassDef],
        pools: &IndexPools,
        debug_infos: &DebugInfoPool,
    ) -> Result<(), DexError> {
        let slots = &self.slots;
        self.items.write_each(writer, true, |writer, key| {
            let method = match slots.get(key) {
                Some(slot) => &classes[slot.class].methods[slot.method],
                None => fail!(ContractViolation, "no method recorded for {}->{}", key.class, key.name),
            };
            trace!("[codeitem] {}->{} at 0x{:x}", key.class, key.name, writer.position());
            write_code_item(writer, method, pools, debug_infos.offset(key)?)
                .context(|| format!("code of {}->{}{}", key.class, key.name, key.proto.descriptor()))
        })
    }

    pub fn section(&self) -> Option<SectionInfo> {
        self.items.section()
    }
}

impl Default for CodeItemPool {
    fn default() -> Self {
        CodeItemPool::new()
    }
}

// A catch-all may only close the list.
fn check_handlers(handlers: &[ExceptionHandler]) -> Result<(), DexError> {
    if handlers.is_empty() {
        fail!(InvalidModel, "try block without exception handlers");
    }
    let mut seen = BTreeSet::new();
    for (i, handler) in handlers.iter().enumerate() {
        match &handler.exception_type {
            None if i + 1 != handlers.len() => {
                fail!(InvalidModel, "catch-all handler at position {} is not the last of {}", i, handlers.len())
            }
            None => {}
            Some(exception_type) => {
                if !seen.insert(exception_type.as_str()) {
                    warn!("[codeitem] handler list catches {} more than once", exception_type);
                }
            }
        }
    }
    Ok(())
}

fn write_code_item(
    writer: &mut DexWriter,
    method: &Method,
    pools: &IndexPools,
    debug_info_off: u32,
) -> Result<(), DexError> {
    let empty = MethodImplementation::default();
    let implementation = method.implementation.as_ref().unwrap_or(&empty);

    let layout = CodeLayout::new(&implementation.instructions, pools)?;
    let mut units: Vec<u16> = vec![];
    for (i, instruction) in layout.instructions().iter().enumerate() {
        let encoded = instruction
            .encode(|reference| pools.reference_index(reference))
            .context(|| format!("instruction {} ({})", i, instruction.opcode().name))?;
        units.extend(encoded);
    }

    let ins = parameter_register_count(&method.parameter_types(), method.is_static());
    let outs = implementation.instructions.iter().filter_map(|i| i.outgoing_registers()).max().unwrap_or(0);
    let tries = &implementation.try_blocks;

    writer.write_ushort(implementation.register_count as i64)?;
    writer.write_ushort(ins as i64).context(|| "incoming registers".to_string())?;
    writer.write_ushort(outs as i64).context(|| "outgoing registers".to_string())?;
    writer.write_ushort(tries.len() as i64).context(|| "try count".to_string())?;
    writer.write_uint(debug_info_off);
    writer.write_uint(units.len() as u32);
    for unit in &units {
        writer.write_u16(*unit);
    }

    if tries.is_empty() {
        return Ok(());
    }
    if units.len() % 2 == 1 {
        writer.write_u16(0);
    }

    let handlers: Vec<Vec<ExceptionHandler>> = tries
        .iter()
        .map(|t| {
            t.handlers
                .iter()
                .map(|h| ExceptionHandler { handler_address: layout.address(h.handler_address), ..h.clone() })
                .collect()
        })
        .collect();
    let (handler_bytes, handler_offsets) = encode_handler_lists(handlers.iter().map(|h| h.as_slice()), pools)?;
    for (try_block, handler_off) in tries.iter().zip(handler_offsets) {
        let start = layout.address(try_block.start_address);
        let end = layout.address(try_block.start_address + try_block.code_unit_count as u32);
        writer.write_uint(start);
        writer.write_ushort((end - start) as i64).context(|| "try length".to_string())?;
        writer.write_ushort(handler_off as i64).context(|| "handler offset".to_string())?;
    }
    writer.write_bytes(&handler_bytes);
    Ok(())
}

/// Builds the `encoded_catch_handler_list` and the offset of each try's handlers within it.
/// Identical lists are encoded once.
fn encode_handler_lists<'a>(
    lists: impl Iterator<Item = &'a [ExceptionHandler]>,
    pools: &IndexPools,
) -> Result<(Vec<u8>, Vec<u32>), DexError> {
    let lists: Vec<&[ExceptionHandler]> = lists.collect();
    let mut unique: Vec<&[ExceptionHandler]> = vec![];
    for list in &lists {
        if !unique.contains(list) {
            unique.push(list);
        }
    }

    let mut writer = DexWriter::new(0);
    writer.write_uleb128(unique.len() as u32);
    let mut unique_offsets = Vec::with_capacity(unique.len());
    for list in &unique {
        unique_offsets.push(writer.position());
        write_handler_list(&mut writer, list, pools)?;
    }

    let mut offsets = Vec::with_capacity(lists.len());
    for list in &lists {
        match unique.iter().position(|u| u == list) {
            Some(i) => offsets.push(unique_offsets[i]),
            None => fail!(ContractViolation, "handler list missing after deduplication"),
        }
    }
    Ok((writer.into_bytes(), offsets))
}

/// `encoded_catch_handler`: the count is negated when a catch-all closes the list.
fn write_handler_list(writer: &mut DexWriter, handlers: &[ExceptionHandler], pools: &IndexPools) -> Result<(), DexError> {
    let (typed, catch_all) = match handlers.split_last() {
        Some((last, rest)) if last.exception_type.is_none() => (rest, Some(last)),
        _ => (handlers, None),
    };
    let count = typed.len() as i32;
    writer.write_sleb128(if catch_all.is_some() { -count } else { count });
    for handler in typed {
        if let Some(exception_type) = &handler.exception_type {
            writer.write_uleb128(pools.type_index(exception_type)?);
        }
        writer.write_uleb128(handler.handler_address);
    }
    if let Some(catch_all) = catch_all {
        writer.write_uleb128(catch_all.handler_address);
    }
    Ok(())
}
