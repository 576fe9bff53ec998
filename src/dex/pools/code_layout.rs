//! Relayout of a method's code once string indices are known.
//!
//! A `const-string` whose string lands above index 0xFFFF no longer fits its 16-bit slot and is
//! written as `const-string/jumbo`, one code unit longer. Everything after it moves: branch and
//! switch offsets are recomputed, a `goto` that no longer reaches grows to `goto/16` or
//! `goto/32`, and a payload that lands on an odd address gets a `nop` in front of it. Try ranges,
//! handlers and debug items go through [`CodeLayout::address`] to follow the move.

use std::borrow::Cow;
use std::collections::BTreeMap;

use log::debug;

use crate::dex::error::DexError;
use crate::dex::instructions::{Instruction, Reference};
use crate::dex::opcodes::{opcode_by_name, Opcode};
use crate::dex::pools::IndexPools;

#[derive(Debug)]
pub(crate) struct CodeLayout<'a> {
    instructions: Cow<'a, [Instruction]>,
    moves: Option<AddressMap>,
}

// Start of every model instruction followed by the end of the code, before and after relayout.
#[derive(Debug)]
struct AddressMap {
    old: Vec<u32>,
    new: Vec<u32>,
}

impl AddressMap {
    fn map(&self, address: u32) -> u32 {
        let i = self.old.partition_point(|start| *start <= address).saturating_sub(1);
        self.new[i] + (address - self.old[i])
    }

    /// Relative offset from the instruction at `from` to `from + offset`, after relayout.
    fn offset(&self, from: u32, offset: i32) -> Result<i32, DexError> {
        let target = from as i64 + offset as i64;
        if target < 0 || target > u32::MAX as i64 {
            fail!(InvalidModel, "branch at 0x{:x} targets 0x{:x}, outside the code", from, target);
        }
        let moved = self.map(target as u32) as i64 - self.map(from) as i64;
        match i32::try_from(moved) {
            Ok(moved) => Ok(moved),
            Err(_) => Err(err!(Encoding, "branch at 0x{:x} moved out of 32-bit range", from)),
        }
    }
}

impl<'a> CodeLayout<'a> {
    pub fn new(instructions: &'a [Instruction], pools: &IndexPools) -> Result<Self, DexError> {
        let mut jumbo = Vec::with_capacity(instructions.len());
        for instruction in instructions {
            jumbo.push(needs_jumbo(instruction, pools)?);
        }
        if !jumbo.contains(&true) {
            return Ok(CodeLayout { instructions: Cow::Borrowed(instructions), moves: None });
        }

        let mut old = Vec::with_capacity(instructions.len() + 1);
        let mut address = 0u32;
        for instruction in instructions {
            old.push(address);
            address += instruction.code_units() as u32;
        }
        old.push(address);

        let mut sizes: Vec<u32> = instructions
            .iter()
            .zip(&jumbo)
            .map(|(instruction, jumbo)| if *jumbo { 3 } else { instruction.code_units() as u32 })
            .collect();

        // gotos only ever grow, so this settles
        let (map, padded) = loop {
            let (map, padded) = place(instructions, old.clone(), &sizes);
            let mut grew = false;
            for (i, instruction) in instructions.iter().enumerate() {
                if let Instruction::Format10t { offset, .. } | Instruction::Format20t { offset, .. } = instruction {
                    let needed = goto_units(map.offset(old[i], *offset)?);
                    if needed > sizes[i] {
                        sizes[i] = needed;
                        grew = true;
                    }
                }
            }
            if !grew {
                break (map, padded);
            }
        };

        // payload address -> address of the instruction that points at it
        let mut owners = BTreeMap::new();
        for (i, instruction) in instructions.iter().enumerate() {
            if let Instruction::Format31t { offset, .. } = instruction {
                owners.insert(old[i] as i64 + *offset as i64, old[i]);
            }
        }
        let owner_of = |payload: u32| match owners.get(&(payload as i64)) {
            Some(owner) => Ok(*owner),
            None => Err(err!(InvalidModel, "payload at 0x{:x} has no instruction pointing at it", payload)),
        };

        let nop = opcode("nop")?;
        let mut rewritten = Vec::with_capacity(instructions.len() + padded.len());
        for (i, instruction) in instructions.iter().enumerate() {
            if padded[i] {
                rewritten.push(Instruction::Format10x { opcode: nop });
            }
            let from = old[i];
            let moved = match instruction {
                Instruction::Format21c { a, reference, .. } if jumbo[i] => Instruction::Format31c {
                    opcode: opcode("const-string/jumbo")?,
                    a: *a,
                    reference: reference.clone(),
                },
                Instruction::Format10t { offset, .. }
                | Instruction::Format20t { offset, .. }
                | Instruction::Format30t { offset, .. } => {
                    let offset = map.offset(from, *offset)?;
                    match sizes[i] {
                        1 => Instruction::Format10t { opcode: opcode("goto")?, offset },
                        2 => Instruction::Format20t { opcode: opcode("goto/16")?, offset },
                        _ => Instruction::Format30t { opcode: opcode("goto/32")?, offset },
                    }
                }
                Instruction::Format21t { opcode, a, offset } => {
                    Instruction::Format21t { opcode: *opcode, a: *a, offset: map.offset(from, *offset)? }
                }
                Instruction::Format22t { opcode, a, b, offset } => {
                    Instruction::Format22t { opcode: *opcode, a: *a, b: *b, offset: map.offset(from, *offset)? }
                }
                Instruction::Format31t { opcode, a, offset } => {
                    Instruction::Format31t { opcode: *opcode, a: *a, offset: map.offset(from, *offset)? }
                }
                Instruction::PackedSwitchPayload { opcode, first_key, targets } => {
                    let base = owner_of(from)?;
                    Instruction::PackedSwitchPayload {
                        opcode: *opcode,
                        first_key: *first_key,
                        targets: targets.iter().map(|t| map.offset(base, *t)).collect::<Result<Vec<i32>, DexError>>()?,
                    }
                }
                Instruction::SparseSwitchPayload { opcode, keys, targets } => {
                    let base = owner_of(from)?;
                    Instruction::SparseSwitchPayload {
                        opcode: *opcode,
                        keys: keys.clone(),
                        targets: targets.iter().map(|t| map.offset(base, *t)).collect::<Result<Vec<i32>, DexError>>()?,
                    }
                }
                other => other.clone(),
            };
            rewritten.push(moved);
        }

        debug!(
            "[codeitem] {} const-string widened to jumbo, code grows from {} to {} units",
            jumbo.iter().filter(|j| **j).count(),
            old[instructions.len()],
            map.new[instructions.len()]
        );
        Ok(CodeLayout { instructions: Cow::Owned(rewritten), moves: Some(map) })
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Where a model code address ends up in the written code.
    pub fn address(&self, address: u32) -> u32 {
        match &self.moves {
            Some(map) => map.map(address),
            None => address,
        }
    }
}

fn needs_jumbo(instruction: &Instruction, pools: &IndexPools) -> Result<bool, DexError> {
    match instruction {
        Instruction::Format21c { opcode, reference: Reference::String(value), .. } if opcode.name == "const-string" => {
            Ok(pools.string_index(value)? > 0xFFFF)
        }
        _ => Ok(false),
    }
}

fn place(instructions: &[Instruction], old: Vec<u32>, sizes: &[u32]) -> (AddressMap, Vec<bool>) {
    let mut new = Vec::with_capacity(old.len());
    let mut padded = vec![false; instructions.len()];
    let mut address = 0u32;
    for (i, instruction) in instructions.iter().enumerate() {
        let payload = matches!(
            instruction,
            Instruction::ArrayPayload { .. }
                | Instruction::PackedSwitchPayload { .. }
                | Instruction::SparseSwitchPayload { .. }
        );
        if payload && address % 2 == 1 {
            address += 1;
            padded[i] = true;
        }
        new.push(address);
        address += sizes[i];
    }
    new.push(address);
    (AddressMap { old, new }, padded)
}

fn goto_units(offset: i32) -> u32 {
    if i8::try_from(offset).is_ok() {
        1
    } else if i16::try_from(offset).is_ok() {
        2
    } else {
        3
    }
}

fn opcode(name: &str) -> Result<&'static Opcode, DexError> {
    match opcode_by_name(name) {
        Some(opcode) => Ok(opcode),
        None => Err(err!(ContractViolation, "opcode {} missing from the table", name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(name: &str) -> &'static Opcode {
        opcode_by_name(name).unwrap()
    }

    fn nop() -> Instruction {
        Instruction::Format10x { opcode: op("nop") }
    }

    fn return_void() -> Instruction {
        Instruction::Format10x { opcode: op("return-void") }
    }

    fn const_string(value: &str) -> Instruction {
        Instruction::Format21c { opcode: op("const-string"), a: 0, reference: Reference::String(value.to_string()) }
    }

    // "zzz" sorts after every "sNNNNN" and so lands above index 0xFFFF
    fn crowded_pools() -> IndexPools {
        let mut pools = IndexPools::default();
        for i in 0..70_000 {
            pools.intern_string(&format!("s{:05}", i));
        }
        pools.intern_string("zzz");
        pools.intern_string("a");
        pools.assign_indices();
        pools
    }

    #[test]
    fn small_indices_keep_the_code_as_is() {
        let pools = crowded_pools();
        let code = vec![const_string("a"), return_void()];
        let layout = CodeLayout::new(&code, &pools).unwrap();
        assert!(matches!(layout.instructions, Cow::Borrowed(_)));
        assert_eq!(layout.address(2), 2);
    }

    #[test]
    fn jumbo_string_shifts_branches() {
        let pools = crowded_pools();
        let code = vec![
            const_string("zzz"),
            Instruction::Format21t { opcode: op("if-eqz"), a: 0, offset: 3 },
            Instruction::Format10t { opcode: op("goto"), offset: -4 },
            return_void(),
        ];
        let layout = CodeLayout::new(&code, &pools).unwrap();
        let written = layout.instructions();
        assert_eq!(written[0].opcode().name, "const-string/jumbo");
        assert_eq!(written[1], Instruction::Format21t { opcode: op("if-eqz"), a: 0, offset: 3 });
        assert_eq!(written[2], Instruction::Format10t { opcode: op("goto"), offset: -5 });
        assert_eq!(layout.address(2), 3);
        assert_eq!(layout.address(5), 6);
        // end of code
        assert_eq!(layout.address(6), 7);
    }

    #[test]
    fn goto_grows_when_it_no_longer_reaches() {
        let pools = crowded_pools();
        let mut code = vec![Instruction::Format10t { opcode: op("goto"), offset: 127 }, const_string("zzz")];
        code.extend((0..124).map(|_| nop()));
        code.push(return_void());

        let layout = CodeLayout::new(&code, &pools).unwrap();
        assert_eq!(layout.instructions()[0], Instruction::Format20t { opcode: op("goto/16"), offset: 129 });
        assert_eq!(layout.address(127), 129);
    }

    #[test]
    fn payloads_stay_aligned_and_switch_targets_follow() {
        let pools = crowded_pools();
        let code = vec![
            const_string("zzz"),
            Instruction::Format31t { opcode: op("packed-switch"), a: 0, offset: 4 },
            return_void(),
            Instruction::PackedSwitchPayload { opcode: op("packed-switch-payload"), first_key: 0, targets: vec![3] },
        ];
        let layout = CodeLayout::new(&code, &pools).unwrap();
        let written = layout.instructions();
        assert_eq!(written.len(), 5);
        assert_eq!(written[1], Instruction::Format31t { opcode: op("packed-switch"), a: 0, offset: 5 });
        assert_eq!(written[3], nop());
        assert_eq!(
            written[4],
            Instruction::PackedSwitchPayload { opcode: op("packed-switch-payload"), first_key: 0, targets: vec![3] }
        );
        assert_eq!(layout.address(6), 8);
    }
}
