// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! CIL assembler: mnemonics and labels in, encoded method-body bytes out.
//!
//! [`InstructionEncoder`] looks mnemonics up in a reverse index built from the static opcode
//! tables, writes opcodes and operands little-endian, and records label fixups that are
//! resolved in [`InstructionEncoder::finalize`]. It also tracks the evaluation stack depth so
//! that the finished body carries a correct `max_stack`.
//!
//! # Examples
//!
//! ```rust
//! use cilpreinit::assembly::InstructionEncoder;
//!
//! let mut encoder = InstructionEncoder::new();
//! encoder.emit_ldc_i4(0)?;
//! encoder.emit_stloc(0)?;
//! encoder.define_label("loop")?;
//! encoder.emit_ldloc(0)?;
//! encoder.emit_ldc_i4(1)?;
//! encoder.emit_instruction("add", None)?;
//! encoder.emit_stloc(0)?;
//! encoder.emit_branch("br", "loop")?;
//!
//! let (code, max_stack, labels) = encoder.finalize()?;
//! assert_eq!(max_stack, 2);
//! assert_eq!(labels["loop"], 2);
//! assert_eq!(code[6], 0x38);
//! # Ok::<(), cilpreinit::Error>(())
//! ```

use std::{collections::HashMap, sync::OnceLock};

use crate::{
    assembly::{
        instruction::{FlowType, Immediate, Operand, OperandType},
        instructions::{CilInstruction, INSTRUCTIONS, INSTRUCTIONS_FE},
    },
    Error, Result,
};

/// Reverse lookup table mapping mnemonics to `(opcode, prefix, metadata)`.
static MNEMONIC_TO_OPCODE: OnceLock<HashMap<&'static str, (u8, u8, &'static CilInstruction)>> =
    OnceLock::new();

fn get_mnemonic_lookup() -> &'static HashMap<&'static str, (u8, u8, &'static CilInstruction)> {
    MNEMONIC_TO_OPCODE.get_or_init(|| {
        let mut map = HashMap::new();

        for (opcode, instr) in INSTRUCTIONS.iter().enumerate() {
            if let (false, Ok(opcode)) = (instr.is_reserved(), u8::try_from(opcode)) {
                map.insert(instr.instr, (opcode, 0, instr));
            }
        }

        for (opcode, instr) in INSTRUCTIONS_FE.iter().enumerate() {
            if let (false, Ok(opcode)) = (instr.is_reserved(), u8::try_from(opcode)) {
                map.insert(instr.instr, (opcode, 0xFE, instr));
            }
        }

        map
    })
}

/// An unresolved branch offset.
#[derive(Debug, Clone)]
struct LabelFixup {
    label: String,
    fixup_position: usize,
    offset_size: u8,
}

/// An unresolved `switch` jump table.
#[derive(Debug, Clone)]
struct SwitchFixup {
    labels: Vec<String>,
    fixup_position: usize,
    instruction_end_position: usize,
}

/// Assembles CIL from mnemonics.
///
/// Branch offsets are resolved at [`Self::finalize`]; short-form branches whose target is
/// out of range are reported as [`Error::InvalidBranch`] rather than silently widened.
///
/// # Thread Safety
///
/// [`InstructionEncoder`] is not [`Sync`]: it is a single-owner builder.
pub struct InstructionEncoder {
    bytecode: Vec<u8>,
    labels: HashMap<String, u32>,
    fixups: Vec<LabelFixup>,
    switch_fixups: Vec<SwitchFixup>,
    current_stack_depth: i16,
    max_stack_depth: u16,
    label_stack_depths: HashMap<String, i16>,
    unreachable: bool,
}

impl InstructionEncoder {
    /// Create a new empty encoder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bytecode: Vec::new(),
            labels: HashMap::new(),
            fixups: Vec::new(),
            switch_fixups: Vec::new(),
            current_stack_depth: 0,
            max_stack_depth: 0,
            label_stack_depths: HashMap::new(),
            unreachable: false,
        }
    }

    /// Emit one instruction with its operand.
    ///
    /// The stack effect comes from the opcode table, which reports zero pops for calls; use
    /// [`Self::emit_call`] when the callee's arity matters for `max_stack`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidMnemonic`] if the mnemonic is unknown
    /// - [`Error::WrongOperandType`] / [`Error::UnexpectedOperand`] if the operand does not
    ///   match the opcode
    /// - [`Error::Malformed`] on stack underflow in reachable code
    pub fn emit_instruction(&mut self, mnemonic: &str, operand: Option<Operand>) -> Result<()> {
        let (opcode, prefix, metadata) = get_mnemonic_lookup()
            .get(mnemonic)
            .ok_or_else(|| Error::InvalidMnemonic(mnemonic.to_string()))?;

        if *prefix != 0 {
            self.bytecode.push(*prefix);
        }
        self.bytecode.push(*opcode);

        self.emit_operand(operand, metadata.op_type)?;

        self.update_stack_depth(metadata.stack_pops, metadata.stack_pushes)
            .map_err(|e| malformed_error!("Stack error at instruction '{}': {}", mnemonic, e))?;

        if matches!(
            metadata.flow,
            FlowType::Return | FlowType::Throw | FlowType::EndFinally
        ) {
            self.unreachable = true;
        }

        Ok(())
    }

    /// Emit a branch to `label`, resolved at finalization.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidMnemonic`] if the mnemonic is unknown
    /// - [`Error::InvalidBranch`] if the mnemonic is not a branch
    pub fn emit_branch(&mut self, mnemonic: &str, label: &str) -> Result<()> {
        let (opcode, prefix, metadata) = get_mnemonic_lookup()
            .get(mnemonic)
            .ok_or_else(|| Error::InvalidMnemonic(mnemonic.to_string()))?;

        if !matches!(
            metadata.flow,
            FlowType::ConditionalBranch | FlowType::UnconditionalBranch | FlowType::Leave
        ) {
            return Err(Error::InvalidBranch(format!(
                "instruction '{mnemonic}' is not a branch instruction"
            )));
        }

        if *prefix != 0 {
            self.bytecode.push(*prefix);
        }
        self.bytecode.push(*opcode);

        let offset_size = match metadata.op_type {
            OperandType::Int8 => 1,
            OperandType::Int32 => 4,
            _ => {
                return Err(Error::InvalidBranch(
                    "operand type must be Int8 or Int32".to_string(),
                ))
            }
        };

        self.fixups.push(LabelFixup {
            label: label.to_string(),
            fixup_position: self.bytecode.len(),
            offset_size,
        });
        self.bytecode
            .extend(std::iter::repeat(0).take(offset_size as usize));

        self.update_stack_depth(metadata.stack_pops, metadata.stack_pushes)
            .map_err(|e| {
                malformed_error!("Stack error at branch '{}' to '{}': {}", mnemonic, label, e)
            })?;

        // `leave` empties the evaluation stack
        if metadata.flow == FlowType::Leave {
            self.current_stack_depth = 0;
        }
        self.record_label_stack_depth(label)?;

        if matches!(
            metadata.flow,
            FlowType::UnconditionalBranch | FlowType::Leave
        ) {
            self.unreachable = true;
        }

        Ok(())
    }

    /// Emit a `switch` with one target label per case.
    ///
    /// # Errors
    /// Returns [`Error::InvalidBranch`] for an empty label list.
    pub fn emit_switch(&mut self, labels: &[&str]) -> Result<()> {
        if labels.is_empty() {
            return Err(Error::InvalidBranch(
                "switch must have at least one target".to_string(),
            ));
        }

        self.bytecode.push(0x45);
        let num_targets =
            u32::try_from(labels.len()).map_err(|_| malformed_error!("Too many switch targets"))?;
        self.bytecode.extend_from_slice(&num_targets.to_le_bytes());

        let fixup_position = self.bytecode.len();
        self.bytecode
            .extend(std::iter::repeat(0).take(labels.len() * 4));

        self.switch_fixups.push(SwitchFixup {
            labels: labels.iter().map(|s| (*s).to_string()).collect(),
            fixup_position,
            instruction_end_position: self.bytecode.len(),
        });

        self.update_stack_depth(1, 0)
            .map_err(|e| malformed_error!("Stack error at 'switch': {}", e))?;
        for label in labels {
            self.record_label_stack_depth(label)?;
        }

        Ok(())
    }

    /// Emit a call-like instruction with an explicit stack effect.
    ///
    /// `num_args` counts every popped slot including `this`; `newobj` callers pass the
    /// constructor's declared parameters only and `has_result = true`.
    ///
    /// # Errors
    /// Same as [`Self::emit_instruction`].
    pub fn emit_call(
        &mut self,
        mnemonic: &str,
        operand: Option<Operand>,
        num_args: u8,
        has_result: bool,
    ) -> Result<()> {
        let (opcode, prefix, metadata) = get_mnemonic_lookup()
            .get(mnemonic)
            .ok_or_else(|| Error::InvalidMnemonic(mnemonic.to_string()))?;

        if *prefix != 0 {
            self.bytecode.push(*prefix);
        }
        self.bytecode.push(*opcode);

        self.emit_operand(operand, metadata.op_type)?;

        self.update_stack_depth(num_args, u8::from(has_result))
            .map_err(|e| malformed_error!("Stack error at call '{}': {}", mnemonic, e))?;

        Ok(())
    }

    /// Emit the shortest `ldarg` form for `index`.
    ///
    /// # Errors
    /// Propagates errors from [`Self::emit_instruction`].
    pub fn emit_ldarg(&mut self, index: u16) -> Result<()> {
        match index {
            0 => self.emit_instruction("ldarg.0", None),
            1 => self.emit_instruction("ldarg.1", None),
            2 => self.emit_instruction("ldarg.2", None),
            3 => self.emit_instruction("ldarg.3", None),
            _ => self.emit_indexed("ldarg.s", "ldarg", index),
        }
    }

    /// Emit the shortest `starg` form for `index`.
    ///
    /// # Errors
    /// Propagates errors from [`Self::emit_instruction`].
    pub fn emit_starg(&mut self, index: u16) -> Result<()> {
        self.emit_indexed("starg.s", "starg", index)
    }

    /// Emit the shortest `ldarga` form for `index`.
    ///
    /// # Errors
    /// Propagates errors from [`Self::emit_instruction`].
    pub fn emit_ldarga(&mut self, index: u16) -> Result<()> {
        self.emit_indexed("ldarga.s", "ldarga", index)
    }

    /// Emit the shortest `ldloc` form for `index`.
    ///
    /// # Errors
    /// Propagates errors from [`Self::emit_instruction`].
    pub fn emit_ldloc(&mut self, index: u16) -> Result<()> {
        match index {
            0 => self.emit_instruction("ldloc.0", None),
            1 => self.emit_instruction("ldloc.1", None),
            2 => self.emit_instruction("ldloc.2", None),
            3 => self.emit_instruction("ldloc.3", None),
            _ => self.emit_indexed("ldloc.s", "ldloc", index),
        }
    }

    /// Emit the shortest `stloc` form for `index`.
    ///
    /// # Errors
    /// Propagates errors from [`Self::emit_instruction`].
    pub fn emit_stloc(&mut self, index: u16) -> Result<()> {
        match index {
            0 => self.emit_instruction("stloc.0", None),
            1 => self.emit_instruction("stloc.1", None),
            2 => self.emit_instruction("stloc.2", None),
            3 => self.emit_instruction("stloc.3", None),
            _ => self.emit_indexed("stloc.s", "stloc", index),
        }
    }

    /// Emit the shortest `ldloca` form for `index`.
    ///
    /// # Errors
    /// Propagates errors from [`Self::emit_instruction`].
    pub fn emit_ldloca(&mut self, index: u16) -> Result<()> {
        self.emit_indexed("ldloca.s", "ldloca", index)
    }

    /// Emit the shortest `ldc.i4` form for `value`.
    ///
    /// # Errors
    /// Propagates errors from [`Self::emit_instruction`].
    pub fn emit_ldc_i4(&mut self, value: i32) -> Result<()> {
        match value {
            -1 => self.emit_instruction("ldc.i4.m1", None),
            0 => self.emit_instruction("ldc.i4.0", None),
            1 => self.emit_instruction("ldc.i4.1", None),
            2 => self.emit_instruction("ldc.i4.2", None),
            3 => self.emit_instruction("ldc.i4.3", None),
            4 => self.emit_instruction("ldc.i4.4", None),
            5 => self.emit_instruction("ldc.i4.5", None),
            6 => self.emit_instruction("ldc.i4.6", None),
            7 => self.emit_instruction("ldc.i4.7", None),
            8 => self.emit_instruction("ldc.i4.8", None),
            x => match i8::try_from(x) {
                Ok(short) => self.emit_instruction(
                    "ldc.i4.s",
                    Some(Operand::Immediate(Immediate::Int8(short))),
                ),
                Err(_) => {
                    self.emit_instruction("ldc.i4", Some(Operand::Immediate(Immediate::Int32(x))))
                }
            },
        }
    }

    fn emit_indexed(&mut self, short: &str, long: &str, index: u16) -> Result<()> {
        match u8::try_from(index) {
            Ok(index) => {
                self.emit_instruction(short, Some(Operand::Immediate(Immediate::UInt8(index))))
            }
            Err(_) => {
                self.emit_instruction(long, Some(Operand::Immediate(Immediate::UInt16(index))))
            }
        }
    }

    /// Define `name` at the current position.
    ///
    /// # Errors
    ///
    /// - [`Error::DuplicateLabel`] if the label already exists
    /// - [`Error::Malformed`] if a fall-through path reaches the label with a stack depth
    ///   different from the branches targeting it
    pub fn define_label(&mut self, name: &str) -> Result<()> {
        if self.labels.contains_key(name) {
            return Err(Error::DuplicateLabel(name.to_string()));
        }

        if let Some(&expected) = self.label_stack_depths.get(name) {
            if self.unreachable {
                self.current_stack_depth = expected;
            } else if self.current_stack_depth != expected {
                return Err(malformed_error!(
                    "Stack depth mismatch at label '{}': expected {} (from branch), got {} (current)",
                    name,
                    expected,
                    self.current_stack_depth
                ));
            }
        } else if !self.unreachable {
            self.label_stack_depths
                .insert(name.to_string(), self.current_stack_depth);
        } else {
            self.current_stack_depth = 0;
        }

        self.unreachable = false;

        let position = u32::try_from(self.bytecode.len())
            .map_err(|_| malformed_error!("Bytecode length exceeds u32 range"))?;
        self.labels.insert(name.to_string(), position);
        Ok(())
    }

    /// Current write position, i.e. the offset of the next emitted instruction.
    #[must_use]
    pub fn current_position(&self) -> u32 {
        #[allow(clippy::cast_possible_truncation)]
        let position = self.bytecode.len() as u32;
        position
    }

    /// Position of a defined label.
    #[must_use]
    pub fn label_offset(&self, name: &str) -> Option<u32> {
        self.labels.get(name).copied()
    }

    /// The deepest evaluation stack seen so far.
    #[must_use]
    pub fn max_stack_depth(&self) -> u16 {
        self.max_stack_depth
    }

    /// Forces the tracked stack depth, e.g. at the start of a catch handler where the
    /// runtime pushes the exception object.
    pub fn set_stack_depth(&mut self, depth: i16) {
        self.current_stack_depth = depth;
        if let Ok(depth) = u16::try_from(depth) {
            self.max_stack_depth = self.max_stack_depth.max(depth);
        }
        self.unreachable = false;
    }

    /// Resolve all labels and return `(code, max_stack, labels)`.
    ///
    /// # Errors
    ///
    /// - [`Error::UndefinedLabel`] if a branch targets an undefined label
    /// - [`Error::InvalidBranch`] if a short-form offset does not fit in one byte
    pub fn finalize(mut self) -> Result<(Vec<u8>, u16, HashMap<String, u32>)> {
        let fixups = std::mem::take(&mut self.fixups);
        for fixup in &fixups {
            let label_position = self
                .labels
                .get(&fixup.label)
                .ok_or_else(|| Error::UndefinedLabel(fixup.label.clone()))?;

            let next_instruction_pos = fixup.fixup_position + fixup.offset_size as usize;
            let offset = i64::from(*label_position) - next_instruction_pos as i64;
            self.write_branch_offset(offset, fixup)?;
        }

        let switch_fixups = std::mem::take(&mut self.switch_fixups);
        for switch_fixup in &switch_fixups {
            for (i, label) in switch_fixup.labels.iter().enumerate() {
                let label_position = self
                    .labels
                    .get(label)
                    .ok_or_else(|| Error::UndefinedLabel(label.clone()))?;

                let offset = i64::from(*label_position) - switch_fixup.instruction_end_position as i64;
                let offset = i32::try_from(offset)
                    .map_err(|_| malformed_error!("Switch offset exceeds i32 range"))?;

                let target_pos = switch_fixup.fixup_position + i * 4;
                self.bytecode[target_pos..target_pos + 4].copy_from_slice(&offset.to_le_bytes());
            }
        }

        Ok((self.bytecode, self.max_stack_depth, self.labels))
    }

    fn emit_operand(&mut self, operand: Option<Operand>, expected: OperandType) -> Result<()> {
        let wrong = |expected: &str| Error::WrongOperandType {
            expected: expected.to_string(),
        };

        match (expected, operand) {
            (OperandType::None, None) => {}
            (OperandType::None, Some(_)) => return Err(Error::UnexpectedOperand),
            (OperandType::Int8, Some(Operand::Immediate(Immediate::Int8(val)))) => {
                self.bytecode.extend_from_slice(&val.to_le_bytes());
            }
            (OperandType::UInt8, Some(Operand::Immediate(Immediate::UInt8(val)))) => {
                self.bytecode.push(val);
            }
            (OperandType::Int16, Some(Operand::Immediate(Immediate::Int16(val)))) => {
                self.bytecode.extend_from_slice(&val.to_le_bytes());
            }
            (OperandType::UInt16, Some(Operand::Immediate(Immediate::UInt16(val)))) => {
                self.bytecode.extend_from_slice(&val.to_le_bytes());
            }
            (OperandType::Int32, Some(Operand::Immediate(Immediate::Int32(val)))) => {
                self.bytecode.extend_from_slice(&val.to_le_bytes());
            }
            (OperandType::UInt32, Some(Operand::Immediate(Immediate::UInt32(val)))) => {
                self.bytecode.extend_from_slice(&val.to_le_bytes());
            }
            (OperandType::Int64, Some(Operand::Immediate(Immediate::Int64(val)))) => {
                self.bytecode.extend_from_slice(&val.to_le_bytes());
            }
            (OperandType::UInt64, Some(Operand::Immediate(Immediate::UInt64(val)))) => {
                self.bytecode.extend_from_slice(&val.to_le_bytes());
            }
            (OperandType::Float32, Some(Operand::Immediate(Immediate::Float32(val)))) => {
                self.bytecode.extend_from_slice(&val.to_le_bytes());
            }
            (OperandType::Float64, Some(Operand::Immediate(Immediate::Float64(val)))) => {
                self.bytecode.extend_from_slice(&val.to_le_bytes());
            }
            (OperandType::Token, Some(Operand::Token(token))) => {
                self.bytecode.extend_from_slice(&token.value().to_le_bytes());
            }
            (OperandType::Switch, Some(Operand::Switch(targets))) => {
                let targets_len = u32::try_from(targets.len())
                    .map_err(|_| malformed_error!("Too many switch targets"))?;
                self.bytecode.extend_from_slice(&targets_len.to_le_bytes());
                for target in targets {
                    self.bytecode.extend_from_slice(&target.to_le_bytes());
                }
            }
            (expected, _) => return Err(wrong(&format!("{expected:?}"))),
        }
        Ok(())
    }

    fn write_branch_offset(&mut self, offset: i64, fixup: &LabelFixup) -> Result<()> {
        match fixup.offset_size {
            1 => {
                let offset = i8::try_from(offset).map_err(|_| {
                    Error::InvalidBranch(format!(
                        "offset {offset} out of range for 1-byte instruction"
                    ))
                })?;
                self.bytecode[fixup.fixup_position] = offset.to_le_bytes()[0];
            }
            4 => {
                let offset = i32::try_from(offset).map_err(|_| {
                    Error::InvalidBranch(format!(
                        "offset {offset} out of range for 4-byte instruction"
                    ))
                })?;
                self.bytecode[fixup.fixup_position..fixup.fixup_position + 4]
                    .copy_from_slice(&offset.to_le_bytes());
            }
            size => {
                return Err(Error::InvalidBranch(format!(
                    "invalid offset size: {size} bytes"
                )))
            }
        }
        Ok(())
    }

    fn update_stack_depth(&mut self, pops: u8, pushes: u8) -> Result<()> {
        self.current_stack_depth += i16::from(pushes) - i16::from(pops);

        // Depth is meaningless in unreachable code; only reachable underflow is an error
        if self.current_stack_depth < 0 && !self.unreachable {
            return Err(malformed_error!(
                "Stack underflow: depth became {} after instruction with {} pops, {} pushes",
                self.current_stack_depth,
                pops,
                pushes
            ));
        }

        if self.current_stack_depth < 0 {
            self.current_stack_depth = 0;
        }

        let current_depth = u16::try_from(self.current_stack_depth)
            .map_err(|_| malformed_error!("Stack depth exceeds u16 range"))?;
        self.max_stack_depth = self.max_stack_depth.max(current_depth);

        Ok(())
    }

    fn record_label_stack_depth(&mut self, label: &str) -> Result<()> {
        if self.unreachable {
            return Ok(());
        }

        if let Some(&expected) = self.label_stack_depths.get(label) {
            if self.current_stack_depth != expected {
                return Err(malformed_error!(
                    "Stack depth mismatch for branch to '{}': expected {}, but branch has {}",
                    label,
                    expected,
                    self.current_stack_depth
                ));
            }
        } else {
            self.label_stack_depths
                .insert(label.to_string(), self.current_stack_depth);
        }
        Ok(())
    }
}

impl Default for InstructionEncoder {
    fn default() -> Self {
        Self::new()
    }
}
