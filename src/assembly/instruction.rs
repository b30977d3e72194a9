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

//! CIL instruction representation, operand types, and decoding metadata.
//!
//! # Key Components
//!
//! - [`crate::assembly::instruction::Instruction`] - Complete decoded instruction representation
//! - [`crate::assembly::instruction::Operand`] - Type-safe operand representation
//! - [`crate::assembly::instruction::Immediate`] - Immediate value types with conversions
//! - [`crate::assembly::instruction::FlowType`] - Control flow behavior classification
//! - [`crate::assembly::instruction::StackBehavior`] - Stack effect metadata
//!
//! # Usage Examples
//!
//! ```rust
//! use cilpreinit::assembly::{Immediate, Operand, OperandType};
//!
//! let op_type = OperandType::Int32;
//! assert_eq!(op_type.size(), Some(4));
//!
//! let imm = Immediate::Int8(-1);
//! let value: u64 = imm.into();
//! assert_eq!(value, u64::MAX);
//!
//! let operand = Operand::Immediate(Immediate::Int32(42));
//! assert_eq!(operand.as_string(), Some("Int32(42)".to_string()));
//! ```

use std::fmt::{self, UpperHex};

use crate::{assembly::opcodes::ILOpcode, metadata::token::Token};

/// Types of operands for CIL instructions.
///
/// # Thread Safety
///
/// [`OperandType`] is [`std::marker::Send`] and [`std::marker::Sync`] as it only contains primitive data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandType {
    /// No operand present
    None,
    /// Signed 8-bit integer
    Int8,
    /// Unsigned 8-bit integer
    UInt8,
    /// Signed 16-bit integer
    Int16,
    /// Unsigned 16-bit integer
    UInt16,
    /// Signed 32-bit integer
    Int32,
    /// Unsigned 32-bit integer
    UInt32,
    /// Signed 64-bit integer
    Int64,
    /// Unsigned 64-bit integer
    UInt64,
    /// 32-bit floating point
    Float32,
    /// 64-bit floating point
    Float64,
    /// Metadata token reference
    Token,
    /// Switch table operand
    Switch,
}

impl OperandType {
    /// Returns the size in bytes of this operand type.
    ///
    /// Returns `None` for `Switch`, whose size depends on the encoded target count.
    #[must_use]
    pub const fn size(&self) -> Option<usize> {
        match self {
            OperandType::None => Some(0),
            OperandType::Int8 | OperandType::UInt8 => Some(1),
            OperandType::Int16 | OperandType::UInt16 => Some(2),
            OperandType::Int32 | OperandType::UInt32 | OperandType::Float32 | OperandType::Token => {
                Some(4)
            }
            OperandType::Int64 | OperandType::UInt64 | OperandType::Float64 => Some(8),
            OperandType::Switch => None,
        }
    }
}

/// Immediate values embedded in CIL instructions.
///
/// # Thread Safety
///
/// [`Immediate`] is [`std::marker::Send`] and [`std::marker::Sync`] as it only contains primitive data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Immediate {
    /// Signed 8-bit immediate value
    Int8(i8),
    /// Unsigned 8-bit immediate value
    UInt8(u8),
    /// Signed 16-bit immediate value
    Int16(i16),
    /// Unsigned 16-bit immediate value
    UInt16(u16),
    /// Signed 32-bit immediate value
    Int32(i32),
    /// Unsigned 32-bit immediate value
    UInt32(u32),
    /// Signed 64-bit immediate value
    Int64(i64),
    /// Unsigned 64-bit immediate value
    UInt64(u64),
    /// 32-bit floating point immediate value
    Float32(f32),
    /// 64-bit floating point immediate value
    Float64(f64),
}

impl UpperHex for Immediate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Immediate::Int8(value) => write!(f, "{value:02X}"),
            Immediate::UInt8(value) => write!(f, "{value:02X}"),
            Immediate::Int16(value) => write!(f, "{value:04X}"),
            Immediate::UInt16(value) => write!(f, "{value:04X}"),
            Immediate::Int32(value) => write!(f, "{value:08X}"),
            Immediate::UInt32(value) => write!(f, "{value:08X}"),
            Immediate::Int64(value) => write!(f, "{value:016X}"),
            Immediate::UInt64(value) => write!(f, "{value:016X}"),
            Immediate::Float32(value) => write!(f, "{:08X}", value.to_bits()),
            Immediate::Float64(value) => write!(f, "{:016X}", value.to_bits()),
        }
    }
}

impl From<Immediate> for u64 {
    fn from(val: Immediate) -> Self {
        match val {
            // Signed immediates keep their two's complement bit pattern
            #[allow(clippy::cast_sign_loss)]
            Immediate::Int8(value) => value as u64,
            Immediate::UInt8(value) => u64::from(value),
            #[allow(clippy::cast_sign_loss)]
            Immediate::Int16(value) => value as u64,
            Immediate::UInt16(value) => u64::from(value),
            #[allow(clippy::cast_sign_loss)]
            Immediate::Int32(value) => value as u64,
            Immediate::UInt32(value) => u64::from(value),
            #[allow(clippy::cast_sign_loss)]
            Immediate::Int64(value) => value as u64,
            Immediate::UInt64(value) => value,
            Immediate::Float32(value) => u64::from(value.to_bits()),
            Immediate::Float64(value) => value.to_bits(),
        }
    }
}

/// A decoded instruction operand.
///
/// # Thread Safety
///
/// [`Operand`] is [`std::marker::Send`] and [`std::marker::Sync`] as all variants contain thread-safe types.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand present
    None,
    /// Immediate value (constant embedded in instruction)
    Immediate(Immediate),
    /// Metadata token reference
    Token(Token),
    /// Switch table with signed branch offsets relative to the end of the instruction
    Switch(Vec<i32>),
}

impl Operand {
    /// Returns a formatted string representation of the operand for tracing output.
    #[must_use]
    pub fn as_string(&self) -> Option<String> {
        match self {
            Operand::None => None,
            Operand::Immediate(imm) => Some(format!("{imm:?}")),
            Operand::Token(t) => Some(format!("0x{:08X}", t.value())),
            Operand::Switch(targets) => Some(format!("switch({})", targets.len())),
        }
    }
}

/// How an instruction affects control flow.
///
/// # Thread Safety
///
/// [`FlowType`] is [`std::marker::Send`] and [`std::marker::Sync`] as it only contains unit variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowType {
    /// Normal execution continues to next instruction
    Sequential,
    /// Conditional branch to another location
    ConditionalBranch,
    /// Always branches to another location (unconditional jump)
    UnconditionalBranch,
    /// Call to another method
    Call,
    /// Returns from current method
    Return,
    /// Multi-way branch (switch statement)
    Switch,
    /// Exception throwing
    Throw,
    /// End of finally block
    EndFinally,
    /// Leave protected region (try/catch/finally)
    Leave,
    /// Prefix modifying the instruction that follows
    Meta,
}

/// Stack effect of an instruction.
///
/// Calls report zero pops; their real effect depends on the callee's signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackBehavior {
    /// Number of items popped from stack
    pub pops: u8,
    /// Number of items pushed to stack
    pub pushes: u8,
    /// Net effect on stack depth (pushes - pops)
    pub net_effect: i8,
}

/// A decoded CIL instruction.
///
/// # Examples
///
/// ```rust
/// use cilpreinit::assembly::{decode_instruction, Parser};
///
/// let bytecode = [0x2B, 0x02, 0x00, 0x00, 0x2A];
/// let mut parser = Parser::new(&bytecode);
/// let instruction = decode_instruction(&mut parser)?;
///
/// assert_eq!(instruction.mnemonic, "br.s");
/// assert_eq!(instruction.branch_targets, vec![4]);
/// assert!(instruction.is_branch());
/// # Ok::<(), cilpreinit::Error>(())
/// ```
///
/// # Thread Safety
///
/// [`Instruction`] is [`std::marker::Send`] and [`std::marker::Sync`] as all fields contain thread-safe types.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Offset of the first byte (prefix included) within the method body
    pub offset: u32,
    /// Size of this instruction in bytes
    pub size: u32,
    /// Primary opcode byte
    pub opcode: u8,
    /// Prefix byte (0xFE for two-byte opcodes, 0 otherwise)
    pub prefix: u8,
    /// Opcode identifier
    pub code: ILOpcode,
    /// Human-readable instruction mnemonic (e.g., "add", "ldloc.s", "ret")
    pub mnemonic: &'static str,
    /// How this instruction affects control flow
    pub flow_type: FlowType,
    /// The operand data for this instruction
    pub operand: Operand,
    /// How this instruction affects the evaluation stack
    pub stack_behavior: StackBehavior,
    /// Branch targets as method-relative offsets.
    ///
    /// Targets are computed with signed arithmetic and are not validated: a malformed body
    /// can produce a negative target or one past the end of the method.
    pub branch_targets: Vec<i64>,
}

impl Instruction {
    /// Check if this instruction is a branch instruction.
    #[must_use]
    pub fn is_branch(&self) -> bool {
        matches!(
            self.flow_type,
            FlowType::ConditionalBranch
                | FlowType::UnconditionalBranch
                | FlowType::Switch
                | FlowType::Leave
        )
    }

    /// Check if this instruction is a prefix (`constrained.`, `volatile.`, ...).
    #[must_use]
    pub fn is_prefix(&self) -> bool {
        self.flow_type == FlowType::Meta
    }

    /// Offset of the instruction that follows this one.
    #[must_use]
    pub fn next_offset(&self) -> u32 {
        self.offset + self.size
    }

    /// Returns the metadata token operand, if any.
    #[must_use]
    pub fn get_token_operand(&self) -> Option<Token> {
        match self.operand {
            Operand::Token(token) => Some(token),
            _ => None,
        }
    }

    /// Returns an unsigned 8-bit immediate, if this instruction carries one.
    #[must_use]
    pub fn get_u8_operand(&self) -> Option<u8> {
        match self.operand {
            Operand::Immediate(Immediate::UInt8(value)) => Some(value),
            _ => None,
        }
    }

    /// Returns the local or argument index operand of the `.s` and long forms.
    #[must_use]
    pub fn get_index_operand(&self) -> Option<u16> {
        match self.operand {
            Operand::Immediate(Immediate::UInt8(value)) => Some(u16::from(value)),
            Operand::Immediate(Immediate::UInt16(value)) => Some(value),
            _ => None,
        }
    }

    /// Returns a signed 32-bit immediate, widening `ldc.i4.s` style 8-bit operands.
    #[must_use]
    pub fn get_i32_operand(&self) -> Option<i32> {
        match self.operand {
            Operand::Immediate(Immediate::Int8(value)) => Some(i32::from(value)),
            Operand::Immediate(Immediate::Int32(value)) => Some(value),
            _ => None,
        }
    }

    /// Returns a signed 64-bit immediate.
    #[must_use]
    pub fn get_i64_operand(&self) -> Option<i64> {
        match self.operand {
            Operand::Immediate(Immediate::Int64(value)) => Some(value),
            _ => None,
        }
    }

    /// Returns a 32-bit float immediate.
    #[must_use]
    pub fn get_f32_operand(&self) -> Option<f32> {
        match self.operand {
            Operand::Immediate(Immediate::Float32(value)) => Some(value),
            _ => None,
        }
    }

    /// Returns a 64-bit float immediate.
    #[must_use]
    pub fn get_f64_operand(&self) -> Option<f64> {
        match self.operand {
            Operand::Immediate(Immediate::Float64(value)) => Some(value),
            _ => None,
        }
    }

    /// Returns the single branch target of a conditional or unconditional branch.
    #[must_use]
    pub fn get_branch_target(&self) -> Option<i64> {
        match self.flow_type {
            FlowType::ConditionalBranch | FlowType::UnconditionalBranch | FlowType::Leave => {
                self.branch_targets.first().copied()
            }
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IL_{:04X}: {}", self.offset, self.mnemonic)?;
        if let Some(operand) = self.operand.as_string() {
            write!(f, " {operand}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_instruction(flow_type: FlowType, operand: Operand) -> Instruction {
        Instruction {
            offset: 0x10,
            size: 5,
            opcode: 0x38,
            prefix: 0,
            code: ILOpcode::Br,
            mnemonic: "br",
            flow_type,
            operand,
            stack_behavior: StackBehavior {
                pops: 0,
                pushes: 0,
                net_effect: 0,
            },
            branch_targets: vec![0x20],
        }
    }

    #[test]
    fn operand_sizes() {
        assert_eq!(OperandType::None.size(), Some(0));
        assert_eq!(OperandType::UInt16.size(), Some(2));
        assert_eq!(OperandType::Token.size(), Some(4));
        assert_eq!(OperandType::Float64.size(), Some(8));
        assert_eq!(OperandType::Switch.size(), None);
    }

    #[test]
    fn immediate_upper_hex() {
        assert_eq!(format!("{:X}", Immediate::Int8(-1)), "FF");
        assert_eq!(format!("{:X}", Immediate::UInt16(0x1234)), "1234");
        assert_eq!(format!("{:X}", Immediate::Float32(1.0)), "3F800000");
    }

    #[test]
    fn branch_target_only_for_branches() {
        let branch = make_instruction(
            FlowType::UnconditionalBranch,
            Operand::Immediate(Immediate::Int32(11)),
        );
        assert_eq!(branch.get_branch_target(), Some(0x20));
        assert_eq!(branch.next_offset(), 0x15);
        assert_eq!(branch.to_string(), "IL_0010: br Int32(11)");

        let call = make_instruction(FlowType::Call, Operand::Token(Token::new(0x0600_0001)));
        assert_eq!(call.get_branch_target(), None);
        assert_eq!(call.get_token_operand(), Some(Token::new(0x0600_0001)));
    }

    #[test]
    fn index_operand_accepts_both_widths() {
        let short = make_instruction(
            FlowType::Sequential,
            Operand::Immediate(Immediate::UInt8(3)),
        );
        let long = make_instruction(
            FlowType::Sequential,
            Operand::Immediate(Immediate::UInt16(300)),
        );
        assert_eq!(short.get_index_operand(), Some(3));
        assert_eq!(long.get_index_operand(), Some(300));
        assert_eq!(short.get_i32_operand(), None);
    }
}
