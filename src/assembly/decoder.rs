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

//! CIL instruction decoding.
//!
//! [`decode_instruction`] turns the bytes at a [`Parser`]'s position into an
//! [`Instruction`], consulting the static opcode tables for the operand layout. Offsets are
//! method-relative: the parser position when decoding starts is the instruction's offset.
//!
//! # Examples
//!
//! ```rust
//! use cilpreinit::assembly::decode_stream;
//!
//! // ldc.i4.s 42; stsfld 0x04000001; ret
//! let code = [0x1F, 0x2A, 0x80, 0x01, 0x00, 0x00, 0x04, 0x2A];
//! let instructions = decode_stream(&code)?;
//! let mnemonics: Vec<_> = instructions.iter().map(|i| i.mnemonic).collect();
//! assert_eq!(mnemonics, ["ldc.i4.s", "stsfld", "ret"]);
//! # Ok::<(), cilpreinit::Error>(())
//! ```

use crate::{
    assembly::{
        instruction::{FlowType, Immediate, Instruction, Operand, OperandType, StackBehavior},
        instructions::{INSTRUCTIONS, INSTRUCTIONS_FE},
        parser::Parser,
    },
    metadata::token::Token,
    Result,
};

/// Decodes every instruction of a method body.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for reserved opcodes and
/// [`crate::Error::OutOfBounds`] for truncated operands.
pub fn decode_stream(code: &[u8]) -> Result<Vec<Instruction>> {
    let mut parser = Parser::new(code);
    let mut instructions = Vec::new();
    while parser.has_more_data() {
        instructions.push(decode_instruction(&mut parser)?);
    }
    Ok(instructions)
}

/// Decodes a single instruction at the parser's current position.
///
/// Prefix opcodes (`constrained.`, `volatile.`, ...) decode as instructions of their own
/// with [`FlowType::Meta`]; the consumer applies them to the instruction that follows.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for reserved opcodes and
/// [`crate::Error::OutOfBounds`] for truncated operands.
pub fn decode_instruction(parser: &mut Parser) -> Result<Instruction> {
    let offset = parser.pos();
    let first_byte = parser.read_le::<u8>()?;

    let (cil_instruction, prefix, opcode) = match first_byte {
        0xFE => {
            let second_byte = parser.read_le::<u8>()?;

            match INSTRUCTIONS_FE.get(second_byte as usize) {
                Some(instr) => (instr, 0xFE, second_byte),
                None => return Err(malformed_error!("Invalid opcode: FE {:02X}", second_byte)),
            }
        }
        _ => match INSTRUCTIONS.get(first_byte as usize) {
            Some(instr) => (instr, 0, first_byte),
            None => return Err(malformed_error!("Invalid opcode: {:02X}", first_byte)),
        },
    };

    if cil_instruction.is_reserved() {
        return Err(malformed_error!(
            "Reserved opcode: {:04X}",
            (u16::from(prefix) << 8) | u16::from(opcode)
        ));
    }

    let operand = match cil_instruction.op_type {
        OperandType::None => Operand::None,
        OperandType::Int8 => Operand::Immediate(Immediate::Int8(parser.read_le::<i8>()?)),
        OperandType::UInt8 => Operand::Immediate(Immediate::UInt8(parser.read_le::<u8>()?)),
        OperandType::Int16 => Operand::Immediate(Immediate::Int16(parser.read_le::<i16>()?)),
        OperandType::UInt16 => Operand::Immediate(Immediate::UInt16(parser.read_le::<u16>()?)),
        OperandType::Int32 => Operand::Immediate(Immediate::Int32(parser.read_le::<i32>()?)),
        OperandType::UInt32 => Operand::Immediate(Immediate::UInt32(parser.read_le::<u32>()?)),
        OperandType::Int64 => Operand::Immediate(Immediate::Int64(parser.read_le::<i64>()?)),
        OperandType::UInt64 => Operand::Immediate(Immediate::UInt64(parser.read_le::<u64>()?)),
        OperandType::Float32 => Operand::Immediate(Immediate::Float32(parser.read_le::<f32>()?)),
        OperandType::Float64 => Operand::Immediate(Immediate::Float64(parser.read_le::<f64>()?)),
        OperandType::Token => Operand::Token(Token::new(parser.read_le::<u32>()?)),
        OperandType::Switch => {
            let case_count = parser.read_le::<u32>()? as usize;
            if case_count.saturating_mul(4) > parser.len() - parser.pos() {
                return Err(out_of_bounds_error!());
            }

            let mut targets = Vec::with_capacity(case_count);
            for _ in 0..case_count {
                targets.push(parser.read_le::<i32>()?);
            }

            Operand::Switch(targets)
        }
    };

    #[allow(clippy::cast_possible_truncation)]
    let offset = offset as u32;
    #[allow(clippy::cast_possible_truncation)]
    let size = parser.pos() as u32 - offset;

    let mut instruction = Instruction {
        offset,
        size,
        opcode,
        prefix,
        code: cil_instruction.code,
        mnemonic: cil_instruction.instr,
        flow_type: cil_instruction.flow,
        stack_behavior: StackBehavior {
            pops: cil_instruction.stack_pops,
            pushes: cil_instruction.stack_pushes,
            // Stack effects can legitimately be negative
            #[allow(clippy::cast_possible_wrap)]
            net_effect: cil_instruction.stack_pushes as i8 - cil_instruction.stack_pops as i8,
        },
        operand,
        branch_targets: Vec::new(),
    };

    let next = i64::from(instruction.next_offset());
    match instruction.flow_type {
        FlowType::ConditionalBranch | FlowType::UnconditionalBranch | FlowType::Leave => {
            if let Some(delta) = instruction.get_i32_operand() {
                instruction.branch_targets.push(next + i64::from(delta));
            }
        }
        FlowType::Switch => {
            if let Operand::Switch(targets) = &instruction.operand {
                instruction.branch_targets = targets
                    .iter()
                    .map(|&delta| next + i64::from(delta))
                    .collect();
            }
        }
        _ => {}
    }

    Ok(instruction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{assembly::opcodes::ILOpcode, Error};

    #[test]
    fn decode_instruction_basic() {
        let bytecode = [0x20, 0x2A, 0x00, 0x00, 0x00];
        let mut parser = Parser::new(&bytecode);
        let instruction = decode_instruction(&mut parser).unwrap();

        assert_eq!(instruction.code, ILOpcode::LdcI4);
        assert_eq!(instruction.size, 5);
        assert_eq!(instruction.get_i32_operand(), Some(42));
        assert_eq!(instruction.stack_behavior.net_effect, 1);
    }

    #[test]
    fn decode_instruction_two_byte() {
        let bytecode = [0xFE, 0x01];
        let mut parser = Parser::new(&bytecode);
        let instruction = decode_instruction(&mut parser).unwrap();

        assert_eq!(instruction.prefix, 0xFE);
        assert_eq!(instruction.opcode, 0x01);
        assert_eq!(instruction.code, ILOpcode::Ceq);
        assert_eq!(instruction.mnemonic, "ceq");
    }

    #[test]
    fn decode_instruction_backward_branch() {
        // nop; nop; br.s -4
        let bytecode = [0x00, 0x00, 0x2B, 0xFC];
        let instructions = decode_stream(&bytecode).unwrap();
        assert_eq!(instructions[2].branch_targets, vec![0]);
    }

    #[test]
    fn decode_instruction_switch() {
        // switch (2 targets: +0, +5); 5 bytes of nop
        let bytecode = [
            0x45, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x05, 0x00, 0x00, 0x00,
        ];
        let mut parser = Parser::new(&bytecode);
        let instruction = decode_instruction(&mut parser).unwrap();

        assert_eq!(instruction.size, 13);
        assert_eq!(instruction.operand, Operand::Switch(vec![0, 5]));
        assert_eq!(instruction.branch_targets, vec![13, 18]);
    }

    #[test]
    fn decode_switch_with_huge_count_is_out_of_bounds() {
        let bytecode = [0x45, 0xFF, 0xFF, 0xFF, 0x7F];
        let mut parser = Parser::new(&bytecode);
        assert!(matches!(
            decode_instruction(&mut parser),
            Err(Error::OutOfBounds)
        ));
    }

    #[test]
    fn decode_instruction_invalid_opcode() {
        let bytecode = [0x24];
        let mut parser = Parser::new(&bytecode);
        assert!(matches!(
            decode_instruction(&mut parser),
            Err(Error::Malformed { .. })
        ));

        let bytecode = [0xFE, 0x30];
        let mut parser = Parser::new(&bytecode);
        assert!(decode_instruction(&mut parser).is_err());
    }

    #[test]
    fn decode_instruction_token() {
        let bytecode = [0x7E, 0x01, 0x00, 0x00, 0x04];
        let mut parser = Parser::new(&bytecode);
        let instruction = decode_instruction(&mut parser).unwrap();
        assert_eq!(instruction.get_token_operand(), Some(Token::new(0x0400_0001)));
    }

    #[test]
    fn decode_truncated_operand() {
        let bytecode = [0x21, 0x01, 0x02];
        let mut parser = Parser::new(&bytecode);
        assert!(matches!(
            decode_instruction(&mut parser),
            Err(Error::OutOfBounds)
        ));
    }

    #[test]
    fn decode_prefix_is_meta() {
        let bytecode = [0xFE, 0x16, 0x01, 0x00, 0x00, 0x02, 0x6F, 0x01, 0x00, 0x00, 0x06];
        let instructions = decode_stream(&bytecode).unwrap();
        assert_eq!(instructions.len(), 2);
        assert!(instructions[0].is_prefix());
        assert_eq!(instructions[0].code, ILOpcode::Constrained);
        assert_eq!(instructions[1].code, ILOpcode::Callvirt);
        assert_eq!(instructions[1].offset, 6);
    }
}
