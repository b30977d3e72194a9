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

//! CIL instruction model, decoder and assembler.
//!
//! This module is the IL layer of the crate. The interpreter decodes method bodies through
//! it, and tests and tools author method bodies with its assembler.
//!
//! # Architecture
//!
//! - [`opcodes`] - [`ILOpcode`] identifiers for every assigned opcode
//! - [`instructions`] - static per-opcode tables (mnemonic, operand layout, flow, stack effect)
//! - [`instruction`] - the decoded [`Instruction`] with typed [`Operand`]s
//! - [`decoder`] - [`decode_instruction`] / [`decode_stream`] over a [`Parser`]
//! - [`encoder`] - [`InstructionEncoder`], mnemonic-and-label assembly
//! - [`io`] / [`parser`] - little-endian primitives and the byte cursor
//!
//! # Examples
//!
//! ```rust
//! use cilpreinit::assembly::{decode_stream, InstructionEncoder};
//!
//! let mut encoder = InstructionEncoder::new();
//! encoder.emit_ldc_i4(42)?;
//! encoder.emit_instruction("pop", None)?;
//! encoder.emit_instruction("ret", None)?;
//! let (code, _, _) = encoder.finalize()?;
//!
//! let decoded = decode_stream(&code)?;
//! assert_eq!(decoded[0].get_i32_operand(), Some(42));
//! # Ok::<(), cilpreinit::Error>(())
//! ```

pub mod decoder;
pub mod encoder;
pub mod instruction;
pub mod instructions;
pub mod io;
pub mod opcodes;
pub mod parser;

pub use decoder::{decode_instruction, decode_stream};
pub use encoder::InstructionEncoder;
pub use instruction::{FlowType, Immediate, Instruction, Operand, OperandType, StackBehavior};
pub use instructions::{CilInstruction, INSTRUCTIONS, INSTRUCTIONS_FE};
pub use opcodes::ILOpcode;
pub use parser::Parser;
