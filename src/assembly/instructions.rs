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

//! Static opcode tables for single-byte and `0xFE`-prefixed CIL instructions.
//!
//! Each table is indexed by the opcode byte. Reserved encodings hold an entry with an empty
//! mnemonic so that lookups stay O(1) and the decoder can reject them explicitly.

use crate::assembly::{
    instruction::{FlowType, OperandType},
    opcodes::ILOpcode,
};

/// Static description of one CIL opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CilInstruction {
    /// Opcode identifier, [`ILOpcode::Nop`] for reserved encodings
    pub code: ILOpcode,
    /// Mnemonic, empty for reserved encodings
    pub instr: &'static str,
    /// Operand encoded after the opcode
    pub op_type: OperandType,
    /// Control-flow classification
    pub flow: FlowType,
    /// Fixed number of stack slots popped
    pub stack_pops: u8,
    /// Fixed number of stack slots pushed
    pub stack_pushes: u8,
}

impl CilInstruction {
    /// Returns `true` for encodings that ECMA-335 leaves unassigned.
    #[must_use]
    pub const fn is_reserved(&self) -> bool {
        self.instr.is_empty()
    }
}

const fn op(
    code: ILOpcode,
    instr: &'static str,
    op_type: OperandType,
    flow: FlowType,
    stack_pops: u8,
    stack_pushes: u8,
) -> CilInstruction {
    CilInstruction {
        code,
        instr,
        op_type,
        flow,
        stack_pops,
        stack_pushes,
    }
}

const RESERVED: CilInstruction = op(ILOpcode::Nop, "", OperandType::None, FlowType::Sequential, 0, 0);

/// Single-byte opcodes `0x00..=0xE0`.
pub static INSTRUCTIONS: [CilInstruction; 225] = [
    op(ILOpcode::Nop, "nop", OperandType::None, FlowType::Sequential, 0, 0),
    op(ILOpcode::Break, "break", OperandType::None, FlowType::Sequential, 0, 0),
    op(ILOpcode::Ldarg0, "ldarg.0", OperandType::None, FlowType::Sequential, 0, 1),
    op(ILOpcode::Ldarg1, "ldarg.1", OperandType::None, FlowType::Sequential, 0, 1),
    op(ILOpcode::Ldarg2, "ldarg.2", OperandType::None, FlowType::Sequential, 0, 1),
    op(ILOpcode::Ldarg3, "ldarg.3", OperandType::None, FlowType::Sequential, 0, 1),
    op(ILOpcode::Ldloc0, "ldloc.0", OperandType::None, FlowType::Sequential, 0, 1),
    op(ILOpcode::Ldloc1, "ldloc.1", OperandType::None, FlowType::Sequential, 0, 1),
    op(ILOpcode::Ldloc2, "ldloc.2", OperandType::None, FlowType::Sequential, 0, 1),
    op(ILOpcode::Ldloc3, "ldloc.3", OperandType::None, FlowType::Sequential, 0, 1),
    op(ILOpcode::Stloc0, "stloc.0", OperandType::None, FlowType::Sequential, 1, 0),
    op(ILOpcode::Stloc1, "stloc.1", OperandType::None, FlowType::Sequential, 1, 0),
    op(ILOpcode::Stloc2, "stloc.2", OperandType::None, FlowType::Sequential, 1, 0),
    op(ILOpcode::Stloc3, "stloc.3", OperandType::None, FlowType::Sequential, 1, 0),
    op(ILOpcode::LdargS, "ldarg.s", OperandType::UInt8, FlowType::Sequential, 0, 1),
    op(ILOpcode::LdargaS, "ldarga.s", OperandType::UInt8, FlowType::Sequential, 0, 1),
    op(ILOpcode::StargS, "starg.s", OperandType::UInt8, FlowType::Sequential, 1, 0),
    op(ILOpcode::LdlocS, "ldloc.s", OperandType::UInt8, FlowType::Sequential, 0, 1),
    op(ILOpcode::LdlocaS, "ldloca.s", OperandType::UInt8, FlowType::Sequential, 0, 1),
    op(ILOpcode::StlocS, "stloc.s", OperandType::UInt8, FlowType::Sequential, 1, 0),
    op(ILOpcode::Ldnull, "ldnull", OperandType::None, FlowType::Sequential, 0, 1),
    op(ILOpcode::LdcI4M1, "ldc.i4.m1", OperandType::None, FlowType::Sequential, 0, 1),
    op(ILOpcode::LdcI40, "ldc.i4.0", OperandType::None, FlowType::Sequential, 0, 1),
    op(ILOpcode::LdcI41, "ldc.i4.1", OperandType::None, FlowType::Sequential, 0, 1),
    op(ILOpcode::LdcI42, "ldc.i4.2", OperandType::None, FlowType::Sequential, 0, 1),
    op(ILOpcode::LdcI43, "ldc.i4.3", OperandType::None, FlowType::Sequential, 0, 1),
    op(ILOpcode::LdcI44, "ldc.i4.4", OperandType::None, FlowType::Sequential, 0, 1),
    op(ILOpcode::LdcI45, "ldc.i4.5", OperandType::None, FlowType::Sequential, 0, 1),
    op(ILOpcode::LdcI46, "ldc.i4.6", OperandType::None, FlowType::Sequential, 0, 1),
    op(ILOpcode::LdcI47, "ldc.i4.7", OperandType::None, FlowType::Sequential, 0, 1),
    op(ILOpcode::LdcI48, "ldc.i4.8", OperandType::None, FlowType::Sequential, 0, 1),
    op(ILOpcode::LdcI4S, "ldc.i4.s", OperandType::Int8, FlowType::Sequential, 0, 1),
    op(ILOpcode::LdcI4, "ldc.i4", OperandType::Int32, FlowType::Sequential, 0, 1),
    op(ILOpcode::LdcI8, "ldc.i8", OperandType::Int64, FlowType::Sequential, 0, 1),
    op(ILOpcode::LdcR4, "ldc.r4", OperandType::Float32, FlowType::Sequential, 0, 1),
    op(ILOpcode::LdcR8, "ldc.r8", OperandType::Float64, FlowType::Sequential, 0, 1),
    RESERVED,
    op(ILOpcode::Dup, "dup", OperandType::None, FlowType::Sequential, 1, 2),
    op(ILOpcode::Pop, "pop", OperandType::None, FlowType::Sequential, 1, 0),
    op(ILOpcode::Jmp, "jmp", OperandType::Token, FlowType::Call, 0, 0),
    op(ILOpcode::Call, "call", OperandType::Token, FlowType::Call, 0, 0),
    op(ILOpcode::Calli, "calli", OperandType::Token, FlowType::Call, 0, 0),
    op(ILOpcode::Ret, "ret", OperandType::None, FlowType::Return, 0, 0),
    op(ILOpcode::BrS, "br.s", OperandType::Int8, FlowType::UnconditionalBranch, 0, 0),
    op(ILOpcode::BrfalseS, "brfalse.s", OperandType::Int8, FlowType::ConditionalBranch, 1, 0),
    op(ILOpcode::BrtrueS, "brtrue.s", OperandType::Int8, FlowType::ConditionalBranch, 1, 0),
    op(ILOpcode::BeqS, "beq.s", OperandType::Int8, FlowType::ConditionalBranch, 2, 0),
    op(ILOpcode::BgeS, "bge.s", OperandType::Int8, FlowType::ConditionalBranch, 2, 0),
    op(ILOpcode::BgtS, "bgt.s", OperandType::Int8, FlowType::ConditionalBranch, 2, 0),
    op(ILOpcode::BleS, "ble.s", OperandType::Int8, FlowType::ConditionalBranch, 2, 0),
    op(ILOpcode::BltS, "blt.s", OperandType::Int8, FlowType::ConditionalBranch, 2, 0),
    op(ILOpcode::BneUnS, "bne.un.s", OperandType::Int8, FlowType::ConditionalBranch, 2, 0),
    op(ILOpcode::BgeUnS, "bge.un.s", OperandType::Int8, FlowType::ConditionalBranch, 2, 0),
    op(ILOpcode::BgtUnS, "bgt.un.s", OperandType::Int8, FlowType::ConditionalBranch, 2, 0),
    op(ILOpcode::BleUnS, "ble.un.s", OperandType::Int8, FlowType::ConditionalBranch, 2, 0),
    op(ILOpcode::BltUnS, "blt.un.s", OperandType::Int8, FlowType::ConditionalBranch, 2, 0),
    op(ILOpcode::Br, "br", OperandType::Int32, FlowType::UnconditionalBranch, 0, 0),
    op(ILOpcode::Brfalse, "brfalse", OperandType::Int32, FlowType::ConditionalBranch, 1, 0),
    op(ILOpcode::Brtrue, "brtrue", OperandType::Int32, FlowType::ConditionalBranch, 1, 0),
    op(ILOpcode::Beq, "beq", OperandType::Int32, FlowType::ConditionalBranch, 2, 0),
    op(ILOpcode::Bge, "bge", OperandType::Int32, FlowType::ConditionalBranch, 2, 0),
    op(ILOpcode::Bgt, "bgt", OperandType::Int32, FlowType::ConditionalBranch, 2, 0),
    op(ILOpcode::Ble, "ble", OperandType::Int32, FlowType::ConditionalBranch, 2, 0),
    op(ILOpcode::Blt, "blt", OperandType::Int32, FlowType::ConditionalBranch, 2, 0),
    op(ILOpcode::BneUn, "bne.un", OperandType::Int32, FlowType::ConditionalBranch, 2, 0),
    op(ILOpcode::BgeUn, "bge.un", OperandType::Int32, FlowType::ConditionalBranch, 2, 0),
    op(ILOpcode::BgtUn, "bgt.un", OperandType::Int32, FlowType::ConditionalBranch, 2, 0),
    op(ILOpcode::BleUn, "ble.un", OperandType::Int32, FlowType::ConditionalBranch, 2, 0),
    op(ILOpcode::BltUn, "blt.un", OperandType::Int32, FlowType::ConditionalBranch, 2, 0),
    op(ILOpcode::Switch, "switch", OperandType::Switch, FlowType::Switch, 1, 0),
    op(ILOpcode::LdindI1, "ldind.i1", OperandType::None, FlowType::Sequential, 1, 1),
    op(ILOpcode::LdindU1, "ldind.u1", OperandType::None, FlowType::Sequential, 1, 1),
    op(ILOpcode::LdindI2, "ldind.i2", OperandType::None, FlowType::Sequential, 1, 1),
    op(ILOpcode::LdindU2, "ldind.u2", OperandType::None, FlowType::Sequential, 1, 1),
    op(ILOpcode::LdindI4, "ldind.i4", OperandType::None, FlowType::Sequential, 1, 1),
    op(ILOpcode::LdindU4, "ldind.u4", OperandType::None, FlowType::Sequential, 1, 1),
    op(ILOpcode::LdindI8, "ldind.i8", OperandType::None, FlowType::Sequential, 1, 1),
    op(ILOpcode::LdindI, "ldind.i", OperandType::None, FlowType::Sequential, 1, 1),
    op(ILOpcode::LdindR4, "ldind.r4", OperandType::None, FlowType::Sequential, 1, 1),
    op(ILOpcode::LdindR8, "ldind.r8", OperandType::None, FlowType::Sequential, 1, 1),
    op(ILOpcode::LdindRef, "ldind.ref", OperandType::None, FlowType::Sequential, 1, 1),
    op(ILOpcode::StindRef, "stind.ref", OperandType::None, FlowType::Sequential, 2, 0),
    op(ILOpcode::StindI1, "stind.i1", OperandType::None, FlowType::Sequential, 2, 0),
    op(ILOpcode::StindI2, "stind.i2", OperandType::None, FlowType::Sequential, 2, 0),
    op(ILOpcode::StindI4, "stind.i4", OperandType::None, FlowType::Sequential, 2, 0),
    op(ILOpcode::StindI8, "stind.i8", OperandType::None, FlowType::Sequential, 2, 0),
    op(ILOpcode::StindR4, "stind.r4", OperandType::None, FlowType::Sequential, 2, 0),
    op(ILOpcode::StindR8, "stind.r8", OperandType::None, FlowType::Sequential, 2, 0),
    op(ILOpcode::Add, "add", OperandType::None, FlowType::Sequential, 2, 1),
    op(ILOpcode::Sub, "sub", OperandType::None, FlowType::Sequential, 2, 1),
    op(ILOpcode::Mul, "mul", OperandType::None, FlowType::Sequential, 2, 1),
    op(ILOpcode::Div, "div", OperandType::None, FlowType::Sequential, 2, 1),
    op(ILOpcode::DivUn, "div.un", OperandType::None, FlowType::Sequential, 2, 1),
    op(ILOpcode::Rem, "rem", OperandType::None, FlowType::Sequential, 2, 1),
    op(ILOpcode::RemUn, "rem.un", OperandType::None, FlowType::Sequential, 2, 1),
    op(ILOpcode::And, "and", OperandType::None, FlowType::Sequential, 2, 1),
    op(ILOpcode::Or, "or", OperandType::None, FlowType::Sequential, 2, 1),
    op(ILOpcode::Xor, "xor", OperandType::None, FlowType::Sequential, 2, 1),
    op(ILOpcode::Shl, "shl", OperandType::None, FlowType::Sequential, 2, 1),
    op(ILOpcode::Shr, "shr", OperandType::None, FlowType::Sequential, 2, 1),
    op(ILOpcode::ShrUn, "shr.un", OperandType::None, FlowType::Sequential, 2, 1),
    op(ILOpcode::Neg, "neg", OperandType::None, FlowType::Sequential, 1, 1),
    op(ILOpcode::Not, "not", OperandType::None, FlowType::Sequential, 1, 1),
    op(ILOpcode::ConvI1, "conv.i1", OperandType::None, FlowType::Sequential, 1, 1),
    op(ILOpcode::ConvI2, "conv.i2", OperandType::None, FlowType::Sequential, 1, 1),
    op(ILOpcode::ConvI4, "conv.i4", OperandType::None, FlowType::Sequential, 1, 1),
    op(ILOpcode::ConvI8, "conv.i8", OperandType::None, FlowType::Sequential, 1, 1),
    op(ILOpcode::ConvR4, "conv.r4", OperandType::None, FlowType::Sequential, 1, 1),
    op(ILOpcode::ConvR8, "conv.r8", OperandType::None, FlowType::Sequential, 1, 1),
    op(ILOpcode::ConvU4, "conv.u4", OperandType::None, FlowType::Sequential, 1, 1),
    op(ILOpcode::ConvU8, "conv.u8", OperandType::None, FlowType::Sequential, 1, 1),
    op(ILOpcode::Callvirt, "callvirt", OperandType::Token, FlowType::Call, 0, 0),
    op(ILOpcode::Cpobj, "cpobj", OperandType::Token, FlowType::Sequential, 2, 0),
    op(ILOpcode::Ldobj, "ldobj", OperandType::Token, FlowType::Sequential, 1, 1),
    op(ILOpcode::Ldstr, "ldstr", OperandType::Token, FlowType::Sequential, 0, 1),
    op(ILOpcode::Newobj, "newobj", OperandType::Token, FlowType::Call, 0, 1),
    op(ILOpcode::Castclass, "castclass", OperandType::Token, FlowType::Sequential, 1, 1),
    op(ILOpcode::Isinst, "isinst", OperandType::Token, FlowType::Sequential, 1, 1),
    op(ILOpcode::ConvRUn, "conv.r.un", OperandType::None, FlowType::Sequential, 1, 1),
    RESERVED,
    RESERVED,
    op(ILOpcode::Unbox, "unbox", OperandType::Token, FlowType::Sequential, 1, 1),
    op(ILOpcode::Throw, "throw", OperandType::None, FlowType::Throw, 1, 0),
    op(ILOpcode::Ldfld, "ldfld", OperandType::Token, FlowType::Sequential, 1, 1),
    op(ILOpcode::Ldflda, "ldflda", OperandType::Token, FlowType::Sequential, 1, 1),
    op(ILOpcode::Stfld, "stfld", OperandType::Token, FlowType::Sequential, 2, 0),
    op(ILOpcode::Ldsfld, "ldsfld", OperandType::Token, FlowType::Sequential, 0, 1),
    op(ILOpcode::Ldsflda, "ldsflda", OperandType::Token, FlowType::Sequential, 0, 1),
    op(ILOpcode::Stsfld, "stsfld", OperandType::Token, FlowType::Sequential, 1, 0),
    op(ILOpcode::Stobj, "stobj", OperandType::Token, FlowType::Sequential, 2, 0),
    op(ILOpcode::ConvOvfI1Un, "conv.ovf.i1.un", OperandType::None, FlowType::Sequential, 1, 1),
    op(ILOpcode::ConvOvfI2Un, "conv.ovf.i2.un", OperandType::None, FlowType::Sequential, 1, 1),
    op(ILOpcode::ConvOvfI4Un, "conv.ovf.i4.un", OperandType::None, FlowType::Sequential, 1, 1),
    op(ILOpcode::ConvOvfI8Un, "conv.ovf.i8.un", OperandType::None, FlowType::Sequential, 1, 1),
    op(ILOpcode::ConvOvfU1Un, "conv.ovf.u1.un", OperandType::None, FlowType::Sequential, 1, 1),
    op(ILOpcode::ConvOvfU2Un, "conv.ovf.u2.un", OperandType::None, FlowType::Sequential, 1, 1),
    op(ILOpcode::ConvOvfU4Un, "conv.ovf.u4.un", OperandType::None, FlowType::Sequential, 1, 1),
    op(ILOpcode::ConvOvfU8Un, "conv.ovf.u8.un", OperandType::None, FlowType::Sequential, 1, 1),
    op(ILOpcode::ConvOvfIUn, "conv.ovf.i.un", OperandType::None, FlowType::Sequential, 1, 1),
    op(ILOpcode::ConvOvfUUn, "conv.ovf.u.un", OperandType::None, FlowType::Sequential, 1, 1),
    op(ILOpcode::Box, "box", OperandType::Token, FlowType::Sequential, 1, 1),
    op(ILOpcode::Newarr, "newarr", OperandType::Token, FlowType::Sequential, 1, 1),
    op(ILOpcode::Ldlen, "ldlen", OperandType::None, FlowType::Sequential, 1, 1),
    op(ILOpcode::Ldelema, "ldelema", OperandType::Token, FlowType::Sequential, 2, 1),
    op(ILOpcode::LdelemI1, "ldelem.i1", OperandType::None, FlowType::Sequential, 2, 1),
    op(ILOpcode::LdelemU1, "ldelem.u1", OperandType::None, FlowType::Sequential, 2, 1),
    op(ILOpcode::LdelemI2, "ldelem.i2", OperandType::None, FlowType::Sequential, 2, 1),
    op(ILOpcode::LdelemU2, "ldelem.u2", OperandType::None, FlowType::Sequential, 2, 1),
    op(ILOpcode::LdelemI4, "ldelem.i4", OperandType::None, FlowType::Sequential, 2, 1),
    op(ILOpcode::LdelemU4, "ldelem.u4", OperandType::None, FlowType::Sequential, 2, 1),
    op(ILOpcode::LdelemI8, "ldelem.i8", OperandType::None, FlowType::Sequential, 2, 1),
    op(ILOpcode::LdelemI, "ldelem.i", OperandType::None, FlowType::Sequential, 2, 1),
    op(ILOpcode::LdelemR4, "ldelem.r4", OperandType::None, FlowType::Sequential, 2, 1),
    op(ILOpcode::LdelemR8, "ldelem.r8", OperandType::None, FlowType::Sequential, 2, 1),
    op(ILOpcode::LdelemRef, "ldelem.ref", OperandType::None, FlowType::Sequential, 2, 1),
    op(ILOpcode::StelemI, "stelem.i", OperandType::None, FlowType::Sequential, 3, 0),
    op(ILOpcode::StelemI1, "stelem.i1", OperandType::None, FlowType::Sequential, 3, 0),
    op(ILOpcode::StelemI2, "stelem.i2", OperandType::None, FlowType::Sequential, 3, 0),
    op(ILOpcode::StelemI4, "stelem.i4", OperandType::None, FlowType::Sequential, 3, 0),
    op(ILOpcode::StelemI8, "stelem.i8", OperandType::None, FlowType::Sequential, 3, 0),
    op(ILOpcode::StelemR4, "stelem.r4", OperandType::None, FlowType::Sequential, 3, 0),
    op(ILOpcode::StelemR8, "stelem.r8", OperandType::None, FlowType::Sequential, 3, 0),
    op(ILOpcode::StelemRef, "stelem.ref", OperandType::None, FlowType::Sequential, 3, 0),
    op(ILOpcode::Ldelem, "ldelem", OperandType::Token, FlowType::Sequential, 2, 1),
    op(ILOpcode::Stelem, "stelem", OperandType::Token, FlowType::Sequential, 3, 0),
    op(ILOpcode::UnboxAny, "unbox.any", OperandType::Token, FlowType::Sequential, 1, 1),
    RESERVED,
    RESERVED,
    RESERVED,
    RESERVED,
    RESERVED,
    RESERVED,
    RESERVED,
    RESERVED,
    RESERVED,
    RESERVED,
    RESERVED,
    RESERVED,
    RESERVED,
    op(ILOpcode::ConvOvfI1, "conv.ovf.i1", OperandType::None, FlowType::Sequential, 1, 1),
    op(ILOpcode::ConvOvfU1, "conv.ovf.u1", OperandType::None, FlowType::Sequential, 1, 1),
    op(ILOpcode::ConvOvfI2, "conv.ovf.i2", OperandType::None, FlowType::Sequential, 1, 1),
    op(ILOpcode::ConvOvfU2, "conv.ovf.u2", OperandType::None, FlowType::Sequential, 1, 1),
    op(ILOpcode::ConvOvfI4, "conv.ovf.i4", OperandType::None, FlowType::Sequential, 1, 1),
    op(ILOpcode::ConvOvfU4, "conv.ovf.u4", OperandType::None, FlowType::Sequential, 1, 1),
    op(ILOpcode::ConvOvfI8, "conv.ovf.i8", OperandType::None, FlowType::Sequential, 1, 1),
    op(ILOpcode::ConvOvfU8, "conv.ovf.u8", OperandType::None, FlowType::Sequential, 1, 1),
    RESERVED,
    RESERVED,
    RESERVED,
    RESERVED,
    RESERVED,
    RESERVED,
    RESERVED,
    op(ILOpcode::Refanyval, "refanyval", OperandType::Token, FlowType::Sequential, 1, 1),
    op(ILOpcode::Ckfinite, "ckfinite", OperandType::None, FlowType::Sequential, 1, 1),
    RESERVED,
    RESERVED,
    op(ILOpcode::Mkrefany, "mkrefany", OperandType::Token, FlowType::Sequential, 1, 1),
    RESERVED,
    RESERVED,
    RESERVED,
    RESERVED,
    RESERVED,
    RESERVED,
    RESERVED,
    RESERVED,
    RESERVED,
    op(ILOpcode::Ldtoken, "ldtoken", OperandType::Token, FlowType::Sequential, 0, 1),
    op(ILOpcode::ConvU2, "conv.u2", OperandType::None, FlowType::Sequential, 1, 1),
    op(ILOpcode::ConvU1, "conv.u1", OperandType::None, FlowType::Sequential, 1, 1),
    op(ILOpcode::ConvI, "conv.i", OperandType::None, FlowType::Sequential, 1, 1),
    op(ILOpcode::ConvOvfI, "conv.ovf.i", OperandType::None, FlowType::Sequential, 1, 1),
    op(ILOpcode::ConvOvfU, "conv.ovf.u", OperandType::None, FlowType::Sequential, 1, 1),
    op(ILOpcode::AddOvf, "add.ovf", OperandType::None, FlowType::Sequential, 2, 1),
    op(ILOpcode::AddOvfUn, "add.ovf.un", OperandType::None, FlowType::Sequential, 2, 1),
    op(ILOpcode::MulOvf, "mul.ovf", OperandType::None, FlowType::Sequential, 2, 1),
    op(ILOpcode::MulOvfUn, "mul.ovf.un", OperandType::None, FlowType::Sequential, 2, 1),
    op(ILOpcode::SubOvf, "sub.ovf", OperandType::None, FlowType::Sequential, 2, 1),
    op(ILOpcode::SubOvfUn, "sub.ovf.un", OperandType::None, FlowType::Sequential, 2, 1),
    op(ILOpcode::Endfinally, "endfinally", OperandType::None, FlowType::EndFinally, 0, 0),
    op(ILOpcode::Leave, "leave", OperandType::Int32, FlowType::Leave, 0, 0),
    op(ILOpcode::LeaveS, "leave.s", OperandType::Int8, FlowType::Leave, 0, 0),
    op(ILOpcode::StindI, "stind.i", OperandType::None, FlowType::Sequential, 2, 0),
    op(ILOpcode::ConvU, "conv.u", OperandType::None, FlowType::Sequential, 1, 1),
];

/// Two-byte opcodes `0xFE 0x00..=0xFE 0x1E`.
pub static INSTRUCTIONS_FE: [CilInstruction; 31] = [
    op(ILOpcode::Arglist, "arglist", OperandType::None, FlowType::Sequential, 0, 1),
    op(ILOpcode::Ceq, "ceq", OperandType::None, FlowType::Sequential, 2, 1),
    op(ILOpcode::Cgt, "cgt", OperandType::None, FlowType::Sequential, 2, 1),
    op(ILOpcode::CgtUn, "cgt.un", OperandType::None, FlowType::Sequential, 2, 1),
    op(ILOpcode::Clt, "clt", OperandType::None, FlowType::Sequential, 2, 1),
    op(ILOpcode::CltUn, "clt.un", OperandType::None, FlowType::Sequential, 2, 1),
    op(ILOpcode::Ldftn, "ldftn", OperandType::Token, FlowType::Sequential, 0, 1),
    op(ILOpcode::Ldvirtftn, "ldvirtftn", OperandType::Token, FlowType::Sequential, 1, 1),
    RESERVED,
    op(ILOpcode::Ldarg, "ldarg", OperandType::UInt16, FlowType::Sequential, 0, 1),
    op(ILOpcode::Ldarga, "ldarga", OperandType::UInt16, FlowType::Sequential, 0, 1),
    op(ILOpcode::Starg, "starg", OperandType::UInt16, FlowType::Sequential, 1, 0),
    op(ILOpcode::Ldloc, "ldloc", OperandType::UInt16, FlowType::Sequential, 0, 1),
    op(ILOpcode::Ldloca, "ldloca", OperandType::UInt16, FlowType::Sequential, 0, 1),
    op(ILOpcode::Stloc, "stloc", OperandType::UInt16, FlowType::Sequential, 1, 0),
    op(ILOpcode::Localloc, "localloc", OperandType::None, FlowType::Sequential, 1, 1),
    RESERVED,
    op(ILOpcode::Endfilter, "endfilter", OperandType::None, FlowType::EndFinally, 1, 0),
    op(ILOpcode::Unaligned, "unaligned.", OperandType::UInt8, FlowType::Meta, 0, 0),
    op(ILOpcode::Volatile, "volatile.", OperandType::None, FlowType::Meta, 0, 0),
    op(ILOpcode::Tail, "tail.", OperandType::None, FlowType::Meta, 0, 0),
    op(ILOpcode::Initobj, "initobj", OperandType::Token, FlowType::Sequential, 1, 0),
    op(ILOpcode::Constrained, "constrained.", OperandType::Token, FlowType::Meta, 0, 0),
    op(ILOpcode::Cpblk, "cpblk", OperandType::None, FlowType::Sequential, 3, 0),
    op(ILOpcode::Initblk, "initblk", OperandType::None, FlowType::Sequential, 3, 0),
    RESERVED,
    op(ILOpcode::Rethrow, "rethrow", OperandType::None, FlowType::Throw, 0, 0),
    RESERVED,
    op(ILOpcode::Sizeof, "sizeof", OperandType::Token, FlowType::Sequential, 0, 1),
    op(ILOpcode::Refanytype, "refanytype", OperandType::None, FlowType::Sequential, 1, 1),
    op(ILOpcode::Readonly, "readonly.", OperandType::None, FlowType::Meta, 0, 0),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_positions_match_opcodes() {
        assert_eq!(INSTRUCTIONS[0x00].instr, "nop");
        assert_eq!(INSTRUCTIONS[0x2A].instr, "ret");
        assert_eq!(INSTRUCTIONS[0x45].instr, "switch");
        assert_eq!(INSTRUCTIONS[0x73].instr, "newobj");
        assert_eq!(INSTRUCTIONS[0xE0].instr, "conv.u");
        assert_eq!(INSTRUCTIONS_FE[0x01].instr, "ceq");
        assert_eq!(INSTRUCTIONS_FE[0x0F].instr, "localloc");
        assert_eq!(INSTRUCTIONS_FE[0x16].instr, "constrained.");
        assert_eq!(INSTRUCTIONS_FE[0x1E].instr, "readonly.");
    }

    #[test]
    fn codes_match_table_position() {
        for (index, instr) in INSTRUCTIONS.iter().enumerate() {
            if !instr.is_reserved() {
                assert_eq!(usize::from(instr.code.value()), index, "{}", instr.instr);
            }
        }
        for (index, instr) in INSTRUCTIONS_FE.iter().enumerate() {
            if !instr.is_reserved() {
                assert_eq!(usize::from(instr.code.value()), 0xFE00 + index, "{}", instr.instr);
            }
        }
    }

    #[test]
    fn reserved_slots_are_empty() {
        assert!(INSTRUCTIONS[0x24].is_reserved());
        assert!(INSTRUCTIONS[0xA6].is_reserved());
        assert!(INSTRUCTIONS_FE[0x08].is_reserved());
        assert!(!INSTRUCTIONS[0x20].is_reserved());
    }

    #[test]
    fn branch_operands_are_signed() {
        for instr in INSTRUCTIONS.iter().chain(INSTRUCTIONS_FE.iter()) {
            if matches!(
                instr.flow,
                FlowType::ConditionalBranch | FlowType::UnconditionalBranch | FlowType::Leave
            ) {
                assert!(
                    matches!(instr.op_type, OperandType::Int8 | OperandType::Int32),
                    "{} has operand {:?}",
                    instr.instr,
                    instr.op_type
                );
            }
        }
    }
}
