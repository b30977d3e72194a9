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

//! CIL opcode identifiers (ECMA-335 Partition III).
//!
//! [`ILOpcode`] names every assigned opcode. Single-byte opcodes use their byte as
//! discriminant; two-byte opcodes use `0xFE00 | second_byte`, so the discriminant is the
//! big-endian reading of the encoded opcode.

/// A CIL opcode.
///
/// Variants are named after the mnemonic with the dots removed, e.g. `ldc.i4.s` is
/// [`ILOpcode::LdcI4S`] and the `constrained.` prefix is [`ILOpcode::Constrained`].
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u16)]
pub enum ILOpcode {
    Nop = 0x00,
    Break = 0x01,
    Ldarg0 = 0x02,
    Ldarg1 = 0x03,
    Ldarg2 = 0x04,
    Ldarg3 = 0x05,
    Ldloc0 = 0x06,
    Ldloc1 = 0x07,
    Ldloc2 = 0x08,
    Ldloc3 = 0x09,
    Stloc0 = 0x0A,
    Stloc1 = 0x0B,
    Stloc2 = 0x0C,
    Stloc3 = 0x0D,
    LdargS = 0x0E,
    LdargaS = 0x0F,
    StargS = 0x10,
    LdlocS = 0x11,
    LdlocaS = 0x12,
    StlocS = 0x13,
    Ldnull = 0x14,
    LdcI4M1 = 0x15,
    LdcI40 = 0x16,
    LdcI41 = 0x17,
    LdcI42 = 0x18,
    LdcI43 = 0x19,
    LdcI44 = 0x1A,
    LdcI45 = 0x1B,
    LdcI46 = 0x1C,
    LdcI47 = 0x1D,
    LdcI48 = 0x1E,
    LdcI4S = 0x1F,
    LdcI4 = 0x20,
    LdcI8 = 0x21,
    LdcR4 = 0x22,
    LdcR8 = 0x23,
    Dup = 0x25,
    Pop = 0x26,
    Jmp = 0x27,
    Call = 0x28,
    Calli = 0x29,
    Ret = 0x2A,
    BrS = 0x2B,
    BrfalseS = 0x2C,
    BrtrueS = 0x2D,
    BeqS = 0x2E,
    BgeS = 0x2F,
    BgtS = 0x30,
    BleS = 0x31,
    BltS = 0x32,
    BneUnS = 0x33,
    BgeUnS = 0x34,
    BgtUnS = 0x35,
    BleUnS = 0x36,
    BltUnS = 0x37,
    Br = 0x38,
    Brfalse = 0x39,
    Brtrue = 0x3A,
    Beq = 0x3B,
    Bge = 0x3C,
    Bgt = 0x3D,
    Ble = 0x3E,
    Blt = 0x3F,
    BneUn = 0x40,
    BgeUn = 0x41,
    BgtUn = 0x42,
    BleUn = 0x43,
    BltUn = 0x44,
    Switch = 0x45,
    LdindI1 = 0x46,
    LdindU1 = 0x47,
    LdindI2 = 0x48,
    LdindU2 = 0x49,
    LdindI4 = 0x4A,
    LdindU4 = 0x4B,
    LdindI8 = 0x4C,
    LdindI = 0x4D,
    LdindR4 = 0x4E,
    LdindR8 = 0x4F,
    LdindRef = 0x50,
    StindRef = 0x51,
    StindI1 = 0x52,
    StindI2 = 0x53,
    StindI4 = 0x54,
    StindI8 = 0x55,
    StindR4 = 0x56,
    StindR8 = 0x57,
    Add = 0x58,
    Sub = 0x59,
    Mul = 0x5A,
    Div = 0x5B,
    DivUn = 0x5C,
    Rem = 0x5D,
    RemUn = 0x5E,
    And = 0x5F,
    Or = 0x60,
    Xor = 0x61,
    Shl = 0x62,
    Shr = 0x63,
    ShrUn = 0x64,
    Neg = 0x65,
    Not = 0x66,
    ConvI1 = 0x67,
    ConvI2 = 0x68,
    ConvI4 = 0x69,
    ConvI8 = 0x6A,
    ConvR4 = 0x6B,
    ConvR8 = 0x6C,
    ConvU4 = 0x6D,
    ConvU8 = 0x6E,
    Callvirt = 0x6F,
    Cpobj = 0x70,
    Ldobj = 0x71,
    Ldstr = 0x72,
    Newobj = 0x73,
    Castclass = 0x74,
    Isinst = 0x75,
    ConvRUn = 0x76,
    Unbox = 0x79,
    Throw = 0x7A,
    Ldfld = 0x7B,
    Ldflda = 0x7C,
    Stfld = 0x7D,
    Ldsfld = 0x7E,
    Ldsflda = 0x7F,
    Stsfld = 0x80,
    Stobj = 0x81,
    ConvOvfI1Un = 0x82,
    ConvOvfI2Un = 0x83,
    ConvOvfI4Un = 0x84,
    ConvOvfI8Un = 0x85,
    ConvOvfU1Un = 0x86,
    ConvOvfU2Un = 0x87,
    ConvOvfU4Un = 0x88,
    ConvOvfU8Un = 0x89,
    ConvOvfIUn = 0x8A,
    ConvOvfUUn = 0x8B,
    Box = 0x8C,
    Newarr = 0x8D,
    Ldlen = 0x8E,
    Ldelema = 0x8F,
    LdelemI1 = 0x90,
    LdelemU1 = 0x91,
    LdelemI2 = 0x92,
    LdelemU2 = 0x93,
    LdelemI4 = 0x94,
    LdelemU4 = 0x95,
    LdelemI8 = 0x96,
    LdelemI = 0x97,
    LdelemR4 = 0x98,
    LdelemR8 = 0x99,
    LdelemRef = 0x9A,
    StelemI = 0x9B,
    StelemI1 = 0x9C,
    StelemI2 = 0x9D,
    StelemI4 = 0x9E,
    StelemI8 = 0x9F,
    StelemR4 = 0xA0,
    StelemR8 = 0xA1,
    StelemRef = 0xA2,
    Ldelem = 0xA3,
    Stelem = 0xA4,
    UnboxAny = 0xA5,
    ConvOvfI1 = 0xB3,
    ConvOvfU1 = 0xB4,
    ConvOvfI2 = 0xB5,
    ConvOvfU2 = 0xB6,
    ConvOvfI4 = 0xB7,
    ConvOvfU4 = 0xB8,
    ConvOvfI8 = 0xB9,
    ConvOvfU8 = 0xBA,
    Refanyval = 0xC2,
    Ckfinite = 0xC3,
    Mkrefany = 0xC6,
    Ldtoken = 0xD0,
    ConvU2 = 0xD1,
    ConvU1 = 0xD2,
    ConvI = 0xD3,
    ConvOvfI = 0xD4,
    ConvOvfU = 0xD5,
    AddOvf = 0xD6,
    AddOvfUn = 0xD7,
    MulOvf = 0xD8,
    MulOvfUn = 0xD9,
    SubOvf = 0xDA,
    SubOvfUn = 0xDB,
    Endfinally = 0xDC,
    Leave = 0xDD,
    LeaveS = 0xDE,
    StindI = 0xDF,
    ConvU = 0xE0,
    Arglist = 0xFE00,
    Ceq = 0xFE01,
    Cgt = 0xFE02,
    CgtUn = 0xFE03,
    Clt = 0xFE04,
    CltUn = 0xFE05,
    Ldftn = 0xFE06,
    Ldvirtftn = 0xFE07,
    Ldarg = 0xFE09,
    Ldarga = 0xFE0A,
    Starg = 0xFE0B,
    Ldloc = 0xFE0C,
    Ldloca = 0xFE0D,
    Stloc = 0xFE0E,
    Localloc = 0xFE0F,
    Endfilter = 0xFE11,
    Unaligned = 0xFE12,
    Volatile = 0xFE13,
    Tail = 0xFE14,
    Initobj = 0xFE15,
    Constrained = 0xFE16,
    Cpblk = 0xFE17,
    Initblk = 0xFE18,
    Rethrow = 0xFE1A,
    Sizeof = 0xFE1C,
    Refanytype = 0xFE1D,
    Readonly = 0xFE1E,
}

impl ILOpcode {
    /// Returns the encoded value (`0xFExx` for two-byte opcodes).
    #[must_use]
    pub const fn value(self) -> u16 {
        self as u16
    }

    /// Returns `true` for opcodes encoded with the `0xFE` prefix byte.
    #[must_use]
    pub const fn is_two_byte(self) -> bool {
        (self as u16) > 0xFF
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discriminants_follow_encoding() {
        assert_eq!(ILOpcode::Nop.value(), 0x00);
        assert_eq!(ILOpcode::Ret.value(), 0x2A);
        assert_eq!(ILOpcode::ConvU.value(), 0xE0);
        assert_eq!(ILOpcode::Ceq.value(), 0xFE01);
        assert_eq!(ILOpcode::Readonly.value(), 0xFE1E);
    }

    #[test]
    fn two_byte_detection() {
        assert!(!ILOpcode::Newobj.is_two_byte());
        assert!(ILOpcode::Initobj.is_two_byte());
        assert!(ILOpcode::Constrained.is_two_byte());
    }
}
