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

//! The CIL interpreter that evaluates static constructors.
//!
//! A [`TypeScan`] interprets the static constructor of one type, and every method that
//! constructor calls, against its own [`Heap`] and its own table of static field values.
//! Nested static constructors get a `TypeScan` of their own; what they share with their
//! importer lives in the [`PreinitSession`].
//!
//! The dispatch loop in [`TypeScan::scan_method`] decodes one instruction at a time and
//! hands it to [`TypeScan::step`], which routes it to a handler in `handlers.rs` or to an
//! intrinsic in `intrinsics.rs`. Handlers report what happens next through [`Flow`].
//!
//! Anything the interpreter does not model ends the scan with an [`Error::Preinit`]
//! naming the method and opcode. Violations of verifier rules end it with
//! [`Error::InvalidProgram`].

mod handlers;
mod intrinsics;
#[cfg(test)]
mod tests;

use std::sync::Arc;

use indexmap::IndexMap;
use tracing::trace;

use crate::{
    assembly::{decode_instruction, ILOpcode, Instruction, Parser},
    metadata::{
        method::MethodIL,
        token::Token,
        typesystem::{FieldId, MethodId, TypeId, TypeSystem},
    },
    policy::PreinitContext,
    preinit::{
        frozen::{AllocationSite, FrozenStatics},
        heap::Heap,
        session::PreinitSession,
        stack::{EvalStack, StackValueKind},
        value::Value,
    },
    Error, Result,
};

/// What the dispatch loop does after an instruction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Flow {
    /// Continue with the next instruction
    Next,
    /// Continue at the given IL offset
    Jump(u32),
    /// Leave the method, with a value unless it returns `void`
    Return(Option<Value>),
}

/// One method activation.
pub(crate) struct Frame {
    pub(crate) method: MethodId,
    pub(crate) il: Arc<MethodIL>,
    pub(crate) stack: EvalStack,
    pub(crate) locals: Vec<Value>,
    pub(crate) args: Vec<Value>,
    /// Type named by a pending `constrained.` prefix
    pub(crate) constrained: Option<TypeId>,
}

/// Interpretation of one type's static constructor.
pub(crate) struct TypeScan<'s, 'a> {
    pub(crate) session: &'s mut PreinitSession<'a>,
    /// Type whose statics are being computed
    pub(crate) ty: TypeId,
    /// Session instruction counter when this scan started
    base: usize,
    pub(crate) heap: Heap,
    pub(crate) statics: IndexMap<FieldId, Value>,
}

impl<'s, 'a> TypeScan<'s, 'a> {
    /// Creates a scan of `ty` with all modeled static fields zero-initialized.
    ///
    /// Literal, thread-static and data-mapped fields have no modeled storage.
    pub(crate) fn new(session: &'s mut PreinitSession<'a>, ty: TypeId, base: usize) -> Self {
        let types = session.ctx.types;
        let mut heap =
            Heap::with_byte_limit(types.pointer_size(), session.ctx.config.max_heap_bytes);
        let statics = types
            .static_fields(ty)
            .filter(|&field| {
                let desc = types.field(field);
                !desc.is_literal() && !desc.is_thread_static() && !desc.has_rva()
            })
            .map(|field| {
                let value = heap.new_uninitialized(types, types.field(field).field_type, Some(field));
                (field, value)
            })
            .collect();

        TypeScan {
            session,
            ty,
            base,
            heap,
            statics,
        }
    }

    pub(crate) fn ctx(&self) -> PreinitContext<'a> {
        self.session.ctx
    }

    pub(crate) fn types(&self) -> &'a TypeSystem {
        self.session.ctx.types
    }

    /// Snapshot of the final static field values.
    ///
    /// # Errors
    /// [`Error::InvalidProgram`] if a field holds a value with no frozen form.
    pub(crate) fn freeze(&self) -> Result<FrozenStatics> {
        self.heap.freeze_statics(&self.statics)
    }

    /// Identity of an object allocated by the instruction being executed.
    pub(crate) fn allocation_site(&self) -> AllocationSite {
        AllocationSite {
            owner: self.ty,
            instruction: self.session.instructions - self.base,
        }
    }

    // ========================================================================
    // Failures
    // ========================================================================

    /// Unsupported construct at a specific instruction.
    pub(crate) fn fail_op(&self, method: MethodId, opcode: &str, detail: &str) -> Error {
        Error::Preinit(format!(
            "Method '{}', opcode '{}' {}",
            self.types().method_name(method),
            opcode,
            detail
        ))
    }

    /// Unsupported construct not tied to one opcode.
    pub(crate) fn fail(&self, method: MethodId, detail: &str) -> Error {
        Error::Preinit(format!(
            "Method '{}': {}",
            self.types().method_name(method),
            detail
        ))
    }

    // ========================================================================
    // Operand resolution
    // ========================================================================

    fn token(instruction: &Instruction) -> Result<Token> {
        instruction
            .get_token_operand()
            .ok_or_else(|| invalid_program!("'{}' without a token", instruction.mnemonic))
    }

    pub(crate) fn resolve_type(frame: &Frame, instruction: &Instruction) -> Result<TypeId> {
        let token = Self::token(instruction)?;
        frame
            .il
            .tokens
            .resolve_type(token)
            .ok_or_else(|| invalid_program!("unresolved type token 0x{:08X}", token.value()))
    }

    pub(crate) fn resolve_field(frame: &Frame, instruction: &Instruction) -> Result<FieldId> {
        let token = Self::token(instruction)?;
        frame
            .il
            .tokens
            .resolve_field(token)
            .ok_or_else(|| invalid_program!("unresolved field token 0x{:08X}", token.value()))
    }

    pub(crate) fn resolve_method(frame: &Frame, instruction: &Instruction) -> Result<MethodId> {
        let token = Self::token(instruction)?;
        frame
            .il
            .tokens
            .resolve_method(token)
            .ok_or_else(|| invalid_program!("unresolved method token 0x{:08X}", token.value()))
    }

    /// Type of argument `index` of `method`. `this` of a value type method is a byref.
    ///
    /// # Errors
    /// [`Error::InvalidProgram`] if the method has no such argument.
    pub(crate) fn arg_type(&self, method: MethodId, index: usize) -> Result<TypeId> {
        let types = self.types();
        let desc = types.method(method);
        let mut offset = 0;
        if desc.signature.has_this {
            if index == 0 {
                return Ok(if types.is_value_type(desc.owner) {
                    types.make_byref_type(desc.owner)
                } else {
                    desc.owner
                });
            }
            offset = 1;
        }
        desc.signature
            .parameters
            .get(index - offset)
            .copied()
            .ok_or_else(|| invalid_program!("argument {} of '{}'", index, types.method_name(method)))
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Interprets `method` with the given arguments and returns its result.
    ///
    /// # Errors
    /// [`Error::Preinit`] for anything not modeled, [`Error::InvalidProgram`] for IL that
    /// breaks verifier rules.
    pub(crate) fn scan_method(&mut self, method: MethodId, args: Vec<Value>) -> Result<Option<Value>> {
        let ctx = self.ctx();
        let types = ctx.types;
        let Some(il) = ctx.bodies.method_il(types, method) else {
            return Err(self.fail(method, "Extern method"));
        };

        if self.session.recursion.contains(&method) {
            return Err(self.fail(method, "Recursion"));
        }

        // catch, filter and fault handlers never run since nothing throws
        if il.has_finally() {
            return Err(self.fail(method, "Finally regions"));
        }

        let locals = il
            .locals
            .iter()
            .map(|&local| self.heap.new_uninitialized(types, local, None))
            .collect();
        let mut frame = Frame {
            method,
            il: il.clone(),
            stack: EvalStack::new(),
            locals,
            args,
            constrained: None,
        };

        let mut parser = Parser::new(&il.code);
        while parser.has_more_data() {
            if self.session.instructions == ctx.config.instruction_limit {
                return Err(self.fail(method, "Instruction limit"));
            }
            self.session.instructions += 1;
            frame.constrained = None;

            let mut instruction = decode_instruction(&mut parser).map_err(Self::decoding_error)?;
            while instruction.is_prefix() {
                match instruction.code {
                    ILOpcode::Constrained => {
                        frame.constrained = Some(Self::resolve_type(&frame, &instruction)?);
                    }
                    ILOpcode::Volatile | ILOpcode::Readonly | ILOpcode::Unaligned => {}
                    _ => return Err(self.fail_op(method, instruction.mnemonic, "Tail call")),
                }
                instruction = decode_instruction(&mut parser).map_err(Self::decoding_error)?;
            }

            trace!(
                method = %types.method_name(method),
                offset = instruction.offset,
                opcode = instruction.mnemonic,
                depth = frame.stack.len(),
                "interpreting"
            );

            let flow = self.step(&mut frame, &instruction)?;
            if self.heap.exhausted() {
                return Err(self.fail_op(method, instruction.mnemonic, "Heap limit"));
            }
            match flow {
                Flow::Next => {}
                Flow::Jump(target) => parser
                    .seek(target as usize)
                    .map_err(|_| invalid_program!("branch to IL_{:04X}", target))?,
                Flow::Return(value) => return Ok(value),
            }
        }

        Err(self.fail(method, "Control fell through"))
    }

    fn decoding_error(error: Error) -> Error {
        invalid_program!("undecodable IL: {}", error)
    }

    /// Executes one instruction.
    fn step(&mut self, frame: &mut Frame, instruction: &Instruction) -> Result<Flow> {
        use ILOpcode as Op;

        let method = frame.method;
        match instruction.code {
            Op::Nop => Ok(Flow::Next),

            Op::LdcI4M1
            | Op::LdcI40
            | Op::LdcI41
            | Op::LdcI42
            | Op::LdcI43
            | Op::LdcI44
            | Op::LdcI45
            | Op::LdcI46
            | Op::LdcI47
            | Op::LdcI48 => {
                let value = i32::from(instruction.code as u16 as u8) - i32::from(Op::LdcI40 as u16 as u8);
                frame.stack.push(StackValueKind::Int32, Value::from_i32(value));
                Ok(Flow::Next)
            }
            Op::LdcI4S | Op::LdcI4 => {
                let value = instruction
                    .get_i32_operand()
                    .ok_or_else(|| invalid_program!("ldc.i4 without operand"))?;
                frame.stack.push(StackValueKind::Int32, Value::from_i32(value));
                Ok(Flow::Next)
            }
            Op::LdcI8 => {
                let value = instruction
                    .get_i64_operand()
                    .ok_or_else(|| invalid_program!("ldc.i8 without operand"))?;
                frame.stack.push(StackValueKind::Int64, Value::from_i64(value));
                Ok(Flow::Next)
            }
            Op::LdcR4 => {
                let value = instruction
                    .get_f32_operand()
                    .ok_or_else(|| invalid_program!("ldc.r4 without operand"))?;
                frame.stack.push(StackValueKind::Float, Value::from_f64(f64::from(value)));
                Ok(Flow::Next)
            }
            Op::LdcR8 => {
                let value = instruction
                    .get_f64_operand()
                    .ok_or_else(|| invalid_program!("ldc.r8 without operand"))?;
                frame.stack.push(StackValueKind::Float, Value::from_f64(value));
                Ok(Flow::Next)
            }
            Op::Ldnull => {
                frame.stack.push(StackValueKind::ObjRef, Value::Null);
                Ok(Flow::Next)
            }
            Op::Ldstr => self.load_string(frame, instruction),
            Op::Sizeof => {
                let ty = Self::resolve_type(frame, instruction)?;
                let size = i32::try_from(self.types().element_size(ty))
                    .map_err(|_| invalid_program!("sizeof overflow"))?;
                frame.stack.push(StackValueKind::Int32, Value::from_i32(size));
                Ok(Flow::Next)
            }
            Op::Dup => {
                let top = *frame.stack.peek(0)?;
                frame.stack.push_entry(top);
                Ok(Flow::Next)
            }
            Op::Pop => {
                frame.stack.pop()?;
                Ok(Flow::Next)
            }
            Op::Ret => self.return_from(frame),

            Op::Ldarg0 | Op::Ldarg1 | Op::Ldarg2 | Op::Ldarg3 => {
                let index = (instruction.code as u16 - Op::Ldarg0 as u16) as usize;
                self.load_argument(frame, index)
            }
            Op::LdargS | Op::Ldarg => self.load_argument(frame, Self::index(instruction)?),
            Op::StargS | Op::Starg => self.store_argument(frame, instruction, Self::index(instruction)?),
            Op::Ldloc0 | Op::Ldloc1 | Op::Ldloc2 | Op::Ldloc3 => {
                let index = (instruction.code as u16 - Op::Ldloc0 as u16) as usize;
                self.load_local(frame, index)
            }
            Op::LdlocS | Op::Ldloc => self.load_local(frame, Self::index(instruction)?),
            Op::Stloc0 | Op::Stloc1 | Op::Stloc2 | Op::Stloc3 => {
                let index = (instruction.code as u16 - Op::Stloc0 as u16) as usize;
                self.store_local(frame, instruction, index)
            }
            Op::StlocS | Op::Stloc => self.store_local(frame, instruction, Self::index(instruction)?),
            Op::LdlocaS | Op::Ldloca | Op::LdargaS | Op::Ldarga => {
                self.load_address(frame, instruction, Self::index(instruction)?)
            }

            Op::Stsfld => self.store_static_field(frame, instruction),
            Op::Ldsfld | Op::Ldsflda => self.load_static_field(frame, instruction),
            Op::Stfld => self.store_field(frame, instruction),
            Op::Ldfld => self.load_field(frame, instruction),
            Op::Ldflda => self.load_field_address(frame, instruction),

            Op::Call | Op::Callvirt => self.call(frame, instruction),
            Op::Newobj => self.new_object(frame, instruction),
            Op::Ldftn => self.load_function(frame, instruction),
            Op::Ldtoken => self.load_token(frame, instruction),

            Op::ConvI
            | Op::ConvU
            | Op::ConvI1
            | Op::ConvI2
            | Op::ConvI4
            | Op::ConvI8
            | Op::ConvU1
            | Op::ConvU2
            | Op::ConvU4
            | Op::ConvU8
            | Op::ConvR4
            | Op::ConvR8 => self.convert(frame, instruction),

            Op::Br
            | Op::BrS
            | Op::Brfalse
            | Op::BrfalseS
            | Op::Brtrue
            | Op::BrtrueS
            | Op::Beq
            | Op::BeqS
            | Op::BneUn
            | Op::BneUnS
            | Op::Bge
            | Op::BgeS
            | Op::BgeUn
            | Op::BgeUnS
            | Op::Bgt
            | Op::BgtS
            | Op::BgtUn
            | Op::BgtUnS
            | Op::Ble
            | Op::BleS
            | Op::BleUn
            | Op::BleUnS
            | Op::Blt
            | Op::BltS
            | Op::BltUn
            | Op::BltUnS => self.branch(frame, instruction),
            Op::Switch => self.switch(frame, instruction),
            Op::Leave | Op::LeaveS => self.leave(frame, instruction),

            Op::Clt | Op::CltUn | Op::Cgt | Op::CgtUn => self.compare(frame, instruction),
            Op::Ceq => self.compare_equal(frame, instruction),
            Op::Neg => self.negate(frame, instruction),
            Op::Not => self.bitwise_not(frame, instruction),
            Op::Add
            | Op::Sub
            | Op::Mul
            | Op::Div
            | Op::DivUn
            | Op::Rem
            | Op::RemUn
            | Op::And
            | Op::Or
            | Op::Xor
            | Op::Shl
            | Op::Shr
            | Op::ShrUn => self.binary_op(frame, instruction),

            Op::Newarr => self.new_array(frame, instruction),
            Op::Ldlen => self.load_length(frame, instruction),
            Op::Stelem
            | Op::StelemI
            | Op::StelemI1
            | Op::StelemI2
            | Op::StelemI4
            | Op::StelemI8
            | Op::StelemR4
            | Op::StelemR8 => self.store_element(frame, instruction),
            Op::Ldelem
            | Op::LdelemI
            | Op::LdelemI1
            | Op::LdelemU1
            | Op::LdelemI2
            | Op::LdelemU2
            | Op::LdelemI4
            | Op::LdelemU4
            | Op::LdelemI8
            | Op::LdelemR4
            | Op::LdelemR8 => self.load_element(frame, instruction),

            Op::Box => self.box_value(frame, instruction),
            Op::UnboxAny => self.unbox_any(frame, instruction),
            Op::Initobj => self.init_object(frame, instruction),
            Op::Initblk => self.init_block(frame, instruction),
            Op::Localloc => self.local_alloc(frame, instruction),

            Op::Ldobj
            | Op::LdindI1
            | Op::LdindU1
            | Op::LdindI2
            | Op::LdindU2
            | Op::LdindI4
            | Op::LdindU4
            | Op::LdindI8
            | Op::LdindI
            | Op::LdindR4
            | Op::LdindR8 => self.load_indirect(frame, instruction),
            Op::Stobj
            | Op::StindI
            | Op::StindI1
            | Op::StindI2
            | Op::StindI4
            | Op::StindI8
            | Op::StindR4
            | Op::StindR8 => self.store_indirect(frame, instruction),

            _ => Err(self.fail_op(method, instruction.mnemonic, "Unsupported opcode")),
        }
    }

    fn index(instruction: &Instruction) -> Result<usize> {
        instruction
            .get_index_operand()
            .map(usize::from)
            .ok_or_else(|| invalid_program!("'{}' without an index", instruction.mnemonic))
    }
}
