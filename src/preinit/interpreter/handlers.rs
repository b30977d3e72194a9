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

//! Opcode handlers of the static constructor interpreter.

use crate::{
    assembly::{ILOpcode, Instruction},
    metadata::{
        method::TokenTarget,
        typesystem::{MethodId, TypeCategory, TypeId, WellKnownType},
    },
    preinit::{
        heap::{Heap, Instance},
        interpreter::{Flow, Frame, TypeScan},
        stack::{native_entry, StackEntry, StackValueKind},
        value::{ByRef, ObjectId, Value},
    },
    Result,
};

/// Branch and comparison predicates, with long and short forms folded together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Condition {
    Always,
    True,
    False,
    Eq,
    NeUn,
    Lt,
    LtUn,
    Gt,
    GtUn,
    Ge,
    GeUn,
    Le,
    LeUn,
}

impl Condition {
    fn of(code: ILOpcode) -> Option<Condition> {
        use ILOpcode as Op;
        Some(match code {
            Op::Br | Op::BrS => Condition::Always,
            Op::Brtrue | Op::BrtrueS => Condition::True,
            Op::Brfalse | Op::BrfalseS => Condition::False,
            Op::Beq | Op::BeqS | Op::Ceq => Condition::Eq,
            Op::BneUn | Op::BneUnS => Condition::NeUn,
            Op::Blt | Op::BltS | Op::Clt => Condition::Lt,
            Op::BltUn | Op::BltUnS | Op::CltUn => Condition::LtUn,
            Op::Bgt | Op::BgtS | Op::Cgt => Condition::Gt,
            Op::BgtUn | Op::BgtUnS | Op::CgtUn => Condition::GtUn,
            Op::Bge | Op::BgeS => Condition::Ge,
            Op::BgeUn | Op::BgeUnS => Condition::GeUn,
            Op::Ble | Op::BleS => Condition::Le,
            Op::BleUn | Op::BleUnS => Condition::LeUn,
            _ => return None,
        })
    }

    /// Integer test. `ua`/`ub` are the operands reinterpreted as unsigned.
    fn test_int(self, a: i64, b: i64, ua: u64, ub: u64) -> bool {
        match self {
            Condition::Always => true,
            Condition::True | Condition::False => false,
            Condition::Eq => a == b,
            Condition::NeUn => a != b,
            Condition::Lt => a < b,
            Condition::LtUn => ua < ub,
            Condition::Gt => a > b,
            Condition::GtUn => ua > ub,
            Condition::Ge => a >= b,
            Condition::GeUn => ua >= ub,
            Condition::Le => a <= b,
            Condition::LeUn => ua <= ub,
        }
    }

    /// Floating point test. Unsigned forms are true for unordered operands.
    #[allow(clippy::float_cmp)]
    fn test_float(self, a: f64, b: f64) -> bool {
        match self {
            Condition::Always => true,
            Condition::True | Condition::False => false,
            Condition::Eq => a == b,
            Condition::NeUn => a != b,
            Condition::Lt => a < b,
            Condition::LtUn => !(a >= b),
            Condition::Gt => a > b,
            Condition::GtUn => !(a <= b),
            Condition::Ge => a >= b,
            Condition::GeUn => !(a < b),
            Condition::Le => a <= b,
            Condition::LeUn => !(a > b),
        }
    }
}

/// Result of a `conv.*` before it is pushed.
enum Converted {
    Int32(i32),
    Int64(i64),
    Native(i64),
    Float(f64),
}

/// `NativeInt` folded into the integer kind of the target's pointer width.
fn normalized(kind: StackValueKind, pointer_size: usize) -> StackValueKind {
    match kind {
        StackValueKind::NativeInt if pointer_size == 8 => StackValueKind::Int64,
        StackValueKind::NativeInt => StackValueKind::Int32,
        other => other,
    }
}

/// Integer operands of an arithmetic or comparison instruction.
enum Operands {
    Int32(i32, i32),
    Int64(i64, i64),
    Float(f64, f64),
}

fn operands(heap: &Heap, a: &StackEntry, b: &StackEntry) -> Result<Option<Operands>> {
    let pointer_size = heap.pointer_size();
    Ok(
        match (normalized(a.kind, pointer_size), normalized(b.kind, pointer_size)) {
            (StackValueKind::Int32, StackValueKind::Int32) => Some(Operands::Int32(
                heap.as_i32(&a.value)?,
                heap.as_i32(&b.value)?,
            )),
            (StackValueKind::Int64, StackValueKind::Int64) => Some(Operands::Int64(
                heap.as_i64(&a.value)?,
                heap.as_i64(&b.value)?,
            )),
            (StackValueKind::Float, StackValueKind::Float) => Some(Operands::Float(
                heap.as_f64(&a.value)?,
                heap.as_f64(&b.value)?,
            )),
            _ => None,
        },
    )
}

/// Stores into a local, argument or static slot.
///
/// Value type buffers are overwritten in place so that byrefs to them observe the store.
/// Returns false when the slot refuses the value.
fn store_slot(heap: &mut Heap, slot: &mut Value, value: Value) -> Result<bool> {
    if slot.is_assignable() {
        heap.try_assign(*slot, value)
    } else {
        *slot = value;
        Ok(true)
    }
}

/// Implementation of the opcode handlers.
///
/// Handlers are called from [`TypeScan::step`] and grouped by category:
///
/// - **Constants and stack**: `load_string`, `return_from`
/// - **Locals and arguments**: `load_local`, `store_local`, `load_argument`,
///   `store_argument`, `load_address`
/// - **Static fields**: `store_static_field`, `load_static_field`
/// - **Instance fields**: `store_field`, `load_field`, `load_field_address`
/// - **Calls**: `call`, `new_object`, `load_function`, `load_token`
/// - **Control flow**: `branch`, `switch`, `leave`
/// - **Arithmetic**: `compare`, `compare_equal`, `negate`, `bitwise_not`, `binary_op`,
///   `convert`
/// - **Arrays**: `new_array`, `load_length`, `store_element`, `load_element`
/// - **Objects and memory**: `box_value`, `unbox_any`, `init_object`, `init_block`,
///   `local_alloc`, `load_indirect`, `store_indirect`
impl TypeScan<'_, '_> {
    // ========================================================================
    // Constants and stack
    // ========================================================================

    /// Pushes an interned string literal.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidProgram`] if the token is not a string literal.
    pub(super) fn load_string(&mut self, frame: &mut Frame, instruction: &Instruction) -> Result<Flow> {
        let token = Self::token(instruction)?;
        let value = frame
            .il
            .tokens
            .resolve_string(token)
            .ok_or_else(|| invalid_program!("ldstr of token 0x{:08X}", token.value()))?;
        let id = self.heap.intern_string(&value);
        frame.stack.push(StackValueKind::ObjRef, Value::Ref(id));
        Ok(Flow::Next)
    }

    /// Leaves the current method.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidProgram`] if the stack does not hold exactly the
    /// return value.
    pub(super) fn return_from(&mut self, frame: &mut Frame) -> Result<Flow> {
        let types = self.types();
        let return_type = types.method(frame.method).signature.return_type;
        if types.category(return_type) == TypeCategory::Void {
            if !frame.stack.is_empty() {
                return Err(invalid_program!("ret from void method with a non-empty stack"));
            }
            return Ok(Flow::Return(None));
        }

        if frame.stack.len() != 1 {
            return Err(invalid_program!(
                "ret with {} stack entries",
                frame.stack.len()
            ));
        }
        let value = frame
            .stack
            .pop_into_location(types, &mut self.heap, return_type)?;
        Ok(Flow::Return(Some(value)))
    }

    // ========================================================================
    // Locals and arguments
    // ========================================================================

    /// Pushes local `index`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidProgram`] if the local does not exist.
    pub(super) fn load_local(&mut self, frame: &mut Frame, index: usize) -> Result<Flow> {
        let types = self.types();
        let (Some(&ty), Some(&value)) = (frame.il.locals.get(index), frame.locals.get(index)) else {
            return Err(invalid_program!("local {} out of range", index));
        };
        frame
            .stack
            .push_from_location(types, &mut self.heap, ty, value)?;
        Ok(Flow::Next)
    }

    /// Pops into local `index`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidProgram`] if the local does not exist or the value
    /// does not fit it, [`crate::Error::Preinit`] if the local refuses the value.
    pub(super) fn store_local(
        &mut self,
        frame: &mut Frame,
        instruction: &Instruction,
        index: usize,
    ) -> Result<Flow> {
        let types = self.types();
        let Some(&ty) = frame.il.locals.get(index) else {
            return Err(invalid_program!("local {} out of range", index));
        };
        let value = frame.stack.pop_into_location(types, &mut self.heap, ty)?;
        let Some(slot) = frame.locals.get_mut(index) else {
            return Err(invalid_program!("local {} out of range", index));
        };
        if !store_slot(&mut self.heap, slot, value)? {
            return Err(self.fail_op(frame.method, instruction.mnemonic, "Unsupported store"));
        }
        Ok(Flow::Next)
    }

    /// Pushes argument `index`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidProgram`] if the argument does not exist.
    pub(super) fn load_argument(&mut self, frame: &mut Frame, index: usize) -> Result<Flow> {
        let types = self.types();
        let ty = self.arg_type(frame.method, index)?;
        let value = *frame
            .args
            .get(index)
            .ok_or_else(|| invalid_program!("argument {} out of range", index))?;
        frame
            .stack
            .push_from_location(types, &mut self.heap, ty, value)?;
        Ok(Flow::Next)
    }

    /// Pops into argument `index`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::store_local`].
    pub(super) fn store_argument(
        &mut self,
        frame: &mut Frame,
        instruction: &Instruction,
        index: usize,
    ) -> Result<Flow> {
        let types = self.types();
        let ty = self.arg_type(frame.method, index)?;
        let value = frame.stack.pop_into_location(types, &mut self.heap, ty)?;
        let Some(slot) = frame.args.get_mut(index) else {
            return Err(invalid_program!("argument {} out of range", index));
        };
        if !store_slot(&mut self.heap, slot, value)? {
            return Err(self.fail_op(frame.method, instruction.mnemonic, "Unsupported store"));
        }
        Ok(Flow::Next)
    }

    /// `ldloca`/`ldarga`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidProgram`] for a missing slot and
    /// [`crate::Error::Preinit`] when the slot has no address, e.g. it holds a reference.
    pub(super) fn load_address(
        &mut self,
        frame: &mut Frame,
        instruction: &Instruction,
        index: usize,
    ) -> Result<Flow> {
        let slot = match instruction.code {
            ILOpcode::LdlocaS | ILOpcode::Ldloca => frame.locals.get_mut(index),
            _ => frame.args.get_mut(index),
        }
        .ok_or_else(|| invalid_program!("'{}' of slot {}", instruction.mnemonic, index))?;

        match self.heap.try_create_byref(slot) {
            Some(byref) => {
                frame.stack.push(StackValueKind::ByRef, Value::ByRef(byref));
                Ok(Flow::Next)
            }
            None => Err(self.fail_op(frame.method, instruction.mnemonic, "Unsupported byref")),
        }
    }

    // ========================================================================
    // Static fields
    // ========================================================================

    /// `stsfld`. Only statics of the type being initialized can be written.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidProgram`] for instance or literal fields and
    /// [`crate::Error::Preinit`] for every store the frozen image cannot represent.
    pub(super) fn store_static_field(&mut self, frame: &mut Frame, instruction: &Instruction) -> Result<Flow> {
        let ctx = self.ctx();
        let types = ctx.types;
        let (method, opcode) = (frame.method, instruction.mnemonic);
        let field_id = Self::resolve_field(frame, instruction)?;
        let field = types.field(field_id);

        if !field.is_static() || field.is_literal() {
            return Err(invalid_program!("stsfld to '{}'", types.field_name(field_id)));
        }
        if field.owner != self.ty {
            return Err(self.fail_op(method, opcode, "Store into other static"));
        }
        if field.is_thread_static() || field.has_rva() {
            return Err(self.fail_op(method, opcode, "Unsupported static"));
        }
        if ctx.annotations.field_requires_dataflow(field_id) {
            return Err(self.fail_op(method, opcode, "Needs dataflow analysis"));
        }

        let value = frame
            .stack
            .pop_into_location(types, &mut self.heap, field.field_type)?;
        if value.is_internal_only() || matches!(value, Value::ByRef(_)) {
            return Err(self.fail_op(method, opcode, "Value with no external representation"));
        }

        let slot = self
            .statics
            .get_mut(&field_id)
            .ok_or_else(|| invalid_program!("no storage for '{}'", types.field_name(field_id)))?;
        if !store_slot(&mut self.heap, slot, value)? {
            return Err(self.fail_op(method, opcode, "Unsupported store"));
        }
        Ok(Flow::Next)
    }

    /// `ldsfld`/`ldsflda`.
    ///
    /// Own statics are read from the scan. Read-only statics of other types come from
    /// their preinitialized snapshot, or from their default value when the type has no
    /// static constructor. Everything else could observe an unfinished initialization.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidProgram`] for instance or literal fields and
    /// [`crate::Error::Preinit`] for statics the scan cannot know the value of.
    pub(super) fn load_static_field(&mut self, frame: &mut Frame, instruction: &Instruction) -> Result<Flow> {
        let ctx = self.ctx();
        let types = ctx.types;
        let (method, opcode) = (frame.method, instruction.mnemonic);
        let address = instruction.code == ILOpcode::Ldsflda;
        let field_id = Self::resolve_field(frame, instruction)?;
        let field = types.field(field_id);

        if !field.is_static() || field.is_literal() {
            return Err(invalid_program!("{} of '{}'", opcode, types.field_name(field_id)));
        }
        if field.is_thread_static() {
            return Err(self.fail_op(method, opcode, "Unsupported static"));
        }
        if address && ctx.annotations.field_requires_dataflow(field_id) {
            return Err(self.fail_op(method, opcode, "Needs dataflow analysis"));
        }

        let read_only = ctx.read_only.is_read_only(field);
        let owner_has_cctor = types.has_static_constructor(field.owner);
        let mut value = if field.has_rva() {
            match field.rva_data() {
                Some(data) if field.is_init_only() && !owner_has_cctor => self.heap.transient(data),
                _ => return Err(self.fail_op(method, opcode, "Unsupported RVA static")),
            }
        } else if field.owner == self.ty {
            let slot = self
                .statics
                .get_mut(&field_id)
                .ok_or_else(|| invalid_program!("no storage for '{}'", types.field_name(field_id)))?;
            if !address {
                *slot
            } else {
                // the byref must alias the static itself
                return match self.heap.try_create_byref(slot) {
                    Some(byref) => {
                        frame.stack.push(StackValueKind::ByRef, Value::ByRef(byref));
                        Ok(Flow::Next)
                    }
                    None => Err(self.fail_op(method, opcode, "Unsupported byref")),
                };
            }
        } else if read_only && owner_has_cctor && ctx.policy.can_preinitialize(types, field.owner) {
            let Some(statics) = self.session.nested_statics(method, field.owner)? else {
                return Err(self.fail_op(method, opcode, "Nested cctor failed to preinit"));
            };
            let Some(frozen) = statics.get(&field_id) else {
                return Err(self.fail_op(method, opcode, "Field not produced by nested cctor"));
            };
            self.heap.import(types, frozen)
        } else if read_only && !address && !owner_has_cctor {
            self.heap
                .new_uninitialized(types, field.field_type, Some(field_id))
        } else {
            return Err(self.fail_op(method, opcode, "Load from other non-initonly static"));
        };

        if address {
            match self.heap.try_create_byref(&mut value) {
                Some(byref) => frame.stack.push(StackValueKind::ByRef, Value::ByRef(byref)),
                None => return Err(self.fail_op(method, opcode, "Unsupported byref")),
            }
        } else {
            frame
                .stack
                .push_from_location(types, &mut self.heap, field.field_type, value)?;
        }
        Ok(Flow::Next)
    }

    // ========================================================================
    // Instance fields
    // ========================================================================

    /// `stfld`. Reference fields only accept null.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Preinit`] for static fields, non-null references and
    /// receivers without settable fields.
    pub(super) fn store_field(&mut self, frame: &mut Frame, instruction: &Instruction) -> Result<Flow> {
        let ctx = self.ctx();
        let types = ctx.types;
        let (method, opcode) = (frame.method, instruction.mnemonic);
        let field_id = Self::resolve_field(frame, instruction)?;
        let field = types.field(field_id);

        if field.is_static() {
            return Err(self.fail_op(method, opcode, "Static field with stfld"));
        }

        let mut value = frame
            .stack
            .pop_into_location(types, &mut self.heap, field.field_type)?;
        let receiver = frame.stack.pop()?;

        if types.is_gc_pointer(field.field_type) {
            if !value.is_null() {
                return Err(self.fail_op(method, opcode, "Reference field"));
            }
            value = self.heap.transient(&vec![0; types.element_size(field.field_type)]);
        }
        if ctx.annotations.field_requires_dataflow(field_id) {
            return Err(self.fail_op(method, opcode, "Needs dataflow analysis"));
        }

        let stored = match self.heap.field_host(types, &receiver.value)? {
            Some(host) => self.heap.try_set_field(types, host, field, value)?,
            None => false,
        };
        if !stored {
            return Err(self.fail_op(method, opcode, "Not settable"));
        }
        Ok(Flow::Next)
    }

    /// `ldfld` of a non-reference instance field.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Preinit`] for reference or static fields and receivers
    /// without readable fields.
    pub(super) fn load_field(&mut self, frame: &mut Frame, instruction: &Instruction) -> Result<Flow> {
        let types = self.types();
        let (method, opcode) = (frame.method, instruction.mnemonic);
        let field_id = Self::resolve_field(frame, instruction)?;
        let field = types.field(field_id);

        if field.is_static() {
            return Err(self.fail_op(method, opcode, "Static field"));
        }
        if types.is_gc_pointer(field.field_type) {
            return Err(self.fail_op(method, opcode, "GC pointer field"));
        }

        let receiver = frame.stack.pop()?;
        let Some(host) = self.heap.field_host(types, &receiver.value)? else {
            return Err(self.fail_op(method, opcode, "No instance fields"));
        };
        let Some(value) = self.heap.get_field(types, host, field)? else {
            return Err(self.fail_op(method, opcode, "Unreadable field"));
        };
        frame
            .stack
            .push_from_location(types, &mut self.heap, field.field_type, value)?;
        Ok(Flow::Next)
    }

    /// `ldflda` of a non-reference instance field.
    ///
    /// # Errors
    ///
    /// Same as [`Self::load_field`], plus dataflow-annotated fields.
    pub(super) fn load_field_address(&mut self, frame: &mut Frame, instruction: &Instruction) -> Result<Flow> {
        let ctx = self.ctx();
        let types = ctx.types;
        let (method, opcode) = (frame.method, instruction.mnemonic);
        let field_id = Self::resolve_field(frame, instruction)?;
        let field = types.field(field_id);

        if field.is_static() {
            return Err(self.fail_op(method, opcode, "Static field"));
        }
        if types.is_gc_pointer(field.field_type) {
            return Err(self.fail_op(method, opcode, "GC pointer field"));
        }
        if ctx.annotations.field_requires_dataflow(field_id) {
            return Err(self.fail_op(method, opcode, "Needs dataflow analysis"));
        }

        let receiver = frame.stack.pop()?;
        let Some(host) = self.heap.field_host(types, &receiver.value)? else {
            return Err(self.fail_op(method, opcode, "No instance fields"));
        };
        let Some(byref) = self.heap.get_field_address(types, host, field)? else {
            return Err(self.fail_op(method, opcode, "Unsupported field address"));
        };
        frame.stack.push(StackValueKind::ByRef, Value::ByRef(byref));
        Ok(Flow::Next)
    }

    // ========================================================================
    // Calls
    // ========================================================================

    /// Interprets `callee` on behalf of `caller`, guarding against recursion.
    fn invoke(&mut self, caller: MethodId, callee: MethodId, args: Vec<Value>) -> Result<Option<Value>> {
        self.session.recursion.push(caller);
        let result = self.scan_method(callee, args);
        self.session.recursion.pop();
        result
    }

    /// Runs the static constructor of `owner` first when the runtime would.
    fn ensure_initialized(
        &mut self,
        caller: MethodId,
        owner: TypeId,
        triggers: bool,
        opcode: &str,
    ) -> Result<()> {
        let types = self.types();
        if types.has_static_constructor(owner)
            && owner != types.method(caller).owner
            && triggers
            && !types.is_before_field_init(owner)
            && self.session.nested_statics(caller, owner)?.is_none()
        {
            return Err(self.fail_op(caller, opcode, "Static constructor"));
        }
        Ok(())
    }

    /// `call`/`callvirt`.
    ///
    /// Intrinsics are evaluated directly, everything else is interpreted. Virtual calls
    /// are only supported when they cannot dispatch anywhere else.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Preinit`] when the callee cannot be inlined, needs its
    /// static constructor and that cannot be preinitialized, or fails itself.
    pub(super) fn call(&mut self, frame: &mut Frame, instruction: &Instruction) -> Result<Flow> {
        let ctx = self.ctx();
        let types = ctx.types;
        let (caller, opcode) = (frame.method, instruction.mnemonic);
        let mut callee = Self::resolve_method(frame, instruction)?;

        if let Some(constrained) = frame.constrained {
            let desc = types.method(callee);
            let resolved = if types.is_value_type(constrained) {
                types
                    .find_method(constrained, &desc.name, &desc.signature)
                    .filter(|&method| types.method(method).owner == constrained)
            } else {
                None
            };
            match resolved {
                Some(method) => callee = method,
                None => return Err(self.fail_op(caller, opcode, "Did not resolve constraint")),
            }
        }

        let desc = types.method(callee);
        let owner = desc.owner;
        if !ctx.group.can_inline(types, caller, callee) {
            return Err(self.fail_op(caller, opcode, "Cannot inline"));
        }

        let triggers = desc.is_static()
            || desc.is_constructor()
            || types.is_value_type(owner)
            || types.category(owner) == TypeCategory::Interface;
        self.ensure_initialized(caller, owner, triggers, opcode)?;

        if ctx.annotations.method_requires_dataflow(callee) {
            return Err(self.fail_op(caller, opcode, "Needs dataflow analysis"));
        }

        let count = desc.argument_count();
        let mut args = vec![Value::Null; count];
        for index in (0..count).rev() {
            let ty = self.arg_type(callee, index)?;
            args[index] = frame.stack.pop_into_location(types, &mut self.heap, ty)?;
        }

        // no virtual dispatch and no NullReferenceException
        if instruction.code == ILOpcode::Callvirt
            && !types.is_value_type(owner)
            && (desc.is_virtual() || args.first().is_some_and(Value::is_null))
        {
            return Err(self.fail_op(caller, opcode, "Virtual call"));
        }

        let intrinsic = if desc.is_intrinsic() {
            self.try_intrinsic(callee, &args)?
        } else {
            None
        };
        let result = match intrinsic {
            Some(value) => Some(value),
            None => self.invoke(caller, callee, args)?,
        };

        let return_type = desc.signature.return_type;
        if types.category(return_type) != TypeCategory::Void {
            let value = result.ok_or_else(|| {
                invalid_program!("'{}' returned no value", types.method_name(callee))
            })?;
            frame
                .stack
                .push_from_location(types, &mut self.heap, return_type, value)?;
        }
        Ok(Flow::Next)
    }

    /// True if no field of `ty` or its bases holds a GC pointer the program could still
    /// change after the object is frozen.
    fn gc_fields_read_only(&self, ty: TypeId) -> bool {
        let ctx = self.ctx();
        let types = ctx.types;
        let mut current = Some(ty);
        while let Some(candidate) = current {
            for field in types.instance_fields(candidate) {
                let field = types.field(field);
                if types.is_gc_pointer(field.field_type) {
                    if !ctx.read_only.is_read_only(field) {
                        return false;
                    }
                } else if types.is_value_type(field.field_type)
                    && types.contains_gc_pointers(field.field_type)
                {
                    return false;
                }
            }
            current = types
                .base_type(candidate)
                .filter(|&base| !types.is_value_type(base));
        }
        true
    }

    /// True if `ty` has no finalizer, or its finalizer was reduced to a bare `ret`.
    fn finalizer_is_trivial(&self, ty: TypeId) -> bool {
        let ctx = self.ctx();
        let types = ctx.types;
        if !types.has_finalizer(ty) {
            return true;
        }
        let mut current = Some(ty);
        while let Some(candidate) = current {
            if let Some(finalizer) = types.type_desc(candidate).finalizer() {
                return ctx
                    .bodies
                    .method_il(types, finalizer)
                    .is_some_and(|il| il.code == [0x2A]);
            }
            current = types.base_type(candidate);
        }
        true
    }

    /// `newobj` of a class, a struct or a delegate.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Preinit`] for types whose instances cannot be frozen and for
    /// constructors that fail, [`crate::Error::InvalidProgram`] for malformed delegate
    /// construction.
    pub(super) fn new_object(&mut self, frame: &mut Frame, instruction: &Instruction) -> Result<Flow> {
        let ctx = self.ctx();
        let types = ctx.types;
        let (caller, opcode) = (frame.method, instruction.mnemonic);
        let ctor = Self::resolve_method(frame, instruction)?;
        let desc = types.method(ctor);
        let owner = desc.owner;

        if !ctx.group.can_inline(types, caller, ctor) || !ctx.group.contains_type(types, owner) {
            return Err(self.fail_op(caller, opcode, "Cannot inline"));
        }
        self.ensure_initialized(caller, owner, true, opcode)?;

        if matches!(
            types.category(owner),
            TypeCategory::Array
                | TypeCategory::ByRef
                | TypeCategory::Pointer
                | TypeCategory::FunctionPointer
                | TypeCategory::GenericParameter
        ) {
            return Err(self.fail_op(caller, opcode, "Not a class or struct"));
        }
        if !self.finalizer_is_trivial(owner) {
            return Err(self.fail_op(caller, opcode, "Finalizable class"));
        }
        if ctx.annotations.method_requires_dataflow(ctor) {
            return Err(self.fail_op(caller, opcode, "Needs dataflow analysis"));
        }
        if types.requires_align8(owner) {
            return Err(self.fail_op(caller, opcode, "Align8"));
        }

        let count = desc.signature.parameters.len();
        let mut args = vec![Value::Null; count + 1];
        for index in (0..count).rev() {
            let ty = self.arg_type(ctor, index + 1)?;
            args[index + 1] = frame.stack.pop_into_location(types, &mut self.heap, ty)?;
        }

        let site = self.allocation_site();
        let instance = if types.is_delegate(owner) {
            let Some(&Value::MethodPointer(target)) = args.get(2) else {
                return Err(self.fail_op(caller, opcode, "Unverifiable delegate creation"));
            };
            let first = match args.get(1) {
                Some(&value @ (Value::Null | Value::Ref(_))) => value,
                _ => return Err(invalid_program!("delegate target is not an object reference")),
            };
            let target_desc = types.method(target);
            if first.is_null() != target_desc.is_static() {
                return Err(self.fail_op(
                    caller,
                    opcode,
                    "Open/closed static/instance delegate mismatch",
                ));
            }
            if !first.is_null() && !target_desc.instantiation.is_empty() {
                return Err(self.fail_op(caller, opcode, "Delegate with fat pointer"));
            }
            Value::Ref(self.heap.new_delegate(owner, site, target, first))
        } else {
            let instance = if types.is_value_type(owner) {
                let mut instance = self.heap.new_uninitialized(types, owner, None);
                match self.heap.try_create_byref(&mut instance) {
                    Some(byref) => args[0] = Value::ByRef(byref),
                    None => return Err(self.fail_op(caller, opcode, "Can't make `this`")),
                }
                instance
            } else {
                let id = self.heap.new_object(types, owner, site);
                args[0] = Value::Ref(id);
                Value::Ref(id)
            };

            // the frozen region has no write barriers
            if !self.gc_fields_read_only(owner) {
                return Err(self.fail_op(caller, opcode, "GC pointers"));
            }

            self.invoke(caller, ctor, args)?;
            instance
        };

        frame
            .stack
            .push_from_location(types, &mut self.heap, owner, instance)?;
        Ok(Flow::Next)
    }

    /// `ldftn`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Preinit`] after a `constrained.` prefix.
    pub(super) fn load_function(&mut self, frame: &mut Frame, instruction: &Instruction) -> Result<Flow> {
        if frame.constrained.is_some() {
            return Err(self.fail_op(frame.method, "constrained.", "Constrained ldftn"));
        }
        let target = Self::resolve_method(frame, instruction)?;
        frame
            .stack
            .push(StackValueKind::NativeInt, Value::MethodPointer(target));
        Ok(Flow::Next)
    }

    /// `ldtoken` of a field or a type.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Preinit`] for method tokens.
    pub(super) fn load_token(&mut self, frame: &mut Frame, instruction: &Instruction) -> Result<Flow> {
        let token = Self::token(instruction)?;
        let value = match frame.il.tokens.resolve(token) {
            Some(TokenTarget::Field(field)) => Value::FieldHandle(field),
            Some(TokenTarget::Type(ty)) => Value::TypeHandle(ty),
            _ => return Err(self.fail_op(frame.method, instruction.mnemonic, "Method token")),
        };
        frame.stack.push(StackValueKind::ValueType, value);
        Ok(Flow::Next)
    }

    // ========================================================================
    // Control flow
    // ========================================================================

    /// Validated target `index` of a branching instruction.
    fn target(frame: &Frame, instruction: &Instruction, index: usize) -> Result<u32> {
        let target = instruction
            .branch_targets
            .get(index)
            .copied()
            .ok_or_else(|| invalid_program!("'{}' without a target", instruction.mnemonic))?;
        let end = i64::try_from(frame.il.code.len()).unwrap_or(i64::MAX);
        if target < 0 || target > end {
            return Err(invalid_program!(
                "'{}' at IL_{:04X} branches to {}",
                instruction.mnemonic,
                instruction.offset,
                target
            ));
        }
        u32::try_from(target).map_err(|_| invalid_program!("branch target {}", target))
    }

    /// Conditional and unconditional branches.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidProgram`] for out-of-range targets and
    /// [`crate::Error::Preinit`] for operands that cannot be compared.
    pub(super) fn branch(&mut self, frame: &mut Frame, instruction: &Instruction) -> Result<Flow> {
        let target = Self::target(frame, instruction, 0)?;
        let Some(condition) = Condition::of(instruction.code) else {
            return Err(self.fail_op(frame.method, instruction.mnemonic, "Unknown branch"));
        };
        let pointer_size = self.heap.pointer_size();

        let taken = match condition {
            Condition::Always => true,
            Condition::True | Condition::False => {
                let entry = frame.stack.pop()?;
                let non_zero = match normalized(entry.kind, pointer_size) {
                    StackValueKind::Int32 => self.heap.as_i32(&entry.value)? != 0,
                    StackValueKind::Int64 => self.heap.as_i64(&entry.value)? != 0,
                    StackValueKind::ObjRef => !entry.value.is_null(),
                    _ => return Err(self.fail_op(frame.method, instruction.mnemonic, "Unsupported branch operand")),
                };
                non_zero == (condition == Condition::True)
            }
            _ => {
                let b = frame.stack.pop()?;
                let a = frame.stack.pop()?;
                match operands(&self.heap, &a, &b)? {
                    Some(Operands::Int32(x, y)) => condition.test_int(
                        i64::from(x),
                        i64::from(y),
                        u64::from(x as u32),
                        u64::from(y as u32),
                    ),
                    Some(Operands::Int64(x, y)) => condition.test_int(x, y, x as u64, y as u64),
                    Some(Operands::Float(x, y)) => condition.test_float(x, y),
                    None if a.kind == StackValueKind::ObjRef
                        && b.kind == StackValueKind::ObjRef
                        && matches!(condition, Condition::Eq | Condition::NeUn) =>
                    {
                        let Some(equal) = self.heap.compare_equality(&a.value, &b.value) else {
                            return Err(self.fail_op(frame.method, instruction.mnemonic, "Incomparable references"));
                        };
                        equal == (condition == Condition::Eq)
                    }
                    None => return Err(self.fail_op(frame.method, instruction.mnemonic, "Incomparable branch operands")),
                }
            }
        };

        Ok(if taken { Flow::Jump(target) } else { Flow::Next })
    }

    /// `switch`. An index past the table falls through.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidProgram`] for a non-`int32` index.
    pub(super) fn switch(&mut self, frame: &mut Frame, instruction: &Instruction) -> Result<Flow> {
        let entry = frame.stack.pop()?;
        if entry.kind != StackValueKind::Int32 {
            return Err(invalid_program!("switch on {:?}", entry.kind));
        }
        let index = self.heap.as_i32(&entry.value)? as u32 as usize;
        if index >= instruction.branch_targets.len() {
            return Ok(Flow::Next);
        }
        Ok(Flow::Jump(Self::target(frame, instruction, index)?))
    }

    /// `leave`. Handlers never run, so the only effect is emptying the stack.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidProgram`] for an out-of-range target.
    pub(super) fn leave(&mut self, frame: &mut Frame, instruction: &Instruction) -> Result<Flow> {
        frame.stack.clear();
        Ok(Flow::Jump(Self::target(frame, instruction, 0)?))
    }

    // ========================================================================
    // Arithmetic
    // ========================================================================

    /// `clt`, `clt.un`, `cgt` and `cgt.un`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Preinit`] for operands that cannot be ordered.
    pub(super) fn compare(&mut self, frame: &mut Frame, instruction: &Instruction) -> Result<Flow> {
        let b = frame.stack.pop()?;
        let a = frame.stack.pop()?;
        let Some(condition) = Condition::of(instruction.code) else {
            return Err(self.fail_op(frame.method, instruction.mnemonic, "Unknown comparison"));
        };

        let result = match operands(&self.heap, &a, &b)? {
            Some(Operands::Int32(x, y)) => condition.test_int(
                i64::from(x),
                i64::from(y),
                u64::from(x as u32),
                u64::from(y as u32),
            ),
            Some(Operands::Int64(x, y)) => condition.test_int(x, y, x as u64, y as u64),
            Some(Operands::Float(x, y)) => condition.test_float(x, y),
            // `cgt.un` against null is the compiled form of `x != null`
            None if a.kind == StackValueKind::ObjRef
                && b.kind == StackValueKind::ObjRef
                && condition == Condition::GtUn =>
            {
                !a.value.is_null() && b.value.is_null()
            }
            None => return Err(self.fail_op(frame.method, instruction.mnemonic, "Incomparable operands")),
        };

        frame
            .stack
            .push(StackValueKind::Int32, Value::from_i32(i32::from(result)));
        Ok(Flow::Next)
    }

    /// `ceq`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Preinit`] for operands of different kinds or with no
    /// compile-time identity.
    pub(super) fn compare_equal(&mut self, frame: &mut Frame, instruction: &Instruction) -> Result<Flow> {
        let b = frame.stack.pop()?;
        let a = frame.stack.pop()?;
        let equal = if a.kind == b.kind {
            self.heap.compare_equality(&a.value, &b.value)
        } else {
            None
        };
        let Some(equal) = equal else {
            return Err(self.fail_op(frame.method, instruction.mnemonic, "Incomparable operands"));
        };
        frame
            .stack
            .push(StackValueKind::Int32, Value::from_i32(i32::from(equal)));
        Ok(Flow::Next)
    }

    /// `neg`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Preinit`] for non-numeric operands.
    pub(super) fn negate(&mut self, frame: &mut Frame, instruction: &Instruction) -> Result<Flow> {
        let entry = frame.stack.pop()?;
        let value = match normalized(entry.kind, self.heap.pointer_size()) {
            StackValueKind::Int32 => Value::from_i32(self.heap.as_i32(&entry.value)?.wrapping_neg()),
            StackValueKind::Int64 => Value::from_i64(self.heap.as_i64(&entry.value)?.wrapping_neg()),
            StackValueKind::Float => Value::from_f64(-self.heap.as_f64(&entry.value)?),
            _ => return Err(self.fail_op(frame.method, instruction.mnemonic, "Non-numeric negation")),
        };
        frame.stack.push(entry.kind, value);
        Ok(Flow::Next)
    }

    /// `not`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Preinit`] for non-integer operands.
    pub(super) fn bitwise_not(&mut self, frame: &mut Frame, instruction: &Instruction) -> Result<Flow> {
        let entry = frame.stack.pop()?;
        let value = match normalized(entry.kind, self.heap.pointer_size()) {
            StackValueKind::Int32 => Value::from_i32(!self.heap.as_i32(&entry.value)?),
            StackValueKind::Int64 => Value::from_i64(!self.heap.as_i64(&entry.value)?),
            _ => return Err(self.fail_op(frame.method, instruction.mnemonic, "Non-integer complement")),
        };
        frame.stack.push(entry.kind, value);
        Ok(Flow::Next)
    }

    /// Two-operand arithmetic, bitwise and shift instructions, plus byref offsetting
    /// through `add`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Preinit`] for division by zero, overflowing division and
    /// operand combinations that are not modeled, [`crate::Error::InvalidProgram`] for
    /// bitwise operations on floats.
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
    pub(super) fn binary_op(&mut self, frame: &mut Frame, instruction: &Instruction) -> Result<Flow> {
        use ILOpcode as Op;

        let (method, opcode, code) = (frame.method, instruction.mnemonic, instruction.code);
        let b = frame.stack.pop()?;
        let a = frame.stack.pop()?;
        let native = a.kind == StackValueKind::NativeInt || b.kind == StackValueKind::NativeInt;
        let division = matches!(code, Op::Div | Op::DivUn | Op::Rem | Op::RemUn);
        let shift = matches!(code, Op::Shl | Op::Shr | Op::ShrUn);

        let (kind, value) = match operands(&self.heap, &a, &b)? {
            Some(Operands::Int32(x, y)) => {
                if division && y == 0 {
                    return Err(self.fail_op(method, opcode, "Division by zero"));
                }
                let result = match code {
                    Op::Add => Some(x.wrapping_add(y)),
                    Op::Sub => Some(x.wrapping_sub(y)),
                    Op::Mul => Some(x.wrapping_mul(y)),
                    Op::Div => x.checked_div(y),
                    Op::DivUn => Some(((x as u32) / (y as u32)) as i32),
                    Op::Rem => x.checked_rem(y),
                    Op::RemUn => Some(((x as u32) % (y as u32)) as i32),
                    Op::And => Some(x & y),
                    Op::Or => Some(x | y),
                    Op::Xor => Some(x ^ y),
                    Op::Shl => Some(x.wrapping_shl(y as u32)),
                    Op::Shr => Some(x.wrapping_shr(y as u32)),
                    Op::ShrUn => Some((x as u32).wrapping_shr(y as u32) as i32),
                    _ => return Err(self.fail_op(method, opcode, "Unsupported int32 operation")),
                };
                let Some(result) = result else {
                    return Err(self.fail_op(method, opcode, "Arithmetic overflow"));
                };
                let kind = if native { StackValueKind::NativeInt } else { StackValueKind::Int32 };
                (kind, Value::from_i32(result))
            }
            Some(Operands::Int64(x, y)) => {
                if division && y == 0 {
                    return Err(self.fail_op(method, opcode, "Division by zero"));
                }
                let Some(result) = Self::int64_op(code, x, y) else {
                    return Err(self.fail_op(method, opcode, "Arithmetic overflow"));
                };
                let kind = if native { StackValueKind::NativeInt } else { StackValueKind::Int64 };
                (kind, Value::from_i64(result))
            }
            Some(Operands::Float(x, y)) => {
                if division && y == 0.0 {
                    return Err(self.fail_op(method, opcode, "Division by zero"));
                }
                let result = match code {
                    Op::Add => x + y,
                    Op::Sub => x - y,
                    Op::Mul => x * y,
                    Op::Div => x / y,
                    Op::Rem => x % y,
                    _ => return Err(invalid_program!("'{}' on floating point operands", opcode)),
                };
                (StackValueKind::Float, Value::from_f64(result))
            }
            None if shift
                && normalized(a.kind, self.heap.pointer_size()) == StackValueKind::Int64
                && b.kind == StackValueKind::Int32 =>
            {
                let x = self.heap.as_i64(&a.value)?;
                let y = i64::from(self.heap.as_i32(&b.value)?);
                let Some(result) = Self::int64_op(code, x, y) else {
                    return Err(self.fail_op(method, opcode, "Unsupported int64 shift"));
                };
                (a.kind, Value::from_i64(result))
            }
            None if matches!(a.value, Value::ByRef(_)) != matches!(b.value, Value::ByRef(_)) => {
                return self.offset_byref(frame, instruction, a, b);
            }
            None => return Err(self.fail_op(method, opcode, "Incompatible operands")),
        };

        frame.stack.push(kind, value);
        Ok(Flow::Next)
    }

    /// 64-bit form of [`Self::binary_op`]. `None` on overflow.
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
    fn int64_op(code: ILOpcode, x: i64, y: i64) -> Option<i64> {
        use ILOpcode as Op;
        match code {
            Op::Add => Some(x.wrapping_add(y)),
            Op::Sub => Some(x.wrapping_sub(y)),
            Op::Mul => Some(x.wrapping_mul(y)),
            Op::Div => x.checked_div(y),
            Op::DivUn => Some(((x as u64) / (y as u64)) as i64),
            Op::Rem => x.checked_rem(y),
            Op::RemUn => Some(((x as u64) % (y as u64)) as i64),
            Op::And => Some(x & y),
            Op::Or => Some(x | y),
            Op::Xor => Some(x ^ y),
            Op::Shl => Some(x.wrapping_shl(y as u32)),
            Op::Shr => Some(x.wrapping_shr(y as u32)),
            Op::ShrUn => Some((x as u64).wrapping_shr(y as u32) as i64),
            _ => None,
        }
    }

    /// `add` of a byref and an integer.
    fn offset_byref(
        &mut self,
        frame: &mut Frame,
        instruction: &Instruction,
        a: StackEntry,
        b: StackEntry,
    ) -> Result<Flow> {
        if instruction.code != ILOpcode::Add {
            return Err(invalid_program!("'{}' on a byref", instruction.mnemonic));
        }
        let (reference, addend) = if matches!(a.value, Value::ByRef(_)) { (a, b) } else { (b, a) };
        let addition = match addend.kind {
            StackValueKind::Int32 => i64::from(self.heap.as_i32(&addend.value)?),
            StackValueKind::NativeInt => self.heap.as_native(&addend.value)?,
            _ => return Err(invalid_program!("byref offset by {:?}", addend.kind)),
        };

        let Value::ByRef(byref) = reference.value else {
            return Err(invalid_program!("byref arithmetic without a byref"));
        };
        let Some((storage, offset, len)) = self.heap.byref_extent(byref)? else {
            return Err(self.fail(frame.method, "Byref math with unsupported byref"));
        };
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);
        let len = i64::try_from(len).unwrap_or(i64::MAX);
        if addition > len - offset || addition + offset < 0 {
            return Err(self.fail(frame.method, "Out of range byref access"));
        }

        let offset = usize::try_from(offset + addition)
            .map_err(|_| invalid_program!("negative byref offset"))?;
        frame.stack.push(
            reference.kind,
            Value::ByRef(ByRef::Bytes { storage, offset }),
        );
        Ok(Flow::Next)
    }

    /// `conv.*` without overflow checking.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Preinit`] for operands that are not numbers.
    #[allow(
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap,
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss
    )]
    pub(super) fn convert(&mut self, frame: &mut Frame, instruction: &Instruction) -> Result<Flow> {
        use ILOpcode as Op;

        let code = instruction.code;
        let entry = frame.stack.pop()?;
        let pointer_size = self.heap.pointer_size();

        if matches!(code, Op::ConvI | Op::ConvU) && entry.kind == StackValueKind::ByRef {
            frame.stack.push(StackValueKind::NativeInt, entry.value);
            return Ok(Flow::Next);
        }

        let converted = match normalized(entry.kind, pointer_size) {
            StackValueKind::Int32 | StackValueKind::Int64 => {
                let (signed, unsigned) = if normalized(entry.kind, pointer_size) == StackValueKind::Int32 {
                    let value = self.heap.as_i32(&entry.value)?;
                    (i64::from(value), u64::from(value as u32))
                } else {
                    let value = self.heap.as_i64(&entry.value)?;
                    (value, value as u64)
                };
                match code {
                    Op::ConvI => Converted::Native(signed),
                    Op::ConvU => Converted::Native(unsigned as i64),
                    Op::ConvI1 => Converted::Int32(i32::from(signed as i8)),
                    Op::ConvI2 => Converted::Int32(i32::from(signed as i16)),
                    Op::ConvI4 | Op::ConvU4 => Converted::Int32(signed as i32),
                    Op::ConvI8 => Converted::Int64(signed),
                    Op::ConvU1 => Converted::Int32(i32::from(signed as u8)),
                    Op::ConvU2 => Converted::Int32(i32::from(signed as u16)),
                    Op::ConvU8 => Converted::Int64(unsigned as i64),
                    Op::ConvR4 => Converted::Float(f64::from(signed as f32)),
                    Op::ConvR8 => Converted::Float(signed as f64),
                    _ => return Err(self.fail_op(frame.method, instruction.mnemonic, "Unsupported integer conversion")),
                }
            }
            StackValueKind::Float => {
                let value = self.heap.as_f64(&entry.value)?;
                match code {
                    Op::ConvI if pointer_size == 8 => Converted::Native(value as i64),
                    Op::ConvI => Converted::Native(i64::from(value as i32)),
                    Op::ConvU if pointer_size == 8 => Converted::Native(value as u64 as i64),
                    Op::ConvU => Converted::Native(i64::from(value as u32)),
                    Op::ConvI1 => Converted::Int32(i32::from(value as i32 as i8)),
                    Op::ConvI2 => Converted::Int32(i32::from(value as i32 as i16)),
                    Op::ConvI4 => Converted::Int32(value as i32),
                    Op::ConvI8 => Converted::Int64(value as i64),
                    Op::ConvU1 => Converted::Int32(i32::from(value as i32 as u8)),
                    Op::ConvU2 => Converted::Int32(i32::from(value as i32 as u16)),
                    Op::ConvU4 => Converted::Int32(value as u32 as i32),
                    Op::ConvU8 => Converted::Int64(value as u64 as i64),
                    Op::ConvR4 => Converted::Float(f64::from(value as f32)),
                    Op::ConvR8 => Converted::Float(value),
                    _ => return Err(self.fail_op(frame.method, instruction.mnemonic, "Unsupported float conversion")),
                }
            }
            _ => return Err(self.fail_op(frame.method, instruction.mnemonic, "Unsupported conversion operand")),
        };

        match converted {
            Converted::Int32(value) => frame.stack.push(StackValueKind::Int32, Value::from_i32(value)),
            Converted::Int64(value) => frame.stack.push(StackValueKind::Int64, Value::from_i64(value)),
            Converted::Native(value) => frame.stack.push_entry(native_entry(&self.heap, value)),
            Converted::Float(value) => frame.stack.push(StackValueKind::Float, Value::from_f64(value)),
        }
        Ok(Flow::Next)
    }

    // ========================================================================
    // Arrays
    // ========================================================================

    /// Element type named by a typed `ldelem.*`/`stelem.*`, or by the token of the
    /// generic form.
    fn element_type(&self, frame: &Frame, instruction: &Instruction) -> Result<TypeId> {
        use ILOpcode as Op;

        let types = self.types();
        let known = match instruction.code {
            Op::LdelemI | Op::StelemI => WellKnownType::IntPtr,
            Op::LdelemI1 | Op::StelemI1 => WellKnownType::SByte,
            Op::LdelemU1 => WellKnownType::Byte,
            Op::LdelemI2 | Op::StelemI2 => WellKnownType::Int16,
            Op::LdelemU2 => WellKnownType::UInt16,
            Op::LdelemI4 | Op::StelemI4 => WellKnownType::Int32,
            Op::LdelemU4 => WellKnownType::UInt32,
            Op::LdelemI8 | Op::StelemI8 => WellKnownType::Int64,
            Op::LdelemR4 | Op::StelemR4 => WellKnownType::Single,
            Op::LdelemR8 | Op::StelemR8 => WellKnownType::Double,
            _ => return Self::resolve_type(frame, instruction),
        };
        Ok(types.well_known(known))
    }

    /// `newarr` of a bounded number of GC-free elements.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidProgram`] without an integer count and
    /// [`crate::Error::Preinit`] for counts out of bounds or reference-holding elements.
    pub(super) fn new_array(&mut self, frame: &mut Frame, instruction: &Instruction) -> Result<Flow> {
        let ctx = self.ctx();
        let types = ctx.types;
        let (method, opcode) = (frame.method, instruction.mnemonic);
        let Some(count) = frame.stack.try_pop_int(&self.heap) else {
            return Err(invalid_program!("newarr without an integer length"));
        };
        let element = Self::resolve_type(frame, instruction)?;

        if count > 0
            && (types.is_gc_pointer(element)
                || (types.is_value_type(element) && types.contains_gc_pointers(element)))
        {
            return Err(self.fail_op(method, opcode, "GC pointers"));
        }
        let length = usize::try_from(count).ok().filter(|&length| length <= ctx.config.max_array_elements);
        let Some(length) = length else {
            return Err(self.fail_op(method, opcode, "Array out of bounds"));
        };
        if types.requires_align8(element) {
            return Err(self.fail_op(method, opcode, "Align8"));
        }

        if !self.heap.fits(types.element_size(element).saturating_mul(length)) {
            return Err(self.fail_op(method, opcode, "Heap limit"));
        }

        let site = self.allocation_site();
        let id = self.heap.new_array(types, element, length, site);
        frame.stack.push(StackValueKind::ObjRef, Value::Ref(id));
        Ok(Flow::Next)
    }

    /// The array instance behind an array operand.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Preinit`] for null and for arrays owned by another type's
    /// snapshot, [`crate::Error::InvalidProgram`] for anything that is not an array.
    fn array_operand(&self, frame: &Frame, instruction: &Instruction, value: Value) -> Result<ObjectId> {
        match value {
            Value::Ref(id) => match self.heap.instance(id)? {
                Instance::Array { .. } => Ok(id),
                Instance::Foreign(_) => Err(self.fail_op(frame.method, instruction.mnemonic, "Foreign array")),
                _ => Err(invalid_program!("'{}' on a non-array", instruction.mnemonic)),
            },
            Value::Null => Err(self.fail_op(frame.method, instruction.mnemonic, "Null array")),
            _ => Err(invalid_program!("'{}' on a non-array", instruction.mnemonic)),
        }
    }

    /// `ldlen`.
    ///
    /// # Errors
    ///
    /// See [`Self::array_operand`].
    pub(super) fn load_length(&mut self, frame: &mut Frame, instruction: &Instruction) -> Result<Flow> {
        let entry = frame.stack.pop()?;
        let id = self.array_operand(frame, instruction, entry.value)?;
        let length = self
            .heap
            .array_length(id)?
            .ok_or_else(|| invalid_program!("ldlen on a non-array"))?;
        let length = i64::try_from(length).map_err(|_| invalid_program!("array length"))?;
        frame.stack.push_entry(native_entry(&self.heap, length));
        Ok(Flow::Next)
    }

    /// `stelem` and its typed forms.
    ///
    /// # Errors
    ///
    /// See [`Self::array_operand`]. Out-of-range indices are [`crate::Error::Preinit`].
    pub(super) fn store_element(&mut self, frame: &mut Frame, instruction: &Instruction) -> Result<Flow> {
        let types = self.types();
        let element = self.element_type(frame, instruction)?;
        if types.is_gc_pointer(element) {
            return Err(self.fail_op(frame.method, instruction.mnemonic, "GC pointer element"));
        }

        let value = frame.stack.pop_into_location(types, &mut self.heap, element)?;
        let Some(index) = frame.stack.try_pop_int(&self.heap) else {
            return Err(invalid_program!("stelem without an integer index"));
        };
        let array = frame.stack.pop()?;
        let id = self.array_operand(frame, instruction, array.value)?;
        if !self.heap.array_try_store(id, index, value)? {
            return Err(self.fail_op(frame.method, instruction.mnemonic, "Out of range access"));
        }
        Ok(Flow::Next)
    }

    /// `ldelem` and its typed forms.
    ///
    /// # Errors
    ///
    /// Same as [`Self::store_element`].
    pub(super) fn load_element(&mut self, frame: &mut Frame, instruction: &Instruction) -> Result<Flow> {
        let types = self.types();
        let element = self.element_type(frame, instruction)?;
        if types.is_gc_pointer(element) {
            return Err(self.fail_op(frame.method, instruction.mnemonic, "GC pointer element"));
        }

        let Some(index) = frame.stack.try_pop_int(&self.heap) else {
            return Err(invalid_program!("ldelem without an integer index"));
        };
        let array = frame.stack.pop()?;
        let id = self.array_operand(frame, instruction, array.value)?;
        let Some(value) = self.heap.array_try_load(id, index)? else {
            return Err(self.fail_op(frame.method, instruction.mnemonic, "Out of range access"));
        };
        frame
            .stack
            .push_from_location(types, &mut self.heap, element, value)?;
        Ok(Flow::Next)
    }

    // ========================================================================
    // Objects and memory
    // ========================================================================

    /// `box`. Boxing a reference type is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Preinit`] for nullable and over-aligned types.
    pub(super) fn box_value(&mut self, frame: &mut Frame, instruction: &Instruction) -> Result<Flow> {
        let types = self.types();
        let ty = Self::resolve_type(frame, instruction)?;
        if !types.is_value_type(ty) {
            return Ok(Flow::Next);
        }
        if types.is_nullable(ty) {
            return Err(self.fail_op(frame.method, instruction.mnemonic, "Nullable box"));
        }
        if types.requires_align8(ty) {
            return Err(self.fail_op(frame.method, instruction.mnemonic, "Align8"));
        }

        let value = frame.stack.pop_into_location(types, &mut self.heap, ty)?;
        let site = self.allocation_site();
        let Some(id) = self.heap.try_box(types, ty, value, site)? else {
            return Err(self.fail_op(frame.method, instruction.mnemonic, "Unboxable value"));
        };
        frame.stack.push(StackValueKind::ObjRef, Value::Ref(id));
        Ok(Flow::Next)
    }

    /// `unbox.any` of a boxed value type.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidProgram`] when the operand is not a box of `T`.
    pub(super) fn unbox_any(&mut self, frame: &mut Frame, instruction: &Instruction) -> Result<Flow> {
        let types = self.types();
        let ty = Self::resolve_type(frame, instruction)?;
        let entry = frame.stack.pop()?;
        let unboxed = match entry.value {
            Value::Ref(id) => self.heap.try_unbox_any(types, id, ty)?,
            _ => None,
        };
        let Some(value) = unboxed else {
            return Err(invalid_program!("unbox.any to '{}'", types.type_name(ty)));
        };
        frame
            .stack
            .push_from_location(types, &mut self.heap, ty, value)?;
        Ok(Flow::Next)
    }

    /// `initobj`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidProgram`] without a byref operand and
    /// [`crate::Error::Preinit`] for reference types and byrefs that cannot be cleared.
    pub(super) fn init_object(&mut self, frame: &mut Frame, instruction: &Instruction) -> Result<Flow> {
        let types = self.types();
        let entry = frame.stack.pop()?;
        if entry.kind != StackValueKind::ByRef {
            return Err(invalid_program!("initobj on {:?}", entry.kind));
        }
        let ty = Self::resolve_type(frame, instruction)?;
        let cleared = match entry.value {
            Value::ByRef(byref) if !types.is_gc_pointer(ty) => {
                self.heap.byref_try_initialize(byref, types.element_size(ty))?
            }
            _ => false,
        };
        if !cleared {
            return Err(self.fail_op(frame.method, instruction.mnemonic, "Unsupported initobj target"));
        }
        Ok(Flow::Next)
    }

    /// `initblk` over a byte buffer.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Preinit`] for operands of the wrong kind and ranges that
    /// leave the buffer.
    pub(super) fn init_block(&mut self, frame: &mut Frame, instruction: &Instruction) -> Result<Flow> {
        let (method, opcode) = (frame.method, instruction.mnemonic);
        let size = frame.stack.pop()?;
        let fill = frame.stack.pop()?;
        let address = frame.stack.pop()?;

        if size.kind != StackValueKind::Int32
            || fill.kind != StackValueKind::Int32
            || address.kind != StackValueKind::ByRef
        {
            return Err(self.fail_op(method, opcode, "Unsupported initblk operands"));
        }
        let size = self.heap.as_i32(&size.value)? as u32 as usize;
        let fill = self.heap.as_i32(&fill.value)? as u8;

        let extent = match address.value {
            Value::ByRef(byref) => self.heap.byref_extent(byref)?,
            _ => None,
        };
        let Some((storage, offset, len)) = extent else {
            return Err(self.fail(method, "initblk of unsupported byref"));
        };
        if size > len.saturating_sub(offset) {
            return Err(self.fail_op(method, opcode, "Out of range initblk"));
        }
        self.heap.buffer_mut(storage)?[offset..offset + size].fill(fill);
        Ok(Flow::Next)
    }

    /// `localloc` of a small zeroed buffer.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Preinit`] for negative or oversized requests.
    pub(super) fn local_alloc(&mut self, frame: &mut Frame, instruction: &Instruction) -> Result<Flow> {
        let limit = self.ctx().config.max_localloc_bytes;
        let entry = frame.stack.pop()?;
        let size = match entry.kind {
            StackValueKind::Int32 => i64::from(self.heap.as_i32(&entry.value)?),
            StackValueKind::NativeInt => self.heap.as_native(&entry.value)?,
            _ => i64::MAX,
        };
        let size = usize::try_from(size).ok().filter(|&size| size <= limit);
        let Some(size) = size else {
            return Err(self.fail_op(frame.method, instruction.mnemonic, "Localloc out of bounds"));
        };
        if !self.heap.fits(size) {
            return Err(self.fail_op(frame.method, instruction.mnemonic, "Heap limit"));
        }

        let storage = self.heap.alloc_bytes(vec![0; size]);
        frame.stack.push(
            StackValueKind::NativeInt,
            Value::ByRef(ByRef::Bytes { storage, offset: 0 }),
        );
        Ok(Flow::Next)
    }

    /// `ldobj` and `ldind.*`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidProgram`] for a non-pointer operand and
    /// [`crate::Error::Preinit`] for byrefs that cannot produce the value.
    pub(super) fn load_indirect(&mut self, frame: &mut Frame, instruction: &Instruction) -> Result<Flow> {
        use ILOpcode as Op;

        let types = self.types();
        let known = match instruction.code {
            Op::LdindI1 => Some(WellKnownType::SByte),
            Op::LdindU1 => Some(WellKnownType::Byte),
            Op::LdindI2 => Some(WellKnownType::Int16),
            Op::LdindU2 => Some(WellKnownType::UInt16),
            Op::LdindI4 => Some(WellKnownType::Int32),
            Op::LdindU4 => Some(WellKnownType::UInt32),
            Op::LdindI8 => Some(WellKnownType::Int64),
            Op::LdindI => Some(WellKnownType::IntPtr),
            Op::LdindR4 => Some(WellKnownType::Single),
            Op::LdindR8 => Some(WellKnownType::Double),
            _ => None,
        };
        let ty = match known {
            Some(known) => types.well_known(known),
            None => Self::resolve_type(frame, instruction)?,
        };

        let entry = frame.stack.pop()?;
        if !matches!(entry.kind, StackValueKind::ByRef | StackValueKind::NativeInt) {
            return Err(invalid_program!("'{}' on {:?}", instruction.mnemonic, entry.kind));
        }
        let loaded = match entry.value {
            Value::ByRef(byref) => self.heap.byref_try_load(types, byref, ty)?,
            _ => None,
        };
        let Some(value) = loaded else {
            return Err(self.fail(frame.method, "Ldind from unsupported byref"));
        };
        frame
            .stack
            .push_from_location(types, &mut self.heap, ty, value)?;
        Ok(Flow::Next)
    }

    /// `stobj` and `stind.*`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidProgram`] for a non-pointer destination and
    /// [`crate::Error::Preinit`] for byrefs that refuse the value.
    pub(super) fn store_indirect(&mut self, frame: &mut Frame, instruction: &Instruction) -> Result<Flow> {
        use ILOpcode as Op;

        let types = self.types();
        let known = match instruction.code {
            Op::StindI1 => Some(WellKnownType::Byte),
            Op::StindI2 => Some(WellKnownType::UInt16),
            Op::StindI4 => Some(WellKnownType::UInt32),
            Op::StindI8 => Some(WellKnownType::UInt64),
            Op::StindI => Some(WellKnownType::UIntPtr),
            Op::StindR4 => Some(WellKnownType::Single),
            Op::StindR8 => Some(WellKnownType::Double),
            _ => {
                let ty = Self::resolve_type(frame, instruction)?;
                match types.category(ty) {
                    TypeCategory::SByte | TypeCategory::Boolean | TypeCategory::Byte => {
                        Some(WellKnownType::Byte)
                    }
                    TypeCategory::Int16 | TypeCategory::Char | TypeCategory::UInt16 => {
                        Some(WellKnownType::UInt16)
                    }
                    TypeCategory::Int32 | TypeCategory::UInt32 => Some(WellKnownType::UInt32),
                    TypeCategory::Int64 | TypeCategory::UInt64 => Some(WellKnownType::UInt64),
                    TypeCategory::IntPtr | TypeCategory::UIntPtr => Some(WellKnownType::UIntPtr),
                    TypeCategory::Single => Some(WellKnownType::Single),
                    TypeCategory::Double => Some(WellKnownType::Double),
                    _ => None,
                }
            }
        };

        let value = match known {
            Some(known) => frame
                .stack
                .pop_into_location(types, &mut self.heap, types.well_known(known))?,
            None => frame.stack.pop()?.value,
        };
        let location = frame.stack.pop()?;
        if !matches!(location.kind, StackValueKind::ByRef | StackValueKind::NativeInt) {
            return Err(invalid_program!("'{}' into {:?}", instruction.mnemonic, location.kind));
        }
        let Value::ByRef(byref) = location.value else {
            return Err(self.fail(frame.method, "Stind into unsupported byref"));
        };
        if !self.heap.byref_try_store(byref, value)? {
            return Err(self.fail(frame.method, "Byref doesn't support storing value"));
        }
        Ok(Flow::Next)
    }
}
