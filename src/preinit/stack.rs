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

//! Evaluation stack and the coercions between stack slots and typed locations.
//!
//! The stack only knows the verifier's coarse kinds. Moving a value into a local, an
//! argument, a field or an array element narrows it to the location's exact category,
//! reading one back widens it again. Both directions follow the runtime's numeric
//! promotion rules: small integers are sign or zero extended to 32 bits, `float` widens to
//! `double`, native integers take the target's pointer width.

use strum::IntoStaticStr;

use crate::{
    metadata::typesystem::{TypeCategory, TypeId, TypeSystem},
    preinit::{heap::Heap, value::Value},
    Result,
};

/// Verifier-level kind of a stack slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr)]
pub(crate) enum StackValueKind {
    Int32,
    Int64,
    NativeInt,
    Float,
    ByRef,
    ObjRef,
    ValueType,
}

/// One stack slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct StackEntry {
    pub(crate) kind: StackValueKind,
    pub(crate) value: Value,
}

impl StackEntry {
    pub(crate) fn new(kind: StackValueKind, value: Value) -> Self {
        StackEntry { kind, value }
    }
}

/// Operand stack of one method activation.
#[derive(Debug, Default)]
pub(crate) struct EvalStack {
    entries: Vec<StackEntry>,
}

impl EvalStack {
    pub(crate) fn new() -> Self {
        EvalStack::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn push(&mut self, kind: StackValueKind, value: Value) {
        self.entries.push(StackEntry::new(kind, value));
    }

    pub(crate) fn push_entry(&mut self, entry: StackEntry) {
        self.entries.push(entry);
    }

    /// # Errors
    /// [`crate::Error::InvalidProgram`] on underflow.
    pub(crate) fn pop(&mut self) -> Result<StackEntry> {
        self.entries
            .pop()
            .ok_or_else(|| invalid_program!("evaluation stack underflow"))
    }

    /// Entry `depth` slots below the top.
    pub(crate) fn peek(&self, depth: usize) -> Result<&StackEntry> {
        self.entries
            .len()
            .checked_sub(depth + 1)
            .and_then(|index| self.entries.get(index))
            .ok_or_else(|| invalid_program!("evaluation stack underflow"))
    }

    /// Pops an `int32`, or a native int that fits one.
    ///
    /// Returns `None` and leaves nothing behind when the top slot holds anything else.
    pub(crate) fn try_pop_int(&mut self, heap: &Heap) -> Option<i32> {
        let entry = self.entries.pop()?;
        match entry.kind {
            StackValueKind::Int32 => heap.as_i32(&entry.value).ok(),
            StackValueKind::NativeInt if heap.pointer_size() == 8 => heap
                .as_i64(&entry.value)
                .ok()
                .and_then(|value| i32::try_from(value).ok()),
            StackValueKind::NativeInt => heap.as_i32(&entry.value).ok(),
            _ => None,
        }
    }

    /// Pushes the content of a location of type `ty`, widened to its stack kind.
    ///
    /// # Errors
    /// [`crate::Error::InvalidProgram`] when `value` does not fit the location type.
    pub(crate) fn push_from_location(
        &mut self,
        types: &TypeSystem,
        heap: &mut Heap,
        ty: TypeId,
        value: Value,
    ) -> Result<()> {
        let entry = match types.category(ty) {
            TypeCategory::Boolean | TypeCategory::Byte => StackEntry::new(
                StackValueKind::Int32,
                Value::from_i32(i32::from(heap.as_i8(&value)? as u8)),
            ),
            TypeCategory::SByte => StackEntry::new(
                StackValueKind::Int32,
                Value::from_i32(i32::from(heap.as_i8(&value)?)),
            ),
            TypeCategory::Char | TypeCategory::UInt16 => StackEntry::new(
                StackValueKind::Int32,
                Value::from_i32(i32::from(heap.as_i16(&value)? as u16)),
            ),
            TypeCategory::Int16 => StackEntry::new(
                StackValueKind::Int32,
                Value::from_i32(i32::from(heap.as_i16(&value)?)),
            ),
            TypeCategory::Int32 | TypeCategory::UInt32 => {
                StackEntry::new(StackValueKind::Int32, heap.clone_value(value)?)
            }
            TypeCategory::Int64 | TypeCategory::UInt64 => {
                StackEntry::new(StackValueKind::Int64, heap.clone_value(value)?)
            }
            TypeCategory::IntPtr
            | TypeCategory::UIntPtr
            | TypeCategory::Pointer
            | TypeCategory::FunctionPointer => {
                StackEntry::new(StackValueKind::NativeInt, heap.clone_value(value)?)
            }
            TypeCategory::Single => StackEntry::new(
                StackValueKind::Float,
                Value::from_f64(f64::from(heap.as_f32(&value)?)),
            ),
            TypeCategory::Double => {
                StackEntry::new(StackValueKind::Float, heap.clone_value(value)?)
            }
            TypeCategory::ValueType | TypeCategory::Nullable => {
                StackEntry::new(StackValueKind::ValueType, heap.clone_value(value)?)
            }
            TypeCategory::Class | TypeCategory::Interface | TypeCategory::Array => {
                StackEntry::new(StackValueKind::ObjRef, value)
            }
            TypeCategory::ByRef => StackEntry::new(StackValueKind::ByRef, value),
            TypeCategory::Void | TypeCategory::GenericParameter => {
                return Err(invalid_program!(
                    "no stack representation for '{}'",
                    types.type_name(ty)
                ))
            }
        };
        self.entries.push(entry);
        Ok(())
    }

    /// Pops the top slot and narrows it for storage into a location of type `ty`.
    ///
    /// # Errors
    /// [`crate::Error::InvalidProgram`] on underflow or when the slot's kind cannot be
    /// stored into the location.
    pub(crate) fn pop_into_location(
        &mut self,
        types: &TypeSystem,
        heap: &mut Heap,
        ty: TypeId,
    ) -> Result<Value> {
        let entry = self.pop()?;
        let category = types.category(ty);
        match entry.kind {
            StackValueKind::Int64 => match category {
                TypeCategory::Int64 | TypeCategory::UInt64 => heap.clone_value(entry.value),
                _ => Err(invalid_program!("int64 stored to '{}'", types.type_name(ty))),
            },
            StackValueKind::Int32 => {
                let value = heap.as_i32(&entry.value)?;
                narrow_int(category, i64::from(value), types, ty)
            }
            StackValueKind::NativeInt => match (category, entry.value) {
                (TypeCategory::ByRef, Value::ByRef(_)) => Ok(entry.value),
                (
                    TypeCategory::Pointer
                    | TypeCategory::FunctionPointer
                    | TypeCategory::IntPtr
                    | TypeCategory::UIntPtr,
                    _,
                ) => heap.clone_value(entry.value),
                _ => {
                    let value = heap.as_native(&entry.value)?;
                    narrow_int(category, value, types, ty)
                }
            },
            StackValueKind::Float => match category {
                TypeCategory::Double => heap.clone_value(entry.value),
                #[allow(clippy::cast_possible_truncation)]
                TypeCategory::Single => Ok(Value::from_f32(heap.as_f64(&entry.value)? as f32)),
                _ => Err(invalid_program!("float stored to '{}'", types.type_name(ty))),
            },
            StackValueKind::ByRef => match category {
                TypeCategory::ByRef
                | TypeCategory::IntPtr
                | TypeCategory::UIntPtr
                | TypeCategory::Pointer
                | TypeCategory::FunctionPointer => Ok(entry.value),
                _ => Err(invalid_program!("byref stored to '{}'", types.type_name(ty))),
            },
            StackValueKind::ObjRef => {
                if types.is_gc_pointer(ty) {
                    Ok(entry.value)
                } else {
                    Err(invalid_program!(
                        "object reference stored to '{}'",
                        types.type_name(ty)
                    ))
                }
            }
            StackValueKind::ValueType => {
                if !types.is_value_type(ty)
                    || heap.value_size(&entry.value) != Some(types.element_size(ty))
                {
                    return Err(invalid_program!(
                        "value type {:?} stored to '{}'",
                        entry.value,
                        types.type_name(ty)
                    ));
                }
                heap.clone_value(entry.value)
            }
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn narrow_int(category: TypeCategory, value: i64, types: &TypeSystem, ty: TypeId) -> Result<Value> {
    match category {
        TypeCategory::Int32 | TypeCategory::UInt32 => Ok(Value::from_i32(value as i32)),
        TypeCategory::SByte | TypeCategory::Byte | TypeCategory::Boolean => {
            Ok(Value::from_i8(value as i8))
        }
        TypeCategory::Int16 | TypeCategory::UInt16 | TypeCategory::Char => {
            Ok(Value::from_i16(value as i16))
        }
        _ => Err(invalid_program!(
            "integer stored to '{}'",
            types.type_name(ty)
        )),
    }
}

/// Native integer on the stack from a plain 64-bit value.
pub(crate) fn native_entry(heap: &Heap, value: i64) -> StackEntry {
    StackEntry::new(
        StackValueKind::NativeInt,
        Value::native_int(value, heap.pointer_size()),
    )
}
