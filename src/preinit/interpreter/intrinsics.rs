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

//! Framework methods evaluated directly instead of being interpreted.
//!
//! The recognized set mirrors what the runtime treats as intrinsic in static constructors:
//! array and span initialization from RVA data, `typeof` comparisons and a few generic
//! type queries. Anything else falls back to interpreting the IL body, if there is one.

use crate::{
    metadata::typesystem::{MethodId, TypeId, WellKnownType},
    preinit::{
        heap::{Instance, SpanData, Storage},
        interpreter::TypeScan,
        value::{ByRef, Value},
    },
    Result,
};

impl TypeScan<'_, '_> {
    /// Evaluates `method` if it is a recognized intrinsic.
    ///
    /// Returns `Ok(None)` when the method is not recognized or the arguments are not in a
    /// shape the evaluation supports, in which case the caller interprets the body.
    ///
    /// # Arguments
    ///
    /// * `method` - The intrinsic being called
    /// * `args` - The call arguments, `this` first for instance methods
    ///
    /// # Errors
    ///
    /// Propagates heap errors for dangling handles.
    pub(super) fn try_intrinsic(&mut self, method: MethodId, args: &[Value]) -> Result<Option<Value>> {
        let types = self.types();
        let desc = types.method(method);
        let owned_by = |known| types.is_well_known(desc.owner, known);

        match desc.name.as_str() {
            "InitializeArray" if owned_by(WellKnownType::RuntimeHelpers) => {
                self.initialize_array(args)
            }
            "CreateSpan" if owned_by(WellKnownType::RuntimeHelpers) => {
                let Some(&element) = desc.instantiation.first() else {
                    return Ok(None);
                };
                self.create_span(element, args)
            }
            "IsReferenceOrContainsReferences" if owned_by(WellKnownType::RuntimeHelpers) => {
                let Some(&ty) = desc.instantiation.first() else {
                    return Ok(None);
                };
                let references = types.is_gc_pointer(ty)
                    || (types.is_value_type(ty) && types.contains_gc_pointers(ty));
                Ok(Some(Value::from_i8(i8::from(references))))
            }
            "GetArrayDataReference" if owned_by(WellKnownType::MemoryMarshal) => {
                let Some(&element) = desc.instantiation.first() else {
                    return Ok(None);
                };
                self.array_data_reference(element, args)
            }
            "GetTypeFromHandle" if owned_by(WellKnownType::Type) => match args.first() {
                Some(&Value::TypeHandle(ty)) => {
                    Ok(Some(Value::Ref(self.heap.intern_runtime_type(ty))))
                }
                _ => Ok(None),
            },
            "get_IsValueType" if owned_by(WellKnownType::Type) => {
                match self.runtime_type(args.first().copied())? {
                    Some(represented) => Ok(Some(Value::from_i8(i8::from(
                        types.is_value_type(represented),
                    )))),
                    None => Ok(None),
                }
            }
            "op_Equality" if owned_by(WellKnownType::Type) => {
                let [left, right] = args else {
                    return Ok(None);
                };
                if self.runtime_type(Some(*left))?.is_none() && self.runtime_type(Some(*right))?.is_none() {
                    return Ok(None);
                }
                // runtime types are interned, identity is equality
                Ok(Some(Value::from_i8(i8::from(left == right))))
            }
            _ => Ok(None),
        }
    }

    /// The type represented by a `System.RuntimeType` reference.
    fn runtime_type(&self, value: Option<Value>) -> Result<Option<TypeId>> {
        let Some(Value::Ref(id)) = value else {
            return Ok(None);
        };
        Ok(match self.heap.instance(id)? {
            Instance::RuntimeType { represented } => Some(*represented),
            _ => None,
        })
    }

    /// `RuntimeHelpers.InitializeArray(array, fldHandle)`
    fn initialize_array(&mut self, args: &[Value]) -> Result<Option<Value>> {
        let types = self.types();
        let [Value::Ref(array), Value::FieldHandle(field)] = *args else {
            return Ok(None);
        };
        let field = types.field(field);
        let Some(data) = field.rva_data().filter(|_| field.is_static()) else {
            return Ok(None);
        };
        if !matches!(self.heap.instance(array)?, Instance::Array { .. }) {
            return Ok(None);
        }
        if !self.heap.array_try_initialize(array, data)? {
            return Ok(None);
        }
        Ok(Some(Value::Null))
    }

    /// `RuntimeHelpers.CreateSpan<T>(fldHandle)` over a copy of the field's RVA data.
    fn create_span(&mut self, element: TypeId, args: &[Value]) -> Result<Option<Value>> {
        let types = self.types();
        let [Value::FieldHandle(field)] = *args else {
            return Ok(None);
        };
        let field = types.field(field);
        let Some(data) = field.rva_data().filter(|_| field.is_static()) else {
            return Ok(None);
        };
        if !types.is_value_type(element) {
            return Ok(None);
        }
        let size = types.element_size(element);
        if size == 0 || data.len() % size != 0 {
            return Ok(None);
        }

        let backing = self.heap.alloc_bytes(data.to_vec());
        let span = self.heap.alloc(Storage::Span(SpanData {
            element,
            backing,
            index: 0,
            length_bytes: data.len(),
        }));
        Ok(Some(Value::Span(span)))
    }

    /// `MemoryMarshal.GetArrayDataReference<T>(array)`
    fn array_data_reference(&mut self, element: TypeId, args: &[Value]) -> Result<Option<Value>> {
        let [Value::Ref(array)] = *args else {
            return Ok(None);
        };
        Ok(match *self.heap.instance(array)? {
            Instance::Array {
                element: actual,
                data,
                ..
            } if actual == element => Some(Value::ByRef(ByRef::Bytes {
                storage: data,
                offset: 0,
            })),
            _ => None,
        })
    }
}
