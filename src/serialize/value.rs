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

//! Writing frozen values and frozen objects.

use std::sync::Arc;

use crate::{
    metadata::typesystem::{TypeId, TypeSystem},
    preinit::{FrozenContent, FrozenObject, FrozenValue},
    serialize::{
        builder::{ObjectDataBuilder, Symbol},
        factory::NodeFactory,
    },
};

/// Compile-time representation of a value, for consumers that reason about data instead
/// of emitting it.
#[derive(Debug, Clone, PartialEq)]
pub enum RawData<'v> {
    /// Null reference
    Null,
    /// Bytes of a value type
    Bytes(&'v [u8]),
    /// Reference to a frozen node
    Symbol(Symbol),
}

/// A value that can be written into a field of the output image.
pub trait SerializableValue {
    /// Writes the value as it appears inside a static base or an object field.
    fn write_field_data(&self, builder: &mut ObjectDataBuilder, factory: &mut dyn NodeFactory);

    /// The value as data, if it has a representation other than its written bytes.
    fn raw_data(&self, factory: &mut dyn NodeFactory) -> Option<RawData<'_>>;
}

/// An object that is emitted on its own, with its own symbol.
pub trait SerializableReference: SerializableValue {
    /// Exact type of the object.
    fn ty(&self) -> TypeId;

    /// Writes the full object: method table pointer followed by the payload.
    ///
    /// # Arguments
    ///
    /// * `builder` - Receives the object's bytes
    /// * `this_node` - The symbol the object itself is emitted under
    /// * `factory` - Produces the symbols the object points at
    fn write_content(&self, builder: &mut ObjectDataBuilder, this_node: &Symbol, factory: &mut dyn NodeFactory);

    /// Nodes the object needs only if it ends up in the image.
    fn conditional_dependencies(&self, factory: &mut dyn NodeFactory) -> Vec<Symbol>;

    /// True if no code can observe a change to the object, so it may be placed in
    /// read-only data.
    fn is_known_immutable(&self, types: &TypeSystem) -> bool;

    /// Element count of arrays.
    fn array_length(&self) -> Option<usize>;
}

impl SerializableValue for FrozenValue {
    fn write_field_data(&self, builder: &mut ObjectDataBuilder, factory: &mut dyn NodeFactory) {
        match self {
            FrozenValue::Null => builder.emit_zero_pointer(),
            FrozenValue::Bytes(bytes) => builder.emit_bytes(bytes),
            FrozenValue::Object(object) => object.write_field_data(builder, factory),
            FrozenValue::String(value) => {
                let symbol = factory.serialized_string_object(value);
                builder.emit_pointer_reloc(symbol);
            }
            FrozenValue::RuntimeType(ty) => {
                let symbol = factory.serialized_runtime_type(*ty);
                builder.emit_pointer_reloc(symbol);
            }
            FrozenValue::VTable(methods) => {
                for method in methods.iter() {
                    match method {
                        Some(method) => {
                            let symbol = factory.method_entrypoint(*method);
                            builder.emit_pointer_reloc(symbol);
                        }
                        None => builder.emit_zero_pointer(),
                    }
                }
            }
            FrozenValue::ComEntries(entries) => {
                for entry in entries.iter() {
                    builder.emit_bytes(&entry.guid);
                    match entry.target {
                        Some(field) => {
                            let (owner, offset) = {
                                let field = factory.types().field(field);
                                (field.owner, field.offset)
                            };
                            let symbol = factory.non_gc_statics(owner);
                            builder.emit_pointer_reloc_with_delta(
                                symbol,
                                i64::try_from(offset).unwrap_or(i64::MAX),
                            );
                        }
                        None => builder.emit_zero_pointer(),
                    }
                }
            }
        }
    }

    fn raw_data(&self, factory: &mut dyn NodeFactory) -> Option<RawData<'_>> {
        match self {
            FrozenValue::Null => Some(RawData::Null),
            FrozenValue::Bytes(bytes) => Some(RawData::Bytes(bytes)),
            FrozenValue::Object(object) => object.raw_data(factory),
            FrozenValue::String(value) => Some(RawData::Symbol(factory.serialized_string_object(value))),
            FrozenValue::RuntimeType(ty) => Some(RawData::Symbol(factory.serialized_runtime_type(*ty))),
            FrozenValue::VTable(_) | FrozenValue::ComEntries(_) => None,
        }
    }
}

impl SerializableValue for Arc<FrozenObject> {
    fn write_field_data(&self, builder: &mut ObjectDataBuilder, factory: &mut dyn NodeFactory) {
        let symbol = factory.serialized_frozen_object(self);
        builder.emit_pointer_reloc(symbol);
    }

    fn raw_data(&self, factory: &mut dyn NodeFactory) -> Option<RawData<'_>> {
        Some(RawData::Symbol(factory.serialized_frozen_object(self)))
    }
}

impl SerializableReference for Arc<FrozenObject> {
    fn ty(&self) -> TypeId {
        self.ty
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    fn write_content(&self, builder: &mut ObjectDataBuilder, this_node: &Symbol, factory: &mut dyn NodeFactory) {
        let method_table = factory.constructed_type_symbol(self.ty);
        builder.emit_pointer_reloc(method_table);

        let pointer_size = builder.pointer_size();
        match &self.content {
            FrozenContent::Object { data } => {
                // the method table slot was emitted above
                builder.emit_bytes(data.get(pointer_size..).unwrap_or_default());
            }
            FrozenContent::Array { length, data, .. } => {
                builder.emit_int(*length as i32);
                if pointer_size == 8 {
                    builder.emit_int(0);
                }
                builder.emit_bytes(data);
            }
            FrozenContent::Delegate {
                target,
                first_parameter,
            } => {
                if factory.types().method(*target).is_static() {
                    // open static: the delegate is its own first parameter
                    builder.emit_pointer_reloc(this_node.clone());
                    builder.emit_zero_pointer();
                    let target_node = factory.method_entrypoint(*target);
                    builder.emit_pointer_reloc(target_node);
                    let thunk = factory.delegate_thunk(self.ty, *target);
                    builder.emit_pointer_reloc(thunk);
                } else {
                    first_parameter.write_field_data(builder, factory);
                    builder.emit_zero_pointer();
                    builder.emit_zero_pointer();
                    let target_node = factory.method_entrypoint(*target);
                    builder.emit_pointer_reloc(target_node);
                }
            }
        }
    }

    fn conditional_dependencies(&self, factory: &mut dyn NodeFactory) -> Vec<Symbol> {
        match &self.content {
            FrozenContent::Delegate { target, .. } => {
                factory.delegate_creation_dependencies(self.ty, *target)
            }
            _ => Vec::new(),
        }
    }

    fn is_known_immutable(&self, types: &TypeSystem) -> bool {
        match &self.content {
            FrozenContent::Object { .. } => types.type_desc(self.ty).fields().next().is_none(),
            FrozenContent::Array { length, .. } => *length == 0,
            FrozenContent::Delegate { target, .. } => types.method(*target).is_static(),
        }
    }

    fn array_length(&self) -> Option<usize> {
        FrozenObject::array_length(self)
    }
}
