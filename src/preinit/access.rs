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

//! Instance field access.
//!
//! `ldfld`, `stfld` and `ldflda` do not care what kind of value they operate on, only
//! whether that value can host the field. [`Heap::field_host`] resolves a receiver to a
//! [`FieldHost`], the remaining methods read, write and address fields through it.

use crate::{
    metadata::typesystem::{FieldDesc, TypeId, TypeSystem, WellKnownType},
    preinit::{
        heap::{Heap, Instance, Storage},
        value::{ByRef, StorageId, Value},
    },
    Result,
};

/// Something with instance fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FieldHost {
    /// Byte buffer with field offsets relative to `base`
    Bytes {
        storage: StorageId,
        base: usize,
        read_only: bool,
    },
    /// Vtable-like struct, starting at slot `index`
    VTable { storage: StorageId, index: usize },
    /// COM entry table, starting at entry `index`
    ComEntries { storage: StorageId, index: usize },
    /// Span record
    Span { storage: StorageId },
}

fn field_size(types: &TypeSystem, field: &FieldDesc) -> usize {
    types.element_size(field.field_type)
}

impl Heap {
    /// Resolves the receiver of an instance field access.
    ///
    /// Inline value types are given storage of their own first. Arrays, delegates,
    /// runtime types and foreign instances have no accessible fields.
    pub(crate) fn field_host(&mut self, types: &TypeSystem, receiver: &Value) -> Result<Option<FieldHost>> {
        Ok(match *receiver {
            Value::Scalar(scalar) => Some(FieldHost::Bytes {
                storage: self.alloc_bytes(scalar.as_slice().to_vec()),
                base: 0,
                read_only: false,
            }),
            Value::Bytes(storage) => Some(FieldHost::Bytes {
                storage,
                base: 0,
                read_only: false,
            }),
            Value::ByRef(ByRef::Bytes { storage, offset }) => Some(FieldHost::Bytes {
                storage,
                base: offset,
                read_only: false,
            }),
            Value::VTable(storage) => Some(FieldHost::VTable { storage, index: 0 }),
            Value::ByRef(ByRef::VTableSlot { storage, index }) => {
                Some(FieldHost::VTable { storage, index })
            }
            Value::ComEntries(storage) => Some(FieldHost::ComEntries { storage, index: 0 }),
            Value::ByRef(ByRef::ComSlot { storage, index }) => {
                Some(FieldHost::ComEntries { storage, index })
            }
            Value::Span(storage) | Value::ByRef(ByRef::Span { storage }) => {
                Some(FieldHost::Span { storage })
            }
            Value::Ref(id) => match *self.instance(id)? {
                Instance::Object { ty, data, .. } => Some(FieldHost::Bytes {
                    storage: data,
                    base: if types.is_value_type(ty) {
                        self.pointer_size()
                    } else {
                        0
                    },
                    read_only: false,
                }),
                Instance::String { data, .. } => Some(FieldHost::Bytes {
                    storage: data,
                    base: 0,
                    read_only: true,
                }),
                Instance::Array { .. }
                | Instance::Delegate { .. }
                | Instance::RuntimeType { .. }
                | Instance::Foreign(_) => None,
            },
            Value::Null
            | Value::MethodPointer(_)
            | Value::FieldHandle(_)
            | Value::TypeHandle(_) => None,
        })
    }

    /// Reads a field. `None` when the host cannot produce a value of the field's type.
    pub(crate) fn get_field(
        &mut self,
        types: &TypeSystem,
        host: FieldHost,
        field: &FieldDesc,
    ) -> Result<Option<Value>> {
        match host {
            FieldHost::Bytes { storage, base, .. } => {
                let start = base + field.offset;
                let size = field_size(types, field);
                let buffer = self.buffer(storage)?;
                if start + size > buffer.len() {
                    return Err(invalid_program!(
                        "field '{}' outside of its instance",
                        field.name
                    ));
                }
                let data = buffer[start..start + size].to_vec();
                Ok(Some(self.transient(&data)))
            }
            FieldHost::VTable { storage, index } => {
                let slot = index + field.offset / self.pointer_size();
                let method = self.vtable(storage)?.methods.get(slot).copied();
                Ok(match method {
                    Some(Some(method)) => Some(Value::MethodPointer(method)),
                    Some(None) => Some(Value::native_int(0, self.pointer_size())),
                    None => None,
                })
            }
            FieldHost::ComEntries { storage, index } => {
                let Some((entry, within)) = self.com_entry_of(types, storage, index, field)? else {
                    return Ok(None);
                };
                if within != 0 || field_size(types, field) != 16 {
                    return Ok(None);
                }
                let guid = match self.storage(storage)? {
                    Storage::ComEntries(table) => table.entries.get(entry).map(|e| e.guid),
                    _ => None,
                };
                Ok(guid.map(|guid| self.transient(&guid)))
            }
            FieldHost::Span { storage } => {
                let Storage::Span(span) = *self.storage(storage)? else {
                    return Err(invalid_program!("storage is not a span"));
                };
                match field.name.as_str() {
                    "_reference" => Ok(Some(Value::ByRef(ByRef::Bytes {
                        storage: span.backing,
                        offset: span.index,
                    }))),
                    "_length" => {
                        let element_size = types.element_size(span.element).max(1);
                        let length = i32::try_from(span.length_bytes / element_size)
                            .map_err(|_| invalid_program!("span length overflow"))?;
                        Ok(Some(Value::from_i32(length)))
                    }
                    _ => Ok(None),
                }
            }
        }
    }

    /// Writes a field. False when the host refuses the write.
    pub(crate) fn try_set_field(
        &mut self,
        types: &TypeSystem,
        host: FieldHost,
        field: &FieldDesc,
        value: Value,
    ) -> Result<bool> {
        match host {
            FieldHost::Bytes {
                storage,
                base,
                read_only,
            } => {
                if read_only {
                    return Ok(false);
                }
                let start = base + field.offset;
                let size = field_size(types, field);
                let Some(data) = self.bytes(&value).map(<[u8]>::to_vec) else {
                    return Ok(false);
                };
                let buffer = self.buffer_mut(storage)?;
                if data.len() != size || start + size > buffer.len() {
                    return Ok(false);
                }
                buffer[start..start + size].copy_from_slice(&data);
                Ok(true)
            }
            FieldHost::VTable { storage, index } => {
                let slot = index + field.offset / self.pointer_size();
                let byref = ByRef::VTableSlot {
                    storage,
                    index: slot,
                };
                match value {
                    Value::MethodPointer(_) => self.byref_try_store(byref, value),
                    _ if self.bytes(&value).is_some_and(|b| b.iter().all(|&x| x == 0)) => {
                        self.byref_try_initialize(byref, self.pointer_size())
                    }
                    _ => Ok(false),
                }
            }
            FieldHost::ComEntries { storage, index } => {
                let Some((entry, within)) = self.com_entry_of(types, storage, index, field)? else {
                    return Ok(false);
                };
                let guid: Option<[u8; 16]> = if within == 0 {
                    match self.bytes(&value).map(<[u8; 16]>::try_from) {
                        Some(Ok(guid)) => Some(guid),
                        _ => return Ok(false),
                    }
                } else {
                    None
                };
                let target = match (guid, value) {
                    (Some(_), _) => None,
                    (None, Value::ByRef(byref)) => match self.byref_backing_field(byref) {
                        Some(target) => Some(target),
                        None => return Ok(false),
                    },
                    _ => return Ok(false),
                };
                let Storage::ComEntries(table) = self.storage_mut(storage)? else {
                    return Ok(false);
                };
                let Some(slot) = table.entries.get_mut(entry) else {
                    return Ok(false);
                };
                match guid {
                    Some(guid) => slot.guid = guid,
                    None => slot.target = target,
                }
                Ok(true)
            }
            FieldHost::Span { .. } => Ok(false),
        }
    }

    /// Address of a field. `None` when the host cannot hand one out.
    pub(crate) fn get_field_address(
        &mut self,
        types: &TypeSystem,
        host: FieldHost,
        field: &FieldDesc,
    ) -> Result<Option<ByRef>> {
        match host {
            FieldHost::Bytes { storage, base, .. } => {
                let start = base + field.offset;
                if start + field_size(types, field) > self.buffer(storage)?.len() {
                    return Err(invalid_program!(
                        "field '{}' outside of its instance",
                        field.name
                    ));
                }
                Ok(Some(ByRef::Bytes {
                    storage,
                    offset: start,
                }))
            }
            FieldHost::VTable { storage, index } => Ok(Some(ByRef::VTableSlot {
                storage,
                index: index + field.offset / self.pointer_size(),
            })),
            FieldHost::ComEntries { storage, index } => {
                let Storage::ComEntries(table) = self.storage(storage)? else {
                    return Ok(None);
                };
                if field.field_type != table.entry_type {
                    return Ok(None);
                }
                Ok(Some(ByRef::ComSlot {
                    storage,
                    index: index + field.offset / table.entry_size.max(1),
                }))
            }
            FieldHost::Span { .. } => Ok(None),
        }
    }

    /// Entry index and offset within the entry for a `ComInterfaceEntry` field.
    fn com_entry_of(
        &self,
        types: &TypeSystem,
        storage: StorageId,
        index: usize,
        field: &FieldDesc,
    ) -> Result<Option<(usize, usize)>> {
        let Storage::ComEntries(table) = self.storage(storage)? else {
            return Ok(None);
        };
        let entry_type: TypeId = types.well_known(WellKnownType::ComInterfaceEntry);
        if field.owner != entry_type {
            return Ok(None);
        }
        let within = field.offset;
        if index >= table.entries.len() {
            return Ok(None);
        }
        Ok(Some((index, within)))
    }
}
