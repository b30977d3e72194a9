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

//! Storage and instances owned by one scan.
//!
//! The [`Heap`] is an arena: value type buffers, spans, vtable-like structs and COM entry
//! tables live in `storage`, reference type instances live in `objects`. Both are only
//! ever appended to, so a [`StorageId`] or [`ObjectId`] stays valid for the life of the
//! scan and a byref is nothing more than a handle plus an offset. Since nothing is
//! reclaimed, every cell and instance is charged against a byte ceiling instead.
//!
//! String literals and `System.RuntimeType` objects are interned per heap, which gives
//! identical literals reference equality. Instances imported from a nested scan's
//! snapshot are cached by identity for the same reason.

use std::{collections::HashMap, mem::size_of, sync::Arc};

use crate::{
    metadata::typesystem::{FieldId, MethodId, TypeCategory, TypeId, TypeSystem, WellKnownType},
    preinit::{
        frozen::{
            AllocationSite, ComEntry, FrozenContent, FrozenObject, FrozenStatics, FrozenValue,
        },
        value::{ByRef, ObjectId, Scalar, StorageId, Value},
    },
    Result,
};

/// A storage cell.
#[derive(Debug, Clone)]
pub(crate) enum Storage {
    /// Raw bytes of a value type, object payload or array payload
    Bytes(Vec<u8>),
    /// `Span<T>` record
    Span(SpanData),
    /// Function-pointer-only struct
    VTable(VTableData),
    /// `ComInterfaceEntry`-only struct
    ComEntries(ComEntriesData),
}

/// A span over a byte buffer.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SpanData {
    pub(crate) element: TypeId,
    pub(crate) backing: StorageId,
    pub(crate) index: usize,
    pub(crate) length_bytes: usize,
}

/// One method per pointer-sized slot.
#[derive(Debug, Clone)]
pub(crate) struct VTableData {
    pub(crate) methods: Vec<Option<MethodId>>,
    /// Static field this struct is the value of, if any
    pub(crate) owner_field: Option<FieldId>,
}

/// Interface entries of a COM entry table.
#[derive(Debug, Clone)]
pub(crate) struct ComEntriesData {
    pub(crate) entry_type: TypeId,
    pub(crate) entry_size: usize,
    pub(crate) entries: Vec<ComEntry>,
}

/// A reference type instance.
#[derive(Debug, Clone)]
pub(crate) enum Instance {
    /// Class instance or boxed value type. `data` covers the whole instance including the
    /// method table slot, so field offsets index it directly.
    Object {
        ty: TypeId,
        site: AllocationSite,
        data: StorageId,
    },
    /// Single-dimensional array
    Array {
        ty: TypeId,
        element: TypeId,
        length: usize,
        element_size: usize,
        site: AllocationSite,
        data: StorageId,
    },
    /// Delegate bound to `target`, closed over `first` for instance targets
    Delegate {
        ty: TypeId,
        site: AllocationSite,
        target: MethodId,
        first: Value,
    },
    /// Interned string literal. `data` mirrors the runtime layout for field reads.
    String { value: Arc<str>, data: StorageId },
    /// Interned `System.RuntimeType`
    RuntimeType { represented: TypeId },
    /// Immutable object produced by another type's static constructor
    Foreign(Arc<FrozenObject>),
}

impl Storage {
    /// Bytes charged to the heap for this cell.
    fn footprint(&self) -> usize {
        let payload = match self {
            Storage::Bytes(bytes) => bytes.len(),
            Storage::Span(_) => 0,
            Storage::VTable(vtable) => vtable.methods.len() * size_of::<Option<MethodId>>(),
            Storage::ComEntries(table) => table.entries.len() * size_of::<ComEntry>(),
        };
        payload + size_of::<Storage>()
    }
}

/// Arena of one scan.
pub(crate) struct Heap {
    pointer_size: usize,
    /// Bytes charged so far
    allocated: usize,
    /// Ceiling for `allocated`
    byte_limit: usize,
    storage: Vec<Storage>,
    objects: Vec<Instance>,
    strings: HashMap<Arc<str>, ObjectId>,
    runtime_types: HashMap<TypeId, ObjectId>,
    foreign: HashMap<usize, ObjectId>,
}

/// Element type of a `Span<T>`/`ReadOnlySpan<T>` instantiation.
pub(crate) fn span_element(types: &TypeSystem, ty: TypeId) -> Option<TypeId> {
    let desc = types.type_desc(ty);
    let definition = desc.definition?;
    if !types.is_well_known(definition, WellKnownType::Span)
        && !types.is_well_known(definition, WellKnownType::ReadOnlySpan)
    {
        return None;
    }
    let element = *desc.instantiation.first()?;
    match types.category(element) {
        TypeCategory::Void
        | TypeCategory::Array
        | TypeCategory::ByRef
        | TypeCategory::Pointer
        | TypeCategory::FunctionPointer
        | TypeCategory::GenericParameter => None,
        _ => Some(element),
    }
}

/// Type that decides unbox compatibility: the underlying primitive of an enum.
fn underlying_type(types: &TypeSystem, ty: TypeId) -> TypeId {
    if types.is_enum(ty) {
        types.element_type(ty).unwrap_or(ty)
    } else {
        ty
    }
}

impl Heap {
    /// A heap without a byte ceiling.
    pub(crate) fn new(pointer_size: usize) -> Self {
        Heap::with_byte_limit(pointer_size, usize::MAX)
    }

    pub(crate) fn with_byte_limit(pointer_size: usize, byte_limit: usize) -> Self {
        Heap {
            pointer_size,
            allocated: 0,
            byte_limit,
            storage: Vec::new(),
            objects: Vec::new(),
            strings: HashMap::new(),
            runtime_types: HashMap::new(),
            foreign: HashMap::new(),
        }
    }

    pub(crate) fn pointer_size(&self) -> usize {
        self.pointer_size
    }

    // ========================================================================
    // Arena access
    // ========================================================================

    pub(crate) fn alloc(&mut self, storage: Storage) -> StorageId {
        self.allocated = self.allocated.saturating_add(storage.footprint());
        self.storage.push(storage);
        StorageId(self.storage.len() - 1)
    }

    pub(crate) fn alloc_bytes(&mut self, data: Vec<u8>) -> StorageId {
        self.alloc(Storage::Bytes(data))
    }

    pub(crate) fn storage(&self, id: StorageId) -> Result<&Storage> {
        self.storage
            .get(id.0)
            .ok_or_else(|| invalid_program!("dangling storage handle"))
    }

    pub(crate) fn storage_mut(&mut self, id: StorageId) -> Result<&mut Storage> {
        self.storage
            .get_mut(id.0)
            .ok_or_else(|| invalid_program!("dangling storage handle"))
    }

    pub(crate) fn buffer(&self, id: StorageId) -> Result<&[u8]> {
        match self.storage(id)? {
            Storage::Bytes(bytes) => Ok(bytes),
            _ => Err(invalid_program!("storage is not a byte buffer")),
        }
    }

    pub(crate) fn buffer_mut(&mut self, id: StorageId) -> Result<&mut Vec<u8>> {
        match self.storage_mut(id)? {
            Storage::Bytes(bytes) => Ok(bytes),
            _ => Err(invalid_program!("storage is not a byte buffer")),
        }
    }

    fn span(&self, id: StorageId) -> Result<SpanData> {
        match self.storage(id)? {
            Storage::Span(span) => Ok(*span),
            _ => Err(invalid_program!("storage is not a span")),
        }
    }

    pub(crate) fn vtable(&self, id: StorageId) -> Result<&VTableData> {
        match self.storage(id)? {
            Storage::VTable(vtable) => Ok(vtable),
            _ => Err(invalid_program!("storage is not a vtable-like struct")),
        }
    }

    fn vtable_mut(&mut self, id: StorageId) -> Result<&mut VTableData> {
        match self.storage_mut(id)? {
            Storage::VTable(vtable) => Ok(vtable),
            _ => Err(invalid_program!("storage is not a vtable-like struct")),
        }
    }

    fn com_entries(&self, id: StorageId) -> Result<&ComEntriesData> {
        match self.storage(id)? {
            Storage::ComEntries(entries) => Ok(entries),
            _ => Err(invalid_program!("storage is not a COM entry table")),
        }
    }

    pub(crate) fn instance(&self, id: ObjectId) -> Result<&Instance> {
        self.objects
            .get(id.0)
            .ok_or_else(|| invalid_program!("dangling object handle"))
    }

    fn push_instance(&mut self, instance: Instance) -> ObjectId {
        self.allocated = self.allocated.saturating_add(size_of::<Instance>());
        self.objects.push(instance);
        ObjectId(self.objects.len() - 1)
    }

    /// Bytes charged by every cell and instance allocated so far.
    pub(crate) fn allocated_bytes(&self) -> usize {
        self.allocated
    }

    /// Whether `additional` more payload bytes stay within the ceiling.
    pub(crate) fn fits(&self, additional: usize) -> bool {
        self.allocated
            .checked_add(additional)
            .is_some_and(|total| total <= self.byte_limit)
    }

    /// Whether the ceiling has been crossed.
    pub(crate) fn exhausted(&self) -> bool {
        self.allocated > self.byte_limit
    }

    // ========================================================================
    // Value type bytes
    // ========================================================================

    /// Bytes of an inline or backed value type.
    pub(crate) fn bytes<'v>(&'v self, value: &'v Value) -> Option<&'v [u8]> {
        match value {
            Value::Scalar(scalar) => Some(scalar.as_slice()),
            Value::Bytes(id) => match self.storage.get(id.0) {
                Some(Storage::Bytes(bytes)) => Some(bytes),
                _ => None,
            },
            _ => None,
        }
    }

    fn fixed<const N: usize>(&self, value: &Value) -> Result<[u8; N]> {
        self.bytes(value)
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(|| invalid_program!("expected a {}-byte value, found {:?}", N, value))
    }

    pub(crate) fn as_i8(&self, value: &Value) -> Result<i8> {
        Ok(i8::from_le_bytes(self.fixed(value)?))
    }

    pub(crate) fn as_i16(&self, value: &Value) -> Result<i16> {
        Ok(i16::from_le_bytes(self.fixed(value)?))
    }

    pub(crate) fn as_i32(&self, value: &Value) -> Result<i32> {
        Ok(i32::from_le_bytes(self.fixed(value)?))
    }

    pub(crate) fn as_i64(&self, value: &Value) -> Result<i64> {
        Ok(i64::from_le_bytes(self.fixed(value)?))
    }

    pub(crate) fn as_f32(&self, value: &Value) -> Result<f32> {
        Ok(f32::from_le_bytes(self.fixed(value)?))
    }

    pub(crate) fn as_f64(&self, value: &Value) -> Result<f64> {
        Ok(f64::from_le_bytes(self.fixed(value)?))
    }

    /// Native integer read at the target's pointer width.
    pub(crate) fn as_native(&self, value: &Value) -> Result<i64> {
        if self.pointer_size == 8 {
            self.as_i64(value)
        } else {
            self.as_i32(value).map(i64::from)
        }
    }

    /// A value type without an address: inline when small, backed otherwise.
    pub(crate) fn transient(&mut self, data: &[u8]) -> Value {
        match Scalar::from_slice(data) {
            Some(scalar) => Value::Scalar(scalar),
            None => Value::Bytes(self.alloc_bytes(data.to_vec())),
        }
    }

    /// Size in bytes of a value type value.
    pub(crate) fn value_size(&self, value: &Value) -> Option<usize> {
        match value {
            Value::Scalar(_) | Value::Bytes(_) => self.bytes(value).map(<[u8]>::len),
            Value::Span(_) => Some(2 * self.pointer_size),
            Value::VTable(id) => self
                .vtable(*id)
                .ok()
                .map(|vtable| vtable.methods.len() * self.pointer_size),
            Value::ComEntries(id) => self
                .com_entries(*id)
                .ok()
                .map(|table| table.entries.len() * table.entry_size),
            Value::MethodPointer(_) | Value::FieldHandle(_) | Value::TypeHandle(_) => {
                Some(self.pointer_size)
            }
            Value::Null | Value::Ref(_) | Value::ByRef(_) => None,
        }
    }

    // ========================================================================
    // Locations
    // ========================================================================

    /// The zero value of a fresh location of type `ty`.
    ///
    /// `owner_field` is recorded on vtable-like structs so that a byref to the struct can
    /// later be stored into a COM entry.
    pub(crate) fn new_uninitialized(
        &mut self,
        types: &TypeSystem,
        ty: TypeId,
        owner_field: Option<FieldId>,
    ) -> Value {
        if types.is_gc_pointer(ty) || types.category(ty) == TypeCategory::ByRef {
            return Value::Null;
        }

        if let Some(element) = span_element(types, ty) {
            let backing = self.alloc_bytes(Vec::new());
            return Value::Span(self.alloc(Storage::Span(SpanData {
                element,
                backing,
                index: 0,
                length_bytes: 0,
            })));
        }

        if types.is_function_pointer_table(ty) {
            let slots = types.instance_byte_count(ty) / self.pointer_size;
            return Value::VTable(self.alloc(Storage::VTable(VTableData {
                methods: vec![None; slots],
                owner_field,
            })));
        }

        if let Some(entry_type) = types.com_interface_entry_table(ty) {
            let entry_size = types.instance_byte_count(entry_type);
            let count = types.instance_byte_count(ty) / entry_size.max(1);
            return Value::ComEntries(self.alloc(Storage::ComEntries(ComEntriesData {
                entry_type,
                entry_size,
                entries: vec![
                    ComEntry {
                        guid: [0; 16],
                        target: None,
                    };
                    count
                ],
            })));
        }

        Value::Bytes(self.alloc_bytes(vec![0; types.element_size(ty)]))
    }

    /// Copy of a value as seen by a reader of its location.
    ///
    /// References, byrefs and handles are shared. Value types get fresh storage. A cloned
    /// vtable-like struct forgets the static field it came from.
    pub(crate) fn clone_value(&mut self, value: Value) -> Result<Value> {
        match value {
            Value::Null
            | Value::Ref(_)
            | Value::Scalar(_)
            | Value::ByRef(_)
            | Value::MethodPointer(_)
            | Value::FieldHandle(_)
            | Value::TypeHandle(_) => Ok(value),
            Value::Bytes(id) => {
                let data = self.buffer(id)?.to_vec();
                Ok(self.transient(&data))
            }
            Value::Span(id) => {
                let span = self.span(id)?;
                Ok(Value::Span(self.alloc(Storage::Span(span))))
            }
            Value::VTable(id) => {
                let methods = self.vtable(id)?.methods.clone();
                Ok(Value::VTable(self.alloc(Storage::VTable(VTableData {
                    methods,
                    owner_field: None,
                }))))
            }
            Value::ComEntries(id) => {
                let table = self.com_entries(id)?.clone();
                Ok(Value::ComEntries(self.alloc(Storage::ComEntries(table))))
            }
        }
    }

    /// Gives `slot` an address and returns a byref to it.
    ///
    /// Inline scalars are moved into storage first, so the returned byref aliases `slot`.
    pub(crate) fn try_create_byref(&mut self, slot: &mut Value) -> Option<ByRef> {
        match *slot {
            Value::Bytes(storage) => Some(ByRef::Bytes { storage, offset: 0 }),
            Value::Scalar(scalar) => {
                let storage = self.alloc_bytes(scalar.as_slice().to_vec());
                *slot = Value::Bytes(storage);
                Some(ByRef::Bytes { storage, offset: 0 })
            }
            Value::VTable(storage) => Some(ByRef::VTableSlot { storage, index: 0 }),
            Value::ComEntries(storage) => Some(ByRef::ComSlot { storage, index: 0 }),
            Value::Span(storage) => Some(ByRef::Span { storage }),
            _ => None,
        }
    }

    /// Overwrites an assignable location in place.
    ///
    /// # Errors
    /// [`crate::Error::InvalidProgram`] when a value type of a different size is assigned
    /// to a byte buffer.
    pub(crate) fn try_assign(&mut self, dest: Value, src: Value) -> Result<bool> {
        match dest {
            Value::Bytes(id) => {
                let size = self.buffer(id)?.len();
                if self.value_size(&src) != Some(size) && !matches!(src, Value::ByRef(_)) {
                    return Err(invalid_program!(
                        "assigning {:?} to a {}-byte location",
                        src,
                        size
                    ));
                }
                let Some(data) = self.bytes(&src).map(<[u8]>::to_vec) else {
                    return Ok(false);
                };
                self.buffer_mut(id)?.copy_from_slice(&data);
                Ok(true)
            }
            Value::VTable(id) => {
                let Value::VTable(other) = src else {
                    return Ok(false);
                };
                let methods = self.vtable(other)?.methods.clone();
                let target = self.vtable_mut(id)?;
                if methods.len() > target.methods.len() {
                    return Ok(false);
                }
                target.methods[..methods.len()].copy_from_slice(&methods);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// `ceq` semantics. `None` when the pair cannot be compared at compile time.
    pub(crate) fn compare_equality(&self, a: &Value, b: &Value) -> Option<bool> {
        match (a, b) {
            (Value::Null, Value::Null) => Some(true),
            (Value::Ref(x), Value::Ref(y)) => Some(x == y),
            (Value::Ref(_), _) | (_, Value::Ref(_)) => Some(false),
            (Value::Null, _) | (_, Value::Null) => Some(false),
            (Value::Scalar(_) | Value::Bytes(_), Value::Scalar(_) | Value::Bytes(_)) => {
                let (x, y) = (self.bytes(a)?, self.bytes(b)?);
                (x.len() == y.len()).then(|| x == y)
            }
            (Value::MethodPointer(x), Value::MethodPointer(y)) => Some(x == y),
            (Value::FieldHandle(x), Value::FieldHandle(y)) => Some(x == y),
            (Value::TypeHandle(x), Value::TypeHandle(y)) => Some(x == y),
            (Value::ByRef(x @ ByRef::Bytes { .. }), Value::ByRef(y @ ByRef::Bytes { .. })) => {
                Some(x == y)
            }
            _ => None,
        }
    }

    // ========================================================================
    // Byrefs
    // ========================================================================

    /// `initobj`/`initblk` through a byref. False if `size` bytes do not fit.
    pub(crate) fn byref_try_initialize(&mut self, byref: ByRef, size: usize) -> Result<bool> {
        match byref {
            ByRef::Bytes { storage, offset } => {
                let buffer = self.buffer_mut(storage)?;
                if size > buffer.len().saturating_sub(offset) {
                    return Ok(false);
                }
                buffer[offset..offset + size].fill(0);
                Ok(true)
            }
            ByRef::VTableSlot { storage, index } => {
                let pointer_size = self.pointer_size;
                let vtable = self.vtable_mut(storage)?;
                let count = size / pointer_size;
                if size % pointer_size != 0 || index + count > vtable.methods.len() {
                    return Ok(false);
                }
                vtable.methods[index..index + count].fill(None);
                Ok(true)
            }
            ByRef::ComSlot { .. } | ByRef::Span { .. } => Ok(false),
        }
    }

    /// Stores a whole value through a byref.
    pub(crate) fn byref_try_store(&mut self, byref: ByRef, value: Value) -> Result<bool> {
        match byref {
            ByRef::Bytes { storage, offset } => {
                let Some(data) = self.bytes(&value).map(<[u8]>::to_vec) else {
                    return Ok(false);
                };
                let buffer = self.buffer_mut(storage)?;
                if offset + data.len() > buffer.len() {
                    return Ok(false);
                }
                buffer[offset..offset + data.len()].copy_from_slice(&data);
                Ok(true)
            }
            ByRef::VTableSlot { storage, index } => match value {
                Value::MethodPointer(method) => {
                    let vtable = self.vtable_mut(storage)?;
                    match vtable.methods.get_mut(index) {
                        Some(slot) => {
                            *slot = Some(method);
                            Ok(true)
                        }
                        None => Ok(false),
                    }
                }
                Value::VTable(other) => {
                    let methods = self.vtable(other)?.methods.clone();
                    let vtable = self.vtable_mut(storage)?;
                    if index + methods.len() > vtable.methods.len() {
                        return Ok(false);
                    }
                    vtable.methods[index..index + methods.len()].copy_from_slice(&methods);
                    Ok(true)
                }
                _ => Ok(false),
            },
            ByRef::ComSlot { .. } | ByRef::Span { .. } => Ok(false),
        }
    }

    /// Loads a value of type `ty` through a byref. `None` if the byref cannot produce one.
    pub(crate) fn byref_try_load(
        &mut self,
        types: &TypeSystem,
        byref: ByRef,
        ty: TypeId,
    ) -> Result<Option<Value>> {
        match byref {
            ByRef::Bytes { storage, offset } => {
                if !types.is_value_type(ty) {
                    return Ok(None);
                }
                let size = types.element_size(ty);
                let buffer = self.buffer(storage)?;
                if size > buffer.len().saturating_sub(offset) {
                    return Ok(None);
                }
                let data = buffer[offset..offset + size].to_vec();
                Ok(Some(self.transient(&data)))
            }
            ByRef::VTableSlot { storage, index } => {
                if !types.is_function_pointer_table(ty) {
                    return Ok(None);
                }
                let slots = types.instance_byte_count(ty) / self.pointer_size;
                let vtable = self.vtable(storage)?;
                if index + slots > vtable.methods.len() {
                    return Ok(None);
                }
                let methods = vtable.methods[index..index + slots].to_vec();
                Ok(Some(Value::VTable(self.alloc(Storage::VTable(VTableData {
                    methods,
                    owner_field: None,
                })))))
            }
            ByRef::ComSlot { .. } | ByRef::Span { .. } => Ok(None),
        }
    }

    /// Static field backing the location a byref points at, if the byref addresses the
    /// start of a static vtable-like struct.
    pub(crate) fn byref_backing_field(&self, byref: ByRef) -> Option<FieldId> {
        match byref {
            ByRef::VTableSlot { storage, index: 0 } => self.vtable(storage).ok()?.owner_field,
            _ => None,
        }
    }

    /// Offset and buffer length of a byref into a byte buffer. `None` for byrefs that do
    /// not support arithmetic.
    pub(crate) fn byref_extent(&self, byref: ByRef) -> Result<Option<(StorageId, usize, usize)>> {
        let ByRef::Bytes { storage, offset } = byref else {
            return Ok(None);
        };
        Ok(Some((storage, offset, self.buffer(storage)?.len())))
    }

    // ========================================================================
    // Instances
    // ========================================================================

    /// A zeroed class instance, or a box of a value type.
    pub(crate) fn new_object(
        &mut self,
        types: &TypeSystem,
        ty: TypeId,
        site: AllocationSite,
    ) -> ObjectId {
        let mut size = types.instance_byte_count(ty);
        if types.is_value_type(ty) {
            size += self.pointer_size;
        }
        let data = self.alloc_bytes(vec![0; size]);
        self.push_instance(Instance::Object { ty, site, data })
    }

    pub(crate) fn new_array(
        &mut self,
        types: &TypeSystem,
        element: TypeId,
        length: usize,
        site: AllocationSite,
    ) -> ObjectId {
        let element_size = types.element_size(element);
        let data = self.alloc_bytes(vec![0; element_size * length]);
        self.push_instance(Instance::Array {
            ty: types.make_array_type(element),
            element,
            length,
            element_size,
            site,
            data,
        })
    }

    pub(crate) fn new_delegate(
        &mut self,
        ty: TypeId,
        site: AllocationSite,
        target: MethodId,
        first: Value,
    ) -> ObjectId {
        self.push_instance(Instance::Delegate {
            ty,
            site,
            target,
            first,
        })
    }

    /// Interned string literal.
    pub(crate) fn intern_string(&mut self, value: &Arc<str>) -> ObjectId {
        if let Some(&id) = self.strings.get(value) {
            return id;
        }
        let units: Vec<u16> = value.encode_utf16().collect();
        let mut data = vec![0u8; self.pointer_size];
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        data.extend_from_slice(&(units.len() as i32).to_le_bytes());
        for unit in units {
            data.extend_from_slice(&unit.to_le_bytes());
        }
        data.extend_from_slice(&[0, 0]);
        let data = self.alloc_bytes(data);
        let id = self.push_instance(Instance::String {
            value: value.clone(),
            data,
        });
        self.strings.insert(value.clone(), id);
        id
    }

    /// Interned `System.RuntimeType` for `represented`.
    pub(crate) fn intern_runtime_type(&mut self, represented: TypeId) -> ObjectId {
        if let Some(&id) = self.runtime_types.get(&represented) {
            return id;
        }
        let id = self.push_instance(Instance::RuntimeType { represented });
        self.runtime_types.insert(represented, id);
        id
    }

    /// Element count of an array instance.
    pub(crate) fn array_length(&self, id: ObjectId) -> Result<Option<usize>> {
        Ok(match self.instance(id)? {
            Instance::Array { length, .. } => Some(*length),
            _ => None,
        })
    }

    /// Stores `value` at `index`. False for out-of-range indices and non-byte values.
    pub(crate) fn array_try_store(&mut self, id: ObjectId, index: i32, value: Value) -> Result<bool> {
        let Instance::Array {
            length,
            element_size,
            data,
            ..
        } = *self.instance(id)?
        else {
            return Err(invalid_program!("not an array"));
        };
        let Some(bytes) = self.bytes(&value).map(<[u8]>::to_vec) else {
            return Ok(false);
        };
        let Ok(index) = usize::try_from(index) else {
            return Ok(false);
        };
        if index >= length || bytes.len() != element_size {
            return Ok(false);
        }
        let start = index * element_size;
        self.buffer_mut(data)?[start..start + element_size].copy_from_slice(&bytes);
        Ok(true)
    }

    /// Loads the element at `index`. `None` for out-of-range indices.
    pub(crate) fn array_try_load(&mut self, id: ObjectId, index: i32) -> Result<Option<Value>> {
        let Instance::Array {
            length,
            element_size,
            data,
            ..
        } = *self.instance(id)?
        else {
            return Err(invalid_program!("not an array"));
        };
        let Ok(index) = usize::try_from(index) else {
            return Ok(None);
        };
        if index >= length {
            return Ok(None);
        }
        let start = index * element_size;
        let bytes = self.buffer(data)?[start..start + element_size].to_vec();
        Ok(Some(self.transient(&bytes)))
    }

    /// Copies `bytes` over the whole payload of an array of exactly that size.
    pub(crate) fn array_try_initialize(&mut self, id: ObjectId, bytes: &[u8]) -> Result<bool> {
        let Instance::Array { data, .. } = *self.instance(id)? else {
            return Ok(false);
        };
        let buffer = self.buffer_mut(data)?;
        if buffer.len() != bytes.len() {
            return Ok(false);
        }
        buffer.copy_from_slice(bytes);
        Ok(true)
    }

    /// Boxes a value type.
    ///
    /// # Errors
    /// [`crate::Error::InvalidProgram`] when `value` is not a value type.
    pub(crate) fn try_box(
        &mut self,
        types: &TypeSystem,
        ty: TypeId,
        value: Value,
        site: AllocationSite,
    ) -> Result<Option<ObjectId>> {
        if !value.is_value_type() {
            return Err(invalid_program!("boxing {:?}", value));
        }
        let Some(bytes) = self.bytes(&value).map(<[u8]>::to_vec) else {
            return Ok(None);
        };
        let id = self.new_object(types, ty, site);
        if let Instance::Object { data, .. } = *self.instance(id)? {
            let pointer_size = self.pointer_size;
            let buffer = self.buffer_mut(data)?;
            if pointer_size + bytes.len() > buffer.len() {
                return Err(invalid_program!("boxed value larger than its type"));
            }
            buffer[pointer_size..pointer_size + bytes.len()].copy_from_slice(&bytes);
        }
        Ok(Some(id))
    }

    /// `unbox.any` of a boxed value to `ty`. `None` when the box does not hold a `ty`.
    pub(crate) fn try_unbox_any(
        &mut self,
        types: &TypeSystem,
        id: ObjectId,
        ty: TypeId,
    ) -> Result<Option<Value>> {
        let Instance::Object {
            ty: boxed, data, ..
        } = *self.instance(id)?
        else {
            return Ok(None);
        };
        if !types.is_value_type(ty)
            || types.is_nullable(ty)
            || underlying_type(types, boxed) != underlying_type(types, ty)
        {
            return Ok(None);
        }
        let size = types.element_size(ty);
        let start = self.pointer_size;
        let buffer = self.buffer(data)?;
        if start + size > buffer.len() {
            return Ok(None);
        }
        let bytes = buffer[start..start + size].to_vec();
        Ok(Some(self.transient(&bytes)))
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    /// Freezes a static field table.
    ///
    /// # Errors
    /// [`crate::Error::InvalidProgram`] if a field holds a value with no frozen form.
    pub(crate) fn freeze_statics<'f>(
        &self,
        values: impl IntoIterator<Item = (&'f FieldId, &'f Value)>,
    ) -> Result<FrozenStatics> {
        let mut memo = HashMap::new();
        values
            .into_iter()
            .map(|(field, value)| Ok((*field, self.freeze(value, &mut memo)?)))
            .collect()
    }

    fn freeze(
        &self,
        value: &Value,
        memo: &mut HashMap<ObjectId, Arc<FrozenObject>>,
    ) -> Result<FrozenValue> {
        match value {
            Value::Null => Ok(FrozenValue::Null),
            Value::Scalar(_) | Value::Bytes(_) => Ok(FrozenValue::Bytes(Arc::from(
                self.bytes(value)
                    .ok_or_else(|| invalid_program!("dangling value type storage"))?,
            ))),
            Value::VTable(id) => Ok(FrozenValue::VTable(Arc::from(
                self.vtable(*id)?.methods.as_slice(),
            ))),
            Value::ComEntries(id) => Ok(FrozenValue::ComEntries(Arc::from(
                self.com_entries(*id)?.entries.as_slice(),
            ))),
            Value::Ref(id) => self.freeze_instance(*id, memo),
            Value::Span(_)
            | Value::MethodPointer(_)
            | Value::FieldHandle(_)
            | Value::TypeHandle(_)
            | Value::ByRef(_) => Err(invalid_program!("{:?} has no frozen representation", value)),
        }
    }

    fn freeze_instance(
        &self,
        id: ObjectId,
        memo: &mut HashMap<ObjectId, Arc<FrozenObject>>,
    ) -> Result<FrozenValue> {
        if let Some(object) = memo.get(&id) {
            return Ok(FrozenValue::Object(object.clone()));
        }
        let object = match self.instance(id)? {
            Instance::String { value, .. } => return Ok(FrozenValue::String(value.clone())),
            Instance::RuntimeType { represented } => {
                return Ok(FrozenValue::RuntimeType(*represented))
            }
            Instance::Foreign(object) => object.clone(),
            Instance::Object { ty, site, data } => Arc::new(FrozenObject {
                ty: *ty,
                site: *site,
                content: FrozenContent::Object {
                    data: Arc::from(self.buffer(*data)?),
                },
            }),
            Instance::Array {
                ty,
                element,
                length,
                site,
                data,
                ..
            } => Arc::new(FrozenObject {
                ty: *ty,
                site: *site,
                content: FrozenContent::Array {
                    element: *element,
                    length: *length,
                    data: Arc::from(self.buffer(*data)?),
                },
            }),
            Instance::Delegate {
                ty,
                site,
                target,
                first,
            } => Arc::new(FrozenObject {
                ty: *ty,
                site: *site,
                content: FrozenContent::Delegate {
                    target: *target,
                    first_parameter: self.freeze(first, memo)?,
                },
            }),
        };
        memo.insert(id, object.clone());
        Ok(FrozenValue::Object(object))
    }

    /// Brings a value produced by another scan into this heap.
    ///
    /// Objects become immutable foreign instances. The same frozen object always maps to
    /// the same instance, so reference equality survives the import.
    pub(crate) fn import(&mut self, types: &TypeSystem, value: &FrozenValue) -> Value {
        match value {
            FrozenValue::Null => Value::Null,
            FrozenValue::Bytes(bytes) => self.transient(bytes),
            FrozenValue::String(value) => Value::Ref(self.intern_string(value)),
            FrozenValue::RuntimeType(ty) => Value::Ref(self.intern_runtime_type(*ty)),
            FrozenValue::Object(object) => {
                let key = Arc::as_ptr(object) as usize;
                if let Some(&id) = self.foreign.get(&key) {
                    return Value::Ref(id);
                }
                let id = self.push_instance(Instance::Foreign(object.clone()));
                self.foreign.insert(key, id);
                Value::Ref(id)
            }
            FrozenValue::VTable(methods) => Value::VTable(self.alloc(Storage::VTable(VTableData {
                methods: methods.to_vec(),
                owner_field: None,
            }))),
            FrozenValue::ComEntries(entries) => {
                let entry_type = types.well_known(WellKnownType::ComInterfaceEntry);
                Value::ComEntries(self.alloc(Storage::ComEntries(ComEntriesData {
                    entry_type,
                    entry_size: types.instance_byte_count(entry_type),
                    entries: entries.to_vec(),
                })))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocations_are_charged() {
        let mut heap = Heap::with_byte_limit(8, 4096);
        assert_eq!(heap.allocated_bytes(), 0);

        heap.alloc_bytes(vec![0; 1000]);
        let charged = heap.allocated_bytes();
        assert!(charged >= 1000);
        assert!(heap.fits(4096 - charged));
        assert!(!heap.fits(4096 - charged + 1));
        assert!(!heap.exhausted());

        heap.alloc_bytes(vec![0; 4000]);
        assert!(heap.exhausted());
    }

    #[test]
    fn test_unlimited_heap_never_exhausts() {
        let mut heap = Heap::new(8);
        heap.alloc_bytes(vec![0; 1 << 16]);
        assert!(heap.fits(usize::MAX - heap.allocated_bytes()));
        assert!(!heap.fits(usize::MAX));
        assert!(!heap.exhausted());
    }
}
