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

//! Values the interpreter moves between the evaluation stack, locals, arguments and fields.
//!
//! [`Value`] is `Copy`. Values with storage (value type buffers, spans, vtable-like structs,
//! COM entry tables) and instances (objects, arrays, strings, delegates) are handles into
//! the [`super::heap::Heap`] of the scan that created them. Small value types that are only
//! in transit are carried inline as a [`Scalar`] and get storage once something takes their
//! address.

use std::fmt;

use crate::metadata::typesystem::{FieldId, MethodId, TypeId};

/// Handle to a storage cell of a [`super::heap::Heap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct StorageId(pub(crate) usize);

/// Handle to an instance of a [`super::heap::Heap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ObjectId(pub(crate) usize);

/// Inline bytes of a value type of at most eight bytes.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) struct Scalar {
    len: u8,
    bytes: [u8; 8],
}

impl Scalar {
    /// Largest value carried inline.
    pub(crate) const MAX: usize = 8;

    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn from_slice(data: &[u8]) -> Option<Self> {
        if data.len() > Self::MAX {
            return None;
        }
        let mut bytes = [0u8; 8];
        bytes[..data.len()].copy_from_slice(data);
        Some(Scalar {
            len: data.len() as u8,
            bytes,
        })
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        &self.bytes[..usize::from(self.len)]
    }
}

impl fmt::Debug for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Scalar(")?;
        for byte in self.as_slice() {
            write!(f, "{byte:02X}")?;
        }
        write!(f, ")")
    }
}

/// A byref: an interior pointer into storage owned by the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ByRef {
    /// Offset into a byte buffer
    Bytes { storage: StorageId, offset: usize },
    /// Slot of a vtable-like struct
    VTableSlot { storage: StorageId, index: usize },
    /// Entry of a COM interface entry table
    ComSlot { storage: StorageId, index: usize },
    /// The span record itself, for `ldflda`/`ldloca` of a span local
    Span { storage: StorageId },
}

/// An interpreted value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Value {
    /// Null reference, also the uninitialized state of GC and byref locations
    Null,
    /// Value type of up to eight bytes without an address
    Scalar(Scalar),
    /// Value type backed by a byte buffer
    Bytes(StorageId),
    /// `Span<T>` or `ReadOnlySpan<T>`
    Span(StorageId),
    /// Sequential struct of function pointers
    VTable(StorageId),
    /// Inline array of `ComWrappers.ComInterfaceEntry`
    ComEntries(StorageId),
    /// Result of `ldftn`
    MethodPointer(MethodId),
    /// `RuntimeFieldHandle` produced by `ldtoken`
    FieldHandle(FieldId),
    /// `RuntimeTypeHandle` produced by `ldtoken`
    TypeHandle(TypeId),
    /// Reference to an instance
    Ref(ObjectId),
    /// Interior pointer
    ByRef(ByRef),
}

impl Value {
    fn scalar<const N: usize>(bytes: [u8; N]) -> Value {
        match Scalar::from_slice(&bytes) {
            Some(scalar) => Value::Scalar(scalar),
            None => Value::Null,
        }
    }

    pub(crate) fn from_i8(value: i8) -> Value {
        Value::scalar(value.to_le_bytes())
    }

    pub(crate) fn from_i16(value: i16) -> Value {
        Value::scalar(value.to_le_bytes())
    }

    pub(crate) fn from_i32(value: i32) -> Value {
        Value::scalar(value.to_le_bytes())
    }

    pub(crate) fn from_i64(value: i64) -> Value {
        Value::scalar(value.to_le_bytes())
    }

    pub(crate) fn from_f32(value: f32) -> Value {
        Value::scalar(value.to_le_bytes())
    }

    pub(crate) fn from_f64(value: f64) -> Value {
        Value::scalar(value.to_le_bytes())
    }

    /// A native integer of the target's pointer width.
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn native_int(value: i64, pointer_size: usize) -> Value {
        if pointer_size == 8 {
            Value::from_i64(value)
        } else {
            Value::from_i32(value as i32)
        }
    }

    pub(crate) fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Values that only exist to model runtime constructs and have no representation in
    /// a frozen image.
    pub(crate) fn is_internal_only(&self) -> bool {
        matches!(
            self,
            Value::Span(_) | Value::MethodPointer(_) | Value::FieldHandle(_) | Value::TypeHandle(_)
        )
    }

    /// Any value type value.
    pub(crate) fn is_value_type(&self) -> bool {
        matches!(
            self,
            Value::Scalar(_)
                | Value::Bytes(_)
                | Value::Span(_)
                | Value::VTable(_)
                | Value::ComEntries(_)
                | Value::MethodPointer(_)
                | Value::FieldHandle(_)
                | Value::TypeHandle(_)
        )
    }

    /// Locations that are overwritten in place on store rather than replaced.
    pub(crate) fn is_assignable(&self) -> bool {
        matches!(self, Value::Bytes(_) | Value::VTable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_round_trip() {
        let value = Value::from_i32(-2);
        match value {
            Value::Scalar(scalar) => assert_eq!(scalar.as_slice(), &[0xFE, 0xFF, 0xFF, 0xFF]),
            other => panic!("unexpected value {other:?}"),
        }
        assert!(Scalar::from_slice(&[0; 9]).is_none());
    }

    #[test]
    fn test_native_int_width() {
        assert_eq!(Value::native_int(-1, 4), Value::from_i32(-1));
        assert_eq!(Value::native_int(-1, 8), Value::from_i64(-1));
    }

    #[test]
    fn test_classification() {
        assert!(Value::MethodPointer(MethodId::new(0)).is_internal_only());
        assert!(!Value::from_i8(1).is_internal_only());
        assert!(Value::Bytes(StorageId(0)).is_assignable());
        assert!(!Value::from_i8(1).is_assignable());
        assert!(Value::Span(StorageId(0)).is_value_type());
        assert!(!Value::Ref(ObjectId(0)).is_value_type());
    }
}
