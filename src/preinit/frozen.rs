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

//! Immutable snapshots of preinitialized values.
//!
//! When a scan succeeds, every static field value is frozen into a [`FrozenValue`].
//! Objects allocated by the constructor become [`FrozenObject`]s, identified by the
//! [`AllocationSite`] that created them. A snapshot owns all of its bytes, so it outlives
//! the interpreter that produced it. Snapshots are what nested scans hand back to their
//! importers and what the [`crate::serialize`] module emits.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::metadata::typesystem::{FieldId, MethodId, TypeId};

/// Deterministic identity of an object allocated while interpreting a static constructor.
///
/// `instruction` is the instruction counter at the allocating instruction, relative to the
/// start of the constructor of `owner`. Nested constructors share one counter with their
/// importer, so sites are recorded against the counter value at which that constructor
/// started. An object therefore has the same site whether its type was scanned on its own
/// or as a dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AllocationSite {
    /// Type whose static constructor performed the allocation
    pub owner: TypeId,
    /// Instruction counter at the allocation, relative to that constructor
    pub instruction: usize,
}

/// One `ComWrappers.ComInterfaceEntry` of a frozen entry table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComEntry {
    /// Interface identifier
    pub guid: [u8; 16],
    /// Static field holding the interface vtable, if one was assigned
    pub target: Option<FieldId>,
}

/// A frozen static field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FrozenValue {
    /// Null reference
    Null,
    /// Raw bytes of a primitive, pointer-sized integer or value type
    Bytes(Arc<[u8]>),
    /// Reference to an object allocated at compile time
    Object(Arc<FrozenObject>),
    /// Reference to an interned string literal
    String(Arc<str>),
    /// Reference to the `System.RuntimeType` of a type
    RuntimeType(TypeId),
    /// Struct of function pointers, one optional method per slot
    VTable(Arc<[Option<MethodId>]>),
    /// Inline array of COM interface entries
    ComEntries(Arc<[ComEntry]>),
}

impl FrozenValue {
    /// True for [`FrozenValue::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, FrozenValue::Null)
    }

    /// Raw bytes of a value type.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            FrozenValue::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Little-endian `u8` reading of a one-byte value.
    #[must_use]
    pub fn as_u8(&self) -> Option<u8> {
        match self.as_bytes()? {
            [byte] => Some(*byte),
            _ => None,
        }
    }

    /// Little-endian `i16` reading of a two-byte value.
    #[must_use]
    pub fn as_i16(&self) -> Option<i16> {
        Some(i16::from_le_bytes(self.as_bytes()?.try_into().ok()?))
    }

    /// Little-endian `i32` reading of a four-byte value.
    #[must_use]
    pub fn as_i32(&self) -> Option<i32> {
        Some(i32::from_le_bytes(self.as_bytes()?.try_into().ok()?))
    }

    /// Little-endian `i64` reading of an eight-byte value.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        Some(i64::from_le_bytes(self.as_bytes()?.try_into().ok()?))
    }

    /// `f32` reading of a four-byte value.
    #[must_use]
    pub fn as_f32(&self) -> Option<f32> {
        Some(f32::from_le_bytes(self.as_bytes()?.try_into().ok()?))
    }

    /// `f64` reading of an eight-byte value.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        Some(f64::from_le_bytes(self.as_bytes()?.try_into().ok()?))
    }

    /// The referenced frozen object.
    #[must_use]
    pub fn as_object(&self) -> Option<&Arc<FrozenObject>> {
        match self {
            FrozenValue::Object(object) => Some(object),
            _ => None,
        }
    }

    /// The referenced string literal.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FrozenValue::String(value) => Some(value),
            _ => None,
        }
    }
}

/// An object allocated at compile time.
#[derive(Debug, Clone, PartialEq)]
pub struct FrozenObject {
    /// Exact type of the object, the array type for arrays
    pub ty: TypeId,
    /// Where the object was allocated
    pub site: AllocationSite,
    /// Payload
    pub content: FrozenContent,
}

/// Payload of a [`FrozenObject`].
#[derive(Debug, Clone, PartialEq)]
pub enum FrozenContent {
    /// Class instance or boxed value type. `data` is the full instance including the
    /// leading method table slot, which is left zero.
    Object {
        /// Instance bytes
        data: Arc<[u8]>,
    },
    /// Single-dimensional, zero-based array.
    Array {
        /// Element type
        element: TypeId,
        /// Number of elements
        length: usize,
        /// Element bytes, `length * element size`
        data: Arc<[u8]>,
    },
    /// Delegate bound to a method.
    Delegate {
        /// Invoked method
        target: MethodId,
        /// Bound receiver of a closed instance delegate, [`FrozenValue::Null`] for static targets
        first_parameter: FrozenValue,
    },
}

impl FrozenObject {
    /// Element count for arrays, `None` otherwise.
    #[must_use]
    pub fn array_length(&self) -> Option<usize> {
        match &self.content {
            FrozenContent::Array { length, .. } => Some(*length),
            _ => None,
        }
    }
}

/// Frozen static field table of one type, in declaration order.
pub(crate) type FrozenStatics = IndexMap<FieldId, FrozenValue>;
