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

//! Arena-backed type system used by the preinitializer.
//!
//! The interpreter needs a narrow view of the surrounding compiler's type system: type
//! categories, field layouts, base types, static constructor presence and a handful of
//! core library types it recognizes by identity. This module provides that view as a
//! concrete, in-memory [`TypeSystem`] that callers populate through builder methods.
//!
//! # Key Components
//!
//! - [`TypeSystem`]: the registry, owner of every [`TypeDesc`], [`FieldDesc`] and [`MethodDesc`]
//! - [`TypeId`], [`FieldId`], [`MethodId`]: cheap `Copy` handles into the registry
//! - [`TypeCategory`]: the coarse classification the interpreter's coercion tables use
//! - [`WellKnownType`]: core library types seeded by [`TypeSystem::new`]
//!
//! # Layout
//!
//! Fields are laid out sequentially in definition order, each aligned to its natural
//! alignment. Instance offsets of reference types include the method table pointer, so
//! the first field of a class on a 64-bit target sits at offset 8. Value type offsets
//! start at zero. Static fields live in a separate per-type region.
//!
//! # Examples
//!
//! ```rust
//! use cilpreinit::metadata::typesystem::{
//!     FieldAttributes, PointerSize, TypeCategory, TypeSystem, WellKnownType,
//! };
//!
//! let types = TypeSystem::new(PointerSize::Bit64);
//! let holder = types.define_class("Demo", "Holder");
//! let int32 = types.well_known(WellKnownType::Int32);
//! let field = types.add_field(holder, "Value", int32, FieldAttributes::STATIC)?;
//!
//! assert_eq!(types.category(int32), TypeCategory::Int32);
//! assert_eq!(types.field(field).name, "Value");
//! assert_eq!(types.type_name(holder), "Demo.Holder");
//! # Ok::<(), cilpreinit::Error>(())
//! ```
//!
//! # Thread Safety
//!
//! All builder methods take `&self`. Descriptors are stored in append-only `boxcar`
//! vectors and constructed types are memoized in `DashMap`s, so a populated
//! [`TypeSystem`] can be shared between threads scanning different types.

mod desc;
mod layout;
mod registry;
mod wellknown;

pub use desc::{FieldDesc, MethodDesc, TypeDesc, TypeLayout};
pub use registry::TypeSystem;
pub use wellknown::WellKnownType;

use bitflags::bitflags;
use strum::{EnumIter, IntoStaticStr};

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u32);

        impl $name {
            #[allow(clippy::cast_possible_truncation)]
            pub(crate) fn new(index: usize) -> Self {
                $name(index as u32)
            }

            /// Position of the descriptor inside its arena.
            #[must_use]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

define_id!(
    /// Handle to a [`TypeDesc`] owned by a [`TypeSystem`].
    TypeId
);
define_id!(
    /// Handle to a [`FieldDesc`] owned by a [`TypeSystem`].
    FieldId
);
define_id!(
    /// Handle to a [`MethodDesc`] owned by a [`TypeSystem`].
    MethodId
);

/// Size of a native pointer on the compilation target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerSize {
    /// 32-bit target
    Bit32,
    /// 64-bit target
    Bit64,
}

impl PointerSize {
    /// Pointer width in bytes.
    #[must_use]
    pub const fn bytes(self) -> usize {
        match self {
            PointerSize::Bit32 => 4,
            PointerSize::Bit64 => 8,
        }
    }
}

/// Target properties that influence layout and emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetDetails {
    /// Native pointer width
    pub pointer_size: PointerSize,
    /// Whether 8-byte fields force 8-byte aligned allocations (32-bit ARM)
    pub align8: bool,
}

impl TargetDetails {
    /// Target with the given pointer size and no 8-byte alignment requirement.
    #[must_use]
    pub const fn new(pointer_size: PointerSize) -> Self {
        TargetDetails {
            pointer_size,
            align8: false,
        }
    }
}

/// Coarse classification of a type, mirroring the categories the runtime uses to pick
/// load/store widths. Enums report the category of their underlying type.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, IntoStaticStr)]
pub enum TypeCategory {
    Void,
    Boolean,
    Char,
    SByte,
    Byte,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    IntPtr,
    UIntPtr,
    Single,
    Double,
    ValueType,
    Nullable,
    Class,
    Interface,
    Array,
    ByRef,
    Pointer,
    FunctionPointer,
    GenericParameter,
}

impl TypeCategory {
    /// True for the numeric and boolean primitives, including native integers.
    #[must_use]
    pub fn is_primitive(self) -> bool {
        matches!(
            self,
            TypeCategory::Boolean
                | TypeCategory::Char
                | TypeCategory::SByte
                | TypeCategory::Byte
                | TypeCategory::Int16
                | TypeCategory::UInt16
                | TypeCategory::Int32
                | TypeCategory::UInt32
                | TypeCategory::Int64
                | TypeCategory::UInt64
                | TypeCategory::IntPtr
                | TypeCategory::UIntPtr
                | TypeCategory::Single
                | TypeCategory::Double
        )
    }

    /// True for categories whose instances live inline rather than on the heap.
    #[must_use]
    pub fn is_value_type(self) -> bool {
        self.is_primitive() || matches!(self, TypeCategory::ValueType | TypeCategory::Nullable)
    }

    /// True for categories whose values are object references.
    #[must_use]
    pub fn is_gc_reference(self) -> bool {
        matches!(
            self,
            TypeCategory::Class | TypeCategory::Interface | TypeCategory::Array
        )
    }

    /// Fixed size of a primitive, or `None` for native-sized and composite categories.
    #[must_use]
    pub const fn primitive_size(self) -> Option<usize> {
        match self {
            TypeCategory::Boolean | TypeCategory::SByte | TypeCategory::Byte => Some(1),
            TypeCategory::Char | TypeCategory::Int16 | TypeCategory::UInt16 => Some(2),
            TypeCategory::Int32 | TypeCategory::UInt32 | TypeCategory::Single => Some(4),
            TypeCategory::Int64 | TypeCategory::UInt64 | TypeCategory::Double => Some(8),
            _ => None,
        }
    }
}

/// Whether a generic parameter belongs to a type or to a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GenericParameterKind {
    /// `!n`
    Type,
    /// `!!n`
    Method,
}

bitflags! {
    /// Type-level attributes the interpreter and layout engine care about.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TypeAttributes: u32 {
        /// Cannot be instantiated
        const ABSTRACT = 0x0000_0080;
        /// Cannot be derived from
        const SEALED = 0x0000_0100;
        /// Fields are laid out in declaration order
        const SEQUENTIAL_LAYOUT = 0x0000_0008;
        /// Fields carry explicit offsets
        const EXPLICIT_LAYOUT = 0x0000_0010;
        /// The static constructor may run any time before the first static field access
        const BEFORE_FIELD_INIT = 0x0010_0000;
        /// Stack-only value type (`ref struct`)
        const BYREF_LIKE = 0x0100_0000;
        /// Value type marked as an inline array
        const INLINE_ARRAY = 0x0200_0000;
    }
}

bitflags! {
    /// Field attributes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FieldAttributes: u32 {
        /// Static field
        const STATIC = 0x0010;
        /// Only assignable from a constructor
        const INIT_ONLY = 0x0020;
        /// Compile-time constant without storage
        const LITERAL = 0x0040;
        /// Initial value is mapped from the image's data section
        const HAS_FIELD_RVA = 0x0100;
        /// One copy per thread
        const THREAD_STATIC = 0x1000_0000;
    }
}

bitflags! {
    /// Method attributes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MethodAttributes: u32 {
        /// No `this` parameter
        const STATIC = 0x0010;
        /// Occupies a virtual slot
        const VIRTUAL = 0x0040;
        /// No implementation
        const ABSTRACT = 0x0400;
        /// Name has special meaning (property accessors, operators)
        const SPECIAL_NAME = 0x0800;
        /// Name has runtime meaning (`.ctor`, `.cctor`)
        const RT_SPECIAL_NAME = 0x1000;
        /// Implemented by the compiler rather than by its IL body
        const INTRINSIC = 0x1000_0000;
    }
}

/// Parameter and return types of a method or function pointer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSignature {
    /// Instance methods take an implicit `this`
    pub has_this: bool,
    /// Declared parameters, excluding `this`
    pub parameters: Vec<TypeId>,
    /// Return type, `Void` for none
    pub return_type: TypeId,
}

impl MethodSignature {
    /// Signature of a static method.
    #[must_use]
    pub fn new_static(parameters: Vec<TypeId>, return_type: TypeId) -> Self {
        MethodSignature {
            has_this: false,
            parameters,
            return_type,
        }
    }

    /// Signature of an instance method.
    #[must_use]
    pub fn new_instance(parameters: Vec<TypeId>, return_type: TypeId) -> Self {
        MethodSignature {
            has_this: true,
            parameters,
            return_type,
        }
    }
}

/// What kind of type a [`TypeSystem::define_type`] call creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    /// Reference type deriving from the given base, `System.Object` when `None`
    Class(Option<TypeId>),
    /// Value type deriving from `System.ValueType`
    Struct,
    /// Enumeration over the given primitive
    Enum(TypeId),
    /// Interface
    Interface,
    /// Delegate deriving from `System.MulticastDelegate`
    Delegate,
}
