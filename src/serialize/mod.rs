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

//! Emission of preinitialized data.
//!
//! A successful [`crate::preinit::scan_type`] leaves a [`crate::preinit::FrozenValue`] per
//! static field. This module writes those values the way an ahead-of-time compiler lays them
//! out in its image: value types as raw bytes, references as pointer relocations against
//! [`Symbol`]s, and every referenced frozen object as a standalone node with a method table
//! pointer and payload.
//!
//! # Key Components
//!
//! - [`ObjectDataBuilder`] - Byte buffer with [`Reloc`]s
//! - [`NodeFactory`] - The image writer's symbol source; [`RecordingNodeFactory`] is a
//!   self-contained implementation
//! - [`SerializableValue`] / [`SerializableReference`] - Field data and object content
//!
//! # Usage Examples
//!
//! ```rust
//! use cilpreinit::prelude::*;
//! use cilpreinit::serialize::write_statics;
//!
//! let types = TypeSystem::new(PointerSize::Bit64);
//! let ty = types.define_class("Demo", "Limits");
//! let int64 = types.well_known(WellKnownType::Int64);
//! let max = types.add_field(ty, "Max", int64, FieldAttributes::STATIC)?;
//! let cctor = types.add_static_constructor(ty)?;
//!
//! let bodies = InMemoryMethodBodies::new(&types);
//! let mut builder = MethodBodyBuilder::new(&types);
//! builder.ldc_i8(1 << 40)?.field("stsfld", max)?.op("ret")?;
//! bodies.insert(cctor, builder.build()?);
//!
//! let info = scan_type(&PreinitContext::new(&types, &bodies), ty);
//! let mut factory = RecordingNodeFactory::new(&types);
//! let data = write_statics(&info, &mut factory);
//! assert_eq!(data.data(), &(1i64 << 40).to_le_bytes());
//! # Ok::<(), cilpreinit::Error>(())
//! ```

mod builder;
mod factory;
mod value;

pub use builder::{ObjectDataBuilder, Reloc, Symbol};
pub use factory::{NodeFactory, RecordingNodeFactory};
pub use value::{RawData, SerializableReference, SerializableValue};

use crate::preinit::PreinitializationInfo;

/// Writes the static base of a preinitialized type.
///
/// Every field value is placed at its static offset, gaps are zero. Returns an empty
/// builder for types that were not preinitialized.
pub fn write_statics(info: &PreinitializationInfo, factory: &mut dyn NodeFactory) -> ObjectDataBuilder {
    let mut builder = ObjectDataBuilder::new(factory.pointer_size());
    let mut fields: Vec<_> = info
        .field_values()
        .map(|(field, value)| (factory.types().field(field).offset, value))
        .collect();
    fields.sort_by_key(|&(offset, _)| offset);

    for (offset, value) in fields {
        builder.pad_to(offset);
        value.write_field_data(&mut builder, factory);
    }
    builder
}
