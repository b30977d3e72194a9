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

//! Byte buffer with pointer relocations.

use std::sync::Arc;

use crate::{
    metadata::typesystem::{MethodId, TypeId},
    preinit::AllocationSite,
};

/// A node of the output image a pointer can refer to.
///
/// Symbols are plain descriptions. Resolving them to addresses is the job of whatever
/// lays out the image.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Symbol {
    /// Object allocated by a preinitialized static constructor
    FrozenObject(AllocationSite),
    /// Frozen string literal
    FrozenString(Arc<str>),
    /// Frozen `System.RuntimeType` of a type
    RuntimeType(TypeId),
    /// Method table of a type that can have instances
    ConstructedType(TypeId),
    /// Callable entry point of a method
    MethodEntrypoint(MethodId),
    /// Thunk an open static delegate jumps through
    DelegateThunk {
        /// Delegate type
        delegate: TypeId,
        /// Static method the delegate invokes
        target: MethodId,
    },
    /// Non-GC static data region of a type
    NonGcStatics(TypeId),
}

/// A pointer-sized slot of an [`ObjectDataBuilder`] that points at a [`Symbol`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reloc {
    /// Offset of the slot within the builder's data
    pub offset: usize,
    /// Symbol the slot points at
    pub target: Symbol,
    /// Byte offset added to the symbol's address
    pub delta: i64,
}

/// Accumulates the bytes and relocations of one output node.
///
/// Relocated slots are written as zero bytes; the relocation list tells the image writer
/// what to patch in.
#[derive(Debug, Clone)]
pub struct ObjectDataBuilder {
    pointer_size: usize,
    data: Vec<u8>,
    relocs: Vec<Reloc>,
}

impl ObjectDataBuilder {
    /// Creates an empty builder for a target with the given pointer size.
    #[must_use]
    pub fn new(pointer_size: usize) -> Self {
        ObjectDataBuilder {
            pointer_size,
            data: Vec::new(),
            relocs: Vec::new(),
        }
    }

    /// Target pointer size in bytes.
    #[must_use]
    pub fn pointer_size(&self) -> usize {
        self.pointer_size
    }

    /// Bytes emitted so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if nothing was emitted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Appends raw bytes.
    pub fn emit_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Appends a little-endian `i32`.
    pub fn emit_int(&mut self, value: i32) {
        self.emit_bytes(&value.to_le_bytes());
    }

    /// Appends `count` zero bytes.
    pub fn emit_zeros(&mut self, count: usize) {
        self.data.resize(self.data.len() + count, 0);
    }

    /// Appends a null pointer.
    pub fn emit_zero_pointer(&mut self) {
        self.emit_zeros(self.pointer_size);
    }

    /// Appends a pointer to `target`.
    pub fn emit_pointer_reloc(&mut self, target: Symbol) {
        self.emit_pointer_reloc_with_delta(target, 0);
    }

    /// Appends a pointer to `delta` bytes past `target`.
    pub fn emit_pointer_reloc_with_delta(&mut self, target: Symbol, delta: i64) {
        self.relocs.push(Reloc {
            offset: self.data.len(),
            target,
            delta,
        });
        self.emit_zero_pointer();
    }

    /// Zero-pads up to `offset`. Does nothing if the data already extends past it.
    pub fn pad_to(&mut self, offset: usize) {
        if offset > self.data.len() {
            self.data.resize(offset, 0);
        }
    }

    /// Emitted bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Emitted relocations, in emission order.
    #[must_use]
    pub fn relocs(&self) -> &[Reloc] {
        &self.relocs
    }

    /// Consumes the builder.
    #[must_use]
    pub fn into_parts(self) -> (Vec<u8>, Vec<Reloc>) {
        (self.data, self.relocs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reloc_slots_are_zeroed() {
        let mut builder = ObjectDataBuilder::new(8);
        builder.emit_int(-1);
        builder.emit_pointer_reloc_with_delta(Symbol::ConstructedType(TypeId::new(3)), 16);
        builder.emit_bytes(&[0xAB]);

        assert_eq!(builder.len(), 13);
        assert_eq!(&builder.data()[..4], &[0xFF; 4]);
        assert_eq!(&builder.data()[4..12], &[0; 8]);
        assert_eq!(builder.relocs()[0].offset, 4);
        assert_eq!(builder.relocs()[0].delta, 16);
    }

    #[test]
    fn test_pad_to_never_truncates() {
        let mut builder = ObjectDataBuilder::new(4);
        builder.emit_bytes(&[1, 2, 3]);
        builder.pad_to(2);
        assert_eq!(builder.data(), &[1, 2, 3]);
        builder.pad_to(8);
        assert_eq!(builder.data(), &[1, 2, 3, 0, 0, 0, 0, 0]);
        builder.emit_zero_pointer();
        assert_eq!(builder.len(), 12);
    }
}
