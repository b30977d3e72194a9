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

//! Symbol production for frozen data.
//!
//! The image writer owns the actual nodes; serialization only asks it for the symbol of
//! each thing a frozen value points at, and for the dependencies a frozen delegate drags
//! in. [`RecordingNodeFactory`] is a self-contained implementation that remembers every
//! frozen object and string it was asked for, which is enough to drive emission in tools
//! and tests.

use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};

use crate::{
    metadata::typesystem::{MethodId, TypeId, TypeSystem},
    preinit::{AllocationSite, FrozenObject},
    serialize::builder::Symbol,
};

/// Produces the symbols frozen values are written against.
pub trait NodeFactory {
    /// Type system the frozen values were produced with.
    fn types(&self) -> &TypeSystem;

    /// Target pointer size in bytes.
    fn pointer_size(&self) -> usize {
        self.types().pointer_size()
    }

    /// Symbol of an object allocated by a preinitialized static constructor.
    fn serialized_frozen_object(&mut self, object: &Arc<FrozenObject>) -> Symbol;

    /// Symbol of a frozen string literal.
    fn serialized_string_object(&mut self, value: &Arc<str>) -> Symbol;

    /// Symbol of the frozen `System.RuntimeType` of `ty`.
    fn serialized_runtime_type(&mut self, ty: TypeId) -> Symbol {
        Symbol::RuntimeType(ty)
    }

    /// Method table of `ty`.
    fn constructed_type_symbol(&mut self, ty: TypeId) -> Symbol {
        Symbol::ConstructedType(ty)
    }

    /// Address-taken entry point of `method`.
    fn method_entrypoint(&mut self, method: MethodId) -> Symbol {
        Symbol::MethodEntrypoint(method)
    }

    /// Thunk of an open static delegate of type `delegate` over `target`.
    fn delegate_thunk(&mut self, delegate: TypeId, target: MethodId) -> Symbol {
        Symbol::DelegateThunk { delegate, target }
    }

    /// Non-GC static data region of `ty`.
    fn non_gc_statics(&mut self, ty: TypeId) -> Symbol {
        Symbol::NonGcStatics(ty)
    }

    /// Nodes that must exist once a delegate of type `delegate` over `target` is in the
    /// image.
    fn delegate_creation_dependencies(&mut self, delegate: TypeId, target: MethodId) -> Vec<Symbol> {
        let mut dependencies = vec![
            self.constructed_type_symbol(delegate),
            self.method_entrypoint(target),
        ];
        if self.types().method(target).is_static() {
            dependencies.push(self.delegate_thunk(delegate, target));
        }
        dependencies
    }
}

/// A [`NodeFactory`] that records what it was asked for.
pub struct RecordingNodeFactory<'a> {
    types: &'a TypeSystem,
    objects: IndexMap<AllocationSite, Arc<FrozenObject>>,
    strings: IndexSet<Arc<str>>,
    runtime_types: IndexSet<TypeId>,
}

impl<'a> RecordingNodeFactory<'a> {
    /// Creates an empty factory.
    #[must_use]
    pub fn new(types: &'a TypeSystem) -> Self {
        RecordingNodeFactory {
            types,
            objects: IndexMap::new(),
            strings: IndexSet::new(),
            runtime_types: IndexSet::new(),
        }
    }

    /// Frozen objects referenced so far, in first-reference order.
    pub fn frozen_objects(&self) -> impl Iterator<Item = &Arc<FrozenObject>> {
        self.objects.values()
    }

    /// The frozen object allocated at `site`, if it was referenced.
    #[must_use]
    pub fn frozen_object(&self, site: AllocationSite) -> Option<&Arc<FrozenObject>> {
        self.objects.get(&site)
    }

    /// String literals referenced so far.
    pub fn strings(&self) -> impl Iterator<Item = &str> {
        self.strings.iter().map(AsRef::as_ref)
    }

    /// Types whose `System.RuntimeType` was referenced.
    pub fn runtime_types(&self) -> impl Iterator<Item = TypeId> + '_ {
        self.runtime_types.iter().copied()
    }
}

impl NodeFactory for RecordingNodeFactory<'_> {
    fn types(&self) -> &TypeSystem {
        self.types
    }

    fn serialized_frozen_object(&mut self, object: &Arc<FrozenObject>) -> Symbol {
        self.objects
            .entry(object.site)
            .or_insert_with(|| object.clone());
        Symbol::FrozenObject(object.site)
    }

    fn serialized_string_object(&mut self, value: &Arc<str>) -> Symbol {
        self.strings.insert(value.clone());
        Symbol::FrozenString(value.clone())
    }

    fn serialized_runtime_type(&mut self, ty: TypeId) -> Symbol {
        self.runtime_types.insert(ty);
        Symbol::RuntimeType(ty)
    }
}
