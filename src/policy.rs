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

//! Oracles the preinitializer consults, and their default implementations.
//!
//! The interpreter never decides on its own whether a callee may be inlined, whether a
//! member needs dataflow analysis, or whether a field is effectively immutable. Those
//! answers come from the surrounding compiler through the traits in this module, bundled
//! into a [`PreinitContext`].
//!
//! # Key Components
//!
//! - [`MethodBodyProvider`]: IL for a method, `None` for extern methods
//! - [`CompilationModuleGroup`]: inlining permission and local-compilation membership
//! - [`FlowAnnotations`]: members whose signatures need dataflow analysis
//! - [`ReadOnlyFieldPolicy`]: fields that may be treated as immutable
//! - [`PreinitializationPolicy`]: whole-program permission to preinitialize a type
//!
//! # Thread Safety
//!
//! All traits require `Send + Sync`; one context can drive concurrent scans of
//! different types.

use std::{collections::HashSet, sync::Arc};

use dashmap::DashMap;

use crate::{
    config::PreinitConfig,
    metadata::{
        method::MethodIL,
        typesystem::{FieldDesc, FieldId, MethodId, TypeId, TypeSystem, WellKnownType},
    },
};

/// Supplies method bodies.
pub trait MethodBodyProvider: Send + Sync {
    /// IL of `method`, or `None` if it has no body.
    fn method_il(&self, types: &TypeSystem, method: MethodId) -> Option<Arc<MethodIL>>;
}

/// Answers which code the current compilation owns.
pub trait CompilationModuleGroup: Send + Sync {
    /// May `callee` be interpreted as part of `caller`.
    fn can_inline(&self, types: &TypeSystem, caller: MethodId, callee: MethodId) -> bool;

    /// Is `ty` compiled as part of this compilation.
    fn contains_type(&self, types: &TypeSystem, ty: TypeId) -> bool;
}

/// Flags members whose use requires dataflow analysis the interpreter does not do.
pub trait FlowAnnotations: Send + Sync {
    /// True if accessing `field` needs dataflow analysis.
    fn field_requires_dataflow(&self, field: FieldId) -> bool;

    /// True if calling `method` needs dataflow analysis.
    fn method_requires_dataflow(&self, method: MethodId) -> bool;
}

/// Decides which fields may be treated as immutable once their type is initialized.
pub trait ReadOnlyFieldPolicy: Send + Sync {
    /// True if `field` cannot change after its type's initializer ran.
    fn is_read_only(&self, field: &FieldDesc) -> bool;
}

/// Whole-program permission to preinitialize types.
pub trait PreinitializationPolicy: Send + Sync {
    /// May the preinitializer attempt `ty`.
    fn can_preinitialize(&self, types: &TypeSystem, ty: TypeId) -> bool;

    /// Will every concrete form of the canonical type `ty` be preinitialized.
    fn can_preinitialize_all_concrete_forms_for_canon_form(
        &self,
        types: &TypeSystem,
        ty: TypeId,
    ) -> bool;
}

/// Bodies registered in memory, keyed by method.
///
/// Lookups for instantiated methods fall back to their generic definition.
pub struct InMemoryMethodBodies {
    bodies: DashMap<MethodId, Arc<MethodIL>>,
}

impl InMemoryMethodBodies {
    /// Creates a provider that already knows the body of `System.Object::.ctor`.
    #[must_use]
    pub fn new(types: &TypeSystem) -> Self {
        let bodies = DashMap::new();
        let object = types.well_known(WellKnownType::Object);
        if let Some(ctor) = types.find_method_by_name(object, ".ctor") {
            bodies.insert(ctor, Arc::new(MethodIL::new(vec![0x2A])));
        }
        InMemoryMethodBodies { bodies }
    }

    /// Registers or replaces a body.
    pub fn insert(&self, method: MethodId, body: MethodIL) {
        self.bodies.insert(method, Arc::new(body));
    }

    /// Number of registered bodies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    /// True if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }
}

impl MethodBodyProvider for InMemoryMethodBodies {
    fn method_il(&self, types: &TypeSystem, method: MethodId) -> Option<Arc<MethodIL>> {
        let mut current = method;
        loop {
            if let Some(body) = self.bodies.get(&current) {
                return Some(body.clone());
            }
            current = types.method(current).definition?;
        }
    }
}

/// Treats the whole program as one module: everything inlinable, every type local.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleModuleGroup;

impl CompilationModuleGroup for SingleModuleGroup {
    fn can_inline(&self, _types: &TypeSystem, _caller: MethodId, _callee: MethodId) -> bool {
        true
    }

    fn contains_type(&self, _types: &TypeSystem, _ty: TypeId) -> bool {
        true
    }
}

/// No member requires dataflow analysis.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFlowAnnotations;

impl FlowAnnotations for NoFlowAnnotations {
    fn field_requires_dataflow(&self, _field: FieldId) -> bool {
        false
    }

    fn method_requires_dataflow(&self, _method: MethodId) -> bool {
        false
    }
}

/// An explicit set of annotated members.
#[derive(Debug, Clone, Default)]
pub struct AnnotatedMembers {
    fields: HashSet<FieldId>,
    methods: HashSet<MethodId>,
}

impl AnnotatedMembers {
    /// Empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a field.
    #[must_use]
    pub fn with_field(mut self, field: FieldId) -> Self {
        self.fields.insert(field);
        self
    }

    /// Marks a method.
    #[must_use]
    pub fn with_method(mut self, method: MethodId) -> Self {
        self.methods.insert(method);
        self
    }
}

impl FlowAnnotations for AnnotatedMembers {
    fn field_requires_dataflow(&self, field: FieldId) -> bool {
        self.fields.contains(&field)
    }

    fn method_requires_dataflow(&self, method: MethodId) -> bool {
        self.methods.contains(&method)
    }
}

/// `initonly` fields are read-only.
#[derive(Debug, Clone, Copy, Default)]
pub struct InitOnlyFieldPolicy;

impl ReadOnlyFieldPolicy for InitOnlyFieldPolicy {
    fn is_read_only(&self, field: &FieldDesc) -> bool {
        field.is_init_only()
    }
}

/// Disallows all preinitialization.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledPreinitializationPolicy;

impl PreinitializationPolicy for DisabledPreinitializationPolicy {
    fn can_preinitialize(&self, _types: &TypeSystem, _ty: TypeId) -> bool {
        false
    }

    fn can_preinitialize_all_concrete_forms_for_canon_form(
        &self,
        _types: &TypeSystem,
        _ty: TypeId,
    ) -> bool {
        false
    }
}

/// Allows preinitialization but assumes new canonical instantiations can appear at runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TypeLoaderAwarePreinitializationPolicy;

impl PreinitializationPolicy for TypeLoaderAwarePreinitializationPolicy {
    fn can_preinitialize(&self, _types: &TypeSystem, _ty: TypeId) -> bool {
        true
    }

    fn can_preinitialize_all_concrete_forms_for_canon_form(
        &self,
        _types: &TypeSystem,
        _ty: TypeId,
    ) -> bool {
        false
    }
}

static SINGLE_MODULE: SingleModuleGroup = SingleModuleGroup;
static NO_ANNOTATIONS: NoFlowAnnotations = NoFlowAnnotations;
static INIT_ONLY: InitOnlyFieldPolicy = InitOnlyFieldPolicy;
static TYPE_LOADER_AWARE: TypeLoaderAwarePreinitializationPolicy =
    TypeLoaderAwarePreinitializationPolicy;

/// Everything a scan needs from its surroundings.
#[derive(Clone, Copy)]
pub struct PreinitContext<'a> {
    /// Type system
    pub types: &'a TypeSystem,
    /// Method bodies
    pub bodies: &'a dyn MethodBodyProvider,
    /// Compilation group
    pub group: &'a dyn CompilationModuleGroup,
    /// Dataflow annotations
    pub annotations: &'a dyn FlowAnnotations,
    /// Read-only field policy
    pub read_only: &'a dyn ReadOnlyFieldPolicy,
    /// Preinitialization policy
    pub policy: &'a dyn PreinitializationPolicy,
    /// Limits
    pub config: PreinitConfig,
}

impl<'a> PreinitContext<'a> {
    /// Context with the default oracles: a single module, no annotations, `initonly`
    /// read-only fields and the type-loader-aware policy.
    #[must_use]
    pub fn new(types: &'a TypeSystem, bodies: &'a dyn MethodBodyProvider) -> Self {
        PreinitContext {
            types,
            bodies,
            group: &SINGLE_MODULE,
            annotations: &NO_ANNOTATIONS,
            read_only: &INIT_ONLY,
            policy: &TYPE_LOADER_AWARE,
            config: PreinitConfig::default(),
        }
    }

    /// Replaces the compilation group.
    #[must_use]
    pub fn with_group(mut self, group: &'a dyn CompilationModuleGroup) -> Self {
        self.group = group;
        self
    }

    /// Replaces the dataflow annotations.
    #[must_use]
    pub fn with_annotations(mut self, annotations: &'a dyn FlowAnnotations) -> Self {
        self.annotations = annotations;
        self
    }

    /// Replaces the read-only field policy.
    #[must_use]
    pub fn with_read_only_policy(mut self, read_only: &'a dyn ReadOnlyFieldPolicy) -> Self {
        self.read_only = read_only;
        self
    }

    /// Replaces the preinitialization policy.
    #[must_use]
    pub fn with_policy(mut self, policy: &'a dyn PreinitializationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replaces the limits.
    #[must_use]
    pub fn with_config(mut self, config: PreinitConfig) -> Self {
        self.config = config;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::typesystem::{FieldAttributes, PointerSize};

    #[test]
    fn test_object_constructor_has_body() {
        let types = TypeSystem::new(PointerSize::Bit64);
        let bodies = InMemoryMethodBodies::new(&types);
        let object = types.well_known(WellKnownType::Object);
        let ctor = types.find_method_by_name(object, ".ctor").unwrap();
        assert_eq!(bodies.method_il(&types, ctor).unwrap().code, vec![0x2A]);
        assert_eq!(bodies.len(), 1);
    }

    #[test]
    fn test_instantiated_method_falls_back_to_definition() {
        let types = TypeSystem::new(PointerSize::Bit64);
        let bodies = InMemoryMethodBodies::new(&types);
        let helpers = types.well_known(WellKnownType::RuntimeHelpers);
        let definition = types.find_method_by_name(helpers, "IsReferenceOrContainsReferences").unwrap();
        bodies.insert(definition, MethodIL::new(vec![0x16, 0x2A]));

        let int32 = types.well_known(WellKnownType::Int32);
        let instance = types.instantiate_method(definition, &[int32]).unwrap();
        assert!(bodies.method_il(&types, instance).is_some());
    }

    #[test]
    fn test_policies() {
        let types = TypeSystem::new(PointerSize::Bit64);
        let ty = types.define_class("Test", "Policy");
        assert!(!DisabledPreinitializationPolicy.can_preinitialize(&types, ty));
        assert!(TypeLoaderAwarePreinitializationPolicy.can_preinitialize(&types, ty));
        assert!(!TypeLoaderAwarePreinitializationPolicy
            .can_preinitialize_all_concrete_forms_for_canon_form(&types, ty));

        let int32 = types.well_known(WellKnownType::Int32);
        let frozen = types
            .add_field(ty, "Frozen", int32, FieldAttributes::STATIC | FieldAttributes::INIT_ONLY)
            .unwrap();
        let mutable = types.add_field(ty, "Mutable", int32, FieldAttributes::STATIC).unwrap();
        assert!(InitOnlyFieldPolicy.is_read_only(types.field(frozen)));
        assert!(!InitOnlyFieldPolicy.is_read_only(types.field(mutable)));

        let annotations = AnnotatedMembers::new().with_field(frozen);
        assert!(annotations.field_requires_dataflow(frozen));
        assert!(!annotations.field_requires_dataflow(mutable));
    }
}
