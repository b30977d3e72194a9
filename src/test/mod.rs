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

//! Shared fixtures for unit tests.
//!
//! [`Fixture`] owns a type system and an in-memory body store, and wraps the boilerplate of
//! declaring types, fields and constructors so a test only spells out the IL it is about.

use crate::{
    metadata::{
        method::MethodBodyBuilder,
        typesystem::{
            FieldAttributes, FieldId, MethodId, PointerSize, TypeId, TypeSystem, WellKnownType,
        },
    },
    policy::{InMemoryMethodBodies, PreinitContext},
    preinit::{scan_type, PreinitializationInfo},
    Result,
};

pub(crate) const NAMESPACE: &str = "Test";

/// Types and bodies of one test.
pub(crate) struct Fixture {
    pub(crate) types: TypeSystem,
    pub(crate) bodies: InMemoryMethodBodies,
}

impl Fixture {
    pub(crate) fn new() -> Self {
        Self::with_pointer_size(PointerSize::Bit64)
    }

    pub(crate) fn with_pointer_size(pointer_size: PointerSize) -> Self {
        let types = TypeSystem::new(pointer_size);
        let bodies = InMemoryMethodBodies::new(&types);
        Fixture { types, bodies }
    }

    pub(crate) fn known(&self, known: WellKnownType) -> TypeId {
        self.types.well_known(known)
    }

    pub(crate) fn int32(&self) -> TypeId {
        self.known(WellKnownType::Int32)
    }

    pub(crate) fn class(&self, name: &str) -> TypeId {
        self.types.define_class(NAMESPACE, name)
    }

    pub(crate) fn structure(&self, name: &str) -> TypeId {
        self.types.define_struct(NAMESPACE, name)
    }

    pub(crate) fn static_field(&self, owner: TypeId, name: &str, ty: TypeId) -> FieldId {
        self.types
            .add_field(owner, name, ty, FieldAttributes::STATIC)
            .unwrap()
    }

    pub(crate) fn readonly_field(&self, owner: TypeId, name: &str, ty: TypeId) -> FieldId {
        self.types
            .add_field(owner, name, ty, FieldAttributes::STATIC | FieldAttributes::INIT_ONLY)
            .unwrap()
    }

    pub(crate) fn instance_field(&self, owner: TypeId, name: &str, ty: TypeId) -> FieldId {
        self.types
            .add_field(owner, name, ty, FieldAttributes::empty())
            .unwrap()
    }

    /// Registers the body of `method`.
    pub(crate) fn body<F>(&self, method: MethodId, build: F) -> Result<()>
    where
        F: FnOnce(&mut MethodBodyBuilder<'_>) -> Result<()>,
    {
        let mut builder = MethodBodyBuilder::new(&self.types);
        build(&mut builder)?;
        self.bodies.insert(method, builder.build()?);
        Ok(())
    }

    /// Declares the static constructor of `ty` with the given body.
    pub(crate) fn cctor<F>(&self, ty: TypeId, build: F) -> Result<MethodId>
    where
        F: FnOnce(&mut MethodBodyBuilder<'_>) -> Result<()>,
    {
        let cctor = self.types.add_static_constructor(ty)?;
        self.body(cctor, build)?;
        Ok(cctor)
    }

    /// Declares a parameterless instance constructor that chains to `System.Object`.
    pub(crate) fn default_ctor(&self, ty: TypeId) -> Result<MethodId> {
        let ctor = self.types.add_constructor(ty, Vec::new());
        if self.types.is_value_type(ty) {
            self.body(ctor, |b| {
                b.op("ret")?;
                Ok(())
            })?;
        } else {
            let object = self.known(WellKnownType::Object);
            let base = self
                .types
                .find_method_by_name(object, ".ctor")
                .ok_or_else(|| crate::Error::TypeSystem("Object has no .ctor".to_string()))?;
            self.body(ctor, |b| {
                b.op("ldarg.0")?.call("call", base)?.op("ret")?;
                Ok(())
            })?;
        }
        Ok(ctor)
    }

    pub(crate) fn context(&self) -> PreinitContext<'_> {
        PreinitContext::new(&self.types, &self.bodies)
    }

    pub(crate) fn scan(&self, ty: TypeId) -> PreinitializationInfo {
        scan_type(&self.context(), ty)
    }
}
