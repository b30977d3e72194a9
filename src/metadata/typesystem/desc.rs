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

//! Type, field and method descriptors stored inside a [`super::TypeSystem`].

use std::sync::{Arc, OnceLock, RwLock};

use crate::metadata::typesystem::{
    FieldAttributes, FieldId, GenericParameterKind, MethodAttributes, MethodId, MethodSignature,
    TypeAttributes, TypeCategory, TypeId,
};

/// Running layout of a type, updated as fields are added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TypeLayout {
    /// End of the last instance field. Includes the method table pointer for classes.
    pub instance_end: usize,
    /// Largest field alignment seen
    pub alignment: usize,
    /// Bytes of non-GC static storage
    pub static_size: usize,
}

/// A type known to the type system.
///
/// Every definition, instantiation and constructed type (array, byref, pointer,
/// function pointer, generic parameter) gets its own descriptor.
#[derive(Debug)]
pub struct TypeDesc {
    /// Own handle
    pub id: TypeId,
    /// Namespace, empty for constructed types
    pub namespace: String,
    /// Simple name
    pub name: String,
    /// Coarse category
    pub category: TypeCategory,
    /// Attribute flags
    pub attributes: TypeAttributes,
    /// Base type, `None` for `System.Object`, interfaces and constructed types
    pub base: Option<TypeId>,
    /// Element of arrays, byrefs and pointers, or the underlying type of an enum
    pub element: Option<TypeId>,
    /// Generic definition this type instantiates
    pub definition: Option<TypeId>,
    /// Generic arguments of an instantiation
    pub instantiation: Vec<TypeId>,
    /// Number of generic parameters of a definition
    pub generic_arity: usize,
    /// Parameter position, for generic parameters
    pub generic_parameter: Option<(GenericParameterKind, u32)>,
    /// Signature, for function pointer types
    pub signature: Option<MethodSignature>,
    pub(crate) fields: boxcar::Vec<FieldId>,
    pub(crate) methods: boxcar::Vec<MethodId>,
    pub(crate) layout: RwLock<TypeLayout>,
    pub(crate) static_constructor: OnceLock<MethodId>,
    pub(crate) finalizer: OnceLock<MethodId>,
}

impl TypeDesc {
    pub(crate) fn new(id: TypeId, namespace: &str, name: &str, category: TypeCategory) -> Self {
        TypeDesc {
            id,
            namespace: namespace.to_string(),
            name: name.to_string(),
            category,
            attributes: TypeAttributes::empty(),
            base: None,
            element: None,
            definition: None,
            instantiation: Vec::new(),
            generic_arity: 0,
            generic_parameter: None,
            signature: None,
            fields: boxcar::Vec::new(),
            methods: boxcar::Vec::new(),
            layout: RwLock::new(TypeLayout {
                instance_end: 0,
                alignment: 1,
                static_size: 0,
            }),
            static_constructor: OnceLock::new(),
            finalizer: OnceLock::new(),
        }
    }

    /// Fields in definition order.
    pub fn fields(&self) -> impl Iterator<Item = FieldId> + '_ {
        self.fields.iter().map(|(_, id)| *id)
    }

    /// Methods in definition order.
    pub fn methods(&self) -> impl Iterator<Item = MethodId> + '_ {
        self.methods.iter().map(|(_, id)| *id)
    }

    /// Current layout snapshot.
    #[must_use]
    pub fn layout(&self) -> TypeLayout {
        *read_lock!(self.layout)
    }

    /// The type initializer, if one was defined.
    #[must_use]
    pub fn static_constructor(&self) -> Option<MethodId> {
        self.static_constructor.get().copied()
    }

    /// The finalizer, if one was defined on this exact type.
    #[must_use]
    pub fn finalizer(&self) -> Option<MethodId> {
        self.finalizer.get().copied()
    }

    /// True for open generic definitions.
    #[must_use]
    pub fn is_generic_definition(&self) -> bool {
        self.generic_arity > 0 && self.definition.is_none()
    }

    /// `Namespace.Name`, or just `Name` without a namespace.
    #[must_use]
    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }
}

/// A field of a type.
#[derive(Debug)]
pub struct FieldDesc {
    /// Own handle
    pub id: FieldId,
    /// Declaring type
    pub owner: TypeId,
    /// Field name
    pub name: String,
    /// Declared type
    pub field_type: TypeId,
    /// Attribute flags
    pub attributes: FieldAttributes,
    /// Byte offset: instance offset for instance fields, static region offset for statics
    pub offset: usize,
    /// Field on the generic definition, for fields of instantiated types
    pub definition: Option<FieldId>,
    pub(crate) rva_data: OnceLock<Arc<[u8]>>,
}

impl FieldDesc {
    /// True for static fields.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.attributes.contains(FieldAttributes::STATIC)
    }

    /// True for `readonly`/`initonly` fields.
    #[must_use]
    pub fn is_init_only(&self) -> bool {
        self.attributes.contains(FieldAttributes::INIT_ONLY)
    }

    /// True for thread-static fields.
    #[must_use]
    pub fn is_thread_static(&self) -> bool {
        self.attributes.contains(FieldAttributes::THREAD_STATIC)
    }

    /// True for literal (constant) fields.
    #[must_use]
    pub fn is_literal(&self) -> bool {
        self.attributes.contains(FieldAttributes::LITERAL)
    }

    /// True for fields whose initial value is mapped from image data.
    #[must_use]
    pub fn has_rva(&self) -> bool {
        self.attributes.contains(FieldAttributes::HAS_FIELD_RVA)
    }

    /// Mapped initial data for RVA statics.
    #[must_use]
    pub fn rva_data(&self) -> Option<&Arc<[u8]>> {
        self.rva_data.get()
    }
}

/// A method of a type.
#[derive(Debug)]
pub struct MethodDesc {
    /// Own handle
    pub id: MethodId,
    /// Declaring type
    pub owner: TypeId,
    /// Method name
    pub name: String,
    /// Signature after substitution of generic arguments
    pub signature: MethodSignature,
    /// Attribute flags
    pub attributes: MethodAttributes,
    /// Number of method generic parameters of a definition
    pub generic_arity: usize,
    /// Method generic arguments of an instantiation
    pub instantiation: Vec<TypeId>,
    /// Generic or uninstantiated-owner definition this method was derived from
    pub definition: Option<MethodId>,
}

impl MethodDesc {
    /// True for static methods.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.attributes.contains(MethodAttributes::STATIC)
    }

    /// True for virtual methods.
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        self.attributes.contains(MethodAttributes::VIRTUAL)
    }

    /// True for abstract methods.
    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.attributes.contains(MethodAttributes::ABSTRACT)
    }

    /// True for compiler intrinsics.
    #[must_use]
    pub fn is_intrinsic(&self) -> bool {
        self.attributes.contains(MethodAttributes::INTRINSIC)
    }

    /// True for instance constructors.
    #[must_use]
    pub fn is_constructor(&self) -> bool {
        self.name == ".ctor" && !self.is_static()
    }

    /// Number of stack slots the call consumes, including `this`.
    #[must_use]
    pub fn argument_count(&self) -> usize {
        self.signature.parameters.len() + usize::from(self.signature.has_this)
    }
}
