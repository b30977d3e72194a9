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

//! The [`TypeSystem`] registry and its builder operations.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, OnceLock, RwLock},
};

use dashmap::{mapref::entry::Entry, DashMap};
use strum::IntoEnumIterator;

use crate::{
    metadata::typesystem::{
        desc::{FieldDesc, MethodDesc, TypeDesc, TypeLayout},
        wellknown, FieldAttributes, FieldId, GenericParameterKind, MethodAttributes, MethodId,
        MethodSignature, PointerSize, TargetDetails, TypeAttributes, TypeCategory, TypeId,
        TypeKind, WellKnownType,
    },
    Error, Result,
};

/// Structural identity of a constructed type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ConstructedKey {
    Array(TypeId),
    ByRef(TypeId),
    Pointer(TypeId),
    FunctionPointer(MethodSignature),
    GenericParameter(GenericParameterKind, u32),
    Instantiation(TypeId, Vec<TypeId>),
}

/// Registry of all types, fields and methods visible to the preinitializer.
///
/// Descriptors are never removed. Handles obtained from one registry must not be used
/// with another.
///
/// Fields of a type must be added before the type is used as a base type, as a field of
/// another value type, or as a generic definition being instantiated: layouts are
/// computed from what is known at that moment.
pub struct TypeSystem {
    target: TargetDetails,
    types: boxcar::Vec<TypeDesc>,
    fields: boxcar::Vec<FieldDesc>,
    methods: boxcar::Vec<MethodDesc>,
    /// Serializes arena pushes so a descriptor can carry its own handle
    push_lock: Mutex<()>,
    constructed: DashMap<ConstructedKey, TypeId>,
    method_instantiations: DashMap<(MethodId, Vec<TypeId>), MethodId>,
    by_name: DashMap<String, TypeId>,
    well_known: Vec<TypeId>,
    well_known_by_id: HashMap<TypeId, WellKnownType>,
}

impl TypeSystem {
    /// Creates a type system for a target with the given pointer size, seeded with the
    /// core library types.
    #[must_use]
    pub fn new(pointer_size: PointerSize) -> Self {
        Self::with_target(TargetDetails::new(pointer_size))
    }

    /// Creates a type system for the given target details.
    ///
    /// # Panics
    ///
    /// Panics if seeding the core library fails, which indicates a bug in the seed itself.
    #[must_use]
    pub fn with_target(target: TargetDetails) -> Self {
        let mut types = TypeSystem {
            target,
            types: boxcar::Vec::new(),
            fields: boxcar::Vec::new(),
            methods: boxcar::Vec::new(),
            push_lock: Mutex::new(()),
            constructed: DashMap::new(),
            method_instantiations: DashMap::new(),
            by_name: DashMap::new(),
            well_known: Vec::new(),
            well_known_by_id: HashMap::new(),
        };

        let map = wellknown::seed(&types).expect("core library seed is well-formed");
        types.well_known = WellKnownType::iter().map(|known| map[&known]).collect();
        types.well_known_by_id = map.into_iter().map(|(known, id)| (id, known)).collect();
        types
    }

    /// Target details this type system lays types out for.
    #[must_use]
    pub fn target(&self) -> TargetDetails {
        self.target
    }

    /// Native pointer width in bytes.
    #[must_use]
    pub fn pointer_size(&self) -> usize {
        self.target.pointer_size.bytes()
    }

    /// Handle of a seeded core library type.
    #[must_use]
    pub fn well_known(&self, known: WellKnownType) -> TypeId {
        self.well_known[known as usize]
    }

    /// Identifies a seeded core library type.
    #[must_use]
    pub fn as_well_known(&self, ty: TypeId) -> Option<WellKnownType> {
        self.well_known_by_id.get(&ty).copied()
    }

    /// True if `ty` is the given core library type, or an instantiation of it.
    #[must_use]
    pub fn is_well_known(&self, ty: TypeId, known: WellKnownType) -> bool {
        let definition = self.type_desc(ty).definition.unwrap_or(ty);
        self.as_well_known(definition) == Some(known)
    }

    /// Looks up a type definition by its full name.
    #[must_use]
    pub fn find_type(&self, full_name: &str) -> Option<TypeId> {
        self.by_name.get(full_name).map(|entry| *entry)
    }

    /// Descriptor of a type.
    #[must_use]
    pub fn type_desc(&self, ty: TypeId) -> &TypeDesc {
        &self.types[ty.index()]
    }

    /// Descriptor of a field.
    #[must_use]
    pub fn field(&self, field: FieldId) -> &FieldDesc {
        &self.fields[field.index()]
    }

    /// Descriptor of a method.
    #[must_use]
    pub fn method(&self, method: MethodId) -> &MethodDesc {
        &self.methods[method.index()]
    }

    /// Number of types, including constructed ones.
    #[must_use]
    pub fn type_count(&self) -> usize {
        self.types.count()
    }

    // ====================================================================================
    // Definitions
    // ====================================================================================

    fn push_type(&self, mut desc: TypeDesc) -> TypeId {
        desc.layout = RwLock::new(initial_layout(&desc, self));
        let _guard = self.push_lock.lock().expect("push lock poisoned");
        let id = TypeId::new(self.types.count());
        desc.id = id;
        self.types.push(desc);
        id
    }

    pub(super) fn create_definition(
        &self,
        namespace: &str,
        name: &str,
        category: TypeCategory,
        base: Option<TypeId>,
        attributes: TypeAttributes,
        generic_arity: usize,
    ) -> TypeId {
        let mut desc = TypeDesc::new(TypeId::new(0), namespace, name, category);
        desc.base = base;
        desc.attributes = attributes;
        desc.generic_arity = generic_arity;
        let id = self.push_type(desc);
        self.by_name.insert(self.type_desc(id).full_name(), id);
        id
    }

    /// Defines a new type.
    ///
    /// Structs are sequential and sealed. Delegates derive from `System.MulticastDelegate`
    /// and receive the standard `.ctor(object, native int)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeSystem`] if a class base is not a class, or an enum's underlying
    /// type is not an integer primitive.
    pub fn define_type(
        &self,
        namespace: &str,
        name: &str,
        kind: TypeKind,
        attributes: TypeAttributes,
    ) -> Result<TypeId> {
        self.define_generic_type(namespace, name, kind, attributes, 0)
    }

    /// Defines a generic type definition with `arity` type parameters.
    ///
    /// Fields referring to the parameters use [`TypeSystem::generic_parameter`].
    ///
    /// # Errors
    ///
    /// Same as [`TypeSystem::define_type`].
    pub fn define_generic_type(
        &self,
        namespace: &str,
        name: &str,
        kind: TypeKind,
        attributes: TypeAttributes,
        arity: usize,
    ) -> Result<TypeId> {
        match kind {
            TypeKind::Class(base) => {
                let base = base.unwrap_or_else(|| self.well_known(WellKnownType::Object));
                if self.category(base) != TypeCategory::Class {
                    return Err(Error::TypeSystem(format!(
                        "base of {namespace}.{name} must be a class, got {}",
                        self.type_name(base)
                    )));
                }
                Ok(self.create_definition(
                    namespace,
                    name,
                    TypeCategory::Class,
                    Some(base),
                    attributes,
                    arity,
                ))
            }
            TypeKind::Struct => Ok(self.create_definition(
                namespace,
                name,
                TypeCategory::ValueType,
                Some(self.well_known(WellKnownType::ValueType)),
                attributes | TypeAttributes::SEQUENTIAL_LAYOUT | TypeAttributes::SEALED,
                arity,
            )),
            TypeKind::Enum(underlying) => {
                let category = self.category(underlying);
                let integral = category.is_primitive()
                    && !matches!(
                        category,
                        TypeCategory::Single | TypeCategory::Double | TypeCategory::Boolean
                    );
                if !integral || self.is_enum(underlying) {
                    return Err(Error::TypeSystem(format!(
                        "enum {namespace}.{name} needs an integer underlying type"
                    )));
                }
                let mut desc = TypeDesc::new(TypeId::new(0), namespace, name, category);
                desc.base = Some(self.well_known(WellKnownType::Enum));
                desc.attributes = attributes | TypeAttributes::SEALED;
                desc.element = Some(underlying);
                desc.generic_arity = arity;
                let id = self.push_type(desc);
                self.by_name.insert(self.type_desc(id).full_name(), id);
                Ok(id)
            }
            TypeKind::Interface => Ok(self.create_definition(
                namespace,
                name,
                TypeCategory::Interface,
                None,
                attributes | TypeAttributes::ABSTRACT,
                arity,
            )),
            TypeKind::Delegate => {
                let id = self.create_definition(
                    namespace,
                    name,
                    TypeCategory::Class,
                    Some(self.well_known(WellKnownType::MulticastDelegate)),
                    attributes | TypeAttributes::SEALED,
                    arity,
                );
                let object = self.well_known(WellKnownType::Object);
                let native_int = self.well_known(WellKnownType::IntPtr);
                self.add_constructor(id, vec![object, native_int]);
                Ok(id)
            }
        }
    }

    /// Defines a class deriving from `System.Object`.
    pub fn define_class(&self, namespace: &str, name: &str) -> TypeId {
        self.create_definition(
            namespace,
            name,
            TypeCategory::Class,
            Some(self.well_known(WellKnownType::Object)),
            TypeAttributes::empty(),
            0,
        )
    }

    /// Defines a sequential struct.
    pub fn define_struct(&self, namespace: &str, name: &str) -> TypeId {
        self.create_definition(
            namespace,
            name,
            TypeCategory::ValueType,
            Some(self.well_known(WellKnownType::ValueType)),
            TypeAttributes::SEQUENTIAL_LAYOUT | TypeAttributes::SEALED,
            0,
        )
    }

    // ====================================================================================
    // Members
    // ====================================================================================

    /// Adds a field, laying it out after the fields already present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeSystem`] for instance fields on types that cannot carry them
    /// (interfaces, enums, primitives, constructed types), for a value type containing
    /// itself, and for literal fields that are not static.
    pub fn add_field(
        &self,
        owner: TypeId,
        name: &str,
        field_type: TypeId,
        attributes: FieldAttributes,
    ) -> Result<FieldId> {
        self.add_field_with_definition(owner, name, field_type, attributes, None)
    }

    fn add_field_with_definition(
        &self,
        owner: TypeId,
        name: &str,
        field_type: TypeId,
        attributes: FieldAttributes,
        definition: Option<FieldId>,
    ) -> Result<FieldId> {
        let owner_desc = self.type_desc(owner);
        let is_static = attributes.contains(FieldAttributes::STATIC);

        if attributes.contains(FieldAttributes::LITERAL) && !is_static {
            return Err(Error::TypeSystem(format!(
                "literal field {name} on {} must be static",
                self.type_name(owner)
            )));
        }
        if !is_static {
            let can_hold = matches!(
                owner_desc.category,
                TypeCategory::Class | TypeCategory::ValueType | TypeCategory::Nullable
            );
            if !can_hold {
                return Err(Error::TypeSystem(format!(
                    "{} cannot declare instance field {name}",
                    self.type_name(owner)
                )));
            }
            if field_type == owner && self.is_value_type(owner) {
                return Err(Error::TypeSystem(format!(
                    "value type {} cannot contain itself",
                    self.type_name(owner)
                )));
            }
        }

        // Sizing reads other layouts, so it must happen before the owner's lock is taken.
        let (size, alignment) = self.field_size_and_alignment(field_type);
        let offset = {
            let mut layout = write_lock!(owner_desc.layout);
            if is_static {
                let offset = align_up(layout.static_size, alignment);
                layout.static_size = offset + size;
                offset
            } else {
                let offset = align_up(layout.instance_end, alignment);
                layout.instance_end = offset + size;
                layout.alignment = layout.alignment.max(alignment);
                offset
            }
        };

        let id = {
            let _guard = self.push_lock.lock().expect("push lock poisoned");
            let id = FieldId::new(self.fields.count());
            self.fields.push(FieldDesc {
                id,
                owner,
                name: name.to_string(),
                field_type,
                attributes,
                offset,
                definition,
                rva_data: OnceLock::new(),
            });
            id
        };
        owner_desc.fields.push(id);
        Ok(id)
    }

    /// Attaches mapped image data to a static field marked [`FieldAttributes::HAS_FIELD_RVA`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeSystem`] if the field is not an RVA static or already has data.
    pub fn set_rva_data(&self, field: FieldId, data: &[u8]) -> Result<()> {
        let desc = self.field(field);
        if !desc.is_static() || !desc.has_rva() {
            return Err(Error::TypeSystem(format!(
                "{} is not an RVA static",
                self.field_name(field)
            )));
        }
        desc.rva_data
            .set(Arc::from(data))
            .map_err(|_| Error::TypeSystem(format!("{} already has data", self.field_name(field))))
    }

    /// Adds a method.
    pub fn add_method(
        &self,
        owner: TypeId,
        name: &str,
        signature: MethodSignature,
        attributes: MethodAttributes,
    ) -> MethodId {
        self.add_generic_method(owner, name, signature, attributes, 0)
    }

    /// Adds a generic method definition with `arity` method type parameters.
    pub fn add_generic_method(
        &self,
        owner: TypeId,
        name: &str,
        signature: MethodSignature,
        attributes: MethodAttributes,
        arity: usize,
    ) -> MethodId {
        self.push_method(MethodDesc {
            id: MethodId::new(0),
            owner,
            name: name.to_string(),
            signature,
            attributes,
            generic_arity: arity,
            instantiation: Vec::new(),
            definition: None,
        })
    }

    fn push_method(&self, mut desc: MethodDesc) -> MethodId {
        let owner = desc.owner;
        let id = {
            let _guard = self.push_lock.lock().expect("push lock poisoned");
            let id = MethodId::new(self.methods.count());
            desc.id = id;
            self.methods.push(desc);
            id
        };
        let method = self.method(id);
        if method.instantiation.is_empty() {
            let owner_desc = self.type_desc(owner);
            owner_desc.methods.push(id);
            if method.name == ".cctor" && method.is_static() {
                let _ = owner_desc.static_constructor.set(id);
            } else if method.name == "Finalize" && method.is_virtual() {
                let _ = owner_desc.finalizer.set(id);
            }
        }
        id
    }

    /// Adds the type initializer (`.cctor`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeSystem`] if the type already has one.
    pub fn add_static_constructor(&self, owner: TypeId) -> Result<MethodId> {
        if self.type_desc(owner).static_constructor().is_some() {
            return Err(Error::TypeSystem(format!(
                "{} already has a static constructor",
                self.type_name(owner)
            )));
        }
        Ok(self.add_method(
            owner,
            ".cctor",
            MethodSignature::new_static(Vec::new(), self.well_known(WellKnownType::Void)),
            MethodAttributes::STATIC
                | MethodAttributes::SPECIAL_NAME
                | MethodAttributes::RT_SPECIAL_NAME,
        ))
    }

    /// Adds an instance constructor with the given parameters.
    pub fn add_constructor(&self, owner: TypeId, parameters: Vec<TypeId>) -> MethodId {
        self.add_method(
            owner,
            ".ctor",
            MethodSignature::new_instance(parameters, self.well_known(WellKnownType::Void)),
            MethodAttributes::SPECIAL_NAME | MethodAttributes::RT_SPECIAL_NAME,
        )
    }

    /// Adds a finalizer override.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeSystem`] if the type is not a class or already has one.
    pub fn add_finalizer(&self, owner: TypeId) -> Result<MethodId> {
        let desc = self.type_desc(owner);
        if desc.category != TypeCategory::Class || desc.finalizer().is_some() {
            return Err(Error::TypeSystem(format!(
                "cannot add a finalizer to {}",
                self.type_name(owner)
            )));
        }
        Ok(self.add_method(
            owner,
            "Finalize",
            MethodSignature::new_instance(Vec::new(), self.well_known(WellKnownType::Void)),
            MethodAttributes::VIRTUAL,
        ))
    }

    /// Finds a method by name and signature on `ty` or its base types.
    #[must_use]
    pub fn find_method(
        &self,
        ty: TypeId,
        name: &str,
        signature: &MethodSignature,
    ) -> Option<MethodId> {
        let mut current = Some(ty);
        while let Some(candidate) = current {
            let desc = self.type_desc(candidate);
            let found = desc.methods().find(|&method| {
                let method = self.method(method);
                method.name == name && method.signature == *signature
            });
            if found.is_some() {
                return found;
            }
            current = desc.base;
        }
        None
    }

    /// Finds the first method with the given name declared directly on `ty`.
    #[must_use]
    pub fn find_method_by_name(&self, ty: TypeId, name: &str) -> Option<MethodId> {
        self.type_desc(ty)
            .methods()
            .find(|&method| self.method(method).name == name)
    }

    /// Finds an own field by name.
    #[must_use]
    pub fn find_field(&self, ty: TypeId, name: &str) -> Option<FieldId> {
        self.type_desc(ty)
            .fields()
            .find(|&field| self.field(field).name == name)
    }

    /// The definition a method was derived from by instantiation, or itself.
    #[must_use]
    pub fn typical_method_definition(&self, method: MethodId) -> MethodId {
        let mut current = method;
        while let Some(definition) = self.method(current).definition {
            current = definition;
        }
        current
    }

    // ====================================================================================
    // Constructed types
    // ====================================================================================

    fn memoized(&self, key: ConstructedKey, build: impl FnOnce() -> TypeDesc) -> TypeId {
        if let Some(existing) = self.constructed.get(&key) {
            return *existing;
        }
        let id = self.push_type(build());
        match self.constructed.entry(key) {
            Entry::Occupied(entry) => *entry.get(),
            Entry::Vacant(entry) => *entry.insert(id),
        }
    }

    /// Single-dimensional zero-based array of `element`.
    pub fn make_array_type(&self, element: TypeId) -> TypeId {
        let base = self.find_type("System.Array");
        self.memoized(ConstructedKey::Array(element), || {
            let name = format!("{}[]", self.type_name(element));
            let mut desc = TypeDesc::new(TypeId::new(0), "", &name, TypeCategory::Array);
            desc.base = base;
            desc.element = Some(element);
            desc
        })
    }

    /// Managed pointer to `element`.
    pub fn make_byref_type(&self, element: TypeId) -> TypeId {
        self.memoized(ConstructedKey::ByRef(element), || {
            let name = format!("{}&", self.type_name(element));
            let mut desc = TypeDesc::new(TypeId::new(0), "", &name, TypeCategory::ByRef);
            desc.element = Some(element);
            desc
        })
    }

    /// Unmanaged pointer to `element`.
    pub fn make_pointer_type(&self, element: TypeId) -> TypeId {
        self.memoized(ConstructedKey::Pointer(element), || {
            let name = format!("{}*", self.type_name(element));
            let mut desc = TypeDesc::new(TypeId::new(0), "", &name, TypeCategory::Pointer);
            desc.element = Some(element);
            desc
        })
    }

    /// Function pointer with the given signature.
    pub fn make_function_pointer_type(&self, signature: MethodSignature) -> TypeId {
        self.memoized(ConstructedKey::FunctionPointer(signature.clone()), || {
            let parameters: Vec<String> = signature
                .parameters
                .iter()
                .map(|&parameter| self.type_name(parameter))
                .collect();
            let name = format!(
                "method {} *({})",
                self.type_name(signature.return_type),
                parameters.join(",")
            );
            let mut desc =
                TypeDesc::new(TypeId::new(0), "", &name, TypeCategory::FunctionPointer);
            desc.signature = Some(signature);
            desc
        })
    }

    /// Type (`!n`) or method (`!!n`) generic parameter at position `index`.
    pub fn generic_parameter(&self, kind: GenericParameterKind, index: u32) -> TypeId {
        self.memoized(ConstructedKey::GenericParameter(kind, index), || {
            let name = match kind {
                GenericParameterKind::Type => format!("!{index}"),
                GenericParameterKind::Method => format!("!!{index}"),
            };
            let mut desc =
                TypeDesc::new(TypeId::new(0), "", &name, TypeCategory::GenericParameter);
            desc.generic_parameter = Some((kind, index));
            desc
        })
    }

    /// Instantiates a generic type definition.
    ///
    /// Fields and methods of the definition are copied with their types substituted, so the
    /// instantiation gets its own layout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeSystem`] if `definition` is not a generic definition or the
    /// argument count does not match its arity.
    pub fn instantiate_type(&self, definition: TypeId, arguments: &[TypeId]) -> Result<TypeId> {
        let def = self.type_desc(definition);
        if !def.is_generic_definition() || def.generic_arity != arguments.len() {
            return Err(Error::TypeSystem(format!(
                "cannot instantiate {} over {} arguments",
                self.type_name(definition),
                arguments.len()
            )));
        }

        let key = ConstructedKey::Instantiation(definition, arguments.to_vec());
        if let Some(existing) = self.constructed.get(&key) {
            return Ok(*existing);
        }

        let base = match def.base {
            Some(base) => Some(self.substitute(base, arguments, &[])?),
            None => None,
        };
        let mut desc = TypeDesc::new(TypeId::new(0), &def.namespace, &def.name, def.category);
        desc.base = base;
        desc.attributes = def.attributes;
        desc.element = def.element;
        desc.generic_arity = def.generic_arity;
        desc.definition = Some(definition);
        desc.instantiation = arguments.to_vec();
        let id = self.push_type(desc);

        // Publish before populating so self-referential field types resolve to this handle.
        match self.constructed.entry(key) {
            Entry::Occupied(entry) => return Ok(*entry.get()),
            Entry::Vacant(entry) => {
                entry.insert(id);
            }
        }

        for field in def.fields() {
            let field = self.field(field);
            let field_type = self.substitute(field.field_type, arguments, &[])?;
            let new_field =
                self.add_field_with_definition(id, &field.name, field_type, field.attributes, Some(field.id))?;
            if let Some(data) = field.rva_data() {
                let _ = self.field(new_field).rva_data.set(data.clone());
            }
        }
        for method in def.methods() {
            let method = self.method(method);
            let signature = self.substitute_signature(&method.signature, arguments, &[])?;
            self.push_method(MethodDesc {
                id: MethodId::new(0),
                owner: id,
                name: method.name.clone(),
                signature,
                attributes: method.attributes,
                generic_arity: method.generic_arity,
                instantiation: Vec::new(),
                definition: Some(method.id),
            });
        }

        Ok(id)
    }

    /// Instantiates a generic method definition.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeSystem`] if the arity does not match.
    pub fn instantiate_method(&self, definition: MethodId, arguments: &[TypeId]) -> Result<MethodId> {
        let def = self.method(definition);
        if def.generic_arity == 0 || def.generic_arity != arguments.len() || !def.instantiation.is_empty() {
            return Err(Error::TypeSystem(format!(
                "cannot instantiate {} over {} arguments",
                self.method_name(definition),
                arguments.len()
            )));
        }

        let key = (definition, arguments.to_vec());
        if let Some(existing) = self.method_instantiations.get(&key) {
            return Ok(*existing);
        }

        let type_arguments = self.type_desc(def.owner).instantiation.clone();
        let signature = self.substitute_signature(&def.signature, &type_arguments, arguments)?;
        let id = self.push_method(MethodDesc {
            id: MethodId::new(0),
            owner: def.owner,
            name: def.name.clone(),
            signature,
            attributes: def.attributes,
            generic_arity: def.generic_arity,
            instantiation: arguments.to_vec(),
            definition: Some(definition),
        });
        Ok(*self.method_instantiations.entry(key).or_insert(id))
    }

    /// Replaces generic parameters inside `ty` with the given arguments.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeSystem`] if a parameter index has no argument.
    pub fn substitute(
        &self,
        ty: TypeId,
        type_arguments: &[TypeId],
        method_arguments: &[TypeId],
    ) -> Result<TypeId> {
        let desc = self.type_desc(ty);
        if let Some((kind, index)) = desc.generic_parameter {
            let arguments = match kind {
                GenericParameterKind::Type => type_arguments,
                GenericParameterKind::Method => method_arguments,
            };
            if arguments.is_empty() {
                return Ok(ty);
            }
            return arguments.get(index as usize).copied().ok_or_else(|| {
                Error::TypeSystem(format!("no argument for generic parameter {}", desc.name))
            });
        }

        match desc.category {
            TypeCategory::Array | TypeCategory::ByRef | TypeCategory::Pointer => {
                let Some(element) = desc.element else {
                    return Ok(ty);
                };
                let element = self.substitute(element, type_arguments, method_arguments)?;
                Ok(match desc.category {
                    TypeCategory::Array => self.make_array_type(element),
                    TypeCategory::ByRef => self.make_byref_type(element),
                    _ => self.make_pointer_type(element),
                })
            }
            TypeCategory::FunctionPointer => match &desc.signature {
                Some(signature) => {
                    let signature =
                        self.substitute_signature(signature, type_arguments, method_arguments)?;
                    Ok(self.make_function_pointer_type(signature))
                }
                None => Ok(ty),
            },
            _ => match desc.definition {
                Some(definition) if !desc.instantiation.is_empty() => {
                    let arguments = desc
                        .instantiation
                        .iter()
                        .map(|&argument| self.substitute(argument, type_arguments, method_arguments))
                        .collect::<Result<Vec<_>>>()?;
                    if arguments == desc.instantiation {
                        Ok(ty)
                    } else {
                        self.instantiate_type(definition, &arguments)
                    }
                }
                _ => Ok(ty),
            },
        }
    }

    fn substitute_signature(
        &self,
        signature: &MethodSignature,
        type_arguments: &[TypeId],
        method_arguments: &[TypeId],
    ) -> Result<MethodSignature> {
        Ok(MethodSignature {
            has_this: signature.has_this,
            parameters: signature
                .parameters
                .iter()
                .map(|&parameter| self.substitute(parameter, type_arguments, method_arguments))
                .collect::<Result<Vec<_>>>()?,
            return_type: self.substitute(signature.return_type, type_arguments, method_arguments)?,
        })
    }
}

/// Rounds `value` up to a multiple of `alignment`.
pub(crate) fn align_up(value: usize, alignment: usize) -> usize {
    if alignment <= 1 {
        value
    } else {
        value.div_ceil(alignment) * alignment
    }
}

fn initial_layout(desc: &TypeDesc, types: &TypeSystem) -> TypeLayout {
    let pointer = types.pointer_size();
    let mut layout = TypeLayout {
        instance_end: 0,
        alignment: 1,
        static_size: 0,
    };
    if let Some(size) = desc.category.primitive_size() {
        layout.instance_end = size;
        layout.alignment = size;
    } else if matches!(desc.category, TypeCategory::IntPtr | TypeCategory::UIntPtr) {
        layout.instance_end = pointer;
        layout.alignment = pointer;
    } else if desc.category == TypeCategory::Class {
        let base_end = desc
            .base
            .map_or(pointer, |base| types.type_desc(base).layout().instance_end);
        layout.instance_end = base_end.max(pointer);
    }
    layout
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_layout_includes_method_table() {
        let types = TypeSystem::new(PointerSize::Bit64);
        let class = types.define_class("Test", "Holder");
        let int32 = types.well_known(WellKnownType::Int32);
        let int64 = types.well_known(WellKnownType::Int64);

        let a = types.add_field(class, "A", int32, FieldAttributes::empty()).unwrap();
        let b = types.add_field(class, "B", int64, FieldAttributes::empty()).unwrap();

        assert_eq!(types.field(a).offset, 8);
        assert_eq!(types.field(b).offset, 16);
        assert_eq!(types.instance_byte_count(class), 24);
    }

    #[test]
    fn test_struct_layout_is_aligned() {
        let types = TypeSystem::new(PointerSize::Bit32);
        let point = types.define_struct("Test", "Point");
        let byte = types.well_known(WellKnownType::Byte);
        let int32 = types.well_known(WellKnownType::Int32);

        types.add_field(point, "Tag", byte, FieldAttributes::empty()).unwrap();
        let value = types.add_field(point, "Value", int32, FieldAttributes::empty()).unwrap();

        assert_eq!(types.field(value).offset, 4);
        assert_eq!(types.instance_byte_count(point), 8);
        assert_eq!(types.element_size(point), 8);
    }

    #[test]
    fn test_empty_struct_has_size_one() {
        let types = TypeSystem::new(PointerSize::Bit64);
        let empty = types.define_struct("Test", "Empty");
        assert_eq!(types.instance_byte_count(empty), 1);
    }

    #[test]
    fn test_derived_class_continues_base_layout() {
        let types = TypeSystem::new(PointerSize::Bit64);
        let int32 = types.well_known(WellKnownType::Int32);
        let base = types.define_class("Test", "Base");
        types.add_field(base, "A", int32, FieldAttributes::empty()).unwrap();
        let derived = types
            .define_type("Test", "Derived", TypeKind::Class(Some(base)), TypeAttributes::empty())
            .unwrap();
        let b = types.add_field(derived, "B", int32, FieldAttributes::empty()).unwrap();
        assert_eq!(types.field(b).offset, 12);
    }

    #[test]
    fn test_statics_use_separate_region() {
        let types = TypeSystem::new(PointerSize::Bit64);
        let class = types.define_class("Test", "Statics");
        let int32 = types.well_known(WellKnownType::Int32);
        let a = types.add_field(class, "A", int32, FieldAttributes::STATIC).unwrap();
        let b = types.add_field(class, "B", int32, FieldAttributes::STATIC).unwrap();
        assert_eq!(types.field(a).offset, 0);
        assert_eq!(types.field(b).offset, 4);
        assert_eq!(types.instance_byte_count(class), 8);
    }

    #[test]
    fn test_interface_rejects_instance_fields() {
        let types = TypeSystem::new(PointerSize::Bit64);
        let iface = types
            .define_type("Test", "IThing", TypeKind::Interface, TypeAttributes::empty())
            .unwrap();
        let int32 = types.well_known(WellKnownType::Int32);
        assert!(types.add_field(iface, "X", int32, FieldAttributes::empty()).is_err());
    }

    #[test]
    fn test_enum_reports_underlying_category() {
        let types = TypeSystem::new(PointerSize::Bit64);
        let byte = types.well_known(WellKnownType::Byte);
        let color = types
            .define_type("Test", "Color", TypeKind::Enum(byte), TypeAttributes::empty())
            .unwrap();
        assert_eq!(types.category(color), TypeCategory::Byte);
        assert!(types.is_enum(color));
        assert_eq!(types.element_size(color), 1);

        let double = types.well_known(WellKnownType::Double);
        assert!(types
            .define_type("Test", "Bad", TypeKind::Enum(double), TypeAttributes::empty())
            .is_err());
    }

    #[test]
    fn test_constructed_types_are_memoized() {
        let types = TypeSystem::new(PointerSize::Bit64);
        let int32 = types.well_known(WellKnownType::Int32);
        let first = types.make_array_type(int32);
        let second = types.make_array_type(int32);
        assert_eq!(first, second);
        assert_eq!(types.type_name(first), "System.Int32[]");
        assert_eq!(types.category(first), TypeCategory::Array);
        assert_ne!(types.make_byref_type(int32), types.make_pointer_type(int32));
    }

    #[test]
    fn test_instantiation_substitutes_fields() {
        let types = TypeSystem::new(PointerSize::Bit64);
        let int64 = types.well_known(WellKnownType::Int64);
        let nullable = types.well_known(WellKnownType::Nullable);
        let nullable_long = types.instantiate_type(nullable, &[int64]).unwrap();

        let value = types.find_field(nullable_long, "value").unwrap();
        assert_eq!(types.field(value).field_type, int64);
        assert_eq!(types.field(value).offset, 8);
        assert_eq!(types.instance_byte_count(nullable_long), 16);
        assert_eq!(types.category(nullable_long), TypeCategory::Nullable);
        assert_eq!(types.instantiate_type(nullable, &[int64]).unwrap(), nullable_long);
        assert!(types.instantiate_type(nullable, &[]).is_err());
    }

    #[test]
    fn test_instantiate_generic_method() {
        let types = TypeSystem::new(PointerSize::Bit64);
        let helpers = types.well_known(WellKnownType::RuntimeHelpers);
        let create_span = types.find_method_by_name(helpers, "CreateSpan").unwrap();
        let int32 = types.well_known(WellKnownType::Int32);

        let instance = types.instantiate_method(create_span, &[int32]).unwrap();
        let return_type = types.method(instance).signature.return_type;
        assert!(types.is_well_known(return_type, WellKnownType::ReadOnlySpan));
        assert_eq!(types.type_desc(return_type).instantiation, vec![int32]);
        assert_eq!(types.typical_method_definition(instance), create_span);
    }

    #[test]
    fn test_static_constructor_is_unique() {
        let types = TypeSystem::new(PointerSize::Bit64);
        let class = types.define_class("Test", "Once");
        let cctor = types.add_static_constructor(class).unwrap();
        assert_eq!(types.type_desc(class).static_constructor(), Some(cctor));
        assert!(types.add_static_constructor(class).is_err());
        assert_eq!(types.method_name(cctor), "Test.Once..cctor");
    }

    #[test]
    fn test_rva_data_requires_flag() {
        let types = TypeSystem::new(PointerSize::Bit64);
        let class = types.define_class("Test", "Data");
        let int32 = types.well_known(WellKnownType::Int32);
        let plain = types.add_field(class, "Plain", int32, FieldAttributes::STATIC).unwrap();
        assert!(types.set_rva_data(plain, &[1, 2, 3, 4]).is_err());

        let mapped = types
            .add_field(
                class,
                "Mapped",
                int32,
                FieldAttributes::STATIC | FieldAttributes::HAS_FIELD_RVA,
            )
            .unwrap();
        types.set_rva_data(mapped, &[1, 2, 3, 4]).unwrap();
        assert_eq!(types.field(mapped).rva_data().unwrap().as_ref(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_find_method_walks_base_chain() {
        let types = TypeSystem::new(PointerSize::Bit64);
        let void = types.well_known(WellKnownType::Void);
        let base = types.define_class("Test", "Base");
        let signature = MethodSignature::new_instance(Vec::new(), void);
        let run = types.add_method(base, "Run", signature.clone(), MethodAttributes::VIRTUAL);
        let derived = types
            .define_type("Test", "Derived", TypeKind::Class(Some(base)), TypeAttributes::empty())
            .unwrap();
        assert_eq!(types.find_method(derived, "Run", &signature), Some(run));
        assert_eq!(types.find_method(derived, "Walk", &signature), None);
    }

    #[test]
    fn test_delegate_gets_constructor() {
        let types = TypeSystem::new(PointerSize::Bit64);
        let handler = types
            .define_type("Test", "Handler", TypeKind::Delegate, TypeAttributes::empty())
            .unwrap();
        assert!(types.is_delegate(handler));
        let ctor = types.find_method_by_name(handler, ".ctor").unwrap();
        assert_eq!(types.method(ctor).signature.parameters.len(), 2);
    }
}
