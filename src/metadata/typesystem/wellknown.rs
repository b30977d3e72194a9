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

//! Core library types seeded into every [`TypeSystem`].

use std::collections::HashMap;

use strum::{EnumIter, IntoStaticStr};

use crate::{
    metadata::typesystem::{
        FieldAttributes, GenericParameterKind, MethodAttributes, MethodSignature, TypeAttributes,
        TypeCategory, TypeId, TypeSystem,
    },
    Result,
};

/// Core library types the interpreter recognizes by identity.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, IntoStaticStr)]
pub enum WellKnownType {
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
    Object,
    String,
    ValueType,
    Enum,
    Array,
    Delegate,
    MulticastDelegate,
    Type,
    RuntimeType,
    RuntimeTypeHandle,
    RuntimeFieldHandle,
    Nullable,
    Span,
    ReadOnlySpan,
    Guid,
    RuntimeHelpers,
    MemoryMarshal,
    ComWrappers,
    ComInterfaceEntry,
    Canon,
}

const PRIMITIVES: [(WellKnownType, &str, TypeCategory); 15] = [
    (WellKnownType::Void, "Void", TypeCategory::Void),
    (WellKnownType::Boolean, "Boolean", TypeCategory::Boolean),
    (WellKnownType::Char, "Char", TypeCategory::Char),
    (WellKnownType::SByte, "SByte", TypeCategory::SByte),
    (WellKnownType::Byte, "Byte", TypeCategory::Byte),
    (WellKnownType::Int16, "Int16", TypeCategory::Int16),
    (WellKnownType::UInt16, "UInt16", TypeCategory::UInt16),
    (WellKnownType::Int32, "Int32", TypeCategory::Int32),
    (WellKnownType::UInt32, "UInt32", TypeCategory::UInt32),
    (WellKnownType::Int64, "Int64", TypeCategory::Int64),
    (WellKnownType::UInt64, "UInt64", TypeCategory::UInt64),
    (WellKnownType::IntPtr, "IntPtr", TypeCategory::IntPtr),
    (WellKnownType::UIntPtr, "UIntPtr", TypeCategory::UIntPtr),
    (WellKnownType::Single, "Single", TypeCategory::Single),
    (WellKnownType::Double, "Double", TypeCategory::Double),
];

const SYSTEM: &str = "System";
const COMPILER_SERVICES: &str = "System.Runtime.CompilerServices";
const INTEROP_SERVICES: &str = "System.Runtime.InteropServices";

/// Populates a fresh type system with the core library and returns the identity map.
pub(super) fn seed(types: &TypeSystem) -> Result<HashMap<WellKnownType, TypeId>> {
    let mut map = HashMap::new();
    let value_struct = TypeAttributes::SEQUENTIAL_LAYOUT | TypeAttributes::SEALED;

    let object = types.create_definition(
        SYSTEM,
        "Object",
        TypeCategory::Class,
        None,
        TypeAttributes::empty(),
        0,
    );
    map.insert(WellKnownType::Object, object);
    let value_type = types.create_definition(
        SYSTEM,
        "ValueType",
        TypeCategory::Class,
        Some(object),
        TypeAttributes::ABSTRACT,
        0,
    );
    map.insert(WellKnownType::ValueType, value_type);
    let enum_type = types.create_definition(
        SYSTEM,
        "Enum",
        TypeCategory::Class,
        Some(value_type),
        TypeAttributes::ABSTRACT,
        0,
    );
    map.insert(WellKnownType::Enum, enum_type);

    for (known, name, category) in PRIMITIVES {
        let id = types.create_definition(SYSTEM, name, category, Some(value_type), value_struct, 0);
        map.insert(known, id);
    }

    let int32 = map[&WellKnownType::Int32];
    let int16 = map[&WellKnownType::Int16];
    let byte = map[&WellKnownType::Byte];
    let boolean = map[&WellKnownType::Boolean];
    let char_type = map[&WellKnownType::Char];
    let intptr = map[&WellKnownType::IntPtr];
    let void = map[&WellKnownType::Void];

    let string = types.create_definition(
        SYSTEM,
        "String",
        TypeCategory::Class,
        Some(object),
        TypeAttributes::SEALED,
        0,
    );
    types.add_field(string, "_stringLength", int32, FieldAttributes::empty())?;
    types.add_field(string, "_firstChar", char_type, FieldAttributes::empty())?;
    map.insert(WellKnownType::String, string);

    let array = types.create_definition(
        SYSTEM,
        "Array",
        TypeCategory::Class,
        Some(object),
        TypeAttributes::ABSTRACT,
        0,
    );
    map.insert(WellKnownType::Array, array);

    let delegate = types.create_definition(
        SYSTEM,
        "Delegate",
        TypeCategory::Class,
        Some(object),
        TypeAttributes::ABSTRACT,
        0,
    );
    types.add_field(delegate, "_firstParameter", object, FieldAttributes::empty())?;
    types.add_field(delegate, "_helperObject", object, FieldAttributes::empty())?;
    types.add_field(delegate, "_extraFunctionPointerOrData", intptr, FieldAttributes::empty())?;
    types.add_field(delegate, "_functionPointer", intptr, FieldAttributes::empty())?;
    map.insert(WellKnownType::Delegate, delegate);
    let multicast = types.create_definition(
        SYSTEM,
        "MulticastDelegate",
        TypeCategory::Class,
        Some(delegate),
        TypeAttributes::ABSTRACT,
        0,
    );
    map.insert(WellKnownType::MulticastDelegate, multicast);

    let type_type = types.create_definition(
        SYSTEM,
        "Type",
        TypeCategory::Class,
        Some(object),
        TypeAttributes::ABSTRACT,
        0,
    );
    map.insert(WellKnownType::Type, type_type);
    let runtime_type = types.create_definition(
        SYSTEM,
        "RuntimeType",
        TypeCategory::Class,
        Some(type_type),
        TypeAttributes::SEALED,
        0,
    );
    map.insert(WellKnownType::RuntimeType, runtime_type);

    for (known, name) in [
        (WellKnownType::RuntimeTypeHandle, "RuntimeTypeHandle"),
        (WellKnownType::RuntimeFieldHandle, "RuntimeFieldHandle"),
    ] {
        let handle = types.create_definition(
            SYSTEM,
            name,
            TypeCategory::ValueType,
            Some(value_type),
            value_struct,
            0,
        );
        types.add_field(handle, "_value", intptr, FieldAttributes::empty())?;
        map.insert(known, handle);
    }

    let type_param = types.generic_parameter(GenericParameterKind::Type, 0);
    let method_param = types.generic_parameter(GenericParameterKind::Method, 0);

    let nullable = types.create_definition(
        SYSTEM,
        "Nullable`1",
        TypeCategory::Nullable,
        Some(value_type),
        value_struct,
        1,
    );
    types.add_field(nullable, "hasValue", boolean, FieldAttributes::empty())?;
    types.add_field(nullable, "value", type_param, FieldAttributes::empty())?;
    map.insert(WellKnownType::Nullable, nullable);

    let type_param_ref = types.make_byref_type(type_param);
    for (known, name) in [
        (WellKnownType::Span, "Span`1"),
        (WellKnownType::ReadOnlySpan, "ReadOnlySpan`1"),
    ] {
        let span = types.create_definition(
            SYSTEM,
            name,
            TypeCategory::ValueType,
            Some(value_type),
            value_struct | TypeAttributes::BYREF_LIKE,
            1,
        );
        types.add_field(span, "_reference", type_param_ref, FieldAttributes::empty())?;
        types.add_field(span, "_length", int32, FieldAttributes::empty())?;
        map.insert(known, span);
    }

    let guid = types.create_definition(
        SYSTEM,
        "Guid",
        TypeCategory::ValueType,
        Some(value_type),
        value_struct,
        0,
    );
    types.add_field(guid, "_a", int32, FieldAttributes::empty())?;
    types.add_field(guid, "_b", int16, FieldAttributes::empty())?;
    types.add_field(guid, "_c", int16, FieldAttributes::empty())?;
    for name in ["_d", "_e", "_f", "_g", "_h", "_i", "_j", "_k"] {
        types.add_field(guid, name, byte, FieldAttributes::empty())?;
    }
    map.insert(WellKnownType::Guid, guid);

    let canon = types.create_definition(
        SYSTEM,
        "__Canon",
        TypeCategory::Class,
        Some(object),
        TypeAttributes::empty(),
        0,
    );
    map.insert(WellKnownType::Canon, canon);

    let static_class = TypeAttributes::ABSTRACT | TypeAttributes::SEALED;
    let intrinsic = MethodAttributes::STATIC | MethodAttributes::INTRINSIC;

    let helpers = types.create_definition(
        COMPILER_SERVICES,
        "RuntimeHelpers",
        TypeCategory::Class,
        Some(object),
        static_class,
        0,
    );
    let field_handle = map[&WellKnownType::RuntimeFieldHandle];
    types.add_method(
        helpers,
        "InitializeArray",
        MethodSignature::new_static(vec![array, field_handle], void),
        intrinsic,
    );
    let read_only_span_of_t = types.instantiate_type(map[&WellKnownType::ReadOnlySpan], &[method_param])?;
    types.add_generic_method(
        helpers,
        "CreateSpan",
        MethodSignature::new_static(vec![field_handle], read_only_span_of_t),
        intrinsic,
        1,
    );
    types.add_generic_method(
        helpers,
        "IsReferenceOrContainsReferences",
        MethodSignature::new_static(Vec::new(), boolean),
        intrinsic,
        1,
    );
    map.insert(WellKnownType::RuntimeHelpers, helpers);

    let marshal = types.create_definition(
        INTEROP_SERVICES,
        "MemoryMarshal",
        TypeCategory::Class,
        Some(object),
        static_class,
        0,
    );
    let method_param_array = types.make_array_type(method_param);
    let method_param_ref = types.make_byref_type(method_param);
    types.add_generic_method(
        marshal,
        "GetArrayDataReference",
        MethodSignature::new_static(vec![method_param_array], method_param_ref),
        intrinsic,
        1,
    );
    map.insert(WellKnownType::MemoryMarshal, marshal);

    let com_wrappers = types.create_definition(
        INTEROP_SERVICES,
        "ComWrappers",
        TypeCategory::Class,
        Some(object),
        TypeAttributes::ABSTRACT,
        0,
    );
    map.insert(WellKnownType::ComWrappers, com_wrappers);
    let entry = types.create_definition(
        INTEROP_SERVICES,
        "ComWrappers+ComInterfaceEntry",
        TypeCategory::ValueType,
        Some(value_type),
        value_struct,
        0,
    );
    types.add_field(entry, "IID", guid, FieldAttributes::empty())?;
    types.add_field(entry, "Vtable", intptr, FieldAttributes::empty())?;
    map.insert(WellKnownType::ComInterfaceEntry, entry);

    let type_handle = map[&WellKnownType::RuntimeTypeHandle];
    types.add_method(
        type_type,
        "GetTypeFromHandle",
        MethodSignature::new_static(vec![type_handle], type_type),
        intrinsic,
    );
    types.add_method(
        type_type,
        "get_IsValueType",
        MethodSignature::new_instance(Vec::new(), boolean),
        MethodAttributes::SPECIAL_NAME | MethodAttributes::INTRINSIC,
    );
    types.add_method(
        type_type,
        "op_Equality",
        MethodSignature::new_static(vec![type_type, type_type], boolean),
        intrinsic | MethodAttributes::SPECIAL_NAME,
    );

    types.add_method(
        object,
        ".ctor",
        MethodSignature::new_instance(Vec::new(), void),
        MethodAttributes::SPECIAL_NAME | MethodAttributes::RT_SPECIAL_NAME,
    );

    Ok(map)
}
