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

//! Layout and classification queries over a [`TypeSystem`].

use crate::metadata::typesystem::{
    registry::align_up, FieldId, MethodId, TypeAttributes, TypeCategory, TypeId, TypeSystem,
    WellKnownType,
};

impl TypeSystem {
    /// Category of a type. Enums report their underlying primitive.
    #[must_use]
    pub fn category(&self, ty: TypeId) -> TypeCategory {
        self.type_desc(ty).category
    }

    /// Direct base type.
    #[must_use]
    pub fn base_type(&self, ty: TypeId) -> Option<TypeId> {
        self.type_desc(ty).base
    }

    /// Element of an array, byref or pointer type; underlying type of an enum.
    #[must_use]
    pub fn element_type(&self, ty: TypeId) -> Option<TypeId> {
        self.type_desc(ty).element
    }

    /// True for types whose values are stored inline.
    #[must_use]
    pub fn is_value_type(&self, ty: TypeId) -> bool {
        self.category(ty).is_value_type()
    }

    /// True for enumerations.
    #[must_use]
    pub fn is_enum(&self, ty: TypeId) -> bool {
        let desc = self.type_desc(ty);
        desc.category.is_primitive() && desc.element.is_some()
    }

    /// True for `System.Nullable<T>` and its instantiations.
    #[must_use]
    pub fn is_nullable(&self, ty: TypeId) -> bool {
        self.category(ty) == TypeCategory::Nullable
    }

    /// True for stack-only value types.
    #[must_use]
    pub fn is_byref_like(&self, ty: TypeId) -> bool {
        self.type_desc(ty)
            .attributes
            .contains(TypeAttributes::BYREF_LIKE)
    }

    /// True for concrete delegate types.
    #[must_use]
    pub fn is_delegate(&self, ty: TypeId) -> bool {
        self.base_type(ty) == Some(self.well_known(WellKnownType::MulticastDelegate))
    }

    /// True if `ty` is `ancestor` or derives from it.
    #[must_use]
    pub fn is_subclass_of(&self, ty: TypeId, ancestor: TypeId) -> bool {
        let mut current = Some(ty);
        while let Some(candidate) = current {
            if candidate == ancestor {
                return true;
            }
            current = self.base_type(candidate);
        }
        false
    }

    /// True if the type has a type initializer.
    #[must_use]
    pub fn has_static_constructor(&self, ty: TypeId) -> bool {
        self.type_desc(ty).static_constructor().is_some()
    }

    /// True if the type is marked `beforefieldinit`.
    #[must_use]
    pub fn is_before_field_init(&self, ty: TypeId) -> bool {
        self.type_desc(ty)
            .attributes
            .contains(TypeAttributes::BEFORE_FIELD_INIT)
    }

    /// True if the type or a base other than `System.Object` declares a finalizer.
    #[must_use]
    pub fn has_finalizer(&self, ty: TypeId) -> bool {
        let object = self.well_known(WellKnownType::Object);
        let mut current = Some(ty);
        while let Some(candidate) = current {
            if candidate == object {
                return false;
            }
            if self.type_desc(candidate).finalizer().is_some() {
                return true;
            }
            current = self.base_type(candidate);
        }
        false
    }

    /// Size and alignment of a storage location of type `ty`.
    pub(crate) fn field_size_and_alignment(&self, ty: TypeId) -> (usize, usize) {
        let desc = self.type_desc(ty);
        match desc.category {
            TypeCategory::ValueType | TypeCategory::Nullable => {
                let layout = desc.layout();
                let alignment = layout.alignment.max(1);
                (align_up(layout.instance_end, alignment).max(1), alignment)
            }
            category => match category.primitive_size() {
                Some(size) => (size, size),
                None => (self.pointer_size(), self.pointer_size()),
            },
        }
    }

    /// Bytes occupied by an instance.
    ///
    /// For reference types this includes the method table pointer. For value types it is
    /// the size of the unboxed value, at least one byte.
    #[must_use]
    pub fn instance_byte_count(&self, ty: TypeId) -> usize {
        let desc = self.type_desc(ty);
        if desc.category == TypeCategory::Class {
            let pointer = self.pointer_size();
            align_up(desc.layout().instance_end.max(pointer), pointer)
        } else {
            self.field_size_and_alignment(ty).0
        }
    }

    /// Size of one element when stored in an array or a field.
    #[must_use]
    pub fn element_size(&self, ty: TypeId) -> usize {
        self.field_size_and_alignment(ty).0
    }

    /// True if a location of this type holds an object reference.
    #[must_use]
    pub fn is_gc_pointer(&self, ty: TypeId) -> bool {
        matches!(
            self.category(ty),
            TypeCategory::Class
                | TypeCategory::Interface
                | TypeCategory::Array
                | TypeCategory::GenericParameter
        )
    }

    /// True if a location of this type holds, or contains, anything the collector tracks.
    #[must_use]
    pub fn contains_gc_pointers(&self, ty: TypeId) -> bool {
        let desc = self.type_desc(ty);
        match desc.category {
            TypeCategory::Class
            | TypeCategory::Interface
            | TypeCategory::Array
            | TypeCategory::ByRef
            | TypeCategory::GenericParameter => true,
            TypeCategory::ValueType | TypeCategory::Nullable => desc.fields().any(|field| {
                let field = self.field(field);
                !field.is_static() && self.contains_gc_pointers(field.field_type)
            }),
            _ => false,
        }
    }

    /// True if allocations of this type need 8-byte alignment on the target.
    #[must_use]
    pub fn requires_align8(&self, ty: TypeId) -> bool {
        let target = self.target();
        if !target.align8 || self.pointer_size() != 4 {
            return false;
        }
        let desc = self.type_desc(ty);
        let layout_type = match desc.category {
            TypeCategory::Array => match desc.element {
                Some(element) if self.is_value_type(element) => element,
                _ => return false,
            },
            _ => ty,
        };
        self.field_size_and_alignment(layout_type).1 >= 8
            || self.type_desc(layout_type).layout().alignment >= 8
    }

    /// True for `System.__Canon` and instantiations over it.
    #[must_use]
    pub fn is_canonical_subtype(&self, ty: TypeId) -> bool {
        if ty == self.well_known(WellKnownType::Canon) {
            return true;
        }
        let desc = self.type_desc(ty);
        desc.instantiation
            .iter()
            .any(|&argument| self.is_canonical_subtype(argument))
            || desc
                .element
                .is_some_and(|element| !self.is_enum(ty) && self.is_canonical_subtype(element))
    }

    /// Non-static fields declared directly on the type.
    pub fn instance_fields(&self, ty: TypeId) -> impl Iterator<Item = FieldId> + '_ {
        self.type_desc(ty)
            .fields()
            .filter(|&field| !self.field(field).is_static())
    }

    /// Static fields declared directly on the type.
    pub fn static_fields(&self, ty: TypeId) -> impl Iterator<Item = FieldId> + '_ {
        self.type_desc(ty)
            .fields()
            .filter(|&field| self.field(field).is_static())
    }

    fn is_plain_sequential_struct(&self, ty: TypeId) -> bool {
        let desc = self.type_desc(ty);
        desc.category == TypeCategory::ValueType
            && desc.instantiation.is_empty()
            && desc.generic_arity == 0
            && desc.attributes.contains(TypeAttributes::SEQUENTIAL_LAYOUT)
            && !desc
                .attributes
                .intersects(TypeAttributes::EXPLICIT_LAYOUT | TypeAttributes::INLINE_ARRAY)
    }

    /// True for sequential structs whose instance fields are all function pointers.
    #[must_use]
    pub fn is_function_pointer_table(&self, ty: TypeId) -> bool {
        if !self.is_plain_sequential_struct(ty) {
            return false;
        }
        let mut fields = self.instance_fields(ty).peekable();
        fields.peek().is_some()
            && fields.all(|field| {
                self.category(self.field(field).field_type) == TypeCategory::FunctionPointer
            })
    }

    /// For sequential structs made only of `ComWrappers.ComInterfaceEntry` fields, returns
    /// the entry type.
    #[must_use]
    pub fn com_interface_entry_table(&self, ty: TypeId) -> Option<TypeId> {
        if !self.is_plain_sequential_struct(ty) {
            return None;
        }
        let entry = self.well_known(WellKnownType::ComInterfaceEntry);
        let mut fields = self.instance_fields(ty).peekable();
        fields.peek()?;
        fields
            .all(|field| self.field(field).field_type == entry)
            .then_some(entry)
    }

    /// Display name, including generic arguments.
    #[must_use]
    pub fn type_name(&self, ty: TypeId) -> String {
        let desc = self.type_desc(ty);
        if desc.instantiation.is_empty() {
            desc.full_name()
        } else {
            let arguments: Vec<String> = desc
                .instantiation
                .iter()
                .map(|&argument| self.type_name(argument))
                .collect();
            format!("{}<{}>", desc.full_name(), arguments.join(","))
        }
    }

    /// `Type.Method` display name, including method generic arguments.
    #[must_use]
    pub fn method_name(&self, method: MethodId) -> String {
        let desc = self.method(method);
        let owner = self.type_name(desc.owner);
        if desc.instantiation.is_empty() {
            format!("{owner}.{}", desc.name)
        } else {
            let arguments: Vec<String> = desc
                .instantiation
                .iter()
                .map(|&argument| self.type_name(argument))
                .collect();
            format!("{owner}.{}<{}>", desc.name, arguments.join(","))
        }
    }

    /// `Type.Field` display name.
    #[must_use]
    pub fn field_name(&self, field: FieldId) -> String {
        let desc = self.field(field);
        format!("{}.{}", self.type_name(desc.owner), desc.name)
    }
}

#[cfg(test)]
mod tests {
    use crate::metadata::typesystem::{
        FieldAttributes, MethodSignature, PointerSize, TargetDetails, TypeCategory, TypeSystem,
        WellKnownType,
    };
    use strum::IntoEnumIterator;

    #[test]
    fn test_every_category_has_a_size() {
        let types = TypeSystem::new(PointerSize::Bit32);
        for category in TypeCategory::iter() {
            if let Some(size) = category.primitive_size() {
                assert!(matches!(size, 1 | 2 | 4 | 8), "{category:?}");
            }
        }
        assert_eq!(types.element_size(types.well_known(WellKnownType::IntPtr)), 4);
        assert_eq!(types.element_size(types.well_known(WellKnownType::Object)), 4);
        assert_eq!(types.element_size(types.well_known(WellKnownType::Guid)), 16);
    }

    #[test]
    fn test_gc_pointer_classification() {
        let types = TypeSystem::new(PointerSize::Bit64);
        let int32 = types.well_known(WellKnownType::Int32);
        let string = types.well_known(WellKnownType::String);

        assert!(!types.contains_gc_pointers(int32));
        assert!(types.is_gc_pointer(string));
        assert!(types.is_gc_pointer(types.make_array_type(int32)));
        assert!(types.contains_gc_pointers(types.make_byref_type(int32)));
        assert!(!types.contains_gc_pointers(types.make_pointer_type(int32)));

        let holder = types.define_struct("Test", "Holder");
        types.add_field(holder, "Name", string, FieldAttributes::empty()).unwrap();
        assert!(types.contains_gc_pointers(holder));

        let span = types.well_known(WellKnownType::Span);
        let span_of_int = types.instantiate_type(span, &[int32]).unwrap();
        assert!(types.contains_gc_pointers(span_of_int));
        assert!(types.is_byref_like(span_of_int));
    }

    #[test]
    fn test_function_pointer_table_detection() {
        let types = TypeSystem::new(PointerSize::Bit64);
        let void = types.well_known(WellKnownType::Void);
        let int32 = types.well_known(WellKnownType::Int32);
        let fnptr = types.make_function_pointer_type(MethodSignature::new_static(Vec::new(), void));

        let vtable = types.define_struct("Test", "VTable");
        types.add_field(vtable, "First", fnptr, FieldAttributes::empty()).unwrap();
        types.add_field(vtable, "Second", fnptr, FieldAttributes::empty()).unwrap();
        assert!(types.is_function_pointer_table(vtable));

        let mixed = types.define_struct("Test", "Mixed");
        types.add_field(mixed, "First", fnptr, FieldAttributes::empty()).unwrap();
        types.add_field(mixed, "Count", int32, FieldAttributes::empty()).unwrap();
        assert!(!types.is_function_pointer_table(mixed));

        let empty = types.define_struct("Test", "Empty");
        assert!(!types.is_function_pointer_table(empty));
    }

    #[test]
    fn test_com_entry_table_detection() {
        let types = TypeSystem::new(PointerSize::Bit64);
        let entry = types.well_known(WellKnownType::ComInterfaceEntry);
        assert_eq!(types.element_size(entry), 24);

        let table = types.define_struct("Test", "Entries");
        types.add_field(table, "A", entry, FieldAttributes::empty()).unwrap();
        types.add_field(table, "B", entry, FieldAttributes::empty()).unwrap();
        assert_eq!(types.com_interface_entry_table(table), Some(entry));
        assert_eq!(types.instance_byte_count(table), 48);
    }

    #[test]
    fn test_requires_align8() {
        let mut target = TargetDetails::new(PointerSize::Bit32);
        target.align8 = true;
        let types = TypeSystem::with_target(target);
        let int64 = types.well_known(WellKnownType::Int64);
        let int32 = types.well_known(WellKnownType::Int32);

        assert!(types.requires_align8(types.make_array_type(int64)));
        assert!(!types.requires_align8(types.make_array_type(int32)));

        let plain = TypeSystem::new(PointerSize::Bit32);
        let long = plain.well_known(WellKnownType::Int64);
        assert!(!plain.requires_align8(plain.make_array_type(long)));
    }

    #[test]
    fn test_canonical_subtype() {
        let types = TypeSystem::new(PointerSize::Bit64);
        let canon = types.well_known(WellKnownType::Canon);
        let nullable = types.well_known(WellKnownType::Nullable);
        let int32 = types.well_known(WellKnownType::Int32);
        let list = types
            .define_generic_type(
                "Test",
                "Box`1",
                crate::metadata::typesystem::TypeKind::Class(None),
                crate::metadata::typesystem::TypeAttributes::empty(),
                1,
            )
            .unwrap();

        assert!(types.is_canonical_subtype(types.instantiate_type(list, &[canon]).unwrap()));
        assert!(!types.is_canonical_subtype(types.instantiate_type(nullable, &[int32]).unwrap()));
    }

    #[test]
    fn test_display_names() {
        let types = TypeSystem::new(PointerSize::Bit64);
        let int32 = types.well_known(WellKnownType::Int32);
        let span = types.well_known(WellKnownType::ReadOnlySpan);
        let span_of_int = types.instantiate_type(span, &[int32]).unwrap();
        assert_eq!(types.type_name(span_of_int), "System.ReadOnlySpan`1<System.Int32>");

        let string = types.well_known(WellKnownType::String);
        let length = types.find_field(string, "_stringLength").unwrap();
        assert_eq!(types.field_name(length), "System.String._stringLength");
        assert_eq!(types.field(length).offset, 8);
    }
}
