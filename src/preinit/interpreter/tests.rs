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

use super::*;
use crate::{
    config::PreinitConfig,
    metadata::method::ExceptionHandlerFlags,
    metadata::typesystem::{
        FieldAttributes, MethodAttributes, MethodSignature, TypeAttributes, TypeKind,
        WellKnownType,
    },
    policy::{AnnotatedMembers, DisabledPreinitializationPolicy},
    preinit::{FailureKind, FrozenContent, FrozenValue},
    test::Fixture,
};

fn reason(info: &crate::preinit::PreinitializationInfo) -> &str {
    info.failure_reason().unwrap_or_default()
}

#[test]
fn test_store_constant() -> Result<()> {
    let fx = Fixture::new();
    let ty = fx.class("Answer");
    let value = fx.static_field(ty, "Value", fx.int32());
    fx.cctor(ty, |b| {
        b.ldc_i4(42)?.field("stsfld", value)?.op("ret")?;
        Ok(())
    })?;

    let info = fx.scan(ty);
    assert!(info.is_preinitialized(), "{:?}", info.failure());
    assert_eq!(info.field_value(value).and_then(FrozenValue::as_i32), Some(42));
    assert_eq!(info.statistics().instructions_executed, 3);
    Ok(())
}

#[test]
fn test_untouched_statics_are_zero() -> Result<()> {
    let fx = Fixture::new();
    let ty = fx.class("Zero");
    let int64 = fx.known(WellKnownType::Int64);
    let value = fx.static_field(ty, "Value", int64);
    let name = fx.static_field(ty, "Name", fx.known(WellKnownType::String));
    fx.cctor(ty, |b| {
        b.op("ret")?;
        Ok(())
    })?;

    let info = fx.scan(ty);
    assert_eq!(info.field_value(value).and_then(FrozenValue::as_i64), Some(0));
    assert!(info.field_value(name).is_some_and(FrozenValue::is_null));
    Ok(())
}

#[test]
fn test_integer_arithmetic() -> Result<()> {
    let fx = Fixture::new();
    let ty = fx.class("Arithmetic");
    let quotient = fx.static_field(ty, "Quotient", fx.int32());
    let remainder = fx.static_field(ty, "Remainder", fx.int32());
    let shifted = fx.static_field(ty, "Shifted", fx.int32());
    let wrapped = fx.static_field(ty, "Wrapped", fx.known(WellKnownType::Int64));
    fx.cctor(ty, |b| {
        b.ldc_i4(-7)?.ldc_i4(2)?.op("div")?.field("stsfld", quotient)?;
        b.ldc_i4(-7)?.ldc_i4(2)?.op("rem")?.field("stsfld", remainder)?;
        b.ldc_i4(-16)?.ldc_i4(2)?.op("shr.un")?.field("stsfld", shifted)?;
        b.ldc_i8(i64::MAX)?.ldc_i8(2)?.op("mul")?.field("stsfld", wrapped)?;
        b.op("ret")?;
        Ok(())
    })?;

    let info = fx.scan(ty);
    assert!(info.is_preinitialized(), "{:?}", info.failure());
    assert_eq!(info.field_value(quotient).and_then(FrozenValue::as_i32), Some(-3));
    assert_eq!(info.field_value(remainder).and_then(FrozenValue::as_i32), Some(-1));
    assert_eq!(
        info.field_value(shifted).and_then(FrozenValue::as_i32),
        Some(((-16i32 as u32) >> 2) as i32)
    );
    assert_eq!(info.field_value(wrapped).and_then(FrozenValue::as_i64), Some(-2));
    Ok(())
}

#[test]
fn test_division_by_zero() -> Result<()> {
    let fx = Fixture::new();
    let ty = fx.class("Divide");
    let value = fx.static_field(ty, "Value", fx.int32());
    fx.cctor(ty, |b| {
        b.ldc_i4(1)?.ldc_i4(0)?.op("div")?.field("stsfld", value)?.op("ret")?;
        Ok(())
    })?;

    let info = fx.scan(ty);
    assert!(reason(&info).contains("Division by zero"));
    assert_eq!(info.failure().map(|failure| failure.kind), Some(FailureKind::Unsupported));
    Ok(())
}

#[test]
fn test_conversions_and_floats() -> Result<()> {
    let fx = Fixture::new();
    let ty = fx.class("Convert");
    let narrow = fx.static_field(ty, "Narrow", fx.known(WellKnownType::SByte));
    let double = fx.static_field(ty, "Double", fx.known(WellKnownType::Double));
    let single = fx.static_field(ty, "Single", fx.known(WellKnownType::Single));
    fx.cctor(ty, |b| {
        b.ldc_i4(200)?.op("conv.i1")?.field("stsfld", narrow)?;
        b.ldc_i4(3)?.op("conv.r8")?.ldc_r8(0.5)?.op("add")?.field("stsfld", double)?;
        b.ldc_r4(1.25)?.field("stsfld", single)?;
        b.op("ret")?;
        Ok(())
    })?;

    let info = fx.scan(ty);
    assert!(info.is_preinitialized(), "{:?}", info.failure());
    assert_eq!(info.field_value(narrow).and_then(FrozenValue::as_u8), Some(0xC8));
    assert_eq!(info.field_value(double).and_then(FrozenValue::as_f64), Some(3.5));
    assert_eq!(info.field_value(single).and_then(FrozenValue::as_f32), Some(1.25));
    Ok(())
}

#[test]
fn test_comparisons() -> Result<()> {
    let fx = Fixture::new();
    let ty = fx.class("Compare");
    let less = fx.static_field(ty, "Less", fx.int32());
    let unsigned = fx.static_field(ty, "Unsigned", fx.int32());
    let equal = fx.static_field(ty, "Equal", fx.int32());
    fx.cctor(ty, |b| {
        b.ldc_i4(3)?.ldc_i4(5)?.op("clt")?.field("stsfld", less)?;
        b.ldc_i4(-1)?.ldc_i4(1)?.op("cgt.un")?.field("stsfld", unsigned)?;
        b.ldc_i4(4)?.ldc_i4(5)?.op("ceq")?.field("stsfld", equal)?;
        b.op("ret")?;
        Ok(())
    })?;

    let info = fx.scan(ty);
    assert_eq!(info.field_value(less).and_then(FrozenValue::as_i32), Some(1));
    assert_eq!(info.field_value(unsigned).and_then(FrozenValue::as_i32), Some(1));
    assert_eq!(info.field_value(equal).and_then(FrozenValue::as_i32), Some(0));
    Ok(())
}

#[test]
fn test_loop_with_locals() -> Result<()> {
    let fx = Fixture::new();
    let ty = fx.class("Loop");
    let sum = fx.static_field(ty, "Sum", fx.int32());
    fx.cctor(ty, |b| {
        let i = b.local(fx.int32())?;
        let acc = b.local(fx.int32())?;
        b.ldc_i4(0)?.stloc(i)?.ldc_i4(0)?.stloc(acc)?;
        b.label("loop")?;
        b.ldloc(acc)?.ldloc(i)?.op("add")?.stloc(acc)?;
        b.ldloc(i)?.ldc_i4(1)?.op("add")?.stloc(i)?;
        b.ldloc(i)?.ldc_i4(10)?.branch("blt.s", "loop")?;
        b.ldloc(acc)?.field("stsfld", sum)?.op("ret")?;
        Ok(())
    })?;

    let info = fx.scan(ty);
    assert!(info.is_preinitialized(), "{:?}", info.failure());
    assert_eq!(info.field_value(sum).and_then(FrozenValue::as_i32), Some(45));
    Ok(())
}

#[test]
fn test_instruction_limit() -> Result<()> {
    let fx = Fixture::new();
    let ty = fx.class("Spin");
    fx.cctor(ty, |b| {
        b.label("top")?.op("nop")?.branch("br.s", "top")?;
        Ok(())
    })?;

    let ctx = fx
        .context()
        .with_config(PreinitConfig::default().with_instruction_limit(50));
    let info = crate::preinit::scan_type(&ctx, ty);
    assert!(reason(&info).contains("Instruction limit"));
    assert_eq!(info.statistics().instructions_executed, 50);
    Ok(())
}

#[test]
fn test_switch_out_of_range_falls_through() -> Result<()> {
    let fx = Fixture::new();
    let ty = fx.class("Switch");
    let value = fx.static_field(ty, "Value", fx.int32());
    fx.cctor(ty, |b| {
        b.ldc_i4(5)?.switch(&["zero", "one"])?;
        b.ldc_i4(-1)?.field("stsfld", value)?.op("ret")?;
        b.label("zero")?.ldc_i4(10)?.field("stsfld", value)?.op("ret")?;
        b.label("one")?.ldc_i4(11)?.field("stsfld", value)?.op("ret")?;
        Ok(())
    })?;

    let info = fx.scan(ty);
    assert_eq!(info.field_value(value).and_then(FrozenValue::as_i32), Some(-1));
    Ok(())
}

#[test]
fn test_finally_is_rejected() -> Result<()> {
    let fx = Fixture::new();
    let ty = fx.class("Finally");
    fx.cctor(ty, |b| {
        b.label("try")?
            .op("nop")?
            .branch("leave.s", "end")?
            .handler_label("finally", ExceptionHandlerFlags::FINALLY)?
            .op("endfinally")?
            .label("end")?
            .op("ret")?;
        b.region(ExceptionHandlerFlags::FINALLY, ("try", "finally"), ("finally", "end"));
        Ok(())
    })?;

    assert!(reason(&fx.scan(ty)).contains("Finally regions"));
    Ok(())
}

#[test]
fn test_calls_return_values() -> Result<()> {
    let fx = Fixture::new();
    let ty = fx.class("Calls");
    let int32 = fx.int32();
    let value = fx.static_field(ty, "Value", int32);
    let add = fx.types.add_method(
        ty,
        "Add",
        MethodSignature::new_static(vec![int32, int32], int32),
        MethodAttributes::STATIC,
    );
    fx.body(add, |b| {
        b.ldarg(0)?.ldarg(1)?.op("add")?.op("ret")?;
        Ok(())
    })?;
    fx.cctor(ty, |b| {
        b.ldc_i4(40)?.ldc_i4(2)?.call("call", add)?.field("stsfld", value)?.op("ret")?;
        Ok(())
    })?;

    let info = fx.scan(ty);
    assert_eq!(info.field_value(value).and_then(FrozenValue::as_i32), Some(42));
    Ok(())
}

#[test]
fn test_recursion_is_rejected() -> Result<()> {
    let fx = Fixture::new();
    let ty = fx.class("Recursive");
    let void = fx.known(WellKnownType::Void);
    let again = fx.types.add_method(
        ty,
        "Again",
        MethodSignature::new_static(Vec::new(), void),
        MethodAttributes::STATIC,
    );
    fx.body(again, |b| {
        b.call("call", again)?.op("ret")?;
        Ok(())
    })?;
    fx.cctor(ty, |b| {
        b.call("call", again)?.op("ret")?;
        Ok(())
    })?;

    assert!(reason(&fx.scan(ty)).contains("Recursion"));
    Ok(())
}

#[test]
fn test_extern_method() -> Result<()> {
    let fx = Fixture::new();
    let ty = fx.class("Extern");
    let native = fx.types.add_method(
        ty,
        "Native",
        MethodSignature::new_static(Vec::new(), fx.known(WellKnownType::Void)),
        MethodAttributes::STATIC,
    );
    fx.cctor(ty, |b| {
        b.call("call", native)?.op("ret")?;
        Ok(())
    })?;

    assert!(reason(&fx.scan(ty)).contains("Extern method"));
    Ok(())
}

#[test]
fn test_virtual_call_is_rejected() -> Result<()> {
    let fx = Fixture::new();
    let ty = fx.class("Virtual");
    let target = fx.class("Target");
    let ctor = fx.default_ctor(target)?;
    let run = fx.types.add_method(
        target,
        "Run",
        MethodSignature::new_instance(Vec::new(), fx.known(WellKnownType::Void)),
        MethodAttributes::VIRTUAL,
    );
    fx.body(run, |b| {
        b.op("ret")?;
        Ok(())
    })?;
    fx.cctor(ty, |b| {
        b.call("newobj", ctor)?.call("callvirt", run)?.op("ret")?;
        Ok(())
    })?;

    assert!(reason(&fx.scan(ty)).contains("opcode 'callvirt' Virtual call"));
    Ok(())
}

#[test]
fn test_store_into_other_static() -> Result<()> {
    let fx = Fixture::new();
    let ty = fx.class("Writer");
    let other = fx.class("Other");
    let field = fx.static_field(other, "Value", fx.int32());
    fx.cctor(ty, |b| {
        b.ldc_i4(1)?.field("stsfld", field)?.op("ret")?;
        Ok(())
    })?;

    assert!(reason(&fx.scan(ty)).contains("Store into other static"));
    Ok(())
}

#[test]
fn test_load_other_mutable_static() -> Result<()> {
    let fx = Fixture::new();
    let ty = fx.class("Reader");
    let value = fx.static_field(ty, "Value", fx.int32());
    let other = fx.class("Other");
    let mutable = fx.static_field(other, "Mutable", fx.int32());
    fx.cctor(ty, |b| {
        b.field("ldsfld", mutable)?.field("stsfld", value)?.op("ret")?;
        Ok(())
    })?;

    assert!(reason(&fx.scan(ty)).contains("Load from other non-initonly static"));
    Ok(())
}

#[test]
fn test_readonly_static_without_cctor_is_default() -> Result<()> {
    let fx = Fixture::new();
    let ty = fx.class("Reader");
    let value = fx.static_field(ty, "Value", fx.int32());
    let other = fx.class("Plain");
    let frozen = fx.readonly_field(other, "Frozen", fx.int32());
    fx.cctor(ty, |b| {
        b.field("ldsfld", frozen)?.ldc_i4(1)?.op("add")?.field("stsfld", value)?.op("ret")?;
        Ok(())
    })?;

    let info = fx.scan(ty);
    assert_eq!(info.field_value(value).and_then(FrozenValue::as_i32), Some(1));
    Ok(())
}

#[test]
fn test_nested_cctor_is_memoized() -> Result<()> {
    let fx = Fixture::new();
    let source = fx.class("Source");
    let seed = fx.readonly_field(source, "Seed", fx.int32());
    fx.cctor(source, |b| {
        b.ldc_i4(21)?.field("stsfld", seed)?.op("ret")?;
        Ok(())
    })?;
    let ty = fx.class("Consumer");
    let value = fx.static_field(ty, "Value", fx.int32());
    fx.cctor(ty, |b| {
        b.field("ldsfld", seed)?
            .field("ldsfld", seed)?
            .op("add")?
            .field("stsfld", value)?
            .op("ret")?;
        Ok(())
    })?;

    let info = fx.scan(ty);
    assert!(info.is_preinitialized(), "{:?}", info.failure());
    assert_eq!(info.field_value(value).and_then(FrozenValue::as_i32), Some(42));
    assert_eq!(info.statistics().nested_scans.get(&source), Some(&1));
    Ok(())
}

#[test]
fn test_nested_result_is_shared_between_dependents() -> Result<()> {
    let fx = Fixture::new();
    let source = fx.class("Source");
    let seed = fx.readonly_field(source, "Seed", fx.int32());
    fx.cctor(source, |b| {
        b.ldc_i4(21)?.field("stsfld", seed)?.op("ret")?;
        Ok(())
    })?;
    let doubler = fx.class("Doubler");
    let twice = fx.readonly_field(doubler, "Twice", fx.int32());
    fx.cctor(doubler, |b| {
        b.field("ldsfld", seed)?
            .ldc_i4(2)?
            .op("mul")?
            .field("stsfld", twice)?
            .op("ret")?;
        Ok(())
    })?;
    let ty = fx.class("Consumer");
    let first = fx.static_field(ty, "First", fx.int32());
    let second = fx.static_field(ty, "Second", fx.int32());
    fx.cctor(ty, |b| {
        b.field("ldsfld", seed)?.field("stsfld", first)?;
        b.field("ldsfld", twice)?.field("stsfld", second)?;
        b.op("ret")?;
        Ok(())
    })?;

    let info = fx.scan(ty);
    assert!(info.is_preinitialized(), "{:?}", info.failure());
    assert_eq!(info.field_value(first).and_then(FrozenValue::as_i32), Some(21));
    assert_eq!(info.field_value(second).and_then(FrozenValue::as_i32), Some(42));
    let nested = &info.statistics().nested_scans;
    assert_eq!(nested.get(&source), Some(&1));
    assert_eq!(nested.get(&doubler), Some(&1));
    Ok(())
}

#[test]
fn test_nested_cctor_failure() -> Result<()> {
    let fx = Fixture::new();
    let source = fx.class("Broken");
    let seed = fx.readonly_field(source, "Seed", fx.int32());
    let native = fx.types.add_method(
        source,
        "Native",
        MethodSignature::new_static(Vec::new(), fx.int32()),
        MethodAttributes::STATIC,
    );
    fx.cctor(source, |b| {
        b.call("call", native)?.field("stsfld", seed)?.op("ret")?;
        Ok(())
    })?;
    let ty = fx.class("Consumer");
    let value = fx.static_field(ty, "Value", fx.int32());
    fx.cctor(ty, |b| {
        b.field("ldsfld", seed)?.field("stsfld", value)?.op("ret")?;
        Ok(())
    })?;

    assert!(reason(&fx.scan(ty)).contains("Nested cctor failed to preinit"));
    Ok(())
}

#[test]
fn test_array_store_and_freeze() -> Result<()> {
    let fx = Fixture::new();
    let ty = fx.class("Table");
    let int32 = fx.int32();
    let array = fx.static_field(ty, "Values", fx.types.make_array_type(int32));
    fx.cctor(ty, |b| {
        b.ldc_i4(3)?.type_op("newarr", int32)?;
        b.op("dup")?.ldc_i4(1)?.ldc_i4(5)?.op("stelem.i4")?;
        b.field("stsfld", array)?.op("ret")?;
        Ok(())
    })?;

    let info = fx.scan(ty);
    let object = info
        .field_value(array)
        .and_then(FrozenValue::as_object)
        .expect("array");
    assert_eq!(object.array_length(), Some(3));
    match &object.content {
        FrozenContent::Array { element, data, .. } => {
            assert_eq!(*element, int32);
            assert_eq!(&data[..], &[0, 0, 0, 0, 5, 0, 0, 0, 0, 0, 0, 0]);
        }
        other => panic!("unexpected content {other:?}"),
    }
    assert_eq!(object.site.owner, ty);
    Ok(())
}

#[test]
fn test_array_index_at_length_is_out_of_range() -> Result<()> {
    let fx = Fixture::new();
    let ty = fx.class("Bounds");
    let int32 = fx.int32();
    let value = fx.static_field(ty, "Value", int32);
    fx.cctor(ty, |b| {
        b.ldc_i4(2)?.type_op("newarr", int32)?;
        b.ldc_i4(2)?.op("ldelem.i4")?.field("stsfld", value)?.op("ret")?;
        Ok(())
    })?;

    assert!(reason(&fx.scan(ty)).contains("Out of range access"));
    Ok(())
}

#[test]
fn test_array_bounds() -> Result<()> {
    let fx = Fixture::new();
    let int32 = fx.int32();
    let negative = fx.class("Negative");
    fx.cctor(negative, |b| {
        b.ldc_i4(-1)?.type_op("newarr", int32)?.op("pop")?.op("ret")?;
        Ok(())
    })?;
    let large = fx.class("Large");
    fx.cctor(large, |b| {
        b.ldc_i4(5)?.type_op("newarr", int32)?.op("pop")?.op("ret")?;
        Ok(())
    })?;

    let ctx = fx
        .context()
        .with_config(PreinitConfig::default().with_max_array_elements(4));
    for ty in [negative, large] {
        let info = crate::preinit::scan_type(&ctx, ty);
        assert!(info.failure_reason().unwrap_or_default().contains("Array out of bounds"));
    }
    Ok(())
}

#[test]
fn test_array_index_boundaries() -> Result<()> {
    let fx = Fixture::new();
    let int32 = fx.int32();
    let store_at_length = fx.class("StoreAtLength");
    fx.cctor(store_at_length, |b| {
        b.ldc_i4(2)?.type_op("newarr", int32)?;
        b.ldc_i4(2)?.ldc_i4(1)?.op("stelem.i4")?.op("ret")?;
        Ok(())
    })?;
    let store_negative = fx.class("StoreNegative");
    fx.cctor(store_negative, |b| {
        b.ldc_i4(2)?.type_op("newarr", int32)?;
        b.ldc_i4(-1)?.ldc_i4(1)?.op("stelem.i4")?.op("ret")?;
        Ok(())
    })?;
    let load_negative = fx.class("LoadNegative");
    fx.cctor(load_negative, |b| {
        b.ldc_i4(2)?.type_op("newarr", int32)?;
        b.ldc_i4(-1)?.op("ldelem.i4")?.op("pop")?.op("ret")?;
        Ok(())
    })?;
    let store_last = fx.class("StoreLast");
    let values = fx.static_field(store_last, "Values", fx.types.make_array_type(int32));
    fx.cctor(store_last, |b| {
        b.ldc_i4(2)?.type_op("newarr", int32)?.op("dup")?;
        b.ldc_i4(1)?.ldc_i4(9)?.op("stelem.i4")?;
        b.field("stsfld", values)?.op("ret")?;
        Ok(())
    })?;

    assert!(reason(&fx.scan(store_at_length)).contains("opcode 'stelem.i4' Out of range access"));
    assert!(reason(&fx.scan(store_negative)).contains("opcode 'stelem.i4' Out of range access"));
    assert!(reason(&fx.scan(load_negative)).contains("opcode 'ldelem.i4' Out of range access"));
    let info = fx.scan(store_last);
    assert!(info.is_preinitialized(), "{:?}", info.failure());
    Ok(())
}

#[test]
fn test_heap_limit_stops_allocation_loop() -> Result<()> {
    let fx = Fixture::new();
    let ty = fx.class("Churn");
    let int64 = fx.known(WellKnownType::Int64);
    fx.cctor(ty, |b| {
        b.label("top")?;
        b.ldc_i4(1024)?.type_op("newarr", int64)?.op("pop")?;
        b.branch("br.s", "top")?;
        Ok(())
    })?;

    let ctx = fx
        .context()
        .with_config(PreinitConfig::default().with_max_heap_bytes(64 * 1024));
    let info = crate::preinit::scan_type(&ctx, ty);
    assert!(reason(&info).contains("opcode 'newarr' Heap limit"), "{:?}", info.failure());
    assert_eq!(info.failure().map(|failure| failure.kind), Some(FailureKind::Unsupported));
    assert!(info.statistics().instructions_executed < 100);
    Ok(())
}

#[test]
fn test_heap_limit_bounds_large_struct_arrays() -> Result<()> {
    let fx = Fixture::new();
    let wide = fx.structure("Wide");
    let int64 = fx.known(WellKnownType::Int64);
    for index in 0..128 {
        fx.instance_field(wide, &format!("F{index}"), int64);
    }
    let ty = fx.class("WideChurn");
    fx.cctor(ty, |b| {
        b.label("top")?;
        b.ldc_i4(8192)?.type_op("newarr", wide)?.op("pop")?;
        b.branch("br.s", "top")?;
        Ok(())
    })?;

    let info = fx.scan(ty);
    assert!(reason(&info).contains("Heap limit"), "{:?}", info.failure());
    Ok(())
}

#[test]
fn test_heap_limit_counts_objects() -> Result<()> {
    let fx = Fixture::new();
    let node = fx.class("Node");
    fx.instance_field(node, "Value", fx.known(WellKnownType::Int64));
    let ctor = fx.default_ctor(node)?;
    let ty = fx.class("NodeChurn");
    fx.cctor(ty, |b| {
        b.label("top")?.call("newobj", ctor)?.op("pop")?.branch("br.s", "top")?;
        Ok(())
    })?;

    let ctx = fx
        .context()
        .with_config(PreinitConfig::default().with_max_heap_bytes(16 * 1024));
    let info = crate::preinit::scan_type(&ctx, ty);
    assert!(reason(&info).contains("Heap limit"), "{:?}", info.failure());
    assert!(info.statistics().instructions_executed < 100_000);
    Ok(())
}

#[test]
fn test_localloc_out_of_bounds() -> Result<()> {
    let fx = Fixture::new();
    let ty = fx.class("Stackalloc");
    fx.cctor(ty, |b| {
        b.ldc_i4(100_000)?.op("localloc")?.op("pop")?.op("ret")?;
        Ok(())
    })?;

    assert!(reason(&fx.scan(ty)).contains("opcode 'localloc' Localloc out of bounds"));
    Ok(())
}

#[test]
fn test_tail_prefix_is_rejected() -> Result<()> {
    let fx = Fixture::new();
    let ty = fx.class("TailCaller");
    let helper = fx.types.add_method(
        ty,
        "Helper",
        MethodSignature::new_static(Vec::new(), fx.known(WellKnownType::Void)),
        MethodAttributes::STATIC,
    );
    fx.body(helper, |b| {
        b.op("ret")?;
        Ok(())
    })?;
    fx.cctor(ty, |b| {
        b.op("tail.")?.call("call", helper)?.op("ret")?;
        Ok(())
    })?;

    assert!(reason(&fx.scan(ty)).contains("opcode 'tail.' Tail call"));
    Ok(())
}

#[test]
fn test_initialize_array_from_rva() -> Result<()> {
    let fx = Fixture::new();
    let ty = fx.class("Initialized");
    let int32 = fx.int32();
    let array = fx.static_field(ty, "Values", fx.types.make_array_type(int32));
    let data = fx.types.add_field(
        ty,
        "Data",
        fx.known(WellKnownType::Int64),
        FieldAttributes::STATIC | FieldAttributes::INIT_ONLY | FieldAttributes::HAS_FIELD_RVA,
    )?;
    fx.types.set_rva_data(data, &[1, 0, 0, 0, 2, 0, 0, 0])?;
    let helpers = fx.known(WellKnownType::RuntimeHelpers);
    let initialize = fx
        .types
        .find_method_by_name(helpers, "InitializeArray")
        .expect("InitializeArray");
    fx.cctor(ty, |b| {
        b.ldc_i4(2)?.type_op("newarr", int32)?.op("dup")?;
        b.field("ldtoken", data)?.call("call", initialize)?;
        b.field("stsfld", array)?.op("ret")?;
        Ok(())
    })?;

    let info = fx.scan(ty);
    assert!(info.is_preinitialized(), "{:?}", info.failure());
    let object = info.field_value(array).and_then(FrozenValue::as_object).expect("array");
    match &object.content {
        FrozenContent::Array { data, .. } => assert_eq!(&data[..], &[1, 0, 0, 0, 2, 0, 0, 0]),
        other => panic!("unexpected content {other:?}"),
    }
    assert!(info.field_value(data).is_none());
    Ok(())
}

#[test]
fn test_object_with_fields() -> Result<()> {
    let fx = Fixture::new();
    let ty = fx.class("Holder");
    let boxed = fx.class("Cell");
    let cell_value = fx.instance_field(boxed, "Value", fx.int32());
    let ctor = fx.default_ctor(boxed)?;
    let cell = fx.static_field(ty, "Cell", boxed);
    fx.cctor(ty, |b| {
        b.call("newobj", ctor)?.op("dup")?.ldc_i4(7)?.field("stfld", cell_value)?;
        b.field("stsfld", cell)?.op("ret")?;
        Ok(())
    })?;

    let info = fx.scan(ty);
    assert!(info.is_preinitialized(), "{:?}", info.failure());
    let object = info.field_value(cell).and_then(FrozenValue::as_object).expect("object");
    assert_eq!(object.ty, boxed);
    let offset = fx.types.field(cell_value).offset;
    match &object.content {
        FrozenContent::Object { data } => assert_eq!(&data[offset..offset + 4], &[7, 0, 0, 0]),
        other => panic!("unexpected content {other:?}"),
    }
    Ok(())
}

#[test]
fn test_reference_field_accepts_only_null() -> Result<()> {
    let fx = Fixture::new();
    let node = fx.class("Node");
    let next = fx.types.add_field(
        node,
        "Next",
        fx.known(WellKnownType::Object),
        FieldAttributes::INIT_ONLY,
    )?;
    let ctor = fx.default_ctor(node)?;

    let null_store = fx.class("NullStore");
    let first = fx.static_field(null_store, "First", node);
    fx.cctor(null_store, |b| {
        b.call("newobj", ctor)?.op("dup")?.op("ldnull")?.field("stfld", next)?;
        b.field("stsfld", first)?.op("ret")?;
        Ok(())
    })?;
    let string_store = fx.class("StringStore");
    let second = fx.static_field(string_store, "Second", node);
    fx.cctor(string_store, |b| {
        b.call("newobj", ctor)?.op("dup")?.ldstr("text")?.field("stfld", next)?;
        b.field("stsfld", second)?.op("ret")?;
        Ok(())
    })?;

    let info = fx.scan(null_store);
    assert!(info.is_preinitialized(), "{:?}", info.failure());
    assert!(reason(&fx.scan(string_store)).contains("Reference field"));
    Ok(())
}

#[test]
fn test_mutable_reference_field_blocks_allocation() -> Result<()> {
    let fx = Fixture::new();
    let node = fx.class("Node");
    fx.instance_field(node, "Next", fx.known(WellKnownType::Object));
    let ctor = fx.default_ctor(node)?;
    let ty = fx.class("Allocator");
    let first = fx.static_field(ty, "First", node);
    fx.cctor(ty, |b| {
        b.call("newobj", ctor)?.field("stsfld", first)?.op("ret")?;
        Ok(())
    })?;

    assert!(reason(&fx.scan(ty)).contains("GC pointers"));
    Ok(())
}

#[test]
fn test_finalizable_class() -> Result<()> {
    let fx = Fixture::new();
    let resource = fx.class("Resource");
    let ctor = fx.default_ctor(resource)?;
    let finalizer = fx.types.add_finalizer(resource)?;
    fx.body(finalizer, |b| {
        b.op("nop")?.op("ret")?;
        Ok(())
    })?;
    let ty = fx.class("Owner");
    let held = fx.static_field(ty, "Held", resource);
    fx.cctor(ty, |b| {
        b.call("newobj", ctor)?.field("stsfld", held)?.op("ret")?;
        Ok(())
    })?;

    assert!(reason(&fx.scan(ty)).contains("Finalizable class"));
    Ok(())
}

#[test]
fn test_struct_local_through_byref() -> Result<()> {
    let fx = Fixture::new();
    let pair = fx.structure("Pair");
    fx.instance_field(pair, "A", fx.int32());
    let second = fx.instance_field(pair, "B", fx.int32());
    let ty = fx.class("Pairs");
    let stored = fx.static_field(ty, "Stored", pair);
    fx.cctor(ty, |b| {
        let local = b.local(pair)?;
        b.ldloca(local)?.type_op("initobj", pair)?;
        b.ldloca(local)?.ldc_i4(3)?.field("stfld", second)?;
        b.ldloc(local)?.field("stsfld", stored)?.op("ret")?;
        Ok(())
    })?;

    let info = fx.scan(ty);
    assert!(info.is_preinitialized(), "{:?}", info.failure());
    assert_eq!(
        info.field_value(stored).and_then(FrozenValue::as_bytes),
        Some(&[0, 0, 0, 0, 3, 0, 0, 0][..])
    );
    Ok(())
}

#[test]
fn test_box_unbox() -> Result<()> {
    let fx = Fixture::new();
    let ty = fx.class("Boxing");
    let int32 = fx.int32();
    let value = fx.static_field(ty, "Value", int32);
    fx.cctor(ty, |b| {
        b.ldc_i4(5)?.type_op("box", int32)?.type_op("unbox.any", int32)?;
        b.field("stsfld", value)?.op("ret")?;
        Ok(())
    })?;

    let info = fx.scan(ty);
    assert_eq!(info.field_value(value).and_then(FrozenValue::as_i32), Some(5));
    Ok(())
}

#[test]
fn test_string_literal() -> Result<()> {
    let fx = Fixture::new();
    let ty = fx.class("Greeting");
    let text = fx.static_field(ty, "Text", fx.known(WellKnownType::String));
    fx.cctor(ty, |b| {
        b.ldstr("hello")?.field("stsfld", text)?.op("ret")?;
        Ok(())
    })?;

    let info = fx.scan(ty);
    assert_eq!(info.field_value(text).and_then(FrozenValue::as_str), Some("hello"));
    Ok(())
}

#[test]
fn test_type_from_handle() -> Result<()> {
    let fx = Fixture::new();
    let ty = fx.class("Reflection");
    let type_type = fx.known(WellKnownType::Type);
    let field = fx.static_field(ty, "Int32Type", type_type);
    let get = fx
        .types
        .find_method_by_name(type_type, "GetTypeFromHandle")
        .expect("GetTypeFromHandle");
    fx.cctor(ty, |b| {
        b.type_op("ldtoken", fx.int32())?.call("call", get)?;
        b.field("stsfld", field)?.op("ret")?;
        Ok(())
    })?;

    let info = fx.scan(ty);
    assert_eq!(info.field_value(field), Some(&FrozenValue::RuntimeType(fx.int32())));
    Ok(())
}

#[test]
fn test_static_delegate() -> Result<()> {
    let fx = Fixture::new();
    let callback = fx.types.define_type(
        "Test",
        "Callback",
        TypeKind::Delegate,
        TypeAttributes::SEALED,
    )?;
    let ctor = fx.types.find_method_by_name(callback, ".ctor").expect(".ctor");
    let ty = fx.class("Handlers");
    let handler = fx.static_field(ty, "Handler", callback);
    let target = fx.types.add_method(
        ty,
        "OnEvent",
        MethodSignature::new_static(Vec::new(), fx.known(WellKnownType::Void)),
        MethodAttributes::STATIC,
    );
    fx.cctor(ty, |b| {
        b.op("ldnull")?.method_op("ldftn", target)?.call("newobj", ctor)?;
        b.field("stsfld", handler)?.op("ret")?;
        Ok(())
    })?;

    let info = fx.scan(ty);
    assert!(info.is_preinitialized(), "{:?}", info.failure());
    let object = info.field_value(handler).and_then(FrozenValue::as_object).expect("delegate");
    assert_eq!(
        object.content,
        FrozenContent::Delegate {
            target,
            first_parameter: FrozenValue::Null
        }
    );
    Ok(())
}

#[test]
fn test_delegate_kind_mismatch() -> Result<()> {
    let fx = Fixture::new();
    let callback = fx.types.define_type(
        "Test",
        "Callback",
        TypeKind::Delegate,
        TypeAttributes::SEALED,
    )?;
    let ctor = fx.types.find_method_by_name(callback, ".ctor").expect(".ctor");
    let ty = fx.class("Handlers");
    let run = fx.types.add_method(
        ty,
        "Run",
        MethodSignature::new_instance(Vec::new(), fx.known(WellKnownType::Void)),
        MethodAttributes::empty(),
    );
    fx.cctor(ty, |b| {
        b.op("ldnull")?.method_op("ldftn", run)?.call("newobj", ctor)?;
        b.op("pop")?.op("ret")?;
        Ok(())
    })?;

    assert!(reason(&fx.scan(ty)).contains("Open/closed static/instance delegate mismatch"));
    Ok(())
}

#[test]
fn test_field_restrictions() -> Result<()> {
    let fx = Fixture::new();
    let threaded = fx.class("Threaded");
    let local = fx.types.add_field(
        threaded,
        "PerThread",
        fx.int32(),
        FieldAttributes::STATIC | FieldAttributes::THREAD_STATIC,
    )?;
    fx.cctor(threaded, |b| {
        b.ldc_i4(1)?.field("stsfld", local)?.op("ret")?;
        Ok(())
    })?;
    assert!(reason(&fx.scan(threaded)).contains("Unsupported static"));

    let annotated = fx.class("Annotated");
    let tracked = fx.static_field(annotated, "Tracked", fx.int32());
    fx.cctor(annotated, |b| {
        b.ldc_i4(1)?.field("stsfld", tracked)?.op("ret")?;
        Ok(())
    })?;
    let annotations = AnnotatedMembers::new().with_field(tracked);
    let ctx = fx.context().with_annotations(&annotations);
    let info = crate::preinit::scan_type(&ctx, annotated);
    assert!(info.failure_reason().unwrap_or_default().contains("Needs dataflow analysis"));
    Ok(())
}

#[test]
fn test_literal_store_is_invalid_program() -> Result<()> {
    let fx = Fixture::new();
    let ty = fx.class("Constants");
    let literal = fx.types.add_field(
        ty,
        "Answer",
        fx.int32(),
        FieldAttributes::STATIC | FieldAttributes::LITERAL,
    )?;
    fx.cctor(ty, |b| {
        b.ldc_i4(42)?.field("stsfld", literal)?.op("ret")?;
        Ok(())
    })?;

    let info = fx.scan(ty);
    assert_eq!(info.failure().map(|failure| failure.kind), Some(FailureKind::InvalidProgram));
    Ok(())
}

#[test]
fn test_policy_and_constructor_checks() -> Result<()> {
    let fx = Fixture::new();
    let plain = fx.class("Plain");
    assert_eq!(
        fx.scan(plain).failure_reason(),
        Some("Unsupported static constructor")
    );

    let ty = fx.class("Disabled");
    fx.cctor(ty, |b| {
        b.op("ret")?;
        Ok(())
    })?;
    let ctx = fx.context().with_policy(&DisabledPreinitializationPolicy);
    assert_eq!(
        crate::preinit::scan_type(&ctx, ty).failure_reason(),
        Some("Disallowed by policy")
    );
    Ok(())
}
