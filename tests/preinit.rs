//! Integration tests for static constructor preinitialization.
//!
//! Each test declares a small type system, writes the IL of one or more static constructors
//! with [`MethodBodyBuilder`] and checks the frozen result through the public API, the way a
//! compiler driving the crate would.

use cilpreinit::{
    prelude::*,
    serialize::{write_statics, SerializableReference},
};

struct Program {
    types: TypeSystem,
    bodies: InMemoryMethodBodies,
}

impl Program {
    fn new(pointer_size: PointerSize) -> Self {
        let types = TypeSystem::new(pointer_size);
        let bodies = InMemoryMethodBodies::new(&types);
        Program { types, bodies }
    }

    fn known(&self, known: WellKnownType) -> TypeId {
        self.types.well_known(known)
    }

    fn body<F>(&self, method: MethodId, build: F) -> Result<()>
    where
        F: FnOnce(&mut MethodBodyBuilder<'_>) -> Result<()>,
    {
        let mut builder = MethodBodyBuilder::new(&self.types);
        build(&mut builder)?;
        self.bodies.insert(method, builder.build()?);
        Ok(())
    }

    fn cctor<F>(&self, ty: TypeId, build: F) -> Result<MethodId>
    where
        F: FnOnce(&mut MethodBodyBuilder<'_>) -> Result<()>,
    {
        let cctor = self.types.add_static_constructor(ty)?;
        self.body(cctor, build)?;
        Ok(cctor)
    }

    fn default_ctor(&self, ty: TypeId) -> Result<MethodId> {
        let ctor = self.types.add_constructor(ty, Vec::new());
        let object = self.known(WellKnownType::Object);
        let base = self
            .types
            .find_method_by_name(object, ".ctor")
            .expect("System.Object::.ctor");
        self.body(ctor, |b| {
            b.op("ldarg.0")?.call("call", base)?.op("ret")?;
            Ok(())
        })?;
        Ok(ctor)
    }

    fn delegate_type(&self, name: &str) -> Result<(TypeId, MethodId)> {
        let ty = self
            .types
            .define_type("App", name, TypeKind::Delegate, TypeAttributes::SEALED)?;
        let ctor = self
            .types
            .find_method_by_name(ty, ".ctor")
            .expect("delegate constructor");
        Ok((ty, ctor))
    }

    fn scan(&self, ty: TypeId) -> PreinitializationInfo {
        scan_type(&PreinitContext::new(&self.types, &self.bodies), ty)
    }
}

#[test]
fn test_constant_store() -> Result<()> {
    let program = Program::new(PointerSize::Bit64);
    let ty = program.types.define_class("App", "Settings");
    let int32 = program.known(WellKnownType::Int32);
    let field = program.types.add_field(ty, "X", int32, FieldAttributes::STATIC)?;
    program.cctor(ty, |b| {
        b.ldc_i4(42)?.field("stsfld", field)?.op("ret")?;
        Ok(())
    })?;

    let info = program.scan(ty);
    assert!(info.is_preinitialized());
    assert_eq!(info.ty(), ty);
    assert_eq!(info.field_value(field).and_then(FrozenValue::as_i32), Some(42));
    assert_eq!(info.field_values().count(), 1);
    Ok(())
}

#[test]
fn test_finally_region_fails() -> Result<()> {
    let program = Program::new(PointerSize::Bit64);
    let ty = program.types.define_class("App", "Guarded");
    program.cctor(ty, |b| {
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

    let info = program.scan(ty);
    assert!(!info.is_preinitialized());
    assert!(info.failure_reason().is_some_and(|reason| reason.contains("Finally regions")));
    Ok(())
}

#[test]
fn test_long_loop_hits_instruction_limit() -> Result<()> {
    let program = Program::new(PointerSize::Bit64);
    let ty = program.types.define_class("App", "Busy");
    let int32 = program.known(WellKnownType::Int32);
    let field = program.types.add_field(ty, "Count", int32, FieldAttributes::STATIC)?;
    program.cctor(ty, |b| {
        let i = b.local(int32)?;
        b.ldc_i4(0)?.stloc(i)?;
        b.label("loop")?;
        b.ldloc(i)?.ldc_i4(1)?.op("add")?.stloc(i)?;
        b.ldloc(i)?.ldc_i4(100_000)?.branch("blt", "loop")?;
        b.ldloc(i)?.field("stsfld", field)?.op("ret")?;
        Ok(())
    })?;

    let info = program.scan(ty);
    assert!(info.failure_reason().is_some_and(|reason| reason.contains("Instruction limit")));
    assert_eq!(
        info.statistics().instructions_executed,
        PreinitConfig::default().instruction_limit
    );
    Ok(())
}

#[test]
fn test_nested_cctor_runs_once() -> Result<()> {
    let program = Program::new(PointerSize::Bit64);
    let int32 = program.known(WellKnownType::Int32);

    let source = program.types.define_class("App", "Source");
    let seed = program.types.add_field(
        source,
        "Seed",
        int32,
        FieldAttributes::STATIC | FieldAttributes::INIT_ONLY,
    )?;
    program.cctor(source, |b| {
        b.ldc_i4(20)?.field("stsfld", seed)?.op("ret")?;
        Ok(())
    })?;
    let get = program.types.add_method(
        source,
        "Get",
        MethodSignature::new_static(Vec::new(), int32),
        MethodAttributes::STATIC,
    );
    program.body(get, |b| {
        b.field("ldsfld", seed)?.op("ret")?;
        Ok(())
    })?;

    let consumer = program.types.define_class("App", "Consumer");
    let total = program.types.add_field(consumer, "Total", int32, FieldAttributes::STATIC)?;
    program.cctor(consumer, |b| {
        b.field("ldsfld", seed)?
            .call("call", get)?
            .op("add")?
            .ldc_i4(2)?
            .op("add")?
            .field("stsfld", total)?
            .op("ret")?;
        Ok(())
    })?;

    let info = program.scan(consumer);
    assert!(info.is_preinitialized(), "{:?}", info.failure());
    assert_eq!(info.field_value(total).and_then(FrozenValue::as_i32), Some(42));
    assert_eq!(info.statistics().nested_scans.get(&source), Some(&1));
    Ok(())
}

#[test]
fn test_scan_types_matches_individual_scans() -> Result<()> {
    let program = Program::new(PointerSize::Bit64);
    let int32 = program.known(WellKnownType::Int32);
    let mut expected = Vec::new();
    for index in 0..8 {
        let ty = program.types.define_class("App", &format!("Batch{index}"));
        let field = program.types.add_field(ty, "Value", int32, FieldAttributes::STATIC)?;
        program.cctor(ty, |b| {
            b.ldc_i4(index * 10)?.field("stsfld", field)?.op("ret")?;
            Ok(())
        })?;
        expected.push((ty, field, index * 10));
    }

    let ctx = PreinitContext::new(&program.types, &program.bodies);
    let all: Vec<_> = expected.iter().map(|&(ty, _, _)| ty).collect();
    let results = scan_types(&ctx, &all);
    assert_eq!(results.len(), expected.len());
    for (info, (ty, field, value)) in results.iter().zip(expected) {
        assert_eq!(info.ty(), ty);
        assert_eq!(info.field_value(field).and_then(FrozenValue::as_i32), Some(value));
    }
    Ok(())
}

#[test]
fn test_array_size_failures_are_deterministic() -> Result<()> {
    let program = Program::new(PointerSize::Bit64);
    let byte = program.known(WellKnownType::Byte);
    let negative = program.types.define_class("App", "Negative");
    program.cctor(negative, |b| {
        b.ldc_i4(-5)?.type_op("newarr", byte)?.op("pop")?.op("ret")?;
        Ok(())
    })?;
    let huge = program.types.define_class("App", "Huge");
    program.cctor(huge, |b| {
        b.ldc_i4(1_000_000)?.type_op("newarr", byte)?.op("pop")?.op("ret")?;
        Ok(())
    })?;

    for ty in [negative, huge] {
        let first = program.scan(ty);
        let second = program.scan(ty);
        assert!(first
            .failure_reason()
            .is_some_and(|reason| reason.contains("Array out of bounds")));
        assert_eq!(first.failure(), second.failure());
    }
    Ok(())
}

#[test]
fn test_allocation_sites_are_stable() -> Result<()> {
    let program = Program::new(PointerSize::Bit64);
    let int32 = program.known(WellKnownType::Int32);
    let ty = program.types.define_class("App", "Lookup");
    let table = program.types.add_field(
        ty,
        "Table",
        program.types.make_array_type(int32),
        FieldAttributes::STATIC | FieldAttributes::INIT_ONLY,
    )?;
    program.cctor(ty, |b| {
        b.ldc_i4(4)?.type_op("newarr", int32)?.field("stsfld", table)?.op("ret")?;
        Ok(())
    })?;

    let first = program.scan(ty);
    let second = program.scan(ty);
    let site = |info: &PreinitializationInfo| {
        info.field_value(table)
            .and_then(FrozenValue::as_object)
            .map(|object| object.site)
    };
    assert_eq!(
        site(&first),
        Some(AllocationSite {
            owner: ty,
            instruction: 2
        })
    );
    assert_eq!(site(&first), site(&second));
    Ok(())
}

#[test]
fn test_reference_field_store() -> Result<()> {
    let program = Program::new(PointerSize::Bit64);
    let object = program.known(WellKnownType::Object);
    let node = program.types.define_class("App", "Node");
    let next = program
        .types
        .add_field(node, "Next", object, FieldAttributes::INIT_ONLY)?;
    let ctor = program.default_ctor(node)?;

    let with_null = program.types.define_class("App", "WithNull");
    let head = program.types.add_field(with_null, "Head", node, FieldAttributes::STATIC)?;
    program.cctor(with_null, |b| {
        b.call("newobj", ctor)?.op("dup")?.op("ldnull")?.field("stfld", next)?;
        b.field("stsfld", head)?.op("ret")?;
        Ok(())
    })?;

    let with_object = program.types.define_class("App", "WithObject");
    let tail = program.types.add_field(with_object, "Tail", node, FieldAttributes::STATIC)?;
    program.cctor(with_object, |b| {
        b.call("newobj", ctor)?.op("dup")?.call("newobj", ctor)?.field("stfld", next)?;
        b.field("stsfld", tail)?.op("ret")?;
        Ok(())
    })?;

    let info = program.scan(with_null);
    assert!(info.is_preinitialized(), "{:?}", info.failure());
    assert!(info.field_value(head).and_then(FrozenValue::as_object).is_some());

    let info = program.scan(with_object);
    assert_eq!(info.failure().map(|failure| failure.kind), Some(FailureKind::Unsupported));
    assert!(info.failure_reason().is_some_and(|reason| reason.contains("Reference field")));
    Ok(())
}

#[test]
fn test_static_delegate_layout() -> Result<()> {
    let program = Program::new(PointerSize::Bit64);
    let void = program.known(WellKnownType::Void);
    let (callback, ctor) = program.delegate_type("Callback")?;
    let ty = program.types.define_class("App", "Events");
    let handler = program.types.add_field(ty, "Handler", callback, FieldAttributes::STATIC)?;
    let target = program.types.add_method(
        ty,
        "OnEvent",
        MethodSignature::new_static(Vec::new(), void),
        MethodAttributes::STATIC,
    );
    program.cctor(ty, |b| {
        b.op("ldnull")?.method_op("ldftn", target)?.call("newobj", ctor)?;
        b.field("stsfld", handler)?.op("ret")?;
        Ok(())
    })?;

    let info = program.scan(ty);
    let delegate = info
        .field_value(handler)
        .and_then(FrozenValue::as_object)
        .expect("frozen delegate")
        .clone();
    assert!(delegate.is_known_immutable(&program.types));

    let mut factory = RecordingNodeFactory::new(&program.types);
    let this_node = factory.serialized_frozen_object(&delegate);
    let mut builder = ObjectDataBuilder::new(8);
    delegate.write_content(&mut builder, &this_node, &mut factory);

    assert_eq!(builder.len(), 40);
    let targets: Vec<_> = builder
        .relocs()
        .iter()
        .map(|reloc| (reloc.offset, reloc.target.clone()))
        .collect();
    assert_eq!(
        targets,
        vec![
            (0, Symbol::ConstructedType(callback)),
            (8, this_node.clone()),
            (24, Symbol::MethodEntrypoint(target)),
            (
                32,
                Symbol::DelegateThunk {
                    delegate: callback,
                    target
                }
            ),
        ]
    );
    assert_eq!(&builder.data()[16..24], &[0; 8]);

    let dependencies = delegate.conditional_dependencies(&mut factory);
    assert!(dependencies.contains(&Symbol::ConstructedType(callback)));
    assert!(dependencies.contains(&Symbol::MethodEntrypoint(target)));
    Ok(())
}

#[test]
fn test_closed_instance_delegate_layout() -> Result<()> {
    let program = Program::new(PointerSize::Bit64);
    let void = program.known(WellKnownType::Void);
    let (callback, ctor) = program.delegate_type("Callback")?;
    let receiver = program.types.define_class("App", "Receiver");
    let receiver_ctor = program.default_ctor(receiver)?;
    let run = program.types.add_method(
        receiver,
        "Run",
        MethodSignature::new_instance(Vec::new(), void),
        MethodAttributes::empty(),
    );
    let ty = program.types.define_class("App", "Bound");
    let handler = program.types.add_field(ty, "Handler", callback, FieldAttributes::STATIC)?;
    program.cctor(ty, |b| {
        b.call("newobj", receiver_ctor)?
            .method_op("ldftn", run)?
            .call("newobj", ctor)?;
        b.field("stsfld", handler)?.op("ret")?;
        Ok(())
    })?;

    let info = program.scan(ty);
    assert!(info.is_preinitialized(), "{:?}", info.failure());
    let delegate = info
        .field_value(handler)
        .and_then(FrozenValue::as_object)
        .expect("frozen delegate")
        .clone();
    assert!(!delegate.is_known_immutable(&program.types));
    let FrozenContent::Delegate {
        first_parameter, ..
    } = &delegate.content
    else {
        panic!("not a delegate: {:?}", delegate.content);
    };
    let bound = first_parameter.as_object().expect("bound receiver").clone();
    assert_eq!(bound.ty, receiver);

    let mut factory = RecordingNodeFactory::new(&program.types);
    let this_node = factory.serialized_frozen_object(&delegate);
    let mut builder = ObjectDataBuilder::new(8);
    delegate.write_content(&mut builder, &this_node, &mut factory);

    assert_eq!(builder.len(), 40);
    let targets: Vec<_> = builder
        .relocs()
        .iter()
        .map(|reloc| (reloc.offset, reloc.target.clone()))
        .collect();
    assert_eq!(
        targets,
        vec![
            (0, Symbol::ConstructedType(callback)),
            (8, Symbol::FrozenObject(bound.site)),
            (32, Symbol::MethodEntrypoint(target_of(&delegate))),
        ]
    );
    assert_eq!(&builder.data()[16..32], &[0; 16]);
    assert!(factory.frozen_object(bound.site).is_some());
    Ok(())
}

fn target_of(delegate: &FrozenObject) -> MethodId {
    match delegate.content {
        FrozenContent::Delegate { target, .. } => target,
        _ => panic!("not a delegate"),
    }
}

#[test]
fn test_array_layout_on_32_bit() -> Result<()> {
    let program = Program::new(PointerSize::Bit32);
    let int16 = program.known(WellKnownType::Int16);
    let ty = program.types.define_class("App", "Shorts");
    let values = program.types.add_field(
        ty,
        "Values",
        program.types.make_array_type(int16),
        FieldAttributes::STATIC,
    )?;
    program.cctor(ty, |b| {
        b.ldc_i4(2)?.type_op("newarr", int16)?;
        b.op("dup")?.ldc_i4(0)?.ldc_i4(-2)?.op("stelem.i2")?;
        b.field("stsfld", values)?.op("ret")?;
        Ok(())
    })?;

    let info = program.scan(ty);
    let array = info
        .field_value(values)
        .and_then(FrozenValue::as_object)
        .expect("frozen array")
        .clone();
    let mut factory = RecordingNodeFactory::new(&program.types);
    let this_node = factory.serialized_frozen_object(&array);
    let mut builder = ObjectDataBuilder::new(4);
    array.write_content(&mut builder, &this_node, &mut factory);

    assert_eq!(builder.data(), &[0, 0, 0, 0, 2, 0, 0, 0, 0xFE, 0xFF, 0, 0]);
    assert_eq!(builder.relocs().len(), 1);
    Ok(())
}

#[test]
fn test_write_statics_places_fields() -> Result<()> {
    let program = Program::new(PointerSize::Bit64);
    let ty = program.types.define_class("App", "Mixed");
    let byte = program.known(WellKnownType::Byte);
    let string = program.known(WellKnownType::String);
    let flag = program.types.add_field(ty, "Flag", byte, FieldAttributes::STATIC)?;
    let name = program.types.add_field(ty, "Name", string, FieldAttributes::STATIC)?;
    program.cctor(ty, |b| {
        b.ldc_i4(1)?.field("stsfld", flag)?;
        b.ldstr("mixed")?.field("stsfld", name)?;
        b.op("ret")?;
        Ok(())
    })?;

    let info = program.scan(ty);
    let mut factory = RecordingNodeFactory::new(&program.types);
    let data = write_statics(&info, &mut factory);

    let name_offset = program.types.field(name).offset;
    assert_eq!(data.data()[program.types.field(flag).offset], 1);
    assert_eq!(data.len(), name_offset + 8);
    assert_eq!(data.relocs().len(), 1);
    assert_eq!(data.relocs()[0].offset, name_offset);
    assert_eq!(data.relocs()[0].target, Symbol::FrozenString("mixed".into()));
    assert_eq!(factory.strings().collect::<Vec<_>>(), vec!["mixed"]);
    Ok(())
}

#[test]
fn test_strict_config_and_policies() -> Result<()> {
    let program = Program::new(PointerSize::Bit64);
    let int32 = program.known(WellKnownType::Int32);
    let ty = program.types.define_class("App", "Strict");
    let field = program.types.add_field(ty, "Value", int32, FieldAttributes::STATIC)?;
    program.cctor(ty, |b| {
        b.ldc_i4(0)?.field("stsfld", field)?;
        b.label("loop")?;
        b.field("ldsfld", field)?.ldc_i4(1)?.op("add")?.field("stsfld", field)?;
        b.field("ldsfld", field)?.ldc_i4(500)?.branch("blt", "loop")?;
        b.op("ret")?;
        Ok(())
    })?;

    let relaxed = PreinitContext::new(&program.types, &program.bodies);
    let info = scan_type(&relaxed, ty);
    assert_eq!(info.field_value(field).and_then(FrozenValue::as_i32), Some(500));

    let strict = relaxed.with_config(PreinitConfig::strict());
    let info = scan_type(&strict, ty);
    assert!(info.failure_reason().is_some_and(|reason| reason.contains("Instruction limit")));

    let disabled = relaxed.with_policy(&DisabledPreinitializationPolicy);
    assert_eq!(scan_type(&disabled, ty).failure_reason(), Some("Disallowed by policy"));
    Ok(())
}
