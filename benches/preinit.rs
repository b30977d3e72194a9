//! Benchmarks for static constructor preinitialization.
//!
//! Measures the interpreter on the shapes static constructors typically have:
//! - Counting loops over locals and statics
//! - Lookup tables filled from mapped data
//! - Many small constructors scanned in parallel

extern crate cilpreinit;

use cilpreinit::prelude::*;
use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

fn quiet() {
    let _ = tracing_subscriber::fmt::Subscriber::builder()
        .with_max_level(tracing::Level::ERROR)
        .try_init();
}

/// A counting loop of `iterations` rounds that stores the result.
fn counting_loop(
    types: &TypeSystem,
    bodies: &InMemoryMethodBodies,
    name: &str,
    iterations: i32,
) -> Result<TypeId> {
    let ty = types.define_class("Bench", name);
    let int32 = types.well_known(WellKnownType::Int32);
    let field = types.add_field(ty, "Count", int32, FieldAttributes::STATIC)?;
    let cctor = types.add_static_constructor(ty)?;

    let mut b = MethodBodyBuilder::new(types);
    let i = b.local(int32)?;
    b.ldc_i4(0)?.stloc(i)?;
    b.label("loop")?;
    b.ldloc(i)?.ldc_i4(1)?.op("add")?.stloc(i)?;
    b.ldloc(i)?.ldc_i4(iterations)?.branch("blt", "loop")?;
    b.ldloc(i)?.field("stsfld", field)?.op("ret")?;
    bodies.insert(cctor, b.build()?);
    Ok(ty)
}

/// Benchmark a constructor that runs close to the default instruction budget.
fn bench_counting_loop(c: &mut Criterion) {
    quiet();
    let types = TypeSystem::new(PointerSize::Bit64);
    let bodies = InMemoryMethodBodies::new(&types);
    let ty = counting_loop(&types, &bodies, "Loop", 10_000).unwrap();
    let ctx = PreinitContext::new(&types, &bodies);

    c.bench_function("preinit_counting_loop_10k", |b| {
        b.iter(|| {
            let info = scan_type(black_box(&ctx), black_box(ty));
            assert!(info.is_preinitialized());
            black_box(info)
        });
    });
}

/// Benchmark `RuntimeHelpers.InitializeArray` over a 4 KiB table.
fn bench_initialize_array(c: &mut Criterion) {
    quiet();
    let types = TypeSystem::new(PointerSize::Bit64);
    let bodies = InMemoryMethodBodies::new(&types);
    let byte = types.well_known(WellKnownType::Byte);
    let guid = types.well_known(WellKnownType::Guid);
    let ty = types.define_class("Bench", "Table");
    let table = types
        .add_field(ty, "Table", types.make_array_type(guid), FieldAttributes::STATIC)
        .unwrap();
    let data = types
        .add_field(
            ty,
            "Data",
            byte,
            FieldAttributes::STATIC | FieldAttributes::INIT_ONLY | FieldAttributes::HAS_FIELD_RVA,
        )
        .unwrap();
    let bytes: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
    types.set_rva_data(data, &bytes).unwrap();
    let helpers = types.well_known(WellKnownType::RuntimeHelpers);
    let initialize = types
        .find_method_by_name(helpers, "InitializeArray")
        .unwrap();
    let cctor = types.add_static_constructor(ty).unwrap();

    let mut b = MethodBodyBuilder::new(&types);
    b.ldc_i4(256).unwrap().type_op("newarr", guid).unwrap().op("dup").unwrap();
    b.field("ldtoken", data).unwrap().call("call", initialize).unwrap();
    b.field("stsfld", table).unwrap().op("ret").unwrap();
    bodies.insert(cctor, b.build().unwrap());
    let ctx = PreinitContext::new(&types, &bodies);

    c.bench_function("preinit_initialize_array_4k", |b| {
        b.iter(|| {
            let info = scan_type(black_box(&ctx), black_box(ty));
            assert!(info.is_preinitialized());
            black_box(info)
        });
    });
}

/// Benchmark scanning 64 independent types through the parallel entry point.
fn bench_scan_types(c: &mut Criterion) {
    quiet();
    let types = TypeSystem::new(PointerSize::Bit64);
    let bodies = InMemoryMethodBodies::new(&types);
    let all: Vec<_> = (0..64)
        .map(|index| counting_loop(&types, &bodies, &format!("Batch{index}"), 500).unwrap())
        .collect();
    let ctx = PreinitContext::new(&types, &bodies);

    c.bench_function("preinit_scan_types_64", |b| {
        b.iter(|| black_box(scan_types(black_box(&ctx), black_box(&all))));
    });
}

criterion_group!(
    benches,
    bench_counting_loop,
    bench_initialize_array,
    bench_scan_types,
);
criterion_main!(benches);
