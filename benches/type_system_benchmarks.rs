//! Benchmarks for registry lookups, variant tables and serialization.
//!
//! ```bash
//! cargo bench --bench type_system_benchmarks
//! ```

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use metatype::prelude::*;
use std::hint::black_box;

fn registry() -> TypeRegistry {
    let types = metatype::type_system().expect("type system");
    types
        .class("Particle")
        .field("position", "[3]float")
        .and_then(|b| b.field("velocity", "[3]float"))
        .and_then(|b| b.field("tags", "array<string>"))
        .and_then(|b| b.field_default("lifetime", "float", "2.0"))
        .and_then(|b| b.build())
        .expect("Particle");
    types
}

fn benchmark_lookups(c: &mut Criterion) {
    let types = registry();
    // warm the compound cache
    types.find("array<array<Particle>>").expect("compound");

    let mut group = c.benchmark_group("registry/find");
    group.bench_function("simple", |b| b.iter(|| types.find(black_box("int32"))));
    group.bench_function("alternative_name", |b| b.iter(|| types.find(black_box("int"))));
    group.bench_function("class", |b| b.iter(|| types.find(black_box("Particle"))));
    group.bench_function("compound_cached", |b| {
        b.iter(|| types.find(black_box("array<array<Particle>>")))
    });
    group.bench_function("missing", |b| b.iter(|| types.find(black_box("NoSuchType"))));
    group.finish();
}

fn benchmark_variant_table(c: &mut Criterion) {
    let types = registry();
    let keys: Vec<String> = (0..256).map(|i| format!("key{i}")).collect();

    let mut group = c.benchmark_group("variant_table");
    group.throughput(Throughput::Elements(keys.len() as u64));
    group.bench_function("insert_256", |b| {
        b.iter(|| {
            let mut table = VariantTable::new();
            for (i, key) in keys.iter().enumerate() {
                table.set(&types, key, i as i32);
            }
            black_box(table.len())
        })
    });

    let mut table = VariantTable::new();
    for (i, key) in keys.iter().enumerate() {
        table.set(&types, key, i as i32);
    }
    group.bench_function("find_256", |b| {
        b.iter(|| {
            for key in &keys {
                black_box(table.find(key));
            }
        })
    });
    group.finish();
}

fn benchmark_serialization(c: &mut Criterion) {
    let types = registry();
    let particle = types.find("Particle").expect("Particle");
    let mut value = DataBlob::new(particle.clone());
    let mut view = TypedMemory::of_blob(&mut value);
    let _ = view.set_path_text("position[1]", "4.5");
    let _ = view.set_path_text("lifetime", "7");
    if let Ok(mut tags) = view.member_mut("tags") {
        let _ = tags.resize(8);
    }

    let bytes = save_binary(&value, BinaryWriterOptions::default()).expect("save");
    let text = save_text(&value, TextWriterOptions::default()).expect("save");

    let mut group = c.benchmark_group("stream");
    group.throughput(Throughput::Bytes(bytes.len() as u64));
    group.bench_function("save_binary", |b| {
        b.iter(|| save_binary(black_box(&value), BinaryWriterOptions::default()))
    });
    group.bench_function("load_binary", |b| {
        b.iter(|| {
            let mut target = DataBlob::new(particle.clone());
            let mut errors = ErrorCollector::new();
            load_binary(black_box(&bytes), &mut target, &types, &mut errors)
        })
    });
    group.throughput(Throughput::Bytes(text.len() as u64));
    group.bench_function("save_text", |b| {
        b.iter(|| save_text(black_box(&value), TextWriterOptions::default()))
    });
    group.bench_function("load_text", |b| {
        b.iter(|| {
            let mut target = DataBlob::new(particle.clone());
            load_text(black_box(&text), &mut target, Some(&types))
        })
    });
    group.finish();
}

criterion_group!(
    benches,
    benchmark_lookups,
    benchmark_variant_table,
    benchmark_serialization
);
criterion_main!(benches);
