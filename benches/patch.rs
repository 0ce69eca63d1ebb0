#![allow(unused)]
extern crate cilpatch;

#[path = "../src/test/image.rs"]
mod image;

use cilpatch::{module::writer::write_image, patch_module, Module, PatchConfig};
use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use std::hint::black_box;

/// Loading, patching and serialising the crafted `Starter.Awake` image.
fn bench_patch(c: &mut Criterion) {
    let data = image::build_image();
    let config = PatchConfig::default().with_entries((0..32).map(|i| format!("Plugin{i}.dll")));

    let mut group = c.benchmark_group("module");
    group.throughput(Throughput::Bytes(data.len() as u64));
    group.bench_function("load", |b| {
        b.iter(|| {
            let module = Module::from_mem(black_box(data.clone())).unwrap();
            black_box(module)
        });
    });
    group.bench_function("load_patch_write", |b| {
        b.iter(|| {
            let mut module = Module::from_mem(black_box(data.clone())).unwrap();
            patch_module(&mut module, &config).unwrap();
            black_box(write_image(&module).unwrap())
        });
    });
    group.finish();
}

criterion_group!(benches, bench_patch);
criterion_main!(benches);
