//! Criterion benchmarks for streamline generation and graph building.
//! Focus sizes: square domains of side {100, 200, 400}.

use bevy::math::Vec2;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tensor_streets::procgen::graph::StreetGraph;
use tensor_streets::procgen::streamline::{StreamlineGenerator, StreamlineParams};
use tensor_streets::procgen::tensor::TensorField;

fn city_field() -> TensorField {
    let mut field = TensorField::default();
    field.add_grid(Vec2::new(100.0, 100.0), 300.0, 1.0, 0.3).unwrap();
    field.add_radial(Vec2::new(-80.0, -60.0), 200.0, 2.0).unwrap();
    field
}

fn generate(field: &TensorField, side: f32) -> StreamlineGenerator {
    let mut generator = StreamlineGenerator::new(
        Vec2::splat(-side / 2.0),
        Vec2::splat(side),
        StreamlineParams::default(),
        7,
    )
    .unwrap();
    generator.generate(field);
    generator
}

fn bench_generation(c: &mut Criterion) {
    let field = city_field();
    let mut group = c.benchmark_group("streamlines");
    group.sample_size(10);
    for &side in &[100.0f32, 200.0, 400.0] {
        group.bench_with_input(BenchmarkId::new("generate", side), &side, |b, &side| {
            b.iter(|| black_box(generate(&field, side)))
        });
    }
    group.finish();
}

fn bench_graph(c: &mut Criterion) {
    let field = city_field();
    let mut group = c.benchmark_group("graph");
    for &side in &[100.0f32, 200.0, 400.0] {
        let streamlines = generate(&field, side).simplified_streamlines().to_vec();
        group.bench_with_input(BenchmarkId::new("build_pruned", side), &streamlines, |b, s| {
            b.iter(|| black_box(StreetGraph::build_pruned(s, 0.25)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_generation, bench_graph);
criterion_main!(benches);
