//! Benchmarks for stage source generation and CPU-side validation.
//!
//! Run with: `cargo bench`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use riptide::sph;
use riptide::TechniqueDesc;

fn kernel_source(desc: TechniqueDesc) -> String {
    match desc {
        TechniqueDesc::Compute { source } => source,
        TechniqueDesc::Capture { source, .. } => source,
        TechniqueDesc::Render { .. } => unreachable!("not a kernel"),
    }
}

fn bench_stage_sources(c: &mut Criterion) {
    let mut group = c.benchmark_group("stage_sources");

    group.bench_function("density_pressure", |b| {
        b.iter(|| black_box(sph::density_pressure(black_box(40))))
    });

    group.bench_function("accumulate_forces", |b| {
        b.iter(|| black_box(sph::accumulate_forces(black_box(40))))
    });

    group.bench_function("leapfrog", |b| b.iter(|| black_box(sph::leapfrog())));

    group.bench_function("reflect_boundaries", |b| {
        b.iter(|| black_box(sph::reflect_boundaries()))
    });

    group.bench_function("capture_advect", |b| {
        b.iter(|| black_box(sph::capture_advect()))
    });

    group.bench_function("point_render", |b| b.iter(|| black_box(sph::point_render())));

    group.finish();
}

fn bench_parse_and_validate(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_validate");

    for (name, desc) in [
        ("density_pressure", sph::density_pressure(40)),
        ("accumulate_forces", sph::accumulate_forces(40)),
        ("capture_advect", sph::capture_advect()),
    ] {
        let source = kernel_source(desc);
        group.bench_function(name, |b| {
            b.iter(|| {
                let module = naga::front::wgsl::parse_str(black_box(&source)).unwrap();
                let info = naga::valid::Validator::new(
                    naga::valid::ValidationFlags::all(),
                    naga::valid::Capabilities::all(),
                )
                .validate(&module)
                .unwrap();
                black_box(info)
            })
        });
    }

    group.finish();
}

fn bench_capacity_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("neighbor_capacity");

    for capacity in [8, 64, 512] {
        group.bench_with_input(
            BenchmarkId::new("density_pressure", capacity),
            &capacity,
            |b, &capacity| b.iter(|| black_box(sph::density_pressure(capacity))),
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_stage_sources,
    bench_parse_and_validate,
    bench_capacity_scaling,
);
criterion_main!(benches);
