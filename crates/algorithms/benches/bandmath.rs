//! Benchmarks for the band math engine

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use hrwsi_algorithms::bandmath::{
    parse, BandMathJob, BandSpec, CompiledJob, Geometry, Inputs, Plane, SourceSpec, StepSpec,
};
use hrwsi_algorithms::products::QcWeights;
use hrwsi_core::BitPlanes;
use hrwsi_parallel::ProcessingMode;
use ndarray::Array2;

fn create_flags(size: usize) -> BitPlanes {
    let values = Array2::from_shape_fn((size, size), |(row, col)| ((row * 7 + col * 13) % 256) as u8);
    BitPlanes::unpack(values.view())
}

fn create_fsc(size: usize) -> Array2<u8> {
    Array2::from_shape_fn((size, size), |(row, col)| match (row * 31 + col * 17) % 23 {
        0 => 205,
        1 => 255,
        v => (v * 4) as u8,
    })
}

/// Top of canopy QC layer over in-memory inputs
fn qc_job() -> CompiledJob {
    let steps = vec![
        StepSpec::value(
            vec![SourceSpec::new("qcflags.tif").unpacked()],
            QcWeights::default().top_of_canopy(),
        ),
        StepSpec::value(
            vec![SourceSpec::new("fsc.tif")],
            "B * (A0 != 205) * (A0 != 255) + 205 * (A0 == 205) + 255 * (A0 == 255)",
        ),
    ];
    let job = BandMathJob::new("qc.tif", vec![BandSpec::new(steps).with_nodata(255)]);
    CompiledJob::compile(&job).unwrap()
}

fn bench_parse(c: &mut Criterion) {
    let text = QcWeights::default().on_ground();
    c.bench_function("bandmath/parse_qc_grade", |b| {
        b.iter(|| parse(black_box(&text)).unwrap())
    });
}

fn bench_qc_layer(c: &mut Criterion) {
    let mut group = c.benchmark_group("bandmath/qc_top_of_canopy");
    let job = qc_job();
    for size in [256, 512, 1024] {
        let inputs = Inputs::new(vec![
            Plane::Bits(create_flags(size)),
            Plane::Values(create_fsc(size).into()),
        ]);
        let geometry = Geometry::new(size, size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                job.evaluate(black_box(&inputs), &geometry, ProcessingMode::Parallel)
                    .unwrap()
            })
        });
    }
    group.finish();
}

fn bench_tile_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("bandmath/tile_size");
    let size = 1024;
    let inputs = Inputs::new(vec![
        Plane::Bits(create_flags(size)),
        Plane::Values(create_fsc(size).into()),
    ]);
    let geometry = Geometry::new(size, size);
    for tile_size in [128, 256, 512, 0] {
        let mut job = qc_job();
        job.set_tile_size(tile_size);
        group.bench_with_input(BenchmarkId::from_parameter(tile_size), &tile_size, |b, _| {
            b.iter(|| {
                job.evaluate(black_box(&inputs), &geometry, ProcessingMode::Parallel)
                    .unwrap()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_parse, bench_qc_layer, bench_tile_size);
criterion_main!(benches);
