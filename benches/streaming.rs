use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rasterflow::prelude::*;
use std::hint::black_box;
use std::sync::Arc;

const SIZE: u64 = 1024;

fn build_pipeline() -> (Pipeline, NodeHandle) {
    let info = ImageInfo::new(Region::from_size(SIZE, SIZE), 1, SampleType::F32);
    let mut pipeline = Pipeline::new();
    let source = pipeline.add_source(Arc::new(PatternSource::new(info, |x, y, _| {
        ((x * 13) ^ (y * 7) ^ (x * y)) as f64
    })));
    let mean = pipeline.add_stage(MeanFilterStage::new(3), &[source]).unwrap();
    let scaled = pipeline
        .add_stage(PixelMapStage::linear(2.0, 1.0), &[mean])
        .unwrap();
    (pipeline, scaled)
}

fn bench_divisions(c: &mut Criterion) {
    let mut group = c.benchmark_group("mean_pipeline");
    group.sample_size(10);

    for divisions in [1usize, 4, 16, 64] {
        for (label, strategy) in [
            ("strip", SplitStrategy::Strip),
            ("tile", SplitStrategy::Tile { alignment: 64 }),
        ] {
            let writer = StreamingWriter::default();
            group.bench_with_input(
                BenchmarkId::new(label, divisions),
                &divisions,
                |b, &divisions| {
                    b.iter(|| {
                        let (mut pipeline, terminal) = build_pipeline();
                        let mut manager = FixedDivisionsManager::new(divisions, strategy).unwrap();
                        let mut sink = MemoryBlockSink::new();
                        let report = writer
                            .run(&mut pipeline, terminal, &mut manager, &mut sink)
                            .unwrap();
                        black_box(report)
                    })
                },
            );
        }
    }
    group.finish();
}

fn bench_threads(c: &mut Criterion) {
    let mut group = c.benchmark_group("worker_pool");
    group.sample_size(10);

    for threads in [1usize, 2, 4] {
        let options = WriterOptions::new().with_engine(EngineOptions::new().with_threads(threads));
        let writer = StreamingWriter::new(options).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, _| {
            b.iter(|| {
                let (mut pipeline, terminal) = build_pipeline();
                let mut manager = FixedDivisionsManager::new(8, SplitStrategy::Strip).unwrap();
                black_box(
                    writer
                        .run_to_buffer(&mut pipeline, terminal, &mut manager)
                        .unwrap(),
                )
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_divisions, bench_threads);
criterion_main!(benches);
