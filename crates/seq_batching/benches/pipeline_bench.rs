use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use seq_batching::{
    Collator, Example, InputConfig, InputPipeline, Packer, PackerConfig, PaddingCollator,
    PaddingRule,
};

/// Benchmarks for the batching hot paths.
///
/// This measures:
/// 1. Packing: greedy (window 1) vs. first-fit over 8 open rows
/// 2. Collation: padding 64 examples to the bucket max vs. a fixed length
/// 3. End to end: `InputPipeline::from_examples` over in-memory examples
///
/// To run these, use:
/// ```bash
/// cargo bench --bench pipeline_bench
/// ```

const SIZES: [usize; 3] = [1_000, 10_000, 50_000];

fn make_examples(n: usize, max_len: usize) -> Vec<Example> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..n)
        .map(|_| {
            let src: Vec<i64> = (0..rng.random_range(1..=max_len))
                .map(|_| rng.random_range(5..73))
                .collect();
            let tgt: Vec<i64> = (0..rng.random_range(1..=max_len))
                .map(|_| rng.random_range(5..73))
                .collect();
            Example::from_tokens(&src, &tgt, 1, 2)
        })
        .collect()
}

fn bench_packing(c: &mut Criterion) {
    let mut group = c.benchmark_group("Packing");

    for &size in &SIZES {
        let examples = make_examples(size, 64);
        group.throughput(Throughput::Elements(size as u64));

        for window in [1usize, 8] {
            group.bench_with_input(
                BenchmarkId::new(format!("window_{}", window), size),
                &examples,
                |b, examples| {
                    b.iter(|| {
                        let config = PackerConfig {
                            source_capacity: 256,
                            target_capacity: 256,
                            window,
                            ..PackerConfig::default()
                        };
                        let packer = Packer::new(examples.iter().cloned().map(Ok), config);
                        black_box(packer.count());
                    })
                },
            );
        }
    }
    group.finish();
}

fn bench_collate(c: &mut Criterion) {
    let mut group = c.benchmark_group("Collate");
    let examples = make_examples(64, 128);

    let bucket_max = PaddingCollator::new(PaddingRule::MaxLength, PaddingRule::MaxLength);
    let fixed = PaddingCollator::new(PaddingRule::Fixed(256), PaddingRule::Fixed(256));

    group.bench_function("bucket_max", |b| {
        b.iter(|| black_box(bucket_max.collate(&examples).ok()))
    });
    group.bench_function("fixed_256", |b| {
        b.iter(|| black_box(fixed.collate(&examples).ok()))
    });
    group.finish();
}

fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("Pipeline");
    group.sample_size(10);

    for &size in &SIZES {
        let examples = make_examples(size, 100);
        group.throughput(Throughput::Elements(size as u64));

        for packed in [false, true] {
            let name = if packed { "packed" } else { "unpacked" };
            group.bench_with_input(BenchmarkId::new(name, size), &examples, |b, examples| {
                b.iter(|| {
                    let config = InputConfig::builder()
                        .bucket_upper_bound(vec![32, 64, 128, 256])
                        .bucket_batch_limit(vec![64, 32, 16, 8])
                        .packed_input(packed)
                        .source_max_length(256)
                        .target_max_length(256)
                        .build();
                    let items: Vec<_> = examples.iter().cloned().map(Ok).collect();
                    let pipeline = match InputPipeline::from_examples(config, items) {
                        Ok(p) => p,
                        Err(e) => panic!("pipeline construction failed: {:#}", e),
                    };
                    black_box(pipeline.filter_map(Result::ok).count());
                })
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_packing, bench_collate, bench_pipeline);
criterion_main!(benches);
