use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use keyspace_finder::{
    AlphabetEnumerator, CoordinatorConfig, GeneratorOptions, MemoryCheckpointStore, NoopSampler,
    PredicateOracle, ResumableCandidateGenerator, RunStatistics, SearchSpace,
    VerificationCoordinator,
};
use num_bigint::BigUint;
use std::sync::Arc;

const DIGITS: &str = "0123456789";
const PRINTABLE: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!@#$%^&*()-_=+";

fn generator(space: SearchSpace, checkpoint_interval: u64) -> ResumableCandidateGenerator {
    ResumableCandidateGenerator::new(
        space,
        Arc::new(MemoryCheckpointStore::new()),
        GeneratorOptions {
            checkpoint_interval,
            ..GeneratorOptions::default()
        },
    )
    .expect("valid space")
}

fn bench_sequential_enumeration(c: &mut Criterion) {
    let mut group = c.benchmark_group("enumeration");
    let space = SearchSpace::new(DIGITS, 1, 5).expect("valid space");
    group.throughput(Throughput::Elements(111_110));
    group.bench_function("digits_1_to_5", |b| {
        b.iter(|| black_box(generator(space.clone(), 0).count()))
    });
    group.finish();
}

fn bench_random_access(c: &mut Criterion) {
    let enumerator = AlphabetEnumerator::new(PRINTABLE);
    let mut group = c.benchmark_group("candidate_at");
    for length in [4usize, 16, 64] {
        let ordinal = enumerator.combinations(length) / BigUint::from(3u32);
        group.bench_with_input(BenchmarkId::from_parameter(length), &ordinal, |b, ordinal| {
            b.iter(|| black_box(enumerator.candidate_at(length, ordinal)))
        });
    }
    group.finish();
}

fn bench_coordinated_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("coordinator");
    group.sample_size(20);
    let space = SearchSpace::new(DIGITS, 1, 4).expect("valid space");
    group.throughput(Throughput::Elements(11_110));

    for concurrency in [1usize, 4] {
        group.bench_with_input(
            BenchmarkId::new("no_match_checkpoint_1000", concurrency),
            &concurrency,
            |b, &concurrency| {
                let coordinator = VerificationCoordinator::new(CoordinatorConfig {
                    concurrency,
                    ..CoordinatorConfig::default()
                })
                .expect("valid config");
                b.iter(|| {
                    let mut gen = generator(space.clone(), 1000);
                    let stats = RunStatistics::with_sampler(Box::new(NoopSampler));
                    let oracle = Arc::new(PredicateOracle::new(|_: &str| false));
                    black_box(coordinator.run(&mut gen, oracle, &stats))
                })
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_sequential_enumeration,
    bench_random_access,
    bench_coordinated_run
);
criterion_main!(benches);
