//! Fetch planning and resolution benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fractal_cache::{FilterNode, Intent, OrderSpec, RelationIntent};
use fractal_testkit::{blog_dataset, blog_schema, CacheHarness};

fn published(take: usize) -> Intent {
    Intent::new("post")
        .with_filter(FilterNode::eq("status", "published"))
        .with_order(OrderSpec::desc("score"))
        .with_take(take)
}

fn with_comments(take: usize) -> Intent {
    published(take).with_include(RelationIntent::new(
        "comments",
        "postId",
        Intent::new("comment").with_take(5),
    ))
}

fn harness(users: usize) -> CacheHarness {
    CacheHarness::new(blog_schema(), blog_dataset(users, 20, 5))
}

fn bench_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan");

    for take in [10usize, 100] {
        let cold = harness(10);
        group.bench_with_input(BenchmarkId::new("cold", take), &take, |b, &take| {
            let intent = with_comments(take);
            b.iter(|| {
                let plan = cold.context.plan(&cold.engine, black_box(&intent)).unwrap();
                black_box(plan);
            });
        });

        let warm = harness(10);
        let intent = with_comments(take);
        warm.executor().resolve(&intent).unwrap();
        group.bench_with_input(BenchmarkId::new("warm", take), &intent, |b, intent| {
            b.iter(|| {
                let plan = warm.context.plan(&warm.engine, black_box(intent)).unwrap();
                black_box(plan);
            });
        });
    }

    group.finish();
}

fn bench_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve");
    group.sample_size(20);

    for take in [10usize, 50] {
        group.bench_with_input(BenchmarkId::new("nested", take), &take, |b, &take| {
            let intent = with_comments(take);
            b.iter(|| {
                let harness = harness(5);
                let report = harness.executor().resolve(black_box(&intent)).unwrap();
                black_box(report);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_plan, bench_resolve);
criterion_main!(benches);
