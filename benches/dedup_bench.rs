// Slug deduplication and batch persistence benchmarks

use criterion::async_executor::AsyncExecutor;
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use skillsync::scraper::{Claim, Deduplicator};
use std::hint::black_box;
use tokio::runtime::Runtime;

mod common;

struct TokioExecutor(Runtime);

impl AsyncExecutor for TokioExecutor {
    fn block_on<T>(&self, future: impl std::future::Future<Output = T>) -> T {
        self.0.block_on(future)
    }
}

fn bench_claim(c: &mut Criterion) {
    let mut group = c.benchmark_group("dedup_claim");
    group.sample_size(20);
    // 1 = no collisions, 10 = groups of ten candidates sharing a base slug
    for collide_every in [1, 10] {
        let skills = common::generate_skills(500, collide_every);

        group.bench_with_input(
            BenchmarkId::new("collide_every", collide_every),
            &skills,
            |b, skills| {
                b.to_async(TokioExecutor(Runtime::new().unwrap())).iter(|| {
                    let skills = skills.clone();
                    async move {
                        let db = common::setup_bench_db().await;
                        let dedup = Deduplicator::default();
                        let mut accepted = 0;
                        for skill in skills {
                            if let Claim::Accepted(_) = dedup.claim(&db, skill).await.unwrap() {
                                accepted += 1;
                            }
                        }
                        black_box(accepted)
                    }
                });
            },
        );
    }
    group.finish();
}

fn bench_apply_source_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("db_apply_source_scan");
    group.sample_size(20);
    for size in [100, 1_000] {
        let skills = common::generate_skills(size, 1);

        group.bench_with_input(BenchmarkId::new("skills", size), &skills, |b, skills| {
            b.to_async(TokioExecutor(Runtime::new().unwrap())).iter(|| async {
                let db = common::setup_bench_db().await;
                let outcome = db.apply_source_scan(&common::bench_source(), skills).await.unwrap();
                black_box(outcome)
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_claim, bench_apply_source_scan);
criterion_main!(benches);
