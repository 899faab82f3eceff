// Cache and parser benchmarks

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use skillsync::cache::TtlCache;
use skillsync::model::SkillLocation;
use skillsync::parser::{parse_skill, slugify};
use std::hint::black_box;
use std::time::Duration;

mod common;

fn bench_cache_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_set");
    for size in [1_000, 10_000, 50_000] {
        let keys: Vec<String> = (0..size).map(|i| format!("clone:files:bench/{i}:main")).collect();

        group.bench_with_input(BenchmarkId::new("keys", size), &keys, |b, keys| {
            b.iter(|| {
                let cache = TtlCache::new(Duration::from_secs(900));
                for key in keys {
                    cache.set(key.clone(), key.len());
                }
                black_box(cache.len())
            });
        });
    }
    group.finish();
}

fn bench_cache_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_get");
    for size in [1_000, 10_000, 50_000] {
        let cache = TtlCache::new(Duration::from_secs(900));
        let keys: Vec<String> = (0..size).map(|i| format!("clone:files:bench/{i}:main")).collect();
        for key in &keys {
            cache.set(key.clone(), vec![key.clone()]);
        }

        group.bench_with_input(BenchmarkId::new("keys", size), &keys, |b, keys| {
            b.iter(|| {
                let mut hits = 0;
                for key in keys {
                    if cache.get(key.as_str()).is_some() {
                        hits += 1;
                    }
                }
                black_box(hits)
            });
        });
    }
    group.finish();
}

fn bench_parse_skill(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_skill");
    for count in [100, 1_000] {
        let docs: Vec<(String, SkillLocation)> = (0..count)
            .map(|i| {
                (
                    common::skill_document(i),
                    SkillLocation::new(common::SOURCE_ID, format!("skills/{i}/SKILL.md")),
                )
            })
            .collect();

        group.bench_with_input(BenchmarkId::new("documents", count), &docs, |b, docs| {
            b.iter(|| {
                for (raw, location) in docs {
                    black_box(parse_skill(raw, location).unwrap());
                }
            });
        });
    }
    group.finish();
}

fn bench_slugify(c: &mut Criterion) {
    let titles = [
        "PDF Processing",
        "  Über-fast   Web Scraper!! (v2) ",
        "A very long skill title that keeps going well past the slug length limit of the catalog",
    ];
    c.bench_function("slugify", |b| {
        b.iter(|| {
            for title in &titles {
                black_box(slugify(black_box(title)));
            }
        });
    });
}

criterion_group!(benches, bench_cache_set, bench_cache_get, bench_parse_skill, bench_slugify);
criterion_main!(benches);
