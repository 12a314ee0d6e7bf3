use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;
use visitstore::chain::engine::ChainEngine;
use visitstore::core::types::TABLE_SIZE;
use visitstore::{Config, Record};

fn visit(id: i32) -> Record {
    Record {
        date: "2024-06-01".to_string(),
        id,
        first_name: "Carlos".to_string(),
        last_name: "Vargas".to_string(),
        age: 45,
        practitioner: "Dr. Rivas".to_string(),
        reason: "Control anual".to_string(),
        tests: "Perfil lipidico".to_string(),
        results: "Normal".to_string(),
        prescription: "Ninguna".to_string(),
        next: None,
    }
}

// Store with `count` records spread over `distinct` identifiers
fn populated(count: usize, distinct: i32) -> (tempfile::TempDir, ChainEngine) {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::default().with_data_dir(dir.path()).with_file_lock(false);
    let mut engine = ChainEngine::open(&config).unwrap();
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..count {
        engine.insert(visit(rng.gen_range(1..=distinct))).unwrap();
    }
    (dir, engine)
}

fn bench_insert(c: &mut Criterion) {
    let (_dir, mut engine) = populated(0, 1);
    let mut rng = StdRng::seed_from_u64(11);

    c.bench_function("insert", |b| {
        b.iter(|| engine.insert(black_box(visit(rng.gen_range(1..=1_000_000)))).unwrap())
    });
}

fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("search");

    // same record count, chains get longer as identifiers collide more
    for distinct in [10_000, 1_000, 100] {
        let (_dir, mut engine) = populated(20_000, distinct);
        group.bench_with_input(BenchmarkId::new("by_id", distinct), &distinct, |b, &distinct| {
            let mut rng = StdRng::seed_from_u64(3);
            b.iter(|| engine.search(black_box(rng.gen_range(1..=distinct))).unwrap())
        });
    }

    // identifiers sharing the low bits all land in one chain
    let (_dir, mut engine) = populated(0, 1);
    for k in 0..2_000 {
        engine.insert(visit(5 + k * TABLE_SIZE as i32)).unwrap();
    }
    group.bench_function("colliding_chain", |b| {
        b.iter(|| engine.search(black_box(5)).unwrap())
    });

    group.finish();
}

criterion_group!(benches, bench_insert, bench_search);
criterion_main!(benches);
