//! Benchmarks for clause reduction and SQL rendering.
//!
//! Run with: `cargo bench`

use std::collections::BTreeMap;
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use polysql::db::RenderOnlyClient;
use polysql::query::{reduce_all, Clause, InsertRow, QueryBuilder};
use polysql::{clauses, Engine};

// ---------------------------------------------------------------------------
// Builders for each statement shape
// ---------------------------------------------------------------------------

fn builder(engine: Engine) -> QueryBuilder {
    QueryBuilder::new(Arc::new(RenderOnlyClient::new(engine, "bench")))
}

fn simple_select(qb: &mut QueryBuilder) {
    qb.from("users");
}

fn filtered_select(qb: &mut QueryBuilder) {
    qb.schema("app")
        .select(["u.id", "u.name", "count(o.id) AS orders"])
        .from("users")
        .join(["LEFT JOIN orders o ON o.user_id = u.id"])
        .where_(clauses!["u.age > 18", vec!["u.active = 1", "u.deleted_at IS NULL"]])
        .group_by(["u.id", "u.name"])
        .order_by(["orders DESC"])
        .limit(50)
        .offset(100);
}

fn bulk_insert(qb: &mut QueryBuilder) {
    let rows = (0..100).map(|i| {
        InsertRow::new()
            .set("id", i)
            .set("name", format!("user {}", i))
            .set("score", f64::from(i) * 0.5)
            .set("active", i % 2 == 0)
    });
    qb.into_table("users").insert(rows);
}

fn update(qb: &mut QueryBuilder) {
    qb.from("users")
        .update(["name = 'x'", "updated_at = CURRENT_TIMESTAMP"])
        .where_(["id = 7"]);
}

// ---------------------------------------------------------------------------
// Benchmark groups
// ---------------------------------------------------------------------------

fn bench_reduction(c: &mut Criterion) {
    let mut group = c.benchmark_group("reduction");

    let fragments: Vec<String> = (0..64).map(|i| format!("col_{} = {}", i, i)).collect();
    group.bench_function("fragments_64", |b| {
        b.iter(|| reduce_all(black_box(fragments.iter())));
    });

    let nested = vec![
        Clause::from(vec!["a = 1", "b = 2", "c = 3"]),
        Clause::from("d = 4"),
        Clause::from(vec!["e = 5"]),
    ];
    group.bench_function("mixed_lists", |b| {
        b.iter(|| reduce_all(black_box(nested.clone())));
    });

    let conditions: BTreeMap<String, String> = (0..16)
        .map(|i| (format!("k{}", i), format!("= {}", i)))
        .collect();
    group.bench_function("conditions_16", |b| {
        b.iter(|| reduce_all([Clause::from(black_box(conditions.clone()))]));
    });

    group.finish();
}

fn bench_rendering(c: &mut Criterion) {
    let mut group = c.benchmark_group("rendering");

    let cases: [(&str, fn(&mut QueryBuilder)); 4] = [
        ("simple_select", simple_select),
        ("filtered_select", filtered_select),
        ("bulk_insert_100", bulk_insert),
        ("update", update),
    ];

    for engine in [Engine::Postgres, Engine::MySql, Engine::Sqlite] {
        for (name, build) in &cases {
            let mut qb = builder(engine);
            build(&mut qb);
            group.bench_with_input(
                BenchmarkId::new(engine.to_string(), name),
                &qb,
                |b, qb| b.iter(|| qb.get_sql().unwrap()),
            );
        }
    }

    group.finish();
}

criterion_group!(benches, bench_reduction, bench_rendering);
criterion_main!(benches);
