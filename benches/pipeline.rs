use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use olap_gateway::cache::{FingerprintCache, MemoryStore};
use olap_gateway::compiler::compile;
use olap_gateway::materialize::{materialize, CellValue, RowSet, TabularCursor};
use olap_gateway::{Fingerprint, OutputFormat, QueryRequest};
use std::sync::Arc;

fn create_rows(count: usize) -> RowSet {
    let mut rows = RowSet::new([
        "[Product].[Product].[Product].[MEMBER_CAPTION]",
        "[Date].[Year].[Year].[MEMBER_CAPTION]",
        "[Measures].[Sales Amount]",
    ]);
    for i in 0..count {
        rows.push_row([
            CellValue::Text(format!("Product {}", i / 10)),
            CellValue::Text(format!("{}", 2000 + i % 10)),
            CellValue::Float(i as f64 * 1.25),
        ]);
    }
    rows
}

fn create_request() -> QueryRequest {
    QueryRequest::new(
        "sales-model",
        vec![
            "[Measures].[Sales Amount]".to_string(),
            "[Measures].[Sales Count]".to_string(),
        ],
    )
    .with_filters(vec![
        "[Product].[Category].&[Fruit]".to_string(),
        "[Region].[Country].&[NL]".to_string(),
    ])
    .with_slices(vec!["[Date].[Year].[All].children".to_string()])
    .with_custom_sets(vec!["recent as { [Date].[Year].&[2020] : [Date].[Year].&[2023] }".to_string()])
    .with_default_measure("[Measures].[Sales Count]")
}

fn bench_fingerprint_and_compile(c: &mut Criterion) {
    let request = create_request();

    c.bench_function("fingerprint", |b| {
        b.iter(|| black_box(Fingerprint::of(black_box(&request)).unwrap()))
    });

    c.bench_function("compile_mdx", |b| {
        b.iter(|| black_box(compile(black_box(&request)).unwrap()))
    });
}

fn bench_materialize(c: &mut Criterion) {
    let mut group = c.benchmark_group("materialize");

    for size in [100, 1000, 10000].iter() {
        let rows = create_rows(*size);

        for format in OutputFormat::ALL {
            group.bench_with_input(
                BenchmarkId::new(format!("{:?}", format), size),
                size,
                |b, _| {
                    b.iter(|| {
                        let mut cursor = rows.clone();
                        black_box(
                            materialize(Some(&mut cursor as &mut dyn TabularCursor), format)
                                .unwrap(),
                        )
                    });
                },
            );
        }
    }

    group.finish();
}

fn bench_cache(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let mut group = c.benchmark_group("cache");

    for sessions in [1, 10, 100].iter() {
        let cache = FingerprintCache::text(Arc::new(MemoryStore::new()));
        rt.block_on(async {
            for s in 0..*sessions {
                cache
                    .set_default("group", &format!("session-{}", s), &"payload".to_string())
                    .await
                    .unwrap();
            }
        });

        group.bench_with_input(BenchmarkId::from_parameter(sessions), sessions, |b, _| {
            b.iter(|| rt.block_on(async { black_box(cache.get("group").await.unwrap()) }));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_fingerprint_and_compile, bench_materialize, bench_cache);
criterion_main!(benches);
