use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, SamplingMode, Throughput};
use std::hint::black_box;

use querywarden::rewrite::{apply_rules, extract_columns, scan, validate_sql, BusinessRules};

/// Candidate statements of increasing size, the way the generator tends to write them.
fn candidates() -> Vec<(&'static str, String)> {
    let simple = "SELECT [Profitcenter_Name], [Sales] FROM [dbo].[ConsolidateData_PBI]".to_string();
    let filtered = "SELECT TOP 10 [Company_Name], [Sales] FROM [dbo].[ConsolidateData_PBI] \
        WHERE YEAR([From_Date]) = 2024 AND ([STATUS] = 'W' OR [STATUS] = 'D') \
        ORDER BY [Sales] DESC OFFSET 0 ROWS FETCH NEXT 10 ROWS ONLY"
        .to_string();
    let wide = {
        let cols: Vec<String> = (0..64).map(|i| format!("[Metric {}] AS [M{}]", i, i)).collect();
        format!(
            "SELECT [Region_Name], {} FROM [dbo].[ConsolidateData_PBI] WHERE [Region_Name] <> 'Closed' -- comment\nORDER BY [Region_Name]",
            cols.join(", ")
        )
    };
    vec![("simple", simple), ("filtered", filtered), ("wide", wide)]
}

fn bench_rewrite(c: &mut Criterion) {
    let rules = BusinessRules::default();
    let mut group = c.benchmark_group("rewrite");
    group.sampling_mode(SamplingMode::Flat);
    group.sample_size(50);

    for (name, sql) in candidates() {
        group.throughput(Throughput::Bytes(sql.len() as u64));
        group.bench_with_input(BenchmarkId::new("scan", name), &sql, |b, sql| {
            b.iter(|| black_box(scan(sql).map(|m| m.clauses().len())));
        });
        group.bench_with_input(BenchmarkId::new("validate_enforce_normalize", name), &sql, |b, sql| {
            b.iter(|| {
                let valid = validate_sql(sql).expect("valid candidate");
                black_box(apply_rules(valid, "store level data by month", &rules))
            });
        });
        let rewritten = apply_rules(validate_sql(&sql).expect("valid candidate"), "store level data", &rules).into_string();
        group.bench_with_input(BenchmarkId::new("extract_columns", name), &rewritten, |b, sql| {
            b.iter(|| black_box(extract_columns(sql)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_rewrite);
criterion_main!(benches);
