use bridgeorm::{Builder, Capabilities, Record, Value};
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

/// A FIND over `n` equality terms with order and a slice.
fn build_find(n: usize) -> Builder {
    let mut hash = Record::new();
    for i in 0..n {
        hash.insert(format!("col{i}"), Value::from(i as i64));
    }
    Builder::new("t")
        .filter(hash)
        .order("col0 DESC")
        .limit(10)
        .offset(20)
}

fn bench_compile(c: &mut Criterion) {
    let relational = Capabilities::relational();
    let document = Capabilities::document();

    let mut group = c.benchmark_group("compile/find");
    for n in [1, 5, 10, 50] {
        let builder = build_find(n);
        group.bench_with_input(BenchmarkId::new("sql", n), &builder, |b, builder| {
            b.iter(|| black_box(builder.compile(&relational)));
        });
        group.bench_with_input(BenchmarkId::new("document", n), &builder, |b, builder| {
            b.iter(|| black_box(builder.compile(&document)));
        });
    }
    group.finish();
}

fn bench_raw_where(c: &mut Criterion) {
    let relational = Capabilities::relational();
    let values: Vec<Value> = (0..20).map(Value::from).collect();
    let builder = Builder::new("t")
        .where_raw("name <> 'a?b' AND id IN (?)", vec![Value::Array(values)]);

    c.bench_function("compile/raw_where_expand", |b| {
        b.iter(|| black_box(builder.compile(&relational)));
    });
}

criterion_group!(benches, bench_compile, bench_raw_where);
criterion_main!(benches);
