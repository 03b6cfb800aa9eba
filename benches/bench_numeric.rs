use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use sqlnum::Numeric;

fn bench_addition(c: &mut Criterion) {
    c.bench_function("numeric_addition", |b| {
        let x = Numeric::from_str_exact("123.456789").unwrap();
        let y = Numeric::from_str_exact("987.654321").unwrap();
        b.iter(|| black_box(black_box(x) + black_box(y)));
    });
}

fn bench_subtraction(c: &mut Criterion) {
    c.bench_function("numeric_subtraction", |b| {
        let x = Numeric::from_str_exact("987.654321").unwrap();
        let y = Numeric::from_str_exact("123.456789").unwrap();
        b.iter(|| black_box(black_box(x) - black_box(y)));
    });
}

fn bench_multiplication(c: &mut Criterion) {
    c.bench_function("numeric_multiplication", |b| {
        let x = Numeric::from_str_exact("123.456789").unwrap();
        let y = Numeric::from_str_exact("9.876543").unwrap();
        b.iter(|| black_box(black_box(x) * black_box(y)));
    });
}

fn bench_division(c: &mut Criterion) {
    c.bench_function("numeric_division", |b| {
        let x = Numeric::from_str_exact("123.456789").unwrap();
        let y = Numeric::from_str_exact("9.876543").unwrap();
        b.iter(|| black_box(black_box(x) / black_box(y)));
    });
}

fn bench_parsing(c: &mut Criterion) {
    c.bench_function("numeric_parsing", |b| {
        b.iter(|| black_box(Numeric::from_str_exact("123.456789").unwrap()));
    });
}

fn bench_parsing_e_notation(c: &mut Criterion) {
    c.bench_function("numeric_parsing_e_notation", |b| {
        b.iter(|| black_box(Numeric::from_str_lossy("1.23456789e15").unwrap()));
    });
}

fn bench_formatting(c: &mut Criterion) {
    c.bench_function("numeric_formatting", |b| {
        let x = Numeric::from_str_exact("123.456789").unwrap();
        b.iter(|| black_box(format!("{}", x)));
    });
}

fn bench_power(c: &mut Criterion) {
    c.bench_function("numeric_power_integer", |b| {
        let x = Numeric::from_str_exact("1.5").unwrap();
        let exp = Numeric::from_str_exact("20").unwrap();
        b.iter(|| black_box(black_box(x).power(black_box(exp)).unwrap()));
    });
}

fn bench_to_f64(c: &mut Criterion) {
    c.bench_function("numeric_to_f64", |b| {
        let x = Numeric::from_str_exact("123456789.987654321").unwrap();
        b.iter(|| black_box(black_box(x).to_f64()));
    });
}

fn bench_from_f64(c: &mut Criterion) {
    c.bench_function("numeric_from_f64", |b| {
        b.iter(|| black_box(Numeric::from_f64(black_box(123456789.987654321)).unwrap()));
    });
}

fn bench_serialize(c: &mut Criterion) {
    c.bench_function("numeric_serialize_bytes", |b| {
        let x = Numeric::from_str_exact("-123456789.987654321").unwrap();
        b.iter(|| black_box(black_box(&x).to_bytes()));
    });
}

fn bench_sum_aggregator(c: &mut Criterion) {
    c.bench_function("numeric_sum_1000_values", |b| {
        let values: Vec<Numeric> = (0..1000).map(Numeric::from_i64).collect();
        b.iter(|| {
            let mut agg = sqlnum::NumericSumAggregator::new();
            for &v in &values {
                agg.add(v);
            }
            black_box(agg.get_sum().unwrap())
        });
    });
}

criterion_group!(
    benches,
    bench_addition,
    bench_subtraction,
    bench_multiplication,
    bench_division,
    bench_parsing,
    bench_parsing_e_notation,
    bench_formatting,
    bench_power,
    bench_to_f64,
    bench_from_f64,
    bench_serialize,
    bench_sum_aggregator,
);

criterion_main!(benches);
