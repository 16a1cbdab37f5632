use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use training_load_sync::services::training_load::{backfill, step};

/// Ten years of days: four rides a week, rest otherwise.
fn history(days: usize) -> Vec<f64> {
    (0..days)
        .map(|i| match i % 7 {
            0 | 2 | 4 => 60.0 + (i % 40) as f64,
            5 => 180.0,
            _ => 0.0,
        })
        .collect()
}

fn benchmark_training_load(c: &mut Criterion) {
    let start = NaiveDate::from_ymd_opt(2015, 1, 1).expect("valid date");
    let stresses = history(3650);

    let mut group = c.benchmark_group("training_load");

    group.bench_function("backfill_ten_years", |b| {
        b.iter(|| backfill(black_box(start), black_box(&stresses), None))
    });

    // Incremental update of the last day, given the stored prior
    let series = backfill(start, &stresses, None);
    let prior = series[series.len() - 2];
    group.bench_function("step_one_day", |b| {
        b.iter(|| step(black_box(&prior), black_box(95.0)))
    });

    group.finish();
}

criterion_group!(benches, benchmark_training_load);
criterion_main!(benches);
