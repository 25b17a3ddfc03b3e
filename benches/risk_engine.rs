use criterion::{black_box, criterion_group, criterion_main, Criterion};

use lending_aggregator::models::LendingAction;
use lending_aggregator::risk::{
    borrow_capacity, classify_risk, health_factor, price_drop_to_liquidation,
    simulate_health_factor, CollateralInput, RiskPolicy,
};

fn bench_health_factor(c: &mut Criterion) {
    c.bench_function("health_factor", |b| {
        b.iter(|| health_factor(black_box(125_000.0), black_box(60_000.0), black_box(0.82)))
    });

    c.bench_function("price_drop_to_liquidation", |b| {
        b.iter(|| price_drop_to_liquidation(black_box(1.71)))
    });

    c.bench_function("simulate_health_factor", |b| {
        b.iter(|| {
            simulate_health_factor(
                black_box(125_000.0),
                black_box(60_000.0),
                black_box(0.82),
                LendingAction::Borrow,
                black_box(10_000.0),
            )
        })
    });
}

fn bench_borrow_capacity(c: &mut Criterion) {
    let policy = RiskPolicy::default();
    let collaterals: Vec<CollateralInput> = (0..32)
        .map(|i| CollateralInput {
            value_usd: 1_000.0 + i as f64 * 250.0,
            ltv: 0.5 + (i as f64 % 5.0) * 0.05,
            enabled: i % 4 != 0,
        })
        .collect();

    c.bench_function("borrow_capacity_32_assets", |b| {
        b.iter(|| borrow_capacity(black_box(&collaterals), black_box(&policy)))
    });

    c.bench_function("classify_risk", |b| {
        b.iter(|| classify_risk(black_box(1.27), black_box(&policy)))
    });
}

criterion_group!(benches, bench_health_factor, bench_borrow_capacity);
criterion_main!(benches);
