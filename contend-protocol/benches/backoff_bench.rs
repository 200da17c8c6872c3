use contend_protocol::backoff::{BackoffConfig, BackoffController, BackoffMode};
use contend_protocol::metrics::{MetricsAggregator, MetricsRecorder};
use contend_protocol::random::SlotRng;
use contend_protocol::rto::{RtoConfig, RtoEstimator};
use contend_protocol::window::select_window;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::time::Duration;

fn bench_backoff_draw(c: &mut Criterion) {
    let mut group = c.benchmark_group("backoff");

    let uniform = BackoffController::new(BackoffConfig {
        window: select_window(90.0, 20.0).unwrap(),
        ..BackoffConfig::default()
    })
    .unwrap();
    let mut rng = SlotRng::seeded(1);

    group.bench_function("uniform_draw", |b| {
        b.iter(|| black_box(uniform.next_backoff_delay(&mut rng)));
    });

    let mut exponential = BackoffController::new(BackoffConfig {
        mode: BackoffMode::Exponential { ceiling: 10 },
        max_retries: 16,
        ..BackoffConfig::default()
    })
    .unwrap();
    for _ in 0..6 {
        exponential.increment_retry();
    }

    group.bench_function("exponential_draw", |b| {
        b.iter(|| black_box(exponential.next_backoff_delay(&mut rng)));
    });

    group.finish();
}

fn bench_window_selection(c: &mut Criterion) {
    c.bench_function("select_window", |b| {
        b.iter(|| black_box(select_window(black_box(65.0), black_box(12.0))));
    });
}

fn bench_rto_sample(c: &mut Criterion) {
    let mut estimator = RtoEstimator::new(RtoConfig::default()).unwrap();
    let mut rtt = 0.01;

    c.bench_function("rto_sample", |b| {
        b.iter(|| {
            rtt = if rtt > 0.05 { 0.01 } else { rtt + 0.001 };
            black_box(estimator.sample(black_box(rtt)))
        });
    });
}

fn bench_metrics_snapshot(c: &mut Criterion) {
    let mut metrics = MetricsAggregator::new();
    for _ in 0..1000 {
        metrics.record_sent(1024);
        metrics.record_received(1024, Duration::from_millis(10));
    }

    c.bench_function("metrics_snapshot", |b| {
        b.iter(|| black_box(metrics.snapshot(black_box(Duration::from_secs(10)))));
    });
}

criterion_group!(
    benches,
    bench_backoff_draw,
    bench_window_selection,
    bench_rto_sample,
    bench_metrics_snapshot
);
criterion_main!(benches);
