//! Benchmarks for the per-cycle control path
//!
//! Run with: cargo bench --bench control_loop

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;

use ballplate_core::config::{AxisGains, BalancerConfig};
use ballplate_core::control::{BallController, DerivativeFilter, Pid, PidConfig};
use ballplate_core::kinematics::{InverseKinematics, PlatformPose, ServoAngles};
use ballplate_core::vision::synthetic::render_board;
use ballplate_core::vision::{BallPosition, Position, PositionEstimator};

/// Benchmark PID controller update
fn bench_pid_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("PID");

    group.bench_function("P controller update", |b| {
        let mut pid = Pid::p(150.0);
        let dt = 1.0 / 30.0;

        b.iter(|| black_box(pid.update(black_box(0.01), dt)))
    });

    group.bench_function("PID with filter", |b| {
        let config = PidConfig::new(150.0, 5.0, 60.0)
            .with_derivative_filter(DerivativeFilter::MODERATE)
            .with_output_limit(12.0)
            .with_integral_limit(0.05);
        let mut pid = Pid::new(config);
        let dt = 1.0 / 30.0;

        b.iter(|| black_box(pid.update(black_box(0.01), dt)))
    });

    group.bench_function("ball controller update", |b| {
        let config = BalancerConfig::default().with_gains(AxisGains::new(150.0, 5.0, 60.0));
        let mut controller = BallController::from_config(&config);
        let desired = Position::new(0.096, 0.096);

        b.iter(|| {
            black_box(controller.update(
                black_box(BallPosition::detected(0.110, 0.080)),
                desired,
                1.0 / 30.0,
            ))
        })
    });

    group.finish();
}

/// Benchmark the kinematics solves done each cycle
fn bench_kinematics(c: &mut Criterion) {
    let mut group = c.benchmark_group("Kinematics");
    let ik = InverseKinematics::default();

    group.bench_function("solve", |b| {
        let pose = PlatformPose::tilt(6.0, -4.0);
        b.iter(|| black_box(ik.solve(black_box(&pose))))
    });

    group.bench_function("solve_clamped (unreachable)", |b| {
        let pose = PlatformPose::new(40.0, 40.0, 0.0);
        b.iter(|| black_box(ik.solve_clamped(black_box(&pose))))
    });

    group.bench_function("forward", |b| {
        let angles: ServoAngles = ik.solve(&PlatformPose::tilt(6.0, -4.0)).unwrap_or_default();
        b.iter(|| black_box(ik.forward(black_box(&angles))))
    });

    group.finish();
}

/// Benchmark ball estimation over rectified images of increasing size
fn bench_estimator(c: &mut Criterion) {
    let mut group = c.benchmark_group("Estimator");
    group.sample_size(20);

    let estimator = PositionEstimator::default();
    for side in [240u32, 480] {
        let scale = 0.192 / side as f64;
        let img = render_board(side, Some((side as f32 * 0.6, side as f32 * 0.4)), side as f32 / 30.0);
        group.bench_with_input(BenchmarkId::new("hough", side), &img, |b, img| {
            b.iter(|| black_box(estimator.estimate(black_box(img), scale)))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_pid_update, bench_kinematics, bench_estimator);
criterion_main!(benches);
