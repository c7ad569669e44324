//! Balancing session: the Sense → Control → Kinematics → Actuate cycle
//!
//! [`Balancer`] owns every piece of per-session state. The capture thread is
//! the only other thread; it hands frames over through a [`LatestSlot`] and
//! the control thread never waits on it after startup.
//!
//! ```text
//! Idle ──start()──► Running ──stop / callback false──► Stopped
//!                      │
//!                      └─ per cycle: Sense → Control → Kinematics → Actuate
//! ```

use crossbeam_channel::{self as cc, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::control_loop::{ControlLoop, ControlLoopConfig, ControlLoopStats, StopHandle};
use super::controller::{BallController, ControlStep, StepTiming};
use crate::comm::LatestSlot;
use crate::config::BalancerConfig;
use crate::hardware::{ActuatorGateway, ApplyOutcome, GatewayStats, ServoBank};
use crate::kinematics::{InverseKinematics, PlatformGeometry, PlatformPose, ServoAngles, ARM_NAMES};
use crate::vision::{
    BallPosition, CaptureHandle, CaptureStats, CaptureWorker, CircleDetector, FrameSource,
    HoughCircleDetector, Position, PositionEstimator, RectificationFailure, Rectifier, SensedFrame,
};
use crate::{Error, Result};

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BalancerState {
    Idle,
    Running,
    Stopped,
}

/// How the ball position for a cycle was obtained
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SenseStatus {
    /// New frame, estimator ran
    Estimated,
    /// Same frame as an earlier cycle, cached estimate reused
    Cached,
    /// Latest frame older than `max_frame_age`
    Stale,
    /// Board could not be rectified in the latest frame
    RectificationFailed,
    /// Nothing published yet
    NoFrame,
}

/// What reached the actuators in one cycle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CycleOutcome {
    /// Command written; `tilt_scale < 1` when the tilt had to be reduced
    Applied { angles: ServoAngles, tilt_scale: f64 },
    /// Gateway refused the command; servos unchanged
    Rejected { axis: usize, value: f64 },
    /// No reachable pose found; actuation skipped
    Unreachable { arm: usize, ratio: f64 },
    /// Servo driver failed while writing
    ActuatorFault,
}

/// Telemetry for one cycle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub dt: f64,
    /// Sequence number of the frame used (0 if none)
    pub frame_seq: u64,
    pub sense: SenseStatus,
    pub ball: BallPosition,
    pub step: ControlStep,
    pub outcome: CycleOutcome,
}

/// Summary returned when a session ends
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionReport {
    pub cycles: u64,
    pub undetected: u64,
    pub stale_frames: u64,
    pub rectification_failures: u64,
    pub clamped: u64,
    pub skipped: u64,
    pub rejected: u64,
    pub actuator_faults: u64,
    pub timing_anomalies: u64,
    pub telemetry_dropped: u64,
    /// Persistent geometry fault reported by the gateway, if any
    pub geometry_fault: Option<String>,
    pub loop_stats: ControlLoopStats,
    pub capture: CaptureStats,
    pub gateway: GatewayStats,
}

/// One balancing session
///
/// # Example
/// ```no_run
/// use ballplate_core::config::BalancerConfig;
/// use ballplate_core::control::Balancer;
/// use ballplate_core::hardware::MockServoBank;
/// use ballplate_core::vision::{synthetic::SyntheticCamera, PassThrough};
///
/// # fn main() -> ballplate_core::Result<()> {
/// let config = BalancerConfig::default();
/// let camera = SyntheticCamera::new(480, 16.0).with_ball(300.0, 200.0);
/// let mut balancer = Balancer::new(config, camera, PassThrough, MockServoBank::new())?;
///
/// let stop = balancer.stop_handle();
/// std::thread::spawn(move || {
///     std::thread::sleep(std::time::Duration::from_secs(5));
///     stop.stop();
/// });
/// let report = balancer.run()?;
/// println!("{} cycles, {} undetected", report.cycles, report.undetected);
/// # Ok(())
/// # }
/// ```
pub struct Balancer<S, R, B, D = HoughCircleDetector> {
    config: BalancerConfig,
    state: BalancerState,
    source: Option<S>,
    rectifier: Option<R>,
    estimator: PositionEstimator<D>,
    controller: BallController,
    solver: InverseKinematics,
    gateway: ActuatorGateway<B>,
    slot: Arc<LatestSlot<SensedFrame>>,
    capture: Option<CaptureHandle>,
    stop: StopHandle,
    telemetry: Option<Sender<CycleReport>>,
    desired: Position,
    pixel_scale: f64,
    cached: Option<(u64, BallPosition)>,
    undetected_streak: u32,
    report: SessionReport,
}

impl<S, R, B> Balancer<S, R, B>
where
    S: FrameSource + 'static,
    R: Rectifier + 'static,
    B: ServoBank,
{
    /// Build a session, refusing invalid configuration or an unusable rest pose
    pub fn new(config: BalancerConfig, source: S, rectifier: R, bank: B) -> Result<Self> {
        config.validate()?;

        let solver = InverseKinematics::new(PlatformGeometry::new(config.geometry));
        let rest = solver.solve(&PlatformPose::level()).map_err(|e| {
            Error::Geometry(format!("rest pose is unreachable: {}", e))
        })?;
        if let Some((arm, angle)) = rest
            .iter()
            .enumerate()
            .find(|&(_, angle)| !config.gateway.in_range(angle))
        {
            return Err(Error::Geometry(format!(
                "rest angle of {} ({:.2}) outside [{}, {}]",
                ARM_NAMES[arm], angle, config.gateway.min_angle, config.gateway.max_angle
            )));
        }
        tracing::debug!(?rest, "balancer: rest pose solved");

        let [x, y] = config.target();
        Ok(Self {
            estimator: PositionEstimator::from_hough(config.hough),
            controller: BallController::from_config(&config),
            gateway: ActuatorGateway::new(bank, config.gateway, rest),
            solver,
            source: Some(source),
            rectifier: Some(rectifier),
            state: BalancerState::Idle,
            slot: Arc::new(LatestSlot::new()),
            capture: None,
            stop: StopHandle::new(),
            telemetry: None,
            desired: Position::new(x, y),
            pixel_scale: config.pixel_scale(),
            cached: None,
            undetected_streak: 0,
            report: SessionReport::default(),
            config,
        })
    }
}

impl<S, R, B, D> Balancer<S, R, B, D>
where
    S: FrameSource + 'static,
    R: Rectifier + 'static,
    B: ServoBank,
    D: CircleDetector,
{
    /// Swap the ball estimator (e.g. a different circle detector)
    pub fn with_estimator<D2: CircleDetector>(self, estimator: PositionEstimator<D2>) -> Balancer<S, R, B, D2> {
        Balancer {
            estimator,
            config: self.config,
            state: self.state,
            source: self.source,
            rectifier: self.rectifier,
            controller: self.controller,
            solver: self.solver,
            gateway: self.gateway,
            slot: self.slot,
            capture: self.capture,
            stop: self.stop,
            telemetry: self.telemetry,
            desired: self.desired,
            pixel_scale: self.pixel_scale,
            cached: self.cached,
            undetected_streak: self.undetected_streak,
            report: self.report,
        }
    }

    /// Subscribe to per-cycle telemetry
    ///
    /// Reports are dropped, never queued past `capacity`, when the consumer
    /// falls behind.
    pub fn telemetry(&mut self, capacity: usize) -> Receiver<CycleReport> {
        let (tx, rx) = cc::bounded(capacity);
        self.telemetry = Some(tx);
        rx
    }

    /// Handle that ends the session from any thread
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn state(&self) -> BalancerState {
        self.state
    }

    pub fn config(&self) -> &BalancerConfig {
        &self.config
    }

    pub fn controller(&self) -> &BallController {
        &self.controller
    }

    pub fn gateway(&self) -> &ActuatorGateway<B> {
        &self.gateway
    }

    /// Counters so far
    pub fn report(&self) -> &SessionReport {
        &self.report
    }

    /// Open the camera, start the capture thread and wait for a first frame
    pub fn start(&mut self) -> Result<()> {
        if self.state != BalancerState::Idle {
            return Err(Error::InvalidState(format!(
                "cannot start a session in state {:?}",
                self.state
            )));
        }
        let (Some(mut source), Some(rectifier)) = (self.source.take(), self.rectifier.take()) else {
            return Err(Error::InvalidState("capture pipeline already consumed".into()));
        };

        if let Err(e) = source.open() {
            self.state = BalancerState::Stopped;
            tracing::error!(source = source.name(), "balancer: camera unavailable: {}", e);
            return Err(e);
        }
        let source_name = source.name().to_owned();

        let capture = CaptureWorker::spawn(source, rectifier, self.slot.clone(), self.config.frame_timeout());
        let timeout = self.config.startup_timeout();
        if self.slot.wait_newer(0, timeout).is_none() {
            self.state = BalancerState::Stopped;
            capture.join()?;
            return Err(Error::Sensor(format!(
                "no frame from {} within {:?}",
                source_name, timeout
            )));
        }

        self.capture = Some(capture);
        self.state = BalancerState::Running;
        tracing::info!(
            source = %source_name,
            rate_hz = self.config.rate_hz,
            target_x = self.desired.x,
            target_y = self.desired.y,
            "balancer: session started"
        );
        Ok(())
    }

    /// Run the loop until stopped, then shut down
    ///
    /// Starts the session first if it is still idle.
    pub fn run(&mut self) -> Result<SessionReport> {
        self.run_with(None)
    }

    /// Like [`run`](Self::run), ending after `duration` at the latest
    pub fn run_for(&mut self, duration: Duration) -> Result<SessionReport> {
        self.run_with(Some(duration))
    }

    fn run_with(&mut self, duration: Option<Duration>) -> Result<SessionReport> {
        if self.state == BalancerState::Idle {
            self.start()?;
        }
        if self.state != BalancerState::Running {
            return Err(Error::InvalidState(format!("cannot run in state {:?}", self.state)));
        }

        let config = ControlLoopConfig::new(self.config.rate_hz).with_name("balance");
        let stop = self.stop.clone();
        let step = |_iteration: u64, dt: f64| {
            self.step(dt);
            true
        };
        let loop_stats = match duration {
            Some(d) => ControlLoop::run_for(config, d, &stop, step),
            None => ControlLoop::run(config, &stop, step),
        };
        self.report.loop_stats = loop_stats;

        self.shutdown()?;
        Ok(self.report.clone())
    }

    /// One Sense → Control → Kinematics → Actuate cycle
    pub fn step(&mut self, dt: f64) -> CycleReport {
        // Sense
        let (frame_seq, sense, ball) = self.sense();
        self.track_detection(&ball);

        // Control
        let step = self.controller.update(ball, self.desired, dt);
        if let StepTiming::Invalid(_) = step.timing {
            self.report.timing_anomalies += 1;
        }

        // Kinematics + Actuate
        let outcome = match self.solver.solve_clamped(&step.pose) {
            Ok(solution) => {
                if solution.was_clamped() {
                    self.report.clamped += 1;
                    tracing::debug!(
                        pitch = step.pose.pitch,
                        roll = step.pose.roll,
                        tilt_scale = solution.tilt_scale,
                        "balancer: pose out of reach, tilt reduced"
                    );
                }
                self.actuate(&solution.angles, solution.tilt_scale)
            }
            Err(Error::Unreachable { arm, ratio }) => {
                self.report.skipped += 1;
                tracing::warn!(arm = ARM_NAMES[arm], ratio, "balancer: no reachable pose, actuation skipped");
                CycleOutcome::Unreachable { arm, ratio }
            }
            Err(e) => {
                self.report.skipped += 1;
                tracing::warn!("balancer: kinematics failed: {}", e);
                CycleOutcome::Unreachable {
                    arm: 0,
                    ratio: f64::NAN,
                }
            }
        };

        let report = CycleReport {
            cycle: self.report.cycles,
            dt,
            frame_seq,
            sense,
            ball,
            step,
            outcome,
        };
        self.report.cycles += 1;
        self.publish(report);
        report
    }

    fn sense(&mut self) -> (u64, SenseStatus, BallPosition) {
        let Some(frame) = self.slot.latest() else {
            return (0, SenseStatus::NoFrame, BallPosition::Undetected);
        };
        if frame.value.captured_at().elapsed() > self.config.max_frame_age() {
            self.report.stale_frames += 1;
            return (frame.seq, SenseStatus::Stale, BallPosition::Undetected);
        }
        match &frame.value {
            SensedFrame::Failed { reason, .. } => {
                self.report.rectification_failures += 1;
                if let RectificationFailure::InsufficientCorners { found, required } = reason {
                    tracing::trace!(found, required, "balancer: too few board corners");
                }
                (frame.seq, SenseStatus::RectificationFailed, BallPosition::Undetected)
            }
            SensedFrame::Rectified { image, .. } => match self.cached {
                Some((seq, ball)) if seq == frame.seq => (frame.seq, SenseStatus::Cached, ball),
                _ => {
                    let ball = self.estimator.estimate(image, self.pixel_scale);
                    self.cached = Some((frame.seq, ball));
                    (frame.seq, SenseStatus::Estimated, ball)
                }
            },
        }
    }

    fn track_detection(&mut self, ball: &BallPosition) {
        if ball.is_detected() {
            if self.undetected_streak >= self.config.undetected_warn_after {
                tracing::info!(missed = self.undetected_streak, "balancer: ball reacquired");
            }
            self.undetected_streak = 0;
            return;
        }
        self.report.undetected += 1;
        self.undetected_streak = self.undetected_streak.saturating_add(1);
        if self.undetected_streak == self.config.undetected_warn_after {
            tracing::warn!(
                cycles = self.undetected_streak,
                "balancer: ball not detected, holding last known position"
            );
        }
    }

    fn actuate(&mut self, angles: &ServoAngles, tilt_scale: f64) -> CycleOutcome {
        match self.gateway.apply(angles) {
            Ok(ApplyOutcome::Applied(angles)) => CycleOutcome::Applied { angles, tilt_scale },
            Ok(ApplyOutcome::Rejected { axis, value }) => {
                self.report.rejected += 1;
                if self.report.geometry_fault.is_none() {
                    if let Some(fault) = self.gateway.persistent_fault() {
                        tracing::error!("balancer: {}", fault);
                        self.report.geometry_fault = Some(fault.to_string());
                    }
                }
                CycleOutcome::Rejected { axis, value }
            }
            Err(e) => {
                self.report.actuator_faults += 1;
                tracing::error!("balancer: actuation failed: {}", e);
                CycleOutcome::ActuatorFault
            }
        }
    }

    fn publish(&mut self, report: CycleReport) {
        let Some(tx) = &self.telemetry else {
            return;
        };
        match tx.try_send(report) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => self.report.telemetry_dropped += 1,
            Err(TrySendError::Disconnected(_)) => {
                tracing::debug!("balancer: telemetry receiver gone");
                self.telemetry = None;
            }
        }
    }

    /// Level the platform, release the servos and stop the capture thread
    ///
    /// Safe to call more than once.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.state == BalancerState::Stopped {
            return Ok(());
        }
        self.stop.stop();
        let was_running = self.state == BalancerState::Running;
        self.state = BalancerState::Stopped;

        if was_running {
            match self.gateway.neutral() {
                Ok(ApplyOutcome::Applied(_)) => {}
                Ok(other) => tracing::warn!(?other, "balancer: neutral pose not applied"),
                Err(e) => tracing::error!("balancer: failed to level platform: {}", e),
            }
        }
        if let Err(e) = self.gateway.release() {
            tracing::error!("balancer: failed to release servos: {}", e);
        }

        self.report.gateway = self.gateway.stats();
        let capture = self.capture.take().map(CaptureHandle::join).transpose();
        if let Some(stats) = capture? {
            self.report.capture = stats;
        }

        tracing::info!(
            cycles = self.report.cycles,
            undetected = self.report.undetected,
            clamped = self.report.clamped,
            skipped = self.report.skipped,
            rejected = self.report.rejected,
            overruns = self.report.loop_stats.overruns,
            mean_cycle_us = self.report.loop_stats.mean_iteration_time().as_micros() as u64,
            jitter_us = self.report.loop_stats.jitter().as_micros() as u64,
            "balancer: session stopped"
        );
        Ok(())
    }
}
