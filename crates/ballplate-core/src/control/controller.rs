//! Two-axis ball controller
//!
//! Wraps one [`Pid`] per axis and turns ball position error into a platform
//! tilt. Error along y drives pitch, error along x drives roll; the sign of
//! each axis is carried by its gains so a mirrored mechanism only needs a
//! config change.

use serde::{Deserialize, Serialize};

use crate::config::{AxisGains, BalancerConfig};
use crate::kinematics::PlatformPose;
use crate::vision::{BallPosition, Position};

use super::pid::{DerivativeFilter, Pid, PidConfig, PidTerms};

/// Where the measurement used in a step came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeasurementSource {
    /// Detected this cycle
    Fresh,
    /// Ball not seen; last known position reused
    Held,
    /// Ball never seen yet; platform kept level
    NoHistory,
}

/// Whether the step's time delta was usable
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum StepTiming {
    Nominal,
    /// dt was zero, negative or non-finite; integral and derivative skipped
    Invalid(f64),
}

/// Output of one controller update
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlStep {
    /// Commanded pose (height offset always 0)
    pub pose: PlatformPose,
    /// Position the error was computed from
    pub measured: Position,
    /// Error `measured - desired`
    pub error: Position,
    pub source: MeasurementSource,
    pub timing: StepTiming,
}

/// Controller state not held by the per-axis PIDs
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ControllerState {
    /// Last position used (hold-last-known fallback)
    pub last_position: Option<Position>,
    /// Controller clock: sum of valid time steps, seconds
    pub last_sample_time: f64,
    /// Updates processed
    pub samples: u64,
    /// Consecutive updates without a detection
    pub held_streak: u32,
    /// Updates with an unusable dt
    pub timing_anomalies: u64,
}

/// PID gains for both axes plus shared limits
#[derive(Debug, Clone, Copy)]
pub struct BallControllerConfig {
    pub x: PidConfig,
    pub y: PidConfig,
}

impl BallControllerConfig {
    /// Same limits on both axes
    pub fn new(
        gains_x: AxisGains,
        gains_y: AxisGains,
        max_tilt: f64,
        integral_limit: f64,
        derivative_filter: DerivativeFilter,
    ) -> Self {
        let axis = |g: AxisGains| {
            PidConfig::new(g.kp, g.ki, g.kd)
                .with_output_limit(max_tilt)
                .with_integral_limit(integral_limit)
                .with_derivative_filter(derivative_filter)
        };
        Self {
            x: axis(gains_x),
            y: axis(gains_y),
        }
    }

    /// Unlimited controller with the same gains on both axes
    pub fn uniform(gains: AxisGains) -> Self {
        let axis = PidConfig::new(gains.kp, gains.ki, gains.kd);
        Self { x: axis, y: axis }
    }
}

impl From<&BalancerConfig> for BallControllerConfig {
    fn from(config: &BalancerConfig) -> Self {
        Self::new(
            config.gains_x,
            config.gains_y,
            config.max_tilt,
            config.integral_limit,
            config.derivative_filter,
        )
    }
}

/// Ball position to platform tilt controller
///
/// # Example
/// ```
/// use ballplate_core::config::AxisGains;
/// use ballplate_core::control::{BallController, BallControllerConfig};
/// use ballplate_core::vision::{BallPosition, Position};
///
/// let mut controller = BallController::new(BallControllerConfig::uniform(AxisGains::new(1.0, 0.0, 0.0)));
/// let step = controller.update(BallPosition::detected(0.12, 0.08), Position::new(0.10, 0.10), 0.033);
/// assert!((step.pose.roll - 0.02).abs() < 1e-12);
/// assert!((step.pose.pitch + 0.02).abs() < 1e-12);
/// ```
#[derive(Debug, Clone)]
pub struct BallController {
    pid_x: Pid,
    pid_y: Pid,
    state: ControllerState,
}

impl BallController {
    /// Create a controller with fresh state
    pub fn new(config: BallControllerConfig) -> Self {
        Self {
            pid_x: Pid::new(config.x),
            pid_y: Pid::new(config.y),
            state: ControllerState::default(),
        }
    }

    /// Build from the session configuration
    pub fn from_config(config: &BalancerConfig) -> Self {
        Self::new(BallControllerConfig::from(config))
    }

    /// Compute the corrective pose for one cycle
    ///
    /// An undetected ball reuses the last known position, without
    /// extrapolation. A non-positive or non-finite `dt` is reported in the
    /// returned step and only the proportional term reacts to it.
    pub fn update(&mut self, measured: BallPosition, desired: Position, dt: f64) -> ControlStep {
        let timing = if Pid::is_valid_dt(dt) {
            self.state.last_sample_time += dt;
            StepTiming::Nominal
        } else {
            self.state.timing_anomalies += 1;
            tracing::warn!(dt, "controller: unusable time step, skipping integral/derivative");
            StepTiming::Invalid(dt)
        };
        self.state.samples += 1;

        let (position, source) = match (measured, self.state.last_position) {
            (BallPosition::Detected(p), _) => {
                self.state.held_streak = 0;
                (p, MeasurementSource::Fresh)
            }
            (BallPosition::Undetected, Some(last)) => {
                self.state.held_streak = self.state.held_streak.saturating_add(1);
                (last, MeasurementSource::Held)
            }
            (BallPosition::Undetected, None) => {
                self.state.held_streak = self.state.held_streak.saturating_add(1);
                return ControlStep {
                    pose: PlatformPose::level(),
                    measured: desired,
                    error: Position::default(),
                    source: MeasurementSource::NoHistory,
                    timing,
                };
            }
        };

        let error = position - desired;
        let roll = self.pid_x.update(error.x, dt);
        let pitch = self.pid_y.update(error.y, dt);
        self.state.last_position = Some(position);

        ControlStep {
            pose: PlatformPose::tilt(pitch, roll),
            measured: position,
            error,
            source,
            timing,
        }
    }

    /// Clear all accumulated state, as at construction
    pub fn reset(&mut self) {
        self.pid_x.reset();
        self.pid_y.reset();
        self.state = ControllerState::default();
    }

    /// Controller bookkeeping
    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    /// Last error per axis, as seen by the PIDs
    pub fn last_error(&self) -> Position {
        Position::new(self.pid_x.state().prev_error, self.pid_y.state().prev_error)
    }

    /// Integral accumulators per axis
    pub fn integral(&self) -> Position {
        Position::new(self.pid_x.state().integral, self.pid_y.state().integral)
    }

    /// Terms behind the last (roll, pitch) outputs
    pub fn terms(&self) -> (PidTerms, PidTerms) {
        (self.pid_x.state().terms, self.pid_y.state().terms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn p_only() -> BallController {
        BallController::new(BallControllerConfig::uniform(AxisGains::new(1.0, 0.0, 0.0)))
    }

    #[test]
    fn test_p_only_returns_raw_error() {
        let desired = Position::new(0.096, 0.096);
        for &dt in &[0.001, 0.02, 0.5] {
            let mut controller = p_only();
            let step = controller.update(BallPosition::detected(0.120, 0.050), desired, dt);
            assert_relative_eq!(step.pose.roll, 0.120 - 0.096, epsilon = 1e-12);
            assert_relative_eq!(step.pose.pitch, 0.050 - 0.096, epsilon = 1e-12);
            assert_relative_eq!(step.pose.height_offset, 0.0);
            assert_eq!(step.source, MeasurementSource::Fresh);
        }
    }

    #[test]
    fn test_undetected_holds_last_position() {
        let mut controller = p_only();
        let desired = Position::new(0.1, 0.1);
        controller.update(BallPosition::detected(0.13, 0.07), desired, 0.03);

        let step = controller.update(BallPosition::Undetected, desired, 0.03);
        assert_eq!(step.source, MeasurementSource::Held);
        assert_eq!(step.measured, Position::new(0.13, 0.07));
        assert_relative_eq!(step.pose.roll, 0.03, epsilon = 1e-12);
        assert_relative_eq!(step.pose.pitch, -0.03, epsilon = 1e-12);
        assert_eq!(controller.state().held_streak, 1);

        controller.update(BallPosition::detected(0.1, 0.1), desired, 0.03);
        assert_eq!(controller.state().held_streak, 0);
    }

    #[test]
    fn test_undetected_without_history_is_level() {
        let mut controller = p_only();
        let step = controller.update(BallPosition::Undetected, Position::new(0.1, 0.1), 0.03);
        assert_eq!(step.source, MeasurementSource::NoHistory);
        assert_eq!(step.pose, PlatformPose::level());
        assert!(controller.state().last_position.is_none());
    }

    #[test]
    fn test_held_position_has_no_derivative() {
        let gains = AxisGains::new(0.0, 0.0, 1.0);
        let mut controller = BallController::new(BallControllerConfig::uniform(gains));
        let desired = Position::default();
        controller.update(BallPosition::detected(0.0, 0.0), desired, 0.1);
        let moving = controller.update(BallPosition::detected(0.01, 0.0), desired, 0.1);
        assert_relative_eq!(moving.pose.roll, 0.1, epsilon = 1e-10);

        let held = controller.update(BallPosition::Undetected, desired, 0.1);
        assert_relative_eq!(held.pose.roll, 0.0, epsilon = 1e-10);
    }

    #[test]
    fn test_invalid_dt_reported() {
        let mut controller = BallController::new(BallControllerConfig::uniform(AxisGains::new(
            1.0, 1.0, 1.0,
        )));
        let desired = Position::default();
        controller.update(BallPosition::detected(0.01, 0.01), desired, 0.1);
        let integral = controller.integral();

        let step = controller.update(BallPosition::detected(0.02, 0.02), desired, 0.0);
        assert_eq!(step.timing, StepTiming::Invalid(0.0));
        assert!(step.pose.pitch.is_finite() && step.pose.roll.is_finite());
        assert_eq!(controller.integral(), integral);
        assert_eq!(controller.state().timing_anomalies, 1);
        assert_relative_eq!(controller.state().last_sample_time, 0.1);
    }

    #[test]
    fn test_tilt_limited_and_integral_clamped() {
        let config = BalancerConfig {
            max_tilt: 5.0,
            integral_limit: 0.01,
            ..Default::default()
        };
        let mut controller = BallController::from_config(&config);
        let desired = Position::new(0.096, 0.096);
        for _ in 0..200 {
            let step = controller.update(BallPosition::detected(0.19, 0.0), desired, 0.05);
            assert!(step.pose.pitch.abs() <= 5.0 && step.pose.roll.abs() <= 5.0);
        }
        assert!(controller.integral().x.abs() <= 0.01 + 1e-12);
        assert!(controller.integral().y.abs() <= 0.01 + 1e-12);
    }

    #[test]
    fn test_axis_mapping() {
        let mut controller = p_only();
        let step = controller.update(BallPosition::detected(0.2, 0.1), Position::new(0.1, 0.1), 0.03);
        // x error only: roll moves, pitch stays
        assert_relative_eq!(step.pose.roll, 0.1, epsilon = 1e-12);
        assert_relative_eq!(step.pose.pitch, 0.0, epsilon = 1e-12);
        assert_relative_eq!(controller.last_error().x, 0.1, epsilon = 1e-12);
        assert_relative_eq!(controller.last_error().y, 0.0);
    }

    #[test]
    fn test_reset_clears_history() {
        let mut controller = p_only();
        controller.update(BallPosition::detected(0.2, 0.1), Position::default(), 0.03);
        controller.reset();
        assert_eq!(*controller.state(), ControllerState::default());
    }
}
