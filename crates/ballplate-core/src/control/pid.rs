//! Single-axis PID controller
//!
//! Used once per ball axis. Adds integral clamping (anti-windup), optional
//! derivative filtering and a guard against non-positive time steps, none
//! of which a bare textbook PID has.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Derivative term filtering configuration
///
/// Ball positions come from a camera, so the raw derivative is dominated by
/// pixel quantization noise. A first-order low-pass on the derivative trades
/// a little phase lag for a usable damping term.
///
/// # Example
/// ```
/// use ballplate_core::control::DerivativeFilter;
///
/// let filter = DerivativeFilter::MODERATE;
/// assert_eq!(filter.alpha(), 0.5);
///
/// // 5 Hz cutoff on a 30 Hz camera loop
/// let filter = DerivativeFilter::CutoffFrequency { cutoff_hz: 5.0, sample_rate_hz: 30.0 };
/// assert!(filter.alpha() > 0.0 && filter.alpha() < 1.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum DerivativeFilter {
    /// Raw derivative passes through
    #[default]
    Disabled,

    /// Low-pass with explicit alpha; 1.0 = no filtering, 0.0 = frozen
    LowPass {
        /// Smoothing factor (0-1). Higher = less smoothing.
        alpha: f64,
    },

    /// Low-pass computed from a cutoff frequency at the loop rate
    CutoffFrequency {
        /// Cutoff frequency in Hz
        cutoff_hz: f64,
        /// Control loop rate in Hz
        sample_rate_hz: f64,
    },
}

impl DerivativeFilter {
    /// Light filtering (alpha = 0.8)
    pub const LIGHT: Self = Self::LowPass { alpha: 0.8 };

    /// Moderate filtering (alpha = 0.5)
    pub const MODERATE: Self = Self::LowPass { alpha: 0.5 };

    /// Heavy filtering (alpha = 0.2)
    pub const HEAVY: Self = Self::LowPass { alpha: 0.2 };

    /// Reject parameters that would make [`alpha`](Self::alpha) meaningless
    pub fn validate(&self) -> Result<()> {
        match *self {
            Self::Disabled => Ok(()),
            Self::LowPass { alpha } if (0.0..=1.0).contains(&alpha) => Ok(()),
            Self::LowPass { alpha } => Err(Error::Config(format!(
                "derivative filter alpha must be in [0, 1], got {}",
                alpha
            ))),
            Self::CutoffFrequency {
                cutoff_hz,
                sample_rate_hz,
            } => {
                for (name, hz) in [("cutoff_hz", cutoff_hz), ("sample_rate_hz", sample_rate_hz)] {
                    if !(hz.is_finite() && hz > 0.0) {
                        return Err(Error::Config(format!(
                            "derivative filter {} must be positive, got {}",
                            name, hz
                        )));
                    }
                }
                Ok(())
            }
        }
    }

    /// Smoothing factor for this configuration
    pub fn alpha(&self) -> f64 {
        match self {
            Self::Disabled => 1.0,
            Self::LowPass { alpha } => alpha.clamp(0.0, 1.0),
            Self::CutoffFrequency {
                cutoff_hz,
                sample_rate_hz,
            } => {
                // alpha = dt / (RC + dt), RC = 1 / (2 pi fc)
                let dt = 1.0 / sample_rate_hz;
                let rc = 1.0 / (2.0 * std::f64::consts::PI * cutoff_hz);
                (dt / (rc + dt)).clamp(0.0, 1.0)
            }
        }
    }
}

/// PID controller configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PidConfig {
    /// Proportional gain
    pub kp: f64,
    /// Integral gain
    pub ki: f64,
    /// Derivative gain
    pub kd: f64,
    /// Output minimum limit
    pub output_min: f64,
    /// Output maximum limit
    pub output_max: f64,
    /// Bound on the integral accumulator (f64::INFINITY for none)
    pub integral_limit: f64,
    /// Derivative term filtering
    pub derivative_filter: DerivativeFilter,
}

impl Default for PidConfig {
    fn default() -> Self {
        Self {
            kp: 1.0,
            ki: 0.0,
            kd: 0.0,
            output_min: f64::NEG_INFINITY,
            output_max: f64::INFINITY,
            integral_limit: f64::INFINITY,
            derivative_filter: DerivativeFilter::Disabled,
        }
    }
}

impl PidConfig {
    /// Create a new PID config with given gains
    pub fn new(kp: f64, ki: f64, kd: f64) -> Self {
        Self {
            kp,
            ki,
            kd,
            ..Default::default()
        }
    }

    /// Create a P-only config
    pub fn p(kp: f64) -> Self {
        Self::new(kp, 0.0, 0.0)
    }

    /// Set symmetric output limits
    pub fn with_output_limit(mut self, limit: f64) -> Self {
        self.output_min = -limit;
        self.output_max = limit;
        self
    }

    /// Set integral windup limit
    pub fn with_integral_limit(mut self, limit: f64) -> Self {
        self.integral_limit = limit;
        self
    }

    /// Set derivative filter
    pub fn with_derivative_filter(mut self, filter: DerivativeFilter) -> Self {
        self.derivative_filter = filter;
        self
    }
}

/// Contribution of each term to the last output
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PidTerms {
    pub p: f64,
    pub i: f64,
    pub d: f64,
}

/// PID controller internal state
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PidState {
    /// Accumulated integral of the error
    pub integral: f64,
    /// Previous error for derivative calculation
    pub prev_error: f64,
    /// Filtered derivative value
    pub derivative_filtered: f64,
    /// Previous output
    pub prev_output: f64,
    /// Terms behind the previous output
    pub terms: PidTerms,
    /// Set once the first error has been seen
    pub primed: bool,
}

/// PID controller
///
/// # Example
/// ```
/// use ballplate_core::control::{Pid, PidConfig};
///
/// let config = PidConfig::new(120.0, 5.0, 40.0)
///     .with_output_limit(12.0)
///     .with_integral_limit(0.05);
/// let mut pid = Pid::new(config);
///
/// // error in meters, dt in seconds, output in degrees of tilt
/// let tilt = pid.update(0.02, 1.0 / 30.0);
/// assert!(tilt.abs() <= 12.0);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Pid {
    config: PidConfig,
    /// Cached alpha from config.derivative_filter
    derivative_alpha: f64,
    state: PidState,
}

impl Pid {
    /// Create a new PID controller with the given configuration
    pub fn new(config: PidConfig) -> Self {
        Self {
            derivative_alpha: config.derivative_filter.alpha(),
            config,
            state: PidState::default(),
        }
    }

    /// Create a P-only controller
    pub fn p(kp: f64) -> Self {
        Self::new(PidConfig::p(kp))
    }

    /// Whether `dt` can be used for the derivative and integral terms
    #[inline]
    pub fn is_valid_dt(dt: f64) -> bool {
        dt.is_finite() && dt > 0.0
    }

    /// Advance the controller with a new error sample
    ///
    /// On the first sample after construction or [`reset`](Self::reset) the
    /// derivative is zero. When `dt` is not a positive finite number the
    /// integral and derivative are left untouched for this cycle and the
    /// output is built from the proportional term plus the held terms.
    #[inline]
    pub fn update(&mut self, error: f64, dt: f64) -> f64 {
        let p_term = self.config.kp * error;

        if Self::is_valid_dt(dt) {
            self.state.integral = error
                .mul_add(dt, self.state.integral)
                .clamp(-self.config.integral_limit, self.config.integral_limit);

            let raw_derivative = if self.state.primed {
                (error - self.state.prev_error) / dt
            } else {
                0.0
            };
            self.state.derivative_filtered = self.derivative_alpha.mul_add(
                raw_derivative - self.state.derivative_filtered,
                self.state.derivative_filtered,
            );
        }

        let i_term = self.config.ki * self.state.integral;
        let d_term = self.config.kd * self.state.derivative_filtered;
        let output =
            (p_term + i_term + d_term).clamp(self.config.output_min, self.config.output_max);

        self.state.prev_error = error;
        self.state.prev_output = output;
        self.state.terms = PidTerms {
            p: p_term,
            i: i_term,
            d: d_term,
        };
        self.state.primed = true;

        output
    }

    /// Reset the controller state
    pub fn reset(&mut self) {
        self.state = PidState::default();
    }

    /// Get the current state
    pub fn state(&self) -> &PidState {
        &self.state
    }

    /// Get the configuration
    pub fn config(&self) -> &PidConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_p_controller() {
        let mut pid = Pid::p(2.0);
        assert_relative_eq!(pid.update(5.0, 0.01), 10.0, epsilon = 1e-10);
    }

    #[test]
    fn test_p_controller_ignores_dt() {
        let mut pid = Pid::p(1.0);
        for &dt in &[0.001, 0.033, 1.0, 0.0, -0.5] {
            assert_relative_eq!(pid.update(0.25, dt), 0.25, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_pi_controller() {
        let mut pid = Pid::new(PidConfig::new(1.0, 0.5, 0.0));

        // P = 5, I = 0.5 * 5 * 0.1 = 0.25
        assert_relative_eq!(pid.update(5.0, 0.1), 5.25, epsilon = 1e-10);
        // I = 0.5 * (0.5 + 0.5) = 0.5
        assert_relative_eq!(pid.update(5.0, 0.1), 5.5, epsilon = 1e-10);
    }

    #[test]
    fn test_first_sample_has_no_derivative_kick() {
        let mut pid = Pid::new(PidConfig::new(0.0, 0.0, 1.0));
        assert_relative_eq!(pid.update(3.0, 0.1), 0.0);
        // (4 - 3) / 0.1
        assert_relative_eq!(pid.update(4.0, 0.1), 10.0, epsilon = 1e-10);
    }

    #[test]
    fn test_output_limits() {
        let mut pid = Pid::new(PidConfig::p(10.0).with_output_limit(5.0));
        assert_relative_eq!(pid.update(10.0, 0.01), 5.0, epsilon = 1e-10);
        assert_relative_eq!(pid.update(-10.0, 0.01), -5.0, epsilon = 1e-10);
    }

    #[test]
    fn test_integral_windup() {
        let mut pid = Pid::new(PidConfig::new(1.0, 1.0, 0.0).with_integral_limit(10.0));
        for _ in 0..100 {
            pid.update(100.0, 0.1);
        }
        assert_relative_eq!(pid.state().integral, 10.0);
    }

    #[test]
    fn test_invalid_dt_skips_integral_and_derivative() {
        let mut pid = Pid::new(PidConfig::new(1.0, 1.0, 1.0));
        pid.update(1.0, 0.1);
        let integral = pid.state().integral;
        let derivative = pid.state().derivative_filtered;

        for &dt in &[0.0, -0.01, f64::NAN, f64::INFINITY] {
            let output = pid.update(2.0, dt);
            assert!(output.is_finite());
            assert_relative_eq!(pid.state().integral, integral);
            assert_relative_eq!(pid.state().derivative_filtered, derivative);
        }
    }

    #[test]
    fn test_derivative_filter_alpha() {
        assert_relative_eq!(DerivativeFilter::Disabled.alpha(), 1.0);
        assert_relative_eq!(DerivativeFilter::LowPass { alpha: 1.5 }.alpha(), 1.0);
        let cutoff = DerivativeFilter::CutoffFrequency {
            cutoff_hz: 5.0,
            sample_rate_hz: 30.0,
        };
        let rc = 1.0 / (2.0 * std::f64::consts::PI * 5.0);
        assert_relative_eq!(cutoff.alpha(), (1.0 / 30.0) / (rc + 1.0 / 30.0), epsilon = 1e-12);
    }

    #[test]
    fn test_filter_validation() {
        assert!(DerivativeFilter::MODERATE.validate().is_ok());
        assert!(DerivativeFilter::Disabled.validate().is_ok());
        for bad in [
            DerivativeFilter::LowPass { alpha: -0.1 },
            DerivativeFilter::LowPass { alpha: f64::NAN },
            DerivativeFilter::CutoffFrequency {
                cutoff_hz: 5.0,
                sample_rate_hz: 0.0,
            },
            DerivativeFilter::CutoffFrequency {
                cutoff_hz: f64::INFINITY,
                sample_rate_hz: 30.0,
            },
        ] {
            assert!(matches!(bad.validate(), Err(Error::Config(_))), "{:?}", bad);
        }
        // Unchecked, a zero rate turns alpha into NaN
        assert!(DerivativeFilter::CutoffFrequency {
            cutoff_hz: 5.0,
            sample_rate_hz: 0.0
        }
        .alpha()
        .is_nan());
    }

    #[test]
    fn test_filtered_derivative_smooths_step() {
        let mut raw = Pid::new(PidConfig::new(0.0, 0.0, 1.0));
        let mut filtered =
            Pid::new(PidConfig::new(0.0, 0.0, 1.0).with_derivative_filter(DerivativeFilter::HEAVY));
        raw.update(0.0, 0.1);
        filtered.update(0.0, 0.1);
        let r = raw.update(1.0, 0.1);
        let f = filtered.update(1.0, 0.1);
        assert_relative_eq!(r, 10.0, epsilon = 1e-10);
        assert_relative_eq!(f, 2.0, epsilon = 1e-10);
    }

    #[test]
    fn test_reset() {
        let mut pid = Pid::new(PidConfig::new(1.0, 1.0, 0.0));
        pid.update(5.0, 0.1);
        pid.update(5.0, 0.1);
        assert!(pid.state().integral > 0.0);

        pid.reset();
        assert_relative_eq!(pid.state().integral, 0.0);
        assert_relative_eq!(pid.state().prev_error, 0.0);
        assert!(!pid.state().primed);
    }
}
