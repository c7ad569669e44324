//! Balancer configuration
//!
//! Everything the control core needs is collected into one immutable
//! [`BalancerConfig`], built once at startup (from code or a JSON file),
//! validated, and passed by reference into each component.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::control::DerivativeFilter;
use crate::vision::HoughConfig;
use crate::{Error, Result};

/// Longest timeout, period or delay a configuration may ask for, seconds
pub const MAX_DURATION_SECS: f64 = 3600.0;

/// Seconds as a `Duration`, saturating instead of panicking on bad input
fn secs_to_duration(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.min(MAX_DURATION_SECS)).unwrap_or(Duration::ZERO)
}

fn check_secs(name: &str, secs: f64, allow_zero: bool) -> Result<()> {
    let lower_ok = if allow_zero { secs >= 0.0 } else { secs > 0.0 };
    if lower_ok && secs <= MAX_DURATION_SECS {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "{} must be in {}0, {}] seconds, got {}",
            name,
            if allow_zero { "[" } else { "(" },
            MAX_DURATION_SECS,
            secs
        )))
    }
}

/// Mechanical dimensions of the platform, in millimeters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometryConfig {
    /// Radius of the servo attachment circle on the base (B)
    pub base_radius: f64,
    /// Radius of the arm attachment circle on the platform (P)
    pub platform_radius: f64,
    /// Servo-driven arm length (a)
    pub arm_a: f64,
    /// Passive link length (b)
    pub arm_b: f64,
    /// Platform center height above the base at rest (h0)
    pub rest_height: f64,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            base_radius: 75.0,
            platform_radius: 75.0,
            arm_a: 45.0,
            arm_b: 95.0,
            rest_height: 100.0,
        }
    }
}

impl GeometryConfig {
    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("base_radius", self.base_radius),
            ("platform_radius", self.platform_radius),
            ("arm_a", self.arm_a),
            ("arm_b", self.arm_b),
            ("rest_height", self.rest_height),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(Error::Config(format!(
                    "geometry.{} must be positive, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

/// Fiducial board seen by the camera, used to derive the pixel scale
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    /// Number of squares along one side of the board
    pub squares_per_side: u32,
    /// Side length of one square in meters
    pub square_length: f64,
    /// Side length of the rectified image in pixels
    pub rectified_side: u32,
    /// Minimum detected board corners for a usable rectification
    pub min_corners: usize,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            squares_per_side: 8,
            square_length: 0.024,
            rectified_side: 480,
            min_corners: 6,
        }
    }
}

impl BoardConfig {
    /// Physical side length of the board in meters
    #[inline]
    pub fn side_length(&self) -> f64 {
        self.squares_per_side as f64 * self.square_length
    }

    /// Meters per rectified pixel
    #[inline]
    pub fn pixel_to_meter(&self) -> f64 {
        self.side_length() / self.rectified_side as f64
    }

    /// Board center in meters, measured from the rectified top-left corner
    pub fn center(&self) -> [f64; 2] {
        let half = self.side_length() / 2.0;
        [half, half]
    }

    fn validate(&self) -> Result<()> {
        if self.squares_per_side == 0 || self.rectified_side == 0 {
            return Err(Error::Config("board dimensions must be non-zero".into()));
        }
        if !(self.square_length.is_finite() && self.square_length > 0.0) {
            return Err(Error::Config(format!(
                "board.square_length must be positive, got {}",
                self.square_length
            )));
        }
        Ok(())
    }
}

/// PID gains for one axis of ball position
///
/// Units are degrees of tilt per meter (kp), per meter-second (ki) and per
/// meter/second (kd). Negative gains flip the tilt direction for mechanisms
/// mounted the other way round.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AxisGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl Default for AxisGains {
    fn default() -> Self {
        Self {
            kp: 150.0,
            ki: 0.0,
            kd: 60.0,
        }
    }
}

impl AxisGains {
    /// Create gains for one axis
    pub const fn new(kp: f64, ki: f64, kd: f64) -> Self {
        Self { kp, ki, kd }
    }
}

/// Limits and timing for the actuator gateway
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Smallest servo angle accepted, degrees
    pub min_angle: f64,
    /// Largest servo angle accepted, degrees
    pub max_angle: f64,
    /// Time allowed for the servos to settle after a write, seconds
    pub settle_secs: f64,
    /// Consecutive rejections on one axis before it is reported as a geometry fault
    pub rejection_escalation: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            min_angle: 20.0,
            max_angle: 120.0,
            settle_secs: 0.005,
            rejection_escalation: 15,
        }
    }
}

impl GatewayConfig {
    /// Settle delay after each applied command
    pub fn settle_delay(&self) -> Duration {
        secs_to_duration(self.settle_secs)
    }

    /// Whether an angle lies within the mechanical range
    #[inline]
    pub fn in_range(&self, angle: f64) -> bool {
        angle >= self.min_angle && angle <= self.max_angle
    }

    fn validate(&self) -> Result<()> {
        if !(self.min_angle.is_finite() && self.max_angle.is_finite()) {
            return Err(Error::Config("angle limits must be finite".into()));
        }
        if self.min_angle >= self.max_angle {
            return Err(Error::Config(format!(
                "min_angle ({}) must be below max_angle ({})",
                self.min_angle, self.max_angle
            )));
        }
        check_secs("settle_secs", self.settle_secs, true)?;
        if self.rejection_escalation == 0 {
            return Err(Error::Config("rejection_escalation must be at least 1".into()));
        }
        Ok(())
    }
}

/// Complete configuration of a balancing session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancerConfig {
    /// Platform mechanics
    pub geometry: GeometryConfig,
    /// Fiducial board and rectified image size
    pub board: BoardConfig,
    /// Explicit meters-per-pixel scale; derived from `board` when unset
    pub pixel_to_meter: Option<f64>,
    /// Gains acting on the x error (drive roll)
    pub gains_x: AxisGains,
    /// Gains acting on the y error (drive pitch)
    pub gains_y: AxisGains,
    /// Anti-windup bound on each integral accumulator, meter-seconds
    pub integral_limit: f64,
    /// Largest commanded pitch or roll magnitude, degrees
    pub max_tilt: f64,
    /// Filtering of the derivative term (vision noise is differentiated)
    pub derivative_filter: DerivativeFilter,
    /// Target ball position in meters; defaults to the board center
    pub desired_position: Option<[f64; 2]>,
    /// Control loop rate in Hz
    pub rate_hz: f64,
    /// Servo limits and settle time
    pub gateway: GatewayConfig,
    /// Circle detector parameters
    pub hough: HoughConfig,
    /// Longest a single camera capture may block, seconds
    pub frame_timeout_secs: f64,
    /// Longest startup waits for the first frame, seconds
    pub startup_timeout_secs: f64,
    /// Frames older than this are treated as no detection, seconds
    pub max_frame_age_secs: f64,
    /// Consecutive undetected cycles before a warning is logged
    pub undetected_warn_after: u32,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            geometry: GeometryConfig::default(),
            board: BoardConfig::default(),
            pixel_to_meter: None,
            gains_x: AxisGains::default(),
            gains_y: AxisGains::default(),
            integral_limit: 0.05,
            max_tilt: 12.0,
            derivative_filter: DerivativeFilter::MODERATE,
            desired_position: None,
            rate_hz: 30.0,
            gateway: GatewayConfig::default(),
            hough: HoughConfig::default(),
            frame_timeout_secs: 0.1,
            startup_timeout_secs: 2.0,
            max_frame_age_secs: 0.5,
            undetected_warn_after: 30,
        }
    }
}

impl BalancerConfig {
    /// Parse a configuration from JSON; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!("failed to read {}: {}", path.as_ref().display(), e))
        })?;
        Self::from_json_str(&data)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Set the same gains on both axes
    pub fn with_gains(mut self, gains: AxisGains) -> Self {
        self.gains_x = gains;
        self.gains_y = gains;
        self
    }

    /// Set the control rate
    pub fn with_rate(mut self, rate_hz: f64) -> Self {
        self.rate_hz = rate_hz;
        self
    }

    /// Set the target position in meters
    pub fn with_desired_position(mut self, x: f64, y: f64) -> Self {
        self.desired_position = Some([x, y]);
        self
    }

    /// Set the servo angle limits
    pub fn with_angle_limits(mut self, min: f64, max: f64) -> Self {
        self.gateway.min_angle = min;
        self.gateway.max_angle = max;
        self
    }

    /// Set the gateway settle delay
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.gateway.settle_secs = settle.as_secs_f64();
        self
    }

    /// Effective meters-per-pixel scale
    pub fn pixel_scale(&self) -> f64 {
        self.pixel_to_meter
            .unwrap_or_else(|| self.board.pixel_to_meter())
    }

    /// Effective target position
    pub fn target(&self) -> [f64; 2] {
        self.desired_position.unwrap_or_else(|| self.board.center())
    }

    pub fn frame_timeout(&self) -> Duration {
        secs_to_duration(self.frame_timeout_secs)
    }

    pub fn startup_timeout(&self) -> Duration {
        secs_to_duration(self.startup_timeout_secs)
    }

    pub fn max_frame_age(&self) -> Duration {
        secs_to_duration(self.max_frame_age_secs)
    }

    /// Check every parameter range; called before a session may start
    pub fn validate(&self) -> Result<()> {
        self.geometry.validate()?;
        self.board.validate()?;
        self.gateway.validate()?;
        self.hough.validate()?;
        self.derivative_filter.validate()?;

        let scale = self.pixel_scale();
        if !(scale.is_finite() && scale > 0.0) {
            return Err(Error::Config(format!(
                "pixel_to_meter must be positive, got {}",
                scale
            )));
        }
        for (axis, g) in [("x", self.gains_x), ("y", self.gains_y)] {
            if !(g.kp.is_finite() && g.ki.is_finite() && g.kd.is_finite()) {
                return Err(Error::Config(format!("gains_{} must be finite", axis)));
            }
        }
        if self.integral_limit.is_nan() || self.integral_limit < 0.0 {
            return Err(Error::Config("integral_limit must be non-negative".into()));
        }
        if !(self.max_tilt > 0.0 && self.max_tilt <= 45.0) {
            return Err(Error::Config(format!(
                "max_tilt must be in (0, 45] degrees, got {}",
                self.max_tilt
            )));
        }
        if !(self.rate_hz.is_finite() && self.rate_hz > 0.0) {
            return Err(Error::Config(format!("rate_hz must be positive, got {}", self.rate_hz)));
        }
        check_secs("control period (1 / rate_hz)", 1.0 / self.rate_hz, false)?;
        check_secs("frame_timeout_secs", self.frame_timeout_secs, false)?;
        check_secs("startup_timeout_secs", self.startup_timeout_secs, false)?;
        check_secs("max_frame_age_secs", self.max_frame_age_secs, false)?;
        if let Some([x, y]) = self.desired_position {
            if !(x.is_finite() && y.is_finite()) {
                return Err(Error::Config("desired_position must be finite".into()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_config_is_valid() {
        BalancerConfig::default().validate().unwrap();
    }

    #[test]
    fn test_pixel_scale_from_board() {
        let config = BalancerConfig::default();
        // 8 squares * 24 mm over 480 px
        assert_relative_eq!(config.pixel_scale(), 0.0004, epsilon = 1e-12);
        assert_relative_eq!(config.target()[0], 0.096, epsilon = 1e-12);
    }

    #[test]
    fn test_explicit_scale_overrides_board() {
        let config = BalancerConfig {
            pixel_to_meter: Some(0.001),
            ..Default::default()
        };
        assert_relative_eq!(config.pixel_scale(), 0.001);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = BalancerConfig::from_json_str(
            r#"{ "rate_hz": 50.0, "gains_x": { "kp": 2.0 }, "gateway": { "min_angle": -45.0, "max_angle": 45.0 } }"#,
        )
        .unwrap();
        assert_relative_eq!(config.rate_hz, 50.0);
        assert_relative_eq!(config.gains_x.kp, 2.0);
        assert_relative_eq!(config.gains_x.kd, AxisGains::default().kd);
        assert_relative_eq!(config.gateway.min_angle, -45.0);
        assert_eq!(config.board, BoardConfig::default());
    }

    #[test]
    fn test_json_roundtrip() {
        let config = BalancerConfig::default().with_desired_position(0.05, 0.07);
        let json = config.to_json().unwrap();
        let parsed = BalancerConfig::from_json_str(&json).unwrap();
        let [x, y] = parsed.target();
        assert_relative_eq!(x, 0.05, epsilon = 1e-12);
        assert_relative_eq!(y, 0.07, epsilon = 1e-12);
        assert_eq!(parsed.derivative_filter, config.derivative_filter);
        assert_eq!(parsed.board.squares_per_side, 8);
    }

    #[test]
    fn test_invalid_limits_rejected() {
        let config = BalancerConfig::default().with_angle_limits(50.0, 10.0);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_invalid_geometry_rejected() {
        let mut config = BalancerConfig::default();
        config.geometry.arm_b = 0.0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_invalid_rate_rejected() {
        let config = BalancerConfig::default().with_rate(0.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_derivative_filter_rejected() {
        let config = BalancerConfig {
            derivative_filter: DerivativeFilter::CutoffFrequency {
                cutoff_hz: 5.0,
                sample_rate_hz: 0.0,
            },
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = BalancerConfig {
            derivative_filter: DerivativeFilter::LowPass { alpha: f64::NAN },
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_oversized_durations_rejected() {
        let huge = [
            BalancerConfig {
                frame_timeout_secs: 1e30,
                ..Default::default()
            },
            BalancerConfig {
                startup_timeout_secs: 1e30,
                ..Default::default()
            },
            BalancerConfig {
                max_frame_age_secs: MAX_DURATION_SECS * 2.0,
                ..Default::default()
            },
            BalancerConfig::default().with_rate(1e-30),
            BalancerConfig::default().with_settle(Duration::from_secs(7200)),
        ];
        for config in huge {
            assert!(matches!(config.validate(), Err(Error::Config(_))), "{:?}", config);
        }

        let mut config = BalancerConfig::default();
        config.frame_timeout_secs = MAX_DURATION_SECS;
        config.validate().unwrap();
    }

    #[test]
    fn test_duration_accessors_saturate() {
        let config = BalancerConfig {
            frame_timeout_secs: 1e30,
            startup_timeout_secs: f64::NAN,
            max_frame_age_secs: -1.0,
            ..Default::default()
        };
        assert_eq!(config.frame_timeout(), Duration::from_secs(3600));
        assert_eq!(config.startup_timeout(), Duration::from_secs(3600));
        assert_eq!(config.max_frame_age(), Duration::ZERO);
    }

    #[test]
    fn test_malformed_json_is_config_error() {
        assert!(matches!(
            BalancerConfig::from_json_str("{ not json"),
            Err(Error::Config(_))
        ));
    }
}
