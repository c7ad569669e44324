//! ballplate-core: real-time control core for a ball balancing platform
//!
//! A camera looks down on a plate carried by three servo arms. Each control
//! cycle estimates the ball position from a board-rectified image, runs a
//! two-axis PID controller to pick a corrective tilt, solves the inverse
//! kinematics of the 3-arm mechanism and hands the three servo angles to a
//! range-checked actuator gateway.
//!
//! # Modules
//!
//! - [`math`] - Degree trigonometry and platform rotation matrices
//! - [`kinematics`] - Platform geometry, inverse/forward kinematics
//! - [`vision`] - Rectification, circle detection, position estimation, capture thread
//! - [`control`] - PID, two-axis ball controller, fixed-rate loop, balance session
//! - [`hardware`] - Servo bank abstraction and the safety-bounded gateway
//! - [`comm`] - Latest-frame handoff between the capture and control threads
//! - [`config`] - Serializable configuration and validation
//!
//! # Architecture
//!
//! ```text
//!  capture thread                         control thread (fixed rate)
//! ┌──────────────┐   LatestSlot    ┌─────────────────────────────────────────┐
//! │ FrameSource  │──rectified────► │ Sense → Control → Kinematics → Actuate  │
//! │  Rectifier   │   frames        │ Estimator  BallController  Solver  Gateway
//! └──────────────┘                 └─────────────────────────────────────────┘
//! ```

#![warn(unused_must_use)]

pub mod comm;
pub mod config;
pub mod control;
pub mod hardware;
pub mod kinematics;
pub mod math;
pub mod vision;

// Re-exports for convenience
pub use comm::LatestSlot;
pub use config::{AxisGains, BalancerConfig, BoardConfig, GatewayConfig, GeometryConfig};
pub use control::{
    Balancer, BallController, ControlLoop, ControlLoopConfig, Pid, PidConfig, StopHandle,
};
pub use hardware::{ActuatorGateway, ApplyOutcome, ServoBank};
pub use kinematics::{InverseKinematics, PlatformGeometry, PlatformPose, ServoAngles};
pub use vision::{BallPosition, CircleDetector, HoughCircleDetector, PositionEstimator};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Error types for ballplate-core
///
/// Only [`Error::Config`], [`Error::Sensor`] and [`Error::Geometry`] are fatal
/// at startup. Inside the control loop every variant is handled locally and
/// the loop keeps running.
#[derive(Debug, thiserror::Error)]
#[must_use = "errors must be handled or explicitly ignored with let _ = ..."]
#[non_exhaustive]
pub enum Error {
    /// Invalid configuration parameter.
    /// Handle by: validating config before use, checking parameter ranges.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Camera or vision collaborator unavailable.
    /// Handle by: checking the capture device and calibration files before startup.
    #[error("Sensor error: {0}")]
    Sensor(String),

    /// Servo driver failure.
    /// Handle by: checking the servo bank, ensuring safe state before retry.
    #[error("Hardware error: {0}")]
    Hardware(String),

    /// The requested pose cannot be reached by the mechanism.
    /// Handle by: clamping the pose toward level or skipping the cycle.
    #[error("Unreachable pose: arm {arm} (cosine ratio {ratio:.4})")]
    Unreachable {
        /// Zero-based arm index
        arm: usize,
        /// Law-of-cosines ratio that fell outside [-1, 1]
        ratio: f64,
    },

    /// Non-positive or non-finite time step.
    /// Handle by: skipping derivative and integral updates for the cycle.
    #[error("Invalid timing: dt = {0}")]
    InvalidTiming(f64),

    /// Operating conditions the geometry cannot satisfy (e.g. an axis rejected repeatedly).
    /// Handle by: re-checking geometry, angle limits and controller gains.
    #[error("Geometry error: {0}")]
    Geometry(String),

    /// Control loop timing or execution error.
    #[error("Control loop error: {0}")]
    ControlLoop(String),

    /// Operation timed out waiting for a frame or condition.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Operation attempted in invalid state (e.g. starting a stopped session).
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Config(format!("I/O error: {}", e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Config(format!("JSON error: {}", e))
    }
}

/// Result type alias for ballplate-core operations
pub type Result<T> = std::result::Result<T, Error>;
