//! Vision: from camera frames to a metric ball position
//!
//! The capture thread pulls frames from a [`FrameSource`] and rectifies them
//! against the fiducial board. The control thread runs a [`CircleDetector`]
//! over the latest rectified image through a [`PositionEstimator`], which
//! converts the pixel center into meters.

mod capture;
mod estimator;
mod hough;
mod rectify;
pub mod synthetic;

pub use capture::{CaptureHandle, CaptureStats, CaptureWorker, Frame, FrameSource, SensedFrame};
pub use estimator::PositionEstimator;
pub use hough::{Circle, CircleCandidates, CircleDetector, HoughCircleDetector, HoughConfig};
pub use rectify::{
    BoardDetector, BoardObservation, BoardRectifier, PassThrough, Rectification,
    RectificationFailure, Rectifier,
};

use serde::{Deserialize, Serialize};

/// A point on the board plane in meters, origin at the rectified top-left
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    #[inline]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point
    #[inline]
    pub fn distance(&self, other: &Position) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

impl From<[f64; 2]> for Position {
    fn from([x, y]: [f64; 2]) -> Self {
        Self { x, y }
    }
}

impl std::ops::Sub for Position {
    type Output = Position;

    #[inline]
    fn sub(self, rhs: Position) -> Position {
        Position::new(self.x - rhs.x, self.y - rhs.y)
    }
}

/// Outcome of one ball measurement
///
/// `Undetected` is an ordinary result (ball out of view, board occluded),
/// not an error.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BallPosition {
    Detected(Position),
    Undetected,
}

impl BallPosition {
    /// Detected position in meters
    #[inline]
    pub fn detected(x: f64, y: f64) -> Self {
        Self::Detected(Position::new(x, y))
    }

    /// The position if the ball was seen
    #[inline]
    pub fn position(&self) -> Option<Position> {
        match self {
            Self::Detected(p) => Some(*p),
            Self::Undetected => None,
        }
    }

    #[inline]
    pub fn is_detected(&self) -> bool {
        matches!(self, Self::Detected(_))
    }
}
