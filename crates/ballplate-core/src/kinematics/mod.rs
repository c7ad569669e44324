//! Kinematics of the three-arm tilting platform
//!
//! Converts a desired platform pose (pitch, roll, height offset) into the
//! three servo angles that realize it, and back again numerically.

mod geometry;
mod solver;

pub use geometry::PlatformGeometry;
pub use solver::{ClampedSolution, InverseKinematics};

use serde::{Deserialize, Serialize};
use std::ops::Index;

/// Number of servo arms on the platform
pub const NUM_ARMS: usize = 3;

/// Angular spacing between arms, degrees
pub const ARM_SPACING: f64 = 120.0;

/// Arm names used in logs
pub const ARM_NAMES: [&str; NUM_ARMS] = ["arm1", "arm2", "arm3"];

/// Desired platform attitude and height
///
/// Pitch rotates about y, roll about x (degrees). The height offset is in
/// millimeters above the geometry's rest height.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformPose {
    pub pitch: f64,
    pub roll: f64,
    pub height_offset: f64,
}

impl PlatformPose {
    /// Create a pose
    #[inline]
    pub const fn new(pitch: f64, roll: f64, height_offset: f64) -> Self {
        Self {
            pitch,
            roll,
            height_offset,
        }
    }

    /// Flat platform at rest height
    #[inline]
    pub const fn level() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    /// Tilt-only pose at rest height
    #[inline]
    pub const fn tilt(pitch: f64, roll: f64) -> Self {
        Self::new(pitch, roll, 0.0)
    }

    /// Same height, tilt scaled by `factor`
    #[inline]
    pub fn scale_tilt(&self, factor: f64) -> Self {
        Self::new(self.pitch * factor, self.roll * factor, self.height_offset)
    }

    /// Whether every component is finite
    #[inline]
    pub fn is_finite(&self) -> bool {
        self.pitch.is_finite() && self.roll.is_finite() && self.height_offset.is_finite()
    }
}

/// Target angles for the three servos, in degrees
///
/// Index `i` drives the arm attached at `120° * i` on the base.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ServoAngles(pub [f64; NUM_ARMS]);

impl ServoAngles {
    /// Create from individual arm angles
    #[inline]
    pub const fn new(angle1: f64, angle2: f64, angle3: f64) -> Self {
        Self([angle1, angle2, angle3])
    }

    /// The same angle on every arm
    #[inline]
    pub const fn uniform(angle: f64) -> Self {
        Self([angle; NUM_ARMS])
    }

    /// Angles as an array
    #[inline]
    pub fn as_array(&self) -> [f64; NUM_ARMS] {
        self.0
    }

    /// Iterate over the angles in arm order
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.0.iter().copied()
    }

    /// Largest absolute per-arm difference to another command
    pub fn max_delta(&self, other: &ServoAngles) -> f64 {
        self.iter()
            .zip(other.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max)
    }
}

impl Index<usize> for ServoAngles {
    type Output = f64;

    #[inline]
    fn index(&self, arm: usize) -> &f64 {
        &self.0[arm]
    }
}

impl From<[f64; NUM_ARMS]> for ServoAngles {
    fn from(angles: [f64; NUM_ARMS]) -> Self {
        Self(angles)
    }
}
