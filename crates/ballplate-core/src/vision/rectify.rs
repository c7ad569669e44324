//! Board rectification
//!
//! The camera sees the play surface in perspective. A fiducial board laid on
//! the platform gives four outer corners; warping them onto a fixed square
//! yields an image where pixels map linearly onto the board plane. Finding
//! the board corners is left to a [`BoardDetector`] implementation.

use image::{GrayImage, Luma};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};

use crate::config::BoardConfig;

/// Why a frame could not be rectified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RectificationFailure {
    /// No board found in the frame
    BoardNotVisible,
    /// Board found, but with too few corners for a stable pose
    InsufficientCorners { found: usize, required: usize },
    /// Corners do not define a usable perspective transform
    Degenerate,
}

/// Result of rectifying one frame
#[derive(Debug, Clone)]
pub enum Rectification {
    Rectified(GrayImage),
    Failed(RectificationFailure),
}

/// Perspective correction of raw frames onto the board plane
pub trait Rectifier: Send {
    fn rectify(&mut self, frame: &GrayImage) -> Rectification;
}

/// Board seen in a frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoardObservation {
    /// Interior board corners that were identified
    pub corner_count: usize,
    /// Outer board corners in frame pixels: top-left, top-right, bottom-left, bottom-right
    pub outer_corners: [(f32, f32); 4],
}

/// Locates the fiducial board in a raw frame
pub trait BoardDetector: Send {
    fn observe(&mut self, frame: &GrayImage) -> Option<BoardObservation>;
}

/// Warps frames so the board fills a `side` x `side` image
#[derive(Debug, Clone)]
pub struct BoardRectifier<D> {
    detector: D,
    side: u32,
    min_corners: usize,
}

impl<D: BoardDetector> BoardRectifier<D> {
    pub fn new(detector: D, side: u32, min_corners: usize) -> Self {
        Self {
            detector,
            side,
            min_corners,
        }
    }

    /// Output size and corner gate taken from the board description
    pub fn from_board(detector: D, board: &BoardConfig) -> Self {
        Self::new(detector, board.rectified_side, board.min_corners)
    }

    /// Rectified image side length in pixels
    pub fn side(&self) -> u32 {
        self.side
    }
}

impl<D: BoardDetector> Rectifier for BoardRectifier<D> {
    fn rectify(&mut self, frame: &GrayImage) -> Rectification {
        let Some(observation) = self.detector.observe(frame) else {
            return Rectification::Failed(RectificationFailure::BoardNotVisible);
        };
        if observation.corner_count < self.min_corners {
            return Rectification::Failed(RectificationFailure::InsufficientCorners {
                found: observation.corner_count,
                required: self.min_corners,
            });
        }

        let s = self.side as f32;
        let target = [(0.0, 0.0), (s, 0.0), (0.0, s), (s, s)];
        let Some(projection) = Projection::from_control_points(observation.outer_corners, target)
        else {
            return Rectification::Failed(RectificationFailure::Degenerate);
        };

        let mut out = GrayImage::new(self.side, self.side);
        warp_into(frame, &projection, Interpolation::Bilinear, Luma([0]), &mut out);
        Rectification::Rectified(out)
    }
}

/// For sources that already deliver rectified images
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

impl Rectifier for PassThrough {
    fn rectify(&mut self, frame: &GrayImage) -> Rectification {
        Rectification::Rectified(frame.clone())
    }
}
