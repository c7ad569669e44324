//! Synthetic imagery for tests, benchmarks and dry runs
//!
//! [`SyntheticCamera`] renders an already-rectified board with a bright disk
//! wherever its [`BallHandle`] says the ball is, so a full session can run
//! without a camera. Pair it with [`PassThrough`](super::PassThrough).

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use image::{GrayImage, Luma};
use parking_lot::Mutex;

use super::capture::{Frame, FrameSource};
use super::estimator::PositionEstimator;
use super::hough::{Circle, CircleCandidates, CircleDetector};
use crate::Result;

/// Board background gray level
pub const BOARD_LEVEL: u8 = 40;
/// Ball gray level
pub const BALL_LEVEL: u8 = 220;

/// Draw a filled ball centered at pixel `(cx, cy)`
pub fn draw_ball(img: &mut GrayImage, cx: f32, cy: f32, radius: f32) {
    imageproc::drawing::draw_filled_circle_mut(
        img,
        (cx.round() as i32, cy.round() as i32),
        radius.round() as i32,
        Luma([BALL_LEVEL]),
    );
}

/// A plain `side` x `side` board, with the ball drawn if given
pub fn render_board(side: u32, ball: Option<(f32, f32)>, radius: f32) -> GrayImage {
    let mut img = GrayImage::from_pixel(side, side, Luma([BOARD_LEVEL]));
    if let Some((x, y)) = ball {
        draw_ball(&mut img, x, y, radius);
    }
    img
}

/// Centroid of the bright pixels in a synthetic board
///
/// Cost is one pass over the image, so sessions driven by it keep their
/// cycle rate in unoptimized builds. Only meaningful on [`render_board`]
/// output: anything brighter than halfway between the board and ball
/// levels counts as ball.
#[derive(Debug, Clone, Copy, Default)]
pub struct BrightSpotDetector;

impl BrightSpotDetector {
    /// Estimator accepting any spot with a radius in `[min_radius, max_radius]`
    pub fn estimator(min_radius: f32, max_radius: f32) -> PositionEstimator<Self> {
        PositionEstimator::with_detector(Self, min_radius, max_radius, 0.0)
    }
}

impl CircleDetector for BrightSpotDetector {
    fn detect(&self, image: &GrayImage) -> CircleCandidates {
        let threshold = BOARD_LEVEL / 2 + BALL_LEVEL / 2;
        let width = image.width() as usize;
        let (mut count, mut sum_x, mut sum_y) = (0u64, 0u64, 0u64);
        for (i, &v) in image.as_raw().iter().enumerate() {
            if v > threshold {
                count += 1;
                sum_x += (i % width) as u64;
                sum_y += (i / width) as u64;
            }
        }

        let mut candidates = CircleCandidates::new();
        if count > 0 {
            candidates.push(Circle {
                x: sum_x as f32 / count as f32,
                y: sum_y as f32 / count as f32,
                radius: (count as f32 / std::f32::consts::PI).sqrt(),
                support: 1.0,
                votes: count as f32,
            });
        }
        candidates
    }
}

/// Shared ball placement, in rectified pixels; `None` hides the ball
#[derive(Debug, Clone, Default)]
pub struct BallHandle(Arc<Mutex<Option<(f32, f32)>>>);

impl BallHandle {
    pub fn set(&self, x: f32, y: f32) {
        *self.0.lock() = Some((x, y));
    }

    pub fn hide(&self) {
        *self.0.lock() = None;
    }

    pub fn get(&self) -> Option<(f32, f32)> {
        *self.0.lock()
    }
}

/// Frame source that paces itself like a camera and draws the ball
#[derive(Debug)]
pub struct SyntheticCamera {
    side: u32,
    radius: f32,
    interval: Duration,
    ball: BallHandle,
    next_frame: Option<Instant>,
    /// Stop delivering after this many frames (simulates a dead camera)
    frame_limit: Option<u64>,
    delivered: u64,
}

impl SyntheticCamera {
    /// Camera at 60 fps with the ball hidden
    pub fn new(side: u32, radius: f32) -> Self {
        Self {
            side,
            radius,
            interval: Duration::from_secs_f64(1.0 / 60.0),
            ball: BallHandle::default(),
            next_frame: None,
            frame_limit: None,
            delivered: 0,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_ball(self, x: f32, y: f32) -> Self {
        self.ball.set(x, y);
        self
    }

    pub fn with_frame_limit(mut self, frames: u64) -> Self {
        self.frame_limit = Some(frames);
        self
    }

    /// Handle for moving the ball while the camera runs on another thread
    pub fn ball(&self) -> BallHandle {
        self.ball.clone()
    }
}

impl FrameSource for SyntheticCamera {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn capture(&mut self, timeout: Duration) -> Result<Option<Frame>> {
        if self.frame_limit.is_some_and(|limit| self.delivered >= limit) {
            thread::sleep(timeout);
            return Ok(None);
        }

        let now = Instant::now();
        let due = self.next_frame.unwrap_or(now);
        if due > now {
            let wait = due - now;
            if wait > timeout {
                thread::sleep(timeout);
                return Ok(None);
            }
            thread::sleep(wait);
        }
        self.next_frame = Some(due.max(now) + self.interval);
        self.delivered += 1;

        Ok(Some(Frame {
            image: render_board(self.side, self.ball.get(), self.radius),
            captured_at: Instant::now(),
        }))
    }
}
