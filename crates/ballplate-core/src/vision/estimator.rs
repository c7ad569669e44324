//! Ball position estimation on rectified images

use image::GrayImage;

use super::hough::{Circle, CircleDetector, HoughCircleDetector, HoughConfig};
use super::BallPosition;

/// Turns a rectified image into a metric ball position
///
/// The rectified image covers the board exactly, so a single scale factor
/// (`squares_per_side * square_length / rectified_side` meters per pixel)
/// maps pixel centers onto the board plane.
///
/// # Example
/// ```
/// use ballplate_core::vision::{synthetic::draw_ball, PositionEstimator};
/// use image::{GrayImage, Luma};
///
/// let mut img = GrayImage::from_pixel(480, 480, Luma([40u8]));
/// draw_ball(&mut img, 120.0, 300.0, 16.0);
///
/// let estimator = PositionEstimator::default();
/// let pos = estimator.estimate(&img, 0.0004).position().unwrap();
/// assert!((pos.x - 0.048).abs() < 1e-3);
/// assert!((pos.y - 0.120).abs() < 1e-3);
/// ```
#[derive(Debug, Clone)]
pub struct PositionEstimator<D = HoughCircleDetector> {
    detector: D,
    min_radius: f32,
    max_radius: f32,
    min_support: f32,
}

impl Default for PositionEstimator<HoughCircleDetector> {
    fn default() -> Self {
        Self::from_hough(HoughConfig::default())
    }
}

impl PositionEstimator<HoughCircleDetector> {
    /// Estimator backed by the built-in Hough detector
    pub fn from_hough(config: HoughConfig) -> Self {
        Self {
            detector: HoughCircleDetector::new(config),
            min_radius: config.min_radius,
            max_radius: config.max_radius,
            min_support: config.min_support,
        }
    }
}

impl<D: CircleDetector> PositionEstimator<D> {
    /// Estimator backed by any detector, with explicit plausibility bounds
    pub fn with_detector(detector: D, min_radius: f32, max_radius: f32, min_support: f32) -> Self {
        Self {
            detector,
            min_radius,
            max_radius,
            min_support,
        }
    }

    /// Locate the ball; absence of a plausible circle yields `Undetected`
    pub fn estimate(&self, image: &GrayImage, pixel_to_meter: f64) -> BallPosition {
        let candidates = self.detector.detect(image);
        let Some(best) = candidates.first() else {
            return BallPosition::Undetected;
        };
        if !self.is_plausible(best, image) {
            tracing::trace!(?best, "estimator: best candidate rejected");
            return BallPosition::Undetected;
        }
        BallPosition::detected(best.x as f64 * pixel_to_meter, best.y as f64 * pixel_to_meter)
    }

    fn is_plausible(&self, circle: &Circle, image: &GrayImage) -> bool {
        let (w, h) = image.dimensions();
        circle.x.is_finite()
            && circle.y.is_finite()
            && circle.x >= 0.0
            && circle.y >= 0.0
            && circle.x < w as f32
            && circle.y < h as f32
            && circle.radius >= self.min_radius
            && circle.radius <= self.max_radius
            && circle.support >= self.min_support
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::hough::CircleCandidates;
    use crate::vision::synthetic::draw_ball;
    use approx::assert_relative_eq;
    use image::Luma;

    struct Fixed(Option<Circle>);

    impl CircleDetector for Fixed {
        fn detect(&self, _image: &GrayImage) -> CircleCandidates {
            self.0.into_iter().collect()
        }
    }

    fn circle(x: f32, y: f32, radius: f32, support: f32) -> Circle {
        Circle {
            x,
            y,
            radius,
            support,
            votes: 1.0,
        }
    }

    #[test]
    fn test_synthetic_ball_at_center() {
        let mut img = GrayImage::from_pixel(480, 480, Luma([40u8]));
        draw_ball(&mut img, 240.0, 240.0, 18.0);

        let pos = PositionEstimator::default()
            .estimate(&img, 0.0004)
            .position()
            .expect("ball should be detected");
        assert_relative_eq!(pos.x, 0.096, epsilon = 1e-3);
        assert_relative_eq!(pos.y, 0.096, epsilon = 1e-3);
    }

    #[test]
    fn test_empty_board_is_undetected() {
        let img = GrayImage::from_pixel(480, 480, Luma([40u8]));
        assert_eq!(
            PositionEstimator::default().estimate(&img, 0.0004),
            BallPosition::Undetected
        );
    }

    #[test]
    fn test_scale_applied_to_pixel_center() {
        let img = GrayImage::new(100, 100);
        let estimator = PositionEstimator::with_detector(Fixed(Some(circle(25.0, 50.0, 10.0, 0.9))), 5.0, 20.0, 0.5);
        let pos = estimator.estimate(&img, 0.002).position().unwrap();
        assert_relative_eq!(pos.x, 0.05, epsilon = 1e-9);
        assert_relative_eq!(pos.y, 0.10, epsilon = 1e-9);
    }

    #[test]
    fn test_implausible_candidates_rejected() {
        let img = GrayImage::new(100, 100);
        for c in [
            circle(50.0, 50.0, 2.0, 0.9),   // too small
            circle(50.0, 50.0, 30.0, 0.9),  // too large
            circle(150.0, 50.0, 10.0, 0.9), // outside the image
            circle(50.0, 50.0, 10.0, 0.1),  // weak support
        ] {
            let estimator = PositionEstimator::with_detector(Fixed(Some(c)), 5.0, 20.0, 0.5);
            assert_eq!(estimator.estimate(&img, 0.001), BallPosition::Undetected);
        }
    }

    #[test]
    fn test_no_candidates_is_undetected() {
        let estimator = PositionEstimator::with_detector(Fixed(None), 5.0, 20.0, 0.5);
        assert_eq!(estimator.estimate(&GrayImage::new(10, 10), 0.001), BallPosition::Undetected);
    }
}
