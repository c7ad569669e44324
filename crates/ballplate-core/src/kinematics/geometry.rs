//! Fixed mechanical geometry of the platform

use crate::config::GeometryConfig;
use crate::math::{planar_unit, Vector3};

use super::{ARM_SPACING, NUM_ARMS};

/// Platform dimensions plus the precomputed attachment points
///
/// Built once from a [`GeometryConfig`] and read-only afterwards. Base and
/// platform attachments sit on circles of radius `B` and `P`, one every 120°,
/// with arm `i` at `120° * i` from the x axis.
#[derive(Debug, Clone, PartialEq)]
pub struct PlatformGeometry {
    config: GeometryConfig,
    base_points: [Vector3; NUM_ARMS],
    platform_points: [Vector3; NUM_ARMS],
}

impl PlatformGeometry {
    /// Compute the attachment points for a configuration
    pub fn new(config: GeometryConfig) -> Self {
        let base_points =
            std::array::from_fn(|i| planar_unit(ARM_SPACING * i as f64) * config.base_radius);
        let platform_points =
            std::array::from_fn(|i| planar_unit(ARM_SPACING * i as f64) * config.platform_radius);
        Self {
            config,
            base_points,
            platform_points,
        }
    }

    /// Dimensions this geometry was built from
    #[inline]
    pub fn config(&self) -> &GeometryConfig {
        &self.config
    }

    /// Servo pivot of an arm, base frame
    #[inline]
    pub fn base_point(&self, arm: usize) -> Vector3 {
        self.base_points[arm]
    }

    /// Arm attachment on the platform, platform frame (before rotation)
    #[inline]
    pub fn platform_point(&self, arm: usize) -> Vector3 {
        self.platform_points[arm]
    }

    /// Servo-driven arm length (a)
    #[inline]
    pub fn arm_a(&self) -> f64 {
        self.config.arm_a
    }

    /// Passive link length (b)
    #[inline]
    pub fn arm_b(&self) -> f64 {
        self.config.arm_b
    }

    /// Platform center height at rest (h0)
    #[inline]
    pub fn rest_height(&self) -> f64 {
        self.config.rest_height
    }

    /// Range of pivot-to-attachment distances the two-link arm can span
    #[inline]
    pub fn reach(&self) -> (f64, f64) {
        let (a, b) = (self.config.arm_a, self.config.arm_b);
        ((a - b).abs(), a + b)
    }
}

impl Default for PlatformGeometry {
    fn default() -> Self {
        Self::new(GeometryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_attachment_points_spacing() {
        let geometry = PlatformGeometry::new(GeometryConfig {
            base_radius: 100.0,
            platform_radius: 150.0,
            ..Default::default()
        });

        assert_relative_eq!(geometry.base_point(0), Vector3::new(100.0, 0.0, 0.0), epsilon = 1e-12);
        assert_relative_eq!(geometry.platform_point(1).x, -75.0, epsilon = 1e-12);
        assert_relative_eq!(
            geometry.platform_point(2).y,
            -150.0 * 3.0f64.sqrt() / 2.0,
            epsilon = 1e-12
        );
        for arm in 0..NUM_ARMS {
            assert_relative_eq!(geometry.base_point(arm).norm(), 100.0, epsilon = 1e-12);
            assert_relative_eq!(geometry.platform_point(arm).z, 0.0);
        }
    }

    #[test]
    fn test_reach() {
        let geometry = PlatformGeometry::default();
        let (min, max) = geometry.reach();
        assert_relative_eq!(min, 50.0);
        assert_relative_eq!(max, 140.0);
    }
}
