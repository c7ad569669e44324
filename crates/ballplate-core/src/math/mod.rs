//! Math utilities for the platform: degree trigonometry and rotations
//!
//! Angles in this crate are carried in degrees end to end, matching how
//! servo commands and platform tilts are specified.

/// Type alias for 3D vectors
pub type Vector3 = nalgebra::Vector3<f64>;

/// Type alias for 3x3 rotation matrices
pub type Matrix3 = nalgebra::Matrix3<f64>;

/// Cosine of an angle in degrees
#[inline]
pub fn cosd(deg: f64) -> f64 {
    deg.to_radians().cos()
}

/// Sine of an angle in degrees
#[inline]
pub fn sind(deg: f64) -> f64 {
    deg.to_radians().sin()
}

/// Rotation about the y axis (pitch)
#[inline]
pub fn pitch_matrix(pitch: f64) -> Matrix3 {
    let (s, c) = (sind(pitch), cosd(pitch));
    Matrix3::new(
        c, 0.0, s, //
        0.0, 1.0, 0.0, //
        -s, 0.0, c,
    )
}

/// Rotation about the x axis (roll)
#[inline]
pub fn roll_matrix(roll: f64) -> Matrix3 {
    let (s, c) = (sind(roll), cosd(roll));
    Matrix3::new(
        1.0, 0.0, 0.0, //
        0.0, c, -s, //
        0.0, s, c,
    )
}

/// Platform rotation for a pitch + roll tilt, both in degrees
///
/// Composed as `R = R_pitch * R_roll`. Rotations do not commute, so the
/// order is part of the contract with the kinematics solver.
#[inline]
pub fn rotation_matrix(pitch: f64, roll: f64) -> Matrix3 {
    pitch_matrix(pitch) * roll_matrix(roll)
}

/// Unit vector in the xy plane at `deg` degrees from the x axis
#[inline]
pub fn planar_unit(deg: f64) -> Vector3 {
    Vector3::new(cosd(deg), sind(deg), 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_degree_trig() {
        assert_relative_eq!(cosd(0.0), 1.0);
        assert_relative_eq!(sind(90.0), 1.0, epsilon = 1e-12);
        assert_relative_eq!(cosd(120.0), -0.5, epsilon = 1e-12);
        assert_relative_eq!(sind(240.0), -(3.0f64.sqrt()) / 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_rotation_identity() {
        assert_relative_eq!(rotation_matrix(0.0, 0.0), Matrix3::identity(), epsilon = 1e-15);
    }

    #[test]
    fn test_rotation_orthogonal() {
        for &(pitch, roll) in &[(10.0, 0.0), (0.0, -15.0), (12.5, 7.0), (-20.0, 19.0), (90.0, 45.0)] {
            let r = rotation_matrix(pitch, roll);
            assert_relative_eq!(r.transpose() * r, Matrix3::identity(), epsilon = 1e-12);
            assert_relative_eq!(r.determinant(), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_rotation_order() {
        let r = rotation_matrix(20.0, 30.0);
        assert_relative_eq!(r, pitch_matrix(20.0) * roll_matrix(30.0), epsilon = 1e-15);
        // Reversed composition is a different rotation
        let reversed = roll_matrix(30.0) * pitch_matrix(20.0);
        assert!((r - reversed).norm() > 1e-3);
    }

    #[test]
    fn test_pitch_tilts_x_axis_down() {
        let tipped = rotation_matrix(30.0, 0.0) * Vector3::x();
        assert_relative_eq!(tipped.z, -sind(30.0), epsilon = 1e-12);
        assert_relative_eq!(tipped.y, 0.0, epsilon = 1e-12);
    }
}
