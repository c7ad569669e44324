//! Inverse kinematics solver
//!
//! For each arm the platform attachment point is rotated and lifted into the
//! base frame, giving the leg vector `l` from the servo pivot. The two-link
//! arm (driven link `a`, passive link `b`) must span `|l|`; the law of
//! cosines gives the angle `beta` between the driven link and `l`, and `l`
//! itself leans `alpha` away from vertical. The servo angle is
//! `psi = alpha + beta`, measured from the vertical axis.

use crate::math::{planar_unit, rotation_matrix, Matrix3, Vector3};
use crate::{Error, Result};

use super::{PlatformGeometry, PlatformPose, ServoAngles, ARM_SPACING, NUM_ARMS};

/// Newton iterations allowed in [`InverseKinematics::forward`]
const FORWARD_MAX_ITERATIONS: usize = 50;
/// Convergence threshold on the angle residual, degrees
const FORWARD_TOLERANCE: f64 = 1e-10;
/// Finite-difference step for the forward Jacobian (degrees / mm)
const JACOBIAN_STEP: f64 = 1e-5;
/// Bisection steps used when clamping an unreachable tilt
const CLAMP_ITERATIONS: usize = 24;

/// Result of [`InverseKinematics::solve_clamped`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClampedSolution {
    /// Angles for the pose actually commanded
    pub angles: ServoAngles,
    /// Pose actually commanded
    pub pose: PlatformPose,
    /// Fraction of the requested tilt that was kept (1.0 = unclamped)
    pub tilt_scale: f64,
}

impl ClampedSolution {
    /// Whether the requested pose had to be reduced
    #[inline]
    pub fn was_clamped(&self) -> bool {
        self.tilt_scale < 1.0
    }
}

/// Pose to servo-angle solver for one platform geometry
///
/// # Example
/// ```
/// use ballplate_core::kinematics::{InverseKinematics, PlatformPose};
///
/// let ik = InverseKinematics::default();
/// let angles = ik.solve(&PlatformPose::tilt(5.0, -3.0)).unwrap();
/// assert!(angles.iter().all(f64::is_finite));
/// ```
#[derive(Debug, Clone, Default)]
pub struct InverseKinematics {
    geometry: PlatformGeometry,
}

impl InverseKinematics {
    /// Create a solver for the given geometry
    pub fn new(geometry: PlatformGeometry) -> Self {
        Self { geometry }
    }

    /// Geometry the solver works on
    #[inline]
    pub fn geometry(&self) -> &PlatformGeometry {
        &self.geometry
    }

    /// Servo angles that realize `pose`
    ///
    /// Returns [`Error::Unreachable`] when any arm cannot span its leg
    /// vector, or when an attachment point would sit at or below its pivot.
    pub fn solve(&self, pose: &PlatformPose) -> Result<ServoAngles> {
        if !pose.is_finite() {
            return Err(Error::Unreachable {
                arm: 0,
                ratio: f64::NAN,
            });
        }

        let rotation = rotation_matrix(pose.pitch, pose.roll);
        let translation = self.translation(pose);

        let mut angles = [0.0; NUM_ARMS];
        for (arm, angle) in angles.iter_mut().enumerate() {
            *angle = self.arm_angle(arm, &self.leg(arm, &rotation, &translation))?;
        }
        Ok(ServoAngles(angles))
    }

    /// Solve, reducing the tilt toward level if the full pose is out of reach
    ///
    /// The height offset is kept. Bisection finds the largest fraction of the
    /// requested pitch/roll that is still reachable. Fails only when even the
    /// level pose at that height is unreachable.
    pub fn solve_clamped(&self, pose: &PlatformPose) -> Result<ClampedSolution> {
        let err = match self.solve(pose) {
            Ok(angles) => {
                return Ok(ClampedSolution {
                    angles,
                    pose: *pose,
                    tilt_scale: 1.0,
                })
            }
            Err(e) => e,
        };

        let level = pose.scale_tilt(0.0);
        let mut best = match self.solve(&level) {
            Ok(angles) => (angles, 0.0),
            Err(_) => return Err(err),
        };

        let (mut lo, mut hi) = (0.0, 1.0);
        for _ in 0..CLAMP_ITERATIONS {
            let mid = 0.5 * (lo + hi);
            match self.solve(&pose.scale_tilt(mid)) {
                Ok(angles) => {
                    lo = mid;
                    best = (angles, mid);
                }
                Err(_) => hi = mid,
            }
        }

        let (angles, tilt_scale) = best;
        Ok(ClampedSolution {
            angles,
            pose: pose.scale_tilt(tilt_scale),
            tilt_scale,
        })
    }

    /// Pose that produces `angles`, found by Newton iteration on [`solve`](Self::solve)
    ///
    /// Starts from the level pose; intended for poses inside the small-angle
    /// working range of the mechanism.
    pub fn forward(&self, angles: &ServoAngles) -> Result<PlatformPose> {
        let target = Vector3::from(angles.as_array());
        let mut x = Vector3::zeros();

        for _ in 0..FORWARD_MAX_ITERATIONS {
            let residual = self.eval(&x)? - target;
            if residual.amax() < FORWARD_TOLERANCE {
                return Ok(to_pose(&x));
            }

            let jacobian = self.jacobian(&x)?;
            let step = jacobian.lu().solve(&residual).ok_or_else(|| {
                Error::Geometry("forward kinematics: singular Jacobian".into())
            })?;

            // Backtrack if the full step leaves the reachable set
            let mut scale = 1.0;
            loop {
                let candidate = x - step * scale;
                if self.eval(&candidate).is_ok() {
                    x = candidate;
                    break;
                }
                scale *= 0.5;
                if scale < 1e-6 {
                    return Err(Error::Geometry(
                        "forward kinematics: no reachable pose along Newton step".into(),
                    ));
                }
            }
        }

        let residual = self.eval(&x)? - target;
        if residual.amax() < 1e-6 {
            Ok(to_pose(&x))
        } else {
            Err(Error::Geometry(format!(
                "forward kinematics did not converge (residual {:.3e} deg)",
                residual.amax()
            )))
        }
    }

    /// World position of an arm's platform attachment for `pose`
    pub fn attachment_point(&self, arm: usize, pose: &PlatformPose) -> Vector3 {
        let rotation = rotation_matrix(pose.pitch, pose.roll);
        self.translation(pose) + rotation * self.geometry.platform_point(arm)
    }

    /// World position of the driven link's tip for arm `arm` at `angle` degrees
    ///
    /// The driven link swings in the vertical plane containing the leg
    /// vector for `pose`, so for solved angles the distance from this point
    /// to [`attachment_point`](Self::attachment_point) equals the passive link length.
    pub fn elbow(&self, arm: usize, angle: f64, pose: &PlatformPose) -> Vector3 {
        let rotation = rotation_matrix(pose.pitch, pose.roll);
        let leg = self.leg(arm, &rotation, &self.translation(pose));
        let horizontal = leg.x.hypot(leg.y);
        let direction = if horizontal > 1e-12 {
            Vector3::new(leg.x / horizontal, leg.y / horizontal, 0.0)
        } else {
            planar_unit(ARM_SPACING * arm as f64)
        };
        let psi = angle.to_radians();
        self.geometry.base_point(arm)
            + (direction * psi.sin() + Vector3::z() * psi.cos()) * self.geometry.arm_a()
    }

    #[inline]
    fn translation(&self, pose: &PlatformPose) -> Vector3 {
        Vector3::new(0.0, 0.0, self.geometry.rest_height() + pose.height_offset)
    }

    #[inline]
    fn leg(&self, arm: usize, rotation: &Matrix3, translation: &Vector3) -> Vector3 {
        translation + rotation * self.geometry.platform_point(arm) - self.geometry.base_point(arm)
    }

    fn arm_angle(&self, arm: usize, leg: &Vector3) -> Result<f64> {
        let (a, b) = (self.geometry.arm_a(), self.geometry.arm_b());
        let length = leg.norm();
        let ratio = (a * a - b * b + length * length) / (2.0 * a * length);

        if !(-1.0..=1.0).contains(&ratio) || leg.z <= 0.0 {
            return Err(Error::Unreachable { arm, ratio });
        }

        let beta = ratio.acos();
        let alpha = (leg.x.hypot(leg.y) / leg.z).atan();
        Ok((alpha + beta).to_degrees())
    }

    fn eval(&self, x: &Vector3) -> Result<Vector3> {
        Ok(Vector3::from(self.solve(&to_pose(x))?.as_array()))
    }

    fn jacobian(&self, x: &Vector3) -> Result<Matrix3> {
        let mut columns = [Vector3::zeros(); 3];
        for (i, column) in columns.iter_mut().enumerate() {
            let mut dx = Vector3::zeros();
            dx[i] = JACOBIAN_STEP;
            *column = (self.eval(&(x + dx))? - self.eval(&(x - dx))?) / (2.0 * JACOBIAN_STEP);
        }
        Ok(Matrix3::from_columns(&columns))
    }
}

#[inline]
fn to_pose(x: &Vector3) -> PlatformPose {
    PlatformPose::new(x[0], x[1], x[2])
}
