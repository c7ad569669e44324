//! Servo bank trait

use crate::kinematics::ServoAngles;
use crate::Result;

/// Three position servos driven by an external PWM layer
///
/// Implementations only move hardware; range checking is the gateway's job.
pub trait ServoBank: Send {
    /// Driver name for logs
    fn name(&self) -> &str;

    /// Command one servo to `angle` degrees
    fn write(&mut self, servo: usize, angle: f64) -> Result<()>;

    /// Last commanded angles, if every servo has been written
    fn angles(&self) -> Option<ServoAngles>;

    /// Stop driving the servos (outputs go limp)
    fn release(&mut self) -> Result<()>;
}
