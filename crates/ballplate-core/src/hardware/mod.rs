//! Servo hardware abstraction
//!
//! The physical PWM driver lives outside this crate behind [`ServoBank`].
//! Everything the control loop sends to it goes through the
//! [`ActuatorGateway`], which range-checks whole commands before any servo
//! moves.

mod gateway;
pub mod mock;
mod traits;

pub use gateway::{ActuatorGateway, ApplyOutcome, GatewayStats};
pub use mock::{MockServoBank, ServoWrite};
pub use traits::ServoBank;
