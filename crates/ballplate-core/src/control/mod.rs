//! Feedback control
//!
//! Provides the per-axis PID, the two-axis ball controller, the fixed-rate
//! loop runner and the balancing session that ties sensing to actuation.

mod balance;
mod control_loop;
mod controller;
mod pid;

pub use balance::{Balancer, BalancerState, CycleOutcome, CycleReport, SenseStatus, SessionReport};
pub use control_loop::{ControlLoop, ControlLoopConfig, ControlLoopStats, StopHandle};
pub use controller::{
    BallController, BallControllerConfig, ControlStep, ControllerState, MeasurementSource,
    StepTiming,
};
pub use pid::{DerivativeFilter, Pid, PidConfig, PidState, PidTerms};
