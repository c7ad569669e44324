//! In-memory servo bank for tests and dry runs

use parking_lot::Mutex;
use std::sync::Arc;

use super::traits::ServoBank;
use crate::kinematics::{ServoAngles, NUM_ARMS};
use crate::{Error, Result};

/// One recorded servo write
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServoWrite {
    pub servo: usize,
    pub angle: f64,
}

#[derive(Debug, Default)]
struct MockBankState {
    writes: Vec<ServoWrite>,
    current: [Option<f64>; NUM_ARMS],
    released: bool,
    fail_servo: Option<usize>,
}

/// A servo bank that records every write
///
/// Clones share the same record, so a test can keep one clone while the
/// gateway owns another on the control thread.
#[derive(Debug, Clone, Default)]
pub struct MockServoBank {
    state: Arc<Mutex<MockBankState>>,
}

impl MockServoBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write to `servo` fail
    pub fn fail_on(&self, servo: usize) {
        self.state.lock().fail_servo = Some(servo);
    }

    /// All writes so far, in order
    pub fn writes(&self) -> Vec<ServoWrite> {
        self.state.lock().writes.clone()
    }

    pub fn write_count(&self) -> usize {
        self.state.lock().writes.len()
    }

    /// Whether the bank is released and has not been written since
    pub fn is_released(&self) -> bool {
        self.state.lock().released
    }
}

impl ServoBank for MockServoBank {
    fn name(&self) -> &str {
        "mock"
    }

    fn write(&mut self, servo: usize, angle: f64) -> Result<()> {
        let mut state = self.state.lock();
        if servo >= NUM_ARMS {
            return Err(Error::Hardware(format!("no servo {}", servo)));
        }
        if state.fail_servo == Some(servo) {
            return Err(Error::Hardware(format!("servo {} not responding", servo)));
        }
        state.writes.push(ServoWrite { servo, angle });
        state.current[servo] = Some(angle);
        state.released = false;
        Ok(())
    }

    fn angles(&self) -> Option<ServoAngles> {
        let [a, b, c] = self.state.lock().current;
        Some(ServoAngles::new(a?, b?, c?))
    }

    fn release(&mut self) -> Result<()> {
        self.state.lock().released = true;
        Ok(())
    }
}
