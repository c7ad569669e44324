//! Safety-bounded actuator gateway
//!
//! The last line of defence in front of the servos. A command is checked in
//! full before the first servo is touched: one out-of-range angle drops the
//! whole command and the platform keeps its previous attitude.

use std::thread;

use serde::{Deserialize, Serialize};

use super::traits::ServoBank;
use crate::config::GatewayConfig;
use crate::kinematics::{ServoAngles, ARM_NAMES, NUM_ARMS};
use crate::{Error, Result};

/// Result of offering a command to the gateway
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ApplyOutcome {
    /// All three angles written
    Applied(ServoAngles),
    /// Nothing written; `axis` was the first angle out of range
    Rejected { axis: usize, value: f64 },
}

impl ApplyOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// Gateway counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayStats {
    pub applied: u64,
    pub rejected: u64,
    /// Current consecutive rejections per axis
    pub rejection_streaks: [u32; NUM_ARMS],
}

/// Range-checked, all-or-nothing access to a [`ServoBank`]
pub struct ActuatorGateway<B> {
    bank: B,
    config: GatewayConfig,
    neutral: ServoAngles,
    last_applied: Option<ServoAngles>,
    stats: GatewayStats,
}

impl<B: ServoBank> ActuatorGateway<B> {
    /// `neutral` is the level-pose command used by [`neutral`](Self::neutral)
    pub fn new(bank: B, config: GatewayConfig, neutral: ServoAngles) -> Self {
        Self {
            bank,
            config,
            neutral,
            last_applied: None,
            stats: GatewayStats::default(),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn neutral_angles(&self) -> ServoAngles {
        self.neutral
    }

    /// Last command that reached the servos
    pub fn last_applied(&self) -> Option<ServoAngles> {
        self.last_applied
    }

    pub fn stats(&self) -> GatewayStats {
        self.stats
    }

    pub fn bank(&self) -> &B {
        &self.bank
    }

    /// First axis whose angle is outside the limits (NaN included)
    pub fn check(&self, angles: &ServoAngles) -> Option<(usize, f64)> {
        angles
            .iter()
            .enumerate()
            .find(|&(_, angle)| !self.config.in_range(angle))
    }

    /// Validate and apply a full command
    ///
    /// A rejection is an ordinary outcome. `Err` means the servo driver
    /// itself failed mid-command; servos written before the failure are put
    /// back to the last applied command when there is one.
    pub fn apply(&mut self, angles: &ServoAngles) -> Result<ApplyOutcome> {
        if let Some((axis, value)) = self.check(angles) {
            self.stats.rejected += 1;
            for (i, streak) in self.stats.rejection_streaks.iter_mut().enumerate() {
                *streak = if i == axis { streak.saturating_add(1) } else { 0 };
            }
            let streak = self.stats.rejection_streaks[axis];
            tracing::warn!(
                arm = ARM_NAMES[axis],
                value,
                min = self.config.min_angle,
                max = self.config.max_angle,
                streak,
                "gateway: command rejected"
            );
            if streak == self.config.rejection_escalation {
                tracing::error!(
                    arm = ARM_NAMES[axis],
                    streak,
                    "gateway: axis keeps exceeding its limits, check geometry and gains"
                );
            }
            return Ok(ApplyOutcome::Rejected { axis, value });
        }

        for (servo, angle) in angles.iter().enumerate() {
            if let Err(e) = self.bank.write(servo, angle) {
                tracing::error!(servo, "gateway: write failed: {}", e);
                self.restore(servo);
                return Err(e);
            }
        }
        let settle = self.config.settle_delay();
        if !settle.is_zero() {
            thread::sleep(settle);
        }

        self.stats.applied += 1;
        self.stats.rejection_streaks = [0; NUM_ARMS];
        self.last_applied = Some(*angles);
        Ok(ApplyOutcome::Applied(*angles))
    }

    /// Undo the first `written` servos of a failed command
    fn restore(&mut self, written: usize) {
        if written == 0 {
            return;
        }
        let Some(previous) = self.last_applied else {
            tracing::warn!(written, "gateway: partial command left on the servos");
            return;
        };
        for (servo, angle) in previous.iter().enumerate().take(written) {
            if let Err(e) = self.bank.write(servo, angle) {
                tracing::error!(servo, "gateway: restore failed, platform pose unknown: {}", e);
                self.last_applied = None;
                return;
            }
        }
    }

    /// Geometry fault once an axis has been rejected too many times in a row
    pub fn persistent_fault(&self) -> Option<Error> {
        let (axis, &streak) = self
            .stats
            .rejection_streaks
            .iter()
            .enumerate()
            .max_by_key(|&(_, s)| *s)?;
        (streak >= self.config.rejection_escalation).then(|| {
            Error::Geometry(format!(
                "{} rejected {} consecutive commands outside [{}, {}]",
                ARM_NAMES[axis], streak, self.config.min_angle, self.config.max_angle
            ))
        })
    }

    /// Drive the level pose
    pub fn neutral(&mut self) -> Result<ApplyOutcome> {
        let neutral = self.neutral;
        self.apply(&neutral)
    }

    /// Release the servo bank
    pub fn release(&mut self) -> Result<()> {
        tracing::debug!(bank = self.bank.name(), "gateway: releasing servos");
        self.bank.release()
    }
}

impl<B> std::fmt::Debug for ActuatorGateway<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActuatorGateway")
            .field("config", &self.config)
            .field("last_applied", &self.last_applied)
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::MockServoBank;

    fn gateway() -> (ActuatorGateway<MockServoBank>, MockServoBank) {
        let bank = MockServoBank::new();
        let config = GatewayConfig {
            settle_secs: 0.0,
            rejection_escalation: 3,
            ..Default::default()
        };
        (
            ActuatorGateway::new(bank.clone(), config, ServoAngles::uniform(70.0)),
            bank,
        )
    }

    #[test]
    fn test_applies_in_range_command() {
        let (mut gw, bank) = gateway();
        let cmd = ServoAngles::new(60.0, 70.0, 80.0);
        assert_eq!(gw.apply(&cmd).unwrap(), ApplyOutcome::Applied(cmd));
        assert_eq!(bank.angles(), Some(cmd));
        assert_eq!(gw.last_applied(), Some(cmd));
        assert_eq!(gw.stats().applied, 1);
    }

    #[test]
    fn test_rejection_touches_nothing() {
        let (mut gw, bank) = gateway();
        let good = ServoAngles::new(60.0, 70.0, 80.0);
        gw.apply(&good).unwrap();
        let before = bank.write_count();

        for bad in [
            ServoAngles::new(60.0, 70.0, 130.0),
            ServoAngles::new(10.0, 70.0, 80.0),
            ServoAngles::new(60.0, f64::NAN, 80.0),
        ] {
            let outcome = gw.apply(&bad).unwrap();
            assert!(!outcome.is_applied());
            assert_eq!(bank.write_count(), before);
            assert_eq!(bank.angles(), Some(good));
        }
        assert_eq!(gw.last_applied(), Some(good));
    }

    #[test]
    fn test_reports_first_bad_axis() {
        let (mut gw, _) = gateway();
        let outcome = gw.apply(&ServoAngles::new(70.0, 150.0, 0.0)).unwrap();
        assert_eq!(outcome, ApplyOutcome::Rejected { axis: 1, value: 150.0 });
    }

    #[test]
    fn test_limits_are_inclusive() {
        let (mut gw, _) = gateway();
        assert!(gw.apply(&ServoAngles::new(20.0, 120.0, 70.0)).unwrap().is_applied());
    }

    #[test]
    fn test_persistent_rejection_escalates() {
        let (mut gw, _) = gateway();
        let bad = ServoAngles::new(70.0, 70.0, 125.0);
        for _ in 0..2 {
            gw.apply(&bad).unwrap();
            assert!(gw.persistent_fault().is_none());
        }
        gw.apply(&bad).unwrap();
        assert!(matches!(gw.persistent_fault(), Some(Error::Geometry(_))));
        assert_eq!(gw.stats().rejection_streaks, [0, 0, 3]);

        gw.neutral().unwrap();
        assert!(gw.persistent_fault().is_none());
    }

    #[test]
    fn test_streak_resets_when_another_axis_fails() {
        let (mut gw, _) = gateway();
        gw.apply(&ServoAngles::new(70.0, 70.0, 125.0)).unwrap();
        gw.apply(&ServoAngles::new(70.0, 70.0, 125.0)).unwrap();
        gw.apply(&ServoAngles::new(5.0, 70.0, 70.0)).unwrap();
        assert_eq!(gw.stats().rejection_streaks, [1, 0, 0]);
        assert_eq!(gw.stats().rejected, 3);
    }

    #[test]
    fn test_driver_failure_propagates() {
        let (mut gw, bank) = gateway();
        bank.fail_on(2);
        assert!(matches!(gw.apply(&ServoAngles::uniform(70.0)), Err(Error::Hardware(_))));
        assert!(gw.last_applied().is_none());
    }

    #[test]
    fn test_failed_write_restores_previous_command() {
        let (mut gw, bank) = gateway();
        let good = ServoAngles::new(60.0, 70.0, 80.0);
        gw.apply(&good).unwrap();

        bank.fail_on(2);
        assert!(gw.apply(&ServoAngles::new(65.0, 75.0, 85.0)).is_err());
        let tail: Vec<_> = bank.writes()[3..].iter().map(|w| (w.servo, w.angle)).collect();
        assert_eq!(tail, [(0, 65.0), (1, 75.0), (0, 60.0), (1, 70.0)]);
        assert_eq!(bank.angles(), Some(good));
        assert_eq!(gw.last_applied(), Some(good));
        assert_eq!(gw.stats().applied, 1);
    }

    #[test]
    fn test_neutral_and_release() {
        let (mut gw, bank) = gateway();
        assert_eq!(
            gw.neutral().unwrap(),
            ApplyOutcome::Applied(ServoAngles::uniform(70.0))
        );
        gw.release().unwrap();
        assert!(bank.is_released());
    }
}
