//! H-bridge motor driver over two PWM channels.
//!
//! The bridge is driven sign-magnitude: one channel carries the PWM for
//! forward rotation, the other for reverse, and at most one of them is
//! nonzero while driving. Driving both high short-circuits the windings
//! for dynamic braking; driving both low lets the motor free-wheel.
//!
//! Channels are anything implementing `embedded-hal`'s [`SetDutyCycle`],
//! so the driver works with any HAL's PWM timer outputs. The PWM carrier
//! frequency is configured where the channels are created; see
//! [`DEFAULT_PWM_FREQUENCY_HZ`](crate::config::DEFAULT_PWM_FREQUENCY_HZ).

use embedded_hal::pwm::{Error as PwmError, ErrorKind, SetDutyCycle};
use libm::{fabsf, roundf};

/// Error produced when commanding the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MotorError {
    /// One of the PWM channels rejected a duty-cycle update.
    Pwm(ErrorKind),
}

impl MotorError {
    fn from_pwm<E: PwmError>(err: E) -> Self {
        Self::Pwm(err.kind())
    }
}

/// Dual-channel H-bridge driver.
pub struct MotorDriver<F, R> {
    fwd: F,
    rev: R,
    flip_dir: bool,
    max_duty: u16,
}

impl<F, R> MotorDriver<F, R>
where
    F: SetDutyCycle,
    R: SetDutyCycle,
{
    /// Create a driver from its two PWM channels.
    ///
    /// # Arguments
    /// * `fwd` - Channel that drives forward rotation
    /// * `rev` - Channel that drives reverse rotation
    /// * `flip_dir` - Invert the polarity of every effort command
    ///
    /// Full scale is the smaller of the two channels' maximum duty, in
    /// case the timers are configured with different periods.
    pub fn new(fwd: F, rev: R, flip_dir: bool) -> Self {
        let max_duty = fwd.max_duty_cycle().min(rev.max_duty_cycle());
        Self {
            fwd,
            rev,
            flip_dir,
            max_duty,
        }
    }

    /// Full-scale PWM duty value.
    pub fn max_duty(&self) -> u16 {
        self.max_duty
    }

    /// Whether effort commands are polarity-inverted.
    pub fn flip_dir(&self) -> bool {
        self.flip_dir
    }

    /// Drive the motor at a normalized effort.
    ///
    /// # Arguments
    /// * `effort` - Drive level in [-1.0, 1.0]; out-of-range values are
    ///   clamped, never rejected. Positive is forward (after `flip_dir`),
    ///   zero delegates to [`coast`](Self::coast)
    pub fn set_effort(&mut self, effort: f32) -> Result<(), MotorError> {
        let mut effort = effort.clamp(-1.0, 1.0);
        if self.flip_dir {
            effort = -effort;
        }

        let duty = roundf(fabsf(effort) * self.max_duty as f32) as u16;

        if effort > 0.0 {
            self.fwd
                .set_duty_cycle(duty)
                .map_err(MotorError::from_pwm)?;
            self.rev.set_duty_cycle(0).map_err(MotorError::from_pwm)?;
        } else if effort < 0.0 {
            self.fwd.set_duty_cycle(0).map_err(MotorError::from_pwm)?;
            self.rev
                .set_duty_cycle(duty)
                .map_err(MotorError::from_pwm)?;
        } else {
            self.coast()?;
        }

        Ok(())
    }

    /// Short both motor terminals to brake dynamically.
    pub fn brake(&mut self) -> Result<(), MotorError> {
        self.fwd
            .set_duty_cycle(self.max_duty)
            .map_err(MotorError::from_pwm)?;
        self.rev
            .set_duty_cycle(self.max_duty)
            .map_err(MotorError::from_pwm)
    }

    /// Release both motor terminals and let the motor free-wheel.
    pub fn coast(&mut self) -> Result<(), MotorError> {
        self.fwd.set_duty_cycle(0).map_err(MotorError::from_pwm)?;
        self.rev.set_duty_cycle(0).map_err(MotorError::from_pwm)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use core::cell::Cell;

    /// PWM channel mock recording the last commanded duty.
    pub(crate) struct MockPwm {
        pub duty: Cell<u16>,
        pub max_duty: u16,
        pub fail: Cell<bool>,
    }

    impl MockPwm {
        pub fn new(max_duty: u16) -> Self {
            Self {
                duty: Cell::new(0),
                max_duty,
                fail: Cell::new(false),
            }
        }
    }

    #[derive(Debug)]
    pub(crate) struct MockPwmError;

    impl PwmError for MockPwmError {
        fn kind(&self) -> ErrorKind {
            ErrorKind::Other
        }
    }

    impl embedded_hal::pwm::ErrorType for &MockPwm {
        type Error = MockPwmError;
    }

    impl SetDutyCycle for &MockPwm {
        fn max_duty_cycle(&self) -> u16 {
            self.max_duty
        }

        fn set_duty_cycle(&mut self, duty: u16) -> Result<(), Self::Error> {
            if self.fail.get() {
                return Err(MockPwmError);
            }
            self.duty.set(duty);
            Ok(())
        }
    }

    #[test]
    fn positive_effort_drives_forward_channel_only() {
        let (fwd, rev) = (MockPwm::new(1000), MockPwm::new(1000));
        let mut driver = MotorDriver::new(&fwd, &rev, false);

        driver.set_effort(0.5).unwrap();
        assert_eq!(fwd.duty.get(), 500);
        assert_eq!(rev.duty.get(), 0);
    }

    #[test]
    fn negative_effort_drives_reverse_channel_only() {
        let (fwd, rev) = (MockPwm::new(1000), MockPwm::new(1000));
        let mut driver = MotorDriver::new(&fwd, &rev, false);

        driver.set_effort(-0.25).unwrap();
        assert_eq!(fwd.duty.get(), 0);
        assert_eq!(rev.duty.get(), 250);
    }

    #[test]
    fn effort_is_clamped_not_rejected() {
        let (fwd, rev) = (MockPwm::new(1000), MockPwm::new(1000));
        let mut driver = MotorDriver::new(&fwd, &rev, false);

        driver.set_effort(3.0).unwrap();
        assert_eq!(fwd.duty.get(), 1000);
        driver.set_effort(-42.0).unwrap();
        assert_eq!(rev.duty.get(), 1000);
        assert_eq!(fwd.duty.get(), 0);
    }

    #[test]
    fn flip_dir_swaps_channels() {
        let (fwd, rev) = (MockPwm::new(1000), MockPwm::new(1000));
        let mut driver = MotorDriver::new(&fwd, &rev, true);

        driver.set_effort(0.5).unwrap();
        assert_eq!(fwd.duty.get(), 0);
        assert_eq!(rev.duty.get(), 500);
    }

    #[test]
    fn zero_effort_coasts() {
        let (fwd, rev) = (MockPwm::new(1000), MockPwm::new(1000));
        let mut driver = MotorDriver::new(&fwd, &rev, false);

        driver.set_effort(1.0).unwrap();
        driver.set_effort(0.0).unwrap();
        assert_eq!(fwd.duty.get(), 0);
        assert_eq!(rev.duty.get(), 0);
    }

    #[test]
    fn brake_drives_both_channels_to_max() {
        let (fwd, rev) = (MockPwm::new(1000), MockPwm::new(1000));
        let mut driver = MotorDriver::new(&fwd, &rev, false);

        driver.brake().unwrap();
        assert_eq!(fwd.duty.get(), 1000);
        assert_eq!(rev.duty.get(), 1000);
    }

    #[test]
    fn duty_is_rounded_to_nearest() {
        let (fwd, rev) = (MockPwm::new(999), MockPwm::new(999));
        let mut driver = MotorDriver::new(&fwd, &rev, false);

        // 0.5 * 999 = 499.5, rounds to 500 rather than truncating.
        driver.set_effort(0.5).unwrap();
        assert_eq!(fwd.duty.get(), 500);
    }

    #[test]
    fn full_scale_is_min_of_both_channels() {
        let (fwd, rev) = (MockPwm::new(1000), MockPwm::new(800));
        let driver = MotorDriver::new(&fwd, &rev, false);
        assert_eq!(driver.max_duty(), 800);
    }

    #[test]
    fn pwm_failure_surfaces_as_motor_error() {
        let (fwd, rev) = (MockPwm::new(1000), MockPwm::new(1000));
        let mut driver = MotorDriver::new(&fwd, &rev, false);

        fwd.fail.set(true);
        assert_eq!(driver.set_effort(0.5), Err(MotorError::Pwm(ErrorKind::Other)));
    }
}
