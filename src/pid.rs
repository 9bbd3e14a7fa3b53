//! PID controller with output shaping for motor control loops.
//!
//! Beyond the textbook P/I/D terms this controller applies, in order:
//! an anti-windup clamp on the integral accumulator, a minimum-output
//! magnitude floor (to overcome static friction), an output saturation
//! clamp, and a slew-rate limit between consecutive outputs. The order is
//! deliberate and part of the tuning contract; changing it changes the
//! transient response.
//!
//! Settling detection is built in: the controller counts consecutive
//! updates whose error magnitude is inside a tolerance band and reports
//! completion through [`Pid::is_done`].

use embassy_time::Instant;
use libm::fabsf;

/// Timestep assumed for the very first update, when no previous timestamp
/// exists [s].
const FIRST_TIMESTEP: f32 = 0.01;

/// Minimum timestep used in the integral/derivative terms [s]. Two ticks
/// resolving to the same millisecond must not divide by zero.
const MIN_TIMESTEP: f32 = 0.001;

/// Gains and output shaping limits for a [`Pid`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PidConfig {
    /// Proportional gain.
    pub kp: f32,
    /// Integral gain.
    pub ki: f32,
    /// Derivative gain.
    pub kd: f32,
    /// Minimum output magnitude. Nonzero outputs are pushed to at least
    /// this magnitude, in whichever direction they already point.
    pub min_output: f32,
    /// Output saturation bound; the result is always within
    /// `[-max_output, max_output]`.
    pub max_output: f32,
    /// Maximum output slew per second, or `None` for unlimited.
    pub max_derivative: Option<f32>,
    /// Anti-windup clamp on the integral accumulator, or `None` for
    /// unlimited.
    pub max_integral: Option<f32>,
    /// Error magnitude considered "on target" for settling detection.
    pub tolerance: f32,
    /// Consecutive in-tolerance updates required before
    /// [`Pid::is_done`] reports true.
    pub tolerance_count: u16,
}

impl Default for PidConfig {
    fn default() -> Self {
        Self {
            kp: 1.0,
            ki: 0.0,
            kd: 0.0,
            min_output: 0.0,
            max_output: 1.0,
            max_derivative: None,
            max_integral: None,
            tolerance: 0.1,
            tolerance_count: 1,
        }
    }
}

/// PID controller instance: a [`PidConfig`] plus update-to-update state.
pub struct Pid {
    config: PidConfig,

    prev_error: f32,
    prev_integral: f32,
    prev_output: f32,
    prev_time: Option<Instant>,

    /// Consecutive updates with `|error| < tolerance`.
    in_tolerance: u16,
}

impl Pid {
    /// Create a controller with the given configuration and cleared state.
    pub const fn new(config: PidConfig) -> Self {
        Self {
            config,
            prev_error: 0.0,
            prev_integral: 0.0,
            prev_output: 0.0,
            prev_time: None,
            in_tolerance: 0,
        }
    }

    /// The active configuration.
    pub fn config(&self) -> &PidConfig {
        &self.config
    }

    /// Run one controller update.
    ///
    /// # Arguments
    /// * `error` - Setpoint minus measurement, in process units
    /// * `now` - Timestamp of this update; consecutive timestamps determine
    ///   the integration timestep
    ///
    /// # Returns
    /// Actuation command, bounded by `max_output` and, if configured, by
    /// the slew limit relative to the previous output.
    pub fn update(&mut self, error: f32, now: Instant) -> f32 {
        let dt = match self.prev_time {
            None => FIRST_TIMESTEP,
            Some(prev) => {
                let elapsed = now.as_micros().saturating_sub(prev.as_micros()) as f32 / 1_000_000.0;
                elapsed.max(MIN_TIMESTEP)
            }
        };
        self.prev_time = Some(now);

        // Settling bookkeeping: the streak resets on any out-of-band error.
        if fabsf(error) < self.config.tolerance {
            self.in_tolerance = self.in_tolerance.saturating_add(1);
        } else {
            self.in_tolerance = 0;
        }

        let mut integral = self.prev_integral + error * dt;
        if let Some(max_integral) = self.config.max_integral {
            integral = integral.clamp(-max_integral, max_integral);
        }

        let derivative = (error - self.prev_error) / dt;

        let mut output =
            self.config.kp * error + self.config.ki * integral + self.config.kd * derivative;

        trace!(
            "pid: e={} p={} i={} d={}",
            error,
            self.config.kp * error,
            self.config.ki * integral,
            self.config.kd * derivative
        );

        // Push nonzero outputs out of the static-friction region. This is a
        // magnitude floor, not a deadband: even a small error produces at
        // least min_output of drive.
        if output > 0.0 {
            output = output.max(self.config.min_output);
        } else if output < 0.0 {
            output = output.min(-self.config.min_output);
        }

        output = output.clamp(-self.config.max_output, self.config.max_output);

        if let Some(max_derivative) = self.config.max_derivative {
            let lower = self.prev_output - max_derivative * dt;
            let upper = self.prev_output + max_derivative * dt;
            output = output.clamp(lower, upper);
        }

        self.prev_error = error;
        self.prev_integral = integral;
        self.prev_output = output;

        output
    }

    /// True once `tolerance_count` consecutive updates landed inside the
    /// tolerance band.
    pub fn is_done(&self) -> bool {
        self.in_tolerance >= self.config.tolerance_count
    }

    /// Clear all update-to-update state. The configuration is kept.
    pub fn reset(&mut self) {
        self.prev_error = 0.0;
        self.prev_integral = 0.0;
        self.prev_output = 0.0;
        self.prev_time = None;
        self.in_tolerance = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at_ms(ms: u64) -> Instant {
        Instant::from_millis(ms)
    }

    #[test]
    fn pure_proportional() {
        let mut pid = Pid::new(PidConfig::default());
        assert_eq!(pid.update(0.5, at_ms(0)), 0.5);
        assert_eq!(pid.update(-0.25, at_ms(20)), -0.25);
    }

    #[test]
    fn proportional_saturates_at_max_output() {
        let mut pid = Pid::new(PidConfig {
            kp: 10.0,
            ..PidConfig::default()
        });
        assert_eq!(pid.update(0.5, at_ms(0)), 1.0);
        assert_eq!(pid.update(-0.5, at_ms(20)), -1.0);
    }

    #[test]
    fn integral_clamps_at_max_integral() {
        // ki * max_integral bounds the integral contribution at 1.5, well
        // below the output clamp.
        let mut pid = Pid::new(PidConfig {
            kp: 0.0,
            ki: 0.03,
            max_integral: Some(50.0),
            max_output: 10.0,
            ..PidConfig::default()
        });

        let mut out = 0.0;
        for i in 0..100 {
            out = pid.update(100.0, at_ms(i * 20));
        }
        assert!((out - 1.5).abs() < 1e-5, "integral term escaped clamp: {out}");
    }

    #[test]
    fn output_always_bounded() {
        let mut pid = Pid::new(PidConfig {
            kp: 5.0,
            ki: 2.0,
            kd: 1.0,
            max_output: 0.8,
            ..PidConfig::default()
        });

        let errors = [100.0, -300.0, 2.0, 0.0, -0.5, 1e6];
        for (i, e) in errors.iter().enumerate() {
            let out = pid.update(*e, at_ms(i as u64 * 20));
            assert!(out.abs() <= 0.8, "|{out}| > max_output for error {e}");
        }
    }

    #[test]
    fn slew_limit_bounds_output_steps() {
        let mut pid = Pid::new(PidConfig {
            kp: 1.0,
            max_derivative: Some(2.0),
            ..PidConfig::default()
        });

        // First update: dt is the fixed 0.01 s, so the step from 0 is at
        // most 0.02.
        let mut prev = pid.update(1.0, at_ms(0));
        assert!((prev - 0.02).abs() < 1e-6);

        // Subsequent 20 ms updates may move at most 0.04 per step.
        for i in 1..30 {
            let out = pid.update(1.0, at_ms(i * 20));
            assert!((out - prev).abs() <= 2.0 * 0.02 + 1e-6);
            prev = out;
        }
        // And the command eventually reaches the proportional value.
        assert!((prev - 1.0).abs() < 1e-6);
    }

    #[test]
    fn min_output_floor_applies_in_both_directions() {
        let mut pid = Pid::new(PidConfig {
            kp: 1.0,
            min_output: 0.3,
            ..PidConfig::default()
        });
        assert_eq!(pid.update(0.05, at_ms(0)), 0.3);
        assert_eq!(pid.update(-0.05, at_ms(20)), -0.3);
        // Exactly zero error is not floored.
        assert_eq!(pid.update(0.0, at_ms(40)), 0.0);
    }

    #[test]
    fn settling_requires_consecutive_in_tolerance_updates() {
        let mut pid = Pid::new(PidConfig {
            tolerance: 0.1,
            tolerance_count: 3,
            ..PidConfig::default()
        });

        pid.update(0.05, at_ms(0));
        pid.update(0.01, at_ms(20));
        assert!(!pid.is_done());
        // Out-of-band error resets the streak.
        pid.update(0.5, at_ms(40));
        pid.update(0.05, at_ms(60));
        pid.update(0.05, at_ms(80));
        assert!(!pid.is_done());
        pid.update(0.0, at_ms(100));
        assert!(pid.is_done());
    }

    #[test]
    fn zero_dt_is_floored() {
        let mut pid = Pid::new(PidConfig {
            kp: 0.0,
            kd: 1.0,
            max_output: 1e9,
            ..PidConfig::default()
        });
        pid.update(1.0, at_ms(0));
        // Same timestamp twice: derivative must stay finite.
        let out = pid.update(2.0, at_ms(0));
        assert!(out.is_finite());
        assert_eq!(out, 1.0 / MIN_TIMESTEP);
    }

    #[test]
    fn reset_clears_state_but_not_config() {
        let mut pid = Pid::new(PidConfig {
            ki: 1.0,
            tolerance_count: 1,
            max_output: 100.0,
            ..PidConfig::default()
        });
        pid.update(0.01, at_ms(0));
        pid.update(10.0, at_ms(20));
        pid.reset();

        assert!(!pid.is_done());
        assert_eq!(pid.config().ki, 1.0);
        // First update after reset behaves like the very first one: fixed
        // 0.01 s timestep, empty integral.
        let out = pid.update(1.0, at_ms(1000));
        assert!((out - (1.0 + 1.0 * 0.01)).abs() < 1e-6);
    }
}
