//! Closed-loop speed control for DC motors with quadrature encoders.
//!
//! The crate provides the four pieces of a per-motor control loop and the
//! glue between them:
//!
//! | Module | Purpose |
//! | ------ | ------- |
//! | [`pid`] | PID control law with anti-windup, output floor/clamp and slew limiting |
//! | [`quadrature`] | Transition-table quadrature decoder and the [`QuadratureSource`] seam |
//! | [`motor_driver`] | Dual-channel H-bridge driver over `embedded-hal` PWM |
//! | [`encoded_motor`] | Orchestrator running the fixed-period speed loop |
//! | [`config`] | Default gains, period and geometry constants |
//!
//! Hardware setup (clocks, pins, PWM timers, the encoder sampling
//! interrupt) stays in board code; this crate only consumes the resulting
//! `SetDutyCycle` channels and a [`QuadratureSource`].
//!
//! ```ignore
//! static DECODER: QuadratureDecoder = QuadratureDecoder::new(config::DEFAULT_RESOLUTION);
//! static MOTOR: StaticCell<EncodedMotor<PwmCh, PwmCh, &QuadratureDecoder>> = StaticCell::new();
//!
//! let driver = MotorDriver::new(fwd_pwm, rev_pwm, false);
//! let motor = MOTOR.init(EncodedMotor::new(driver, &DECODER, Default::default()));
//! spawner.spawn(control_task(motor)).unwrap();
//!
//! motor.set_speed(Some(60.0))?; // track 60 RPM at the output shaft
//! ```
//!
//! Enable the `defmt` feature for structured logging of loop start/stop
//! and abandoned ticks.

#![cfg_attr(not(test), no_std)]

mod fmt;

pub mod config;
pub mod encoded_motor;
pub mod motor_driver;
pub mod pid;
pub mod quadrature;

pub use encoded_motor::{EncodedMotor, EncodedMotorConfig};
pub use motor_driver::{MotorDriver, MotorError};
pub use pid::{Pid, PidConfig};
pub use quadrature::{QuadratureDecoder, QuadratureSource};
