//! Default control parameters and motor geometry.
//!
//! Values match the reference drivetrain this crate was brought up on: a
//! brushed gearmotor with a 53 count/rev motor-shaft encoder behind a 45:1
//! gearbox, driven through an H-bridge at 50 Hz PWM and controlled at 50 Hz
//! (20 ms tick). Override per board through [`EncodedMotorConfig`] and
//! [`PidConfig`].
//!
//! [`EncodedMotorConfig`]: crate::encoded_motor::EncodedMotorConfig
//! [`PidConfig`]: crate::pid::PidConfig

/// Encoder counts per motor-shaft revolution.
pub const DEFAULT_COUNTS_PER_MOTOR_REV: u32 = 53;

/// Gearbox reduction between motor shaft and output shaft.
pub const DEFAULT_GEAR_RATIO: u32 = 45;

/// Encoder counts per output-shaft revolution.
pub const DEFAULT_RESOLUTION: u32 = DEFAULT_COUNTS_PER_MOTOR_REV * DEFAULT_GEAR_RATIO;

/// Control loop period [ms].
pub const DEFAULT_CONTROL_PERIOD_MS: u64 = 20;

/// Recommended H-bridge PWM frequency [Hz].
///
/// The PWM peripheral is configured by board setup code; this is only the
/// value the default gains were tuned against.
pub const DEFAULT_PWM_FREQUENCY_HZ: u32 = 50;

/// Speed loop proportional gain [effort per (counts/period)].
pub const DEFAULT_SPEED_KP: f32 = 0.035;

/// Speed loop integral gain.
pub const DEFAULT_SPEED_KI: f32 = 0.03;

/// Speed loop derivative gain.
pub const DEFAULT_SPEED_KD: f32 = 0.0;

/// Anti-windup clamp on the speed loop integral accumulator.
pub const DEFAULT_SPEED_MAX_INTEGRAL: f32 = 50.0;
