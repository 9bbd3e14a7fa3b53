//! Closed-loop speed control for one encoded DC motor.
//!
//! [`EncodedMotor`] ties a [`MotorDriver`], a [`QuadratureSource`] and a
//! speed [`Pid`] together under a fixed-period control loop. The loop is
//! the async [`run`](EncodedMotor::run) future, meant to be spawned as its
//! own task; every tick it samples the encoder, derives speed in counts
//! per period, and, when a target speed is set, evaluates the PID and
//! applies the effort to the bridge.
//!
//! All public operations take `&self`: callers on other tasks talk to the
//! control loop through single-word atomics and short critical sections,
//! never blocking a tick for longer than one PID evaluation.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_time::{Duration, Instant, Ticker};
use embedded_hal::pwm::SetDutyCycle;
use portable_atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};

use crate::config::{
    DEFAULT_CONTROL_PERIOD_MS, DEFAULT_RESOLUTION, DEFAULT_SPEED_KD, DEFAULT_SPEED_KI,
    DEFAULT_SPEED_KP, DEFAULT_SPEED_MAX_INTEGRAL,
};
use crate::motor_driver::{MotorDriver, MotorError};
use crate::pid::{Pid, PidConfig};
use crate::quadrature::QuadratureSource;

/// Construction parameters for an [`EncodedMotor`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EncodedMotorConfig {
    /// Encoder counts per output-shaft revolution.
    pub resolution: u32,
    /// Whether zero effort brakes (true) or coasts (false).
    pub brake_at_zero: bool,
    /// Control loop period [ms].
    pub period_ms: u64,
    /// Speed controller gains and limits. Errors are in encoder counts
    /// per control period, output is normalized effort.
    pub speed_pid: PidConfig,
}

impl Default for EncodedMotorConfig {
    fn default() -> Self {
        Self {
            resolution: DEFAULT_RESOLUTION,
            brake_at_zero: true,
            period_ms: DEFAULT_CONTROL_PERIOD_MS,
            speed_pid: PidConfig {
                kp: DEFAULT_SPEED_KP,
                ki: DEFAULT_SPEED_KI,
                kd: DEFAULT_SPEED_KD,
                max_integral: Some(DEFAULT_SPEED_MAX_INTEGRAL),
                ..PidConfig::default()
            },
        }
    }
}

/// State owned by the control loop, touched only inside short critical
/// sections.
struct Inner<F, R> {
    driver: MotorDriver<F, R>,
    pid: Pid,
    prev_position: i32,
}

/// One DC motor with encoder feedback and a periodic speed loop.
///
/// The motor is constructed in the running state; spawn
/// [`run`](Self::run) to actually drive the loop. [`brake`](Self::brake),
/// [`coast`](Self::coast) and [`stop`](Self::stop) cancel the loop
/// permanently: an in-flight tick may still finish, no further tick runs,
/// and nothing restarts it short of constructing a new instance. Manual
/// [`set_effort`](Self::set_effort) keeps working after cancellation;
/// speed targets do not, since nothing evaluates them anymore.
pub struct EncodedMotor<F, R, Q> {
    inner: Mutex<CriticalSectionRawMutex, RefCell<Inner<F, R>>>,
    encoder: Q,

    resolution: u32,
    /// Encoder sign correction, taken from the driver's `flip_dir`.
    invert: bool,
    period: Duration,
    /// Control periods per minute, for RPM conversions.
    ticks_per_minute: f32,

    /// Target speed in counts per period, stored as f32 bits. NaN encodes
    /// "no target" so the whole value fits one atomic word.
    target_bits: AtomicU32,
    /// Most recent measured speed [counts/period].
    speed: AtomicI32,
    running: AtomicBool,
    brake_at_zero: AtomicBool,
    /// Ticks abandoned due to a driver error since construction.
    tick_faults: AtomicU32,
}

impl<F, R, Q> EncodedMotor<F, R, Q>
where
    F: SetDutyCycle,
    R: SetDutyCycle,
    Q: QuadratureSource,
{
    /// Create a motor in the running state.
    ///
    /// # Arguments
    /// * `driver` - H-bridge driver; its `flip_dir` also sign-corrects the
    ///   encoder so positive effort yields increasing position
    /// * `encoder` - Position source sampled once per tick
    /// * `config` - Loop period, geometry and speed gains
    pub fn new(driver: MotorDriver<F, R>, encoder: Q, config: EncodedMotorConfig) -> Self {
        let invert = driver.flip_dir();
        Self {
            inner: Mutex::new(RefCell::new(Inner {
                driver,
                pid: Pid::new(config.speed_pid),
                prev_position: 0,
            })),
            encoder,
            resolution: config.resolution,
            invert,
            period: Duration::from_millis(config.period_ms),
            ticks_per_minute: 60_000.0 / config.period_ms as f32,
            target_bits: AtomicU32::new(f32::NAN.to_bits()),
            speed: AtomicI32::new(0),
            running: AtomicBool::new(true),
            brake_at_zero: AtomicBool::new(config.brake_at_zero),
            tick_faults: AtomicU32::new(0),
        }
    }

    /// Drive the control loop until it is cancelled.
    ///
    /// Spawn this on the executor right after construction. A failed tick
    /// is logged and counted, then the loop keeps scheduling; a single bad
    /// tick never disables control.
    pub async fn run(&self) {
        info!("speed loop started, period {} ms", self.period.as_millis());

        let mut ticker = Ticker::every(self.period);
        loop {
            ticker.next().await;
            if !self.running.load(Ordering::Acquire) {
                break;
            }
            if let Err(e) = self.tick(Instant::now()) {
                self.tick_faults.fetch_add(1, Ordering::Relaxed);
                warn!("control tick abandoned: {}", e);
            }
        }

        info!("speed loop stopped");
    }

    /// Run one control step at the given timestamp.
    ///
    /// Normally invoked from [`run`](Self::run); public so the loop can be
    /// driven from an external scheduler. Speed bookkeeping always
    /// happens, even when applying the effort fails afterwards.
    pub fn tick(&self, now: Instant) -> Result<(), MotorError> {
        let position = self.position_counts();

        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();

            let speed = position.wrapping_sub(inner.prev_position);
            inner.prev_position = position;
            self.speed.store(speed, Ordering::Relaxed);

            if let Some(target) = self.target_counts_per_period() {
                let error = target - speed as f32;
                let effort = inner.pid.update(error, now);
                inner.driver.set_effort(effort)?;
            }

            Ok(())
        })
    }

    /// Command a direct effort in [-1.0, 1.0].
    ///
    /// Zero effort brakes or coasts per the zero-effort behavior. While a
    /// speed target is active the loop overrides this on its next tick;
    /// clear the target with `set_speed(None)` first to hold a manual
    /// effort.
    pub fn set_effort(&self, effort: f32) -> Result<(), MotorError> {
        if self.brake_at_zero.load(Ordering::Relaxed) && effort == 0.0 {
            return self.brake();
        }
        self.inner
            .lock(|inner| inner.borrow_mut().driver.set_effort(effort))
    }

    /// Track a target speed in RPM at the output shaft.
    ///
    /// `None` or `0` clears the target and drives effort to zero (brake or
    /// coast per the zero-effort behavior).
    pub fn set_speed(&self, rpm: Option<f32>) -> Result<(), MotorError> {
        match rpm {
            None => self.clear_target(),
            Some(rpm) if rpm == 0.0 => self.clear_target(),
            Some(rpm) => {
                let target = rpm * self.resolution as f32 / self.ticks_per_minute;
                debug!("target speed {} rpm = {} counts/period", rpm, target);
                self.target_bits.store(target.to_bits(), Ordering::Relaxed);
                Ok(())
            }
        }
    }

    fn clear_target(&self) -> Result<(), MotorError> {
        self.target_bits
            .store(f32::NAN.to_bits(), Ordering::Relaxed);
        self.set_effort(0.0)
    }

    /// Current target in counts per control period, if one is set.
    pub fn target_counts_per_period(&self) -> Option<f32> {
        let target = f32::from_bits(self.target_bits.load(Ordering::Relaxed));
        if target.is_nan() {
            None
        } else {
            Some(target)
        }
    }

    /// Most recently measured speed in RPM at the output shaft.
    pub fn speed_rpm(&self) -> f32 {
        self.speed_counts() as f32 * self.ticks_per_minute / self.resolution as f32
    }

    /// Most recently measured speed in encoder counts per control period.
    pub fn speed_counts(&self) -> i32 {
        self.speed.load(Ordering::Relaxed)
    }

    /// Position as a fraction of an output-shaft revolution,
    /// direction-corrected.
    pub fn position(&self) -> f32 {
        self.position_counts() as f32 / self.resolution as f32
    }

    /// Position in encoder counts, direction-corrected.
    pub fn position_counts(&self) -> i32 {
        let counts = self.encoder.position_counts();
        if self.invert {
            counts.wrapping_neg()
        } else {
            counts
        }
    }

    /// Zero the encoder position.
    pub fn reset_position(&self) {
        self.encoder.reset_position();
    }

    /// Choose whether zero effort brakes (true) or coasts (false).
    pub fn set_zero_effort_behavior(&self, brake_at_zero: bool) {
        self.brake_at_zero.store(brake_at_zero, Ordering::Relaxed);
    }

    /// Replace the speed controller configuration, clearing its history.
    pub fn set_speed_controller(&self, config: PidConfig) {
        self.inner
            .lock(|inner| inner.borrow_mut().pid = Pid::new(config));
    }

    /// True once the speed controller has held its tolerance band for the
    /// configured number of consecutive ticks.
    pub fn is_settled(&self) -> bool {
        self.inner.lock(|inner| inner.borrow().pid.is_done())
    }

    /// Cancel the control loop and short the bridge for dynamic braking.
    pub fn brake(&self) -> Result<(), MotorError> {
        self.running.store(false, Ordering::Release);
        self.inner.lock(|inner| inner.borrow_mut().driver.brake())
    }

    /// Cancel the control loop and let the motor free-wheel.
    pub fn coast(&self) -> Result<(), MotorError> {
        self.running.store(false, Ordering::Release);
        self.inner.lock(|inner| inner.borrow_mut().driver.coast())
    }

    /// Clear the speed target and brake, cancelling the control loop.
    pub fn stop(&self) -> Result<(), MotorError> {
        self.set_speed(None)?;
        self.brake()
    }

    /// Whether the control loop is still scheduled.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Number of ticks abandoned due to a driver error.
    pub fn tick_faults(&self) -> u32 {
        self.tick_faults.load(Ordering::Relaxed)
    }
}
