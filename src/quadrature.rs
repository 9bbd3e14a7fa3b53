//! Quadrature decoding for incremental encoders.
//!
//! [`QuadratureDecoder`] is a portable transition-table decoder. It owns a
//! signed position counter in atomics, so one instance can live in a
//! `static` and be fed from wherever the pins are actually sampled: a
//! pin-change interrupt, a hardware decode peripheral's drain routine, or a
//! dedicated high-priority task polling the pins well above the encoder's
//! edge rate.
//!
//! Decoding is per-edge: the pin pair forms a 2-bit state, and each
//! (previous, current) state pair maps to a count delta through a 16-entry
//! table. A full mechanical quadrature cycle is 4 valid transitions and
//! moves the counter by exactly 4.

use portable_atomic::{AtomicI32, AtomicU8, Ordering};

/// Count delta per decode step, indexed by `(prev_state << 2) | state`
/// where a state is `(A << 1) | B`.
///
/// The 4 same-state entries and the 4 double-bit-change entries are zero:
/// repeats do nothing and physically impossible jumps (both pins flipping
/// within one sample) are absorbed as no-ops for noise immunity.
const TRANSITION_TABLE: [i32; 16] = [
    0, // 00 -> 00  no change
    -1, // 00 -> 01  reverse
    1, // 00 -> 10  forward
    0, // 00 -> 11  impossible
    1, // 01 -> 00  forward
    0, // 01 -> 01  no change
    0, // 01 -> 10  impossible
    -1, // 01 -> 11  reverse
    -1, // 10 -> 00  reverse
    0, // 10 -> 01  impossible
    0, // 10 -> 10  no change
    1, // 10 -> 11  forward
    0, // 11 -> 00  impossible
    1, // 11 -> 01  forward
    -1, // 11 -> 10  reverse
    0, // 11 -> 11  no change
];

/// Source of a signed encoder count, as consumed by the control loop.
///
/// Implementations backed by a buffered decode unit (a FIFO between the
/// counting hardware and the reader) must drain stale entries inside
/// [`position_counts`](Self::position_counts) so the returned value is the
/// most recently flushed count, not one from a prior cycle.
pub trait QuadratureSource {
    /// Current position in encoder counts. Wraps modulo 2^32, reinterpreted
    /// as signed.
    fn position_counts(&self) -> i32;

    /// Zero the position counter without disturbing decode state.
    fn reset_position(&self);
}

impl<T: QuadratureSource> QuadratureSource for &T {
    fn position_counts(&self) -> i32 {
        (**self).position_counts()
    }

    fn reset_position(&self) {
        (**self).reset_position();
    }
}

/// Software quadrature decoder with an atomic position counter.
///
/// Concurrency contract: [`sample`](Self::sample) is called from exactly
/// one context (the sampler); any number of other contexts may read or
/// reset the position concurrently.
pub struct QuadratureDecoder {
    position: AtomicI32,
    prev_state: AtomicU8,
    resolution: u32,
}

impl QuadratureDecoder {
    /// Create a decoder.
    ///
    /// # Arguments
    /// * `resolution` - Encoder counts per output-shaft revolution, i.e.
    ///   counts per motor revolution times the gear ratio
    pub const fn new(resolution: u32) -> Self {
        Self {
            position: AtomicI32::new(0),
            prev_state: AtomicU8::new(0),
            resolution,
        }
    }

    /// Encoder counts per output-shaft revolution.
    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    /// Feed one sample of the pin pair into the decoder.
    ///
    /// Must be called often enough that at most one pin changes between
    /// consecutive samples; a double change decodes as an impossible
    /// transition and is dropped.
    pub fn sample(&self, a: bool, b: bool) {
        let state = ((a as u8) << 1) | (b as u8);
        let prev = self.prev_state.swap(state, Ordering::Relaxed);

        let delta = TRANSITION_TABLE[((prev << 2) | state) as usize];
        if delta != 0 {
            // Wrapping add: the counter lives on the full i32 ring.
            self.position.fetch_add(delta, Ordering::Relaxed);
        }
    }

    /// Position as a fraction of an output-shaft revolution.
    pub fn position(&self) -> f32 {
        self.position_counts() as f32 / self.resolution as f32
    }
}

impl QuadratureSource for QuadratureDecoder {
    fn position_counts(&self) -> i32 {
        self.position.load(Ordering::Relaxed)
    }

    fn reset_position(&self) {
        self.position.store(0, Ordering::Relaxed);
    }
}
