//! Monotonic deadlines for bounded polling loops.

use std::time::Instant;

use embedded_hal::blocking::delay::DelayMs;

/// Monotonic millisecond time source
///
/// Clocks are cloned into each [`Timeout`], so implementations should be
/// cheap handles onto a shared time base.
pub trait Clock: Clone {
    /// Milliseconds elapsed since an arbitrary fixed origin
    fn now_ms(&self) -> u64;
}

/// Wall clock backed by [`std::time::Instant`]
#[derive(Copy, Clone, Debug)]
pub struct StdClock {
    origin: Instant,
}

impl StdClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for StdClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for StdClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

impl DelayMs<u32> for StdClock {
    fn delay_ms(&mut self, ms: u32) {
        std::thread::sleep(std::time::Duration::from_millis(ms as u64));
    }
}

/// Deadline captured at construction
#[derive(Clone, Debug)]
pub struct Timeout<C: Clock> {
    clock: C,
    deadline: u64,
}

impl<C: Clock> Timeout<C> {
    /// Create a timeout expiring `duration_ms` from now
    pub fn new(clock: C, duration_ms: u32) -> Self {
        let deadline = clock.now_ms() + duration_ms as u64;
        Self { clock, deadline }
    }

    /// True once the deadline has been reached
    pub fn expired(&self) -> bool {
        self.clock.now_ms() >= self.deadline
    }
}
