//! Busy-wait delays.
//!
//! No timer is programmed this early in boot, so every wait in the
//! bring-up path is a calibrated spin.  Code that needs to wait takes a
//! `&impl Delay` so host tests can substitute a recording clock.

use crate::cpu;

pub trait Delay {
    fn delay_us(&self, us: u64);

    fn delay_ms(&self, ms: u64) {
        self.delay_us(ms.saturating_mul(1000));
    }
}

/// Spin-loop iterations per microsecond, roughly calibrated for QEMU/TCG.
pub const DEFAULT_LOOPS_PER_US: u64 = 100;

/// Delay implemented as a fixed number of pause iterations per microsecond.
#[derive(Clone, Copy, Debug)]
pub struct SpinDelay {
    loops_per_us: u64,
}

impl SpinDelay {
    pub const fn new(loops_per_us: u64) -> Self {
        Self { loops_per_us }
    }
}

impl Default for SpinDelay {
    fn default() -> Self {
        Self::new(DEFAULT_LOOPS_PER_US)
    }
}

impl Delay for SpinDelay {
    fn delay_us(&self, us: u64) {
        let loops = us.saturating_mul(self.loops_per_us);
        for _ in 0..loops {
            cpu::pause();
        }
    }
}
