//! Busy-wait delays timed by the tick clock.

use embedded_hal::delay::DelayNs;

use tickwork_core::config::TICKS_PER_SEC;

use crate::CLOCK;

/// Blocking delay provider backed by the 32-bit tick clock, for driver
/// code that wants an `embedded-hal` delay.
///
/// Spins with interrupts enabled, so the clock keeps running and tasks
/// queued from interrupt handlers still land; it just burns the CPU the
/// scheduler would otherwise put to sleep.
pub struct Delay;

impl DelayNs for Delay {
    fn delay_ns(&mut self, ns: u32) {
        // Round up so short requests still wait at least one tick.
        let ticks = ((ns as u64 * TICKS_PER_SEC as u64 + 999_999_999) / 1_000_000_000) as u32;
        let start = CLOCK.read_ticks();
        while CLOCK.read_ticks().wrapping_sub(start) < ticks {}
    }
}
