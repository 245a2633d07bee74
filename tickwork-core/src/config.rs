//! Compile-time clock configuration.
//!
//! `F_CPU` and `PRESCALE` are ingested from the environment by the build
//! script (`AVR_CPU_FREQUENCY_HZ`, `AVR_TIMER_PRESCALE`); everything else
//! is derived from them. Illegal combinations fail the build.

use crate::hal::Prescale;

include!(concat!(env!("OUT_DIR"), "/constants.rs"));

/// Tick-counter rate in Hz.
pub const TICKS_PER_SEC: u32 = F_CPU / PRESCALE;

/// Whole ticks per millisecond (the fractional remainder is carried by
/// [`MSEC_INTERVAL_Q16`]).
pub const TICKS_PER_MSEC: u32 = TICKS_PER_SEC / 1000;

/// Exact tick interval between millisecond compare points, as 16.16
/// fixed point. Accumulating this keeps the millisecond counter free of
/// long-run drift even when `F_CPU` is not a multiple of `PRESCALE * 1000`.
pub const MSEC_INTERVAL_Q16: u32 = ((F_CPU as u64 * 65536) / (PRESCALE as u64 * 1000)) as u32;

/// Minimum headroom, in ticks, the compare-A handler needs between "now"
/// and the compare value it programs. Covers the worst-case instruction
/// count of the re-arm path at any prescale.
pub const MINIMUM_TICK_DELAY: u16 = ((32 + PRESCALE - 1) / PRESCALE + 1) as u16;

/// Deadlines this close (in ticks) are treated as already due; promoting
/// them beats programming a compare that may be missed.
pub const TASK_WAIT_TICK_THRESHOLD: u32 = 4;

// The millisecond logic assumes the next compare point is always less
// than half a timer period ahead of the live counter.
const _: () = assert!(
    TICKS_PER_MSEC < 1 << 15,
    "F_CPU / PRESCALE too fast: a millisecond must span fewer than 2^15 ticks"
);
const _: () = assert!(TICKS_PER_MSEC > 0, "F_CPU / PRESCALE too slow to resolve a millisecond");
const _: () = assert!(
    PRESCALE == 1 || PRESCALE == 8 || PRESCALE == 64,
    "PRESCALE must be a Timer1 divisor of 1, 8 or 64"
);

/// The configured prescale as the HAL's enum.
pub const fn prescale() -> Prescale {
    match PRESCALE {
        1 => Prescale::Div1,
        8 => Prescale::Div8,
        _ => Prescale::Div64,
    }
}
