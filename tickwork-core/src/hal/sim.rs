//! Simulated timer for host-side testing.
//!
//! [`SimTimer`] models the slice of Timer/Counter1 the clock uses: the
//! free-running counter, both compare units with latched pending flags,
//! the overflow flag, and the compare-B interrupt mask. Flags latch on
//! the cycle the counter reaches the event, whether or not anybody is
//! listening, which is what the race tests depend on.
//!
//! Time does not pass on its own; a test (or the test harness) calls
//! [`advance`](SimTimer::advance) and then services whatever latched.

use core::cell::Cell;

use critical_section::Mutex;
use portable_atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};

use super::{Prescale, TimerHal};

/// Host-side stand-in for the 16-bit timer.
pub struct SimTimer {
    count: AtomicU16,
    compare_a: AtomicU16,
    compare_b: AtomicU16,
    overflow_flag: AtomicBool,
    compare_a_flag: AtomicBool,
    compare_b_flag: AtomicBool,
    compare_b_unmasked: AtomicBool,
    running: AtomicBool,
    sleeps: AtomicU32,
    /// One-shot hook run right after `count()` samples the counter, for
    /// injecting a wrap between the counter read and the flag read.
    read_hook: Mutex<Cell<Option<fn(&SimTimer)>>>,
}

impl SimTimer {
    /// A stopped timer with all registers zero.
    pub const fn new() -> Self {
        Self {
            count: AtomicU16::new(0),
            compare_a: AtomicU16::new(0),
            compare_b: AtomicU16::new(0),
            overflow_flag: AtomicBool::new(false),
            compare_a_flag: AtomicBool::new(false),
            compare_b_flag: AtomicBool::new(false),
            compare_b_unmasked: AtomicBool::new(false),
            running: AtomicBool::new(false),
            sleeps: AtomicU32::new(0),
            read_hook: Mutex::new(Cell::new(None)),
        }
    }

    /// Ticks until the next flag-latching event (compare-A, compare-B or
    /// overflow), in `1..=65536`.
    pub fn ticks_to_next_event(&self) -> u32 {
        let count = self.count.load(Ordering::Relaxed);
        let until_overflow = 0x1_0000 - count as u32;
        let d_a = Self::distance(count, self.compare_a.load(Ordering::Relaxed));
        let d_b = Self::distance(count, self.compare_b.load(Ordering::Relaxed));
        until_overflow.min(d_a).min(d_b)
    }

    /// Advance the counter by at most one event distance, latching the
    /// flags of events landed on exactly.
    ///
    /// Callers stepping further than [`ticks_to_next_event`] would skip
    /// over events; the harness never does.
    pub fn advance(&self, ticks: u32) {
        debug_assert!(ticks >= 1 && ticks <= self.ticks_to_next_event());
        let count = self
            .count
            .load(Ordering::Relaxed)
            .wrapping_add(ticks as u16);
        self.count.store(count, Ordering::Relaxed);
        if count == 0 {
            self.overflow_flag.store(true, Ordering::Relaxed);
        }
        if count == self.compare_a.load(Ordering::Relaxed) {
            self.compare_a_flag.store(true, Ordering::Relaxed);
        }
        if count == self.compare_b.load(Ordering::Relaxed) {
            self.compare_b_flag.store(true, Ordering::Relaxed);
        }
    }

    fn distance(from: u16, to: u16) -> u32 {
        match to.wrapping_sub(from) {
            0 => 0x1_0000,
            d => d as u32,
        }
    }

    /// Has `start` run?
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Current compare-A register value.
    pub fn compare_a(&self) -> u16 {
        self.compare_a.load(Ordering::Relaxed)
    }

    /// Is the compare-B interrupt unmasked?
    pub fn compare_b_unmasked(&self) -> bool {
        self.compare_b_unmasked.load(Ordering::Relaxed)
    }

    /// Number of `idle_sleep` calls so far.
    pub fn sleep_count(&self) -> u32 {
        self.sleeps.load(Ordering::Relaxed)
    }

    /// Force the counter to a value without firing events.
    pub fn set_count(&self, value: u16) {
        self.count.store(value, Ordering::Relaxed);
    }

    /// Force the overflow pending flag.
    pub fn set_overflow_flag(&self, pending: bool) {
        self.overflow_flag.store(pending, Ordering::Relaxed);
    }

    /// Consume the latched compare-A flag, as ISR entry does.
    pub fn take_compare_a_flag(&self) -> bool {
        self.compare_a_flag.swap(false, Ordering::Relaxed)
    }

    /// Consume the latched compare-B flag if its interrupt is unmasked.
    pub fn take_compare_b_flag(&self) -> bool {
        self.compare_b_unmasked.load(Ordering::Relaxed)
            && self.compare_b_flag.swap(false, Ordering::Relaxed)
    }

    /// Consume the latched overflow flag, as ISR entry does.
    pub fn take_overflow_flag(&self) -> bool {
        self.overflow_flag.swap(false, Ordering::Relaxed)
    }

    /// Arm a hook that runs once, right after the next counter sample.
    pub fn arm_read_hook(&self, hook: fn(&SimTimer)) {
        critical_section::with(|cs| self.read_hook.borrow(cs).set(Some(hook)));
    }
}

impl Default for SimTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerHal for &SimTimer {
    fn start(&self, _prescale: Prescale, first_compare_a: u16) {
        self.count.store(0, Ordering::Relaxed);
        self.compare_a.store(first_compare_a, Ordering::Relaxed);
        self.running.store(true, Ordering::Relaxed);
    }

    fn count(&self) -> u16 {
        let sampled = self.count.load(Ordering::Relaxed);
        let hook = critical_section::with(|cs| self.read_hook.borrow(cs).take());
        if let Some(hook) = hook {
            hook(self);
        }
        sampled
    }

    fn set_compare_a(&self, at: u16) {
        self.compare_a.store(at, Ordering::Relaxed);
    }

    fn set_compare_b(&self, at: u16) {
        self.compare_b.store(at, Ordering::Relaxed);
    }

    fn overflow_pending(&self) -> bool {
        self.overflow_flag.load(Ordering::Relaxed)
    }

    fn compare_b_enable(&self) {
        self.compare_b_flag.store(false, Ordering::Relaxed);
        self.compare_b_unmasked.store(true, Ordering::Relaxed);
    }

    fn compare_b_disable(&self) {
        self.compare_b_unmasked.store(false, Ordering::Relaxed);
    }

    fn idle_sleep(&self) {
        // The harness plays the part of the wake interrupt; just record
        // that the CPU would have halted here.
        self.sleeps.fetch_add(1, Ordering::Relaxed);
    }
}
