//! Two-resolution monotonic clock over the shared 16-bit timer.
//!
//! Two counts run side by side. The *tick count* is the hardware counter
//! extended to 32 bits: the low word is the live counter, the high word
//! counts overflows in software. The *millisecond count* is derived by
//! programming compare-A one millisecond ahead of itself, accumulating
//! the exact (16.16 fixed-point) tick interval so it carries no long-run
//! drift even when the tick rate is not a whole multiple of 1 kHz.
//!
//! The tick timer overflows every 2^16 ticks (32.768 ms at 16 MHz / 8);
//! interrupts must never stay masked for longer than that, or both
//! counts fall behind. The 32-bit tick count wraps after about 35
//! minutes at that rate and the millisecond count after 49.7 days; all
//! comparisons against either are made on signed differences.

use core::cell::Cell;

use critical_section::{CriticalSection, Mutex};
use portable_atomic::{AtomicU8, Ordering};

use crate::config::{self, MINIMUM_TICK_DELAY, MSEC_INTERVAL_Q16};
use crate::error::{self, Error};
use crate::hal::TimerHal;

/// 32-bit extended tick count. Wraps modulo 2^32.
pub type TickCount = u32;

/// 32-bit millisecond count. Wraps modulo 2^32.
pub type MsecCount = u32;

/// Counter samples at or below this are trusted to postdate a pending
/// overflow; above it, the flag may belong to a wrap the sample predates.
/// The slack is far wider than any legal interrupt-masked region.
const OVERFLOW_SLACK: u16 = 0xFF00;

/// The two-resolution clock. One instance per system, over the one
/// hardware timer.
pub struct Clock<T: TimerHal> {
    hw: T,
    /// High word of the 32-bit tick count.
    overflow_count: Mutex<Cell<u16>>,
    /// Next millisecond compare point, 16.16 fixed; the integer part is
    /// what compare-A gets programmed with.
    next_msec_q16: Mutex<Cell<u32>>,
    msec_count: Mutex<Cell<u32>>,
    /// Armed one-shot wake target, if any.
    wake_flag: Mutex<Cell<Option<&'static AtomicU8>>>,
}

impl<T: TimerHal> Clock<T> {
    /// A clock at zero. Call [`init`](Clock::init) once before use.
    pub const fn new(hw: T) -> Self {
        Self {
            hw,
            overflow_count: Mutex::new(Cell::new(0)),
            next_msec_q16: Mutex::new(Cell::new(MSEC_INTERVAL_Q16)),
            msec_count: Mutex::new(Cell::new(0)),
            wake_flag: Mutex::new(Cell::new(None)),
        }
    }

    /// One-time hardware setup: zero the counter, program the first
    /// millisecond compare point, start the prescaler and unmask the
    /// overflow and compare-A interrupts. The caller enables global
    /// interrupts afterwards.
    pub fn init(&self) {
        critical_section::with(|cs| {
            let first = (self.next_msec_q16.borrow(cs).get() >> 16) as u16;
            self.hw.start(config::prescale(), first);
        });
    }

    pub(crate) fn hw(&self) -> &T {
        &self.hw
    }

    /// Read the 32-bit tick count; interrupts are already masked.
    ///
    /// The hardware low word and the software high word can disagree
    /// when the counter wraps between the two samples. After sampling
    /// the counter, a pending overflow flag means a wrap happened at or
    /// before the sample, so the high word needs one more. The
    /// exception is a sample already near the top of the range: there
    /// the flag belongs to the *coming* wrap and the high word is
    /// already right for the sample.
    pub fn read_ticks_cs(&self, cs: CriticalSection) -> TickCount {
        let live = self.hw.count();
        let overflow_pending = self.hw.overflow_pending();
        let mut high = self.overflow_count.borrow(cs).get();
        if overflow_pending && live <= OVERFLOW_SLACK {
            high = high.wrapping_add(1);
        }
        (high as u32) << 16 | live as u32
    }

    /// Read the 32-bit tick count from an unknown interrupt state.
    pub fn read_ticks(&self) -> TickCount {
        critical_section::with(|cs| self.read_ticks_cs(cs))
    }

    /// Snapshot of the raw 16-bit counter, for wake scheduling within
    /// one timer period. Masked because the 16-bit register is read
    /// through a byte-wide temp latch.
    pub fn read_ticks16(&self) -> u16 {
        critical_section::with(|_| self.hw.count())
    }

    /// Reconstruct the full 32-bit tick count for a low word sampled
    /// less than half a timer period ago.
    pub fn combine_ticks_cs(&self, cs: CriticalSection, low_word: u16) -> TickCount {
        let mut high = self.overflow_count.borrow(cs).get();
        // Top bit gone since the sample: the counter wrapped in between.
        // If the overflow interrupt is still pending the high word has
        // not advanced past the sample's epoch yet; otherwise it has,
        // and needs backing out.
        if low_word & 0x8000 != 0 && self.hw.count() & 0x8000 == 0 {
            if !self.hw.overflow_pending() {
                high = high.wrapping_sub(1);
            }
        }
        (high as u32) << 16 | low_word as u32
    }

    /// Read the millisecond count; interrupts are already masked.
    pub fn read_msec_cs(&self, cs: CriticalSection) -> MsecCount {
        self.msec_count.borrow(cs).get()
    }

    /// Read the millisecond count from an unknown interrupt state.
    pub fn read_msec(&self) -> MsecCount {
        critical_section::with(|cs| self.read_msec_cs(cs))
    }

    /// Arm the one-shot wake: at hardware-counter value `wake_at`, store
    /// 1 through `flag` and disarm.
    ///
    /// The deadline can only be up to one timer period ahead, by the
    /// nature of the 16-bit compare. Re-arming with `None` before the
    /// deadline cancels the store.
    pub fn set_wake_time(&self, wake_at: u16, flag: Option<&'static AtomicU8>) {
        critical_section::with(|cs| {
            self.wake_flag.borrow(cs).set(flag);
            self.hw.set_compare_b(wake_at);
            self.hw.compare_b_enable();
        });
    }

    /// Timer overflow ISR body: one more high-word count.
    pub fn on_overflow(&self, cs: CriticalSection) {
        let count = self.overflow_count.borrow(cs);
        count.set(count.get().wrapping_add(1));
    }

    /// Compare-A ISR body: advance the millisecond count and re-arm.
    ///
    /// Looped, in case interrupts were masked for more than a
    /// millisecond (which should never happen): each pass whose new
    /// compare point is already too close to the live counter is
    /// reported and absorbed, until the compare can be programmed with
    /// enough headroom to actually fire.
    pub fn on_compare_a(&self, cs: CriticalSection) {
        let msec = self.msec_count.borrow(cs);
        let next = self.next_msec_q16.borrow(cs);
        loop {
            msec.set(msec.get().wrapping_add(1));
            next.set(next.get().wrapping_add(MSEC_INTERVAL_Q16));
            let wake_at = (next.get() >> 16) as u16;
            if wake_at.wrapping_sub(self.hw.count()) as i16 > MINIMUM_TICK_DELAY as i16 {
                self.hw.set_compare_a(wake_at);
                break;
            }
            error::report(cs, Error::ClockMsecLate);
        }
    }

    /// Compare-B ISR body: the one-shot wake. Disarms itself, then
    /// stores through the flag if one is still registered.
    pub fn on_compare_b(&self, cs: CriticalSection) {
        self.hw.compare_b_disable();
        if let Some(flag) = self.wake_flag.borrow(cs).take() {
            flag.store(1, Ordering::Relaxed);
        }
    }

    #[cfg(test)]
    pub(crate) fn force_msec(&self, value: u32) {
        critical_section::with(|cs| self.msec_count.borrow(cs).set(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TICKS_PER_MSEC;
    use crate::hal::sim::SimTimer;
    use crate::testutil::{leak, msec_late_count, Rig};
    use portable_atomic::{AtomicU8, Ordering};

    #[test]
    fn starts_at_zero() {
        let rig = Rig::new();
        assert!(rig.hw.is_running());
        assert_eq!(rig.clock.read_ticks(), 0);
        assert_eq!(rig.clock.read_msec(), 0);
        assert_eq!(rig.hw.compare_a(), TICKS_PER_MSEC as u16);
    }

    #[test]
    fn ticks_follow_the_counter() {
        let rig = Rig::new();
        rig.advance_ticks(1234);
        assert_eq!(rig.clock.read_ticks(), 1234);
        assert_eq!(rig.clock.read_ticks16(), 1234);
    }

    #[test]
    fn ticks_extend_across_overflows() {
        let rig = Rig::new();
        rig.advance_ticks(0x2_0000 + 77);
        assert_eq!(rig.clock.read_ticks(), 0x2_0000 + 77);
        assert_eq!(rig.clock.read_ticks16(), 77);
    }

    #[test]
    fn ticks_are_monotonic() {
        let rig = Rig::new();
        let mut last = rig.clock.read_ticks();
        for i in 0..500u32 {
            // Uneven steps, straddling overflow boundaries regularly.
            rig.advance_ticks(i * 7919 % 5000 + 1);
            let now = rig.clock.read_ticks();
            assert!(now >= last, "ticks went backwards: {} -> {}", last, now);
            last = now;
        }
    }

    #[test]
    fn pending_overflow_bumps_high_word_for_low_samples() {
        // A wrap just before the read, ISR not yet run: flag pending,
        // counter small again. The reader owes the high word one.
        let rig = Rig::new();
        rig.advance_ticks(0xFFFF);
        rig.hw.set_count(5);
        rig.hw.set_overflow_flag(true);
        assert_eq!(rig.clock.read_ticks(), 0x1_0000 + 5);
    }

    #[test]
    fn pending_overflow_near_top_is_the_coming_wrap() {
        // Counter near the top with the flag up: the flag belongs to the
        // wrap that has not been counted as passed yet.
        let rig = Rig::new();
        rig.hw.set_count(OVERFLOW_SLACK + 1);
        rig.hw.set_overflow_flag(true);
        assert_eq!(rig.clock.read_ticks(), (OVERFLOW_SLACK + 1) as u32);
        // At the slack boundary itself the bump applies.
        rig.hw.set_count(OVERFLOW_SLACK);
        assert_eq!(rig.clock.read_ticks(), 0x1_0000 + OVERFLOW_SLACK as u32);
    }

    #[test]
    fn overflow_injected_between_samples_is_harmless() {
        // The counter wraps after the sample but before the flag read;
        // the reading must stay in the sample's epoch, not jump 65536.
        fn wrap_now(hw: &SimTimer) {
            hw.set_count(3);
            hw.set_overflow_flag(true);
        }
        let rig = Rig::new();
        rig.advance_ticks(0xFFF0);
        rig.hw.arm_read_hook(wrap_now);
        assert_eq!(rig.clock.read_ticks(), 0xFFF0);
        // Once the overflow is serviced, time has moved on normally.
        rig.service();
        assert_eq!(rig.clock.read_ticks(), 0x1_0000 + 3);
    }

    #[test]
    fn combine_ticks_same_epoch() {
        let rig = Rig::new();
        rig.advance_ticks(0x1_2345);
        let lo = rig.clock.read_ticks16();
        rig.advance_ticks(100);
        let combined = critical_section::with(|cs| rig.clock.combine_ticks_cs(cs, lo));
        assert_eq!(combined, 0x1_2345);
    }

    #[test]
    fn combine_ticks_after_serviced_wrap() {
        // Sample in the top half, wrap serviced since: the live high
        // word is one past the sample's epoch and gets backed out.
        let rig = Rig::new();
        rig.advance_ticks(0x8005);
        let lo = rig.clock.read_ticks16();
        rig.advance_ticks(0x8000);
        assert_eq!(rig.clock.read_ticks() >> 16, 1);
        let combined = critical_section::with(|cs| rig.clock.combine_ticks_cs(cs, lo));
        assert_eq!(combined, 0x8005);
    }

    #[test]
    fn combine_ticks_with_wrap_still_pending() {
        // Same wrap, but the overflow ISR has not run: the high word
        // still matches the sample's epoch.
        let rig = Rig::new();
        rig.advance_ticks(0x8005);
        let lo = rig.clock.read_ticks16();
        rig.hw.set_count(10);
        rig.hw.set_overflow_flag(true);
        let combined = critical_section::with(|cs| rig.clock.combine_ticks_cs(cs, lo));
        assert_eq!(combined, 0x8005);
    }

    #[test]
    fn msec_advances_and_rearms() {
        let rig = Rig::new();
        rig.advance_msec(5);
        assert_eq!(rig.clock.read_msec(), 5);
        assert_eq!(rig.hw.compare_a(), (6 * TICKS_PER_MSEC) as u16);
    }

    #[test]
    fn msec_survives_counter_overflow() {
        let rig = Rig::new();
        // 40 ms crosses the 32.768 ms overflow at 16 MHz / 8.
        rig.advance_msec(40);
        assert_eq!(rig.clock.read_msec(), 40);
        assert_eq!(rig.clock.read_ticks(), 40 * TICKS_PER_MSEC);
    }

    #[test]
    fn msec_drift_stays_within_one() {
        let rig = Rig::new();
        let n = 1_000_000u32;
        rig.advance_msec(n);
        let diff = rig.clock.read_msec() as i64 - n as i64;
        assert!(diff.abs() <= 1, "drifted {} ms over {} ms", diff, n);
    }

    #[test]
    #[ignore = "long sweep; run on demand"]
    fn msec_drift_stays_within_one_long() {
        let rig = Rig::new();
        let n = 100_000_000u32;
        rig.advance_msec(n);
        let diff = rig.clock.read_msec() as i64 - n as i64;
        assert!(diff.abs() <= 1, "drifted {} ms over {} ms", diff, n);
    }

    #[test]
    fn delayed_compare_a_catches_up_exactly() {
        // Hold the handler off for five compare points, then let it run:
        // one entry must produce all five increments, report every
        // overdue lap, and re-arm with real headroom.
        let rig = Rig::new();
        let late_before = msec_late_count();
        rig.mask_interrupts();
        rig.advance_ticks(5 * TICKS_PER_MSEC + 10);
        assert_eq!(rig.clock.read_msec(), 0);
        rig.unmask_interrupts();
        assert_eq!(rig.clock.read_msec(), 5);
        assert_eq!(msec_late_count() - late_before, 4);
        assert_eq!(rig.hw.compare_a(), (6 * TICKS_PER_MSEC) as u16);
        // And the clock keeps time afterwards.
        rig.advance_msec(3);
        assert_eq!(rig.clock.read_msec(), 8);
    }

    #[test]
    fn wake_fires_once() {
        let rig = Rig::new();
        let flag = leak(AtomicU8::new(0));
        rig.clock.set_wake_time(1000, Some(flag));
        rig.advance_ticks(999);
        assert_eq!(flag.load(Ordering::Relaxed), 0);
        rig.advance_ticks(1);
        assert_eq!(flag.load(Ordering::Relaxed), 1);
        assert!(!rig.hw.compare_b_unmasked());
        // A full extra period passes the compare value again; the
        // one-shot stays dead.
        flag.store(0, Ordering::Relaxed);
        rig.advance_ticks(0x1_0000);
        assert_eq!(flag.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn wake_cancelled_by_rearming_with_none() {
        let rig = Rig::new();
        let flag = leak(AtomicU8::new(0));
        rig.clock.set_wake_time(1000, Some(flag));
        rig.clock.set_wake_time(1000, None);
        rig.advance_ticks(2000);
        assert_eq!(flag.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn wake_rearm_replaces_target() {
        let rig = Rig::new();
        let first = leak(AtomicU8::new(0));
        let second = leak(AtomicU8::new(0));
        rig.clock.set_wake_time(500, Some(first));
        rig.clock.set_wake_time(800, Some(second));
        rig.advance_ticks(600);
        assert_eq!(first.load(Ordering::Relaxed), 0);
        assert_eq!(second.load(Ordering::Relaxed), 0);
        rig.advance_ticks(300);
        assert_eq!(first.load(Ordering::Relaxed), 0);
        assert_eq!(second.load(Ordering::Relaxed), 1);
    }
}
