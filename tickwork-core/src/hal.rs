//! Hardware shim for the shared 16-bit timer.
//!
//! The clock and the scheduler both sit on one free-running 16-bit
//! up-counter with two compare units (Timer/Counter1 on the ATmega328P).
//! Everything they need from it is collected in [`TimerHal`]; the board
//! crate implements it over the real registers, and [`sim::SimTimer`]
//! implements it for host-side tests.
//!
//! Global interrupt masking is *not* part of the shim: that is the
//! `critical-section` implementation's job.

/// Timer prescale divisor (the three divisors the clock supports).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prescale {
    /// Count at the CPU clock.
    Div1 = 1,
    /// Divide by 8.
    Div8 = 8,
    /// Divide by 64.
    Div64 = 64,
}

/// Access to the timer hardware the clock is built on.
///
/// Every method except [`idle_sleep`](TimerHal::idle_sleep) is called
/// with global interrupts masked; implementations may rely on that (the
/// 16-bit counter and compare registers are accessed through an 8-bit
/// temp latch on AVR and must not be interleaved with ISR access).
pub trait TimerHal {
    /// One-time start: reset the counter to zero, program compare-A with
    /// `first_compare_a`, enable the prescaler, and unmask the overflow
    /// and compare-A interrupts.
    fn start(&self, prescale: Prescale, first_compare_a: u16);

    /// Live counter value.
    fn count(&self) -> u16;

    /// Program the compare-A register (the millisecond compare point).
    fn set_compare_a(&self, at: u16);

    /// Program the compare-B register (the one-shot wake point).
    fn set_compare_b(&self, at: u16);

    /// Is the overflow interrupt flag raised but not yet serviced?
    fn overflow_pending(&self) -> bool;

    /// Clear any stale compare-B pending flag, then unmask its interrupt.
    fn compare_b_enable(&self);

    /// Mask the compare-B interrupt.
    fn compare_b_disable(&self);

    /// Halt the CPU in idle mode (timer keeps counting) until an
    /// interrupt fires.
    ///
    /// Precondition: global interrupts are masked. The implementation
    /// must re-enable them and halt in a single step, so that no wake
    /// event can slip in between; it returns after wake with interrupts
    /// enabled.
    fn idle_sleep(&self);
}

#[cfg(any(test, feature = "sim"))]
pub mod sim;
