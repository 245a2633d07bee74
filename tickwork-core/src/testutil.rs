//! Shared test harness: a leaked clock/scheduler pair over the
//! simulated timer, with event-ordered time stepping.
//!
//! Everything is leaked to `'static` because that is the lifetime the
//! real system has: tasks, clock and scheduler all live forever.

use std::boxed::Box;
use std::vec::Vec;

use portable_atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use crate::clock::Clock;
use crate::config::TICKS_PER_MSEC;
use crate::error::{self, Error};
use crate::hal::sim::SimTimer;
use crate::sched::Scheduler;

/// The clock as instantiated in tests.
pub type SimClock = Clock<&'static SimTimer>;
/// The scheduler as instantiated in tests.
pub type SimScheduler = Scheduler<&'static SimTimer>;

/// Promote a value to `'static`.
pub fn leak<T>(value: T) -> &'static T {
    Box::leak(Box::new(value))
}

static MSEC_LATE: AtomicU32 = AtomicU32::new(0);
static TIMESTAMP_WRAP: AtomicU32 = AtomicU32::new(0);

fn record(error: Error) {
    match error {
        Error::ClockMsecLate => &MSEC_LATE,
        Error::SchedTimestampWrap => &TIMESTAMP_WRAP,
    }
    .fetch_add(1, Ordering::Relaxed);
}

/// Total `ClockMsecLate` reports, across all rigs in the process.
pub fn msec_late_count() -> u32 {
    MSEC_LATE.load(Ordering::Relaxed)
}

/// Total `SchedTimestampWrap` reports, across all rigs in the process.
pub fn timestamp_wrap_count() -> u32 {
    TIMESTAMP_WRAP.load(Ordering::Relaxed)
}

/// One simulated system: timer, clock, scheduler, and an interrupt mask
/// standing in for the CPU's I-bit.
pub struct Rig {
    pub hw: &'static SimTimer,
    pub clock: &'static SimClock,
    pub sched: &'static SimScheduler,
    irq_masked: AtomicBool,
}

impl Rig {
    /// A freshly initialized system at tick zero.
    pub fn new() -> Self {
        error::attach_error_handler(record);
        let hw = leak(SimTimer::new());
        let clock: &'static SimClock = leak(Clock::new(hw));
        clock.init();
        let sched = leak(Scheduler::new(clock));
        Rig {
            hw,
            clock,
            sched,
            irq_masked: AtomicBool::new(false),
        }
    }

    /// Hold off interrupt servicing; events latch their flags and wait.
    pub fn mask_interrupts(&self) {
        self.irq_masked.store(true, Ordering::Relaxed);
    }

    /// Allow servicing again and run whatever latched while masked.
    pub fn unmask_interrupts(&self) {
        self.irq_masked.store(false, Ordering::Relaxed);
        self.service();
    }

    /// Advance simulated time, stopping at every flag-latching event so
    /// handlers run at the same points they would on hardware.
    pub fn advance_ticks(&self, ticks: u32) {
        let mut remaining = ticks;
        while remaining > 0 {
            let step = self.hw.ticks_to_next_event().min(remaining);
            self.hw.advance(step);
            remaining -= step;
            self.service();
        }
    }

    /// Advance whole milliseconds of simulated time.
    pub fn advance_msec(&self, ms: u32) {
        for _ in 0..ms {
            self.advance_ticks(TICKS_PER_MSEC);
        }
    }

    /// Run pending interrupt handlers in vector priority order
    /// (compare-A, compare-B, overflow), unless masked.
    pub fn service(&self) {
        if self.irq_masked.load(Ordering::Relaxed) || !self.hw.is_running() {
            return;
        }
        if self.hw.take_compare_a_flag() {
            critical_section::with(|cs| self.clock.on_compare_a(cs));
        }
        if self.hw.take_compare_b_flag() {
            critical_section::with(|cs| self.clock.on_compare_b(cs));
        }
        if self.hw.take_overflow_flag() {
            critical_section::with(|cs| self.clock.on_overflow(cs));
        }
    }
}

/// A leaked dispatch counter usable as a task closure.
#[derive(Clone, Copy)]
pub struct Hits(&'static AtomicU32);

/// Fresh dispatch counter.
pub fn counter() -> Hits {
    Hits(leak(AtomicU32::new(0)))
}

impl Hits {
    /// The closure pointer to schedule with.
    pub fn arg(self) -> *mut () {
        self.0 as *const AtomicU32 as *mut ()
    }

    /// Dispatches so far.
    pub fn count(self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Callback matching [`Hits::arg`]: bump the counter.
pub fn on_hit(arg: *mut ()) {
    let hits = unsafe { &*(arg as *const AtomicU32) };
    hits.fetch_add(1, Ordering::Relaxed);
}

/// Records dispatch order as a tag sequence.
pub struct OrderLog {
    entries: [AtomicU8; 8],
    len: AtomicU32,
}

impl OrderLog {
    pub fn new() -> Self {
        Self {
            entries: Default::default(),
            len: AtomicU32::new(0),
        }
    }

    /// The closure pointer to schedule with.
    pub fn as_arg(&'static self) -> *mut () {
        self as *const OrderLog as *mut ()
    }

    pub fn push(&self, tag: u8) {
        let at = self.len.fetch_add(1, Ordering::Relaxed) as usize;
        self.entries[at].store(tag, Ordering::Relaxed);
    }

    pub fn entries(&self) -> Vec<u8> {
        (0..self.len.load(Ordering::Relaxed) as usize)
            .map(|at| self.entries[at].load(Ordering::Relaxed))
            .collect()
    }
}

/// Callback tagging the [`OrderLog`] closure with `a`.
pub fn on_order_a(arg: *mut ()) {
    unsafe { &*(arg as *const OrderLog) }.push(b'a');
}

/// Callback tagging the [`OrderLog`] closure with `b`.
pub fn on_order_b(arg: *mut ()) {
    unsafe { &*(arg as *const OrderLog) }.push(b'b');
}
