//! Arduino Uno (ATmega328P) binding for the tickwork scheduler.
//!
//! Wires the portable core to the real hardware: Timer/Counter1 as the
//! shared timer, the three Timer1 interrupt vectors feeding the clock,
//! and SMCR idle sleep between events.
//!
//! ```ignore
//! use arduino_uno::{init, SCHED};
//! use tickwork_core::Task;
//!
//! static BLINK: Task = Task::new();
//!
//! fn blink(_: *mut ()) {
//!     // toggle the LED...
//!     SCHED.again_msec_from_now(&BLINK, 500);
//! }
//!
//! #[avr_device::entry]
//! fn main() -> ! {
//!     init();
//!     unsafe { avr_device::interrupt::enable() };
//!     SCHED.msec_from_now(&BLINK, 500, blink, core::ptr::null_mut());
//!     SCHED.run()
//! }
//! ```

#![no_std]
#![cfg_attr(target_arch = "avr", feature(abi_avr_interrupt))]

#[cfg(target_arch = "avr")]
mod delay;
#[cfg(target_arch = "avr")]
mod sleep;
#[cfg(target_arch = "avr")]
mod timer1;

#[cfg(target_arch = "avr")]
pub use delay::Delay;
#[cfg(target_arch = "avr")]
pub use instance::{init, CLOCK, SCHED};
#[cfg(target_arch = "avr")]
pub use timer1::Timer1;

#[cfg(target_arch = "avr")]
mod instance {
    use critical_section::CriticalSection;
    use tickwork_core::{Clock, Scheduler};

    use crate::timer1::Timer1;

    // Halt on panic; there is nowhere to unwind to.
    use panic_halt as _;

    // The critical-section implementation comes from avr-device (its
    // "critical-section-impl" feature); referencing the crate keeps it
    // linked.
    extern crate avr_device;

    /// The system clock, over Timer/Counter1.
    pub static CLOCK: Clock<Timer1> = Clock::new(Timer1);

    /// The system scheduler.
    pub static SCHED: Scheduler<Timer1> = Scheduler::new(&CLOCK);

    /// One-time hardware setup: starts Timer1 and the millisecond
    /// compare. Enable global interrupts afterwards
    /// (`avr_device::interrupt::enable`), then hand control to
    /// [`SCHED.run()`](tickwork_core::Scheduler::run).
    pub fn init() {
        CLOCK.init();
    }

    // Timer1 interrupt vectors. The AVR clears the global interrupt
    // enable on entry, which is exactly the critical section the clock's
    // handlers require.

    #[export_name = "__vector_11"]
    pub unsafe extern "avr-interrupt" fn timer1_compa() {
        CLOCK.on_compare_a(CriticalSection::new());
    }

    #[export_name = "__vector_12"]
    pub unsafe extern "avr-interrupt" fn timer1_compb() {
        CLOCK.on_compare_b(CriticalSection::new());
    }

    #[export_name = "__vector_13"]
    pub unsafe extern "avr-interrupt" fn timer1_ovf() {
        CLOCK.on_overflow(CriticalSection::new());
    }
}
