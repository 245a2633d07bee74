//! Idle sleep between scheduler events.
//!
//! Only idle mode is used: the CPU core stops but Timer1 keeps counting
//! and every interrupt can wake it. Deeper modes would stop the timer
//! and lose the clock.

use core::arch::asm;
use core::ptr::{read_volatile, write_volatile};

// Sleep Mode Control Register
const SMCR: *mut u8 = 0x53 as *mut u8;

// SMCR bits
const SE: u8 = 0; // Sleep Enable
const SM0: u8 = 1;
const SM1: u8 = 2;
const SM2: u8 = 3;

/// Halt the CPU in idle mode until an interrupt fires.
///
/// Must be entered with global interrupts masked. On AVR the
/// instruction after `sei` executes before any pending interrupt, so
/// the `sei`/`sleep` pair makes "re-enable and halt" one atomic step:
/// no wake event can slip in between the caller's decision to sleep and
/// the halt itself. Returns with interrupts enabled.
pub(crate) fn idle_sleep() {
    unsafe {
        // Idle mode is SM2:0 = 000; set only the enable bit.
        let smcr = read_volatile(SMCR);
        let smcr = smcr & !(1 << SM2 | 1 << SM1 | 1 << SM0);
        write_volatile(SMCR, smcr | 1 << SE);

        asm!("sei", "sleep");

        // Clear the enable bit so a stray `sleep` elsewhere cannot halt
        // the CPU.
        let smcr = read_volatile(SMCR);
        write_volatile(SMCR, smcr & !(1 << SE));
    }
}
