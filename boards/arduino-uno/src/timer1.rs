//! Register-level Timer/Counter1 access.
//!
//! Timer1 is the one piece of hardware the whole substrate runs on: the
//! free-running counter is the tick clock's low word, compare-A paces
//! the millisecond count and compare-B is the one-shot wake. It is
//! claimed wholesale; nothing else (PWM on pins 9/10 included) may touch
//! it.

use core::ptr::{read_volatile, write_volatile};

use tickwork_core::hal::{Prescale, TimerHal};

// Timer1 registers (16-bit counter, two compare units)
const TCCR1A: *mut u8 = 0x80 as *mut u8;
const TCCR1B: *mut u8 = 0x81 as *mut u8;
const TCNT1L: *mut u8 = 0x84 as *mut u8;
const TCNT1H: *mut u8 = 0x85 as *mut u8;
const OCR1AL: *mut u8 = 0x88 as *mut u8;
const OCR1AH: *mut u8 = 0x89 as *mut u8;
const OCR1BL: *mut u8 = 0x8A as *mut u8;
const OCR1BH: *mut u8 = 0x8B as *mut u8;
const TIMSK1: *mut u8 = 0x6F as *mut u8;
const TIFR1: *mut u8 = 0x36 as *mut u8;

// TCCR1B clock select bits
const CS10: u8 = 0;
const CS11: u8 = 1;

// TIMSK1 bits
const TOIE1: u8 = 0;
const OCIE1A: u8 = 1;
const OCIE1B: u8 = 2;

// TIFR1 bits
const TOV1: u8 = 0;
const _OCF1A: u8 = 1;
const OCF1B: u8 = 2;

/// The scheduler's timer. A unit type: the registers are the state.
pub struct Timer1;

/// Write a 16-bit timer register: high byte first, so the shared temp
/// latch commits both bytes on the low write.
#[inline(always)]
fn write16(low: *mut u8, high: *mut u8, value: u16) {
    unsafe {
        write_volatile(high, (value >> 8) as u8);
        write_volatile(low, value as u8);
    }
}

impl TimerHal for Timer1 {
    fn start(&self, prescale: Prescale, first_compare_a: u16) {
        let clock_select = match prescale {
            Prescale::Div1 => 1 << CS10,
            Prescale::Div8 => 1 << CS11,
            Prescale::Div64 => 1 << CS11 | 1 << CS10,
        };
        unsafe {
            // Normal mode: free-running up-counter, no waveform output.
            write_volatile(TCCR1A, 0);
            write16(TCNT1L, TCNT1H, 0);
            write16(OCR1AL, OCR1AH, first_compare_a);
            write_volatile(TCCR1B, clock_select);
            let timsk = read_volatile(TIMSK1);
            write_volatile(TIMSK1, timsk | 1 << OCIE1A | 1 << TOIE1);
        }
    }

    fn count(&self) -> u16 {
        // Low byte first: reading TCNT1L latches the high byte.
        unsafe {
            let low = read_volatile(TCNT1L);
            let high = read_volatile(TCNT1H);
            (high as u16) << 8 | low as u16
        }
    }

    fn set_compare_a(&self, at: u16) {
        write16(OCR1AL, OCR1AH, at);
    }

    fn set_compare_b(&self, at: u16) {
        write16(OCR1BL, OCR1BH, at);
    }

    fn overflow_pending(&self) -> bool {
        unsafe { read_volatile(TIFR1) & 1 << TOV1 != 0 }
    }

    fn compare_b_enable(&self) {
        unsafe {
            // Writing a one clears the flag; the plain write avoids
            // wiping other pending flags the way a read-modify-write
            // would.
            write_volatile(TIFR1, 1 << OCF1B);
            let timsk = read_volatile(TIMSK1);
            write_volatile(TIMSK1, timsk | 1 << OCIE1B);
        }
    }

    fn compare_b_disable(&self) {
        unsafe {
            let timsk = read_volatile(TIMSK1);
            write_volatile(TIMSK1, timsk & !(1 << OCIE1B));
        }
    }

    fn idle_sleep(&self) {
        crate::sleep::idle_sleep();
    }
}
