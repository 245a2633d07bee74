//! Outbound error reporting.
//!
//! The clock and scheduler never fail fatally; the conditions they can
//! detect are reported as codes to whatever logging facility the
//! application attaches. With no handler attached, reports are dropped.

use core::cell::Cell;

use critical_section::{CriticalSection, Mutex};

/// Recoverable conditions reported by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Error {
    /// The compare-A handler ran so late its deadline had already
    /// passed; the handler catches up by looping.
    ClockMsecLate = 1,
    /// An absolute deadline lies more than 2^24 units in the past; the
    /// caller most likely meant a future time that wrapped. The task is
    /// still scheduled immediately.
    SchedTimestampWrap = 2,
}

impl Error {
    /// Stable numeric code for the wire/log side.
    pub const fn code(self) -> u8 {
        self as u8
    }
}

/// Handler signature. Called with interrupts masked, possibly from an
/// interrupt handler, so it must be short and must not block.
pub type ErrorHandler = fn(Error);

static HANDLER: Mutex<Cell<Option<ErrorHandler>>> = Mutex::new(Cell::new(None));

/// Attach the application's error sink, replacing any previous one.
pub fn attach_error_handler(handler: ErrorHandler) {
    critical_section::with(|cs| HANDLER.borrow(cs).set(Some(handler)));
}

/// Detach the error sink; subsequent reports are dropped.
pub fn detach_error_handler() {
    critical_section::with(|cs| HANDLER.borrow(cs).set(None));
}

pub(crate) fn report(cs: CriticalSection, error: Error) {
    if let Some(handler) = HANDLER.borrow(cs).get() {
        handler(error);
    }
}
