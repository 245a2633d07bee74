//! tickwork core - cooperative scheduling over a single 16-bit timer
//!
//! One free-running hardware timer carries the whole substrate: a
//! 32-bit monotonic tick clock, a derived millisecond clock, a one-shot
//! wake pin, and a cooperative scheduler that dispatches callback tasks
//! at tick- or millisecond-deadlines and idles the CPU in between.
//!
//! This crate is hardware-independent: everything it needs from the
//! timer goes through [`hal::TimerHal`], which the board crate
//! implements over the real registers and which the bundled simulator
//! implements for host-side tests. Task storage is caller-owned and the
//! scheduler's lists are intrusive, so nothing here allocates.
//!
//! ```no_run
//! use tickwork_core::Task;
//!
//! static HEARTBEAT: Task = Task::new();
//!
//! fn beat(_: *mut ()) {
//!     // toggle an LED, then e.g. SCHED.again_msec_from_now(&HEARTBEAT, 500)
//! }
//! ```

#![no_std]
#![warn(missing_docs)]

#[cfg(test)]
extern crate std;

pub mod clock;
pub mod config;
pub mod error;
pub mod hal;
pub mod sched;
pub mod task;

#[cfg(test)]
pub(crate) mod testutil;

pub use clock::{Clock, MsecCount, TickCount};
pub use error::{attach_error_handler, detach_error_handler, Error, ErrorHandler};
pub use sched::{Scheduler, WAKE_FLAG_FROM_NOW, WAKE_FLAG_MSEC};
pub use task::{Task, TaskFn, TaskState, WaitKind};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
