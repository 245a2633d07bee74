//! Schedulable task records.
//!
//! A [`Task`] is caller-owned storage, typically a `static`, that the
//! scheduler threads onto its lists through the task's own `next` link;
//! the scheduler itself never allocates. All fields are guarded by the
//! global critical section, so a task may be queued or cancelled from
//! mainline code and from interrupt handlers alike.

use core::cell::Cell;
use core::ptr;

use critical_section::{CriticalSection, Mutex};

/// Task callback: receives the opaque closure pointer the task was
/// scheduled with.
pub type TaskFn = fn(*mut ());

/// Where a task currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// On no list. The initial state, and the state a task re-enters the
    /// moment it is dispatched, so its callback may re-queue it.
    Idle,
    /// On one of the pending lists, waiting for its deadline.
    Scheduled,
    /// On the ready FIFO, waiting for dispatch.
    Ready,
}

/// Which clock a scheduled task's `wake_time` is measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitKind {
    /// Not waiting on either clock.
    None,
    /// `wake_time` is a 32-bit tick count.
    Tick,
    /// `wake_time` is a 32-bit millisecond count.
    Msec,
}

/// The closure pointer, wrapped so it can live in interrupt-shared
/// storage.
///
/// Safety: the pointer never leaves the single-core mainline/ISR world
/// it was queued from; the scheduler only hands it back to the callback.
#[derive(Clone, Copy)]
pub(crate) struct ClosurePtr(pub *mut ());

unsafe impl Send for ClosurePtr {}

/// A schedulable callback with caller-owned storage.
///
/// Tasks are handled by `&'static` reference and never move, which is
/// what keeps the intrusive `next` links sound.
pub struct Task {
    pub(crate) state: Mutex<Cell<TaskState>>,
    pub(crate) wait: Mutex<Cell<WaitKind>>,
    pub(crate) wake_time: Mutex<Cell<u32>>,
    pub(crate) next: Mutex<Cell<Option<&'static Task>>>,
    pub(crate) callback: Mutex<Cell<Option<TaskFn>>>,
    pub(crate) closure: Mutex<Cell<ClosurePtr>>,
}

impl Task {
    /// An idle task with no callback attached yet.
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(Cell::new(TaskState::Idle)),
            wait: Mutex::new(Cell::new(WaitKind::None)),
            wake_time: Mutex::new(Cell::new(0)),
            next: Mutex::new(Cell::new(None)),
            callback: Mutex::new(Cell::new(None)),
            closure: Mutex::new(Cell::new(ClosurePtr(ptr::null_mut()))),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TaskState {
        critical_section::with(|cs| self.state.borrow(cs).get())
    }

    /// Which clock the task is (or was last) scheduled against.
    pub fn wait_kind(&self) -> WaitKind {
        critical_section::with(|cs| self.wait.borrow(cs).get())
    }

    pub(crate) fn set_callback(&self, cs: CriticalSection, f: TaskFn, closure: *mut ()) {
        self.callback.borrow(cs).set(Some(f));
        self.closure.borrow(cs).set(ClosurePtr(closure));
    }
}

impl Default for Task {
    fn default() -> Self {
        Self::new()
    }
}
