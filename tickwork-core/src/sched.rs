//! Cooperative, interrupt-driven task scheduler.
//!
//! Tasks wait on one of two sorted pending lists (tick deadlines and
//! millisecond deadlines) until promotion moves them to the ready FIFO,
//! from which [`run_one`](Scheduler::run_one) dispatches a single
//! callback per call, idling the CPU whenever nothing is due before the
//! next millisecond. All list surgery happens with interrupts masked;
//! callbacks always run with interrupts enabled.
//!
//! Deadline order is circular: `a` is before `b` iff `(a - b) as i32`
//! is negative, so everything keeps working across counter wrap.

use core::cell::Cell;
use core::ptr;

use critical_section::{CriticalSection, Mutex};

use crate::clock::Clock;
use crate::config::{TASK_WAIT_TICK_THRESHOLD, TICKS_PER_MSEC};
use crate::error::{self, Error};
use crate::hal::TimerHal;
use crate::task::{ClosurePtr, Task, TaskFn, TaskState, WaitKind};

/// `wake_spec` is in milliseconds rather than ticks.
pub const WAKE_FLAG_MSEC: u8 = 1;
/// `wake_spec` is an offset from the current clock reading rather than
/// an absolute deadline.
pub const WAKE_FLAG_FROM_NOW: u8 = 2;

/// Absolute deadlines further behind "now" than this are reported as a
/// suspected timestamp wrap (and still run immediately).
const TIMESTAMP_WRAP_LIMIT: i32 = -0xFF_FFFF;

type TaskRef = &'static Task;

/// What `run_one` decided to do once interrupts come back on.
enum Action {
    Run(TaskFn, ClosurePtr),
    /// A tick deadline lands before the next millisecond; return and let
    /// the caller spin.
    Spin,
    Sleep,
}

/// The task scheduler. One instance per system, sharing the clock's
/// timer.
pub struct Scheduler<T: TimerHal + 'static> {
    clock: &'static Clock<T>,
    /// Tasks waiting on tick deadlines, soonest first.
    pending_tick: Mutex<Cell<Option<TaskRef>>>,
    /// Tasks waiting on millisecond deadlines, soonest first.
    pending_msec: Mutex<Cell<Option<TaskRef>>>,
    /// Due tasks, dispatch order.
    ready: Mutex<Cell<Option<TaskRef>>>,
    /// Last node of `ready` (`None` when empty), for O(1) append.
    ready_tail: Mutex<Cell<Option<TaskRef>>>,
}

impl<T: TimerHal + 'static> Scheduler<T> {
    /// An empty scheduler over `clock`.
    pub const fn new(clock: &'static Clock<T>) -> Self {
        Self {
            clock,
            pending_tick: Mutex::new(Cell::new(None)),
            pending_msec: Mutex::new(Cell::new(None)),
            ready: Mutex::new(Cell::new(None)),
            ready_tail: Mutex::new(Cell::new(None)),
        }
    }

    /// Schedule `task` according to `flags` ([`WAKE_FLAG_MSEC`],
    /// [`WAKE_FLAG_FROM_NOW`], or-combined) and `wake_spec`.
    ///
    /// A task that is already scheduled is cancelled first, so queueing
    /// is always a retarget, never a duplicate. Deadlines that have
    /// already arrived (for ticks: within [`TASK_WAIT_TICK_THRESHOLD`])
    /// go straight to the ready FIFO.
    pub fn queue(&self, task: TaskRef, flags: u8, wake_spec: u32) {
        critical_section::with(|cs| self.queue_cs(cs, task, flags, wake_spec));
    }

    fn queue_cs(&self, cs: CriticalSection, task: TaskRef, flags: u8, wake_spec: u32) {
        if task.state.borrow(cs).get() != TaskState::Idle {
            self.cancel_cs(cs, task);
        }
        task.state.borrow(cs).set(TaskState::Scheduled);

        let offset: i32;
        if flags & WAKE_FLAG_MSEC != 0 {
            task.wait.borrow(cs).set(WaitKind::Msec);
            let now = self.clock.read_msec_cs(cs);
            let wake_time = if flags & WAKE_FLAG_FROM_NOW != 0 {
                offset = wake_spec as i32;
                now.wrapping_add(wake_spec)
            } else {
                offset = wake_spec.wrapping_sub(now) as i32;
                wake_spec
            };
            task.wake_time.borrow(cs).set(wake_time);
            if offset > 0 {
                Self::insert_sorted(self.pending_msec.borrow(cs), cs, task);
                return;
            }
        } else {
            task.wait.borrow(cs).set(WaitKind::Tick);
            let now = self.clock.read_ticks_cs(cs);
            // The promotion threshold is folded into the offset: a tick
            // deadline that close would only be promoted on the next
            // pass anyway.
            let wake_time = if flags & WAKE_FLAG_FROM_NOW != 0 {
                offset = (wake_spec as i32).wrapping_sub(TASK_WAIT_TICK_THRESHOLD as i32);
                now.wrapping_add(wake_spec)
            } else {
                offset = wake_spec
                    .wrapping_sub(now)
                    .wrapping_sub(TASK_WAIT_TICK_THRESHOLD) as i32;
                wake_spec
            };
            task.wake_time.borrow(cs).set(wake_time);
            if offset > 0 {
                Self::insert_sorted(self.pending_tick.borrow(cs), cs, task);
                return;
            }
        }

        // The deadline has already arrived. Far enough behind that the
        // caller probably meant a wrapped future time, it is worth a
        // report; it runs now either way.
        if offset < TIMESTAMP_WRAP_LIMIT {
            error::report(cs, Error::SchedTimestampWrap);
        }
        self.push_ready(cs, task);
    }

    /// Remove `task` from whichever list holds it and return it to
    /// [`TaskState::Idle`]. Idempotent; cancelling an idle task is a
    /// no-op.
    pub fn cancel(&self, task: TaskRef) {
        critical_section::with(|cs| self.cancel_cs(cs, task));
    }

    fn cancel_cs(&self, cs: CriticalSection, task: TaskRef) {
        if !Self::unlink(self.pending_msec.borrow(cs), cs, task)
            && !Self::unlink(self.pending_tick.borrow(cs), cs, task)
        {
            self.unlink_ready(cs, task);
        }
        task.next.borrow(cs).set(None);
        task.wait.borrow(cs).set(WaitKind::None);
        task.state.borrow(cs).set(TaskState::Idle);
    }

    /// Walk the slots of a pending list and splice `task` in before the
    /// first strictly-later deadline, so equal deadlines keep insertion
    /// order.
    fn insert_sorted(head: &Cell<Option<TaskRef>>, cs: CriticalSection, task: TaskRef) {
        let wake_time = task.wake_time.borrow(cs).get();
        let mut slot = head;
        while let Some(t) = slot.get() {
            if t.wake_time.borrow(cs).get().wrapping_sub(wake_time) as i32 > 0 {
                break;
            }
            slot = t.next.borrow(cs);
        }
        task.next.borrow(cs).set(slot.get());
        slot.set(Some(task));
    }

    fn unlink(head: &Cell<Option<TaskRef>>, cs: CriticalSection, task: TaskRef) -> bool {
        let mut slot = head;
        while let Some(t) = slot.get() {
            if ptr::eq(t, task) {
                slot.set(t.next.borrow(cs).get());
                return true;
            }
            slot = t.next.borrow(cs);
        }
        false
    }

    fn unlink_ready(&self, cs: CriticalSection, task: TaskRef) -> bool {
        let mut prev: Option<TaskRef> = None;
        let mut slot = self.ready.borrow(cs);
        while let Some(t) = slot.get() {
            if ptr::eq(t, task) {
                slot.set(t.next.borrow(cs).get());
                let tail = self.ready_tail.borrow(cs);
                if let Some(last) = tail.get() {
                    if ptr::eq(last, task) {
                        tail.set(prev);
                    }
                }
                return true;
            }
            prev = Some(t);
            slot = t.next.borrow(cs);
        }
        false
    }

    fn push_ready(&self, cs: CriticalSection, task: TaskRef) {
        task.next.borrow(cs).set(None);
        match self.ready_tail.borrow(cs).get() {
            Some(last) => last.next.borrow(cs).set(Some(task)),
            None => self.ready.borrow(cs).set(Some(task)),
        }
        self.ready_tail.borrow(cs).set(Some(task));
        task.state.borrow(cs).set(TaskState::Ready);
    }

    fn pop_ready(&self, cs: CriticalSection) -> Option<TaskRef> {
        let head = self.ready.borrow(cs).get()?;
        self.ready.borrow(cs).set(head.next.borrow(cs).get());
        let tail = self.ready_tail.borrow(cs);
        if let Some(last) = tail.get() {
            if ptr::eq(last, head) {
                tail.set(None);
            }
        }
        head.next.borrow(cs).set(None);
        Some(head)
    }

    fn poll(&self, cs: CriticalSection) -> Action {
        // Promote every task whose deadline has arrived; tick promotions
        // run first, so within one pass they dispatch ahead of
        // millisecond promotions.
        let mut tick_delay = TICKS_PER_MSEC as i32;
        if self.pending_tick.borrow(cs).get().is_some() {
            let now = self.clock.read_ticks_cs(cs);
            while let Some(head) = self.pending_tick.borrow(cs).get() {
                tick_delay = head.wake_time.borrow(cs).get().wrapping_sub(now) as i32;
                if tick_delay >= TASK_WAIT_TICK_THRESHOLD as i32 {
                    break;
                }
                self.pending_tick.borrow(cs).set(head.next.borrow(cs).get());
                self.push_ready(cs, head);
            }
        }
        if self.pending_msec.borrow(cs).get().is_some() {
            let now = self.clock.read_msec_cs(cs);
            while let Some(head) = self.pending_msec.borrow(cs).get() {
                if head.wake_time.borrow(cs).get().wrapping_sub(now) as i32 > 0 {
                    break;
                }
                self.pending_msec.borrow(cs).set(head.next.borrow(cs).get());
                self.push_ready(cs, head);
            }
        }

        if let Some(task) = self.pop_ready(cs) {
            task.state.borrow(cs).set(TaskState::Idle);
            // Snapshot the call before interrupts come back on: a
            // handler may retarget the task the instant they do.
            let callback = task.callback.borrow(cs).get();
            let closure = task.closure.borrow(cs).get();
            return match callback {
                Some(f) => Action::Run(f, closure),
                // A task queued without ever being given a callback;
                // nothing to call.
                None => {
                    debug_assert!(false, "dispatched a task with no callback");
                    Action::Spin
                }
            };
        }

        if self.pending_tick.borrow(cs).get().is_some() && tick_delay < TICKS_PER_MSEC as i32 {
            Action::Spin
        } else {
            Action::Sleep
        }
    }

    /// One dispatch step: promote due tasks, then either run one ready
    /// callback, return so the caller can spin on a sub-millisecond tick
    /// deadline, or idle-sleep until the next millisecond interrupt.
    ///
    /// Interrupts are enabled on every path out, and in particular
    /// around the callback itself.
    pub fn run_one(&self) {
        // The closure form of `critical_section` cannot express the
        // sleep path, which has to re-enable interrupts and halt in one
        // step; the raw pairing is used instead, released on every arm.
        // SAFETY: acquire/release are balanced on all paths below, and
        // the token does not outlive the masked region.
        let restore = unsafe { critical_section::acquire() };
        let action = self.poll(unsafe { CriticalSection::new() });
        match action {
            Action::Run(f, closure) => {
                unsafe { critical_section::release(restore) };
                f(closure.0);
            }
            Action::Spin => unsafe { critical_section::release(restore) },
            Action::Sleep => {
                // Nothing to do before the next millisecond; compare-A
                // wakes the CPU. `idle_sleep` unmasks and halts
                // atomically, so nothing can slip in between.
                self.clock.hw().idle_sleep();
                unsafe { critical_section::release(restore) };
            }
        }
    }

    /// Dispatch forever.
    pub fn run(&self) -> ! {
        loop {
            self.run_one();
        }
    }

    /// Attach `f`/`closure` to `task` and run it on the next pass.
    pub fn now(&self, task: TaskRef, f: TaskFn, closure: *mut ()) {
        critical_section::with(|cs| {
            task.set_callback(cs, f, closure);
            self.queue_cs(cs, task, WAKE_FLAG_FROM_NOW, 0);
        });
    }

    /// Attach `f`/`closure` and schedule at absolute millisecond `wake_at`.
    pub fn at_msec(&self, task: TaskRef, wake_at: u32, f: TaskFn, closure: *mut ()) {
        critical_section::with(|cs| {
            task.set_callback(cs, f, closure);
            self.queue_cs(cs, task, WAKE_FLAG_MSEC, wake_at);
        });
    }

    /// Attach `f`/`closure` and schedule `offset` milliseconds from now.
    pub fn msec_from_now(&self, task: TaskRef, offset: u32, f: TaskFn, closure: *mut ()) {
        critical_section::with(|cs| {
            task.set_callback(cs, f, closure);
            self.queue_cs(cs, task, WAKE_FLAG_MSEC | WAKE_FLAG_FROM_NOW, offset);
        });
    }

    /// Attach `f`/`closure` and schedule at absolute tick `wake_at`.
    pub fn at_tick(&self, task: TaskRef, wake_at: u32, f: TaskFn, closure: *mut ()) {
        critical_section::with(|cs| {
            task.set_callback(cs, f, closure);
            self.queue_cs(cs, task, 0, wake_at);
        });
    }

    /// Attach `f`/`closure` and schedule `offset` ticks from now.
    pub fn ticks_from_now(&self, task: TaskRef, offset: u32, f: TaskFn, closure: *mut ()) {
        critical_section::with(|cs| {
            task.set_callback(cs, f, closure);
            self.queue_cs(cs, task, WAKE_FLAG_FROM_NOW, offset);
        });
    }

    /// Re-queue for the next pass, keeping the task's callback.
    pub fn again_now(&self, task: TaskRef) {
        self.queue(task, WAKE_FLAG_FROM_NOW, 0);
    }

    /// Re-queue at absolute millisecond `wake_at`, keeping the callback.
    pub fn again_at_msec(&self, task: TaskRef, wake_at: u32) {
        self.queue(task, WAKE_FLAG_MSEC, wake_at);
    }

    /// Re-queue `offset` milliseconds from now, keeping the callback.
    pub fn again_msec_from_now(&self, task: TaskRef, offset: u32) {
        self.queue(task, WAKE_FLAG_MSEC | WAKE_FLAG_FROM_NOW, offset);
    }

    /// Re-queue at absolute tick `wake_at`, keeping the callback.
    pub fn again_at_tick(&self, task: TaskRef, wake_at: u32) {
        self.queue(task, 0, wake_at);
    }

    /// Re-queue `offset` ticks from now, keeping the callback.
    pub fn again_ticks_from_now(&self, task: TaskRef, offset: u32) {
        self.queue(task, WAKE_FLAG_FROM_NOW, offset);
    }
}
