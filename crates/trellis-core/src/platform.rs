//! Platform abstraction traits for the reconciler's runtime services.
//!
//! The reconciler never blocks and never spawns threads. It hands render work
//! to a cooperative [`Scheduler`] provided by the host platform and asks it
//! whether to yield between units of work.

/// Scheduler priority levels, most urgent first.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Immediate,
    UserBlocking,
    Normal,
    Low,
    Idle,
}

/// Identifies a scheduled callback. Handles are never reused by a scheduler,
/// so comparing handles tells whether a callback was replaced.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskHandle(pub(crate) u64);

impl TaskHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// What a task asks the scheduler to do after it ran.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The task finished; drop it.
    Complete,
    /// The task yielded; invoke the same callback again later under the same
    /// handle.
    Continue,
}

/// A scheduled callback. The argument is `true` when the task's deadline
/// already passed, in which case it should run to completion.
pub type Task = Box<dyn FnMut(bool) -> TaskOutcome + 'static>;

/// Cooperative scheduling services consumed by the reconciler.
pub trait Scheduler {
    /// Queue `task` to run at `priority`.
    fn schedule_callback(&self, priority: Priority, task: Task) -> TaskHandle;

    /// Drop a queued task. Cancelling an unknown or finished handle is a no-op.
    fn cancel_callback(&self, handle: TaskHandle);

    /// Whether the current time slice is used up.
    fn should_yield(&self) -> bool;

    /// Queue `task` to run before control returns to the host's event loop.
    fn schedule_microtask(&self, task: Box<dyn FnOnce() + 'static>);
}

/// Provides timing information for the runtime.
pub trait Clock {
    /// Instant type produced by this clock implementation.
    type Instant: Copy;

    /// Returns the current instant.
    fn now(&self) -> Self::Instant;

    /// Returns the number of milliseconds elapsed since `since`.
    fn elapsed_millis(&self, since: Self::Instant) -> u64;
}
