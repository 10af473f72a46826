//! Cooperative, priority-ordered task scheduler.
//!
//! Tasks are kept in an expiration-ordered heap. Each task gets a time slice;
//! render work polls [`Scheduler::should_yield`] between units of work and
//! hands control back once the slice is used up. A yielded task is requeued
//! under the same handle and expiration so it resumes before anything that
//! was scheduled after it at the same priority.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use crate::collections::map::HashMap;
use crate::lane::run_with_priority;
use crate::platform::{Clock, Priority, Scheduler, Task, TaskHandle, TaskOutcome};
use crate::task_heap::{TaskHeap, TaskKey};

/// Tuning knobs for [`CooperativeScheduler`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Length of one time slice.
    pub frame_interval_ms: u64,
    pub user_blocking_timeout_ms: u64,
    pub normal_timeout_ms: u64,
    pub low_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: 5,
            user_blocking_timeout_ms: 250,
            normal_timeout_ms: 5_000,
            low_timeout_ms: 10_000,
        }
    }
}

impl SchedulerConfig {
    /// Deadline offset for a task scheduled at `priority`. `None` never expires.
    fn timeout_for(&self, priority: Priority) -> Option<u64> {
        match priority {
            Priority::Immediate => Some(0),
            Priority::UserBlocking => Some(self.user_blocking_timeout_ms),
            Priority::Normal => Some(self.normal_timeout_ms),
            Priority::Low => Some(self.low_timeout_ms),
            Priority::Idle => None,
        }
    }
}

struct ScheduledTask {
    priority: Priority,
    slot: usize,
    callback: Task,
}

pub struct CooperativeScheduler<C: Clock> {
    clock: C,
    origin: C::Instant,
    config: SchedulerConfig,
    queue: RefCell<TaskHeap>,
    tasks: RefCell<HashMap<TaskHandle, ScheduledTask>>,
    handles_by_slot: RefCell<HashMap<usize, TaskHandle>>,
    next_handle: Cell<u64>,
    next_sequence: Cell<u64>,
    slice_start: Cell<u64>,
    running: Cell<Option<TaskHandle>>,
    running_cancelled: Cell<bool>,
    microtasks: RefCell<VecDeque<Box<dyn FnOnce() + 'static>>>,
}

impl<C: Clock> CooperativeScheduler<C> {
    pub fn new(clock: C) -> Self {
        Self::with_config(clock, SchedulerConfig::default())
    }

    pub fn with_config(clock: C, config: SchedulerConfig) -> Self {
        let origin = clock.now();
        Self {
            clock,
            origin,
            config,
            queue: RefCell::new(TaskHeap::new()),
            tasks: RefCell::new(HashMap::default()),
            handles_by_slot: RefCell::new(HashMap::default()),
            next_handle: Cell::new(1),
            next_sequence: Cell::new(0),
            slice_start: Cell::new(0),
            running: Cell::new(None),
            running_cancelled: Cell::new(false),
            microtasks: RefCell::new(VecDeque::new()),
        }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Milliseconds since the scheduler was created.
    pub fn current_time(&self) -> u64 {
        self.clock.elapsed_millis(self.origin)
    }

    pub fn pending_tasks(&self) -> usize {
        self.queue.borrow().len()
    }

    pub fn has_pending_microtasks(&self) -> bool {
        !self.microtasks.borrow().is_empty()
    }

    pub fn has_pending_work(&self) -> bool {
        self.pending_tasks() > 0 || self.has_pending_microtasks()
    }

    /// Runs queued microtasks, including the ones they queue, until none remain.
    pub fn flush_microtasks(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = self.microtasks.borrow_mut().pop_front();
            match next {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    /// Runs the most urgent task for one time slice, then drains microtasks.
    ///
    /// Returns `false` when no task was queued.
    pub fn run_next_task(&self) -> bool {
        let Some((key, slot)) = self.queue.borrow_mut().pop() else {
            return false;
        };
        let Some(handle) = self.handles_by_slot.borrow_mut().remove(&slot) else {
            return false;
        };
        let Some(mut task) = self.tasks.borrow_mut().remove(&handle) else {
            return false;
        };

        let now = self.current_time();
        let did_timeout = key.expiration <= now;
        self.slice_start.set(now);
        self.running.set(Some(handle));
        self.running_cancelled.set(false);
        log::trace!(
            "running task {:?} at {:?} (timed out: {did_timeout})",
            handle,
            task.priority
        );
        let outcome = run_with_priority(task.priority, || (task.callback)(did_timeout));
        self.running.set(None);

        if outcome == TaskOutcome::Continue && !self.running_cancelled.get() {
            let slot = self.queue.borrow_mut().push(key);
            task.slot = slot;
            self.handles_by_slot.borrow_mut().insert(slot, handle);
            self.tasks.borrow_mut().insert(handle, task);
        }
        self.flush_microtasks();
        true
    }

    /// Drains microtasks and tasks until both queues are empty. Returns the
    /// number of task slices that ran.
    pub fn run_until_idle(&self) -> usize {
        let mut slices = 0;
        loop {
            self.flush_microtasks();
            if !self.run_next_task() {
                return slices;
            }
            slices += 1;
        }
    }
}

impl<C: Clock> Scheduler for CooperativeScheduler<C> {
    fn schedule_callback(&self, priority: Priority, task: Task) -> TaskHandle {
        let handle = TaskHandle(self.next_handle.get());
        self.next_handle.set(handle.0 + 1);
        let sequence = self.next_sequence.get();
        self.next_sequence.set(sequence + 1);

        let now = self.current_time();
        let expiration = self
            .config
            .timeout_for(priority)
            .map(|timeout| now.saturating_add(timeout))
            .unwrap_or(u64::MAX);
        let key = TaskKey {
            expiration,
            sequence,
        };
        let slot = self.queue.borrow_mut().push(key);
        self.handles_by_slot.borrow_mut().insert(slot, handle);
        self.tasks.borrow_mut().insert(
            handle,
            ScheduledTask {
                priority,
                slot,
                callback: task,
            },
        );
        log::trace!("scheduled task {handle:?} at {priority:?}, expires at {expiration}");
        handle
    }

    fn cancel_callback(&self, handle: TaskHandle) {
        if self.running.get() == Some(handle) {
            self.running_cancelled.set(true);
            return;
        }
        let removed = self.tasks.borrow_mut().remove(&handle);
        if let Some(task) = removed {
            self.queue.borrow_mut().remove(task.slot);
            self.handles_by_slot.borrow_mut().remove(&task.slot);
            log::trace!("cancelled task {handle:?}");
        }
    }

    fn should_yield(&self) -> bool {
        self.current_time().saturating_sub(self.slice_start.get()) >= self.config.frame_interval_ms
    }

    fn schedule_microtask(&self, task: Box<dyn FnOnce() + 'static>) {
        self.microtasks.borrow_mut().push_back(task);
    }
}

impl<C: Clock> fmt::Debug for CooperativeScheduler<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CooperativeScheduler")
            .field("pending_tasks", &self.pending_tasks())
            .field("pending_microtasks", &self.microtasks.borrow().len())
            .field("running", &self.running.get())
            .finish()
    }
}

/// Deterministic clock for headless hosts and tests.
///
/// Time only moves through [`ManualClock::advance`], plus an optional fixed
/// step applied on every reading, which lets a test make each
/// `should_yield` poll consume time. Clones share the same time source.
#[derive(Clone, Default)]
pub struct ManualClock {
    inner: Rc<ManualClockInner>,
}

#[derive(Default)]
struct ManualClockInner {
    now: Cell<u64>,
    step_per_read: Cell<u64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, millis: u64) {
        self.inner.now.set(self.inner.now.get() + millis);
    }

    /// Every subsequent reading advances time by `millis` first.
    pub fn set_step_per_read(&self, millis: u64) {
        self.inner.step_per_read.set(millis);
    }

    pub fn millis(&self) -> u64 {
        self.inner.now.get()
    }
}

impl fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualClock")
            .field("now", &self.inner.now.get())
            .field("step_per_read", &self.inner.step_per_read.get())
            .finish()
    }
}

impl Clock for ManualClock {
    type Instant = u64;

    fn now(&self) -> u64 {
        self.advance(self.inner.step_per_read.get());
        self.inner.now.get()
    }

    fn elapsed_millis(&self, since: u64) -> u64 {
        self.now().saturating_sub(since)
    }
}

#[cfg(test)]
#[path = "tests/scheduler_tests.rs"]
mod tests;
