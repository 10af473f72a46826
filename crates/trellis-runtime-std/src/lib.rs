//! Standard runtime services backed by Rust's `std` library.
//!
//! This crate provides concrete implementations of the platform
//! abstraction traits defined in `trellis-core`. Applications construct a
//! [`StdRuntime`], mount roots through it and call [`StdRuntime::pump`]
//! from their event loop whenever a frame was requested.

use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use trellis_core::{
    Clock, CooperativeScheduler, HostConfig, Priority, Root, RootConfig, Scheduler,
    SchedulerConfig, Task, TaskHandle,
};

type FrameWaker = Arc<dyn Fn() + Send + Sync + 'static>;

/// Clock implementation backed by [`std::time`].
#[derive(Debug, Default, Clone)]
pub struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Self::Instant {
        Instant::now()
    }

    fn elapsed_millis(&self, since: Self::Instant) -> u64 {
        since.elapsed().as_millis() as u64
    }
}

impl StdClock {
    /// Returns the elapsed time as a [`Duration`] for convenience.
    pub fn elapsed(&self, since: Instant) -> Duration {
        since.elapsed()
    }
}

/// Cooperative scheduler on wall-clock time that asks the host event loop
/// for a frame whenever work is queued.
pub struct StdScheduler {
    inner: CooperativeScheduler<StdClock>,
    frame_requested: AtomicBool,
    frame_waker: RwLock<Option<FrameWaker>>,
}

impl StdScheduler {
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        Self {
            inner: CooperativeScheduler::with_config(StdClock, config),
            frame_requested: AtomicBool::new(false),
            frame_waker: RwLock::new(None),
        }
    }

    /// Returns whether a frame has been requested since the last call.
    pub fn take_frame_request(&self) -> bool {
        self.frame_requested.swap(false, Ordering::SeqCst)
    }

    /// Registers a waker that will be invoked whenever new work is queued.
    pub fn set_frame_waker(&self, waker: impl Fn() + Send + Sync + 'static) {
        *self
            .frame_waker
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(waker));
    }

    /// Clears any registered frame waker.
    pub fn clear_frame_waker(&self) {
        *self
            .frame_waker
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn has_pending_work(&self) -> bool {
        self.inner.has_pending_work()
    }

    /// Runs queued work until both queues are empty.
    pub fn run_until_idle(&self) -> usize {
        self.inner.run_until_idle()
    }

    /// Runs the most urgent task for one time slice.
    pub fn run_next_task(&self) -> bool {
        self.inner.run_next_task()
    }

    pub fn flush_microtasks(&self) -> usize {
        self.inner.flush_microtasks()
    }

    fn request_frame(&self) {
        self.frame_requested.store(true, Ordering::SeqCst);
        let waker = self
            .frame_waker
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(waker) = waker {
            waker();
        }
    }
}

impl Default for StdScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StdScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdScheduler")
            .field(
                "frame_requested",
                &self.frame_requested.load(Ordering::SeqCst),
            )
            .field("inner", &self.inner)
            .finish()
    }
}

impl Scheduler for StdScheduler {
    fn schedule_callback(&self, priority: Priority, task: Task) -> TaskHandle {
        let handle = self.inner.schedule_callback(priority, task);
        self.request_frame();
        handle
    }

    fn cancel_callback(&self, handle: TaskHandle) {
        self.inner.cancel_callback(handle);
    }

    fn should_yield(&self) -> bool {
        self.inner.should_yield()
    }

    fn schedule_microtask(&self, task: Box<dyn FnOnce() + 'static>) {
        self.inner.schedule_microtask(task);
        self.request_frame();
    }
}

/// Convenience container bundling the standard scheduler and clock.
#[derive(Clone)]
pub struct StdRuntime {
    scheduler: Rc<StdScheduler>,
    clock: StdClock,
}

impl StdRuntime {
    /// Creates a new standard runtime instance.
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        Self {
            scheduler: Rc::new(StdScheduler::with_config(config)),
            clock: StdClock,
        }
    }

    /// Creates a root rendering into `container`, driven by this runtime.
    pub fn mount<H: HostConfig + 'static>(&self, host: H, container: H::Handle) -> Root<H> {
        self.mount_with(host, container, RootConfig::default())
    }

    pub fn mount_with<H: HostConfig + 'static>(
        &self,
        host: H,
        container: H::Handle,
        config: RootConfig,
    ) -> Root<H> {
        log::debug!("mounting root into {container:?}");
        Root::with_config(host, container, self.scheduler.clone(), config)
    }

    /// Drains all queued work. Returns the number of task slices that ran.
    pub fn pump(&self) -> usize {
        self.scheduler.run_until_idle()
    }

    /// Runs queued work until `budget` has elapsed or nothing is left.
    /// Returns whether work remains.
    pub fn pump_for(&self, budget: Duration) -> bool {
        let start = self.clock.now();
        self.scheduler.flush_microtasks();
        while self.clock.elapsed(start) < budget {
            if !self.scheduler.run_next_task() {
                break;
            }
        }
        self.scheduler.has_pending_work()
    }

    /// Returns the scheduler implementation.
    pub fn scheduler(&self) -> Rc<StdScheduler> {
        Rc::clone(&self.scheduler)
    }

    /// Returns the clock implementation.
    pub fn clock(&self) -> StdClock {
        self.clock.clone()
    }

    /// Returns whether a frame was requested since the last poll.
    pub fn take_frame_request(&self) -> bool {
        self.scheduler.take_frame_request()
    }

    /// Registers a waker to be called when the runtime queues new work.
    pub fn set_frame_waker(&self, waker: impl Fn() + Send + Sync + 'static) {
        self.scheduler.set_frame_waker(waker);
    }

    /// Clears any previously registered frame waker.
    pub fn clear_frame_waker(&self) {
        self.scheduler.clear_frame_waker();
    }
}

impl fmt::Debug for StdRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdRuntime")
            .field("scheduler", &self.scheduler)
            .field("clock", &self.clock)
            .finish()
    }
}

impl Default for StdRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "tests/std_runtime_tests.rs"]
mod tests;
