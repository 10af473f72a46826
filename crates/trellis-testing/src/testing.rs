use std::rc::Rc;

use trellis_core::{
    event_priority, run_with_priority, CooperativeScheduler, Element, Event, HostId, ManualClock,
    MemoryHost, Root, RootConfig, RootError,
};

#[cfg(test)]
use trellis_core::{component, host, Component, Dispatch};
#[cfg(test)]
use std::cell::{Cell, RefCell};

const MAX_PUMP_ROUNDS: usize = 100;

/// Headless harness for exercising reconciler roots in tests.
///
/// The rule owns an in-memory host, a manual clock and a cooperative
/// scheduler on that clock, so every test controls exactly when render work
/// runs and how much time it believes has passed.
pub struct ReconcilerTestRule {
    root: Root<MemoryHost>,
    scheduler: Rc<CooperativeScheduler<ManualClock>>,
    clock: ManualClock,
    container: HostId,
}

impl ReconcilerTestRule {
    pub fn new() -> Self {
        Self::with_config(RootConfig::default())
    }

    pub fn with_config(config: RootConfig) -> Self {
        #[cfg(feature = "logging")]
        let _ = env_logger::builder().is_test(true).try_init();

        let clock = ManualClock::new();
        let scheduler = Rc::new(CooperativeScheduler::new(clock.clone()));
        let mut memory = MemoryHost::new();
        let container = memory.create_container();
        let root = Root::with_config(memory, container, scheduler.clone(), config);
        Self {
            root,
            scheduler,
            clock,
            container,
        }
    }

    /// Install `content` and render it to completion.
    pub fn set_content(&mut self, content: impl Into<Element>) -> Result<(), RootError> {
        self.root.render(content);
        self.pump_until_idle()
    }

    /// Schedule `content` at the ambient priority without running anything.
    pub fn render(&mut self, content: impl Into<Element>) {
        self.root.render(content);
    }

    /// Run microtasks and tasks until nothing is queued, then report the
    /// first error the root surfaced.
    pub fn pump_until_idle(&mut self) -> Result<(), RootError> {
        let mut rounds = 0;
        while self.scheduler.has_pending_work() {
            rounds += 1;
            if rounds > MAX_PUMP_ROUNDS {
                panic!("pump_until_idle looped too many times");
            }
            self.scheduler.run_until_idle();
        }
        self.take_error()
    }

    /// Run a pending sync render now.
    pub fn flush_sync(&mut self) -> Result<(), RootError> {
        self.scheduler.flush_microtasks();
        self.take_error()
    }

    /// Run one task slice. Returns `false` when no task was queued.
    pub fn run_next_task(&mut self) -> bool {
        self.scheduler.run_next_task()
    }

    /// Move the clock forward, then drain queued work.
    pub fn advance_time(&mut self, millis: u64) -> Result<(), RootError> {
        self.clock.advance(millis);
        self.pump_until_idle()
    }

    /// Deliver an event to `target` the way a host event loop would: every
    /// matching listener runs at the event's priority, and the sync work it
    /// scheduled is flushed before this returns. Returns the number of
    /// listeners that ran.
    pub fn dispatch_event(&mut self, target: HostId, event_type: &str) -> Result<usize, RootError> {
        let listeners = self
            .root
            .with_host(|memory| memory.listeners_for(target, event_type));
        let event = Event::new(event_type);
        let mut ran = 0;
        run_with_priority(event_priority(event_type), || {
            for listener in &listeners {
                if event.is_propagation_stopped() {
                    break;
                }
                listener(&event);
                ran += 1;
            }
        });
        log::debug!("dispatched `{event_type}` to {target:?}: {ran} listeners");
        self.flush_sync()?;
        Ok(ran)
    }

    /// Host nodes with `tag`, in document order.
    pub fn find_by_tag(&self, tag: &str) -> Vec<HostId> {
        self.root.with_host(|memory| {
            let mut found = Vec::new();
            let mut stack = vec![self.container];
            while let Some(node) = stack.pop() {
                if memory.tag(node) == Some(tag) {
                    found.push(node);
                }
                stack.extend(memory.children(node).iter().rev().copied());
            }
            found
        })
    }

    pub fn markup(&self) -> String {
        self.root.with_host(|memory| memory.render_to_string(self.container))
    }

    pub fn text_content(&self) -> String {
        self.root.with_host(|memory| memory.text_content(self.container))
    }

    /// Dump the host node tree as text for debugging.
    pub fn dump_tree(&self) -> String {
        self.root.with_host(|memory| memory.dump_tree(self.container))
    }

    /// Dump the committed fiber tree as text for debugging.
    pub fn dump_fibers(&self) -> String {
        self.root.dump_fibers()
    }

    pub fn root(&self) -> &Root<MemoryHost> {
        &self.root
    }

    pub fn scheduler(&self) -> &CooperativeScheduler<ManualClock> {
        &self.scheduler
    }

    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    pub fn container(&self) -> HostId {
        self.container
    }

    fn take_error(&self) -> Result<(), RootError> {
        let mut errors = self.root.take_errors();
        if errors.is_empty() {
            return Ok(());
        }
        if errors.len() > 1 {
            log::warn!("{} further root errors dropped", errors.len() - 1);
        }
        Err(errors.remove(0))
    }
}

impl Default for ReconcilerTestRule {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience helper for tests that only need temporary access to a
/// `ReconcilerTestRule`.
pub fn run_test_root<R>(f: impl FnOnce(&mut ReconcilerTestRule) -> R) -> R {
    let mut rule = ReconcilerTestRule::new();
    f(&mut rule)
}

#[cfg(test)]
#[path = "tests/testing_tests.rs"]
mod tests;
