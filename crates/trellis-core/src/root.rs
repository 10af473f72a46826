//! Mount points and the per-root scheduling coordinator.
//!
//! A root is idle, has a sync render queued for the next microtask
//! checkpoint, or has a concurrent render task queued with the scheduler.
//! Whenever lanes are added the coordinator recomputes the most urgent
//! pending lane and only reschedules when it differs from the lane already
//! backing the queued callback.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::commit_work::{
    commit_layout_effects, commit_mutation_effects, flush_passive_effects, has_passive_work,
    CommitContext, PendingPassiveEffects,
};
use crate::element::{Element, Props};
use crate::fiber::{create_work_in_progress, Fiber, FiberArena, FiberId};
use crate::hooks::UpdateScheduler;
use crate::host::HostConfig;
use crate::lane::{
    highest_priority_lane, request_update_lane, run_with_priority, Lane, LanePriorityTable,
    Lanes, NO_LANE, NO_LANES,
};
use crate::platform::{Priority, Scheduler, TaskHandle, TaskOutcome};
use crate::update_queue::{Action, SharedQueue, StateCell, Update};
use crate::work_loop::{work_loop_concurrent, work_loop_sync, RenderContext, RenderSession};
use crate::{RenderError, RootError};

/// Tuning knobs of a root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RootConfig {
    pub lane_table: LanePriorityTable,
    /// Extra attempts after a render attempt fails. Contract violations are
    /// never retried.
    pub max_render_retries: u32,
    /// Consecutive commits that may re-schedule their own lane before the
    /// lane is dropped as a runaway update loop.
    pub nested_update_limit: u32,
}

impl Default for RootConfig {
    fn default() -> Self {
        Self {
            lane_table: LanePriorityTable::default(),
            max_render_retries: 1,
            nested_update_limit: 50,
        }
    }
}

pub(crate) struct FiberRoot<H: HostConfig> {
    host: H,
    container: H::Handle,
    arena: FiberArena<H::Handle>,
    current: FiberId,
    finished_work: Option<FiberId>,
    finished_lane: Lane,
    pending_lanes: Lanes,
    callback_node: Option<TaskHandle>,
    callback_priority: Lane,
    pending_passive_effects: PendingPassiveEffects,
    passive_flush_task: Option<TaskHandle>,
    session: Option<RenderSession>,
    errors: Vec<RootError>,
    nested_update_count: u32,
    commit_count: u64,
}

impl<H: HostConfig> FiberRoot<H> {
    /// Drops the fibers of the render attempt in flight along with the host
    /// nodes it created.
    fn discard_render(&mut self) {
        for handle in self.arena.discard_allocations() {
            self.host.destroy_instance(&handle);
        }
    }

    fn release_deleted(&mut self, fiber: FiberId) {
        for handle in self.arena.release_subtree(fiber) {
            self.host.destroy_instance(&handle);
        }
    }
}

enum RenderStatus {
    Complete,
    Yielded,
    Failed { error: RenderError, attempts: u32 },
}

pub(crate) struct RootInner<H: HostConfig + 'static> {
    state: RefCell<FiberRoot<H>>,
    /// Lanes dispatched while `state` was borrowed.
    incoming_lanes: Cell<Lanes>,
    root_queue: SharedQueue,
    scheduler: Rc<dyn Scheduler>,
    config: RootConfig,
    this: Weak<RootInner<H>>,
    updater: Weak<dyn UpdateScheduler>,
    sync_flush_scheduled: Cell<bool>,
}

/// A mount point rendering elements into a host container.
pub struct Root<H: HostConfig + 'static> {
    inner: Rc<RootInner<H>>,
}

impl<H: HostConfig + 'static> Clone for Root<H> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<H: HostConfig + 'static> Root<H> {
    pub fn new(host: H, container: H::Handle, scheduler: Rc<dyn Scheduler>) -> Self {
        Self::with_config(host, container, scheduler, RootConfig::default())
    }

    pub fn with_config(
        host: H,
        container: H::Handle,
        scheduler: Rc<dyn Scheduler>,
        config: RootConfig,
    ) -> Self {
        let root_queue = SharedQueue::default();
        let mut arena = FiberArena::new();
        let state = StateCell::with_queue(Rc::new(Element::Empty), root_queue.clone());
        let current = arena.allocate(Fiber::host_root(container.clone(), state));
        arena.commit_allocations();

        let inner = Rc::new_cyclic(|this: &Weak<RootInner<H>>| {
            let updater: Weak<dyn UpdateScheduler> = this.clone();
            RootInner {
                state: RefCell::new(FiberRoot {
                    host,
                    container,
                    arena,
                    current,
                    finished_work: None,
                    finished_lane: NO_LANE,
                    pending_lanes: NO_LANES,
                    callback_node: None,
                    callback_priority: NO_LANE,
                    pending_passive_effects: PendingPassiveEffects::default(),
                    passive_flush_task: None,
                    session: None,
                    errors: Vec::new(),
                    nested_update_count: 0,
                    commit_count: 0,
                }),
                incoming_lanes: Cell::new(NO_LANES),
                root_queue,
                scheduler,
                config,
                this: this.clone(),
                updater,
                sync_flush_scheduled: Cell::new(false),
            }
        });
        Self { inner }
    }

    /// Schedules `element` to replace the root's content at the ambient
    /// priority.
    pub fn render(&self, element: impl Into<Element>) {
        let lane = self.inner.request_update_lane();
        self.inner.root_queue.borrow_mut().enqueue(Update {
            action: Action::Replace(Rc::new(element.into())),
            lane,
        });
        self.inner.schedule_update(lane);
    }

    /// Schedules removal of everything rendered, at immediate priority.
    pub fn unmount(&self) {
        run_with_priority(Priority::Immediate, || self.render(Element::Empty));
    }

    /// Runs a pending sync render now instead of at the next microtask
    /// checkpoint.
    pub fn flush_sync(&self) {
        self.inner.perform_sync_work_on_root();
    }

    /// Runs queued passive effects now. Returns whether any ran.
    pub fn flush_passive_effects(&self) -> bool {
        self.inner.flush_passive_effects()
    }

    pub fn config(&self) -> &RootConfig {
        &self.inner.config
    }

    pub fn container(&self) -> H::Handle {
        self.inner.state.borrow().container.clone()
    }

    pub fn pending_lanes(&self) -> Lanes {
        self.inner.state.borrow().pending_lanes | self.inner.incoming_lanes.get()
    }

    /// Lane backing the queued render callback, or [`NO_LANE`].
    pub fn scheduled_lane(&self) -> Lane {
        self.inner.state.borrow().callback_priority
    }

    pub fn scheduled_task(&self) -> Option<TaskHandle> {
        self.inner.state.borrow().callback_node
    }

    pub fn is_render_in_progress(&self) -> bool {
        self.inner.state.borrow().session.is_some()
    }

    pub fn last_committed_lane(&self) -> Lane {
        self.inner.state.borrow().finished_lane
    }

    pub fn commit_count(&self) -> u64 {
        self.inner.state.borrow().commit_count
    }

    pub fn take_errors(&self) -> Vec<RootError> {
        std::mem::take(&mut self.inner.state.borrow_mut().errors)
    }

    pub fn with_host<R>(&self, f: impl FnOnce(&H) -> R) -> R {
        f(&self.inner.state.borrow().host)
    }

    pub fn with_host_mut<R>(&self, f: impl FnOnce(&mut H) -> R) -> R {
        let result = f(&mut self.inner.state.borrow_mut().host);
        self.inner.drain_incoming();
        result
    }

    /// Read access to the committed fiber tree.
    pub fn inspect<R>(&self, f: impl FnOnce(&FiberArena<H::Handle>, FiberId) -> R) -> R {
        let state = self.inner.state.borrow();
        f(&state.arena, state.current)
    }

    pub fn dump_fibers(&self) -> String {
        self.inspect(|arena, current| arena.dump_tree(current))
    }
}

impl<H: HostConfig + 'static> fmt::Debug for Root<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.state.try_borrow() {
            Ok(state) => f
                .debug_struct("Root")
                .field("container", &state.container)
                .field("pending_lanes", &state.pending_lanes)
                .field("callback_priority", &state.callback_priority)
                .field("rendering", &state.session.is_some())
                .finish(),
            Err(_) => f.write_str("Root { <busy> }"),
        }
    }
}

impl<H: HostConfig + 'static> UpdateScheduler for RootInner<H> {
    fn request_update_lane(&self) -> Lane {
        request_update_lane(&self.config.lane_table)
    }

    fn schedule_update(&self, lane: Lane) {
        self.incoming_lanes.set(self.incoming_lanes.get() | lane);
        match self.state.try_borrow_mut() {
            Ok(mut state) => {
                self.absorb_incoming(&mut state);
                self.ensure_root_scheduled(&mut state);
            }
            Err(_) => log::trace!("root busy; {lane:?} merged after the current pass"),
        }
    }
}

impl<H: HostConfig + 'static> RootInner<H> {
    fn absorb_incoming(&self, state: &mut FiberRoot<H>) {
        let lanes = self.incoming_lanes.take();
        if lanes.is_empty() {
            return;
        }
        state.pending_lanes |= lanes;
        if let Some(session) = state.session.as_mut() {
            session.interleaved_lanes |= lanes;
        }
    }

    fn drain_incoming(&self) {
        if let Ok(mut state) = self.state.try_borrow_mut() {
            self.absorb_incoming(&mut state);
            self.ensure_root_scheduled(&mut state);
        }
    }

    fn ensure_root_scheduled(&self, state: &mut FiberRoot<H>) {
        let next = highest_priority_lane(state.pending_lanes);
        if next.is_empty() {
            if let Some(task) = state.callback_node.take() {
                self.scheduler.cancel_callback(task);
            }
            state.callback_priority = NO_LANE;
            return;
        }
        if next == state.callback_priority {
            return;
        }
        if let Some(task) = state.callback_node.take() {
            log::debug!("{next:?} preempts the render task for {:?}", state.callback_priority);
            self.scheduler.cancel_callback(task);
        }
        state.callback_priority = next;

        if next == Lanes::SYNC {
            log::debug!("scheduling sync render");
            self.schedule_sync_flush();
            return;
        }
        let priority = self.config.lane_table.priority_for(next);
        let this = self.this.clone();
        let task = self.scheduler.schedule_callback(
            priority,
            Box::new(move |did_timeout| match this.upgrade() {
                Some(root) => root.perform_concurrent_work_on_root(did_timeout),
                None => TaskOutcome::Complete,
            }),
        );
        log::debug!("scheduled render of {next:?} at {priority:?} as {task:?}");
        state.callback_node = Some(task);
    }

    fn schedule_sync_flush(&self) {
        if self.sync_flush_scheduled.replace(true) {
            return;
        }
        let this = self.this.clone();
        self.scheduler.schedule_microtask(Box::new(move || {
            if let Some(root) = this.upgrade() {
                root.sync_flush_scheduled.set(false);
                root.perform_sync_work_on_root();
            }
        }));
    }

    fn perform_sync_work_on_root(&self) {
        self.flush_passive_effects();
        let Ok(mut state) = self.state.try_borrow_mut() else {
            log::warn!("sync render requested while the root is busy");
            return;
        };
        if state.callback_priority == Lanes::SYNC {
            state.callback_priority = NO_LANE;
        }
        self.absorb_incoming(&mut state);

        let lane = highest_priority_lane(state.pending_lanes);
        if lane == Lanes::SYNC {
            match self.render_root(&mut state, lane, None) {
                RenderStatus::Complete => self.commit_root(&mut state),
                RenderStatus::Yielded => {}
                RenderStatus::Failed { error, attempts } => {
                    self.report_render_failure(&mut state, lane, error, attempts)
                }
            }
        }
        self.absorb_incoming(&mut state);
        self.ensure_root_scheduled(&mut state);
    }

    fn perform_concurrent_work_on_root(&self, did_timeout: bool) -> TaskOutcome {
        let Ok(original) = self.state.try_borrow().map(|state| state.callback_node) else {
            return TaskOutcome::Complete;
        };
        let flushed = self.flush_passive_effects();
        let Ok(mut state) = self.state.try_borrow_mut() else {
            return TaskOutcome::Complete;
        };
        self.absorb_incoming(&mut state);
        if flushed && state.callback_node != original {
            // Effects scheduled more urgent work, which replaced this task.
            return TaskOutcome::Complete;
        }

        let lane = highest_priority_lane(state.pending_lanes);
        if lane.is_empty() {
            state.callback_node = None;
            state.callback_priority = NO_LANE;
            return TaskOutcome::Complete;
        }

        let scheduler = self.scheduler.clone();
        let should_yield = move || scheduler.should_yield();
        let time_slice = !did_timeout && lane != Lanes::SYNC;
        let status = self.render_root(
            &mut state,
            lane,
            if time_slice { Some(&should_yield) } else { None },
        );
        match status {
            RenderStatus::Yielded => {
                self.absorb_incoming(&mut state);
                self.ensure_root_scheduled(&mut state);
                if state.callback_node.is_some() && state.callback_node == original {
                    return TaskOutcome::Continue;
                }
                return TaskOutcome::Complete;
            }
            RenderStatus::Complete => self.commit_root(&mut state),
            RenderStatus::Failed { error, attempts } => {
                self.report_render_failure(&mut state, lane, error, attempts)
            }
        }
        self.absorb_incoming(&mut state);
        self.ensure_root_scheduled(&mut state);
        TaskOutcome::Complete
    }

    fn fresh_session(&self, state: &mut FiberRoot<H>, lane: Lane) -> RenderSession {
        log::debug!("starting render of {lane:?}");
        let root_wip = create_work_in_progress(&mut state.arena, state.current, Props::default());
        RenderSession::new(root_wip, lane)
    }

    fn render_root(
        &self,
        state: &mut FiberRoot<H>,
        lane: Lane,
        should_yield: Option<&dyn Fn() -> bool>,
    ) -> RenderStatus {
        let mut session = match state.session.take() {
            Some(session) if session.render_lane == lane => session,
            stale => {
                if let Some(stale) = stale {
                    log::debug!(
                        "discarding in-progress render of {:?} for {lane:?}",
                        stale.render_lane
                    );
                    state.discard_render();
                }
                self.fresh_session(state, lane)
            }
        };

        loop {
            let result = {
                let mut cx = RenderContext {
                    arena: &mut state.arena,
                    host: &mut state.host,
                    render_lanes: lane,
                    updater: &self.updater,
                };
                match should_yield {
                    Some(should_yield) => work_loop_concurrent(&mut cx, &mut session, should_yield),
                    None => work_loop_sync(&mut cx, &mut session),
                }
            };
            match result {
                Ok(()) => {
                    let complete = session.is_complete();
                    state.session = Some(session);
                    return if complete {
                        RenderStatus::Complete
                    } else {
                        RenderStatus::Yielded
                    };
                }
                Err(error) => {
                    state.discard_render();
                    let attempts = session.attempts + 1;
                    if error.is_contract_violation() || attempts > self.config.max_render_retries {
                        return RenderStatus::Failed { error, attempts };
                    }
                    log::warn!("render of {lane:?} failed ({error}); retrying from the root");
                    let interleaved = session.interleaved_lanes;
                    session = self.fresh_session(state, lane);
                    session.attempts = attempts;
                    session.interleaved_lanes = interleaved;
                }
            }
        }
    }

    fn report_render_failure(
        &self,
        state: &mut FiberRoot<H>,
        lane: Lane,
        error: RenderError,
        attempts: u32,
    ) {
        log::error!("render of {lane:?} failed after {attempts} attempts: {error}");
        state.pending_lanes.remove(lane);
        state.callback_node = None;
        state.callback_priority = NO_LANE;
        state.errors.push(RootError::RenderFailed {
            lane,
            attempts,
            source: error,
        });
    }

    fn commit_root(&self, state: &mut FiberRoot<H>) {
        // Updates dispatched by the render that just finished.
        self.absorb_incoming(state);
        let Some(session) = state.session.take() else {
            return;
        };
        let finished = session.root_wip;
        let lane = session.render_lane;
        log::debug!("committing {lane:?}");
        state.finished_work = Some(finished);
        state.finished_lane = lane;
        state.callback_node = None;
        state.callback_priority = NO_LANE;
        let mut remaining = state.pending_lanes.difference(lane) | session.interleaved_lanes;
        let needs_passive_flush = has_passive_work(&state.arena, finished);

        let mutation = {
            let mut cx = CommitContext::new(
                &mut state.arena,
                &mut state.host,
                &mut state.pending_passive_effects,
            );
            commit_mutation_effects(&mut cx, finished).map(|()| cx.deleted)
        };
        let deleted = match mutation {
            Ok(deleted) => deleted,
            Err(error) => {
                // The host tree was restored; the committed tree stays current.
                log::error!("commit of {lane:?} failed: {error}");
                state.discard_render();
                state.finished_work = None;
                state.pending_lanes = remaining.difference(lane);
                state.errors.push(RootError::CommitFailed {
                    lane,
                    source: error,
                });
                return;
            }
        };

        if needs_passive_flush && state.passive_flush_task.is_none() {
            let this = self.this.clone();
            let task = self.scheduler.schedule_callback(
                Priority::Normal,
                Box::new(move |_| {
                    if let Some(root) = this.upgrade() {
                        root.flush_passive_effects();
                    }
                    TaskOutcome::Complete
                }),
            );
            state.passive_flush_task = Some(task);
        }

        state.arena.commit_allocations();
        state.current = finished;
        state.finished_work = None;
        state.commit_count += 1;

        let layout = {
            let mut cx = CommitContext::new(
                &mut state.arena,
                &mut state.host,
                &mut state.pending_passive_effects,
            );
            commit_layout_effects(&mut cx, finished)
        };
        if let Err(error) = layout {
            log::error!("layout pass of {lane:?} failed: {error}");
        }

        for fiber in deleted {
            state.release_deleted(fiber);
        }

        if remaining.contains(lane) {
            state.nested_update_count += 1;
            if state.nested_update_count > self.config.nested_update_limit {
                log::error!(
                    "{lane:?} re-scheduled itself for more than {} consecutive commits",
                    self.config.nested_update_limit
                );
                remaining.remove(lane);
                state.nested_update_count = 0;
                state.errors.push(RootError::UpdateDepthExceeded {
                    lane,
                    limit: self.config.nested_update_limit,
                });
            }
        } else {
            state.nested_update_count = 0;
        }
        state.pending_lanes = remaining;
    }

    fn flush_passive_effects(&self) -> bool {
        let pending = {
            let Ok(mut state) = self.state.try_borrow_mut() else {
                return false;
            };
            if let Some(task) = state.passive_flush_task.take() {
                self.scheduler.cancel_callback(task);
            }
            std::mem::take(&mut state.pending_passive_effects)
        };
        if pending.is_empty() {
            return false;
        }
        flush_passive_effects(pending);
        self.drain_incoming();
        true
    }
}

#[cfg(test)]
#[path = "tests/root_tests.rs"]
mod tests;
