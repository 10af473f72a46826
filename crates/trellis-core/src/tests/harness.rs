//! Drives render and commit passes by hand, without a root or scheduler.

use std::rc::{Rc, Weak};

use crate::commit_work::{
    commit_layout_effects, commit_mutation_effects, flush_passive_effects, CommitContext,
    PendingPassiveEffects,
};
use crate::element::{Element, Props};
use crate::fiber::{create_work_in_progress, Fiber, FiberArena, FiberId};
use crate::hooks::UpdateScheduler;
use crate::host::{HostConfig, HostId, MemoryHost};
use crate::lane::{Lane, Lanes};
use crate::update_queue::{Action, SharedQueue, StateCell, Update};
use crate::work_loop::{work_loop_concurrent, work_loop_sync, RenderContext, RenderSession};
use crate::{HostError, RenderError};

struct Detached;

impl UpdateScheduler for Detached {
    fn request_update_lane(&self) -> Lane {
        Lanes::DEFAULT
    }

    fn schedule_update(&self, _lane: Lane) {}
}

pub(crate) struct Harness {
    pub host: MemoryHost,
    pub container: HostId,
    pub arena: FiberArena<HostId>,
    pub current: FiberId,
    pub passive: PendingPassiveEffects,
    queue: SharedQueue,
    updater: Weak<dyn UpdateScheduler>,
}

impl Harness {
    pub fn new() -> Self {
        let mut host = MemoryHost::new();
        let container = host.create_container();
        let queue = SharedQueue::default();
        let mut arena = FiberArena::new();
        let state = StateCell::with_queue(Rc::new(Element::Empty), queue.clone());
        let current = arena.allocate(Fiber::host_root(container, state));
        arena.commit_allocations();
        Self {
            host,
            container,
            arena,
            current,
            passive: PendingPassiveEffects::default(),
            queue,
            updater: Weak::<Detached>::new(),
        }
    }

    pub fn set_element(&self, element: impl Into<Element>) {
        self.queue.borrow_mut().enqueue(Update {
            action: Action::Replace(Rc::new(element.into())),
            lane: Lanes::DEFAULT,
        });
    }

    pub fn start(&mut self) -> RenderSession {
        let root = create_work_in_progress(&mut self.arena, self.current, Props::default());
        RenderSession::new(root, Lanes::DEFAULT)
    }

    fn render_context(&mut self) -> RenderContext<'_, MemoryHost> {
        RenderContext {
            arena: &mut self.arena,
            host: &mut self.host,
            render_lanes: Lanes::DEFAULT,
            updater: &self.updater,
        }
    }

    pub fn render_sync(&mut self, session: &mut RenderSession) -> Result<(), RenderError> {
        work_loop_sync(&mut self.render_context(), session)
    }

    pub fn render_sliced(
        &mut self,
        session: &mut RenderSession,
        should_yield: &dyn Fn() -> bool,
    ) -> Result<(), RenderError> {
        work_loop_concurrent(&mut self.render_context(), session, should_yield)
    }

    /// Applies a finished render and returns the deleted subtree roots. A
    /// failed commit throws the render away, as a root does.
    pub fn commit(&mut self, session: RenderSession) -> Result<Vec<FiberId>, HostError> {
        let finished = session.root_wip;
        let mutation = {
            let mut cx = CommitContext::new(&mut self.arena, &mut self.host, &mut self.passive);
            commit_mutation_effects(&mut cx, finished).map(|()| cx.deleted)
        };
        let deleted = match mutation {
            Ok(deleted) => deleted,
            Err(error) => {
                for handle in self.arena.discard_allocations() {
                    self.host.destroy_instance(&handle);
                }
                return Err(error);
            }
        };
        self.arena.commit_allocations();
        self.current = finished;
        {
            let mut cx = CommitContext::new(&mut self.arena, &mut self.host, &mut self.passive);
            commit_layout_effects(&mut cx, finished)?;
        }
        for fiber in &deleted {
            for handle in self.arena.release_subtree(*fiber) {
                self.host.destroy_instance(&handle);
            }
        }
        Ok(deleted)
    }

    /// Renders and commits `element` in one go.
    pub fn show(&mut self, element: impl Into<Element>) {
        self.set_element(element);
        let mut session = self.start();
        self.render_sync(&mut session).expect("render");
        self.commit(session).expect("commit");
    }

    pub fn flush_passive(&mut self) {
        flush_passive_effects(std::mem::take(&mut self.passive));
    }

    pub fn markup(&self) -> String {
        self.host.render_to_string(self.container)
    }

    /// Host children of the container, in order.
    pub fn top_level(&self) -> Vec<HostId> {
        self.host.children(self.container).to_vec()
    }
}
