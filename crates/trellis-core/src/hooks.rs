//! Per-component state slots.
//!
//! A component body receives a [`Hooks`] cursor and calls its `use_*`
//! methods in the same order on every render. On mount each call allocates a
//! slot; on update it consumes the slot at the same ordinal from the
//! committed generation. Breaking the order aborts the render.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::rc::{Rc, Weak};

use bitflags::bitflags;
use smallvec::SmallVec;

use crate::fiber::Flags;
use crate::lane::{start_transition, Lane, Lanes};
use crate::update_queue::{Action, SharedQueue, StateCell, StateValue, Update};
use crate::RenderError;

bitflags! {
    /// Tags of an effect record.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
    pub struct HookFlags: u8 {
        /// The effect must fire in the coming passive flush.
        const HAS_EFFECT = 1;
        const PASSIVE = 1 << 3;
    }
}

/// Cleanup returned by an effect setup.
pub type Cleanup = Box<dyn FnOnce()>;
type Setup = Box<dyn FnOnce() -> Option<Cleanup>>;

/// Cleanup of the last setup that ran. Shared by every generation of the
/// same effect so a skipped effect carries it forward untouched.
pub(crate) type CleanupSlot = Rc<RefCell<Option<Cleanup>>>;

pub type EffectRef = Rc<RefCell<Effect>>;

pub struct Effect {
    pub(crate) tags: HookFlags,
    pub(crate) create: Option<Setup>,
    pub(crate) destroy: CleanupSlot,
    pub(crate) deps: Option<Deps>,
}

impl Effect {
    pub fn tags(&self) -> HookFlags {
        self.tags
    }

    pub(crate) fn take_cleanup(&self) -> Option<Cleanup> {
        self.destroy.borrow_mut().take()
    }

    /// Stops a pending setup from running, e.g. because the component was
    /// deleted before the passive flush.
    pub(crate) fn cancel(&mut self) {
        self.tags.remove(HookFlags::HAS_EFFECT);
        self.create = None;
    }
}

/// Runs the cleanup of the last setup, if any.
pub(crate) fn run_cleanup(effect: &EffectRef) {
    let cleanup = effect.borrow().take_cleanup();
    if let Some(cleanup) = cleanup {
        cleanup();
    }
}

/// Runs the pending setup and stores its cleanup.
pub(crate) fn run_setup(effect: &EffectRef) {
    let (create, destroy) = {
        let mut effect = effect.borrow_mut();
        (effect.create.take(), effect.destroy.clone())
    };
    if let Some(create) = create {
        let cleanup = create();
        *destroy.borrow_mut() = cleanup;
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("tags", &self.tags)
            .field("deps", &self.deps.as_ref().map(Deps::len))
            .finish()
    }
}

/// A value an effect depends on.
pub trait Dependency: Any {
    fn dep_eq(&self, other: &dyn Dependency) -> bool;
    fn as_any(&self) -> &dyn Any;
}

impl<T: PartialEq + 'static> Dependency for T {
    fn dep_eq(&self, other: &dyn Dependency) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| other == self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Dependency list of an effect. Build with [`deps!`](crate::deps).
#[derive(Clone, Default)]
pub struct Deps(SmallVec<[Rc<dyn Dependency>; 4]>);

impl Deps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<T: PartialEq + 'static>(mut self, value: T) -> Self {
        self.0.push(Rc::new(value));
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[macro_export]
macro_rules! deps {
    () => {
        $crate::Deps::new()
    };
    ($($dep:expr),+ $(,)?) => {
        $crate::Deps::new()$(.with($dep))+
    };
}

/// Pairwise comparison, stopping at the first difference. A missing list on
/// either side never matches.
pub fn are_hook_inputs_equal(next: Option<&Deps>, previous: Option<&Deps>) -> bool {
    let (Some(next), Some(previous)) = (next, previous) else {
        return false;
    };
    if next.len() != previous.len() {
        log::warn!(
            "effect dependency list changed length from {} to {}",
            previous.len(),
            next.len()
        );
        return false;
    }
    next.0
        .iter()
        .zip(previous.0.iter())
        .all(|(a, b)| a.dep_eq(&**b))
}

#[derive(Clone)]
pub enum HookSlot {
    State(StateCell),
    Effect(EffectRef),
    Ref(Rc<dyn Any>),
}

impl HookSlot {
    pub fn kind_name(&self) -> &'static str {
        match self {
            HookSlot::State(_) => "state",
            HookSlot::Effect(_) => "effect",
            HookSlot::Ref(_) => "ref",
        }
    }
}

impl fmt::Debug for HookSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookSlot::State(cell) => f.debug_tuple("State").field(cell).finish(),
            HookSlot::Effect(effect) => f.debug_tuple("Effect").field(&effect.borrow()).finish(),
            HookSlot::Ref(_) => f.write_str("Ref"),
        }
    }
}

/// Receives updates dispatched from state slots.
pub(crate) trait UpdateScheduler {
    fn request_update_lane(&self) -> Lane;
    fn schedule_update(&self, lane: Lane);
}

/// Render-time cursor over a component's slots.
pub struct Hooks<'a> {
    component: &'static str,
    previous: Option<&'a mut Vec<HookSlot>>,
    slots: Vec<HookSlot>,
    cursor: usize,
    effects: Vec<EffectRef>,
    flags: Flags,
    render_lanes: Lanes,
    updater: &'a Weak<dyn UpdateScheduler>,
}

#[derive(Debug)]
pub(crate) struct HooksOutput {
    pub slots: Vec<HookSlot>,
    pub effects: Vec<EffectRef>,
    pub flags: Flags,
}

fn previous_slot<'p>(
    previous: &'p mut Option<&mut Vec<HookSlot>>,
    component: &'static str,
    index: usize,
) -> Result<Option<&'p mut HookSlot>, RenderError> {
    let Some(previous) = previous.as_deref_mut() else {
        return Ok(None);
    };
    let expected = previous.len();
    match previous.get_mut(index) {
        Some(slot) => Ok(Some(slot)),
        None => Err(RenderError::HookCountMismatch {
            component,
            expected,
            found: index + 1,
        }),
    }
}

impl<'a> Hooks<'a> {
    pub(crate) fn new(
        component: &'static str,
        previous: Option<&'a mut Vec<HookSlot>>,
        render_lanes: Lanes,
        updater: &'a Weak<dyn UpdateScheduler>,
    ) -> Self {
        Self {
            component,
            previous,
            slots: Vec::new(),
            cursor: 0,
            effects: Vec::new(),
            flags: Flags::empty(),
            render_lanes,
            updater,
        }
    }

    pub fn is_mounting(&self) -> bool {
        self.previous.is_none()
    }

    fn advance(&mut self) -> usize {
        let index = self.cursor;
        self.cursor += 1;
        index
    }

    fn kind_mismatch(&self, index: usize, expected: &'static str, found: &'static str) -> RenderError {
        RenderError::HookKindMismatch {
            component: self.component,
            index,
            expected,
            found,
        }
    }

    /// Declares a state slot and returns its current value and a stable
    /// dispatcher.
    pub fn use_state<T: Clone + 'static>(
        &mut self,
        init: impl FnOnce() -> T,
    ) -> Result<(T, Dispatch<T>), RenderError> {
        let index = self.advance();
        let lanes = self.render_lanes;
        let cell = match previous_slot(&mut self.previous, self.component, index)? {
            None => StateCell::new(Rc::new(init())),
            Some(HookSlot::State(previous)) => {
                previous.merge_pending();
                previous.process(lanes).0
            }
            Some(other) => {
                let found = other.kind_name();
                return Err(self.kind_mismatch(index, "state", found));
            }
        };
        let value = cell
            .memoized_state
            .downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| self.kind_mismatch(index, std::any::type_name::<T>(), "state of another type"))?;
        let dispatch = Dispatch {
            queue: cell.queue.clone(),
            updater: self.updater.clone(),
            _marker: PhantomData,
        };
        self.slots.push(HookSlot::State(cell));
        Ok((value, dispatch))
    }

    /// State driven by a reducer. Actions are re-applied when a lower
    /// priority update is rebased, so the reducer must be pure.
    pub fn use_reducer<S, A>(
        &mut self,
        reducer: impl Fn(&S, A) -> S + 'static,
        init: impl FnOnce() -> S,
    ) -> Result<(S, ReducerDispatch<S, A>), RenderError>
    where
        S: Clone + 'static,
        A: Clone + 'static,
    {
        let (state, dispatch) = self.use_state(init)?;
        Ok((
            state,
            ReducerDispatch {
                dispatch,
                reducer: Rc::new(reducer),
            },
        ))
    }

    /// Registers a passive effect. `None` deps re-run it after every commit;
    /// otherwise it runs when any dependency changed.
    pub fn use_effect(
        &mut self,
        deps: Option<Deps>,
        create: impl FnOnce() -> Option<Cleanup> + 'static,
    ) -> Result<(), RenderError> {
        let index = self.advance();
        let (tags, destroy) = match previous_slot(&mut self.previous, self.component, index)? {
            None => (HookFlags::PASSIVE | HookFlags::HAS_EFFECT, CleanupSlot::default()),
            Some(HookSlot::Effect(previous)) => {
                let previous = previous.borrow();
                let tags = if are_hook_inputs_equal(deps.as_ref(), previous.deps.as_ref()) {
                    HookFlags::PASSIVE
                } else {
                    HookFlags::PASSIVE | HookFlags::HAS_EFFECT
                };
                (tags, previous.destroy.clone())
            }
            Some(other) => {
                let found = other.kind_name();
                return Err(self.kind_mismatch(index, "effect", found));
            }
        };
        if tags.contains(HookFlags::HAS_EFFECT) {
            self.flags |= Flags::PASSIVE;
        }
        let effect = Rc::new(RefCell::new(Effect {
            tags,
            create: Some(Box::new(create)),
            destroy,
            deps,
        }));
        self.effects.push(effect.clone());
        self.slots.push(HookSlot::Effect(effect));
        Ok(())
    }

    /// A mutable box that lives as long as the component.
    pub fn use_ref<T: 'static>(&mut self, init: impl FnOnce() -> T) -> Result<Rc<RefCell<T>>, RenderError> {
        let index = self.advance();
        let value = match previous_slot(&mut self.previous, self.component, index)? {
            None => Rc::new(RefCell::new(init())),
            Some(HookSlot::Ref(previous)) => {
                let previous = previous.clone();
                previous
                    .downcast::<RefCell<T>>()
                    .map_err(|_| self.kind_mismatch(index, std::any::type_name::<T>(), "ref of another type"))?
            }
            Some(other) => {
                let found = other.kind_name();
                return Err(self.kind_mismatch(index, "ref", found));
            }
        };
        self.slots.push(HookSlot::Ref(value.clone()));
        Ok(value)
    }

    /// Returns whether a transition started here is still rendering, and a
    /// handle that starts one.
    pub fn use_transition(&mut self) -> Result<(bool, Transition), RenderError> {
        let (is_pending, set_pending) = self.use_state(|| false)?;
        Ok((is_pending, Transition { set_pending }))
    }

    pub(crate) fn finish(self) -> Result<HooksOutput, RenderError> {
        if let Some(previous) = &self.previous {
            if self.cursor < previous.len() {
                return Err(RenderError::HookCountMismatch {
                    component: self.component,
                    expected: previous.len(),
                    found: self.cursor,
                });
            }
        }
        Ok(HooksOutput {
            slots: self.slots,
            effects: self.effects,
            flags: self.flags,
        })
    }
}

/// Stable handle that enqueues updates on one state slot.
///
/// Can be called at any time. The lane is picked from the ambient priority
/// when the update is dispatched.
pub struct Dispatch<T> {
    queue: SharedQueue,
    updater: Weak<dyn UpdateScheduler>,
    _marker: PhantomData<fn(T)>,
}

impl<T: 'static> Dispatch<T> {
    pub fn set(&self, value: T) {
        self.dispatch(Action::Replace(Rc::new(value)));
    }

    pub fn update(&self, f: impl Fn(&T) -> T + 'static) {
        self.dispatch(Action::Reduce(Rc::new(move |previous: &StateValue| {
            match previous.downcast_ref::<T>() {
                Some(value) => Rc::new(f(value)) as StateValue,
                None => previous.clone(),
            }
        })));
    }

    fn dispatch(&self, action: Action) {
        if self.queue.borrow().is_unmounted() {
            log::warn!("dropping a state update dispatched to an unmounted component");
            return;
        }
        let Some(updater) = self.updater.upgrade() else {
            log::warn!("dropping a state update dispatched after its root was dropped");
            return;
        };
        let lane = updater.request_update_lane();
        self.queue.borrow_mut().enqueue(Update { action, lane });
        updater.schedule_update(lane);
    }
}

impl<T> Clone for Dispatch<T> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            updater: self.updater.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> PartialEq for Dispatch<T> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.queue, &other.queue)
    }
}

impl<T> fmt::Debug for Dispatch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatch")
            .field("pending", &self.queue.borrow().pending_len())
            .finish()
    }
}

pub struct ReducerDispatch<S, A> {
    dispatch: Dispatch<S>,
    reducer: Rc<dyn Fn(&S, A) -> S>,
}

impl<S: 'static, A: Clone + 'static> ReducerDispatch<S, A> {
    pub fn dispatch(&self, action: A) {
        let reducer = self.reducer.clone();
        self.dispatch
            .update(move |state| reducer(state, action.clone()));
    }
}

impl<S, A> Clone for ReducerDispatch<S, A> {
    fn clone(&self) -> Self {
        Self {
            dispatch: self.dispatch.clone(),
            reducer: self.reducer.clone(),
        }
    }
}

impl<S, A> PartialEq for ReducerDispatch<S, A> {
    fn eq(&self, other: &Self) -> bool {
        self.dispatch == other.dispatch
    }
}

/// Starts transitions for the component that declared it.
#[derive(Clone, PartialEq, Debug)]
pub struct Transition {
    set_pending: Dispatch<bool>,
}

impl Transition {
    /// Flags the transition as pending at the ambient priority, then runs `f`
    /// with its updates routed to the transition lane.
    pub fn start(&self, f: impl FnOnce()) {
        self.set_pending.set(true);
        start_transition(|| {
            self.set_pending.set(false);
            f();
        });
    }
}

#[cfg(test)]
#[path = "tests/hooks_tests.rs"]
mod tests;
