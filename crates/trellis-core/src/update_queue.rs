//! Lane-aware state update queues.
//!
//! Every state slot (and the root, whose state is the element to render)
//! owns a [`StateCell`]. Dispatch appends to the cell's shared pending queue.
//! Rendering moves pending updates into the committed generation's base
//! queue and folds the base queue for the render lanes; updates outside
//! those lanes are kept for a later pass.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::lane::{is_subset_of_lanes, Lane, Lanes, NO_LANE, NO_LANES};

/// Type-erased state value.
pub type StateValue = Rc<dyn Any>;

#[derive(Clone)]
pub enum Action {
    /// Replace the state with a value.
    Replace(StateValue),
    /// Compute the next state from the previous one. Must be pure: it runs
    /// again whenever the update is rebased.
    Reduce(Rc<dyn Fn(&StateValue) -> StateValue>),
}

impl Action {
    fn apply(&self, previous: &StateValue) -> StateValue {
        match self {
            Action::Replace(value) => value.clone(),
            Action::Reduce(reduce) => reduce(previous),
        }
    }
}

#[derive(Clone)]
pub struct Update {
    pub action: Action,
    pub lane: Lane,
}

impl fmt::Debug for Update {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.action {
            Action::Replace(_) => "Replace",
            Action::Reduce(_) => "Reduce",
        };
        f.debug_struct("Update")
            .field("action", &kind)
            .field("lane", &self.lane)
            .finish()
    }
}

/// Updates dispatched but not yet seen by a render, oldest first.
#[derive(Default)]
pub struct UpdateQueue {
    pending: Vec<Update>,
    unmounted: bool,
}

impl UpdateQueue {
    pub fn enqueue(&mut self, update: Update) {
        self.pending.push(update);
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_unmounted(&self) -> bool {
        self.unmounted
    }

    pub(crate) fn mark_unmounted(&mut self) {
        self.unmounted = true;
        self.pending.clear();
    }

    fn take_pending(&mut self) -> Vec<Update> {
        std::mem::take(&mut self.pending)
    }
}

pub type SharedQueue = Rc<RefCell<UpdateQueue>>;

/// Per-generation state of one slot.
#[derive(Clone)]
pub struct StateCell {
    pub memoized_state: StateValue,
    pub base_state: StateValue,
    pub base_queue: Vec<Update>,
    pub queue: SharedQueue,
}

impl StateCell {
    pub fn new(initial: StateValue) -> Self {
        Self::with_queue(initial, SharedQueue::default())
    }

    pub fn with_queue(initial: StateValue, queue: SharedQueue) -> Self {
        Self {
            memoized_state: initial.clone(),
            base_state: initial,
            base_queue: Vec::new(),
            queue,
        }
    }

    /// Moves dispatched updates behind the base queue. Called on the committed
    /// generation so a discarded render cannot lose them.
    pub fn merge_pending(&mut self) {
        let pending = self.queue.borrow_mut().take_pending();
        self.base_queue.extend(pending);
    }

    /// Folds the base queue for `render_lanes` into the next generation's cell.
    pub fn process(&self, render_lanes: Lanes) -> (StateCell, Lanes) {
        let result = process_update_queue(&self.base_state, &self.base_queue, render_lanes);
        let cell = StateCell {
            memoized_state: result.memoized_state,
            base_state: result.base_state,
            base_queue: result.base_queue,
            queue: self.queue.clone(),
        };
        (cell, result.skipped_lanes)
    }
}

impl fmt::Debug for StateCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateCell")
            .field("base_queue", &self.base_queue)
            .field("pending", &self.queue.borrow().pending_len())
            .finish()
    }
}

pub struct FoldResult {
    pub memoized_state: StateValue,
    pub base_state: StateValue,
    pub base_queue: Vec<Update>,
    pub skipped_lanes: Lanes,
}

/// Applies every update in `base_queue` whose lane is inside `render_lanes`.
///
/// The first skipped update freezes the new base state at the running state
/// before it. From then on every update is kept in the new base queue:
/// skipped ones with their lane, applied ones with [`NO_LANE`] so they run
/// again on top of the frozen base state when the skipped lane renders.
pub fn process_update_queue(
    base_state: &StateValue,
    base_queue: &[Update],
    render_lanes: Lanes,
) -> FoldResult {
    let mut state = base_state.clone();
    let mut new_base_state: Option<StateValue> = None;
    let mut new_base_queue = Vec::new();
    let mut skipped_lanes = NO_LANES;

    for update in base_queue {
        if !is_subset_of_lanes(render_lanes, update.lane) {
            if new_base_queue.is_empty() {
                new_base_state = Some(state.clone());
            }
            new_base_queue.push(update.clone());
            skipped_lanes |= update.lane;
            continue;
        }
        if !new_base_queue.is_empty() {
            new_base_queue.push(Update {
                action: update.action.clone(),
                lane: NO_LANE,
            });
        }
        state = update.action.apply(&state);
    }

    FoldResult {
        base_state: new_base_state.unwrap_or_else(|| state.clone()),
        memoized_state: state,
        base_queue: new_base_queue,
        skipped_lanes,
    }
}

#[cfg(test)]
#[path = "tests/update_queue_tests.rs"]
mod tests;
