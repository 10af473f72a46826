//! Priority lanes and the ambient update priority.
//!
//! A lane is a single bit; a set of pending priorities is the OR of their
//! bits. Lower bits are more urgent, so the most urgent pending lane is the
//! lowest set bit.

use std::cell::{Cell, RefCell};

use bitflags::bitflags;

use crate::platform::Priority;

bitflags! {
    /// A set of lanes. A value with exactly one bit set is used as a [`Lane`].
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Lanes: u32 {
        const SYNC = 0b0_0001;
        const INPUT_CONTINUOUS = 0b0_0010;
        const DEFAULT = 0b0_0100;
        const TRANSITION = 0b0_1000;
        const IDLE = 0b1_0000;
    }
}

/// A single priority bit.
pub type Lane = Lanes;

pub const NO_LANE: Lane = Lanes::empty();
pub const NO_LANES: Lanes = Lanes::empty();

/// Returns the most urgent lane contained in `lanes`, or [`NO_LANE`].
pub fn highest_priority_lane(lanes: Lanes) -> Lane {
    let bits = lanes.bits();
    Lanes::from_bits_retain(bits & bits.wrapping_neg())
}

/// True when every bit of `subset` is also in `set`. The empty lane is a
/// subset of everything.
pub fn is_subset_of_lanes(set: Lanes, subset: Lanes) -> bool {
    set.contains(subset)
}

/// Maps external scheduler priorities to lanes and back.
///
/// Several priorities may share a lane. The default table collapses
/// [`Priority::Low`] and [`Priority::Idle`] onto [`Lanes::IDLE`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LanePriorityTable {
    pub immediate: Lane,
    pub user_blocking: Lane,
    pub normal: Lane,
    pub low: Lane,
    pub idle: Lane,
}

impl Default for LanePriorityTable {
    fn default() -> Self {
        Self {
            immediate: Lanes::SYNC,
            user_blocking: Lanes::INPUT_CONTINUOUS,
            normal: Lanes::DEFAULT,
            low: Lanes::IDLE,
            idle: Lanes::IDLE,
        }
    }
}

impl LanePriorityTable {
    pub fn lane_for(&self, priority: Priority) -> Lane {
        match priority {
            Priority::Immediate => self.immediate,
            Priority::UserBlocking => self.user_blocking,
            Priority::Normal => self.normal,
            Priority::Low => self.low,
            Priority::Idle => self.idle,
        }
    }

    /// Scheduler priority used to run render work for `lane`.
    ///
    /// The first table entry (most urgent first) that maps onto `lane` wins.
    /// Transitions are not reachable from a priority and run at normal
    /// priority.
    pub fn priority_for(&self, lane: Lane) -> Priority {
        let entries = [
            (Priority::Immediate, self.immediate),
            (Priority::UserBlocking, self.user_blocking),
            (Priority::Normal, self.normal),
            (Priority::Low, self.low),
            (Priority::Idle, self.idle),
        ];
        entries
            .into_iter()
            .find(|(_, mapped)| *mapped == lane)
            .map(|(priority, _)| priority)
            .unwrap_or(Priority::Normal)
    }
}

thread_local! {
    static PRIORITY_STACK: RefCell<Vec<Priority>> = const { RefCell::new(Vec::new()) };
    static TRANSITION_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Pops the ambient priority stack on drop.
#[must_use = "PriorityScopeGuard pops the ambient priority on drop"]
pub struct PriorityScopeGuard;

impl Drop for PriorityScopeGuard {
    fn drop(&mut self) {
        PRIORITY_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Pushes `priority` as the ambient update priority until the guard drops.
pub fn enter_priority(priority: Priority) -> PriorityScopeGuard {
    PRIORITY_STACK.with(|stack| stack.borrow_mut().push(priority));
    PriorityScopeGuard
}

/// Runs `f` with `priority` as the ambient update priority.
pub fn run_with_priority<R>(priority: Priority, f: impl FnOnce() -> R) -> R {
    let _guard = enter_priority(priority);
    f()
}

/// The innermost ambient priority, or [`Priority::Normal`] outside any scope.
pub fn current_priority() -> Priority {
    PRIORITY_STACK.with(|stack| stack.borrow().last().copied().unwrap_or(Priority::Normal))
}

struct TransitionGuard;

impl Drop for TransitionGuard {
    fn drop(&mut self) {
        TRANSITION_DEPTH.with(|depth| depth.set(depth.get() - 1));
    }
}

/// Runs `f` so that every update it dispatches lands in [`Lanes::TRANSITION`].
pub fn start_transition<R>(f: impl FnOnce() -> R) -> R {
    TRANSITION_DEPTH.with(|depth| depth.set(depth.get() + 1));
    let _guard = TransitionGuard;
    f()
}

pub fn is_inside_transition() -> bool {
    TRANSITION_DEPTH.with(|depth| depth.get() > 0)
}

/// Picks the lane for an update dispatched right now.
pub fn request_update_lane(table: &LanePriorityTable) -> Lane {
    if is_inside_transition() {
        return Lanes::TRANSITION;
    }
    table.lane_for(current_priority())
}

/// Priority under which listeners for `event_type` run.
pub fn event_priority(event_type: &str) -> Priority {
    match event_type {
        "click" | "dblclick" | "keydown" | "keyup" | "keypress" | "input" | "change"
        | "submit" | "focus" | "blur" | "pointerdown" | "pointerup" | "mousedown"
        | "mouseup" | "touchstart" | "touchend" => Priority::Immediate,
        "scroll" | "wheel" | "mousemove" | "pointermove" | "touchmove" | "drag"
        | "dragover" | "mouseenter" | "mouseleave" => Priority::UserBlocking,
        _ => Priority::Normal,
    }
}

#[cfg(test)]
#[path = "tests/lane_tests.rs"]
mod tests;
