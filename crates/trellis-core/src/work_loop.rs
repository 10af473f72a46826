//! Resumable depth-first traversal of the work-in-progress tree.
//!
//! The cursor descends with `begin_work` until a fiber has no child, then
//! ascends with `complete_work` until it finds a sibling. The cursor lives
//! in a [`RenderSession`], so a sliced render can stop between any two
//! fibers and pick up where it left off.

use std::rc::Weak;

use crate::begin_work::begin_work;
use crate::complete_work::complete_work;
use crate::fiber::{FiberArena, FiberId};
use crate::hooks::UpdateScheduler;
use crate::host::HostConfig;
use crate::lane::{Lane, Lanes};
use crate::RenderError;

/// Everything one unit of work needs.
pub(crate) struct RenderContext<'a, H: HostConfig> {
    pub arena: &'a mut FiberArena<H::Handle>,
    pub host: &'a mut H,
    pub render_lanes: Lanes,
    pub updater: &'a Weak<dyn UpdateScheduler>,
}

/// State of one render of one lane. Created when the render starts and
/// dropped at commit or when the render is abandoned.
#[derive(Debug)]
pub(crate) struct RenderSession {
    pub root_wip: FiberId,
    pub work_in_progress: Option<FiberId>,
    pub render_lane: Lane,
    /// Failed attempts so far.
    pub attempts: u32,
    /// Lanes dispatched while this render was in flight.
    pub interleaved_lanes: Lanes,
}

impl RenderSession {
    pub fn new(root_wip: FiberId, render_lane: Lane) -> Self {
        Self {
            root_wip,
            work_in_progress: Some(root_wip),
            render_lane,
            attempts: 0,
            interleaved_lanes: Lanes::empty(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.work_in_progress.is_none()
    }
}

fn perform_unit_of_work<H: HostConfig>(
    cx: &mut RenderContext<'_, H>,
    unit: FiberId,
) -> Result<Option<FiberId>, RenderError> {
    log::trace!("begin {:?} {:?}", unit, cx.arena[unit].ty);
    let next = begin_work(cx, unit)?;
    let fiber = &mut cx.arena[unit];
    fiber.memoized_props = fiber.pending_props.clone();
    match next {
        Some(child) => Ok(Some(child)),
        None => complete_unit_of_work(cx, unit),
    }
}

fn complete_unit_of_work<H: HostConfig>(
    cx: &mut RenderContext<'_, H>,
    unit: FiberId,
) -> Result<Option<FiberId>, RenderError> {
    let mut node = unit;
    loop {
        complete_work(cx, node)?;
        let fiber = &cx.arena[node];
        if let Some(sibling) = fiber.sibling {
            return Ok(Some(sibling));
        }
        match fiber.parent {
            Some(parent) => node = parent,
            None => return Ok(None),
        }
    }
}

/// Runs until the tree is exhausted.
pub(crate) fn work_loop_sync<H: HostConfig>(
    cx: &mut RenderContext<'_, H>,
    session: &mut RenderSession,
) -> Result<(), RenderError> {
    while let Some(unit) = session.work_in_progress {
        session.work_in_progress = perform_unit_of_work(cx, unit)?;
    }
    Ok(())
}

/// Runs until the tree is exhausted or `should_yield` asks to stop. The
/// cursor stays in `session` either way.
pub(crate) fn work_loop_concurrent<H: HostConfig>(
    cx: &mut RenderContext<'_, H>,
    session: &mut RenderSession,
    should_yield: &dyn Fn() -> bool,
) -> Result<(), RenderError> {
    while let Some(unit) = session.work_in_progress {
        if should_yield() {
            log::trace!("yielding before {unit:?}");
            break;
        }
        session.work_in_progress = perform_unit_of_work(cx, unit)?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/work_loop_tests.rs"]
mod tests;
