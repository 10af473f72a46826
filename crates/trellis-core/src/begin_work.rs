use crate::child_reconciler::{MOUNT, RECONCILE};
use crate::element::{Element, Props};
use crate::fiber::{FiberId, FiberTag, FiberType, MemoizedState};
use crate::hooks::Hooks;
use crate::host::HostConfig;
use crate::work_loop::RenderContext;
use crate::RenderError;

/// Descend step: produces the first child of `wip`.
pub(crate) fn begin_work<H: HostConfig>(
    cx: &mut RenderContext<'_, H>,
    wip: FiberId,
) -> Result<Option<FiberId>, RenderError> {
    match cx.arena[wip].tag {
        FiberTag::HostRoot => update_host_root(cx, wip),
        FiberTag::HostComponent | FiberTag::Fragment => {
            let children = cx.arena[wip].pending_props.children().clone();
            Ok(reconcile_children(cx, wip, &children))
        }
        FiberTag::HostText => Ok(None),
        FiberTag::FunctionComponent => update_function_component(cx, wip),
    }
}

fn update_host_root<H: HostConfig>(
    cx: &mut RenderContext<'_, H>,
    wip: FiberId,
) -> Result<Option<FiberId>, RenderError> {
    let lanes = cx.render_lanes;
    let (fiber, current) = cx.arena.pair_mut(wip);
    let next = match current.map(|current| &mut current.memoized_state) {
        Some(MemoizedState::Root(cell)) => {
            cell.merge_pending();
            Some(cell.process(lanes).0)
        }
        _ => None,
    };
    if let Some(cell) = next {
        fiber.memoized_state = MemoizedState::Root(cell);
    }
    let element = match &fiber.memoized_state {
        MemoizedState::Root(cell) => cell
            .memoized_state
            .downcast_ref::<Element>()
            .cloned()
            .unwrap_or_default(),
        _ => Element::Empty,
    };
    Ok(reconcile_children(cx, wip, &element))
}

fn update_function_component<H: HostConfig>(
    cx: &mut RenderContext<'_, H>,
    wip: FiberId,
) -> Result<Option<FiberId>, RenderError> {
    let children = render_with_hooks(cx, wip)?;
    Ok(reconcile_children(cx, wip, &children))
}

/// Runs a component body against its slot chain and stores the new chain
/// and effect list on `wip`.
pub(crate) fn render_with_hooks<H: HostConfig>(
    cx: &mut RenderContext<'_, H>,
    wip: FiberId,
) -> Result<Element, RenderError> {
    let FiberType::Component(component) = cx.arena[wip].ty.clone() else {
        return Ok(Element::Empty);
    };
    let props: Props = cx.arena[wip].pending_props.clone();
    let lanes = cx.render_lanes;
    let updater = cx.updater;

    let (fiber, current) = cx.arena.pair_mut(wip);
    let previous = current.and_then(|current| match &mut current.memoized_state {
        MemoizedState::Hooks(slots) => Some(slots),
        _ => None,
    });
    let mut hooks = Hooks::new(component.name(), previous, lanes, updater);
    let children = component.render(&mut hooks, &props)?;
    let output = hooks.finish()?;

    fiber.memoized_state = MemoizedState::Hooks(output.slots);
    fiber.update_queue = output.effects;
    fiber.flags |= output.flags;
    Ok(children)
}

fn reconcile_children<H: HostConfig>(
    cx: &mut RenderContext<'_, H>,
    wip: FiberId,
    children: &Element,
) -> Option<FiberId> {
    let child = match cx.arena.alternate_of(wip) {
        Some(current) => {
            let current_child = cx.arena[current].child;
            RECONCILE.reconcile(cx.arena, wip, current_child, children)
        }
        None => MOUNT.reconcile(cx.arena, wip, None, children),
    };
    cx.arena[wip].child = child;
    child
}
