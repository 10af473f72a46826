use crate::fiber::{FiberId, FiberTag, FiberType, Flags};
use crate::host::HostConfig;
use crate::work_loop::RenderContext;
use crate::RenderError;

/// Ascend step: builds or diffs the host node of `wip` and bubbles flags.
pub(crate) fn complete_work<H: HostConfig>(
    cx: &mut RenderContext<'_, H>,
    wip: FiberId,
) -> Result<(), RenderError> {
    let current = cx.arena.alternate_of(wip);
    match cx.arena[wip].tag {
        FiberTag::HostComponent => {
            let existing = cx.arena[wip].state_node.clone();
            match (current, existing) {
                (Some(current), Some(handle)) => {
                    let old = &cx.arena[current].memoized_props;
                    let new = &cx.arena[wip].pending_props;
                    if cx.host.prepare_update(&handle, old, new) {
                        cx.arena[wip].flags |= Flags::UPDATE;
                    }
                    if cx.arena[current].node_ref != cx.arena[wip].node_ref {
                        cx.arena[wip].flags |= Flags::REF;
                    }
                }
                _ => {
                    let FiberType::Host(tag) = cx.arena[wip].ty.clone() else {
                        unreachable!("host component fiber without a host type");
                    };
                    let instance = cx.host.create_instance(&tag, &cx.arena[wip].pending_props)?;
                    // A discarded render releases host nodes through `state_node`.
                    cx.arena[wip].state_node = Some(instance.clone());
                    append_all_children(cx, &instance, wip)?;
                    let fiber = &mut cx.arena[wip];
                    if fiber.node_ref.is_some() {
                        fiber.flags |= Flags::REF;
                    }
                }
            }
        }
        FiberTag::HostText => {
            let text = cx.arena[wip]
                .pending_props
                .text_content()
                .cloned()
                .unwrap_or_default();
            match (current, cx.arena[wip].state_node.is_some()) {
                (Some(current), true) => {
                    let old = cx.arena[current].memoized_props.text_content();
                    if old != Some(&text) {
                        cx.arena[wip].flags |= Flags::UPDATE;
                    }
                }
                _ => {
                    let instance = cx.host.create_text_instance(&text)?;
                    cx.arena[wip].state_node = Some(instance);
                }
            }
        }
        FiberTag::HostRoot | FiberTag::FunctionComponent | FiberTag::Fragment => {}
    }
    bubble_properties(cx, wip);
    Ok(())
}

/// Appends the nearest host descendants of `wip` to `parent`, skipping
/// through components and fragments.
fn append_all_children<H: HostConfig>(
    cx: &mut RenderContext<'_, H>,
    parent: &H::Handle,
    wip: FiberId,
) -> Result<(), RenderError> {
    let Some(mut node) = cx.arena[wip].child else {
        return Ok(());
    };
    loop {
        let fiber = &cx.arena[node];
        if fiber.tag.is_host() {
            if let Some(child) = fiber.state_node.clone() {
                cx.host.append_initial_child(parent, &child)?;
            }
        } else if let Some(child) = fiber.child {
            node = child;
            continue;
        }

        loop {
            if node == wip {
                return Ok(());
            }
            let fiber = &cx.arena[node];
            if let Some(sibling) = fiber.sibling {
                node = sibling;
                break;
            }
            match fiber.parent {
                Some(parent) if parent != wip => node = parent,
                _ => return Ok(()),
            }
        }
    }
}

fn bubble_properties<H: HostConfig>(cx: &mut RenderContext<'_, H>, wip: FiberId) {
    let mut subtree_flags = Flags::empty();
    let mut child = cx.arena[wip].child;
    while let Some(id) = child {
        let fiber = &mut cx.arena[id];
        subtree_flags |= fiber.subtree_flags | fiber.flags;
        fiber.parent = Some(wip);
        child = fiber.sibling;
    }
    cx.arena[wip].subtree_flags |= subtree_flags;
}
