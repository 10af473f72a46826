//! Applies a finished work-in-progress tree to the host.
//!
//! Walks are gated by subtree flags so untouched subtrees are skipped. The
//! mutation walk visits children before their parent: placements and
//! updates land first, then each parent's deletions. The mutation pass is
//! all-or-nothing: if a host operation fails, the host tree is put back to
//! match the committed fiber tree and no fiber-side effect of the pass
//! happens.

use std::rc::Rc;

use crate::element::{NodeRef, Props};
use crate::fiber::{FiberArena, FiberId, FiberTag, Flags, MemoizedState, LAYOUT_MASK, MUTATION_MASK, PASSIVE_MASK};
use crate::hooks::{run_cleanup, run_setup, EffectRef, HookFlags, HookSlot};
use crate::host::HostConfig;
use crate::HostError;

/// Effects waiting for the next passive flush.
#[derive(Default)]
pub(crate) struct PendingPassiveEffects {
    pub unmount: Vec<EffectRef>,
    pub update: Vec<EffectRef>,
}

impl PendingPassiveEffects {
    pub fn is_empty(&self) -> bool {
        self.unmount.is_empty() && self.update.is_empty()
    }
}

pub(crate) struct CommitContext<'a, H: HostConfig> {
    pub arena: &'a mut FiberArena<H::Handle>,
    pub host: &'a mut H,
    pub passive: &'a mut PendingPassiveEffects,
    /// Roots of deleted subtrees, released once the commit is done.
    pub deleted: Vec<FiberId>,
    applied: AppliedMutations<H::Handle>,
}

impl<'a, H: HostConfig> CommitContext<'a, H> {
    pub fn new(
        arena: &'a mut FiberArena<H::Handle>,
        host: &'a mut H,
        passive: &'a mut PendingPassiveEffects,
    ) -> Self {
        Self {
            arena,
            host,
            passive,
            deleted: Vec::new(),
            applied: AppliedMutations::default(),
        }
    }
}

/// What a mutation pass has done so far.
struct AppliedMutations<T> {
    /// Work-in-progress host parents whose child lists were touched.
    parents: Vec<FiberId>,
    /// `(parent, child)` of every host node inserted or moved.
    inserted: Vec<(T, T)>,
    updates: Vec<AppliedUpdate<T>>,
    /// Refs replaced on surviving nodes, detached once the pass succeeds.
    stale_refs: Vec<NodeRef>,
    /// Effects of updated components, queued once the pass succeeds.
    effects: Vec<EffectRef>,
}

impl<T> Default for AppliedMutations<T> {
    fn default() -> Self {
        Self {
            parents: Vec::new(),
            inserted: Vec::new(),
            updates: Vec::new(),
            stale_refs: Vec::new(),
            effects: Vec::new(),
        }
    }
}

impl<T> AppliedMutations<T> {
    fn touch(&mut self, parent: FiberId) {
        if !self.parents.contains(&parent) {
            self.parents.push(parent);
        }
    }
}

enum AppliedUpdate<T> {
    Text { handle: T, previous: Rc<str> },
    Props { handle: T, old: Props, new: Props },
}

pub(crate) fn has_passive_work<T>(arena: &FiberArena<T>, finished: FiberId) -> bool {
    let fiber = &arena[finished];
    (fiber.flags | fiber.subtree_flags).intersects(PASSIVE_MASK)
}

type Visit<H> = fn(&mut CommitContext<'_, H>, FiberId) -> Result<(), HostError>;

/// Post-order walk over the fibers under `root` whose subtree flags
/// intersect `mask`.
fn commit_walk<H: HostConfig>(
    cx: &mut CommitContext<'_, H>,
    root: FiberId,
    mask: Flags,
    visit: Visit<H>,
) -> Result<(), HostError> {
    let mut next = Some(root);
    while let Some(mut node) = next {
        let fiber = &cx.arena[node];
        if fiber.subtree_flags.intersects(mask) {
            if let Some(child) = fiber.child {
                next = Some(child);
                continue;
            }
        }
        next = loop {
            visit(cx, node)?;
            if node == root {
                break None;
            }
            let fiber = &cx.arena[node];
            if let Some(sibling) = fiber.sibling {
                break Some(sibling);
            }
            match fiber.parent {
                Some(parent) => node = parent,
                None => break None,
            }
        };
    }
    Ok(())
}

/// Applies every host mutation under `finished`, or none of them.
///
/// Unmount effects, unmounted state queues, ref detaches and the passive
/// effects of updated components are only recorded once every host
/// operation has succeeded.
pub(crate) fn commit_mutation_effects<H: HostConfig>(
    cx: &mut CommitContext<'_, H>,
    finished: FiberId,
) -> Result<(), HostError> {
    let walked = commit_walk(
        cx,
        finished,
        MUTATION_MASK | PASSIVE_MASK,
        commit_mutation_effects_on_fiber,
    );
    if let Err(error) = walked {
        log::warn!("host mutation failed ({error}); restoring the committed host tree");
        undo_mutations(cx);
        cx.deleted.clear();
        return Err(error);
    }

    let applied = std::mem::take(&mut cx.applied);
    for node_ref in &applied.stale_refs {
        node_ref.detach();
    }
    let deleted = cx.deleted.clone();
    for fiber in deleted {
        unmount_subtree(cx, fiber);
    }
    cx.passive.update.extend(applied.effects);
    Ok(())
}

fn commit_mutation_effects_on_fiber<H: HostConfig>(
    cx: &mut CommitContext<'_, H>,
    node: FiberId,
) -> Result<(), HostError> {
    let flags = cx.arena[node].flags;

    if flags.contains(Flags::PLACEMENT) {
        commit_placement(cx, node)?;
        cx.arena[node].flags.remove(Flags::PLACEMENT);
    }
    if flags.contains(Flags::UPDATE) {
        commit_update(cx, node)?;
        cx.arena[node].flags.remove(Flags::UPDATE);
    }
    if flags.contains(Flags::CHILD_DELETION) {
        let deletions = cx.arena[node].deletions.clone();
        for deleted in deletions {
            commit_deletion(cx, node, deleted)?;
        }
        cx.arena[node].flags.remove(Flags::CHILD_DELETION);
    }
    if flags.contains(Flags::REF) {
        if let Some(current) = cx.arena.alternate_of(node) {
            if let Some(previous) = &cx.arena[current].node_ref {
                if cx.arena[node].node_ref.as_ref() != Some(previous) {
                    cx.applied.stale_refs.push(previous.clone());
                }
            }
        }
    }
    if flags.contains(Flags::PASSIVE) {
        let effects = cx.arena[node].update_queue.clone();
        cx.applied.effects.extend(effects);
    }
    Ok(())
}

/// Nearest host fiber at or above `fiber`; the root counts.
fn host_parent_fiber<T>(arena: &FiberArena<T>, fiber: Option<FiberId>) -> Option<FiberId> {
    let mut next = fiber;
    while let Some(id) = next {
        let fiber = &arena[id];
        if matches!(fiber.tag, FiberTag::HostComponent | FiberTag::HostRoot) {
            return Some(id);
        }
        next = fiber.parent;
    }
    None
}

/// Host node to insert `fiber` before: the first host node after it in
/// document order that is not itself being placed in this commit.
fn host_sibling_of<T: Clone>(arena: &FiberArena<T>, fiber: FiberId) -> Option<T> {
    let mut node = fiber;
    'siblings: loop {
        while arena[node].sibling.is_none() {
            let parent = arena[node].parent?;
            if matches!(arena[parent].tag, FiberTag::HostComponent | FiberTag::HostRoot) {
                return None;
            }
            node = parent;
        }
        node = arena[node].sibling?;

        while !arena[node].tag.is_host() {
            if arena[node].flags.contains(Flags::PLACEMENT) {
                continue 'siblings;
            }
            match arena[node].child {
                Some(child) => node = child,
                None => continue 'siblings,
            }
        }

        if !arena[node].flags.contains(Flags::PLACEMENT) {
            return arena[node].state_node.clone();
        }
    }
}

/// Outermost host nodes of the subtree under `node`, in document order.
fn collect_host_roots<T: Clone>(arena: &FiberArena<T>, node: FiberId, out: &mut Vec<T>) {
    let fiber = &arena[node];
    if fiber.tag.is_host() {
        out.extend(fiber.state_node.clone());
        return;
    }
    for child in arena.children(node) {
        collect_host_roots(arena, child, out);
    }
}

fn commit_placement<H: HostConfig>(cx: &mut CommitContext<'_, H>, node: FiberId) -> Result<(), HostError> {
    let parent = host_parent_fiber(cx.arena, cx.arena[node].parent);
    let Some((parent_fiber, parent)) =
        parent.and_then(|id| Some((id, cx.arena[id].state_node.clone()?)))
    else {
        log::warn!("placed fiber {node:?} has no host parent");
        return Ok(());
    };
    cx.applied.touch(parent_fiber);
    let before = host_sibling_of(cx.arena, node);
    insert_or_append_placement_node(cx, node, &parent, before.as_ref())
}

fn insert_or_append_placement_node<H: HostConfig>(
    cx: &mut CommitContext<'_, H>,
    node: FiberId,
    parent: &H::Handle,
    before: Option<&H::Handle>,
) -> Result<(), HostError> {
    if cx.arena[node].tag.is_host() {
        let Some(handle) = cx.arena[node].state_node.clone() else {
            return Ok(());
        };
        match before {
            Some(before) => cx.host.insert_before(parent, &handle, before)?,
            None => cx.host.append_to_container(parent, &handle)?,
        }
        cx.applied.inserted.push((parent.clone(), handle));
        return Ok(());
    }
    let children: Vec<FiberId> = cx.arena.children(node).collect();
    for child in children {
        insert_or_append_placement_node(cx, child, parent, before)?;
    }
    Ok(())
}

fn commit_update<H: HostConfig>(cx: &mut CommitContext<'_, H>, node: FiberId) -> Result<(), HostError> {
    let fiber = &cx.arena[node];
    let Some(handle) = fiber.state_node.clone() else {
        return Ok(());
    };
    let committed = cx.arena.alternate_of(node);
    match fiber.tag {
        FiberTag::HostText => {
            let text = fiber.memoized_props.text_content().cloned().unwrap_or_default();
            let previous = committed
                .and_then(|current| cx.arena[current].memoized_props.text_content().cloned())
                .unwrap_or_default();
            cx.host.commit_text_update(&handle, &text)?;
            cx.applied.updates.push(AppliedUpdate::Text { handle, previous });
        }
        FiberTag::HostComponent => {
            let new = fiber.memoized_props.clone();
            let old = committed
                .map(|current| cx.arena[current].memoized_props.clone())
                .unwrap_or_default();
            cx.host.commit_update(&handle, &old, &new)?;
            cx.applied.updates.push(AppliedUpdate::Props { handle, old, new });
        }
        _ => {}
    }
    Ok(())
}

fn commit_deletion<H: HostConfig>(
    cx: &mut CommitContext<'_, H>,
    parent: FiberId,
    deleted: FiberId,
) -> Result<(), HostError> {
    let mut host_children = Vec::new();
    collect_host_roots(cx.arena, deleted, &mut host_children);
    if !host_children.is_empty() {
        let container = host_parent_fiber(cx.arena, Some(parent))
            .and_then(|id| Some((id, cx.arena[id].state_node.clone()?)));
        let Some((container_fiber, container)) = container else {
            log::warn!("deleted fiber {deleted:?} has no host parent");
            return Ok(());
        };
        cx.applied.touch(container_fiber);
        for child in &host_children {
            cx.host.remove_child(&container, child)?;
        }
    }
    cx.deleted.push(deleted);
    Ok(())
}

/// Visits every fiber of a deleted subtree once: queues component unmount
/// effects, marks their state queues unmounted and detaches refs.
fn unmount_subtree<H: HostConfig>(cx: &mut CommitContext<'_, H>, node: FiberId) {
    let fiber = &cx.arena[node];
    match fiber.tag {
        FiberTag::HostComponent | FiberTag::HostText => {
            if let Some(node_ref) = &fiber.node_ref {
                node_ref.detach();
            }
        }
        FiberTag::FunctionComponent => {
            for effect in &fiber.update_queue {
                effect.borrow_mut().cancel();
            }
            cx.passive.unmount.extend(fiber.update_queue.iter().cloned());
            if let MemoizedState::Hooks(slots) = &fiber.memoized_state {
                for slot in slots {
                    if let HookSlot::State(cell) = slot {
                        cell.queue.borrow_mut().mark_unmounted();
                    }
                }
            }
        }
        FiberTag::HostRoot | FiberTag::Fragment => {}
    }
    let children: Vec<FiberId> = cx.arena.children(node).collect();
    for child in children {
        unmount_subtree(cx, child);
    }
}

/// Puts the host tree back the way the committed fiber tree describes it:
/// updates are reverted, inserted nodes that the committed tree does not
/// own are taken out, and every touched parent gets its committed children
/// back in committed order.
fn undo_mutations<H: HostConfig>(cx: &mut CommitContext<'_, H>) {
    let applied = std::mem::take(&mut cx.applied);
    for update in applied.updates.iter().rev() {
        let undone = match update {
            AppliedUpdate::Text { handle, previous } => cx.host.commit_text_update(handle, previous),
            AppliedUpdate::Props { handle, old, new } => cx.host.commit_update(handle, new, old),
        };
        if let Err(error) = undone {
            log::error!("could not revert a host update: {error}");
        }
    }

    for parent in applied.parents {
        let Some(committed) = cx.arena.alternate_of(parent) else {
            continue;
        };
        let Some(container) = cx.arena[committed].state_node.clone() else {
            continue;
        };
        let arena = &*cx.arena;
        let mut children = Vec::new();
        for child in arena.children(committed) {
            collect_host_roots(arena, child, &mut children);
        }
        for (target, child) in &applied.inserted {
            if *target != container || children.contains(child) {
                continue;
            }
            if let Err(error) = cx.host.remove_child(&container, child) {
                log::error!("could not take back inserted host node {child:?}: {error}");
            }
        }
        for child in &children {
            if let Err(error) = cx.host.append_to_container(&container, child) {
                log::error!("could not restore host node {child:?}: {error}");
            }
        }
    }
}

pub(crate) fn commit_layout_effects<H: HostConfig>(
    cx: &mut CommitContext<'_, H>,
    finished: FiberId,
) -> Result<(), HostError> {
    commit_walk(cx, finished, LAYOUT_MASK, commit_layout_effects_on_fiber)
}

fn commit_layout_effects_on_fiber<H: HostConfig>(
    cx: &mut CommitContext<'_, H>,
    node: FiberId,
) -> Result<(), HostError> {
    let fiber = &mut cx.arena[node];
    if fiber.flags.contains(Flags::REF) && fiber.tag == FiberTag::HostComponent {
        if let (Some(node_ref), Some(handle)) = (&fiber.node_ref, &fiber.state_node) {
            node_ref.attach(Box::new(handle.clone()));
        }
        fiber.flags.remove(Flags::REF);
    }
    Ok(())
}

/// Runs queued passive effects: every unmount cleanup, then the previous
/// cleanup of every re-firing effect, then their new setups.
pub(crate) fn flush_passive_effects(pending: PendingPassiveEffects) {
    log::debug!(
        "flushing passive effects ({} unmounted, {} updated)",
        pending.unmount.len(),
        pending.update.len()
    );
    for effect in &pending.unmount {
        if effect.borrow().tags.contains(HookFlags::PASSIVE) {
            run_cleanup(effect);
        }
    }
    let firing: Vec<&EffectRef> = pending
        .update
        .iter()
        .filter(|effect| {
            effect
                .borrow()
                .tags
                .contains(HookFlags::PASSIVE | HookFlags::HAS_EFFECT)
        })
        .collect();
    for effect in &firing {
        run_cleanup(effect);
    }
    for effect in &firing {
        run_setup(effect);
    }
}

#[cfg(test)]
#[path = "tests/commit_work_tests.rs"]
mod tests;
