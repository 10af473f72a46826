//! Diffs a new child description against the committed child chain.
//!
//! Two instances of the same algorithm exist. [`RECONCILE`] records
//! placements and deletions for subtrees that are already mounted;
//! [`MOUNT`] suppresses them for a subtree that is inserted as a whole by an
//! ancestor's placement.

use std::rc::Rc;

use crate::collections::map::{self, HashMap};
use crate::element::{Element, ElementKind, ElementNode, Key, Props};
use crate::fiber::{create_work_in_progress, Fiber, FiberArena, FiberId, FiberTag, Flags};

#[derive(Copy, Clone, Debug)]
pub struct ChildReconciler {
    track_side_effects: bool,
}

pub const RECONCILE: ChildReconciler = ChildReconciler {
    track_side_effects: true,
};

pub const MOUNT: ChildReconciler = ChildReconciler {
    track_side_effects: false,
};

/// Lookup key of a previous child: its explicit key, or its position.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum ChildKey {
    Keyed(Key),
    Positional(usize),
}

impl ChildKey {
    fn of(key: Option<&Key>, index: usize) -> Self {
        match key {
            Some(key) => ChildKey::Keyed(key.clone()),
            None => ChildKey::Positional(index),
        }
    }
}

impl ChildReconciler {
    /// Reconciles `new_child` under `parent` and returns the new first child.
    pub fn reconcile<T: Clone>(
        self,
        arena: &mut FiberArena<T>,
        parent: FiberId,
        current_first_child: Option<FiberId>,
        new_child: &Element,
    ) -> Option<FiberId> {
        let new_child = match new_child {
            Element::Node(node) if node.is_unkeyed_fragment() => node.props.children(),
            other => other,
        };

        match new_child {
            Element::Node(node) => {
                let fiber = self.reconcile_single_element(arena, parent, current_first_child, node);
                Some(self.place_single_child(arena, fiber))
            }
            Element::Text(text) => {
                let fiber = self.reconcile_single_text(arena, parent, current_first_child, text);
                Some(self.place_single_child(arena, fiber))
            }
            Element::List(items) => {
                self.reconcile_children_array(arena, parent, current_first_child, items)
            }
            Element::Empty => {
                self.delete_remaining_children(arena, parent, current_first_child);
                None
            }
            Element::Opaque(_) => {
                log::warn!(
                    "unsupported child under {:?} reconciles to nothing",
                    arena[parent].ty
                );
                self.delete_remaining_children(arena, parent, current_first_child);
                None
            }
        }
    }

    fn delete_child<T>(self, arena: &mut FiberArena<T>, parent: FiberId, child: FiberId) {
        if !self.track_side_effects {
            return;
        }
        let parent = &mut arena[parent];
        parent.deletions.push(child);
        parent.flags |= Flags::CHILD_DELETION;
    }

    fn delete_remaining_children<T>(
        self,
        arena: &mut FiberArena<T>,
        parent: FiberId,
        first: Option<FiberId>,
    ) {
        if !self.track_side_effects {
            return;
        }
        let mut child = first;
        while let Some(current) = child {
            child = arena[current].sibling;
            self.delete_child(arena, parent, current);
        }
    }

    /// Pairs `current` for this render as the only child so far.
    fn use_fiber<T: Clone>(arena: &mut FiberArena<T>, current: FiberId, props: Props) -> FiberId {
        let wip = create_work_in_progress(arena, current, props);
        let fiber = &mut arena[wip];
        fiber.index = 0;
        fiber.sibling = None;
        wip
    }

    fn reconcile_single_element<T: Clone>(
        self,
        arena: &mut FiberArena<T>,
        parent: FiberId,
        current_first_child: Option<FiberId>,
        element: &ElementNode,
    ) -> FiberId {
        let mut child = current_first_child;
        while let Some(current) = child {
            let next = arena[current].sibling;
            if arena[current].key != element.key {
                self.delete_child(arena, parent, current);
                child = next;
                continue;
            }
            if arena[current].ty.matches(&element.kind) {
                self.delete_remaining_children(arena, parent, next);
                let existing = Self::use_fiber(arena, current, element.props.clone());
                let fiber = &mut arena[existing];
                fiber.parent = Some(parent);
                fiber.node_ref = element.node_ref.clone();
                return existing;
            }
            // Same key, different type: nothing below can be reused.
            self.delete_remaining_children(arena, parent, Some(current));
            break;
        }

        let mut fiber = Fiber::from_element(element);
        fiber.parent = Some(parent);
        arena.allocate(fiber)
    }

    fn reconcile_single_text<T: Clone>(
        self,
        arena: &mut FiberArena<T>,
        parent: FiberId,
        current_first_child: Option<FiberId>,
        text: &Rc<str>,
    ) -> FiberId {
        if let Some(current) = current_first_child {
            if arena[current].tag == FiberTag::HostText {
                let next = arena[current].sibling;
                self.delete_remaining_children(arena, parent, next);
                let existing = Self::use_fiber(arena, current, Props::text(text.clone()));
                arena[existing].parent = Some(parent);
                return existing;
            }
        }
        self.delete_remaining_children(arena, parent, current_first_child);
        let mut fiber = Fiber::from_text(text.clone());
        fiber.parent = Some(parent);
        arena.allocate(fiber)
    }

    fn place_single_child<T>(self, arena: &mut FiberArena<T>, fiber: FiberId) -> FiberId {
        if self.track_side_effects && arena.alternate_of(fiber).is_none() {
            arena[fiber].flags |= Flags::PLACEMENT;
        }
        fiber
    }

    fn reconcile_children_array<T: Clone>(
        self,
        arena: &mut FiberArena<T>,
        parent: FiberId,
        current_first_child: Option<FiberId>,
        items: &[Element],
    ) -> Option<FiberId> {
        let mut existing: HashMap<ChildKey, FiberId> = map::with_capacity(items.len());
        let mut previous = current_first_child;
        while let Some(current) = previous {
            let fiber = &arena[current];
            previous = fiber.sibling;
            let key = ChildKey::of(fiber.key.as_ref(), fiber.index);
            if let Some(shadowed) = existing.insert(key.clone(), current) {
                // Only the last child with a key can be matched; drop the others.
                log::warn!(
                    "duplicate child key {key:?} under {:?}; earlier children with it are deleted",
                    arena[parent].ty
                );
                self.delete_child(arena, parent, shadowed);
            }
        }

        let mut last_placed_index = 0;
        let mut first_new: Option<FiberId> = None;
        let mut last_new: Option<FiberId> = None;

        for (index, item) in items.iter().enumerate() {
            let Some(new_fiber) = self.update_from_map(arena, &mut existing, index, item) else {
                continue;
            };
            {
                let fiber = &mut arena[new_fiber];
                fiber.index = index;
                fiber.parent = Some(parent);
                fiber.sibling = None;
            }
            match last_new {
                Some(last) => arena[last].sibling = Some(new_fiber),
                None => first_new = Some(new_fiber),
            }
            last_new = Some(new_fiber);

            if !self.track_side_effects {
                continue;
            }
            match arena.alternate_of(new_fiber) {
                Some(current) => {
                    let old_index = arena[current].index;
                    if old_index < last_placed_index {
                        arena[new_fiber].flags |= Flags::PLACEMENT;
                    } else {
                        last_placed_index = old_index;
                    }
                }
                None => arena[new_fiber].flags |= Flags::PLACEMENT,
            }
        }

        // Whatever is left in the lookup was not reused.
        let mut previous = current_first_child;
        while let Some(current) = previous {
            let fiber = &arena[current];
            let key = ChildKey::of(fiber.key.as_ref(), fiber.index);
            previous = fiber.sibling;
            if existing.get(&key) == Some(&current) {
                self.delete_child(arena, parent, current);
            }
        }

        first_new
    }

    fn update_from_map<T: Clone>(
        self,
        arena: &mut FiberArena<T>,
        existing: &mut HashMap<ChildKey, FiberId>,
        index: usize,
        item: &Element,
    ) -> Option<FiberId> {
        match item {
            Element::Text(text) => {
                let key = ChildKey::Positional(index);
                match existing.get(&key).copied() {
                    Some(before) if arena[before].tag == FiberTag::HostText => {
                        existing.remove(&key);
                        Some(create_work_in_progress(arena, before, Props::text(text.clone())))
                    }
                    _ => Some(arena.allocate(Fiber::from_text(text.clone()))),
                }
            }
            Element::Node(node) => {
                let key = ChildKey::of(node.key.as_ref(), index);
                let before = existing.get(&key).copied();
                if matches!(node.kind, ElementKind::Fragment) {
                    return Some(self.update_fragment(
                        arena,
                        existing,
                        key,
                        before,
                        node.props.clone(),
                        node.key.clone(),
                    ));
                }
                match before {
                    Some(before) if arena[before].ty.matches(&node.kind) => {
                        existing.remove(&key);
                        let reused = create_work_in_progress(arena, before, node.props.clone());
                        arena[reused].node_ref = node.node_ref.clone();
                        Some(reused)
                    }
                    _ => Some(arena.allocate(Fiber::from_element(node))),
                }
            }
            Element::List(items) => {
                let key = ChildKey::Positional(index);
                let before = existing.get(&key).copied();
                let props = Props::with_children(Element::List(items.clone()));
                Some(self.update_fragment(arena, existing, key, before, props, None))
            }
            Element::Empty => None,
            Element::Opaque(_) => {
                log::warn!("unsupported list item at index {index} reconciles to nothing");
                None
            }
        }
    }

    fn update_fragment<T: Clone>(
        self,
        arena: &mut FiberArena<T>,
        existing: &mut HashMap<ChildKey, FiberId>,
        key: ChildKey,
        before: Option<FiberId>,
        props: Props,
        fragment_key: Option<Key>,
    ) -> FiberId {
        match before {
            Some(before) if arena[before].tag == FiberTag::Fragment => {
                existing.remove(&key);
                create_work_in_progress(arena, before, props)
            }
            _ => arena.allocate(Fiber::from_fragment(props, fragment_key)),
        }
    }
}

#[cfg(test)]
#[path = "tests/child_reconciler_tests.rs"]
mod tests;
