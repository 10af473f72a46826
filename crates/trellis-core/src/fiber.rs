//! Fiber records and the arena that owns both tree generations.
//!
//! Every logical tree position owns one arena slot with two halves: the
//! committed fiber and its work-in-progress counterpart. A [`FiberId`] names
//! one half; its alternate is the other half of the same slot, so the
//! alternate relation is symmetric without back pointers.

use std::fmt;
use std::ops::{Index, IndexMut};
use std::rc::Rc;

use bitflags::bitflags;

use crate::element::{Component, ElementKind, ElementNode, Key, NodeRef, Props};
use crate::hooks::{EffectRef, HookSlot};
use crate::update_queue::StateCell;

bitflags! {
    /// Work a fiber needs during commit.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Flags: u32 {
        const PLACEMENT = 1 << 1;
        const UPDATE = 1 << 2;
        const PASSIVE = 1 << 3;
        const CHILD_DELETION = 1 << 4;
        const REF = 1 << 5;
    }
}

pub const MUTATION_MASK: Flags = Flags::PLACEMENT
    .union(Flags::UPDATE)
    .union(Flags::CHILD_DELETION)
    .union(Flags::REF);
pub const PASSIVE_MASK: Flags = Flags::PASSIVE.union(Flags::CHILD_DELETION);
pub const LAYOUT_MASK: Flags = Flags::REF;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FiberTag {
    HostRoot,
    HostComponent,
    HostText,
    FunctionComponent,
    Fragment,
}

impl FiberTag {
    pub fn is_host(self) -> bool {
        matches!(self, FiberTag::HostComponent | FiberTag::HostText)
    }
}

#[derive(Clone, PartialEq)]
pub enum FiberType {
    Root,
    Host(Rc<str>),
    Text,
    Component(Component),
    Fragment,
}

impl FiberType {
    /// Whether a fiber of this type can be reused for `kind`.
    pub fn matches(&self, kind: &ElementKind) -> bool {
        match (self, kind) {
            (FiberType::Host(a), ElementKind::Host(b)) => a == b,
            (FiberType::Component(a), ElementKind::Component(b)) => a == b,
            (FiberType::Fragment, ElementKind::Fragment) => true,
            _ => false,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            FiberType::Root => "Root",
            FiberType::Host(tag) => tag,
            FiberType::Text => "#text",
            FiberType::Component(component) => component.name(),
            FiberType::Fragment => "Fragment",
        }
    }
}

impl fmt::Debug for FiberType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Debug, Default)]
pub enum MemoizedState {
    #[default]
    None,
    /// The root's element state.
    Root(StateCell),
    /// Ordered hook slots of a function component.
    Hooks(Vec<HookSlot>),
}

/// Identifies one generation of one tree position.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct FiberId {
    index: u32,
    epoch: u32,
    side: u8,
}

impl FiberId {
    /// The same position in the other generation.
    pub fn alternate(self) -> FiberId {
        FiberId {
            side: self.side ^ 1,
            ..self
        }
    }

    pub fn slot(self) -> usize {
        self.index as usize
    }
}

impl fmt::Debug for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fiber({}.{}{})", self.index, self.epoch, if self.side == 0 { 'a' } else { 'b' })
    }
}

pub struct Fiber<T> {
    pub tag: FiberTag,
    pub ty: FiberType,
    pub key: Option<Key>,
    pub parent: Option<FiberId>,
    pub child: Option<FiberId>,
    pub sibling: Option<FiberId>,
    pub index: usize,
    pub pending_props: Props,
    pub memoized_props: Props,
    pub memoized_state: MemoizedState,
    pub update_queue: Vec<EffectRef>,
    pub flags: Flags,
    pub subtree_flags: Flags,
    pub deletions: Vec<FiberId>,
    pub node_ref: Option<NodeRef>,
    pub state_node: Option<T>,
}

impl<T> Fiber<T> {
    pub fn new(tag: FiberTag, ty: FiberType, key: Option<Key>, pending_props: Props) -> Self {
        Self {
            tag,
            ty,
            key,
            parent: None,
            child: None,
            sibling: None,
            index: 0,
            pending_props,
            memoized_props: Props::default(),
            memoized_state: MemoizedState::None,
            update_queue: Vec::new(),
            flags: Flags::empty(),
            subtree_flags: Flags::empty(),
            deletions: Vec::new(),
            node_ref: None,
            state_node: None,
        }
    }

    pub fn host_root(container: T, state: StateCell) -> Self {
        let mut fiber = Self::new(FiberTag::HostRoot, FiberType::Root, None, Props::default());
        fiber.state_node = Some(container);
        fiber.memoized_state = MemoizedState::Root(state);
        fiber
    }

    pub fn from_element(element: &ElementNode) -> Self {
        let (tag, ty) = match &element.kind {
            ElementKind::Host(tag) => (FiberTag::HostComponent, FiberType::Host(tag.clone())),
            ElementKind::Component(component) => {
                (FiberTag::FunctionComponent, FiberType::Component(component.clone()))
            }
            ElementKind::Fragment => (FiberTag::Fragment, FiberType::Fragment),
        };
        let mut fiber = Self::new(tag, ty, element.key.clone(), element.props.clone());
        fiber.node_ref = element.node_ref.clone();
        fiber
    }

    pub fn from_text(content: Rc<str>) -> Self {
        Self::new(FiberTag::HostText, FiberType::Text, None, Props::text(content))
    }

    pub fn from_fragment(children: Props, key: Option<Key>) -> Self {
        Self::new(FiberTag::Fragment, FiberType::Fragment, key, children)
    }
}

impl<T: fmt::Debug> fmt::Debug for Fiber<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber")
            .field("tag", &self.tag)
            .field("type", &self.ty)
            .field("key", &self.key)
            .field("index", &self.index)
            .field("flags", &self.flags)
            .field("subtree_flags", &self.subtree_flags)
            .field("state_node", &self.state_node)
            .finish()
    }
}

struct FiberSlot<T> {
    epoch: u32,
    halves: [Option<Fiber<T>>; 2],
}

/// Owner of every fiber of one root.
pub struct FiberArena<T> {
    slots: Vec<FiberSlot<T>>,
    free: Vec<u32>,
    /// Slots allocated since the last [`FiberArena::commit_allocations`].
    fresh: Vec<FiberId>,
}

impl<T> Default for FiberArena<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            fresh: Vec::new(),
        }
    }
}

impl<T> FiberArena<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of occupied slots.
    pub fn live_slots(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn allocate(&mut self, fiber: Fiber<T>) -> FiberId {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(FiberSlot {
                    epoch: 0,
                    halves: [None, None],
                });
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        slot.halves[0] = Some(fiber);
        let id = FiberId {
            index,
            epoch: slot.epoch,
            side: 0,
        };
        self.fresh.push(id);
        id
    }

    pub fn get(&self, id: FiberId) -> Option<&Fiber<T>> {
        let slot = self.slots.get(id.slot())?;
        if slot.epoch != id.epoch {
            return None;
        }
        slot.halves[id.side as usize].as_ref()
    }

    pub fn get_mut(&mut self, id: FiberId) -> Option<&mut Fiber<T>> {
        let slot = self.slots.get_mut(id.slot())?;
        if slot.epoch != id.epoch {
            return None;
        }
        slot.halves[id.side as usize].as_mut()
    }

    pub fn contains(&self, id: FiberId) -> bool {
        self.get(id).is_some()
    }

    /// The other generation of `id`, if it was ever created.
    pub fn alternate_of(&self, id: FiberId) -> Option<FiberId> {
        let alternate = id.alternate();
        self.contains(alternate).then_some(alternate)
    }

    /// Both generations of one position: `id` first, then its alternate.
    pub fn pair_mut(&mut self, id: FiberId) -> (&mut Fiber<T>, Option<&mut Fiber<T>>) {
        let slot = &mut self.slots[id.slot()];
        assert_eq!(slot.epoch, id.epoch, "stale fiber id {id:?}");
        let [a, b] = &mut slot.halves;
        let (this, other) = if id.side == 0 { (a, b) } else { (b, a) };
        let this = this.as_mut().expect("fiber half missing");
        (this, other.as_mut())
    }

    /// Iterates the child chain of `id`.
    pub fn children(&self, id: FiberId) -> impl Iterator<Item = FiberId> + '_ {
        std::iter::successors(self[id].child, move |child| self[*child].sibling)
    }

    /// Frees the slot of `id` and every descendant reachable from it.
    /// Returns the host nodes the freed fibers owned.
    pub fn release_subtree(&mut self, id: FiberId) -> Vec<T> {
        let mut host_nodes = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if !self.contains(next) {
                continue;
            }
            stack.extend(self.children(next));
            host_nodes.extend(self.release(next));
        }
        host_nodes
    }

    /// Frees the slot of `id`, handing back the host node of the `id` half.
    fn release(&mut self, id: FiberId) -> Option<T> {
        let slot = &mut self.slots[id.slot()];
        if slot.epoch != id.epoch {
            return None;
        }
        let [a, b] = std::mem::replace(&mut slot.halves, [None, None]);
        slot.epoch = slot.epoch.wrapping_add(1);
        self.free.push(id.index);
        let fiber = if id.side == 0 { a } else { b };
        fiber
            .filter(|fiber| fiber.tag.is_host())
            .and_then(|fiber| fiber.state_node)
    }

    /// Indented outline of the subtree under `id`, one fiber per line.
    pub fn dump_tree(&self, id: FiberId) -> String {
        let mut output = String::new();
        self.dump_fiber(&mut output, id, 0);
        output
    }

    fn dump_fiber(&self, output: &mut String, id: FiberId, depth: usize) {
        let fiber = &self[id];
        output.push_str(&"  ".repeat(depth));
        match (&fiber.ty, fiber.memoized_props.text_content()) {
            (FiberType::Text, Some(text)) => output.push_str(&format!("{text:?}")),
            (ty, _) => output.push_str(ty.name()),
        }
        if let Some(key) = &fiber.key {
            output.push_str(&format!(" key={key:?}"));
        }
        output.push('\n');
        for child in self.children(id) {
            self.dump_fiber(output, child, depth + 1);
        }
    }

    /// Marks every fresh slot as owned by the committed tree.
    pub fn commit_allocations(&mut self) {
        self.fresh.clear();
    }

    /// Frees every slot allocated by a render attempt that is being thrown
    /// away. Returns the host nodes that attempt created; none of them is
    /// attached to the committed host tree.
    pub fn discard_allocations(&mut self) -> Vec<T> {
        let fresh = std::mem::take(&mut self.fresh);
        fresh.into_iter().filter_map(|id| self.release(id)).collect()
    }
}

impl<T> Index<FiberId> for FiberArena<T> {
    type Output = Fiber<T>;

    fn index(&self, id: FiberId) -> &Fiber<T> {
        self.get(id)
            .unwrap_or_else(|| panic!("fiber {id:?} is not live"))
    }
}

impl<T> IndexMut<FiberId> for FiberArena<T> {
    fn index_mut(&mut self, id: FiberId) -> &mut Fiber<T> {
        self.get_mut(id)
            .unwrap_or_else(|| panic!("fiber {id:?} is not live"))
    }
}

/// Produces the work-in-progress counterpart of `current` for a new render.
///
/// Reuses the alternate half when it exists, resetting its commit
/// bookkeeping; otherwise creates it. Either way the committed fields are
/// copied over so the new generation starts from the committed one.
pub fn create_work_in_progress<T: Clone>(
    arena: &mut FiberArena<T>,
    current: FiberId,
    pending_props: Props,
) -> FiberId {
    let slot = &mut arena.slots[current.slot()];
    assert_eq!(slot.epoch, current.epoch, "stale fiber id {current:?}");
    let [a, b] = &mut slot.halves;
    let (committed, alternate) = if current.side == 0 { (a, b) } else { (b, a) };
    let committed = committed.as_ref().expect("committed fiber half missing");
    let wip = alternate.get_or_insert_with(|| {
        Fiber::new(
            committed.tag,
            committed.ty.clone(),
            committed.key.clone(),
            Props::default(),
        )
    });

    wip.pending_props = pending_props;
    wip.flags = Flags::empty();
    wip.subtree_flags = Flags::empty();
    wip.deletions.clear();

    wip.ty = committed.ty.clone();
    wip.update_queue = committed.update_queue.clone();
    wip.child = committed.child;
    wip.index = committed.index;
    wip.memoized_props = committed.memoized_props.clone();
    wip.memoized_state = committed.memoized_state.clone();
    wip.node_ref = committed.node_ref.clone();
    wip.state_node = committed.state_node.clone();
    current.alternate()
}

#[cfg(test)]
#[path = "tests/fiber_tests.rs"]
mod tests;
