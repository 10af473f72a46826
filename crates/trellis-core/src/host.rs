//! Host adapter contract and an in-memory host.
//!
//! The reconciler never touches a rendering target directly. It creates,
//! inserts, updates and removes host nodes through [`HostConfig`]. Every
//! operation is fallible; a failure aborts the render or commit it happens
//! in.

use std::fmt;
use std::rc::Rc;

use crate::element::{Listener, PropValue, Props};
use crate::HostError;

pub trait HostConfig {
    /// Reference to a host node. Containers are host nodes too.
    type Handle: Clone + PartialEq + fmt::Debug + 'static;

    fn create_instance(&mut self, tag: &str, props: &Props) -> Result<Self::Handle, HostError>;

    fn create_text_instance(&mut self, text: &str) -> Result<Self::Handle, HostError>;

    /// Appends `child` to a parent that is still being built off-tree.
    fn append_initial_child(
        &mut self,
        parent: &Self::Handle,
        child: &Self::Handle,
    ) -> Result<(), HostError>;

    /// Appends `child` as the last child of `container`, moving it if it is
    /// already attached.
    fn append_to_container(
        &mut self,
        container: &Self::Handle,
        child: &Self::Handle,
    ) -> Result<(), HostError>;

    /// Inserts `child` into `container` right before `before`.
    fn insert_before(
        &mut self,
        container: &Self::Handle,
        child: &Self::Handle,
        before: &Self::Handle,
    ) -> Result<(), HostError>;

    /// Detaches `child` from `container`. The node stays usable until
    /// [`HostConfig::destroy_instance`] is called for it, so a failed commit
    /// can put it back.
    fn remove_child(
        &mut self,
        container: &Self::Handle,
        child: &Self::Handle,
    ) -> Result<(), HostError>;

    /// Releases a node the reconciler will never reference again: one that
    /// was removed by a committed deletion, or one created by a render that
    /// was thrown away. Called once per node, in no particular order
    /// relative to its relatives.
    fn destroy_instance(&mut self, _handle: &Self::Handle) {}

    fn commit_text_update(&mut self, handle: &Self::Handle, text: &str) -> Result<(), HostError>;

    /// Whether the attribute change from `old` to `new` needs a commit.
    fn prepare_update(&self, _handle: &Self::Handle, old: &Props, new: &Props) -> bool {
        old != new
    }

    fn commit_update(
        &mut self,
        handle: &Self::Handle,
        old: &Props,
        new: &Props,
    ) -> Result<(), HostError>;
}

/// Identifier of a [`MemoryHost`] node.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostId(usize);

impl HostId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Operations applied to a [`MemoryHost`], in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostOp {
    CreateElement { id: HostId, tag: Rc<str> },
    CreateText { id: HostId, text: Rc<str> },
    AppendInitial { parent: HostId, child: HostId },
    Append { parent: HostId, child: HostId },
    InsertBefore { parent: HostId, child: HostId, before: HostId },
    Remove { parent: HostId, child: HostId },
    UpdateText { id: HostId, text: Rc<str> },
    UpdateProps { id: HostId },
    Destroy { id: HostId },
}

impl HostOp {
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            HostOp::CreateElement { .. }
                | HostOp::CreateText { .. }
                | HostOp::AppendInitial { .. }
                | HostOp::Destroy { .. }
        )
    }
}

#[derive(Clone, Debug)]
enum HostNodeKind {
    Container,
    Element { tag: Rc<str>, props: Props },
    Text(Rc<str>),
}

#[derive(Clone, Debug)]
struct HostNode {
    kind: HostNodeKind,
    parent: Option<HostId>,
    children: Vec<HostId>,
}

/// Host tree kept in memory, with an operation log.
#[derive(Default)]
pub struct MemoryHost {
    nodes: Vec<Option<HostNode>>,
    ops: Vec<HostOp>,
    failures: Vec<&'static str>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_container(&mut self) -> HostId {
        self.insert(HostNodeKind::Container)
    }

    /// Makes the next call of the named operation fail, once.
    pub fn fail_next(&mut self, operation: &'static str) {
        self.failures.push(operation);
    }

    pub fn ops(&self) -> &[HostOp] {
        &self.ops
    }

    pub fn take_ops(&mut self) -> Vec<HostOp> {
        std::mem::take(&mut self.ops)
    }

    /// Number of nodes alive, containers included.
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|node| node.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: HostId) -> bool {
        self.node(id).is_ok()
    }

    pub fn children(&self, id: HostId) -> &[HostId] {
        self.node(id).map(|node| node.children.as_slice()).unwrap_or(&[])
    }

    pub fn parent(&self, id: HostId) -> Option<HostId> {
        self.node(id).ok().and_then(|node| node.parent)
    }

    pub fn tag(&self, id: HostId) -> Option<&str> {
        match &self.node(id).ok()?.kind {
            HostNodeKind::Element { tag, .. } => Some(tag),
            _ => None,
        }
    }

    pub fn text(&self, id: HostId) -> Option<&str> {
        match &self.node(id).ok()?.kind {
            HostNodeKind::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn prop(&self, id: HostId, name: &str) -> Option<&PropValue> {
        match &self.node(id).ok()?.kind {
            HostNodeKind::Element { props, .. } => props.get(name),
            _ => None,
        }
    }

    /// Listeners for `event_type` along the path from the root of `target`'s
    /// tree down to `target`: capture listeners outermost first, then bubble
    /// listeners innermost first.
    pub fn listeners_for(&self, target: HostId, event_type: &str) -> Vec<Listener> {
        let mut path = Vec::new();
        let mut next = Some(target);
        while let Some(id) = next {
            path.push(id);
            next = self.parent(id);
        }
        let capture = format!("on:{event_type}:capture");
        let bubble = format!("on:{event_type}");
        let lookup = |id: &HostId, name: &str| {
            self.prop(*id, name)
                .and_then(PropValue::as_listener)
                .cloned()
        };
        let mut listeners: Vec<Listener> =
            path.iter().rev().filter_map(|id| lookup(id, &capture)).collect();
        listeners.extend(path.iter().filter_map(|id| lookup(id, &bubble)));
        listeners
    }

    /// Text content of `id`'s subtree.
    pub fn text_content(&self, id: HostId) -> String {
        let mut output = String::new();
        self.collect_text(id, &mut output);
        output
    }

    fn collect_text(&self, id: HostId, output: &mut String) {
        let Ok(node) = self.node(id) else {
            return;
        };
        if let HostNodeKind::Text(text) = &node.kind {
            output.push_str(text);
        }
        for child in &node.children {
            self.collect_text(*child, output);
        }
    }

    /// Markup of the children of `container`, e.g. `<ul><li key="a">A</li></ul>`.
    pub fn render_to_string(&self, container: HostId) -> String {
        let mut output = String::new();
        for child in self.children(container) {
            self.write_markup(*child, &mut output);
        }
        output
    }

    fn write_markup(&self, id: HostId, output: &mut String) {
        let Ok(node) = self.node(id) else {
            return;
        };
        match &node.kind {
            HostNodeKind::Text(text) => output.push_str(text),
            HostNodeKind::Container => {
                for child in &node.children {
                    self.write_markup(*child, output);
                }
            }
            HostNodeKind::Element { tag, props } => {
                output.push('<');
                output.push_str(tag);
                for (name, value) in props.iter() {
                    if matches!(value, PropValue::Listener(_) | PropValue::Any(_)) {
                        continue;
                    }
                    output.push_str(&format!(" {name}=\"{value}\""));
                }
                if node.children.is_empty() {
                    output.push_str("/>");
                    return;
                }
                output.push('>');
                for child in &node.children {
                    self.write_markup(*child, output);
                }
                output.push_str(&format!("</{tag}>"));
            }
        }
    }

    pub fn dump_tree(&self, root: HostId) -> String {
        let mut output = String::new();
        self.dump_node(&mut output, root, 0);
        output
    }

    fn dump_node(&self, output: &mut String, id: HostId, depth: usize) {
        let indent = "  ".repeat(depth);
        match self.node(id) {
            Ok(node) => {
                let label = match &node.kind {
                    HostNodeKind::Container => "container".to_string(),
                    HostNodeKind::Element { tag, .. } => format!("<{tag}>"),
                    HostNodeKind::Text(text) => format!("{text:?}"),
                };
                output.push_str(&format!("{indent}[{id}] {label}\n"));
                for child in &node.children {
                    self.dump_node(output, *child, depth + 1);
                }
            }
            Err(_) => output.push_str(&format!("{indent}[{id}] (missing)\n")),
        }
    }

    fn insert(&mut self, kind: HostNodeKind) -> HostId {
        let id = HostId(self.nodes.len());
        self.nodes.push(Some(HostNode {
            kind,
            parent: None,
            children: Vec::new(),
        }));
        id
    }

    fn node(&self, id: HostId) -> Result<&HostNode, HostError> {
        self.nodes
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| missing(id))
    }

    fn node_mut(&mut self, id: HostId) -> Result<&mut HostNode, HostError> {
        self.nodes
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| missing(id))
    }

    fn check_failure(&mut self, operation: &'static str) -> Result<(), HostError> {
        if let Some(position) = self.failures.iter().position(|name| *name == operation) {
            self.failures.remove(position);
            return Err(HostError::Operation {
                operation,
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    fn detach(&mut self, child: HostId) -> Result<(), HostError> {
        let Some(parent) = self.node(child)?.parent else {
            return Ok(());
        };
        self.node_mut(parent)?.children.retain(|id| *id != child);
        self.node_mut(child)?.parent = None;
        Ok(())
    }

    fn attach(&mut self, parent: HostId, child: HostId, at: Option<usize>) -> Result<(), HostError> {
        self.node(child)?;
        self.detach(child)?;
        let node = self.node_mut(parent)?;
        match at {
            Some(position) => node.children.insert(position, child),
            None => node.children.push(child),
        }
        self.node_mut(child)?.parent = Some(parent);
        Ok(())
    }
}

fn missing(id: HostId) -> HostError {
    HostError::MissingNode {
        handle: id.to_string(),
    }
}

impl fmt::Debug for MemoryHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryHost")
            .field("nodes", &self.len())
            .field("ops", &self.ops.len())
            .finish()
    }
}

impl HostConfig for MemoryHost {
    type Handle = HostId;

    fn create_instance(&mut self, tag: &str, props: &Props) -> Result<HostId, HostError> {
        self.check_failure("create_instance")?;
        let tag: Rc<str> = Rc::from(tag);
        let id = self.insert(HostNodeKind::Element {
            tag: tag.clone(),
            props: props.clone(),
        });
        self.ops.push(HostOp::CreateElement { id, tag });
        Ok(id)
    }

    fn create_text_instance(&mut self, text: &str) -> Result<HostId, HostError> {
        self.check_failure("create_text_instance")?;
        let text: Rc<str> = Rc::from(text);
        let id = self.insert(HostNodeKind::Text(text.clone()));
        self.ops.push(HostOp::CreateText { id, text });
        Ok(id)
    }

    fn append_initial_child(&mut self, parent: &HostId, child: &HostId) -> Result<(), HostError> {
        self.check_failure("append_initial_child")?;
        self.attach(*parent, *child, None)?;
        self.ops.push(HostOp::AppendInitial {
            parent: *parent,
            child: *child,
        });
        Ok(())
    }

    fn append_to_container(&mut self, container: &HostId, child: &HostId) -> Result<(), HostError> {
        self.check_failure("append_to_container")?;
        self.attach(*container, *child, None)?;
        self.ops.push(HostOp::Append {
            parent: *container,
            child: *child,
        });
        Ok(())
    }

    fn insert_before(
        &mut self,
        container: &HostId,
        child: &HostId,
        before: &HostId,
    ) -> Result<(), HostError> {
        self.check_failure("insert_before")?;
        self.detach(*child)?;
        let position = self
            .node(*container)?
            .children
            .iter()
            .position(|id| id == before)
            .ok_or_else(|| HostError::NotAChild {
                parent: container.to_string(),
                child: before.to_string(),
            })?;
        self.attach(*container, *child, Some(position))?;
        self.ops.push(HostOp::InsertBefore {
            parent: *container,
            child: *child,
            before: *before,
        });
        Ok(())
    }

    fn remove_child(&mut self, container: &HostId, child: &HostId) -> Result<(), HostError> {
        self.check_failure("remove_child")?;
        if self.node(*child)?.parent != Some(*container) {
            return Err(HostError::NotAChild {
                parent: container.to_string(),
                child: child.to_string(),
            });
        }
        self.detach(*child)?;
        self.ops.push(HostOp::Remove {
            parent: *container,
            child: *child,
        });
        Ok(())
    }

    fn destroy_instance(&mut self, handle: &HostId) {
        let Some(node) = self.nodes.get_mut(handle.0).and_then(Option::take) else {
            return;
        };
        if let Some(parent) = node
            .parent
            .and_then(|parent| self.nodes.get_mut(parent.0))
            .and_then(Option::as_mut)
        {
            parent.children.retain(|id| id != handle);
        }
        for child in node.children {
            if let Some(child) = self.nodes.get_mut(child.0).and_then(Option::as_mut) {
                child.parent = None;
            }
        }
        self.ops.push(HostOp::Destroy { id: *handle });
    }

    fn commit_text_update(&mut self, handle: &HostId, text: &str) -> Result<(), HostError> {
        self.check_failure("commit_text_update")?;
        let text: Rc<str> = Rc::from(text);
        match &mut self.node_mut(*handle)?.kind {
            HostNodeKind::Text(content) => *content = text.clone(),
            _ => {
                return Err(HostError::Operation {
                    operation: "commit_text_update",
                    reason: format!("{handle} is not a text node"),
                })
            }
        }
        self.ops.push(HostOp::UpdateText { id: *handle, text });
        Ok(())
    }

    fn commit_update(&mut self, handle: &HostId, _old: &Props, new: &Props) -> Result<(), HostError> {
        self.check_failure("commit_update")?;
        match &mut self.node_mut(*handle)?.kind {
            HostNodeKind::Element { props, .. } => *props = new.clone(),
            _ => {
                return Err(HostError::Operation {
                    operation: "commit_update",
                    reason: format!("{handle} is not an element"),
                })
            }
        }
        self.ops.push(HostOp::UpdateProps { id: *handle });
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/host_tests.rs"]
mod tests;
