//! Declarative element descriptions consumed by the reconciler.
//!
//! An [`Element`] is an immutable, cheaply clonable description of what a
//! position in the tree should contain. Components return elements from
//! their render function; the reconciler diffs them against the committed
//! fiber tree.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::hooks::Hooks;
use crate::RenderError;

/// Identity of a child within a list of siblings.
pub type Key = Rc<str>;

/// Host event listener. Listeners are stored as props named `on:<event>` and
/// `on:<event>:capture`.
pub type Listener = Rc<dyn Fn(&Event)>;

/// Render function of a component.
pub type RenderFn = dyn Fn(&mut Hooks<'_>, &Props) -> Result<Element, RenderError>;

#[derive(Clone, Default)]
pub enum Element {
    /// Renders nothing.
    #[default]
    Empty,
    Text(Rc<str>),
    Node(Rc<ElementNode>),
    List(Rc<Vec<Element>>),
    /// A payload the reconciler does not understand. It is reported and
    /// reconciles to nothing.
    Opaque(Rc<dyn Any>),
}

impl Element {
    pub fn text(content: impl fmt::Display) -> Self {
        Element::Text(Rc::from(content.to_string()))
    }

    pub fn list(items: impl IntoIterator<Item = Element>) -> Self {
        Element::List(Rc::new(items.into_iter().collect()))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Element::Empty)
    }

    pub fn key(&self) -> Option<&Key> {
        match self {
            Element::Node(node) => node.key.as_ref(),
            _ => None,
        }
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Element::Empty => f.write_str("Empty"),
            Element::Text(text) => write!(f, "Text({text:?})"),
            Element::Node(node) => node.fmt(f),
            Element::List(items) => f.debug_list().entries(items.iter()).finish(),
            Element::Opaque(_) => f.write_str("Opaque"),
        }
    }
}

impl From<&str> for Element {
    fn from(value: &str) -> Self {
        Element::Text(Rc::from(value))
    }
}

impl From<String> for Element {
    fn from(value: String) -> Self {
        Element::Text(Rc::from(value))
    }
}

impl From<Rc<str>> for Element {
    fn from(value: Rc<str>) -> Self {
        Element::Text(value)
    }
}

impl From<i64> for Element {
    fn from(value: i64) -> Self {
        Element::text(value)
    }
}

impl From<i32> for Element {
    fn from(value: i32) -> Self {
        Element::text(value)
    }
}

impl From<ElementNode> for Element {
    fn from(value: ElementNode) -> Self {
        Element::Node(Rc::new(value))
    }
}

impl From<Vec<Element>> for Element {
    fn from(value: Vec<Element>) -> Self {
        Element::List(Rc::new(value))
    }
}

impl<T: Into<Element>> From<Option<T>> for Element {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or_default()
    }
}

/// What kind of fiber an element node produces.
#[derive(Clone)]
pub enum ElementKind {
    Host(Rc<str>),
    Component(Component),
    Fragment,
}

impl ElementKind {
    pub fn name(&self) -> &str {
        match self {
            ElementKind::Host(tag) => tag,
            ElementKind::Component(component) => component.name(),
            ElementKind::Fragment => "Fragment",
        }
    }
}

impl fmt::Debug for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementKind::Host(tag) => write!(f, "Host({tag})"),
            ElementKind::Component(component) => write!(f, "Component({})", component.name()),
            ElementKind::Fragment => f.write_str("Fragment"),
        }
    }
}

/// A described host element, component invocation or fragment.
///
/// Built with [`host`], [`component`] and [`fragment`] and the chained
/// setters below.
#[derive(Clone)]
pub struct ElementNode {
    pub kind: ElementKind,
    pub key: Option<Key>,
    pub props: Props,
    pub node_ref: Option<NodeRef>,
}

impl ElementNode {
    pub fn new(kind: ElementKind) -> Self {
        Self {
            kind,
            key: None,
            props: Props::default(),
            node_ref: None,
        }
    }

    pub fn key(mut self, key: impl AsRef<str>) -> Self {
        self.key = Some(Rc::from(key.as_ref()));
        self
    }

    pub fn prop(mut self, name: &str, value: impl Into<PropValue>) -> Self {
        self.props.set(name, value.into());
        self
    }

    pub fn on(mut self, event: &str, listener: impl Fn(&Event) + 'static) -> Self {
        self.props
            .set(&format!("on:{event}"), PropValue::Listener(Rc::new(listener)));
        self
    }

    pub fn on_capture(mut self, event: &str, listener: impl Fn(&Event) + 'static) -> Self {
        self.props.set(
            &format!("on:{event}:capture"),
            PropValue::Listener(Rc::new(listener)),
        );
        self
    }

    pub fn child(mut self, child: impl Into<Element>) -> Self {
        let child = child.into();
        self.props.children = match std::mem::take(&mut self.props.children) {
            Element::Empty => child,
            Element::List(items) => {
                let mut items = Rc::unwrap_or_clone(items);
                items.push(child);
                Element::List(Rc::new(items))
            }
            previous => Element::List(Rc::new(vec![previous, child])),
        };
        self
    }

    pub fn children(mut self, children: impl Into<Element>) -> Self {
        self.props.children = children.into();
        self
    }

    pub fn node_ref(mut self, node_ref: &NodeRef) -> Self {
        self.node_ref = Some(node_ref.clone());
        self
    }

    /// Fragments without a key are transparent at the top of a child list.
    pub(crate) fn is_unkeyed_fragment(&self) -> bool {
        matches!(self.kind, ElementKind::Fragment) && self.key.is_none()
    }
}

impl fmt::Debug for ElementNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElementNode")
            .field("kind", &self.kind)
            .field("key", &self.key)
            .field("props", &self.props)
            .finish()
    }
}

pub fn host(tag: &str) -> ElementNode {
    ElementNode::new(ElementKind::Host(Rc::from(tag)))
}

pub fn component(component: &Component) -> ElementNode {
    ElementNode::new(ElementKind::Component(component.clone()))
}

pub fn fragment(children: impl Into<Element>) -> ElementNode {
    ElementNode::new(ElementKind::Fragment).children(children)
}

/// A function component. Two components are the same type only if they
/// share the same render function allocation, so create each component once
/// and clone it.
#[derive(Clone)]
pub struct Component {
    name: &'static str,
    render: Rc<RenderFn>,
}

impl Component {
    pub fn new(
        name: &'static str,
        render: impl Fn(&mut Hooks<'_>, &Props) -> Result<Element, RenderError> + 'static,
    ) -> Self {
        Self {
            name,
            render: Rc::new(render),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn render(&self, hooks: &mut Hooks<'_>, props: &Props) -> Result<Element, RenderError> {
        (self.render)(hooks, props)
    }
}

impl PartialEq for Component {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Rc::as_ptr(&self.render), Rc::as_ptr(&other.render))
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Component({})", self.name)
    }
}

#[derive(Clone)]
pub enum PropValue {
    Str(Rc<str>),
    Int(i64),
    Float(f64),
    Bool(bool),
    Listener(Listener),
    Any(Rc<dyn Any>),
}

impl PropValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropValue::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            PropValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_listener(&self) -> Option<&Listener> {
        match self {
            PropValue::Listener(listener) => Some(listener),
            _ => None,
        }
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        match self {
            PropValue::Any(value) => value.downcast_ref(),
            _ => None,
        }
    }
}

impl PartialEq for PropValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (PropValue::Str(a), PropValue::Str(b)) => a == b,
            (PropValue::Int(a), PropValue::Int(b)) => a == b,
            (PropValue::Float(a), PropValue::Float(b)) => a.to_bits() == b.to_bits(),
            (PropValue::Bool(a), PropValue::Bool(b)) => a == b,
            (PropValue::Listener(a), PropValue::Listener(b)) => {
                std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b))
            }
            (PropValue::Any(a), PropValue::Any(b)) => {
                std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b))
            }
            _ => false,
        }
    }
}

impl fmt::Debug for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropValue::Str(value) => write!(f, "{value:?}"),
            PropValue::Int(value) => write!(f, "{value}"),
            PropValue::Float(value) => write!(f, "{value}"),
            PropValue::Bool(value) => write!(f, "{value}"),
            PropValue::Listener(_) => f.write_str("<listener>"),
            PropValue::Any(_) => f.write_str("<any>"),
        }
    }
}

impl fmt::Display for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropValue::Str(value) => f.write_str(value),
            other => fmt::Debug::fmt(other, f),
        }
    }
}

impl From<&str> for PropValue {
    fn from(value: &str) -> Self {
        PropValue::Str(Rc::from(value))
    }
}

impl From<String> for PropValue {
    fn from(value: String) -> Self {
        PropValue::Str(Rc::from(value))
    }
}

impl From<i64> for PropValue {
    fn from(value: i64) -> Self {
        PropValue::Int(value)
    }
}

impl From<i32> for PropValue {
    fn from(value: i32) -> Self {
        PropValue::Int(value.into())
    }
}

impl From<f64> for PropValue {
    fn from(value: f64) -> Self {
        PropValue::Float(value)
    }
}

impl From<bool> for PropValue {
    fn from(value: bool) -> Self {
        PropValue::Bool(value)
    }
}

/// Attributes plus children of an element.
///
/// Equality compares attributes only; children are diffed by the reconciler.
#[derive(Clone, Default)]
pub struct Props {
    attributes: SmallVec<[(Rc<str>, PropValue); 4]>,
    children: Element,
}

impl Props {
    pub fn new() -> Self {
        Self::default()
    }

    /// Props of a text fiber: the text is its only child.
    pub(crate) fn text(content: Rc<str>) -> Self {
        Self {
            attributes: SmallVec::new(),
            children: Element::Text(content),
        }
    }

    pub(crate) fn with_children(children: Element) -> Self {
        Self {
            attributes: SmallVec::new(),
            children,
        }
    }

    pub fn with(mut self, name: &str, value: impl Into<PropValue>) -> Self {
        self.set(name, value.into());
        self
    }

    pub fn set(&mut self, name: &str, value: PropValue) {
        match self.attributes.iter_mut().find(|(key, _)| &**key == name) {
            Some((_, slot)) => *slot = value,
            None => self.attributes.push((Rc::from(name), value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&PropValue> {
        self.attributes
            .iter()
            .find(|(key, _)| &**key == name)
            .map(|(_, value)| value)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(PropValue::as_str)
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(PropValue::as_int)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropValue)> {
        self.attributes.iter().map(|(key, value)| (&**key, value))
    }

    pub fn children(&self) -> &Element {
        &self.children
    }

    /// Text content of a text fiber's props.
    pub fn text_content(&self) -> Option<&Rc<str>> {
        match &self.children {
            Element::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl PartialEq for Props {
    fn eq(&self, other: &Self) -> bool {
        self.attributes.len() == other.attributes.len()
            && self
                .attributes
                .iter()
                .all(|(name, value)| other.get(name) == Some(value))
    }
}

impl fmt::Debug for Props {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.attributes.iter().map(|(k, v)| (k, v)))
            .finish()
    }
}

/// Holds the host handle of the element it is attached to while that
/// element is mounted.
#[derive(Clone, Default)]
pub struct NodeRef {
    current: Rc<RefCell<Option<Box<dyn Any>>>>,
}

impl NodeRef {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<T: Clone + 'static>(&self) -> Option<T> {
        self.current
            .borrow()
            .as_ref()
            .and_then(|handle| handle.downcast_ref::<T>())
            .cloned()
    }

    pub fn is_attached(&self) -> bool {
        self.current.borrow().is_some()
    }

    pub(crate) fn attach(&self, handle: Box<dyn Any>) {
        *self.current.borrow_mut() = Some(handle);
    }

    pub(crate) fn detach(&self) {
        self.current.borrow_mut().take();
    }
}

impl PartialEq for NodeRef {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.current, &other.current)
    }
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRef")
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// A host event travelling through listeners.
pub struct Event {
    event_type: Rc<str>,
    stopped: Cell<bool>,
}

impl Event {
    pub fn new(event_type: &str) -> Self {
        Self {
            event_type: Rc::from(event_type),
            stopped: Cell::new(false),
        }
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn stop_propagation(&self) {
        self.stopped.set(true);
    }

    pub fn is_propagation_stopped(&self) -> bool {
        self.stopped.get()
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("event_type", &self.event_type)
            .field("stopped", &self.stopped.get())
            .finish()
    }
}
