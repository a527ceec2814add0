//! Minimal DOM: elements, text nodes, attributes, properties and
//! bubbling event dispatch.

use crate::event::Event;
use crate::locator::SelectorList;
use crate::result::SettleResult;
use crate::scheduler::TaskOrigin;
use serde_json::Value;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

/// Runs event listeners as tasks of a scheduler
pub trait EventInvoker {
    /// Invoke one listener
    fn invoke_listener(&self, origin: TaskOrigin, listener: &mut dyn FnMut());
}

impl EventInvoker for crate::zone::FakeAsyncZone {
    fn invoke_listener(&self, origin: TaskOrigin, listener: &mut dyn FnMut()) {
        self.invoke_event_task(origin, || listener());
    }
}

/// Identifier returned by `add_event_listener`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type ListenerFn = Rc<dyn Fn(&Event)>;

struct Listener {
    id: u64,
    event_type: String,
    origin: TaskOrigin,
    handler: ListenerFn,
}

struct DocumentInner {
    body: RefCell<Option<Element>>,
    invoker: RefCell<Option<Rc<dyn EventInvoker>>>,
    next_listener: Cell<u64>,
}

/// Document owning the body element
#[derive(Clone)]
pub struct Document {
    inner: Rc<DocumentInner>,
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("body", &self.body().outer_html())
            .finish()
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Create an empty document with a `<body>`
    #[must_use]
    pub fn new() -> Self {
        let doc = Self {
            inner: Rc::new(DocumentInner {
                body: RefCell::new(None),
                invoker: RefCell::new(None),
                next_listener: Cell::new(0),
            }),
        };
        let body = doc.create_element("body");
        *doc.inner.body.borrow_mut() = Some(body);
        doc
    }

    /// Body element
    #[must_use]
    pub fn body(&self) -> Element {
        self.inner
            .body
            .borrow()
            .clone()
            .unwrap_or_else(|| self.create_element("body"))
    }

    /// Create a detached element owned by this document
    #[must_use]
    pub fn create_element(&self, tag: &str) -> Element {
        Element {
            data: Rc::new(ElementData {
                tag: tag.to_ascii_lowercase(),
                attributes: RefCell::new(BTreeMap::new()),
                properties: RefCell::new(BTreeMap::new()),
                children: RefCell::new(Vec::new()),
                parent: RefCell::new(Weak::new()),
                listeners: RefCell::new(Vec::new()),
                document: Rc::downgrade(&self.inner),
                view: RefCell::new(None),
            }),
        }
    }

    /// Route listener invocations through `invoker`
    pub fn set_invoker(&self, invoker: Option<Rc<dyn EventInvoker>>) {
        *self.inner.invoker.borrow_mut() = invoker;
    }

    /// Remove every child of the body
    pub fn clear(&self) {
        let body = self.body();
        for child in body.children() {
            child.detach();
        }
        body.data.children.borrow_mut().clear();
    }
}

/// A node in the tree
#[derive(Clone)]
pub enum Node {
    /// Element node
    Element(Element),
    /// Text node; shared so bindings can update it in place
    Text(Rc<RefCell<String>>),
}

struct ElementData {
    tag: String,
    attributes: RefCell<BTreeMap<String, String>>,
    properties: RefCell<BTreeMap<String, Value>>,
    children: RefCell<Vec<Node>>,
    parent: RefCell<Weak<ElementData>>,
    listeners: RefCell<Vec<Listener>>,
    document: Weak<DocumentInner>,
    view: RefCell<Option<Rc<dyn Any>>>,
}

/// Element handle. Clones refer to the same element.
#[derive(Clone)]
pub struct Element {
    data: Rc<ElementData>,
}

impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.data, &other.data)
    }
}

impl Eq for Element {}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Element({})", self.open_tag())
    }
}

impl Element {
    /// Lowercase tag name
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.data.tag
    }

    /// Attribute value
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<String> {
        self.data.attributes.borrow().get(name).cloned()
    }

    /// All attributes in name order
    #[must_use]
    pub fn attributes(&self) -> Vec<(String, String)> {
        self.data
            .attributes
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Set an attribute
    pub fn set_attribute(&self, name: &str, value: impl Into<String>) {
        self.data
            .attributes
            .borrow_mut()
            .insert(name.to_string(), value.into());
    }

    /// Remove an attribute
    pub fn remove_attribute(&self, name: &str) {
        self.data.attributes.borrow_mut().remove(name);
    }

    /// `id` attribute
    #[must_use]
    pub fn id(&self) -> Option<String> {
        self.attribute("id")
    }

    /// Classes from the `class` attribute
    #[must_use]
    pub fn class_list(&self) -> Vec<String> {
        self.attribute("class")
            .map(|c| c.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Whether the element has `class`
    #[must_use]
    pub fn has_class(&self, class: &str) -> bool {
        self.class_list().iter().any(|c| c == class)
    }

    /// Add a class if missing
    pub fn add_class(&self, class: &str) {
        if !self.has_class(class) {
            let mut classes = self.class_list();
            classes.push(class.to_string());
            self.set_attribute("class", classes.join(" "));
        }
    }

    /// Remove a class if present
    pub fn remove_class(&self, class: &str) {
        if self.has_class(class) {
            let classes: Vec<String> = self.class_list().into_iter().filter(|c| c != class).collect();
            self.set_attribute("class", classes.join(" "));
        }
    }

    /// DOM property value
    #[must_use]
    pub fn property(&self, name: &str) -> Option<Value> {
        self.data.properties.borrow().get(name).cloned()
    }

    /// Set a DOM property; strings, numbers and booleans are reflected to
    /// the attribute of the same name.
    pub fn set_property(&self, name: &str, value: Value) {
        match &value {
            Value::String(s) => self.set_attribute(name, s.clone()),
            Value::Number(n) => self.set_attribute(name, n.to_string()),
            Value::Bool(true) => self.set_attribute(name, ""),
            Value::Bool(false) | Value::Null => self.remove_attribute(name),
            _ => {}
        }
        self.data
            .properties
            .borrow_mut()
            .insert(name.to_string(), value);
    }

    /// `value` property as text (form controls)
    #[must_use]
    pub fn value(&self) -> String {
        match self.property("value") {
            Some(Value::String(s)) => s,
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }

    /// Concatenated text of all descendant text nodes
    #[must_use]
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        for node in self.data.children.borrow().iter() {
            match node {
                Node::Text(text) => out.push_str(&text.borrow()),
                Node::Element(el) => el.collect_text(out),
            }
        }
    }

    /// Replace all children with a single text node
    pub fn set_text_content(&self, text: impl Into<String>) {
        for child in self.children() {
            child.detach();
        }
        let mut children = self.data.children.borrow_mut();
        children.clear();
        children.push(Node::Text(Rc::new(RefCell::new(text.into()))));
    }

    /// Append a child node
    pub fn append_child(&self, node: Node) {
        if let Node::Element(child) = &node {
            child.detach();
            *child.data.parent.borrow_mut() = Rc::downgrade(&self.data);
        }
        self.data.children.borrow_mut().push(node);
    }

    /// Append a text node and return its shared content
    pub fn append_text(&self, text: impl Into<String>) -> Rc<RefCell<String>> {
        let cell = Rc::new(RefCell::new(text.into()));
        self.append_child(Node::Text(Rc::clone(&cell)));
        cell
    }

    /// Remove this element from its parent
    pub fn detach(&self) {
        let parent = self.data.parent.replace(Weak::new()).upgrade();
        if let Some(parent) = parent {
            parent
                .children
                .borrow_mut()
                .retain(|n| !matches!(n, Node::Element(e) if e == self));
        }
    }

    /// Parent element
    #[must_use]
    pub fn parent(&self) -> Option<Element> {
        self.data.parent.borrow().upgrade().map(|data| Element { data })
    }

    /// Whether the element is attached under a document's body
    #[must_use]
    pub fn is_connected(&self) -> bool {
        let mut current = self.clone();
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current.tag() == "body"
    }

    /// Child elements
    #[must_use]
    pub fn children(&self) -> Vec<Element> {
        self.data
            .children
            .borrow()
            .iter()
            .filter_map(|n| match n {
                Node::Element(e) => Some(e.clone()),
                Node::Text(_) => None,
            })
            .collect()
    }

    /// Descendant elements in document order
    #[must_use]
    pub fn descendants(&self) -> Vec<Element> {
        let mut out = Vec::new();
        for child in self.children() {
            out.push(child.clone());
            out.extend(child.descendants());
        }
        out
    }

    /// Whether the element matches a CSS selector
    ///
    /// # Errors
    ///
    /// Returns error if the selector cannot be parsed
    pub fn matches(&self, selector: &str) -> SettleResult<bool> {
        Ok(SelectorList::parse(selector)?.matches(self))
    }

    /// First descendant matching a CSS selector
    ///
    /// # Errors
    ///
    /// Returns error if the selector cannot be parsed
    pub fn query_selector(&self, selector: &str) -> SettleResult<Option<Element>> {
        let list = SelectorList::parse(selector)?;
        Ok(self.descendants().into_iter().find(|e| list.matches(e)))
    }

    /// All descendants matching a CSS selector
    ///
    /// # Errors
    ///
    /// Returns error if the selector cannot be parsed
    pub fn query_selector_all(&self, selector: &str) -> SettleResult<Vec<Element>> {
        let list = SelectorList::parse(selector)?;
        Ok(self
            .descendants()
            .into_iter()
            .filter(|e| list.matches(e))
            .collect())
    }

    /// Register a listener
    pub fn add_event_listener(
        &self,
        event_type: &str,
        origin: TaskOrigin,
        handler: impl Fn(&Event) + 'static,
    ) -> ListenerId {
        let id = self.data.document.upgrade().map_or(0, |doc| {
            let id = doc.next_listener.get() + 1;
            doc.next_listener.set(id);
            id
        });
        self.data.listeners.borrow_mut().push(Listener {
            id,
            event_type: event_type.to_string(),
            origin,
            handler: Rc::new(handler),
        });
        ListenerId(id)
    }

    /// Remove a listener
    pub fn remove_event_listener(&self, id: ListenerId) {
        self.data.listeners.borrow_mut().retain(|l| l.id != id.0);
    }

    /// Number of listeners for `event_type`
    #[must_use]
    pub fn listener_count(&self, event_type: &str) -> usize {
        self.data
            .listeners
            .borrow()
            .iter()
            .filter(|l| l.event_type == event_type)
            .count()
    }

    /// Dispatch `event` here and, if it bubbles, on every ancestor. Each
    /// listener runs as an event task of the document's invoker. Returns
    /// `false` if a listener called `prevent_default`.
    pub fn dispatch_event(&self, event: &Event) -> bool {
        event.set_target(self);
        let invoker = self
            .data
            .document
            .upgrade()
            .and_then(|doc| doc.invoker.borrow().clone());

        let mut current = Some(self.clone());
        while let Some(element) = current {
            let listeners: Vec<(TaskOrigin, ListenerFn)> = element
                .data
                .listeners
                .borrow()
                .iter()
                .filter(|l| l.event_type == event.event_type())
                .map(|l| (l.origin, Rc::clone(&l.handler)))
                .collect();
            event.set_current_target(Some(&element));
            for (origin, handler) in listeners {
                let mut call = || handler(event);
                match &invoker {
                    Some(invoker) => invoker.invoke_listener(origin, &mut call),
                    None => call(),
                }
            }
            if !event.bubbles() || event.propagation_stopped() {
                break;
            }
            current = element.parent();
        }
        event.set_current_target(None);
        !event.default_prevented()
    }

    /// Dispatch a mouse click
    pub fn click(&self) -> bool {
        self.dispatch_event(&Event::create("click", None, []))
    }

    pub(crate) fn set_view(&self, view: Option<Rc<dyn Any>>) {
        *self.data.view.borrow_mut() = view;
    }

    pub(crate) fn view(&self) -> Option<Rc<dyn Any>> {
        self.data.view.borrow().clone()
    }

    fn open_tag(&self) -> String {
        let mut out = format!("<{}", self.data.tag);
        for (name, value) in self.data.attributes.borrow().iter() {
            if value.is_empty() {
                out.push_str(&format!(" {name}"));
            } else {
                out.push_str(&format!(" {name}=\"{value}\""));
            }
        }
        out.push('>');
        out
    }

    /// Serialized markup of the element and its subtree
    #[must_use]
    pub fn outer_html(&self) -> String {
        let mut out = self.open_tag();
        for node in self.data.children.borrow().iter() {
            match node {
                Node::Text(text) => out.push_str(&text.borrow()),
                Node::Element(el) => out.push_str(&el.outer_html()),
            }
        }
        out.push_str(&format!("</{}>", self.data.tag));
        out
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tree() -> (Document, Element, Element) {
        let doc = Document::new();
        let outer = doc.create_element("div");
        outer.set_attribute("class", "outer box");
        let inner = doc.create_element("span");
        inner.set_attribute("id", "inner");
        outer.append_child(Node::Element(inner.clone()));
        doc.body().append_child(Node::Element(outer.clone()));
        (doc, outer, inner)
    }

    #[test]
    fn test_text_content_and_html() {
        let (_doc, outer, inner) = tree();
        inner.append_text("Hello");
        outer.append_text(" World");
        assert_eq!(outer.text_content(), "Hello World");
        assert_eq!(
            outer.outer_html(),
            "<div class=\"outer box\"><span id=\"inner\">Hello</span> World</div>"
        );
    }

    #[test]
    fn test_classes_and_properties() {
        let (_doc, outer, _) = tree();
        assert!(outer.has_class("box"));
        outer.add_class("active");
        assert_eq!(outer.class_list(), vec!["outer", "box", "active"]);
        outer.set_property("disabled", json!(true));
        assert_eq!(outer.attribute("disabled").as_deref(), Some(""));
        outer.set_property("disabled", json!(false));
        assert_eq!(outer.attribute("disabled"), None);
    }

    #[test]
    fn test_event_bubbles_to_ancestors() {
        let (doc, outer, inner) = tree();
        let hits = Rc::new(RefCell::new(Vec::new()));
        let h = Rc::clone(&hits);
        outer.add_event_listener("click", TaskOrigin::Root, move |e| {
            h.borrow_mut().push(format!("outer:{}", e.target().unwrap().tag()));
        });
        let h = Rc::clone(&hits);
        doc.body().add_event_listener("click", TaskOrigin::Root, move |_| {
            h.borrow_mut().push("body".to_string());
        });
        inner.click();
        assert_eq!(*hits.borrow(), vec!["outer:span", "body"]);
    }

    #[test]
    fn test_stop_propagation_and_remove() {
        let (_doc, outer, inner) = tree();
        let count = Rc::new(Cell::new(0));
        let c = Rc::clone(&count);
        outer.add_event_listener("click", TaskOrigin::Root, move |_| c.set(c.get() + 1));
        let id = inner.add_event_listener("click", TaskOrigin::Root, |e| e.stop_propagation());
        inner.click();
        assert_eq!(count.get(), 0);
        inner.remove_event_listener(id);
        inner.click();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_detach_disconnects() {
        let (_doc, outer, inner) = tree();
        assert!(inner.is_connected());
        outer.detach();
        assert!(!inner.is_connected());
        assert_eq!(inner.parent(), Some(outer));
    }

    #[test]
    fn test_listeners_run_through_invoker() {
        struct Counting(Cell<u32>);
        impl EventInvoker for Counting {
            fn invoke_listener(&self, _origin: TaskOrigin, listener: &mut dyn FnMut()) {
                self.0.set(self.0.get() + 1);
                listener();
            }
        }
        let (doc, _outer, inner) = tree();
        let invoker = Rc::new(Counting(Cell::new(0)));
        doc.set_invoker(Some(invoker.clone()));
        inner.add_event_listener("input", TaskOrigin::Platform, |_| {});
        inner.dispatch_event(&Event::new("input"));
        assert_eq!(invoker.0.get(), 1);
    }
}
