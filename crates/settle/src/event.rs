//! DOM event types for testing.

use crate::view::dom::Element;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cell::{Cell, RefCell};

/// Event types created as mouse events
pub const MOUSE_EVENTS: [&str; 7] = [
    "click",
    "dblclick",
    "mousedown",
    "mousemove",
    "mouseout",
    "mouseover",
    "mouseup",
];

/// Event types created as keyboard events when an init is given
pub const KEYBOARD_EVENTS: [&str; 3] = ["keydown", "keypress", "keyup"];

/// Event interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// Plain event
    Basic,
    /// Mouse event
    Mouse,
    /// Keyboard event
    Keyboard,
    /// Component output
    Custom,
}

/// Keyboard and mouse event fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventInit {
    /// Key value (e.g. `"Enter"`)
    pub key: Option<String>,
    /// Physical key code (e.g. `"KeyA"`)
    pub code: Option<String>,
    /// Control modifier
    pub ctrl_key: bool,
    /// Shift modifier
    pub shift_key: bool,
    /// Alt modifier
    pub alt_key: bool,
    /// Meta modifier
    pub meta_key: bool,
    /// Pointer X coordinate
    pub client_x: f64,
    /// Pointer Y coordinate
    pub client_y: f64,
}

impl EventInit {
    /// Init with a key value
    #[must_use]
    pub fn key(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            ..Self::default()
        }
    }

    /// Init with pointer coordinates
    #[must_use]
    pub fn at(client_x: f64, client_y: f64) -> Self {
        Self {
            client_x,
            client_y,
            ..Self::default()
        }
    }

    /// Set the key code
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Hold control
    #[must_use]
    pub const fn with_ctrl(mut self) -> Self {
        self.ctrl_key = true;
        self
    }

    /// Hold shift
    #[must_use]
    pub const fn with_shift(mut self) -> Self {
        self.shift_key = true;
        self
    }
}

/// A dispatched DOM event
#[derive(Debug, Clone)]
pub struct Event {
    event_type: String,
    kind: EventKind,
    init: EventInit,
    detail: Value,
    props: Map<String, Value>,
    bubbles: bool,
    cancelable: bool,
    target: RefCell<Option<Element>>,
    current_target: RefCell<Option<Element>>,
    default_prevented: Cell<bool>,
    propagation_stopped: Cell<bool>,
}

impl Event {
    /// Plain bubbling, cancelable event
    #[must_use]
    pub fn new(event_type: impl Into<String>) -> Self {
        Self::build(event_type.into(), EventKind::Basic, EventInit::default(), true)
    }

    /// Event the way `trigger_event` creates it: mouse types become mouse
    /// events, keyboard types with an init become keyboard events, anything
    /// else is a plain event. All of them bubble and are cancelable;
    /// `extra_props` are readable through [`Event::prop`].
    #[must_use]
    pub fn create(
        event_type: impl Into<String>,
        init: Option<EventInit>,
        extra_props: impl IntoIterator<Item = (String, Value)>,
    ) -> Self {
        let event_type = event_type.into();
        let kind = if MOUSE_EVENTS.contains(&event_type.as_str()) {
            EventKind::Mouse
        } else if KEYBOARD_EVENTS.contains(&event_type.as_str()) && init.is_some() {
            EventKind::Keyboard
        } else {
            EventKind::Basic
        };
        let mut event = Self::build(event_type, kind, init.unwrap_or_default(), true);
        event.props.extend(extra_props);
        event
    }

    /// Non-bubbling component output carrying `detail`
    #[must_use]
    pub fn custom(event_type: impl Into<String>, detail: Value) -> Self {
        let mut event = Self::build(event_type.into(), EventKind::Custom, EventInit::default(), false);
        event.detail = detail;
        event
    }

    fn build(event_type: String, kind: EventKind, init: EventInit, bubbles: bool) -> Self {
        Self {
            event_type,
            kind,
            init,
            detail: Value::Null,
            props: Map::new(),
            bubbles,
            cancelable: true,
            target: RefCell::new(None),
            current_target: RefCell::new(None),
            default_prevented: Cell::new(false),
            propagation_stopped: Cell::new(false),
        }
    }

    /// Event type name
    #[must_use]
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Event interface
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.kind
    }

    /// Keyboard/mouse fields
    #[must_use]
    pub const fn init(&self) -> &EventInit {
        &self.init
    }

    /// Key value of a keyboard event
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.init.key.as_deref()
    }

    /// Payload of a component output (`$event`)
    #[must_use]
    pub const fn detail(&self) -> &Value {
        &self.detail
    }

    /// Extra property set when the event was created
    #[must_use]
    pub fn prop(&self, name: &str) -> Option<&Value> {
        self.props.get(name)
    }

    /// Whether the event travels up the ancestor chain
    #[must_use]
    pub const fn bubbles(&self) -> bool {
        self.bubbles
    }

    /// Element the event was dispatched on
    #[must_use]
    pub fn target(&self) -> Option<Element> {
        self.target.borrow().clone()
    }

    /// Element whose listener is running
    #[must_use]
    pub fn current_target(&self) -> Option<Element> {
        self.current_target.borrow().clone()
    }

    pub(crate) fn set_target(&self, element: &Element) {
        *self.target.borrow_mut() = Some(element.clone());
    }

    pub(crate) fn set_current_target(&self, element: Option<&Element>) {
        *self.current_target.borrow_mut() = element.cloned();
    }

    /// Cancel the default action
    pub fn prevent_default(&self) {
        if self.cancelable {
            self.default_prevented.set(true);
        }
    }

    /// Whether `prevent_default` was called
    #[must_use]
    pub fn default_prevented(&self) -> bool {
        self.default_prevented.get()
    }

    /// Stop bubbling after the current element
    pub fn stop_propagation(&self) {
        self.propagation_stopped.set(true);
    }

    /// Whether `stop_propagation` was called
    #[must_use]
    pub fn propagation_stopped(&self) -> bool {
        self.propagation_stopped.get()
    }
}
