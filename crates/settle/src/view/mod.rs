//! Component views.
//!
//! A [`ComponentView`] owns one component instance, its host element and
//! the bindings its template produced. Change detection walks the view
//! tree top-down: lifecycle hooks, then bindings, then child views.

pub mod component;
pub mod dom;
pub mod injector;
pub mod template;

use crate::event::{Event, EventKind};
use crate::logging::Diagnostics;
use crate::module::{Registry, Schema};
use crate::result::{SettleError, SettleResult};
use crate::scheduler::{Scheduler, TaskOrigin};
use component::{ComponentDef, ComponentInstance, HandlerContext};
use dom::{Document, Element, Node};
use injector::Injector;
use serde_json::Value;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use template::{parse_template, render_value, Expr, HandlerArg, HandlerCall, TemplateNode, TextPart};

/// Everything views of one compiled module share
pub(crate) struct ViewEnv {
    pub(crate) document: Document,
    pub(crate) registry: Rc<Registry>,
    pub(crate) schemas: Vec<Schema>,
    pub(crate) diagnostics: Diagnostics,
    pub(crate) scheduler: Rc<dyn Scheduler>,
}

enum Binding {
    Input {
        child: Rc<ComponentView>,
        name: String,
        expr: Expr,
        last: RefCell<Option<Value>>,
    },
    Property {
        element: Element,
        name: String,
        expr: Expr,
        last: RefCell<Option<Value>>,
    },
    Text {
        node: Rc<RefCell<String>>,
        parts: Vec<TextPart>,
        last: RefCell<Option<String>>,
    },
}

/// Rendered component
pub struct ComponentView {
    def: ComponentDef,
    instance: ComponentInstance,
    host: Element,
    injector: Injector,
    env: Rc<ViewEnv>,
    bindings: RefCell<Vec<Rc<Binding>>>,
    children: RefCell<Vec<Rc<ComponentView>>>,
    initialized: Cell<bool>,
    destroyed: Cell<bool>,
    dirty: Cell<bool>,
    this: Weak<ComponentView>,
}

impl fmt::Debug for ComponentView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentView")
            .field("component", &self.def.name())
            .field("host", &self.host)
            .field("children", &self.children.borrow().len())
            .field("destroyed", &self.destroyed.get())
            .finish()
    }
}

impl ComponentView {
    /// Instantiate `def` into `host` and render its template
    pub(crate) fn create(
        def: &ComponentDef,
        host: Element,
        parent_injector: &Injector,
        env: &Rc<ViewEnv>,
    ) -> SettleResult<Rc<Self>> {
        let injector = if def.providers().is_empty() {
            parent_injector.clone()
        } else {
            parent_injector.child(def.name(), def.providers().to_vec())
        };
        let instance = def.instantiate(&injector)?;
        let nodes = parse_template(def.template())?;
        let view = Rc::new_cyclic(|this| Self {
            def: def.clone(),
            instance,
            host,
            injector,
            env: Rc::clone(env),
            bindings: RefCell::new(Vec::new()),
            children: RefCell::new(Vec::new()),
            initialized: Cell::new(false),
            destroyed: Cell::new(false),
            dirty: Cell::new(true),
            this: this.clone(),
        });
        view.host.set_view(Some(Rc::clone(&view) as Rc<dyn Any>));
        if let Err(err) = view.render(&nodes, &view.host) {
            view.host.set_view(None);
            return Err(err);
        }
        tracing::debug!(component = def.name(), "view created");
        Ok(view)
    }

    /// View rendered into `element`, if it hosts a component
    #[must_use]
    pub fn for_element(element: &Element) -> Option<Rc<Self>> {
        element.view()?.downcast::<Self>().ok()
    }

    /// Host element
    #[must_use]
    pub const fn host(&self) -> &Element {
        &self.host
    }

    /// Component instance
    #[must_use]
    pub const fn instance(&self) -> &ComponentInstance {
        &self.instance
    }

    /// Declaration the view was created from
    #[must_use]
    pub const fn def(&self) -> &ComponentDef {
        &self.def
    }

    /// Injector of the component
    #[must_use]
    pub const fn injector(&self) -> &Injector {
        &self.injector
    }

    /// Direct child views
    #[must_use]
    pub fn children(&self) -> Vec<Rc<Self>> {
        self.children.borrow().clone()
    }

    /// All nested views, depth first
    #[must_use]
    pub fn descendants(&self) -> Vec<Rc<Self>> {
        let mut out = Vec::new();
        for child in self.children() {
            out.push(Rc::clone(&child));
            out.extend(child.descendants());
        }
        out
    }

    /// Whether `destroy` ran
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.get()
    }

    /// Mark an on-push view for checking on the next pass
    pub fn mark_for_check(&self) {
        self.dirty.set(true);
    }

    fn busy(&self) -> SettleError {
        SettleError::Component {
            message: format!("{} is already in use by a running hook", self.def.name()),
        }
    }

    // =========================================================================
    // Rendering
    // =========================================================================

    fn render(&self, nodes: &[TemplateNode], parent: &Element) -> SettleResult<()> {
        for node in nodes {
            match node {
                TemplateNode::Text(parts) if node.is_dynamic_text() => {
                    let cell = parent.append_text(String::new());
                    self.bindings.borrow_mut().push(Rc::new(Binding::Text {
                        node: cell,
                        parts: parts.clone(),
                        last: RefCell::new(None),
                    }));
                }
                TemplateNode::Text(parts) => {
                    let text: String = parts
                        .iter()
                        .filter_map(|p| match p {
                            TextPart::Literal(s) => Some(s.as_str()),
                            TextPart::Interp(_) => None,
                        })
                        .collect();
                    parent.append_text(text);
                }
                TemplateNode::Element(el) => {
                    let element = self.env.document.create_element(&el.tag);
                    for (name, value) in &el.attributes {
                        element.set_attribute(name, value.clone());
                    }
                    parent.append_child(Node::Element(element.clone()));

                    let child_def = self.env.registry.def_for_selector(&el.tag);
                    if let Some(def) = child_def {
                        let child = Self::create(&def, element.clone(), &self.injector, &self.env)?;
                        for (name, value) in &el.attributes {
                            child.write_field(name, Value::String(value.clone()))?;
                        }
                        let mut bindings = self.bindings.borrow_mut();
                        for (name, expr) in &el.properties {
                            bindings.push(Rc::new(Binding::Input {
                                child: Rc::clone(&child),
                                name: name.clone(),
                                expr: expr.clone(),
                                last: RefCell::new(None),
                            }));
                        }
                        drop(bindings);
                        self.children.borrow_mut().push(child);
                    } else {
                        self.check_known_element(&el.tag);
                        let mut bindings = self.bindings.borrow_mut();
                        for (name, expr) in &el.properties {
                            bindings.push(Rc::new(Binding::Property {
                                element: element.clone(),
                                name: name.clone(),
                                expr: expr.clone(),
                                last: RefCell::new(None),
                            }));
                        }
                        drop(bindings);
                        self.render(&el.children, &element)?;
                    }

                    for (event, call) in &el.events {
                        self.listen(&element, event, call.clone());
                    }
                }
            }
        }
        Ok(())
    }

    fn check_known_element(&self, tag: &str) {
        let permissive = self
            .env
            .schemas
            .iter()
            .any(|s| matches!(s, Schema::CustomElements | Schema::NoErrors));
        if tag.contains('-') && !permissive {
            self.env
                .diagnostics
                .error(format!("'{tag}' is not a known element"));
        }
    }

    fn listen(&self, element: &Element, event: &str, call: HandlerCall) {
        let this = self.this.clone();
        element.add_event_listener(event, TaskOrigin::Platform, move |e| {
            if let Some(view) = this.upgrade() {
                view.invoke_handler(&call, e);
            }
        });
    }

    // =========================================================================
    // Handlers and hooks
    // =========================================================================

    /// Run a template handler for `event`
    pub(crate) fn invoke_handler(&self, call: &HandlerCall, event: &Event) {
        if self.destroyed.get() {
            return;
        }
        if self.instance.dynamic().try_borrow_mut().is_err() {
            // The component is inside one of its own hooks; run after it.
            let this = self.this.clone();
            let call = call.clone();
            let event = event.clone();
            self.env.scheduler.queue_microtask(Box::new(move || {
                if let Some(view) = this.upgrade() {
                    view.invoke_handler(&call, &event);
                }
            }));
            return;
        }

        let result = self.run_hook(Some(event), |component, ctx| {
            let args: Vec<Value> = call
                .args
                .iter()
                .map(|arg| match arg {
                    HandlerArg::Event if event.kind() == EventKind::Custom => event.detail().clone(),
                    HandlerArg::Event => Value::Null,
                    HandlerArg::Expr(expr) => expr.eval(&|f| component.get(f)),
                })
                .collect();
            component.handle(&call.name, &args, ctx)
        });
        self.dirty.set(true);
        if let Err(err) = result {
            self.env.diagnostics.task_failed(format!(
                "{}: handler '{}' for '{}' failed: {err}",
                self.def.name(),
                call.name,
                event.event_type()
            ));
        }
    }

    fn run_hook(
        &self,
        event: Option<&Event>,
        hook: impl FnOnce(&mut dyn component::Component, &mut HandlerContext<'_>) -> SettleResult<()>,
    ) -> SettleResult<()> {
        let mut ctx = HandlerContext::new(Rc::clone(&self.env.scheduler), &self.injector, &self.host, event);
        let result = {
            let mut component = self
                .instance
                .dynamic()
                .try_borrow_mut()
                .map_err(|_| self.busy())?;
            hook(&mut *component, &mut ctx)
        };
        for (name, value) in ctx.take_emitted() {
            self.host.dispatch_event(&Event::custom(name, value));
        }
        result
    }

    /// Write a component field without logging; returns whether it exists
    pub(crate) fn write_field(&self, name: &str, value: Value) -> SettleResult<bool> {
        let accepted = self
            .instance
            .dynamic()
            .try_borrow_mut()
            .map_err(|_| self.busy())?
            .set(name, value);
        if accepted {
            self.dirty.set(true);
        }
        Ok(accepted)
    }

    // =========================================================================
    // Change detection
    // =========================================================================

    /// Run pending lifecycle hooks and refresh every binding in the subtree
    ///
    /// # Errors
    ///
    /// Returns error if a component is busy or a hook fails
    pub fn detect_changes(&self) -> SettleResult<()> {
        if self.destroyed.get() {
            return Ok(());
        }
        if !self.initialized.replace(true) {
            self.run_hook(None, |component, ctx| {
                component.on_init(ctx);
                Ok(())
            })?;
        }
        if !self.def.is_on_push() || self.dirty.replace(false) {
            self.update_bindings()?;
        }
        for child in self.children() {
            child.detect_changes()?;
        }
        Ok(())
    }

    fn eval(&self, expr: &Expr) -> SettleResult<Value> {
        let component = self.instance.dynamic().try_borrow().map_err(|_| self.busy())?;
        Ok(expr.eval(&|f| component.get(f)))
    }

    fn update_bindings(&self) -> SettleResult<()> {
        let bindings = self.bindings.borrow().clone();
        let mut changes: Vec<(Rc<ComponentView>, Vec<String>)> = Vec::new();

        for binding in bindings {
            match &*binding {
                Binding::Text { node, parts, last } => {
                    let mut text = String::new();
                    for part in parts {
                        match part {
                            TextPart::Literal(s) => text.push_str(s),
                            TextPart::Interp(expr) => text.push_str(&render_value(&self.eval(expr)?)),
                        }
                    }
                    if last.borrow().as_ref() != Some(&text) {
                        node.borrow_mut().clone_from(&text);
                        *last.borrow_mut() = Some(text);
                    }
                }
                Binding::Property {
                    element,
                    name,
                    expr,
                    last,
                } => {
                    let value = self.eval(expr)?;
                    if last.borrow().as_ref() != Some(&value) {
                        apply_property(element, name, &value);
                        *last.borrow_mut() = Some(value);
                    }
                }
                Binding::Input {
                    child,
                    name,
                    expr,
                    last,
                } => {
                    let value = self.eval(expr)?;
                    if last.borrow().as_ref() == Some(&value) {
                        continue;
                    }
                    *last.borrow_mut() = Some(value.clone());
                    if child.write_field(name, value)? {
                        match changes.iter_mut().find(|(v, _)| Rc::ptr_eq(v, child)) {
                            Some((_, names)) => names.push(name.clone()),
                            None => changes.push((Rc::clone(child), vec![name.clone()])),
                        }
                    } else {
                        self.env.diagnostics.error(format!(
                            "Can't bind to '{name}' since it isn't a known property of '{}'.",
                            child.def.selector()
                        ));
                    }
                }
            }
        }

        for (child, names) in changes {
            child.run_hook(None, |component, ctx| {
                component.on_changes(&names, ctx);
                Ok(())
            })?;
        }
        Ok(())
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Destroy the subtree, children first. Every view is destroyed even if
    /// a hook fails; the first failure is returned.
    ///
    /// # Errors
    ///
    /// Returns the first `on_destroy` error
    pub fn destroy(&self) -> SettleResult<()> {
        if self.destroyed.replace(true) {
            return Ok(());
        }
        let children = std::mem::take(&mut *self.children.borrow_mut());
        let mut first_error = None;
        for child in children {
            if let Err(err) = child.destroy() {
                first_error.get_or_insert(err);
            }
        }
        self.bindings.borrow_mut().clear();
        let own = match self.instance.dynamic().try_borrow_mut() {
            Ok(mut component) => component.on_destroy(),
            Err(_) => Err(self.busy()),
        };
        self.host.set_view(None);
        tracing::debug!(component = self.def.name(), "view destroyed");
        match first_error {
            Some(err) => Err(err),
            None => own,
        }
    }
}

fn apply_property(element: &Element, name: &str, value: &Value) {
    if let Some(attr) = name.strip_prefix("attr.") {
        match value {
            Value::Null | Value::Bool(false) => element.remove_attribute(attr),
            other => element.set_attribute(attr, render_value(other)),
        }
    } else if let Some(class) = name.strip_prefix("class.") {
        if template::truthy(value) {
            element.add_class(class);
        } else {
            element.remove_class(class);
        }
    } else if name == "textContent" {
        element.set_text_content(render_value(value));
    } else {
        element.set_property(name, value.clone());
    }
}
