//! Component model.
//!
//! A component is a Rust type with a selector, a template and a field
//! table the template binds against. Fields are read and written as
//! `serde_json::Value`s by name; event bindings call [`Component::handle`].

use super::injector::{Injector, Provider};
use crate::event::Event;
use crate::result::{SettleError, SettleResult};
use crate::scheduler::Scheduler;
use crate::view::dom::Element;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

/// Shared handle to a bootstrapped component
pub type ComponentRef<C> = Rc<RefCell<C>>;

/// A renderable component.
///
/// Lifecycle: `create` → bound inputs applied → `on_changes` (template
/// bindings only) → `on_init` (first change detection) → ... →
/// `on_destroy`.
pub trait Component: Any {
    /// Element tag the component renders into (`greeting-card`)
    fn selector() -> &'static str
    where
        Self: Sized;

    /// Template source
    fn template() -> &'static str
    where
        Self: Sized;

    /// Construct the component, resolving dependencies from `injector`
    ///
    /// # Errors
    ///
    /// Returns error if a dependency cannot be resolved
    fn create(injector: &Injector) -> SettleResult<Self>
    where
        Self: Sized;

    /// Providers scoped to this component and its children
    fn providers() -> Vec<Provider>
    where
        Self: Sized,
    {
        Vec::new()
    }

    /// Whether the view is only checked when marked dirty
    fn on_push() -> bool
    where
        Self: Sized,
    {
        false
    }

    /// Read a bindable field
    fn get(&self, field: &str) -> Option<Value>;

    /// Write a bindable field; returns `false` for unknown fields
    fn set(&mut self, _field: &str, _value: Value) -> bool {
        false
    }

    /// Run an event handler named in the template. `$event` arguments
    /// carry the payload of component outputs and `null` for DOM events;
    /// the DOM event itself is available from [`HandlerContext::event`].
    ///
    /// # Errors
    ///
    /// Returns error for unknown handlers or failing handlers
    fn handle(
        &mut self,
        handler: &str,
        _args: &[Value],
        _ctx: &mut HandlerContext<'_>,
    ) -> SettleResult<()> {
        Err(SettleError::Component {
            message: format!("no handler named '{handler}'"),
        })
    }

    /// Inputs changed through template bindings
    fn on_changes(&mut self, _changed: &[String], _ctx: &mut HandlerContext<'_>) {}

    /// First change detection
    fn on_init(&mut self, _ctx: &mut HandlerContext<'_>) {}

    /// Teardown
    ///
    /// # Errors
    ///
    /// Returns error if cleanup fails
    fn on_destroy(&mut self) -> SettleResult<()> {
        Ok(())
    }
}

/// Emits outputs from callbacks that outlive a handler call
#[derive(Debug, Clone)]
pub struct OutputEmitter {
    host: Element,
}

impl OutputEmitter {
    /// Dispatch output `name` on the component's host element
    pub fn emit(&self, name: &str, value: impl Into<Value>) {
        self.host.dispatch_event(&Event::custom(name, value.into()));
    }
}

/// Capabilities available to lifecycle hooks and handlers
pub struct HandlerContext<'a> {
    scheduler: Rc<dyn Scheduler>,
    injector: &'a Injector,
    host: &'a Element,
    event: Option<&'a Event>,
    emitted: Vec<(String, Value)>,
}

impl fmt::Debug for HandlerContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerContext")
            .field("host", self.host)
            .field("event", &self.event.map(Event::event_type))
            .field("emitted", &self.emitted)
            .finish()
    }
}

impl<'a> HandlerContext<'a> {
    pub(crate) fn new(
        scheduler: Rc<dyn Scheduler>,
        injector: &'a Injector,
        host: &'a Element,
        event: Option<&'a Event>,
    ) -> Self {
        Self {
            scheduler,
            injector,
            host,
            event,
            emitted: Vec::new(),
        }
    }

    /// Emit an output once the current hook returns
    pub fn emit(&mut self, output: &str, value: impl Into<Value>) {
        self.emitted.push((output.to_string(), value.into()));
    }

    /// Framework scheduler; work scheduled here triggers change detection
    #[must_use]
    pub fn scheduler(&self) -> Rc<dyn Scheduler> {
        Rc::clone(&self.scheduler)
    }

    /// Injector of the component
    #[must_use]
    pub const fn injector(&self) -> &Injector {
        self.injector
    }

    /// Host element of the component
    #[must_use]
    pub const fn host(&self) -> &Element {
        self.host
    }

    /// Event being handled, if any
    #[must_use]
    pub const fn event(&self) -> Option<&Event> {
        self.event
    }

    /// Emitter usable from scheduled callbacks
    #[must_use]
    pub fn emitter(&self) -> OutputEmitter {
        OutputEmitter {
            host: self.host.clone(),
        }
    }

    pub(crate) fn take_emitted(&mut self) -> Vec<(String, Value)> {
        std::mem::take(&mut self.emitted)
    }
}

/// A created component, both as its concrete type and as `dyn Component`
#[derive(Clone)]
pub struct ComponentInstance {
    any: Rc<dyn Any>,
    dynamic: Rc<RefCell<dyn Component>>,
    type_id: TypeId,
    type_name: &'static str,
}

impl fmt::Debug for ComponentInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentInstance")
            .field("type", &self.type_name)
            .finish()
    }
}

impl ComponentInstance {
    fn new<C: Component>(component: C) -> Self {
        let rc = Rc::new(RefCell::new(component));
        Self {
            any: Rc::clone(&rc) as Rc<dyn Any>,
            dynamic: rc,
            type_id: TypeId::of::<C>(),
            type_name: std::any::type_name::<C>(),
        }
    }

    /// Typed handle, if the instance is a `C`
    #[must_use]
    pub fn downcast<C: Component>(&self) -> Option<ComponentRef<C>> {
        Rc::clone(&self.any).downcast::<RefCell<C>>().ok()
    }

    /// Whether the instance is a `C`
    #[must_use]
    pub fn is<C: Component>(&self) -> bool {
        self.type_id == TypeId::of::<C>()
    }

    /// Component type name
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Read a field through the component's field table
    #[must_use]
    pub fn get(&self, field: &str) -> Option<Value> {
        self.dynamic.try_borrow().ok().and_then(|c| c.get(field))
    }

    pub(crate) fn dynamic(&self) -> &Rc<RefCell<dyn Component>> {
        &self.dynamic
    }
}

type Factory = Rc<dyn Fn(&Injector) -> SettleResult<ComponentInstance>>;

/// Type-erased component declaration
#[derive(Clone)]
pub struct ComponentDef {
    type_id: TypeId,
    type_name: &'static str,
    selector: String,
    template: String,
    providers: Vec<Provider>,
    on_push: bool,
    factory: Factory,
}

impl fmt::Debug for ComponentDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentDef")
            .field("type", &self.type_name)
            .field("selector", &self.selector)
            .field("providers", &self.providers.len())
            .finish()
    }
}

impl ComponentDef {
    /// Declaration of `C`
    #[must_use]
    pub fn of<C: Component>() -> Self {
        Self {
            type_id: TypeId::of::<C>(),
            type_name: std::any::type_name::<C>(),
            selector: C::selector().to_string(),
            template: C::template().to_string(),
            providers: C::providers(),
            on_push: C::on_push(),
            factory: Rc::new(|injector| C::create(injector).map(ComponentInstance::new)),
        }
    }

    /// Replace the template
    #[must_use]
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    /// Add component-scoped providers
    #[must_use]
    pub fn with_providers(mut self, providers: Vec<Provider>) -> Self {
        self.providers.extend(providers);
        self
    }

    /// Component type id
    #[must_use]
    pub const fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Short type name (without module path)
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.type_name.rsplit("::").next().unwrap_or(self.type_name)
    }

    /// Selector tag
    #[must_use]
    pub fn selector(&self) -> &str {
        &self.selector
    }

    /// Template source
    #[must_use]
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Component-scoped providers
    #[must_use]
    pub fn providers(&self) -> &[Provider] {
        &self.providers
    }

    /// Whether the component uses on-push checking
    #[must_use]
    pub const fn is_on_push(&self) -> bool {
        self.on_push
    }

    pub(crate) fn instantiate(&self, injector: &Injector) -> SettleResult<ComponentInstance> {
        (self.factory)(injector)
    }
}

// =============================================================================
// Bound instance
// =============================================================================

type BoundHandler = Rc<dyn Fn(&[Value])>;

/// Typed stand-in for the controller object of a template bootstrap.
///
/// Only the fields and handlers declared through the builder exist; reading
/// or writing anything else is an `UnknownField` error. Clones share state,
/// so a test can keep one and mutate fields after bootstrap.
#[derive(Clone, Default)]
pub struct BoundInstance {
    fields: Rc<RefCell<BTreeMap<String, Value>>>,
    handlers: Rc<HashMap<String, BoundHandler>>,
}

impl fmt::Debug for BoundInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut handlers: Vec<_> = self.handlers.keys().collect();
        handlers.sort();
        f.debug_struct("BoundInstance")
            .field("fields", &self.fields.borrow())
            .field("handlers", &handlers)
            .finish()
    }
}

impl BoundInstance {
    /// Start declaring fields and handlers
    #[must_use]
    pub fn builder() -> BoundInstanceBuilder {
        BoundInstanceBuilder::default()
    }

    fn unknown(field: &str) -> SettleError {
        SettleError::UnknownField {
            owner: "BoundInstance".to_string(),
            field: field.to_string(),
        }
    }

    /// Current value of a declared field
    ///
    /// # Errors
    ///
    /// Returns `UnknownField` if the field was not declared
    pub fn get(&self, field: &str) -> SettleResult<Value> {
        self.fields
            .borrow()
            .get(field)
            .cloned()
            .ok_or_else(|| Self::unknown(field))
    }

    /// Field deserialized into `T`
    ///
    /// # Errors
    ///
    /// Returns `UnknownField` or a JSON error
    pub fn get_as<T: DeserializeOwned>(&self, field: &str) -> SettleResult<T> {
        Ok(serde_json::from_value(self.get(field)?)?)
    }

    /// Update a declared field
    ///
    /// # Errors
    ///
    /// Returns `UnknownField` if the field was not declared
    pub fn set(&self, field: &str, value: impl Into<Value>) -> SettleResult<()> {
        match self.fields.borrow_mut().get_mut(field) {
            Some(slot) => {
                *slot = value.into();
                Ok(())
            }
            None => Err(Self::unknown(field)),
        }
    }

    /// Declared field names
    #[must_use]
    pub fn field_names(&self) -> Vec<String> {
        self.fields.borrow().keys().cloned().collect()
    }

    /// Whether a handler was declared
    #[must_use]
    pub fn has_handler(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    fn call(&self, name: &str, args: &[Value]) -> SettleResult<()> {
        let handler = self
            .handlers
            .get(name)
            .cloned()
            .ok_or_else(|| Self::unknown(name))?;
        handler(args);
        Ok(())
    }
}

/// Builder for [`BoundInstance`]
#[derive(Default)]
pub struct BoundInstanceBuilder {
    fields: BTreeMap<String, Value>,
    handlers: HashMap<String, BoundHandler>,
}

impl fmt::Debug for BoundInstanceBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundInstanceBuilder")
            .field("fields", &self.fields)
            .finish()
    }
}

impl BoundInstanceBuilder {
    /// Declare a field with its initial value
    #[must_use]
    pub fn field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    /// Declare a handler; it receives the evaluated call arguments
    #[must_use]
    pub fn handler(mut self, name: &str, handler: impl Fn(&[Value]) + 'static) -> Self {
        self.handlers.insert(name.to_string(), Rc::new(handler));
        self
    }

    /// Finish
    #[must_use]
    pub fn build(self) -> BoundInstance {
        BoundInstance {
            fields: Rc::new(RefCell::new(self.fields)),
            handlers: Rc::new(self.handlers),
        }
    }
}

/// Host component of a template bootstrap; resolves every binding against
/// the [`BoundInstance`] it finds in its injector.
#[derive(Debug, Clone)]
pub struct TemplateHost {
    bound: BoundInstance,
}

impl TemplateHost {
    /// Selector of the ad-hoc host element
    pub const SELECTOR: &'static str = "settle-template-host";

    /// Bound instance backing the template
    #[must_use]
    pub const fn bound(&self) -> &BoundInstance {
        &self.bound
    }
}

impl Component for TemplateHost {
    fn selector() -> &'static str {
        Self::SELECTOR
    }

    fn template() -> &'static str {
        ""
    }

    fn create(injector: &Injector) -> SettleResult<Self> {
        Ok(Self {
            bound: injector.get::<BoundInstance>()?,
        })
    }

    fn get(&self, field: &str) -> Option<Value> {
        self.bound.get(field).ok()
    }

    fn set(&mut self, field: &str, value: Value) -> bool {
        self.bound.set(field, value).is_ok()
    }

    fn handle(
        &mut self,
        handler: &str,
        args: &[Value],
        _ctx: &mut HandlerContext<'_>,
    ) -> SettleResult<()> {
        self.bound.call(handler, args)
    }
}
