//! Test-execution context.
//!
//! One [`TestContext`] carries everything a test touches: the fake-async
//! zone, the virtual clock, the configured module, the tracked fixture and
//! the "inside a wrapped spec body" flag. The harness resets it around every
//! test; harness APIs called while the flag is down fail with
//! [`SettleError::NotInHarness`].

use crate::clock::{create_clock, Clock, ClockOptions};
use crate::config::SettleConfig;
use crate::event::{Event, EventInit};
use crate::fixture::{ComponentFixture, FixtureObserver};
use crate::logging::Diagnostics;
use crate::module::{CompiledModule, ModuleConfig, ModuleEnv};
use crate::result::{SettleError, SettleResult};
use crate::scheduler::Scheduler;
use crate::stabilize::{ChangeDetectionDepth, Stabilizer};
use crate::view::component::{BoundInstance, Component, ComponentDef, ComponentInstance, ComponentRef, TemplateHost};
use crate::view::dom::{Document, Element, Node};
use crate::view::injector::Provider;
use crate::view::ComponentView;
use crate::zone::{FakeAsyncZone, TaskObserver};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::rc::Rc;

struct ContextInner {
    config: SettleConfig,
    zone: FakeAsyncZone,
    clock: Clock,
    stabilizer: Stabilizer,
    diagnostics: Diagnostics,
    depth: ChangeDetectionDepth,
    observer: Rc<FixtureObserver>,
    active: Cell<bool>,
    real_scheduler: RefCell<Option<Rc<dyn Scheduler>>>,
    document: RefCell<Document>,
    module: RefCell<Option<ModuleConfig>>,
    compiled: RefCell<Option<CompiledModule>>,
    fixture: RefCell<Option<ComponentFixture>>,
    warned_unsettled: Cell<bool>,
}

/// Per-test harness state. Clones share the same context, so futures
/// spawned by a spec body can own one.
#[derive(Clone)]
pub struct TestContext {
    inner: Rc<ContextInner>,
}

impl fmt::Debug for TestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestContext")
            .field("active", &self.inner.active.get())
            .field("zone", &self.inner.zone)
            .field("module_configured", &self.inner.module.borrow().is_some())
            .field("compiled", &self.inner.compiled.borrow().is_some())
            .field("fixture", &self.inner.fixture.borrow().is_some())
            .finish()
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Clears the active flag when a wrapped body ends
#[derive(Debug)]
pub(crate) struct ActiveScope {
    ctx: TestContext,
}

impl Drop for ActiveScope {
    fn drop(&mut self) {
        self.ctx.inner.active.set(false);
    }
}

impl TestContext {
    /// Context with the default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(SettleConfig::default())
    }

    /// Context with an explicit configuration
    #[must_use]
    pub fn with_config(config: SettleConfig) -> Self {
        let clock = create_clock();
        let zone = FakeAsyncZone::with_options("settle", (&config).into(), Some(clock.clone()));
        let stabilizer = Stabilizer::new(zone.clone(), clock.clone(), &config);
        let diagnostics = Diagnostics::new();
        let depth = ChangeDetectionDepth::new();
        let observer = Rc::new(FixtureObserver::new(depth.clone(), diagnostics.clone()));
        let document = new_document(&zone);
        Self {
            inner: Rc::new(ContextInner {
                config,
                zone,
                clock,
                stabilizer,
                diagnostics,
                depth,
                observer,
                active: Cell::new(false),
                real_scheduler: RefCell::new(None),
                document: RefCell::new(document),
                module: RefCell::new(None),
                compiled: RefCell::new(None),
                fixture: RefCell::new(None),
                warned_unsettled: Cell::new(false),
            }),
        }
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &SettleConfig {
        &self.inner.config
    }

    /// Warnings and errors raised so far
    #[must_use]
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.inner.diagnostics
    }

    /// The fake-async zone
    #[must_use]
    pub fn zone(&self) -> &FakeAsyncZone {
        &self.inner.zone
    }

    /// The virtual clock
    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.inner.clock
    }

    /// Render-cycle depth counter
    #[must_use]
    pub fn depth(&self) -> &ChangeDetectionDepth {
        &self.inner.depth
    }

    /// Document of the current test
    #[must_use]
    pub fn document(&self) -> Document {
        self.inner.document.borrow().clone()
    }

    // =========================================================================
    // Active flag
    // =========================================================================

    /// Whether a wrapped spec body is running
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.active.get()
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.inner.active.set(active);
    }

    /// Raise the active flag until the scope drops
    pub(crate) fn activate(&self) -> ActiveScope {
        self.inner.active.set(true);
        ActiveScope { ctx: self.clone() }
    }

    fn ensure_active(&self, hint: &str) -> SettleResult<()> {
        if self.inner.active.get() {
            Ok(())
        } else {
            Err(SettleError::not_in_harness(hint))
        }
    }

    /// Turn a successful step into the first uncaught task failure, if a
    /// handler or automatic render failed meanwhile
    fn surface<T>(&self, result: SettleResult<T>) -> SettleResult<T> {
        let value = result?;
        match self.inner.diagnostics.take_task_error() {
            Some(err) => Err(err),
            None => Ok(value),
        }
    }

    /// Scheduler for test code: the zone, or real tokio timers while an
    /// `it_async` body runs
    #[must_use]
    pub fn scheduler(&self) -> Rc<dyn Scheduler> {
        match self.inner.real_scheduler.borrow().as_ref() {
            Some(real) => Rc::clone(real),
            None => Rc::new(self.inner.zone.clone()),
        }
    }

    /// Scheduler handle tagging its tasks as framework work
    #[must_use]
    pub fn platform_scheduler(&self) -> Rc<dyn Scheduler> {
        Rc::new(self.inner.zone.platform())
    }

    pub(crate) fn set_real_scheduler(&self, scheduler: Option<Rc<dyn Scheduler>>) {
        *self.inner.real_scheduler.borrow_mut() = scheduler;
    }

    /// Record the unsettled-future warning, once per context unless
    /// configured otherwise
    pub(crate) fn warn_unsettled(&self, message: &str) {
        if self.inner.config.warn_unsettled_once && self.inner.warned_unsettled.replace(true) {
            return;
        }
        self.inner.diagnostics.warn(message);
    }

    // =========================================================================
    // Module
    // =========================================================================

    /// Configure the test module
    ///
    /// # Errors
    ///
    /// Returns error outside a wrapped body or after the module compiled
    pub fn configure_test_module(&self, config: ModuleConfig) -> SettleResult<()> {
        self.ensure_active("Put configure_test_module() inside before_each or it.")?;
        if self.inner.compiled.borrow().is_some() {
            return Err(SettleError::Component {
                message: "Cannot configure the test module when the test module has already been instantiated."
                    .to_string(),
            });
        }
        *self.inner.module.borrow_mut() = Some(config);
        Ok(())
    }

    /// Whether `configure_test_module` ran in this test
    #[must_use]
    pub fn is_module_configured(&self) -> bool {
        self.inner.module.borrow().is_some()
    }

    /// Whether the module compiled
    #[must_use]
    pub fn is_compiled(&self) -> bool {
        self.inner.compiled.borrow().is_some()
    }

    fn compile_for(&self, api: &str) -> SettleResult<CompiledModule> {
        if let Some(compiled) = self.inner.compiled.borrow().as_ref() {
            return Ok(compiled.clone());
        }
        let module = self
            .inner
            .module
            .borrow()
            .clone()
            .ok_or_else(|| SettleError::ModuleNotConfigured { api: api.to_string() })?;
        let env = ModuleEnv {
            document: self.document(),
            scheduler: Rc::new(self.inner.zone.platform()),
            clock: self.inner.clock.clone(),
            diagnostics: self.inner.diagnostics.clone(),
        };
        let compiled = module.compile(env)?;
        *self.inner.compiled.borrow_mut() = Some(compiled.clone());
        self.inner.zone.run(|| self.inner.zone.flush_microtasks())?;
        Ok(compiled)
    }

    /// Compile the module now (`inject` and `bootstrap` do this implicitly)
    ///
    /// # Errors
    ///
    /// Returns error outside a wrapped body or without a configured module
    pub fn compile(&self) -> SettleResult<CompiledModule> {
        self.ensure_active("Put compile() inside before_each or it.")?;
        self.compile_for("compile()")
    }

    /// Resolve `T` from the module's root injector, compiling first
    ///
    /// # Errors
    ///
    /// Returns error outside a wrapped body, without a module, or when no
    /// provider supplies `T`
    pub fn inject<T: Clone + 'static>(&self) -> SettleResult<T> {
        self.ensure_active("Put inject() inside before_each or it.")?;
        let value = self.inner.zone.run(|| {
            let compiled = self.compile_for("inject()")?;
            compiled.injector().get::<T>()
        })?;
        self.inner.zone.run(|| self.inner.zone.flush_microtasks())?;
        Ok(value)
    }

    // =========================================================================
    // Bootstrap
    // =========================================================================

    /// Start bootstrapping `C` as the root component
    #[must_use]
    pub fn bootstrap<C: Component>(&self) -> Bootstrap<'_, C> {
        Bootstrap {
            ctx: self,
            inputs: Vec::new(),
            before_first_render: None,
            flush: true,
            _component: PhantomData,
        }
    }

    /// Render `template` in an ad-hoc host component whose bindings and
    /// handlers resolve against `bound`. Returns `bound`; setting its fields
    /// shows on the next render.
    ///
    /// # Errors
    ///
    /// Returns error outside a wrapped body, without a module, after the
    /// module compiled, or if rendering fails
    pub fn bootstrap_from_template(&self, template: &str, bound: BoundInstance) -> SettleResult<BoundInstance> {
        self.bootstrap_template_inner(template, bound, true)
    }

    /// [`bootstrap_from_template`](Self::bootstrap_from_template) without the
    /// initial timer flush
    ///
    /// # Errors
    ///
    /// As `bootstrap_from_template`
    pub fn bootstrap_from_template_without_flush(
        &self,
        template: &str,
        bound: BoundInstance,
    ) -> SettleResult<BoundInstance> {
        self.bootstrap_template_inner(template, bound, false)
    }

    fn bootstrap_template_inner(&self, template: &str, bound: BoundInstance, flush: bool) -> SettleResult<BoundInstance> {
        self.ensure_active("Put bootstrap_from_template() inside before_each or it.")?;
        if self.inner.compiled.borrow().is_some() {
            return Err(SettleError::CompilationDone);
        }
        let module = self
            .inner
            .module
            .borrow_mut()
            .take()
            .ok_or_else(|| SettleError::ModuleNotConfigured {
                api: "bootstrap_from_template()".to_string(),
            })?;
        *self.inner.module.borrow_mut() = Some(
            module
                .template_override::<TemplateHost>(template)
                .provider(Provider::value(bound.clone())),
        );
        self.inner.zone.run(|| {
            let compiled = self.compile_for("bootstrap_from_template()")?;
            let def = compiled.registry().def_for::<TemplateHost>();
            self.create_fixture(&compiled, &def, Vec::new(), |_| Ok(()), flush)?;
            compiled.check_animation_module();
            Ok(bound)
        })
    }

    fn create_fixture(
        &self,
        compiled: &CompiledModule,
        def: &ComponentDef,
        inputs: Vec<(String, Value)>,
        before_first_render: impl FnOnce(&ComponentInstance) -> SettleResult<()>,
        flush: bool,
    ) -> SettleResult<ComponentFixture> {
        let host = compiled.document().create_element(def.selector());
        compiled.document().body().append_child(Node::Element(host.clone()));
        let view = ComponentView::create(def, host, compiled.injector(), &compiled.env())?;
        for (name, value) in inputs {
            if !view.write_field(&name, value)? {
                if let Err(err) = view.destroy() {
                    self.inner
                        .diagnostics
                        .error(format!("Error during cleanup of component: {err}"));
                }
                view.host().detach();
                return Err(SettleError::UnknownField {
                    owner: def.name().to_string(),
                    field: name,
                });
            }
        }

        let fixture = ComponentFixture::new(view, self.inner.depth.clone(), self.inner.config.auto_detect_changes);
        *self.inner.fixture.borrow_mut() = Some(fixture.clone());
        self.inner.observer.track(Some(fixture.clone()));
        let observer: Rc<dyn TaskObserver> = self.inner.observer.clone();
        self.inner.zone.set_observer(Some(observer));
        tracing::debug!(component = def.name(), "bootstrapped");

        before_first_render(fixture.instance())?;
        fixture.detect_changes()?;
        if flush {
            self.inner.stabilizer.flush_bootstrap()?;
        }
        Ok(fixture)
    }

    /// Tracked fixture
    ///
    /// # Errors
    ///
    /// Returns `NoFixture` if nothing is bootstrapped
    pub fn fixture(&self) -> SettleResult<ComponentFixture> {
        self.inner.fixture.borrow().clone().ok_or(SettleError::NoFixture)
    }

    /// Whether a fixture is tracked
    #[must_use]
    pub fn has_fixture(&self) -> bool {
        self.inner.fixture.borrow().is_some()
    }

    /// Destroy the tracked fixture and stop tracking it
    ///
    /// # Errors
    ///
    /// Returns error outside a wrapped body, `NoFixture` if nothing is
    /// bootstrapped, or an `on_destroy` failure
    pub fn destroy_fixture(&self) -> SettleResult<()> {
        self.ensure_active("Put destroy_fixture() inside before_each, it or after_each.")?;
        let fixture = self.inner.fixture.borrow_mut().take().ok_or(SettleError::NoFixture)?;
        self.inner.observer.track(None);
        fixture.destroy()
    }

    // =========================================================================
    // Time and stabilization
    // =========================================================================

    /// Advance virtual time, firing due timers
    ///
    /// # Errors
    ///
    /// Returns error outside a wrapped body, on a runaway microtask drain,
    /// or `TaskFailed` if a fired timer's work failed
    pub fn advance_time(&self, millis: u64) -> SettleResult<()> {
        self.ensure_active("Put advance_time() inside before_each, it or after_each.")?;
        self.surface(self.inner.zone.run(|| self.inner.stabilizer.advance_time(millis)))
    }

    /// Render, drain every pending timer, render again. Returns the elapsed
    /// virtual milliseconds.
    ///
    /// # Errors
    ///
    /// Returns error outside a wrapped body, if rendering fails, if the
    /// drain exceeds its bound, or `TaskFailed` if drained work failed
    pub fn flush_pending_work(&self) -> SettleResult<u64> {
        self.ensure_active("Put flush_pending_work() inside before_each, it or after_each.")?;
        self.surface(self.flush_pending_work_unchecked())
    }

    pub(crate) fn flush_pending_work_unchecked(&self) -> SettleResult<u64> {
        let fixture = self.inner.fixture.borrow().clone();
        self.inner
            .zone
            .run(|| self.inner.stabilizer.flush_pending_work(fixture.as_ref()))
    }

    /// Drain microtasks and woken futures only
    ///
    /// # Errors
    ///
    /// Returns error outside a wrapped body, on a runaway drain, or
    /// `TaskFailed`
    pub fn flush_microtasks(&self) -> SettleResult<()> {
        self.ensure_active("Put flush_microtasks() inside before_each, it or after_each.")?;
        self.surface(self.flush_microtasks_unchecked())
    }

    pub(crate) fn flush_microtasks_unchecked(&self) -> SettleResult<()> {
        self.inner.zone.run(|| self.inner.stabilizer.flush_microtasks())
    }

    /// Run `f` in the zone, drain the microtasks it queued and render
    ///
    /// # Errors
    ///
    /// Returns error outside a wrapped body or if stabilizing fails
    pub fn now<R>(&self, f: impl FnOnce() -> R) -> SettleResult<R> {
        self.ensure_active("Put now() inside before_each, it or after_each.")?;
        let value = self.inner.zone.run(f);
        self.flush_microtasks_unchecked()?;
        let fixture = self.inner.fixture.borrow().clone();
        if let Some(fixture) = fixture.filter(ComponentFixture::is_auto_detect) {
            fixture.detect_changes()?;
        }
        self.surface(Ok(value))
    }

    /// Drive `future` to completion on virtual time: microtasks first, then
    /// a full flush if it is still pending
    ///
    /// # Errors
    ///
    /// Returns `UnsettledFuture` if it cannot finish inside the zone
    pub fn run_synchronously<F>(&self, future: F) -> SettleResult<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        self.ensure_active("Put run_synchronously() inside before_each, it or after_each.")?;
        let handle = self.inner.zone.run(|| self.inner.zone.spawn(future));
        self.flush_microtasks_unchecked()?;
        if !handle.is_finished() {
            self.flush_pending_work_unchecked()?;
        }
        self.surface(handle.take_output().ok_or(SettleError::UnsettledFuture))
    }

    /// Mark the root view for checking, then flush
    ///
    /// # Errors
    ///
    /// Returns error outside a wrapped body, `NoFixture` or a flush error
    pub fn mark_for_check_and_flush(&self) -> SettleResult<u64> {
        self.ensure_active("Put mark_for_check_and_flush() inside before_each, it or after_each.")?;
        self.fixture()?.mark_for_check();
        self.flush_pending_work()
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Host element of the root component
    ///
    /// # Errors
    ///
    /// Returns error outside a wrapped body or `NoFixture` if nothing is
    /// bootstrapped
    pub fn root_element(&self) -> SettleResult<Element> {
        self.ensure_active("Put root_element() inside before_each, it or after_each.")?;
        Ok(self.fixture()?.host().clone())
    }

    /// First element under the fixture matching `selector`
    ///
    /// # Errors
    ///
    /// Returns error outside a wrapped body, `NoFixture`, `InvalidSelector`
    /// or `ElementNotFound`
    pub fn query_element(&self, selector: &str) -> SettleResult<Element> {
        self.query_element_in(&self.root_element()?, selector)
    }

    /// First element under `root` matching `selector`
    ///
    /// # Errors
    ///
    /// Returns error outside a wrapped body, `InvalidSelector` or
    /// `ElementNotFound`
    pub fn query_element_in(&self, root: &Element, selector: &str) -> SettleResult<Element> {
        self.ensure_active("Put query_element() inside before_each, it or after_each.")?;
        root.query_selector(selector)?
            .ok_or_else(|| SettleError::ElementNotFound {
                selector: selector.to_string(),
            })
    }

    /// Every element under the fixture matching `selector`
    ///
    /// # Errors
    ///
    /// Returns error outside a wrapped body, `NoFixture` or `InvalidSelector`
    pub fn query_all_elements(&self, selector: &str) -> SettleResult<Vec<Element>> {
        self.query_all_elements_in(&self.root_element()?, selector)
    }

    /// Every element under `root` matching `selector`
    ///
    /// # Errors
    ///
    /// Returns error outside a wrapped body or `InvalidSelector`
    pub fn query_all_elements_in(&self, root: &Element, selector: &str) -> SettleResult<Vec<Element>> {
        self.ensure_active("Put query_all_elements() inside before_each, it or after_each.")?;
        root.query_selector_all(selector)
    }

    /// Whether an element under the fixture matches; `false` without a
    /// fixture, for an invalid selector, or outside a wrapped body
    #[must_use]
    pub fn element_exists(&self, selector: &str) -> bool {
        self.query_all_elements(selector).is_ok_and(|els| !els.is_empty())
    }

    /// Whether an element under `root` matches; `false` outside a wrapped
    /// body
    #[must_use]
    pub fn element_exists_in(&self, root: &Element, selector: &str) -> bool {
        self.query_all_elements_in(root, selector)
            .is_ok_and(|els| !els.is_empty())
    }

    /// First component of type `C` below the root component
    ///
    /// # Errors
    ///
    /// Returns error outside a wrapped body, `NoFixture` or
    /// `DebugElementNotFound`
    pub fn query_component_instance<C: Component>(&self) -> SettleResult<ComponentRef<C>> {
        self.query_component_instances::<C>()?
            .into_iter()
            .next()
            .ok_or_else(|| SettleError::DebugElementNotFound {
                query: ComponentDef::of::<C>().name().to_string(),
            })
    }

    /// Every component of type `C` below the root component, depth first
    ///
    /// # Errors
    ///
    /// Returns error outside a wrapped body or `NoFixture`
    pub fn query_component_instances<C: Component>(&self) -> SettleResult<Vec<ComponentRef<C>>> {
        self.ensure_active("Put query_component_instances() inside before_each, it or after_each.")?;
        Ok(self
            .fixture()?
            .view()
            .descendants()
            .iter()
            .filter_map(|view| view.instance().downcast::<C>())
            .collect())
    }

    /// First debug element under the fixture matching `selector`
    ///
    /// # Errors
    ///
    /// Returns error outside a wrapped body, `NoFixture`, `InvalidSelector`
    /// or `DebugElementNotFound`
    pub fn query_debug_element(&self, selector: &str) -> SettleResult<DebugElement> {
        self.query_debug_elements(selector)?
            .into_iter()
            .next()
            .ok_or_else(|| SettleError::DebugElementNotFound {
                query: selector.to_string(),
            })
    }

    /// Every debug element under the fixture matching `selector`
    ///
    /// # Errors
    ///
    /// Returns error outside a wrapped body, `NoFixture` or
    /// `InvalidSelector`
    pub fn query_debug_elements(&self, selector: &str) -> SettleResult<Vec<DebugElement>> {
        Ok(self
            .query_all_elements(selector)?
            .into_iter()
            .map(DebugElement::new)
            .collect())
    }

    /// Whether a debug element matches; `false` without a fixture or
    /// outside a wrapped body
    #[must_use]
    pub fn has_debug_element(&self, selector: &str) -> bool {
        self.element_exists(selector)
    }

    /// Dispatch an event the way a browser would create it. Mouse types
    /// become mouse events, keyboard types with an init become keyboard
    /// events. Returns the dispatched event.
    ///
    /// # Errors
    ///
    /// Returns error outside a wrapped body, or `TaskFailed` if a listener
    /// or the render after it failed
    pub fn trigger_event(
        &self,
        element: &Element,
        event_type: &str,
        init: Option<EventInit>,
        extra_props: impl IntoIterator<Item = (String, Value)>,
    ) -> SettleResult<Event> {
        self.ensure_active("Put trigger_event() inside before_each, it or after_each.")?;
        let event = Event::create(event_type, init, extra_props);
        self.inner.zone.run(|| element.dispatch_event(&event));
        self.surface(Ok(event))
    }

    // =========================================================================
    // Reset
    // =========================================================================

    /// Tear down the fixture and module, drop all pending work and restore
    /// the real clock. Every step runs even if the fixture fails to destroy.
    ///
    /// # Errors
    ///
    /// Returns the fixture's `on_destroy` failure when the module's teardown
    /// options ask for it
    pub fn reset(&self) -> SettleResult<()> {
        self.inner.active.set(false);
        let teardown = self
            .inner
            .module
            .borrow()
            .as_ref()
            .map(ModuleConfig::teardown_options)
            .unwrap_or_default();

        let fixture = self.inner.fixture.borrow_mut().take();
        self.inner.observer.track(None);
        let mut failure = None;
        if let Some(fixture) = fixture {
            if let Err(err) = fixture.destroy() {
                if teardown.destroy_after_each && teardown.rethrow_errors {
                    failure = Some(err);
                } else {
                    self.inner
                        .diagnostics
                        .error(format!("Error during cleanup of component: {err}"));
                }
            }
        }

        *self.inner.module.borrow_mut() = None;
        *self.inner.compiled.borrow_mut() = None;
        *self.inner.real_scheduler.borrow_mut() = None;
        self.inner.zone.reset();
        self.inner.diagnostics.take_task_error();
        self.inner.clock.uninstall();
        *self.inner.document.borrow_mut() = new_document(&self.inner.zone);
        self.inner.depth.reset();
        tracing::debug!("test context reset");

        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Reset, then pin the clock to `fixed_date_ms` or to the current time
    ///
    /// # Errors
    ///
    /// Returns a teardown failure from `reset` or a clock error
    pub fn begin_test(&self, fixed_date_ms: Option<u64>) -> SettleResult<()> {
        let reset = self.reset();
        let options = fixed_date_ms.map_or_else(ClockOptions::now, ClockOptions::fixed);
        self.inner.clock.install(options)?;
        reset
    }
}

fn new_document(zone: &FakeAsyncZone) -> Document {
    let document = Document::new();
    document.set_invoker(Some(Rc::new(zone.clone())));
    document
}

/// Builder returned by [`TestContext::bootstrap`]
pub struct Bootstrap<'a, C: Component> {
    ctx: &'a TestContext,
    inputs: Vec<(String, Value)>,
    before_first_render: Option<Box<dyn FnOnce(&mut C)>>,
    flush: bool,
    _component: PhantomData<C>,
}

impl<C: Component> fmt::Debug for Bootstrap<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bootstrap")
            .field("component", &std::any::type_name::<C>())
            .field("inputs", &self.inputs)
            .field("flush", &self.flush)
            .finish()
    }
}

impl<'a, C: Component> Bootstrap<'a, C> {
    /// Set an input before the first render
    #[must_use]
    pub fn input(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.inputs.push((name.to_string(), value.into()));
        self
    }

    /// Adjust the instance after creation, before the first render
    #[must_use]
    pub fn before_first_render(mut self, f: impl FnOnce(&mut C) + 'static) -> Self {
        self.before_first_render = Some(Box::new(f));
        self
    }

    /// Skip the one-shot timer flush after the first render
    #[must_use]
    pub fn without_flush(mut self) -> Self {
        self.flush = false;
        self
    }

    /// Create, render and (by default) flush; the new fixture replaces any
    /// tracked one
    ///
    /// # Errors
    ///
    /// Returns error outside a wrapped body, without a configured module,
    /// for an unknown input, or if rendering or flushing fails
    pub fn create(self) -> SettleResult<ComponentRef<C>> {
        let ctx = self.ctx;
        ctx.ensure_active("Put bootstrap() inside before_each or it.")?;
        if !ctx.is_module_configured() {
            return Err(SettleError::ModuleNotConfigured {
                api: "bootstrap()".to_string(),
            });
        }
        let before = self.before_first_render;
        ctx.inner.zone.run(|| {
            let compiled = ctx.compile_for("bootstrap()")?;
            let def = compiled.registry().def_for::<C>();
            let fixture = ctx.create_fixture(
                &compiled,
                &def,
                self.inputs,
                |instance| {
                    if let (Some(f), Some(component)) = (before, instance.downcast::<C>()) {
                        let mut component = component
                            .try_borrow_mut()
                            .map_err(|_| SettleError::Component {
                                message: format!("{} is already borrowed", def.name()),
                            })?;
                        f(&mut component);
                    }
                    Ok(())
                },
                self.flush,
            )?;
            compiled.check_animation_module();
            fixture.component::<C>().ok_or_else(|| SettleError::Component {
                message: format!("bootstrapped component is not a {}", def.name()),
            })
        })
    }
}

/// Element of the fixture together with the component it hosts
#[derive(Debug, Clone)]
pub struct DebugElement {
    element: Element,
    component: Option<ComponentInstance>,
}

impl DebugElement {
    fn new(element: Element) -> Self {
        let component = ComponentView::for_element(&element).map(|view| view.instance().clone());
        Self { element, component }
    }

    /// The element
    #[must_use]
    pub const fn element(&self) -> &Element {
        &self.element
    }

    /// Hosted component, if any
    #[must_use]
    pub const fn component_instance(&self) -> Option<&ComponentInstance> {
        self.component.as_ref()
    }

    /// Hosted component as `C`
    #[must_use]
    pub fn component<C: Component>(&self) -> Option<ComponentRef<C>> {
        self.component.as_ref().and_then(ComponentInstance::downcast::<C>)
    }

    /// Run the element's listeners for `event_type` with `detail` as the
    /// event payload. The event does not bubble.
    pub fn trigger_event_handler(&self, event_type: &str, detail: impl Into<Value>) {
        self.element.dispatch_event(&Event::custom(event_type, detail.into()));
    }
}
