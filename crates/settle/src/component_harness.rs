//! Component harness environment.
//!
//! Harnesses wrap a component's host element behind a typed API so tests
//! interact with it the way a user would. A [`HarnessLoader`] finds host
//! elements below a root (the fixture host, or the document body for
//! overlays), stabilizing the fixture before every query; each
//! [`TestElement`] action stabilizes again after acting.

use crate::context::TestContext;
use crate::event::Event;
use crate::result::{SettleError, SettleResult};
use crate::view::dom::Element;
use serde_json::Value;
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

/// Finds elements for a selector below a root
pub type QueryFn = Rc<dyn Fn(&str, &Element) -> SettleResult<Vec<Element>>>;

fn default_query() -> QueryFn {
    Rc::new(|selector, root| root.query_selector_all(selector))
}

/// Typed wrapper around a component's host element
pub trait ComponentHarness: Sized {
    /// Selector matching the component's host element
    const HOST_SELECTOR: &'static str;

    /// Harness over `host`
    fn new(host: TestElement) -> Self;
}

struct Environment {
    ctx: TestContext,
    query: QueryFn,
    auto_detect_disabled: Rc<Cell<bool>>,
}

impl Environment {
    fn force_stabilize(&self) -> SettleResult<()> {
        if self.auto_detect_disabled.get() {
            return Ok(());
        }
        self.ctx.flush_pending_work().map(drop)
    }

    fn query(self: &Rc<Self>, selector: &str, root: &Element) -> SettleResult<Vec<TestElement>> {
        self.force_stabilize()?;
        Ok((self.query)(selector, root)?
            .into_iter()
            .map(|element| TestElement {
                element,
                env: Rc::clone(self),
            })
            .collect())
    }
}

/// Element handle whose actions stabilize the fixture
#[derive(Clone)]
pub struct TestElement {
    element: Element,
    env: Rc<Environment>,
}

impl fmt::Debug for TestElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestElement").field("element", &self.element).finish()
    }
}

impl TestElement {
    /// Underlying element
    #[must_use]
    pub const fn element(&self) -> &Element {
        &self.element
    }

    /// Click, then stabilize
    ///
    /// # Errors
    ///
    /// Returns error if stabilizing fails
    pub fn click(&self) -> SettleResult<()> {
        self.element.click();
        self.env.force_stabilize()
    }

    /// Text content after stabilizing
    ///
    /// # Errors
    ///
    /// Returns error if stabilizing fails
    pub fn text(&self) -> SettleResult<String> {
        self.env.force_stabilize()?;
        Ok(self.element.text_content())
    }

    /// Attribute value after stabilizing
    ///
    /// # Errors
    ///
    /// Returns error if stabilizing fails
    pub fn get_attribute(&self, name: &str) -> SettleResult<Option<String>> {
        self.env.force_stabilize()?;
        Ok(self.element.attribute(name))
    }

    /// Whether the element carries `class` after stabilizing
    ///
    /// # Errors
    ///
    /// Returns error if stabilizing fails
    pub fn has_class(&self, class: &str) -> SettleResult<bool> {
        self.env.force_stabilize()?;
        Ok(self.element.has_class(class))
    }

    /// Whether the element matches `selector`
    ///
    /// # Errors
    ///
    /// Returns error if the selector cannot be parsed or stabilizing fails
    pub fn matches_selector(&self, selector: &str) -> SettleResult<bool> {
        self.env.force_stabilize()?;
        self.element.matches(selector)
    }

    /// Dispatch `event_type` carrying `data` as extra properties, then
    /// stabilize
    ///
    /// # Errors
    ///
    /// Returns error if stabilizing fails
    pub fn dispatch_event(
        &self,
        event_type: &str,
        data: impl IntoIterator<Item = (String, Value)>,
    ) -> SettleResult<()> {
        self.element.dispatch_event(&Event::create(event_type, None, data));
        self.env.force_stabilize()
    }

    /// Set the `value` property without firing events, then stabilize
    ///
    /// # Errors
    ///
    /// Returns error if stabilizing fails
    pub fn set_input_value(&self, value: &str) -> SettleResult<()> {
        self.element.set_property("value", Value::String(value.to_string()));
        self.env.force_stabilize()
    }

    /// First descendant matching `selector`
    ///
    /// # Errors
    ///
    /// Returns `ElementNotFound` without a match
    pub fn locate(&self, selector: &str) -> SettleResult<Self> {
        self.locate_optional(selector)?
            .ok_or_else(|| SettleError::ElementNotFound {
                selector: selector.to_string(),
            })
    }

    /// First descendant matching `selector`, if any
    ///
    /// # Errors
    ///
    /// Returns error if the query or stabilizing fails
    pub fn locate_optional(&self, selector: &str) -> SettleResult<Option<Self>> {
        Ok(self.env.query(selector, &self.element)?.into_iter().next())
    }

    /// Every descendant matching `selector`
    ///
    /// # Errors
    ///
    /// Returns error if the query or stabilizing fails
    pub fn locate_all(&self, selector: &str) -> SettleResult<Vec<Self>> {
        self.env.query(selector, &self.element)
    }
}

/// Finds harnesses below a root element
#[derive(Clone)]
pub struct HarnessLoader {
    root: Element,
    env: Rc<Environment>,
}

impl fmt::Debug for HarnessLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HarnessLoader")
            .field("root", &self.root)
            .field("auto_detect_disabled", &self.env.auto_detect_disabled.get())
            .finish()
    }
}

impl HarnessLoader {
    fn new(ctx: &TestContext, root: Element, query: QueryFn) -> Self {
        Self {
            root,
            env: Rc::new(Environment {
                ctx: ctx.clone(),
                query,
                auto_detect_disabled: Rc::new(Cell::new(false)),
            }),
        }
    }

    /// Loader rooted at the fixture host
    ///
    /// # Errors
    ///
    /// Returns error outside a wrapped body or `NoFixture` if nothing is
    /// bootstrapped
    pub fn for_fixture(ctx: &TestContext) -> SettleResult<Self> {
        Ok(Self::new(ctx, ctx.root_element()?, default_query()))
    }

    /// Loader rooted at the document body, for elements attached outside
    /// the fixture (overlays)
    #[must_use]
    pub fn for_document_root(ctx: &TestContext) -> Self {
        Self::new(ctx, ctx.document().body(), default_query())
    }

    /// Replace the element query (default: descendants matching the
    /// selector)
    #[must_use]
    pub fn with_query_fn(
        self,
        query: impl Fn(&str, &Element) -> SettleResult<Vec<Element>> + 'static,
    ) -> Self {
        Self {
            root: self.root,
            env: Rc::new(Environment {
                ctx: self.env.ctx.clone(),
                query: Rc::new(query),
                auto_detect_disabled: Rc::clone(&self.env.auto_detect_disabled),
            }),
        }
    }

    /// Root element
    #[must_use]
    pub const fn root(&self) -> &Element {
        &self.root
    }

    /// Harness for the bootstrapped root component, whatever its host
    /// selector
    ///
    /// # Errors
    ///
    /// Returns `NoFixture` if nothing is bootstrapped, or a stabilize error
    pub fn harness_for_bootstrapped_component<H: ComponentHarness>(ctx: &TestContext) -> SettleResult<H> {
        let loader = Self::for_fixture(ctx)?;
        loader.force_stabilize()?;
        Ok(H::new(TestElement {
            element: loader.root.clone(),
            env: loader.env,
        }))
    }

    /// First harness of type `H`
    ///
    /// # Errors
    ///
    /// Returns `ElementNotFound` if no host matches
    pub fn get_harness<H: ComponentHarness>(&self) -> SettleResult<H> {
        self.get_harness_or_none()?
            .ok_or_else(|| SettleError::ElementNotFound {
                selector: H::HOST_SELECTOR.to_string(),
            })
    }

    /// First harness of type `H`, if any
    ///
    /// # Errors
    ///
    /// Returns error if the query or stabilizing fails
    pub fn get_harness_or_none<H: ComponentHarness>(&self) -> SettleResult<Option<H>> {
        Ok(self.get_all_harnesses::<H>()?.into_iter().next())
    }

    /// Whether a host for `H` exists
    ///
    /// # Errors
    ///
    /// Returns error if the query or stabilizing fails
    pub fn has_harness<H: ComponentHarness>(&self) -> SettleResult<bool> {
        Ok(self.get_harness_or_none::<H>()?.is_some())
    }

    /// Every harness of type `H`, in document order
    ///
    /// # Errors
    ///
    /// Returns error if the query or stabilizing fails
    pub fn get_all_harnesses<H: ComponentHarness>(&self) -> SettleResult<Vec<H>> {
        Ok(self
            .env
            .query(H::HOST_SELECTOR, &self.root)?
            .into_iter()
            .map(H::new)
            .collect())
    }

    /// Loader rooted at the first element matching `selector`
    ///
    /// # Errors
    ///
    /// Returns `ElementNotFound` without a match
    pub fn child_loader(&self, selector: &str) -> SettleResult<Self> {
        let root = self
            .env
            .query(selector, &self.root)?
            .into_iter()
            .next()
            .ok_or_else(|| SettleError::ElementNotFound {
                selector: selector.to_string(),
            })?;
        Ok(Self {
            root: root.element,
            env: Rc::clone(&self.env),
        })
    }

    /// Render and drain pending work, unless automatic change detection
    /// is disabled
    ///
    /// # Errors
    ///
    /// Returns error outside a wrapped body or if the flush fails
    pub fn force_stabilize(&self) -> SettleResult<()> {
        self.env.force_stabilize()
    }

    /// Drain work scheduled outside the framework
    ///
    /// # Errors
    ///
    /// Returns error outside a wrapped body or if the flush fails
    pub fn wait_for_tasks_outside_framework(&self) -> SettleResult<()> {
        self.env.ctx.flush_pending_work().map(drop)
    }

    /// Turn stabilizing on queries and actions off (`disabled`) or back on.
    /// With `detect_now`, stabilize immediately regardless.
    ///
    /// # Errors
    ///
    /// Returns error if the immediate flush fails
    pub fn set_auto_change_detection(&self, disabled: bool, detect_now: bool) -> SettleResult<()> {
        self.env.auto_detect_disabled.set(disabled);
        tracing::debug!(disabled, detect_now, "harness auto change detection");
        if detect_now {
            self.env.ctx.flush_pending_work()?;
        }
        Ok(())
    }

    /// Whether stabilizing on queries and actions is off
    #[must_use]
    pub fn is_auto_change_detection_disabled(&self) -> bool {
        self.env.auto_detect_disabled.get()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::context::ActiveScope;
    use crate::module::ModuleConfig;
    use crate::scheduler::TaskOrigin;
    use crate::view::component::{BoundInstance, Component, HandlerContext};
    use crate::view::dom::Node;
    use crate::view::injector::Injector;
    use serde_json::json;

    struct Counter {
        count: u32,
    }

    impl Component for Counter {
        fn selector() -> &'static str {
            "app-counter"
        }
        fn template() -> &'static str {
            "<span class=\"count\">{{count}}</span><button (click)=\"inc()\">+</button>"
        }
        fn create(_injector: &Injector) -> SettleResult<Self> {
            Ok(Self { count: 0 })
        }
        fn get(&self, field: &str) -> Option<Value> {
            (field == "count").then(|| json!(self.count))
        }
        fn handle(&mut self, _handler: &str, _args: &[Value], _ctx: &mut HandlerContext<'_>) -> SettleResult<()> {
            self.count += 1;
            Ok(())
        }
    }

    struct CounterHarness {
        host: TestElement,
    }

    impl ComponentHarness for CounterHarness {
        const HOST_SELECTOR: &'static str = "app-counter";

        fn new(host: TestElement) -> Self {
            Self { host }
        }
    }

    impl CounterHarness {
        fn increment(&self) -> SettleResult<()> {
            self.host.locate("button")?.click()
        }

        fn count(&self) -> SettleResult<String> {
            self.host.locate(".count")?.text()
        }
    }

    #[derive(Debug)]
    struct MissingHarness;

    impl ComponentHarness for MissingHarness {
        const HOST_SELECTOR: &'static str = "app-missing";

        fn new(_host: TestElement) -> Self {
            Self
        }
    }

    fn active() -> (TestContext, ActiveScope) {
        let ctx = TestContext::new();
        ctx.begin_test(Some(0)).unwrap();
        let scope = ctx.activate();
        ctx.configure_test_module(ModuleConfig::new().declare::<Counter>()).unwrap();
        (ctx, scope)
    }

    #[test]
    fn test_harness_for_bootstrapped_component() {
        let (ctx, _scope) = active();
        ctx.bootstrap::<Counter>().create().unwrap();
        let harness = HarnessLoader::harness_for_bootstrapped_component::<CounterHarness>(&ctx).unwrap();
        assert_eq!(harness.count().unwrap(), "0");
        harness.increment().unwrap();
        harness.increment().unwrap();
        assert_eq!(harness.count().unwrap(), "2");
    }

    #[test]
    fn test_loader_queries() {
        let (ctx, _scope) = active();
        ctx.bootstrap_from_template(
            "<app-counter></app-counter><app-counter></app-counter>",
            BoundInstance::builder().build(),
        )
        .unwrap();
        let loader = HarnessLoader::for_fixture(&ctx).unwrap();
        let all = loader.get_all_harnesses::<CounterHarness>().unwrap();
        assert_eq!(all.len(), 2);
        all[1].increment().unwrap();
        assert_eq!(all[0].count().unwrap(), "0");
        assert_eq!(all[1].count().unwrap(), "1");

        assert!(loader.has_harness::<CounterHarness>().unwrap());
        assert!(!loader.has_harness::<MissingHarness>().unwrap());
        assert!(loader.get_harness_or_none::<MissingHarness>().unwrap().is_none());
        let err = loader.get_harness::<MissingHarness>().unwrap_err();
        assert_eq!(err.to_string(), "Element not found for \"app-missing\"");
    }

    #[test]
    fn test_custom_query_fn() {
        let (ctx, _scope) = active();
        ctx.bootstrap_from_template(
            "<app-counter></app-counter><app-counter></app-counter>",
            BoundInstance::builder().build(),
        )
        .unwrap();
        let loader = HarnessLoader::for_fixture(&ctx)
            .unwrap()
            .with_query_fn(|selector, root| Ok(root.query_selector(selector)?.into_iter().collect()));
        assert_eq!(loader.get_all_harnesses::<CounterHarness>().unwrap().len(), 1);
    }

    #[test]
    fn test_document_root_sees_overlays() {
        let (ctx, _scope) = active();
        ctx.bootstrap::<Counter>().create().unwrap();
        let overlay = ctx.document().create_element("div");
        overlay.add_class("overlay");
        ctx.document().body().append_child(Node::Element(overlay.clone()));

        let fixture_loader = HarnessLoader::for_fixture(&ctx).unwrap();
        assert!(fixture_loader.child_loader(".overlay").is_err());
        let body_loader = HarnessLoader::for_document_root(&ctx);
        let child = body_loader.child_loader(".overlay").unwrap();
        assert_eq!(child.root(), &overlay);
    }

    #[test]
    fn test_disabled_auto_detection_skips_render() {
        let (ctx, _scope) = active();
        ctx.bootstrap::<Counter>().create().unwrap();
        ctx.fixture().unwrap().auto_detect_changes(false);
        let loader = HarnessLoader::for_fixture(&ctx).unwrap();
        let count = ctx.query_element(".count").unwrap();
        let button = loader.child_loader("button").unwrap();

        loader.set_auto_change_detection(true, false).unwrap();
        assert!(loader.is_auto_change_detection_disabled());
        let quiet = TestElement {
            element: button.root().clone(),
            env: Rc::clone(&loader.env),
        };
        quiet.click().unwrap();
        assert_eq!(count.text_content(), "0");

        loader.set_auto_change_detection(false, true).unwrap();
        assert_eq!(count.text_content(), "1");
    }

    #[test]
    fn test_element_reads_and_input() {
        let (ctx, _scope) = active();
        ctx.bootstrap_from_template(
            "<input id=\"name\" class=\"field wide\" type=\"text\">",
            BoundInstance::builder().build(),
        )
        .unwrap();
        let input = HarnessLoader::for_fixture(&ctx)
            .unwrap()
            .child_loader("#name")
            .unwrap();
        let host = ctx.query_element("#name").unwrap();
        assert_eq!(input.root(), &host);

        let root = HarnessLoader::harness_for_bootstrapped_component::<CounterHarness>(&ctx).unwrap();
        let field = root.host.locate("#name").unwrap();
        assert_eq!(field.get_attribute("type").unwrap().as_deref(), Some("text"));
        assert!(field.has_class("wide").unwrap());
        assert!(field.matches_selector("input.field").unwrap());
        field.set_input_value("Mars").unwrap();
        assert_eq!(host.value(), "Mars");

        let seen = Rc::new(Cell::new(false));
        let flag = Rc::clone(&seen);
        host.add_event_listener("change", TaskOrigin::Root, move |event| {
            flag.set(event.prop("source") == Some(&json!("harness")));
        });
        field
            .dispatch_event("change", [("source".to_string(), json!("harness"))])
            .unwrap();
        assert!(seen.get());
    }
}
