//! Bootstrapped component fixture.
//!
//! A [`ComponentFixture`] owns the root view of one bootstrap. Every render
//! it runs holds a [`DepthGuard`](crate::stabilize::DepthGuard), and its
//! [`FixtureObserver`] is the zone's task observer: after a framework task
//! finishes outside of a render it drains the microtasks that task queued
//! and, with auto detection on, re-renders.

use crate::logging::Diagnostics;
use crate::result::SettleResult;
use crate::scheduler::{TaskKind, TaskOrigin};
use crate::stabilize::ChangeDetectionDepth;
use crate::view::component::{Component, ComponentInstance, ComponentRef};
use crate::view::dom::Element;
use crate::view::injector::Injector;
use crate::view::ComponentView;
use crate::zone::{FakeAsyncZone, TaskObserver};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

struct FixtureInner {
    view: Rc<ComponentView>,
    depth: ChangeDetectionDepth,
    auto_detect: Cell<bool>,
    destroyed: Cell<bool>,
}

/// Root view of a bootstrap. Clones share the same fixture.
#[derive(Clone)]
pub struct ComponentFixture {
    inner: Rc<FixtureInner>,
}

impl fmt::Debug for ComponentFixture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentFixture")
            .field("component", &self.inner.view.def().name())
            .field("auto_detect", &self.inner.auto_detect.get())
            .field("destroyed", &self.inner.destroyed.get())
            .finish()
    }
}

impl ComponentFixture {
    pub(crate) fn new(view: Rc<ComponentView>, depth: ChangeDetectionDepth, auto_detect: bool) -> Self {
        Self {
            inner: Rc::new(FixtureInner {
                view,
                depth,
                auto_detect: Cell::new(auto_detect),
                destroyed: Cell::new(false),
            }),
        }
    }

    /// Root view
    #[must_use]
    pub fn view(&self) -> &Rc<ComponentView> {
        &self.inner.view
    }

    /// Host element of the root component
    #[must_use]
    pub fn host(&self) -> &Element {
        self.inner.view.host()
    }

    /// Root component instance
    #[must_use]
    pub fn instance(&self) -> &ComponentInstance {
        self.inner.view.instance()
    }

    /// Root component as `C`
    #[must_use]
    pub fn component<C: Component>(&self) -> Option<ComponentRef<C>> {
        self.inner.view.instance().downcast::<C>()
    }

    /// Injector of the root component
    #[must_use]
    pub fn injector(&self) -> &Injector {
        self.inner.view.injector()
    }

    /// Render the whole tree now
    ///
    /// # Errors
    ///
    /// Returns error if a component is busy or a hook fails
    pub fn detect_changes(&self) -> SettleResult<()> {
        if self.inner.destroyed.get() {
            return Ok(());
        }
        let _guard = self.inner.depth.enter();
        self.inner.view.detect_changes()
    }

    /// Turn automatic rendering after framework tasks on or off
    pub fn auto_detect_changes(&self, enabled: bool) {
        self.inner.auto_detect.set(enabled);
    }

    /// Whether automatic rendering is on
    #[must_use]
    pub fn is_auto_detect(&self) -> bool {
        self.inner.auto_detect.get()
    }

    /// Mark the root view for checking (on-push components)
    pub fn mark_for_check(&self) {
        self.inner.view.mark_for_check();
    }

    /// Destroy the component tree and detach the host. A second call does
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns the first `on_destroy` failure
    pub fn destroy(&self) -> SettleResult<()> {
        if self.inner.destroyed.replace(true) {
            return Ok(());
        }
        let result = self.inner.view.destroy();
        self.inner.view.host().detach();
        tracing::debug!(component = self.inner.view.def().name(), "fixture destroyed");
        result
    }

    /// Whether `destroy` ran
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }
}

/// Zone observer stabilizing after framework tasks.
///
/// After a `Platform` task, and only while no render is running:
/// - an event task that left microtasks behind gets them drained;
/// - with auto detection on, the tracked fixture re-renders.
pub(crate) struct FixtureObserver {
    fixture: RefCell<Option<ComponentFixture>>,
    depth: ChangeDetectionDepth,
    diagnostics: Diagnostics,
}

impl FixtureObserver {
    pub(crate) fn new(depth: ChangeDetectionDepth, diagnostics: Diagnostics) -> Self {
        Self {
            fixture: RefCell::new(None),
            depth,
            diagnostics,
        }
    }

    pub(crate) fn track(&self, fixture: Option<ComponentFixture>) {
        *self.fixture.borrow_mut() = fixture;
    }
}

impl TaskObserver for FixtureObserver {
    fn after_task(&self, zone: &FakeAsyncZone, kind: TaskKind, origin: TaskOrigin) {
        if origin != TaskOrigin::Platform || !self.depth.is_idle() {
            return;
        }
        if kind == TaskKind::Event && !zone.is_stable() {
            if let Err(err) = zone.run(|| zone.flush_microtasks()) {
                self.diagnostics
                    .task_failed(format!("failed to drain microtasks after event: {err}"));
            }
        }
        let fixture = self.fixture.borrow().clone();
        if let Some(fixture) = fixture.filter(ComponentFixture::is_auto_detect) {
            if let Err(err) = fixture.detect_changes() {
                self.diagnostics.task_failed(format!("change detection failed: {err}"));
            }
        }
    }
}
