//! Suite registration.
//!
//! Suites are plain values built by [`describe`] and friends; nothing is
//! registered globally. The definition closure runs with a [`SyncZone`]
//! scheduler, so scheduling a timer while defining a suite is reported as a
//! [`SettleError::SyncZoneViolation`] instead of leaking into a test.
//!
//! ```ignore
//! let suite = describe("greeting", |s| {
//!     s.before_each(|ctx| ctx.configure_test_module(ModuleConfig::new().declare::<Hello>()));
//!     s.it("renders", |ctx| {
//!         ctx.bootstrap::<Hello>().create()?;
//!         assert_eq!(ctx.query_element("p")?.text_content(), "Hello");
//!         Ok(())
//!     });
//! })?;
//! let results = TestRunner::new().run(&suite);
//! ```

use crate::clock::ClockOptions;
use crate::context::TestContext;
use crate::result::{SettleError, SettleResult};
use crate::scheduler::Scheduler;
use crate::zone::SyncZone;
use futures::future::LocalBoxFuture;
use std::fmt;
use std::rc::Rc;

/// How a wrapped body is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecMode {
    /// Fake zone; an unsettled future fails the test
    Strict,
    /// Real tokio runtime and timers
    TrueAsync,
    /// Fake zone; an unsettled future only warns
    Broken,
    /// Fake zone; only microtasks are drained after the body
    LegacyNoFlush,
}

/// Focus state of a spec or suite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Focus {
    /// Runs unless something else is focused
    #[default]
    Normal,
    /// Focused: when anything is focused, only focused specs run
    Only,
    /// Reported as skipped
    Skip,
}

/// What a body produced
pub enum SpecOutput {
    /// Finished synchronously
    Done(SettleResult<()>),
    /// Awaitable; the runner drives it according to the spec mode
    Future(LocalBoxFuture<'static, SettleResult<()>>),
}

impl fmt::Debug for SpecOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Done(result) => f.debug_tuple("Done").field(result).finish(),
            Self::Future(_) => f.write_str("Future(..)"),
        }
    }
}

/// Return types accepted from spec bodies
pub trait SpecOutcome {
    /// Convert into a [`SpecOutput`]
    fn into_output(self) -> SpecOutput;
}

impl SpecOutcome for () {
    fn into_output(self) -> SpecOutput {
        SpecOutput::Done(Ok(()))
    }
}

impl SpecOutcome for SettleResult<()> {
    fn into_output(self) -> SpecOutput {
        SpecOutput::Done(self)
    }
}

impl SpecOutcome for LocalBoxFuture<'static, SettleResult<()>> {
    fn into_output(self) -> SpecOutput {
        SpecOutput::Future(self)
    }
}

impl SpecOutcome for SpecOutput {
    fn into_output(self) -> SpecOutput {
        self
    }
}

pub(crate) type BodyFn = Rc<dyn Fn(&TestContext) -> SpecOutput>;
pub(crate) type UnwrappedFn = Rc<dyn Fn(&TestContext) -> SettleResult<()>>;

fn body<O: SpecOutcome>(f: impl Fn(&TestContext) -> O + 'static) -> BodyFn {
    Rc::new(move |ctx| f(ctx).into_output())
}

/// A registered spec
#[derive(Clone)]
pub struct Spec {
    pub(crate) name: String,
    pub(crate) mode: SpecMode,
    pub(crate) focus: Focus,
    pub(crate) timeout_ms: Option<u64>,
    pub(crate) body: BodyFn,
}

impl fmt::Debug for Spec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Spec")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("focus", &self.focus)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

impl Spec {
    /// Spec name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execution mode
    #[must_use]
    pub const fn mode(&self) -> SpecMode {
        self.mode
    }

    /// Focus state
    #[must_use]
    pub const fn focus(&self) -> Focus {
        self.focus
    }
}

/// A wrapped `before_each` / `after_each` hook
#[derive(Clone)]
pub struct Hook {
    pub(crate) mode: SpecMode,
    pub(crate) timeout_ms: Option<u64>,
    pub(crate) body: BodyFn,
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook")
            .field("mode", &self.mode)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

/// Entry of a suite, in declaration order
#[derive(Debug, Clone)]
pub enum SuiteItem {
    /// A spec
    Spec(Spec),
    /// A nested suite
    Suite(Suite),
}

/// A defined suite
#[derive(Clone, Default)]
pub struct Suite {
    pub(crate) name: String,
    pub(crate) focus: Focus,
    pub(crate) fixed_date_ms: Option<u64>,
    pub(crate) items: Vec<SuiteItem>,
    pub(crate) before_each: Vec<Hook>,
    pub(crate) after_each: Vec<Hook>,
    pub(crate) before_all: Vec<UnwrappedFn>,
    pub(crate) after_all: Vec<UnwrappedFn>,
    pub(crate) deprecations: Vec<String>,
}

impl fmt::Debug for Suite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Suite")
            .field("name", &self.name)
            .field("focus", &self.focus)
            .field("fixed_date_ms", &self.fixed_date_ms)
            .field("items", &self.items)
            .field("before_each", &self.before_each.len())
            .field("after_each", &self.after_each.len())
            .finish()
    }
}

impl Suite {
    /// Suite name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Focus state
    #[must_use]
    pub const fn focus(&self) -> Focus {
        self.focus
    }

    /// Pinned epoch for the suite's tests, if set here
    #[must_use]
    pub const fn fixed_date_ms(&self) -> Option<u64> {
        self.fixed_date_ms
    }

    /// Specs and nested suites in declaration order
    #[must_use]
    pub fn items(&self) -> &[SuiteItem] {
        &self.items
    }

    /// Number of specs, nested suites included
    #[must_use]
    pub fn spec_count(&self) -> usize {
        self.items
            .iter()
            .map(|item| match item {
                SuiteItem::Spec(_) => 1,
                SuiteItem::Suite(suite) => suite.spec_count(),
            })
            .sum()
    }

    /// Whether this suite or anything in it is focused
    #[must_use]
    pub fn has_focus(&self) -> bool {
        self.focus == Focus::Only
            || self.items.iter().any(|item| match item {
                SuiteItem::Spec(spec) => spec.focus == Focus::Only,
                SuiteItem::Suite(suite) => suite.has_focus(),
            })
    }

    /// Deprecation warnings raised while defining the suite
    #[must_use]
    pub fn deprecations(&self) -> Vec<String> {
        let mut out = self.deprecations.clone();
        for item in &self.items {
            if let SuiteItem::Suite(suite) = item {
                out.extend(suite.deprecations());
            }
        }
        out
    }
}

fn deprecated(old: &str, new: &str) -> String {
    let message = format!("Settle: '{old}()' is deprecated. Use '{new}()' instead");
    tracing::warn!("{message}");
    message
}

// =============================================================================
// Top-level suites
// =============================================================================

fn define(
    name: &str,
    focus: Focus,
    fixed_date_ms: Option<u64>,
    definition: impl FnOnce(&mut SuiteBuilder),
) -> SettleResult<Suite> {
    let mut builder = SuiteBuilder::new(name, focus, fixed_date_ms);
    definition(&mut builder);
    builder.finish()
}

fn parse_date(iso: &str) -> SettleResult<u64> {
    Ok(ClockOptions::from_iso(iso)?.time_ms)
}

/// Define a suite
///
/// # Errors
///
/// Returns `SyncZoneViolation` if the definition scheduled a macrotask
pub fn describe(name: &str, definition: impl FnOnce(&mut SuiteBuilder)) -> SettleResult<Suite> {
    define(name, Focus::Normal, None, definition)
}

/// Define a focused suite
///
/// # Errors
///
/// As [`describe`]
pub fn describe_only(name: &str, definition: impl FnOnce(&mut SuiteBuilder)) -> SettleResult<Suite> {
    define(name, Focus::Only, None, definition)
}

/// Define a skipped suite
///
/// # Errors
///
/// As [`describe`]
pub fn describe_skip(name: &str, definition: impl FnOnce(&mut SuiteBuilder)) -> SettleResult<Suite> {
    define(name, Focus::Skip, None, definition)
}

/// Define a suite whose tests see the clock pinned to `iso_date`
///
/// # Errors
///
/// Returns a clock error for a malformed date, or as [`describe`]
pub fn describe_with_fixed_date(
    name: &str,
    iso_date: &str,
    definition: impl FnOnce(&mut SuiteBuilder),
) -> SettleResult<Suite> {
    define(name, Focus::Normal, Some(parse_date(iso_date)?), definition)
}

/// Focused [`describe_with_fixed_date`]
///
/// # Errors
///
/// As [`describe_with_fixed_date`]
pub fn describe_with_fixed_date_only(
    name: &str,
    iso_date: &str,
    definition: impl FnOnce(&mut SuiteBuilder),
) -> SettleResult<Suite> {
    define(name, Focus::Only, Some(parse_date(iso_date)?), definition)
}

/// Skipped [`describe_with_fixed_date`]
///
/// # Errors
///
/// As [`describe_with_fixed_date`]
pub fn describe_with_fixed_date_skip(
    name: &str,
    iso_date: &str,
    definition: impl FnOnce(&mut SuiteBuilder),
) -> SettleResult<Suite> {
    define(name, Focus::Skip, Some(parse_date(iso_date)?), definition)
}

/// Deprecated alias of [`describe_skip`]
///
/// # Errors
///
/// As [`describe`]
#[deprecated(note = "use describe_skip")]
pub fn xdescribe(name: &str, definition: impl FnOnce(&mut SuiteBuilder)) -> SettleResult<Suite> {
    let warning = deprecated("xdescribe", "describe_skip");
    let mut suite = describe_skip(name, definition)?;
    suite.deprecations.push(warning);
    Ok(suite)
}

/// Deprecated alias of [`describe_only`]
///
/// # Errors
///
/// As [`describe`]
#[deprecated(note = "use describe_only")]
pub fn fdescribe(name: &str, definition: impl FnOnce(&mut SuiteBuilder)) -> SettleResult<Suite> {
    let warning = deprecated("fdescribe", "describe_only");
    let mut suite = describe_only(name, definition)?;
    suite.deprecations.push(warning);
    Ok(suite)
}

// =============================================================================
// Builder
// =============================================================================

/// Collects the specs, hooks and nested suites of one suite
pub struct SuiteBuilder {
    suite: Suite,
    sync: Rc<SyncZone>,
    error: Option<SettleError>,
}

impl fmt::Debug for SuiteBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuiteBuilder")
            .field("suite", &self.suite)
            .field("sync", &self.sync)
            .finish()
    }
}

impl SuiteBuilder {
    fn new(name: &str, focus: Focus, fixed_date_ms: Option<u64>) -> Self {
        Self {
            suite: Suite {
                name: name.to_string(),
                focus,
                fixed_date_ms,
                ..Suite::default()
            },
            sync: Rc::new(SyncZone::new(name)),
            error: None,
        }
    }

    fn finish(self) -> SettleResult<Suite> {
        self.sync.finish()?;
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.suite),
        }
    }

    /// Scheduler of the definition; timers scheduled here are violations
    #[must_use]
    pub fn scheduler(&self) -> Rc<dyn Scheduler> {
        Rc::clone(&self.sync) as Rc<dyn Scheduler>
    }

    fn push_spec(&mut self, name: &str, mode: SpecMode, focus: Focus, timeout_ms: Option<u64>, body: BodyFn) -> &mut Self {
        self.suite.items.push(SuiteItem::Spec(Spec {
            name: name.to_string(),
            mode,
            focus,
            timeout_ms,
            body,
        }));
        self
    }

    fn nested(
        &mut self,
        name: &str,
        focus: Focus,
        fixed_date_ms: Option<u64>,
        definition: impl FnOnce(&mut SuiteBuilder),
    ) -> &mut Self {
        match define(name, focus, fixed_date_ms, definition) {
            Ok(suite) => self.suite.items.push(SuiteItem::Suite(suite)),
            Err(err) => {
                self.error.get_or_insert(err);
            }
        }
        self
    }

    // -------------------------------------------------------------------------
    // Nested suites
    // -------------------------------------------------------------------------

    /// Nested suite
    pub fn describe(&mut self, name: &str, definition: impl FnOnce(&mut SuiteBuilder)) -> &mut Self {
        self.nested(name, Focus::Normal, None, definition)
    }

    /// Focused nested suite
    pub fn describe_only(&mut self, name: &str, definition: impl FnOnce(&mut SuiteBuilder)) -> &mut Self {
        self.nested(name, Focus::Only, None, definition)
    }

    /// Skipped nested suite
    pub fn describe_skip(&mut self, name: &str, definition: impl FnOnce(&mut SuiteBuilder)) -> &mut Self {
        self.nested(name, Focus::Skip, None, definition)
    }

    /// Nested suite with its own pinned date
    pub fn describe_with_fixed_date(
        &mut self,
        name: &str,
        iso_date: &str,
        definition: impl FnOnce(&mut SuiteBuilder),
    ) -> &mut Self {
        match parse_date(iso_date) {
            Ok(ms) => self.nested(name, Focus::Normal, Some(ms), definition),
            Err(err) => {
                self.error.get_or_insert(err);
                self
            }
        }
    }

    // -------------------------------------------------------------------------
    // Specs
    // -------------------------------------------------------------------------

    /// Spec in the fake zone; an unsettled future fails it
    pub fn it<O: SpecOutcome>(&mut self, name: &str, f: impl Fn(&TestContext) -> O + 'static) -> &mut Self {
        self.push_spec(name, SpecMode::Strict, Focus::Normal, None, body(f))
    }

    /// Focused [`it`](Self::it)
    pub fn it_only<O: SpecOutcome>(&mut self, name: &str, f: impl Fn(&TestContext) -> O + 'static) -> &mut Self {
        self.push_spec(name, SpecMode::Strict, Focus::Only, None, body(f))
    }

    /// Skipped [`it`](Self::it)
    pub fn it_skip<O: SpecOutcome>(&mut self, name: &str, f: impl Fn(&TestContext) -> O + 'static) -> &mut Self {
        self.push_spec(name, SpecMode::Strict, Focus::Skip, None, body(f))
    }

    /// [`it`](Self::it) with its own timeout
    pub fn it_with_timeout<O: SpecOutcome>(
        &mut self,
        name: &str,
        timeout_ms: u64,
        f: impl Fn(&TestContext) -> O + 'static,
    ) -> &mut Self {
        self.push_spec(name, SpecMode::Strict, Focus::Normal, Some(timeout_ms), body(f))
    }

    /// Spec on a real tokio runtime
    pub fn it_async<O: SpecOutcome>(&mut self, name: &str, f: impl Fn(&TestContext) -> O + 'static) -> &mut Self {
        self.push_spec(name, SpecMode::TrueAsync, Focus::Normal, None, body(f))
    }

    /// Focused [`it_async`](Self::it_async)
    pub fn it_async_only<O: SpecOutcome>(&mut self, name: &str, f: impl Fn(&TestContext) -> O + 'static) -> &mut Self {
        self.push_spec(name, SpecMode::TrueAsync, Focus::Only, None, body(f))
    }

    /// Skipped [`it_async`](Self::it_async)
    pub fn it_async_skip<O: SpecOutcome>(&mut self, name: &str, f: impl Fn(&TestContext) -> O + 'static) -> &mut Self {
        self.push_spec(name, SpecMode::TrueAsync, Focus::Skip, None, body(f))
    }

    /// [`it_async`](Self::it_async) with its own timeout
    pub fn it_async_with_timeout<O: SpecOutcome>(
        &mut self,
        name: &str,
        timeout_ms: u64,
        f: impl Fn(&TestContext) -> O + 'static,
    ) -> &mut Self {
        self.push_spec(name, SpecMode::TrueAsync, Focus::Normal, Some(timeout_ms), body(f))
    }

    /// Spec in the fake zone; an unsettled future only warns
    pub fn it_broken<O: SpecOutcome>(&mut self, name: &str, f: impl Fn(&TestContext) -> O + 'static) -> &mut Self {
        self.push_spec(name, SpecMode::Broken, Focus::Normal, None, body(f))
    }

    /// Focused [`it_broken`](Self::it_broken)
    pub fn it_broken_only<O: SpecOutcome>(&mut self, name: &str, f: impl Fn(&TestContext) -> O + 'static) -> &mut Self {
        self.push_spec(name, SpecMode::Broken, Focus::Only, None, body(f))
    }

    /// Skipped [`it_broken`](Self::it_broken)
    pub fn it_broken_skip<O: SpecOutcome>(&mut self, name: &str, f: impl Fn(&TestContext) -> O + 'static) -> &mut Self {
        self.push_spec(name, SpecMode::Broken, Focus::Skip, None, body(f))
    }

    /// Spec in the fake zone draining only microtasks afterwards
    pub fn it_legacy<O: SpecOutcome>(&mut self, name: &str, f: impl Fn(&TestContext) -> O + 'static) -> &mut Self {
        self.push_spec(name, SpecMode::LegacyNoFlush, Focus::Normal, None, body(f))
    }

    /// Focused [`it_legacy`](Self::it_legacy)
    pub fn it_legacy_only<O: SpecOutcome>(&mut self, name: &str, f: impl Fn(&TestContext) -> O + 'static) -> &mut Self {
        self.push_spec(name, SpecMode::LegacyNoFlush, Focus::Only, None, body(f))
    }

    /// Skipped [`it_legacy`](Self::it_legacy)
    pub fn it_legacy_skip<O: SpecOutcome>(&mut self, name: &str, f: impl Fn(&TestContext) -> O + 'static) -> &mut Self {
        self.push_spec(name, SpecMode::LegacyNoFlush, Focus::Skip, None, body(f))
    }

    /// Deprecated alias of [`it_skip`](Self::it_skip)
    #[deprecated(note = "use it_skip")]
    pub fn xit<O: SpecOutcome>(&mut self, name: &str, f: impl Fn(&TestContext) -> O + 'static) -> &mut Self {
        let warning = deprecated("xit", "it_skip");
        self.suite.deprecations.push(warning);
        self.it_skip(name, f)
    }

    /// Deprecated alias of [`it_only`](Self::it_only)
    #[deprecated(note = "use it_only")]
    pub fn fit<O: SpecOutcome>(&mut self, name: &str, f: impl Fn(&TestContext) -> O + 'static) -> &mut Self {
        let warning = deprecated("fit", "it_only");
        self.suite.deprecations.push(warning);
        self.it_only(name, f)
    }

    /// Deprecated alias of [`it_legacy_only`](Self::it_legacy_only)
    #[deprecated(note = "use it_legacy_only")]
    pub fn fit_legacy<O: SpecOutcome>(&mut self, name: &str, f: impl Fn(&TestContext) -> O + 'static) -> &mut Self {
        let warning = deprecated("fit", "it_only");
        self.suite.deprecations.push(warning);
        self.it_legacy_only(name, f)
    }

    // -------------------------------------------------------------------------
    // Hooks
    // -------------------------------------------------------------------------

    fn push_before(&mut self, mode: SpecMode, timeout_ms: Option<u64>, body: BodyFn) -> &mut Self {
        self.suite.before_each.push(Hook { mode, timeout_ms, body });
        self
    }

    fn push_after(&mut self, mode: SpecMode, timeout_ms: Option<u64>, body: BodyFn) -> &mut Self {
        self.suite.after_each.push(Hook { mode, timeout_ms, body });
        self
    }

    /// Wrapped hook before every spec of this suite and nested suites
    pub fn before_each<O: SpecOutcome>(&mut self, f: impl Fn(&TestContext) -> O + 'static) -> &mut Self {
        self.push_before(SpecMode::Strict, None, body(f))
    }

    /// [`before_each`](Self::before_each) with its own timeout
    pub fn before_each_with_timeout<O: SpecOutcome>(
        &mut self,
        timeout_ms: u64,
        f: impl Fn(&TestContext) -> O + 'static,
    ) -> &mut Self {
        self.push_before(SpecMode::Strict, Some(timeout_ms), body(f))
    }

    /// `before_each` on a real tokio runtime
    pub fn before_each_async<O: SpecOutcome>(&mut self, f: impl Fn(&TestContext) -> O + 'static) -> &mut Self {
        self.push_before(SpecMode::TrueAsync, None, body(f))
    }

    /// `before_each` that only warns about an unsettled future
    pub fn before_each_broken<O: SpecOutcome>(&mut self, f: impl Fn(&TestContext) -> O + 'static) -> &mut Self {
        self.push_before(SpecMode::Broken, None, body(f))
    }

    /// `before_each` draining only microtasks afterwards
    pub fn before_each_legacy<O: SpecOutcome>(&mut self, f: impl Fn(&TestContext) -> O + 'static) -> &mut Self {
        self.push_before(SpecMode::LegacyNoFlush, None, body(f))
    }

    /// Wrapped hook after every spec, run even when the spec failed
    pub fn after_each<O: SpecOutcome>(&mut self, f: impl Fn(&TestContext) -> O + 'static) -> &mut Self {
        self.push_after(SpecMode::Strict, None, body(f))
    }

    /// [`after_each`](Self::after_each) with its own timeout
    pub fn after_each_with_timeout<O: SpecOutcome>(
        &mut self,
        timeout_ms: u64,
        f: impl Fn(&TestContext) -> O + 'static,
    ) -> &mut Self {
        self.push_after(SpecMode::Strict, Some(timeout_ms), body(f))
    }

    /// `after_each` on a real tokio runtime
    pub fn after_each_async<O: SpecOutcome>(&mut self, f: impl Fn(&TestContext) -> O + 'static) -> &mut Self {
        self.push_after(SpecMode::TrueAsync, None, body(f))
    }

    /// `after_each` draining only microtasks afterwards
    pub fn after_each_legacy<O: SpecOutcome>(&mut self, f: impl Fn(&TestContext) -> O + 'static) -> &mut Self {
        self.push_after(SpecMode::LegacyNoFlush, None, body(f))
    }

    /// Unwrapped hook before the first spec of the suite; harness APIs are
    /// not available in it
    pub fn before_all(&mut self, f: impl Fn(&TestContext) -> SettleResult<()> + 'static) -> &mut Self {
        self.suite.before_all.push(Rc::new(f));
        self
    }

    /// Unwrapped hook after the last spec of the suite
    pub fn after_all(&mut self, f: impl Fn(&TestContext) -> SettleResult<()> + 'static) -> &mut Self {
        self.suite.after_all.push(Rc::new(f));
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_collects_in_order() {
        let suite = describe("outer", |s| {
            s.it("first", |_| ());
            s.describe("inner", |s| {
                s.it_async("second", |_| Ok::<(), SettleError>(()));
            });
            s.it_legacy("third", |_| ());
        })
        .unwrap();
        assert_eq!(suite.name(), "outer");
        assert_eq!(suite.spec_count(), 3);
        assert!(matches!(&suite.items()[1], SuiteItem::Suite(inner) if inner.name() == "inner"));
        assert!(!suite.has_focus());
    }

    #[test]
    fn test_focus_propagates_up() {
        let suite = describe("outer", |s| {
            s.describe("inner", |s| {
                s.it_only("focused", |_| ());
            });
        })
        .unwrap();
        assert!(suite.has_focus());
    }

    #[test]
    fn test_timer_during_definition_is_violation() {
        let err = describe("defining", |s| {
            s.scheduler().set_timeout(10, Box::new(|| {}));
        })
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot call set_timeout from within a sync test (defining)."
        );
    }

    #[test]
    fn test_nested_violation_surfaces() {
        let err = describe("outer", |s| {
            s.describe("inner", |s| {
                s.scheduler().request_animation_frame(Box::new(|| {}));
            });
        })
        .unwrap_err();
        assert!(err.to_string().contains("(inner)"));
    }

    #[test]
    fn test_microtasks_run_after_definition() {
        let ran = Rc::new(std::cell::Cell::new(false));
        let r = Rc::clone(&ran);
        describe("defining", move |s| {
            s.scheduler().queue_microtask(Box::new(move || r.set(true)));
        })
        .unwrap();
        assert!(ran.get());
    }

    #[test]
    fn test_fixed_date_parsed() {
        let suite = describe_with_fixed_date("dated", "1983-01-22T12:00:00Z", |_| {}).unwrap();
        assert_eq!(suite.fixed_date_ms(), Some(412_084_800_000));
        assert!(describe_with_fixed_date("bad", "yesterday", |_| {}).is_err());
    }

    #[test]
    #[allow(deprecated)]
    fn test_deprecated_aliases_warn() {
        let suite = xdescribe("old", |s| {
            s.xit("skipped", |_| ());
            s.fit("focused", |_| ());
        })
        .unwrap();
        assert_eq!(suite.focus(), Focus::Skip);
        let warnings = suite.deprecations();
        assert!(warnings.contains(&"Settle: 'xit()' is deprecated. Use 'it_skip()' instead".to_string()));
        assert!(warnings.contains(&"Settle: 'fit()' is deprecated. Use 'it_only()' instead".to_string()));
        assert!(warnings.contains(&"Settle: 'xdescribe()' is deprecated. Use 'describe_skip()' instead".to_string()));
    }
}
