//! Suite runner.
//!
//! Walks a [`Suite`] tree and runs each spec against one [`TestContext`]:
//! reset, `before_each` hooks outer-first, the body, `after_each` hooks
//! inner-first, reset again. Hooks and bodies run wrapped: the context's
//! active flag is up while they execute, and their result is driven
//! according to their [`SpecMode`].

use crate::config::SettleConfig;
use crate::context::TestContext;
use crate::harness::{BodyFn, Focus, Spec, SpecMode, SpecOutput, Suite, SuiteItem};
use crate::logging::{ConsoleEntry, ConsoleLevel};
use crate::result::{SettleError, SettleResult};
use crate::scheduler::RealScheduler;
use futures::FutureExt;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Text appended to the unsettled-future message for broken specs
pub const UNSETTLED_WARNING_SUFFIX: &str = " This warning will become an error soon.";

/// Outcome of a single spec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestStatus {
    /// Body and hooks succeeded
    Passed,
    /// Something returned an error or panicked
    Failed,
    /// Skipped, or excluded by focus
    Skipped,
}

/// Result of running a single spec
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Suite path and spec name joined with `" > "`
    pub name: String,
    /// Outcome
    pub status: TestStatus,
    /// Error message if failed
    pub error: Option<String>,
    /// Test duration
    pub duration: Duration,
    /// Warnings and errors recorded while the spec ran
    pub diagnostics: Vec<ConsoleEntry>,
}

impl TestResult {
    /// Create a passing test result
    #[must_use]
    pub fn pass(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: TestStatus::Passed,
            error: None,
            duration: Duration::ZERO,
            diagnostics: Vec::new(),
        }
    }

    /// Create a failing test result
    #[must_use]
    pub fn fail(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: TestStatus::Failed,
            error: Some(error.into()),
            duration: Duration::ZERO,
            diagnostics: Vec::new(),
        }
    }

    /// Create a skipped test result
    #[must_use]
    pub fn skip(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: TestStatus::Skipped,
            error: None,
            duration: Duration::ZERO,
            diagnostics: Vec::new(),
        }
    }

    /// Set duration
    #[must_use]
    pub const fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Attach recorded diagnostics
    #[must_use]
    pub fn with_diagnostics(mut self, diagnostics: Vec<ConsoleEntry>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Whether the spec passed
    #[must_use]
    pub fn passed(&self) -> bool {
        self.status == TestStatus::Passed
    }

    /// Warning messages recorded during the spec
    #[must_use]
    pub fn warnings(&self) -> Vec<&str> {
        self.diagnostics
            .iter()
            .filter(|e| e.level == ConsoleLevel::Warn)
            .map(|e| e.message.as_str())
            .collect()
    }
}

/// Results from running a suite
#[derive(Debug, Clone)]
pub struct SuiteResults {
    /// Suite name
    pub suite_name: String,
    /// Individual test results
    pub results: Vec<TestResult>,
    /// Total duration
    pub duration: Duration,
    /// Deprecation warnings raised while the suite was defined
    pub deprecations: Vec<String>,
}

impl SuiteResults {
    /// Check that nothing failed; skipped specs do not count
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.status != TestStatus::Failed)
    }

    /// Count passed tests
    #[must_use]
    pub fn passed_count(&self) -> usize {
        self.count(TestStatus::Passed)
    }

    /// Count failed tests
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.count(TestStatus::Failed)
    }

    /// Count skipped tests
    #[must_use]
    pub fn skipped_count(&self) -> usize {
        self.count(TestStatus::Skipped)
    }

    fn count(&self, status: TestStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    /// Get total test count
    #[must_use]
    pub fn total(&self) -> usize {
        self.results.len()
    }

    /// Get failed tests
    #[must_use]
    pub fn failures(&self) -> Vec<&TestResult> {
        self.results
            .iter()
            .filter(|r| r.status == TestStatus::Failed)
            .collect()
    }

    /// Result for a spec by full name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&TestResult> {
        self.results.iter().find(|r| r.name == name)
    }

    /// Number of warnings recorded across all specs
    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.results.iter().map(|r| r.warnings().len()).sum()
    }
}

/// Runs suites against a [`TestContext`]
#[derive(Debug, Clone, Default)]
pub struct TestRunner {
    /// Configuration for contexts created by [`run`](Self::run)
    pub config: SettleConfig,
    /// Whether to stop on first failure
    pub fail_fast: bool,
}

struct Walk {
    focus_mode: bool,
    stopped: bool,
    results: Vec<TestResult>,
}

impl TestRunner {
    /// Create a runner with the default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a runner with an explicit configuration
    #[must_use]
    pub fn with_config(config: SettleConfig) -> Self {
        Self {
            config,
            fail_fast: false,
        }
    }

    /// Enable fail-fast mode; specs after the first failure are skipped
    #[must_use]
    pub const fn with_fail_fast(mut self) -> Self {
        self.fail_fast = true;
        self
    }

    /// Run a suite on a fresh context
    #[must_use]
    pub fn run(&self, suite: &Suite) -> SuiteResults {
        self.run_with_context(&TestContext::with_config(self.config.clone()), suite)
    }

    /// Run a suite on `ctx`
    #[must_use]
    pub fn run_with_context(&self, ctx: &TestContext, suite: &Suite) -> SuiteResults {
        let start = Instant::now();
        let mut walk = Walk {
            focus_mode: suite.has_focus(),
            stopped: false,
            results: Vec::new(),
        };
        let mut chain = Vec::new();
        self.run_suite(ctx, suite, &mut chain, None, &mut walk);
        let results = SuiteResults {
            suite_name: suite.name().to_string(),
            results: walk.results,
            duration: start.elapsed(),
            deprecations: suite.deprecations(),
        };
        tracing::debug!(
            suite = %results.suite_name,
            passed = results.passed_count(),
            failed = results.failed_count(),
            skipped = results.skipped_count(),
            "suite finished"
        );
        results
    }

    fn run_suite<'a>(
        &self,
        ctx: &TestContext,
        suite: &'a Suite,
        chain: &mut Vec<&'a Suite>,
        blocked: Option<&str>,
        walk: &mut Walk,
    ) {
        chain.push(suite);
        let has_work = blocked.is_none() && any_runnable(suite, chain, walk.focus_mode);

        let mut before_all_error = None;
        if has_work {
            for hook in &suite.before_all {
                if let Err(err) = run_unwrapped(ctx, hook.as_ref()) {
                    before_all_error = Some(format!("before_all failed: {err}"));
                    break;
                }
            }
        }
        let blocked = blocked.or(before_all_error.as_deref());

        for item in &suite.items {
            match item {
                SuiteItem::Suite(nested) => self.run_suite(ctx, nested, chain, blocked, walk),
                SuiteItem::Spec(spec) => {
                    let name = full_name(chain, &spec.name);
                    let result = if walk.stopped || !is_runnable(spec.focus, chain, walk.focus_mode) {
                        TestResult::skip(name)
                    } else if let Some(reason) = blocked {
                        TestResult::fail(name, reason)
                    } else {
                        self.run_spec(ctx, spec, chain, name)
                    };
                    if self.fail_fast && result.status == TestStatus::Failed {
                        walk.stopped = true;
                    }
                    walk.results.push(result);
                }
            }
        }

        if has_work {
            for hook in &suite.after_all {
                if let Err(err) = run_unwrapped(ctx, hook.as_ref()) {
                    ctx.diagnostics().error(format!("after_all failed: {err}"));
                }
            }
        }
        chain.pop();
    }

    fn run_spec(&self, ctx: &TestContext, spec: &Spec, chain: &[&Suite], name: String) -> TestResult {
        tracing::debug!(test = %name, mode = ?spec.mode, "running spec");
        let start = Instant::now();
        let fixed_date = chain.iter().rev().find_map(|suite| suite.fixed_date_ms);
        let default_timeout = ctx.config().default_timeout_ms;

        let mut error = ctx.begin_test(fixed_date).err();
        if error.is_none() {
            'hooks: for suite in chain {
                for hook in &suite.before_each {
                    let timeout = hook.timeout_ms.unwrap_or(default_timeout);
                    if let Err(err) = run_wrapped(ctx, hook.mode, &hook.body, timeout) {
                        error = Some(err);
                        break 'hooks;
                    }
                }
            }
        }
        if error.is_none() {
            let timeout = spec.timeout_ms.unwrap_or(default_timeout);
            error = run_wrapped(ctx, spec.mode, &spec.body, timeout).err();
        }
        for suite in chain.iter().rev() {
            for hook in &suite.after_each {
                let timeout = hook.timeout_ms.unwrap_or(default_timeout);
                if let Err(err) = run_wrapped(ctx, hook.mode, &hook.body, timeout) {
                    error.get_or_insert(err);
                }
            }
        }
        if let Err(err) = ctx.reset() {
            error.get_or_insert(err);
        }

        let diagnostics = ctx.diagnostics().drain();
        let result = match error {
            Some(err) => {
                tracing::debug!(test = %name, error = %err, "spec failed");
                TestResult::fail(name, err.to_string())
            }
            None => TestResult::pass(name),
        };
        result
            .with_duration(start.elapsed())
            .with_diagnostics(diagnostics)
    }
}

fn full_name(chain: &[&Suite], spec: &str) -> String {
    chain
        .iter()
        .map(|suite| suite.name.as_str())
        .chain(std::iter::once(spec))
        .collect::<Vec<_>>()
        .join(" > ")
}

fn is_runnable(focus: Focus, chain: &[&Suite], focus_mode: bool) -> bool {
    if focus == Focus::Skip || chain.iter().any(|s| s.focus == Focus::Skip) {
        return false;
    }
    !focus_mode || focus == Focus::Only || chain.iter().any(|s| s.focus == Focus::Only)
}

fn any_runnable<'a>(suite: &'a Suite, chain: &mut Vec<&'a Suite>, focus_mode: bool) -> bool {
    suite.items.iter().any(|item| match item {
        SuiteItem::Spec(spec) => is_runnable(spec.focus, chain, focus_mode),
        SuiteItem::Suite(nested) => {
            chain.push(nested);
            let found = any_runnable(nested, chain, focus_mode);
            chain.pop();
            found
        }
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}

fn catch<R>(f: impl FnOnce() -> SettleResult<R>) -> SettleResult<R> {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        Err(SettleError::Panicked {
            message: panic_message(payload.as_ref()),
        })
    })
}

fn run_unwrapped(ctx: &TestContext, hook: &dyn Fn(&TestContext) -> SettleResult<()>) -> SettleResult<()> {
    catch(|| hook(ctx))
}

/// Run a hook or spec body with the active flag raised. An uncaught task
/// failure nobody took fails an otherwise passing run.
pub(crate) fn run_wrapped(ctx: &TestContext, mode: SpecMode, body: &BodyFn, timeout_ms: u64) -> SettleResult<()> {
    let result = match mode {
        SpecMode::TrueAsync => run_real(ctx, body, timeout_ms),
        _ => run_fake(ctx, mode, body, timeout_ms),
    };
    match (result, ctx.diagnostics().take_task_error()) {
        (Ok(()), Some(err)) => Err(err),
        (result, _) => result,
    }
}

/// A fake-zone body runs on this thread and cannot be interrupted, so the
/// wall-clock timeout is checked after the body and again after the drain.
/// A drain that never settles stops at the flush or microtask limit.
fn run_fake(ctx: &TestContext, mode: SpecMode, body: &BodyFn, timeout_ms: u64) -> SettleResult<()> {
    let start = Instant::now();
    let check_deadline = || {
        if start.elapsed() > Duration::from_millis(timeout_ms) {
            Err(SettleError::Timeout { ms: timeout_ms })
        } else {
            Ok(())
        }
    };

    let _scope = ctx.activate();
    let output = catch(|| Ok(ctx.zone().run(|| body(ctx))))?;
    let future = match output {
        SpecOutput::Done(result) => return result.and_then(|()| check_deadline()),
        SpecOutput::Future(future) => future,
    };
    check_deadline()?;

    let handle = catch(|| Ok(ctx.zone().run(|| ctx.zone().spawn(future))))?;
    if mode == SpecMode::LegacyNoFlush {
        catch(|| ctx.flush_microtasks_unchecked())?;
    } else {
        catch(|| ctx.flush_pending_work_unchecked().map(drop))?;
    }

    check_deadline()?;

    match handle.take_output() {
        Some(result) => result,
        None => match mode {
            SpecMode::Strict => Err(SettleError::UnsettledFuture),
            SpecMode::Broken => {
                handle.abort();
                let message = format!("{}{UNSETTLED_WARNING_SUFFIX}", SettleError::UnsettledFuture);
                ctx.warn_unsettled(&message);
                Ok(())
            }
            _ => Ok(()),
        },
    }
}

fn run_real(ctx: &TestContext, body: &BodyFn, timeout_ms: u64) -> SettleResult<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .map_err(|err| SettleError::Runtime {
            message: err.to_string(),
        })?;
    let local = tokio::task::LocalSet::new();

    let _scope = ctx.activate();
    ctx.set_real_scheduler(Some(Rc::new(RealScheduler::new())));
    let result = local.block_on(&runtime, async {
        let future = match catch(|| Ok(body(ctx)))? {
            SpecOutput::Done(result) => return result,
            SpecOutput::Future(future) => future,
        };
        let guarded = AssertUnwindSafe(future).catch_unwind();
        match tokio::time::timeout(Duration::from_millis(timeout_ms), guarded).await {
            Ok(Ok(result)) => result,
            Ok(Err(payload)) => Err(SettleError::Panicked {
                message: panic_message(payload.as_ref()),
            }),
            Err(_) => Err(SettleError::Timeout { ms: timeout_ms }),
        }
    });
    ctx.set_real_scheduler(None);
    result
}
