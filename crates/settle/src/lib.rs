//! Settle: Deterministic Fake-Async Test Harness for Component UIs
//!
//! Every spec body runs inside a fake-async zone. Timers, animation frames,
//! microtasks and futures scheduled by the code under test are captured and
//! only run when the test advances virtual time or flushes, so a component
//! test reads top to bottom like synchronous code.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        SETTLE Architecture                        │
//! ├──────────────────────────────────────────────────────────────────┤
//! │   ┌────────────┐    ┌────────────┐    ┌──────────────────────┐   │
//! │   │ describe / │    │ TestRunner │    │ TestContext          │   │
//! │   │ it (Suite) │───►│ (hooks,    │───►│ FakeAsyncZone + Clock│   │
//! │   │            │    │  focus)    │    │ module, fixture      │   │
//! │   └────────────┘    └────────────┘    └──────────┬───────────┘   │
//! │                                                  │               │
//! │          ┌────────────┬─────────────┬────────────┴──────┐        │
//! │          ▼            ▼             ▼                   ▼        │
//! │    ┌──────────┐ ┌───────────┐ ┌────────────┐ ┌────────────────┐  │
//! │    │ queries, │ │ inspector,│ │ harness    │ │ mock network   │  │
//! │    │ events   │ │ matchers  │ │ loader     │ │ backend        │  │
//! │    └──────────┘ └───────────┘ └────────────┘ └────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! let suite = describe("hello", |s| {
//!     s.before_each(|ctx| ctx.configure_test_module(ModuleConfig::new().declare::<Hello>()));
//!     s.it("greets Mars", |ctx| {
//!         ctx.bootstrap::<Hello>().input("name", "Mars").create()?;
//!         assert_eq!(ctx.query_element("p")?.text_content(), "Hello Mars");
//!         Ok(())
//!     });
//! })?;
//! assert!(TestRunner::new().run(&suite).all_passed());
//! ```

#![warn(missing_docs)]
// Lints are configured in workspace Cargo.toml [workspace.lints.clippy]

/// Stream and future matchers with jasmine-compatible messages
#[allow(clippy::missing_errors_doc)]
pub mod assertion;
pub mod clock;
pub mod component_harness;
pub mod config;
pub mod context;
pub mod event;
pub mod fixture;
pub mod harness;
pub mod inspector;
pub mod locator;
pub mod logging;
pub mod module;
pub mod network;
pub mod result;
pub mod runner;
pub mod scheduler;
pub mod stabilize;
pub mod view;
pub mod zone;

pub use assertion::equality::{DiffBuilder, Equality};
pub use assertion::{
    expect_future, expect_stream, FutureExpectation, MatcherKind, MatcherResult, MessageMatcher,
    StreamExpectation, ASYNC_MATCHERS,
};
pub use clock::{create_clock, Clock, ClockError, ClockOptions, ClockState, VirtualClock};
pub use component_harness::{ComponentHarness, HarnessLoader, QueryFn, TestElement};
pub use config::{SettleConfig, SettleConfigBuilder};
pub use context::{Bootstrap, DebugElement, TestContext};
pub use event::{Event, EventInit, EventKind};
pub use fixture::ComponentFixture;
#[allow(deprecated)]
pub use harness::{
    describe, describe_only, describe_skip, describe_with_fixed_date, describe_with_fixed_date_only,
    describe_with_fixed_date_skip, fdescribe, xdescribe, Focus, Spec, SpecMode, SpecOutcome,
    SpecOutput, Suite, SuiteBuilder, SuiteItem,
};
pub use inspector::{errors_as_values, Emissions, Inspector, PromiseResult};
pub use logging::{init_tracing, ConsoleEntry, ConsoleLevel, Diagnostics};
pub use module::{
    browser_animations_module, noop_animations_module, AnimationModuleType, ModuleConfig,
    ModuleTeardownOptions, Schema, TestModuleDef,
};
pub use network::{
    mock_backend_module, Headers, HttpClient, HttpError, Method, MockBackend, Request, Response,
    ResponseAction, ResponseFuture,
};
pub use result::{SettleError, SettleResult};
pub use runner::{SuiteResults, TestResult, TestRunner, TestStatus};
pub use scheduler::{Scheduler, TaskId, TaskKind, TaskOrigin};
pub use view::component::{BoundInstance, Component, ComponentRef, HandlerContext};
pub use view::dom::{Document, Element};
pub use view::injector::{Injector, Provider};
pub use zone::{FakeAsyncZone, SyncZone, TaskHandle};
