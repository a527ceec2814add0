//! Result and error types for Settle.

use crate::clock::ClockError;
use thiserror::Error;

/// Result type for Settle operations
pub type SettleResult<T> = Result<T, SettleError>;

/// Errors that can occur in Settle
#[derive(Debug, Error)]
pub enum SettleError {
    /// Harness API used outside of a wrapped spec body
    #[error("{hint} Remember to register the spec with it(), before_each() or after_each() from settle.")]
    NotInHarness {
        /// Where the call should have been made
        hint: String,
    },

    /// Bootstrap requested before a module was configured
    #[error("Please call configure_test_module() before {api}")]
    ModuleNotConfigured {
        /// Name of the API that needed the module
        api: String,
    },

    /// Template bootstrap after the module was compiled by `inject()`
    #[error("Cannot call bootstrap_from_template() after inject()")]
    CompilationDone,

    /// Fixture query without a bootstrapped component
    #[error("Please call bootstrap() first")]
    NoFixture,

    /// Zone operation attempted while the zone is not running
    #[error("The fake async zone is not active: {operation} must run inside the harness")]
    ZoneInactive {
        /// Zone operation name
        operation: String,
    },

    /// Awaitable spec body did not settle inside the zone
    #[error("Test returned a future that didn't resolve within the fake async zone. It either never completes or waits for real async data (use it_async in this case).")]
    UnsettledFuture,

    /// Task drain exceeded its bound
    #[error("flush failed after reaching the limit of {limit} tasks. Does your code use a polling timeout?")]
    FlushLimitExceeded {
        /// Limit that was hit
        limit: usize,
    },

    /// Microtask drain exceeded its bound
    #[error("microtask drain exceeded {limit} turns. Does your code re-queue microtasks forever?")]
    MicrotaskLimitExceeded {
        /// Limit that was hit
        limit: usize,
    },

    /// Macrotask scheduled during suite definition
    #[error("Cannot call {source_api} from within a sync test ({suite}).")]
    SyncZoneViolation {
        /// Scheduling API that was called
        source_api: String,
        /// Suite being defined
        suite: String,
    },

    /// Element query without a match
    #[error("Element not found for \"{selector}\"")]
    ElementNotFound {
        /// Selector that was queried
        selector: String,
    },

    /// Selector could not be parsed
    #[error("Invalid selector \"{selector}\": {reason}")]
    InvalidSelector {
        /// Selector text
        selector: String,
        /// Parse failure
        reason: String,
    },

    /// Debug element query without a match
    #[error("DebugElement not found for \"{query}\"")]
    DebugElementNotFound {
        /// Query that was used
        query: String,
    },

    /// Dependency not registered with the injector
    #[error("No provider for {token}!")]
    NoProvider {
        /// Token type name
        token: String,
    },

    /// Unknown component or bound-instance field
    #[error("{owner} has no field named '{field}'")]
    UnknownField {
        /// Owner type name
        owner: String,
        /// Field that was addressed
        field: String,
    },

    /// Mock connection table already has a response for the pair
    #[error("Already defined a response for {method} on {url}")]
    DuplicateResponse {
        /// HTTP method
        method: String,
        /// Request URL
        url: String,
    },

    /// Mock backend verification failure
    #[error("{message}")]
    VerificationFailed {
        /// Aggregated verification message
        message: String,
    },

    /// Template could not be parsed
    #[error("Template parse error: {message}")]
    Template {
        /// Error message
        message: String,
    },

    /// Operation timed out
    #[error("Operation timed out after {ms}ms")]
    Timeout {
        /// Timeout in milliseconds
        ms: u64,
    },

    /// Assertion failed
    #[error("Assertion failed: {message}")]
    AssertionFailed {
        /// Error message
        message: String,
    },

    /// Component lifecycle hook failed
    #[error("Component error: {message}")]
    Component {
        /// Error message
        message: String,
    },

    /// A scheduled task, event handler or automatic render failed
    #[error("Uncaught error in task: {message}")]
    TaskFailed {
        /// First failure recorded
        message: String,
    },

    /// Spec body panicked
    #[error("Test panicked: {message}")]
    Panicked {
        /// Panic payload
        message: String,
    },

    /// Async runtime could not be created
    #[error("Runtime error: {message}")]
    Runtime {
        /// Error message
        message: String,
    },

    /// Clock error
    #[error("Clock error: {0}")]
    Clock(#[from] ClockError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML configuration error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl SettleError {
    /// Usage error for an API called outside the harness
    #[must_use]
    pub fn not_in_harness(hint: impl Into<String>) -> Self {
        Self::NotInHarness { hint: hint.into() }
    }

    /// Failed assertion with the given message
    #[must_use]
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::AssertionFailed {
            message: message.into(),
        }
    }

    /// Whether this error signals runaway scheduled work
    #[must_use]
    pub const fn is_runaway(&self) -> bool {
        matches!(
            self,
            Self::FlushLimitExceeded { .. } | Self::MicrotaskLimitExceeded { .. }
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_error_messages() {
        let err = SettleError::not_in_harness("Put bootstrap() inside before_each, before_all or it.");
        assert!(err
            .to_string()
            .starts_with("Put bootstrap() inside before_each, before_all or it. Remember"));

        let err = SettleError::ModuleNotConfigured {
            api: "bootstrap()".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Please call configure_test_module() before bootstrap()"
        );
        assert_eq!(
            SettleError::NoFixture.to_string(),
            "Please call bootstrap() first"
        );
    }

    #[test]
    fn test_query_error_messages() {
        let err = SettleError::ElementNotFound {
            selector: ".missing".to_string(),
        };
        assert_eq!(err.to_string(), "Element not found for \".missing\"");
        let err = SettleError::DebugElementNotFound {
            query: "Greeting".to_string(),
        };
        assert_eq!(err.to_string(), "DebugElement not found for \"Greeting\"");
    }

    #[test]
    fn test_flush_limit_message() {
        let err = SettleError::FlushLimitExceeded { limit: 20 };
        assert_eq!(
            err.to_string(),
            "flush failed after reaching the limit of 20 tasks. Does your code use a polling timeout?"
        );
        assert!(err.is_runaway());
        assert!(!SettleError::NoFixture.is_runaway());
    }

    #[test]
    fn test_task_failed_message() {
        let err = SettleError::TaskFailed {
            message: "Greeting: handler 'go' for 'click' failed".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Uncaught error in task: Greeting: handler 'go' for 'click' failed"
        );
    }

    #[test]
    fn test_from_clock_error() {
        let err: SettleError = ClockError::AlreadyInstalled.into();
        assert!(matches!(err, SettleError::Clock(ClockError::AlreadyInstalled)));
    }
}
