//! Async assertion matchers.
//!
//! Matchers run a stream or future through an [`Inspector`] and compare what
//! it produced with [`Equality`]. Each returns a [`MatcherResult`]; negate it
//! for the `not` form, then turn it into an error or a panic.
//!
//! ```ignore
//! expect_stream(&ctx, service.updates()).to_emit(json!({"id": 1}))?.into_result()?;
//! expect_future(&ctx, client.get("/user")).to_be_pending()?.negate().into_result()?;
//! ```

pub mod equality;

use crate::context::TestContext;
use crate::inspector::{errors_as_values, Emissions, Inspector, PromiseResult};
use crate::result::{SettleError, SettleResult};
use equality::{extra_info, pp, DiffBuilder, Equality};
use futures::Stream;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::future::Future;

/// The async matchers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatcherKind {
    /// Exactly one value, equal to the expected one
    Emits,
    /// As `Emits`, without time passing
    EmitsImmediately,
    /// No value at all
    NeverEmitted,
    /// At least one value
    HasEmitted,
    /// Errors with the expected error
    EmitsError,
    /// As `EmitsError`, without time passing
    EmitsErrorImmediately,
    /// Exactly the expected values, in order
    EmitsSequence,
    /// As `EmitsSequence`, without time passing
    EmitsSequenceImmediately,
    /// Future finished with `Ok` of the expected value
    ResolvesWith,
    /// Future finished with `Err` of the expected value
    RejectsWith,
    /// Future finished with an error whose message matches
    RejectsWithError,
    /// Future has not finished
    IsPending,
}

impl MatcherKind {
    /// Registration name
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Emits => "emits",
            Self::EmitsImmediately => "emitsImmediately",
            Self::NeverEmitted => "neverEmitted",
            Self::HasEmitted => "hasEmitted",
            Self::EmitsError => "emitsError",
            Self::EmitsErrorImmediately => "emitsErrorImmediately",
            Self::EmitsSequence => "emitsSequence",
            Self::EmitsSequenceImmediately => "emitsSequenceImmediately",
            Self::ResolvesWith => "resolvesWith",
            Self::RejectsWith => "rejectsWith",
            Self::RejectsWithError => "rejectsWithError",
            Self::IsPending => "isPending",
        }
    }

    /// Look a matcher up by registration name
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        ASYNC_MATCHERS
            .iter()
            .find(|(registered, _)| *registered == name)
            .map(|(_, kind)| *kind)
    }
}

/// Registration table of the async matchers
pub const ASYNC_MATCHERS: [(&str, MatcherKind); 12] = [
    ("emits", MatcherKind::Emits),
    ("emitsImmediately", MatcherKind::EmitsImmediately),
    ("neverEmitted", MatcherKind::NeverEmitted),
    ("hasEmitted", MatcherKind::HasEmitted),
    ("emitsError", MatcherKind::EmitsError),
    ("emitsErrorImmediately", MatcherKind::EmitsErrorImmediately),
    ("emitsSequence", MatcherKind::EmitsSequence),
    ("emitsSequenceImmediately", MatcherKind::EmitsSequenceImmediately),
    ("resolvesWith", MatcherKind::ResolvesWith),
    ("rejectsWith", MatcherKind::RejectsWith),
    ("rejectsWithError", MatcherKind::RejectsWithError),
    ("isPending", MatcherKind::IsPending),
];

/// Verdict of a matcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatcherResult {
    /// Matcher that produced it
    pub kind: MatcherKind,
    /// Whether the expectation held
    pub pass: bool,
    /// Failure message (already phrased for the `not` form when `pass`)
    pub message: String,
}

impl MatcherResult {
    fn new(kind: MatcherKind, pass: bool, message: impl Into<String>) -> Self {
        Self {
            kind,
            pass,
            message: message.into(),
        }
    }

    /// The `not` form
    #[must_use]
    pub fn negate(mut self) -> Self {
        self.pass = !self.pass;
        self
    }

    /// `Ok` when passed, `AssertionFailed` with the message otherwise
    ///
    /// # Errors
    ///
    /// Returns `AssertionFailed` if the matcher did not pass
    pub fn into_result(self) -> SettleResult<()> {
        if self.pass {
            Ok(())
        } else {
            Err(SettleError::assertion(self.message))
        }
    }

    /// Panic with the message unless passed
    pub fn assert(self) {
        assert!(self.pass, "{}", self.message);
    }
}

/// How a rejection message is checked by `to_reject_with_error`
#[derive(Debug, Clone)]
pub enum MessageMatcher {
    /// Equal to the string
    Exact(String),
    /// Contains a match of the pattern
    Pattern(Regex),
}

impl From<&str> for MessageMatcher {
    fn from(text: &str) -> Self {
        Self::Exact(text.to_string())
    }
}

impl From<Regex> for MessageMatcher {
    fn from(pattern: Regex) -> Self {
        Self::Pattern(pattern)
    }
}

fn to_values<T: Serialize>(items: &[T]) -> SettleResult<Vec<Value>> {
    items
        .iter()
        .map(|item| serde_json::to_value(item).map_err(SettleError::from))
        .collect()
}

fn not(pass: bool) -> &'static str {
    if pass {
        "not "
    } else {
        ""
    }
}

// =============================================================================
// Streams
// =============================================================================

/// Expectation over a fallible stream
pub struct StreamExpectation<S> {
    inspector: Inspector,
    stream: S,
    equality: Equality,
}

impl<S> fmt::Debug for StreamExpectation<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamExpectation")
            .field("inspector", &self.inspector)
            .field("equality", &self.equality)
            .finish()
    }
}

/// Start an expectation on `stream`, inspected through `ctx`'s zone
pub fn expect_stream<S>(ctx: &TestContext, stream: S) -> StreamExpectation<S> {
    StreamExpectation {
        inspector: Inspector::new(ctx),
        stream,
        equality: Equality::new(),
    }
}

impl<S, T, E> StreamExpectation<S>
where
    S: Stream<Item = Result<T, E>> + 'static,
    T: Serialize + 'static,
    E: Serialize + 'static,
{
    /// Compare with a custom equality
    #[must_use]
    pub fn with_equality(mut self, equality: Equality) -> Self {
        self.equality = equality;
        self
    }

    fn awaited(self) -> SettleResult<(Vec<Value>, Equality)> {
        let emissions = self.inspector.inspect_stream(self.stream)?;
        Ok((to_values(&emissions.values)?, self.equality))
    }

    fn immediate(self) -> SettleResult<(Vec<Value>, Equality)> {
        let emissions = self.inspector.immediate_stream(self.stream)?;
        Ok((values_or_throw(&emissions)?, self.equality))
    }

    fn awaited_errors(self) -> SettleResult<(Vec<Value>, Equality)> {
        let emissions = self.inspector.inspect_stream(errors_as_values(self.stream))?;
        Ok((to_values(&emissions.values)?, self.equality))
    }

    fn immediate_errors(self) -> SettleResult<(Vec<Value>, Equality)> {
        let emissions = self.inspector.immediate_stream(errors_as_values(self.stream))?;
        Ok((to_values(&emissions.values)?, self.equality))
    }

    /// Emits exactly one value, equal to `expected`
    ///
    /// # Errors
    ///
    /// Returns error if draining or serialization fails
    pub fn to_emit(self, expected: impl Serialize) -> SettleResult<MatcherResult> {
        let expected = serde_json::to_value(expected)?;
        let (actual, equality) = self.awaited()?;
        Ok(expect_one(MatcherKind::Emits, &actual, &expected, "value", &equality))
    }

    /// Emits exactly one value equal to `expected` before any time passes
    ///
    /// # Errors
    ///
    /// Returns `AssertionFailed` if the stream errors, or a drain error
    pub fn to_emit_immediately(self, expected: impl Serialize) -> SettleResult<MatcherResult> {
        let expected = serde_json::to_value(expected)?;
        let (actual, equality) = self.immediate()?;
        Ok(expect_one(MatcherKind::EmitsImmediately, &actual, &expected, "value", &equality))
    }

    /// Emits nothing
    ///
    /// # Errors
    ///
    /// Returns error if draining or serialization fails
    pub fn to_have_never_emitted(self) -> SettleResult<MatcherResult> {
        let (actual, _) = self.awaited()?;
        let len = actual.len();
        Ok(if len == 0 {
            MatcherResult::new(
                MatcherKind::NeverEmitted,
                true,
                "Expected observable to emit at least one value",
            )
        } else {
            MatcherResult::new(
                MatcherKind::NeverEmitted,
                false,
                format!(
                    "Expected observable not to emit value, but got {len} {} instead: \"{}\"",
                    if len == 1 { "value" } else { "values" },
                    pp(&Value::Array(actual))
                ),
            )
        })
    }

    /// Emits at least one value
    ///
    /// # Errors
    ///
    /// Returns error if draining or serialization fails
    pub fn to_have_emitted(self) -> SettleResult<MatcherResult> {
        let (actual, _) = self.awaited()?;
        Ok(if actual.is_empty() {
            MatcherResult::new(
                MatcherKind::HasEmitted,
                false,
                "Expected observable to emit at least one value, but got none.",
            )
        } else {
            MatcherResult::new(
                MatcherKind::HasEmitted,
                true,
                "Expected observable to emit at least one value",
            )
        })
    }

    /// Errors with `expected`; values are ignored
    ///
    /// # Errors
    ///
    /// Returns error if draining or serialization fails
    pub fn to_emit_error(self, expected: impl Serialize) -> SettleResult<MatcherResult> {
        let expected = serde_json::to_value(expected)?;
        let (actual, equality) = self.awaited_errors()?;
        Ok(expect_one(MatcherKind::EmitsError, &actual, &expected, "error", &equality))
    }

    /// Errors with `expected` before any time passes
    ///
    /// # Errors
    ///
    /// Returns error if draining or serialization fails
    pub fn to_emit_error_immediately(self, expected: impl Serialize) -> SettleResult<MatcherResult> {
        let expected = serde_json::to_value(expected)?;
        let (actual, equality) = self.immediate_errors()?;
        Ok(expect_one(MatcherKind::EmitsErrorImmediately, &actual, &expected, "error", &equality))
    }

    /// Emits exactly `expected`, in order
    ///
    /// # Errors
    ///
    /// Returns error if draining or serialization fails
    pub fn to_emit_sequence<V: Serialize>(self, expected: &[V]) -> SettleResult<MatcherResult> {
        let expected = to_values(expected)?;
        let (actual, equality) = self.awaited()?;
        Ok(expect_all(MatcherKind::EmitsSequence, actual, expected, &equality))
    }

    /// Emits exactly `expected`, in order, before any time passes
    ///
    /// # Errors
    ///
    /// Returns `AssertionFailed` if the stream errors, or a drain error
    pub fn to_emit_sequence_immediately<V: Serialize>(self, expected: &[V]) -> SettleResult<MatcherResult> {
        let expected = to_values(expected)?;
        let (actual, equality) = self.immediate()?;
        Ok(expect_all(MatcherKind::EmitsSequenceImmediately, actual, expected, &equality))
    }
}

fn values_or_throw<T: Serialize, E: Serialize>(emissions: &Emissions<T, E>) -> SettleResult<Vec<Value>> {
    if let Some(err) = &emissions.error {
        let cause = equality::pretty(&serde_json::to_value(err)?);
        return Err(SettleError::assertion(format!(
            "Expected not to throw error but did! Cause: {cause}"
        )));
    }
    to_values(&emissions.values)
}

fn expect_one(kind: MatcherKind, actual: &[Value], expected: &Value, noun: &str, equality: &Equality) -> MatcherResult {
    if actual.len() != 1 {
        return MatcherResult::new(
            kind,
            false,
            format!(
                "Expected observable to emit one {noun}, but got {} values instead: \"{}\"",
                actual.len(),
                pp(&Value::Array(actual.to_vec()))
            ),
        );
    }
    let value = &actual[0];
    let mut diff = DiffBuilder::new();
    let pass = equality.equals(value, expected, &mut diff);
    MatcherResult::new(
        kind,
        pass,
        format!(
            "Expected {}to emit {noun}: {} but emitted: {}{}\n",
            not(pass),
            pp(expected),
            pp(value),
            extra_info(&diff, value, expected)
        ),
    )
}

fn expect_all(kind: MatcherKind, actual: Vec<Value>, expected: Vec<Value>, equality: &Equality) -> MatcherResult {
    let actual = Value::Array(actual);
    let expected = Value::Array(expected);
    let mut diff = DiffBuilder::new();
    let pass = equality.equals(&actual, &expected, &mut diff);
    MatcherResult::new(
        kind,
        pass,
        format!(
            "Expected {}to emit values: {} but emitted: {}{}",
            not(pass),
            pp(&expected),
            pp(&actual),
            extra_info(&diff, &actual, &expected)
        ),
    )
}

// =============================================================================
// Futures
// =============================================================================

/// Expectation over a fallible future
pub struct FutureExpectation<F> {
    inspector: Inspector,
    future: F,
    equality: Equality,
}

impl<F> fmt::Debug for FutureExpectation<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FutureExpectation")
            .field("inspector", &self.inspector)
            .field("equality", &self.equality)
            .finish()
    }
}

/// Start an expectation on `future`, inspected through `ctx`'s zone
pub fn expect_future<F>(ctx: &TestContext, future: F) -> FutureExpectation<F> {
    FutureExpectation {
        inspector: Inspector::new(ctx),
        future,
        equality: Equality::new(),
    }
}

fn rendered<V: Serialize>(value: &V) -> SettleResult<String> {
    Ok(pp(&serde_json::to_value(value)?))
}

impl<F> FutureExpectation<F> {
    /// Compare with a custom equality
    #[must_use]
    pub fn with_equality(mut self, equality: Equality) -> Self {
        self.equality = equality;
        self
    }

    /// Resolves with `expected`
    ///
    /// # Errors
    ///
    /// Returns error if draining or serialization fails
    pub fn to_resolve_with<T, E>(self, expected: impl Serialize) -> SettleResult<MatcherResult>
    where
        F: Future<Output = Result<T, E>> + 'static,
        T: Serialize + 'static,
        E: Serialize + 'static,
    {
        let kind = MatcherKind::ResolvesWith;
        let expected = serde_json::to_value(expected)?;
        Ok(match self.inspector.inspect_future(self.future)? {
            PromiseResult::Pending => {
                MatcherResult::new(kind, false, "Expected promise to resolve, but it is still pending.")
            }
            PromiseResult::Rejected(err) => MatcherResult::new(
                kind,
                false,
                format!("Expected promise to resolve, but it rejected with: {}", rendered(&err)?),
            ),
            PromiseResult::Resolved(value) => {
                let value = serde_json::to_value(value)?;
                let mut diff = DiffBuilder::new();
                let pass = self.equality.equals(&value, &expected, &mut diff);
                MatcherResult::new(
                    kind,
                    pass,
                    format!(
                        "Expected {}to resolve with: {} but resolved with: {}{}",
                        not(pass),
                        pp(&expected),
                        pp(&value),
                        extra_info(&diff, &value, &expected)
                    ),
                )
            }
        })
    }

    /// Rejects with `expected`
    ///
    /// # Errors
    ///
    /// Returns error if draining or serialization fails
    pub fn to_reject_with<T, E>(self, expected: impl Serialize) -> SettleResult<MatcherResult>
    where
        F: Future<Output = Result<T, E>> + 'static,
        T: Serialize + 'static,
        E: Serialize + 'static,
    {
        let kind = MatcherKind::RejectsWith;
        let expected = serde_json::to_value(expected)?;
        Ok(match self.inspector.inspect_future(self.future)? {
            PromiseResult::Pending => {
                MatcherResult::new(kind, false, "Expected promise to reject, but it is still pending.")
            }
            PromiseResult::Resolved(value) => MatcherResult::new(
                kind,
                false,
                format!("Expected promise to reject, but it resolved with: {}", rendered(&value)?),
            ),
            PromiseResult::Rejected(err) => {
                let err = serde_json::to_value(err)?;
                let mut diff = DiffBuilder::new();
                let pass = self.equality.equals(&err, &expected, &mut diff);
                MatcherResult::new(
                    kind,
                    pass,
                    format!(
                        "Expected {}to reject with: {} but rejected with: {}{}",
                        not(pass),
                        pp(&expected),
                        pp(&err),
                        extra_info(&diff, &err, &expected)
                    ),
                )
            }
        })
    }

    /// Rejects with an error; when given, its message must equal the string
    /// or contain a match of the pattern
    ///
    /// # Errors
    ///
    /// Returns error if draining or serialization fails
    pub fn to_reject_with_error<T, E>(self, expected: Option<MessageMatcher>) -> SettleResult<MatcherResult>
    where
        F: Future<Output = Result<T, E>> + 'static,
        T: Serialize + 'static,
        E: std::error::Error + 'static,
    {
        let kind = MatcherKind::RejectsWithError;
        let err = match self.inspector.inspect_future(self.future)? {
            PromiseResult::Pending => {
                return Ok(MatcherResult::new(
                    kind,
                    false,
                    "Expected promise to reject, but it is still pending.",
                ))
            }
            PromiseResult::Resolved(value) => {
                return Ok(MatcherResult::new(
                    kind,
                    false,
                    format!("Expected promise to reject, but it resolved with: {}", rendered(&value)?),
                ))
            }
            PromiseResult::Rejected(err) => err,
        };
        let message = err.to_string();
        let rejected = pp(&Value::String(message.clone()));
        Ok(match expected {
            None => MatcherResult::new(kind, true, ""),
            Some(MessageMatcher::Exact(text)) => {
                let pass = message == text;
                MatcherResult::new(
                    kind,
                    pass,
                    format!(
                        "Expected {}to reject with an Error that has the message: {} but rejected with: {rejected}",
                        not(pass),
                        pp(&Value::String(text))
                    ),
                )
            }
            Some(MessageMatcher::Pattern(pattern)) => {
                let pass = pattern.is_match(&message);
                MatcherResult::new(
                    kind,
                    pass,
                    format!(
                        "Expected {}to reject with an Error that has the message that matches the RegExp: \n\n/{}/\n\n but rejected with: {rejected}",
                        not(pass),
                        pattern.as_str()
                    ),
                )
            }
        })
    }

    /// Has not settled after the drain
    ///
    /// # Errors
    ///
    /// Returns error if draining or serialization fails
    pub fn to_be_pending<T, E>(self) -> SettleResult<MatcherResult>
    where
        F: Future<Output = Result<T, E>> + 'static,
        T: Serialize + 'static,
        E: Serialize + 'static,
    {
        let kind = MatcherKind::IsPending;
        Ok(match self.inspector.inspect_future(self.future)? {
            PromiseResult::Pending => MatcherResult::new(kind, true, "Expected to be pending"),
            PromiseResult::Resolved(value) => MatcherResult::new(
                kind,
                false,
                format!("Expected promise to be pending, but it resolved with: {}", rendered(&value)?),
            ),
            PromiseResult::Rejected(err) => MatcherResult::new(
                kind,
                false,
                format!("Expected promise to be pending, but it rejected with: {}", rendered(&err)?),
            ),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::scheduler::Scheduler;
    use futures::{stream, StreamExt};
    use serde_json::json;

    type Items = Vec<Result<i32, String>>;

    fn values(items: Items) -> impl Stream<Item = Result<i32, String>> {
        stream::iter(items)
    }

    #[derive(Debug)]
    struct Failure(&'static str);

    impl fmt::Display for Failure {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.0)
        }
    }

    impl std::error::Error for Failure {}

    // =========================================================================
    // Registration
    // =========================================================================

    mod registration_tests {
        use super::*;

        #[test]
        fn test_table_matches_names() {
            for (name, kind) in ASYNC_MATCHERS {
                assert_eq!(kind.name(), name);
                assert_eq!(MatcherKind::from_name(name), Some(kind));
            }
            assert_eq!(MatcherKind::from_name("toEqual"), None);
        }

        #[test]
        fn test_negate_and_result() {
            let result = MatcherResult::new(MatcherKind::Emits, true, "Expected not to emit value");
            assert!(result.clone().into_result().is_ok());
            let err = result.negate().into_result().unwrap_err();
            assert_eq!(err.to_string(), "Assertion failed: Expected not to emit value");
        }
    }

    // =========================================================================
    // Stream matchers
    // =========================================================================

    mod stream_tests {
        use super::*;

        #[test]
        fn test_emit_one_value() {
            let ctx = TestContext::new();
            let result = expect_stream(&ctx, values(vec![Ok(5)])).to_emit(5).unwrap();
            assert!(result.pass);
            assert_eq!(
                result.message,
                "Expected not to emit value: \n\n5\n\n but emitted: \n\n5\n\n\n"
            );
        }

        #[test]
        fn test_emit_counts_have_distinct_messages() {
            let ctx = TestContext::new();
            let none = expect_stream(&ctx, values(vec![])).to_emit(5).unwrap();
            let two = expect_stream(&ctx, values(vec![Ok(5), Ok(6)])).to_emit(5).unwrap();
            assert!(!none.pass);
            assert!(!two.pass);
            assert_eq!(
                none.message,
                "Expected observable to emit one value, but got 0 values instead: \"\n\n[  ]\n\n\""
            );
            assert_eq!(
                two.message,
                "Expected observable to emit one value, but got 2 values instead: \"\n\n[ 5, 6 ]\n\n\""
            );
        }

        #[test]
        fn test_immediately_fails_for_delayed() {
            let ctx = TestContext::new();
            let delayed = |ctx: &TestContext| {
                let sleep = ctx.scheduler().sleep(100);
                stream::once(async move {
                    sleep.await;
                    Ok::<_, String>(1)
                })
            };
            assert!(!expect_stream(&ctx, delayed(&ctx)).to_emit_immediately(1).unwrap().pass);
            assert!(expect_stream(&ctx, delayed(&ctx)).to_emit(1).unwrap().pass);
        }

        #[test]
        fn test_immediately_rejects_errors() {
            let ctx = TestContext::new();
            let err = expect_stream(&ctx, values(vec![Err("boom".into())]))
                .to_emit_immediately(1)
                .unwrap_err();
            assert_eq!(
                err.to_string(),
                "Assertion failed: Expected not to throw error but did! Cause: 'boom'"
            );
        }

        #[test]
        fn test_never_and_has_emitted() {
            let ctx = TestContext::new();
            let never = expect_stream(&ctx, values(vec![Ok(1)])).to_have_never_emitted().unwrap();
            assert!(!never.pass);
            assert_eq!(
                never.message,
                "Expected observable not to emit value, but got 1 value instead: \"\n\n[ 1 ]\n\n\""
            );
            let has = expect_stream(&ctx, values(vec![])).to_have_emitted().unwrap();
            assert_eq!(has.message, "Expected observable to emit at least one value, but got none.");
        }

        #[test]
        fn test_emit_error_ignores_values() {
            let ctx = TestContext::new();
            let result = expect_stream(&ctx, values(vec![Ok(1), Err("bad".into())]))
                .to_emit_error("bad")
                .unwrap();
            assert!(result.pass);
            let result = expect_stream(&ctx, values(vec![Ok(1), Err("bad".into())]))
                .to_emit_error_immediately("bad")
                .unwrap();
            assert!(result.pass);
        }

        #[test]
        fn test_sequence_with_diff() {
            let ctx = TestContext::new();
            let result = expect_stream(&ctx, values(vec![Ok(1), Ok(3)]))
                .to_emit_sequence(&[1, 2])
                .unwrap();
            assert!(!result.pass);
            assert!(result.message.starts_with("Expected to emit values: \n\n[ 1, 2 ]\n\n but emitted: \n\n[ 1, 3 ]\n\n"));
            assert!(result.message.ends_with("Expected $[1] = 3 to equal 2."));
        }

        #[test]
        fn test_sequence_immediately_from_iter() {
            let ctx = TestContext::new();
            let sequence = stream::iter(1..=3).map(Ok::<i32, String>);
            assert!(expect_stream(&ctx, sequence)
                .to_emit_sequence_immediately(&[1, 2, 3])
                .unwrap()
                .pass);
        }

        #[test]
        fn test_custom_equality() {
            let ctx = TestContext::new();
            let close = Equality::new().with_tester(|a, e| match (a.as_i64(), e.as_i64()) {
                (Some(a), Some(e)) => Some((a - e).abs() <= 1),
                _ => None,
            });
            let result = expect_stream(&ctx, values(vec![Ok(10)]))
                .with_equality(close)
                .to_emit(json!(11))
                .unwrap();
            assert!(result.pass);
        }
    }

    // =========================================================================
    // Future matchers
    // =========================================================================

    mod future_tests {
        use super::*;

        #[test]
        fn test_resolve_with() {
            let ctx = TestContext::new();
            let result = expect_future(&ctx, async { Ok::<_, String>(json!({"a": 1})) })
                .to_resolve_with(json!({"a": 2}))
                .unwrap();
            assert!(!result.pass);
            assert!(result.message.contains("Expected $.a = 1 to equal 2."));

            let pending = expect_future(&ctx, futures::future::pending::<Result<i32, String>>())
                .to_resolve_with(1)
                .unwrap();
            assert_eq!(pending.message, "Expected promise to resolve, but it is still pending.");
        }

        #[test]
        fn test_reject_with() {
            let ctx = TestContext::new();
            let result = expect_future(&ctx, async { Err::<i32, _>("nope".to_string()) })
                .to_reject_with("nope")
                .unwrap();
            assert!(result.pass);
            let resolved = expect_future(&ctx, async { Ok::<i32, String>(4) })
                .to_reject_with("nope")
                .unwrap();
            assert_eq!(resolved.message, "Expected promise to reject, but it resolved with: \n\n4\n\n");
        }

        #[test]
        fn test_reject_with_error_message() {
            let ctx = TestContext::new();
            let failing = || async { Err::<i32, _>(Failure("disk full")) };
            assert!(expect_future(&ctx, failing()).to_reject_with_error(None).unwrap().pass);
            assert!(expect_future(&ctx, failing())
                .to_reject_with_error(Some("disk full".into()))
                .unwrap()
                .pass);
            let pattern = Regex::new("^disk").unwrap();
            assert!(expect_future(&ctx, failing())
                .to_reject_with_error(Some(pattern.into()))
                .unwrap()
                .pass);
            let wrong = expect_future(&ctx, failing())
                .to_reject_with_error(Some("cpu hot".into()))
                .unwrap();
            assert_eq!(
                wrong.message,
                "Expected to reject with an Error that has the message: \n\n'cpu hot'\n\n but rejected with: \n\n'disk full'\n\n"
            );
        }

        #[test]
        fn test_be_pending() {
            let ctx = TestContext::new();
            let pending = expect_future(&ctx, futures::future::pending::<Result<i32, String>>())
                .to_be_pending()
                .unwrap();
            assert!(pending.pass);
            let sleep = ctx.scheduler().sleep(1_000);
            let done = expect_future(&ctx, async move {
                sleep.await;
                Ok::<_, String>("late")
            })
            .to_be_pending()
            .unwrap();
            assert_eq!(done.message, "Expected promise to be pending, but it resolved with: \n\n'late'\n\n");
        }
    }
}
