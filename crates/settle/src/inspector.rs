//! Async-result inspection.
//!
//! Answers "what has this future or stream produced so far?" synchronously,
//! by spawning it on the context's zone and draining. The full variants
//! drain timers too (and render, inside an active harness); the
//! `immediate_` variants drain microtasks only, so they see what is
//! produced without any virtual time passing.

use crate::context::TestContext;
use crate::result::SettleResult;
use futures::{Stream, StreamExt};
use std::cell::RefCell;
use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::rc::Rc;

/// Settled state of a fallible future
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromiseResult<T, E> {
    /// Still running after the drain
    Pending,
    /// Finished with `Ok`
    Resolved(T),
    /// Finished with `Err`
    Rejected(E),
}

impl<T, E> PromiseResult<T, E> {
    /// Still running
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Finished with `Ok`
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }

    /// Finished with `Err`
    #[must_use]
    pub const fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

/// Everything a fallible stream produced during a drain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Emissions<T, E> {
    /// `Ok` items in order
    pub values: Vec<T>,
    /// The first `Err`, which ends the stream
    pub error: Option<E>,
    /// The stream ended without error
    pub completed: bool,
}

impl<T, E> Default for Emissions<T, E> {
    fn default() -> Self {
        Self {
            values: Vec::new(),
            error: None,
            completed: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Drain {
    Full,
    Microtasks,
}

/// Runs futures and streams through a context's zone
#[derive(Clone)]
pub struct Inspector {
    ctx: TestContext,
}

impl fmt::Debug for Inspector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inspector").field("zone", &self.ctx.zone().name()).finish()
    }
}

impl Inspector {
    /// Inspector over `ctx`
    #[must_use]
    pub fn new(ctx: &TestContext) -> Self {
        Self { ctx: ctx.clone() }
    }

    fn drain(&self, drain: Drain) -> SettleResult<()> {
        let ctx = &self.ctx;
        let zone = ctx.zone();
        match (drain, ctx.is_active()) {
            (Drain::Full, true) => ctx.flush_pending_work().map(drop),
            (Drain::Full, false) => {
                let limit = ctx.config().flush_limit;
                let clock = ctx.clock();
                zone.run(|| zone.flush(limit, true, |delta| clock.tick(delta)))
                    .map(drop)
            }
            (Drain::Microtasks, true) => ctx.flush_microtasks(),
            (Drain::Microtasks, false) => zone.run(|| zone.flush_microtasks()),
        }
    }

    fn future<F, T, E>(&self, future: F, drain: Drain) -> SettleResult<PromiseResult<T, E>>
    where
        F: Future<Output = Result<T, E>> + 'static,
        T: 'static,
        E: 'static,
    {
        let zone = self.ctx.zone();
        let handle = zone.run(|| zone.spawn(future));
        self.drain(drain)?;
        Ok(match handle.take_output() {
            Some(Ok(value)) => PromiseResult::Resolved(value),
            Some(Err(err)) => PromiseResult::Rejected(err),
            None => {
                handle.abort();
                PromiseResult::Pending
            }
        })
    }

    fn stream<S, T, E>(&self, stream: S, drain: Drain) -> SettleResult<Emissions<T, E>>
    where
        S: Stream<Item = Result<T, E>> + 'static,
        T: 'static,
        E: 'static,
    {
        let state = Rc::new(RefCell::new(Emissions::default()));
        let collector = Rc::clone(&state);
        let zone = self.ctx.zone();
        let handle = zone.run(|| {
            zone.spawn(async move {
                let mut stream = Box::pin(stream);
                while let Some(item) = stream.next().await {
                    match item {
                        Ok(value) => collector.borrow_mut().values.push(value),
                        Err(err) => {
                            collector.borrow_mut().error = Some(err);
                            return;
                        }
                    }
                }
                collector.borrow_mut().completed = true;
            })
        });
        let drained = self.drain(drain);
        // unsubscribe
        handle.abort();
        drained?;
        let emissions = std::mem::take(&mut *state.borrow_mut());
        Ok(emissions)
    }

    /// Spawn `future`, drain everything, report its state
    ///
    /// # Errors
    ///
    /// Returns error if the drain fails (runaway work)
    pub fn inspect_future<F, T, E>(&self, future: F) -> SettleResult<PromiseResult<T, E>>
    where
        F: Future<Output = Result<T, E>> + 'static,
        T: 'static,
        E: 'static,
    {
        self.future(future, Drain::Full)
    }

    /// Spawn `future`, drain microtasks only, report its state
    ///
    /// # Errors
    ///
    /// Returns error if the microtask drain runs away
    pub fn immediate_future<F, T, E>(&self, future: F) -> SettleResult<PromiseResult<T, E>>
    where
        F: Future<Output = Result<T, E>> + 'static,
        T: 'static,
        E: 'static,
    {
        self.future(future, Drain::Microtasks)
    }

    /// Subscribe to `stream`, drain everything, collect what it produced
    ///
    /// # Errors
    ///
    /// Returns error if the drain fails (runaway work)
    pub fn inspect_stream<S, T, E>(&self, stream: S) -> SettleResult<Emissions<T, E>>
    where
        S: Stream<Item = Result<T, E>> + 'static,
        T: 'static,
        E: 'static,
    {
        self.stream(stream, Drain::Full)
    }

    /// Subscribe to `stream`, drain microtasks only, collect what it produced
    ///
    /// # Errors
    ///
    /// Returns error if the microtask drain runs away
    pub fn immediate_stream<S, T, E>(&self, stream: S) -> SettleResult<Emissions<T, E>>
    where
        S: Stream<Item = Result<T, E>> + 'static,
        T: 'static,
        E: 'static,
    {
        self.stream(stream, Drain::Microtasks)
    }
}

/// Project the error channel of `stream` into values: `Ok` items are
/// dropped, the first `Err` becomes the only item, then the stream ends.
pub fn errors_as_values<S, T, E>(stream: S) -> impl Stream<Item = Result<E, Infallible>>
where
    S: Stream<Item = Result<T, E>>,
{
    stream
        .filter_map(|item| futures::future::ready(item.err()))
        .take(1)
        .map(Ok)
}
