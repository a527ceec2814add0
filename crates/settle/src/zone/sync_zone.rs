//! Sync zone used while a suite is being defined.
//!
//! Suite definitions must be synchronous. Any attempt to schedule a
//! macrotask from one is recorded as a violation and the callback is
//! dropped; microtasks are queued and run when the definition returns.

use crate::config::DEFAULT_MICROTASK_LIMIT;
use crate::result::{SettleError, SettleResult};
use crate::scheduler::{RepeatFn, Scheduler, TaskFn, TaskId, TaskKind};
use futures::future::LocalBoxFuture;
use std::cell::RefCell;
use std::collections::VecDeque;

/// Rejecting scheduler for suite definitions
pub struct SyncZone {
    suite: String,
    microtask_limit: usize,
    violations: RefCell<Vec<&'static str>>,
    microtasks: RefCell<VecDeque<TaskFn>>,
}

impl std::fmt::Debug for SyncZone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncZone")
            .field("suite", &self.suite)
            .field("violations", &self.violations.borrow())
            .field("microtasks", &self.microtasks.borrow().len())
            .finish()
    }
}

impl SyncZone {
    /// Sync zone for the named suite
    #[must_use]
    pub fn new(suite: impl Into<String>) -> Self {
        Self {
            suite: suite.into(),
            microtask_limit: DEFAULT_MICROTASK_LIMIT,
            violations: RefCell::new(Vec::new()),
            microtasks: RefCell::new(VecDeque::new()),
        }
    }

    /// Bound the microtask drain to `limit` turns
    #[must_use]
    pub fn with_microtask_limit(mut self, limit: usize) -> Self {
        self.microtask_limit = limit;
        self
    }

    /// Scheduling APIs that were rejected, in call order
    #[must_use]
    pub fn violations(&self) -> Vec<&'static str> {
        self.violations.borrow().clone()
    }

    fn reject(&self, api: &'static str) -> TaskId {
        tracing::warn!(suite = %self.suite, api, "macrotask scheduled during suite definition");
        self.violations.borrow_mut().push(api);
        TaskId::NONE
    }

    /// Run queued microtasks; returns how many ran
    ///
    /// # Errors
    ///
    /// Returns `MicrotaskLimitExceeded` if microtasks keep queueing more
    pub fn drain_microtasks(&self) -> SettleResult<usize> {
        let limit = self.microtask_limit;
        let mut ran = 0;
        loop {
            let next = self.microtasks.borrow_mut().pop_front();
            match next {
                Some(f) => {
                    if ran >= limit {
                        self.microtasks.borrow_mut().clear();
                        return Err(SettleError::MicrotaskLimitExceeded { limit });
                    }
                    f();
                    ran += 1;
                }
                None => return Ok(ran),
            }
        }
    }

    /// Run queued microtasks, then report the first violation
    ///
    /// # Errors
    ///
    /// Returns `SyncZoneViolation` if a macrotask was scheduled, or
    /// `MicrotaskLimitExceeded` for a runaway microtask chain
    pub fn finish(&self) -> SettleResult<()> {
        self.drain_microtasks()?;
        match self.violations.borrow().first() {
            Some(api) => Err(SettleError::SyncZoneViolation {
                source_api: (*api).to_string(),
                suite: self.suite.clone(),
            }),
            None => Ok(()),
        }
    }
}

impl Scheduler for SyncZone {
    fn now_ms(&self) -> u64 {
        crate::clock::VirtualClock::new().now_ms()
    }

    fn set_timeout(&self, _delay_ms: u64, _f: TaskFn) -> TaskId {
        self.reject(TaskKind::Timeout.api_name())
    }

    fn set_interval(&self, _interval_ms: u64, _f: RepeatFn) -> TaskId {
        self.reject(TaskKind::Interval.api_name())
    }

    fn request_animation_frame(&self, _f: TaskFn) -> TaskId {
        self.reject(TaskKind::AnimationFrame.api_name())
    }

    fn schedule_macrotask(&self, _delay_ms: u64, _f: TaskFn) -> TaskId {
        self.reject(TaskKind::Macrotask.api_name())
    }

    fn queue_microtask(&self, f: TaskFn) {
        self.microtasks.borrow_mut().push_back(f);
    }

    fn cancel(&self, _id: TaskId) -> bool {
        false
    }

    fn sleep(&self, _ms: u64) -> LocalBoxFuture<'static, ()> {
        self.reject("sleep");
        Box::pin(futures::future::pending())
    }

    fn spawn_detached(&self, _future: LocalBoxFuture<'static, ()>) {
        self.reject("spawn_detached");
    }
}
