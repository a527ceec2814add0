//! Scheduler Abstraction
//!
//! Code under test never talks to a timer API directly. It receives an
//! `Rc<dyn Scheduler>` and schedules through it. Inside a spec the handle is
//! the fake-async zone (virtual time); under `it_async` it is a
//! [`RealScheduler`] on tokio; while a suite is being defined it is the
//! rejecting sync zone.

use futures::future::LocalBoxFuture;
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Identifier of a scheduled task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl TaskId {
    /// Id returned when nothing was scheduled
    pub const NONE: Self = Self(0);
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Kind of scheduled work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    /// One-shot timer
    Timeout,
    /// Periodic timer
    Interval,
    /// Animation frame callback
    AnimationFrame,
    /// Microtask or future wake-up
    Microtask,
    /// DOM event listener invocation
    Event,
    /// Other one-shot macrotask (e.g. a mocked I/O completion)
    Macrotask,
}

impl TaskKind {
    /// Whether the task reschedules itself after firing
    #[must_use]
    pub const fn is_periodic(&self) -> bool {
        matches!(self, Self::Interval)
    }

    /// Name of the scheduling API that produces this kind
    #[must_use]
    pub const fn api_name(&self) -> &'static str {
        match self {
            Self::Timeout => "set_timeout",
            Self::Interval => "set_interval",
            Self::AnimationFrame => "request_animation_frame",
            Self::Microtask => "queue_microtask",
            Self::Event => "add_event_listener",
            Self::Macrotask => "schedule_macrotask",
        }
    }
}

/// Who scheduled a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskOrigin {
    /// Test code
    Root,
    /// Framework code (components, services, template listeners)
    Platform,
}

/// One-shot callback
pub type TaskFn = Box<dyn FnOnce()>;
/// Periodic callback
pub type RepeatFn = Box<dyn FnMut()>;

/// Scheduling primitives available to code under test.
///
/// Scheduling never fails. A handle that cannot run work (the sync zone)
/// records the attempt instead and returns [`TaskId::NONE`].
pub trait Scheduler {
    /// Current wall-clock time in milliseconds since Unix epoch
    fn now_ms(&self) -> u64;

    /// Run `f` once after `delay_ms`
    fn set_timeout(&self, delay_ms: u64, f: TaskFn) -> TaskId;

    /// Run `f` every `interval_ms` until cancelled
    fn set_interval(&self, interval_ms: u64, f: RepeatFn) -> TaskId;

    /// Run `f` before the next frame
    fn request_animation_frame(&self, f: TaskFn) -> TaskId;

    /// Run `f` once after `delay_ms` as a generic macrotask
    fn schedule_macrotask(&self, delay_ms: u64, f: TaskFn) -> TaskId {
        self.set_timeout(delay_ms, f)
    }

    /// Run `f` after the current task, before any timer
    fn queue_microtask(&self, f: TaskFn);

    /// Cancel a pending task; returns whether it was pending
    fn cancel(&self, id: TaskId) -> bool;

    /// Future completing after `ms`
    fn sleep(&self, ms: u64) -> LocalBoxFuture<'static, ()>;

    /// Drive a future to completion in the background
    fn spawn_detached(&self, future: LocalBoxFuture<'static, ()>);
}

impl fmt::Debug for dyn Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("now_ms", &self.now_ms())
            .finish()
    }
}

/// Scheduler backed by real tokio timers.
///
/// Every method spawns onto the current `tokio::task::LocalSet`, so it must
/// be used from inside one (the `it_async` runner provides it).
#[derive(Debug, Clone, Default)]
pub struct RealScheduler {
    inner: Rc<RealInner>,
}

#[derive(Debug, Default)]
struct RealInner {
    next_id: Cell<u64>,
    handles: RefCell<HashMap<u64, tokio::task::JoinHandle<()>>>,
}

impl RealInner {
    fn next_id(&self) -> u64 {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        id
    }
}

impl RealScheduler {
    /// Create a new real scheduler
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of timers that have not fired or been cancelled
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner
            .handles
            .borrow()
            .values()
            .filter(|h| !h.is_finished())
            .count()
    }

    fn track(&self, id: u64, handle: tokio::task::JoinHandle<()>) -> TaskId {
        self.inner.handles.borrow_mut().insert(id, handle);
        TaskId(id)
    }
}

impl Scheduler for RealScheduler {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    fn set_timeout(&self, delay_ms: u64, f: TaskFn) -> TaskId {
        let id = self.inner.next_id();
        let inner = Rc::downgrade(&self.inner);
        let handle = tokio::task::spawn_local(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            if let Some(inner) = inner.upgrade() {
                inner.handles.borrow_mut().remove(&id);
            }
            f();
        });
        self.track(id, handle)
    }

    fn set_interval(&self, interval_ms: u64, mut f: RepeatFn) -> TaskId {
        let id = self.inner.next_id();
        let period = Duration::from_millis(interval_ms.max(1));
        let handle = tokio::task::spawn_local(async move {
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                interval.tick().await;
                f();
            }
        });
        self.track(id, handle)
    }

    fn request_animation_frame(&self, f: TaskFn) -> TaskId {
        self.set_timeout(crate::config::DEFAULT_ANIMATION_FRAME_MS, f)
    }

    fn queue_microtask(&self, f: TaskFn) {
        drop(tokio::task::spawn_local(async move { f() }));
    }

    fn cancel(&self, id: TaskId) -> bool {
        let handle = self.inner.handles.borrow_mut().remove(&id.0);
        match handle {
            Some(handle) => {
                let pending = !handle.is_finished();
                handle.abort();
                pending
            }
            None => false,
        }
    }

    fn sleep(&self, ms: u64) -> LocalBoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(Duration::from_millis(ms)))
    }

    fn spawn_detached(&self, future: LocalBoxFuture<'static, ()>) {
        drop(tokio::task::spawn_local(future));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn run_local<F: std::future::Future<Output = ()>>(f: F) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let local = tokio::task::LocalSet::new();
        local.block_on(&rt, f);
    }

    #[test]
    fn test_task_kind_periodic() {
        assert!(TaskKind::Interval.is_periodic());
        assert!(!TaskKind::Timeout.is_periodic());
        assert!(!TaskKind::AnimationFrame.is_periodic());
        assert_eq!(TaskKind::Interval.api_name(), "set_interval");
    }

    #[test]
    fn test_task_id_display() {
        assert_eq!(TaskId(7).to_string(), "task#7");
        assert_eq!(TaskId::NONE, TaskId(0));
    }

    #[test]
    fn test_real_timeout_fires() {
        run_local(async {
            let scheduler = RealScheduler::new();
            let fired = Rc::new(Cell::new(false));
            let flag = fired.clone();
            scheduler.set_timeout(5, Box::new(move || flag.set(true)));
            assert_eq!(scheduler.pending(), 1);
            scheduler.sleep(30).await;
            assert!(fired.get());
            assert_eq!(scheduler.pending(), 0);
        });
    }

    #[test]
    fn test_real_cancel() {
        run_local(async {
            let scheduler = RealScheduler::new();
            let fired = Rc::new(Cell::new(false));
            let flag = fired.clone();
            let id = scheduler.set_timeout(5, Box::new(move || flag.set(true)));
            assert!(scheduler.cancel(id));
            assert!(!scheduler.cancel(id));
            scheduler.sleep(20).await;
            assert!(!fired.get());
        });
    }

    #[test]
    fn test_real_interval_and_microtask() {
        run_local(async {
            let scheduler = RealScheduler::new();
            let count = Rc::new(Cell::new(0));
            let c = count.clone();
            let id = scheduler.set_interval(5, Box::new(move || c.set(c.get() + 1)));
            let micro = Rc::new(Cell::new(false));
            let m = micro.clone();
            scheduler.queue_microtask(Box::new(move || m.set(true)));
            scheduler.sleep(40).await;
            scheduler.cancel(id);
            assert!(count.get() >= 2);
            assert!(micro.get());
        });
    }
}
