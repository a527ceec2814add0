//! Fake-Async Zone
//!
//! A controlled execution context that captures every timer, animation
//! frame, microtask and spawned future scheduled through it, and runs them
//! only when the test asks: `tick` advances virtual time through pending
//! timers, `flush` drains them, `flush_microtasks` runs only the microtask
//! queue.
//!
//! ## Ordering
//!
//! - Timers fire in non-decreasing due order; ties fire in schedule order.
//! - Microtasks (and woken futures) are drained before the first timer of a
//!   tick and after every timer.
//! - Zone time moves to exactly the due time of each fired timer, and each
//!   advance is reported to the caller's `on_tick` observer.

mod executor;
pub mod sync_zone;

pub use executor::TaskHandle;
pub use sync_zone::SyncZone;

use crate::clock::Clock;
use crate::config::SettleConfig;
use crate::result::{SettleError, SettleResult};
use crate::scheduler::{RepeatFn, Scheduler, TaskFn, TaskId, TaskKind, TaskOrigin};
use executor::Executor;
use futures::future::LocalBoxFuture;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll, Waker};

/// Numeric bounds of a zone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneLimits {
    /// Maximum turns of a single microtask drain
    pub microtask_limit: usize,
    /// Delay of animation frame callbacks
    pub animation_frame_ms: u64,
}

impl Default for ZoneLimits {
    fn default() -> Self {
        Self::from(&SettleConfig::default())
    }
}

impl From<&SettleConfig> for ZoneLimits {
    fn from(config: &SettleConfig) -> Self {
        Self {
            microtask_limit: config.microtask_limit,
            animation_frame_ms: config.animation_frame_ms,
        }
    }
}

/// Notified after the zone runs a timer, an event task, or a microtask drain
/// that included framework work.
///
/// The fixture uses this to stabilize after framework-originated tasks. The
/// zone holds no borrows while calling it, so observers may call back into
/// the zone.
pub trait TaskObserver {
    /// Called once the task and the microtasks it queued have run
    fn after_task(&self, zone: &FakeAsyncZone, kind: TaskKind, origin: TaskOrigin);
}

enum Callback {
    Once(TaskFn),
    Repeat(RepeatFn),
}

struct TimerEntry {
    id: u64,
    kind: TaskKind,
    origin: TaskOrigin,
    interval: u64,
    swept: bool,
    callback: Callback,
}

struct Microtask {
    origin: TaskOrigin,
    f: TaskFn,
}

/// Snapshot of a pending timer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTimer {
    /// Task id
    pub id: TaskId,
    /// Task kind
    pub kind: TaskKind,
    /// Who scheduled it
    pub origin: TaskOrigin,
    /// Due time, zone-relative milliseconds
    pub due_ms: u64,
    /// Interval of a periodic timer
    pub interval_ms: Option<u64>,
}

type TimerKey = (u64, u64);

struct ZoneInner {
    name: String,
    limits: ZoneLimits,
    clock: Option<Clock>,
    now: Cell<u64>,
    active: Cell<bool>,
    next_id: Cell<u64>,
    next_seq: Cell<u64>,
    timers: RefCell<BTreeMap<TimerKey, TimerEntry>>,
    index: RefCell<HashMap<u64, TimerKey>>,
    // (task id, cancelled while its callback ran)
    firing: RefCell<Vec<(u64, bool)>>,
    microtasks: RefCell<VecDeque<Microtask>>,
    executor: Rc<Executor>,
    observer: RefCell<Option<Rc<dyn TaskObserver>>>,
}

/// The fake-async zone. Cloning shares the same zone.
#[derive(Clone)]
pub struct FakeAsyncZone {
    inner: Rc<ZoneInner>,
}

impl std::fmt::Debug for FakeAsyncZone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeAsyncZone")
            .field("name", &self.inner.name)
            .field("now", &self.inner.now.get())
            .field("active", &self.inner.active.get())
            .field("timers", &self.inner.timers.borrow().len())
            .field("microtasks", &self.inner.microtasks.borrow().len())
            .field("executor", &self.inner.executor)
            .finish()
    }
}

/// Clears the active flag when a `run` scope ends, including by panic
struct ActiveGuard<'a>(&'a Cell<bool>);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl FakeAsyncZone {
    /// Create a zone with default limits and no clock attached
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_options(name, ZoneLimits::default(), None)
    }

    /// Create a zone with explicit limits; `clock` backs `Scheduler::now_ms`
    #[must_use]
    pub fn with_options(name: impl Into<String>, limits: ZoneLimits, clock: Option<Clock>) -> Self {
        Self {
            inner: Rc::new(ZoneInner {
                name: name.into(),
                limits,
                clock,
                now: Cell::new(0),
                active: Cell::new(false),
                next_id: Cell::new(0),
                next_seq: Cell::new(0),
                timers: RefCell::new(BTreeMap::new()),
                index: RefCell::new(HashMap::new()),
                firing: RefCell::new(Vec::new()),
                microtasks: RefCell::new(VecDeque::new()),
                executor: Rc::new(Executor::default()),
                observer: RefCell::new(None),
            }),
        }
    }

    /// Zone name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Zone-relative time in milliseconds
    #[must_use]
    pub fn now(&self) -> u64 {
        self.inner.now.get()
    }

    /// Whether a `run` scope is open
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.active.get()
    }

    /// Scheduler handle whose tasks are tagged as framework work
    #[must_use]
    pub fn platform(&self) -> PlatformScheduler {
        PlatformScheduler {
            zone: Rc::downgrade(&self.inner),
        }
    }

    /// Install or remove the task observer
    pub fn set_observer(&self, observer: Option<Rc<dyn TaskObserver>>) {
        *self.inner.observer.borrow_mut() = observer;
    }

    /// Run `f` with the zone active. Nested calls run `f` directly.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        if self.inner.active.get() {
            return f();
        }
        self.inner.active.set(true);
        let _guard = ActiveGuard(&self.inner.active);
        f()
    }

    fn ensure_active(&self, operation: &str) -> SettleResult<()> {
        if self.inner.active.get() {
            Ok(())
        } else {
            Err(SettleError::ZoneInactive {
                operation: operation.to_string(),
            })
        }
    }

    // =========================================================================
    // Scheduling
    // =========================================================================

    fn next_seq(&self) -> u64 {
        let seq = self.inner.next_seq.get() + 1;
        self.inner.next_seq.set(seq);
        seq
    }

    fn insert_timer(&self, due: u64, entry: TimerEntry) {
        let key = (due, self.next_seq());
        self.inner.index.borrow_mut().insert(entry.id, key);
        self.inner.timers.borrow_mut().insert(key, entry);
    }

    fn schedule_timer(
        &self,
        kind: TaskKind,
        origin: TaskOrigin,
        delay_ms: u64,
        callback: Callback,
    ) -> TaskId {
        let id = self.inner.next_id.get() + 1;
        self.inner.next_id.set(id);
        let due = self.now().saturating_add(delay_ms);
        tracing::trace!(zone = %self.inner.name, id, ?kind, ?origin, due, "schedule");
        self.insert_timer(
            due,
            TimerEntry {
                id,
                kind,
                origin,
                interval: delay_ms.max(1),
                swept: false,
                callback,
            },
        );
        TaskId(id)
    }

    fn queue_microtask_from(&self, origin: TaskOrigin, f: TaskFn) {
        self.inner
            .microtasks
            .borrow_mut()
            .push_back(Microtask { origin, f });
    }

    fn cancel_task(&self, id: TaskId) -> bool {
        let key = self.inner.index.borrow_mut().remove(&id.0);
        if let Some(key) = key {
            let entry = self.inner.timers.borrow_mut().remove(&key);
            drop(entry);
            return true;
        }
        let mut firing = self.inner.firing.borrow_mut();
        match firing.iter_mut().find(|(fid, _)| *fid == id.0) {
            Some(frame) if !frame.1 => {
                frame.1 = true;
                true
            }
            _ => false,
        }
    }

    fn sleep_future(&self, origin: TaskOrigin, ms: u64) -> Sleep {
        let state = Rc::new(SleepState::default());
        let fire_state = Rc::clone(&state);
        let timer = self.schedule_timer(
            TaskKind::Timeout,
            origin,
            ms,
            Callback::Once(Box::new(move || fire_state.fire())),
        );
        Sleep {
            state,
            zone: Rc::downgrade(&self.inner),
            timer,
        }
    }

    /// Spawn a future owned by test code; it is polled once immediately
    pub fn spawn<F>(&self, future: F) -> TaskHandle<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        self.spawn_with_origin(TaskOrigin::Root, future)
    }

    fn spawn_with_origin<F>(&self, origin: TaskOrigin, future: F) -> TaskHandle<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        let (wrapped, mut handle) = TaskHandle::wrap(future);
        let id = self.inner.executor.insert(origin, wrapped);
        handle.id = id;
        handle.executor = Rc::downgrade(&self.inner.executor);
        self.inner.executor.poll(id);
        handle
    }

    /// Run an event listener as an event task of the given origin
    pub fn invoke_event_task(&self, origin: TaskOrigin, f: impl FnOnce()) {
        f();
        self.notify(TaskKind::Event, origin);
    }

    fn notify(&self, kind: TaskKind, origin: TaskOrigin) {
        let observer = self.inner.observer.borrow().clone();
        if let Some(observer) = observer {
            observer.after_task(self, kind, origin);
        }
    }

    // =========================================================================
    // Draining
    // =========================================================================

    /// Run queued microtasks and woken futures until both queues are empty
    ///
    /// # Errors
    ///
    /// Returns error if the zone is not active or the drain exceeds its bound
    pub fn flush_microtasks(&self) -> SettleResult<()> {
        self.ensure_active("flush_microtasks")?;
        self.drain_microtasks()
    }

    fn drain_microtasks(&self) -> SettleResult<()> {
        let limit = self.inner.limits.microtask_limit;
        let mut turns = 0usize;
        let mut platform_work = false;
        loop {
            let next = self.inner.microtasks.borrow_mut().pop_front();
            let origin = if let Some(task) = next {
                turns += 1;
                if turns > limit {
                    return Err(SettleError::MicrotaskLimitExceeded { limit });
                }
                (task.f)();
                Some(task.origin)
            } else if let Some(id) = self.inner.executor.pop_ready() {
                turns += 1;
                if turns > limit {
                    return Err(SettleError::MicrotaskLimitExceeded { limit });
                }
                self.inner.executor.poll(id)
            } else {
                break;
            };
            platform_work |= origin == Some(TaskOrigin::Platform);
        }
        if platform_work {
            self.notify(TaskKind::Microtask, TaskOrigin::Platform);
        }
        Ok(())
    }

    fn advance_now(&self, target: u64, on_tick: &mut dyn FnMut(u64)) {
        let now = self.inner.now.get();
        if target > now {
            self.inner.now.set(target);
            on_tick(target - now);
        }
    }

    fn pop_timer(&self, key: TimerKey) -> Option<TimerEntry> {
        let entry = self.inner.timers.borrow_mut().remove(&key)?;
        self.inner.index.borrow_mut().remove(&entry.id);
        Some(entry)
    }

    fn first_due(&self, bound: u64) -> Option<TimerKey> {
        self.inner
            .timers
            .borrow()
            .keys()
            .next()
            .copied()
            .filter(|(due, _)| *due <= bound)
    }

    fn first_one_shot(&self) -> Option<TimerKey> {
        self.inner
            .timers
            .borrow()
            .iter()
            .find(|(_, entry)| !entry.kind.is_periodic())
            .map(|(key, _)| *key)
    }

    fn fire(&self, key: TimerKey, entry: TimerEntry, on_tick: &mut dyn FnMut(u64)) -> SettleResult<()> {
        self.advance_now(key.0, on_tick);
        let TimerEntry {
            id,
            kind,
            origin,
            interval,
            swept,
            callback,
        } = entry;

        self.inner.firing.borrow_mut().push((id, false));
        let repeat = match callback {
            Callback::Once(f) => {
                f();
                None
            }
            Callback::Repeat(mut f) => {
                f();
                Some(f)
            }
        };
        let cancelled = self
            .inner
            .firing
            .borrow_mut()
            .pop()
            .is_some_and(|(_, cancelled)| cancelled);

        if let Some(f) = repeat {
            if !cancelled {
                self.insert_timer(
                    key.0.saturating_add(interval),
                    TimerEntry {
                        id,
                        kind,
                        origin,
                        interval,
                        swept,
                        callback: Callback::Repeat(f),
                    },
                );
            }
        }

        self.drain_microtasks()?;
        self.notify(kind, origin);
        Ok(())
    }

    fn advance_to(&self, target: u64, on_tick: &mut dyn FnMut(u64)) -> SettleResult<()> {
        while let Some(key) = self.first_due(target) {
            if let Some(entry) = self.pop_timer(key) {
                self.fire(key, entry, on_tick)?;
            }
        }
        self.advance_now(target, on_tick);
        Ok(())
    }

    /// Advance zone time by `millis`, firing every timer that comes due
    ///
    /// # Errors
    ///
    /// Returns error if the zone is not active or a microtask drain runs away
    pub fn tick(&self, millis: u64, mut on_tick: impl FnMut(u64)) -> SettleResult<()> {
        self.ensure_active("tick")?;
        self.drain_microtasks()?;
        let target = self.now().saturating_add(millis);
        self.advance_to(target, &mut on_tick)
    }

    /// Drain pending timers; returns the elapsed zone milliseconds.
    ///
    /// Without `include_periodic` timers fire in due order until no one-shot
    /// timer is left; periodic timers due before the last one-shot fire
    /// along the way, and `limit` bounds the number of timers fired. With it, each pass ticks up to the
    /// latest due time among one-shot timers and periodic timers not yet
    /// swept by an earlier pass; periodic timers present after a pass count
    /// as swept, and `limit` bounds the number of passes.
    ///
    /// # Errors
    ///
    /// Returns error if the zone is not active or a bound is exceeded
    pub fn flush(
        &self,
        limit: usize,
        include_periodic: bool,
        mut on_tick: impl FnMut(u64),
    ) -> SettleResult<u64> {
        self.ensure_active("flush")?;
        let start = self.now();
        self.drain_microtasks()?;
        if include_periodic {
            self.flush_passes(limit, &mut on_tick)?;
        } else {
            self.flush_one_shot(limit, &mut on_tick)?;
        }
        self.drain_microtasks()?;
        let elapsed = self.now() - start;
        tracing::debug!(zone = %self.inner.name, elapsed, include_periodic, "flushed");
        Ok(elapsed)
    }

    // Periodic timers keep firing in due order while one-shots remain, so
    // none of them is left behind the zone clock.
    fn flush_one_shot(&self, limit: usize, on_tick: &mut dyn FnMut(u64)) -> SettleResult<()> {
        let mut fired = 0;
        while self.first_one_shot().is_some() {
            let Some(key) = self.first_due(u64::MAX) else {
                break;
            };
            if fired >= limit {
                return Err(SettleError::FlushLimitExceeded { limit });
            }
            if let Some(entry) = self.pop_timer(key) {
                self.fire(key, entry, on_tick)?;
            }
            fired += 1;
        }
        Ok(())
    }

    fn flush_passes(&self, limit: usize, on_tick: &mut dyn FnMut(u64)) -> SettleResult<()> {
        let mut passes = 0;
        while let Some(horizon) = self.flush_horizon() {
            if passes >= limit {
                return Err(SettleError::FlushLimitExceeded { limit });
            }
            passes += 1;
            self.advance_to(horizon, on_tick)?;
            for entry in self.inner.timers.borrow_mut().values_mut() {
                if entry.kind.is_periodic() {
                    entry.swept = true;
                }
            }
            if self.first_one_shot().is_none() {
                break;
            }
        }
        Ok(())
    }

    fn flush_horizon(&self) -> Option<u64> {
        self.inner
            .timers
            .borrow()
            .iter()
            .filter(|(_, entry)| !entry.kind.is_periodic() || !entry.swept)
            .map(|((due, _), _)| *due)
            .max()
    }

    // =========================================================================
    // Inspection and reset
    // =========================================================================

    /// Pending timers in firing order
    #[must_use]
    pub fn pending_timers(&self) -> Vec<PendingTimer> {
        self.inner
            .timers
            .borrow()
            .iter()
            .map(|((due, _), entry)| PendingTimer {
                id: TaskId(entry.id),
                kind: entry.kind,
                origin: entry.origin,
                due_ms: *due,
                interval_ms: entry.kind.is_periodic().then_some(entry.interval),
            })
            .collect()
    }

    /// Number of pending periodic timers
    #[must_use]
    pub fn pending_periodic_timers(&self) -> usize {
        self.inner
            .timers
            .borrow()
            .values()
            .filter(|entry| entry.kind.is_periodic())
            .count()
    }

    /// Number of queued microtasks and woken futures
    #[must_use]
    pub fn pending_microtasks(&self) -> usize {
        self.inner.microtasks.borrow().len() + self.inner.executor.ready_len()
    }

    /// Number of spawned futures that have not finished
    #[must_use]
    pub fn pending_futures(&self) -> usize {
        self.inner.executor.len()
    }

    /// No microtask work is queued
    #[must_use]
    pub fn is_stable(&self) -> bool {
        self.pending_microtasks() == 0
    }

    /// Any timer or microtask is pending
    #[must_use]
    pub fn has_pending_work(&self) -> bool {
        !self.inner.timers.borrow().is_empty() || !self.is_stable()
    }

    /// Drop all pending work, rewind zone time and detach the observer
    pub fn reset(&self) {
        self.inner.executor.clear();
        let timers = std::mem::take(&mut *self.inner.timers.borrow_mut());
        drop(timers);
        self.inner.index.borrow_mut().clear();
        let microtasks = std::mem::take(&mut *self.inner.microtasks.borrow_mut());
        drop(microtasks);
        self.inner.firing.borrow_mut().clear();
        self.inner.now.set(0);
        self.set_observer(None);
        tracing::debug!(zone = %self.inner.name, "reset");
    }
}

impl Scheduler for FakeAsyncZone {
    fn now_ms(&self) -> u64 {
        self.inner
            .clock
            .as_ref()
            .map_or_else(|| self.now(), |clock| clock.now_ms())
    }

    fn set_timeout(&self, delay_ms: u64, f: TaskFn) -> TaskId {
        self.schedule_timer(TaskKind::Timeout, TaskOrigin::Root, delay_ms, Callback::Once(f))
    }

    fn set_interval(&self, interval_ms: u64, f: RepeatFn) -> TaskId {
        self.schedule_timer(
            TaskKind::Interval,
            TaskOrigin::Root,
            interval_ms.max(1),
            Callback::Repeat(f),
        )
    }

    fn request_animation_frame(&self, f: TaskFn) -> TaskId {
        let delay = self.inner.limits.animation_frame_ms;
        self.schedule_timer(TaskKind::AnimationFrame, TaskOrigin::Root, delay, Callback::Once(f))
    }

    fn schedule_macrotask(&self, delay_ms: u64, f: TaskFn) -> TaskId {
        self.schedule_timer(TaskKind::Macrotask, TaskOrigin::Root, delay_ms, Callback::Once(f))
    }

    fn queue_microtask(&self, f: TaskFn) {
        self.queue_microtask_from(TaskOrigin::Root, f);
    }

    fn cancel(&self, id: TaskId) -> bool {
        self.cancel_task(id)
    }

    fn sleep(&self, ms: u64) -> LocalBoxFuture<'static, ()> {
        Box::pin(self.sleep_future(TaskOrigin::Root, ms))
    }

    fn spawn_detached(&self, future: LocalBoxFuture<'static, ()>) {
        drop(self.spawn_with_origin(TaskOrigin::Root, future));
    }
}

/// Zone scheduler handle for framework code.
///
/// Tasks scheduled through it are tagged [`TaskOrigin::Platform`], which is
/// what makes the fixture stabilize after them. It holds the zone weakly, so
/// components keeping it do not keep the zone alive.
#[derive(Debug, Clone)]
pub struct PlatformScheduler {
    zone: Weak<ZoneInner>,
}

impl PlatformScheduler {
    fn zone(&self) -> Option<FakeAsyncZone> {
        self.zone.upgrade().map(|inner| FakeAsyncZone { inner })
    }
}

impl std::fmt::Debug for ZoneInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZoneInner").field("name", &self.name).finish()
    }
}

impl Scheduler for PlatformScheduler {
    fn now_ms(&self) -> u64 {
        self.zone().map_or(0, |zone| zone.now_ms())
    }

    fn set_timeout(&self, delay_ms: u64, f: TaskFn) -> TaskId {
        self.zone().map_or(TaskId::NONE, |zone| {
            zone.schedule_timer(TaskKind::Timeout, TaskOrigin::Platform, delay_ms, Callback::Once(f))
        })
    }

    fn set_interval(&self, interval_ms: u64, f: RepeatFn) -> TaskId {
        self.zone().map_or(TaskId::NONE, |zone| {
            zone.schedule_timer(
                TaskKind::Interval,
                TaskOrigin::Platform,
                interval_ms.max(1),
                Callback::Repeat(f),
            )
        })
    }

    fn request_animation_frame(&self, f: TaskFn) -> TaskId {
        self.zone().map_or(TaskId::NONE, |zone| {
            let delay = zone.inner.limits.animation_frame_ms;
            zone.schedule_timer(
                TaskKind::AnimationFrame,
                TaskOrigin::Platform,
                delay,
                Callback::Once(f),
            )
        })
    }

    fn schedule_macrotask(&self, delay_ms: u64, f: TaskFn) -> TaskId {
        self.zone().map_or(TaskId::NONE, |zone| {
            zone.schedule_timer(TaskKind::Macrotask, TaskOrigin::Platform, delay_ms, Callback::Once(f))
        })
    }

    fn queue_microtask(&self, f: TaskFn) {
        if let Some(zone) = self.zone() {
            zone.queue_microtask_from(TaskOrigin::Platform, f);
        }
    }

    fn cancel(&self, id: TaskId) -> bool {
        self.zone().is_some_and(|zone| zone.cancel_task(id))
    }

    fn sleep(&self, ms: u64) -> LocalBoxFuture<'static, ()> {
        match self.zone() {
            Some(zone) => Box::pin(zone.sleep_future(TaskOrigin::Platform, ms)),
            None => Box::pin(futures::future::pending()),
        }
    }

    fn spawn_detached(&self, future: LocalBoxFuture<'static, ()>) {
        if let Some(zone) = self.zone() {
            drop(zone.spawn_with_origin(TaskOrigin::Platform, future));
        }
    }
}

#[derive(Default)]
struct SleepState {
    fired: Cell<bool>,
    waker: RefCell<Option<Waker>>,
}

impl SleepState {
    fn fire(&self) {
        self.fired.set(true);
        let waker = self.waker.borrow_mut().take();
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

/// Future completing when its virtual timer fires
struct Sleep {
    state: Rc<SleepState>,
    zone: Weak<ZoneInner>,
    timer: TaskId,
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.state.fired.get() {
            Poll::Ready(())
        } else {
            *self.state.waker.borrow_mut() = Some(cx.waker().clone());
            Poll::Pending
        }
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        if !self.state.fired.get() {
            if let Some(inner) = self.zone.upgrade() {
                FakeAsyncZone { inner }.cancel_task(self.timer);
            }
        }
    }
}
