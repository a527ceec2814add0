//! Single-threaded future executor driven by the zone's microtask drain.

use crate::scheduler::TaskOrigin;
use futures::future::LocalBoxFuture;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::rc::{Rc, Weak};
use std::sync::{Arc, Mutex};
use std::task::{Context, Wake, Waker};

/// Waker that queues its task id for the next microtask turn
struct TaskWaker {
    id: u64,
    ready: Arc<Mutex<VecDeque<u64>>>,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        if let Ok(mut ready) = self.ready.lock() {
            if !ready.contains(&self.id) {
                ready.push_back(self.id);
            }
        }
    }
}

struct Spawned {
    future: LocalBoxFuture<'static, ()>,
    origin: TaskOrigin,
}

#[derive(Default)]
pub(crate) struct Executor {
    tasks: RefCell<HashMap<u64, Spawned>>,
    ready: Arc<Mutex<VecDeque<u64>>>,
    polling: RefCell<HashSet<u64>>,
    aborted: RefCell<HashSet<u64>>,
    next_id: Cell<u64>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("tasks", &self.tasks.borrow().len())
            .field("ready", &self.ready_len())
            .finish()
    }
}

impl Executor {
    /// Register a future; the caller decides when it is first polled
    pub(crate) fn insert(&self, origin: TaskOrigin, future: LocalBoxFuture<'static, ()>) -> u64 {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        self.tasks
            .borrow_mut()
            .insert(id, Spawned { future, origin });
        id
    }

    /// Poll one task. Returns its origin, or `None` if it no longer exists.
    pub(crate) fn poll(&self, id: u64) -> Option<TaskOrigin> {
        let task = self.tasks.borrow_mut().remove(&id)?;
        let Spawned { mut future, origin } = task;
        self.polling.borrow_mut().insert(id);

        let waker = Waker::from(Arc::new(TaskWaker {
            id,
            ready: Arc::clone(&self.ready),
        }));
        let mut cx = Context::from_waker(&waker);
        let poll = future.as_mut().poll(&mut cx);

        self.polling.borrow_mut().remove(&id);
        let aborted = self.aborted.borrow_mut().remove(&id);
        if poll.is_pending() && !aborted {
            self.tasks
                .borrow_mut()
                .insert(id, Spawned { future, origin });
        }
        Some(origin)
    }

    /// Next woken task id
    pub(crate) fn pop_ready(&self) -> Option<u64> {
        self.ready.lock().ok().and_then(|mut ready| ready.pop_front())
    }

    pub(crate) fn ready_len(&self) -> usize {
        self.ready.lock().map(|ready| ready.len()).unwrap_or(0)
    }

    /// Number of unfinished futures
    pub(crate) fn len(&self) -> usize {
        self.tasks.borrow().len() + self.polling.borrow().len()
    }

    /// Drop a future without completing it
    pub(crate) fn abort(&self, id: u64) {
        let removed = self.tasks.borrow_mut().remove(&id);
        if removed.is_none() && self.polling.borrow().contains(&id) {
            self.aborted.borrow_mut().insert(id);
        }
        drop(removed);
    }

    /// Drop every future and forget pending wake-ups
    pub(crate) fn clear(&self) {
        let tasks = std::mem::take(&mut *self.tasks.borrow_mut());
        drop(tasks);
        if let Ok(mut ready) = self.ready.lock() {
            ready.clear();
        }
        self.aborted.borrow_mut().clear();
    }
}

/// Handle to a future spawned on the zone
pub struct TaskHandle<T> {
    pub(crate) id: u64,
    pub(crate) output: Rc<RefCell<Option<T>>>,
    pub(crate) finished: Rc<Cell<bool>>,
    pub(crate) executor: Weak<Executor>,
}

impl<T> std::fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("finished", &self.finished.get())
            .finish()
    }
}

impl<T: 'static> TaskHandle<T> {
    /// Wrap `future` so its output lands in the returned handle
    pub(crate) fn wrap<F>(future: F) -> (LocalBoxFuture<'static, ()>, Self)
    where
        F: Future<Output = T> + 'static,
    {
        let output = Rc::new(RefCell::new(None));
        let finished = Rc::new(Cell::new(false));
        let slot = Rc::clone(&output);
        let done = Rc::clone(&finished);
        let wrapped = Box::pin(async move {
            let value = future.await;
            *slot.borrow_mut() = Some(value);
            done.set(true);
        });
        let handle = Self {
            id: 0,
            output,
            finished,
            executor: Weak::new(),
        };
        (wrapped, handle)
    }
}

impl<T> TaskHandle<T> {
    /// Whether the future ran to completion
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished.get()
    }

    /// Take the output of a finished future
    pub fn take_output(&self) -> Option<T> {
        self.output.borrow_mut().take()
    }

    /// Drop the future if it has not finished
    pub fn abort(&self) {
        if let Some(executor) = self.executor.upgrade() {
            executor.abort(self.id);
        }
    }
}
