//! Task groups: one-shot success/error supervision over the worker pool.
//!
//! A group tracks how many of its tasks are still pending. When the last
//! task finishes cleanly, the finish callback runs; when any task fails,
//! the first error is funneled into the error callback and later errors
//! are only logged. Exactly one of the two callbacks ever runs, exactly
//! once per group: both are moved out of their slots on first invocation,
//! so a second call is impossible rather than merely forbidden.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::Cancelled;
use crate::pool::WorkerPool;

const RUNNING: u8 = 0;
const DONE_OK: u8 = 1;
const DONE_ERROR: u8 = 2;

type ErrorHook<E> = Box<dyn FnOnce(E) + Send + 'static>;
type FinishHook = Box<dyn FnOnce() + Send + 'static>;

/// A reference-counted group of related tasks on a shared [`WorkerPool`].
///
/// Terminal states are absorbing: once the group finished or errored, no
/// further task bodies run (tasks already in flight complete, but their
/// outcome can no longer change the group's state).
pub struct TaskGroup<E> {
    pool: Arc<WorkerPool>,
    state: AtomicU8,
    pending: AtomicUsize,
    on_error: Mutex<Option<ErrorHook<E>>>,
    on_finish: Mutex<Option<FinishHook>>,
}

impl<E: std::fmt::Display + Send + 'static> TaskGroup<E> {
    /// Create a group with its two one-shot terminal callbacks.
    pub fn new(
        pool: Arc<WorkerPool>,
        on_error: impl FnOnce(E) + Send + 'static,
        on_finish: impl FnOnce() + Send + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            pool,
            state: AtomicU8::new(RUNNING),
            pending: AtomicUsize::new(0),
            on_error: Mutex::new(Some(Box::new(on_error))),
            on_finish: Mutex::new(Some(Box::new(on_finish))),
        })
    }

    /// Submit a task to the group.
    ///
    /// Adding a task to a group that already finished cleanly is a logic
    /// error in the caller; adding to an errored group is a benign race
    /// (some sibling failed first) and the task is silently dropped. Tasks
    /// may add further tasks to their own group while running.
    pub fn add_task(
        self: &Arc<Self>,
        task: impl FnOnce() -> Result<(), E> + Send + 'static,
    ) {
        match self.state.load(Ordering::Acquire) {
            DONE_OK => {
                debug_assert!(false, "task added to a group that already finished");
                tracing::error!("task added to a group that already finished; dropping");
                return;
            }
            DONE_ERROR => return,
            _ => {}
        }

        self.pending.fetch_add(1, Ordering::AcqRel);
        let group = Arc::clone(self);
        self.pool.submit(move || group.run_one(task));
    }

    /// Force the group into the error state.
    ///
    /// If the group was still running, the error callback receives the
    /// cancelled sentinel. No-op on a group that already terminated.
    pub fn cancel(&self)
    where
        E: From<Cancelled>,
    {
        if self
            .state
            .compare_exchange(RUNNING, DONE_ERROR, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.dispatch_error(Cancelled.into());
        }
    }

    fn run_one(&self, task: impl FnOnce() -> Result<(), E>) {
        // A sibling may have errored between enqueue and execution.
        if self.state.load(Ordering::Acquire) != RUNNING {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            return;
        }

        match task() {
            Err(err) => {
                let first = self
                    .state
                    .compare_exchange(RUNNING, DONE_ERROR, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok();
                self.pending.fetch_sub(1, Ordering::AcqRel);
                if first {
                    self.dispatch_error(err);
                } else {
                    tracing::warn!("task error after group already terminated: {err}");
                }
            }
            Ok(()) => {
                // Decrement first, then try the Running -> DoneOk transition:
                // this way the "last task on a running group" case cannot be
                // missed, and a concurrent error transition makes the CAS a
                // harmless no-op.
                if self.pending.fetch_sub(1, Ordering::AcqRel) == 1
                    && self
                        .state
                        .compare_exchange(RUNNING, DONE_OK, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                {
                    self.dispatch_finish();
                }
            }
        }
    }

    fn dispatch_error(&self, err: E) {
        let hook = self.on_error.lock().unwrap().take();
        match hook {
            Some(hook) => hook(err),
            None => tracing::error!("error callback already consumed: {err}"),
        }
    }

    fn dispatch_finish(&self) {
        let hook = self.on_finish.lock().unwrap().take();
        match hook {
            Some(hook) => hook(),
            None => tracing::error!("finish callback already consumed"),
        }
    }
}

impl<E> Drop for TaskGroup<E> {
    fn drop(&mut self) {
        let pending = self.pending.load(Ordering::Acquire);
        if pending > 0 {
            tracing::warn!("task group dropped with {pending} tasks still pending");
        }
    }
}
