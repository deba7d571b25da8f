//! Fixed-size worker pool for CPU-bound pipeline stages.
//!
//! All decoding, resizing, encoding and hashing runs on these OS threads;
//! the async reactor in the server binary never executes pipeline work
//! itself. Jobs are erased closures consumed from a single FIFO queue.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Shared {
    queue: Mutex<VecDeque<Job>>,
    available: Condvar,
    shutdown: AtomicBool,
}

/// A pool of `n` worker threads consuming jobs from a FIFO queue.
///
/// Jobs submitted from a single thread start in submission order; there is
/// no ordering guarantee across submitters. The pool is not restartable
/// after [`WorkerPool::shutdown`].
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn a pool with `n` worker threads.
    pub fn new(n: usize) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });

        let workers = (0..n)
            .map(|i| {
                let shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("asset-worker-{i}"))
                    .spawn(move || worker_loop(&shared))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        tracing::debug!("worker pool started with {n} threads");
        Self {
            shared,
            workers: Mutex::new(workers),
        }
    }

    /// Append a job to the queue and wake one idle worker.
    ///
    /// Jobs submitted after shutdown are dropped.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) {
        if self.shared.shutdown.load(Ordering::Acquire) {
            tracing::warn!("job submitted to a pool that is shutting down; dropping");
            return;
        }
        let mut queue = self.shared.queue.lock().unwrap();
        queue.push_back(Box::new(job));
        drop(queue);
        self.shared.available.notify_one();
    }

    /// Stop the pool and join all workers.
    ///
    /// In-flight jobs run to completion; queued jobs that no worker has
    /// picked up yet are dropped.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.available.notify_all();

        let mut workers = self.workers.lock().unwrap();
        for handle in workers.drain(..) {
            if handle.join().is_err() {
                tracing::error!("worker thread panicked during shutdown");
            }
        }
        let dropped = self.shared.queue.lock().unwrap().len();
        if dropped > 0 {
            tracing::warn!("pool shutdown dropped {dropped} queued jobs");
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.shared.shutdown.load(Ordering::Acquire) {
            self.shutdown();
        }
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let job = {
            let mut queue = shared.queue.lock().unwrap();
            loop {
                if shared.shutdown.load(Ordering::Acquire) {
                    return;
                }
                match queue.pop_front() {
                    Some(job) => break job,
                    None => queue = shared.available.wait(queue).unwrap(),
                }
            }
        };
        job();
    }
}
