//! In-flight dedup registry: serializes concurrent uploads of identical bytes.
//!
//! The registry maps a content digest to a shared busy flag while some
//! processor is producing that digest's folder. Processors that lose the
//! registration race park their worker thread on the flag and re-read the
//! committed folder once woken. The map is process-local; distinct digests
//! never contend.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};

/// Shared busy flag with a notifier, one per in-flight digest.
pub struct ProcessingSlot {
    busy: Mutex<bool>,
    done: Condvar,
}

impl ProcessingSlot {
    fn new() -> Self {
        Self {
            busy: Mutex::new(true),
            done: Condvar::new(),
        }
    }

    /// Block the calling thread until the owning processor releases the slot.
    ///
    /// The wait is bounded by the duration of the owner's pipeline; this is
    /// called from worker threads only, never from the reactor.
    pub fn wait(&self) {
        let mut busy = self.busy.lock().unwrap();
        while *busy {
            busy = self.done.wait(busy).unwrap();
        }
    }

    fn release(&self) {
        let mut busy = self.busy.lock().unwrap();
        *busy = false;
        drop(busy);
        self.done.notify_all();
    }
}

/// Process-wide map from content digest to the slot of its in-flight owner.
#[derive(Default)]
pub struct DedupRegistry {
    inner: Mutex<HashMap<String, Arc<ProcessingSlot>>>,
}

impl DedupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically insert-if-absent.
    ///
    /// Returns the slot for `digest` and whether the caller inserted it.
    /// The inserting caller owns the digest and must eventually call
    /// [`DedupRegistry::finish`]; everyone else must wait on the returned
    /// slot and then re-read the committed folder.
    pub fn register(&self, digest: &str) -> (Arc<ProcessingSlot>, bool) {
        let mut map = self.inner.lock().unwrap();
        match map.get(digest) {
            Some(slot) => (Arc::clone(slot), false),
            None => {
                let slot = Arc::new(ProcessingSlot::new());
                map.insert(digest.to_string(), Arc::clone(&slot));
                (slot, true)
            }
        }
    }

    /// Remove the digest's entry, then release its slot and wake all waiters.
    ///
    /// The erase-then-notify order matters: a processor that arrives after
    /// the erase sees no entry and can trust `walk` to reflect the commit,
    /// because the owner commits before calling this.
    pub fn finish(&self, digest: &str) {
        let slot = self.inner.lock().unwrap().remove(digest);
        match slot {
            Some(slot) => slot.release(),
            None => tracing::warn!("dedup finish for {digest} which was not registered"),
        }
    }

    /// Number of digests currently in flight.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
