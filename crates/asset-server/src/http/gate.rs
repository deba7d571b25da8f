//! Single-shot response gate.
//!
//! Three parties race to answer an upload request: the pipeline's ready
//! callback (from a worker thread), the processing-deadline timer, and
//! nothing else; the socket deadline acts one level below, on the
//! connection. The gate holds the single sender of a oneshot channel;
//! claiming it moves the sender out, so whoever claims first is the only
//! party that can ever produce the response. Losers observe `None` and
//! back off without any I/O.

use std::sync::{Arc, Mutex};

use axum::response::Response;
use tokio::sync::oneshot;

pub struct ResponseGate {
    slot: Mutex<Option<oneshot::Sender<Response>>>,
}

impl ResponseGate {
    /// Create a gate and the receiving end the request handler awaits.
    pub fn new() -> (Arc<Self>, oneshot::Receiver<Response>) {
        let (tx, rx) = oneshot::channel();
        (
            Arc::new(Self {
                slot: Mutex::new(Some(tx)),
            }),
            rx,
        )
    }

    /// Take exclusive ownership of the response, if still available.
    pub fn claim(&self) -> Option<oneshot::Sender<Response>> {
        self.slot.lock().unwrap().take()
    }

    /// Claim and immediately send. Returns false when the gate was already
    /// claimed and the response was dropped.
    pub fn send(&self, response: Response) -> bool {
        match self.claim() {
            // A send error only means the handler went away; the claim
            // itself still resolved the race.
            Some(tx) => {
                let _ = tx.send(response);
                true
            }
            None => false,
        }
    }
}
