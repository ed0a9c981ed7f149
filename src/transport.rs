//! Request/response correlation across the worker boundary.
//!
//! Each outbound call takes the next id from a monotonically increasing
//! sequence and parks a one-shot completion slot under that id. Inbound
//! responses are matched by id; the slot is removed before it is fulfilled, so
//! each id completes at most once. Responses for unknown ids are dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::protocol::{Payload, Request, Response};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The worker answered with an error envelope.
    Remote(String),
    /// The worker side went away before answering.
    Disconnected,
    /// No answer within the configured timeout; the pending entry was evicted.
    Timeout { id: u64, after: Duration },
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Remote(message) => write!(f, "{}", message),
            TransportError::Disconnected => write!(f, "storage worker disconnected"),
            TransportError::Timeout { id, after } => {
                write!(f, "request {} timed out after {:?}", id, after)
            }
        }
    }
}

impl std::error::Error for TransportError {}

type Completion = oneshot::Sender<Result<Value, TransportError>>;

/// Cloneable handle; clones share one id sequence and one pending table.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<TransportInner>,
}

struct TransportInner {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, Completion>>,
    outbound: mpsc::Sender<Request>,
    timeout: Option<Duration>,
}

impl Transport {
    /// Transport without a dispatcher; responses must be fed to [`deliver`](Self::deliver).
    pub fn new(outbound: mpsc::Sender<Request>) -> Self {
        Self::with_timeout(outbound, None)
    }

    /// Like [`new`](Self::new), but evicts pending entries that get no answer
    /// within `timeout`.
    pub fn with_timeout(outbound: mpsc::Sender<Request>, timeout: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(TransportInner {
                next_id: AtomicU64::new(0),
                pending: Mutex::new(HashMap::new()),
                outbound,
                timeout,
            }),
        }
    }

    /// Transport plus a dispatcher task draining `inbound`. When `inbound`
    /// closes, every still-pending caller is failed with `Disconnected`.
    ///
    /// The dispatcher only holds a weak handle, so dropping the last
    /// `Transport` closes the outbound channel and lets the worker wind down.
    pub fn connect(
        outbound: mpsc::Sender<Request>,
        mut inbound: mpsc::Receiver<Response>,
        timeout: Option<Duration>,
    ) -> Self {
        let transport = Self::with_timeout(outbound, timeout);
        let dispatcher = Arc::downgrade(&transport.inner);
        tokio::spawn(async move {
            while let Some(response) = inbound.recv().await {
                let Some(inner) = dispatcher.upgrade() else {
                    break;
                };
                inner.deliver(response);
            }
            if let Some(inner) = dispatcher.upgrade() {
                let dropped = inner.fail_all();
                debug!(dropped, "response channel closed");
            }
        });
        transport
    }

    /// Send `payload` and wait for the matching response.
    pub async fn call(&self, payload: Payload) -> Result<Value, TransportError> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending().insert(id, tx);

        let request = Request { id, payload };
        if self.inner.outbound.send(request).await.is_err() {
            self.pending().remove(&id);
            return Err(TransportError::Disconnected);
        }

        let outcome = match self.inner.timeout {
            Some(after) => match tokio::time::timeout(after, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.pending().remove(&id);
                    warn!(request_id = id, ?after, "request timed out, evicted");
                    return Err(TransportError::Timeout { id, after });
                }
            },
            None => rx.await,
        };

        outcome.unwrap_or(Err(TransportError::Disconnected))
    }

    /// Route one response to its pending caller. Returns false (and changes
    /// nothing) when no request with that id is pending.
    pub fn deliver(&self, response: Response) -> bool {
        self.inner.deliver(response)
    }

    pub fn pending_len(&self) -> usize {
        self.pending().len()
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<u64, Completion>> {
        self.inner.pending()
    }
}

impl TransportInner {
    fn deliver(&self, response: Response) -> bool {
        let Some(completion) = self.pending().remove(&response.id) else {
            debug!(request_id = response.id, "dropping response for unknown request");
            return false;
        };

        let outcome = match response.error {
            Some(error) => Err(TransportError::Remote(error.message)),
            None => Ok(response.result),
        };
        // the caller may have stopped waiting; nothing to do then
        let _ = completion.send(outcome);
        true
    }

    fn fail_all(&self) -> usize {
        let drained: Vec<Completion> = self.pending().drain().map(|(_, c)| c).collect();
        let count = drained.len();
        for completion in drained {
            let _ = completion.send(Err(TransportError::Disconnected));
        }
        count
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<u64, Completion>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
