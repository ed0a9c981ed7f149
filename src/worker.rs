//! Storage worker: executes `GET`/`SET` against a durable store in its own task.
//!
//! The worker shares nothing with the cache. It only sees owned request
//! envelopes arriving on a channel and answers each one with exactly one
//! response envelope carrying the same id.

use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::protocol::{Procedure, Request, Response};
use crate::store::DurableStore;

/// Bound on queued envelopes in each direction.
pub const CHANNEL_CAPACITY: usize = 64;

pub struct StorageWorker<S> {
    store: S,
}

/// The caller's ends of a spawned worker's channels.
pub struct WorkerChannels {
    pub requests: mpsc::Sender<Request>,
    pub responses: mpsc::Receiver<Response>,
    pub task: JoinHandle<()>,
}

impl<S: DurableStore + 'static> StorageWorker<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Run the worker on its own task and hand back the caller's channel ends.
    pub fn spawn(store: S) -> WorkerChannels {
        let (request_tx, request_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (response_tx, response_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let task = tokio::spawn(Self::new(store).run(request_rx, response_tx));
        WorkerChannels {
            requests: request_tx,
            responses: response_rx,
            task,
        }
    }

    /// Message loop. Ends when the request side closes or nobody listens for
    /// responses any more.
    pub async fn run(self, mut inbox: mpsc::Receiver<Request>, outbox: mpsc::Sender<Response>) {
        while let Some(request) = inbox.recv().await {
            let response = self.handle(request).await;
            if outbox.send(response).await.is_err() {
                debug!("response channel closed, stopping storage worker");
                break;
            }
        }
    }

    /// Execute one request. Failures only fail this request.
    pub async fn handle(&self, request: Request) -> Response {
        let Request { id, payload } = request;
        let started = Instant::now();

        let Some(procedure) = Procedure::parse(&payload.procedure) else {
            let message = format!(
                "storage worker got an unknown procedure call - \"{}\"",
                payload.procedure
            );
            error!(request_id = id, procedure = %payload.procedure, "{}", message);
            return Response::err(id, message);
        };

        debug!(request_id = id, procedure = procedure.as_str(), key = %payload.key, "executing");

        let response = match procedure {
            Procedure::Set => match payload.value {
                Some(value) => match self.store.put(&payload.key, value).await {
                    Ok(()) => Response::ok(id, format!("saved - {}", payload.key)),
                    Err(e) => {
                        warn!(request_id = id, key = %payload.key, error = %e, "SET failed");
                        Response::err(id, format!("error saving - {}: {}", payload.key, e))
                    }
                },
                None => {
                    warn!(request_id = id, key = %payload.key, "SET without value");
                    Response::err(id, format!("missing value for SET - {}", payload.key))
                }
            },
            Procedure::Get => match self.store.get(&payload.key).await {
                Ok(Some(blob)) => Response::ok(id, blob),
                Ok(None) => {
                    debug!(request_id = id, key = %payload.key, "not found");
                    Response::not_found(id)
                }
                Err(e) => {
                    warn!(request_id = id, key = %payload.key, error = %e, "GET failed");
                    Response::err(id, format!("error getting - {}: {}", payload.key, e))
                }
            },
        };

        debug!(
            request_id = id,
            ok = response.error.is_none(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "completed"
        );
        response
    }
}
