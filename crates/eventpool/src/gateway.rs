//! Serialized channel to the application's validation service.
//!
//! Requests enter one bounded FIFO queue and are served by a single worker
//! task. Two call classes exist:
//!
//! - admission checks for newly submitted entries
//! - recheck passes over already pending entries, issued by an update
//!
//! The two classes never interleave. Admission checks hold a shared permit of
//! a class gate for the duration of the call and its completion; a recheck
//! pass (and a flush) takes the gate exclusively, so it starts only after
//! every in-flight admission has completed and no admission starts until it
//! finishes.
//!
//! With [`CallOrdering::Sequential`] the worker awaits each call before
//! dequeuing the next, so calls reach the application in submission order.
//! With [`CallOrdering::Concurrent`] admission calls are spawned and may
//! overlap.
//!
//! Every submitted completion is invoked exactly once. When the gateway
//! shuts down, outstanding completions receive [`GatewayError::Closed`].

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};
use txflow_types::{CheckEntryRequest, CheckEntryResponse, Entry};

use crate::app::Application;

/// Errors reported by the validation gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The gateway shut down before the call resolved
    #[error("validation gateway closed")]
    Closed,
}

/// Call ordering policy towards the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallOrdering {
    /// One call at a time, in submission order
    Sequential,
    /// Admission calls may overlap
    #[default]
    Concurrent,
}

impl CallOrdering {
    /// Policy for an application that does or does not require ordered calls
    pub fn for_app(sequential: bool) -> Self {
        if sequential {
            Self::Sequential
        } else {
            Self::Concurrent
        }
    }
}

type CompletionFn = Box<dyn FnOnce(Result<CheckEntryResponse, GatewayError>) + Send>;

/// Completion hook of an admission check.
///
/// Dropping an uncompleted hook invokes it with [`GatewayError::Closed`].
pub struct Completion(Option<CompletionFn>);

impl Completion {
    /// Wrap a callback
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce(Result<CheckEntryResponse, GatewayError>) + Send + 'static,
    {
        Self(Some(Box::new(callback)))
    }

    fn complete(mut self, result: Result<CheckEntryResponse, GatewayError>) {
        if let Some(callback) = self.0.take() {
            callback(result);
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(callback) = self.0.take() {
            callback(Err(GatewayError::Closed));
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("pending", &self.0.is_some())
            .finish()
    }
}

enum Request {
    Check {
        request: CheckEntryRequest,
        completion: Completion,
    },
    Recheck {
        entries: Vec<Entry>,
        reply: oneshot::Sender<Vec<CheckEntryResponse>>,
    },
    Flush {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to the validation worker.
///
/// Must be created inside a tokio runtime.
pub struct ValidationGateway {
    queue: mpsc::Sender<Request>,
    shutdown: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    ordering: CallOrdering,
}

impl ValidationGateway {
    /// Spawn the worker serving `app` with the given ordering policy and
    /// queue bound
    pub fn new(app: Arc<dyn Application>, ordering: CallOrdering, queue_depth: usize) -> Self {
        let (queue, rx) = mpsc::channel(queue_depth.max(1));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let worker = tokio::spawn(run_worker(app, ordering, rx, shutdown_rx));

        debug!(?ordering, queue_depth, "Started validation gateway");

        Self {
            queue,
            shutdown,
            worker: Mutex::new(Some(worker)),
            ordering,
        }
    }

    /// Ordering policy in effect
    pub fn ordering(&self) -> CallOrdering {
        self.ordering
    }

    /// Queue an admission check. Waits while the queue is full.
    ///
    /// `completion` is invoked exactly once, with [`GatewayError::Closed`]
    /// if the gateway is shut down first.
    pub async fn submit(&self, request: CheckEntryRequest, completion: Completion) {
        // A failed send drops the request, which completes it as closed
        let _ = self.queue.send(Request::Check { request, completion }).await;
    }

    /// Revalidate `entries` as one exclusive pass.
    ///
    /// Responses are returned in input order.
    pub async fn recheck(&self, entries: Vec<Entry>) -> Result<Vec<CheckEntryResponse>, GatewayError> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }
        let (reply, rx) = oneshot::channel();
        self.queue
            .send(Request::Recheck { entries, reply })
            .await
            .map_err(|_| GatewayError::Closed)?;
        rx.await.map_err(|_| GatewayError::Closed)
    }

    /// Wait until every call queued before this one has resolved and its
    /// completion has run
    pub async fn flush(&self) -> Result<(), GatewayError> {
        let (reply, rx) = oneshot::channel();
        self.queue
            .send(Request::Flush { reply })
            .await
            .map_err(|_| GatewayError::Closed)?;
        rx.await.map_err(|_| GatewayError::Closed)
    }

    /// Stop the worker. Queued and in-flight completions are invoked with
    /// [`GatewayError::Closed`]. Idempotent.
    pub async fn close(&self) {
        self.shutdown.send_replace(true);
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.await;
            info!("Validation gateway closed");
        }
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }
}

impl Drop for ValidationGateway {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

/// Resolves once shutdown is signalled or the gateway handle is gone
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn run_worker(
    app: Arc<dyn Application>,
    ordering: CallOrdering,
    mut rx: mpsc::Receiver<Request>,
    mut shutdown: watch::Receiver<bool>,
) {
    let gate = Arc::new(RwLock::new(()));

    loop {
        let request = tokio::select! {
            biased;
            _ = stopped(&mut shutdown) => break,
            request = rx.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        match request {
            Request::Check { request, completion } => match ordering {
                CallOrdering::Sequential => {
                    let _permit = gate.read().await;
                    tokio::select! {
                        _ = stopped(&mut shutdown) => break,
                        response = app.check_entry(request) => completion.complete(Ok(response)),
                    }
                }
                CallOrdering::Concurrent => {
                    let permit = gate.clone().read_owned().await;
                    let app = app.clone();
                    let mut shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        // Held until the completion has run
                        let _permit = permit;
                        tokio::select! {
                            _ = stopped(&mut shutdown) => drop(completion),
                            response = app.check_entry(request) => completion.complete(Ok(response)),
                        }
                    });
                }
            },
            Request::Recheck { entries, reply } => {
                let _exclusive = gate.write().await;
                trace!(entries = entries.len(), "Recheck pass started");
                let mut responses = Vec::with_capacity(entries.len());
                for entry in entries {
                    tokio::select! {
                        _ = stopped(&mut shutdown) => break,
                        response = app.check_entry(CheckEntryRequest::recheck(entry)) => {
                            responses.push(response);
                        }
                    }
                }
                if *shutdown.borrow() {
                    break;
                }
                let _ = reply.send(responses);
            }
            Request::Flush { reply } => {
                let _exclusive = gate.write().await;
                let _ = reply.send(());
            }
        }
    }

    // Reject everything still queued
    rx.close();
    let mut dropped = 0usize;
    while let Ok(request) = rx.try_recv() {
        drop(request);
        dropped += 1;
    }
    debug!(dropped, "Validation worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::KvStoreApp;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn collect() -> (Completion, oneshot::Receiver<Result<CheckEntryResponse, GatewayError>>) {
        let (tx, rx) = oneshot::channel();
        let completion = Completion::new(move |result| {
            let _ = tx.send(result);
        });
        (completion, rx)
    }

    #[test]
    fn test_dropped_completion_reports_closed() {
        let (completion, mut rx) = collect();
        drop(completion);
        assert_eq!(rx.try_recv().unwrap(), Err(GatewayError::Closed));
    }

    #[test]
    fn test_completion_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let completion = Completion::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        completion.complete(Ok(CheckEntryResponse::ok()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_submit_resolves() {
        let gateway = ValidationGateway::new(Arc::new(KvStoreApp::new()), CallOrdering::Sequential, 4);
        let (completion, rx) = collect();
        gateway
            .submit(CheckEntryRequest::new(Entry::from(b"a")), completion)
            .await;
        assert!(rx.await.unwrap().unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_recheck_preserves_order() {
        let gateway = ValidationGateway::new(Arc::new(KvStoreApp::new()), CallOrdering::Concurrent, 4);
        let entries = vec![Entry::from(b"a"), Entry::default(), Entry::from(b"c")];
        let responses = gateway.recheck(entries).await.unwrap();
        assert_eq!(responses.len(), 3);
        assert!(responses[0].is_ok());
        assert!(!responses[1].is_ok());
        assert!(responses[2].is_ok());
    }

    struct StallingApp;

    #[async_trait::async_trait]
    impl Application for StallingApp {
        async fn check_entry(&self, _request: CheckEntryRequest) -> CheckEntryResponse {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            CheckEntryResponse::ok()
        }
    }

    #[tokio::test]
    async fn test_close_rejects_outstanding() {
        for ordering in [CallOrdering::Sequential, CallOrdering::Concurrent] {
            let gateway = ValidationGateway::new(Arc::new(StallingApp), ordering, 8);
            let (first, first_rx) = collect();
            let (second, second_rx) = collect();
            gateway.submit(CheckEntryRequest::new(Entry::from(b"1")), first).await;
            gateway.submit(CheckEntryRequest::new(Entry::from(b"2")), second).await;
            tokio::task::yield_now().await;

            gateway.close().await;
            assert!(gateway.is_closed());
            assert_eq!(first_rx.await.unwrap(), Err(GatewayError::Closed));
            assert_eq!(second_rx.await.unwrap(), Err(GatewayError::Closed));

            // Submissions after close complete immediately as closed
            let (late, late_rx) = collect();
            gateway.submit(CheckEntryRequest::new(Entry::from(b"3")), late).await;
            assert_eq!(late_rx.await.unwrap(), Err(GatewayError::Closed));
            assert_eq!(gateway.flush().await, Err(GatewayError::Closed));
        }
    }
}
