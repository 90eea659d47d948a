//! Single-lane request queue.
//!
//! A dedicated worker task runs queued operations strictly one at a time in
//! submission order. After every completed operation it sleeps for the
//! shared backoff delay, which paces the whole client no matter how many
//! callers are waiting.

use super::backoff::SharedBackoff;
use super::error::FetchError;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, timeout};
use tracing::{debug, trace};

type BoxedRun = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Type-erased unit of work. Yields `None` when its ticket was dropped.
struct QueuedRequest {
    label: String,
    start: Box<dyn FnOnce(Duration) -> Option<BoxedRun> + Send>,
}

/// Handle to a queued operation; resolves with the operation's outcome.
///
/// Dropping the ticket before the operation starts cancels it.
#[must_use = "dropping a ticket cancels the queued request"]
pub struct Ticket<T> {
    rx: oneshot::Receiver<Result<T, FetchError>>,
}

impl<T> Ticket<T> {
    /// Give up on the request; it will be skipped if it has not started
    pub fn cancel(self) {}
}

impl<T> Future for Ticket<T> {
    type Output = Result<T, FetchError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(FetchError::QueueClosed)))
    }
}

/// FIFO request queue with one operation in flight
#[derive(Clone)]
pub struct RequestQueue {
    tx: mpsc::UnboundedSender<QueuedRequest>,
}

impl RequestQueue {
    /// Spawn the worker task. Must be called inside a tokio runtime.
    pub fn spawn(backoff: SharedBackoff, request_timeout: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(rx, backoff, request_timeout));
        Self { tx }
    }

    /// Submit an operation; it runs after everything submitted before it
    pub fn enqueue<T, F, Fut>(&self, label: impl Into<String>, operation: F) -> Ticket<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();

        let start = Box::new(move |limit: Duration| -> Option<BoxedRun> {
            if reply.is_closed() {
                return None;
            }
            Some(Box::pin(async move {
                let outcome = match timeout(limit, operation()).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(FetchError::Timeout(limit)),
                };
                // Receiver may have gone away mid-flight
                let _ = reply.send(outcome);
            }))
        });

        let request = QueuedRequest {
            label: label.into(),
            start,
        };

        // A closed channel drops the request, and with it the reply sender
        if self.tx.send(request).is_err() {
            debug!("Request queue closed, rejecting request");
        }

        Ticket { rx }
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<QueuedRequest>,
    backoff: SharedBackoff,
    request_timeout: Duration,
) {
    while let Some(request) = rx.recv().await {
        let Some(run) = (request.start)(request_timeout) else {
            debug!(request = %request.label, "Skipping cancelled request");
            continue;
        };

        trace!(request = %request.label, "Running queued request");
        run.await;

        let delay = backoff.next_delay();
        if !delay.is_zero() {
            trace!(delay_ms = delay.as_millis(), "Pacing before next request");
            sleep(delay).await;
        }
    }

    debug!("Request queue worker stopped");
}
