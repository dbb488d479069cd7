// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! FIFO request queue with one operation in flight per endpoint.

use super::{Endpoint, RequestError};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{oneshot, watch, Notify};
use tracing::debug;

type Reply = Result<Value, RequestError>;
type Operation = Box<dyn FnOnce(CancelSignal) -> BoxFuture<'static, Reply> + Send>;
type Report = Box<dyn FnOnce(&Reply) + Send>;

const SHUTDOWN_REASON: &str = "request queue shut down";

/// Cancellation signal handed to a running operation.
#[derive(Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<Option<String>>,
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(None);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// Resolves with the cancellation reason once cancelled.
    pub async fn cancelled(&mut self) -> String {
        loop {
            if let Some(reason) = self.rx.borrow_and_update().clone() {
                return reason;
            }
            if self.rx.changed().await.is_err() {
                // Sender gone without cancelling: never fires.
                futures::future::pending::<()>().await;
            }
        }
    }
}

/// Trigger side of a [`CancelSignal`].
pub struct CancelHandle {
    tx: watch::Sender<Option<String>>,
}

impl CancelHandle {
    pub fn new() -> (Self, CancelSignal) {
        let (tx, rx) = watch::channel(None);
        (Self { tx }, CancelSignal { rx })
    }

    pub fn cancel(&self, reason: &str) {
        self.tx.send_replace(Some(reason.to_string()));
    }
}

struct Job {
    operation: Operation,
    reply: oneshot::Sender<Reply>,
    report: Option<Report>,
}

impl Job {
    fn settle(self, outcome: Reply) {
        settle(self.reply, self.report, outcome);
    }
}

/// Hand `outcome` to the report hook, then to whoever still awaits it.
fn settle(reply: oneshot::Sender<Reply>, report: Option<Report>, outcome: Reply) {
    if let Some(report) = report {
        report(&outcome);
    }
    let _ = reply.send(outcome);
}

#[derive(Default)]
struct State {
    pending: VecDeque<Job>,
    running: Option<CancelHandle>,
    shutdown: bool,
}

struct Inner {
    endpoint: Endpoint,
    state: Mutex<State>,
    wake: Notify,
}

/// Serializes operations on one endpoint.
///
/// A worker task pulls the next operation only after the current one has
/// settled. Must be created inside a Tokio runtime.
pub struct RequestQueue {
    inner: Arc<Inner>,
}

impl RequestQueue {
    pub fn new(endpoint: Endpoint) -> Self {
        let inner = Arc::new(Inner {
            endpoint,
            state: Mutex::new(State::default()),
            wake: Notify::new(),
        });
        tokio::spawn(run_worker(inner.clone()));
        Self { inner }
    }

    pub fn endpoint(&self) -> Endpoint {
        self.inner.endpoint
    }

    /// Queue `operation`. It is placed in line immediately; the returned
    /// future only waits for its result.
    pub fn enqueue<F, Fut>(&self, operation: F) -> impl Future<Output = Reply> + Send + 'static
    where
        F: FnOnce(CancelSignal) -> Fut + Send + 'static,
        Fut: Future<Output = Reply> + Send + 'static,
    {
        self.push(Box::new(move |signal| Box::pin(operation(signal))), None)
    }

    /// Like [`enqueue`](Self::enqueue), and `report` sees the outcome once it
    /// settles, whether or not the returned future is still awaited.
    pub fn enqueue_reported<F, Fut, R>(&self, operation: F, report: R) -> impl Future<Output = Reply> + Send + 'static
    where
        F: FnOnce(CancelSignal) -> Fut + Send + 'static,
        Fut: Future<Output = Reply> + Send + 'static,
        R: FnOnce(&Reply) + Send + 'static,
    {
        self.push(
            Box::new(move |signal| Box::pin(operation(signal))),
            Some(Box::new(report)),
        )
    }

    fn push(&self, operation: Operation, report: Option<Report>) -> impl Future<Output = Reply> + Send + 'static {
        let (tx, rx) = oneshot::channel();
        let job = Job {
            operation,
            reply: tx,
            report,
        };

        let rejected = {
            let mut state = self.inner.state.lock();
            if state.shutdown {
                Some(job)
            } else {
                state.pending.push_back(job);
                None
            }
        };
        match rejected {
            Some(job) => job.settle(Err(RequestError::Cancelled(SHUTDOWN_REASON.to_string()))),
            None => self.inner.wake.notify_one(),
        }

        async move {
            rx.await
                .unwrap_or_else(|_| Err(RequestError::Cancelled(SHUTDOWN_REASON.to_string())))
        }
    }

    /// Abort the running operation and reject everything still queued.
    ///
    /// The queue stays usable for operations enqueued afterwards.
    pub fn cancel_all(&self, reason: &str) {
        let queued: Vec<Job> = {
            let mut state = self.inner.state.lock();
            if let Some(running) = &state.running {
                running.cancel(reason);
            }
            state.pending.drain(..).collect()
        };

        if !queued.is_empty() {
            debug!(
                "Rejecting {} queued request(s) on {}: {}",
                queued.len(),
                self.inner.endpoint,
                reason
            );
        }
        for job in queued {
            job.settle(Err(RequestError::Cancelled(reason.to_string())));
        }
    }

    /// Number of operations waiting behind the running one.
    pub fn queued_len(&self) -> usize {
        self.inner.state.lock().pending.len()
    }
}

impl Drop for RequestQueue {
    fn drop(&mut self) {
        self.inner.state.lock().shutdown = true;
        self.cancel_all(SHUTDOWN_REASON);
        self.inner.wake.notify_one();
    }
}

async fn run_worker(inner: Arc<Inner>) {
    loop {
        let next = {
            let mut state = inner.state.lock();
            match state.pending.pop_front() {
                Some(job) => {
                    let (handle, signal) = CancelHandle::new();
                    state.running = Some(handle);
                    Some((job, signal))
                }
                None if state.shutdown => return,
                None => None,
            }
        };

        let Some((Job { operation, reply, report }, signal)) = next else {
            inner.wake.notified().await;
            continue;
        };

        // The operation sees the same signal the worker races against, so a
        // cancelled operation is dropped even if it ignores its signal.
        let mut abort = signal.clone();
        let outcome = tokio::select! {
            biased;
            reason = abort.cancelled() => Err(RequestError::Cancelled(reason)),
            outcome = operation(signal) => outcome,
        };

        inner.state.lock().running = None;
        settle(reply, report, outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn ok(n: i64) -> Reply {
        Ok(Value::from(n))
    }

    #[tokio::test]
    async fn test_operations_run_in_order() {
        let queue = RequestQueue::new(Endpoint::Control);
        let log = Arc::new(Mutex::new(Vec::new()));

        let futures: Vec<_> = (0..5)
            .map(|i| {
                let log = log.clone();
                queue.enqueue(move |_| async move {
                    log.lock().push(format!("start {}", i));
                    tokio::task::yield_now().await;
                    log.lock().push(format!("end {}", i));
                    ok(i)
                })
            })
            .collect();

        let results = futures::future::join_all(futures).await;
        assert_eq!(results, (0..5).map(ok).collect::<Vec<_>>());

        let expected: Vec<String> = (0..5)
            .flat_map(|i| [format!("start {}", i), format!("end {}", i)])
            .collect();
        assert_eq!(*log.lock(), expected);
    }

    #[tokio::test]
    async fn test_never_two_in_flight() {
        let queue = RequestQueue::new(Endpoint::Spectrum);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let futures: Vec<_> = (0..8)
            .map(|i| {
                let active = active.clone();
                let peak = peak.clone();
                queue.enqueue(move |_| async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    ok(i)
                })
            })
            .collect();

        futures::future::join_all(futures).await;
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_all_rejects_running_and_queued() {
        let queue = RequestQueue::new(Endpoint::Control);
        let (started_tx, started_rx) = oneshot::channel::<()>();

        let running = queue.enqueue(move |_| async move {
            let _ = started_tx.send(());
            futures::future::pending::<Reply>().await
        });
        let queued_a = queue.enqueue(|_| async { ok(1) });
        let queued_b = queue.enqueue(|_| async { ok(2) });

        started_rx.await.unwrap();
        assert_eq!(queue.queued_len(), 2);
        queue.cancel_all("disconnected");

        let cancelled = Err(RequestError::Cancelled("disconnected".to_string()));
        assert_eq!(running.await, cancelled);
        assert_eq!(queued_a.await, cancelled);
        assert_eq!(queued_b.await, cancelled);

        // Fresh work still runs.
        assert_eq!(queue.enqueue(|_| async { ok(3) }).await, ok(3));
    }

    #[tokio::test]
    async fn test_operation_observes_cancel_signal() {
        let queue = RequestQueue::new(Endpoint::Control);
        let (seen_tx, seen_rx) = oneshot::channel::<bool>();
        let (started_tx, started_rx) = oneshot::channel::<()>();

        let running = queue.enqueue(move |mut signal| async move {
            let _ = started_tx.send(());
            let reason = signal.cancelled().await;
            let _ = seen_tx.send(signal.is_cancelled());
            Err(RequestError::Cancelled(reason))
        });

        started_rx.await.unwrap();
        queue.cancel_all("stop");
        assert!(running.await.unwrap_err().is_cancelled());
        // The worker may drop the operation before it reports back.
        if let Ok(seen) = seen_rx.await {
            assert!(seen);
        }
    }

    #[tokio::test]
    async fn test_report_runs_without_awaiting() {
        let queue = RequestQueue::new(Endpoint::Control);
        let (report_tx, mut report_rx) = tokio::sync::mpsc::unbounded_channel();

        let tx = report_tx.clone();
        drop(queue.enqueue_reported(|_| async { ok(7) }, move |outcome| {
            let _ = tx.send(outcome.clone());
        }));
        let blocked = queue.enqueue(|_| futures::future::pending::<Reply>());
        let tx = report_tx.clone();
        drop(queue.enqueue_reported(|_| async { ok(8) }, move |outcome| {
            let _ = tx.send(outcome.clone());
        }));

        assert_eq!(report_rx.recv().await, Some(ok(7)));
        queue.cancel_all("gone");
        assert!(blocked.await.unwrap_err().is_cancelled());
        assert_eq!(
            report_rx.recv().await,
            Some(Err(RequestError::Cancelled("gone".to_string())))
        );
        assert!(report_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dropped_queue_rejects_pending() {
        let queue = RequestQueue::new(Endpoint::Control);
        let blocked = queue.enqueue(|_| futures::future::pending::<Reply>());
        let waiting = queue.enqueue(|_| async { ok(1) });
        drop(queue);
        assert!(blocked.await.unwrap_err().is_cancelled());
        assert!(waiting.await.unwrap_err().is_cancelled());
    }
}
