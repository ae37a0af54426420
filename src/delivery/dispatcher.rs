//! Bounded worker pool that uploads payloads.
//!
//! [`Dispatcher::submit`] returns immediately with a [`DeliveryHandle`]; the
//! upload runs on a spawned task once a pool permit is free. Each handle
//! carries its own deadline, fixed at submission, so a task that is still
//! queued behind a saturated pool can time out too.
//!
//! [`Dispatcher::collect`] waits on handles one after the other, each up to
//! its deadline. A task that answers after its deadline is not cancelled,
//! its result is simply dropped.
//!
//! # Shutdown
//!
//! ```text
//! shutdown(grace)
//!   │ close pool (further submits are rejected)
//!   ├── all tasks finish ─────────────► Drained
//!   ├── interrupt token ─ cancel ─────► Interrupted
//!   └── grace expires ─── cancel ─────► Expired
//! ```
//!
//! The interrupt token belongs to the caller (see
//! [`Dispatcher::with_interrupt`]). The pool never installs signal handlers;
//! a binary that wants Ctrl-C to cut the drain short cancels the token from
//! its own handler.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Semaphore, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};

use super::transport::{Transport, TransportResult};
use super::{CollectionReport, Delivery, FailureReason, Payload};
use crate::config::DeliveryConfig;
use crate::endpoint::StorageConfig;

/// Pending upload of one payload.
///
/// Created by [`Dispatcher::submit`] and consumed by
/// [`Dispatcher::collect`].
#[derive(Debug)]
pub struct DeliveryHandle<P> {
    payload: Arc<P>,
    deadline: Instant,
    outcome: oneshot::Receiver<Delivery>,
}

impl<P> DeliveryHandle<P> {
    pub fn payload(&self) -> &Arc<P> {
        &self.payload
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

/// How the pool came to rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every task finished within the grace period.
    Drained,
    /// The grace period ran out and remaining tasks were cancelled.
    Expired { outstanding: usize },
    /// An interrupt arrived while draining; remaining tasks were cancelled.
    Interrupted { outstanding: usize },
}

/// Concurrent uploader shared by every pass of a run.
pub struct Dispatcher<T> {
    transport: Arc<T>,
    storage: Arc<StorageConfig>,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    cancel: CancellationToken,
    interrupt: CancellationToken,
    collect_timeout: Duration,
    submissions: AtomicUsize,
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(transport: Arc<T>, storage: Arc<StorageConfig>, config: &DeliveryConfig) -> Self {
        Self {
            transport,
            storage,
            permits: Arc::new(Semaphore::new(config.max_parallel.max(1))),
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
            interrupt: CancellationToken::new(),
            collect_timeout: config.collect_timeout(),
            submissions: AtomicUsize::new(0),
        }
    }

    /// Overrides the per-handle deadline.
    pub fn with_collect_timeout(mut self, timeout: Duration) -> Self {
        self.collect_timeout = timeout;
        self
    }

    /// Token that, once cancelled, stops waiting for in-flight tasks during
    /// [`shutdown`](Self::shutdown).
    pub fn with_interrupt(mut self, interrupt: CancellationToken) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn storage(&self) -> &StorageConfig {
        &self.storage
    }

    /// Number of `submit` calls so far, rejected ones included.
    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::Relaxed)
    }

    /// Number of tasks that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_closed(&self) -> bool {
        self.tracker.is_closed()
    }

    /// Starts uploading `payload` to `url` and returns its handle.
    ///
    /// Never blocks on the pool. If the pool is closed or the payload cannot
    /// be encoded the handle resolves to a failure right away.
    pub fn submit<P: Payload>(&self, url: &str, payload: Arc<P>) -> DeliveryHandle<P> {
        let (tx, rx) = oneshot::channel();
        let deadline = Instant::now() + self.collect_timeout;
        self.submissions.fetch_add(1, Ordering::Relaxed);

        let handle = DeliveryHandle {
            payload: Arc::clone(&payload),
            deadline,
            outcome: rx,
        };

        if self.tracker.is_closed() {
            let _ = tx.send(Delivery::Failed(FailureReason::Rejected));
            return handle;
        }

        let fields = match payload.form_fields(&self.storage) {
            Ok(fields) => fields,
            Err(e) => {
                let _ = tx.send(Delivery::Failed(FailureReason::Encode(e.to_string())));
                return handle;
            }
        };

        let transport = Arc::clone(&self.transport);
        let permits = Arc::clone(&self.permits);
        let cancel = self.cancel.clone();
        let url = url.to_string();
        let label = payload.describe();

        self.tracker.spawn(async move {
            let delivery = tokio::select! {
                _ = cancel.cancelled() => Delivery::Failed(FailureReason::Cancelled),
                delivery = async {
                    let Ok(_permit) = permits.acquire_owned().await else {
                        return Delivery::Failed(FailureReason::Rejected);
                    };
                    classify(transport.post_form(&url, &fields).await)
                } => delivery,
            };

            if tx.send(delivery).is_err() {
                debug!("Discarding late result for {}", label);
            }
        });

        handle
    }

    /// Classifies every handle, waiting on each until its deadline.
    ///
    /// Failures are logged with their reason and returned in submission
    /// order; nothing is propagated.
    pub async fn collect<P: Payload>(&self, handles: Vec<DeliveryHandle<P>>) -> CollectionReport<P> {
        let mut report = CollectionReport::default();

        for handle in handles {
            let DeliveryHandle {
                payload,
                deadline,
                outcome,
            } = handle;

            let delivery = match tokio::time::timeout_at(deadline, outcome).await {
                Ok(Ok(delivery)) => delivery,
                Ok(Err(_)) => Delivery::Failed(FailureReason::Dropped),
                Err(_) => Delivery::Failed(FailureReason::TimedOut),
            };

            match delivery {
                Delivery::Succeeded => report.succeeded += 1,
                Delivery::Failed(reason) => {
                    error!(
                        "Failed to upload {} to remote storage: {}",
                        payload.describe(),
                        reason
                    );
                    report.failed.push(payload);
                }
            }
        }

        report
    }

    /// Stops accepting work and drains the pool.
    ///
    /// Waits up to `grace` for in-flight tasks; after that, or once the
    /// interrupt token is cancelled, outstanding tasks are cancelled. An
    /// interrupt is logged, not re-raised.
    pub async fn shutdown(&self, grace: Duration) -> ShutdownOutcome {
        self.tracker.close();

        let outcome = tokio::select! {
            biased;

            _ = self.tracker.wait() => ShutdownOutcome::Drained,
            _ = self.interrupt.cancelled() => {
                let outstanding = self.tracker.len();
                error!(
                    "Reporter service has been interrupted while shutting down, cancelling {} uploads",
                    outstanding
                );
                ShutdownOutcome::Interrupted { outstanding }
            }
            _ = tokio::time::sleep(grace) => {
                let outstanding = self.tracker.len();
                warn!(
                    "Shutdown grace of {:?} expired, cancelling {} uploads",
                    grace, outstanding
                );
                ShutdownOutcome::Expired { outstanding }
            }
        };

        if outcome != ShutdownOutcome::Drained {
            self.cancel.cancel();
            self.tracker.wait().await;
        }

        debug!("Delivery pool drained: {:?}", outcome);
        outcome
    }
}

fn classify(result: TransportResult<u16>) -> Delivery {
    match result {
        Ok(code) if (200..300).contains(&code) => Delivery::Succeeded,
        Ok(code) => Delivery::Failed(FailureReason::Status(code)),
        Err(e) => Delivery::Failed(FailureReason::Transport(e.to_string())),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::StorageSettings;
    use crate::delivery::PayloadResult;
    use crate::delivery::transport::mock::{MockTransport, Reply};

    /// Minimal payload keyed by name.
    #[derive(Debug)]
    pub(crate) struct Named(pub &'static str);

    impl Payload for Named {
        fn describe(&self) -> String {
            self.0.to_string()
        }

        fn form_fields(&self, _: &StorageConfig) -> PayloadResult<Vec<(&'static str, String)>> {
            Ok(vec![("testcase_no", self.0.to_string())])
        }
    }

    struct Unencodable;

    impl Payload for Unencodable {
        fn describe(&self) -> String {
            "unencodable".to_string()
        }

        fn form_fields(&self, _: &StorageConfig) -> PayloadResult<Vec<(&'static str, String)>> {
            let err = serde_json::from_str::<u8>("x").unwrap_err();
            Err(err.into())
        }
    }

    pub(crate) fn storage() -> Arc<StorageConfig> {
        Arc::new(
            StorageConfig::resolve(&StorageSettings {
                protocol: None,
                host: Some("localhost".to_string()),
                port: Some("8080".to_string()),
                path: "submit".to_string(),
                path_end: "end".to_string(),
                queue_task_id: 1,
                user_id: 0,
                job_id: 0,
                user_name: "tester".to_string(),
            })
            .unwrap(),
        )
    }

    fn dispatcher(transport: MockTransport) -> (Dispatcher<MockTransport>, Arc<MockTransport>) {
        let transport = Arc::new(transport);
        let dispatcher = Dispatcher::new(
            Arc::clone(&transport),
            storage(),
            &DeliveryConfig::default(),
        )
        .with_collect_timeout(Duration::from_millis(200));
        (dispatcher, transport)
    }

    #[tokio::test]
    async fn test_collect_classifies_outcomes() {
        let (dispatcher, transport) = dispatcher(
            MockTransport::new()
                .script("ok", [Reply::Status(204)])
                .script("bad", [Reply::Status(500)])
                .script("down", [Reply::Error("refused".to_string())]),
        );

        let handles = ["ok", "bad", "down"]
            .into_iter()
            .map(|name| dispatcher.submit("http://c/submit", Arc::new(Named(name))))
            .collect();
        let report = dispatcher.collect(handles).await;

        assert_eq!(report.succeeded, 1);
        let failed: Vec<_> = report.failed.iter().map(|p| p.0).collect();
        assert_eq!(failed, vec!["bad", "down"]);
        assert_eq!(transport.calls().len(), 3);
        assert_eq!(dispatcher.submissions(), 3);
    }

    #[tokio::test]
    async fn test_late_result_is_discarded() {
        let (dispatcher, _transport) = dispatcher(
            MockTransport::new().script("slow", [Reply::Delayed(Duration::from_millis(600), 200)]),
        );

        let handle = dispatcher.submit("http://c/submit", Arc::new(Named("slow")));
        let report = dispatcher.collect(vec![handle]).await;

        assert_eq!(report.succeeded, 0);
        assert_eq!(report.failed.len(), 1);

        // The task keeps running; its success must not change anything.
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(dispatcher.in_flight(), 0);
        assert_eq!(report.failed.len(), 1);
    }

    #[tokio::test]
    async fn test_encode_failure_counts_as_failed() {
        let (dispatcher, transport) = dispatcher(MockTransport::new());

        let handle = dispatcher.submit("http://c/submit", Arc::new(Unencodable));
        let report = dispatcher.collect(vec![handle]).await;

        assert_eq!(report.failed.len(), 1);
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_rejected() {
        let (dispatcher, transport) = dispatcher(MockTransport::new());

        assert_eq!(
            dispatcher.shutdown(Duration::from_millis(50)).await,
            ShutdownOutcome::Drained
        );
        assert!(dispatcher.is_closed());

        let handle = dispatcher.submit("http://c/submit", Arc::new(Named("late")));
        let report = dispatcher.collect(vec![handle]).await;

        assert_eq!(report.failed.len(), 1);
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_cancels_after_grace() {
        let (dispatcher, _transport) = dispatcher(
            MockTransport::new().script("hang", [Reply::Delayed(Duration::from_secs(30), 200)]),
        );

        let _handle = dispatcher.submit("http://c/submit", Arc::new(Named("hang")));
        let outcome = dispatcher.shutdown(Duration::from_millis(50)).await;

        assert_eq!(outcome, ShutdownOutcome::Expired { outstanding: 1 });
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_interrupt_during_drain_cancels_uploads() {
        let interrupt = CancellationToken::new();
        let (dispatcher, _transport) = dispatcher(
            MockTransport::new().script("hang", [Reply::Delayed(Duration::from_secs(30), 200)]),
        );
        let dispatcher = dispatcher.with_interrupt(interrupt.clone());

        let handle = dispatcher.submit("http://c/submit", Arc::new(Named("hang")));
        let trigger = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            interrupt.cancel();
        });

        let started = Instant::now();
        let outcome = dispatcher.shutdown(Duration::from_secs(10)).await;
        trigger.await.unwrap();

        assert_eq!(outcome, ShutdownOutcome::Interrupted { outstanding: 1 });
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(dispatcher.in_flight(), 0);

        let report = dispatcher.collect(vec![handle]).await;
        assert_eq!(report.failed.len(), 1);
    }

    #[tokio::test]
    async fn test_interrupt_with_nothing_in_flight_is_drained() {
        let interrupt = CancellationToken::new();
        interrupt.cancel();
        let (dispatcher, _transport) = dispatcher(MockTransport::new());
        let dispatcher = dispatcher.with_interrupt(interrupt);

        assert_eq!(
            dispatcher.shutdown(Duration::from_secs(10)).await,
            ShutdownOutcome::Drained
        );
    }

    #[tokio::test]
    async fn test_pool_bounds_concurrency() {
        let transport = Arc::new(
            MockTransport::new()
                .script("a", [Reply::Delayed(Duration::from_millis(150), 200)])
                .script("b", [Reply::Delayed(Duration::from_millis(150), 200)]),
        );
        let config = DeliveryConfig {
            max_parallel: 1,
            ..Default::default()
        };
        let dispatcher = Dispatcher::new(Arc::clone(&transport), storage(), &config)
            .with_collect_timeout(Duration::from_millis(200));

        let handles = vec![
            dispatcher.submit("http://c/submit", Arc::new(Named("a"))),
            dispatcher.submit("http://c/submit", Arc::new(Named("b"))),
        ];
        let report = dispatcher.collect(handles).await;

        // "b" waits for "a" and misses its deadline, which was fixed at submit.
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed[0].0, "b");
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(Ok(200)), Delivery::Succeeded);
        assert_eq!(classify(Ok(299)), Delivery::Succeeded);
        assert_eq!(
            classify(Ok(302)),
            Delivery::Failed(FailureReason::Status(302))
        );
        assert!(!classify(Ok(404)).is_success());
    }
}
