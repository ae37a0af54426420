//! Per-run delivery pipeline.
//!
//! This module drives one run from raw execution events to the final
//! end-of-run signal.
//!
//! # Architecture
//!
//! ```text
//!  Vec<ExecutionEvent> ──► assemble() ──► Vec<ResultRecord>
//!                                               │
//!                                               │ wrap as CaseUpload
//!                                               ▼
//!                               Dispatcher::submit() x N      (first pass)
//!                                               │
//!                               Dispatcher::collect()
//!                                               │ failures only
//!                                               ▼
//!                          RetryCoordinator::resubmit()       (second pass)
//!                                               │
//!                               Dispatcher::collect()
//!                                               │ failed_count
//!                                               ▼
//!                         CompletionNotifier::notify()  ──►  end-of-run URL
//!                                               │
//!                               Dispatcher::shutdown(grace)
//! ```
//!
//! # State Machine
//!
//! Every run walks the states of [`PipelineState`] in order, without
//! skipping any, even with zero records or zero failures:
//!
//! ```text
//! Collecting → FirstPassSubmitted → FirstPassCollected → RetrySubmitted
//!   → RetryCollected → CompletionSent → Draining → Done
//! ```
//!
//! # Example
//!
//! ```no_run
//! use testrelay::config::load_config;
//! use testrelay::event::load_events;
//! use testrelay::pipeline::DeliveryPipeline;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config(std::path::Path::new("testrelay.toml"))?;
//!     let events = load_events(std::path::Path::new("events.json"))?;
//!
//!     let report = DeliveryPipeline::from_config(&config)?.deliver(&events).await;
//!     std::process::exit(report.exit_code());
//! }
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::{Config, DeliveryConfig, RunMetadata};
use crate::delivery::{
    CaseUpload, CompletionNotifier, CompletionSignal, Dispatcher, HttpTransport, RetryCoordinator,
    RetryPhase, RetryStats, RunStatus, ShutdownOutcome, Transport,
};
use crate::endpoint::StorageConfig;
use crate::event::{ExecutionEvent, MetadataIndex};
use crate::record::assemble;

/// Stage of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Collecting,
    FirstPassSubmitted,
    FirstPassCollected,
    RetrySubmitted,
    RetryCollected,
    CompletionSent,
    Draining,
    Done,
}

impl PipelineState {
    /// Every state, in the order a run visits them.
    pub const SEQUENCE: [PipelineState; 8] = [
        PipelineState::Collecting,
        PipelineState::FirstPassSubmitted,
        PipelineState::FirstPassCollected,
        PipelineState::RetrySubmitted,
        PipelineState::RetryCollected,
        PipelineState::CompletionSent,
        PipelineState::Draining,
        PipelineState::Done,
    ];
}

impl From<RetryPhase> for PipelineState {
    fn from(phase: RetryPhase) -> Self {
        match phase {
            RetryPhase::FirstPassSubmitted => PipelineState::FirstPassSubmitted,
            RetryPhase::FirstPassCollected => PipelineState::FirstPassCollected,
            RetryPhase::RetrySubmitted => PipelineState::RetrySubmitted,
            RetryPhase::RetryCollected => PipelineState::RetryCollected,
        }
    }
}

/// What one pipeline invocation observed.
///
/// # Exit Codes
///
/// | Code | Meaning |
/// |------|---------|
/// | 0 | Every case result and the run status reached the collector |
/// | 1 | Some case results were lost, or the run status was not acknowledged |
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Number of case records assembled.
    pub records: usize,

    /// Per-pass delivery counts for case records.
    pub stats: RetryStats,

    /// Status sent in the end-of-run signal.
    pub status: RunStatus,

    /// Whether the collector acknowledged the end-of-run signal.
    pub completion_sent: bool,

    pub shutdown: ShutdownOutcome,

    /// States visited, in order.
    pub states: Vec<PipelineState>,

    /// Wall-clock duration of the whole run.
    pub duration: Duration,
}

impl RunReport {
    /// Case record uploads, retries included.
    pub fn record_submissions(&self) -> usize {
        self.stats.submissions()
    }

    /// Case records that failed both delivery attempts.
    pub fn failed(&self) -> usize {
        self.stats.failed
    }

    pub fn success(&self) -> bool {
        self.stats.failed == 0 && self.completion_sent
    }

    pub fn exit_code(&self) -> i32 {
        if self.success() { 0 } else { 1 }
    }
}

/// Delivers one run's results to the collector.
///
/// # Type Parameters
///
/// - `T`: The transport used for every upload
pub struct DeliveryPipeline<T> {
    dispatcher: Dispatcher<T>,
    run: Arc<RunMetadata>,
    metadata: MetadataIndex,
    shutdown_grace: Duration,
    states: Vec<PipelineState>,
}

impl DeliveryPipeline<HttpTransport> {
    /// Builds a pipeline with an HTTP transport from a loaded configuration.
    ///
    /// # Errors
    ///
    /// Fails if the collector endpoints cannot be resolved or the HTTP client
    /// cannot be created. Nothing has been sent at that point.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let storage = StorageConfig::resolve(&config.storage)
            .context("Invalid remote storage configuration")?;
        let transport = HttpTransport::new(config.delivery.request_timeout())
            .context("Failed to set up HTTP transport")?;

        Ok(Self::new(Arc::new(transport), storage, &config.delivery)
            .with_run_metadata(config.run.clone()))
    }
}

impl<T: Transport> DeliveryPipeline<T> {
    pub fn new(transport: Arc<T>, storage: StorageConfig, config: &DeliveryConfig) -> Self {
        Self {
            dispatcher: Dispatcher::new(transport, Arc::new(storage), config),
            run: Arc::new(RunMetadata::default()),
            metadata: MetadataIndex::default(),
            shutdown_grace: config.shutdown_grace(),
            states: Vec::with_capacity(PipelineState::SEQUENCE.len()),
        }
    }

    pub fn with_run_metadata(mut self, run: RunMetadata) -> Self {
        self.run = Arc::new(run);
        self
    }

    /// Sidecar metadata looked up for every event.
    pub fn with_metadata(mut self, metadata: MetadataIndex) -> Self {
        self.metadata = metadata;
        self
    }

    /// Overrides the per-upload deadline.
    pub fn with_collect_timeout(mut self, timeout: Duration) -> Self {
        self.dispatcher = self.dispatcher.with_collect_timeout(timeout);
        self
    }

    /// Cuts the final drain short once `interrupt` is cancelled.
    pub fn with_interrupt(mut self, interrupt: CancellationToken) -> Self {
        self.dispatcher = self.dispatcher.with_interrupt(interrupt);
        self
    }

    /// Delivers every event and reports the outcome.
    ///
    /// Consumes the pipeline: its worker pool is shut down before returning.
    pub async fn deliver(mut self, events: &[ExecutionEvent]) -> RunReport {
        let start = Instant::now();
        enter(&mut self.states, PipelineState::Collecting);

        let payloads: Vec<Arc<CaseUpload>> = events
            .iter()
            .map(|event| {
                let record = assemble(event, self.metadata.lookup(event), &self.run.test_version);
                debug!("Test case details about to send: {:?}", record);
                Arc::new(CaseUpload::new(record, Arc::clone(&self.run)))
            })
            .collect();

        let records = payloads.len();
        let url = self.dispatcher.storage().submit_url().to_string();
        info!("Submitting {} case results to {}", records, url);

        let states = &mut self.states;
        let (_, stats) = RetryCoordinator::new(&self.dispatcher)
            .deliver_observed(&url, payloads, |phase| enter(states, phase.into()))
            .await;

        if stats.failed > 0 {
            error!(
                "There are {} cases failed to upload to remote storage.",
                stats.failed
            );
        } else {
            info!("All test results have been successfully transmitted to remote storage.");
        }

        let signal =
            CompletionSignal::from_failed_count(self.dispatcher.storage().queue_task_id(), stats.failed);
        let status = signal.status;
        let completion_sent = CompletionNotifier::new(&self.dispatcher).notify(signal).await;
        enter(&mut self.states, PipelineState::CompletionSent);

        enter(&mut self.states, PipelineState::Draining);
        let shutdown = self.dispatcher.shutdown(self.shutdown_grace).await;
        enter(&mut self.states, PipelineState::Done);

        RunReport {
            records,
            stats,
            status,
            completion_sent,
            shutdown,
            states: self.states,
            duration: start.elapsed(),
        }
    }

    /// Delivers every event; the outcome is only logged.
    pub async fn generate_report(self, events: &[ExecutionEvent]) {
        let report = self.deliver(events).await;
        debug!("Run finished: {:?}", report);
    }
}

fn enter(states: &mut Vec<PipelineState>, state: PipelineState) {
    debug!("Pipeline state: {:?}", state);
    states.push(state);
}

/// Delivers `events` to the collector described by `storage` with default
/// delivery settings over HTTP.
///
/// Never fails: problems are logged.
pub async fn generate_report(events: &[ExecutionEvent], storage: StorageConfig) {
    let config = DeliveryConfig::default();
    let transport = match HttpTransport::new(config.request_timeout()) {
        Ok(transport) => transport,
        Err(e) => {
            error!("Cannot deliver test results: {}", e);
            return;
        }
    };

    DeliveryPipeline::new(Arc::new(transport), storage, &config)
        .generate_report(events)
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageSettings;
    use crate::delivery::transport::mock::{MockTransport, Reply};
    use crate::event::CaseMetadata;
    use crate::record::{CaseStatus, ConfigurationPhase};

    const SUBMIT_URL: &str = "http://10.0.0.5:8080/report";
    const END_URL: &str = "http://10.0.0.5:8080/report/end";

    fn storage() -> StorageConfig {
        StorageConfig::resolve(&StorageSettings {
            protocol: None,
            host: Some("10.0.0.5".to_string()),
            port: Some("8080".to_string()),
            path: "report".to_string(),
            path_end: "report/end".to_string(),
            queue_task_id: 42,
            user_id: 3,
            job_id: 2,
            user_name: "tester".to_string(),
        })
        .unwrap()
    }

    fn event(name: &str) -> ExecutionEvent {
        ExecutionEvent {
            method_name: name.to_string(),
            class_name: Some("com.shop.LoginTest".to_string()),
            test_name: Some("smoke".to_string()),
            suite_name: Some("nightly".to_string()),
            start_millis: 1_420_070_400_000,
            end_millis: 1_420_070_400_100,
            status: CaseStatus::Pass,
            outputs: Vec::new(),
            phase: ConfigurationPhase::Test,
            date_millis: None,
        }
    }

    fn pipeline(transport: &Arc<MockTransport>) -> DeliveryPipeline<MockTransport> {
        let config = DeliveryConfig {
            shutdown_grace_secs: 1,
            ..Default::default()
        };
        DeliveryPipeline::new(Arc::clone(transport), storage(), &config)
            .with_collect_timeout(Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_one_transient_failure_is_recovered() {
        let transport = Arc::new(
            MockTransport::new().script("B", [Reply::Error("connection reset".to_string())]),
        );

        let events = vec![event("A"), event("B"), event("C")];
        let report = pipeline(&transport).deliver(&events).await;

        assert_eq!(transport.calls_to(SUBMIT_URL).len(), 4);
        assert_eq!(report.record_submissions(), 4);
        assert_eq!(report.failed(), 0);
        assert_eq!(report.stats.recovered, 1);

        let names: Vec<_> = transport
            .calls_to(SUBMIT_URL)
            .iter()
            .map(|c| c.field("testcase_no").unwrap_or_default().to_string())
            .collect();
        assert_eq!(names.iter().filter(|n| *n == "B").count(), 2);
        assert_eq!(names.last().map(String::as_str), Some("B"));

        let end = transport.calls_to(END_URL);
        assert_eq!(end.len(), 1);
        assert_eq!(end[0].field("queue_task_id"), Some("42"));
        assert_eq!(end[0].field("status"), Some("success"));
        assert_eq!(end[0].field("error"), None);

        assert!(report.success());
        assert_eq!(report.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_persistent_failure_is_signalled() {
        let transport = Arc::new(
            MockTransport::new().script("A", [Reply::Status(500), Reply::Status(500)]),
        );

        let report = pipeline(&transport).deliver(&[event("A")]).await;

        assert_eq!(transport.calls_to(SUBMIT_URL).len(), 2);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.status, RunStatus::Failure);

        let end = transport.calls_to(END_URL);
        assert_eq!(end[0].field("status"), Some("failure"));
        assert_eq!(
            end[0].field("error"),
            Some("1 case results failed to transmit")
        );
        assert_eq!(report.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_late_success_does_not_count() {
        let transport = Arc::new(MockTransport::new().script(
            "A",
            [
                Reply::Delayed(Duration::from_millis(500), 200),
                Reply::Status(500),
            ],
        ));

        let report = pipeline(&transport).deliver(&[event("A")]).await;

        // The first attempt answers 200 after its deadline and is ignored.
        assert_eq!(report.stats.first_pass_failed, 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.status, RunStatus::Failure);
    }

    #[tokio::test]
    async fn test_every_state_visited_without_records() {
        let transport = Arc::new(MockTransport::new());

        let report = pipeline(&transport).deliver(&[]).await;

        assert_eq!(report.states, PipelineState::SEQUENCE.to_vec());
        assert_eq!(report.records, 0);
        assert!(transport.calls_to(SUBMIT_URL).is_empty());
        assert_eq!(transport.calls_to(END_URL).len(), 1);
        assert_eq!(report.shutdown, ShutdownOutcome::Drained);
    }

    #[tokio::test]
    async fn test_submissions_between_n_and_2n() {
        let transport = Arc::new(
            MockTransport::new()
                .script("A", [Reply::Error("refused".into())])
                .script("C", [Reply::Status(404), Reply::Status(404)]),
        );

        let events: Vec<_> = ["A", "B", "C", "D"].into_iter().map(event).collect();
        let report = pipeline(&transport).deliver(&events).await;

        let submissions = transport.calls_to(SUBMIT_URL).len();
        assert!(submissions >= events.len() && submissions <= 2 * events.len());
        assert_eq!(submissions, 6);
        assert_eq!(report.failed(), 1);

        // First-pass successes are never resubmitted.
        let b_calls = transport
            .calls_to(SUBMIT_URL)
            .iter()
            .filter(|c| c.field("testcase_no") == Some("B"))
            .count();
        assert_eq!(b_calls, 1);
    }

    #[tokio::test]
    async fn test_metadata_and_run_fields_are_uploaded() {
        let transport = Arc::new(MockTransport::new());
        let metadata = MetadataIndex::new().with_entry(
            "com.shop.LoginTest.A",
            CaseMetadata {
                description: Some("valid login".to_string()),
                expected: Some("dashboard".to_string()),
                bug: None,
            },
        );
        let run = RunMetadata {
            target_application: Some("shop".to_string()),
            test_version: "3.4".to_string(),
            ..Default::default()
        };

        pipeline(&transport)
            .with_metadata(metadata)
            .with_run_metadata(run)
            .generate_report(&[event("A")])
            .await;

        let calls = transport.calls_to(SUBMIT_URL);
        assert_eq!(calls[0].field("testdescription"), Some("valid login"));
        assert_eq!(calls[0].field("expect_result"), Some("dashboard"));
        assert_eq!(calls[0].field("testsuite_no"), Some("nightly"));

        let doc: serde_json::Value =
            serde_json::from_str(calls[0].field("other_info").unwrap()).unwrap();
        assert_eq!(doc["targetApplication"], "shop");
        assert_eq!(doc["testDateTime"], "2015-01-01T08:00:00");
        assert_eq!(doc["suite"][0]["suite"][0]["class"][0]["case"][0]["version"], "3.4");
    }

    #[tokio::test]
    async fn test_interrupt_cuts_drain_short() {
        let interrupt = CancellationToken::new();
        let transport = Arc::new(
            MockTransport::new().script(
                "A",
                [
                    Reply::Delayed(Duration::from_secs(30), 200),
                    Reply::Delayed(Duration::from_secs(30), 200),
                ],
            ),
        );
        let config = DeliveryConfig {
            shutdown_grace_secs: 30,
            ..Default::default()
        };
        let pipeline = DeliveryPipeline::new(Arc::clone(&transport), storage(), &config)
            .with_collect_timeout(Duration::from_millis(100))
            .with_interrupt(interrupt.clone());

        interrupt.cancel();
        let report = pipeline.deliver(&[event("A")]).await;

        // Both attempts of "A" are still hanging when the drain starts.
        assert_eq!(report.shutdown, ShutdownOutcome::Interrupted { outstanding: 2 });
        assert!(report.duration < Duration::from_secs(10));
        assert_eq!(report.states, PipelineState::SEQUENCE.to_vec());
        assert_eq!(report.failed(), 1);
    }

    #[tokio::test]
    async fn test_unacknowledged_completion_fails_run() {
        let transport = Arc::new(
            MockTransport::new().script(END_URL, [Reply::Status(500), Reply::Status(500)]),
        );

        let report = pipeline(&transport).deliver(&[event("A")]).await;

        assert_eq!(report.failed(), 0);
        assert!(!report.completion_sent);
        assert_eq!(transport.calls_to(END_URL).len(), 2);
        assert_eq!(report.exit_code(), 1);
    }
}
