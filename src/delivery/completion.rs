//! End-of-run status signal.

use std::fmt;
use std::sync::Arc;

use tracing::{error, info};

use super::dispatcher::Dispatcher;
use super::retry::RetryCoordinator;
use super::transport::Transport;
use super::{Payload, PayloadResult};
use crate::endpoint::StorageConfig;

/// Aggregate outcome reported to the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Failure,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Failure => "failure",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One aggregate signal per run, posted to the end-of-run URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionSignal {
    pub queue_task_id: u64,
    pub status: RunStatus,
    pub error: Option<String>,
}

impl CompletionSignal {
    /// Builds the signal from the number of case results that failed both
    /// delivery attempts.
    pub fn from_failed_count(queue_task_id: u64, failed: usize) -> Self {
        if failed == 0 {
            Self {
                queue_task_id,
                status: RunStatus::Success,
                error: None,
            }
        } else {
            Self {
                queue_task_id,
                status: RunStatus::Failure,
                error: Some(format!("{} case results failed to transmit", failed)),
            }
        }
    }
}

impl Payload for CompletionSignal {
    fn describe(&self) -> String {
        format!("completion signal for queue task {}", self.queue_task_id)
    }

    fn form_fields(&self, _storage: &StorageConfig) -> PayloadResult<Vec<(&'static str, String)>> {
        let mut fields = vec![
            ("queue_task_id", self.queue_task_id.to_string()),
            ("status", self.status.to_string()),
        ];
        if let Some(error) = &self.error {
            fields.push(("error", error.clone()));
        }
        Ok(fields)
    }
}

/// Sends the [`CompletionSignal`] with one retry.
pub struct CompletionNotifier<'a, T> {
    dispatcher: &'a Dispatcher<T>,
}

impl<'a, T: Transport> CompletionNotifier<'a, T> {
    pub fn new(dispatcher: &'a Dispatcher<T>) -> Self {
        Self { dispatcher }
    }

    /// Posts `signal` to the end-of-run URL.
    ///
    /// Returns whether the collector acknowledged it. A final failure is
    /// only logged.
    pub async fn notify(&self, signal: CompletionSignal) -> bool {
        let url = self.dispatcher.storage().end_url().to_string();
        let status = signal.status;

        let (report, _) = RetryCoordinator::new(self.dispatcher)
            .deliver_with_retry(&url, vec![Arc::new(signal)])
            .await;

        if report.all_succeeded() {
            info!("Sent run status '{}' to {}", status, url);
            true
        } else {
            error!("Failed to send run status '{}' to {}", status, url);
            false
        }
    }
}
