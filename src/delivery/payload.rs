//! Request bodies sent through the dispatcher.

use std::sync::Arc;

use crate::config::RunMetadata;
use crate::endpoint::StorageConfig;
use crate::record::{ResultRecord, RunDocument};

/// Result type for payload encoding.
pub type PayloadResult<T> = Result<T, PayloadError>;

/// Errors raised while turning a payload into form fields.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    /// The embedded JSON document could not be serialized.
    #[error("Failed to encode document: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Something the dispatcher can upload.
///
/// Payloads are immutable and shared behind an `Arc`, so the retry pass
/// resubmits the very same value.
pub trait Payload: Send + Sync + 'static {
    /// Short label used in log lines.
    fn describe(&self) -> String;

    /// Form fields of the request body.
    fn form_fields(&self, storage: &StorageConfig) -> PayloadResult<Vec<(&'static str, String)>>;
}

/// One case result wrapped in its own run document.
#[derive(Debug, Clone)]
pub struct CaseUpload {
    record: ResultRecord,
    run: Arc<RunMetadata>,
}

impl CaseUpload {
    pub fn new(record: ResultRecord, run: Arc<RunMetadata>) -> Self {
        Self { record, run }
    }

    pub fn record(&self) -> &ResultRecord {
        &self.record
    }
}

impl Payload for CaseUpload {
    fn describe(&self) -> String {
        match self.record.class_name() {
            Some(class) => format!("{}.{}", class, self.record.case_name()),
            None => self.record.case_name().to_string(),
        }
    }

    fn form_fields(&self, storage: &StorageConfig) -> PayloadResult<Vec<(&'static str, String)>> {
        let document = RunDocument::for_record(&self.record, &self.run, storage.queue_task_id());
        let record = &self.record;

        Ok(vec![
            ("info_type", "json".to_string()),
            ("other_info", serde_json::to_string(&document)?),
            ("queue_task_id", storage.queue_task_id().to_string()),
            ("task_id", storage.job_id().to_string()),
            ("user_id", storage.user_id().to_string()),
            ("user_name", storage.user_name().to_string()),
            ("script_name", record.case_name().to_string()),
            ("testcase_no", record.case_name().to_string()),
            (
                "testsuite_no",
                record.suite_name().unwrap_or_default().to_string(),
            ),
            (
                "testdescription",
                record.case_description().unwrap_or_default().to_string(),
            ),
            (
                "expect_result",
                record.expected_result().unwrap_or_default().to_string(),
            ),
            ("actual_result", "n/a".to_string()),
            ("is_success", record.status().code().to_string()),
            ("run_time", record.duration_ms().to_string()),
        ])
    }
}
