//! Case result records and the assembler that produces them.
//!
//! A [`ResultRecord`] is the immutable description of one executed test
//! method. Records are assembled from an [`ExecutionEvent`] plus the
//! optional sidecar [`CaseMetadata`], and are then wrapped into a
//! [`RunDocument`](document::RunDocument) for upload.
//!
//! ```text
//! ExecutionEvent ─┐
//!                 ├─ assemble() ──► ResultRecord ──► RunDocument ──► collector
//! CaseMetadata ───┘
//! ```

pub mod document;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::event::{CaseMetadata, ExecutionEvent};

pub use document::{CaseResult, ClassResult, RunDocument, SuiteResult, TestResult};

/// Hours east of UTC used for every rendered timestamp.
///
/// The collector stores local date-times without a zone and expects them at
/// this fixed offset, independent of the host's timezone.
const COLLECTOR_UTC_OFFSET_HOURS: i32 = 8;

/// Outcome of a test method as reported by the test framework.
///
/// On the wire the collector expects the framework's numeric codes; see
/// [`code`](Self::code).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseStatus {
    #[serde(alias = "passed", alias = "success")]
    Pass,
    #[serde(alias = "failed", alias = "failure", alias = "error")]
    Fail,
    #[serde(alias = "skipped")]
    Skip,
}

impl CaseStatus {
    /// Numeric status code understood by the collector.
    pub fn code(self) -> i32 {
        match self {
            CaseStatus::Pass => 1,
            CaseStatus::Fail => 2,
            CaseStatus::Skip => 3,
        }
    }

    pub fn is_success(self) -> bool {
        self == CaseStatus::Pass
    }
}

/// Lifecycle phase a method ran in.
///
/// Everything except [`Test`](Self::Test) is a setup or teardown step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfigurationPhase {
    BeforeSuite,
    BeforeTest,
    BeforeClass,
    BeforeMethod,
    BeforeGroups,
    #[default]
    Test,
    AfterGroups,
    AfterMethod,
    AfterClass,
    AfterTest,
    AfterSuite,
}

impl ConfigurationPhase {
    /// Returns `true` for setup and teardown phases.
    pub fn is_configuration(self) -> bool {
        self != ConfigurationPhase::Test
    }
}

/// Every value needed to build a [`ResultRecord`].
///
/// Optional fields left as `None` are omitted from the uploaded document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFields {
    pub case_name: String,
    pub suite_name: Option<String>,
    pub test_name: Option<String>,
    pub class_name: Option<String>,
    pub duration_ms: u64,
    pub status: Option<CaseStatus>,
    pub outputs: Vec<String>,
    pub phase: ConfigurationPhase,
    pub bug: Option<String>,
    pub case_description: Option<String>,
    pub expected_result: Option<String>,
    pub date_time: Option<String>,
    pub version: String,
}

/// Immutable result of one test case.
///
/// Construct with [`ResultRecord::new`] or [`assemble`]. Once built, a
/// record is only read; pipelines share it behind an `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord {
    case_name: String,
    suite_name: Option<String>,
    test_name: Option<String>,
    class_name: Option<String>,
    duration_ms: u64,
    status: CaseStatus,
    outputs: Vec<String>,
    phase: ConfigurationPhase,
    bug: Option<String>,
    case_description: Option<String>,
    expected_result: Option<String>,
    date_time: Option<String>,
    version: String,
}

impl ResultRecord {
    /// Builds a record from a fully populated field set.
    ///
    /// A missing status is recorded as a failure.
    pub fn new(fields: RecordFields) -> Self {
        Self {
            case_name: fields.case_name,
            suite_name: fields.suite_name,
            test_name: fields.test_name,
            class_name: fields.class_name,
            duration_ms: fields.duration_ms,
            status: fields.status.unwrap_or(CaseStatus::Fail),
            outputs: fields.outputs,
            phase: fields.phase,
            bug: fields.bug,
            case_description: fields.case_description,
            expected_result: fields.expected_result,
            date_time: fields.date_time,
            version: fields.version,
        }
    }

    pub fn case_name(&self) -> &str {
        &self.case_name
    }

    pub fn suite_name(&self) -> Option<&str> {
        self.suite_name.as_deref()
    }

    pub fn test_name(&self) -> Option<&str> {
        self.test_name.as_deref()
    }

    pub fn class_name(&self) -> Option<&str> {
        self.class_name.as_deref()
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn status(&self) -> CaseStatus {
        self.status
    }

    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    pub fn phase(&self) -> ConfigurationPhase {
        self.phase
    }

    pub fn is_configuration(&self) -> bool {
        self.phase.is_configuration()
    }

    pub fn bug(&self) -> Option<&str> {
        self.bug.as_deref()
    }

    pub fn case_description(&self) -> Option<&str> {
        self.case_description.as_deref()
    }

    pub fn expected_result(&self) -> Option<&str> {
        self.expected_result.as_deref()
    }

    /// Execution timestamp rendered for the collector.
    pub fn date_time(&self) -> Option<&str> {
        self.date_time.as_deref()
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

/// Renders epoch milliseconds as a collector timestamp.
///
/// Sub-second precision is truncated and the result is the local date-time at
/// UTC+8 without a zone suffix. Returns `None` for instants chrono cannot
/// represent.
///
/// ```
/// use testrelay::record::format_timestamp;
///
/// assert_eq!(format_timestamp(1420070400000).as_deref(), Some("2015-01-01T08:00:00"));
/// ```
pub fn format_timestamp(epoch_millis: i64) -> Option<String> {
    let offset = FixedOffset::east_opt(COLLECTOR_UTC_OFFSET_HOURS * 3600)?;
    // Integer division truncates toward zero, matching the collector's clients.
    let instant = DateTime::from_timestamp(epoch_millis / 1000, 0)?;

    Some(
        instant
            .with_timezone(&offset)
            .naive_local()
            .format("%Y-%m-%dT%H:%M:%S")
            .to_string(),
    )
}

/// Converts one execution event into an immutable record.
///
/// `metadata` is the sidecar entry for the event's method, if any. Without
/// it the description and expected result are empty strings and the bug
/// reference is absent. This never fails.
pub fn assemble(
    event: &ExecutionEvent,
    metadata: Option<&CaseMetadata>,
    version: &str,
) -> ResultRecord {
    let (bug, case_description, expected_result) = match metadata {
        Some(meta) => (
            meta.bug.clone(),
            Some(meta.description.clone().unwrap_or_default()),
            Some(meta.expected.clone().unwrap_or_default()),
        ),
        None => (None, Some(String::new()), Some(String::new())),
    };

    ResultRecord::new(RecordFields {
        case_name: event.method_name.clone(),
        suite_name: event.suite_name.clone(),
        test_name: event.test_name.clone(),
        class_name: event.class_name.clone(),
        duration_ms: event.duration_ms(),
        status: Some(event.status),
        outputs: event.outputs.clone(),
        phase: event.phase,
        bug,
        case_description,
        expected_result,
        date_time: format_timestamp(event.executed_at()),
        version: version.to_string(),
    })
}
