//! Execution events and per-method metadata.
//!
//! An [`ExecutionEvent`] is what a test framework tells us about one invoked
//! method. Declarative details that a framework would carry as annotations
//! (bug reference, description, expected result) live in a separate
//! [`MetadataIndex`] keyed by method identifier, so the pipeline never needs
//! to introspect test declarations.
//!
//! # Sources
//!
//! | Source | Loader |
//! |--------|--------|
//! | JSON array of events | [`load_events`] / [`parse_events`] |
//! | JUnit XML report | [`junit::parse_junit_events`] |
//! | TOML metadata map | [`MetadataIndex::load`] |

pub mod junit;

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::record::{CaseStatus, ConfigurationPhase};

/// Result type for event loading.
pub type EventResult<T> = Result<T, EventError>;

/// Errors that can occur while reading events or metadata.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// I/O error reading a source file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The JSON event list is malformed.
    #[error("Invalid event list: {0}")]
    Json(#[from] serde_json::Error),

    /// The metadata map is malformed.
    #[error("Invalid metadata file: {0}")]
    Metadata(#[from] toml::de::Error),

    /// A report in another format could not be read.
    #[error("Failed to parse report: {0}")]
    Parse(String),
}

/// One invoked test method as seen by the framework.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub method_name: String,

    #[serde(default)]
    pub class_name: Option<String>,

    #[serde(default)]
    pub test_name: Option<String>,

    #[serde(default)]
    pub suite_name: Option<String>,

    /// Start of the invocation, epoch milliseconds.
    pub start_millis: i64,

    /// End of the invocation, epoch milliseconds.
    pub end_millis: i64,

    pub status: CaseStatus,

    /// Log lines the method reported, in order.
    #[serde(default)]
    pub outputs: Vec<String>,

    #[serde(default)]
    pub phase: ConfigurationPhase,

    /// Invocation date reported by the framework, epoch milliseconds.
    /// Falls back to `end_millis`.
    #[serde(default)]
    pub date_millis: Option<i64>,
}

impl ExecutionEvent {
    /// Fully qualified method identifier, `Class.method` when the class is
    /// known.
    pub fn method_id(&self) -> String {
        match &self.class_name {
            Some(class) if !class.is_empty() => format!("{}.{}", class, self.method_name),
            _ => self.method_name.clone(),
        }
    }

    /// Wall-clock duration, never negative.
    pub fn duration_ms(&self) -> u64 {
        u64::try_from(self.end_millis.saturating_sub(self.start_millis)).unwrap_or(0)
    }

    /// Timestamp stamped on the resulting record.
    pub fn executed_at(&self) -> i64 {
        self.date_millis.unwrap_or(self.end_millis)
    }
}

/// Parses a JSON array of execution events.
pub fn parse_events(content: &str) -> EventResult<Vec<ExecutionEvent>> {
    Ok(serde_json::from_str(content)?)
}

/// Reads a JSON array of execution events from a file.
pub fn load_events(path: &Path) -> EventResult<Vec<ExecutionEvent>> {
    let content = std::fs::read_to_string(path)?;
    parse_events(&content)
}

/// Declarative details attached to a test method.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseMetadata {
    /// Bug ID or description the case is known to be affected by.
    pub bug: Option<String>,

    /// Human-readable description of the case.
    pub description: Option<String>,

    /// Expected result of the case.
    pub expected: Option<String>,
}

/// Sidecar map from method identifier to [`CaseMetadata`].
///
/// # File Format
///
/// ```toml
/// ["com.shop.LoginTest.testLogin"]
/// description = "login with a valid user"
/// expected = "dashboard is shown"
///
/// [testLogout]
/// bug = "SHOP-112"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct MetadataIndex {
    entries: HashMap<String, CaseMetadata>,
}

impl MetadataIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the entry for a method identifier.
    pub fn with_entry(mut self, method_id: impl Into<String>, metadata: CaseMetadata) -> Self {
        self.entries.insert(method_id.into(), metadata);
        self
    }

    /// Parses a TOML metadata map.
    pub fn parse(content: &str) -> EventResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Reads a TOML metadata map from a file.
    pub fn load(path: &Path) -> EventResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Finds the metadata for an event.
    ///
    /// The qualified `Class.method` identifier wins over the bare method name.
    pub fn lookup(&self, event: &ExecutionEvent) -> Option<&CaseMetadata> {
        self.entries
            .get(&event.method_id())
            .or_else(|| self.entries.get(&event.method_name))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
