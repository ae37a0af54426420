//! Configuration schema definitions for testrelay.
//!
//! This module defines all configuration types that can be deserialized from
//! TOML configuration files.
//!
//! # Schema Overview
//!
//! ```text
//! Config (root)
//! ├── StorageSettings        - Where the collector lives and who we are
//! ├── DeliveryConfig         - Worker pool size, deadlines, drain grace
//! └── RunMetadata            - Run-level fields copied into every document
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration structure for testrelay.
///
/// # TOML Structure
///
/// ```toml
/// [storage]
/// host = "10.0.0.5"
/// port = "8080"
/// path = "api/report"
/// path_end = "api/report/end"
/// queue_task_id = 42
///
/// [delivery]
/// max_parallel = 10
///
/// [run]
/// target_application = "shop"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Collector location and run identity.
    pub storage: StorageSettings,

    /// Delivery pacing (optional, has defaults).
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Run-level metadata (optional, has defaults).
    #[serde(default)]
    pub run: RunMetadata,
}

/// Unresolved collector connection settings.
///
/// These are turned into a [`StorageConfig`](crate::endpoint::StorageConfig)
/// with both URLs computed before any delivery starts. A missing `host` is a
/// configuration error at that point, not here, so that launcher-supplied
/// parameters can still fill it in.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageSettings {
    /// URL scheme. Defaults to `http` when absent.
    pub protocol: Option<String>,

    /// Collector host name or IPv4 address.
    pub host: Option<String>,

    /// Collector port. Only used for IPv4 and `localhost` hosts.
    pub port: Option<String>,

    /// Path receiving one request per case result.
    pub path: String,

    /// Path receiving the end-of-run status signal.
    pub path_end: String,

    /// Identifier of the run on the collector side.
    pub queue_task_id: u64,

    #[serde(default)]
    pub user_id: i64,

    #[serde(default)]
    pub job_id: i64,

    #[serde(default = "default_user_name")]
    pub user_name: String,
}

fn default_user_name() -> String {
    "tester".to_string()
}

/// Storage identity handed over by a CI launcher as JSON.
///
/// Field names follow the collector's wire format.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InterfaceParams {
    pub queue_task_id: Option<u64>,
    #[serde(rename = "http_server")]
    pub host: Option<String>,
    #[serde(rename = "http_port")]
    pub port: Option<String>,
    pub user_id: Option<i64>,
    pub job_id: Option<i64>,
}

impl InterfaceParams {
    /// Copies every present field over the given settings.
    pub fn apply_to(self, storage: &mut StorageSettings) {
        if let Some(id) = self.queue_task_id {
            storage.queue_task_id = id;
        }
        if let Some(host) = self.host {
            storage.host = Some(host);
        }
        if let Some(port) = self.port {
            storage.port = Some(port);
        }
        if let Some(user_id) = self.user_id {
            storage.user_id = user_id;
        }
        if let Some(job_id) = self.job_id {
            storage.job_id = job_id;
        }
    }
}

/// Delivery pacing settings.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `max_parallel` | 10 |
/// | `collect_timeout_secs` | 5 |
/// | `shutdown_grace_secs` | 2 |
/// | `request_timeout_secs` | 30 |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeliveryConfig {
    /// Number of uploads allowed in flight at once.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Deadline for each submitted upload, counted from submission.
    ///
    /// An upload that has not answered by then is counted as failed for the
    /// current pass.
    #[serde(default = "default_collect_timeout")]
    pub collect_timeout_secs: u64,

    /// Time granted to in-flight uploads once the pool stops accepting work.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,

    /// HTTP client timeout for a single request.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_max_parallel() -> usize {
    10
}

fn default_collect_timeout() -> u64 {
    5
}

fn default_shutdown_grace() -> u64 {
    2
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            collect_timeout_secs: default_collect_timeout(),
            shutdown_grace_secs: default_shutdown_grace(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl DeliveryConfig {
    pub fn collect_timeout(&self) -> Duration {
        Duration::from_secs(self.collect_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Run-level metadata resolved once per process.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RunMetadata {
    pub target_version: Option<String>,
    pub target_application: Option<String>,
    pub test_project_name: Option<String>,

    /// Version of the test code itself, stamped on every case.
    #[serde(default = "default_test_version")]
    pub test_version: String,
}

fn default_test_version() -> String {
    "0.0".to_string()
}

impl Default for RunMetadata {
    fn default() -> Self {
        Self {
            target_version: None,
            target_application: None,
            test_project_name: None,
            test_version: default_test_version(),
        }
    }
}
