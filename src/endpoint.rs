//! Collector endpoint resolution.
//!
//! Turns the raw [`StorageSettings`] into a [`StorageConfig`] whose submit
//! and end-of-run URLs are computed exactly once. Everything downstream
//! reads the cached strings.
//!
//! # URL Rules
//!
//! | Input | Result |
//! |-------|--------|
//! | protocol absent | `http` |
//! | host is dotted-quad IPv4 or `localhost` | `:<port>` appended |
//! | any other host | port dropped |
//! | path not starting with `/` | `/` prepended |
//!
//! ```
//! use testrelay::endpoint::resolve_url;
//!
//! let url = resolve_url(None, Some("10.0.0.5"), Some("8080"), "report")?;
//! assert_eq!(url, "http://10.0.0.5:8080/report");
//!
//! let url = resolve_url(None, Some("example.com"), Some("8080"), "/report")?;
//! assert_eq!(url, "http://example.com/report");
//! # Ok::<(), testrelay::endpoint::EndpointError>(())
//! ```

use std::sync::LazyLock;

use regex::Regex;

use crate::config::StorageSettings;

static IPV4_HOST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[0-9]{1,3}\.){3}[0-9]{1,3}$").expect("IPv4 host pattern is valid")
});

const DEFAULT_PROTOCOL: &str = "http";

/// Result type for endpoint resolution.
pub type EndpointResult<T> = Result<T, EndpointError>;

/// Errors raised while resolving collector endpoints.
///
/// These are configuration errors: they surface before any delivery starts.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    /// No collector host was configured.
    #[error("Remote storage host must not be empty")]
    MissingHost,
}

/// Builds a collector URL from its parts.
///
/// The port is passed through as given; a non-numeric port is the caller's
/// problem.
///
/// # Errors
///
/// Returns [`EndpointError::MissingHost`] if `host` is absent or blank.
pub fn resolve_url(
    protocol: Option<&str>,
    host: Option<&str>,
    port: Option<&str>,
    path: &str,
) -> EndpointResult<String> {
    let host = host
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or(EndpointError::MissingHost)?;

    Ok(format!("{}{}", server_base(protocol, host, port), rooted(path)))
}

/// Returns `protocol://host[:port]` without a trailing slash.
fn server_base(protocol: Option<&str>, host: &str, port: Option<&str>) -> String {
    let protocol = protocol
        .filter(|p| !p.is_empty())
        .unwrap_or(DEFAULT_PROTOCOL);

    match port.filter(|p| !p.is_empty()) {
        Some(port) if accepts_port(host) => format!("{}://{}:{}", protocol, host, port),
        _ => format!("{}://{}", protocol, host),
    }
}

/// Only literal IPv4 addresses and `localhost` carry an explicit port.
fn accepts_port(host: &str) -> bool {
    host == "localhost" || IPV4_HOST.is_match(host)
}

fn rooted(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

/// Resolved, read-only collector descriptor.
///
/// Shared by every concurrent delivery of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    queue_task_id: u64,
    user_id: i64,
    job_id: i64,
    user_name: String,
    submit_url: String,
    end_url: String,
}

impl StorageConfig {
    /// Resolves both collector URLs from the given settings.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::MissingHost`] if no host is configured.
    pub fn resolve(settings: &StorageSettings) -> EndpointResult<Self> {
        let protocol = settings.protocol.as_deref();
        let host = settings.host.as_deref();
        let port = settings.port.as_deref();

        Ok(Self {
            queue_task_id: settings.queue_task_id,
            user_id: settings.user_id,
            job_id: settings.job_id,
            user_name: settings.user_name.clone(),
            submit_url: resolve_url(protocol, host, port, &settings.path)?,
            end_url: resolve_url(protocol, host, port, &settings.path_end)?,
        })
    }

    /// URL receiving one request per case result.
    pub fn submit_url(&self) -> &str {
        &self.submit_url
    }

    /// URL receiving the end-of-run signal.
    pub fn end_url(&self) -> &str {
        &self.end_url
    }

    pub fn queue_task_id(&self) -> u64 {
        self.queue_task_id
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    pub fn job_id(&self) -> i64 {
        self.job_id
    }

    pub fn user_name(&self) -> &str {
        &self.user_name
    }
}
