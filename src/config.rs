//! Configuration loading and schema definitions for testrelay.
//!
//! This module provides types and functions for loading testrelay
//! configuration from TOML files or strings. The configuration schema
//! describes where the collector lives, how deliveries are paced, and the
//! run-level metadata attached to every uploaded document.
//!
//! The storage identity (queue task, host, port, user, job) can also be
//! handed over by a CI launcher as a JSON object; see
//! [`apply_interface_params`].

pub mod schema;

pub use schema::*;

use std::path::Path;

use anyhow::{Context, Result};

/// Loads testrelay configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if:
/// - The file cannot be read (e.g., doesn't exist or permission denied)
/// - The file contains invalid TOML syntax
/// - The configuration doesn't match the expected schema
///
/// # Example
///
/// ```no_run
/// use testrelay::config::load_config;
/// use std::path::Path;
///
/// let config = load_config(Path::new("testrelay.toml"))?;
/// println!("Max parallel: {}", config.delivery.max_parallel);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Loads testrelay configuration from a TOML string.
///
/// # Example
///
/// ```
/// use testrelay::config::load_config_str;
///
/// let config = load_config_str(r#"
///     [storage]
///     host = "localhost"
///     port = "8080"
///     path = "api/report"
///     path_end = "api/report/end"
///     queue_task_id = 7
/// "#)?;
///
/// assert_eq!(config.storage.queue_task_id, 7);
/// assert_eq!(config.delivery.max_parallel, 10);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config_str(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;

    Ok(config)
}

/// Overrides the storage identity with launcher-supplied JSON parameters.
///
/// The JSON object uses the collector's own key names: `queue_task_id`,
/// `http_server`, `http_port`, `user_id` and `job_id`. Keys that are
/// missing leave the file-based value untouched.
///
/// # Errors
///
/// Returns an error if `json` is not a valid parameter object.
pub fn apply_interface_params(config: &mut Config, json: &str) -> Result<()> {
    let params: InterfaceParams = serde_json::from_str(json)
        .context("Collected storage config parameters are illegal to deserialize")?;

    params.apply_to(&mut config.storage);
    Ok(())
}
