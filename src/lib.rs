//! testrelay: deliver test results to a remote collector.
//!
//! This crate takes per-test-case execution events from a test framework,
//! turns them into the collector's nested result document, and uploads one
//! document per case concurrently, tolerating transient network failures.
//!
//! # Architecture
//!
//! The main components are:
//!
//! - **Endpoint**: Resolve the collector's submit and end-of-run URLs
//! - **Event**: Read execution events (JSON, JUnit XML) and sidecar metadata
//! - **Record**: Assemble immutable case records and the run document
//! - **Delivery**: Bounded worker pool, single retry pass, end-of-run signal
//! - **Pipeline**: Drive one run through its states
//! - **Report**: Console summary
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
//!     DeliveryPipeline::from_config(&config)?
//!         .generate_report(&events)
//!         .await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod delivery;
pub mod endpoint;
pub mod event;
pub mod pipeline;
pub mod record;
pub mod report;

// Re-export commonly used types
pub use config::{Config, load_config};
pub use delivery::{Dispatcher, HttpTransport, Transport};
pub use endpoint::{StorageConfig, resolve_url};
pub use event::{CaseMetadata, ExecutionEvent, MetadataIndex};
pub use pipeline::{DeliveryPipeline, RunReport, generate_report};
pub use record::{ResultRecord, RunDocument, assemble};
