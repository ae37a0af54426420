//! Asynchronous delivery of payloads to the collector.
//!
//! # Architecture
//!
//! ```text
//!  payloads ──► Dispatcher::submit() ──► DeliveryHandle (one per payload)
//!                     │                         │
//!                     │ bounded worker pool     │ deadline fixed at submit
//!                     ▼                         ▼
//!               Transport::post_form     Dispatcher::collect()
//!                                               │
//!                                               ▼
//!                                       CollectionReport
//!                                       ├── succeeded
//!                                       └── failed ──► RetryCoordinator::resubmit()
//!                                                            (exactly once)
//! ```
//!
//! Failures never propagate as errors: each one is logged with its
//! [`FailureReason`] and counted. The pipeline turns the final count into
//! the end-of-run [`CompletionSignal`].

pub mod completion;
pub mod dispatcher;
pub mod payload;
pub mod retry;
pub mod transport;

use std::fmt;
use std::sync::Arc;

pub use completion::{CompletionNotifier, CompletionSignal, RunStatus};
pub use dispatcher::{DeliveryHandle, Dispatcher, ShutdownOutcome};
pub use payload::{CaseUpload, Payload, PayloadError, PayloadResult};
pub use retry::{RetryCoordinator, RetryPhase, RetryStats};
pub use transport::{HttpTransport, Transport, TransportError, TransportResult};

/// Final classification of one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Succeeded,
    Failed(FailureReason),
}

impl Delivery {
    pub fn is_success(&self) -> bool {
        matches!(self, Delivery::Succeeded)
    }
}

/// Why a submission counts as failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// No answer before the handle's deadline.
    TimedOut,
    /// The transport failed before a status was available.
    Transport(String),
    /// The collector answered outside 2xx.
    Status(u16),
    /// The payload could not be encoded.
    Encode(String),
    /// The pool no longer accepted work.
    Rejected,
    /// The worker went away without reporting.
    Dropped,
    /// The worker was cancelled during shutdown.
    Cancelled,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::TimedOut => write!(f, "no response before deadline"),
            FailureReason::Transport(msg) => write!(f, "transport error: {}", msg),
            FailureReason::Status(code) => write!(f, "collector answered HTTP {}", code),
            FailureReason::Encode(msg) => write!(f, "could not encode payload: {}", msg),
            FailureReason::Rejected => write!(f, "worker pool is closed"),
            FailureReason::Dropped => write!(f, "worker exited without a result"),
            FailureReason::Cancelled => write!(f, "cancelled during shutdown"),
        }
    }
}

/// Outcome of collecting a batch of handles.
#[derive(Debug)]
pub struct CollectionReport<P> {
    pub succeeded: usize,
    /// Payloads whose submission failed, in submission order.
    pub failed: Vec<Arc<P>>,
}

impl<P> CollectionReport<P> {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed.len()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

impl<P> Default for CollectionReport<P> {
    fn default() -> Self {
        Self {
            succeeded: 0,
            failed: Vec::new(),
        }
    }
}
