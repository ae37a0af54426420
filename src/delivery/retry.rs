//! Single retry pass over failed submissions.
//!
//! Only payloads that failed the first pass are resubmitted, each exactly
//! once, to the same URL and without backoff. Whatever fails the second
//! pass is final.

use std::sync::Arc;

use tracing::{info, warn};

use super::dispatcher::{DeliveryHandle, Dispatcher};
use super::transport::Transport;
use super::{CollectionReport, Payload};

/// Step of a two-pass delivery that has just completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPhase {
    FirstPassSubmitted,
    FirstPassCollected,
    RetrySubmitted,
    RetryCollected,
}

/// Resubmits first-pass failures through a [`Dispatcher`].
pub struct RetryCoordinator<'a, T> {
    dispatcher: &'a Dispatcher<T>,
}

impl<'a, T: Transport> RetryCoordinator<'a, T> {
    pub fn new(dispatcher: &'a Dispatcher<T>) -> Self {
        Self { dispatcher }
    }

    /// Submits every failed payload a second time.
    pub fn resubmit<P: Payload>(&self, url: &str, failed: &[Arc<P>]) -> Vec<DeliveryHandle<P>> {
        if !failed.is_empty() {
            info!("Retrying {} failed uploads", failed.len());
        }

        failed
            .iter()
            .map(|payload| self.dispatcher.submit(url, Arc::clone(payload)))
            .collect()
    }

    /// Delivers `payloads` with one retry pass.
    ///
    /// Returns the final report, whose `failed` list holds the payloads
    /// that failed both attempts.
    pub async fn deliver_with_retry<P: Payload>(
        &self,
        url: &str,
        payloads: Vec<Arc<P>>,
    ) -> (CollectionReport<P>, RetryStats) {
        self.deliver_observed(url, payloads, |_| {}).await
    }

    /// Same as [`deliver_with_retry`](Self::deliver_with_retry), calling
    /// `observe` after each [`RetryPhase`].
    ///
    /// Every phase is reported, in order. The retry pass submits nothing when
    /// the first pass had no failures.
    pub async fn deliver_observed<P: Payload>(
        &self,
        url: &str,
        payloads: Vec<Arc<P>>,
        mut observe: impl FnMut(RetryPhase),
    ) -> (CollectionReport<P>, RetryStats) {
        let total = payloads.len();

        let handles = payloads
            .into_iter()
            .map(|payload| self.dispatcher.submit(url, payload))
            .collect();
        observe(RetryPhase::FirstPassSubmitted);

        let first = self.dispatcher.collect(handles).await;
        observe(RetryPhase::FirstPassCollected);

        let first_pass_failed = first.failed.len();
        let handles = self.resubmit(url, &first.failed);
        observe(RetryPhase::RetrySubmitted);

        let second = self.dispatcher.collect(handles).await;
        observe(RetryPhase::RetryCollected);

        let stats = RetryStats::new(total, first_pass_failed, second.failed.len());
        if stats.failed > 0 {
            warn!("{} uploads failed after retry", stats.failed);
        }

        let report = CollectionReport {
            succeeded: first.succeeded + second.succeeded,
            failed: second.failed,
        };
        (report, stats)
    }
}

/// Statistics about a delivery with one retry pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryStats {
    /// Payloads submitted in the first pass.
    pub total: usize,
    /// Payloads that failed the first pass and were resubmitted.
    pub first_pass_failed: usize,
    /// Resubmitted payloads that succeeded the second time.
    pub recovered: usize,
    /// Payloads that failed both passes.
    pub failed: usize,
}

impl RetryStats {
    pub fn new(total: usize, first_pass_failed: usize, failed: usize) -> Self {
        Self {
            total,
            first_pass_failed,
            recovered: first_pass_failed.saturating_sub(failed),
            failed,
        }
    }

    /// Total number of submissions, retries included.
    pub fn submissions(&self) -> usize {
        self.total + self.first_pass_failed
    }
}
