//! 📦 Bulk ingestion: many documents, bounded batches, one honest report per batch.
//!
//! 🎬 *[a stream of documents approaches. it does not say how long it is.]*
//! *[the batcher counts to batch_size, sends, waits, and counts again.]*
//!
//! 🧠 Knowledge graph:
//! - [`BulkBatcher`] (in `batcher`) owns "slice, send, interpret". One bulk call per batch,
//!   one [`BulkOutcome`] per bulk call, in submission order.
//! - [`BulkAllObservable`] (in `observable`) is the lazy side: the worker only pulls the next
//!   batch when the consumer asks for the next outcome. That is the whole backpressure story.
//! - Partial failures are data, not errors. Only a batch that could not be submitted at all
//!   ends the stream (`RepositoryError::StreamTerminated`).
//! - [`BulkSummary`] folds outcomes into totals for people who just want the bottom line.

pub mod batcher;
pub mod observable;

pub use batcher::BulkBatcher;
pub use observable::{BulkAllCancellation, BulkAllObservable, BulkAllObserver};

use crate::errors::{RepositoryError, Result};

/// ❌ One document the engine (or serialization) refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkItemFailure {
    /// 0-based position within its batch.
    pub position: usize,
    pub id: Option<String>,
    /// Item status from the engine. `0` when the document never left the process.
    pub status: u16,
    pub error_type: Option<String>,
    pub reason: String,
}

/// 🚦 How a batch went, at a glance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    Succeeded,
    PartiallyFailed,
    Failed,
}

/// 📋 The report card for one submitted batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkOutcome {
    /// 0-based, increasing by one per submitted batch.
    pub sequence: u64,
    pub submitted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// In input order.
    pub failures: Vec<BulkItemFailure>,
    pub took_ms: Option<u64>,
}

impl BulkOutcome {
    pub fn status(&self) -> BatchStatus {
        match (self.succeeded, self.failed) {
            (_, 0) => BatchStatus::Succeeded,
            (0, _) => BatchStatus::Failed,
            _ => BatchStatus::PartiallyFailed,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// 🔒 For callers who want all-or-nothing: any failure becomes `PartialBatchFailure`.
    pub fn into_result(self) -> Result<Self> {
        if self.failed == 0 {
            return Ok(self);
        }
        Err(RepositoryError::PartialBatchFailure {
            sequence: self.sequence,
            submitted: self.submitted,
            failed: self.failed,
            failures: self.failures,
        })
    }
}

/// ❌ A failure as remembered by the summary: which batch, and what went wrong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryFailure {
    pub sequence: u64,
    pub failure: BulkItemFailure,
}

/// 📊 Totals across every outcome of a bulk run.
///
/// Keeps every item failure. A run that rejects millions of documents will remember
/// millions of failures; callers that cannot afford that should consume outcomes directly.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkSummary {
    pub batches: u64,
    pub submitted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<SummaryFailure>,
    /// The run was stopped before the input ran dry.
    pub cancelled: bool,
}

impl BulkSummary {
    pub fn record(&mut self, outcome: &BulkOutcome) {
        self.batches += 1;
        self.submitted += outcome.submitted;
        self.succeeded += outcome.succeeded;
        self.failed += outcome.failed;
        self.failures.extend(outcome.failures.iter().cloned().map(|failure| SummaryFailure {
            sequence: outcome.sequence,
            failure,
        }));
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0 && !self.cancelled
    }
}
