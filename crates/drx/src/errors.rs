//! 💀 Errors: the part of the repository everybody reads and nobody wants to.
//!
//! 🧠 Knowledge graph:
//! - `RepositoryError` is what callers match on. Typed, `thiserror`-derived, boring on purpose.
//! - `anyhow` stays at the collaborator boundary (`SearchClient` returns `anyhow::Result`).
//!   Transport failures get flattened into `reason` with their whole context chain, so the
//!   3am reader still sees every layer of the onion.
//! - Absence is NOT an error here, except for `find_by_id`. `get_by_id`, `exists` and
//!   `delete` treat "not found" as a perfectly normal Tuesday.
//!
//! 🦆 The duck has been deserialized and found to be valid.

use std::fmt;

use thiserror::Error;

use crate::bulk::BulkItemFailure;

/// 📦 Every `Result` in this crate ends here eventually.
pub type Result<T, E = RepositoryError> = std::result::Result<T, E>;

/// 🏷️ Which repository operation was running when things went sideways.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Get,
    Save,
    Delete,
    Exists,
    Query,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Get => "get",
            Operation::Save => "save",
            Operation::Delete => "delete",
            Operation::Exists => "exists",
            Operation::Query => "query",
        };
        f.write_str(name)
    }
}

/// 💀 The repository error taxonomy.
///
/// `PartialBatchFailure` is the odd one out: bulk streams never stop because of it. It only
/// exists so a caller who wants "all or nothing" can turn an outcome into an `Err` with
/// [`crate::bulk::BulkOutcome::into_result`].
#[derive(Debug, Clone, Error)]
pub enum RepositoryError {
    /// 🔧 No override, no convention, no index. Fatal to the call, never retried.
    #[error("🔧 could not resolve an index for document type '{document_type}': {reason}")]
    Configuration {
        document_type: String,
        reason: String,
    },

    /// 🔍 Only `find_by_id` raises this. Everyone else just says `found = false`.
    #[error("🔍 document '{id}' was not found in index '{index}'")]
    NotFound { index: String, id: String },

    /// 📡 The engine (or the wire to it) rejected a single-document call.
    #[error("📡 {operation} on index '{index}' failed{}: {reason}", status_suffix(.status))]
    Operation {
        operation: Operation,
        index: String,
        id: Option<String>,
        /// `None` when the request never got a response at all.
        status: Option<u16>,
        reason: String,
    },

    /// ⚠️ Some, but not all, documents in a batch failed.
    #[error("⚠️ batch {sequence}: {failed} of {submitted} documents failed")]
    PartialBatchFailure {
        sequence: u64,
        submitted: usize,
        failed: usize,
        failures: Vec<BulkItemFailure>,
    },

    /// 🛑 A batch could not be submitted at all. Ends the bulk stream.
    #[error(
        "🛑 bulk ingestion into '{index}' stopped at batch {sequence} after {completed_batches} completed batches: {reason}"
    )]
    StreamTerminated {
        index: String,
        sequence: u64,
        completed_batches: u64,
        reason: String,
    },

    /// 🪪 The document could not tell us who it is.
    #[error("🪪 a '{document_type}' document has no id, and this operation needs one")]
    MissingDocumentId { document_type: String },
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" with status {code}"),
        None => String::new(),
    }
}

impl RepositoryError {
    pub(crate) fn configuration(document_type: &str, reason: impl Into<String>) -> Self {
        Self::Configuration {
            document_type: document_type.to_string(),
            reason: reason.into(),
        }
    }

    /// 📡 Wrap a transport-level `anyhow::Error` from the client. `{:#}` keeps the context chain.
    pub(crate) fn transport(
        operation: Operation,
        index: &str,
        id: Option<&str>,
        error: &anyhow::Error,
    ) -> Self {
        Self::Operation {
            operation,
            index: index.to_string(),
            id: id.map(str::to_string),
            status: None,
            reason: format!("{error:#}"),
        }
    }

    /// ✅ True for the "it simply is not there" flavour.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
