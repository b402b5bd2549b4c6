//! 🔌 Backends: where the real I/O happens.
//!
//! The repository knows what it wants (get this, write that, bulk these). Backends know how
//! to ask an engine for it. The contract between them is [`SearchClient`]: every call gets an
//! already-resolved [`IndexName`] and returns a [`RawResponse`] that the response adapter
//! turns into something a caller can use.
//!
//! 🧠 Knowledge graph:
//! - `Ok(RawResponse)` means "the engine answered". Even a 404 or a 409 is an answer.
//! - `Err(anyhow::Error)` means "the engine never answered": connection refused, timeout,
//!   TLS tantrum. Retries, if anyone wants them, belong in the client, not in the core.
//! - `elasticsearch`: reqwest over HTTP. `in_mem`: a HashMap with ambitions, for tests.
//!
//! 🦆 The duck is here because every file must have one. This is law.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::common::{IndexName, RefreshPolicy};

pub mod elasticsearch;
pub mod in_mem;

pub use elasticsearch::{ElasticsearchClient, ElasticsearchConfig};
pub use in_mem::{InMemorySearchClient, RecordedBulk};

/// 📨 What the engine said, before anyone interpreted it.
///
/// `status` is HTTP-shaped (200, 404, 409...). `body` is whatever JSON came back, or
/// `Value::Null` for body-less answers like `HEAD`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

impl RawResponse {
    pub fn new(status: u16, body: serde_json::Value) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }

    /// 💬 The engine's diagnostic: `error.type: error.reason` when present.
    pub fn error_reason(&self) -> String {
        match self.body.get("error") {
            Some(serde_json::Value::String(message)) => message.clone(),
            Some(error) => describe_error_object(error)
                .unwrap_or_else(|| error.to_string()),
            None => format!("engine answered with status {}", self.status),
        }
    }
}

/// 💬 `{"type": "...", "reason": "..."}` -> `type: reason`.
pub(crate) fn describe_error_object(error: &serde_json::Value) -> Option<String> {
    let reason = error.get("reason").and_then(|r| r.as_str());
    let error_type = error.get("type").and_then(|t| t.as_str());
    match (error_type, reason) {
        (Some(t), Some(r)) => Some(format!("{t}: {r}")),
        (None, Some(r)) => Some(r.to_string()),
        (Some(t), None) => Some(t.to_string()),
        (None, None) => None,
    }
}

/// 📦 One document in a bulk request: optional id, already-serialized JSON source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkOperation {
    pub id: Option<String>,
    pub source: String,
}

/// 📡 The engine, as far as the repository is concerned.
///
/// Calls are stateless with respect to the client; implementations are shared across
/// concurrent repository operations behind an `Arc`.
#[async_trait]
pub trait SearchClient: Send + Sync + 'static {
    /// 🔍 Fetch one document by id.
    async fn get_document(&self, index: &IndexName, id: &str) -> Result<RawResponse>;

    /// ✍️ Write one document. `id = None` lets the engine generate one.
    async fn index_document(
        &self,
        index: &IndexName,
        id: Option<&str>,
        source: &serde_json::Value,
        refresh: RefreshPolicy,
    ) -> Result<RawResponse>;

    /// 🗑️ Delete one document by id.
    async fn delete_document(
        &self,
        index: &IndexName,
        id: &str,
        refresh: RefreshPolicy,
    ) -> Result<RawResponse>;

    /// 👀 Existence check. 2xx = exists, 404 = does not.
    async fn document_exists(&self, index: &IndexName, id: &str) -> Result<RawResponse>;

    /// 📦 One bulk-write request for the whole slice, in order.
    async fn bulk(
        &self,
        index: &IndexName,
        operations: Vec<BulkOperation>,
        refresh: RefreshPolicy,
    ) -> Result<RawResponse>;

    /// 🔎 Run a search body against `index`.
    async fn search(&self, index: &IndexName, body: &serde_json::Value) -> Result<RawResponse>;
}
