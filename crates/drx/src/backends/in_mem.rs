//! # Previously, on drx...
//!
//! 🎬 The cluster was down. The tests still had to run. Someone had to pretend to be
//! Elasticsearch convincingly enough to fool a repository. That someone was this module.
//!
//! [`InMemorySearchClient`] keeps indices in a `HashMap` behind an `Arc<Mutex<...>>`, bumps
//! versions like the real thing, answers with Elasticsearch-shaped JSON, and records every
//! bulk request so tests can count batches. It can also misbehave on command:
//! - a validator rejects documents the way a strict mapping would (400 per item)
//! - `failing_bulk_call(n)` makes the n-th bulk call die at the transport level
//!
//! ⚠️ This is NOT for production. If you deploy this to prod, please also deploy a therapist.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Mutex;

use crate::backends::{BulkOperation, RawResponse, SearchClient};
use crate::common::{IndexName, RefreshPolicy};

type Validator = Arc<dyn Fn(&Value) -> Option<String> + Send + Sync>;

/// 📒 One bulk call as the engine saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedBulk {
    pub index: String,
    pub ids: Vec<Option<String>>,
    pub refresh: RefreshPolicy,
}

#[derive(Debug, Clone)]
struct StoredDocument {
    version: u64,
    source: Value,
}

#[derive(Debug, Default)]
struct InMemoryState {
    indices: HashMap<String, BTreeMap<String, StoredDocument>>,
    bulk_calls: usize,
    recorded_bulks: Vec<RecordedBulk>,
    next_generated_id: u64,
}

enum WriteVerdict {
    Stored { id: String, version: u64, created: bool },
    Rejected { reason: String },
}

/// 📦 A search engine that fits in a `HashMap`. Clone it freely; clones share state.
#[derive(Clone, Default)]
pub struct InMemorySearchClient {
    state: Arc<Mutex<InMemoryState>>,
    validator: Option<Validator>,
    failing_bulk_calls: Vec<usize>,
}

impl fmt::Debug for InMemorySearchClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // -- 🎭 the validator is a closure and closures do not do Debug. we respect their privacy.
        f.debug_struct("InMemorySearchClient")
            .field("has_validator", &self.validator.is_some())
            .field("failing_bulk_calls", &self.failing_bulk_calls)
            .finish_non_exhaustive()
    }
}

impl InMemorySearchClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 🚫 Reject any document for which `validator` returns a reason.
    pub fn with_validator(mut self, validator: impl Fn(&Value) -> Option<String> + Send + Sync + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// 💀 Make the `call`-th bulk request (1-based) fail as if the network ate it.
    pub fn failing_bulk_call(mut self, call: usize) -> Self {
        self.failing_bulk_calls.push(call);
        self
    }

    /// 📒 Every bulk request received so far, in order.
    pub async fn recorded_bulks(&self) -> Vec<RecordedBulk> {
        self.state.lock().await.recorded_bulks.clone()
    }

    /// 🔍 Peek at a stored document's source.
    pub async fn stored(&self, index: &str, id: &str) -> Option<Value> {
        let state = self.state.lock().await;
        state
            .indices
            .get(index)
            .and_then(|docs| docs.get(id))
            .map(|doc| doc.source.clone())
    }

    /// 📊 How many documents live in `index`.
    pub async fn document_count(&self, index: &str) -> usize {
        self.state
            .lock()
            .await
            .indices
            .get(index)
            .map_or(0, BTreeMap::len)
    }

    fn write(&self, state: &mut InMemoryState, index: &str, id: Option<&str>, source: Value) -> WriteVerdict {
        // -- 🚔 the validator gets first dibs. rejected docs never touch the index.
        if let Some(reason) = self.validator.as_ref().and_then(|validate| validate(&source)) {
            return WriteVerdict::Rejected { reason };
        }

        let id = match id {
            Some(id) => id.to_string(),
            None => {
                // -- 🎲 not random, just unique. tests like predictable.
                state.next_generated_id += 1;
                format!("generated-{}", state.next_generated_id)
            }
        };
        let docs = state.indices.entry(index.to_string()).or_default();
        // -- 🔢 versions start at 1 and only go up, like rent
        let (version, created) = match docs.get(&id) {
            Some(existing) => (existing.version + 1, false),
            None => (1, true),
        };
        docs.insert(id.clone(), StoredDocument { version, source });
        WriteVerdict::Stored { id, version, created }
    }
}

fn rejection_body(reason: &str) -> Value {
    json!({"type": "mapper_parsing_exception", "reason": reason})
}

#[async_trait]
impl SearchClient for InMemorySearchClient {
    async fn get_document(&self, index: &IndexName, id: &str) -> Result<RawResponse> {
        let state = self.state.lock().await;
        let found = state.indices.get(index.as_str()).and_then(|docs| docs.get(id));
        Ok(match found {
            Some(doc) => RawResponse::new(
                200,
                json!({
                    "_index": index.as_str(), "_id": id, "_version": doc.version,
                    // -- 🎭 one shard, one primary, forever. seq_no just trails the version.
                    "_seq_no": doc.version - 1, "_primary_term": 1,
                    "found": true, "_source": doc.source,
                }),
            ),
            None => RawResponse::new(404, json!({"_index": index.as_str(), "_id": id, "found": false})),
        })
    }

    async fn index_document(
        &self,
        index: &IndexName,
        id: Option<&str>,
        source: &Value,
        _refresh: RefreshPolicy,
    ) -> Result<RawResponse> {
        let mut state = self.state.lock().await;
        Ok(match self.write(&mut state, index.as_str(), id, source.clone()) {
            WriteVerdict::Stored { id, version, created } => RawResponse::new(
                if created { 201 } else { 200 },
                json!({
                    "_index": index.as_str(), "_id": id, "_version": version,
                    "result": if created { "created" } else { "updated" },
                    "_seq_no": version - 1, "_primary_term": 1,
                }),
            ),
            WriteVerdict::Rejected { reason } => {
                // -- 🙅 same envelope a real cluster sends for a mapping failure
                RawResponse::new(400, json!({"error": rejection_body(&reason), "status": 400}))
            }
        })
    }

    async fn delete_document(&self, index: &IndexName, id: &str, _refresh: RefreshPolicy) -> Result<RawResponse> {
        let mut state = self.state.lock().await;
        let removed = state
            .indices
            .get_mut(index.as_str())
            .and_then(|docs| docs.remove(id));
        Ok(match removed {
            Some(doc) => RawResponse::new(
                200,
                json!({"_index": index.as_str(), "_id": id, "_version": doc.version + 1, "result": "deleted"}),
            ),
            None => RawResponse::new(404, json!({"_index": index.as_str(), "_id": id, "result": "not_found"})),
        })
    }

    async fn document_exists(&self, index: &IndexName, id: &str) -> Result<RawResponse> {
        let state = self.state.lock().await;
        let exists = state
            .indices
            .get(index.as_str())
            .is_some_and(|docs| docs.contains_key(id));
        // -- 👀 HEAD requests have no body. we honor the tradition.
        Ok(RawResponse::new(if exists { 200 } else { 404 }, Value::Null))
    }

    async fn bulk(&self, index: &IndexName, operations: Vec<BulkOperation>, refresh: RefreshPolicy) -> Result<RawResponse> {
        let mut state = self.state.lock().await;
        state.bulk_calls += 1;
        // -- 💀 scheduled network tragedy: this call never "arrived", so nothing is recorded
        if self.failing_bulk_calls.contains(&state.bulk_calls) {
            anyhow::bail!("💀 connection reset by peer (in-memory edition, call {})", state.bulk_calls);
        }
        state.recorded_bulks.push(RecordedBulk {
            index: index.to_string(),
            ids: operations.iter().map(|op| op.id.clone()).collect(),
            refresh,
        });

        // -- 📋 one item per operation, in send order. the adapter counts on it.
        let mut errors = false;
        let mut items = Vec::with_capacity(operations.len());
        for operation in operations {
            let item = match serde_json::from_str::<Value>(&operation.source) {
                Err(parse_error) => {
                    errors = true;
                    json!({"index": {"_id": operation.id, "status": 400, "error": rejection_body(&parse_error.to_string())}})
                }
                Ok(source) => match self.write(&mut state, index.as_str(), operation.id.as_deref(), source) {
                    WriteVerdict::Stored { id, version, created } => json!({"index": {
                        "_id": id, "_version": version,
                        "status": if created { 201 } else { 200 },
                        "result": if created { "created" } else { "updated" },
                    }}),
                    WriteVerdict::Rejected { reason } => {
                        errors = true;
                        json!({"index": {"_id": operation.id, "status": 400, "error": rejection_body(&reason)}})
                    }
                },
            };
            items.push(item);
        }
        Ok(RawResponse::new(200, json!({"took": 1, "errors": errors, "items": items})))
    }

    /// 🔎 Supports exactly one query: "everything", honoring `size` (default 10).
    async fn search(&self, index: &IndexName, body: &Value) -> Result<RawResponse> {
        let state = self.state.lock().await;
        let size = body.get("size").and_then(Value::as_u64).unwrap_or(10) as usize;
        let docs = state.indices.get(index.as_str());
        let total = docs.map_or(0, BTreeMap::len);
        let hits: Vec<Value> = docs
            .into_iter()
            .flat_map(|docs| docs.iter())
            .take(size)
            .map(|(id, doc)| json!({"_index": index.as_str(), "_id": id, "_score": 1.0, "_source": doc.source}))
            .collect();
        Ok(RawResponse::new(
            200,
            json!({"took": 0, "hits": {"total": {"value": total, "relation": "eq"}, "hits": hits}}),
        ))
    }
}
