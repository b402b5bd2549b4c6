//! 🔎 Query objects: encapsulated searches the repository can run without knowing them.
//!
//! The repository's only job here is to pick the index (via `Q::Document`) and hand over the
//! client. Body building, response parsing and result shape all belong to the query object.
//! Want aggregations, scroll, point-in-time? Write another `QueryObject`. The repository will
//! not mind. It never reads the query anyway.

use std::marker::PhantomData;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::trace;

use crate::backends::{RawResponse, SearchClient};
use crate::common::{Document, IndexName};
use crate::errors::{Operation, RepositoryError, Result};

/// 🔎 Something that knows how to ask the engine a question about `Document`s.
#[async_trait]
pub trait QueryObject<C: SearchClient>: Send + Sync {
    /// The document type whose index the query runs against.
    type Document: Document;
    type Response: Send;

    async fn execute(&self, client: &C, index: &IndexName) -> Result<Self::Response>;
}

/// 🎯 One search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit<T> {
    pub id: String,
    pub score: Option<f64>,
    pub document: T,
}

/// 📚 The hits of a search plus the engine's total.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHits<T> {
    pub total: u64,
    pub hits: Vec<SearchHit<T>>,
}

/// 🔢 `hits.total` is a number on old clusters and `{value, relation}` on newer ones.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HitsTotal {
    Plain(u64),
    Counted { value: u64 },
}

impl HitsTotal {
    fn value(&self) -> u64 {
        match self {
            HitsTotal::Plain(value) | HitsTotal::Counted { value } => *value,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawHit<T> {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_score")]
    score: Option<f64>,
    #[serde(rename = "_source")]
    source: T,
}

#[derive(Debug, Deserialize)]
struct RawHits<T> {
    total: Option<HitsTotal>,
    #[serde(default = "Vec::new")]
    hits: Vec<RawHit<T>>,
}

#[derive(Debug, Deserialize)]
struct SearchEnvelope<T> {
    hits: RawHits<T>,
}

async fn run_search<C, T>(client: &C, index: &IndexName, body: &Value) -> Result<SearchEnvelope<T>>
where
    C: SearchClient,
    T: DeserializeOwned,
{
    trace!("🔎 searching '{}' with {}", index, body);
    let raw: RawResponse = client
        .search(index, body)
        .await
        .map_err(|error| RepositoryError::transport(Operation::Query, index.as_str(), None, &error))?;
    if !raw.is_success() {
        return Err(RepositoryError::Operation {
            operation: Operation::Query,
            index: index.to_string(),
            id: None,
            status: Some(raw.status),
            reason: raw.error_reason(),
        });
    }
    serde_json::from_value(raw.body).map_err(|error| RepositoryError::Operation {
        operation: Operation::Query,
        index: index.to_string(),
        id: None,
        status: None,
        reason: format!("could not make sense of the search response: {error}"),
    })
}

/// 🔎 A raw query DSL body, typed by the documents it returns.
#[derive(Debug, Clone)]
pub struct SearchQuery<T> {
    body: Value,
    _document: PhantomData<fn() -> T>,
}

impl<T: Document> SearchQuery<T> {
    /// 📜 Use `body` as-is, e.g. `{"query": {"term": {"status": "open"}}}`.
    pub fn new(body: Value) -> Self {
        Self {
            body,
            _document: PhantomData,
        }
    }

    pub fn match_all() -> Self {
        Self::new(json!({"query": {"match_all": {}}}))
    }

    pub fn size(mut self, size: usize) -> Self {
        if let Some(object) = self.body.as_object_mut() {
            object.insert("size".to_string(), json!(size));
        }
        self
    }

    pub fn body(&self) -> &Value {
        &self.body
    }
}

#[async_trait]
impl<C: SearchClient, T: Document> QueryObject<C> for SearchQuery<T> {
    type Document = T;
    type Response = SearchHits<T>;

    async fn execute(&self, client: &C, index: &IndexName) -> Result<SearchHits<T>> {
        let envelope: SearchEnvelope<T> = run_search(client, index, &self.body).await?;
        let hits: Vec<SearchHit<T>> = envelope
            .hits
            .hits
            .into_iter()
            .map(|hit| SearchHit {
                id: hit.id,
                score: hit.score,
                document: hit.source,
            })
            .collect();
        let total = envelope
            .hits
            .total
            .map_or(hits.len() as u64, |total| total.value());
        Ok(SearchHits { total, hits })
    }
}

/// 🔢 "How many?" without dragging the documents along.
#[derive(Debug, Clone)]
pub struct CountQuery<T> {
    query: Value,
    _document: PhantomData<fn() -> T>,
}

impl<T: Document> CountQuery<T> {
    pub fn all() -> Self {
        Self::matching(json!({"match_all": {}}))
    }

    /// `query` is the inner query clause, not the whole body.
    pub fn matching(query: Value) -> Self {
        Self {
            query,
            _document: PhantomData,
        }
    }
}

#[async_trait]
impl<C: SearchClient, T: Document> QueryObject<C> for CountQuery<T> {
    type Document = T;
    type Response = u64;

    async fn execute(&self, client: &C, index: &IndexName) -> Result<u64> {
        let body = json!({"query": self.query, "size": 0, "track_total_hits": true});
        // -- 🙈 size 0: the sources never arrive, so any T-shaped placeholder will do
        let envelope: SearchEnvelope<Value> = run_search(client, index, &body).await?;
        Ok(envelope.hits.total.map_or(0, |total| total.value()))
    }
}
