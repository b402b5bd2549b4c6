//! 🏛️ The repository: the only thing callers ever need to talk to.
//!
//! 🎬 COLD OPEN. A caller walks in holding an `Order`. It wants it saved. It does not know
//! which index. It does not want to know about HTTP. It definitely does not want to parse a
//! bulk response at 3am. The repository nods slowly, and takes the order.
//!
//! 🧠 Knowledge graph:
//! - Every operation resolves exactly one [`IndexName`] first, via [`IndexResolver`].
//!   `bulk_all` is the exception that proves the rule: it demands an explicit index.
//! - Single-document calls go client -> `responses::adapt_*` -> typed result.
//! - `bulk` = chunk, submit sequentially, fold into a [`BulkSummary`].
//!   `bulk_all` = hand a stream to the [`BulkBatcher`] and return the lazy observable.
//! - Batch size comes from configuration and is shared by `bulk` and `bulk_all`.
//!
//! 🦆 The duck would like to speak to the repository's manager. There is no manager.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::Stream;
use serde::Deserialize;
use tracing::{debug, trace, warn};

use crate::backends::SearchClient;
use crate::bulk::{BulkAllObservable, BulkBatcher, BulkSummary};
use crate::common::{Document, IndexName, RefreshPolicy};
use crate::errors::{Operation, RepositoryError, Result};
use crate::queries::QueryObject;
use crate::resolver::{IndexResolver, NamingStrategy};
use crate::responses::{
    DeleteResult, GetResult, RequestContext, WriteResult, adapt_delete, adapt_exists, adapt_get,
    adapt_write,
};

/// 📦 How many documents go into one bulk request unless configured otherwise.
pub const DEFAULT_BULK_BATCH_SIZE: usize = 1000;

fn default_bulk_batch_size() -> usize {
    DEFAULT_BULK_BATCH_SIZE
}

/// 🔧 The `[repository]` section.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RepositoryConfig {
    #[serde(default = "default_bulk_batch_size")]
    pub bulk_batch_size: usize,
    #[serde(default)]
    pub naming: NamingStrategy,
    #[serde(default)]
    pub index_prefix: Option<String>,
    /// Only used when `naming = "none"`.
    #[serde(default)]
    pub default_index: Option<String>,
    /// Document type -> index, checked before the naming strategy.
    #[serde(default)]
    pub type_indices: HashMap<String, String>,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            bulk_batch_size: DEFAULT_BULK_BATCH_SIZE,
            naming: NamingStrategy::default(),
            index_prefix: None,
            default_index: None,
            type_indices: HashMap::new(),
        }
    }
}

/// 🏛️ A typed document repository over any [`SearchClient`].
///
/// Cheap to clone; clones share the client.
pub struct Repository<C: SearchClient> {
    client: Arc<C>,
    resolver: IndexResolver,
    bulk_batch_size: usize,
}

impl<C: SearchClient> Clone for Repository<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            resolver: self.resolver.clone(),
            bulk_batch_size: self.bulk_batch_size,
        }
    }
}

impl<C: SearchClient> fmt::Debug for Repository<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("resolver", &self.resolver)
            .field("bulk_batch_size", &self.bulk_batch_size)
            .finish_non_exhaustive()
    }
}

impl<C: SearchClient> Repository<C> {
    pub fn new(client: Arc<C>, resolver: IndexResolver) -> Self {
        Self {
            client,
            resolver,
            bulk_batch_size: DEFAULT_BULK_BATCH_SIZE,
        }
    }

    /// 🏗️ Resolver and batch size straight from `[repository]`.
    pub fn from_config(client: Arc<C>, config: &RepositoryConfig) -> Self {
        Self::new(client, IndexResolver::from_config(config)).with_bulk_batch_size(config.bulk_batch_size)
    }

    /// 📏 Zero is clamped to one, with a warning.
    pub fn with_bulk_batch_size(mut self, bulk_batch_size: usize) -> Self {
        if bulk_batch_size == 0 {
            warn!("⚠️ bulk_batch_size = 0 would never send anything, using 1");
        }
        self.bulk_batch_size = bulk_batch_size.max(1);
        self
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    pub fn resolver(&self) -> &IndexResolver {
        &self.resolver
    }

    pub fn bulk_batch_size(&self) -> usize {
        self.bulk_batch_size
    }

    fn required_id<T: Document>(document: &T) -> Result<String> {
        document.document_id().ok_or_else(|| RepositoryError::MissingDocumentId {
            document_type: T::document_type().to_string(),
        })
    }

    /// 🔍 Fetch a document, or `NotFound`. For when absence really is a problem.
    pub async fn find_by_id<T: Document>(&self, id: &str, index: Option<&str>) -> Result<T> {
        let result = self.get_by_id::<T>(id, index).await?;
        // -- 🚨 the one place where a shrug becomes an error
        if !result.found {
            return Err(RepositoryError::NotFound {
                index: result.index.to_string(),
                id: result.id,
            });
        }
        // -- 🫥 found, but `_source` disabled in the mapping. rare, real, rude.
        result.document.ok_or_else(|| RepositoryError::Operation {
            operation: Operation::Get,
            index: result.index.to_string(),
            id: Some(result.id.clone()),
            status: None,
            reason: "the document was found but came back without a _source".to_string(),
        })
    }

    /// 🔍 Fetch a document; absence is `found = false`.
    pub async fn get_by_id<T: Document>(&self, id: &str, index: Option<&str>) -> Result<GetResult<T>> {
        let index = self.resolver.resolve_for::<T>(index)?;
        trace!("🔍 get '{}' from '{}'", id, index);
        let raw = self
            .client
            .get_document(&index, id)
            .await
            .map_err(|error| RepositoryError::transport(Operation::Get, index.as_str(), Some(id), &error))?;
        adapt_get(raw, &RequestContext::new(Operation::Get, &index, Some(id)))
    }

    /// 🔎 Run a query object against the index of its document type.
    pub async fn query<Q: QueryObject<C>>(&self, query: &Q, index: Option<&str>) -> Result<Q::Response> {
        let index = self.resolver.resolve_for::<Q::Document>(index)?;
        trace!("🔎 query on '{}'", index);
        query.execute(&self.client, &index).await
    }

    /// ✍️ Index one document. No id means the engine generates one.
    pub async fn save<T: Document>(
        &self,
        document: &T,
        index: Option<&str>,
        refresh: RefreshPolicy,
    ) -> Result<WriteResult> {
        let index = self.resolver.resolve_for::<T>(index)?;
        let source = serde_json::to_value(document).map_err(|error| RepositoryError::Operation {
            operation: Operation::Save,
            index: index.to_string(),
            id: document.id_from_source(&serde_json::Value::Null),
            status: None,
            reason: format!("could not serialize the document: {error}"),
        })?;
        let id = document.id_from_source(&source);
        let context = RequestContext::new(Operation::Save, &index, id.as_deref());
        trace!("✍️ save '{}' into '{}'", id.as_deref().unwrap_or("<generated>"), index);
        let raw = self
            .client
            .index_document(&index, id.as_deref(), &source, refresh)
            .await
            .map_err(|error| RepositoryError::transport(Operation::Save, index.as_str(), id.as_deref(), &error))?;
        adapt_write(raw, &context)
    }

    /// 📦 Write everything, `bulk_batch_size` at a time, and report the totals.
    ///
    /// Batches go out one after another. Item failures are collected, not fatal. A batch that
    /// cannot be submitted at all stops the run with `StreamTerminated`.
    pub async fn bulk<T, I>(&self, documents: I, index: Option<&str>, refresh: RefreshPolicy) -> Result<BulkSummary>
    where
        T: Document,
        I: IntoIterator<Item = T>,
    {
        let index = self.resolver.resolve_for::<T>(index)?;
        // -- 🚰 pulled lazily, one batch at a time. a huge iterator never lands in memory whole.
        let mut remaining = documents.into_iter();
        let batcher = BulkBatcher::new(Arc::clone(&self.client), index, self.bulk_batch_size, refresh);
        let mut summary = BulkSummary::default();

        loop {
            let batch: Vec<T> = remaining.by_ref().take(self.bulk_batch_size).collect();
            if batch.is_empty() {
                break;
            }
            // -- ➡️ strictly one after another. a dead wire ends the run right here via `?`.
            let outcome = batcher.submit_batch(summary.batches, batch).await?;
            summary.record(&outcome);
        }
        debug!(
            "📦 bulk into '{}' done: {} batches, {} succeeded, {} failed",
            batcher.index(),
            summary.batches,
            summary.succeeded,
            summary.failed
        );
        Ok(summary)
    }

    /// 🌊 Stream documents into `index` lazily. The returned observable drives the work.
    ///
    /// `index` is required: an empty one is a `Configuration` error and no naming convention
    /// is consulted.
    pub fn bulk_all<T, S>(&self, documents: S, index: &str, refresh: RefreshPolicy) -> Result<BulkAllObservable>
    where
        T: Document,
        S: Stream<Item = T> + Send + 'static,
    {
        // -- 🔒 explicit index only. the resolver never hears about this one.
        let index = IndexName::new(index).map_err(|_| {
            RepositoryError::configuration(T::document_type(), "bulk_all needs an explicit, non-empty index")
        })?;
        debug!("🌊 bulk_all into '{}' with batches of {}", index, self.bulk_batch_size);
        let batcher = BulkBatcher::new(Arc::clone(&self.client), index, self.bulk_batch_size, refresh);
        Ok(batcher.stream(documents))
    }

    /// 🗑️ Delete the document with `document`'s id.
    pub async fn delete<T: Document>(
        &self,
        document: &T,
        index: Option<&str>,
        refresh: RefreshPolicy,
    ) -> Result<DeleteResult> {
        // -- 🪪 no id, no delete. we are not deleting "whatever"
        let id = Self::required_id(document)?;
        self.delete_by_id::<T>(&id, index, refresh).await
    }

    /// 🗑️ Delete by id. Deleting something that is not there is `deleted = false`.
    pub async fn delete_by_id<T: Document>(
        &self,
        id: &str,
        index: Option<&str>,
        refresh: RefreshPolicy,
    ) -> Result<DeleteResult> {
        let index = self.resolver.resolve_for::<T>(index)?;
        trace!("🗑️ delete '{}' from '{}'", id, index);
        let raw = self
            .client
            .delete_document(&index, id, refresh)
            .await
            .map_err(|error| RepositoryError::transport(Operation::Delete, index.as_str(), Some(id), &error))?;
        adapt_delete(raw, &RequestContext::new(Operation::Delete, &index, Some(id)))
    }

    /// 👀 Does a document with `document`'s id exist?
    pub async fn exists<T: Document>(&self, document: &T, index: Option<&str>) -> Result<bool> {
        let id = Self::required_id(document)?;
        self.exists_by_id::<T>(&id, index).await
    }

    /// 👀 Absence is `false`; only real failures are errors.
    pub async fn exists_by_id<T: Document>(&self, id: &str, index: Option<&str>) -> Result<bool> {
        let index = self.resolver.resolve_for::<T>(index)?;
        let raw = self
            .client
            .document_exists(&index, id)
            .await
            .map_err(|error| RepositoryError::transport(Operation::Exists, index.as_str(), Some(id), &error))?;
        adapt_exists(raw, &RequestContext::new(Operation::Exists, &index, Some(id)))
    }
}
