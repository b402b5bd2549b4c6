//! 📚 drx: a typed document repository in front of Elasticsearch.
//!
//! 🎬 *[a caller holds a struct. the cluster holds an index. between them: us.]*
//!
//! ```text
//!  caller ── Repository ── IndexResolver ──> IndexName
//!                │
//!                ├── SearchClient (elasticsearch | in_mem) ──> RawResponse
//!                │                                               │
//!                └── responses::adapt_* <────────────────────────┘
//!                └── BulkBatcher ──> BulkAllObservable ──> BulkOutcome, BulkOutcome, ...
//! ```
//!
//! 🦆 Pure leaf modules first (`common`, `errors`, `resolver`), then the client seam
//! (`backends`), then everything that composes them.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

pub mod app_config;
pub mod backends;
pub mod bulk;
pub mod common;
pub mod errors;
pub mod progress;
pub mod queries;
pub mod repository;
pub mod resolver;
pub mod responses;
pub mod sources;

pub use app_config::{AppConfig, load_config};
pub use backends::{ElasticsearchClient, ElasticsearchConfig, InMemorySearchClient, SearchClient};
pub use bulk::{BulkAllCancellation, BulkAllObservable, BulkAllObserver, BulkOutcome, BulkSummary};
pub use common::{Document, IndexName, JsonDocument, RefreshPolicy};
pub use errors::{RepositoryError, Result as RepositoryResult};
pub use queries::{CountQuery, QueryObject, SearchQuery};
pub use repository::{Repository, RepositoryConfig};
pub use resolver::IndexResolver;

/// 🚀 Connect to the configured cluster and wrap it in a [`Repository`].
///
/// Pings the cluster first, so a wrong URL fails here and not on the first save.
pub async fn connect(config: &AppConfig) -> Result<Repository<ElasticsearchClient>> {
    let client = ElasticsearchClient::connect(config.elasticsearch.clone())
        .await
        .with_context(|| format!("💀 could not reach Elasticsearch at '{}'", config.elasticsearch.url))?;
    info!("📡 connected to '{}'", config.elasticsearch.url);
    Ok(Repository::from_config(Arc::new(client), &config.repository))
}
