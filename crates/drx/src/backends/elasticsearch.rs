//! # 📡 THE ELASTICSEARCH BACKEND
//!
//! 🎬 COLD OPEN. INT. SERVER ROOM. 3:47 AM.
//!
//! The dashboard glows amber. Somebody asked the repository for document `o-1`, and the
//! repository, in turn, asked us. We are the part that actually speaks HTTP.
//!
//! 🧠 Knowledge graph:
//! - One `reqwest::Client`, built once, shared by every call (it pools connections).
//! - Auth: API key beats basic auth. Same club rules as always.
//! - `GET/PUT/POST/DELETE/HEAD /{index}/_doc/{id}` for single documents.
//! - `POST /{index}/_bulk` with NDJSON for batches. Two lines per document, trailing `\n`.
//! - Every answer becomes a `RawResponse`. We do not judge status codes here; the response
//!   adapter does. We only bail when no answer came back at all.
//!
//! 🔄 No retries. Retries are the caller's problem. Good luck.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Url};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, trace};

use crate::backends::{BulkOperation, RawResponse, SearchClient};
use crate::common::{IndexName, RefreshPolicy};

/// 📡 How to reach the cluster. Lives under `[elasticsearch]` in the config.
#[derive(Debug, Deserialize, Clone)]
pub struct ElasticsearchConfig {
    /// 📡 Scheme + host + port. Yes, all of it.
    pub url: String,
    /// 🔒 Username for basic auth. Optional, like flossing.
    #[serde(default)]
    pub username: Option<String>,
    /// 🔒 Password. If this is plaintext in your TOML, the Department of Security Choices has been notified.
    #[serde(default)]
    pub password: Option<String>,
    /// 🔒 API key auth, the velvet rope variant. Wins over basic auth.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// ⏱️ Whole-request timeout. Bulk requests can be meaty.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl ElasticsearchConfig {
    /// 🏗️ A config with nothing but a URL and the default timeouts.
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
            api_key: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// 📡 A [`SearchClient`] that talks to a real Elasticsearch (or OpenSearch) cluster.
#[derive(Debug, Clone)]
pub struct ElasticsearchClient {
    client: reqwest::Client,
    base_url: Url,
    config: ElasticsearchConfig,
}

impl ElasticsearchClient {
    /// 🚀 Build the client. No network traffic yet; see [`ElasticsearchClient::connect`].
    pub fn new(config: ElasticsearchConfig) -> Result<Self> {
        let base_url = Url::parse(&config.url).context(format!(
            "💀 '{}' is not a URL we can work with. Scheme, host, port. In that order. We believe in you.",
            config.url
        ))?;

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("💀 The HTTP client refused to be born. Probably a missing TLS cert or a cursed system OpenSSL. Either way: tragic.")?;

        Ok(Self {
            client,
            base_url,
            config,
        })
    }

    /// 🤝 Build the client and ping the cluster root, so a wrong URL fails here instead of
    /// 50,000 documents later.
    pub async fn connect(config: ElasticsearchConfig) -> Result<Self> {
        let this = Self::new(config)?;
        let response = this
            .authorized(this.client.get(this.base_url.clone()))
            .send()
            .await
            .context(format!(
                "💀 Knocked on '{}' and nobody answered. Is the cluster running? Is it the firewall again?",
                this.config.url
            ))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "💀 The cluster at '{}' answered the ping with '{}'. Body: '{}'. Check the credentials.",
                this.config.url,
                status,
                body
            );
        }
        debug!("✅ cluster at {} is home and accepting visitors", this.config.url);
        Ok(this)
    }

    /// 🔒 API key first, basic auth second, anonymous as a last resort (it won't work).
    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        if let Some(ref api_key) = self.config.api_key {
            request.header("Authorization", format!("ApiKey {}", api_key))
        } else if let Some(ref username) = self.config.username {
            request.basic_auth(username, self.config.password.as_ref())
        } else {
            request
        }
    }

    /// 🔗 `{base}/{segment}/{segment}...`, each segment percent-encoded.
    fn endpoint(&self, segments: &[&str], refresh: RefreshPolicy) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("💀 '{}' cannot be a base URL", self.config.url))?
            .pop_if_empty()
            .extend(segments);
        if let Some(value) = refresh.as_query_value() {
            url.query_pairs_mut().append_pair("refresh", value);
        }
        Ok(url)
    }

    async fn execute(&self, method: Method, url: Url, body: Option<(String, &'static str)>) -> Result<RawResponse> {
        trace!("📡 {} {}", method, url);
        let mut request = self.authorized(self.client.request(method.clone(), url.clone()));
        if let Some((payload, content_type)) = body {
            request = request.header("Content-Type", content_type).body(payload);
        }

        let response = request.send().await.context(format!(
            "💀 {} {} never made it to Elasticsearch. Check connectivity, check timeouts, check your feelings.",
            method, url
        ))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .context("💀 Elasticsearch started answering and then trailed off mid-sentence.")?;
        Ok(RawResponse::new(status, parse_body(&text)))
    }
}

/// 🧾 Empty body -> Null, JSON -> JSON, anything else -> a string we can at least print.
fn parse_body(text: &str) -> serde_json::Value {
    if text.trim().is_empty() {
        return serde_json::Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| serde_json::Value::String(text.to_string()))
}

/// 📦 Render operations into a `_bulk` NDJSON body.
///
/// Action line `{"index":{"_id":"..."}}` (no `_id` when the engine should pick one), then the
/// source as-is. Every line ends in `\n`, including the last one. The bulk API is watching.
pub(crate) fn render_bulk_body(operations: &[BulkOperation]) -> Result<String> {
    let estimated_size: usize = operations.iter().map(|op| op.source.len() + 64).sum();
    let mut body = String::with_capacity(estimated_size);
    for operation in operations {
        let action = match operation.id {
            Some(ref id) => json!({ "index": { "_id": id } }),
            None => json!({ "index": {} }),
        };
        let action_line = serde_json::to_string(&action)
            .context("💀 The JSON that describes JSON failed to become JSON. Alanis is writing another verse.")?;
        body.push_str(&action_line);
        body.push('\n');
        body.push_str(operation.source.trim_end_matches('\n'));
        body.push('\n');
    }
    Ok(body)
}

#[async_trait]
impl SearchClient for ElasticsearchClient {
    async fn get_document(&self, index: &IndexName, id: &str) -> Result<RawResponse> {
        let url = self.endpoint(&[index.as_str(), "_doc", id], RefreshPolicy::Unspecified)?;
        self.execute(Method::GET, url, None).await
    }

    async fn index_document(
        &self,
        index: &IndexName,
        id: Option<&str>,
        source: &serde_json::Value,
        refresh: RefreshPolicy,
    ) -> Result<RawResponse> {
        let payload = serde_json::to_string(source)
            .context("💀 The document refused to become JSON on its way out the door.")?;
        let (method, url) = match id {
            Some(id) => (Method::PUT, self.endpoint(&[index.as_str(), "_doc", id], refresh)?),
            None => (Method::POST, self.endpoint(&[index.as_str(), "_doc"], refresh)?),
        };
        self.execute(method, url, Some((payload, "application/json"))).await
    }

    async fn delete_document(
        &self,
        index: &IndexName,
        id: &str,
        refresh: RefreshPolicy,
    ) -> Result<RawResponse> {
        let url = self.endpoint(&[index.as_str(), "_doc", id], refresh)?;
        self.execute(Method::DELETE, url, None).await
    }

    async fn document_exists(&self, index: &IndexName, id: &str) -> Result<RawResponse> {
        let url = self.endpoint(&[index.as_str(), "_doc", id], RefreshPolicy::Unspecified)?;
        self.execute(Method::HEAD, url, None).await
    }

    async fn bulk(
        &self,
        index: &IndexName,
        operations: Vec<BulkOperation>,
        refresh: RefreshPolicy,
    ) -> Result<RawResponse> {
        let payload = render_bulk_body(&operations)?;
        debug!(
            "📡 Sending {} documents ({} bytes) to {}/_bulk",
            operations.len(),
            payload.len(),
            index
        );
        let url = self.endpoint(&[index.as_str(), "_bulk"], refresh)?;
        // ⚠️ application/x-ndjson, not application/json. Elasticsearch cares. Deeply.
        self.execute(Method::POST, url, Some((payload, "application/x-ndjson")))
            .await
            .context("💀 The bulk submission stumbled at the finish line.")
    }

    async fn search(&self, index: &IndexName, body: &serde_json::Value) -> Result<RawResponse> {
        let payload = serde_json::to_string(body)
            .context("💀 The search body could not be serialized. It was a query, briefly.")?;
        let url = self.endpoint(&[index.as_str(), "_search"], RefreshPolicy::Unspecified)?;
        self.execute(Method::POST, url, Some((payload, "application/json"))).await
    }
}
