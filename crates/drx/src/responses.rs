//! 🔄 Response adapter: raw engine answers in, small typed results out.
//!
//! Elasticsearch answers in many dialects. A get that found nothing is a 404 with
//! `"found": false`. A version conflict is a 409 with an `error` object. A bulk request
//! is a 200 even when half the documents were rejected, because of course it is.
//! This module is the interpreter.
//!
//! 🧠 Knowledge graph:
//! - `adapt_get`: 404 -> `found = false`. Absence is an outcome, not a failure.
//! - `adapt_write` / `adapt_delete` / `adapt_exists`: non-2xx -> `Operation` error with the
//!   engine's own diagnostic. Delete and exists treat 404 as "not there", not as failure.
//! - `adapt_bulk`: per-item failures become `BulkItemFailure`s in input order; a non-2xx bulk
//!   answer means the batch never happened and the stream is over.

use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::backends::{RawResponse, describe_error_object};
use crate::bulk::{BulkItemFailure, BulkOutcome};
use crate::common::IndexName;
use crate::errors::{Operation, RepositoryError, Result};

/// 🔍 Outcome of `get_by_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct GetResult<T> {
    pub index: IndexName,
    pub id: String,
    pub found: bool,
    pub version: Option<u64>,
    pub seq_no: Option<u64>,
    pub primary_term: Option<u64>,
    pub document: Option<T>,
}

/// ✍️ What the engine did with a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteDisposition {
    Created,
    Updated,
    Noop,
    Other,
}

/// ✍️ Outcome of `save`.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteResult {
    pub index: IndexName,
    pub id: String,
    pub version: Option<u64>,
    pub result: WriteDisposition,
}

impl WriteResult {
    pub fn created(&self) -> bool {
        self.result == WriteDisposition::Created
    }
}

/// 🗑️ Outcome of `delete`. `deleted = false` means there was nothing to delete.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteResult {
    pub index: IndexName,
    pub id: String,
    pub deleted: bool,
    pub version: Option<u64>,
    /// The engine's own word for it: `deleted`, `not_found`...
    pub result: Option<String>,
}

/// 🧾 Who asked, for what, where. Threaded into every error message.
#[derive(Debug, Clone)]
pub struct RequestContext<'a> {
    pub operation: Operation,
    pub index: &'a IndexName,
    pub id: Option<&'a str>,
}

impl<'a> RequestContext<'a> {
    pub fn new(operation: Operation, index: &'a IndexName, id: Option<&'a str>) -> Self {
        Self { operation, index, id }
    }

    fn rejected(&self, raw: &RawResponse) -> RepositoryError {
        RepositoryError::Operation {
            operation: self.operation,
            index: self.index.to_string(),
            id: self.id.map(str::to_string),
            status: Some(raw.status),
            reason: raw.error_reason(),
        }
    }

    fn malformed(&self, raw: &RawResponse, what: impl std::fmt::Display) -> RepositoryError {
        RepositoryError::Operation {
            operation: self.operation,
            index: self.index.to_string(),
            id: self.id.map(str::to_string),
            status: Some(raw.status),
            reason: format!("could not make sense of the engine's answer: {what}"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GetEnvelope<T> {
    #[serde(default)]
    found: bool,
    #[serde(rename = "_version")]
    version: Option<u64>,
    #[serde(rename = "_seq_no")]
    seq_no: Option<u64>,
    #[serde(rename = "_primary_term")]
    primary_term: Option<u64>,
    #[serde(rename = "_source")]
    source: Option<T>,
}

#[derive(Debug, Deserialize)]
struct WriteEnvelope {
    #[serde(rename = "_id")]
    id: Option<String>,
    #[serde(rename = "_version")]
    version: Option<u64>,
    result: Option<String>,
}

/// 🔍 Normalize a get. 404 is `found = false`, never an error.
pub fn adapt_get<T: DeserializeOwned>(raw: RawResponse, context: &RequestContext<'_>) -> Result<GetResult<T>> {
    let id = context.id.unwrap_or_default().to_string();
    if raw.is_not_found() {
        return Ok(GetResult {
            index: context.index.clone(),
            id,
            found: false,
            version: None,
            seq_no: None,
            primary_term: None,
            document: None,
        });
    }
    if !raw.is_success() {
        return Err(context.rejected(&raw));
    }

    // -- 🧬 a _source that doesn't fit T is a malformed answer, not a panic
    let envelope: GetEnvelope<T> =
        serde_json::from_value(raw.body.clone()).map_err(|e| context.malformed(&raw, e))?;
    let document = if envelope.found { envelope.source } else { None };
    Ok(GetResult {
        index: context.index.clone(),
        id,
        found: envelope.found,
        version: envelope.version,
        seq_no: envelope.seq_no,
        primary_term: envelope.primary_term,
        document,
    })
}

/// ✍️ Normalize a single write. Conflicts and validation failures become `Operation` errors.
pub fn adapt_write(raw: RawResponse, context: &RequestContext<'_>) -> Result<WriteResult> {
    if !raw.is_success() {
        return Err(context.rejected(&raw));
    }
    let envelope: WriteEnvelope =
        serde_json::from_value(raw.body.clone()).map_err(|e| context.malformed(&raw, e))?;
    // -- 🪪 generated ids only exist in the response, so the engine's word wins
    let id = envelope
        .id
        .or_else(|| context.id.map(str::to_string))
        .ok_or_else(|| context.malformed(&raw, "no _id in the write response"))?;
    let result = match envelope.result.as_deref() {
        Some("created") => WriteDisposition::Created,
        Some("updated") => WriteDisposition::Updated,
        Some("noop") => WriteDisposition::Noop,
        // -- 🤷 older clusters skip `result`. the status code still knows.
        _ if raw.status == 201 => WriteDisposition::Created,
        _ => WriteDisposition::Other,
    };
    Ok(WriteResult {
        index: context.index.clone(),
        id,
        version: envelope.version,
        result,
    })
}

/// 🗑️ Normalize a delete. 404 means it was already gone: `deleted = false`.
pub fn adapt_delete(raw: RawResponse, context: &RequestContext<'_>) -> Result<DeleteResult> {
    let id = context.id.unwrap_or_default().to_string();
    if raw.is_not_found() {
        // -- 👻 already gone. mission accomplished, technically.
        return Ok(DeleteResult {
            index: context.index.clone(),
            id,
            deleted: false,
            version: None,
            result: raw.body.get("result").and_then(|r| r.as_str()).map(str::to_string),
        });
    }
    if !raw.is_success() {
        return Err(context.rejected(&raw));
    }
    let version = raw.body.get("_version").and_then(|v| v.as_u64());
    let result = raw.body.get("result").and_then(|r| r.as_str()).map(str::to_string);
    Ok(DeleteResult {
        index: context.index.clone(),
        id,
        deleted: true,
        version,
        result,
    })
}

/// 👀 Normalize an existence check: 2xx = true, 404 = false, anything else = error.
pub fn adapt_exists(raw: RawResponse, context: &RequestContext<'_>) -> Result<bool> {
    if raw.is_success() {
        Ok(true)
    } else if raw.is_not_found() {
        Ok(false)
    } else {
        Err(context.rejected(&raw))
    }
}

/// 📋 What the batcher tells the adapter about one batch.
#[derive(Debug)]
pub(crate) struct BatchContext<'a> {
    pub index: &'a IndexName,
    pub sequence: u64,
    pub completed_batches: u64,
    /// Total documents in the batch, sent or not.
    pub submitted: usize,
    /// `(batch position, id)` of every document that went over the wire, in send order.
    pub sent: &'a [(usize, Option<String>)],
    /// Documents that failed before the network, already described.
    pub local_failures: Vec<BulkItemFailure>,
}

impl BatchContext<'_> {
    fn terminated(&self, reason: String) -> RepositoryError {
        RepositoryError::StreamTerminated {
            index: self.index.to_string(),
            sequence: self.sequence,
            completed_batches: self.completed_batches,
            reason,
        }
    }
}

/// 📦 Normalize a bulk answer into a [`BulkOutcome`].
///
/// Items are matched to sent documents by position. Any sent document without a matching
/// item is reported as failed, so `succeeded + failed == submitted` holds no matter what.
pub(crate) fn adapt_bulk(raw: RawResponse, context: BatchContext<'_>) -> Result<BulkOutcome> {
    if !raw.is_success() {
        let reason = format!("bulk request rejected with status {}: {}", raw.status, raw.error_reason());
        return Err(context.terminated(reason));
    }

    let took_ms = raw.body.get("took").and_then(|t| t.as_u64());
    let items = raw
        .body
        .get("items")
        .and_then(|items| items.as_array())
        .map(Vec::as_slice)
        .unwrap_or_default();

    // -- 🧭 item N answers the N-th document sent, which is not always batch position N
    let mut failures = context.local_failures;
    for (send_order, (position, id)) in context.sent.iter().enumerate() {
        match items.get(send_order).and_then(item_action_body) {
            Some(item) => {
                // -- 🔢 an absurd status saturates instead of wrapping around into a fake success
                let status = item
                    .get("status")
                    .and_then(|s| s.as_u64())
                    .map(|s| u16::try_from(s).unwrap_or(u16::MAX))
                    .unwrap_or(0);
                let error = item.get("error").filter(|e| !e.is_null());
                if error.is_some() || status >= 300 {
                    let error_type = error
                        .and_then(|e| e.get("type"))
                        .and_then(|t| t.as_str())
                        .map(str::to_string);
                    let reason = match error {
                        Some(serde_json::Value::String(message)) => message.clone(),
                        Some(object) => object
                            .get("reason")
                            .and_then(|r| r.as_str())
                            .map(str::to_string)
                            .or_else(|| describe_error_object(object))
                            .unwrap_or_else(|| object.to_string()),
                        None => format!("item answered with status {status}"),
                    };
                    // -- 🪪 auto-id docs only learn their name from the echo
                    let echoed_id = item.get("_id").and_then(|i| i.as_str()).map(str::to_string);
                    failures.push(BulkItemFailure {
                        position: *position,
                        id: id.clone().or(echoed_id),
                        status,
                        error_type,
                        reason,
                    });
                }
            }
            None => failures.push(BulkItemFailure {
                position: *position,
                id: id.clone(),
                status: 0,
                error_type: None,
                reason: "the engine returned no response item for this document".to_string(),
            }),
        }
    }
    failures.sort_by_key(|failure| failure.position);

    let failed = failures.len();
    Ok(BulkOutcome {
        sequence: context.sequence,
        submitted: context.submitted,
        succeeded: context.submitted.saturating_sub(failed),
        failed,
        failures,
        took_ms,
    })
}

/// 📎 `{"index": {...}}` / `{"create": {...}}` -> the inner object, whatever the action was.
fn item_action_body(item: &serde_json::Value) -> Option<&serde_json::Value> {
    item.as_object()?.values().next()
}
