//! 📦 Common data structures: the building blocks every other module leans on.
//!
//! 🎬 COLD OPEN. INT. REPOSITORY. 3:47 AM.
//!
//! A document arrives. It has fields. It has feelings. It may or may not have an id.
//! It definitely does not know which index it belongs to. That is somebody else's job
//! (see `resolver`). This module only teaches documents to introduce themselves.
//!
//! 🧠 Knowledge graph:
//! - [`Document`]: the one capability the repository needs from a caller type. A type name
//!   for index conventions and an id for addressing. Both have defaults.
//! - [`IndexName`]: a non-empty index name. If you hold one, it was validated. No exceptions.
//! - [`RefreshPolicy`]: the tri-state refresh flag, forwarded to the engine untouched.
//! - [`JsonDocument`]: a schemaless document for the CLI and the NDJSON source.
//!
//! 🦆 (mandatory duck, no context provided)

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::errors::{RepositoryError, Result};

/// 📄 A typed document the repository can store.
///
/// Implement it with an empty `impl Document for Order {}` and you get:
/// - `document_type()` = the unqualified Rust type name (`Order`)
/// - an id = the top-level `id` field of the serialized document, if any
///
/// Override `document_type` or `id_from_source` when your type has other ideas. The
/// repository never mutates documents; it only borrows them long enough to serialize.
pub trait Document: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// 🏷️ The name naming conventions are fed with.
    fn document_type() -> &'static str {
        short_type_name(std::any::type_name::<Self>())
    }

    /// 🪪 The id-extraction capability. `None` means "let the engine pick one" for writes.
    ///
    /// `source` is this document already serialized, so the default costs nothing extra. It
    /// is `Null` when the document would not serialize; overrides that read their own fields
    /// can ignore it.
    fn id_from_source(&self, source: &serde_json::Value) -> Option<String> {
        id_from_json(source)
    }

    /// 🪪 Serialize, then [`Document::id_from_source`]. Override that one, not this.
    fn document_id(&self) -> Option<String> {
        let source = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        self.id_from_source(&source)
    }
}

/// 🔪 `my_app::orders::Order<Foo>` -> `Order`. Generics and paths are vibes, not names.
pub fn short_type_name(full_name: &'static str) -> &'static str {
    let without_generics = match full_name.find('<') {
        Some(cut) => &full_name[..cut],
        None => full_name,
    };
    match without_generics.rfind("::") {
        Some(cut) => &without_generics[cut + 2..],
        None => without_generics,
    }
}

/// 🪪 Read a top-level `id` (or `_id`) from a JSON object. Strings and numbers both count.
pub(crate) fn id_from_json(value: &serde_json::Value) -> Option<String> {
    let object = value.as_object()?;
    let candidate = object.get("id").or_else(|| object.get("_id"))?;
    match candidate {
        serde_json::Value::String(id) if !id.is_empty() => Some(id.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// 📡 A validated, non-empty index name.
///
/// There is deliberately no `Default` and no `From<String>`: the only door in is
/// [`IndexName::new`], and the bouncer checks for emptiness.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct IndexName(String);

impl IndexName {
    /// 🔒 Kept exactly as given. Empty or whitespace-only is a `Configuration` error.
    pub fn new(name: impl AsRef<str>) -> Result<Self> {
        let name = name.as_ref();
        if name.trim().is_empty() {
            return Err(RepositoryError::configuration(
                "<explicit>",
                "index names cannot be empty",
            ));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IndexName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for IndexName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// 🔄 Should the engine refresh after this write?
///
/// Tri-state on purpose. `Unspecified` means we do not send the parameter at all and the
/// cluster does whatever its settings say. Collapsing it into a `bool` would be lossy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshPolicy {
    #[default]
    Unspecified,
    Refresh,
    NoRefresh,
}

impl RefreshPolicy {
    /// 📡 The `refresh` query parameter value, if one should be sent.
    pub fn as_query_value(self) -> Option<&'static str> {
        match self {
            RefreshPolicy::Unspecified => None,
            RefreshPolicy::Refresh => Some("true"),
            RefreshPolicy::NoRefresh => Some("false"),
        }
    }
}

impl From<Option<bool>> for RefreshPolicy {
    fn from(flag: Option<bool>) -> Self {
        match flag {
            None => RefreshPolicy::Unspecified,
            Some(true) => RefreshPolicy::Refresh,
            Some(false) => RefreshPolicy::NoRefresh,
        }
    }
}

impl From<bool> for RefreshPolicy {
    fn from(flag: bool) -> Self {
        Some(flag).into()
    }
}

/// 🧾 A schemaless document: whatever JSON object you had lying around.
///
/// Used by the CLI and the NDJSON source. Its id comes from the `id`/`_id` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JsonDocument(pub serde_json::Value);

impl Document for JsonDocument {
    fn document_type() -> &'static str {
        "document"
    }

    fn id_from_source(&self, _source: &serde_json::Value) -> Option<String> {
        // -- 🪞 we ARE the source
        id_from_json(&self.0)
    }
}
