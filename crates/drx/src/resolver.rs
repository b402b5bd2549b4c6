//! 🧭 Index resolution: "which index?" answered exactly once per operation.
//!
//! 📜 The rules, in order of authority:
//! 1. A non-empty explicit index from the caller wins. Always. Caller intent is law.
//! 2. Otherwise the injected [`NamingConvention`] derives one from the document type.
//! 3. Otherwise: `RepositoryError::Configuration`. We refuse to guess.
//!
//! 🧠 Knowledge graph:
//! - `IndexResolver` is `Clone + Send + Sync` and holds no mutable state. Hand it to as many
//!   tasks as you like. It is the least dramatic struct in the crate.
//! - `from_config` builds the convention stack from `[repository]` settings:
//!   `naming` -> optional `type_indices` on top -> optional `index_prefix` around everything.
//! - `bulk_all` does NOT come through here with an empty index: it requires one explicitly.

pub mod conventions;

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use tracing::trace;

use crate::common::{Document, IndexName};
use crate::errors::{RepositoryError, Result};
use crate::repository::RepositoryConfig;
pub use conventions::{
    FixedIndex, LowercaseTypeName, NamingConvention, PluralizedTypeName, Prefixed,
    SnakeCaseTypeName, TypeMapped,
};

/// 🔧 The `naming` knob in `[repository]`.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NamingStrategy {
    #[default]
    Lowercase,
    Pluralized,
    SnakeCase,
    /// No derivation. Every call needs an explicit index, or `default_index`.
    None,
}

/// 🧭 Maps `(document type, optional override)` to an [`IndexName`].
#[derive(Clone, Default)]
pub struct IndexResolver {
    convention: Option<Arc<dyn NamingConvention>>,
}

impl fmt::Debug for IndexResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexResolver")
            .field("has_convention", &self.convention.is_some())
            .finish()
    }
}

impl IndexResolver {
    /// 🚀 A resolver driven by `convention`.
    pub fn new(convention: impl NamingConvention + 'static) -> Self {
        Self {
            convention: Some(Arc::new(convention)),
        }
    }

    /// 🔒 A resolver with no convention: explicit indices or bust.
    pub fn explicit_only() -> Self {
        Self { convention: None }
    }

    /// 🏗️ Build the convention stack described by `[repository]`.
    pub fn from_config(config: &RepositoryConfig) -> Self {
        let mut convention: Option<Arc<dyn NamingConvention>> = match config.naming {
            NamingStrategy::Lowercase => Some(Arc::new(LowercaseTypeName)),
            NamingStrategy::Pluralized => Some(Arc::new(PluralizedTypeName)),
            NamingStrategy::SnakeCase => Some(Arc::new(SnakeCaseTypeName)),
            NamingStrategy::None => None,
        };

        if let Some(default_index) = config.default_index.as_deref().filter(|d| !d.trim().is_empty()) {
            // -- 📌 `default_index` only fills the gap when there is no derivation strategy
            if convention.is_none() {
                convention = Some(Arc::new(FixedIndex(default_index.trim().to_string())));
            }
        }

        if !config.type_indices.is_empty() {
            convention = Some(Arc::new(TypeMapped {
                mappings: config.type_indices.clone(),
                fallback: convention,
            }));
        }

        if let Some(prefix) = config.index_prefix.as_deref().filter(|p| !p.is_empty()) {
            convention = convention.map(|inner| {
                Arc::new(Prefixed {
                    prefix: prefix.to_string(),
                    inner,
                }) as Arc<dyn NamingConvention>
            });
        }

        Self { convention }
    }

    /// 🎯 Resolve an index for `document_type`.
    ///
    /// `explicit_override` of `None`, `""` or whitespace counts as "not given".
    pub fn resolve(&self, document_type: &str, explicit_override: Option<&str>) -> Result<IndexName> {
        if let Some(explicit) = explicit_override.filter(|o| !o.trim().is_empty()) {
            trace!("🎯 explicit index '{}' wins for '{}'", explicit, document_type);
            return IndexName::new(explicit);
        }

        let convention = self.convention.as_ref().ok_or_else(|| {
            RepositoryError::configuration(
                document_type,
                "no index was given and no naming convention is configured",
            )
        })?;

        let derived = convention.index_name(document_type).ok_or_else(|| {
            RepositoryError::configuration(
                document_type,
                "the naming convention has no index for this type",
            )
        })?;

        IndexName::new(&derived).map_err(|_| {
            RepositoryError::configuration(document_type, "the naming convention produced an empty index name")
        })
    }

    /// 🎯 [`IndexResolver::resolve`] for a [`Document`] type.
    pub fn resolve_for<T: Document>(&self, explicit_override: Option<&str>) -> Result<IndexName> {
        self.resolve(T::document_type(), explicit_override)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use serde::Serialize;

    #[derive(Debug, Serialize, Deserialize)]
    struct Order {
        id: String,
    }
    impl Document for Order {}

    fn config(naming: NamingStrategy) -> RepositoryConfig {
        RepositoryConfig {
            naming,
            ..RepositoryConfig::default()
        }
    }

    #[test]
    fn the_one_where_the_override_beats_the_convention() {
        let resolver = IndexResolver::new(PluralizedTypeName);
        let resolved = resolver
            .resolve_for::<Order>(Some("orders-2024"))
            .expect("💀 explicit index should always resolve");
        assert_eq!(resolved.as_str(), "orders-2024");
    }

    #[test]
    fn the_one_where_the_override_arrives_exactly_as_it_was_sent() {
        let resolver = IndexResolver::new(PluralizedTypeName);
        let resolved = resolver
            .resolve_for::<Order>(Some(" orders-2024 "))
            .expect("💀 a padded override is still an override");
        assert_eq!(resolved.as_str(), " orders-2024 ");
    }

    #[test]
    fn the_one_where_the_convention_fills_in_when_the_caller_shrugs() {
        let resolver = IndexResolver::new(PluralizedTypeName);
        assert_eq!(resolver.resolve_for::<Order>(None).unwrap().as_str(), "orders");
        assert_eq!(resolver.resolve_for::<Order>(Some("")).unwrap().as_str(), "orders");
        assert_eq!(resolver.resolve_for::<Order>(Some("  ")).unwrap().as_str(), "orders");
    }

    #[test]
    fn the_one_where_nobody_knows_the_index_and_we_refuse_to_guess() {
        let resolver = IndexResolver::explicit_only();
        match resolver.resolve_for::<Order>(None) {
            Err(RepositoryError::Configuration { document_type, .. }) => {
                assert_eq!(document_type, "Order");
            }
            plot_twist => panic!("💀 expected a Configuration error, got {plot_twist:?}"),
        }
        // -- ✅ but an explicit index still works without a convention
        assert_eq!(resolver.resolve_for::<Order>(Some("orders")).unwrap().as_str(), "orders");
    }

    #[test]
    fn the_one_where_a_convention_that_returns_nothing_is_a_configuration_problem() {
        let resolver = IndexResolver::new(|_: &str| Some(String::new()));
        assert!(matches!(
            resolver.resolve("Order", None),
            Err(RepositoryError::Configuration { .. })
        ));

        let declines = IndexResolver::new(|_: &str| None);
        assert!(matches!(
            declines.resolve("Order", None),
            Err(RepositoryError::Configuration { .. })
        ));
    }

    #[test]
    fn the_one_where_config_builds_the_whole_convention_stack() {
        let plain = IndexResolver::from_config(&config(NamingStrategy::Lowercase));
        assert_eq!(plain.resolve("Order", None).unwrap().as_str(), "order");

        let fancy = IndexResolver::from_config(&RepositoryConfig {
            naming: NamingStrategy::Pluralized,
            index_prefix: Some("prod-".into()),
            type_indices: HashMap::from([("Invoice".to_string(), "billing".to_string())]),
            ..RepositoryConfig::default()
        });
        assert_eq!(fancy.resolve("Order", None).unwrap().as_str(), "prod-orders");
        assert_eq!(fancy.resolve("Invoice", None).unwrap().as_str(), "prod-billing");

        let catchall = IndexResolver::from_config(&RepositoryConfig {
            naming: NamingStrategy::None,
            default_index: Some("catchall".into()),
            ..RepositoryConfig::default()
        });
        assert_eq!(catchall.resolve("Order", None).unwrap().as_str(), "catchall");

        let strict = IndexResolver::from_config(&config(NamingStrategy::None));
        assert!(strict.resolve("Order", None).is_err());
    }
}
