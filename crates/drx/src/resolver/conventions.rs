//! 🏷️ Naming conventions: how a type name becomes an index name when nobody says otherwise.
//!
//! Every deployment has Opinions about index names. Some want `order`, some want `orders`,
//! some want `prod-order_lines`, and one team insists everything goes into `catchall`.
//! So conventions are a strategy trait, and you bring your own.
//!
//! A convention may decline by returning `None`. The resolver turns that into a
//! `Configuration` error, because guessing an index is how data ends up in the wrong place.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// 🧭 Maps a document type name to a default index name.
///
/// Must be pure and cheap: the resolver calls it on every operation that omits an index.
pub trait NamingConvention: Send + Sync {
    fn index_name(&self, document_type: &str) -> Option<String>;
}

/// 🎭 Closures are conventions too. `|t: &str| Some(format!("{t}-v2"))` and you're done.
impl<F> NamingConvention for F
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    fn index_name(&self, document_type: &str) -> Option<String> {
        self(document_type)
    }
}

/// 🔡 `Order` -> `order`. The NEST classic.
#[derive(Debug, Clone, Copy, Default)]
pub struct LowercaseTypeName;

impl NamingConvention for LowercaseTypeName {
    fn index_name(&self, document_type: &str) -> Option<String> {
        Some(document_type.to_lowercase())
    }
}

/// 📚 `Order` -> `orders`, `Category` -> `categories`, `Box` -> `boxes`.
///
/// English plurals, the 80% edition. If you index `Octopus` documents, please bring your
/// own convention and a marine biologist.
#[derive(Debug, Clone, Copy, Default)]
pub struct PluralizedTypeName;

impl NamingConvention for PluralizedTypeName {
    fn index_name(&self, document_type: &str) -> Option<String> {
        Some(pluralize(&document_type.to_lowercase()))
    }
}

/// 🐍 `OrderLine` -> `order_line`. For the pythonistas in the cluster team.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnakeCaseTypeName;

impl NamingConvention for SnakeCaseTypeName {
    fn index_name(&self, document_type: &str) -> Option<String> {
        Some(snake_case(document_type))
    }
}

/// 📌 Everything goes to one index. The deployment-wide default index.
#[derive(Debug, Clone)]
pub struct FixedIndex(pub String);

impl NamingConvention for FixedIndex {
    fn index_name(&self, _document_type: &str) -> Option<String> {
        Some(self.0.clone())
    }
}

/// 🗺️ Explicit per-type indices, with an optional fallback convention for everybody else.
#[derive(Clone)]
pub struct TypeMapped {
    pub mappings: HashMap<String, String>,
    pub fallback: Option<Arc<dyn NamingConvention>>,
}

impl fmt::Debug for TypeMapped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeMapped")
            .field("mappings", &self.mappings)
            .field("has_fallback", &self.fallback.is_some())
            .finish()
    }
}

impl NamingConvention for TypeMapped {
    fn index_name(&self, document_type: &str) -> Option<String> {
        match self.mappings.get(document_type) {
            Some(mapped) => Some(mapped.clone()),
            None => self
                .fallback
                .as_ref()
                .and_then(|fallback| fallback.index_name(document_type)),
        }
    }
}

/// 🏗️ Glue a prefix in front of another convention's answer. `prod-` + `orders`.
#[derive(Clone)]
pub struct Prefixed {
    pub prefix: String,
    pub inner: Arc<dyn NamingConvention>,
}

impl fmt::Debug for Prefixed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Prefixed")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl NamingConvention for Prefixed {
    fn index_name(&self, document_type: &str) -> Option<String> {
        self.inner
            .index_name(document_type)
            .map(|name| format!("{}{}", self.prefix, name))
    }
}

fn pluralize(word: &str) -> String {
    let ends_with_any = |suffixes: &[&str]| suffixes.iter().any(|s| word.ends_with(s));

    if word.is_empty() {
        return String::new();
    }
    if ends_with_any(&["s", "x", "z", "ch", "sh"]) {
        return format!("{word}es");
    }
    if let Some(stem) = word.strip_suffix('y') {
        // -- 🔑 key -> keys, but category -> categories
        let vowel_before_y = stem
            .chars()
            .last()
            .is_some_and(|c| matches!(c, 'a' | 'e' | 'i' | 'o' | 'u'));
        if !vowel_before_y && !stem.is_empty() {
            return format!("{stem}ies");
        }
    }
    format!("{word}s")
}

fn snake_case(name: &str) -> String {
    let mut snake = String::with_capacity(name.len() + 4);
    let chars: Vec<char> = name.chars().collect();
    for (i, c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            // -- 🐍 HTTPRequest -> http_request: break before the last capital of an acronym run
            let prev_is_lower = i > 0 && (chars[i - 1].is_lowercase() || chars[i - 1].is_ascii_digit());
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            let prev_is_upper = i > 0 && chars[i - 1].is_uppercase();
            if i > 0 && (prev_is_lower || (prev_is_upper && next_is_lower)) {
                snake.push('_');
            }
            snake.extend(c.to_lowercase());
        } else {
            snake.push(*c);
        }
    }
    snake
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_plurals_mostly_behave() {
        let plural = |w: &str| PluralizedTypeName.index_name(w).unwrap();
        assert_eq!(plural("Order"), "orders");
        assert_eq!(plural("Category"), "categories");
        assert_eq!(plural("Key"), "keys");
        assert_eq!(plural("Box"), "boxes");
        assert_eq!(plural("Address"), "addresses");
        assert_eq!(plural("Batch"), "batches");
    }

    #[test]
    fn the_one_where_snakes_handle_acronyms() {
        assert_eq!(snake_case("OrderLine"), "order_line");
        assert_eq!(snake_case("HTTPRequest"), "http_request");
        assert_eq!(snake_case("Order"), "order");
        assert_eq!(snake_case("V2Order"), "v2_order");
    }

    #[test]
    fn the_one_where_type_mappings_win_and_fallbacks_catch_the_rest() {
        let convention = TypeMapped {
            mappings: HashMap::from([("Order".to_string(), "orders-2024".to_string())]),
            fallback: Some(Arc::new(LowercaseTypeName)),
        };
        assert_eq!(convention.index_name("Order").as_deref(), Some("orders-2024"));
        assert_eq!(convention.index_name("Invoice").as_deref(), Some("invoice"));

        let no_fallback = TypeMapped {
            mappings: HashMap::new(),
            fallback: None,
        };
        assert_eq!(no_fallback.index_name("Invoice"), None);
    }

    #[test]
    fn the_one_where_prefixes_and_closures_compose() {
        let prefixed = Prefixed {
            prefix: "prod-".into(),
            inner: Arc::new(PluralizedTypeName),
        };
        assert_eq!(prefixed.index_name("Order").as_deref(), Some("prod-orders"));

        let versioned = |t: &str| Some(format!("{}-v2", t.to_lowercase()));
        assert_eq!(versioned.index_name("Order").as_deref(), Some("order-v2"));
        assert_eq!(FixedIndex("catchall".into()).index_name("Anything").as_deref(), Some("catchall"));
    }
}
