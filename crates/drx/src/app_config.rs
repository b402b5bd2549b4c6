//! 🔧 App Configuration: the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." (every developer at 3am) 🦆
//!
//! 🏗️ Powered by Figment, because manually parsing env vars is a form of
//! self-harm that even the borrow checker wouldn't approve of.
//!
//! 🧠 Knowledge graph:
//! - `[elasticsearch]` -> [`ElasticsearchConfig`], lives next to the client that uses it.
//! - `[repository]` -> [`RepositoryConfig`], lives next to the repository that uses it.
//! - env vars: `DRX_ELASTICSEARCH__URL`, `DRX_REPOSITORY__BULK_BATCH_SIZE`... double
//!   underscore = one level of nesting.

use std::path::Path;

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::backends::ElasticsearchConfig;
use crate::repository::RepositoryConfig;

/// 📦 One struct to rule them all, and in the Figment bind them.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub elasticsearch: ElasticsearchConfig,
    #[serde(default)]
    pub repository: RepositoryConfig,
}

/// 🏗️ The layered figment: `DRX_*` env vars first, then the TOML file on top.
fn figment(config_file_name: Option<&Path>) -> Figment {
    let config = Figment::new().merge(Env::prefixed("DRX_").split("__"));
    match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    }
}

/// 🚀 Load the config from a file, from env vars, or from the sheer power of hoping.
///
/// 📐 Tribal knowledge:
///   - `None` -> env vars only. No file. No assumptions. No pizza defaults.
///   - `Some(path)` -> env vars + TOML file, merged. TOML wins on conflicts.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (DRX_*). \
             The file exists in our hearts, but apparently not on disk.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (DRX_*). \
                 No file was provided, so this one's all on the environment. Classic."
            .to_string(),
    };

    figment(config_file_name).extract().context(context_msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use crate::repository::DEFAULT_BULK_BATCH_SIZE;
    use crate::resolver::NamingStrategy;

    fn write_test_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("💀 Failed to create a temp config. The filesystem said 'new phone who dis'.");
        file.write_all(contents.as_bytes())
            .expect("💀 Failed to write test config.");
        file
    }

    #[test]
    fn the_one_where_every_knob_is_turned() {
        let file = write_test_config(
            r#"
            [elasticsearch]
            url = "https://search.internal:9200"
            api_key = "c2VjcmV0"
            request_timeout_secs = 90

            [repository]
            bulk_batch_size = 250
            naming = "pluralized"
            index_prefix = "prod-"

            [repository.type_indices]
            Order = "orders-2024"
            "#,
        );

        let app_config = load_config(Some(file.path()))
            .expect("💀 A complete config should parse. The schema drift goblin does not get this win.");

        assert_eq!(app_config.elasticsearch.url, "https://search.internal:9200");
        assert_eq!(app_config.elasticsearch.api_key.as_deref(), Some("c2VjcmV0"));
        assert_eq!(app_config.elasticsearch.request_timeout_secs, 90);
        assert_eq!(app_config.elasticsearch.connect_timeout_secs, 10);
        assert_eq!(app_config.repository.bulk_batch_size, 250);
        assert_eq!(app_config.repository.naming, NamingStrategy::Pluralized);
        assert_eq!(app_config.repository.index_prefix.as_deref(), Some("prod-"));
        assert_eq!(
            app_config.repository.type_indices.get("Order").map(String::as_str),
            Some("orders-2024")
        );
    }

    #[test]
    fn the_one_where_the_repository_section_shows_up_uninvited_but_helpful() {
        let file = write_test_config(
            r#"
            [elasticsearch]
            url = "http://localhost:9200"
            "#,
        );

        let app_config: AppConfig = Figment::new()
            .merge(Toml::file(file.path()))
            .extract()
            .expect("💀 The repository section is optional. Serde left us on read otherwise.");

        assert_eq!(app_config.repository.bulk_batch_size, DEFAULT_BULK_BATCH_SIZE);
        assert_eq!(app_config.repository.naming, NamingStrategy::Lowercase);
        assert!(app_config.repository.default_index.is_none());
    }

    #[test]
    fn the_one_where_env_vars_fill_in_and_toml_gets_the_last_word() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("DRX_ELASTICSEARCH__URL", "http://from-env:9200");
            jail.set_env("DRX_REPOSITORY__BULK_BATCH_SIZE", "42");
            jail.create_file(
                "drx.toml",
                r#"
                [repository]
                bulk_batch_size = 7
                "#,
            )?;

            let from_env: AppConfig = figment(None).extract()?;
            assert_eq!(from_env.elasticsearch.url, "http://from-env:9200");
            assert_eq!(from_env.repository.bulk_batch_size, 42);

            let layered: AppConfig = figment(Some(Path::new("drx.toml"))).extract()?;
            assert_eq!(layered.elasticsearch.url, "http://from-env:9200");
            assert_eq!(layered.repository.bulk_batch_size, 7, "TOML wins on conflicts");
            Ok(())
        });
    }

    #[test]
    fn the_one_where_a_missing_url_is_loud_about_it() {
        // -- 🕳️ the table is there, the url is not
        let file = write_test_config("[elasticsearch]\nusername = \"elastic\"\n\n[repository]\nbulk_batch_size = 10\n");
        let error = Figment::new()
            .merge(Toml::file(file.path()))
            .extract::<AppConfig>()
            .unwrap_err();
        assert!(error.to_string().contains("url"));
    }
}
