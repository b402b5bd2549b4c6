//! 🚀 drx-cli: the front door, the bouncer, the maitre d' of drx.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! 📦 This binary crate loads config, sets up logging, parses a subcommand, and then lets
//! the repository do the heavy lifting. Like a manager. 🦆

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use drx::progress::{BulkProgress, render_summary};
use drx::{CountQuery, ElasticsearchClient, JsonDocument, RefreshPolicy, Repository};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// 📚 A typed document repository in front of Elasticsearch.
#[derive(Debug, Parser)]
#[command(name = "drx", version, about)]
struct Cli {
    /// 🔧 TOML config file. Skipped if it does not exist; `DRX_*` env vars still apply.
    #[arg(long, short, default_value = "drx.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 🌊 Stream an NDJSON file (optionally .gz) into an index.
    Ingest {
        file: PathBuf,
        #[arg(long)]
        index: String,
        /// Overrides `repository.bulk_batch_size`.
        #[arg(long)]
        batch_size: Option<usize>,
        /// Documents the file reader may buffer ahead of the bulk worker.
        #[arg(long, default_value_t = 10_000)]
        read_ahead: usize,
        #[arg(long)]
        refresh: Option<bool>,
    },
    /// 🔍 Print one document.
    Get {
        id: String,
        #[arg(long)]
        index: Option<String>,
    },
    /// 👀 Print whether a document exists.
    Exists {
        id: String,
        #[arg(long)]
        index: Option<String>,
    },
    /// 🗑️ Delete one document.
    Delete {
        id: String,
        #[arg(long)]
        index: Option<String>,
        #[arg(long)]
        refresh: Option<bool>,
    },
    /// 🔢 Count the documents in an index.
    Count {
        #[arg(long)]
        index: Option<String>,
    },
}

/// 🚀 main(): where it all begins. The "I pressed F5 and held my breath" moment.
#[tokio::main]
async fn main() -> Result<()> {
    // 📡 stderr, so stdout stays clean for whatever gets piped out of `drx get`
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        error!("💀 error: {}", err);
        // -- 🧅 peel the onion of sadness, one layer at a time
        let mut the_vibes_are_giving_connection_issues = false;
        for cause in err.chain().skip(1) {
            error!("⚠️  cause: {}", cause);
            let cause_str = cause.to_string();
            if cause_str.contains("error sending request")
                || cause_str.contains("connection refused")
                || cause_str.contains("Connection refused")
                || cause_str.contains("tcp connect error")
                || cause_str.contains("dns error")
            {
                the_vibes_are_giving_connection_issues = true;
            }
        }

        if the_vibes_are_giving_connection_issues {
            error!(
                "🔧 hint: looks like Elasticsearch isn't reachable. \
                Double-check that the cluster is actually running and that `elasticsearch.url` \
                points at it. If you're using Docker, try `docker ps` to see what's up, \
                or `docker compose up -d` to resurrect it. ☕"
            );
        }

        std::process::exit(1);
    }

    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let config_file = cli.config.as_path();
    let config_file_that_exists: Option<&Path> = config_file
        .try_exists()
        .context(format!(
            "💀 Could not check whether '{}' exists. Permissions, maybe? Try an absolute path.",
            config_file.display()
        ))?
        .then_some(config_file);

    let app_config = drx::load_config(config_file_that_exists)
        .context("💀 In drx-cli, we couldn't load the configuration. Check the file and the DRX_* env vars.")?;
    let repository = drx::connect(&app_config).await?;

    match cli.command {
        Command::Ingest {
            file,
            index,
            batch_size,
            read_ahead,
            refresh,
        } => ingest(repository, &file, &index, batch_size, read_ahead, refresh.into()).await,
        Command::Get { id, index } => {
            let result = repository.get_by_id::<JsonDocument>(&id, index.as_deref()).await?;
            match result.document {
                Some(document) => println!("{}", serde_json::to_string_pretty(&document)?),
                None => {
                    info!("🔍 '{}' is not in '{}'", id, result.index);
                    std::process::exit(2);
                }
            }
            Ok(())
        }
        Command::Exists { id, index } => {
            let exists = repository.exists_by_id::<JsonDocument>(&id, index.as_deref()).await?;
            println!("{exists}");
            Ok(())
        }
        Command::Delete { id, index, refresh } => {
            let result = repository
                .delete_by_id::<JsonDocument>(&id, index.as_deref(), refresh.into())
                .await?;
            println!("{}", if result.deleted { "deleted" } else { "not_found" });
            Ok(())
        }
        Command::Count { index } => {
            let count = repository.query(&CountQuery::<JsonDocument>::all(), index.as_deref()).await?;
            println!("{count}");
            Ok(())
        }
    }
}

async fn ingest(
    repository: Repository<ElasticsearchClient>,
    file: &Path,
    index: &str,
    batch_size: Option<usize>,
    read_ahead: usize,
    refresh: RefreshPolicy,
) -> Result<()> {
    let repository = match batch_size {
        Some(size) => repository.with_bulk_batch_size(size),
        None => repository,
    };
    let (documents, reader) = drx::sources::ndjson_file(file, read_ahead)?.into_parts();
    let observable = repository.bulk_all(documents, index, refresh)?;
    let progress = BulkProgress::new(file.display().to_string(), None);

    let summary = observable
        .subscribe(progress)
        .await
        .context(format!("💀 ingesting '{}' into '{}' did not finish", file.display(), index))?;
    let stats = reader
        .await
        .context("💀 the file reader task went missing")??;

    println!("{}", render_summary(&summary));
    info!(
        "📖 read {} lines: {} documents, {} skipped",
        stats.lines, stats.documents, stats.skipped
    );
    if summary.failed > 0 {
        anyhow::bail!("⚠️ {} of {} documents were rejected", summary.failed, summary.submitted);
    }
    Ok(())
}
