use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use feedmill::config::Config;
use feedmill::feed::{build_client, DiscoveryRegistry, FeedValidator, Ingestor};
use feedmill::storage::{Database, DatabaseError};
use feedmill::telemetry::{InMemoryMetrics, Telemetry, TracingSink};

/// Get the config directory path (~/.config/feedmill/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedmill"))
}

/// Create the config directory with user-only permissions.
fn ensure_config_dir(config_dir: &Path) -> Result<()> {
    if !config_dir.exists() {
        std::fs::create_dir_all(config_dir).context("Failed to create config directory")?;
        tracing::info!(path = %config_dir.display(), "Created config directory");
    }

    // SEC-007: Set directory permissions on Unix (user-only access)
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match std::fs::metadata(config_dir) {
            Ok(metadata) => {
                let mut perms = metadata.permissions();
                perms.set_mode(0o700);
                if let Err(e) = std::fs::set_permissions(config_dir, perms) {
                    tracing::warn!(
                        path = %config_dir.display(),
                        error = %e,
                        "Failed to set config directory permissions to 0700"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    path = %config_dir.display(),
                    error = %e,
                    "Failed to read config directory metadata"
                );
            }
        }
    }

    Ok(())
}

#[derive(Parser, Debug)]
#[command(name = "feedmill", version, about = "Discover feeds and ingest their articles")]
struct Args {
    /// Config file (default: ~/.config/feedmill/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Database file, overriding the config
    #[arg(long, global = true, value_name = "FILE")]
    db: Option<PathBuf>,

    /// Debug logging for feedmill (RUST_LOG still wins when set)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Find feeds behind a page or platform URL
    Discover {
        url: String,
        /// Store every discovered feed as a source
        #[arg(long)]
        add: bool,
    },
    /// Validate a feed URL and store it as a source
    Add { url: String },
    /// Fetch the stalest sources in one paced batch
    FetchAll {
        /// Maximum sources in this batch
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Fetch one source by id
    Fetch { source_id: i64 },
    /// Fetch and parse a feed without storing anything
    Preview { url: String },
    /// Block a domain pattern (`example.com` or `*.example.com`)
    Block {
        pattern: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Remove a blocked domain pattern
    Unblock { pattern: String },
}

fn init_tracing(verbose: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose { "feedmill=debug" } else { "feedmill=info" };
        tracing_subscriber::EnvFilter::new(level)
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}

async fn open_database(path: &Path) -> Result<Database> {
    let path_str = path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    match Database::open(path_str).await {
        Ok(db) => Ok(db),
        Err(DatabaseError::Locked) => {
            eprintln!("Error: The database is locked by another process. Please try again.");
            std::process::exit(1);
        }
        Err(e) => Err(anyhow::anyhow!("Failed to open database: {}", e)),
    }
}

#[derive(Serialize)]
struct AddedSource {
    id: i64,
    url: String,
    title: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let settings = config.ingest_settings();
    let client = build_client(&settings).context("Failed to build HTTP client")?;

    let db_path = match args.db.clone().or_else(|| config.database_path.clone()) {
        Some(path) => path,
        None => {
            ensure_config_dir(&config_dir)?;
            config_dir.join("feedmill.db")
        }
    };

    match args.command {
        Command::Discover { url, add } => {
            let registry = DiscoveryRegistry::new(client, settings);
            let feeds = registry
                .discover(&url)
                .await
                .with_context(|| format!("Invalid URL: {url}"))?;

            if add {
                let db = open_database(&db_path).await?;
                for feed in &feeds {
                    let id = db
                        .insert_source(&feed.url, &feed.title)
                        .await
                        .with_context(|| format!("Failed to store source {}", feed.url))?;
                    tracing::info!(source_id = id, url = %feed.url, "Source stored");
                }
            }

            if feeds.is_empty() {
                eprintln!("No feeds found for {url}");
            }
            print_json(&feeds)
        }

        Command::Add { url } => {
            let db = open_database(&db_path).await?;
            if let Some(source) = db
                .get_source_by_url(&url)
                .await
                .context("Failed to look up source")?
            {
                tracing::info!(source_id = source.id, "Source already stored");
                return print_json(&AddedSource {
                    id: source.id,
                    url: source.url,
                    title: source.title,
                });
            }

            let validator = FeedValidator::new(client, settings);
            let Some(feed) = validator.validate(&url).await else {
                anyhow::bail!("{url} is not a reachable RSS, Atom, RDF or JSON feed");
            };
            let id = db
                .insert_source(&feed.url, &feed.title)
                .await
                .context("Failed to store source")?;
            print_json(&AddedSource {
                id,
                url: feed.url,
                title: feed.title,
            })
        }

        Command::FetchAll { limit } => {
            let db = open_database(&db_path).await?;
            let metrics = Arc::new(InMemoryMetrics::new());
            let telemetry = Telemetry::disabled()
                .with_sink(Arc::new(TracingSink))
                .with_metrics(metrics.clone());
            let ingestor = Ingestor::new(db, client, settings).with_telemetry(telemetry);

            let mut options = config.fetch_all_options();
            if let Some(limit) = limit {
                options.max_feeds_per_batch = limit.max(1);
            }

            let result = ingestor
                .fetch_all_feeds(&options)
                .await
                .context("Failed to select sources")?;
            print_json(&serde_json::json!({
                "result": result,
                "metrics": metrics.snapshot(),
            }))
        }

        Command::Fetch { source_id } => {
            let db = open_database(&db_path).await?;
            let source = db
                .get_source(source_id)
                .await
                .context("Failed to load source")?
                .ok_or_else(|| anyhow::anyhow!("No source with id {source_id}"))?;
            let telemetry = Telemetry::disabled().with_sink(Arc::new(TracingSink));
            let ingestor = Ingestor::new(db, client, settings).with_telemetry(telemetry);

            let result = ingestor
                .fetch_single_feed(source.id, &source.url, None)
                .await
                .with_context(|| format!("Failed to fetch {}", source.url))?;
            print_json(&result)
        }

        Command::Preview { url } => {
            // Preview never writes, so an in-memory store is enough
            let db = Database::open(":memory:")
                .await
                .context("Failed to open scratch database")?;
            let ingestor = Ingestor::new(db, client, settings);
            let preview = ingestor
                .fetch_and_parse_feed(&url)
                .await
                .with_context(|| format!("Failed to preview {url}"))?;
            print_json(&preview)
        }

        Command::Block { pattern, reason } => {
            let db = open_database(&db_path).await?;
            db.block_domain(&pattern, reason.as_deref())
                .await
                .context("Failed to block domain")?;
            println!("Blocked {pattern}");
            Ok(())
        }

        Command::Unblock { pattern } => {
            let db = open_database(&db_path).await?;
            let removed = db
                .unblock_domain(&pattern)
                .await
                .context("Failed to unblock domain")?;
            if removed {
                println!("Unblocked {pattern}");
            } else {
                eprintln!("{pattern} was not blocked");
            }
            Ok(())
        }
    }
}
