use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use planet_fetch::config::{resolve_database_url, Config};
use planet_fetch::db::Database;
use planet_fetch::scheduler::Scheduler;
use planet_fetch::sink::DatabaseSink;
use planet_fetch::source::HttpFeedSource;

#[derive(Parser)]
#[command(name = "planet-fetch", version, about = "Planet style feed aggregator")]
struct Cli {
    /// Config file
    #[arg(long, global = true, default_value = "planet.toml")]
    config: PathBuf,

    /// Database connection string, overrides the config file
    #[arg(long, global = true, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Poll every configured feed until interrupted
    Fetch {
        /// Timeout (in minutes) for feed retrieval
        #[arg(long)]
        rsstimeout: Option<i64>,
    },
    /// List stored channels, most recently updated first
    Channels,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "planet_fetch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Fetch { rsstimeout } => {
            let mut config = Config::load(&cli.config)
                .with_context(|| format!("failed to load config from {}", cli.config.display()))?;
            if let Some(minutes) = rsstimeout {
                config.rss_timeout = minutes;
            }
            info!(
                "Loaded {} feeds, timeout {:?}",
                config.feeds.len(),
                config.effective_timeout()
            );

            let db = open_database(&config.resolve_database_url(cli.database_url)).await?;
            let source = Arc::new(HttpFeedSource::new()?);
            let sink = Arc::new(DatabaseSink::new(db, config.seen_cache_size));
            let _supervisor = Scheduler::new(source, sink).start(config.descriptors());

            tokio::signal::ctrl_c().await?;
            info!("Interrupted, shutting down");
        }
        Command::Channels => {
            // Only the database is read here, so a missing config file is fine
            let configured = if cli.config.exists() {
                Config::load(&cli.config)
                    .with_context(|| {
                        format!("failed to load config from {}", cli.config.display())
                    })?
                    .database_url
            } else {
                None
            };
            let database_url = resolve_database_url(cli.database_url, configured.as_deref());

            let db = open_database(&database_url).await?;
            for channel in db.all_channels().await? {
                println!(
                    "{}\t{}\t{}",
                    channel.last_build_date.as_deref().unwrap_or("-"),
                    channel.title,
                    channel.key
                );
            }
        }
    }

    Ok(())
}

async fn open_database(database_url: &str) -> anyhow::Result<Arc<Database>> {
    let db = Database::new(database_url)
        .await
        .with_context(|| format!("can't connect to {}", database_url))?;
    db.initialize().await?;
    Ok(Arc::new(db))
}
