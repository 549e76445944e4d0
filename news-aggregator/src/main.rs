use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use interfaces::{BaselineSummarizer, LogDelivery, SqliteHistoryStore};
use news_aggregator::{config, AppConfig, Pipeline};
use tracing::{error, info};

/// Collect, deduplicate and select news items from the configured sources once.
#[derive(Debug, Parser)]
#[command(name = "news-aggregator", version)]
struct Cli {
    /// Directory holding pipeline.json and sources.json
    #[arg(long, default_value = "config")]
    config_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let app = AppConfig::load(&cli.config_dir)
        .with_context(|| format!("loading {}", cli.config_dir.display()))?;
    let sources = config::load_sources(&cli.config_dir)?;

    ensure_sqlite_dir(&app.history_database_url)?;
    let store = SqliteHistoryStore::connect(&app.history_database_url)
        .await
        .map_err(|e| {
            error!("Cannot open history store at {}", app.history_database_url);
            e
        })?;
    let store = Arc::new(store);

    let pipeline = Pipeline::new(
        &app,
        &sources,
        store.clone(),
        Arc::new(BaselineSummarizer),
        Arc::new(LogDelivery),
    );

    let report = pipeline.run_once().await?;
    info!(
        "Run {} done: {} selected, {} failed sources",
        report.run_id,
        report.selection.len(),
        report.failed_sources().len()
    );

    store.close().await;
    Ok(())
}

/// SQLite creates the database file but not its parent directory.
fn ensure_sqlite_dir(url: &str) -> anyhow::Result<()> {
    let Some(path) = url.strip_prefix("sqlite://").or_else(|| url.strip_prefix("sqlite:")) else {
        return Ok(());
    };
    let path = path.split('?').next().unwrap_or_default();
    if path.is_empty() || path == ":memory:" {
        return Ok(());
    }
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }
    Ok(())
}
