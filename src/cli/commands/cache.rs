//! Cache command - inspect or clear a file-backed response cache

use crate::cache::{CacheEntry, CacheSettings, CacheStore, FileStore, ResponseCache};
use crate::cli::args::{CacheAction, CacheArgs, OutputFormat};
use crate::config::Config;
use crate::error::{HarborError, HarborResult};
use chrono::{DateTime, Utc};
use console::style;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config) -> HarborResult<()> {
    match args.action {
        CacheAction::List { store, format } => {
            let store = open_store(store, config).await?;
            list_entries(&store, format).await
        }
        CacheAction::Clear { store } => {
            let store = open_store(store, config).await?;
            clear_entries(store, config).await
        }
    }
}

/// Open the store named on the command line, falling back to cache.store_dir
async fn open_store(store: Option<PathBuf>, config: &Config) -> HarborResult<FileStore> {
    let dir = store
        .or_else(|| config.cache.store_dir.clone())
        .ok_or_else(|| HarborError::SettingInvalid {
            setting: "cache.store_dir".to_string(),
            reason: "no store directory configured; pass --store".to_string(),
        })?;

    if !dir.is_dir() {
        return Err(HarborError::PathNotFound(dir));
    }
    FileStore::open(dir).await
}

#[derive(Debug, Serialize)]
struct EntrySummary {
    key: String,
    status: u16,
    size: usize,
    stored_at: DateTime<Utc>,
}

impl From<CacheEntry> for EntrySummary {
    fn from(entry: CacheEntry) -> Self {
        Self {
            key: entry.key.to_string(),
            status: entry.status,
            size: entry.body.len(),
            stored_at: entry.stored_at,
        }
    }
}

async fn list_entries(store: &FileStore, format: OutputFormat) -> HarborResult<()> {
    let mut entries = Vec::new();
    for key in store.keys().await? {
        match store.get(&key).await {
            Ok(Some(entry)) => entries.push(EntrySummary::from(entry)),
            Ok(None) => {}
            Err(e) => warn!("Skipping {}: {}", key, e),
        }
    }

    if entries.is_empty() {
        match format {
            OutputFormat::Json => println!("[]"),
            OutputFormat::Plain => {}
            OutputFormat::Table => println!("No cached responses in {}", store.dir().display()),
        }
        return Ok(());
    }

    match format {
        OutputFormat::Table => print_table(&entries),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        OutputFormat::Plain => {
            for entry in &entries {
                println!("{}", entry.key);
            }
        }
    }

    Ok(())
}

fn print_table(entries: &[EntrySummary]) {
    println!(
        "{:<50} {:<8} {:<10} {:<20}",
        style("KEY").bold(),
        style("STATUS").bold(),
        style("SIZE").bold(),
        style("STORED").bold()
    );
    println!("{}", "-".repeat(88));

    for entry in entries {
        println!(
            "{:<50} {:<8} {:<10} {:<20}",
            entry.key,
            entry.status,
            entry.size,
            entry.stored_at.format("%Y-%m-%d %H:%M")
        );
    }

    println!();
    println!("{} response(s)", entries.len());
}

async fn clear_entries(store: FileStore, config: &Config) -> HarborResult<()> {
    let settings = CacheSettings::from_config(&config.cache)?;
    let cache = ResponseCache::new(Arc::new(store), settings);

    let report = cache.invalidate_all().await;
    if report.failed > 0 {
        println!(
            "{} cleared {} response(s), {} could not be removed",
            style("!").yellow(),
            report.removed,
            report.failed
        );
    } else {
        println!("{} cleared {} response(s)", style("✓").green(), report.removed);
    }

    Ok(())
}
