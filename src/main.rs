use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use feedsync::config::{Config, PRINCIPAL_ENV};
use feedsync::feed::Fetcher;
use feedsync::storage::{Database, EntryQuery, FeedStore, StoreError};
use feedsync::sync::{CancelHandle, CommitWarning, NewSubscription, SyncScope, Syncer};
use feedsync::util::truncate_to_width;

/// Get the config directory path (~/.config/feedsync/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    let config_dir = PathBuf::from(home).join(".config").join("feedsync");
    Ok(config_dir)
}

#[derive(Parser, Debug)]
#[command(name = "feedsync", about = "RSS/Atom feed sync and deduplication")]
struct Args {
    /// Config file (default: ~/.config/feedsync/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Operate on a group's feeds instead of your own
    #[arg(long, global = true, value_name = "GROUP")]
    group: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Subscribe to a feed and import its current entries
    Add {
        url: String,
        /// Display name (defaults to the feed's title)
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        alias: Option<String>,
    },
    /// Show a feed's entries without subscribing
    Preview {
        url: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Sync one feed, or every feed in scope
    Sync { feed_id: Option<String> },
    /// Sync on an interval until interrupted
    Watch {
        /// Minutes between syncs (overrides sync_interval_minutes)
        #[arg(long)]
        interval: Option<u64>,
    },
    /// List subscribed feeds
    List,
    /// Show stored entries, newest first
    Entries {
        #[arg(long)]
        feed: Option<String>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: u32,
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },
    /// Change a feed's display name and alias
    Rename {
        feed_id: String,
        name: String,
        #[arg(long)]
        alias: Option<String>,
    },
    /// Unsubscribe and delete the feed's entries
    Remove { feed_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
    }

    // SEC-007: Set directory permissions on Unix (user-only access)
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) =
            std::fs::set_permissions(&config_dir, std::fs::Permissions::from_mode(0o700))
        {
            tracing::warn!(
                path = %config_dir.display(),
                error = %e,
                "Failed to set config directory permissions to 0700"
            );
        }
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = config
        .database_path
        .clone()
        .map(PathBuf::from)
        .unwrap_or_else(|| config_dir.join("feedsync.db"));
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;

    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(StoreError::Locked) => {
            eprintln!("Error: {}", StoreError::Locked);
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };
    let db = match config.principal(std::env::var(PRINCIPAL_ENV).ok()) {
        Some(principal) => db.with_principal(principal),
        None => db,
    };

    let fetcher = Fetcher::new(
        config.network.fetch_settings(),
        config.network.restricted,
        config.network.intermediaries.clone(),
    )
    .context("Failed to build HTTP client")?;

    let syncer = Syncer::new(db, fetcher).with_options(config.sync_options());
    let scope = match args.group {
        Some(group) => SyncScope::Group(group),
        None => SyncScope::Personal,
    };

    match args.command {
        Command::Add { url, name, alias } => {
            let subscribed = syncer
                .subscribe(NewSubscription {
                    url,
                    name: name.unwrap_or_default(),
                    alias,
                    scope,
                })
                .await
                .context("Failed to subscribe")?;
            println!(
                "Subscribed to {} ({})",
                subscribed.feed.integration_name, subscribed.feed.id
            );
            println!("Imported {} entries", subscribed.report.new_entries.len());
            print_warnings(&subscribed.report.warnings);
        }
        Command::Preview { url, limit } => {
            let entries = syncer.preview(&url).await.context("Failed to preview feed")?;
            println!("{} entries", entries.len());
            for entry in entries.iter().take(limit) {
                println!("  {}  {}", entry.pub_date, truncate_to_width(&entry.title, 80));
                if !entry.content_snippet.is_empty() {
                    println!("      {}", truncate_to_width(&entry.content_snippet, 100));
                }
            }
        }
        Command::Sync { feed_id: Some(feed_id) } => {
            let report = syncer.sync_feed(&feed_id).await.context("Sync failed")?;
            println!("{}: {} new entries", feed_id, report.new_entries.len());
            print_warnings(&report.warnings);
        }
        Command::Sync { feed_id: None } => {
            let report = syncer.sync_all(scope).await.context("Sync failed")?;
            println!(
                "Synced {} feeds, {} new entries",
                report.synced.len(),
                report.total_new()
            );
            if let Some(error) = &report.error {
                for failure in &error.failures {
                    eprintln!("  {} failed: {}", failure.feed_id, failure.error);
                }
            }
        }
        Command::Watch { interval } => {
            let minutes = interval.unwrap_or(config.sync_interval_minutes);
            if minutes == 0 {
                anyhow::bail!(
                    "No sync interval configured; pass --interval or set sync_interval_minutes"
                );
            }

            let (handle, token) = CancelHandle::new();
            let watcher = syncer.run_periodic(scope, Duration::from_secs(minutes * 60), token);
            tokio::pin!(watcher);

            println!("Syncing every {} minute(s); Ctrl-C to stop", minutes);
            let batches = tokio::select! {
                batches = &mut watcher => batches,
                _ = tokio::signal::ctrl_c() => {
                    handle.cancel();
                    watcher.await
                }
            };
            println!("Stopped after {} sync(s)", batches);
        }
        Command::List => {
            let ownership = syncer.ownership(&scope).await?;
            let feeds = syncer
                .store()
                .feeds_in_scope(&ownership)
                .await
                .context("Failed to list feeds")?;
            for feed in feeds {
                let last = feed
                    .last_fetched
                    .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
                    .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "never".to_string());
                let alias = feed
                    .integration_alias
                    .map(|a| format!(" [{a}]"))
                    .unwrap_or_default();
                println!(
                    "{}  {}{}  {}  (synced {})",
                    feed.id,
                    truncate_to_width(&feed.integration_name, 40),
                    alias,
                    feed.url,
                    last
                );
            }
        }
        Command::Entries {
            feed,
            search,
            limit,
            offset,
        } => {
            let ownership = syncer.ownership(&scope).await?;
            let query = EntryQuery {
                feed_id: feed,
                search,
                limit,
                offset,
                ..EntryQuery::new(ownership)
            };
            let page = syncer
                .store()
                .entries(&query)
                .await
                .context("Failed to list entries")?;
            for entry in &page.entries {
                println!(
                    "{}  {:<20}  {}",
                    entry.pub_date,
                    truncate_to_width(&entry.integration_name, 20),
                    truncate_to_width(&entry.title, 80)
                );
                if !entry.link.is_empty() {
                    println!("      {}", entry.link);
                }
            }
            println!(
                "Showing {}-{} of {}",
                u64::from(offset) + u64::from(!page.entries.is_empty()),
                u64::from(offset) + page.entries.len() as u64,
                page.total
            );
        }
        Command::Rename {
            feed_id,
            name,
            alias,
        } => {
            syncer
                .rename(&feed_id, &name, alias.as_deref())
                .await
                .context("Failed to rename feed")?;
            println!("Renamed {}", feed_id);
        }
        Command::Remove { feed_id } => {
            let removed = syncer
                .unsubscribe(&feed_id)
                .await
                .context("Failed to remove feed")?;
            println!("Removed {} and {} entries", feed_id, removed);
        }
    }

    Ok(())
}

fn print_warnings(warnings: &[CommitWarning]) {
    for warning in warnings {
        match warning {
            CommitWarning::PermissionDenied { attempted, reason } => {
                eprintln!(
                    "Warning: {} new entries were not saved (permission denied: {})",
                    attempted, reason
                );
            }
        }
    }
}
