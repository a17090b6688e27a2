//! warmstart CLI - Saved cache directory tooling
//!
//! Inspects and cleans the snapshot files a warmstart-enabled node keeps in
//! its saved caches directory.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use warmstart_cache::{SnapshotFileName, cleanup};
use warmstart_common::{CacheKind, SnapshotConfig};

#[derive(Parser, Debug)]
#[command(name = "warmstart-cli")]
#[command(about = "warmstart saved caches CLI")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/warmstart/warmstart.toml")]
    config: PathBuf,

    /// Saved caches directory (overrides the configuration file)
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List snapshot files
    List {
        /// Only show files of this cache kind
        #[arg(short, long)]
        kind: Option<CacheKind>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Delete stale snapshot files
    Clean {
        /// Only clean files of this cache kind
        #[arg(short, long)]
        kind: Option<CacheKind>,
        /// Show what would be deleted without deleting it
        #[arg(long)]
        dry_run: bool,
    },
}

/// One recognised file in the saved caches directory
#[derive(Debug, Serialize)]
struct SnapshotEntry {
    name: String,
    kind: String,
    version: Option<String>,
    table_id: Option<String>,
    size: u64,
    state: &'static str,
}

impl SnapshotEntry {
    fn new(name: String, parsed: &SnapshotFileName, size: u64) -> Self {
        let (version, state) = match parsed {
            SnapshotFileName::Canonical { version, .. } => {
                let state = if parsed.is_current() { "current" } else { "stale" };
                (Some(version.clone()), state)
            }
            SnapshotFileName::Temp { version, .. } => (Some(version.clone()), "temp"),
            SnapshotFileName::Legacy { .. } => (None, "legacy"),
            SnapshotFileName::Untagged { version, .. } => (Some(version.clone()), "stale"),
        };
        Self {
            name,
            kind: parsed.kind().to_string(),
            version,
            table_id: parsed.table_id().map(|id| id.to_string()),
            size,
            state,
        }
    }
}

fn load_config(args: &Args) -> Result<SnapshotConfig> {
    let mut config: SnapshotConfig = if args.config.exists() {
        let config_str = fs::read_to_string(&args.config)
            .with_context(|| format!("Failed to read {}", args.config.display()))?;
        toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse {}", args.config.display()))?
    } else {
        debug!("No config file at {}, using defaults", args.config.display());
        SnapshotConfig::default()
    };

    // CLI takes precedence
    if let Some(dir) = &args.dir {
        config.saved_caches_directory.clone_from(dir);
    }
    config.validate()?;
    Ok(config)
}

fn list_snapshots(directory: &Path, kind: Option<CacheKind>) -> Result<Vec<SnapshotEntry>> {
    let mut entries = Vec::new();
    let dir = fs::read_dir(directory)
        .with_context(|| format!("Failed to read {}", directory.display()))?;

    for entry in dir {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(parsed) = SnapshotFileName::parse(&name) else {
            continue;
        };
        if kind.is_some_and(|kind| kind != parsed.kind()) {
            continue;
        }
        entries.push(SnapshotEntry::new(name, &parsed, metadata.len()));
    }

    entries.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.name.cmp(&b.name)));
    Ok(entries)
}

fn clean_snapshots(directory: &Path, kinds: &[CacheKind], dry_run: bool) -> Result<Vec<PathBuf>> {
    let mut cleaned = Vec::new();
    for &kind in kinds {
        let stale = cleanup::stale_files(directory, kind)?;
        if dry_run {
            cleaned.extend(stale);
            continue;
        }
        for path in stale {
            match fs::remove_file(&path) {
                Ok(()) => cleaned.push(path),
                Err(e) => warn!("Failed to delete {}: {}", path.display(), e),
            }
        }
    }
    Ok(cleaned)
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load_config(&args)?;
    let directory = config.saved_caches_directory.as_path();

    match args.command {
        Commands::List { kind, json } => {
            let entries = list_snapshots(directory, kind)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
                return Ok(());
            }

            println!("Saved caches in {}", directory.display());
            println!("{}", "=".repeat(60));
            if entries.is_empty() {
                println!("No snapshot files found");
            } else {
                println!(
                    "{:<14} {:<8} {:<38} {:>10} {:<8}",
                    "KIND", "VERSION", "TABLE ID", "SIZE", "STATE"
                );
                println!("{}", "-".repeat(82));
                for entry in &entries {
                    println!(
                        "{:<14} {:<8} {:<38} {:>10} {:<8}",
                        entry.kind,
                        entry.version.as_deref().unwrap_or("-"),
                        entry.table_id.as_deref().unwrap_or("-"),
                        format_size(entry.size),
                        entry.state
                    );
                }
            }
        }
        Commands::Clean { kind, dry_run } => {
            let kinds = kind.map_or_else(|| CacheKind::ALL.to_vec(), |kind| vec![kind]);
            let cleaned = clean_snapshots(directory, &kinds, dry_run)?;

            let verb = if dry_run { "Would delete" } else { "Deleted" };
            for path in &cleaned {
                println!("{verb} {}", path.display());
            }
            println!("{verb} {} stale file(s)", cleaned.len());
        }
    }

    Ok(())
}
