//! Biblink Replay CLI
//!
//! Feeds newline-delimited JSON input records through the linkage engine.
//!
//! # Usage
//!
//! ```bash
//! # Replay a harvest dump into a database
//! cargo run --bin biblink-replay -- run --input harvest.ndjson --db linkage.db
//!
//! # Same input, nothing persisted
//! cargo run --bin biblink-replay -- run --input harvest.ndjson --dry-run
//!
//! # Identity and match-point statistics of a database
//! cargo run --bin biblink-replay -- stats --db linkage.db
//! ```

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use biblink_engine::{BatchControl, BatchDriver, EngineConfig, InputRecord, LinkageService};
use biblink_storage::{InMemoryRepository, InMemoryStore, SqliteStore};
use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "biblink-replay")]
#[command(about = "Replay harvested records through the identity linkage engine", long_about = None)]
struct Cli {
    /// YAML engine config (version 1)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process an NDJSON file ("-" for stdin)
    Run {
        #[arg(short, long, default_value = "-")]
        input: String,

        /// SQLite database
        #[arg(long, default_value = "biblink.db")]
        db: PathBuf,

        /// Use in-memory storage; nothing is written
        #[arg(long)]
        dry_run: bool,

        /// Override commit_interval from the config
        #[arg(long)]
        commit_interval: Option<usize>,
    },

    /// Print engine statistics for a database
    Stats {
        #[arg(long, default_value = "biblink.db")]
        db: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => EngineConfig::from_yaml_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Commands::Run {
            input,
            db,
            dry_run,
            commit_interval,
        } => {
            let config = match commit_interval {
                Some(n) => config.with_commit_interval(n),
                None => config,
            };
            run(config, &input, db, dry_run)
        }
        Commands::Stats { db } => stats(config, db),
    }
}

fn open_service(config: EngineConfig, db: PathBuf, dry_run: bool) -> Result<LinkageService> {
    if dry_run {
        return Ok(LinkageService::new(
            config,
            Arc::new(InMemoryStore::new()),
            Arc::new(InMemoryRepository::new()),
        )?);
    }
    let store = SqliteStore::new(&db).with_context(|| format!("opening {}", db.display()))?;
    let repo = store.repository()?;
    Ok(LinkageService::new(config, Arc::new(store), Arc::new(repo))?)
}

fn read_records(input: &str) -> Result<Vec<InputRecord>> {
    let reader: Box<dyn BufRead> = if input == "-" {
        Box::new(BufReader::new(io::stdin()))
    } else {
        let file = File::open(input).with_context(|| format!("opening {}", input))?;
        Box::new(BufReader::new(file))
    };

    let mut records = Vec::new();
    let mut invalid = 0usize;
    for (n, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("reading line {}", n + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<InputRecord>(&line) {
            Ok(record) => records.push(record),
            Err(e) => {
                invalid += 1;
                warn!(line = n + 1, error = %e, "invalid input record skipped");
            }
        }
    }
    if invalid > 0 {
        warn!(invalid, "input contained unparseable lines");
    }
    Ok(records)
}

fn run(config: EngineConfig, input: &str, db: PathBuf, dry_run: bool) -> Result<()> {
    let records = read_records(input)?;
    let mut service = open_service(config, db, dry_run)?;

    let driver = BatchDriver::new(BatchControl::new());
    let summary = driver
        .run(&mut service, &mut records.into_iter())
        .context("batch aborted")?;

    let report = serde_json::json!({
        "summary": summary,
        "stats": service.stats()?,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn stats(config: EngineConfig, db: PathBuf) -> Result<()> {
    let service = open_service(config, db, false)?;
    println!("{}", serde_json::to_string_pretty(&service.stats()?)?);
    Ok(())
}
