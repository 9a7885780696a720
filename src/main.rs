//! # Trace Harness CLI (`trh`)
//!
//! The `trh` binary wires configuration, logging and the library
//! operations to subcommands.
//!
//! ## Usage
//!
//! ```bash
//! trh --config ./config/trh.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `trh init` | Create the SQLite database and run schema migrations |
//! | `trh ingest` | Scan the documents directory and record links |
//! | `trh import-master <csv>` | Load the master requirement catalogue |
//! | `trh audit` | Print a gap report page as JSON |
//! | `trh doc <hash>` | Show a registered document and its versions |
//! | `trh log` | Show recent audit events |
//! | `trh stats` | Summarize the store |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! trh init --config ./config/trh.toml
//!
//! # Ingest and stream chunks as JSON lines to an indexer
//! trh ingest --emit --progress json | my-indexer
//!
//! # Second page of the gap report, 20 entries per list
//! trh audit --page 2 --page-size 20
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trace_harness::audit::TraceabilityAuditor;
use trace_harness::config::{self, Config};
use trace_harness::ingest::{Capabilities, Ingestor};
use trace_harness::links::{LinkIndex, RequirementMaster};
use trace_harness::models::{ActionType, AuditStatus};
use trace_harness::progress::ProgressMode;
use trace_harness::registry::Registry;
use trace_harness::{db, migrate, stats};

/// Trace Harness CLI: document ingestion and requirement traceability.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(
    name = "trh",
    about = "Trace Harness: document ingestion and requirement traceability",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/trh.toml")]
    config: PathBuf,

    /// Debug-level logging. `RUST_LOG` takes precedence when set.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all tables. Idempotent.
    Init,

    /// Scan the documents directory.
    ///
    /// Registers new and changed files, extracts text (with OCR for scanned
    /// pages and images), records requirement links, and chunks the text.
    Ingest {
        /// Directory to scan. Defaults to `[ingest].documents_dir`.
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Progress on stderr. Defaults to `human` on a TTY, otherwise `off`.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,

        /// Print every chunk as one JSON line on stdout.
        #[arg(long)]
        emit: bool,
    },

    /// Import the master requirement catalogue from CSV.
    ///
    /// Columns: `req_id, description[, category]`, with a header row.
    ImportMaster {
        /// Path to the CSV file.
        csv: PathBuf,
    },

    /// Print a page of the traceability gap report as JSON.
    Audit {
        /// 1-based page number.
        #[arg(long, default_value_t = 1)]
        page: usize,

        /// Entries per list. Defaults to `[audit].page_size`.
        #[arg(long)]
        page_size: Option<usize>,
    },

    /// Show a registered document by content hash.
    Doc {
        /// SHA-256 content hash.
        hash: String,
    },

    /// Show recent audit events, newest first.
    Log {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// Show database statistics.
    Stats,
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "trace_harness=debug,trh=debug"
    } else {
        "trace_harness=info,trh=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            dir,
            progress,
            emit,
        } => {
            run_ingest(&cfg, dir, progress, emit).await?;
        }
        Commands::ImportMaster { csv } => {
            migrate::run_migrations(&cfg).await?;
            let pool = db::connect(&cfg).await?;
            let registry = Registry::new(pool.clone());
            let count = RequirementMaster::new(pool.clone())
                .import_csv(&csv, &registry)
                .await
                .with_context(|| format!("Failed to import {}", csv.display()))?;
            println!("Imported {} requirements from {}.", count, csv.display());
            pool.close().await;
        }
        Commands::Audit { page, page_size } => {
            migrate::run_migrations(&cfg).await?;
            let pool = db::connect(&cfg).await?;
            let page_size = page_size.unwrap_or(cfg.audit.page_size);
            let report = TraceabilityAuditor::new(pool.clone(), &cfg.audit)
                .generate_gap_report(page, page_size)
                .await?;
            Registry::new(pool.clone())
                .log_action(
                    ActionType::Query,
                    "gap_report",
                    AuditStatus::Success,
                    &format!("page={} score={}", report.meta.page, report.meta.traceability_score),
                )
                .await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            pool.close().await;
        }
        Commands::Doc { hash } => {
            run_doc(&cfg, &hash).await?;
        }
        Commands::Log { limit } => {
            let pool = db::connect(&cfg).await?;
            let events = Registry::new(pool.clone()).recent_actions(limit).await?;
            if events.is_empty() {
                println!("No audit events.");
            }
            for e in &events {
                println!(
                    "{}  {:<13} {:<7} {}  {}",
                    stats::format_ts_iso(e.timestamp),
                    e.action_type,
                    e.status,
                    e.target,
                    e.details
                );
            }
            pool.close().await;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}

async fn run_ingest(
    cfg: &Config,
    dir: Option<PathBuf>,
    progress: Option<ProgressMode>,
    emit: bool,
) -> anyhow::Result<()> {
    migrate::run_migrations(cfg).await?;
    let pool = db::connect(cfg).await?;
    let dir = dir.unwrap_or_else(|| cfg.ingest.documents_dir.clone());
    let progress = progress.unwrap_or_else(ProgressMode::default_for_tty);

    let ingestor = Ingestor::new(cfg, pool.clone(), Capabilities::from_config(cfg))
        .context("Invalid [links] configuration")?
        .with_progress(progress.reporter());

    let mut scan = ingestor.scan(&dir).await;
    while let Some(chunk) = scan.next_chunk().await {
        if emit {
            println!("{}", serde_json::to_string(&chunk)?);
        }
    }

    let report = scan.report();
    if emit {
        eprintln!("{}", serde_json::to_string(report)?);
    } else {
        println!("Ingest of {} complete:", dir.display());
        println!(
            "  files:   {} seen, {} new, {} unchanged, {} unsupported, {} skipped",
            report.files_seen,
            report.files_new,
            report.files_unchanged,
            report.files_unsupported,
            report.files_skipped
        );
        println!(
            "  units:   {} emitted, {} skipped ({} batch(es) truncated)",
            report.units_emitted, report.units_skipped, report.batches_truncated
        );
        println!("  chunks:  {}", report.chunks_emitted);
        println!("  links:   {} recorded", report.links_recorded);
        println!("  errors:  {}", report.error_count);
        for e in &report.errors {
            println!("    - {}", e);
        }
    }

    pool.close().await;
    Ok(())
}

async fn run_doc(cfg: &Config, hash: &str) -> anyhow::Result<()> {
    let pool = db::connect(cfg).await?;
    let registry = Registry::new(pool.clone());
    let Some(doc) = registry.get_metadata(hash).await? else {
        anyhow::bail!("No document with hash {}", hash);
    };

    println!("Document {}", doc.content_hash);
    println!("  filename:   {}", doc.filename);
    println!("  version:    {}", doc.version);
    println!("  size:       {} bytes", doc.size_bytes);
    println!("  registered: {}", stats::format_ts_iso(doc.registered_at));

    let links = LinkIndex::new(pool.clone()).links_for_document(hash).await?;
    let valid = links.iter().filter(|l| l.valid_context).count();
    println!("  links:      {} ({} valid)", links.len(), valid);

    let versions = registry.list_versions(&doc.filename).await?;
    if versions.len() > 1 {
        println!("  versions:");
        for v in &versions {
            println!("    v{}  {}", v.version, v.content_hash);
        }
    }

    pool.close().await;
    Ok(())
}
