//! Gridwatch Sync - Store Reconciliation Job
//!
//! Keeps the durable telemetry store and the sorted-set cache consistent
//! for one tenant. Intended to be invoked on a cadence by an external
//! scheduler; the exit code tells the scheduler whether every domain
//! reconciled cleanly.
//!
//! Usage:
//!   cargo run --release --bin gridwatch-sync -- --tenant-id 1 --db-path ./telemetry.db
//!   cargo run --release --bin gridwatch-sync -- --tenant-id 1 --db-path ./telemetry.db \
//!       --cache-snapshot ./cache.json --dump-cache-snapshot ./cache_after.json --json

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use gridwatch_backend::models::SyncSettings;
use gridwatch_backend::recon::Reconciler;
use gridwatch_backend::stores::{InMemoryFeederCache, TelemetryDb};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Reconcile the telemetry cache and the durable store for one tenant
#[derive(Parser, Debug)]
#[command(name = "gridwatch-sync")]
#[command(about = "Reconcile grid telemetry between the cache and the durable store")]
struct Cli {
    /// Tenant whose telemetry is reconciled
    #[arg(long, env = "GRIDWATCH_TENANT_ID")]
    tenant_id: i64,

    /// Path to the durable SQLite database
    #[arg(long, env = "GRIDWATCH_DB_PATH")]
    db_path: PathBuf,

    /// Optional TOML settings file (defaults + env overrides otherwise)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Seed the cache from a JSON snapshot before reconciling
    #[arg(long)]
    cache_snapshot: Option<PathBuf>,

    /// Dump the cache to a JSON snapshot after reconciling
    #[arg(long)]
    dump_cache_snapshot: Option<PathBuf>,

    /// Print the run report as JSON instead of text
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv();
    init_tracing();

    let cli = Cli::parse();

    let mut settings = match &cli.settings {
        Some(path) => SyncSettings::from_toml_file(path)?,
        None => SyncSettings::default(),
    };
    settings.apply_env();

    let db_path = cli.db_path.to_string_lossy().to_string();
    let db = Arc::new(TelemetryDb::open(&db_path)?);

    let cache = Arc::new(InMemoryFeederCache::new());
    if let Some(path) = &cli.cache_snapshot {
        let loaded = cache.load_snapshot(path)?;
        info!("Loaded {loaded} cache entries from {}", path.display());
    } else {
        warn!("No cache snapshot given; reconciling against an empty cache");
    }

    let engine = Reconciler::new(cache.clone(), db, settings, cli.tenant_id)
        .context("Failed to construct reconciliation engine")?;
    let report = engine.reconcile().await;

    if let Some(path) = &cli.dump_cache_snapshot {
        cache.dump_snapshot(path)?;
        info!("Dumped cache snapshot to {}", path.display());
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if !report.all_ok() {
        std::process::exit(1);
    }
    Ok(())
}

fn print_report(report: &gridwatch_backend::RunReport) {
    println!(
        "run {} tenant {} ({})",
        report.run_id, report.tenant_id, report.tenant_uid
    );
    for domain in &report.domains {
        println!(
            "  {:<16} cache={:<6} durable={:<6} skipped={:<4} repaired(durable={}, cache={}) {:?}",
            domain.domain.to_string(),
            domain.cache_records,
            domain.durable_rows,
            domain.decode_skips,
            domain.repaired_into_durable,
            domain.repaired_into_cache,
            domain.status,
        );
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gridwatch_backend=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
