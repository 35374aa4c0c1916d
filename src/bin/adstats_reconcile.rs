//! Rollup reconciliation job
//!
//! Rebuilds report rollups from the event log. Run it after a rollup outage,
//! or on a schedule to repair buckets left stale by failed increments.
//!
//! Usage:
//!   cargo run --release --bin adstats_reconcile                       # every subject
//!   cargo run --release --bin adstats_reconcile -- <subject>          # one subject
//!   cargo run --release --bin adstats_reconcile -- <subject> 2024 3   # one month
//!
//! Environment variables:
//!   ADSTATS_DB_PATH - SQLite database path (default: data/adstats.db)
//!   ADSTATS_BUSY_TIMEOUT_MS - Lock wait in milliseconds (default: 5000)
//!   RUST_LOG - Logging level (optional, default: info)

use adstats::{EngineConfig, Reconciler, SqliteEventLog, SqliteRollupStore, SubjectId};
use dotenv::dotenv;
use log::{error, info};
use std::env;
use std::sync::Arc;

enum Target {
    All,
    Subject(SubjectId),
    Month(SubjectId, i32, u32),
}

fn parse_target(args: &[String]) -> Result<Target, Box<dyn std::error::Error>> {
    match args {
        [] => Ok(Target::All),
        [subject] => Ok(Target::Subject(SubjectId::parse(subject)?)),
        [subject, year, month] => Ok(Target::Month(
            SubjectId::parse(subject)?,
            year.parse()?,
            month.parse()?,
        )),
        _ => Err("usage: adstats_reconcile [<subject> [<year> <month>]]".into()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let target = match parse_target(&args) {
        Ok(target) => target,
        Err(e) => {
            error!("❌ {}", e);
            return Err(e);
        }
    };

    let config = EngineConfig::from_env();
    info!("🔧 Reconciling rollups");
    info!("   ├─ Database: {}", config.db_path);
    info!("   └─ Busy timeout: {}ms", config.busy_timeout_ms);

    let event_log = Arc::new(SqliteEventLog::from_config(&config)?);
    let rollups = Arc::new(SqliteRollupStore::open(&config.db_path, config.busy_timeout())?);
    let reconciler = Reconciler::new(event_log, rollups);

    let summary = match target {
        Target::All => reconciler.rebuild_all().await?,
        Target::Subject(subject) => reconciler.rebuild_subject(subject).await?,
        Target::Month(subject, year, month) => reconciler.rebuild_month(subject, year, month).await?,
    };

    info!("✅ Reconciliation complete");
    info!("   ├─ Subjects: {}", summary.subjects);
    info!("   ├─ Events scanned: {}", summary.events_scanned);
    info!("   ├─ Reports cleared: {}", summary.reports_cleared);
    info!("   └─ Reports written: {}", summary.reports_written);

    Ok(())
}
