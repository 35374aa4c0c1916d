//! Engine configuration from environment variables

use std::env;
use std::time::Duration;

/// Configuration for the ingest engine and the reconciliation job
///
/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Path to the SQLite file holding events, ad metadata and reports
    pub db_path: String,

    /// How long a writer waits on a locked database before failing
    pub busy_timeout_ms: u64,

    /// Honour caller-supplied idempotency keys on append. Takes effect through
    /// `SqliteEventLog::from_config` in the process that ingests events; the
    /// reconcile job never appends, so there it has no effect.
    pub dedup_enabled: bool,
}

impl EngineConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `ADSTATS_DB_PATH` (default: data/adstats.db)
    /// - `ADSTATS_BUSY_TIMEOUT_MS` (default: 5000)
    /// - `ADSTATS_DEDUP` (default: true)
    pub fn from_env() -> Self {
        Self {
            db_path: env::var("ADSTATS_DB_PATH")
                .unwrap_or_else(|_| "data/adstats.db".to_string()),

            busy_timeout_ms: env::var("ADSTATS_BUSY_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5_000),

            dedup_enabled: env::var("ADSTATS_DEDUP")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(true),
        }
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Both cases mutate process env, so they run in one test
    #[test]
    fn test_default_and_custom_config() {
        env::remove_var("ADSTATS_DB_PATH");
        env::remove_var("ADSTATS_BUSY_TIMEOUT_MS");
        env::remove_var("ADSTATS_DEDUP");

        let config = EngineConfig::from_env();
        assert_eq!(config.db_path, "data/adstats.db");
        assert_eq!(config.busy_timeout_ms, 5_000);
        assert!(config.dedup_enabled);

        env::set_var("ADSTATS_DB_PATH", "/tmp/ads.db");
        env::set_var("ADSTATS_BUSY_TIMEOUT_MS", "250");
        env::set_var("ADSTATS_DEDUP", "false");

        let config = EngineConfig::from_env();
        assert_eq!(config.db_path, "/tmp/ads.db");
        assert_eq!(config.busy_timeout(), Duration::from_millis(250));
        assert!(!config.dedup_enabled);

        env::remove_var("ADSTATS_DB_PATH");
        env::remove_var("ADSTATS_BUSY_TIMEOUT_MS");
        env::remove_var("ADSTATS_DEDUP");
    }
}
