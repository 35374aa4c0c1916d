//! Connection tuning shared by every SQLite-backed store
//!
//! Writers and readers open their own connections against the same file, so
//! all of them go through here to get WAL mode and a busy timeout.

use crate::error::{EngineError, Result};
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

/// Apply WAL, NORMAL sync, in-memory temp store, mmap, page cache and
/// autocheckpoint settings. The busy timeout goes first so that switching
/// journal mode waits on a concurrently opened writer.
pub fn apply_optimized_pragmas(conn: &Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.busy_timeout(busy_timeout)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.pragma_update(None, "mmap_size", 268_435_456i64)?;
    conn.pragma_update(None, "cache_size", -64_000i64)?;
    conn.pragma_update(None, "wal_autocheckpoint", 1000i64)?;
    Ok(())
}

/// Open (creating parent directories as needed) and tune a connection
pub fn open_tuned(db_path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Connection> {
    if let Some(parent) = db_path.as_ref().parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                EngineError::Storage(format!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
    }

    let conn = Connection::open(db_path)?;
    apply_optimized_pragmas(&conn, busy_timeout)?;
    Ok(conn)
}
