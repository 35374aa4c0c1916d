//! SQLite event log
//!
//! One `events` row per event, keyed by `(subject_id, id)`. Id minting and the
//! insert share an IMMEDIATE transaction, so ids stay strictly increasing per
//! subject even when the wall clock steps backwards or several connections
//! write the same file.
//!
//! The id is `max(floor(received_at), last_id + 1)`, and bucketing follows
//! the id. A writer whose clock runs ahead therefore drags every later event
//! for the same subject forward to its instant until real time catches up,
//! including into a later day or month bucket. Large jumps are logged at
//! `warn`.

use super::{Appended, EventLog, RangeAverage};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::sqlite_pragma::open_tuned;
use crate::types::{Event, EventField, EventId, EventKind, NewEvent, SubjectId};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Gap between a freshly received event and the subject's newest id beyond
/// which the skew is logged
const CLOCK_SKEW_WARN_MS: i64 = 1_000;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS events (
        subject_id      TEXT NOT NULL,
        id              INTEGER NOT NULL,
        kind            TEXT NOT NULL,
        actor           TEXT NOT NULL,
        occurred_at     INTEGER NOT NULL,
        view_duration   INTEGER,
        idempotency_key TEXT,
        PRIMARY KEY (subject_id, id)
    ) WITHOUT ROWID;
    CREATE UNIQUE INDEX IF NOT EXISTS idx_events_idempotency
        ON events(subject_id, idempotency_key) WHERE idempotency_key IS NOT NULL;
    CREATE INDEX IF NOT EXISTS idx_events_kind ON events(subject_id, kind, id);
";

pub struct SqliteEventLog {
    conn: Arc<Mutex<Connection>>,
    dedup_enabled: bool,
}

impl SqliteEventLog {
    pub fn open(db_path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let conn = open_tuned(db_path, busy_timeout)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        log::info!("✅ Event log initialized");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            dedup_enabled: true,
        })
    }

    /// Open with the path, busy timeout and dedup setting from `config`
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        Ok(Self::open(&config.db_path, config.busy_timeout())?.with_dedup(config.dedup_enabled))
    }

    /// Disable idempotency-key deduplication (plain at-least-once semantics)
    pub fn with_dedup(mut self, enabled: bool) -> Self {
        self.dedup_enabled = enabled;
        self
    }
}

fn field_column(field: EventField) -> &'static str {
    match field {
        EventField::ViewDuration => "view_duration",
    }
}

fn millis_to_utc(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| EngineError::Storage(format!("timestamp out of range: {}", ms)))
}

type EventRow = (String, i64, String, String, i64, Option<i64>);

fn event_from_row(row: EventRow) -> Result<Event> {
    let (subject, id, kind, actor, occurred_at, view_duration) = row;
    Ok(Event {
        id: EventId::from_raw(id),
        subject: SubjectId::parse(&subject)
            .map_err(|_| EngineError::Storage(format!("corrupt subject id in log: {}", subject)))?,
        kind: EventKind::parse(&kind)
            .map_err(|_| EngineError::Storage(format!("corrupt event kind in log: {}", kind)))?,
        actor,
        occurred_at: millis_to_utc(occurred_at)?,
        view_duration,
    })
}

#[async_trait]
impl EventLog for SqliteEventLog {
    async fn append(&self, event: NewEvent) -> Result<Appended> {
        let mut conn = self.conn.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let subject = event.subject.to_string();

        let key = if self.dedup_enabled { event.idempotency_key.as_deref() } else { None };

        if let Some(key) = key {
            let existing: Option<i64> = tx
                .query_row(
                    "SELECT id FROM events WHERE subject_id = ?1 AND idempotency_key = ?2",
                    params![subject, key],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(id) = existing {
                log::debug!("Duplicate delivery for {} (key={}), keeping id={}", subject, key, id);
                return Ok(Appended { id: EventId::from_raw(id), duplicate: true });
            }
        }

        let last: Option<i64> = tx.query_row(
            "SELECT MAX(id) FROM events WHERE subject_id = ?1",
            params![subject],
            |row| row.get(0),
        )?;

        let candidate = EventId::floor(event.occurred_at).as_i64();
        let id = match last {
            Some(last) if last >= candidate => {
                let skew_ms = EventId::from_raw(last).millis() - EventId::from_raw(candidate).millis();
                if skew_ms > CLOCK_SKEW_WARN_MS {
                    log::warn!(
                        "⚠️  Event for {} received at {} is {}ms behind the newest id; minting at {}",
                        subject,
                        event.occurred_at,
                        skew_ms,
                        EventId::from_raw(last + 1).timestamp()
                    );
                }
                last + 1
            }
            _ => candidate,
        };
        let id = EventId::from_raw(id);

        tx.execute(
            "INSERT INTO events
             (subject_id, id, kind, actor, occurred_at, view_duration, idempotency_key)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                subject,
                id.as_i64(),
                event.kind.as_str(),
                event.actor,
                id.millis(),
                event.view_duration,
                key,
            ],
        )?;

        tx.commit()?;

        Ok(Appended { id, duplicate: false })
    }

    async fn count_in_range(
        &self,
        subject: SubjectId,
        kind: EventKind,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<i64> {
        let conn = self.conn.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM events
             WHERE subject_id = ?1 AND kind = ?2 AND id >= ?3 AND id < ?4",
            params![
                subject.to_string(),
                kind.as_str(),
                EventId::floor(from).as_i64(),
                EventId::floor(to).as_i64(),
            ],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    async fn average_of(
        &self,
        subject: SubjectId,
        kind: EventKind,
        field: EventField,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Option<RangeAverage>> {
        let column = field_column(field);
        let sql = format!(
            "SELECT AVG({col}), COUNT({col}), MAX(id) FROM events
             WHERE subject_id = ?1 AND kind = ?2 AND id >= ?3 AND id < ?4 AND {col} IS NOT NULL",
            col = column
        );

        let conn = self.conn.lock()?;
        let (mean, samples, as_of): (Option<f64>, i64, Option<i64>) = conn.query_row(
            &sql,
            params![
                subject.to_string(),
                kind.as_str(),
                EventId::floor(from).as_i64(),
                EventId::floor(to).as_i64(),
            ],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        Ok(match (mean, as_of) {
            (Some(mean), Some(as_of)) if samples > 0 => Some(RangeAverage {
                mean,
                samples,
                as_of: EventId::from_raw(as_of),
            }),
            _ => None,
        })
    }

    async fn scan(
        &self,
        subject: SubjectId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Event>> {
        let rows: Vec<EventRow> = {
            let conn = self.conn.lock()?;
            let mut stmt = conn.prepare(
                "SELECT subject_id, id, kind, actor, occurred_at, view_duration
                 FROM events
                 WHERE subject_id = ?1 AND id >= ?2 AND id < ?3
                 ORDER BY id ASC",
            )?;
            let iter = stmt.query_map(
                params![
                    subject.to_string(),
                    EventId::floor(from).as_i64(),
                    EventId::floor(to).as_i64(),
                ],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                },
            )?;
            let rows = iter.collect::<rusqlite::Result<Vec<EventRow>>>()?;
            rows
        };

        rows.into_iter().map(event_from_row).collect()
    }

    async fn subjects(&self) -> Result<Vec<SubjectId>> {
        let raw: Vec<String> = {
            let conn = self.conn.lock()?;
            let mut stmt = conn.prepare("SELECT DISTINCT subject_id FROM events ORDER BY subject_id")?;
            let iter = stmt.query_map([], |row| row.get(0))?;
            let raw = iter.collect::<rusqlite::Result<Vec<String>>>()?;
            raw
        };

        raw.iter()
            .map(|s| {
                SubjectId::parse(s)
                    .map_err(|_| EngineError::Storage(format!("corrupt subject id in log: {}", s)))
            })
            .collect()
    }
}
