//! SQLite rollup store
//!
//! `reports` holds one row per `(subject, granularity, year, month, day)`;
//! monthly rows store `day = 0`. All writes are single UPSERT statements, so
//! no application-level lock is needed for correctness.

use super::{ComputedValue, RollupStore};
use crate::bucketing::{Granularity, Period, ReportKey};
use crate::error::{EngineError, Result};
use crate::sqlite_pragma::open_tuned;
use crate::types::{ComputedField, CounterField, EventId, Report, SubjectId};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS reports (
        subject_id              TEXT NOT NULL,
        granularity             TEXT NOT NULL,
        year                    INTEGER NOT NULL,
        month                   INTEGER NOT NULL,
        day                     INTEGER NOT NULL DEFAULT 0,
        likes_count             INTEGER NOT NULL DEFAULT 0,
        unlikes_count           INTEGER NOT NULL DEFAULT 0,
        profile_visits          INTEGER NOT NULL DEFAULT 0,
        average_view_duration   REAL,
        average_as_of           INTEGER,
        updated_at              INTEGER NOT NULL,
        PRIMARY KEY (subject_id, granularity, year, month, day)
    ) WITHOUT ROWID;
";

pub struct SqliteRollupStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRollupStore {
    pub fn open(db_path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        Self::with_connection(open_tuned(db_path, busy_timeout)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        log::info!("✅ Rollup store initialized");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

/// Key columns in table order: subject_id, granularity, year, month, day
fn key_columns(key: &ReportKey) -> (String, &'static str, i32, u32, u32) {
    (
        key.subject.to_string(),
        key.period.granularity().as_str(),
        key.period.year(),
        key.period.month_of_year(),
        key.period.day_of_month().unwrap_or(0),
    )
}

fn computed_columns(field: ComputedField) -> (&'static str, &'static str) {
    match field {
        ComputedField::AverageViewDuration => ("average_view_duration", "average_as_of"),
    }
}

type ReportRow = (String, String, i32, u32, u32, i64, i64, i64, Option<f64>);

fn report_from_row(row: ReportRow) -> Result<Report> {
    let (subject, granularity, year, month, day, likes, unlikes, visits, average) = row;

    let subject = SubjectId::parse(&subject)
        .map_err(|_| EngineError::Storage(format!("corrupt subject id in reports: {}", subject)))?;
    let granularity = Granularity::parse(&granularity)
        .map_err(|_| EngineError::Storage(format!("corrupt granularity in reports: {}", granularity)))?;
    let day = if granularity == Granularity::Daily { Some(day) } else { None };
    let period = Period::from_parts(granularity, year, month, day)
        .map_err(|e| EngineError::Storage(format!("corrupt period in reports: {}", e)))?;

    Ok(Report {
        subject,
        period,
        likes_count: likes,
        unlikes_count: unlikes,
        profile_visits: visits,
        average_view_duration: average,
    })
}

const REPORT_COLUMNS: &str = "subject_id, granularity, year, month, day,
     likes_count, unlikes_count, profile_visits, average_view_duration";

fn read_report_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReportRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[async_trait]
impl RollupStore for SqliteRollupStore {
    async fn increment_counter(&self, key: &ReportKey, field: CounterField, delta: i64) -> Result<()> {
        let col = field.column();
        let sql = format!(
            "INSERT INTO reports (subject_id, granularity, year, month, day, {col}, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(subject_id, granularity, year, month, day) DO UPDATE SET
                 {col} = {col} + excluded.{col},
                 updated_at = excluded.updated_at",
            col = col
        );

        let (subject, granularity, year, month, day) = key_columns(key);
        let conn = self.conn.lock()?;
        conn.execute(
            &sql,
            params![subject, granularity, year, month, day, delta, now_millis()],
        )?;

        log::debug!("📈 {} {} += {}", key, col, delta);
        Ok(())
    }

    async fn set_computed_field(
        &self,
        key: &ReportKey,
        field: ComputedField,
        value: ComputedValue,
    ) -> Result<bool> {
        let (col, as_of_col) = computed_columns(field);
        let sql = format!(
            "INSERT INTO reports (subject_id, granularity, year, month, day, {col}, {as_of}, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(subject_id, granularity, year, month, day) DO UPDATE SET
                 {col} = excluded.{col},
                 {as_of} = excluded.{as_of},
                 updated_at = excluded.updated_at
             WHERE reports.{as_of} IS NULL OR reports.{as_of} <= excluded.{as_of}",
            col = col,
            as_of = as_of_col
        );

        let (subject, granularity, year, month, day) = key_columns(key);
        let conn = self.conn.lock()?;
        let changed = conn.execute(
            &sql,
            params![
                subject,
                granularity,
                year,
                month,
                day,
                value.value,
                value.as_of.as_i64(),
                now_millis(),
            ],
        )?;

        if changed == 0 {
            log::debug!("Skipped stale {} for {} (as_of={})", col, key, value.as_of);
        }
        Ok(changed > 0)
    }

    async fn get(&self, key: &ReportKey) -> Result<Option<Report>> {
        let (subject, granularity, year, month, day) = key_columns(key);
        let sql = format!(
            "SELECT {} FROM reports
             WHERE subject_id = ?1 AND granularity = ?2 AND year = ?3 AND month = ?4 AND day = ?5",
            REPORT_COLUMNS
        );

        let row = {
            let conn = self.conn.lock()?;
            let row = conn
                .query_row(&sql, params![subject, granularity, year, month, day], read_report_row)
                .optional()?;
            row
        };

        row.map(report_from_row).transpose()
    }

    async fn put(&self, report: &Report, average_as_of: Option<EventId>) -> Result<()> {
        let key = ReportKey::new(report.subject, report.period);
        let (subject, granularity, year, month, day) = key_columns(&key);

        let conn = self.conn.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO reports
             (subject_id, granularity, year, month, day,
              likes_count, unlikes_count, profile_visits,
              average_view_duration, average_as_of, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                subject,
                granularity,
                year,
                month,
                day,
                report.likes_count,
                report.unlikes_count,
                report.profile_visits,
                report.average_view_duration,
                average_as_of.map(EventId::as_i64),
                now_millis(),
            ],
        )?;
        Ok(())
    }

    async fn clear(&self, subject: SubjectId, month: Option<(i32, u32)>) -> Result<usize> {
        let conn = self.conn.lock()?;
        let removed = match month {
            Some((year, month)) => conn.execute(
                "DELETE FROM reports WHERE subject_id = ?1 AND year = ?2 AND month = ?3",
                params![subject.to_string(), year, month],
            )?,
            None => conn.execute(
                "DELETE FROM reports WHERE subject_id = ?1",
                params![subject.to_string()],
            )?,
        };
        Ok(removed)
    }

    async fn reports_for(&self, subject: SubjectId) -> Result<Vec<Report>> {
        let sql = format!(
            "SELECT {} FROM reports WHERE subject_id = ?1
             ORDER BY CASE granularity WHEN 'monthly' THEN 0 ELSE 1 END, year, month, day",
            REPORT_COLUMNS
        );

        let rows: Vec<ReportRow> = {
            let conn = self.conn.lock()?;
            let mut stmt = conn.prepare(&sql)?;
            let iter = stmt.query_map(params![subject.to_string()], read_report_row)?;
            let rows = iter.collect::<rusqlite::Result<Vec<ReportRow>>>()?;
            rows
        };

        rows.into_iter().map(report_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn march(subject: SubjectId) -> ReportKey {
        ReportKey::new(subject, Period::month(2024, 3).unwrap())
    }

    fn march_5th(subject: SubjectId) -> ReportKey {
        ReportKey::new(subject, Period::day(2024, 3, 5).unwrap())
    }

    #[tokio::test]
    async fn test_missing_report_is_none() {
        let store = SqliteRollupStore::open_in_memory().unwrap();
        assert!(store.get(&march(SubjectId::new_random())).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_increment_creates_then_accumulates() {
        let store = SqliteRollupStore::open_in_memory().unwrap();
        let key = march(SubjectId::new_random());

        store.increment_counter(&key, CounterField::Likes, 1).await.unwrap();
        store.increment_counter(&key, CounterField::Likes, 1).await.unwrap();
        store.increment_counter(&key, CounterField::Unlikes, 1).await.unwrap();

        let report = store.get(&key).await.unwrap().unwrap();
        assert_eq!(report.likes_count, 2);
        assert_eq!(report.unlikes_count, 1);
        assert_eq!(report.profile_visits, 0);
        assert_eq!(report.average_view_duration, None);
    }

    #[tokio::test]
    async fn test_monthly_and_daily_keys_are_separate() {
        let store = SqliteRollupStore::open_in_memory().unwrap();
        let subject = SubjectId::new_random();

        store.increment_counter(&march(subject), CounterField::ProfileVisits, 3).await.unwrap();
        store.increment_counter(&march_5th(subject), CounterField::ProfileVisits, 1).await.unwrap();

        assert_eq!(store.get(&march(subject)).await.unwrap().unwrap().profile_visits, 3);
        assert_eq!(store.get(&march_5th(subject)).await.unwrap().unwrap().profile_visits, 1);
    }

    #[tokio::test]
    async fn test_computed_field_ignores_older_snapshot() {
        let store = SqliteRollupStore::open_in_memory().unwrap();
        let key = march(SubjectId::new_random());

        let newer = ComputedValue { value: 50.0, as_of: EventId::from_raw(200) };
        let older = ComputedValue { value: 42.0, as_of: EventId::from_raw(100) };

        assert!(store.set_computed_field(&key, ComputedField::AverageViewDuration, newer).await.unwrap());
        assert!(!store.set_computed_field(&key, ComputedField::AverageViewDuration, older).await.unwrap());

        let report = store.get(&key).await.unwrap().unwrap();
        assert_eq!(report.average_view_duration, Some(50.0));
    }

    #[tokio::test]
    async fn test_computed_field_keeps_counters() {
        let store = SqliteRollupStore::open_in_memory().unwrap();
        let key = march(SubjectId::new_random());

        store.increment_counter(&key, CounterField::Likes, 4).await.unwrap();
        let value = ComputedValue { value: 12.5, as_of: EventId::from_raw(1) };
        store.set_computed_field(&key, ComputedField::AverageViewDuration, value).await.unwrap();

        let report = store.get(&key).await.unwrap().unwrap();
        assert_eq!(report.likes_count, 4);
        assert_eq!(report.average_view_duration, Some(12.5));
    }

    #[tokio::test]
    async fn test_concurrent_increments_lose_nothing() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("reports.db");
        let subject = SubjectId::new_random();

        // separate connections against one file, like separate processes
        let mut handles = Vec::new();
        for _ in 0..4 {
            let db_path = db_path.clone();
            handles.push(tokio::spawn(async move {
                let store = SqliteRollupStore::open(&db_path, Duration::from_secs(5)).unwrap();
                for _ in 0..25 {
                    store.increment_counter(&march(subject), CounterField::Likes, 1).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let store = SqliteRollupStore::open(&db_path, Duration::from_secs(5)).unwrap();
        assert_eq!(store.get(&march(subject)).await.unwrap().unwrap().likes_count, 100);
    }

    #[tokio::test]
    async fn test_clear_month_and_reports_for() {
        let store = SqliteRollupStore::open_in_memory().unwrap();
        let subject = SubjectId::new_random();
        let april = ReportKey::new(subject, Period::month(2024, 4).unwrap());

        store.increment_counter(&march_5th(subject), CounterField::Likes, 1).await.unwrap();
        store.increment_counter(&march(subject), CounterField::Likes, 1).await.unwrap();
        store.increment_counter(&april, CounterField::Likes, 1).await.unwrap();

        let all = store.reports_for(subject).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].period, Period::month(2024, 3).unwrap());
        assert_eq!(all[2].period, Period::day(2024, 3, 5).unwrap());

        assert_eq!(store.clear(subject, Some((2024, 3))).await.unwrap(), 2);
        assert_eq!(store.reports_for(subject).await.unwrap().len(), 1);
    }
}
