//! Rollup reconciliation
//!
//! Rebuilds rollups from the event log. Used to recover buckets left stale by
//! a rollup failure after an event was logged, and to verify that live
//! rollups match what the log says they should be.
//!
//! Rebuilding is idempotent: running it twice leaves the same reports as
//! running it once. It should not overlap with live ingestion for the same
//! subject, since increments landing between the clear and the rewrite would
//! be overwritten.

use crate::bucketing::{day_key, month_key, Period, ReportKey};
use crate::error::Result;
use crate::event_log::EventLog;
use crate::rollup::RollupStore;
use crate::types::{Event, EventId, EventKind, Report, SubjectId};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

/// Outcome of a rebuild
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildSummary {
    pub subjects: usize,
    pub events_scanned: usize,
    pub reports_cleared: usize,
    pub reports_written: usize,
}

impl RebuildSummary {
    fn merge(&mut self, other: RebuildSummary) {
        self.subjects += other.subjects;
        self.events_scanned += other.events_scanned;
        self.reports_cleared += other.reports_cleared;
        self.reports_written += other.reports_written;
    }
}

/// Running totals for one report while scanning
#[derive(Debug, Default)]
struct ReportAccumulator {
    likes: i64,
    unlikes: i64,
    profile_visits: i64,
    view_total: i128,
    view_samples: i64,
    last_view: Option<EventId>,
}

impl ReportAccumulator {
    fn apply(&mut self, event: &Event) {
        match event.kind {
            EventKind::Liked => self.likes += 1,
            EventKind::Unliked => self.unlikes += 1,
            EventKind::ProfileVisited => self.profile_visits += 1,
            EventKind::Viewed => {
                if let Some(duration) = event.view_duration {
                    self.view_total += i128::from(duration);
                    self.view_samples += 1;
                    self.last_view = Some(self.last_view.map_or(event.id, |last| last.max(event.id)));
                }
            }
        }
    }

    fn into_report(self, key: &ReportKey) -> (Report, Option<EventId>) {
        let average = if self.view_samples > 0 {
            Some(self.view_total as f64 / self.view_samples as f64)
        } else {
            None
        };

        let report = Report {
            subject: key.subject,
            period: key.period,
            likes_count: self.likes,
            unlikes_count: self.unlikes,
            profile_visits: self.profile_visits,
            average_view_duration: average,
        };
        (report, self.last_view)
    }
}

pub struct Reconciler {
    event_log: Arc<dyn EventLog>,
    rollups: Arc<dyn RollupStore>,
}

impl Reconciler {
    pub fn new(event_log: Arc<dyn EventLog>, rollups: Arc<dyn RollupStore>) -> Self {
        Self { event_log, rollups }
    }

    /// Discard and rebuild every report for one subject
    pub async fn rebuild_subject(&self, subject: SubjectId) -> Result<RebuildSummary> {
        self.rebuild_range(subject, DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC, None)
            .await
    }

    /// Discard and rebuild the monthly report and every daily report of one
    /// calendar month
    pub async fn rebuild_month(&self, subject: SubjectId, year: i32, month: u32) -> Result<RebuildSummary> {
        let period = Period::month(year, month)?;
        self.rebuild_range(subject, period.start(), period.end(), Some((year, month)))
            .await
    }

    /// Rebuild every subject that has logged events
    pub async fn rebuild_all(&self) -> Result<RebuildSummary> {
        let mut total = RebuildSummary::default();
        for subject in self.event_log.subjects().await? {
            total.merge(self.rebuild_subject(subject).await?);
        }

        log::info!(
            "✅ Rebuilt {} subjects: {} events, {} reports",
            total.subjects,
            total.events_scanned,
            total.reports_written
        );
        Ok(total)
    }

    async fn rebuild_range(
        &self,
        subject: SubjectId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        month: Option<(i32, u32)>,
    ) -> Result<RebuildSummary> {
        let events = self.event_log.scan(subject, from, to).await?;

        let mut accumulators: HashMap<ReportKey, ReportAccumulator> = HashMap::new();
        for event in &events {
            let ts = event.id.timestamp();
            for key in [month_key(subject, ts), day_key(subject, ts)] {
                accumulators.entry(key).or_default().apply(event);
            }
        }

        let reports_cleared = self.rollups.clear(subject, month).await?;

        let reports_written = accumulators.len();
        for (key, acc) in accumulators {
            let (report, as_of) = acc.into_report(&key);
            self.rollups.put(&report, as_of).await?;
        }

        log::debug!(
            "🔄 Rebuilt {}: {} events, {} cleared, {} written",
            subject,
            events.len(),
            reports_cleared,
            reports_written
        );

        Ok(RebuildSummary {
            subjects: 1,
            events_scanned: events.len(),
            reports_cleared,
            reports_written,
        })
    }
}
