//! Report Query Gateway
//!
//! Authorizes report reads against the ad registry and serves them from the
//! rollup store. Access is denied with the same error whether the subject was
//! never registered or belongs to someone else, so callers cannot probe which
//! subjects exist.

use crate::bucketing::{Period, ReportKey};
use crate::error::{EngineError, Result};
use crate::event_log::EventLog;
use crate::registry::AdRegistry;
use crate::rollup::RollupStore;
use crate::types::{EventField, EventKind, Principal, RangeReport, Report, SubjectId};
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub struct ReportQueryGateway {
    registry: Arc<dyn AdRegistry>,
    rollups: Arc<dyn RollupStore>,
    event_log: Arc<dyn EventLog>,
}

impl ReportQueryGateway {
    pub fn new(
        registry: Arc<dyn AdRegistry>,
        rollups: Arc<dyn RollupStore>,
        event_log: Arc<dyn EventLog>,
    ) -> Self {
        Self {
            registry,
            rollups,
            event_log,
        }
    }

    /// Report for one subject and period
    ///
    /// A period with no activity yields a zero report rather than an error.
    pub async fn get_report(
        &self,
        subject_id: &str,
        period: Period,
        requester: &Principal,
    ) -> Result<Report> {
        let subject = SubjectId::parse(subject_id)?;
        self.authorize(subject, requester).await?;

        let key = ReportKey::new(subject, period);
        let report = self
            .rollups
            .get(&key)
            .await?
            .unwrap_or_else(|| Report::zero(subject, period));

        log::debug!("📊 Served {} to {}", key, requester.username());
        Ok(report)
    }

    /// Statistics over an arbitrary `[from, to)` window, computed from the
    /// event log rather than the rollups
    pub async fn range_report(
        &self,
        subject_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        requester: &Principal,
    ) -> Result<RangeReport> {
        let subject = SubjectId::parse(subject_id)?;
        if from > to {
            return Err(EngineError::Validation(format!(
                "range start {} is after range end {}",
                from, to
            )));
        }
        self.authorize(subject, requester).await?;

        let log = &self.event_log;
        let likes_count = log.count_in_range(subject, EventKind::Liked, from, to).await?;
        let unlikes_count = log.count_in_range(subject, EventKind::Unliked, from, to).await?;
        let profile_visits = log
            .count_in_range(subject, EventKind::ProfileVisited, from, to)
            .await?;
        let views_count = log.count_in_range(subject, EventKind::Viewed, from, to).await?;
        let average = log
            .average_of(subject, EventKind::Viewed, EventField::ViewDuration, from, to)
            .await?;

        Ok(RangeReport {
            subject,
            from,
            to,
            likes_count,
            unlikes_count,
            profile_visits,
            views_count,
            average_view_duration: average.map(|a| a.mean),
        })
    }

    async fn authorize(&self, subject: SubjectId, requester: &Principal) -> Result<()> {
        match self.registry.lookup(subject).await? {
            Some(meta) if meta.owner == requester.username() => Ok(()),
            Some(_) => {
                log::info!("🚫 {} denied access to {}", requester.username(), subject);
                Err(EngineError::Forbidden)
            }
            None => {
                log::info!("🚫 {} denied access to unregistered {}", requester.username(), subject);
                Err(EngineError::Forbidden)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_log::SqliteEventLog;
    use crate::registry::SqliteAdRegistry;
    use crate::rollup::SqliteRollupStore;
    use crate::types::{AdMetadata, CounterField, NewEvent, Targeting};
    use chrono::TimeZone;

    const SUBJECT: &str = "0b6d3c1a-52f7-4e0e-9a55-7f1d2e3c4b5a";

    async fn setup() -> (Arc<SqliteRollupStore>, ReportQueryGateway) {
        let (rollups, _log, gateway) = setup_with_log().await;
        (rollups, gateway)
    }

    async fn setup_with_log() -> (Arc<SqliteRollupStore>, Arc<SqliteEventLog>, ReportQueryGateway) {
        let registry = Arc::new(SqliteAdRegistry::open_in_memory().unwrap());
        let rollups = Arc::new(SqliteRollupStore::open_in_memory().unwrap());
        let log = Arc::new(SqliteEventLog::open_in_memory().unwrap());

        registry
            .register(AdMetadata::from_request(SUBJECT, "alice", Targeting::default()).unwrap())
            .await
            .unwrap();

        let gateway = ReportQueryGateway::new(registry, rollups.clone(), log.clone());
        (rollups, log, gateway)
    }

    fn logged(kind: EventKind, ts: DateTime<Utc>, view_duration: Option<i64>) -> NewEvent {
        NewEvent {
            subject: SubjectId::parse(SUBJECT).unwrap(),
            kind,
            actor: "carol".to_string(),
            occurred_at: ts,
            view_duration,
            idempotency_key: None,
        }
    }

    #[tokio::test]
    async fn test_owner_reads_stored_report() {
        let (rollups, gateway) = setup().await;
        let period = Period::month(2024, 3).unwrap();
        let key = ReportKey::new(SubjectId::parse(SUBJECT).unwrap(), period);
        rollups.increment_counter(&key, CounterField::Likes, 2).await.unwrap();

        let report = gateway.get_report(SUBJECT, period, &Principal::new("alice")).await.unwrap();
        assert_eq!(report.likes_count, 2);
    }

    #[tokio::test]
    async fn test_empty_period_is_zero_report() {
        let (_rollups, gateway) = setup().await;
        let period = Period::day(2024, 7, 4).unwrap();

        let report = gateway.get_report(SUBJECT, period, &Principal::new("alice")).await.unwrap();
        assert_eq!(report, Report::zero(SubjectId::parse(SUBJECT).unwrap(), period));
    }

    #[tokio::test]
    async fn test_non_owner_and_unregistered_are_indistinguishable() {
        let (_rollups, gateway) = setup().await;
        let period = Period::month(2024, 3).unwrap();

        let not_owner = gateway.get_report(SUBJECT, period, &Principal::new("bob")).await;
        assert!(matches!(not_owner, Err(EngineError::Forbidden)));

        let unknown = SubjectId::new_random().to_string();
        let unregistered = gateway.get_report(&unknown, period, &Principal::new("alice")).await;
        assert!(matches!(unregistered, Err(EngineError::Forbidden)));
    }

    #[tokio::test]
    async fn test_malformed_subject_is_validation_error() {
        let (_rollups, gateway) = setup().await;
        let period = Period::month(2024, 3).unwrap();

        let result = gateway.get_report("abc", period, &Principal::new("alice")).await;
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[tokio::test]
    async fn test_range_report_rejects_inverted_window() {
        let (_rollups, gateway) = setup().await;
        let from = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();

        let result = gateway.range_report(SUBJECT, from, to, &Principal::new("alice")).await;
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[tokio::test]
    async fn test_range_report_counts_window_from_log() {
        let (_rollups, log, gateway) = setup_with_log().await;
        let at = |d: u32, h: u32| Utc.with_ymd_and_hms(2024, 3, d, h, 0, 0).unwrap();

        // before the window
        log.append(logged(EventKind::Liked, at(9, 23), None)).await.unwrap();
        // inside [10th, 12th)
        log.append(logged(EventKind::Liked, at(10, 0), None)).await.unwrap();
        log.append(logged(EventKind::Liked, at(10, 1), None)).await.unwrap();
        log.append(logged(EventKind::Unliked, at(10, 2), None)).await.unwrap();
        log.append(logged(EventKind::ProfileVisited, at(11, 3), None)).await.unwrap();
        log.append(logged(EventKind::Viewed, at(11, 4), Some(20))).await.unwrap();
        log.append(logged(EventKind::Viewed, at(11, 5), Some(40))).await.unwrap();
        // exactly at the exclusive end
        log.append(logged(EventKind::Liked, at(12, 0), None)).await.unwrap();
        log.append(logged(EventKind::Viewed, at(12, 0), Some(1000))).await.unwrap();

        let report = gateway
            .range_report(SUBJECT, at(10, 0), at(12, 0), &Principal::new("alice"))
            .await
            .unwrap();

        assert_eq!(report.subject, SubjectId::parse(SUBJECT).unwrap());
        assert_eq!(report.from, at(10, 0));
        assert_eq!(report.to, at(12, 0));
        assert_eq!(report.likes_count, 2);
        assert_eq!(report.unlikes_count, 1);
        assert_eq!(report.profile_visits, 1);
        assert_eq!(report.views_count, 2);
        assert_eq!(report.average_view_duration, Some(30.0));
    }

    #[tokio::test]
    async fn test_range_report_empty_window_has_no_average() {
        let (_rollups, _log, gateway) = setup_with_log().await;
        let from = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

        let report = gateway.range_report(SUBJECT, from, to, &Principal::new("alice")).await.unwrap();
        assert_eq!(report.likes_count, 0);
        assert_eq!(report.views_count, 0);
        assert_eq!(report.average_view_duration, None);
    }

    #[tokio::test]
    async fn test_range_report_refuses_non_owner_and_unregistered() {
        let (_rollups, _log, gateway) = setup_with_log().await;
        let from = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();

        let not_owner = gateway.range_report(SUBJECT, from, to, &Principal::new("bob")).await;
        assert!(matches!(not_owner, Err(EngineError::Forbidden)));

        let unknown = SubjectId::new_random().to_string();
        let unregistered = gateway.range_report(&unknown, from, to, &Principal::new("alice")).await;
        assert!(matches!(unregistered, Err(EngineError::Forbidden)));
    }
}
