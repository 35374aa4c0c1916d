//! Rollup Aggregator - event ingestion pipeline
//!
//! ```text
//! Submission
//!     ↓ validate                  Received → Validated   (or Rejected)
//! EventLog::append                Validated → Logged     (or Rejected on storage error)
//!     ↓
//! RollupStore (monthly + daily)   Logged → RollupUpdated
//!     ↓
//! Acknowledgement                 → Acknowledged
//! ```
//!
//! Once `Logged` is reached the event is durable. A rollup failure after that
//! point leaves the affected buckets stale until the next event for the same
//! bucket or a reconciliation run, and the submission is still acknowledged.
//!
//! Counter kinds (like, unlike, profile visit) increment their counter in both
//! buckets. `Viewed` never increments anything: the average for each bucket
//! is recomputed from the log and overwritten.

use crate::bucketing::{day_key, month_key, ReportKey};
use crate::error::{EngineError, Result};
use crate::event_log::EventLog;
use crate::rollup::{ComputedValue, RollupStore};
use crate::types::{ComputedField, EventField, EventId, EventKind, NewEvent, SubjectId, Submission};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;

/// Stages of a single submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Received,
    Validated,
    Logged,
    RollupUpdated,
    Acknowledged,
    Rejected,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Received => "received",
            PipelineState::Validated => "validated",
            PipelineState::Logged => "logged",
            PipelineState::RollupUpdated => "rollup_updated",
            PipelineState::Acknowledged => "acknowledged",
            PipelineState::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

/// Successful ingest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acknowledgement {
    pub event_id: EventId,
    /// Redelivery of an already-logged idempotency key; counters were not touched
    pub duplicate: bool,
    /// Last durable stage: `RollupUpdated`, or `Logged` when the rollups are stale
    pub reached: PipelineState,
}

impl Acknowledgement {
    pub fn rollup_stale(&self) -> bool {
        self.reached != PipelineState::RollupUpdated
    }
}

pub struct RollupAggregator {
    event_log: Arc<dyn EventLog>,
    rollups: Arc<dyn RollupStore>,

    /// Receipt-time source (for testing with fixed instants)
    now_fn: Box<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl RollupAggregator {
    pub fn new(event_log: Arc<dyn EventLog>, rollups: Arc<dyn RollupStore>) -> Self {
        Self::new_with_clock(event_log, rollups, Box::new(Utc::now))
    }

    pub fn new_with_clock(
        event_log: Arc<dyn EventLog>,
        rollups: Arc<dyn RollupStore>,
        now_fn: Box<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    ) -> Self {
        Self {
            event_log,
            rollups,
            now_fn,
        }
    }

    /// Run one submission through the pipeline
    ///
    /// # Returns
    /// * `Ok(ack)` - Event is durable; `ack.rollup_stale()` tells whether the
    ///   rollups caught up
    /// * `Err(EngineError::Validation(..))` - Rejected before anything was written
    /// * `Err(EngineError::Storage(..))` - Log write failed; nothing was written
    ///   and the whole submission is safe to retry
    pub async fn ingest(&self, submission: Submission) -> Result<Acknowledgement> {
        let received_at = (self.now_fn)();
        log::debug!("{} {:?} for {}", PipelineState::Received, submission.kind, submission.subject_id);

        let event = match validate(submission, received_at) {
            Ok(event) => event,
            Err(e) => {
                log::debug!("{}: {}", PipelineState::Rejected, e);
                return Err(e);
            }
        };
        let subject = event.subject;
        let kind = event.kind;

        let appended = match self.event_log.append(event).await {
            Ok(appended) => appended,
            Err(e) => {
                log::warn!("{} {} for {}: log write failed: {}", PipelineState::Rejected, kind.as_str(), subject, e);
                return Err(e);
            }
        };
        log::debug!("{} {} id={} duplicate={}", PipelineState::Logged, subject, appended.id, appended.duplicate);

        let reached = match self.update_rollups(subject, kind, appended.id, appended.duplicate).await {
            Ok(()) => PipelineState::RollupUpdated,
            Err(e) => {
                log::warn!(
                    "⚠️  Rollups stale for {} after event {} ({}): {}",
                    subject,
                    appended.id,
                    kind.as_str(),
                    e
                );
                PipelineState::Logged
            }
        };

        log::debug!("{} {} id={} ({})", PipelineState::Acknowledged, subject, appended.id, reached);
        Ok(Acknowledgement {
            event_id: appended.id,
            duplicate: appended.duplicate,
            reached,
        })
    }

    /// Apply one logged event to its monthly and daily buckets
    ///
    /// Every step is attempted even if an earlier one fails; the first error
    /// is returned.
    async fn update_rollups(
        &self,
        subject: SubjectId,
        kind: EventKind,
        id: EventId,
        duplicate: bool,
    ) -> Result<()> {
        let ts = id.timestamp();
        let keys = [month_key(subject, ts), day_key(subject, ts)];

        let mut first_error: Option<EngineError> = None;

        match kind.counter() {
            Some(field) => {
                if duplicate {
                    return Ok(());
                }
                for key in &keys {
                    if let Err(e) = self.rollups.increment_counter(key, field, 1).await {
                        first_error.get_or_insert(e);
                    }
                }
            }
            None => {
                for key in &keys {
                    if let Err(e) = self.refresh_average(key).await {
                        first_error.get_or_insert(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Recompute the average view duration of one bucket from the log and
    /// overwrite the stored value
    ///
    /// Idempotent: the result is a function of logged events only, so it is
    /// safe to call from any number of writers or from a caller retrying a
    /// stale rollup.
    pub async fn refresh_average(&self, key: &ReportKey) -> Result<()> {
        let average = self
            .event_log
            .average_of(
                key.subject,
                EventKind::Viewed,
                EventField::ViewDuration,
                key.period.start(),
                key.period.end(),
            )
            .await?;

        if let Some(avg) = average {
            let value = ComputedValue { value: avg.mean, as_of: avg.as_of };
            self.rollups
                .set_computed_field(key, ComputedField::AverageViewDuration, value)
                .await?;
        }
        Ok(())
    }
}

/// Largest accepted view duration (32-bit range of the client payload)
pub const MAX_VIEW_DURATION: i64 = i32::MAX as i64;

/// Received → Validated
fn validate(submission: Submission, received_at: DateTime<Utc>) -> Result<NewEvent> {
    let subject = SubjectId::parse(&submission.subject_id)?;

    let actor = submission.actor.trim();
    if actor.is_empty() {
        return Err(EngineError::Validation("actor must not be empty".to_string()));
    }

    match (submission.kind, submission.view_duration) {
        (EventKind::Viewed, None) => {
            return Err(EngineError::Validation("view event requires a duration".to_string()));
        }
        (EventKind::Viewed, Some(d)) if d < 0 => {
            return Err(EngineError::Validation(format!("negative view duration: {}", d)));
        }
        (EventKind::Viewed, Some(d)) if d > MAX_VIEW_DURATION => {
            return Err(EngineError::Validation(format!(
                "view duration {} exceeds {}",
                d, MAX_VIEW_DURATION
            )));
        }
        (kind, Some(_)) if kind != EventKind::Viewed => {
            return Err(EngineError::Validation(format!(
                "{} event does not take a view duration",
                kind.as_str()
            )));
        }
        _ => {}
    }

    if let Some(key) = &submission.idempotency_key {
        if key.is_empty() {
            return Err(EngineError::Validation("idempotency key must not be empty".to_string()));
        }
    }

    Ok(NewEvent {
        subject,
        kind: submission.kind,
        actor: actor.to_string(),
        occurred_at: received_at,
        view_duration: submission.view_duration,
        idempotency_key: submission.idempotency_key,
    })
}
