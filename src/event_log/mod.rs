//! Event Log
//!
//! Append-only, per-subject, time-ordered store of immutable events. This is
//! the source of truth every rollup is derived from.
//!
//! Range queries run over the time-ordered [`EventId`], not over a separate
//! timestamp column: `from` maps to `EventId::floor(from)` (inclusive) and
//! `to` to `EventId::floor(to)` (exclusive).

pub mod sqlite;

pub use sqlite::SqliteEventLog;

use crate::error::Result;
use crate::types::{Event, EventField, EventId, EventKind, NewEvent, SubjectId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Result of an append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Appended {
    pub id: EventId,
    /// The idempotency key was already logged; `id` is the original event's id
    pub duplicate: bool,
}

/// Mean of an event field over a range, with the newest event it covers
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeAverage {
    pub mean: f64,
    pub samples: i64,
    pub as_of: EventId,
}

#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append an event, minting an id strictly greater than any existing id
    /// for the subject
    async fn append(&self, event: NewEvent) -> Result<Appended>;

    async fn count_in_range(
        &self,
        subject: SubjectId,
        kind: EventKind,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<i64>;

    /// `None` when no event in the range carries the field
    async fn average_of(
        &self,
        subject: SubjectId,
        kind: EventKind,
        field: EventField,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Option<RangeAverage>>;

    /// Events for a subject in `[from, to)`, ordered by id
    async fn scan(
        &self,
        subject: SubjectId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Event>>;

    /// Every subject with at least one logged event
    async fn subjects(&self) -> Result<Vec<SubjectId>>;
}
