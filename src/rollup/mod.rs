//! Rollup Store
//!
//! Mutable per-period report documents derived from the event log. Two write
//! paths only:
//! - counters move by atomic increment at the storage layer
//! - computed fields (averages) are recomputed from the log by the caller and
//!   overwritten here, never incremented
//!
//! Everything in this store can be thrown away and rebuilt by
//! [`crate::reconcile::Reconciler`].

pub mod sqlite;

pub use sqlite::SqliteRollupStore;

use crate::bucketing::ReportKey;
use crate::error::Result;
use crate::types::{ComputedField, CounterField, EventId, Report, SubjectId};
use async_trait::async_trait;

/// A recomputed value and the newest event id it was derived from
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComputedValue {
    pub value: f64,
    pub as_of: EventId,
}

#[async_trait]
pub trait RollupStore: Send + Sync {
    /// Add `delta` to a counter, creating the report on first write.
    /// Safe under any number of concurrent callers for the same key.
    async fn increment_counter(&self, key: &ReportKey, field: CounterField, delta: i64) -> Result<()>;

    /// Overwrite a computed field, creating the report on first write
    ///
    /// The write is skipped when the stored value was derived from a newer
    /// event than `value.as_of`. Returns whether the value was applied.
    async fn set_computed_field(
        &self,
        key: &ReportKey,
        field: ComputedField,
        value: ComputedValue,
    ) -> Result<bool>;

    /// `Ok(None)` when no event has contributed to the period yet
    async fn get(&self, key: &ReportKey) -> Result<Option<Report>>;

    /// Replace a whole report (reconciliation path)
    async fn put(&self, report: &Report, average_as_of: Option<EventId>) -> Result<()>;

    /// Drop every report for a subject, or only those inside one month
    async fn clear(&self, subject: SubjectId, month: Option<(i32, u32)>) -> Result<usize>;

    /// All reports for a subject, monthly before daily, in calendar order
    async fn reports_for(&self, subject: SubjectId) -> Result<Vec<Report>>;
}
