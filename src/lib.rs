//! Event-sourced ad statistics
//!
//! Engagement events are appended to a per-subject [`EventLog`], rolled up
//! into monthly and daily [`Report`]s by the [`RollupAggregator`], and served
//! to ad owners through the [`ReportQueryGateway`]. The rollups are derived
//! data; [`Reconciler`] rebuilds them from the log.

pub mod aggregator;
pub mod bucketing;
pub mod config;
pub mod error;
pub mod event_log;
pub mod gateway;
pub mod reconcile;
pub mod registry;
pub mod rollup;
pub mod sqlite_pragma;
pub mod types;

pub use aggregator::{Acknowledgement, PipelineState, RollupAggregator};
pub use bucketing::{Granularity, Period, ReportKey};
pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use event_log::{EventLog, SqliteEventLog};
pub use gateway::ReportQueryGateway;
pub use reconcile::{RebuildSummary, Reconciler};
pub use registry::{AdRegistry, SqliteAdRegistry};
pub use rollup::{RollupStore, SqliteRollupStore};
pub use types::{
    AdMetadata, Event, EventId, EventKind, Principal, RangeReport, Report, SubjectId, Submission,
    Targeting,
};
