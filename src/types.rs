//! Core data model: subjects, principals, events, ad metadata and reports

use crate::bucketing::Period;
use crate::error::{EngineError, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque content identifier (the post an ad is attached to)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubjectId(Uuid);

impl SubjectId {
    /// Parse a subject id, rejecting anything that is not a UUID
    pub fn parse(raw: &str) -> Result<Self> {
        Uuid::parse_str(raw.trim())
            .map(SubjectId)
            .map_err(|_| EngineError::Validation(format!("invalid subject id: {:?}", raw)))
    }

    pub fn new_random() -> Self {
        SubjectId(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Authenticated caller identity, resolved by the transport layer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    username: String,
}

impl Principal {
    pub fn new(username: impl Into<String>) -> Self {
        Self { username: username.into() }
    }

    pub fn username(&self) -> &str {
        &self.username
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Liked,
    Unliked,
    Viewed,
    ProfileVisited,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::Liked,
        EventKind::Unliked,
        EventKind::Viewed,
        EventKind::ProfileVisited,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Liked => "LIKED",
            EventKind::Unliked => "UNLIKED",
            EventKind::Viewed => "VIEWED",
            EventKind::ProfileVisited => "PROFILE_VISITED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "LIKED" => Ok(EventKind::Liked),
            "UNLIKED" => Ok(EventKind::Unliked),
            "VIEWED" => Ok(EventKind::Viewed),
            "PROFILE_VISITED" => Ok(EventKind::ProfileVisited),
            other => Err(EngineError::Validation(format!("unknown event kind: {}", other))),
        }
    }

    /// Counter field this kind increments; `None` for kinds rolled up by recomputation
    pub fn counter(&self) -> Option<CounterField> {
        match self {
            EventKind::Liked => Some(CounterField::Likes),
            EventKind::Unliked => Some(CounterField::Unlikes),
            EventKind::ProfileVisited => Some(CounterField::ProfileVisits),
            EventKind::Viewed => None,
        }
    }
}

/// Report fields maintained by atomic increment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterField {
    Likes,
    Unlikes,
    ProfileVisits,
}

impl CounterField {
    pub fn column(&self) -> &'static str {
        match self {
            CounterField::Likes => "likes_count",
            CounterField::Unlikes => "unlikes_count",
            CounterField::ProfileVisits => "profile_visits",
        }
    }
}

/// Report fields that are always recomputed from the event log and overwritten
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComputedField {
    AverageViewDuration,
}

/// Numeric event attribute that range averages run over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventField {
    ViewDuration,
}

/// Time-ordered event identifier, unique and strictly increasing per subject
///
/// The upper bits hold milliseconds since the Unix epoch, the low
/// [`EventId::SEQUENCE_BITS`] bits a per-millisecond sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(i64);

impl EventId {
    pub const SEQUENCE_BITS: u32 = 12;

    pub fn from_raw(raw: i64) -> Self {
        EventId(raw)
    }

    pub fn as_i64(self) -> i64 {
        self.0
    }

    /// Smallest id that can be minted at `ts`; saturates outside the
    /// representable millisecond range
    pub fn floor(ts: DateTime<Utc>) -> Self {
        let max_millis = i64::MAX >> Self::SEQUENCE_BITS;
        EventId(ts.timestamp_millis().clamp(0, max_millis) << Self::SEQUENCE_BITS)
    }

    /// Millisecond component
    pub fn millis(self) -> i64 {
        self.0 >> Self::SEQUENCE_BITS
    }

    /// Instant the id was minted for; this is the instant bucketing uses
    pub fn timestamp(self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.millis())
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Inbound event submission as delivered by the transport layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub subject_id: String,
    pub kind: EventKind,
    pub actor: String,
    pub view_duration: Option<i64>,
    /// Caller-chosen key; redelivery with the same key is not counted twice
    pub idempotency_key: Option<String>,
}

impl Submission {
    pub fn new(subject_id: impl Into<String>, kind: EventKind, actor: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            kind,
            actor: actor.into(),
            view_duration: None,
            idempotency_key: None,
        }
    }

    pub fn viewed(subject_id: impl Into<String>, actor: impl Into<String>, duration: i64) -> Self {
        Self {
            view_duration: Some(duration),
            ..Self::new(subject_id, EventKind::Viewed, actor)
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Validated event awaiting an id from the event log
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub subject: SubjectId,
    pub kind: EventKind,
    pub actor: String,
    pub occurred_at: DateTime<Utc>,
    pub view_duration: Option<i64>,
    pub idempotency_key: Option<String>,
}

/// Immutable logged event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub subject: SubjectId,
    pub kind: EventKind,
    pub actor: String,
    pub occurred_at: DateTime<Utc>,
    pub view_duration: Option<i64>,
}

/// Ad targeting criteria
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Targeting {
    pub town: Option<String>,
    pub min_age: Option<u32>,
    pub max_age: Option<u32>,
    pub gender: Option<String>,
}

impl Targeting {
    pub fn validate(&self) -> Result<()> {
        if let (Some(min), Some(max)) = (self.min_age, self.max_age) {
            if min > max {
                return Err(EngineError::Validation(format!(
                    "min_age {} exceeds max_age {}",
                    min, max
                )));
            }
        }
        Ok(())
    }
}

/// Ownership and targeting record, written once per subject
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdMetadata {
    pub subject: SubjectId,
    pub owner: String,
    pub targeting: Targeting,
}

impl AdMetadata {
    /// Build from the administrative registration shape
    pub fn from_request(subject_id: &str, owner: impl Into<String>, targeting: Targeting) -> Result<Self> {
        Ok(Self {
            subject: SubjectId::parse(subject_id)?,
            owner: owner.into(),
            targeting,
        })
    }
}

/// Rolled-up statistics for one subject in one period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub subject: SubjectId,
    pub period: Period,
    pub likes_count: i64,
    pub unlikes_count: i64,
    pub profile_visits: i64,
    pub average_view_duration: Option<f64>,
}

impl Report {
    /// Report for a period with no recorded activity
    pub fn zero(subject: SubjectId, period: Period) -> Self {
        Self {
            subject,
            period,
            likes_count: 0,
            unlikes_count: 0,
            profile_visits: 0,
            average_view_duration: None,
        }
    }
}

/// Statistics computed directly from the event log over an arbitrary window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeReport {
    pub subject: SubjectId,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub likes_count: i64,
    pub unlikes_count: i64,
    pub profile_visits: i64,
    pub views_count: i64,
    pub average_view_duration: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_id_rejects_malformed() {
        assert!(SubjectId::parse("6f1c1f2e-8a4b-4c38-9d0e-1c2b3a4d5e6f").is_ok());
        assert!(matches!(SubjectId::parse("T1"), Err(EngineError::Validation(_))));
        assert!(matches!(SubjectId::parse(""), Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_event_kind_names() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::parse(kind.as_str()).unwrap(), kind);
        }
        assert!(EventKind::parse("SHARED").is_err());
    }

    #[test]
    fn test_only_viewed_has_no_counter() {
        assert_eq!(EventKind::Liked.counter(), Some(CounterField::Likes));
        assert_eq!(EventKind::Viewed.counter(), None);
    }

    #[test]
    fn test_event_id_floor_orders_by_time() {
        let a = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 1).unwrap();
        assert!(EventId::floor(a) < EventId::floor(b));
        assert_eq!(EventId::floor(a).millis(), a.timestamp_millis());
    }

    #[test]
    fn test_event_id_floor_saturates() {
        assert_eq!(EventId::floor(DateTime::<Utc>::MIN_UTC).as_i64(), 0);
        let top = EventId::floor(DateTime::<Utc>::MAX_UTC);
        assert!(top > EventId::floor(Utc.with_ymd_and_hms(9999, 1, 1, 0, 0, 0).unwrap()));
    }

    #[test]
    fn test_targeting_age_bounds() {
        let ok = Targeting { min_age: Some(18), max_age: Some(30), ..Default::default() };
        assert!(ok.validate().is_ok());

        let bad = Targeting { min_age: Some(40), max_age: Some(30), ..Default::default() };
        assert!(matches!(bad.validate(), Err(EngineError::Validation(_))));
    }
}
