//! Period bucketing
//!
//! The single mapping from an instant to its `(year, month, day)` coordinate.
//! Writers derive rollup keys here and readers derive query ranges here, both
//! in UTC, so the two paths cannot disagree about which bucket an event is in.

use crate::error::{EngineError, Result};
use crate::types::SubjectId;
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Aggregation window size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Granularity {
    Monthly,
    Daily,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Monthly => "monthly",
            Granularity::Daily => "daily",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "monthly" => Ok(Granularity::Monthly),
            "daily" => Ok(Granularity::Daily),
            other => Err(EngineError::Validation(format!("unknown granularity: {}", other))),
        }
    }
}

/// Calendar coordinate of an instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bucket {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

pub fn bucket_of(ts: DateTime<Utc>) -> Bucket {
    Bucket {
        year: ts.year(),
        month: ts.month(),
        day: ts.day(),
    }
}

/// A validated aggregation window: a whole UTC month or a whole UTC day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Period {
    Month { year: i32, month: u32 },
    Day { year: i32, month: u32, day: u32 },
}

impl Period {
    pub fn month(year: i32, month: u32) -> Result<Self> {
        NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or_else(|| EngineError::Validation(format!("invalid month {}-{:02}", year, month)))?;
        Ok(Period::Month { year, month })
    }

    pub fn day(year: i32, month: u32, day: u32) -> Result<Self> {
        NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| {
            EngineError::Validation(format!("invalid day {}-{:02}-{:02}", year, month, day))
        })?;
        Ok(Period::Day { year, month, day })
    }

    /// Build from the transport-level `(granularity, year, month, day?)` shape
    pub fn from_parts(granularity: Granularity, year: i32, month: u32, day: Option<u32>) -> Result<Self> {
        match (granularity, day) {
            (Granularity::Monthly, None) => Self::month(year, month),
            (Granularity::Daily, Some(day)) => Self::day(year, month, day),
            (Granularity::Monthly, Some(_)) => Err(EngineError::Validation(
                "monthly period does not take a day".to_string(),
            )),
            (Granularity::Daily, None) => Err(EngineError::Validation(
                "daily period requires a day".to_string(),
            )),
        }
    }

    pub fn monthly_containing(ts: DateTime<Utc>) -> Self {
        let b = bucket_of(ts);
        Period::Month { year: b.year, month: b.month }
    }

    pub fn daily_containing(ts: DateTime<Utc>) -> Self {
        let b = bucket_of(ts);
        Period::Day { year: b.year, month: b.month, day: b.day }
    }

    pub fn granularity(&self) -> Granularity {
        match self {
            Period::Month { .. } => Granularity::Monthly,
            Period::Day { .. } => Granularity::Daily,
        }
    }

    pub fn year(&self) -> i32 {
        match *self {
            Period::Month { year, .. } | Period::Day { year, .. } => year,
        }
    }

    pub fn month_of_year(&self) -> u32 {
        match *self {
            Period::Month { month, .. } | Period::Day { month, .. } => month,
        }
    }

    /// Day of month, `None` for monthly periods
    pub fn day_of_month(&self) -> Option<u32> {
        match *self {
            Period::Month { .. } => None,
            Period::Day { day, .. } => Some(day),
        }
    }

    /// Inclusive start instant
    pub fn start(&self) -> DateTime<Utc> {
        match *self {
            Period::Month { year, month } => midnight(year, month, 1),
            Period::Day { year, month, day } => midnight(year, month, day),
        }
    }

    /// Exclusive end instant
    pub fn end(&self) -> DateTime<Utc> {
        match *self {
            Period::Month { year, month } => {
                let (y, m) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
                midnight(y, m, 1)
            }
            Period::Day { .. } => self.start() + chrono::Duration::days(1),
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start() && ts < self.end()
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Period::Month { year, month } => write!(f, "{}-{:02}", year, month),
            Period::Day { year, month, day } => write!(f, "{}-{:02}-{:02}", year, month, day),
        }
    }
}

// Periods are validated on construction, so the date always exists
fn midnight(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    match NaiveDate::from_ymd_opt(year, month, day).and_then(|d| d.and_hms_opt(0, 0, 0)) {
        Some(naive) => Utc.from_utc_datetime(&naive),
        None => DateTime::<Utc>::MIN_UTC,
    }
}

/// Rollup store key: one report document per subject and period
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReportKey {
    pub subject: SubjectId,
    pub period: Period,
}

impl ReportKey {
    pub fn new(subject: SubjectId, period: Period) -> Self {
        Self { subject, period }
    }
}

impl fmt::Display for ReportKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.subject, self.period.granularity().as_str(), self.period)
    }
}

pub fn month_key(subject: SubjectId, ts: DateTime<Utc>) -> ReportKey {
    ReportKey::new(subject, Period::monthly_containing(ts))
}

pub fn day_key(subject: SubjectId, ts: DateTime<Utc>) -> ReportKey {
    ReportKey::new(subject, Period::daily_containing(ts))
}
