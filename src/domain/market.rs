//! Market data entities: symbols, timestamps, bars, index weights.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::errors::CoreError;

/// Exchange-qualified equity identifier, e.g. `600519.SH`. Immutable string key.
pub type Symbol = String;

/// Trading granularity. A single deployment may carry both, distinguished by frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Frequency {
    Daily,
    Hourly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Hourly => "hourly",
        }
    }
}

impl FromStr for Frequency {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(Frequency::Daily),
            "hourly" => Ok(Frequency::Hourly),
            other => Err(CoreError::ValidationError {
                reason: format!("unknown frequency: {other}"),
            }),
        }
    }
}

/// The four A-share hourly session boundaries, in order within a trading day.
pub const ASTOCK_HOURLY_SLOTS: [(u32, u32); 4] = [(10, 30), (11, 30), (14, 0), (15, 0)];

/// One of: a *date* (daily frequency) or a *datetime-at-hour* (hourly frequency),
/// aligned to an exchange trading hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timestamp {
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl Timestamp {
    pub fn frequency(&self) -> Frequency {
        match self {
            Timestamp::Date(_) => Frequency::Daily,
            Timestamp::DateTime(_) => Frequency::Hourly,
        }
    }

    pub fn date(&self) -> NaiveDate {
        match self {
            Timestamp::Date(d) => *d,
            Timestamp::DateTime(dt) => dt.date(),
        }
    }

    /// Validates that an hourly timestamp lands on one of the four configured
    /// trading-hour slots. Daily timestamps are always valid.
    pub fn validate_alignment(&self) -> Result<(), CoreError> {
        if let Timestamp::DateTime(dt) = self {
            let t = dt.time();
            let aligned = ASTOCK_HOURLY_SLOTS
                .iter()
                .any(|(h, m)| t == NaiveTime::from_hms_opt(*h, *m, 0).unwrap());
            if !aligned {
                return Err(CoreError::ValidationError {
                    reason: format!(
                        "timestamp {self} is not aligned to a configured trading hour"
                    ),
                });
            }
        }
        Ok(())
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_naive_datetime().cmp(&other.as_naive_datetime())
    }
}

impl Timestamp {
    fn as_naive_datetime(&self) -> NaiveDateTime {
        match self {
            Timestamp::Date(d) => d.and_hms_opt(0, 0, 0).unwrap(),
            Timestamp::DateTime(dt) => *dt,
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timestamp::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Timestamp::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

impl FromStr for Timestamp {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || CoreError::ValidationError {
            reason: format!("invalid timestamp: {s}"),
        };
        if let Some((date_part, time_part)) = s.split_once(' ') {
            let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d").map_err(|_| bad())?;
            let mut fields = time_part.split(':');
            let hour: u32 = fields.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
            let minute: u32 = fields.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
            let second: u32 = fields.next().unwrap_or("0").parse().map_err(|_| bad())?;
            let time = NaiveTime::from_hms_opt(hour, minute, second).ok_or_else(bad)?;
            Ok(Timestamp::DateTime(NaiveDateTime::new(date, time)))
        } else {
            let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| bad())?;
            Ok(Timestamp::Date(date))
        }
    }
}

impl Serialize for Timestamp {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Timestamp::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// OHLCV record for one symbol at one timestamp.
///
/// Invariant `low <= min(open,close) <= max(open,close) <= high` is assumed by
/// downstream consumers but not enforced on ingest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: Symbol,
    pub timestamp: Timestamp,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: i64,
    pub amount: Option<Decimal>,
}

/// OHLCV record keyed by `(IndexCode, Date)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexBar {
    pub index_code: String,
    pub date: NaiveDate,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: i64,
    pub amount: Option<Decimal>,
}

/// Index membership weight, used only for ingestion targeting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexWeight {
    pub index_code: String,
    pub symbol: Symbol,
    pub date: NaiveDate,
    pub weight_pct: Decimal,
    pub name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_date_only_timestamp() {
        let ts: Timestamp = "2025-01-02".parse().unwrap();
        assert_eq!(ts.frequency(), Frequency::Daily);
        assert_eq!(ts.to_string(), "2025-01-02");
    }

    #[test]
    fn parses_and_validates_hourly_timestamp() {
        let ts: Timestamp = "2025-01-02 10:30:00".parse().unwrap();
        assert_eq!(ts.frequency(), Frequency::Hourly);
        ts.validate_alignment().unwrap();
    }

    #[test]
    fn rejects_off_schedule_hour() {
        let ts: Timestamp = "2025-01-02 12:00:00".parse().unwrap();
        assert!(ts.validate_alignment().is_err());
    }

    #[test]
    fn orders_timestamps_chronologically() {
        let a: Timestamp = "2025-01-02".parse().unwrap();
        let b: Timestamp = "2025-01-03".parse().unwrap();
        assert!(a < b);
    }
}
