//! Timestamp and duration values with a fixed text encoding.
//!
//! Every [`Instant`] is held in UTC at whole-second precision, because the
//! persisted form (`YYYY-MM-DD HH:MM:SS±HHMM`) carries no fractional seconds.
//! A zone-less (naive) value is always read as UTC. [`Duration`] is held in
//! milliseconds and persisted as a number of seconds.

use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SubsecRound, TimeDelta, TimeZone, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::TimeError;

/// `strftime` pattern of the persisted instant encoding.
pub const INSTANT_FORMAT: &str = "%Y-%m-%d %H:%M:%S%z";

/// An absolute point in time, normalized to UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Instant(DateTime<Utc>);

impl Instant {
    /// Wraps a UTC timestamp, dropping any sub-second part.
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Instant(dt.trunc_subsecs(0))
    }

    /// Converts a timestamp in any zone to UTC.
    pub fn from_zoned<Tz: TimeZone>(dt: DateTime<Tz>) -> Self {
        Self::from_utc(dt.with_timezone(&Utc))
    }

    /// Reads a zone-less timestamp as UTC.
    pub fn from_naive(naive: NaiveDateTime) -> Self {
        Self::from_utc(naive.and_utc())
    }

    pub fn from_ymd_hms(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Option<Self> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .map(Self::from_utc)
    }

    pub fn now() -> Self {
        Self::from_utc(Utc::now())
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    pub fn encode(&self) -> String {
        self.0.format(INSTANT_FORMAT).to_string()
    }

    /// Parses the persisted encoding. Any `±HHMM` offset is accepted and
    /// normalized to UTC.
    pub fn decode(s: &str) -> Result<Self, TimeError> {
        DateTime::parse_from_str(s, INSTANT_FORMAT)
            .map(Self::from_zoned)
            .map_err(|e| TimeError::MalformedTimeValue {
                value: s.to_string(),
                reason: e.to_string(),
            })
    }

    /// Parses user input: the persisted encoding, or a zone-less
    /// `YYYY-MM-DD[ HH:MM[:SS]]` (also with a `T` separator) read as UTC.
    pub fn parse_lenient(s: &str) -> Result<Self, TimeError> {
        let s = s.trim();
        if let Ok(instant) = Self::decode(s) {
            return Ok(instant);
        }
        const NAIVE_FORMATS: [&str; 4] = [
            "%Y-%m-%d %H:%M:%S",
            "%Y-%m-%d %H:%M",
            "%Y-%m-%dT%H:%M:%S",
            "%Y-%m-%dT%H:%M",
        ];
        for format in NAIVE_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
                return Ok(Self::from_naive(naive));
            }
        }
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(Self::from_naive)
            .ok_or_else(|| TimeError::MalformedTimeValue {
                value: s.to_string(),
                reason: "expected YYYY-MM-DD [HH:MM[:SS]] with an optional ±HHMM offset".into(),
            })
    }

    pub fn checked_add(&self, d: Duration) -> Option<Self> {
        self.0.checked_add_signed(d.as_timedelta()).map(Self::from_utc)
    }

    pub fn checked_sub(&self, d: Duration) -> Option<Self> {
        self.0.checked_sub_signed(d.as_timedelta()).map(Self::from_utc)
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for Instant {
    type Err = TimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

impl From<DateTime<Utc>> for Instant {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::from_utc(dt)
    }
}

// Sub-second parts of `d` are truncated from the result.
//
// Panics when the result falls outside the representable range; use
// `Instant::checked_add` for values that come from input.
impl Add<Duration> for Instant {
    type Output = Instant;

    fn add(self, d: Duration) -> Instant {
        Self::from_utc(self.0 + d.as_timedelta())
    }
}

impl Sub<Duration> for Instant {
    type Output = Instant;

    fn sub(self, d: Duration) -> Instant {
        Self::from_utc(self.0 - d.as_timedelta())
    }
}

impl Sub<Instant> for Instant {
    type Output = Duration;

    fn sub(self, other: Instant) -> Duration {
        Duration::milliseconds((self.0 - other.0).num_milliseconds())
    }
}

impl Serialize for Instant {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for Instant {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Instant::decode(&s).map_err(de::Error::custom)
    }
}

/// A signed span of time at millisecond precision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Duration {
    millis: i64,
}

impl Duration {
    pub const ZERO: Duration = Duration { millis: 0 };
    pub const HOUR: Duration = Duration { millis: 3_600_000 };
    pub const DAY: Duration = Duration { millis: 86_400_000 };
    pub const WEEK: Duration = Duration { millis: 604_800_000 };

    pub const fn milliseconds(millis: i64) -> Self {
        Duration { millis }
    }

    // The unit constructors saturate at the i64 bounds; the `checked_*`
    // forms report overflow instead.
    pub const fn seconds(secs: i64) -> Self {
        Duration {
            millis: secs.saturating_mul(1000),
        }
    }

    pub const fn minutes(mins: i64) -> Self {
        Self::seconds(mins.saturating_mul(60))
    }

    pub const fn hours(hours: i64) -> Self {
        Self::seconds(hours.saturating_mul(3600))
    }

    pub const fn days(days: i64) -> Self {
        Self::seconds(days.saturating_mul(86_400))
    }

    pub const fn weeks(weeks: i64) -> Self {
        Self::days(weeks.saturating_mul(7))
    }

    pub fn checked_seconds(secs: i64) -> Option<Self> {
        secs.checked_mul(1000).map(Duration::milliseconds)
    }

    pub fn checked_minutes(mins: i64) -> Option<Self> {
        mins.checked_mul(60).and_then(Self::checked_seconds)
    }

    /// Fractional hours, as typed on the command line (`1.5` = 90 minutes).
    pub fn from_hours_f64(hours: f64) -> Option<Self> {
        Self::from_seconds_f64(hours * 3600.0)
    }

    pub fn from_seconds_f64(secs: f64) -> Option<Self> {
        let millis = (secs * 1000.0).round();
        if millis.is_finite() && millis.abs() < i64::MAX as f64 {
            Some(Duration { millis: millis as i64 })
        } else {
            None
        }
    }

    pub fn num_milliseconds(&self) -> i64 {
        self.millis
    }

    pub fn num_seconds(&self) -> i64 {
        self.millis / 1000
    }

    pub fn as_seconds_f64(&self) -> f64 {
        self.millis as f64 / 1000.0
    }

    pub fn as_hours_f64(&self) -> f64 {
        self.as_seconds_f64() / 3600.0
    }

    pub fn is_positive(&self) -> bool {
        self.millis > 0
    }

    pub fn as_timedelta(&self) -> TimeDelta {
        // TimeDelta is symmetric and has no room for i64::MIN.
        TimeDelta::milliseconds(self.millis.max(-i64::MAX))
    }

    fn is_whole_seconds(&self) -> bool {
        self.millis % 1000 == 0
    }

    /// Total seconds: an integer when whole, otherwise a decimal.
    pub fn encode(&self) -> String {
        if self.is_whole_seconds() {
            self.num_seconds().to_string()
        } else {
            self.as_seconds_f64().to_string()
        }
    }

    pub fn decode(s: &str) -> Result<Self, TimeError> {
        let malformed = |reason: &str| TimeError::MalformedTimeValue {
            value: s.to_string(),
            reason: reason.to_string(),
        };
        if let Ok(secs) = s.parse::<i64>() {
            return Self::checked_seconds(secs).ok_or_else(|| malformed("seconds out of range"));
        }
        let secs = s
            .parse::<f64>()
            .map_err(|_| malformed("expected a number of seconds"))?;
        Self::from_seconds_f64(secs).ok_or_else(|| malformed("seconds out of range"))
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.millis < 0 {
            write!(f, "-")?;
        }
        let total = (self.millis / 1000).unsigned_abs();
        let (days, hours, mins, secs) = (total / 86_400, total % 86_400 / 3600, total % 3600 / 60, total % 60);
        let mut parts = Vec::new();
        if days > 0 {
            parts.push(format!("{days}d"));
        }
        if hours > 0 {
            parts.push(format!("{hours}h"));
        }
        if mins > 0 {
            parts.push(format!("{mins}m"));
        }
        if secs > 0 || parts.is_empty() {
            parts.push(format!("{secs}s"));
        }
        write!(f, "{}", parts.join(" "))
    }
}

impl FromStr for Duration {
    type Err = TimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

impl Add for Duration {
    type Output = Duration;

    fn add(self, other: Duration) -> Duration {
        Duration::milliseconds(self.millis.saturating_add(other.millis))
    }
}

impl Sub for Duration {
    type Output = Duration;

    fn sub(self, other: Duration) -> Duration {
        Duration::milliseconds(self.millis.saturating_sub(other.millis))
    }
}

impl Serialize for Duration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.is_whole_seconds() {
            serializer.serialize_i64(self.num_seconds())
        } else {
            serializer.serialize_f64(self.as_seconds_f64())
        }
    }
}

struct DurationVisitor;

impl<'de> Visitor<'de> for DurationVisitor {
    type Value = Duration;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a number of seconds")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Duration, E> {
        Duration::checked_seconds(v).ok_or_else(|| E::custom(format!("{v} seconds is out of range")))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Duration, E> {
        let v = i64::try_from(v).map_err(|_| E::custom(format!("{v} seconds is out of range")))?;
        self.visit_i64(v)
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Duration, E> {
        Duration::from_seconds_f64(v).ok_or_else(|| E::custom(format!("{v} seconds is out of range")))
    }
}

impl<'de> Deserialize<'de> for Duration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(DurationVisitor)
    }
}
