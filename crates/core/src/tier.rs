//! Rollup tiers, bucket alignment, and schedule math.
//!
//! A tier aggregates the next-finer source into aligned buckets. Weekly and
//! monthly both read the daily tier (weeks cross month boundaries, so the
//! monthly tier cannot be built from weekly buckets); the daily source is
//! retired by the monthly stage, the last of its two readers.

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One rollup granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    #[serde(rename = "15min")]
    FifteenMin,
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

/// Where a tier reads its input from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierSource {
    /// Raw samples from the ingestion path.
    Raw,
    /// Already-reduced aggregates at the given resolution.
    Aggregate(Resolution),
}

impl Resolution {
    pub const ALL: [Resolution; 5] = [
        Self::FifteenMin,
        Self::Hourly,
        Self::Daily,
        Self::Weekly,
        Self::Monthly,
    ];

    /// Nominal bucket width in minutes (monthly uses the 30-day nominal).
    pub fn minutes(&self) -> u32 {
        match self {
            Self::FifteenMin => 15,
            Self::Hourly => 60,
            Self::Daily => 1440,
            Self::Weekly => 10_080,
            Self::Monthly => 43_200,
        }
    }

    /// The tier this resolution reads as input.
    pub fn source(&self) -> TierSource {
        match self {
            Self::FifteenMin => TierSource::Raw,
            Self::Hourly => TierSource::Aggregate(Self::FifteenMin),
            Self::Daily => TierSource::Aggregate(Self::Hourly),
            Self::Weekly | Self::Monthly => TierSource::Aggregate(Self::Daily),
        }
    }

    /// The tier whose data is superseded (and may be retired) once this
    /// resolution has been written. Weekly retires nothing: its daily
    /// source is shared with the monthly tier.
    pub fn retires(&self) -> Option<TierSource> {
        match self {
            Self::Weekly => None,
            _ => Some(self.source()),
        }
    }

    pub fn from_minutes(minutes: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|r| r.minutes() == minutes)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::FifteenMin => "15min",
            Self::Hourly => "1h",
            Self::Daily => "1d",
            Self::Weekly => "1w",
            Self::Monthly => "1mo",
        };
        f.write_str(s)
    }
}

/// A schedulable unit of work: the five resolutions plus the cleanup
/// safety net.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[serde(rename = "15min")]
    FifteenMin,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Cleanup,
}

impl Tier {
    pub const ALL: [Tier; 6] = [
        Self::FifteenMin,
        Self::Hourly,
        Self::Daily,
        Self::Weekly,
        Self::Monthly,
        Self::Cleanup,
    ];

    /// The resolution this tier writes, if any.
    pub fn resolution(&self) -> Option<Resolution> {
        match self {
            Self::FifteenMin => Some(Resolution::FifteenMin),
            Self::Hourly => Some(Resolution::Hourly),
            Self::Daily => Some(Resolution::Daily),
            Self::Weekly => Some(Resolution::Weekly),
            Self::Monthly => Some(Resolution::Monthly),
            Self::Cleanup => None,
        }
    }

    /// Queue rank: finer tiers run first since coarser ones read their
    /// output. Lower is higher priority.
    pub fn priority(&self) -> u8 {
        match self {
            Self::FifteenMin => 0,
            Self::Hourly => 1,
            Self::Daily => 2,
            Self::Weekly => 3,
            Self::Monthly => 4,
            Self::Cleanup => 5,
        }
    }

    /// Next wall-clock fire time strictly after `now`.
    ///
    /// 15-min: every quarter hour; hourly: top of hour; daily: 01:00 UTC;
    /// weekly: Monday 02:00 UTC; monthly: 1st 03:00 UTC; cleanup: 04:00 UTC.
    pub fn next_fire(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::FifteenMin => {
                bucket_floor(Resolution::FifteenMin, now) + Duration::minutes(15)
            }
            Self::Hourly => bucket_floor(Resolution::Hourly, now) + Duration::hours(1),
            Self::Daily => next_daily_at(now, 1),
            Self::Weekly => {
                let monday = bucket_floor(Resolution::Weekly, now) + Duration::hours(2);
                if monday > now {
                    monday
                } else {
                    monday + Duration::weeks(1)
                }
            }
            Self::Monthly => {
                let this_month = bucket_floor(Resolution::Monthly, now) + Duration::hours(3);
                if this_month > now {
                    this_month
                } else {
                    bucket_floor(Resolution::Monthly, end_of_month(now)) + Duration::hours(3)
                }
            }
            Self::Cleanup => next_daily_at(now, 4),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "15min" => Some(Self::FifteenMin),
            "hourly" | "1h" => Some(Self::Hourly),
            "daily" | "1d" => Some(Self::Daily),
            "weekly" | "1w" => Some(Self::Weekly),
            "monthly" | "1mo" => Some(Self::Monthly),
            "cleanup" => Some(Self::Cleanup),
            _ => None,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cleanup => f.write_str("cleanup"),
            other => {
                // Safe: all non-cleanup tiers carry a resolution.
                match other.resolution() {
                    Some(r) => write!(f, "{}", r),
                    None => f.write_str("unknown"),
                }
            }
        }
    }
}

/// Half-open time range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.start && t < self.end
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// Floor `t` down to the bucket boundary of `resolution`.
///
/// 15-min: multiple-of-15 minute; hourly: top of hour; daily: UTC
/// midnight; weekly: Monday 00:00 UTC; monthly: 1st 00:00 UTC.
pub fn bucket_floor(resolution: Resolution, t: DateTime<Utc>) -> DateTime<Utc> {
    let day = Utc
        .with_ymd_and_hms(t.year(), t.month(), t.day(), 0, 0, 0)
        .single()
        .unwrap_or(t);
    match resolution {
        Resolution::FifteenMin => {
            day + Duration::hours(t.hour() as i64) + Duration::minutes((t.minute() / 15 * 15) as i64)
        }
        Resolution::Hourly => day + Duration::hours(t.hour() as i64),
        Resolution::Daily => day,
        Resolution::Weekly => day - Duration::days(t.weekday().num_days_from_monday() as i64),
        Resolution::Monthly => Utc
            .with_ymd_and_hms(t.year(), t.month(), 1, 0, 0, 0)
            .single()
            .unwrap_or(day),
    }
}

/// End (exclusive) of the bucket starting at `bucket_start`.
pub fn bucket_end(resolution: Resolution, bucket_start: DateTime<Utc>) -> DateTime<Utc> {
    match resolution {
        Resolution::Monthly => {
            let (y, m) = if bucket_start.month() == 12 {
                (bucket_start.year() + 1, 1)
            } else {
                (bucket_start.year(), bucket_start.month() + 1)
            };
            Utc.with_ymd_and_hms(y, m, 1, 0, 0, 0)
                .single()
                .unwrap_or(bucket_start + Duration::minutes(resolution.minutes() as i64))
        }
        _ => bucket_start + Duration::minutes(resolution.minutes() as i64),
    }
}

fn next_daily_at(now: DateTime<Utc>, hour: u32) -> DateTime<Utc> {
    let today = bucket_floor(Resolution::Daily, now) + Duration::hours(hour as i64);
    if today > now {
        today
    } else {
        today + Duration::days(1)
    }
}

fn end_of_month(t: DateTime<Utc>) -> DateTime<Utc> {
    bucket_end(Resolution::Monthly, bucket_floor(Resolution::Monthly, t))
}
