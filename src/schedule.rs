use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, FixedOffset, NaiveTime, Offset, Utc};
use serde::{Deserialize, Serialize};

const TIME_FORMAT: &str = "%H:%M";

/// A time-of-day range, start inclusive and end exclusive.
///
/// When `start > end` the window crosses midnight, so `22:00-06:00` covers
/// the late evening and the early morning. `start == end` is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start <= self.end {
            self.start <= time && time < self.end
        } else {
            time >= self.start || time < self.end
        }
    }

    /// Checks `now` against the window in the given fixed timezone.
    pub fn contains_instant(&self, now: DateTime<Utc>, offset: FixedOffset) -> bool {
        self.contains(now.with_timezone(&offset).time())
    }

    /// Builds a window from the two `HH:MM` columns the store keeps.
    pub fn from_columns(start: Option<&str>, end: Option<&str>) -> Result<Option<Self>> {
        match (start, end) {
            (Some(s), Some(e)) if !s.is_empty() && !e.is_empty() => {
                Ok(Some(Self::new(parse_time(s)?, parse_time(e)?)))
            }
            _ => Ok(None),
        }
    }

    pub fn start_column(&self) -> String {
        self.start.format(TIME_FORMAT).to_string()
    }

    pub fn end_column(&self) -> String {
        self.end.format(TIME_FORMAT).to_string()
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start_column(), self.end_column())
    }
}

impl FromStr for TimeWindow {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (start, end) = s
            .split_once('-')
            .ok_or_else(|| anyhow!("expected HH:MM-HH:MM, got {:?}", s))?;
        Ok(Self::new(parse_time(start.trim())?, parse_time(end.trim())?))
    }
}

fn parse_time(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s, TIME_FORMAT).with_context(|| format!("invalid time of day {:?}", s))
}

/// Parses offsets such as `+05:30`, `-03:00` or `Z`.
pub fn parse_utc_offset(s: &str) -> Result<FixedOffset> {
    let s = s.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("z") || s.eq_ignore_ascii_case("utc") {
        return Ok(Utc.fix());
    }

    let (sign, rest) = match s.as_bytes()[0] {
        b'+' => (1, &s[1..]),
        b'-' => (-1, &s[1..]),
        _ => (1, s),
    };
    let (hours, minutes) = rest.split_once(':').unwrap_or((rest, "0"));
    let hours: i32 = hours.parse().with_context(|| format!("invalid UTC offset {:?}", s))?;
    let minutes: i32 = minutes.parse().with_context(|| format!("invalid UTC offset {:?}", s))?;

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .ok_or_else(|| anyhow!("UTC offset out of range: {:?}", s))
}
