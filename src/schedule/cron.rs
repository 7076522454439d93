// src/schedule/cron.rs

//! Five-field crontab expressions evaluated in an IANA timezone.
//!
//! ```text
//! ┌───────────── minute (0-59)
//! │ ┌───────────── hour (0-23)
//! │ │ ┌───────────── day of month (1-31)
//! │ │ │ ┌───────────── month (1-12 or jan-dec)
//! │ │ │ │ ┌───────────── day of week (0-7 or sun-sat, 0 and 7 = Sunday)
//! │ │ │ │ │
//! * * * * *
//! ```
//!
//! Each field accepts `*`, single values, `a-b` ranges, `/n` steps and
//! comma-separated lists. All five fields must match for a minute to fire.
//! The `@hourly`, `@daily`/`@midnight`, `@weekly`, `@monthly` and
//! `@yearly`/`@annually` shorthands are accepted as well.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone,
    Timelike, Utc,
};
use chrono_tz::Tz;
use thiserror::Error;

use crate::errors::{BorgschedError, Result};

/// How far ahead `next_after` searches before concluding an expression can
/// never fire (e.g. `0 0 30 2 *`). Feb 29 on a given weekday recurs within 28
/// years.
const MAX_YEARS_AHEAD: i32 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CronParseError {
    #[error("expected 5 fields, got {0}")]
    InvalidFieldCount(usize),
    #[error("invalid {field} field '{expr}': {reason}")]
    InvalidField {
        field: &'static str,
        expr: String,
        reason: String,
    },
    #[error("value {value} is out of range [{min}, {max}] for {field}")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },
    #[error("invalid range {0}-{1}")]
    InvalidRange(u32, u32),
    #[error("invalid step value '{0}'")]
    InvalidStep(String),
    #[error("unknown shorthand '{0}'")]
    UnknownShorthand(String),
}

#[derive(Debug, Clone, Copy)]
struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
}

const MINUTE: FieldSpec = FieldSpec {
    name: "minute",
    min: 0,
    max: 59,
    names: &[],
};
const HOUR: FieldSpec = FieldSpec {
    name: "hour",
    min: 0,
    max: 23,
    names: &[],
};
const DAY_OF_MONTH: FieldSpec = FieldSpec {
    name: "day-of-month",
    min: 1,
    max: 31,
    names: &[],
};
const MONTH: FieldSpec = FieldSpec {
    name: "month",
    min: 1,
    max: 12,
    names: &[
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ],
};
// 7 is accepted as a second Sunday and folded onto 0 after parsing.
const DAY_OF_WEEK: FieldSpec = FieldSpec {
    name: "day-of-week",
    min: 0,
    max: 7,
    names: &["sun", "mon", "tue", "wed", "thu", "fri", "sat"],
};

/// The set of values one field matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronField {
    values: BTreeSet<u32>,
}

impl CronField {
    fn parse(spec: FieldSpec, expr: &str) -> std::result::Result<Self, CronParseError> {
        let mut values = BTreeSet::new();
        for part in expr.split(',') {
            parse_part(spec, part.trim(), &mut values)?;
        }
        Ok(Self { values })
    }

    pub fn matches(&self, value: u32) -> bool {
        self.values.contains(&value)
    }

    /// Smallest matching value `>= value`.
    pub fn next(&self, value: u32) -> Option<u32> {
        self.values.range(value..).next().copied()
    }

    pub fn first(&self) -> Option<u32> {
        self.values.first().copied()
    }

    pub fn values(&self) -> impl Iterator<Item = u32> + '_ {
        self.values.iter().copied()
    }
}

fn parse_part(
    spec: FieldSpec,
    part: &str,
    out: &mut BTreeSet<u32>,
) -> std::result::Result<(), CronParseError> {
    let invalid = |reason: &str| CronParseError::InvalidField {
        field: spec.name,
        expr: part.to_string(),
        reason: reason.to_string(),
    };

    if part.is_empty() {
        return Err(invalid("empty list element"));
    }

    let (range_part, step) = match part.split_once('/') {
        Some((range, step_str)) => {
            let step = step_str
                .parse::<u32>()
                .map_err(|_| CronParseError::InvalidStep(step_str.to_string()))?;
            if step == 0 {
                return Err(CronParseError::InvalidStep(step_str.to_string()));
            }
            (range, Some(step))
        }
        None => (part, None),
    };

    let (start, end) = if range_part == "*" {
        (spec.min, spec.max)
    } else if let Some((a, b)) = range_part.split_once('-') {
        let start = parse_value(spec, a).ok_or_else(|| invalid("invalid start of range"))?;
        let end = parse_value(spec, b).ok_or_else(|| invalid("invalid end of range"))?;
        if start > end {
            return Err(CronParseError::InvalidRange(start, end));
        }
        (start, end)
    } else {
        let value = parse_value(spec, range_part).ok_or_else(|| invalid("invalid value"))?;
        // `5/15` means "from 5 to the end of the field, every 15".
        match step {
            Some(_) => (value, spec.max),
            None => (value, value),
        }
    };

    for value in [start, end] {
        if value < spec.min || value > spec.max {
            return Err(CronParseError::OutOfRange {
                field: spec.name,
                value,
                min: spec.min,
                max: spec.max,
            });
        }
    }

    out.extend((start..=end).step_by(step.unwrap_or(1) as usize));
    Ok(())
}

fn parse_value(spec: FieldSpec, raw: &str) -> Option<u32> {
    if let Ok(n) = raw.parse::<u32>() {
        return Some(n);
    }
    let lower = raw.to_ascii_lowercase();
    spec.names
        .iter()
        .position(|name| *name == lower)
        .map(|idx| idx as u32 + if spec.min == 1 { 1 } else { 0 })
}

/// A parsed five-field cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    source: String,
    pub minute: CronField,
    pub hour: CronField,
    pub day_of_month: CronField,
    pub month: CronField,
    /// 0 = Sunday.
    pub day_of_week: CronField,
}

impl CronExpr {
    pub fn parse(expr: &str) -> std::result::Result<Self, CronParseError> {
        let trimmed = expr.trim();
        let expanded = if trimmed.starts_with('@') {
            expand_shorthand(trimmed)?
        } else {
            trimmed
        };

        let parts: Vec<&str> = expanded.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(CronParseError::InvalidFieldCount(parts.len()));
        }

        let mut day_of_week = CronField::parse(DAY_OF_WEEK, parts[4])?;
        if day_of_week.values.remove(&7) {
            day_of_week.values.insert(0);
        }

        Ok(Self {
            source: trimmed.to_string(),
            minute: CronField::parse(MINUTE, parts[0])?,
            hour: CronField::parse(HOUR, parts[1])?,
            day_of_month: CronField::parse(DAY_OF_MONTH, parts[2])?,
            month: CronField::parse(MONTH, parts[3])?,
            day_of_week,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    fn date_matches(&self, date: NaiveDate) -> bool {
        self.month.matches(date.month())
            && self.day_of_month.matches(date.day())
            && self.day_of_week.matches(date.weekday().num_days_from_sunday())
    }

    /// Whether a wall-clock minute matches (seconds are ignored).
    pub fn matches(&self, local: &NaiveDateTime) -> bool {
        self.date_matches(local.date())
            && self.hour.matches(local.hour())
            && self.minute.matches(local.minute())
    }

    /// Next matching wall-clock minute strictly after `after`.
    pub fn next_local_after(&self, after: NaiveDateTime) -> Option<NaiveDateTime> {
        let start = truncate_to_minute(after) + Duration::minutes(1);
        self.matching_from(start).next()
    }

    /// Matching wall-clock minutes at or after `start`, ascending.
    fn matching_from(&self, start: NaiveDateTime) -> impl Iterator<Item = NaiveDateTime> + '_ {
        let limit_year = start.year() + MAX_YEARS_AHEAD;
        let mut cursor = Some(truncate_to_minute(start));

        std::iter::from_fn(move || {
            while let Some(current) = cursor {
                if current.year() > limit_year {
                    cursor = None;
                    break;
                }
                let date = current.date();

                if !self.date_matches(date) {
                    cursor = start_of_next_day(date);
                    continue;
                }

                let Some(hour) = self.hour.next(current.hour()) else {
                    cursor = start_of_next_day(date);
                    continue;
                };
                let minute_floor = if hour == current.hour() { current.minute() } else { 0 };
                let Some(minute) = self.minute.next(minute_floor) else {
                    // No minute left in this hour; retry from the next hour.
                    cursor = NaiveTime::from_hms_opt(hour + 1, 0, 0)
                        .map(|t| date.and_time(t))
                        .or_else(|| start_of_next_day(date));
                    continue;
                };

                let found = NaiveTime::from_hms_opt(hour, minute, 0).map(|t| date.and_time(t));
                cursor = found.map(|f| f + Duration::minutes(1));
                if found.is_some() {
                    return found;
                }
            }
            None
        })
    }
}

fn expand_shorthand(raw: &str) -> std::result::Result<&'static str, CronParseError> {
    match raw.to_ascii_lowercase().as_str() {
        "@hourly" => Ok("0 * * * *"),
        "@daily" | "@midnight" => Ok("0 0 * * *"),
        "@weekly" => Ok("0 0 * * 0"),
        "@monthly" => Ok("0 0 1 * *"),
        "@yearly" | "@annually" => Ok("0 0 1 1 *"),
        _ => Err(CronParseError::UnknownShorthand(raw.to_string())),
    }
}

fn start_of_next_day(date: NaiveDate) -> Option<NaiveDateTime> {
    date.succ_opt().and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn truncate_to_minute(dt: NaiveDateTime) -> NaiveDateTime {
    dt.with_second(0)
        .and_then(|d| d.with_nanosecond(0))
        .unwrap_or(dt)
}

impl FromStr for CronExpr {
    type Err = CronParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        CronExpr::parse(s)
    }
}

impl fmt::Display for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Resolve an IANA timezone name (`Europe/Oslo`, `UTC`).
pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| BorgschedError::TimezoneError(name.to_string()))
}

/// A cron expression bound to the timezone it is evaluated in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expr: CronExpr,
    tz: Tz,
}

impl CronSchedule {
    pub fn new(expr: CronExpr, tz: Tz) -> Self {
        Self { expr, tz }
    }

    /// Parse an expression and a timezone name together.
    pub fn parse(expr: &str, timezone: &str) -> Result<Self> {
        let tz = parse_timezone(timezone)?;
        let expr = CronExpr::parse(expr)?;
        Ok(Self::new(expr, tz))
    }

    pub fn expr(&self) -> &CronExpr {
        &self.expr
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Next fire instant strictly after `instant`.
    ///
    /// Wall-clock times that do not exist in the timezone (spring-forward
    /// gaps) are skipped; times that occur twice fire on the first
    /// occurrence only.
    pub fn next_after(&self, instant: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local = instant.with_timezone(&self.tz).naive_local();
        let start = truncate_to_minute(local) + Duration::minutes(1);

        for candidate in self.expr.matching_from(start) {
            let resolved = match self.tz.from_local_datetime(&candidate) {
                LocalResult::Single(dt) => dt,
                LocalResult::Ambiguous(earliest, _) => earliest,
                LocalResult::None => continue,
            };
            let utc = resolved.with_timezone(&Utc);
            if utc > instant {
                return Some(utc);
            }
        }
        None
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.expr, self.tz)
    }
}
