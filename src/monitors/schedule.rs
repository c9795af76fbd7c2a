//! Schedule validation and next-expected-check-in computation.
//!
//! Monitors describe their schedule either as a classic 5-field crontab or as
//! a fixed interval. Crontabs are evaluated with the `cron` crate, which wants
//! a leading seconds field and names Sunday as day 1, so expressions are
//! translated before compiling.

use std::str::FromStr;

use chrono::{DateTime, Duration, Months, Timelike, Utc};
use chrono_tz::Tz;
use serde_json::{json, Value};
use thiserror::Error;

/// How far ahead a schedule must produce at least one occurrence.
/// Eight years covers leap-day-only schedules.
const LOOKAHEAD_DAYS: i64 = 366 * 8;

const WEEKDAYS: [&str; 8] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT", "SUN"];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("crontab must have exactly 5 fields, found {0}")]
    FieldCount(usize),
    #[error("invalid crontab expression '{expr}': {reason}")]
    InvalidCrontab { expr: String, reason: String },
    #[error("schedule '{0}' has no occurrence in the lookahead window")]
    NoOccurrence(String),
    #[error("invalid interval: {0}")]
    InvalidInterval(String),
    #[error("unsupported schedule type '{0}'")]
    UnknownType(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalUnit {
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl IntervalUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntervalUnit::Minute => "minute",
            IntervalUnit::Hour => "hour",
            IntervalUnit::Day => "day",
            IntervalUnit::Week => "week",
            IntervalUnit::Month => "month",
            IntervalUnit::Year => "year",
        }
    }
}

impl FromStr for IntervalUnit {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "minute" => Ok(IntervalUnit::Minute),
            "hour" => Ok(IntervalUnit::Hour),
            "day" => Ok(IntervalUnit::Day),
            "week" => Ok(IntervalUnit::Week),
            "month" => Ok(IntervalUnit::Month),
            "year" => Ok(IntervalUnit::Year),
            other => Err(ScheduleError::InvalidInterval(format!("unknown unit '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleSpec {
    /// Normalized 5-field crontab expression.
    Crontab(String),
    Interval { value: u32, unit: IntervalUnit },
}

impl ScheduleSpec {
    pub fn crontab(expr: &str) -> Result<Self, ScheduleError> {
        let normalized = normalize_crontab(expr)?;
        compile_crontab(&normalized)?;
        Ok(ScheduleSpec::Crontab(normalized))
    }

    pub fn interval(value: i64, unit: &str) -> Result<Self, ScheduleError> {
        let unit = unit.parse::<IntervalUnit>()?;
        let value = u32::try_from(value)
            .ok()
            .filter(|v| *v > 0)
            .ok_or_else(|| ScheduleError::InvalidInterval(format!("value must be positive, got {value}")))?;
        Ok(ScheduleSpec::Interval { value, unit })
    }

    /// Reads the normalized `schedule_type` / `schedule` pair a monitor stores.
    pub fn from_stored(config: &serde_json::Map<String, Value>) -> Result<Self, ScheduleError> {
        let schedule_type = config
            .get("schedule_type")
            .and_then(Value::as_str)
            .unwrap_or("crontab");
        let schedule = config.get("schedule").unwrap_or(&Value::Null);
        match schedule_type {
            "crontab" => match schedule.as_str() {
                Some(expr) => ScheduleSpec::crontab(expr),
                None => Err(ScheduleError::InvalidCrontab {
                    expr: schedule.to_string(),
                    reason: "expected a string".to_string(),
                }),
            },
            "interval" => parse_interval_pair(schedule),
            other => Err(ScheduleError::UnknownType(other.to_string())),
        }
    }

    pub fn schedule_type(&self) -> &'static str {
        match self {
            ScheduleSpec::Crontab(_) => "crontab",
            ScheduleSpec::Interval { .. } => "interval",
        }
    }

    /// The value stored under the `schedule` config key.
    pub fn to_config_value(&self) -> Value {
        match self {
            ScheduleSpec::Crontab(expr) => Value::String(expr.clone()),
            ScheduleSpec::Interval { value, unit } => json!([value, unit.as_str()]),
        }
    }

    /// Next expected check-in strictly after `last_checkin`, which is first
    /// truncated to the minute. Evaluated in the monitor's timezone.
    pub fn next_after(&self, last_checkin: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        let base = truncate_to_minute(last_checkin).with_timezone(&tz);
        let next = match self {
            ScheduleSpec::Crontab(expr) => {
                let schedule = compile_crontab(expr).ok()?;
                schedule.after(&base).next()?
            }
            ScheduleSpec::Interval { value, unit } => {
                let value = *value;
                match unit {
                    IntervalUnit::Minute => base.checked_add_signed(Duration::minutes(value.into()))?,
                    IntervalUnit::Hour => base.checked_add_signed(Duration::hours(value.into()))?,
                    IntervalUnit::Day => base.checked_add_signed(Duration::days(value.into()))?,
                    IntervalUnit::Week => base.checked_add_signed(Duration::weeks(value.into()))?,
                    IntervalUnit::Month => base.checked_add_months(Months::new(value))?,
                    IntervalUnit::Year => base.checked_add_months(Months::new(value.checked_mul(12)?))?,
                }
            }
        };
        Some(next.with_timezone(&Utc))
    }

    /// Rejects schedules that never fire within the lookahead window, such as
    /// `* * 31 2 *`.
    pub fn ensure_occurs(&self, from: DateTime<Utc>, tz: Tz) -> Result<(), ScheduleError> {
        let horizon = from + Duration::days(LOOKAHEAD_DAYS);
        match self.next_after(from, tz) {
            Some(next) if next <= horizon => Ok(()),
            _ => Err(ScheduleError::NoOccurrence(self.to_config_value().to_string())),
        }
    }
}

pub fn truncate_to_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(ts)
}

/// Parses `[n, "unit"]`.
fn parse_interval_pair(value: &Value) -> Result<ScheduleSpec, ScheduleError> {
    match value.as_array().map(Vec::as_slice) {
        Some([count, unit]) => {
            let count = count
                .as_i64()
                .ok_or_else(|| ScheduleError::InvalidInterval(format!("bad interval value {count}")))?;
            let unit = unit
                .as_str()
                .ok_or_else(|| ScheduleError::InvalidInterval(format!("bad interval unit {unit}")))?;
            ScheduleSpec::interval(count, unit)
        }
        _ => Err(ScheduleError::InvalidInterval(format!(
            "expected [value, unit], got {value}"
        ))),
    }
}

fn normalize_crontab(expr: &str) -> Result<String, ScheduleError> {
    let trimmed = expr.trim();
    let expanded = match trimmed.to_ascii_lowercase().as_str() {
        "@yearly" | "@annually" => "0 0 1 1 *",
        "@monthly" => "0 0 1 * *",
        "@weekly" => "0 0 * * 0",
        "@daily" | "@midnight" => "0 0 * * *",
        "@hourly" => "0 * * * *",
        _ => trimmed,
    };
    let fields: Vec<&str> = expanded.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(ScheduleError::FieldCount(fields.len()));
    }
    Ok(fields.join(" "))
}

fn compile_crontab(expr: &str) -> Result<cron::Schedule, ScheduleError> {
    let invalid = |reason: String| ScheduleError::InvalidCrontab {
        expr: expr.to_string(),
        reason,
    };
    let fields: Vec<&str> = expr.split_whitespace().collect();
    let [minute, hour, day_of_month, month, day_of_week] = fields.as_slice() else {
        return Err(ScheduleError::FieldCount(fields.len()));
    };
    let day_of_week = translate_weekdays(day_of_week).map_err(invalid)?;
    let month = month.to_ascii_uppercase();
    let six_field = format!("0 {minute} {hour} {day_of_month} {month} {day_of_week}");
    cron::Schedule::from_str(&six_field).map_err(|e| invalid(e.to_string()))
}

/// Maps unix day-of-week numbers (0 and 7 are Sunday) onto names so they
/// mean the same thing to the `cron` crate.
fn translate_weekdays(field: &str) -> Result<String, String> {
    let mut parts = Vec::new();
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => (range, Some(step)),
            None => (part, None),
        };
        let range = match range.split_once('-') {
            Some((start, end)) => {
                let start_name = weekday_name(start)?;
                let end_name = weekday_name(end)?;
                if let (Ok(start), Ok(end)) = (start.parse::<usize>(), end.parse::<usize>()) {
                    parts.push(expand_weekday_range(start, end, step)?);
                    continue;
                }
                format!("{start_name}-{end_name}")
            }
            None if range == "*" || range == "?" => range.to_string(),
            None => weekday_name(range)?,
        };
        parts.push(match step {
            Some(step) => format!("{range}/{step}"),
            None => range,
        });
    }
    Ok(parts.join(","))
}

/// Numeric ranges are listed day by day so that 7 folds onto Sunday instead
/// of wrapping around the week.
fn expand_weekday_range(start: usize, end: usize, step: Option<&str>) -> Result<String, String> {
    let step = match step {
        Some(step) => step
            .parse::<usize>()
            .ok()
            .filter(|step| *step > 0)
            .ok_or_else(|| format!("invalid day of week step '{step}'"))?,
        None => 1,
    };
    if start > end {
        return Err(format!("day of week range {start}-{end} is reversed"));
    }
    let mut days: Vec<usize> = (start..=end).step_by(step).map(|day| day % 7).collect();
    days.sort_unstable();
    days.dedup();
    Ok(days
        .into_iter()
        .map(|day| WEEKDAYS[day])
        .collect::<Vec<_>>()
        .join(","))
}

fn weekday_name(token: &str) -> Result<String, String> {
    match token.parse::<usize>() {
        Ok(n) => WEEKDAYS
            .get(n)
            .map(|name| name.to_string())
            .ok_or_else(|| format!("day of week {n} out of range")),
        Err(_) => Ok(token.to_ascii_uppercase()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_hourly_crontab_next() {
        let schedule = ScheduleSpec::crontab("13 * * * *").unwrap();
        let next = schedule.next_after(utc("2024-03-01T10:20:45Z"), Tz::UTC).unwrap();
        assert_eq!(next, utc("2024-03-01T11:13:00Z"));
    }

    #[test]
    fn test_crontab_next_is_strictly_after_truncated_base() {
        let schedule = ScheduleSpec::crontab("* * * * *").unwrap();
        let next = schedule.next_after(utc("2024-03-01T10:20:45Z"), Tz::UTC).unwrap();
        assert_eq!(next, utc("2024-03-01T10:21:00Z"));
    }

    #[test]
    fn test_crontab_respects_timezone() {
        let schedule = ScheduleSpec::crontab("0 9 * * *").unwrap();
        let tz: Tz = "Europe/Berlin".parse().unwrap();
        // 09:00 in Berlin during winter is 08:00 UTC.
        let next = schedule.next_after(utc("2024-01-10T07:00:00Z"), tz).unwrap();
        assert_eq!(next, utc("2024-01-10T08:00:00Z"));
    }

    #[test]
    fn test_weekday_numbers_follow_unix_convention() {
        // 2024-03-01 is a Friday; "0" must mean Sunday.
        let schedule = ScheduleSpec::crontab("0 12 * * 0").unwrap();
        let next = schedule.next_after(utc("2024-03-01T00:00:00Z"), Tz::UTC).unwrap();
        assert_eq!(next, utc("2024-03-03T12:00:00Z"));

        let weekdays = ScheduleSpec::crontab("0 12 * * 1-5").unwrap();
        let next = weekdays.next_after(utc("2024-03-01T13:00:00Z"), Tz::UTC).unwrap();
        assert_eq!(next, utc("2024-03-04T12:00:00Z"));
    }

    #[test]
    fn test_weekday_ranges_ending_on_seven() {
        // Friday afternoon; the next noon is Saturday for a whole-week range.
        let friday = utc("2024-03-01T13:00:00Z");
        for expr in ["0 12 * * 0-7", "0 12 * * 0-7/1", "0 12 * * 5-7"] {
            let schedule = ScheduleSpec::crontab(expr).unwrap();
            assert_eq!(
                schedule.next_after(friday, Tz::UTC),
                Some(utc("2024-03-02T12:00:00Z")),
                "{expr}"
            );
        }

        // 5-7/2 is Friday and Sunday.
        let stepped = ScheduleSpec::crontab("0 12 * * 5-7/2").unwrap();
        assert_eq!(stepped.next_after(friday, Tz::UTC), Some(utc("2024-03-03T12:00:00Z")));

        assert_eq!(translate_weekdays("0-7").unwrap(), "SUN,MON,TUE,WED,THU,FRI,SAT");
        assert_eq!(translate_weekdays("6-7").unwrap(), "SUN,SAT");
        assert!(translate_weekdays("5-1").is_err());
        assert!(translate_weekdays("1-5/0").is_err());
    }

    #[test]
    fn test_nicknames_are_expanded() {
        assert_eq!(
            ScheduleSpec::crontab("@daily").unwrap(),
            ScheduleSpec::Crontab("0 0 * * *".to_string())
        );
        assert_eq!(
            ScheduleSpec::crontab("  13   *  * * * ").unwrap(),
            ScheduleSpec::Crontab("13 * * * *".to_string())
        );
    }

    #[test]
    fn test_six_field_crontab_rejected() {
        assert_eq!(
            ScheduleSpec::crontab("13 * * * * *"),
            Err(ScheduleError::FieldCount(6))
        );
    }

    #[test]
    fn test_garbage_crontab_rejected() {
        assert!(matches!(
            ScheduleSpec::crontab("61 * * * *"),
            Err(ScheduleError::InvalidCrontab { .. })
        ));
    }

    #[test]
    fn test_schedule_without_occurrence_rejected() {
        let schedule = ScheduleSpec::crontab("* * 31 2 *").unwrap();
        assert!(matches!(
            schedule.ensure_occurs(utc("2024-03-01T00:00:00Z"), Tz::UTC),
            Err(ScheduleError::NoOccurrence(_))
        ));

        let leap_day = ScheduleSpec::crontab("0 0 29 2 *").unwrap();
        assert!(leap_day.ensure_occurs(utc("2024-03-01T00:00:00Z"), Tz::UTC).is_ok());
    }

    #[test]
    fn test_interval_next() {
        let schedule = ScheduleSpec::interval(5, "minute").unwrap();
        let next = schedule.next_after(utc("2024-03-01T10:20:45Z"), Tz::UTC).unwrap();
        assert_eq!(next, utc("2024-03-01T10:25:00Z"));

        let monthly = ScheduleSpec::interval(1, "month").unwrap();
        let next = monthly.next_after(utc("2024-01-31T00:00:00Z"), Tz::UTC).unwrap();
        assert_eq!(next, utc("2024-02-29T00:00:00Z"));
    }

    #[test]
    fn test_invalid_intervals() {
        assert!(ScheduleSpec::interval(0, "minute").is_err());
        assert!(ScheduleSpec::interval(-3, "hour").is_err());
        assert!(ScheduleSpec::interval(1, "fortnight").is_err());
    }

    #[test]
    fn test_from_stored_round_trip_shapes() {
        let mut config = serde_json::Map::new();
        config.insert("schedule".into(), json!([2, "hour"]));
        config.insert("schedule_type".into(), json!("interval"));
        assert_eq!(
            ScheduleSpec::from_stored(&config).unwrap(),
            ScheduleSpec::Interval { value: 2, unit: IntervalUnit::Hour }
        );

        let mut config = serde_json::Map::new();
        config.insert("schedule".into(), json!("0 * * * *"));
        assert_eq!(
            ScheduleSpec::from_stored(&config).unwrap().to_config_value(),
            json!("0 * * * *")
        );
    }
}
