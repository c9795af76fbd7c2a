//! Monitor configuration carried on check-ins.
//!
//! An incoming `monitor_config` is validated into a [`ConfigPatch`], which is
//! then merged over the stored config. Keys the patch does not mention keep
//! their stored values.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use super::schedule::{truncate_to_minute, ScheduleError, ScheduleSpec};

pub const MIN_CHECKIN_MARGIN_MINUTES: i64 = 1;
pub const MAX_CHECKIN_MARGIN_MINUTES: i64 = 40_320;
pub const MAX_RUNTIME_MINUTES: i64 = 40_320;
pub const DEFAULT_MAX_RUNTIME_MINUTES: i64 = 30;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MonitorConfigError {
    #[error("monitor_config must be an object")]
    NotAnObject,
    #[error("monitor_config is missing a schedule")]
    MissingSchedule,
    #[error("invalid schedule: {0}")]
    Schedule(#[from] ScheduleError),
    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> MonitorConfigError {
    MonitorConfigError::InvalidField {
        field,
        reason: reason.into(),
    }
}

/// Owner reference parsed from `user:<id>` / `team:<id>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerHint {
    User(i32),
    Team(i32),
}

impl OwnerHint {
    pub fn parse(raw: &str) -> Option<Self> {
        let (kind, id) = raw.split_once(':')?;
        let id = id.trim().parse::<i32>().ok()?;
        match kind.trim() {
            "user" => Some(OwnerHint::User(id)),
            "team" => Some(OwnerHint::Team(id)),
            _ => None,
        }
    }
}

/// A validated monitor config update.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigPatch {
    values: Map<String, Value>,
    removed: Vec<&'static str>,
    schedule: ScheduleSpec,
    owner: Option<OwnerHint>,
}

impl ConfigPatch {
    /// Validates a raw `monitor_config`. `now` anchors the check that the
    /// schedule fires at least once in the lookahead window.
    pub fn from_payload(raw: &Value, now: DateTime<Utc>) -> Result<Self, MonitorConfigError> {
        let raw = raw.as_object().ok_or(MonitorConfigError::NotAnObject)?;
        let mut values = Map::new();
        let mut removed = Vec::new();

        let schedule = parse_schedule(raw)?;

        let mut timezone = Tz::UTC;
        match raw.get("timezone") {
            None => {}
            Some(Value::Null) => removed.push("timezone"),
            Some(Value::String(tz)) if tz.is_empty() => removed.push("timezone"),
            Some(Value::String(tz)) => {
                timezone = tz
                    .parse::<Tz>()
                    .map_err(|_| invalid("timezone", format!("unknown timezone '{tz}'")))?;
                values.insert("timezone".into(), Value::String(tz.clone()));
            }
            Some(other) => return Err(invalid("timezone", format!("expected a string, got {other}"))),
        }

        schedule.ensure_occurs(now, timezone)?;
        values.insert("schedule_type".into(), Value::from(schedule.schedule_type()));
        values.insert("schedule".into(), schedule.to_config_value());

        if let Some(margin) = raw.get("checkin_margin") {
            let margin = optional_minutes("checkin_margin", margin, 0, MAX_CHECKIN_MARGIN_MINUTES)?
                .map(|m| m.max(MIN_CHECKIN_MARGIN_MINUTES));
            values.insert("checkin_margin".into(), margin.map_or(Value::Null, Value::from));
        }

        if let Some(max_runtime) = raw.get("max_runtime") {
            let max_runtime = optional_minutes("max_runtime", max_runtime, 1, MAX_RUNTIME_MINUTES)?;
            values.insert("max_runtime".into(), max_runtime.map_or(Value::Null, Value::from));
        }

        let owner = match raw.get("owner") {
            Some(Value::String(owner)) => {
                let hint = OwnerHint::parse(owner);
                if hint.is_none() {
                    debug!(owner = %owner, "Ignoring unparseable monitor owner.");
                }
                hint
            }
            _ => None,
        };

        Ok(ConfigPatch {
            values,
            removed,
            schedule,
            owner,
        })
    }

    pub fn schedule(&self) -> &ScheduleSpec {
        &self.schedule
    }

    pub fn owner(&self) -> Option<OwnerHint> {
        self.owner
    }

    /// Returns a new config with this patch applied over `prior`.
    pub fn merge_into(&self, prior: &Value) -> Value {
        let mut merged = prior.as_object().cloned().unwrap_or_default();
        for (key, value) in &self.values {
            merged.insert(key.clone(), value.clone());
        }
        for key in &self.removed {
            merged.remove(*key);
        }
        merged.remove("owner");
        Value::Object(merged)
    }
}

fn parse_schedule(raw: &Map<String, Value>) -> Result<ScheduleSpec, MonitorConfigError> {
    let declared_type = raw.get("schedule_type").and_then(Value::as_str);
    let schedule = raw.get("schedule").ok_or(MonitorConfigError::MissingSchedule)?;
    let spec = match schedule {
        Value::String(expr) => match declared_type {
            None | Some("crontab") => ScheduleSpec::crontab(expr)?,
            Some(other) => return Err(ScheduleError::UnknownType(other.to_string()).into()),
        },
        Value::Array(_) => {
            if let Some(other) = declared_type.filter(|t| *t != "interval") {
                return Err(ScheduleError::UnknownType(other.to_string()).into());
            }
            let mut stored = Map::new();
            stored.insert("schedule_type".into(), Value::from("interval"));
            stored.insert("schedule".into(), schedule.clone());
            ScheduleSpec::from_stored(&stored)?
        }
        Value::Object(object) => {
            let kind = object.get("type").and_then(Value::as_str).unwrap_or("crontab");
            let value = object.get("value").unwrap_or(&Value::Null);
            match kind {
                "crontab" => {
                    let expr = value
                        .as_str()
                        .ok_or_else(|| invalid("schedule", "crontab value must be a string"))?;
                    ScheduleSpec::crontab(expr)?
                }
                "interval" => {
                    let count = value
                        .as_i64()
                        .ok_or_else(|| invalid("schedule", "interval value must be an integer"))?;
                    let unit = object
                        .get("unit")
                        .and_then(Value::as_str)
                        .ok_or_else(|| invalid("schedule", "interval unit must be a string"))?;
                    ScheduleSpec::interval(count, unit)?
                }
                other => return Err(ScheduleError::UnknownType(other.to_string()).into()),
            }
        }
        other => return Err(invalid("schedule", format!("unsupported schedule {other}"))),
    };
    Ok(spec)
}

fn optional_minutes(
    field: &'static str,
    value: &Value,
    min: i64,
    max: i64,
) -> Result<Option<i64>, MonitorConfigError> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => match n.as_i64() {
            Some(minutes) if (min..=max).contains(&minutes) => Ok(Some(minutes)),
            _ => Err(invalid(field, format!("{n} is outside {min}..={max}"))),
        },
        other => Err(invalid(field, format!("expected an integer, got {other}"))),
    }
}

/// The parts of a stored config the consumer needs when scheduling.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveConfig {
    pub schedule: Option<ScheduleSpec>,
    pub timezone: Tz,
    pub checkin_margin_minutes: i64,
    pub max_runtime_minutes: i64,
}

impl EffectiveConfig {
    pub fn from_stored(config: &Value) -> Self {
        let empty = Map::new();
        let config = config.as_object().unwrap_or(&empty);
        let schedule = match ScheduleSpec::from_stored(config) {
            Ok(schedule) => Some(schedule),
            Err(e) => {
                debug!(error = %e, "Stored monitor config has no usable schedule.");
                None
            }
        };
        let timezone = config
            .get("timezone")
            .and_then(Value::as_str)
            .and_then(|tz| tz.parse::<Tz>().ok())
            .unwrap_or(Tz::UTC);
        let checkin_margin_minutes = config
            .get("checkin_margin")
            .and_then(Value::as_i64)
            .unwrap_or(MIN_CHECKIN_MARGIN_MINUTES)
            .max(MIN_CHECKIN_MARGIN_MINUTES);
        let max_runtime_minutes = config
            .get("max_runtime")
            .and_then(Value::as_i64)
            .filter(|m| *m > 0)
            .unwrap_or(DEFAULT_MAX_RUNTIME_MINUTES);
        EffectiveConfig {
            schedule,
            timezone,
            checkin_margin_minutes,
            max_runtime_minutes,
        }
    }

    pub fn next_checkin(&self, last_checkin: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.as_ref()?.next_after(last_checkin, self.timezone)
    }

    pub fn next_checkin_latest(&self, next_checkin: DateTime<Utc>) -> DateTime<Utc> {
        next_checkin + Duration::minutes(self.checkin_margin_minutes)
    }

    /// When an in-progress check-in started at `date_added` times out.
    pub fn timeout_at(&self, date_added: DateTime<Utc>) -> DateTime<Utc> {
        truncate_to_minute(date_added) + Duration::minutes(self.max_runtime_minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-03-01T10:20:45Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn stored() -> Value {
        json!({
            "schedule": "* * * * *",
            "schedule_type": "crontab",
            "checkin_margin": 5,
            "max_runtime": null,
        })
    }

    #[test]
    fn test_merge_preserves_omitted_keys() {
        let patch = ConfigPatch::from_payload(
            &json!({"schedule": {"type": "crontab", "value": "13 * * * *"}}),
            now(),
        )
        .unwrap();
        let prior = stored();
        let merged = patch.merge_into(&prior);

        assert_eq!(merged["schedule"], json!("13 * * * *"));
        assert_eq!(merged["schedule_type"], json!("crontab"));
        assert_eq!(merged["checkin_margin"], json!(5));
        // The prior value is untouched.
        assert_eq!(prior["schedule"], json!("* * * * *"));
    }

    #[test]
    fn test_zero_margin_is_coerced() {
        let patch = ConfigPatch::from_payload(
            &json!({"schedule": "13 * * * *", "checkin_margin": 0}),
            now(),
        )
        .unwrap();
        assert_eq!(patch.merge_into(&json!({}))["checkin_margin"], json!(1));
    }

    #[test]
    fn test_empty_timezone_is_removed() {
        let patch = ConfigPatch::from_payload(
            &json!({"schedule": "13 * * * *", "timezone": ""}),
            now(),
        )
        .unwrap();
        let merged = patch.merge_into(&json!({"schedule": "0 * * * *", "timezone": "UTC"}));
        assert!(merged.get("timezone").is_none());
    }

    #[test]
    fn test_owner_is_never_stored() {
        let patch = ConfigPatch::from_payload(
            &json!({"schedule": "13 * * * *", "owner": "team:4"}),
            now(),
        )
        .unwrap();
        assert_eq!(patch.owner(), Some(OwnerHint::Team(4)));
        let merged = patch.merge_into(&json!({"owner": "user:1"}));
        assert!(merged.get("owner").is_none());
    }

    #[test]
    fn test_owner_hint_parsing() {
        assert_eq!(OwnerHint::parse("user:12"), Some(OwnerHint::User(12)));
        assert_eq!(OwnerHint::parse("team:3"), Some(OwnerHint::Team(3)));
        assert_eq!(OwnerHint::parse("group:3"), None);
        assert_eq!(OwnerHint::parse("user:abc"), None);
        assert_eq!(OwnerHint::parse("user"), None);
    }

    #[test]
    fn test_interval_shapes() {
        let object = ConfigPatch::from_payload(
            &json!({"schedule": {"type": "interval", "value": 10, "unit": "minute"}}),
            now(),
        )
        .unwrap();
        let pair = ConfigPatch::from_payload(
            &json!({"schedule": [10, "minute"], "schedule_type": "interval"}),
            now(),
        )
        .unwrap();
        assert_eq!(object.schedule(), pair.schedule());
        assert_eq!(object.merge_into(&json!({}))["schedule"], json!([10, "minute"]));
    }

    #[test]
    fn test_rejections() {
        let cases = [
            json!("13 * * * *"),
            json!({}),
            json!({"schedule": "13 * * * * *"}),
            json!({"schedule": "* * 31 2 *"}),
            json!({"schedule": "13 * * * *", "checkin_margin": -1}),
            json!({"schedule": "13 * * * *", "checkin_margin": "5"}),
            json!({"schedule": "13 * * * *", "max_runtime": 0}),
            json!({"schedule": "13 * * * *", "max_runtime": 40_321}),
            json!({"schedule": "13 * * * *", "timezone": "Mars/Olympus"}),
            json!({"schedule": [1, "minute"], "schedule_type": "crontab"}),
        ];
        for case in cases {
            assert!(
                ConfigPatch::from_payload(&case, now()).is_err(),
                "expected {case} to be rejected"
            );
        }
    }

    #[test]
    fn test_effective_config_deadlines() {
        let config = EffectiveConfig::from_stored(&json!({
            "schedule": "13 * * * *",
            "schedule_type": "crontab",
            "checkin_margin": 5,
        }));
        let next = config.next_checkin(now()).unwrap();
        assert_eq!(next.to_rfc3339(), "2024-03-01T11:13:00+00:00");
        assert_eq!(config.next_checkin_latest(next), next + Duration::minutes(5));
        assert_eq!(
            config.timeout_at(now()).to_rfc3339(),
            "2024-03-01T10:50:00+00:00"
        );
    }

    #[test]
    fn test_effective_config_defaults() {
        let config = EffectiveConfig::from_stored(&json!({"schedule": "0 * * * *", "checkin_margin": null}));
        assert_eq!(config.checkin_margin_minutes, MIN_CHECKIN_MARGIN_MINUTES);
        assert_eq!(config.max_runtime_minutes, DEFAULT_MAX_RUNTIME_MINUTES);
        assert_eq!(config.timezone, Tz::UTC);
    }
}
