//! Envelope and check-in payload decoding.
//!
//! The envelope is JSON tagged by `message_type`. For check-ins the inner
//! `payload` is either a JSON-encoded string (what SDK relays produce) or an
//! inline object.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::db::enums::CheckInStatus;

pub const DEFAULT_ENVIRONMENT: &str = "production";

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("invalid envelope: {0}")]
    Envelope(serde_json::Error),
    #[error("invalid check-in payload: {0}")]
    Payload(serde_json::Error),
    #[error("invalid start_time {0}")]
    StartTime(f64),
    #[error("invalid check_in_id '{0}'")]
    CheckInId(String),
    #[error("invalid duration {0}")]
    Duration(f64),
}

#[derive(Deserialize)]
#[serde(tag = "message_type", rename_all = "snake_case")]
enum RawEnvelope {
    CheckIn {
        start_time: f64,
        project_id: i32,
        payload: Value,
        #[serde(default)]
        sdk: Option<String>,
    },
    ClockPulse {},
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum RawStatus {
    Ok,
    Error,
    InProgress,
    Done,
}

impl From<RawStatus> for CheckInStatus {
    fn from(status: RawStatus) -> Self {
        match status {
            RawStatus::Ok | RawStatus::Done => CheckInStatus::Ok,
            RawStatus::Error => CheckInStatus::Error,
            RawStatus::InProgress => CheckInStatus::InProgress,
        }
    }
}

#[derive(Deserialize)]
struct RawCheckIn {
    monitor_slug: String,
    status: RawStatus,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    check_in_id: Option<String>,
    #[serde(default)]
    environment: Option<String>,
    #[serde(default)]
    monitor_config: Option<Value>,
    #[serde(default)]
    contexts: Option<RawContexts>,
}

#[derive(Deserialize)]
struct RawContexts {
    #[serde(default)]
    trace: Option<RawTrace>,
}

#[derive(Deserialize)]
struct RawTrace {
    #[serde(default)]
    trace_id: Option<String>,
}

/// A decoded message, one variant per `message_type`.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessingMessage {
    CheckIn(CheckInMessage),
    ClockPulse,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckInMessage {
    pub start_time: DateTime<Utc>,
    pub project_id: i32,
    pub sdk: Option<String>,
    /// Slug as sent by the SDK, before normalization.
    pub monitor_slug: String,
    pub status: CheckInStatus,
    /// Explicit duration in milliseconds. Not yet range-checked.
    pub duration_ms: Option<i64>,
    /// `Uuid::nil()` when the SDK asked for the currently open check-in.
    pub guid: Uuid,
    pub environment: String,
    pub monitor_config: Option<Value>,
    pub trace_id: Option<Uuid>,
}

impl CheckInMessage {
    pub fn is_sentinel(&self) -> bool {
        self.guid.is_nil()
    }
}

pub fn decode(raw: &[u8]) -> Result<ProcessingMessage, DecodeError> {
    let envelope: RawEnvelope = serde_json::from_slice(raw).map_err(DecodeError::Envelope)?;
    match envelope {
        RawEnvelope::ClockPulse {} => Ok(ProcessingMessage::ClockPulse),
        RawEnvelope::CheckIn {
            start_time,
            project_id,
            payload,
            sdk,
        } => {
            let checkin: RawCheckIn = match payload {
                Value::String(encoded) => serde_json::from_str(&encoded),
                other => serde_json::from_value(other),
            }
            .map_err(DecodeError::Payload)?;
            decode_checkin(start_time, project_id, sdk, checkin).map(ProcessingMessage::CheckIn)
        }
    }
}

/// The envelope fields a source needs for routing, read without decoding
/// the payload.
#[derive(Deserialize, Debug, Default, Clone, Copy, PartialEq)]
pub struct EnvelopeHint {
    #[serde(default)]
    pub project_id: Option<i32>,
}

impl EnvelopeHint {
    /// Never fails; unreadable envelopes yield an empty hint.
    pub fn peek(raw: &[u8]) -> Self {
        serde_json::from_slice(raw).unwrap_or_default()
    }
}

fn decode_checkin(
    start_time: f64,
    project_id: i32,
    sdk: Option<String>,
    raw: RawCheckIn,
) -> Result<CheckInMessage, DecodeError> {
    let start_time = timestamp_from_secs(start_time)?;

    let duration_ms = match raw.duration {
        None => None,
        Some(secs) if secs.is_finite() => Some((secs * 1000.0).trunc() as i64),
        Some(secs) => return Err(DecodeError::Duration(secs)),
    };

    let guid = match raw.check_in_id.as_deref().map(str::trim) {
        None | Some("") => Uuid::nil(),
        Some(id) => Uuid::parse_str(id).map_err(|_| DecodeError::CheckInId(id.to_string()))?,
    };

    let environment = raw
        .environment
        .filter(|env| !env.is_empty())
        .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string());

    // A malformed trace id is not worth dropping the check-in over.
    let trace_id = raw
        .contexts
        .and_then(|contexts| contexts.trace)
        .and_then(|trace| trace.trace_id)
        .and_then(|id| Uuid::parse_str(&id).ok());

    Ok(CheckInMessage {
        start_time,
        project_id,
        sdk,
        monitor_slug: raw.monitor_slug,
        status: raw.status.into(),
        duration_ms,
        guid,
        environment,
        monitor_config: raw.monitor_config,
        trace_id,
    })
}

fn timestamp_from_secs(secs: f64) -> Result<DateTime<Utc>, DecodeError> {
    if !secs.is_finite() {
        return Err(DecodeError::StartTime(secs));
    }
    let micros = (secs * 1_000_000.0).round() as i64;
    DateTime::<Utc>::from_timestamp_micros(micros).ok_or(DecodeError::StartTime(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(payload: Value) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "message_type": "check_in",
            "start_time": 1_709_288_445.5,
            "project_id": 7,
            "payload": payload.to_string(),
            "sdk": "test/1.0",
        }))
        .unwrap()
    }

    fn decode_checkin_payload(payload: Value) -> Result<CheckInMessage, DecodeError> {
        match decode(&envelope(payload))? {
            ProcessingMessage::CheckIn(checkin) => Ok(checkin),
            ProcessingMessage::ClockPulse => panic!("expected a check-in"),
        }
    }

    #[test]
    fn test_clock_pulse() {
        let raw = br#"{"message_type": "clock_pulse"}"#;
        assert_eq!(decode(raw).unwrap(), ProcessingMessage::ClockPulse);
    }

    #[test]
    fn test_unknown_or_missing_message_type() {
        assert!(matches!(
            decode(br#"{"message_type": "teapot"}"#),
            Err(DecodeError::Envelope(_))
        ));
        assert!(matches!(
            decode(br#"{"project_id": 1}"#),
            Err(DecodeError::Envelope(_))
        ));
        assert!(matches!(decode(b"\x81\xa3abc"), Err(DecodeError::Envelope(_))));
    }

    #[test]
    fn test_full_checkin() {
        let guid = Uuid::new_v4();
        let trace = Uuid::new_v4();
        let checkin = decode_checkin_payload(json!({
            "monitor_slug": "My-Monitor",
            "status": "done",
            "duration": 2.5,
            "check_in_id": guid.simple().to_string(),
            "environment": "jungle",
            "monitor_config": {"schedule": "* * * * *"},
            "contexts": {"trace": {"trace_id": trace.simple().to_string()}},
        }))
        .unwrap();

        assert_eq!(checkin.project_id, 7);
        assert_eq!(checkin.monitor_slug, "My-Monitor");
        assert_eq!(checkin.status, CheckInStatus::Ok);
        assert_eq!(checkin.duration_ms, Some(2500));
        assert_eq!(checkin.guid, guid);
        assert_eq!(checkin.environment, "jungle");
        assert_eq!(checkin.trace_id, Some(trace));
        assert_eq!(checkin.sdk.as_deref(), Some("test/1.0"));
        assert_eq!(checkin.start_time.timestamp_millis(), 1_709_288_445_500);
    }

    #[test]
    fn test_defaults_and_sentinel() {
        let checkin = decode_checkin_payload(json!({
            "monitor_slug": "m",
            "status": "in_progress",
            "check_in_id": "",
            "environment": null,
        }))
        .unwrap();
        assert!(checkin.is_sentinel());
        assert_eq!(checkin.environment, DEFAULT_ENVIRONMENT);
        assert_eq!(checkin.duration_ms, None);
        assert_eq!(checkin.status, CheckInStatus::InProgress);

        let zero = decode_checkin_payload(json!({
            "monitor_slug": "m",
            "status": "ok",
            "check_in_id": Uuid::nil().to_string(),
        }))
        .unwrap();
        assert!(zero.is_sentinel());
    }

    #[test]
    fn test_inline_payload_object() {
        let raw = serde_json::to_vec(&json!({
            "message_type": "check_in",
            "start_time": 1_709_288_445.0,
            "project_id": 1,
            "payload": {"monitor_slug": "m", "status": "error"},
        }))
        .unwrap();
        match decode(&raw).unwrap() {
            ProcessingMessage::CheckIn(checkin) => assert_eq!(checkin.status, CheckInStatus::Error),
            ProcessingMessage::ClockPulse => panic!("expected a check-in"),
        }
    }

    #[test]
    fn test_negative_duration_is_kept_for_validation() {
        let checkin = decode_checkin_payload(json!({
            "monitor_slug": "m",
            "status": "ok",
            "duration": -0.001,
        }))
        .unwrap();
        assert_eq!(checkin.duration_ms, Some(-1));
    }

    #[test]
    fn test_bad_payloads() {
        assert!(matches!(
            decode_checkin_payload(json!({"status": "ok"})),
            Err(DecodeError::Payload(_))
        ));
        assert!(matches!(
            decode_checkin_payload(json!({"monitor_slug": "m", "status": "missed"})),
            Err(DecodeError::Payload(_))
        ));
        assert!(matches!(
            decode_checkin_payload(json!({"monitor_slug": "m", "status": "ok", "check_in_id": "nope"})),
            Err(DecodeError::CheckInId(_))
        ));
    }

    #[test]
    fn test_envelope_hint() {
        let hint = EnvelopeHint::peek(&envelope(json!({})));
        assert_eq!(hint.project_id, Some(7));
        assert_eq!(
            EnvelopeHint::peek(br#"{"message_type": "clock_pulse"}"#),
            EnvelopeHint::default()
        );
        assert_eq!(EnvelopeHint::peek(b"garbage"), EnvelopeHint::default());
    }
}
