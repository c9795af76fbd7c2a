//! Merges an incoming check-in into the stored history of its environment.
//!
//! [`reconcile`] decides what should happen and is free of I/O; [`apply`]
//! performs the decision against the database.

use chrono::Utc;
use sea_orm::ConnectionTrait;
use uuid::Uuid;

use crate::consumer::decoder::CheckInMessage;
use crate::db::entities::{monitor, monitor_checkin, monitor_environment};
use crate::db::enums::CheckInStatus;
use crate::db::services::{self, CheckInUpdate, NewCheckIn};
use crate::error::{ProcessingError, ValidationError};
use crate::monitors::EffectiveConfig;

/// Largest duration, in milliseconds, a check-in can carry.
pub const MAX_DURATION_MS: i64 = 2_147_483_647;

#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    /// No matching row; insert a new check-in.
    Create {
        guid: Uuid,
        status: CheckInStatus,
        duration: Option<i32>,
    },
    /// An open check-in closes (or a timed out one gets its duration).
    Transition {
        status: CheckInStatus,
        duration: Option<i32>,
    },
    /// A finished check-in receives an explicit duration.
    RecordDuration { duration: i32 },
    Unchanged,
}

impl Reconciliation {
    /// Whether the environment's liveness state follows from this outcome.
    pub fn updates_environment(&self) -> bool {
        matches!(self, Reconciliation::Create { .. } | Reconciliation::Transition { .. })
    }
}

fn checked_duration(duration_ms: i64) -> Option<i32> {
    if (0..=MAX_DURATION_MS).contains(&duration_ms) {
        i32::try_from(duration_ms).ok()
    } else {
        None
    }
}

/// Decides how `incoming` applies to `existing`, the row its guid (or the
/// open-check-in sentinel) resolved to within the monitor environment.
pub fn reconcile(
    existing: Option<&monitor_checkin::Model>,
    incoming: &CheckInMessage,
    monitor_id: i32,
    monitor_environment_id: i32,
) -> Result<Reconciliation, ProcessingError> {
    let explicit_duration = match incoming.duration_ms {
        None => None,
        Some(ms) => Some(checked_duration(ms).ok_or(ValidationError::InvalidDuration(ms))?),
    };

    let Some(existing) = existing else {
        let guid = if incoming.is_sentinel() {
            Uuid::new_v4()
        } else {
            incoming.guid
        };
        return Ok(Reconciliation::Create {
            guid,
            status: incoming.status,
            duration: explicit_duration,
        });
    };

    if existing.monitor_id != monitor_id || existing.monitor_environment_id != monitor_environment_id {
        return Err(ProcessingError::ConflictIdentity(format!(
            "check-in {} belongs to monitor {} environment {}",
            existing.guid, existing.monitor_id, existing.monitor_environment_id
        )));
    }

    let Some(current) = existing.status() else {
        return Ok(Reconciliation::Unchanged);
    };

    if current.is_terminal() || incoming.status == CheckInStatus::InProgress {
        // Terminal rows keep their status. Only an explicit duration lands.
        return Ok(match explicit_duration {
            Some(duration) if current.is_terminal() && existing.duration != Some(duration) => {
                Reconciliation::RecordDuration { duration }
            }
            _ => Reconciliation::Unchanged,
        });
    }

    let duration = match explicit_duration {
        Some(duration) => duration,
        None => {
            let elapsed = (incoming.start_time - existing.date_added).num_milliseconds().abs();
            match checked_duration(elapsed) {
                Some(duration) => duration,
                None => return Ok(Reconciliation::Unchanged),
            }
        }
    };

    // TIMEOUT is sticky; only the duration is filled in.
    let status = match current {
        CheckInStatus::Timeout => CheckInStatus::Timeout,
        _ => incoming.status,
    };
    Ok(Reconciliation::Transition {
        status,
        duration: Some(duration),
    })
}

/// Finds the row the incoming check-in refers to.
pub async fn find_target<C: ConnectionTrait>(
    db: &C,
    incoming: &CheckInMessage,
    monitor_environment_id: i32,
) -> Result<Option<monitor_checkin::Model>, ProcessingError> {
    let target = if incoming.is_sentinel() {
        services::find_latest_open_checkin(db, monitor_environment_id).await?
    } else {
        services::find_checkin_by_guid(db, incoming.guid).await?
    };
    Ok(target)
}

/// Writes `reconciliation`. Returns the resulting row when the environment
/// state has to follow it.
pub async fn apply<C: ConnectionTrait>(
    db: &C,
    reconciliation: Reconciliation,
    existing: Option<monitor_checkin::Model>,
    incoming: &CheckInMessage,
    monitor: &monitor::Model,
    monitor_environment: &monitor_environment::Model,
    config: &EffectiveConfig,
) -> Result<Option<monitor_checkin::Model>, ProcessingError> {
    match (reconciliation, existing) {
        (Reconciliation::Create { guid, status, duration }, _) => {
            let timeout_at =
                (status == CheckInStatus::InProgress).then(|| config.timeout_at(incoming.start_time));
            let created = services::insert_checkin(
                db,
                NewCheckIn {
                    guid,
                    project_id: incoming.project_id,
                    monitor_id: monitor.id,
                    monitor_environment_id: monitor_environment.id,
                    status,
                    duration,
                    date_added: incoming.start_time,
                    expected_time: monitor_environment.next_checkin,
                    timeout_at,
                    monitor_config: Some(monitor.config.clone()),
                    trace_id: incoming.trace_id,
                },
            )
            .await?
            .ok_or_else(|| ProcessingError::ConflictIdentity(format!("check-in {guid} already exists")))?;
            Ok(Some(created))
        }
        (Reconciliation::Transition { status, duration }, Some(row)) => {
            let timeout_at = match status {
                CheckInStatus::Timeout => row.timeout_at,
                _ => None,
            };
            let updated = services::update_checkin(
                db,
                row,
                CheckInUpdate {
                    status,
                    duration,
                    timeout_at,
                    date_updated: Utc::now(),
                },
            )
            .await?;
            Ok(Some(updated))
        }
        (Reconciliation::RecordDuration { duration }, Some(row)) => {
            let status = row.status().unwrap_or(CheckInStatus::Ok);
            let timeout_at = row.timeout_at;
            services::update_checkin(
                db,
                row,
                CheckInUpdate {
                    status,
                    duration: Some(duration),
                    timeout_at,
                    date_updated: Utc::now(),
                },
            )
            .await?;
            Ok(None)
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone};

    const MONITOR: i32 = 1;
    const ENV: i32 = 10;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn message(status: CheckInStatus, guid: Uuid, at: DateTime<Utc>, duration_ms: Option<i64>) -> CheckInMessage {
        CheckInMessage {
            start_time: at,
            project_id: 5,
            sdk: None,
            monitor_slug: "my-monitor".into(),
            status,
            duration_ms,
            guid,
            environment: "production".into(),
            monitor_config: None,
            trace_id: None,
        }
    }

    fn row(status: CheckInStatus, guid: Uuid, duration: Option<i32>) -> monitor_checkin::Model {
        monitor_checkin::Model {
            id: 1,
            guid,
            project_id: 5,
            monitor_id: MONITOR,
            monitor_environment_id: ENV,
            status: status.as_str().to_string(),
            duration,
            date_added: t0(),
            date_updated: t0(),
            expected_time: None,
            timeout_at: None,
            monitor_config: None,
            trace_id: None,
        }
    }

    #[test]
    fn test_create_keeps_guid_and_sentinel_gets_fresh_one() {
        let guid = Uuid::new_v4();
        let incoming = message(CheckInStatus::Ok, guid, t0(), Some(1_000));
        assert_eq!(
            reconcile(None, &incoming, MONITOR, ENV).unwrap(),
            Reconciliation::Create {
                guid,
                status: CheckInStatus::Ok,
                duration: Some(1_000)
            }
        );

        let sentinel = message(CheckInStatus::InProgress, Uuid::nil(), t0(), None);
        match reconcile(None, &sentinel, MONITOR, ENV).unwrap() {
            Reconciliation::Create { guid, .. } => assert!(!guid.is_nil()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_duration_bounds() {
        let guid = Uuid::new_v4();
        for bad in [-1, MAX_DURATION_MS + 1] {
            let incoming = message(CheckInStatus::Ok, guid, t0(), Some(bad));
            assert!(matches!(
                reconcile(None, &incoming, MONITOR, ENV),
                Err(ProcessingError::ValidationRejected(ValidationError::InvalidDuration(_)))
            ));
            let open = row(CheckInStatus::InProgress, guid, None);
            assert!(reconcile(Some(&open), &incoming, MONITOR, ENV).is_err());
        }
        let incoming = message(CheckInStatus::Ok, guid, t0(), Some(MAX_DURATION_MS));
        assert!(reconcile(None, &incoming, MONITOR, ENV).is_ok());
    }

    #[test]
    fn test_close_computes_duration_from_either_order() {
        let guid = Uuid::new_v4();
        let open = row(CheckInStatus::InProgress, guid, None);

        let later = message(CheckInStatus::Ok, guid, t0() + Duration::seconds(5), None);
        assert_eq!(
            reconcile(Some(&open), &later, MONITOR, ENV).unwrap(),
            Reconciliation::Transition {
                status: CheckInStatus::Ok,
                duration: Some(5_000)
            }
        );

        let earlier = message(CheckInStatus::Error, guid, t0() - Duration::seconds(3), None);
        assert_eq!(
            reconcile(Some(&open), &earlier, MONITOR, ENV).unwrap(),
            Reconciliation::Transition {
                status: CheckInStatus::Error,
                duration: Some(3_000)
            }
        );
    }

    #[test]
    fn test_implicit_duration_over_bound_is_ignored() {
        let guid = Uuid::new_v4();
        let open = row(CheckInStatus::InProgress, guid, None);
        let far = message(CheckInStatus::Ok, guid, t0() + Duration::days(30), None);
        assert_eq!(reconcile(Some(&open), &far, MONITOR, ENV).unwrap(), Reconciliation::Unchanged);
    }

    #[test]
    fn test_terminal_is_sticky() {
        let guid = Uuid::new_v4();
        let done = row(CheckInStatus::Ok, guid, Some(100));

        let error = message(CheckInStatus::Error, guid, t0(), None);
        assert_eq!(reconcile(Some(&done), &error, MONITOR, ENV).unwrap(), Reconciliation::Unchanged);

        let with_duration = message(CheckInStatus::Error, guid, t0(), Some(2_500));
        assert_eq!(
            reconcile(Some(&done), &with_duration, MONITOR, ENV).unwrap(),
            Reconciliation::RecordDuration { duration: 2_500 }
        );

        let same_duration = message(CheckInStatus::Ok, guid, t0(), Some(100));
        assert_eq!(
            reconcile(Some(&done), &same_duration, MONITOR, ENV).unwrap(),
            Reconciliation::Unchanged
        );
    }

    #[test]
    fn test_timeout_is_sticky() {
        let guid = Uuid::new_v4();
        let timed_out = row(CheckInStatus::Timeout, guid, None);
        let ok = message(CheckInStatus::Ok, guid, t0() + Duration::minutes(45), None);
        assert_eq!(
            reconcile(Some(&timed_out), &ok, MONITOR, ENV).unwrap(),
            Reconciliation::Transition {
                status: CheckInStatus::Timeout,
                duration: Some(45 * 60 * 1000)
            }
        );
    }

    #[test]
    fn test_in_progress_on_open_row_is_noop() {
        let guid = Uuid::new_v4();
        let open = row(CheckInStatus::InProgress, guid, None);
        let again = message(CheckInStatus::InProgress, guid, t0() + Duration::seconds(1), None);
        assert_eq!(reconcile(Some(&open), &again, MONITOR, ENV).unwrap(), Reconciliation::Unchanged);
    }

    #[test]
    fn test_foreign_guid_is_a_conflict() {
        let guid = Uuid::new_v4();
        let elsewhere = row(CheckInStatus::InProgress, guid, None);
        let incoming = message(CheckInStatus::Ok, guid, t0(), None);
        assert!(matches!(
            reconcile(Some(&elsewhere), &incoming, MONITOR, ENV + 1),
            Err(ProcessingError::ConflictIdentity(_))
        ));
        assert!(matches!(
            reconcile(Some(&elsewhere), &incoming, MONITOR + 1, ENV),
            Err(ProcessingError::ConflictIdentity(_))
        ));
    }

    #[test]
    fn test_only_create_and_transition_touch_environment() {
        assert!(Reconciliation::Transition {
            status: CheckInStatus::Ok,
            duration: None
        }
        .updates_environment());
        assert!(!Reconciliation::RecordDuration { duration: 1 }.updates_environment());
        assert!(!Reconciliation::Unchanged.updates_environment());
    }
}
