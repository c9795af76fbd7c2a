//! Liveness state of a monitor environment after a reconciled check-in.

use sea_orm::{ConnectionTrait, DbErr};
use tracing::debug;

use crate::db::entities::{monitor_checkin, monitor_environment};
use crate::db::enums::MonitorEnvStatus;
use crate::db::services::{self, EnvironmentState};
use crate::monitors::EffectiveConfig;

/// Status follows the check-in; deadlines are recomputed from the check-in's
/// creation time. Muted monitors are updated the same way.
pub fn next_state(config: &EffectiveConfig, checkin: &monitor_checkin::Model) -> Option<EnvironmentState> {
    let status = MonitorEnvStatus::from(checkin.status()?);
    let last_checkin = checkin.date_added;
    let next_checkin = config.next_checkin(last_checkin);
    Some(EnvironmentState {
        status,
        last_checkin,
        next_checkin,
        next_checkin_latest: next_checkin.map(|next| config.next_checkin_latest(next)),
    })
}

pub async fn update_environment<C: ConnectionTrait>(
    db: &C,
    monitor_environment: monitor_environment::Model,
    config: &EffectiveConfig,
    checkin: &monitor_checkin::Model,
) -> Result<monitor_environment::Model, DbErr> {
    let Some(state) = next_state(config, checkin) else {
        debug!(status = %checkin.status, "Check-in status not understood, environment left as is.");
        return Ok(monitor_environment);
    };
    services::update_monitor_environment_state(db, monitor_environment, state).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::enums::CheckInStatus;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn test_hourly_schedule_with_margin() {
        let config = EffectiveConfig::from_stored(&json!({
            "schedule_type": "crontab",
            "schedule": "13 * * * *",
            "checkin_margin": 5,
        }));
        let checkin = monitor_checkin::Model {
            id: 1,
            guid: Uuid::new_v4(),
            project_id: 1,
            monitor_id: 1,
            monitor_environment_id: 1,
            status: CheckInStatus::Error.as_str().to_string(),
            duration: None,
            date_added: Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 42).unwrap(),
            date_updated: Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 42).unwrap(),
            expected_time: None,
            timeout_at: None,
            monitor_config: None,
            trace_id: None,
        };

        let state = next_state(&config, &checkin).unwrap();
        assert_eq!(state.status, MonitorEnvStatus::Error);
        assert_eq!(state.last_checkin, checkin.date_added);
        assert_eq!(state.next_checkin, Some(Utc.with_ymd_and_hms(2024, 3, 1, 13, 13, 0).unwrap()));
        assert_eq!(
            state.next_checkin_latest,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 13, 18, 0).unwrap())
        );
    }
}
