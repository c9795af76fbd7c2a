//! Data access for check-ins.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, IntoActiveModel,
    QueryFilter, QueryOrder, Set,
};
use serde_json::Value;
use uuid::Uuid;

use crate::db::entities::{monitor_checkin, prelude::*};
use crate::db::enums::CheckInStatus;
use crate::db::services::insert_ignoring_conflict;

#[derive(Debug, Clone)]
pub struct NewCheckIn {
    pub guid: Uuid,
    pub project_id: i32,
    pub monitor_id: i32,
    pub monitor_environment_id: i32,
    pub status: CheckInStatus,
    pub duration: Option<i32>,
    pub date_added: DateTime<Utc>,
    pub expected_time: Option<DateTime<Utc>>,
    pub timeout_at: Option<DateTime<Utc>>,
    pub monitor_config: Option<Value>,
    pub trace_id: Option<Uuid>,
}

pub async fn find_checkin_by_guid<C: ConnectionTrait>(
    db: &C,
    guid: Uuid,
) -> Result<Option<monitor_checkin::Model>, DbErr> {
    MonitorCheckIn::find()
        .filter(monitor_checkin::Column::Guid.eq(guid))
        .one(db)
        .await
}

/// Most recently created check-in of the environment that is still
/// IN_PROGRESS or was marked TIMEOUT.
pub async fn find_latest_open_checkin<C: ConnectionTrait>(
    db: &C,
    monitor_environment_id: i32,
) -> Result<Option<monitor_checkin::Model>, DbErr> {
    MonitorCheckIn::find()
        .filter(monitor_checkin::Column::MonitorEnvironmentId.eq(monitor_environment_id))
        .filter(monitor_checkin::Column::Status.is_in([
            CheckInStatus::InProgress.as_str(),
            CheckInStatus::Timeout.as_str(),
        ]))
        .order_by_desc(monitor_checkin::Column::DateAdded)
        .order_by_desc(monitor_checkin::Column::Id)
        .one(db)
        .await
}

#[cfg(test)]
pub async fn find_checkins_for_environment<C: ConnectionTrait>(
    db: &C,
    monitor_environment_id: i32,
) -> Result<Vec<monitor_checkin::Model>, DbErr> {
    MonitorCheckIn::find()
        .filter(monitor_checkin::Column::MonitorEnvironmentId.eq(monitor_environment_id))
        .order_by_asc(monitor_checkin::Column::DateAdded)
        .order_by_asc(monitor_checkin::Column::Id)
        .all(db)
        .await
}

/// Inserts the check-in. Returns `None` when another row already holds the
/// guid.
pub async fn insert_checkin<C: ConnectionTrait>(
    db: &C,
    new_checkin: NewCheckIn,
) -> Result<Option<monitor_checkin::Model>, DbErr> {
    let guid = new_checkin.guid;
    let model = monitor_checkin::ActiveModel {
        guid: Set(new_checkin.guid),
        project_id: Set(new_checkin.project_id),
        monitor_id: Set(new_checkin.monitor_id),
        monitor_environment_id: Set(new_checkin.monitor_environment_id),
        status: Set(new_checkin.status.as_str().to_string()),
        duration: Set(new_checkin.duration),
        date_added: Set(new_checkin.date_added),
        date_updated: Set(new_checkin.date_added),
        expected_time: Set(new_checkin.expected_time),
        timeout_at: Set(new_checkin.timeout_at),
        monitor_config: Set(new_checkin.monitor_config),
        trace_id: Set(new_checkin.trace_id),
        ..Default::default()
    };
    let insert = MonitorCheckIn::insert(model).on_conflict(
        OnConflict::column(monitor_checkin::Column::Guid)
            .do_nothing()
            .to_owned(),
    );
    if insert_ignoring_conflict(insert, db).await? == 0 {
        return Ok(None);
    }
    find_checkin_by_guid(db, guid).await
}

/// Columns the reconciler may change on an existing check-in.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckInUpdate {
    pub status: CheckInStatus,
    pub duration: Option<i32>,
    pub timeout_at: Option<DateTime<Utc>>,
    pub date_updated: DateTime<Utc>,
}

pub async fn update_checkin<C: ConnectionTrait>(
    db: &C,
    existing: monitor_checkin::Model,
    update: CheckInUpdate,
) -> Result<monitor_checkin::Model, DbErr> {
    let mut active = existing.into_active_model();
    active.status = Set(update.status.as_str().to_string());
    active.duration = Set(update.duration);
    active.timeout_at = Set(update.timeout_at);
    active.date_updated = Set(update.date_updated);
    active.update(db).await
}
