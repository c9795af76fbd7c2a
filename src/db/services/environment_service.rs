//! Data access for environments and monitor environments.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, IntoActiveModel,
    PaginatorTrait, QueryFilter, Set,
};

use crate::db::entities::{environment, monitor_environment, prelude::*};
use crate::db::enums::MonitorEnvStatus;
use crate::db::services::insert_ignoring_conflict;

pub async fn find_environment<C: ConnectionTrait>(
    db: &C,
    organization_id: i32,
    name: &str,
) -> Result<Option<environment::Model>, DbErr> {
    Environment::find()
        .filter(environment::Column::OrganizationId.eq(organization_id))
        .filter(environment::Column::Name.eq(name))
        .one(db)
        .await
}

/// Returns the organization's environment called `name`, creating it if needed.
pub async fn get_or_create_environment<C: ConnectionTrait>(
    db: &C,
    organization_id: i32,
    name: &str,
) -> Result<environment::Model, DbErr> {
    if let Some(existing) = find_environment(db, organization_id, name).await? {
        return Ok(existing);
    }

    let model = environment::ActiveModel {
        organization_id: Set(organization_id),
        name: Set(name.to_string()),
        date_added: Set(Utc::now()),
        ..Default::default()
    };
    let insert = Environment::insert(model).on_conflict(
        OnConflict::columns([environment::Column::OrganizationId, environment::Column::Name])
            .do_nothing()
            .to_owned(),
    );
    insert_ignoring_conflict(insert, db).await?;

    find_environment(db, organization_id, name)
        .await?
        .ok_or_else(|| DbErr::RecordNotFound(format!("environment '{name}' after upsert")))
}

pub async fn find_monitor_environment<C: ConnectionTrait>(
    db: &C,
    monitor_id: i32,
    environment_id: i32,
) -> Result<Option<monitor_environment::Model>, DbErr> {
    MonitorEnvironment::find()
        .filter(monitor_environment::Column::MonitorId.eq(monitor_id))
        .filter(monitor_environment::Column::EnvironmentId.eq(environment_id))
        .one(db)
        .await
}

pub async fn find_monitor_environment_by_id<C: ConnectionTrait>(
    db: &C,
    id: i32,
) -> Result<Option<monitor_environment::Model>, DbErr> {
    MonitorEnvironment::find_by_id(id).one(db).await
}

pub async fn count_monitor_environments<C: ConnectionTrait>(
    db: &C,
    monitor_id: i32,
) -> Result<u64, DbErr> {
    MonitorEnvironment::find()
        .filter(monitor_environment::Column::MonitorId.eq(monitor_id))
        .count(db)
        .await
}

/// Inserts the `(monitor, environment)` pair in the initial ACTIVE state
/// unless it exists, then returns the stored row.
pub async fn insert_or_get_monitor_environment<C: ConnectionTrait>(
    db: &C,
    monitor_id: i32,
    environment_id: i32,
) -> Result<monitor_environment::Model, DbErr> {
    let model = monitor_environment::ActiveModel {
        monitor_id: Set(monitor_id),
        environment_id: Set(environment_id),
        status: Set(MonitorEnvStatus::Active.as_str().to_string()),
        last_checkin: Set(None),
        next_checkin: Set(None),
        next_checkin_latest: Set(None),
        date_added: Set(Utc::now()),
        ..Default::default()
    };
    let insert = MonitorEnvironment::insert(model).on_conflict(
        OnConflict::columns([
            monitor_environment::Column::MonitorId,
            monitor_environment::Column::EnvironmentId,
        ])
        .do_nothing()
        .to_owned(),
    );
    insert_ignoring_conflict(insert, db).await?;

    find_monitor_environment(db, monitor_id, environment_id)
        .await?
        .ok_or_else(|| {
            DbErr::RecordNotFound(format!(
                "monitor environment ({monitor_id}, {environment_id}) after upsert"
            ))
        })
}

/// New liveness state for a monitor environment.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentState {
    pub status: MonitorEnvStatus,
    pub last_checkin: DateTime<Utc>,
    pub next_checkin: Option<DateTime<Utc>>,
    pub next_checkin_latest: Option<DateTime<Utc>>,
}

pub async fn update_monitor_environment_state<C: ConnectionTrait>(
    db: &C,
    existing: monitor_environment::Model,
    state: EnvironmentState,
) -> Result<monitor_environment::Model, DbErr> {
    let mut active = existing.into_active_model();
    active.status = Set(state.status.as_str().to_string());
    active.last_checkin = Set(Some(state.last_checkin));
    active.next_checkin = Set(state.next_checkin);
    active.next_checkin_latest = Set(state.next_checkin_latest);
    active.update(db).await
}
