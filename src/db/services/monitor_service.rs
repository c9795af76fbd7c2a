//! Data access for monitors.

use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, IntoActiveModel,
    PaginatorTrait, QueryFilter, Set,
};
use serde_json::Value;

use crate::db::entities::{monitor, prelude::*};
use crate::db::enums::{MonitorStatus, MONITOR_TYPE_CRON_JOB};
use crate::db::services::insert_ignoring_conflict;

/// Fields of a monitor about to be created.
#[derive(Debug, Clone)]
pub struct NewMonitor {
    pub organization_id: i32,
    pub project_id: i32,
    pub slug: String,
    pub name: String,
    pub config: Value,
    pub owner_user_id: Option<i32>,
    pub owner_team_id: Option<i32>,
}

pub async fn find_monitor_by_slug<C: ConnectionTrait>(
    db: &C,
    organization_id: i32,
    slug: &str,
) -> Result<Option<monitor::Model>, DbErr> {
    Monitor::find()
        .filter(monitor::Column::OrganizationId.eq(organization_id))
        .filter(monitor::Column::Slug.eq(slug))
        .one(db)
        .await
}

pub async fn count_monitors_for_organization<C: ConnectionTrait>(
    db: &C,
    organization_id: i32,
) -> Result<u64, DbErr> {
    Monitor::find()
        .filter(monitor::Column::OrganizationId.eq(organization_id))
        .count(db)
        .await
}

/// Inserts the monitor unless `(organization_id, slug)` already exists, then
/// returns whichever row won. The boolean is true when this call created it.
pub async fn insert_or_get_monitor<C: ConnectionTrait>(
    db: &C,
    new_monitor: NewMonitor,
) -> Result<(monitor::Model, bool), DbErr> {
    let organization_id = new_monitor.organization_id;
    let slug = new_monitor.slug.clone();

    let model = monitor::ActiveModel {
        organization_id: Set(new_monitor.organization_id),
        project_id: Set(new_monitor.project_id),
        slug: Set(new_monitor.slug),
        name: Set(new_monitor.name),
        monitor_type: Set(MONITOR_TYPE_CRON_JOB.to_string()),
        status: Set(MonitorStatus::Active.as_str().to_string()),
        is_muted: Set(false),
        config: Set(new_monitor.config),
        owner_user_id: Set(new_monitor.owner_user_id),
        owner_team_id: Set(new_monitor.owner_team_id),
        date_added: Set(Utc::now()),
        ..Default::default()
    };
    let insert = Monitor::insert(model).on_conflict(
        OnConflict::columns([monitor::Column::OrganizationId, monitor::Column::Slug])
            .do_nothing()
            .to_owned(),
    );
    let inserted = insert_ignoring_conflict(insert, db).await? > 0;

    let monitor = find_monitor_by_slug(db, organization_id, &slug)
        .await?
        .ok_or_else(|| DbErr::RecordNotFound(format!("monitor '{slug}' after upsert")))?;
    Ok((monitor, inserted))
}

/// Replaces the stored config and, when given, the owner.
pub async fn update_monitor_config<C: ConnectionTrait>(
    db: &C,
    existing: monitor::Model,
    config: Value,
    owner: Option<(Option<i32>, Option<i32>)>,
) -> Result<monitor::Model, DbErr> {
    let mut active = existing.into_active_model();
    active.config = Set(config);
    if let Some((user_id, team_id)) = owner {
        active.owner_user_id = Set(user_id);
        active.owner_team_id = Set(team_id);
    }
    active.update(db).await
}

pub async fn set_monitor_status<C: ConnectionTrait>(
    db: &C,
    existing: monitor::Model,
    status: MonitorStatus,
) -> Result<monitor::Model, DbErr> {
    if existing.status == status.as_str() {
        return Ok(existing);
    }
    let mut active = existing.into_active_model();
    active.status = Set(status.as_str().to_string());
    active.update(db).await
}

#[cfg(test)]
pub async fn set_monitor_muted<C: ConnectionTrait>(
    db: &C,
    existing: monitor::Model,
    is_muted: bool,
) -> Result<monitor::Model, DbErr> {
    let mut active = existing.into_active_model();
    active.is_muted = Set(is_muted);
    active.update(db).await
}
