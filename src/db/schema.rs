//! Schema bootstrap derived from the entity definitions.
//!
//! Tables are created in dependency order. The composite unique indexes are
//! what the upsert paths in `db::services` rely on for `ON CONFLICT DO NOTHING`.

use sea_orm::sea_query::{Index, IndexCreateStatement};
use sea_orm::{ConnectionTrait, DbErr, EntityTrait, Schema};
use tracing::debug;

use crate::db::entities::{environment, monitor, monitor_checkin, monitor_environment};

pub async fn create_schema<C: ConnectionTrait>(db: &C) -> Result<(), DbErr> {
    create_table(db, environment::Entity).await?;
    create_table(db, monitor::Entity).await?;
    create_table(db, monitor_environment::Entity).await?;
    create_table(db, monitor_checkin::Entity).await?;

    let indexes = [
        Index::create()
            .name("uniq_monitors_org_slug")
            .table(monitor::Entity)
            .col(monitor::Column::OrganizationId)
            .col(monitor::Column::Slug)
            .unique()
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("uniq_environments_org_name")
            .table(environment::Entity)
            .col(environment::Column::OrganizationId)
            .col(environment::Column::Name)
            .unique()
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("uniq_monitor_environments_monitor_env")
            .table(monitor_environment::Entity)
            .col(monitor_environment::Column::MonitorId)
            .col(monitor_environment::Column::EnvironmentId)
            .unique()
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_monitor_checkins_env_date")
            .table(monitor_checkin::Entity)
            .col(monitor_checkin::Column::MonitorEnvironmentId)
            .col(monitor_checkin::Column::DateAdded)
            .if_not_exists()
            .to_owned(),
    ];
    for index in indexes {
        create_index(db, index).await?;
    }

    debug!("Check-in schema is in place.");
    Ok(())
}

async fn create_table<C, E>(db: &C, entity: E) -> Result<(), DbErr>
where
    C: ConnectionTrait,
    E: EntityTrait,
{
    let backend = db.get_database_backend();
    let statement = Schema::new(backend)
        .create_table_from_entity(entity)
        .if_not_exists()
        .to_owned();
    db.execute(backend.build(&statement)).await?;
    Ok(())
}

async fn create_index<C: ConnectionTrait>(db: &C, index: IndexCreateStatement) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    db.execute(backend.build(&index)).await?;
    Ok(())
}
