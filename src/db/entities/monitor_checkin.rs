use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::db::enums::CheckInStatus;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "monitor_checkins")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub guid: Uuid,
    pub project_id: i32,
    pub monitor_id: i32,
    pub monitor_environment_id: i32,
    pub status: String,
    /// Milliseconds.
    pub duration: Option<i32>,
    pub date_added: ChronoDateTimeUtc,
    pub date_updated: ChronoDateTimeUtc,
    pub expected_time: Option<ChronoDateTimeUtc>,
    pub timeout_at: Option<ChronoDateTimeUtc>,
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub monitor_config: Option<Json>,
    pub trace_id: Option<Uuid>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::monitor::Entity",
        from = "Column::MonitorId",
        to = "super::monitor::Column::Id",
        on_delete = "Cascade"
    )]
    Monitor,

    #[sea_orm(
        belongs_to = "super::monitor_environment::Entity",
        from = "Column::MonitorEnvironmentId",
        to = "super::monitor_environment::Column::Id",
        on_delete = "Cascade"
    )]
    MonitorEnvironment,
}

impl Related<super::monitor::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Monitor.def()
    }
}

impl Related<super::monitor_environment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MonitorEnvironment.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn status(&self) -> Option<CheckInStatus> {
        self.status.parse().ok()
    }
}
