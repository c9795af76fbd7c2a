use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::db::enums::MonitorStatus;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "monitors")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub organization_id: i32,
    pub project_id: i32,
    pub slug: String,
    pub name: String,
    pub monitor_type: String,
    pub status: String,
    pub is_muted: bool,
    #[sea_orm(column_type = "JsonBinary")]
    pub config: Json,
    pub owner_user_id: Option<i32>,
    pub owner_team_id: Option<i32>,
    pub date_added: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::monitor_environment::Entity")]
    MonitorEnvironment,

    #[sea_orm(has_many = "super::monitor_checkin::Entity")]
    MonitorCheckIn,
}

impl Related<super::monitor_environment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MonitorEnvironment.def()
    }
}

impl Related<super::monitor_checkin::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MonitorCheckIn.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Unknown status strings are treated as disabled so a corrupt row never
    /// accepts check-ins.
    pub fn status(&self) -> MonitorStatus {
        self.status.parse().unwrap_or(MonitorStatus::Disabled)
    }

    pub fn is_disabled(&self) -> bool {
        self.status() == MonitorStatus::Disabled
    }
}
