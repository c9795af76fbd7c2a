use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "environments")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub organization_id: i32,
    pub name: String,
    pub date_added: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::monitor_environment::Entity")]
    MonitorEnvironment,
}

impl Related<super::monitor_environment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MonitorEnvironment.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
