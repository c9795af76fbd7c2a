//! Database access for the check-in consumer.
//!
//! Every function is generic over `ConnectionTrait` so the same code runs on a
//! pooled connection or inside the transaction the processor opens per
//! check-in. Creation paths use `ON CONFLICT DO NOTHING` against the unique
//! indexes from `db::schema` and re-read the winning row.

pub mod checkin_service;
pub mod environment_service;
pub mod monitor_service;

pub use checkin_service::*;
pub use environment_service::*;
pub use monitor_service::*;

use sea_orm::{ActiveModelTrait, ConnectionTrait, DbErr, EntityTrait, Insert, IntoActiveModel};

/// Executes an insert carrying an `ON CONFLICT DO NOTHING` clause and returns
/// the number of inserted rows.
pub(crate) async fn insert_ignoring_conflict<A, C>(insert: Insert<A>, db: &C) -> Result<u64, DbErr>
where
    A: ActiveModelTrait,
    <<A as ActiveModelTrait>::Entity as EntityTrait>::Model: IntoActiveModel<A>,
    C: ConnectionTrait,
{
    match insert.exec_without_returning(db).await {
        Ok(rows) => Ok(rows),
        Err(DbErr::RecordNotInserted) => Ok(0),
        Err(e) => Err(e),
    }
}
