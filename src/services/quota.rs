//! Billing admission for check-ins.

use async_trait::async_trait;

use crate::db::entities::monitor;

/// Answer to "may this project record a check-in for this slug?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermitCheckInStatus {
    Accept,
    /// Accepted, but the monitor must first be given a billing seat.
    AcceptedForUpsert,
    Drop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeatOutcome {
    Accepted,
    RateLimited,
}

#[async_trait]
pub trait QuotaOracle: Send + Sync {
    async fn check_accept_monitor_checkin(
        &self,
        project_id: i32,
        monitor_slug: &str,
    ) -> PermitCheckInStatus;

    async fn assign_monitor_seat(&self, monitor: &monitor::Model) -> SeatOutcome;
}

/// Backend used when no billing system is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnlimitedQuotas;

#[async_trait]
impl QuotaOracle for UnlimitedQuotas {
    async fn check_accept_monitor_checkin(&self, _project_id: i32, _monitor_slug: &str) -> PermitCheckInStatus {
        PermitCheckInStatus::Accept
    }

    async fn assign_monitor_seat(&self, _monitor: &monitor::Model) -> SeatOutcome {
        SeatOutcome::Accepted
    }
}
