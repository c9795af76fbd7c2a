//! Checks a check-in must pass before anything is written for it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sea_orm::ConnectionTrait;
use tracing::{info, warn};

use crate::db::entities::monitor;
use crate::db::enums::MonitorStatus;
use crate::db::services;
use crate::error::{DenialReason, ProcessingError};
use crate::server::rate_limiter::RateLimiter;
use crate::services::{OrganizationDirectory, PermitCheckInStatus, QuotaOracle, SeatOutcome};

#[derive(Debug, Clone, Copy)]
pub struct AdmissionSettings {
    pub quota_timeout: Duration,
    pub checkin_quota_limit: u32,
    pub checkin_quota_window: Duration,
}

pub struct AdmissionController {
    directory: Arc<dyn OrganizationDirectory>,
    quotas: Arc<dyn QuotaOracle>,
    rate_limiter: Arc<dyn RateLimiter>,
    settings: AdmissionSettings,
}

impl AdmissionController {
    pub fn new(
        directory: Arc<dyn OrganizationDirectory>,
        quotas: Arc<dyn QuotaOracle>,
        rate_limiter: Arc<dyn RateLimiter>,
        settings: AdmissionSettings,
    ) -> Self {
        Self {
            directory,
            quotas,
            rate_limiter,
            settings,
        }
    }

    pub async fn check_killswitch(&self, organization_id: i32) -> Result<(), ProcessingError> {
        if self.directory.is_killswitched(organization_id).await {
            return Err(ProcessingError::QuotaDenied(DenialReason::Killswitch));
        }
        Ok(())
    }

    /// Asks the quota oracle about the check-in and, when the monitor needs a
    /// seat, assigns one. Returns the monitor with its status brought in line
    /// with the seat decision.
    pub async fn check_quota<C: ConnectionTrait>(
        &self,
        db: &C,
        monitor: monitor::Model,
        project_id: i32,
    ) -> Result<monitor::Model, ProcessingError> {
        let permit = tokio::time::timeout(
            self.settings.quota_timeout,
            self.quotas.check_accept_monitor_checkin(project_id, &monitor.slug),
        )
        .await
        .map_err(|_| ProcessingError::QuotaDenied(DenialReason::OracleTimeout))?;

        match permit {
            PermitCheckInStatus::Drop => Err(ProcessingError::QuotaDenied(DenialReason::OracleDrop)),
            PermitCheckInStatus::Accept => Ok(monitor),
            PermitCheckInStatus::AcceptedForUpsert => {
                let seat = tokio::time::timeout(
                    self.settings.quota_timeout,
                    self.quotas.assign_monitor_seat(&monitor),
                )
                .await
                .map_err(|_| ProcessingError::QuotaDenied(DenialReason::SeatTimeout))?;

                match seat {
                    SeatOutcome::Accepted => {
                        if monitor.is_disabled() {
                            info!(monitor_slug = %monitor.slug, "Seat assigned, enabling monitor.");
                        }
                        Ok(services::set_monitor_status(db, monitor, MonitorStatus::Active).await?)
                    }
                    SeatOutcome::RateLimited => {
                        warn!(monitor_slug = %monitor.slug, "No seat available, disabling monitor.");
                        services::set_monitor_status(db, monitor, MonitorStatus::Disabled).await?;
                        Err(ProcessingError::QuotaDenied(DenialReason::SeatUnavailable))
                    }
                }
            }
        }
    }

    pub fn check_enabled(&self, monitor: &monitor::Model) -> Result<(), ProcessingError> {
        if monitor.is_disabled() {
            return Err(ProcessingError::QuotaDenied(DenialReason::MonitorDisabled));
        }
        Ok(())
    }

    /// Counts the check-in against its (monitor, environment, time bucket).
    pub async fn check_rate_limit(
        &self,
        monitor_id: i32,
        environment: &str,
        ts: DateTime<Utc>,
    ) -> Result<(), ProcessingError> {
        let key = rate_limit_key(monitor_id, environment, ts, self.settings.checkin_quota_window);
        let allowed = self
            .rate_limiter
            .try_acquire(
                &key,
                self.settings.checkin_quota_limit,
                self.settings.checkin_quota_window,
            )
            .await;
        if !allowed {
            return Err(ProcessingError::QuotaDenied(DenialReason::RateLimited));
        }
        Ok(())
    }
}

pub fn rate_limit_key(monitor_id: i32, environment: &str, ts: DateTime<Utc>, window: Duration) -> String {
    let window_secs = window.as_secs().max(1) as i64;
    let bucket = ts.timestamp().div_euclid(window_secs);
    format!("{monitor_id}:{environment}:{bucket}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_rate_limit_key_buckets() {
        let window = Duration::from_secs(60);
        let a = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 1).unwrap();
        let b = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 59).unwrap();
        let c = Utc.with_ymd_and_hms(2024, 3, 1, 12, 1, 0).unwrap();
        assert_eq!(rate_limit_key(1, "prod", a, window), rate_limit_key(1, "prod", b, window));
        assert_ne!(rate_limit_key(1, "prod", b, window), rate_limit_key(1, "prod", c, window));
        assert_ne!(rate_limit_key(1, "prod", a, window), rate_limit_key(1, "dev", a, window));
    }
}
