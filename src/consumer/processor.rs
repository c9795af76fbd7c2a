//! Per-message pipeline: decode, resolve, admit, reconcile, then trigger.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sea_orm::{DatabaseConnection, TransactionTrait};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::consumer::admission::{AdmissionController, AdmissionSettings};
use crate::consumer::decoder::{self, CheckInMessage, ProcessingMessage};
use crate::consumer::environment_state;
use crate::consumer::reconciler::{self, Reconciliation};
use crate::consumer::resolver::{self, MonitorRequest};
use crate::db::services;
use crate::error::{DenialReason, ProcessingError};
use crate::monitors::EffectiveConfig;
use crate::server::config::ConsumerConfig;
use crate::server::locks::KeyedLocks;
use crate::server::rate_limiter::RateLimiter;
use crate::server::worker_pool::{ConsumedMessage, MessageHandler};
use crate::services::{OrganizationDirectory, QuotaOracle, TaskTrigger};

#[derive(Debug, Clone, Copy)]
pub struct ProcessorSettings {
    pub max_monitors_per_org: u64,
    pub max_environments_per_monitor: u64,
    pub admission: AdmissionSettings,
}

impl ProcessorSettings {
    pub fn from_config(config: &ConsumerConfig) -> Self {
        ProcessorSettings {
            max_monitors_per_org: config.max_monitors_per_org,
            max_environments_per_monitor: config.max_environments_per_monitor,
            admission: AdmissionSettings {
                quota_timeout: Duration::from_millis(config.quota_timeout_ms),
                checkin_quota_limit: config.checkin_quota_limit,
                checkin_quota_window: Duration::from_secs(config.checkin_quota_window_secs),
            },
        }
    }
}

/// What happened to one message.
#[derive(Debug)]
pub enum MessageOutcome {
    /// A check-in row was created or moved to a new state.
    Recorded(Uuid),
    /// The check-in was valid but changed nothing that the environment tracks.
    Unchanged,
    ClockPulse,
    Dropped(ProcessingError),
}

pub struct CheckInProcessor {
    db: DatabaseConnection,
    directory: Arc<dyn OrganizationDirectory>,
    admission: AdmissionController,
    locks: KeyedLocks,
    trigger: Arc<dyn TaskTrigger>,
    settings: ProcessorSettings,
}

impl CheckInProcessor {
    pub fn new(
        db: DatabaseConnection,
        directory: Arc<dyn OrganizationDirectory>,
        quotas: Arc<dyn QuotaOracle>,
        rate_limiter: Arc<dyn RateLimiter>,
        trigger: Arc<dyn TaskTrigger>,
        settings: ProcessorSettings,
    ) -> Self {
        let admission = AdmissionController::new(
            Arc::clone(&directory),
            quotas,
            rate_limiter,
            settings.admission,
        );
        Self {
            db,
            directory,
            admission,
            locks: KeyedLocks::new(),
            trigger,
            settings,
        }
    }

    /// Handles one message. Never fails: every problem is logged and turned
    /// into [`MessageOutcome::Dropped`].
    pub async fn process(&self, message: &ConsumedMessage) -> MessageOutcome {
        let decoded = match decoder::decode(&message.payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                let e = ProcessingError::from(e);
                warn!(
                    kind = e.kind(),
                    partition = message.partition,
                    offset = message.offset,
                    reason = %e,
                    "Dropping undecodable message."
                );
                return MessageOutcome::Dropped(e);
            }
        };

        let outcome = match decoded {
            ProcessingMessage::ClockPulse => MessageOutcome::ClockPulse,
            ProcessingMessage::CheckIn(checkin) => match self.process_checkin(&checkin).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    log_drop(&checkin, &e);
                    MessageOutcome::Dropped(e)
                }
            },
        };

        if let Err(e) = self.trigger.trigger(message.timestamp, message.partition).await {
            error!(error = %e, partition = message.partition, "Failed to trigger monitor tasks");
        }
        outcome
    }

    async fn process_checkin(&self, checkin: &CheckInMessage) -> Result<MessageOutcome, ProcessingError> {
        let organization_id = self
            .directory
            .organization_for_project(checkin.project_id)
            .await
            .ok_or(ProcessingError::QuotaDenied(DenialReason::UnknownProject))?;

        self.admission.check_killswitch(organization_id).await?;

        let monitor = resolver::resolve_monitor(
            &self.db,
            self.directory.as_ref(),
            self.settings.max_monitors_per_org,
            MonitorRequest {
                organization_id,
                project_id: checkin.project_id,
                raw_slug: &checkin.monitor_slug,
                monitor_config: checkin.monitor_config.as_ref(),
                now: checkin.start_time,
            },
        )
        .await?;

        let monitor = self
            .admission
            .check_quota(&self.db, monitor, checkin.project_id)
            .await?;
        self.admission.check_enabled(&monitor)?;
        self.admission
            .check_rate_limit(monitor.id, &checkin.environment, checkin.start_time)
            .await?;

        let monitor_environment = resolver::resolve_monitor_environment(
            &self.db,
            &monitor,
            &checkin.environment,
            self.settings.max_environments_per_monitor,
        )
        .await?;

        let _guard = self
            .locks
            .lock(&format!("{}:{}", monitor.id, monitor_environment.id))
            .await;
        let txn = self.db.begin().await?;

        // Re-read under the lock; another message may have moved the deadlines.
        let monitor_environment = services::find_monitor_environment_by_id(&txn, monitor_environment.id)
            .await?
            .ok_or_else(|| {
                ProcessingError::ConflictIdentity(format!(
                    "monitor environment {} disappeared",
                    monitor_environment.id
                ))
            })?;

        let existing = reconciler::find_target(&txn, checkin, monitor_environment.id).await?;
        let reconciliation =
            reconciler::reconcile(existing.as_ref(), checkin, monitor.id, monitor_environment.id)?;
        debug!(monitor_slug = %monitor.slug, ?reconciliation, "Reconciled check-in.");

        if reconciliation == Reconciliation::Unchanged {
            txn.commit().await?;
            return Ok(MessageOutcome::Unchanged);
        }

        let config = EffectiveConfig::from_stored(&monitor.config);
        let touches_environment = reconciliation.updates_environment();
        let written = reconciler::apply(
            &txn,
            reconciliation,
            existing,
            checkin,
            &monitor,
            &monitor_environment,
            &config,
        )
        .await?;

        let outcome = match written {
            Some(row) if touches_environment => {
                environment_state::update_environment(&txn, monitor_environment, &config, &row).await?;
                MessageOutcome::Recorded(row.guid)
            }
            _ => MessageOutcome::Unchanged,
        };
        txn.commit().await?;
        Ok(outcome)
    }
}

fn log_drop(checkin: &CheckInMessage, e: &ProcessingError) {
    match e {
        ProcessingError::Database(_) => error!(
            kind = e.kind(),
            monitor_slug = %checkin.monitor_slug,
            project_id = checkin.project_id,
            environment = %checkin.environment,
            reason = %e,
            "Dropping check-in after database error."
        ),
        ProcessingError::QuotaDenied(
            DenialReason::RateLimited | DenialReason::OracleTimeout | DenialReason::SeatTimeout,
        ) => warn!(
            kind = e.kind(),
            monitor_slug = %checkin.monitor_slug,
            project_id = checkin.project_id,
            environment = %checkin.environment,
            reason = %e,
            "Dropping check-in."
        ),
        _ => info!(
            kind = e.kind(),
            monitor_slug = %checkin.monitor_slug,
            project_id = checkin.project_id,
            environment = %checkin.environment,
            reason = %e,
            "Dropping check-in."
        ),
    }
}

#[async_trait]
impl MessageHandler for CheckInProcessor {
    async fn handle(&self, message: &ConsumedMessage) {
        let outcome = self.process(message).await;
        debug!(partition = message.partition, offset = message.offset, ?outcome, "Message handled.");
    }
}
