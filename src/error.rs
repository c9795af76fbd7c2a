use std::fmt;

use thiserror::Error;

use crate::consumer::decoder::DecodeError;
use crate::monitors::MonitorConfigError;

/// Why a single message was not (fully) applied. Every variant is scoped to
/// one message; none of them stop the consumer.
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("Malformed message: {0}")]
    MalformedMessage(#[from] DecodeError),
    #[error("Validation rejected: {0}")]
    ValidationRejected(#[from] ValidationError),
    #[error("Quota denied: {0}")]
    QuotaDenied(DenialReason),
    #[error("Identity conflict: {0}")]
    ConflictIdentity(String),
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

impl ProcessingError {
    /// Stable label used as the `kind` field on drop events.
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessingError::MalformedMessage(_) => "malformed_message",
            ProcessingError::ValidationRejected(_) => "validation_rejected",
            ProcessingError::QuotaDenied(_) => "quota_denied",
            ProcessingError::ConflictIdentity(_) => "conflict_identity",
            ProcessingError::Database(_) => "database",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("monitor slug '{0}' is empty after normalization")]
    InvalidSlug(String),
    #[error("monitor '{0}' does not exist and no monitor_config was sent")]
    MonitorNotFound(String),
    #[error("invalid monitor_config: {0}")]
    InvalidConfig(#[from] MonitorConfigError),
    #[error("environment name '{0}' is invalid")]
    EnvironmentName(String),
    #[error("duration {0}ms is outside the accepted range")]
    InvalidDuration(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    UnknownProject,
    Killswitch,
    OracleDrop,
    OracleTimeout,
    SeatUnavailable,
    SeatTimeout,
    MonitorDisabled,
    RateLimited,
    MonitorLimit,
    EnvironmentLimit,
}

impl DenialReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenialReason::UnknownProject => "unknown_project",
            DenialReason::Killswitch => "killswitch",
            DenialReason::OracleDrop => "oracle_drop",
            DenialReason::OracleTimeout => "oracle_timeout",
            DenialReason::SeatUnavailable => "seat_unavailable",
            DenialReason::SeatTimeout => "seat_timeout",
            DenialReason::MonitorDisabled => "monitor_disabled",
            DenialReason::RateLimited => "rate_limited",
            DenialReason::MonitorLimit => "monitor_limit",
            DenialReason::EnvironmentLimit => "environment_limit",
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
