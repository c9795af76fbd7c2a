use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Status of a single check-in row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckInStatus {
    Ok,
    Error,
    InProgress,
    Timeout,
}

impl CheckInStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckInStatus::Ok => "ok",
            CheckInStatus::Error => "error",
            CheckInStatus::InProgress => "in_progress",
            CheckInStatus::Timeout => "timeout",
        }
    }

    /// OK and ERROR are final for this consumer. TIMEOUT is assigned by the
    /// external sweep and is handled separately by the reconciler.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CheckInStatus::Ok | CheckInStatus::Error)
    }
}

impl FromStr for CheckInStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" => Ok(CheckInStatus::Ok),
            "error" => Ok(CheckInStatus::Error),
            "in_progress" => Ok(CheckInStatus::InProgress),
            "timeout" => Ok(CheckInStatus::Timeout),
            _ => Err(()),
        }
    }
}

impl fmt::Display for CheckInStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Liveness status recorded on a monitor environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorEnvStatus {
    /// Created, no check-in reconciled yet.
    Active,
    Ok,
    Error,
    InProgress,
    Timeout,
}

impl MonitorEnvStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorEnvStatus::Active => "active",
            MonitorEnvStatus::Ok => "ok",
            MonitorEnvStatus::Error => "error",
            MonitorEnvStatus::InProgress => "in_progress",
            MonitorEnvStatus::Timeout => "timeout",
        }
    }
}

impl From<CheckInStatus> for MonitorEnvStatus {
    fn from(status: CheckInStatus) -> Self {
        match status {
            CheckInStatus::Ok => MonitorEnvStatus::Ok,
            CheckInStatus::Error => MonitorEnvStatus::Error,
            CheckInStatus::InProgress => MonitorEnvStatus::InProgress,
            CheckInStatus::Timeout => MonitorEnvStatus::Timeout,
        }
    }
}

impl FromStr for MonitorEnvStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(MonitorEnvStatus::Active),
            "ok" => Ok(MonitorEnvStatus::Ok),
            "error" => Ok(MonitorEnvStatus::Error),
            "in_progress" => Ok(MonitorEnvStatus::InProgress),
            "timeout" => Ok(MonitorEnvStatus::Timeout),
            _ => Err(()),
        }
    }
}

impl fmt::Display for MonitorEnvStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a monitor accepts check-ins at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorStatus {
    Active,
    Disabled,
}

impl MonitorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorStatus::Active => "active",
            MonitorStatus::Disabled => "disabled",
        }
    }
}

impl FromStr for MonitorStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(MonitorStatus::Active),
            "disabled" => Ok(MonitorStatus::Disabled),
            _ => Err(()),
        }
    }
}

impl fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const MONITOR_TYPE_CRON_JOB: &str = "cron_job";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkin_status_terminal() {
        assert!(CheckInStatus::Ok.is_terminal());
        assert!(CheckInStatus::Error.is_terminal());
        assert!(!CheckInStatus::InProgress.is_terminal());
        assert!(!CheckInStatus::Timeout.is_terminal());
    }

    #[test]
    fn test_status_strings_parse_back() {
        for status in [
            CheckInStatus::Ok,
            CheckInStatus::Error,
            CheckInStatus::InProgress,
            CheckInStatus::Timeout,
        ] {
            assert_eq!(status.as_str().parse::<CheckInStatus>(), Ok(status));
        }
        assert_eq!("disabled".parse::<MonitorStatus>(), Ok(MonitorStatus::Disabled));
        assert!("DISABLED".parse::<MonitorStatus>().is_err());
    }
}
