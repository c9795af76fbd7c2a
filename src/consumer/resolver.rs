//! Locates or creates the monitor and monitor environment a check-in targets.

use chrono::{DateTime, Utc};
use sea_orm::ConnectionTrait;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::db::entities::{monitor, monitor_environment};
use crate::db::services::{self, NewMonitor};
use crate::error::{DenialReason, ProcessingError, ValidationError};
use crate::monitors::{normalize_slug, ConfigPatch, OwnerHint};
use crate::services::OrganizationDirectory;

pub const MAX_ENVIRONMENT_NAME_LENGTH: usize = 64;

/// Monitor-side inputs of a check-in, already scoped to an organization.
#[derive(Debug, Clone, Copy)]
pub struct MonitorRequest<'a> {
    pub organization_id: i32,
    pub project_id: i32,
    pub raw_slug: &'a str,
    pub monitor_config: Option<&'a Value>,
    pub now: DateTime<Utc>,
}

/// Resolves the owner hint against the organization. Unresolvable owners
/// yield `None`.
async fn resolve_owner(
    directory: &dyn OrganizationDirectory,
    organization_id: i32,
    hint: OwnerHint,
) -> Option<(Option<i32>, Option<i32>)> {
    let resolved = match hint {
        OwnerHint::User(user_id) => directory
            .is_member(organization_id, user_id)
            .await
            .then_some((Some(user_id), None)),
        OwnerHint::Team(team_id) => directory
            .has_team(organization_id, team_id)
            .await
            .then_some((None, Some(team_id))),
    };
    if resolved.is_none() {
        debug!(organization_id, ?hint, "Ignoring monitor owner outside the organization.");
    }
    resolved
}

/// Finds the monitor by normalized slug, creating it or merging the incoming
/// config into it.
pub async fn resolve_monitor<C: ConnectionTrait>(
    db: &C,
    directory: &dyn OrganizationDirectory,
    max_monitors_per_org: u64,
    request: MonitorRequest<'_>,
) -> Result<monitor::Model, ProcessingError> {
    let slug = normalize_slug(request.raw_slug)
        .ok_or_else(|| ValidationError::InvalidSlug(request.raw_slug.to_string()))?;

    let existing = services::find_monitor_by_slug(db, request.organization_id, &slug).await?;

    let Some(raw_config) = request.monitor_config else {
        return existing.ok_or_else(|| ValidationError::MonitorNotFound(slug).into());
    };

    let patch = ConfigPatch::from_payload(raw_config, request.now)
        .map_err(ValidationError::InvalidConfig)?;
    let owner = match patch.owner() {
        Some(hint) => resolve_owner(directory, request.organization_id, hint).await,
        None => None,
    };

    match existing {
        Some(existing) => {
            let merged = patch.merge_into(&existing.config);
            if merged == existing.config && owner.is_none() {
                return Ok(existing);
            }
            Ok(services::update_monitor_config(db, existing, merged, owner).await?)
        }
        None => {
            let count = services::count_monitors_for_organization(db, request.organization_id).await?;
            if count >= max_monitors_per_org {
                return Err(ProcessingError::QuotaDenied(DenialReason::MonitorLimit));
            }
            let (owner_user_id, owner_team_id) = owner.unwrap_or((None, None));
            let (created, inserted) = services::insert_or_get_monitor(
                db,
                NewMonitor {
                    organization_id: request.organization_id,
                    project_id: request.project_id,
                    slug: slug.clone(),
                    name: request.raw_slug.to_string(),
                    config: patch.merge_into(&Value::Object(Map::new())),
                    owner_user_id,
                    owner_team_id,
                },
            )
            .await?;
            if inserted {
                info!(monitor_slug = %slug, organization_id = request.organization_id, "Created monitor from check-in.");
                Ok(created)
            } else {
                // Lost a creation race; apply the config like any update.
                let merged = patch.merge_into(&created.config);
                Ok(services::update_monitor_config(db, created, merged, owner).await?)
            }
        }
    }
}

pub fn validate_environment_name(name: &str) -> Result<(), ValidationError> {
    if name.chars().count() > MAX_ENVIRONMENT_NAME_LENGTH {
        return Err(ValidationError::EnvironmentName(name.to_string()));
    }
    Ok(())
}

/// Finds or creates the monitor environment for `environment_name`.
pub async fn resolve_monitor_environment<C: ConnectionTrait>(
    db: &C,
    monitor: &monitor::Model,
    environment_name: &str,
    max_environments_per_monitor: u64,
) -> Result<monitor_environment::Model, ProcessingError> {
    validate_environment_name(environment_name)?;

    let environment =
        services::get_or_create_environment(db, monitor.organization_id, environment_name).await?;
    if let Some(existing) = services::find_monitor_environment(db, monitor.id, environment.id).await? {
        return Ok(existing);
    }

    let count = services::count_monitor_environments(db, monitor.id).await?;
    if count >= max_environments_per_monitor {
        return Err(ProcessingError::QuotaDenied(DenialReason::EnvironmentLimit));
    }
    Ok(services::insert_or_get_monitor_environment(db, monitor.id, environment.id).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_name_length() {
        assert!(validate_environment_name(&"x".repeat(64)).is_ok());
        assert_eq!(
            validate_environment_name(&"x".repeat(65)),
            Err(ValidationError::EnvironmentName("x".repeat(65)))
        );
    }
}
