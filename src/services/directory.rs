//! Organization lookups the consumer needs but does not own.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde::Deserialize;

/// Project, membership and kill-switch lookups.
#[async_trait]
pub trait OrganizationDirectory: Send + Sync {
    /// Organization owning the project, or `None` for an unknown project.
    async fn organization_for_project(&self, project_id: i32) -> Option<i32>;

    async fn is_member(&self, organization_id: i32, user_id: i32) -> bool;

    async fn has_team(&self, organization_id: i32, team_id: i32) -> bool;

    /// True when check-in ingestion is switched off for the organization.
    async fn is_killswitched(&self, organization_id: i32) -> bool;
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct DirectoryConfig {
    #[serde(default)]
    pub projects: Vec<ProjectEntry>,
    #[serde(default)]
    pub members: Vec<MemberEntry>,
    #[serde(default)]
    pub teams: Vec<TeamEntry>,
    #[serde(default)]
    pub killswitched_organizations: Vec<i32>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ProjectEntry {
    pub id: i32,
    pub organization_id: i32,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct MemberEntry {
    pub organization_id: i32,
    pub user_id: i32,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct TeamEntry {
    pub organization_id: i32,
    pub team_id: i32,
}

/// In-memory directory, loaded from the `[directory]` config table.
#[derive(Debug, Default, Clone)]
pub struct StaticDirectory {
    projects: HashMap<i32, i32>,
    members: HashSet<(i32, i32)>,
    teams: HashSet<(i32, i32)>,
    killswitched: HashSet<i32>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &DirectoryConfig) -> Self {
        StaticDirectory {
            projects: config
                .projects
                .iter()
                .map(|p| (p.id, p.organization_id))
                .collect(),
            members: config
                .members
                .iter()
                .map(|m| (m.organization_id, m.user_id))
                .collect(),
            teams: config
                .teams
                .iter()
                .map(|t| (t.organization_id, t.team_id))
                .collect(),
            killswitched: config.killswitched_organizations.iter().copied().collect(),
        }
    }

    pub fn with_project(mut self, project_id: i32, organization_id: i32) -> Self {
        self.projects.insert(project_id, organization_id);
        self
    }

    pub fn with_member(mut self, organization_id: i32, user_id: i32) -> Self {
        self.members.insert((organization_id, user_id));
        self
    }

    pub fn with_team(mut self, organization_id: i32, team_id: i32) -> Self {
        self.teams.insert((organization_id, team_id));
        self
    }

    pub fn with_killswitch(mut self, organization_id: i32) -> Self {
        self.killswitched.insert(organization_id);
        self
    }
}

#[async_trait]
impl OrganizationDirectory for StaticDirectory {
    async fn organization_for_project(&self, project_id: i32) -> Option<i32> {
        self.projects.get(&project_id).copied()
    }

    async fn is_member(&self, organization_id: i32, user_id: i32) -> bool {
        self.members.contains(&(organization_id, user_id))
    }

    async fn has_team(&self, organization_id: i32, team_id: i32) -> bool {
        self.teams.contains(&(organization_id, team_id))
    }

    async fn is_killswitched(&self, organization_id: i32) -> bool {
        self.killswitched.contains(&organization_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_directory_from_config() {
        let config: DirectoryConfig = toml::from_str(
            r#"
            killswitched_organizations = [9]

            [[projects]]
            id = 10
            organization_id = 1

            [[members]]
            organization_id = 1
            user_id = 100

            [[teams]]
            organization_id = 1
            team_id = 200
            "#,
        )
        .unwrap();
        let directory = StaticDirectory::from_config(&config);

        assert_eq!(directory.organization_for_project(10).await, Some(1));
        assert_eq!(directory.organization_for_project(11).await, None);
        assert!(directory.is_member(1, 100).await);
        assert!(!directory.is_member(2, 100).await);
        assert!(directory.has_team(1, 200).await);
        assert!(!directory.has_team(1, 201).await);
        assert!(directory.is_killswitched(9).await);
        assert!(!directory.is_killswitched(1).await);
    }
}
