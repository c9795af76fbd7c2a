use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::services::DirectoryConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse TOML from config file at {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("Failed to load config from environment: {0}")]
    Env(#[from] envy::Error),
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub database_url: String,
    pub log_dir: String,
    pub partitions: u16,
    pub max_monitors_per_org: u64,
    pub max_environments_per_monitor: u64,
    pub checkin_quota_limit: u32,
    pub checkin_quota_window_secs: u64,
    pub quota_timeout_ms: u64,
    pub task_trigger_url: Option<String>,
    /// Only read from the config file.
    pub directory: DirectoryConfig,
}

// Partial config for layering
#[derive(Deserialize, Default, Debug, Clone, PartialEq)]
pub struct PartialConsumerConfig {
    database_url: Option<String>,
    log_dir: Option<String>,
    partitions: Option<u16>,
    max_monitors_per_org: Option<u64>,
    max_environments_per_monitor: Option<u64>,
    checkin_quota_limit: Option<u32>,
    checkin_quota_window_secs: Option<u64>,
    quota_timeout_ms: Option<u64>,
    task_trigger_url: Option<String>,
}

#[derive(Deserialize, Default, Debug)]
struct FileConfig {
    #[serde(flatten)]
    base: PartialConsumerConfig,
    #[serde(default)]
    directory: DirectoryConfig,
}

fn default_log_dir() -> String {
    "logs".to_string()
}

pub const DEFAULT_PARTITIONS: u16 = 4;
pub const DEFAULT_MAX_MONITORS_PER_ORG: u64 = 10_000;
pub const DEFAULT_MAX_ENVIRONMENTS_PER_MONITOR: u64 = 1_000;
pub const DEFAULT_CHECKIN_QUOTA_LIMIT: u32 = 5;
pub const DEFAULT_CHECKIN_QUOTA_WINDOW_SECS: u64 = 60;
pub const DEFAULT_QUOTA_TIMEOUT_MS: u64 = 2_000;

impl ConsumerConfig {
    /// File values first, then environment variables on top.
    pub fn load(config_path: Option<&str>) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let file_config = match config_path {
            Some(path) => read_file_config(Path::new(path))?,
            None => FileConfig::default(),
        };
        let env_config: PartialConsumerConfig = envy::from_env::<PartialConsumerConfig>()?;

        Self::merge(file_config.base, env_config, file_config.directory)
    }

    fn merge(
        file: PartialConsumerConfig,
        env: PartialConsumerConfig,
        directory: DirectoryConfig,
    ) -> Result<Self, ConfigError> {
        let partitions = env
            .partitions
            .or(file.partitions)
            .unwrap_or(DEFAULT_PARTITIONS);
        if partitions == 0 {
            return Err(ConfigError::Invalid {
                field: "partitions",
                reason: "must be at least 1".to_string(),
            });
        }
        let checkin_quota_window_secs = env
            .checkin_quota_window_secs
            .or(file.checkin_quota_window_secs)
            .unwrap_or(DEFAULT_CHECKIN_QUOTA_WINDOW_SECS);
        if checkin_quota_window_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "checkin_quota_window_secs",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(ConsumerConfig {
            database_url: env
                .database_url
                .or(file.database_url)
                .ok_or(ConfigError::Missing("DATABASE_URL"))?,
            log_dir: env.log_dir.or(file.log_dir).unwrap_or_else(default_log_dir),
            partitions,
            max_monitors_per_org: env
                .max_monitors_per_org
                .or(file.max_monitors_per_org)
                .unwrap_or(DEFAULT_MAX_MONITORS_PER_ORG),
            max_environments_per_monitor: env
                .max_environments_per_monitor
                .or(file.max_environments_per_monitor)
                .unwrap_or(DEFAULT_MAX_ENVIRONMENTS_PER_MONITOR),
            checkin_quota_limit: env
                .checkin_quota_limit
                .or(file.checkin_quota_limit)
                .unwrap_or(DEFAULT_CHECKIN_QUOTA_LIMIT),
            checkin_quota_window_secs,
            quota_timeout_ms: env
                .quota_timeout_ms
                .or(file.quota_timeout_ms)
                .unwrap_or(DEFAULT_QUOTA_TIMEOUT_MS),
            task_trigger_url: env.task_trigger_url.or(file.task_trigger_url),
            directory,
        })
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    if !path.exists() {
        return Ok(FileConfig::default());
    }
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_file_config_with_directory() {
        let file = write_config(
            r#"
            database_url = "sqlite::memory:"
            partitions = 2
            task_trigger_url = "http://localhost:9000/tick"

            [directory]
            killswitched_organizations = [3]

            [[directory.projects]]
            id = 1
            organization_id = 2
            "#,
        );
        let parsed = read_file_config(file.path()).unwrap();
        let config =
            ConsumerConfig::merge(parsed.base, PartialConsumerConfig::default(), parsed.directory)
                .unwrap();

        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.partitions, 2);
        assert_eq!(config.log_dir, "logs");
        assert_eq!(config.checkin_quota_limit, DEFAULT_CHECKIN_QUOTA_LIMIT);
        assert_eq!(config.checkin_quota_window_secs, 60);
        assert_eq!(config.quota_timeout_ms, 2_000);
        assert_eq!(config.task_trigger_url.as_deref(), Some("http://localhost:9000/tick"));
        assert_eq!(config.directory.projects.len(), 1);
        assert_eq!(config.directory.killswitched_organizations, vec![3]);
    }

    #[test]
    fn test_env_overrides_file() {
        let file = PartialConsumerConfig {
            database_url: Some("postgres://file".into()),
            partitions: Some(8),
            ..Default::default()
        };
        let env = PartialConsumerConfig {
            database_url: Some("postgres://env".into()),
            ..Default::default()
        };
        let config = ConsumerConfig::merge(file, env, DirectoryConfig::default()).unwrap();
        assert_eq!(config.database_url, "postgres://env");
        assert_eq!(config.partitions, 8);
    }

    #[test]
    fn test_missing_database_url_and_zero_partitions() {
        assert!(matches!(
            ConsumerConfig::merge(
                PartialConsumerConfig::default(),
                PartialConsumerConfig::default(),
                DirectoryConfig::default()
            ),
            Err(ConfigError::Missing("DATABASE_URL"))
        ));
        let zero = PartialConsumerConfig {
            database_url: Some("sqlite::memory:".into()),
            partitions: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            ConsumerConfig::merge(zero, PartialConsumerConfig::default(), DirectoryConfig::default()),
            Err(ConfigError::Invalid { field: "partitions", .. })
        ));
    }

    #[test]
    fn test_missing_file_and_bad_toml() {
        let parsed = read_file_config(Path::new("/nonexistent/consumer.toml")).unwrap();
        assert_eq!(parsed.base, PartialConsumerConfig::default());

        let file = write_config("partitions = \"many\"");
        assert!(matches!(
            read_file_config(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }
}
