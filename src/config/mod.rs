//! Orchestrator configuration
//!
//! Read from a TOML file, then overridden by `ADMINFLOW_*` environment
//! variables. Durations use humantime syntax (`30s`, `500ms`, `24h`).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::{AdminflowError, ErrorCode, Result};

/// Defaults the planner fills in when a request leaves them out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerDefaults {
    /// Content unused for this many days is a cleanup candidate
    pub age_threshold_days: u32,
    pub archive_project: String,
    /// Recipient of migrated content when the request names none
    pub default_target_user: String,
}

impl Default for PlannerDefaults {
    fn default() -> Self {
        Self {
            age_threshold_days: 90,
            archive_project: "Archive".to_string(),
            default_target_user: "team_lead".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub max_parallelism: usize,
    #[serde(with = "humantime_serde")]
    pub step_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub retry_backoff: Duration,
    pub transient_retries: u32,
    #[serde(with = "humantime_serde")]
    pub confirmation_timeout: Duration,
    pub use_language_model: bool,
    pub planner: PlannerDefaults,
    pub store_dir: Option<PathBuf>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_parallelism: 4,
            step_timeout: Duration::from_secs(30),
            retry_backoff: Duration::from_millis(500),
            transient_retries: 1,
            confirmation_timeout: Duration::from_secs(24 * 60 * 60),
            use_language_model: false,
            planner: PlannerDefaults::default(),
            store_dir: None,
        }
    }
}

impl OrchestratorConfig {
    /// Load from `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            AdminflowError::config_with_code(
                ErrorCode::CONFIG_NOT_FOUND,
                format!("Cannot read {}", path.display()),
            )
            .with_source(e)
        })?;
        let config = Self::from_toml(&content)?;
        debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn merge_env_vars(&mut self) -> Result<()> {
        self.merge_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, which maps variable names to values
    pub fn merge_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("ADMINFLOW_MAX_PARALLELISM") {
            self.max_parallelism = value.trim().parse().map_err(|_| {
                invalid_value("ADMINFLOW_MAX_PARALLELISM", &value, "a positive integer")
            })?;
        }
        if let Some(value) = lookup("ADMINFLOW_STEP_TIMEOUT") {
            self.step_timeout = parse_duration("ADMINFLOW_STEP_TIMEOUT", &value)?;
        }
        if let Some(value) = lookup("ADMINFLOW_RETRY_BACKOFF") {
            self.retry_backoff = parse_duration("ADMINFLOW_RETRY_BACKOFF", &value)?;
        }
        if let Some(value) = lookup("ADMINFLOW_CONFIRMATION_TIMEOUT") {
            self.confirmation_timeout = parse_duration("ADMINFLOW_CONFIRMATION_TIMEOUT", &value)?;
        }
        if let Some(value) = lookup("ADMINFLOW_STORE_DIR") {
            self.store_dir = Some(PathBuf::from(value));
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_parallelism == 0 {
            return Err(AdminflowError::config_with_code(
                ErrorCode::CONFIG_INVALID_VALUE,
                "max_parallelism must be at least 1",
            ));
        }
        if self.step_timeout.is_zero() {
            return Err(AdminflowError::config_with_code(
                ErrorCode::CONFIG_INVALID_VALUE,
                "step_timeout must be greater than zero",
            ));
        }
        Ok(())
    }
}

fn parse_duration(key: &str, value: &str) -> Result<Duration> {
    humantime_serde::re::humantime::parse_duration(value.trim())
        .map_err(|_| invalid_value(key, value, "a duration such as 30s or 500ms"))
}

fn invalid_value(key: &str, value: &str, expected: &str) -> AdminflowError {
    AdminflowError::config_with_code(
        ErrorCode::CONFIG_INVALID_VALUE,
        format!("{key}='{value}' is not {expected}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_parallelism, 4);
        assert_eq!(config.step_timeout, Duration::from_secs(30));
        assert_eq!(config.transient_retries, 1);
        assert_eq!(config.planner.age_threshold_days, 90);
        assert!(!config.use_language_model);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = OrchestratorConfig::from_toml(
            r#"
            max_parallelism = 2
            step_timeout = "5s"
            retry_backoff = "50ms"

            [planner]
            archive_project = "Cold Storage"
            "#,
        )
        .unwrap();

        assert_eq!(config.max_parallelism, 2);
        assert_eq!(config.step_timeout, Duration::from_secs(5));
        assert_eq!(config.retry_backoff, Duration::from_millis(50));
        assert_eq!(config.planner.archive_project, "Cold Storage");
        assert_eq!(config.planner.age_threshold_days, 90);
        assert_eq!(config.confirmation_timeout, Duration::from_secs(86_400));
    }

    #[test]
    fn test_invalid_toml_and_values() {
        let err = OrchestratorConfig::from_toml("max_parallelism = ").unwrap_err();
        assert_eq!(err.code(), ErrorCode::CONFIG_INVALID_TOML);

        let err = OrchestratorConfig::from_toml("max_parallelism = 0").unwrap_err();
        assert_eq!(err.code(), ErrorCode::CONFIG_INVALID_VALUE);
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let temp = TempDir::new().unwrap();
        let config = OrchestratorConfig::load(&temp.path().join("adminflow.toml")).unwrap();
        assert_eq!(config, OrchestratorConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("adminflow.toml");
        std::fs::write(&path, "use_language_model = true\nstore_dir = \"/var/lib/adminflow\"\n")
            .unwrap();

        let config = OrchestratorConfig::load(&path).unwrap();
        assert!(config.use_language_model);
        assert_eq!(config.store_dir, Some(PathBuf::from("/var/lib/adminflow")));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("ADMINFLOW_MAX_PARALLELISM", "8"),
            ("ADMINFLOW_STEP_TIMEOUT", "2m"),
            ("ADMINFLOW_STORE_DIR", "/tmp/flows"),
        ]
        .into_iter()
        .collect();

        let mut config = OrchestratorConfig::default();
        config
            .merge_env_from(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.max_parallelism, 8);
        assert_eq!(config.step_timeout, Duration::from_secs(120));
        assert_eq!(config.store_dir, Some(PathBuf::from("/tmp/flows")));
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = OrchestratorConfig::default();
        let err = config
            .merge_env_from(|key| (key == "ADMINFLOW_RETRY_BACKOFF").then(|| "soon".to_string()))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::CONFIG_INVALID_VALUE);
    }
}
