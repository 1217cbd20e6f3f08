//! Configuration file handling.
//!
//! Settings are read from `.casestudy.toml` and then overridden by
//! command-line flags.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::filter::DateRange;

pub const DEFAULT_CONFIG_FILE: &str = ".casestudy.toml";

/// Outline jobs may not be given less than this before timing out.
pub const MIN_JOB_TIMEOUT_SECS: u64 = 180;
/// Nor more than this.
pub const MAX_JOB_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub jobs: JobsConfig,

    #[serde(default)]
    pub dashboard: DashboardConfig,
}

/// Platform REST API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Name of the environment variable holding the bearer token.
    #[serde(default = "default_token_env")]
    pub token_env: String,

    #[serde(default = "default_request_timeout")]
    pub timeout_seconds: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token_env: default_token_env(),
            timeout_seconds: default_request_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_token_env() -> String {
    "CASESTUDY_API_TOKEN".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url_env")]
    pub url_env: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url_env: default_database_url_env(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_database_url_env() -> String {
    "DATABASE_URL".to_string()
}

fn default_max_connections() -> u32 {
    5
}

/// Outline job polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,

    /// Clamped to 180..=300.
    #[serde(default = "default_job_timeout")]
    pub timeout_seconds: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_poll_interval(),
            timeout_seconds: default_job_timeout(),
        }
    }
}

impl JobsConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds.max(1))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(
            self.timeout_seconds
                .clamp(MIN_JOB_TIMEOUT_SECS, MAX_JOB_TIMEOUT_SECS),
        )
    }
}

fn default_poll_interval() -> u64 {
    2
}

fn default_job_timeout() -> u64 {
    240
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    #[serde(default = "default_refresh")]
    pub refresh_seconds: u64,

    /// One of 7d, 30d, 90d, all.
    #[serde(default = "default_range")]
    pub default_range: String,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            refresh_seconds: default_refresh(),
            default_range: default_range(),
        }
    }
}

fn default_refresh() -> u64 {
    60
}

fn default_range() -> String {
    "30d".to_string()
}

impl DashboardConfig {
    pub fn range(&self) -> Result<DateRange> {
        self.default_range
            .parse()
            .map_err(|e: String| anyhow::anyhow!("dashboard.default_range: {e}"))
    }
}

impl Config {
    /// Reads and validates one config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config
            .dashboard
            .range()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        Ok(config)
    }

    /// An explicit path must exist; `.casestudy.toml` in the working
    /// directory is optional.
    pub fn resolve(explicit: Option<&Path>) -> Result<Option<Self>> {
        match explicit {
            Some(path) => Self::load(path).map(Some),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::load(default_path).map(Some)
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// CLI flags win over file settings, but only when given.
    pub fn merge_with_args(&mut self, args: &crate::GlobalArgs) {
        if let Some(ref url) = args.api_url {
            self.api.base_url = url.clone();
        }
        if let Some(timeout) = args.job_timeout {
            self.jobs.timeout_seconds = timeout;
        }
    }

    pub fn api_token(&self) -> Option<String> {
        std::env::var(&self.api.token_env).ok().filter(|token| !token.trim().is_empty())
    }

    pub fn database_url(&self) -> Result<String> {
        std::env::var(&self.database.url_env)
            .with_context(|| {
                format!("{} must be set to a Postgres instance", self.database.url_env)
            })
    }

    pub fn default_toml() -> Result<String> {
        let body = toml::to_string_pretty(&Config::default())
            .context("Failed to render default config")?;
        Ok(format!(
            "# casestudy-analytics settings.\n\
             # The API token and database URL come from the environment variables named below.\n\n\
             {body}"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.api.base_url, "http://localhost:8000");
        assert_eq!(config.jobs.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.dashboard.refresh_seconds, 60);
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[api]
base_url = "https://cases.example.edu"

[jobs]
timeout_seconds = 200

[dashboard]
default_range = "7d"
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.api.base_url, "https://cases.example.edu");
        assert_eq!(config.api.token_env, "CASESTUDY_API_TOKEN");
        assert_eq!(config.jobs.timeout(), Duration::from_secs(200));
        assert_eq!(config.jobs.poll_interval_seconds, 2);
        assert_eq!(config.dashboard.default_range, "7d");
        assert_eq!(config.database.max_connections, 5);
    }

    #[test]
    fn test_job_timeout_is_clamped() {
        let mut jobs = JobsConfig::default();
        jobs.timeout_seconds = 30;
        assert_eq!(jobs.timeout(), Duration::from_secs(180));
        jobs.timeout_seconds = 3600;
        assert_eq!(jobs.timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(&path, "[dashboard]\nrefresh_seconds = 15\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.dashboard.refresh_seconds, 15);
        assert_eq!(config.dashboard.default_range, "30d");
    }

    #[test]
    fn test_resolve_requires_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(Config::resolve(Some(&missing)).is_err());
    }

    #[test]
    fn test_rejects_unknown_default_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(&path, "[dashboard]\ndefault_range = \"14d\"\n").unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("dashboard.default_range"));
        assert_eq!(Config::default().dashboard.range().unwrap(), DateRange::Last30Days);
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml().unwrap();
        assert!(toml_str.contains("[api]"));
        assert!(toml_str.contains("[jobs]"));
        assert!(toml_str.contains("[dashboard]"));
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.jobs.timeout_seconds, 240);
    }
}
