use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub runner: RunnerConfig,

    #[serde(default)]
    pub log_level: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            runner: RunnerConfig::default(),
            log_level: Some("info".to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Location of the upgrade log database. Defaults to `<config_dir>/data`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunnerConfig {
    #[serde(default)]
    pub script_timeout_secs: Option<u64>,

    /// Abort the remaining scripts after the first failed one.
    #[serde(default)]
    pub stop_on_failure: bool,

    /// Script names excluded from deployment runs.
    #[serde(default)]
    pub skip: Vec<String>,
}

impl RunnerConfig {
    pub fn script_timeout(&self) -> Option<Duration> {
        self.script_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}
