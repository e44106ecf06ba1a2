// ABOUTME: Typed middleware configuration loaded from config.json
// ABOUTME: Unknown keys are rejected so typos fail loudly instead of vanishing

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Middleware settings.
///
/// Every knob is a named, typed field; keys the struct does not declare fail
/// deserialization outright.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory polled for point-of-sale table-file exports.
    pub input_dir: PathBuf,
    /// Directory receiving the timestamped ESL CSV files.
    pub output_dir: PathBuf,
    /// Canonical path of the persisted change-tracking state.
    pub state_file: PathBuf,
    /// Seconds between synchronization cycles.
    pub poll_interval_secs: u64,
    /// Snapshot-read attempts before a source's pass is failed.
    pub max_retries: u32,
    /// Initial delay between snapshot-read attempts; doubles per retry.
    pub retry_delay_secs: u64,
    /// Volatile fields omitted from record fingerprints.
    pub excluded_fields: Vec<String>,
    /// How long shutdown waits for an in-flight cycle.
    pub shutdown_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("./RMan_Export"),
            output_dir: PathBuf::from("./ESL_Sync"),
            state_file: PathBuf::from("state.json"),
            poll_interval_secs: 30,
            max_retries: 3,
            retry_delay_secs: 2,
            excluded_fields: vec!["TIMESTAMP".to_string(), "MODIFIED".to_string()],
            shutdown_timeout_secs: 30,
        }
    }
}

impl Config {
    /// Loads configuration from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("No configuration at {:?}; using defaults", path);
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration {:?}", path))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse configuration {:?}", path))?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let contents =
            serde_json::to_string_pretty(self).context("Failed to serialize configuration")?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write configuration {:?}", path))?;
        Ok(())
    }

    /// Rejects settings the runner cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            bail!("poll_interval_secs must be at least 1");
        }
        if self.max_retries == 0 {
            bail!("max_retries must be at least 1");
        }
        if self.input_dir.as_os_str().is_empty() {
            bail!("input_dir is not set");
        }
        if self.output_dir.as_os_str().is_empty() {
            bail!("output_dir is not set");
        }
        Ok(())
    }

    /// Creates the input and output directories if absent.
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.input_dir, &self.output_dir] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory {:?}", dir))?;
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_legacy_deployment() {
        let config = Config::default();
        assert_eq!(config.poll_interval_secs, 30);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay_secs, 2);
        assert_eq!(config.excluded_fields, vec!["TIMESTAMP", "MODIFIED"]);
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::default();
        config.poll_interval_secs = 60;
        config.excluded_fields.push("DELETED".to_string());
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"poll_interval_secs": 10, "pol_interval": 5}"#).unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn validate_rejects_zero_intervals() {
        let mut config = Config::default();
        config.poll_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.max_retries = 0;
        assert!(config.validate().is_err());

        assert!(Config::default().validate().is_ok());
    }
}
