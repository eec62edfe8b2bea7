//! Worker configuration.
//!
//! Sources, lowest precedence first: built-in defaults, an optional TOML
//! file, `STARFLOW_*` environment variables (`__` separates sections, e.g.
//! `STARFLOW_WORKER__TASK_LIST`), then explicit builder overrides.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use config::{Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::backend::BackendOptions;

/// Environment variable naming the config file when `--config` is absent.
pub const CONFIG_PATH_ENV: &str = "STARFLOW_CONFIG_PATH";

const ENV_PREFIX: &str = "STARFLOW";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub worker: WorkerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Engine location, `memory://<name>` or `postgres://...`.
    pub location: String,
    pub domain: String,
    pub task_list: String,
    /// Defaults to `starflow-<pid>` when unset.
    pub identity: Option<String>,
    pub max_concurrent_activities: usize,
    pub poll_interval_ms: u64,
    pub max_connections: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directives, used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Config {
    /// Load from the default sources.
    pub fn load() -> Result<Self> {
        Self::builder().build()
    }

    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    pub fn backend_options(&self) -> BackendOptions {
        let defaults = BackendOptions::default();
        BackendOptions {
            identity: self.worker.identity.clone().unwrap_or(defaults.identity),
            max_concurrent_activities: self.worker.max_concurrent_activities,
            poll_interval: Duration::from_millis(self.worker.poll_interval_ms),
            max_connections: self.worker.max_connections,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.worker.location.is_empty() {
            bail!("worker.location must be set");
        }
        if self.worker.domain.is_empty() || self.worker.task_list.is_empty() {
            bail!("worker.domain and worker.task_list must not be empty");
        }
        if self.worker.max_concurrent_activities == 0 {
            bail!("worker.max_concurrent_activities must be at least 1");
        }
        if self.worker.poll_interval_ms == 0 {
            bail!("worker.poll_interval_ms must be at least 1");
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_path: Option<PathBuf>,
    location: Option<String>,
    task_list: Option<String>,
    log_filter: Option<String>,
}

impl ConfigBuilder {
    /// Config file to read. Falls back to `STARFLOW_CONFIG_PATH`.
    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn location(mut self, location: Option<String>) -> Self {
        self.location = location;
        self
    }

    pub fn task_list(mut self, task_list: Option<String>) -> Self {
        self.task_list = task_list;
        self
    }

    pub fn log_filter(mut self, filter: Option<String>) -> Self {
        self.log_filter = filter;
        self
    }

    pub fn build(self) -> Result<Config> {
        let defaults = BackendOptions::default();
        let mut builder = config::Config::builder()
            .set_default("worker.location", "memory://default")?
            .set_default("worker.domain", "default")?
            .set_default("worker.task_list", "starflow")?
            .set_default("worker.max_concurrent_activities", defaults.max_concurrent_activities as u64)?
            .set_default("worker.poll_interval_ms", defaults.poll_interval.as_millis() as u64)?
            .set_default("worker.max_connections", defaults.max_connections as u64)?
            .set_default("logging.filter", "info")?;

        let path = self
            .config_path
            .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));
        if let Some(path) = &path {
            if !path.exists() {
                bail!("config file {} does not exist", path.display());
            }
            builder = builder.add_source(File::from(path.as_path()).format(FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(location) = self.location {
            builder = builder.set_override("worker.location", location)?;
        }
        if let Some(task_list) = self.task_list {
            builder = builder.set_override("worker.task_list", task_list)?;
        }
        if let Some(filter) = self.log_filter {
            builder = builder.set_override("logging.filter", filter)?;
        }

        let config: Config = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("starflow-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_defaults() {
        let config = Config::builder().build().unwrap();
        assert_eq!(config.worker.domain, "default");
        assert_eq!(config.logging.filter, "info");
        assert_eq!(config.backend_options().max_connections, 10);
    }

    #[test]
    fn test_file_then_overrides() {
        let path = write_config(
            r#"
            [worker]
            location = "postgres://localhost/starflow"
            task_list = "from-file"
            poll_interval_ms = 50
            identity = "worker-a"
            "#,
        );
        let config = Config::builder()
            .config_path(Some(path.clone()))
            .task_list(Some("from-flag".into()))
            .build()
            .unwrap();
        std::fs::remove_file(path).ok();

        assert_eq!(config.worker.location, "postgres://localhost/starflow");
        assert_eq!(config.worker.task_list, "from-flag");
        let options = config.backend_options();
        assert_eq!(options.identity, "worker-a");
        assert_eq!(options.poll_interval, Duration::from_millis(50));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = Config::builder()
            .config_path(Some(PathBuf::from("/nonexistent/starflow.toml")))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let path = write_config("[worker]\nmax_concurrent_activities = 0\n");
        let result = Config::builder().config_path(Some(path.clone())).build();
        std::fs::remove_file(path).ok();
        assert!(result.is_err());
    }
}
