use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::jobs::{JobsConfig, JobsMode};

pub const ENV_ROOT: &str = "ASSETS_ROOT";
pub const ENV_WORKERS: &str = "ASSETS_WORKERS";

pub const DEFAULT_KEEP_ALIVE_MS: u64 = 2000;
pub const DEFAULT_RESIDENT_BUDGET_BYTES: usize = 256 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid asset config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AssetConfig {
    pub root: PathBuf,
    pub workers: Option<usize>,
    pub worker_keep_alive_ms: u64,
    pub resident_budget_bytes: usize,
    pub flip_vertically: bool,
    pub inline_jobs: bool,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("content"),
            workers: None,
            worker_keep_alive_ms: DEFAULT_KEEP_ALIVE_MS,
            resident_budget_bytes: DEFAULT_RESIDENT_BUDGET_BYTES,
            flip_vertically: false,
            inline_jobs: false,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct AssetConfigValidation {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl AssetConfigValidation {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

impl AssetConfig {
    pub fn parse_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_toml(&text)
    }

    /// Applies `ASSETS_ROOT` and `ASSETS_WORKERS` from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| env::var(key).ok())
    }

    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(root) = lookup(ENV_ROOT).filter(|value| !value.trim().is_empty()) {
            self.root = PathBuf::from(root.trim());
        }
        if let Some(workers) = lookup(ENV_WORKERS) {
            match workers.trim().parse::<usize>() {
                Ok(count) => self.workers = Some(count),
                Err(_) => log::warn!(
                    "ignoring {}={:?}: not a worker count",
                    ENV_WORKERS,
                    workers
                ),
            }
        }
        self
    }

    pub fn validate(&self) -> AssetConfigValidation {
        let mut validation = AssetConfigValidation::default();
        if self.root.as_os_str().is_empty() {
            validation.errors.push("root must not be empty".to_string());
        }
        if self.workers == Some(0) {
            validation
                .errors
                .push("workers must be at least 1".to_string());
        }
        if self.resident_budget_bytes == 0 {
            validation
                .errors
                .push("resident_budget_bytes must be greater than 0".to_string());
        }
        if self.inline_jobs && self.workers.is_some() {
            validation
                .warnings
                .push("workers is ignored when inline_jobs is set".to_string());
        }
        if !self.inline_jobs && self.worker_keep_alive_ms == 0 {
            validation
                .warnings
                .push("worker_keep_alive_ms = 0 retires workers after every job".to_string());
        }
        validation
    }

    pub fn worker_count(&self) -> usize {
        self.workers
            .unwrap_or_else(JobsConfig::default_worker_count)
            .max(1)
    }

    pub fn jobs_config(&self) -> JobsConfig {
        if self.inline_jobs {
            return JobsConfig::inline();
        }
        JobsConfig::threaded(
            self.worker_count(),
            Duration::from_millis(self.worker_keep_alive_ms),
        )
    }

    pub fn jobs_mode(&self) -> JobsMode {
        self.jobs_config().mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config = AssetConfig::parse_toml("root = \"assets\"\nworkers = 3\n").unwrap();
        assert_eq!(config.root, PathBuf::from("assets"));
        assert_eq!(config.workers, Some(3));
        assert_eq!(config.worker_keep_alive_ms, DEFAULT_KEEP_ALIVE_MS);
        assert_eq!(config.resident_budget_bytes, DEFAULT_RESIDENT_BUDGET_BYTES);
        assert!(config.validate().is_ok());
        let jobs = config.jobs_config();
        assert_eq!(jobs.mode, JobsMode::Threaded);
        assert_eq!(jobs.max_workers, 3);
        assert_eq!(jobs.keep_alive, Duration::from_millis(2000));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = AssetConfig::parse_toml("rooot = \"typo\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn validation_reports_errors_and_warnings() {
        let config = AssetConfig {
            workers: Some(0),
            resident_budget_bytes: 0,
            inline_jobs: true,
            ..AssetConfig::default()
        };
        let validation = config.validate();
        assert_eq!(validation.errors.len(), 2);
        assert_eq!(validation.warnings.len(), 1);
        assert!(!validation.is_ok());
        assert_eq!(config.jobs_mode(), JobsMode::Inline);
    }

    #[test]
    fn overrides_replace_root_and_workers() {
        let config = AssetConfig::default().with_overrides(|key| match key {
            ENV_ROOT => Some("/srv/content".to_string()),
            ENV_WORKERS => Some(" 5 ".to_string()),
            _ => None,
        });
        assert_eq!(config.root, PathBuf::from("/srv/content"));
        assert_eq!(config.worker_count(), 5);

        let untouched = AssetConfig::default().with_overrides(|key| match key {
            ENV_WORKERS => Some("many".to_string()),
            _ => None,
        });
        assert_eq!(untouched, AssetConfig::default());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("assets.toml");
        std::fs::write(&path, "flip_vertically = true\ninline_jobs = true\n").unwrap();
        let config = AssetConfig::load(&path).unwrap();
        assert!(config.flip_vertically);
        assert!(config.inline_jobs);

        let missing = AssetConfig::load(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));
    }
}
