//! Service configuration, built from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::pipeline::{JobTypeCatalog, PipelineConfig};
use crate::queue::Retention;

/// Worker and API settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// API listen port.
    pub port: u16,
    /// Concurrent pipelines.
    pub workers: usize,
    /// Whole-job timeout enforced by the worker.
    pub job_timeout: Duration,
    /// Attempt timeout for steps without their own.
    pub step_timeout: Duration,
    /// TOML file with job type templates.
    pub job_types_path: Option<PathBuf>,
    /// Directory for daily-rolling log files.
    pub log_dir: Option<PathBuf>,
    /// Repo used when a submission names none.
    pub default_repo: Option<String>,
    /// How long finished jobs stay queryable.
    pub retention: Retention,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            port: 7000,
            workers: 2,
            job_timeout: Duration::from_secs(3600), // 1 hour
            step_timeout: Duration::from_secs(600), // 10 minutes
            job_types_path: None,
            log_dir: None,
            default_repo: None,
            retention: Retention::default(),
        }
    }
}

impl WorkerConfig {
    /// Build config from environment variables. Unset values take defaults;
    /// unparsable ones are an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let workers: usize = parse_or(&get, "AGENT_BRAIN_WORKERS", defaults.workers)?;
        if workers == 0 {
            return Err(ConfigError::InvalidValue {
                key: "AGENT_BRAIN_WORKERS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            port: parse_or(&get, "AGENT_BRAIN_PORT", defaults.port)?,
            workers,
            job_timeout: Duration::from_secs(parse_or(
                &get,
                "AGENT_BRAIN_JOB_TIMEOUT_SECS",
                defaults.job_timeout.as_secs(),
            )?),
            step_timeout: Duration::from_secs(parse_or(
                &get,
                "AGENT_BRAIN_STEP_TIMEOUT_SECS",
                defaults.step_timeout.as_secs(),
            )?),
            job_types_path: get("AGENT_BRAIN_JOB_TYPES").map(PathBuf::from),
            log_dir: get("AGENT_BRAIN_LOG_DIR").map(PathBuf::from),
            default_repo: get("GITHUB_DEFAULT_REPO"),
            retention: Retention {
                result_ttl: Duration::from_secs(parse_or(
                    &get,
                    "AGENT_BRAIN_RESULT_TTL_SECS",
                    defaults.retention.result_ttl.as_secs(),
                )?),
                max_finished: parse_or(
                    &get,
                    "AGENT_BRAIN_MAX_FINISHED_JOBS",
                    defaults.retention.max_finished,
                )?,
            },
        })
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            step_timeout: self.step_timeout,
        }
    }

    /// Built-in job types, overridden by `job_types_path` when set.
    pub fn load_job_types(&self) -> Result<JobTypeCatalog, ConfigError> {
        match &self.job_types_path {
            Some(path) => JobTypeCatalog::load_file(path),
            None => Ok(JobTypeCatalog::builtin()),
        }
    }
}

fn parse_or<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{raw}': {e}"),
        }),
    }
}
