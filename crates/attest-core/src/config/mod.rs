use crate::errors::ConfigError;
use crate::model::{IdNormalizer, DEFAULT_ID_WIDTH};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Engine settings.
///
/// # Environment Variables
///
/// - `ATTEST_MAX_ITERATIONS`: iteration budget
/// - `ATTEST_ITERATION_DELAY_MS`: sleep between iterations
/// - `ATTEST_DB_PATH`: SQLite file for the answer store
/// - `ATTEST_CONCURRENCY`: generation worker pool size
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Global bound on verify round trips.
    pub max_iterations: u32,

    /// Rate-limit pause between iterations.
    pub iteration_delay_ms: u64,

    /// First backoff step after a transport failure; doubles per consecutive failure.
    pub transport_backoff_ms: u64,

    pub transport_backoff_max_ms: u64,

    /// Per-call generator timeout. `None` leaves timeouts to the generator.
    pub generation_timeout_ms: Option<u64>,

    pub generation_concurrency: usize,

    /// `None` keeps the store in memory.
    pub db_path: Option<PathBuf>,

    /// Zero-pad width for numeric question ids.
    pub id_width: usize,

    /// Free-text markers that mean the verifier accepted everything.
    pub success_markers: Vec<String>,

    /// Answer submitted when generation fails for a question.
    pub generation_placeholder: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            iteration_delay_ms: 1000,
            transport_backoff_ms: 2000,
            transport_backoff_max_ms: 30_000,
            generation_timeout_ms: None,
            generation_concurrency: 4,
            db_path: None,
            id_width: DEFAULT_ID_WIDTH,
            success_markers: vec!["{FLG:".to_string()],
            generation_placeholder: "<generation-failed>".to_string(),
        }
    }
}

impl EngineConfig {
    /// Read a YAML config file. Missing keys fall back to defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            detail: e.to_string(),
        })?;
        Self::from_yaml_str(&raw).map_err(|e| match e {
            ConfigError::Parse { detail, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                detail,
            },
            other => other,
        })
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let cfg: Self = serde_yaml::from_str(raw).map_err(|e| ConfigError::Parse {
            path: "<inline>".to_string(),
            detail: e.to_string(),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Overlay `ATTEST_*` environment variables.
    pub fn apply_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Some(v) = env_value("ATTEST_MAX_ITERATIONS") {
            self.max_iterations = parse_env("ATTEST_MAX_ITERATIONS", &v)?;
        }
        if let Some(v) = env_value("ATTEST_ITERATION_DELAY_MS") {
            self.iteration_delay_ms = parse_env("ATTEST_ITERATION_DELAY_MS", &v)?;
        }
        if let Some(v) = env_value("ATTEST_CONCURRENCY") {
            self.generation_concurrency = parse_env("ATTEST_CONCURRENCY", &v)?;
        }
        if let Some(v) = env_value("ATTEST_DB_PATH") {
            self.db_path = Some(PathBuf::from(v));
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_iterations".to_string(),
                value: "0".to_string(),
            });
        }
        if self.id_width == 0 {
            return Err(ConfigError::InvalidValue {
                key: "id_width".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    pub fn iteration_delay(&self) -> Duration {
        Duration::from_millis(self.iteration_delay_ms)
    }

    pub fn generation_timeout(&self) -> Option<Duration> {
        self.generation_timeout_ms.map(Duration::from_millis)
    }

    /// Backoff after `consecutive` transport failures in a row (1-based).
    pub fn transport_backoff(&self, consecutive: u32) -> Duration {
        let shift = consecutive.saturating_sub(1).min(16);
        let ms = self
            .transport_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.transport_backoff_max_ms);
        Duration::from_millis(ms)
    }

    pub fn concurrency(&self) -> usize {
        self.generation_concurrency.max(1)
    }

    pub fn id_normalizer(&self) -> IdNormalizer {
        IdNormalizer::new(self.id_width)
    }
}

fn env_value(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        })
}
