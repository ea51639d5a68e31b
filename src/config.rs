//! Server configuration: defaults, then an optional JSON file named by
//! `TALLY_CONFIG`, then `TALLY_*` environment overrides.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;

use crate::engine::CompletionPolicy;
use crate::model::Ms;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid value for {var}: {value:?}")]
    Env { var: &'static str, value: String },
    #[error("{0}")]
    Invalid(&'static str),
}

/// Settings each tenant engine runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub completion_policy: CompletionPolicy,
    pub default_lock_ttl_ms: Ms,
    pub max_lock_ttl_ms: Ms,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            completion_policy: CompletionPolicy::Retain,
            default_lock_ttl_ms: 600_000,
            max_lock_ttl_ms: 3_600_000,
        }
    }
}

impl EngineConfig {
    /// Resolve a requested lock TTL: default when absent, capped at the maximum.
    pub fn lock_ttl(&self, requested: Option<Ms>) -> Option<Ms> {
        match requested {
            None => Some(self.default_lock_ttl_ms),
            Some(ttl) if ttl <= 0 => None,
            Some(ttl) => Some(ttl.min(self.max_lock_ttl_ms)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub sweep_interval_ms: u64,
    #[serde(flatten)]
    pub engine: EngineConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "tally".into(),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
            sweep_interval_ms: 5000,
            engine: EngineConfig::default(),
        }
    }
}

impl Config {
    /// Load from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(|var| std::env::var(var).ok())
    }

    /// Load with a custom variable lookup (tests pass a map).
    pub fn load_from(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = match lookup("TALLY_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env(&lookup)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply_env(&mut self, lookup: &impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = parsed(lookup, "TALLY_PORT")? {
            self.port = v;
        }
        if let Some(v) = lookup("TALLY_BIND") {
            self.bind = v;
        }
        if let Some(v) = lookup("TALLY_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("TALLY_PASSWORD") {
            self.password = v;
        }
        if let Some(v) = parsed(lookup, "TALLY_MAX_CONNECTIONS")? {
            self.max_connections = v;
        }
        if let Some(v) = parsed(lookup, "TALLY_COMPACT_THRESHOLD")? {
            self.compact_threshold = v;
        }
        if let Some(v) = parsed(lookup, "TALLY_METRICS_PORT")? {
            self.metrics_port = Some(v);
        }
        if let Some(v) = lookup("TALLY_TLS_CERT") {
            self.tls_cert = Some(v);
        }
        if let Some(v) = lookup("TALLY_TLS_KEY") {
            self.tls_key = Some(v);
        }
        if let Some(v) = parsed(lookup, "TALLY_SWEEP_INTERVAL_MS")? {
            self.sweep_interval_ms = v;
        }
        if let Some(v) = parsed(lookup, "TALLY_DEFAULT_LOCK_TTL_MS")? {
            self.engine.default_lock_ttl_ms = v;
        }
        if let Some(v) = parsed(lookup, "TALLY_MAX_LOCK_TTL_MS")? {
            self.engine.max_lock_ttl_ms = v;
        }
        if let Some(v) = parsed(lookup, "TALLY_COMPLETION_POLICY")? {
            self.engine.completion_policy = v;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid("max_connections must be positive"));
        }
        if self.sweep_interval_ms == 0 {
            return Err(ConfigError::Invalid("sweep_interval_ms must be positive"));
        }
        if self.engine.default_lock_ttl_ms <= 0 || self.engine.max_lock_ttl_ms <= 0 {
            return Err(ConfigError::Invalid("lock TTLs must be positive"));
        }
        if self.engine.default_lock_ttl_ms > self.engine.max_lock_ttl_ms {
            return Err(ConfigError::Invalid("default lock TTL exceeds the maximum"));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Env { var, value }),
    }
}
