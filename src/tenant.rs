use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{Config, EngineConfig};
use crate::engine::Engine;
use crate::limits::*;
use crate::notify::NotifyHub;
use crate::sweeper;

/// Compaction is checked this often; the threshold decides whether it runs.
const COMPACT_CHECK_EVERY: Duration = Duration::from_secs(30);

/// Manages per-tenant engines. Each tenant gets its own Engine + WAL + sweeper.
/// Tenant = database name from the pgwire connection.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    engine_config: EngineConfig,
    sweep_every: Duration,
    shutdown: CancellationToken,
}

impl TenantManager {
    pub fn new(
        data_dir: PathBuf,
        compact_threshold: u64,
        engine_config: EngineConfig,
        sweep_every: Duration,
    ) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            engine_config,
            sweep_every,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.data_dir.clone(),
            config.compact_threshold,
            config.engine,
            Duration::from_millis(config.sweep_interval_ms),
        )
    }

    /// Get or lazily create an engine for the given tenant.
    ///
    /// Tenants are keyed by their sanitized name, the same name the WAL file
    /// carries, so `a.b` and `ab` share one engine.
    pub fn get_or_create(&self, tenant: &str) -> std::io::Result<Arc<Engine>> {
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "tenant name too long",
            ));
        }

        // Sanitize tenant name to prevent path traversal
        let safe_name: String = tenant
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty tenant name",
            ));
        }

        if let Some(engine) = self.engines.get(&safe_name) {
            return Ok(engine.value().clone());
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(std::io::Error::other("too many tenants"));
        }

        // Two connections may race to open the same tenant; the entry lock
        // makes sure only one engine owns the WAL file.
        let entry = self.engines.entry(safe_name.clone());
        if let dashmap::mapref::entry::Entry::Occupied(existing) = &entry {
            return Ok(existing.get().clone());
        }

        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::open(&wal_path, notify, self.engine_config)?);

        tokio::spawn(sweeper::run_sweeper(
            engine.clone(),
            self.sweep_every,
            self.shutdown.child_token(),
        ));
        tokio::spawn(sweeper::run_compactor(
            engine.clone(),
            self.compact_threshold,
            COMPACT_CHECK_EVERY,
            self.shutdown.child_token(),
        ));

        entry.or_insert(engine.clone());
        let count = self.engines.len();
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(count as f64);
        info!(tenant = %safe_name, wal = %wal_path.display(), "tenant engine opened");
        Ok(engine)
    }

    /// Stop every tenant's background tasks.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
