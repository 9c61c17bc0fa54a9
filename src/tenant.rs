use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::compactor;
use crate::engine::Engine;
use crate::limits::*;

/// Manages per-tenant engines. Each tenant (one savings association) gets its
/// own Engine + WAL + compactor. Tenant = database name from the pgwire connection.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
        }
    }

    /// Get or lazily create an engine for the given tenant. Names that
    /// sanitize to the same WAL file share one engine.
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

        // Two connections may race here; the entry API keeps the first engine.
        let entry = self.engines.entry(safe_name.clone()).or_try_insert_with(|| {
            let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
            let engine = Arc::new(Engine::new(wal_path)?);
            let compactor_engine = engine.clone();
            let threshold = self.compact_threshold;
            tokio::spawn(async move {
                compactor::run_compactor(compactor_engine, threshold).await;
            });
            tracing::info!("opened tenant {safe_name}");
            Ok::<_, std::io::Error>(engine)
        })?;
        let engine = entry.value().clone();
        drop(entry);

        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }
}
