use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::clock::{Clock, SystemClock};
use crate::compactor;
use crate::engine::Engine;
use crate::limits::*;
use crate::notify::NotifyHub;

/// One engine, journal and compactor per tenant. The tenant is the database
/// name of the wire connection; engines are created on first use.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    admission_timeout: Duration,
    clock: Arc<dyn Clock>,
}

/// Strip everything that could escape the data directory.
pub fn sanitize_tenant(tenant: &str) -> io::Result<String> {
    if tenant.len() > MAX_TENANT_NAME_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "tenant name too long"));
    }
    let safe: String = tenant
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    if safe.is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty tenant name"));
    }
    Ok(safe)
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            admission_timeout: Duration::from_millis(DEFAULT_ADMISSION_TIMEOUT_MS),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_admission_timeout(mut self, timeout: Duration) -> Self {
        self.admission_timeout = timeout;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn get_or_create(&self, tenant: &str) -> io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(tenant) {
            return Ok(engine.value().clone());
        }
        let safe_name = sanitize_tenant(tenant)?;
        if self.engines.len() >= MAX_TENANTS {
            return Err(io::Error::other("too many tenants"));
        }

        // Two first connections may race here; the entry API keeps one engine.
        let entry = self.engines.entry(tenant.to_string());
        if let dashmap::mapref::entry::Entry::Occupied(existing) = &entry {
            return Ok(existing.get().clone());
        }
        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let engine = Arc::new(
            Engine::new(wal_path, Arc::new(NotifyHub::new()), self.clock.clone())?
                .with_admission_timeout(self.admission_timeout),
        );
        entry.or_insert(engine.clone());

        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            compactor::run_compactor(compactor_engine, threshold).await;
        });

        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        tracing::info!(tenant = %safe_name, "tenant loaded");
        Ok(engine)
    }

    pub fn tenant_count(&self) -> usize {
        self.engines.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use ulid::Ulid;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("agenndo_test_tenant").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn tenants_are_isolated() {
        let tm = TenantManager::new(test_data_dir("isolation"), 1000);
        let a = tm.get_or_create("tenant_a").unwrap();
        let b = tm.get_or_create("tenant_b").unwrap();

        let id = Ulid::new();
        a.create_business(id, "barbearia", "Barbearia").await.unwrap();
        // Same slug and id are free in another tenant.
        b.create_business(id, "barbearia", "Outra").await.unwrap();
        a.disable_business(id).await.unwrap();

        assert!(!a.business(id).await.unwrap().active);
        assert!(b.business(id).await.unwrap().active);
    }

    #[tokio::test]
    async fn journal_created_lazily() {
        let dir = test_data_dir("lazy");
        let tm = TenantManager::new(dir.clone(), 1000);
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);
        let _engine = tm.get_or_create("my_db").unwrap();
        assert!(dir.join("my_db.wal").exists());
    }

    #[tokio::test]
    async fn same_engine_returned() {
        let tm = TenantManager::new(test_data_dir("same"), 1000);
        let first = tm.get_or_create("foo").unwrap();
        let second = tm.get_or_create("foo").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(tm.tenant_count(), 1);
    }

    #[tokio::test]
    async fn tenant_name_sanitized() {
        let dir = test_data_dir("sanitize");
        let tm = TenantManager::new(dir.clone(), 1000);
        let _engine = tm.get_or_create("../evil").unwrap();
        assert!(dir.join("evil.wal").exists());
        assert!(tm.get_or_create("../..").is_err());
    }

    #[test]
    fn tenant_name_too_long() {
        let err = sanitize_tenant(&"x".repeat(MAX_TENANT_NAME_LEN + 1)).unwrap_err();
        assert!(err.to_string().contains("tenant name too long"));
        assert_eq!(sanitize_tenant("salão_1").unwrap(), "salo_1");
    }
}
