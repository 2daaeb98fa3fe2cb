// datagate - engine-neutral data access layer
// Core library

pub mod config;
pub mod engine;
pub mod observability;

use std::sync::Arc;

use config::DalConfig;
use engine::{ConnectionCache, ConnectionConfig, DataAccess, DriverRegistry, EngineError, EngineResult};

/// Entry point shared by every caller of the layer
///
/// Holds the driver registry, the process-wide connection cache and the
/// effective configuration. Cloning is cheap; clones share the cache.
#[derive(Clone)]
pub struct DataAccessLayer {
    registry: Arc<DriverRegistry>,
    cache: Arc<ConnectionCache>,
    config: Arc<DalConfig>,
}

impl DataAccessLayer {
    pub fn new(config: DalConfig) -> Self {
        Self::with_registry(DriverRegistry::with_builtin_drivers(), config)
    }

    pub fn with_registry(registry: DriverRegistry, config: DalConfig) -> Self {
        Self {
            registry: Arc::new(registry),
            cache: Arc::new(ConnectionCache::new()),
            config: Arc::new(config),
        }
    }

    pub fn registry(&self) -> &DriverRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<ConnectionCache> {
        &self.cache
    }

    pub fn config(&self) -> &DalConfig {
        &self.config
    }

    /// DAO for `config`, selected by its driver tag
    ///
    /// No connection is opened here; the first operation connects through
    /// the shared cache.
    pub fn dao_for(&self, config: ConnectionConfig) -> EngineResult<Arc<dyn DataAccess>> {
        let driver = self
            .registry
            .get(&config.driver)
            .ok_or_else(|| EngineError::driver_not_found(&config.driver))?;
        Ok(driver.bind(config, Arc::clone(&self.cache), Arc::clone(&self.config)))
    }

    /// Drops the cached handle for `config`, closing its pool and tunnel
    pub async fn disconnect(&self, config: &ConnectionConfig) -> bool {
        self.cache.invalidate(config).await
    }

    /// Closes every cached connection; returns how many were closed
    pub async fn clear_connection_cache(&self) -> usize {
        self.cache.clear_all().await
    }
}

impl Default for DataAccessLayer {
    fn default() -> Self {
        Self::new(DalConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::{SshAuth, SshHostKeyPolicy, SshTunnelConfig};

    fn postgres_behind_gateway() -> ConnectionConfig {
        ConnectionConfig {
            driver: "postgres".into(),
            host: "db.internal".into(),
            port: 5432,
            username: "app".into(),
            password: "secret".into(),
            database: Some("app".into()),
            schema: None,
            ssl: false,
            ssl_ca_path: None,
            ssh_tunnel: Some(SshTunnelConfig {
                host: "127.0.0.1".into(),
                port: 1,
                username: "tunnel".into(),
                auth: SshAuth::Key {
                    private_key_path: "/nonexistent/id_ed25519".into(),
                    passphrase: None,
                },
                host_key_policy: SshHostKeyPolicy::InsecureNoCheck,
                known_hosts_path: None,
                connect_timeout_secs: 2,
                keepalive_interval_secs: 30,
            }),
        }
    }

    #[test]
    fn unknown_driver_is_rejected() {
        let layer = DataAccessLayer::default();
        let mut config = postgres_behind_gateway();
        config.driver = "oracle".into();

        match layer.dao_for(config) {
            Err(EngineError::DriverNotFound { driver }) => assert_eq!(driver, "oracle"),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("oracle should not resolve to a driver"),
        }
    }

    #[test]
    fn driver_tag_selects_the_engine() {
        let layer = DataAccessLayer::default();
        let mut config = postgres_behind_gateway();
        config.driver = "MySQL".into();
        assert_eq!(layer.dao_for(config).unwrap().driver_id(), "mysql");
    }

    #[tokio::test]
    async fn unreachable_gateway_reports_tunnel_failure() {
        let layer = DataAccessLayer::new(DalConfig {
            test_timeout_ms: 5_000,
            ..DalConfig::default()
        });
        let config = postgres_behind_gateway();
        let dao = layer.dao_for(config.clone()).unwrap();

        let status = dao.test_connection().await;
        assert!(!status.ok);
        assert!(status.message.contains("SSH tunnel"), "{}", status.message);
        assert!(!layer.cache().contains(&config).await);
        assert_eq!(layer.clear_connection_cache().await, 0);
    }
}
