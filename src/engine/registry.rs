//! Driver Registry
//!
//! Central registry for all available database drivers.
//! Selects the DAO implementation from a configuration's engine tag.

use std::collections::HashMap;
use std::sync::Arc;

use crate::engine::drivers::{MongoDriver, MySqlDriver, PostgresDriver};
use crate::engine::traits::Driver;

/// Registry that holds all available database drivers
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<dyn Driver>>,
}

impl DriverRegistry {
    /// Creates a new empty registry
    pub fn new() -> Self {
        Self {
            drivers: HashMap::new(),
        }
    }

    /// Registry with every built-in engine
    pub fn with_builtin_drivers() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PostgresDriver::new()));
        registry.register(Arc::new(MySqlDriver::new()));
        registry.register(Arc::new(MongoDriver::new()));
        registry
    }

    /// Registers a new driver
    ///
    /// The driver's `driver_id()` is used as the key.
    pub fn register(&mut self, driver: Arc<dyn Driver>) {
        let id = driver.driver_id().to_string();
        self.drivers.insert(id, driver);
    }

    /// Gets a driver by its ID, ignoring case
    pub fn get(&self, driver_id: &str) -> Option<Arc<dyn Driver>> {
        self.drivers
            .get(driver_id.trim().to_ascii_lowercase().as_str())
            .cloned()
    }

    /// Lists all registered driver IDs
    pub fn list(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.drivers.keys().map(|s| s.as_str()).collect();
        ids.sort_unstable();
        ids
    }

    /// Returns the number of registered drivers
    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    /// Returns true if no drivers are registered
    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::with_builtin_drivers()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_drivers_are_registered() {
        let registry = DriverRegistry::with_builtin_drivers();
        assert_eq!(registry.list(), vec!["mongodb", "mysql", "postgres"]);
        assert_eq!(registry.get("Postgres").map(|d| d.driver_name()), Some("PostgreSQL"));
        assert!(registry.get("oracle").is_none());
    }

    #[test]
    fn empty_registry() {
        let registry = DriverRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
    }
}
