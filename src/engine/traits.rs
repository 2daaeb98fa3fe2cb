//! DAO contract
//!
//! `DataAccess` is the only surface the rest of the system depends on. Each
//! engine family implements it once; a `Driver` binds that implementation
//! to a connection configuration.
//!
//! The layer performs no authorization: callers decide whether an operation
//! may run before invoking it.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::DalConfig;
use crate::engine::connection_cache::ConnectionCache;
use crate::engine::error::EngineResult;
use crate::engine::pagination::{PageRequest, PageResult};
use crate::engine::schema::{ColumnDescriptor, ForeignKeyDescriptor, PrimaryKeyDescriptor};
use crate::engine::settings::TableSettings;
use crate::engine::types::{ConnectionConfig, ConnectionStatus, InsertedRow, QueryShape, RowData};

/// Data access operations for one connection configuration
#[async_trait]
pub trait DataAccess: Send + Sync {
    /// Identifier of the engine family behind this DAO
    fn driver_id(&self) -> &'static str;

    /// Checks that the database is reachable and accepts the credentials
    ///
    /// Never fails: problems are reported through `ConnectionStatus`.
    async fn test_connection(&self) -> ConnectionStatus;

    /// Column descriptors in catalog order, with custom types resolved
    async fn get_table_structure(&self, table: &str) -> EngineResult<Vec<ColumnDescriptor>>;

    async fn get_primary_columns(&self, table: &str) -> EngineResult<Vec<PrimaryKeyDescriptor>>;

    async fn get_foreign_keys(&self, table: &str) -> EngineResult<Vec<ForeignKeyDescriptor>>;

    /// One page of rows shaped by filters, search and ordering
    ///
    /// When `shape.autocomplete` is set the result is an unpaginated sample.
    async fn get_rows(
        &self,
        table: &str,
        shape: &QueryShape,
        settings: &TableSettings,
        page: PageRequest,
    ) -> EngineResult<PageResult>;

    /// The row addressed by `key`, restricted to the visible fields
    async fn get_row_by_primary_key(
        &self,
        table: &str,
        key: &RowData,
        settings: &TableSettings,
    ) -> EngineResult<Option<RowData>>;

    async fn add_row(&self, table: &str, row: &RowData) -> EngineResult<InsertedRow>;

    /// Applies `row` to the row addressed by `key` and returns it as stored
    async fn update_row(&self, table: &str, row: &RowData, key: &RowData) -> EngineResult<RowData>;

    /// Deletes the row addressed by `key`, echoing the key back
    async fn delete_row(&self, table: &str, key: &RowData) -> EngineResult<RowData>;

    /// Human-readable problems with a settings draft; empty when valid
    async fn validate_settings(&self, settings: &TableSettings, table: &str) -> EngineResult<Vec<String>>;
}

/// Factory for one engine family
pub trait Driver: Send + Sync {
    /// Returns the unique identifier for this driver (e.g., "postgres", "mysql", "mongodb")
    fn driver_id(&self) -> &'static str;

    /// Returns a human-readable name for this driver
    fn driver_name(&self) -> &'static str;

    /// Binds a DAO to `config`; no connection is opened until first use
    fn bind(
        &self,
        config: ConnectionConfig,
        cache: Arc<ConnectionCache>,
        options: Arc<DalConfig>,
    ) -> Arc<dyn DataAccess>;
}
