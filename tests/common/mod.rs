//! Shared helpers for the live-database tests
//!
//! Each suite reads a JSON `ConnectionConfig` from an environment variable
//! and is skipped when the variable is unset.

#![allow(dead_code)]

use std::sync::Arc;

use datagate::config::DalConfig;
use datagate::engine::{
    ConnectionConfig, DataAccess, FilterCriterion, Ordering, QueryShape, RowData, SortDirection, Value,
};
use datagate::DataAccessLayer;

pub fn config_from_env(var: &str) -> Option<ConnectionConfig> {
    let raw = std::env::var(var).ok()?;
    match serde_json::from_str(&raw) {
        Ok(config) => Some(config),
        Err(e) => panic!("{var} is not a valid connection config: {e}"),
    }
}

pub fn layer() -> DataAccessLayer {
    DataAccessLayer::new(DalConfig::default())
}

pub fn dao(layer: &DataAccessLayer, config: &ConnectionConfig) -> Arc<dyn DataAccess> {
    layer.dao_for(config.clone()).expect("driver is registered")
}

/// Table name unique to this test process
pub fn scratch_table(prefix: &str) -> String {
    format!("{}_{}", prefix, std::process::id())
}

pub fn text(value: &str) -> Value {
    Value::Text(value.to_string())
}

pub fn row(pairs: &[(&str, Value)]) -> RowData {
    pairs
        .iter()
        .fold(RowData::new(), |row, (name, value)| row.with_column(*name, value.clone()))
}

/// `name startswith "Al"`, search "gmail", newest first
pub fn users_shape() -> QueryShape {
    QueryShape {
        filters: vec![FilterCriterion::new("name", "startswith", text("Al"))],
        search: Some("gmail".into()),
        ordering: Some(Ordering {
            field: Some("id".into()),
            direction: Some(SortDirection::Desc),
        }),
        autocomplete: None,
    }
}

pub const USERS: [(&str, &str); 4] = [
    ("Alice", "alice@gmail.com"),
    ("Alan", "alan@yahoo.com"),
    ("Bob", "bob@gmail.com"),
    ("Alba", "alba@gmail.com"),
];
