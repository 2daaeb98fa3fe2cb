//! Normalized schema model
//!
//! Engine drivers read their catalogs and produce `ColumnDescriptor`s.
//! Custom (user-defined) column types are resolved in a second pass: the
//! first pass records which columns reference a custom type, the second
//! looks each distinct type up once and rewrites the affected columns.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::types::{RowData, Value};

/// Generic tag for enumerated column types
pub const ENUM_TYPE: &str = "enum";

/// Catalog marker for types defined by the user (Postgres information_schema)
pub const USER_DEFINED_TYPE: &str = "USER-DEFINED";

/// Column metadata for table structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub column_name: String,
    /// Normalized data type (`enum` for enumerations, the type name for composites)
    pub data_type: String,
    pub data_type_params: Option<DataTypeParams>,
    pub column_default: Option<String>,
    pub allow_null: bool,
    pub character_maximum_length: Option<i64>,
    /// Engine type expression used for casts and decoding
    #[serde(skip)]
    pub native_type: Option<String>,
}

impl ColumnDescriptor {
    pub fn new(column_name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            column_name: column_name.into(),
            data_type: data_type.into(),
            data_type_params: None,
            column_default: None,
            allow_null: true,
            character_maximum_length: None,
            native_type: None,
        }
    }

    pub fn is_json(&self) -> bool {
        is_json_type(&self.data_type)
    }

    pub fn is_custom(&self) -> bool {
        self.data_type_params.is_some() || self.data_type == USER_DEFINED_TYPE
    }
}

/// Extra type information for enum and composite columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataTypeParams {
    /// Ordered enum labels
    Labels(Vec<String>),
    /// Ordered composite attributes
    Attributes(Vec<TypeAttribute>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeAttribute {
    pub name: String,
    pub data_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryKeyDescriptor {
    pub column_name: String,
    pub data_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKeyDescriptor {
    pub column_name: String,
    pub referenced_table_name: String,
    pub referenced_column_name: String,
    pub constraint_name: String,
}

/// A custom type as identified by the catalog
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CustomTypeRef {
    pub schema: String,
    pub name: String,
}

/// Shape of a custom type after its secondary lookup
#[derive(Debug, Clone, PartialEq)]
pub enum CustomTypeShape {
    Enum(Vec<String>),
    Composite(Vec<TypeAttribute>),
    /// Neither enum nor composite (domains, extension types)
    Opaque,
}

/// Columns that still need a secondary lookup, keyed by column name
#[derive(Debug, Default)]
pub struct PendingCustomTypes {
    by_column: HashMap<String, CustomTypeRef>,
}

impl PendingCustomTypes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, column: impl Into<String>, type_ref: CustomTypeRef) {
        self.by_column.insert(column.into(), type_ref);
    }

    pub fn is_empty(&self) -> bool {
        self.by_column.is_empty()
    }

    /// Distinct types to look up, in a stable order
    pub fn distinct_types(&self) -> Vec<CustomTypeRef> {
        let mut types: Vec<CustomTypeRef> = self.by_column.values().cloned().collect();
        types.sort_by(|a, b| (&a.schema, &a.name).cmp(&(&b.schema, &b.name)));
        types.dedup();
        types
    }

    /// Rewrites pending columns from the resolved shapes
    ///
    /// Types missing from `resolved` (failed lookups) keep their catalog
    /// name and get no params.
    pub fn apply(
        &self,
        columns: &mut [ColumnDescriptor],
        resolved: &HashMap<CustomTypeRef, CustomTypeShape>,
    ) {
        for column in columns.iter_mut() {
            let Some(type_ref) = self.by_column.get(&column.column_name) else {
                continue;
            };
            match resolved.get(type_ref) {
                Some(CustomTypeShape::Enum(labels)) => {
                    column.data_type = ENUM_TYPE.to_string();
                    column.data_type_params = Some(DataTypeParams::Labels(labels.clone()));
                }
                Some(CustomTypeShape::Composite(attributes)) => {
                    column.data_type = type_ref.name.clone();
                    column.data_type_params = Some(DataTypeParams::Attributes(attributes.clone()));
                }
                Some(CustomTypeShape::Opaque) | None => {
                    column.data_type = type_ref.name.clone();
                    column.data_type_params = None;
                }
            }
        }
    }
}

/// Decides the shape of a custom type from its two secondary lookups
///
/// `attributes` is only looked up when the type has no enum labels.
/// Returns `None` when a lookup failed.
pub fn classify_custom_type(
    labels: EngineResult<Vec<String>>,
    attributes: Option<EngineResult<Vec<TypeAttribute>>>,
    type_ref: &CustomTypeRef,
) -> Option<CustomTypeShape> {
    match labels {
        Ok(labels) if !labels.is_empty() => return Some(CustomTypeShape::Enum(labels)),
        Ok(_) => {}
        Err(e) => {
            warn!(
                schema = %type_ref.schema,
                type_name = %type_ref.name,
                error = %e,
                "enum label lookup failed, keeping raw type"
            );
            return None;
        }
    }

    match attributes {
        Some(Ok(attributes)) if !attributes.is_empty() => Some(CustomTypeShape::Composite(attributes)),
        Some(Ok(_)) | None => Some(CustomTypeShape::Opaque),
        Some(Err(e)) => {
            warn!(
                schema = %type_ref.schema,
                type_name = %type_ref.name,
                error = %e,
                "composite attribute lookup failed, keeping raw type"
            );
            None
        }
    }
}

pub fn is_json_type(data_type: &str) -> bool {
    matches!(data_type.to_ascii_lowercase().as_str(), "json" | "jsonb")
}

pub fn find_column<'a>(columns: &'a [ColumnDescriptor], name: &str) -> Option<&'a ColumnDescriptor> {
    columns.iter().find(|c| c.column_name == name)
}

/// Allow-lists a column identifier against the introspected structure
pub fn require_column<'a>(
    columns: &'a [ColumnDescriptor],
    table: &str,
    name: &str,
) -> EngineResult<&'a ColumnDescriptor> {
    find_column(columns, name).ok_or_else(|| EngineError::column_not_found(table, name))
}

/// Ensures every key of `row` is a column of the table
pub fn require_row_columns(columns: &[ColumnDescriptor], table: &str, row: &RowData) -> EngineResult<()> {
    for name in row.columns.keys() {
        require_column(columns, table, name)?;
    }
    Ok(())
}

/// Serializes structured values of JSON columns to their text wire form
pub fn encode_json_fields(columns: &[ColumnDescriptor], row: &RowData) -> RowData {
    let mut encoded = RowData::new();
    for (name, value) in &row.columns {
        let is_json = find_column(columns, name).map(ColumnDescriptor::is_json).unwrap_or(false);
        let value = match value {
            Value::Null => Value::Null,
            other if is_json => Value::Text(other.to_json().to_string()),
            other => other.clone(),
        };
        encoded.columns.insert(name.clone(), value);
    }
    encoded
}

/// Decodes JSON columns returned as text back into structured values
pub fn decode_json_fields(columns: &[ColumnDescriptor], row: &mut RowData) {
    for (name, value) in row.columns.iter_mut() {
        let is_json = find_column(columns, name).map(ColumnDescriptor::is_json).unwrap_or(false);
        if !is_json {
            continue;
        }
        let decoded = match value {
            Value::Text(text) => serde_json::from_str::<serde_json::Value>(text).ok(),
            Value::Bytes(bytes) => serde_json::from_slice::<serde_json::Value>(bytes).ok(),
            Value::Json(json) => Some(json.clone()),
            _ => None,
        };
        if let Some(json) = decoded {
            *value = Value::from_json(json);
        }
    }
}

/// Primary key columns are expected to be part of the structure
pub fn primary_keys_from_names(columns: &[ColumnDescriptor], names: Vec<String>) -> Vec<PrimaryKeyDescriptor> {
    names
        .into_iter()
        .map(|name| {
            let data_type = find_column(columns, &name)
                .map(|c| c.data_type.clone())
                .unwrap_or_default();
            PrimaryKeyDescriptor {
                column_name: name,
                data_type,
            }
        })
        .collect()
}
