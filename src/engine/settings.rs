//! Table settings projection
//!
//! Supplied by the table-settings subsystem. Absent settings mean every
//! column is visible and there is no default search or ordering.

use serde::{Deserialize, Serialize};

use crate::engine::schema::{find_column, ColumnDescriptor};
use crate::engine::types::SortDirection;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TableSettings {
    /// Columns shown in listings; empty means all
    pub list_fields: Vec<String>,
    pub excluded_fields: Vec<String>,
    pub search_fields: Vec<String>,
    /// Columns the caller may sort by; empty means any column
    pub sortable_by: Vec<String>,
    pub readonly_fields: Vec<String>,
    pub list_per_page: Option<i64>,
    pub ordering_field: Option<String>,
    pub ordering: Option<SortDirection>,
}

impl TableSettings {
    /// Columns a read may return, in structure order unless `list_fields` says otherwise
    pub fn visible_fields(&self, columns: &[ColumnDescriptor]) -> Vec<String> {
        let candidates: Vec<String> = if self.list_fields.is_empty() {
            columns.iter().map(|c| c.column_name.clone()).collect()
        } else {
            self.list_fields
                .iter()
                .filter(|name| find_column(columns, name).is_some())
                .cloned()
                .collect()
        };

        candidates
            .into_iter()
            .filter(|name| !self.excluded_fields.contains(name))
            .collect()
    }

    /// Default ordering, only when both the field and the direction are set
    pub fn default_ordering(&self) -> Option<(&str, SortDirection)> {
        match (&self.ordering_field, self.ordering) {
            (Some(field), Some(direction)) if !field.is_empty() => Some((field.as_str(), direction)),
            _ => None,
        }
    }

    pub fn is_sortable(&self, field: &str) -> bool {
        self.sortable_by.is_empty() || self.sortable_by.iter().any(|f| f == field)
    }
}

/// Cross-checks a settings draft against the actual columns of a table
pub fn validate_settings(settings: &TableSettings, table: &str, columns: &[ColumnDescriptor]) -> Vec<String> {
    let mut messages = Vec::new();

    let lists: [(&str, &Vec<String>); 5] = [
        ("list_fields", &settings.list_fields),
        ("excluded_fields", &settings.excluded_fields),
        ("search_fields", &settings.search_fields),
        ("sortable_by", &settings.sortable_by),
        ("readonly_fields", &settings.readonly_fields),
    ];

    for (list_name, fields) in lists {
        for field in fields {
            if find_column(columns, field).is_none() {
                messages.push(format!(
                    "Field \"{}\" in {} does not exist in table \"{}\"",
                    field, list_name, table
                ));
            }
        }
    }

    if let Some(field) = &settings.ordering_field {
        if find_column(columns, field).is_none() {
            messages.push(format!(
                "Ordering field \"{}\" does not exist in table \"{}\"",
                field, table
            ));
        }
    }

    if let Some(per_page) = settings.list_per_page {
        if per_page <= 0 {
            messages.push(format!("list_per_page must be positive, got {}", per_page));
        }
    }

    messages
}
