//! Query Filter Compiler
//!
//! Turns a `QueryShape` plus table settings into SQL fragments. Literal
//! values always travel as bound parameters; identifiers are interpolated
//! only after being allow-listed against the introspected columns, and are
//! quoted for the target dialect.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::schema::{find_column, ColumnDescriptor};
use crate::engine::settings::TableSettings;
use crate::engine::types::{AutocompleteRequest, FilterCriterion, QueryShape, SortDirection, Value};

/// Comparison operators understood by every engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOperator {
    Eq,
    StartsWith,
    EndsWith,
    Gt,
    Lt,
    Gte,
    Lte,
    Contains,
    /// Does-not-contain (`icontains` on the wire)
    NotContains,
    /// NULL or empty string
    Empty,
}

impl FromStr for FilterOperator {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "eq" | "equals" => Ok(Self::Eq),
            "startswith" => Ok(Self::StartsWith),
            "endswith" => Ok(Self::EndsWith),
            "gt" => Ok(Self::Gt),
            "lt" => Ok(Self::Lt),
            "gte" => Ok(Self::Gte),
            "lte" => Ok(Self::Lte),
            "contains" => Ok(Self::Contains),
            "icontains" | "notcontains" | "not_contains" => Ok(Self::NotContains),
            "empty" => Ok(Self::Empty),
            _ => Err(EngineError::unsupported_operator(s)),
        }
    }
}

impl FilterOperator {
    pub fn relational_sql(&self) -> Option<&'static str> {
        match self {
            Self::Gt => Some(">"),
            Self::Lt => Some("<"),
            Self::Gte => Some(">="),
            Self::Lte => Some("<="),
            _ => None,
        }
    }

    /// LIKE pattern for the pattern-matching operators
    pub fn like_pattern(&self, value: &str) -> Option<String> {
        let escaped = escape_like(value);
        match self {
            Self::StartsWith => Some(format!("{}%", escaped)),
            Self::EndsWith => Some(format!("%{}", escaped)),
            Self::Contains | Self::NotContains => Some(format!("%{}%", escaped)),
            _ => None,
        }
    }
}

/// Escapes LIKE wildcards so user text matches literally
pub fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// A filter after operator parsing and field allow-listing
#[derive(Debug, Clone)]
pub struct ParsedFilter<'a> {
    pub column: &'a ColumnDescriptor,
    pub operator: FilterOperator,
    pub value: &'a Value,
}

/// Parses and allow-lists every criterion of a query shape
pub fn parse_filters<'a>(
    filters: &'a [FilterCriterion],
    columns: &'a [ColumnDescriptor],
    table: &str,
) -> EngineResult<Vec<ParsedFilter<'a>>> {
    filters
        .iter()
        .map(|criterion| {
            let operator: FilterOperator = criterion.criteria.parse()?;
            let column = allowed_field(columns, table, &criterion.field)?;
            if criterion.value.is_null() && !matches!(operator, FilterOperator::Eq | FilterOperator::Empty) {
                return Err(EngineError::filter_error(format!(
                    "Filter \"{}\" on field \"{}\" requires a value",
                    criterion.criteria, criterion.field
                )));
            }
            Ok(ParsedFilter {
                column,
                operator,
                value: &criterion.value,
            })
        })
        .collect()
}

pub fn allowed_field<'a>(
    columns: &'a [ColumnDescriptor],
    table: &str,
    field: &str,
) -> EngineResult<&'a ColumnDescriptor> {
    find_column(columns, field).ok_or_else(|| {
        EngineError::filter_error(format!(
            "Field \"{}\" is not in the allowed set for table \"{}\"",
            field, table
        ))
    })
}

/// Resolves the ordering to apply: the request first, then settings
///
/// Ordering applies only when both a field and a direction are present.
pub fn resolve_ordering<'a>(
    shape: &'a QueryShape,
    settings: &'a TableSettings,
    columns: &'a [ColumnDescriptor],
    table: &str,
) -> EngineResult<Option<(&'a ColumnDescriptor, SortDirection)>> {
    if let Some(ordering) = &shape.ordering {
        if let (Some(field), Some(direction)) = (&ordering.field, ordering.direction) {
            let column = allowed_field(columns, table, field)?;
            if !settings.is_sortable(field) {
                return Err(EngineError::filter_error(format!(
                    "Field \"{}\" is not sortable in table \"{}\"",
                    field, table
                )));
            }
            return Ok(Some((column, direction)));
        }
    }

    match settings.default_ordering() {
        Some((field, direction)) => Ok(Some((allowed_field(columns, table, field)?, direction))),
        None => Ok(None),
    }
}

/// SQL dialects with parameter and identifier conventions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    Postgres,
    MySql,
}

const TEXT_TYPES: &[&str] = &[
    "text",
    "character varying",
    "character",
    "varchar",
    "char",
    "bpchar",
    "citext",
    "name",
    "tinytext",
    "mediumtext",
    "longtext",
];

/// Postgres types the drivers decode natively; anything else is read as text
const PG_NATIVE_TYPES: &[&str] = &[
    "smallint",
    "integer",
    "bigint",
    "real",
    "double precision",
    "boolean",
    "text",
    "character varying",
    "character",
    "name",
    "json",
    "jsonb",
    "bytea",
    "timestamp without time zone",
    "timestamp with time zone",
    "date",
    "time without time zone",
];

pub fn is_text_column(column: &ColumnDescriptor) -> bool {
    TEXT_TYPES.contains(&column.data_type.to_ascii_lowercase().as_str())
}

impl SqlDialect {
    pub fn quote_ident(&self, name: &str) -> String {
        match self {
            SqlDialect::Postgres => format!("\"{}\"", name.replace('"', "\"\"")),
            SqlDialect::MySql => format!("`{}`", name.replace('`', "``")),
        }
    }

    pub fn table_ref(&self, namespace: Option<&str>, table: &str) -> String {
        match namespace {
            Some(ns) => format!("{}.{}", self.quote_ident(ns), self.quote_ident(table)),
            None => self.quote_ident(table),
        }
    }

    pub fn placeholder(&self, index: usize) -> String {
        match self {
            SqlDialect::Postgres => format!("${}", index),
            SqlDialect::MySql => "?".to_string(),
        }
    }

    /// Column expression coerced to text
    pub fn text_expr(&self, column: &ColumnDescriptor) -> String {
        let ident = self.quote_ident(&column.column_name);
        if is_text_column(column) {
            return ident;
        }
        match self {
            SqlDialect::Postgres => format!("CAST({} AS TEXT)", ident),
            SqlDialect::MySql => format!("CAST({} AS CHAR)", ident),
        }
    }

    /// Select-list expression for a column
    pub fn select_expr(&self, column: &ColumnDescriptor) -> String {
        let ident = self.quote_ident(&column.column_name);
        match self {
            SqlDialect::Postgres if !PG_NATIVE_TYPES.contains(&column.data_type.as_str()) => {
                format!("CAST({} AS TEXT) AS {}", ident, ident)
            }
            _ => ident,
        }
    }

    /// Placeholder for a text parameter compared or assigned to `column`
    pub fn typed_placeholder(&self, index: usize, column: &ColumnDescriptor) -> String {
        let placeholder = self.placeholder(index);
        match (self, &column.native_type) {
            (SqlDialect::Postgres, Some(native)) if !is_text_column(column) => {
                format!("CAST({} AS {})", placeholder, native)
            }
            _ => placeholder,
        }
    }
}

/// Accumulates SQL text and bound parameters in placeholder order
#[derive(Debug)]
pub struct SqlBuilder {
    dialect: SqlDialect,
    params: Vec<Value>,
}

impl SqlBuilder {
    pub fn new(dialect: SqlDialect) -> Self {
        Self {
            dialect,
            params: Vec::new(),
        }
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn into_params(self) -> Vec<Value> {
        self.params
    }

    /// Binds an untyped parameter and returns its placeholder
    pub fn bind(&mut self, value: Value) -> String {
        self.params.push(value);
        self.dialect.placeholder(self.params.len())
    }

    /// Binds a value compared against or written to `column`
    ///
    /// On Postgres, text values and NULLs headed for non-text columns are
    /// cast to the column's catalog type.
    pub fn bind_for_column(&mut self, value: &Value, column: &ColumnDescriptor) -> String {
        match (self.dialect, value) {
            (SqlDialect::Postgres, Value::Text(_) | Value::Null) => {
                self.params.push(value.clone());
                self.dialect.typed_placeholder(self.params.len(), column)
            }
            _ => self.bind(value.clone()),
        }
    }

    /// Binds a filter literal; Postgres compares it in its text form
    fn bind_filter_value(&mut self, value: &Value, column: &ColumnDescriptor) -> String {
        match self.dialect {
            SqlDialect::Postgres => {
                let text = Value::Text(value.to_text().unwrap_or_default());
                self.bind_for_column(&text, column)
            }
            SqlDialect::MySql => self.bind(value.clone()),
        }
    }

    /// `column = value` conditions for a primary key lookup
    pub fn key_condition(
        &mut self,
        key: &crate::engine::types::RowData,
        columns: &[ColumnDescriptor],
        table: &str,
    ) -> EngineResult<String> {
        if key.is_empty() {
            return Err(EngineError::schema_error(format!(
                "A primary key is required to address a row of \"{}\"",
                table
            )));
        }
        let mut clauses = Vec::with_capacity(key.columns.len());
        for (name, value) in &key.columns {
            let column = crate::engine::schema::require_column(columns, table, name)?;
            let ident = self.dialect.quote_ident(name);
            if value.is_null() {
                clauses.push(format!("{} IS NULL", ident));
            } else {
                let placeholder = self.bind_for_column(value, column);
                clauses.push(format!("{} = {}", ident, placeholder));
            }
        }
        Ok(clauses.join(" AND "))
    }

    /// Free-text search: OR across the configured search fields
    pub fn search_clause(
        &mut self,
        search: &str,
        search_fields: &[String],
        columns: &[ColumnDescriptor],
        table: &str,
    ) -> EngineResult<Option<String>> {
        if search.is_empty() || search_fields.is_empty() {
            return Ok(None);
        }
        let pattern = format!("%{}%", escape_like(&search.to_lowercase()));
        let mut alternatives = Vec::with_capacity(search_fields.len());
        for field in search_fields {
            let column = allowed_field(columns, table, field)?;
            let expr = self.dialect.text_expr(column);
            let placeholder = self.bind(Value::Text(pattern.clone()));
            alternatives.push(format!("LOWER({}) LIKE {}", expr, placeholder));
        }
        Ok(Some(format!("({})", alternatives.join(" OR "))))
    }

    /// One explicit filter
    pub fn filter_clause(&mut self, filter: &ParsedFilter<'_>) -> String {
        let column = filter.column;
        let ident = self.dialect.quote_ident(&column.column_name);

        match filter.operator {
            FilterOperator::Eq if filter.value.is_null() => format!("{} IS NULL", ident),
            FilterOperator::Eq => {
                let placeholder = self.bind_filter_value(filter.value, column);
                format!("{} = {}", ident, placeholder)
            }
            FilterOperator::Empty => {
                format!("({} IS NULL OR {} = '')", ident, self.dialect.text_expr(column))
            }
            op @ (FilterOperator::Gt | FilterOperator::Lt | FilterOperator::Gte | FilterOperator::Lte) => {
                let placeholder = self.bind_filter_value(filter.value, column);
                format!("{} {} {}", ident, op.relational_sql().unwrap_or("="), placeholder)
            }
            op @ (FilterOperator::StartsWith
            | FilterOperator::EndsWith
            | FilterOperator::Contains
            | FilterOperator::NotContains) => {
                let text = filter.value.to_text().unwrap_or_default();
                let pattern = op.like_pattern(&text).unwrap_or_default();
                let expr = self.dialect.text_expr(column);
                let placeholder = self.bind(Value::Text(pattern));
                if op == FilterOperator::NotContains {
                    format!("{} NOT LIKE {}", expr, placeholder)
                } else {
                    format!("{} LIKE {}", expr, placeholder)
                }
            }
        }
    }
}

/// WHERE and ORDER BY fragments for a row fetch, with their parameters
#[derive(Debug, Clone)]
pub struct CompiledShape {
    pub where_clause: Option<String>,
    pub order_by: Option<String>,
    pub params: Vec<Value>,
}

impl CompiledShape {
    pub fn where_sql(&self) -> String {
        self.where_clause
            .as_ref()
            .map(|w| format!(" WHERE {}", w))
            .unwrap_or_default()
    }

    pub fn order_sql(&self) -> String {
        self.order_by
            .as_ref()
            .map(|o| format!(" ORDER BY {}", o))
            .unwrap_or_default()
    }
}

/// Compiles search, filters and ordering, in that order
pub fn compile_shape(
    dialect: SqlDialect,
    shape: &QueryShape,
    settings: &TableSettings,
    columns: &[ColumnDescriptor],
    table: &str,
) -> EngineResult<CompiledShape> {
    let mut builder = SqlBuilder::new(dialect);
    let mut conditions = Vec::new();

    if let Some(search) = shape.search.as_deref() {
        if let Some(clause) = builder.search_clause(search, &settings.search_fields, columns, table)? {
            conditions.push(clause);
        }
    }

    for filter in parse_filters(&shape.filters, columns, table)? {
        conditions.push(builder.filter_clause(&filter));
    }

    // Qualified so the sort binds to the stored column, not a text-cast output alias
    let order_by = resolve_ordering(shape, settings, columns, table)?.map(|(column, direction)| {
        format!(
            "{}.{} {}",
            dialect.quote_ident(table),
            dialect.quote_ident(&column.column_name),
            direction.as_sql()
        )
    });

    Ok(CompiledShape {
        where_clause: if conditions.is_empty() { None } else { Some(conditions.join(" AND ")) },
        order_by,
        params: builder.into_params(),
    })
}

/// Prefix lookup over the requested fields; `*` matches everything
pub fn compile_autocomplete(
    dialect: SqlDialect,
    request: &AutocompleteRequest,
    columns: &[ColumnDescriptor],
    table: &str,
) -> EngineResult<CompiledShape> {
    let mut builder = SqlBuilder::new(dialect);
    let mut alternatives = Vec::new();

    for field in &request.fields {
        let column = allowed_field(columns, table, field)?;
        if request.value != "*" {
            let expr = dialect.text_expr(column);
            let placeholder = builder.bind(Value::Text(format!("{}%", escape_like(&request.value))));
            alternatives.push(format!("{} LIKE {}", expr, placeholder));
        }
    }

    Ok(CompiledShape {
        where_clause: if alternatives.is_empty() { None } else { Some(alternatives.join(" OR ")) },
        order_by: None,
        params: builder.into_params(),
    })
}

/// Select list for the given fields; an empty list is an error, never `*`
pub fn select_list(
    dialect: SqlDialect,
    fields: &[String],
    columns: &[ColumnDescriptor],
    table: &str,
) -> EngineResult<String> {
    let exprs: Vec<String> = fields
        .iter()
        .filter_map(|name| find_column(columns, name))
        .map(|column| dialect.select_expr(column))
        .collect();
    if exprs.is_empty() {
        return Err(EngineError::filter_error(format!(
            "No visible fields left to select from table \"{}\"",
            table
        )));
    }
    Ok(exprs.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::Ordering;
    use sqlparser::dialect::{MySqlDialect, PostgreSqlDialect};
    use sqlparser::parser::Parser;

    fn users() -> Vec<ColumnDescriptor> {
        let mut id = ColumnDescriptor::new("id", "integer");
        id.native_type = Some("integer".into());
        let mut name = ColumnDescriptor::new("name", "text");
        name.native_type = Some("text".into());
        let mut email = ColumnDescriptor::new("email", "text");
        email.native_type = Some("text".into());
        let mut state = ColumnDescriptor::new("state", "enum");
        state.native_type = Some("status".into());
        vec![id, name, email, state]
    }

    fn scenario_shape() -> (QueryShape, TableSettings) {
        let shape = QueryShape {
            filters: vec![FilterCriterion::new("name", "startswith", Value::from("Al"))],
            search: Some("gmail".into()),
            ordering: Some(Ordering {
                field: Some("id".into()),
                direction: Some(SortDirection::Desc),
            }),
            autocomplete: None,
        };
        let settings = TableSettings {
            search_fields: vec!["email".into()],
            ..Default::default()
        };
        (shape, settings)
    }

    #[test]
    fn parses_known_operators() {
        assert_eq!("startswith".parse::<FilterOperator>().unwrap(), FilterOperator::StartsWith);
        assert_eq!("GTE".parse::<FilterOperator>().unwrap(), FilterOperator::Gte);
        assert_eq!("icontains".parse::<FilterOperator>().unwrap(), FilterOperator::NotContains);
    }

    #[test]
    fn rejects_unknown_operator_by_name() {
        let err = "between".parse::<FilterOperator>().unwrap_err();
        assert!(matches!(err, EngineError::Filter { .. }));
        assert!(err.to_string().contains("between"));
    }

    #[test]
    fn escapes_like_wildcards() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(FilterOperator::EndsWith.like_pattern("x_y").unwrap(), "%x\\_y");
    }

    #[test]
    fn compiles_users_scenario_for_postgres() {
        let (shape, settings) = scenario_shape();
        let compiled = compile_shape(SqlDialect::Postgres, &shape, &settings, &users(), "users").unwrap();

        assert_eq!(
            compiled.where_clause.as_deref(),
            Some("(LOWER(\"email\") LIKE $1) AND \"name\" LIKE $2")
        );
        assert_eq!(compiled.order_by.as_deref(), Some("\"users\".\"id\" DESC"));
        assert_eq!(
            compiled.params,
            vec![Value::Text("%gmail%".into()), Value::Text("Al%".into())]
        );

        let sql = format!(
            "SELECT \"id\", \"name\", \"email\" FROM \"public\".\"users\"{}{} LIMIT 10 OFFSET 0",
            compiled.where_sql(),
            compiled.order_sql()
        );
        Parser::parse_sql(&PostgreSqlDialect {}, &sql).expect("compiled SQL should parse");
    }

    #[test]
    fn compiles_users_scenario_for_mysql() {
        let (shape, settings) = scenario_shape();
        let compiled = compile_shape(SqlDialect::MySql, &shape, &settings, &users(), "users").unwrap();

        assert_eq!(
            compiled.where_clause.as_deref(),
            Some("(LOWER(`email`) LIKE ?) AND `name` LIKE ?")
        );
        assert_eq!(compiled.order_by.as_deref(), Some("`users`.`id` DESC"));

        let sql = format!(
            "SELECT `id`, `name`, `email` FROM `users`{}{} LIMIT 10 OFFSET 0",
            compiled.where_sql(),
            compiled.order_sql()
        );
        Parser::parse_sql(&MySqlDialect {}, &sql).expect("compiled SQL should parse");
    }

    #[test]
    fn relational_filters_cast_text_params_on_postgres() {
        let columns = users();
        let shape = QueryShape {
            filters: vec![
                FilterCriterion::new("id", "gt", Value::Int(5)),
                FilterCriterion::new("state", "eq", Value::from("active")),
            ],
            ..Default::default()
        };
        let compiled =
            compile_shape(SqlDialect::Postgres, &shape, &TableSettings::default(), &columns, "users").unwrap();
        assert_eq!(
            compiled.where_clause.as_deref(),
            Some("\"id\" > CAST($1 AS integer) AND \"state\" = CAST($2 AS status)")
        );
        assert_eq!(compiled.params, vec![Value::Text("5".into()), Value::Text("active".into())]);
    }

    #[test]
    fn null_equality_and_empty_do_not_bind() {
        let columns = users();
        let shape = QueryShape {
            filters: vec![
                FilterCriterion::new("email", "eq", Value::Null),
                FilterCriterion::new("id", "empty", Value::Null),
            ],
            ..Default::default()
        };
        let compiled =
            compile_shape(SqlDialect::Postgres, &shape, &TableSettings::default(), &columns, "users").unwrap();
        assert_eq!(
            compiled.where_clause.as_deref(),
            Some("\"email\" IS NULL AND (\"id\" IS NULL OR CAST(\"id\" AS TEXT) = '')")
        );
        assert!(compiled.params.is_empty());
    }

    #[test]
    fn not_contains_negates_the_pattern() {
        let columns = users();
        let shape = QueryShape {
            filters: vec![FilterCriterion::new("name", "icontains", Value::from("bob"))],
            ..Default::default()
        };
        let compiled =
            compile_shape(SqlDialect::MySql, &shape, &TableSettings::default(), &columns, "users").unwrap();
        assert_eq!(compiled.where_clause.as_deref(), Some("`name` NOT LIKE ?"));
        assert_eq!(compiled.params, vec![Value::Text("%bob%".into())]);
    }

    #[test]
    fn injection_attempts_stay_in_parameters() {
        let columns = users();
        let hostile = "'; DROP TABLE users; --";
        let shape = QueryShape {
            filters: vec![FilterCriterion::new("name", "eq", Value::from(hostile))],
            search: Some(hostile.into()),
            ..Default::default()
        };
        let settings = TableSettings {
            search_fields: vec!["name".into()],
            ..Default::default()
        };
        let compiled = compile_shape(SqlDialect::Postgres, &shape, &settings, &columns, "users").unwrap();
        let where_clause = compiled.where_clause.unwrap();
        assert!(!where_clause.contains("DROP"));
        assert_eq!(compiled.params.len(), 2);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let columns = users();
        let shape = QueryShape {
            filters: vec![FilterCriterion::new("password\" --", "eq", Value::from("x"))],
            ..Default::default()
        };
        let err = compile_shape(SqlDialect::Postgres, &shape, &TableSettings::default(), &columns, "users")
            .unwrap_err();
        assert!(matches!(err, EngineError::Filter { .. }));
    }

    #[test]
    fn ordering_without_direction_falls_back_to_settings() {
        let columns = users();
        let shape = QueryShape {
            ordering: Some(Ordering {
                field: Some("name".into()),
                direction: None,
            }),
            ..Default::default()
        };
        let settings = TableSettings {
            ordering_field: Some("email".into()),
            ordering: Some(SortDirection::Asc),
            ..Default::default()
        };
        let compiled = compile_shape(SqlDialect::Postgres, &shape, &settings, &columns, "users").unwrap();
        assert_eq!(compiled.order_by.as_deref(), Some("\"users\".\"email\" ASC"));

        let unordered =
            compile_shape(SqlDialect::Postgres, &shape, &TableSettings::default(), &columns, "users").unwrap();
        assert!(unordered.order_by.is_none());
    }

    #[test]
    fn ordering_respects_sortable_by() {
        let columns = users();
        let shape = QueryShape {
            ordering: Some(Ordering {
                field: Some("email".into()),
                direction: Some(SortDirection::Asc),
            }),
            ..Default::default()
        };
        let settings = TableSettings {
            sortable_by: vec!["id".into()],
            ..Default::default()
        };
        assert!(compile_shape(SqlDialect::Postgres, &shape, &settings, &columns, "users").is_err());
    }

    #[test]
    fn autocomplete_matches_prefix_or_everything() {
        let columns = users();
        let request = AutocompleteRequest {
            fields: vec!["name".into(), "id".into()],
            value: "Al".into(),
        };
        let compiled = compile_autocomplete(SqlDialect::Postgres, &request, &columns, "users").unwrap();
        assert_eq!(
            compiled.where_clause.as_deref(),
            Some("\"name\" LIKE $1 OR CAST(\"id\" AS TEXT) LIKE $2")
        );

        let all = AutocompleteRequest {
            fields: vec!["name".into()],
            value: "*".into(),
        };
        let compiled = compile_autocomplete(SqlDialect::Postgres, &all, &columns, "users").unwrap();
        assert!(compiled.where_clause.is_none());
    }

    #[test]
    fn select_list_casts_custom_types_on_postgres() {
        let columns = users();
        let fields: Vec<String> = vec!["id".into(), "state".into()];
        assert_eq!(
            select_list(SqlDialect::Postgres, &fields, &columns, "users").unwrap(),
            "\"id\", CAST(\"state\" AS TEXT) AS \"state\""
        );
        assert_eq!(
            select_list(SqlDialect::MySql, &fields, &columns, "users").unwrap(),
            "`id`, `state`"
        );
    }

    #[test]
    fn empty_select_list_is_rejected_instead_of_selecting_everything() {
        let columns = users();
        let settings = TableSettings {
            list_fields: vec!["name".into()],
            excluded_fields: vec!["name".into()],
            ..Default::default()
        };
        let fields = settings.visible_fields(&columns);
        assert!(fields.is_empty());

        let err = select_list(SqlDialect::Postgres, &fields, &columns, "users").unwrap_err();
        assert!(matches!(err, EngineError::Filter { .. }));
        let missing: Vec<String> = vec!["nope".into()];
        assert!(select_list(SqlDialect::MySql, &missing, &columns, "users").is_err());
    }

    #[test]
    fn ordering_on_cast_columns_targets_the_stored_column() {
        let columns = users();
        let shape = QueryShape {
            ordering: Some(Ordering {
                field: Some("state".into()),
                direction: Some(SortDirection::Asc),
            }),
            ..Default::default()
        };
        let compiled = compile_shape(SqlDialect::Postgres, &shape, &TableSettings::default(), &columns, "users").unwrap();
        let select = select_list(SqlDialect::Postgres, &["state".to_string()], &columns, "users").unwrap();
        assert_eq!(select, "CAST(\"state\" AS TEXT) AS \"state\"");
        assert_eq!(compiled.order_by.as_deref(), Some("\"users\".\"state\" ASC"));

        let sql = format!("SELECT {} FROM \"public\".\"users\"{}", select, compiled.order_sql());
        Parser::parse_sql(&PostgreSqlDialect {}, &sql).expect("compiled SQL should parse");
    }

    #[test]
    fn numeric_columns_are_selected_as_text() {
        let amount = ColumnDescriptor::new("amount", "numeric");
        assert_eq!(
            SqlDialect::Postgres.select_expr(&amount),
            "CAST(\"amount\" AS TEXT) AS \"amount\""
        );
        assert_eq!(SqlDialect::MySql.select_expr(&amount), "`amount`");

        let total = ColumnDescriptor::new("total", "bigint");
        assert_eq!(SqlDialect::Postgres.select_expr(&total), "\"total\"");
    }

    #[test]
    fn key_condition_requires_known_columns() {
        let columns = users();
        let mut builder = SqlBuilder::new(SqlDialect::Postgres);
        let key = crate::engine::types::RowData::new().with_column("id", Value::from("42"));
        assert_eq!(
            builder.key_condition(&key, &columns, "users").unwrap(),
            "\"id\" = CAST($1 AS integer)"
        );

        let bad = crate::engine::types::RowData::new().with_column("nope", Value::Int(1));
        assert!(builder.key_condition(&bad, &columns, "users").is_err());
    }

    #[test]
    fn quotes_identifiers_per_dialect() {
        assert_eq!(SqlDialect::Postgres.quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(SqlDialect::MySql.quote_ident("we`ird"), "`we``ird`");
        assert_eq!(
            SqlDialect::Postgres.table_ref(Some("public"), "users"),
            "\"public\".\"users\""
        );
    }
}
