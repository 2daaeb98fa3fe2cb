//! MySQL Driver
//!
//! Implements the DAO contract for MySQL/MariaDB databases using SQLx.
//!
//! Enum and set labels are carried inline by `COLUMN_TYPE`, so structure
//! introspection needs no secondary lookups here.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::mysql::{MySql, MySqlArguments, MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow, MySqlSslMode};
use sqlx::{Column, Row, TypeInfo};
use tracing::{debug, instrument};

use crate::config::DalConfig;
use crate::engine::connection_cache::{establish, probe, ConnectionCache, EnginePool};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::filter::{compile_autocomplete, compile_shape, select_list, SqlBuilder, SqlDialect};
use crate::engine::pagination::{
    count_with_fallback, PageRequest, PageResult, Pagination, ReportedPagination,
};
use crate::engine::schema::{
    decode_json_fields, encode_json_fields, primary_keys_from_names, require_column, require_row_columns,
    ColumnDescriptor, DataTypeParams, ForeignKeyDescriptor, PrimaryKeyDescriptor, ENUM_TYPE,
};
use crate::engine::settings::{validate_settings, TableSettings};
use crate::engine::traits::{DataAccess, Driver};
use crate::engine::types::{ConnectionConfig, ConnectionStatus, InsertedRow, QueryShape, RowData, Value};

const DIALECT: SqlDialect = SqlDialect::MySql;

type MySqlQuery<'q> = sqlx::query::Query<'q, MySql, MySqlArguments>;

/// MySQL driver implementation
pub struct MySqlDriver;

impl MySqlDriver {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MySqlDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for MySqlDriver {
    fn driver_id(&self) -> &'static str {
        "mysql"
    }

    fn driver_name(&self) -> &'static str {
        "MySQL / MariaDB"
    }

    fn bind(
        &self,
        config: ConnectionConfig,
        cache: Arc<ConnectionCache>,
        options: Arc<DalConfig>,
    ) -> Arc<dyn DataAccess> {
        Arc::new(MySqlDao {
            config,
            cache,
            options,
        })
    }
}

/// Structure plus the auto-increment column, if any
struct TableStructure {
    columns: Vec<ColumnDescriptor>,
    auto_increment: Option<String>,
}

/// DAO bound to one MySQL connection configuration
pub struct MySqlDao {
    config: ConnectionConfig,
    cache: Arc<ConnectionCache>,
    options: Arc<DalConfig>,
}

impl MySqlDao {
    fn table_ref(&self, table: &str) -> String {
        DIALECT.table_ref(None, table)
    }

    /// Builds connect options from config
    fn connect_options(config: &ConnectionConfig) -> MySqlConnectOptions {
        let mut options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.username)
            .password(&config.password)
            .database(config.database.as_deref().unwrap_or("mysql"));

        options = match (&config.ssl_ca_path, config.ssl) {
            (Some(ca), true) => options.ssl_mode(MySqlSslMode::VerifyCa).ssl_ca(ca),
            (None, true) => options.ssl_mode(MySqlSslMode::Required),
            (_, false) => options.ssl_mode(MySqlSslMode::Disabled),
        };
        options
    }

    async fn connect_pool(config: ConnectionConfig, options: Arc<DalConfig>) -> EngineResult<EnginePool> {
        let pool = MySqlPoolOptions::new()
            .max_connections(options.pool_max_connections)
            .acquire_timeout(options.connect_timeout())
            .connect_with(Self::connect_options(&config))
            .await
            .map_err(|e| EngineError::from_connect(e.to_string()))?;
        Ok(EnginePool::MySql(pool))
    }

    async fn pool(&self) -> EngineResult<MySqlPool> {
        let handle = self
            .cache
            .get_or_create(&self.config, || {
                establish(&self.config, self.options.connect_timeout(), |effective| {
                    Self::connect_pool(effective, self.options.clone())
                })
            })
            .await?;
        Ok(handle.mysql()?.clone())
    }

    /// Helper to bind a Value to a MySQL query
    fn bind_param<'q>(query: MySqlQuery<'q>, value: &'q Value) -> MySqlQuery<'q> {
        match value {
            Value::Null => query.bind(Option::<String>::None),
            Value::Bool(b) => query.bind(b),
            Value::Int(i) => query.bind(i),
            Value::Float(f) => query.bind(f),
            Value::Text(s) => query.bind(s),
            Value::Bytes(b) => query.bind(b),
            Value::Json(j) => query.bind(j),
            // No native arrays: stored as JSON text
            Value::Array(_) => query.bind(value.to_text()),
        }
    }

    fn bind_all<'q>(sql: &'q str, params: &'q [Value]) -> MySqlQuery<'q> {
        params
            .iter()
            .fold(sqlx::query(sql), |query, value| Self::bind_param(query, value))
    }

    /// Extracts a value from a MySqlRow at the given index
    fn extract_value(row: &MySqlRow, idx: usize) -> Value {
        // JSON decoding accepts any string column, so gate it on the wire type
        if is_json_wire_type(row.columns()[idx].type_info().name()) {
            return match row.try_get::<Option<serde_json::Value>, _>(idx) {
                Ok(v) => v.map(Value::Json).unwrap_or(Value::Null),
                Err(_) => row
                    .try_get_unchecked::<Option<String>, _>(idx)
                    .ok()
                    .flatten()
                    .map(Value::Text)
                    .unwrap_or(Value::Null),
            };
        }

        // Try u64 first for BIGINT UNSIGNED columns
        if let Ok(v) = row.try_get::<Option<u64>, _>(idx) {
            return v
                .map(|u| i64::try_from(u).map(Value::Int).unwrap_or_else(|_| Value::Text(u.to_string())))
                .unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return v.map(Value::Int).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
            return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<u32>, _>(idx) {
            return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i16>, _>(idx) {
            return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i8>, _>(idx) {
            return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
            return v.map(Value::Bool).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            return v.map(Value::Float).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<f32>, _>(idx) {
            return v.map(|f| Value::Float(f as f64)).unwrap_or(Value::Null);
        }
        // Decimals keep their scale as text
        if let Ok(v) = row.try_get::<Option<Decimal>, _>(idx) {
            return v.map(|d| Value::Text(d.to_string())).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
            return v.map(Value::Text).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx) {
            return v.map(|dt| Value::Text(dt.to_rfc3339())).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::NaiveDateTime>, _>(idx) {
            return v.map(|dt| Value::Text(dt.format("%Y-%m-%d %H:%M:%S").to_string())).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::NaiveDate>, _>(idx) {
            return v.map(|d| Value::Text(d.format("%Y-%m-%d").to_string())).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::NaiveTime>, _>(idx) {
            return v.map(|t| Value::Text(t.format("%H:%M:%S").to_string())).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
            return v.map(Value::Bytes).unwrap_or(Value::Null);
        }
        // ENUM and SET report string-compatible types only loosely
        if let Ok(v) = row.try_get_unchecked::<Option<String>, _>(idx) {
            return v.map(Value::Text).unwrap_or(Value::Null);
        }

        Value::Null
    }

    fn convert_row(mysql_row: &MySqlRow, columns: &[ColumnDescriptor]) -> RowData {
        let mut row = RowData::new();
        for column in mysql_row.columns() {
            row.columns
                .insert(column.name().to_string(), Self::extract_value(mysql_row, column.ordinal()));
        }
        decode_json_fields(columns, &mut row);
        row
    }

    async fn fetch_rows(
        pool: &MySqlPool,
        sql: &str,
        params: &[Value],
        columns: &[ColumnDescriptor],
    ) -> EngineResult<Vec<RowData>> {
        debug!(sql = %sql, params = params.len(), "fetching rows");
        let rows = Self::bind_all(sql, params).fetch_all(pool).await?;
        Ok(rows.iter().map(|row| Self::convert_row(row, columns)).collect())
    }

    /// Exact count; the optimizer hint aborts it server-side once the budget is spent
    async fn exact_count(pool: &MySqlPool, sql: &str, params: &[Value]) -> EngineResult<u64> {
        let row = Self::bind_all(sql, params).fetch_one(pool).await?;
        let total: i64 = row.try_get(0)?;
        Ok(total.max(0) as u64)
    }

    async fn estimate_count(pool: &MySqlPool, table: &str) -> EngineResult<u64> {
        let count_row: Option<(Option<u64>,)> = sqlx::query_as(
            r#"
            SELECT TABLE_ROWS
            FROM information_schema.TABLES
            WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
            "#,
        )
        .bind(table)
        .fetch_optional(pool)
        .await?;
        Ok(count_row.and_then(|(rows,)| rows).unwrap_or(0))
    }

    async fn structure(pool: &MySqlPool, table: &str) -> EngineResult<TableStructure> {
        // Cast to CHAR to avoid BINARY type mismatch with Rust String
        #[allow(clippy::type_complexity)]
        let rows: Vec<(String, String, String, String, Option<String>, Option<i64>, String)> = sqlx::query_as(
            r#"
            SELECT
                CAST(c.COLUMN_NAME AS CHAR) AS column_name,
                CAST(c.DATA_TYPE AS CHAR) AS data_type,
                CAST(c.COLUMN_TYPE AS CHAR) AS column_type,
                CAST(c.IS_NULLABLE AS CHAR) AS is_nullable,
                CAST(c.COLUMN_DEFAULT AS CHAR) AS column_default,
                CAST(c.CHARACTER_MAXIMUM_LENGTH AS SIGNED) AS max_length,
                CAST(c.EXTRA AS CHAR) AS extra
            FROM information_schema.COLUMNS c
            WHERE c.TABLE_SCHEMA = DATABASE() AND c.TABLE_NAME = ?
            ORDER BY c.ORDINAL_POSITION
            "#,
        )
        .bind(table)
        .fetch_all(pool)
        .await?;

        if rows.is_empty() {
            return Err(EngineError::table_not_found(table));
        }

        let mut auto_increment = None;
        let columns = rows
            .into_iter()
            .map(|(name, data_type, column_type, is_nullable, default_value, max_length, extra)| {
                if extra.to_ascii_lowercase().contains("auto_increment") {
                    auto_increment = Some(name.clone());
                }
                let data_type = data_type.to_ascii_lowercase();
                let data_type_params = match data_type.as_str() {
                    "enum" | "set" => Some(DataTypeParams::Labels(parse_type_labels(&column_type))),
                    _ => None,
                };
                ColumnDescriptor {
                    column_name: name,
                    data_type: if data_type == "enum" { ENUM_TYPE.to_string() } else { data_type },
                    data_type_params,
                    column_default: default_value,
                    allow_null: is_nullable == "YES",
                    character_maximum_length: max_length,
                    native_type: Some(column_type),
                }
            })
            .collect();

        Ok(TableStructure {
            columns,
            auto_increment,
        })
    }

    async fn primary_key_names(pool: &MySqlPool, table: &str) -> EngineResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT CAST(COLUMN_NAME AS CHAR)
            FROM information_schema.KEY_COLUMN_USAGE
            WHERE TABLE_SCHEMA = DATABASE()
              AND TABLE_NAME = ?
              AND CONSTRAINT_NAME = 'PRIMARY'
            ORDER BY ORDINAL_POSITION
            "#,
        )
        .bind(table)
        .fetch_all(pool)
        .await?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }
}

/// MySQL has no array columns; arrays only reach JSON columns, already encoded
fn reject_array(value: &Value, column: &ColumnDescriptor, table: &str) -> EngineResult<()> {
    match value {
        Value::Array(_) => Err(EngineError::not_supported(format!(
            "Column \"{}\" of \"{}\" ({}) cannot store an array",
            column.column_name, table, column.data_type
        ))),
        _ => Ok(()),
    }
}

fn is_json_wire_type(type_name: &str) -> bool {
    type_name.eq_ignore_ascii_case("JSON")
}

/// Parses the labels of an `enum('a','b')` or `set(...)` column type
fn parse_type_labels(column_type: &str) -> Vec<String> {
    let (Some(start), Some(end)) = (column_type.find('('), column_type.rfind(')')) else {
        return Vec::new();
    };
    if end <= start {
        return Vec::new();
    }

    let mut labels = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    let mut chars = column_type[start + 1..end].chars().peekable();

    while let Some(ch) = chars.next() {
        match (ch, in_quote) {
            ('\'', false) => in_quote = true,
            ('\'', true) if chars.peek() == Some(&'\'') => {
                chars.next();
                current.push('\'');
            }
            ('\'', true) => {
                in_quote = false;
                labels.push(std::mem::take(&mut current));
            }
            ('\\', true) => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            (_, true) => current.push(ch),
            _ => {}
        }
    }
    labels
}

/// Key values after an update, so the row can be read back under its new key
fn key_after_update(key: &RowData, row: &RowData) -> RowData {
    let mut updated = key.clone();
    for (name, value) in updated.columns.iter_mut() {
        if let Some(new_value) = row.get(name) {
            *value = new_value.clone();
        }
    }
    updated
}

#[async_trait]
impl DataAccess for MySqlDao {
    fn driver_id(&self) -> &'static str {
        "mysql"
    }

    async fn test_connection(&self) -> ConnectionStatus {
        probe(self.options.test_timeout(), async {
            let pool = self.pool().await?;
            sqlx::query("SELECT 1").execute(&pool).await?;
            Ok::<_, EngineError>(())
        })
        .await
    }

    #[instrument(skip(self))]
    async fn get_table_structure(&self, table: &str) -> EngineResult<Vec<ColumnDescriptor>> {
        let pool = self.pool().await?;
        Ok(Self::structure(&pool, table).await?.columns)
    }

    async fn get_primary_columns(&self, table: &str) -> EngineResult<Vec<PrimaryKeyDescriptor>> {
        let pool = self.pool().await?;
        let structure = Self::structure(&pool, table).await?;
        let names = Self::primary_key_names(&pool, table).await?;
        Ok(primary_keys_from_names(&structure.columns, names))
    }

    async fn get_foreign_keys(&self, table: &str) -> EngineResult<Vec<ForeignKeyDescriptor>> {
        let pool = self.pool().await?;
        let rows: Vec<(String, String, String, String)> = sqlx::query_as(
            r#"
            SELECT
                CAST(COLUMN_NAME AS CHAR),
                CAST(REFERENCED_TABLE_NAME AS CHAR),
                CAST(REFERENCED_COLUMN_NAME AS CHAR),
                CAST(CONSTRAINT_NAME AS CHAR)
            FROM information_schema.KEY_COLUMN_USAGE
            WHERE TABLE_SCHEMA = DATABASE()
              AND TABLE_NAME = ?
              AND REFERENCED_TABLE_NAME IS NOT NULL
            ORDER BY CONSTRAINT_NAME, ORDINAL_POSITION
            "#,
        )
        .bind(table)
        .fetch_all(&pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(column_name, referenced_table_name, referenced_column_name, constraint_name)| ForeignKeyDescriptor {
                    column_name,
                    referenced_table_name,
                    referenced_column_name,
                    constraint_name,
                },
            )
            .collect())
    }

    #[instrument(skip(self, shape, settings))]
    async fn get_rows(
        &self,
        table: &str,
        shape: &QueryShape,
        settings: &TableSettings,
        page: PageRequest,
    ) -> EngineResult<PageResult> {
        let pool = self.pool().await?;
        let columns = Self::structure(&pool, table).await?.columns;
        let fields = settings.visible_fields(&columns);
        let select = select_list(DIALECT, &fields, &columns, table)?;
        let table_ref = self.table_ref(table);

        if let Some(request) = &shape.autocomplete {
            let compiled = compile_autocomplete(DIALECT, request, &columns, table)?;
            let sql = format!(
                "SELECT {} FROM {}{} LIMIT {}",
                select,
                table_ref,
                compiled.where_sql(),
                self.options.autocomplete_row_limit
            );
            let rows = Self::fetch_rows(&pool, &sql, &compiled.params, &columns).await?;
            return Ok(PageResult::sample(rows));
        }

        let compiled = compile_shape(DIALECT, shape, settings, &columns, table)?;
        let window = page.resolve(settings, self.options.default_page_size);

        let rows_sql = format!(
            "SELECT {} FROM {}{}{} LIMIT {} OFFSET {}",
            select,
            table_ref,
            compiled.where_sql(),
            compiled.order_sql(),
            window.limit(),
            window.offset()
        );
        let count_sql = format!(
            "SELECT /*+ MAX_EXECUTION_TIME({}) */ COUNT(*) FROM {}{}",
            self.options.count_timeout_ms,
            table_ref,
            compiled.where_sql()
        );

        let (rows, count) = tokio::join!(
            Self::fetch_rows(&pool, &rows_sql, &compiled.params, &columns),
            count_with_fallback(
                Self::exact_count(&pool, &count_sql, &compiled.params),
                self.options.count_timeout(),
                || Self::estimate_count(&pool, table),
            ),
        );

        Ok(PageResult {
            rows: rows?,
            pagination: Some(Pagination::resolve(ReportedPagination::default(), count.total, window)),
            large_dataset: count.is_large(self.options.large_dataset_threshold),
        })
    }

    async fn get_row_by_primary_key(
        &self,
        table: &str,
        key: &RowData,
        settings: &TableSettings,
    ) -> EngineResult<Option<RowData>> {
        let pool = self.pool().await?;
        let columns = Self::structure(&pool, table).await?.columns;
        let fields = settings.visible_fields(&columns);

        let mut builder = SqlBuilder::new(DIALECT);
        let condition = builder.key_condition(key, &columns, table)?;
        let sql = format!(
            "SELECT {} FROM {} WHERE {} LIMIT 1",
            select_list(DIALECT, &fields, &columns, table)?,
            self.table_ref(table),
            condition
        );

        let row = Self::bind_all(&sql, builder.params()).fetch_optional(&pool).await?;
        Ok(row.map(|row| Self::convert_row(&row, &columns)))
    }

    #[instrument(skip(self, row))]
    async fn add_row(&self, table: &str, row: &RowData) -> EngineResult<InsertedRow> {
        let pool = self.pool().await?;
        let structure = Self::structure(&pool, table).await?;
        let columns = &structure.columns;
        require_row_columns(columns, table, row)?;
        let primary_keys = Self::primary_key_names(&pool, table).await?;

        let encoded = encode_json_fields(columns, row);
        let mut builder = SqlBuilder::new(DIALECT);
        let mut names = Vec::with_capacity(encoded.columns.len());
        let mut placeholders = Vec::with_capacity(encoded.columns.len());
        for (name, value) in &encoded.columns {
            let column = require_column(columns, table, name)?;
            reject_array(value, column, table)?;
            names.push(DIALECT.quote_ident(name));
            placeholders.push(builder.bind_for_column(value, column));
        }

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table_ref(table),
            names.join(", "),
            placeholders.join(", ")
        );
        let result = Self::bind_all(&sql, builder.params()).execute(&pool).await?;

        if primary_keys.is_empty() {
            return Ok(InsertedRow::Row(row.clone()));
        }

        let mut key = RowData::new();
        for name in primary_keys {
            let value = match row.get(&name) {
                Some(value) if !value.is_null() => value.clone(),
                _ if structure.auto_increment.as_deref() == Some(name.as_str()) => {
                    Value::Int(result.last_insert_id() as i64)
                }
                _ => Value::Null,
            };
            key.columns.insert(name, value);
        }
        Ok(InsertedRow::PrimaryKey(key))
    }

    #[instrument(skip(self, row, key))]
    async fn update_row(&self, table: &str, row: &RowData, key: &RowData) -> EngineResult<RowData> {
        let pool = self.pool().await?;
        let columns = Self::structure(&pool, table).await?.columns;
        require_row_columns(&columns, table, row)?;

        let encoded = encode_json_fields(&columns, row);
        let mut builder = SqlBuilder::new(DIALECT);
        let mut assignments = Vec::with_capacity(encoded.columns.len());
        for (name, value) in &encoded.columns {
            let column = require_column(&columns, table, name)?;
            reject_array(value, column, table)?;
            let placeholder = builder.bind_for_column(value, column);
            assignments.push(format!("{} = {}", DIALECT.quote_ident(name), placeholder));
        }
        let condition = builder.key_condition(key, &columns, table)?;

        if !assignments.is_empty() {
            let sql = format!(
                "UPDATE {} SET {} WHERE {}",
                self.table_ref(table),
                assignments.join(", "),
                condition
            );
            Self::bind_all(&sql, builder.params()).execute(&pool).await?;
        }

        // MySQL reports zero affected rows for no-op updates, so read back instead
        let all_fields: Vec<String> = columns.iter().map(|c| c.column_name.clone()).collect();
        let mut reader = SqlBuilder::new(DIALECT);
        let condition = reader.key_condition(&key_after_update(key, row), &columns, table)?;
        let sql = format!(
            "SELECT {} FROM {} WHERE {} LIMIT 1",
            select_list(DIALECT, &all_fields, &columns, table)?,
            self.table_ref(table),
            condition
        );
        let updated = Self::bind_all(&sql, reader.params())
            .fetch_optional(&pool)
            .await?
            .ok_or_else(|| EngineError::row_not_found(table))?;
        Ok(Self::convert_row(&updated, &columns))
    }

    #[instrument(skip(self, key))]
    async fn delete_row(&self, table: &str, key: &RowData) -> EngineResult<RowData> {
        let pool = self.pool().await?;
        let columns = Self::structure(&pool, table).await?.columns;

        let mut builder = SqlBuilder::new(DIALECT);
        let condition = builder.key_condition(key, &columns, table)?;
        let sql = format!("DELETE FROM {} WHERE {}", self.table_ref(table), condition);

        let result = Self::bind_all(&sql, builder.params()).execute(&pool).await?;
        if result.rows_affected() == 0 {
            return Err(EngineError::row_not_found(table));
        }
        Ok(key.clone())
    }

    async fn validate_settings(&self, settings: &TableSettings, table: &str) -> EngineResult<Vec<String>> {
        let columns = self.get_table_structure(table).await?;
        Ok(validate_settings(settings, table, &columns))
    }
}
