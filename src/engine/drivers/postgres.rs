//! PostgreSQL Driver
//!
//! Implements the DAO contract for PostgreSQL databases using SQLx.
//!
//! ## Type handling
//!
//! Columns whose types SQLx does not decode natively (enums, composites,
//! uuid, arrays) are selected as text. Text parameters headed for such
//! columns are cast back to the column's catalog type with
//! `CAST($n AS <format_type>)`, so writes never depend on implicit casts.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgPool, PgPoolOptions, PgRow, PgSslMode, Postgres};
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
    classify_custom_type, decode_json_fields, encode_json_fields, primary_keys_from_names,
    require_column, require_row_columns, ColumnDescriptor, CustomTypeRef, ForeignKeyDescriptor, PendingCustomTypes,
    PrimaryKeyDescriptor, TypeAttribute, USER_DEFINED_TYPE,
};
use crate::engine::settings::{validate_settings, TableSettings};
use crate::engine::traits::{DataAccess, Driver};
use crate::engine::types::{ConnectionConfig, ConnectionStatus, InsertedRow, QueryShape, RowData, Value};

const DIALECT: SqlDialect = SqlDialect::Postgres;

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

/// PostgreSQL driver implementation
pub struct PostgresDriver;

impl PostgresDriver {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PostgresDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for PostgresDriver {
    fn driver_id(&self) -> &'static str {
        "postgres"
    }

    fn driver_name(&self) -> &'static str {
        "PostgreSQL"
    }

    fn bind(
        &self,
        config: ConnectionConfig,
        cache: Arc<ConnectionCache>,
        options: Arc<DalConfig>,
    ) -> Arc<dyn DataAccess> {
        Arc::new(PostgresDao {
            config,
            cache,
            options,
        })
    }
}

/// DAO bound to one PostgreSQL connection configuration
pub struct PostgresDao {
    config: ConnectionConfig,
    cache: Arc<ConnectionCache>,
    options: Arc<DalConfig>,
}

impl PostgresDao {
    fn schema(&self) -> &str {
        self.config.schema.as_deref().unwrap_or("public")
    }

    fn table_ref(&self, table: &str) -> String {
        DIALECT.table_ref(Some(self.schema()), table)
    }

    /// Builds connect options from config
    fn connect_options(config: &ConnectionConfig) -> PgConnectOptions {
        let mut options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.username)
            .password(&config.password)
            .database(config.database.as_deref().unwrap_or("postgres"));

        options = match (&config.ssl_ca_path, config.ssl) {
            (Some(ca), true) => options.ssl_mode(PgSslMode::VerifyFull).ssl_root_cert(ca),
            (None, true) => options.ssl_mode(PgSslMode::Require),
            (_, false) => options.ssl_mode(PgSslMode::Disable),
        };
        options
    }

    async fn connect_pool(config: ConnectionConfig, options: Arc<DalConfig>) -> EngineResult<EnginePool> {
        let pool = PgPoolOptions::new()
            .max_connections(options.pool_max_connections)
            .acquire_timeout(options.connect_timeout())
            .connect_with(Self::connect_options(&config))
            .await
            .map_err(|e| EngineError::from_connect(e.to_string()))?;
        Ok(EnginePool::Postgres(pool))
    }

    /// Borrows the cached pool, opening it on first use
    async fn pool(&self) -> EngineResult<PgPool> {
        let handle = self
            .cache
            .get_or_create(&self.config, || {
                establish(&self.config, self.options.connect_timeout(), |effective| {
                    Self::connect_pool(effective, self.options.clone())
                })
            })
            .await?;
        Ok(handle.postgres()?.clone())
    }

    /// Helper to bind a Value to a Postgres query
    fn bind_param<'q>(query: PgQuery<'q>, value: &'q Value) -> PgQuery<'q> {
        match value {
            Value::Null => query.bind(Option::<String>::None),
            Value::Bool(b) => query.bind(b),
            Value::Int(i) => query.bind(i),
            Value::Float(f) => query.bind(f),
            Value::Text(s) => query.bind(s),
            Value::Bytes(b) => query.bind(b),
            Value::Json(j) => query.bind(j),
            // Arrays are rewritten to array literals before binding
            Value::Array(_) => query.bind(value.to_text()),
        }
    }

    fn bind_all<'q>(sql: &'q str, params: &'q [Value]) -> PgQuery<'q> {
        params
            .iter()
            .fold(sqlx::query(sql), |query, value| Self::bind_param(query, value))
    }

    /// Converts values that have no direct wire form for `column`
    fn prepare_value(value: &Value, column: &ColumnDescriptor) -> Value {
        match value {
            Value::Array(items) if !column.is_json() => Value::Text(array_literal(items)),
            other => other.clone(),
        }
    }

    /// Extracts a value from a PgRow at the given index
    ///
    /// NUMERIC never reaches here natively: it is selected as text so that
    /// precision beyond 28 digits and `NaN` survive.
    fn extract_value(row: &PgRow, idx: usize) -> EngineResult<Value> {
        let type_name = row.columns()[idx].type_info().name().to_string();

        let decoded = match type_name.as_str() {
            "INT2" => row.try_get::<Option<i16>, _>(idx).map(|v| v.map(|i| Value::Int(i as i64))),
            "INT4" => row.try_get::<Option<i32>, _>(idx).map(|v| v.map(|i| Value::Int(i as i64))),
            "INT8" => row.try_get::<Option<i64>, _>(idx).map(|v| v.map(Value::Int)),
            "FLOAT4" => row.try_get::<Option<f32>, _>(idx).map(|v| v.map(|f| Value::Float(f as f64))),
            "FLOAT8" => row.try_get::<Option<f64>, _>(idx).map(|v| v.map(Value::Float)),
            "BOOL" => row.try_get::<Option<bool>, _>(idx).map(|v| v.map(Value::Bool)),
            "JSON" | "JSONB" => row.try_get::<Option<serde_json::Value>, _>(idx).map(|v| v.map(Value::Json)),
            "BYTEA" => row.try_get::<Option<Vec<u8>>, _>(idx).map(|v| v.map(Value::Bytes)),
            // Date/Time types - convert to ISO 8601 string
            "TIMESTAMPTZ" => row
                .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx)
                .map(|v| v.map(|dt| Value::Text(dt.to_rfc3339()))),
            "TIMESTAMP" => row
                .try_get::<Option<chrono::NaiveDateTime>, _>(idx)
                .map(|v| v.map(|dt| Value::Text(dt.format("%Y-%m-%d %H:%M:%S%.f").to_string()))),
            "DATE" => row
                .try_get::<Option<chrono::NaiveDate>, _>(idx)
                .map(|v| v.map(|d| Value::Text(d.format("%Y-%m-%d").to_string()))),
            "TIME" => row
                .try_get::<Option<chrono::NaiveTime>, _>(idx)
                .map(|v| v.map(|t| Value::Text(t.format("%H:%M:%S%.f").to_string()))),
            _ => row.try_get::<Option<String>, _>(idx).map(|v| v.map(Value::Text)),
        };

        match decoded {
            Ok(value) => Ok(value.unwrap_or(Value::Null)),
            Err(e) => Err(EngineError::execution_error(format!(
                "Cannot decode column \"{}\" of type {}: {}",
                row.columns()[idx].name(),
                type_name,
                e
            ))),
        }
    }

    /// Converts a SQLx row to a generic row, decoding JSON columns
    fn convert_row(pg_row: &PgRow, columns: &[ColumnDescriptor]) -> EngineResult<RowData> {
        let mut row = RowData::new();
        for column in pg_row.columns() {
            row.columns
                .insert(column.name().to_string(), Self::extract_value(pg_row, column.ordinal())?);
        }
        decode_json_fields(columns, &mut row);
        Ok(row)
    }

    async fn fetch_rows(
        pool: &PgPool,
        sql: &str,
        params: &[Value],
        columns: &[ColumnDescriptor],
    ) -> EngineResult<Vec<RowData>> {
        debug!(sql = %sql, params = params.len(), "fetching rows");
        let rows = Self::bind_all(sql, params).fetch_all(pool).await?;
        rows.iter().map(|row| Self::convert_row(row, columns)).collect()
    }

    /// Exact count, cancelled server-side once the budget is spent
    async fn exact_count(pool: &PgPool, sql: &str, params: &[Value], budget_ms: u64) -> EngineResult<u64> {
        let mut tx = pool.begin().await?;
        sqlx::query(&format!("SET LOCAL statement_timeout = {}", budget_ms))
            .execute(&mut *tx)
            .await?;
        let row = Self::bind_all(sql, params).fetch_one(&mut *tx).await?;
        let total: i64 = row.try_get(0)?;
        tx.rollback().await?;
        Ok(total.max(0) as u64)
    }

    /// Catalog estimate: live tuple density scaled to the relation's current size
    async fn estimate_count(&self, pool: &PgPool, table: &str) -> EngineResult<u64> {
        let estimate: Option<(i64,)> = sqlx::query_as(
            r#"
            SELECT (
                CASE
                    WHEN c.relpages > 0 AND c.reltuples >= 0 THEN
                        (c.reltuples / c.relpages)
                        * (pg_relation_size(c.oid) / current_setting('block_size')::int)
                    ELSE GREATEST(c.reltuples, 0)
                END
            )::bigint
            FROM pg_class c
            JOIN pg_namespace n ON n.oid = c.relnamespace
            WHERE n.nspname = $1 AND c.relname = $2
            "#,
        )
        .bind(self.schema())
        .bind(table)
        .fetch_optional(pool)
        .await?;

        Ok(estimate.map(|(n,)| n.max(0) as u64).unwrap_or(0))
    }

    async fn enum_labels(pool: &PgPool, type_ref: &CustomTypeRef) -> EngineResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT e.enumlabel::text
            FROM pg_catalog.pg_enum e
            JOIN pg_catalog.pg_type t ON t.oid = e.enumtypid
            JOIN pg_catalog.pg_namespace n ON n.oid = t.typnamespace
            WHERE n.nspname = $1 AND t.typname = $2
            ORDER BY e.enumsortorder
            "#,
        )
        .bind(&type_ref.schema)
        .bind(&type_ref.name)
        .fetch_all(pool)
        .await?;
        Ok(rows.into_iter().map(|(label,)| label).collect())
    }

    async fn composite_attributes(pool: &PgPool, type_ref: &CustomTypeRef) -> EngineResult<Vec<TypeAttribute>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT attribute_name::text, data_type::text
            FROM information_schema.attributes
            WHERE udt_schema = $1 AND udt_name = $2
            ORDER BY ordinal_position
            "#,
        )
        .bind(&type_ref.schema)
        .bind(&type_ref.name)
        .fetch_all(pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(name, data_type)| TypeAttribute { name, data_type })
            .collect())
    }

    /// Looks up each distinct custom type once, then rewrites its columns
    async fn resolve_custom_types(
        pool: &PgPool,
        pending: &PendingCustomTypes,
        columns: &mut [ColumnDescriptor],
    ) {
        let mut resolved = HashMap::new();
        for type_ref in pending.distinct_types() {
            let labels = Self::enum_labels(pool, &type_ref).await;
            let attributes = match &labels {
                Ok(labels) if labels.is_empty() => Some(Self::composite_attributes(pool, &type_ref).await),
                _ => None,
            };
            if let Some(shape) = classify_custom_type(labels, attributes, &type_ref) {
                resolved.insert(type_ref, shape);
            }
        }
        pending.apply(columns, &resolved);
    }

    async fn primary_key_names(&self, pool: &PgPool, table: &str) -> EngineResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT a.attname::text
            FROM pg_index i
            JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey)
            JOIN pg_class c ON c.oid = i.indrelid
            JOIN pg_namespace n ON n.oid = c.relnamespace
            WHERE i.indisprimary
              AND n.nspname = $1
              AND c.relname = $2
            ORDER BY array_position(i.indkey, a.attnum)
            "#,
        )
        .bind(self.schema())
        .bind(table)
        .fetch_all(pool)
        .await?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    async fn structure(&self, pool: &PgPool, table: &str) -> EngineResult<Vec<ColumnDescriptor>> {
        #[allow(clippy::type_complexity)]
        let rows: Vec<(String, String, String, String, String, Option<String>, Option<i64>, String)> =
            sqlx::query_as(
                r#"
                SELECT
                    c.column_name::text,
                    c.data_type::text,
                    c.udt_schema::text,
                    c.udt_name::text,
                    c.is_nullable::text,
                    c.column_default::text,
                    c.character_maximum_length::bigint,
                    format_type(a.atttypid, a.atttypmod)
                FROM information_schema.columns c
                JOIN pg_catalog.pg_namespace n ON n.nspname = c.table_schema
                JOIN pg_catalog.pg_class cl ON cl.relnamespace = n.oid AND cl.relname = c.table_name
                JOIN pg_catalog.pg_attribute a ON a.attrelid = cl.oid AND a.attname = c.column_name
                WHERE c.table_schema = $1 AND c.table_name = $2
                ORDER BY c.ordinal_position
                "#,
            )
            .bind(self.schema())
            .bind(table)
            .fetch_all(pool)
            .await?;

        if rows.is_empty() {
            return Err(EngineError::table_not_found(table));
        }

        let mut pending = PendingCustomTypes::new();
        let mut columns: Vec<ColumnDescriptor> = rows
            .into_iter()
            .map(
                |(name, data_type, udt_schema, udt_name, is_nullable, default_value, max_length, native)| {
                    if data_type == USER_DEFINED_TYPE {
                        pending.record(
                            name.clone(),
                            CustomTypeRef {
                                schema: udt_schema,
                                name: udt_name,
                            },
                        );
                    }
                    ColumnDescriptor {
                        column_name: name,
                        data_type,
                        data_type_params: None,
                        column_default: default_value,
                        allow_null: is_nullable == "YES",
                        character_maximum_length: max_length,
                        native_type: Some(native),
                    }
                },
            )
            .collect();

        if !pending.is_empty() {
            Self::resolve_custom_types(pool, &pending, &mut columns).await;
        }
        Ok(columns)
    }
}

/// Renders a Postgres array literal, e.g. `{1,"a b",NULL}`
fn array_literal(items: &[Value]) -> String {
    let rendered: Vec<String> = items
        .iter()
        .map(|item| match item {
            Value::Null => "NULL".to_string(),
            Value::Array(nested) => array_literal(nested),
            other => {
                let text = other.to_text().unwrap_or_default();
                format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
            }
        })
        .collect();
    format!("{{{}}}", rendered.join(","))
}

#[async_trait]
impl DataAccess for PostgresDao {
    fn driver_id(&self) -> &'static str {
        "postgres"
    }

    async fn test_connection(&self) -> ConnectionStatus {
        probe(self.options.test_timeout(), async {
            let pool = self.pool().await?;
            sqlx::query("SELECT 1").execute(&pool).await?;
            Ok::<_, EngineError>(())
        })
        .await
    }

    #[instrument(skip(self), fields(schema = %self.schema()))]
    async fn get_table_structure(&self, table: &str) -> EngineResult<Vec<ColumnDescriptor>> {
        let pool = self.pool().await?;
        self.structure(&pool, table).await
    }

    async fn get_primary_columns(&self, table: &str) -> EngineResult<Vec<PrimaryKeyDescriptor>> {
        let pool = self.pool().await?;
        let columns = self.structure(&pool, table).await?;
        let names = self.primary_key_names(&pool, table).await?;
        Ok(primary_keys_from_names(&columns, names))
    }

    async fn get_foreign_keys(&self, table: &str) -> EngineResult<Vec<ForeignKeyDescriptor>> {
        let pool = self.pool().await?;
        let rows: Vec<(String, String, String, String)> = sqlx::query_as(
            r#"
            SELECT
                kcu.column_name::text,
                ccu.table_name::text AS foreign_table_name,
                ccu.column_name::text AS foreign_column_name,
                tc.constraint_name::text
            FROM
                information_schema.table_constraints AS tc
                JOIN information_schema.key_column_usage AS kcu
                  ON tc.constraint_name = kcu.constraint_name
                  AND tc.table_schema = kcu.table_schema
                JOIN information_schema.constraint_column_usage AS ccu
                  ON ccu.constraint_name = tc.constraint_name
                  AND ccu.table_schema = tc.table_schema
            WHERE tc.constraint_type = 'FOREIGN KEY'
                AND tc.table_schema = $1
                AND tc.table_name = $2
            ORDER BY tc.constraint_name, kcu.ordinal_position
            "#,
        )
        .bind(self.schema())
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

    #[instrument(skip(self, shape, settings), fields(schema = %self.schema()))]
    async fn get_rows(
        &self,
        table: &str,
        shape: &QueryShape,
        settings: &TableSettings,
        page: PageRequest,
    ) -> EngineResult<PageResult> {
        let pool = self.pool().await?;
        let columns = self.structure(&pool, table).await?;
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
        let count_sql = format!("SELECT COUNT(*) FROM {}{}", table_ref, compiled.where_sql());

        let (rows, count) = tokio::join!(
            Self::fetch_rows(&pool, &rows_sql, &compiled.params, &columns),
            count_with_fallback(
                Self::exact_count(&pool, &count_sql, &compiled.params, self.options.count_timeout_ms),
                self.options.count_timeout(),
                || self.estimate_count(&pool, table),
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
        let columns = self.structure(&pool, table).await?;
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
        row.map(|row| Self::convert_row(&row, &columns)).transpose()
    }

    #[instrument(skip(self, row), fields(schema = %self.schema()))]
    async fn add_row(&self, table: &str, row: &RowData) -> EngineResult<InsertedRow> {
        let pool = self.pool().await?;
        let columns = self.structure(&pool, table).await?;
        require_row_columns(&columns, table, row)?;
        let primary_keys = self.primary_key_names(&pool, table).await?;

        let encoded = encode_json_fields(&columns, row);
        let mut builder = SqlBuilder::new(DIALECT);
        let mut names = Vec::with_capacity(encoded.columns.len());
        let mut placeholders = Vec::with_capacity(encoded.columns.len());
        for (name, value) in &encoded.columns {
            let column = require_column(&columns, table, name)?;
            names.push(DIALECT.quote_ident(name));
            placeholders.push(builder.bind_for_column(&Self::prepare_value(value, column), column));
        }

        let all_fields: Vec<String> = columns.iter().map(|c| c.column_name.clone()).collect();
        let returning = if primary_keys.is_empty() {
            select_list(DIALECT, &all_fields, &columns, table)?
        } else {
            select_list(DIALECT, &primary_keys, &columns, table)?
        };

        let sql = if names.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES RETURNING {}", self.table_ref(table), returning)
        } else {
            format!(
                "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
                self.table_ref(table),
                names.join(", "),
                placeholders.join(", "),
                returning
            )
        };

        let inserted = Self::bind_all(&sql, builder.params()).fetch_one(&pool).await?;
        let inserted = Self::convert_row(&inserted, &columns)?;
        Ok(if primary_keys.is_empty() {
            InsertedRow::Row(inserted)
        } else {
            InsertedRow::PrimaryKey(inserted)
        })
    }

    #[instrument(skip(self, row, key), fields(schema = %self.schema()))]
    async fn update_row(&self, table: &str, row: &RowData, key: &RowData) -> EngineResult<RowData> {
        let pool = self.pool().await?;
        let columns = self.structure(&pool, table).await?;
        require_row_columns(&columns, table, row)?;

        let all_fields: Vec<String> = columns.iter().map(|c| c.column_name.clone()).collect();
        let returning = select_list(DIALECT, &all_fields, &columns, table)?;

        let encoded = encode_json_fields(&columns, row);
        let mut builder = SqlBuilder::new(DIALECT);
        let mut assignments = Vec::with_capacity(encoded.columns.len());
        for (name, value) in &encoded.columns {
            let column = require_column(&columns, table, name)?;
            let placeholder = builder.bind_for_column(&Self::prepare_value(value, column), column);
            assignments.push(format!("{} = {}", DIALECT.quote_ident(name), placeholder));
        }
        let condition = builder.key_condition(key, &columns, table)?;

        let sql = if assignments.is_empty() {
            format!("SELECT {} FROM {} WHERE {} LIMIT 1", returning, self.table_ref(table), condition)
        } else {
            format!(
                "UPDATE {} SET {} WHERE {} RETURNING {}",
                self.table_ref(table),
                assignments.join(", "),
                condition,
                returning
            )
        };

        let updated = Self::bind_all(&sql, builder.params())
            .fetch_optional(&pool)
            .await?
            .ok_or_else(|| EngineError::row_not_found(table))?;
        Self::convert_row(&updated, &columns)
    }

    #[instrument(skip(self, key), fields(schema = %self.schema()))]
    async fn delete_row(&self, table: &str, key: &RowData) -> EngineResult<RowData> {
        let pool = self.pool().await?;
        let columns = self.structure(&pool, table).await?;

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
