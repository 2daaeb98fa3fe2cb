//! MongoDB Driver
//!
//! Implements the DAO contract for MongoDB using the official MongoDB driver.
//!
//! Collections are schemaless: the structure is inferred from a sample of
//! documents, `_id` is the only primary key and there are no foreign keys.
//! Filters compile to a query document instead of SQL.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, Bson, Document};
use mongodb::options::{ClientOptions, Credential, ServerAddress, Tls, TlsOptions};
use mongodb::{Client, Collection, Database};
use tracing::{debug, instrument};

use crate::config::DalConfig;
use crate::engine::connection_cache::{establish, probe, ConnectionCache, EnginePool};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::filter::{allowed_field, parse_filters, resolve_ordering, FilterOperator, ParsedFilter};
use crate::engine::pagination::{
    count_with_fallback, PageRequest, PageResult, Pagination, ReportedPagination,
};
use crate::engine::schema::{ColumnDescriptor, ForeignKeyDescriptor, PrimaryKeyDescriptor};
use crate::engine::settings::{validate_settings, TableSettings};
use crate::engine::traits::{DataAccess, Driver};
use crate::engine::types::{
    AutocompleteRequest, ConnectionConfig, ConnectionStatus, InsertedRow, QueryShape, RowData, SortDirection, Value,
};

const ID_FIELD: &str = "_id";
const OBJECT_ID_TYPE: &str = "ObjectId";
const MIXED_TYPE: &str = "mixed";

/// MongoDB driver implementation
pub struct MongoDriver;

impl MongoDriver {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MongoDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for MongoDriver {
    fn driver_id(&self) -> &'static str {
        "mongodb"
    }

    fn driver_name(&self) -> &'static str {
        "MongoDB"
    }

    fn bind(
        &self,
        config: ConnectionConfig,
        cache: Arc<ConnectionCache>,
        options: Arc<DalConfig>,
    ) -> Arc<dyn DataAccess> {
        Arc::new(MongoDao {
            config,
            cache,
            options,
        })
    }
}

/// DAO bound to one MongoDB deployment and database
pub struct MongoDao {
    config: ConnectionConfig,
    cache: Arc<ConnectionCache>,
    options: Arc<DalConfig>,
}

impl MongoDao {
    fn database_name(&self) -> &str {
        self.config.database.as_deref().unwrap_or("test")
    }

    /// Builds client options from config
    fn client_options(config: &ConnectionConfig, options: &DalConfig) -> ClientOptions {
        let mut client_options = ClientOptions::default();
        client_options.hosts = vec![ServerAddress::Tcp {
            host: config.host.clone(),
            port: Some(config.port),
        }];
        if !config.username.is_empty() {
            let mut credential = Credential::default();
            credential.username = Some(config.username.clone());
            credential.password = Some(config.password.clone());
            credential.source = Some("admin".to_string());
            client_options.credential = Some(credential);
        }
        if config.ssl {
            let mut tls = TlsOptions::default();
            tls.ca_file_path = config.ssl_ca_path.as_ref().map(PathBuf::from);
            client_options.tls = Some(Tls::Enabled(tls));
        }
        client_options.connect_timeout = Some(options.connect_timeout());
        client_options.server_selection_timeout = Some(options.connect_timeout());
        client_options.max_pool_size = Some(options.pool_max_connections);
        client_options.app_name = Some("datagate".to_string());
        client_options
    }

    async fn connect_client(config: ConnectionConfig, options: Arc<DalConfig>) -> EngineResult<EnginePool> {
        let client = Client::with_options(Self::client_options(&config, &options))
            .map_err(|e| EngineError::connection_failed(e.to_string()))?;

        // The driver connects lazily; ping so bad endpoints fail here
        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| EngineError::from_connect(e.to_string()))?;
        Ok(EnginePool::Mongo(client))
    }

    async fn database(&self) -> EngineResult<Database> {
        let handle = self
            .cache
            .get_or_create(&self.config, || {
                establish(&self.config, self.options.connect_timeout(), |effective| {
                    Self::connect_client(effective, self.options.clone())
                })
            })
            .await?;
        Ok(handle.mongo()?.database(self.database_name()))
    }

    /// The collection, or a schema error when it does not exist
    async fn collection(&self, table: &str) -> EngineResult<Collection<Document>> {
        let database = self.database().await?;
        let names = database
            .list_collection_names()
            .filter(doc! { "name": table })
            .await?;
        if names.is_empty() {
            return Err(EngineError::table_not_found(table));
        }
        Ok(database.collection::<Document>(table))
    }

    /// Infers column descriptors from a sample of documents
    async fn structure(&self, collection: &Collection<Document>) -> EngineResult<Vec<ColumnDescriptor>> {
        let sample_size = i64::try_from(self.options.structure_sample_size).unwrap_or(i64::MAX);
        let documents: Vec<Document> = collection
            .find(doc! {})
            .sort(doc! { "_id": 1 })
            .limit(sample_size)
            .await?
            .try_collect()
            .await?;
        Ok(infer_columns(&documents))
    }
}

fn bson_type_name(value: &Bson) -> &'static str {
    match value {
        Bson::Null => "null",
        Bson::Boolean(_) => "boolean",
        Bson::Int32(_) => "int32",
        Bson::Int64(_) => "int64",
        Bson::Double(_) => "double",
        Bson::String(_) => "string",
        Bson::ObjectId(_) => OBJECT_ID_TYPE,
        Bson::DateTime(_) => "datetime",
        Bson::Array(_) => "array",
        Bson::Document(_) => "document",
        Bson::Binary(_) => "binary",
        Bson::Decimal128(_) => "decimal",
        _ => MIXED_TYPE,
    }
}

/// Union of sampled fields, `_id` first, then by name
fn infer_columns(documents: &[Document]) -> Vec<ColumnDescriptor> {
    let mut fields: HashMap<String, &'static str> = HashMap::new();
    for document in documents {
        for (key, value) in document.iter() {
            let type_name = bson_type_name(value);
            match fields.get(key.as_str()).copied() {
                None | Some("null") => {
                    fields.insert(key.clone(), type_name);
                }
                Some(existing) if existing != type_name && type_name != "null" => {
                    fields.insert(key.clone(), MIXED_TYPE);
                }
                Some(_) => {}
            }
        }
    }
    fields.entry(ID_FIELD.to_string()).or_insert(OBJECT_ID_TYPE);

    let mut columns: Vec<ColumnDescriptor> = fields
        .into_iter()
        .map(|(name, data_type)| {
            let mut column = ColumnDescriptor::new(name, data_type);
            column.allow_null = column.column_name != ID_FIELD;
            column
        })
        .collect();

    // Sort with _id first
    columns.sort_by(|a, b| {
        if a.column_name == ID_FIELD {
            std::cmp::Ordering::Less
        } else if b.column_name == ID_FIELD {
            std::cmp::Ordering::Greater
        } else {
            a.column_name.cmp(&b.column_name)
        }
    });
    columns
}

/// Converts a BSON value to our universal Value type
fn bson_to_value(bson: &Bson) -> Value {
    match bson {
        Bson::Null => Value::Null,
        Bson::Boolean(b) => Value::Bool(*b),
        Bson::Int32(i) => Value::Int(*i as i64),
        Bson::Int64(i) => Value::Int(*i),
        Bson::Double(f) => Value::Float(*f),
        Bson::String(s) => Value::Text(s.clone()),
        Bson::Binary(b) => Value::Bytes(b.bytes.clone()),
        Bson::ObjectId(oid) => Value::Text(oid.to_hex()),
        Bson::DateTime(dt) => Value::Text(dt.try_to_rfc3339_string().unwrap_or_else(|_| dt.to_string())),
        Bson::Array(arr) => Value::Array(arr.iter().map(bson_to_value).collect()),
        Bson::Document(doc) => Value::Json(Bson::Document(doc.clone()).into_relaxed_extjson()),
        other => Value::Text(other.to_string()),
    }
}

/// Converts a generic value to BSON
fn value_to_bson(value: &Value) -> EngineResult<Bson> {
    Ok(match value {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(*b),
        Value::Int(i) => Bson::Int64(*i),
        Value::Float(f) => Bson::Double(*f),
        Value::Text(s) => Bson::String(s.clone()),
        Value::Bytes(b) => Bson::Binary(mongodb::bson::Binary {
            subtype: mongodb::bson::spec::BinarySubtype::Generic,
            bytes: b.clone(),
        }),
        Value::Json(j) => mongodb::bson::to_bson(j)
            .map_err(|e| EngineError::execution_error(format!("Unsupported JSON value: {}", e)))?,
        Value::Array(items) => Bson::Array(items.iter().map(value_to_bson).collect::<EngineResult<_>>()?),
    })
}

/// BSON for a value compared against `field`
///
/// Hex strings addressing `_id` become ObjectIds and numeric text aimed at
/// numeric fields is parsed, since MongoDB compares by type.
fn field_bson(field: &str, data_type: &str, value: &Value) -> EngineResult<Bson> {
    if let Value::Text(text) = value {
        if field == ID_FIELD && text.len() == 24 {
            if let Ok(oid) = ObjectId::parse_str(text) {
                return Ok(Bson::ObjectId(oid));
            }
        }
        match data_type {
            "int32" | "int64" => {
                if let Ok(i) = text.trim().parse::<i64>() {
                    return Ok(Bson::Int64(i));
                }
            }
            "double" => {
                if let Ok(f) = text.trim().parse::<f64>() {
                    return Ok(Bson::Double(f));
                }
            }
            "boolean" => {
                if let Ok(b) = text.trim().parse::<bool>() {
                    return Ok(Bson::Boolean(b));
                }
            }
            _ => {}
        }
    }
    value_to_bson(value)
}

fn document_to_row(document: &Document, visible: Option<&[String]>) -> RowData {
    let mut row = RowData::new();
    match visible {
        Some(fields) => {
            for field in fields {
                if let Some(value) = document.get(field) {
                    row.columns.insert(field.clone(), bson_to_value(value));
                }
            }
        }
        None => {
            for (key, value) in document.iter() {
                row.columns.insert(key.clone(), bson_to_value(value));
            }
        }
    }
    row
}

fn key_filter(key: &RowData, columns: &[ColumnDescriptor], table: &str) -> EngineResult<Document> {
    if key.is_empty() {
        return Err(EngineError::schema_error(format!(
            "A primary key is required to address a document of \"{}\"",
            table
        )));
    }
    let mut filter = Document::new();
    for (name, value) in &key.columns {
        let data_type = columns
            .iter()
            .find(|c| &c.column_name == name)
            .map(|c| c.data_type.as_str())
            .unwrap_or(OBJECT_ID_TYPE);
        filter.insert(name.clone(), field_bson(name, data_type, value)?);
    }
    Ok(filter)
}

fn case_insensitive(pattern: String) -> Document {
    doc! { "$regex": pattern, "$options": "i" }
}

fn filter_condition(filter: &ParsedFilter<'_>) -> EngineResult<Document> {
    let field = filter.column.column_name.clone();
    let data_type = filter.column.data_type.as_str();
    let text = || regex::escape(&filter.value.to_text().unwrap_or_default());

    let condition = match filter.operator {
        FilterOperator::Eq => field_bson(&field, data_type, filter.value)?,
        FilterOperator::Empty => Bson::Document(doc! { "$in": [Bson::Null, ""] }),
        op @ (FilterOperator::Gt | FilterOperator::Lt | FilterOperator::Gte | FilterOperator::Lte) => {
            let operator = match op {
                FilterOperator::Gt => "$gt",
                FilterOperator::Lt => "$lt",
                FilterOperator::Gte => "$gte",
                _ => "$lte",
            };
            let mut comparison = Document::new();
            comparison.insert(operator, field_bson(&field, data_type, filter.value)?);
            Bson::Document(comparison)
        }
        FilterOperator::StartsWith => Bson::Document(doc! { "$regex": format!("^{}", text()) }),
        FilterOperator::EndsWith => Bson::Document(doc! { "$regex": format!("{}$", text()) }),
        FilterOperator::Contains => Bson::Document(doc! { "$regex": text() }),
        FilterOperator::NotContains => Bson::Document(doc! { "$not": { "$regex": text() } }),
    };

    let mut document = Document::new();
    document.insert(field, condition);
    Ok(document)
}

fn and_all(mut conditions: Vec<Document>) -> Document {
    match conditions.len() {
        0 => Document::new(),
        1 => conditions.remove(0),
        _ => doc! { "$and": conditions },
    }
}

/// Compiles search, filters and ordering into a query document and a sort
fn compile_query(
    shape: &QueryShape,
    settings: &TableSettings,
    columns: &[ColumnDescriptor],
    table: &str,
) -> EngineResult<(Document, Option<Document>)> {
    let mut conditions = Vec::new();

    if let Some(search) = shape.search.as_deref().filter(|s| !s.is_empty()) {
        if !settings.search_fields.is_empty() {
            let pattern = regex::escape(search);
            let mut alternatives = Vec::with_capacity(settings.search_fields.len());
            for field in &settings.search_fields {
                let column = allowed_field(columns, table, field)?;
                let mut alternative = Document::new();
                alternative.insert(column.column_name.clone(), case_insensitive(pattern.clone()));
                alternatives.push(alternative);
            }
            conditions.push(doc! { "$or": alternatives });
        }
    }

    for filter in parse_filters(&shape.filters, columns, table)? {
        conditions.push(filter_condition(&filter)?);
    }

    let sort = resolve_ordering(shape, settings, columns, table)?.map(|(column, direction)| {
        let mut sort = Document::new();
        let order = match direction {
            SortDirection::Asc => 1,
            SortDirection::Desc => -1,
        };
        sort.insert(column.column_name.clone(), order);
        sort
    });

    Ok((and_all(conditions), sort))
}

fn compile_autocomplete(
    request: &AutocompleteRequest,
    columns: &[ColumnDescriptor],
    table: &str,
) -> EngineResult<Document> {
    let mut alternatives = Vec::with_capacity(request.fields.len());
    for field in &request.fields {
        let column = allowed_field(columns, table, field)?;
        if request.value != "*" {
            let mut alternative = Document::new();
            alternative.insert(
                column.column_name.clone(),
                doc! { "$regex": format!("^{}", regex::escape(&request.value)) },
            );
            alternatives.push(alternative);
        }
    }
    Ok(if alternatives.is_empty() {
        Document::new()
    } else {
        doc! { "$or": alternatives }
    })
}

/// Visible fields, or `None` when the whole document is shown
fn visible_projection(
    settings: &TableSettings,
    columns: &[ColumnDescriptor],
    table: &str,
) -> EngineResult<Option<Vec<String>>> {
    if settings.list_fields.is_empty() && settings.excluded_fields.is_empty() {
        return Ok(None);
    }
    let visible = settings.visible_fields(columns);
    if visible.is_empty() {
        return Err(EngineError::filter_error(format!(
            "No visible fields left to select from table \"{}\"",
            table
        )));
    }
    Ok(Some(visible))
}

#[async_trait]
impl DataAccess for MongoDao {
    fn driver_id(&self) -> &'static str {
        "mongodb"
    }

    async fn test_connection(&self) -> ConnectionStatus {
        probe(self.options.test_timeout(), async {
            let database = self.database().await?;
            database.run_command(doc! { "ping": 1 }).await?;
            Ok::<_, EngineError>(())
        })
        .await
    }

    #[instrument(skip(self), fields(database = %self.database_name()))]
    async fn get_table_structure(&self, table: &str) -> EngineResult<Vec<ColumnDescriptor>> {
        let collection = self.collection(table).await?;
        self.structure(&collection).await
    }

    async fn get_primary_columns(&self, table: &str) -> EngineResult<Vec<PrimaryKeyDescriptor>> {
        let collection = self.collection(table).await?;
        let columns = self.structure(&collection).await?;
        let data_type = columns
            .iter()
            .find(|c| c.column_name == ID_FIELD)
            .map(|c| c.data_type.clone())
            .unwrap_or_else(|| OBJECT_ID_TYPE.to_string());
        Ok(vec![PrimaryKeyDescriptor {
            column_name: ID_FIELD.to_string(),
            data_type,
        }])
    }

    async fn get_foreign_keys(&self, table: &str) -> EngineResult<Vec<ForeignKeyDescriptor>> {
        self.collection(table).await?;
        Ok(Vec::new())
    }

    #[instrument(skip(self, shape, settings), fields(database = %self.database_name()))]
    async fn get_rows(
        &self,
        table: &str,
        shape: &QueryShape,
        settings: &TableSettings,
        page: PageRequest,
    ) -> EngineResult<PageResult> {
        let collection = self.collection(table).await?;
        let columns = self.structure(&collection).await?;
        let visible = visible_projection(settings, &columns, table)?;

        if let Some(request) = &shape.autocomplete {
            let filter = compile_autocomplete(request, &columns, table)?;
            let limit = i64::try_from(self.options.autocomplete_row_limit).unwrap_or(i64::MAX);
            let documents: Vec<Document> = collection.find(filter).limit(limit).await?.try_collect().await?;
            let rows = documents
                .iter()
                .map(|document| document_to_row(document, visible.as_deref()))
                .collect();
            return Ok(PageResult::sample(rows));
        }

        let (filter, sort) = compile_query(shape, settings, &columns, table)?;
        let window = page.resolve(settings, self.options.default_page_size);
        debug!(filter = %filter, "fetching documents");

        let fetch = async {
            let mut find = collection
                .find(filter.clone())
                .skip(window.offset())
                .limit(i64::try_from(window.limit()).unwrap_or(i64::MAX));
            if let Some(sort) = sort.clone() {
                find = find.sort(sort);
            }
            let documents: Vec<Document> = find.await?.try_collect().await?;
            Ok::<_, EngineError>(documents)
        };

        let exact = async {
            let total = collection
                .count_documents(filter.clone())
                .max_time(self.options.count_timeout())
                .await?;
            Ok::<_, EngineError>(total)
        };

        let (documents, count) = tokio::join!(
            fetch,
            count_with_fallback(exact, self.options.count_timeout(), || async {
                Ok::<_, EngineError>(collection.estimated_document_count().await?)
            }),
        );

        let rows = documents?
            .iter()
            .map(|document| document_to_row(document, visible.as_deref()))
            .collect();

        Ok(PageResult {
            rows,
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
        let collection = self.collection(table).await?;
        let columns = self.structure(&collection).await?;
        let filter = key_filter(key, &columns, table)?;
        let visible = visible_projection(settings, &columns, table)?;

        let document = collection.find_one(filter).await?;
        Ok(document.map(|document| document_to_row(&document, visible.as_deref())))
    }

    #[instrument(skip(self, row), fields(database = %self.database_name()))]
    async fn add_row(&self, table: &str, row: &RowData) -> EngineResult<InsertedRow> {
        let collection = self.collection(table).await?;

        let mut document = Document::new();
        for (name, value) in &row.columns {
            let bson = if name == ID_FIELD {
                field_bson(name, OBJECT_ID_TYPE, value)?
            } else {
                value_to_bson(value)?
            };
            document.insert(name.clone(), bson);
        }

        let result = collection.insert_one(document).await?;
        Ok(InsertedRow::PrimaryKey(
            RowData::new().with_column(ID_FIELD, bson_to_value(&result.inserted_id)),
        ))
    }

    #[instrument(skip(self, row, key), fields(database = %self.database_name()))]
    async fn update_row(&self, table: &str, row: &RowData, key: &RowData) -> EngineResult<RowData> {
        let collection = self.collection(table).await?;
        let columns = self.structure(&collection).await?;
        let filter = key_filter(key, &columns, table)?;

        let mut changes = Document::new();
        for (name, value) in &row.columns {
            if name != ID_FIELD {
                changes.insert(name.clone(), value_to_bson(value)?);
            }
        }

        if !changes.is_empty() {
            let result = collection
                .update_one(filter.clone(), doc! { "$set": changes })
                .await?;
            if result.matched_count == 0 {
                return Err(EngineError::row_not_found(table));
            }
        }

        let document = collection
            .find_one(filter)
            .await?
            .ok_or_else(|| EngineError::row_not_found(table))?;
        Ok(document_to_row(&document, None))
    }

    #[instrument(skip(self, key), fields(database = %self.database_name()))]
    async fn delete_row(&self, table: &str, key: &RowData) -> EngineResult<RowData> {
        let collection = self.collection(table).await?;
        let columns = self.structure(&collection).await?;
        let filter = key_filter(key, &columns, table)?;

        let result = collection.delete_one(filter).await?;
        if result.deleted_count == 0 {
            return Err(EngineError::row_not_found(table));
        }
        Ok(key.clone())
    }

    async fn validate_settings(&self, settings: &TableSettings, table: &str) -> EngineResult<Vec<String>> {
        let columns = self.get_table_structure(table).await?;
        Ok(validate_settings(settings, table, &columns))
    }
}
