//! Universal data types for the datagate access layer
//!
//! These types provide a normalized representation of connections, rows and
//! query shapes across SQL and NoSQL engines.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Database connection configuration
///
/// Issued to the access layer already decrypted and treated as immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub driver: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub database: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub ssl: bool,
    /// Optional CA bundle used to verify the server certificate
    #[serde(default)]
    pub ssl_ca_path: Option<String>,
    #[serde(default)]
    pub ssh_tunnel: Option<SshTunnelConfig>,
}

impl ConnectionConfig {
    /// Identity under which the connection cache stores this configuration
    pub fn cache_key(&self) -> ConnectionKey {
        ConnectionKey {
            driver: self.driver.trim().to_ascii_lowercase(),
            host: self.host.trim().to_ascii_lowercase(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
            database: self.database.clone(),
            schema: self.schema.clone(),
            ssl: self.ssl,
            ssl_ca_path: self.ssl_ca_path.clone(),
            gateway: self.ssh_tunnel.as_ref().map(|ssh| GatewayKey {
                host: ssh.host.trim().to_ascii_lowercase(),
                port: ssh.port,
                username: ssh.username.clone(),
                auth: ssh.auth.clone(),
                host_key_policy: ssh.host_key_policy,
                known_hosts_path: ssh.known_hosts_path.clone(),
            }),
        }
    }

    /// Returns a copy pointing at a local forwarded endpoint
    pub fn forwarded_to(&self, local_port: u16) -> Self {
        let mut tunneled = self.clone();
        tunneled.host = "127.0.0.1".to_string();
        tunneled.port = local_port;
        tunneled.ssh_tunnel = None;
        tunneled
    }
}

/// Canonicalized connection identity
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    driver: String,
    host: String,
    port: u16,
    username: String,
    password: String,
    database: Option<String>,
    schema: Option<String>,
    ssl: bool,
    ssl_ca_path: Option<String>,
    gateway: Option<GatewayKey>,
}

/// Tunnel part of a connection identity, credentials and trust settings included
#[derive(Clone, PartialEq, Eq, Hash)]
struct GatewayKey {
    host: String,
    port: u16,
    username: String,
    auth: SshAuth,
    host_key_policy: SshHostKeyPolicy,
    known_hosts_path: Option<String>,
}

impl fmt::Debug for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionKey")
            .field("driver", &self.driver)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("database", &self.database)
            .field("schema", &self.schema)
            .field("ssl", &self.ssl)
            .field("ssl_ca_path", &self.ssl_ca_path)
            .field(
                "gateway",
                &self
                    .gateway
                    .as_ref()
                    .map(|ssh| format!("{}@{}:{}", ssh.username, ssh.host, ssh.port)),
            )
            .finish_non_exhaustive()
    }
}

/// SSH tunnel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshTunnelConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: SshAuth,

    /// Host key verification policy (security-critical).
    pub host_key_policy: SshHostKeyPolicy,

    /// Optional path to an app-owned known_hosts file.
    pub known_hosts_path: Option<String>,

    /// Connection timeout in seconds for the SSH TCP handshake.
    pub connect_timeout_secs: u32,

    /// SSH keepalive interval in seconds.
    pub keepalive_interval_secs: u32,
}

/// Host key verification policy for SSH.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SshHostKeyPolicy {
    /// Trust on first use: auto-add new hosts to known_hosts.
    AcceptNew,
    /// Strict: require the host key to already be present in known_hosts.
    Strict,
    /// Insecure: disable host key checking (dev-only).
    InsecureNoCheck,
}

/// SSH authentication method
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SshAuth {
    Password { password: String },
    Key { private_key_path: String, passphrase: Option<String> },
}

/// Universal value representation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(#[serde(with = "base64_bytes")] Vec<u8>),
    Json(serde_json::Value),
    Array(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Textual form used for pattern matching and typed casts
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(b.to_string()),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::Text(s) => Some(s.clone()),
            Value::Bytes(b) => Some(String::from_utf8_lossy(b).into_owned()),
            Value::Json(j) => Some(j.to_string()),
            Value::Array(_) => Some(self.to_json().to_string()),
        }
    }

    /// Inverse of `to_json` for values read back from JSON columns
    ///
    /// Scalars map to the variant the untagged wire form deserializes to,
    /// so a stored `"hello"` reads back as `Text`, not `Json`.
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                (Some(i), _) => Value::Int(i),
                (None, Some(f)) => Value::Float(f),
                _ => Value::Json(serde_json::Value::Number(n)),
            },
            serde_json::Value::String(s) => Value::Text(s),
            other => Value::Json(other),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Value::from(*f),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Bytes(b) => serde_json::Value::Array(b.iter().map(|x| serde_json::Value::from(*x)).collect()),
            Value::Json(j) => j.clone(),
            Value::Array(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

mod base64_bytes {
    use serde::{Deserialize, Deserializer, Serializer};
    use base64::{Engine, engine::general_purpose::STANDARD};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// A single row keyed by column name, in select order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowData {
    pub columns: IndexMap<String, Value>,
}

impl RowData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_column(mut self, name: impl Into<String>, value: Value) -> Self {
        self.columns.insert(name.into(), value);
        self
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Sort direction for ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// A single filter, as received from the caller
///
/// `criteria` stays textual so that unknown operators can be rejected with a
/// message naming them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterCriterion {
    pub field: String,
    pub criteria: String,
    pub value: Value,
}

impl FilterCriterion {
    pub fn new(field: impl Into<String>, criteria: impl Into<String>, value: Value) -> Self {
        Self {
            field: field.into(),
            criteria: criteria.into(),
            value,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ordering {
    pub field: Option<String>,
    pub direction: Option<SortDirection>,
}

/// Prefix lookup over a handful of fields, used by reference pickers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutocompleteRequest {
    pub fields: Vec<String>,
    pub value: String,
}

/// Filters, free-text search, ordering and autocomplete for a row fetch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryShape {
    #[serde(default)]
    pub filters: Vec<FilterCriterion>,
    pub search: Option<String>,
    pub ordering: Option<Ordering>,
    pub autocomplete: Option<AutocompleteRequest>,
}

/// Result of `test_connection`; never an error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub ok: bool,
    pub message: String,
}

impl ConnectionStatus {
    pub fn success() -> Self {
        Self {
            ok: true,
            message: "Successfully connected".to_string(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

/// Outcome of `add_row`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertedRow {
    /// Generated or supplied primary key values
    PrimaryKey(RowData),
    /// The full inserted row, for tables without a primary key
    Row(RowData),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ConnectionConfig {
        ConnectionConfig {
            driver: "postgres".to_string(),
            host: "DB.example.com".to_string(),
            port: 5432,
            username: "app".to_string(),
            password: "secret".to_string(),
            database: Some("shop".to_string()),
            schema: Some("public".to_string()),
            ssl: false,
            ssl_ca_path: None,
            ssh_tunnel: None,
        }
    }

    #[test]
    fn ssh_auth_deserializes_from_externally_tagged_enum() {
        let json = r#"{"Key":{"private_key_path":"/tmp/id_ed25519","passphrase":"p"}}"#;
        let auth: SshAuth = serde_json::from_str(json).expect("should parse");

        match auth {
            SshAuth::Key {
                private_key_path,
                passphrase,
            } => {
                assert_eq!(private_key_path, "/tmp/id_ed25519");
                assert_eq!(passphrase.as_deref(), Some("p"));
            }
            other => panic!("unexpected auth variant: {other:?}"),
        }
    }

    #[test]
    fn cache_key_canonicalizes_host_case() {
        let a = config();
        let mut b = config();
        b.host = "db.example.com".to_string();
        assert_eq!(a.cache_key(), b.cache_key());

        let mut c = config();
        c.password = "other".to_string();
        assert_ne!(a.cache_key(), c.cache_key());
    }

    #[test]
    fn cache_key_debug_hides_password() {
        let rendered = format!("{:?}", config().cache_key());
        assert!(!rendered.contains("secret"));
    }

    fn tunneled() -> ConnectionConfig {
        ConnectionConfig {
            ssh_tunnel: Some(SshTunnelConfig {
                host: "bastion.example.com".to_string(),
                port: 22,
                username: "ops".to_string(),
                auth: SshAuth::Key {
                    private_key_path: "/keys/ops_ed25519".to_string(),
                    passphrase: Some("unlock".to_string()),
                },
                host_key_policy: SshHostKeyPolicy::Strict,
                known_hosts_path: Some("/etc/ssh/known_hosts".to_string()),
                connect_timeout_secs: 10,
                keepalive_interval_secs: 30,
            }),
            ..config()
        }
    }

    #[test]
    fn cache_key_separates_trust_and_gateway_credentials() {
        let base = tunneled().cache_key();
        assert_eq!(base, tunneled().cache_key());

        let mut other_key = tunneled();
        if let Some(SshAuth::Key { private_key_path, .. }) = other_key.ssh_tunnel.as_mut().map(|ssh| &mut ssh.auth) {
            *private_key_path = "/keys/other_ed25519".to_string();
        }
        assert_ne!(base, other_key.cache_key());

        let mut other_passphrase = tunneled();
        if let Some(SshAuth::Key { passphrase, .. }) = other_passphrase.ssh_tunnel.as_mut().map(|ssh| &mut ssh.auth) {
            *passphrase = None;
        }
        assert_ne!(base, other_passphrase.cache_key());

        let mut password_auth = tunneled();
        if let Some(ssh) = password_auth.ssh_tunnel.as_mut() {
            ssh.auth = SshAuth::Password {
                password: "hunter2".to_string(),
            };
        }
        assert_ne!(base, password_auth.cache_key());

        let mut lax = tunneled();
        if let Some(ssh) = lax.ssh_tunnel.as_mut() {
            ssh.host_key_policy = SshHostKeyPolicy::InsecureNoCheck;
        }
        assert_ne!(base, lax.cache_key());

        let mut other_known_hosts = tunneled();
        if let Some(ssh) = other_known_hosts.ssh_tunnel.as_mut() {
            ssh.known_hosts_path = None;
        }
        assert_ne!(base, other_known_hosts.cache_key());

        let mut pinned_ca = tunneled();
        pinned_ca.ssl = true;
        let mut other_ca = pinned_ca.clone();
        pinned_ca.ssl_ca_path = Some("/certs/a.pem".to_string());
        other_ca.ssl_ca_path = Some("/certs/b.pem".to_string());
        assert_ne!(pinned_ca.cache_key(), other_ca.cache_key());

        let rendered = format!("{:?}", password_auth.cache_key());
        assert!(!rendered.contains("hunter2"));
        assert!(!format!("{base:?}").contains("unlock"));
    }

    #[test]
    fn forwarded_config_points_at_localhost() {
        let forwarded = config().forwarded_to(40123);
        assert_eq!(forwarded.host, "127.0.0.1");
        assert_eq!(forwarded.port, 40123);
        assert!(forwarded.ssh_tunnel.is_none());
        assert_eq!(forwarded.database.as_deref(), Some("shop"));
    }

    #[test]
    fn row_keeps_insertion_order() {
        let row = RowData::new()
            .with_column("id", Value::Int(1))
            .with_column("name", Value::from("Alice"))
            .with_column("email", Value::from("alice@example.com"));
        let keys: Vec<&str> = row.columns.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["id", "name", "email"]);
    }

    #[test]
    fn query_shape_deserializes_with_defaults() {
        let shape: QueryShape = serde_json::from_str(
            r#"{"filters":[{"field":"name","criteria":"startswith","value":"Al"}],"search":"gmail","ordering":{"field":"id","direction":"DESC"}}"#,
        )
        .expect("should parse");
        assert_eq!(shape.filters.len(), 1);
        assert_eq!(shape.filters[0].value, Value::Text("Al".into()));
        let ordering = shape.ordering.expect("ordering");
        assert_eq!(ordering.direction, Some(SortDirection::Desc));
        assert!(shape.autocomplete.is_none());
    }
}
