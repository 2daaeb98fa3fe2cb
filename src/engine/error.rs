//! Engine error types
//!
//! Every DAO operation returns `EngineResult<T>`. Collaborators that need a
//! stable classification (HTTP status mapping, diagnostics) use `kind()`.

use serde::Serialize;
use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

/// Coarse error classification exposed to collaborators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Schema,
    Filter,
    Connection,
    Tunnel,
    Timeout,
    Execution,
    Unsupported,
    Internal,
}

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Table or column not found, or a malformed custom type
    #[error("Schema error: {message}")]
    Schema { message: String },

    /// Unsupported operator or a field outside the allowed set
    #[error("Filter error: {message}")]
    Filter { message: String },

    #[error("Connection failed: {message}")]
    Connection { message: String },

    #[error("Authentication failed: {message}")]
    AuthFailed { message: String },

    /// Gateway unreachable or port forwarding could not be set up
    #[error("SSH tunnel error: {message}")]
    Tunnel { message: String },

    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Query execution failed: {message}")]
    Execution { message: String },

    #[error("Driver not found: {driver}")]
    DriverNotFound { driver: String },

    #[error("Not supported: {message}")]
    NotSupported { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl EngineError {
    pub fn schema_error(message: impl Into<String>) -> Self {
        Self::Schema { message: message.into() }
    }

    pub fn table_not_found(table: &str) -> Self {
        Self::Schema {
            message: format!("Table \"{}\" does not exist", table),
        }
    }

    pub fn column_not_found(table: &str, column: &str) -> Self {
        Self::Schema {
            message: format!("Column \"{}\" does not exist in table \"{}\"", column, table),
        }
    }

    pub fn row_not_found(table: &str) -> Self {
        Self::Execution {
            message: format!("No row of \"{}\" matches the given primary key", table),
        }
    }

    pub fn filter_error(message: impl Into<String>) -> Self {
        Self::Filter { message: message.into() }
    }

    pub fn unsupported_operator(operator: &str) -> Self {
        Self::Filter {
            message: format!("Unsupported filter operator \"{}\"", operator),
        }
    }

    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into() }
    }

    pub fn auth_failed(message: impl Into<String>) -> Self {
        Self::AuthFailed { message: message.into() }
    }

    pub fn tunnel_error(message: impl Into<String>) -> Self {
        Self::Tunnel { message: message.into() }
    }

    pub fn execution_error(message: impl Into<String>) -> Self {
        Self::Execution { message: message.into() }
    }

    pub fn driver_not_found(driver: impl Into<String>) -> Self {
        Self::DriverNotFound { driver: driver.into() }
    }

    pub fn not_supported(message: impl Into<String>) -> Self {
        Self::NotSupported { message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Schema { .. } => ErrorKind::Schema,
            Self::Filter { .. } => ErrorKind::Filter,
            Self::Connection { .. } | Self::AuthFailed { .. } => ErrorKind::Connection,
            Self::Tunnel { .. } => ErrorKind::Tunnel,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Execution { .. } => ErrorKind::Execution,
            Self::DriverNotFound { .. } | Self::NotSupported { .. } => ErrorKind::Unsupported,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Classifies a driver connect failure, keeping auth rejections apart
    pub fn from_connect(message: String) -> Self {
        let lowered = message.to_ascii_lowercase();
        if lowered.contains("password authentication failed")
            || lowered.contains("access denied")
            || lowered.contains("authentication failed")
        {
            Self::auth_failed(message)
        } else {
            Self::connection_failed(message)
        }
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
                Self::connection_failed(err.to_string())
            }
            other => Self::execution_error(other.to_string()),
        }
    }
}

impl From<mongodb::error::Error> for EngineError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::execution_error(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failures_are_connection_kind() {
        let err = EngineError::from_connect(
            "error returned from database: password authentication failed for user \"bob\"".into(),
        );
        assert!(matches!(err, EngineError::AuthFailed { .. }));
        assert_eq!(err.kind(), ErrorKind::Connection);
    }

    #[test]
    fn tunnel_errors_are_distinct_from_connection_errors() {
        let tunnel = EngineError::tunnel_error("gateway unreachable");
        let conn = EngineError::connection_failed("refused");
        assert_ne!(tunnel.kind(), conn.kind());
        assert!(tunnel.to_string().contains("SSH tunnel"));
    }

    #[test]
    fn unsupported_operator_names_the_operator() {
        let err = EngineError::unsupported_operator("between");
        assert_eq!(err.kind(), ErrorKind::Filter);
        assert!(err.to_string().contains("\"between\""));
    }
}
