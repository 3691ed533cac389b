//! Database Error Types
//!
//! This module defines error types for database operations, providing
//! clear error handling for connection, initialization, and query failures.

use std::path::PathBuf;
use thiserror::Error;

/// SQLite primary result codes that mean "someone else holds the lock"
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// Database operation errors
///
/// Covers all error cases for database connection, initialization,
/// and basic operations. Tree-level failures (missing nodes, corruption)
/// are handled by the service-layer `HierarchyError`.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to establish database connection
    #[error("Failed to connect to database at {path}: {source}")]
    ConnectionFailed {
        path: PathBuf,
        source: libsql::Error,
    },

    /// Failed to initialize database schema
    #[error("Failed to initialize database schema: {0}")]
    InitializationFailed(String),

    /// Permission denied when accessing database
    #[error("Permission denied for database path: {path}")]
    PermissionDenied { path: PathBuf },

    /// Failed to create parent directory
    #[error("Failed to create parent directory for database: {0}")]
    DirectoryCreationFailed(#[from] std::io::Error),

    /// libsql operation error
    #[error("Database operation failed: {0}")]
    LibsqlError(#[from] libsql::Error),

    /// Statement failed; keeps the libsql error so busy/locked can be told apart
    #[error("{context}: {source}")]
    QueryFailed {
        context: String,
        source: libsql::Error,
    },

    /// A row did not have the expected shape
    #[error("Unexpected row shape: {0}")]
    RowMapping(String),
}

impl DatabaseError {
    /// Create a connection failed error
    pub fn connection_failed(path: PathBuf, source: libsql::Error) -> Self {
        Self::ConnectionFailed { path, source }
    }

    /// Create an initialization failed error
    pub fn initialization_failed(msg: impl Into<String>) -> Self {
        Self::InitializationFailed(msg.into())
    }

    /// Create a permission denied error
    pub fn permission_denied(path: PathBuf) -> Self {
        Self::PermissionDenied { path }
    }

    /// Create a query failed error with context
    pub fn query(context: impl Into<String>, source: libsql::Error) -> Self {
        Self::QueryFailed {
            context: context.into(),
            source,
        }
    }

    /// Create a row mapping error
    pub fn row_mapping(msg: impl Into<String>) -> Self {
        Self::RowMapping(msg.into())
    }

    /// Whether the failure came from SQLite lock contention (`SQLITE_BUSY`/`SQLITE_LOCKED`)
    ///
    /// Callers translate these into retryable concurrency conflicts.
    pub fn is_busy(&self) -> bool {
        let source = match self {
            Self::LibsqlError(e) | Self::QueryFailed { source: e, .. } => e,
            _ => return false,
        };
        match source {
            libsql::Error::SqliteFailure(code, _) => {
                let primary = *code & 0xff;
                primary == SQLITE_BUSY || primary == SQLITE_LOCKED
            }
            other => {
                let msg = other.to_string();
                msg.contains("database is locked") || msg.contains("database table is locked")
            }
        }
    }
}
