//! Service Layer Error Types
//!
//! This module defines the error taxonomy for nested-set operations. Every
//! mutation error is returned only after the surrounding transaction has been
//! rolled back, so no variant ever implies a partially applied shift.

use crate::db::DatabaseError;
use crate::models::{TenantId, ValidationError, Violation};
use thiserror::Error;

/// Hierarchy operation errors
///
/// `ConcurrencyConflict` is the only variant a caller is expected to retry
/// automatically; see [`HierarchyError::is_retryable`].
#[derive(Error, Debug)]
pub enum HierarchyError {
    /// Empty or malformed id
    #[error("Invalid argument: {0}")]
    InvalidArgument(#[from] ValidationError),

    /// Id already used within the tenant
    #[error("Node '{id}' already exists in tenant {tenant}")]
    DuplicateId { tenant: TenantId, id: String },

    /// Insert named a parent that does not exist in the tenant
    #[error("Parent node '{parent_id}' not found in tenant {tenant}")]
    ParentNotFound { tenant: TenantId, parent_id: String },

    /// Node not found by id
    #[error("Node '{id}' not found in tenant {tenant}")]
    NotFound { tenant: TenantId, id: String },

    /// Tenant still has rows without bounds; it must be rebuilt first
    #[error("Tenant {tenant} has {unindexed} node(s) without bounds; run rebuild first")]
    NotIndexed { tenant: TenantId, unindexed: i64 },

    /// Another structural mutation holds the tenant, or SQLite reported lock contention
    #[error("Concurrent modification of tenant {tenant}: {context}")]
    ConcurrencyConflict { tenant: TenantId, context: String },

    /// Backend I/O error
    #[error("Storage failure: {0}")]
    StorageFailure(#[from] DatabaseError),

    /// An invariant check failed. Never auto-repaired.
    #[error("Corruption detected in tenant {tenant}: {detail}")]
    CorruptionDetected { tenant: TenantId, detail: String },

    /// The operation ran past its deadline and was rolled back
    #[error("Operation '{operation}' exceeded its {timeout_ms}ms deadline")]
    DeadlineExceeded {
        operation: &'static str,
        timeout_ms: u64,
    },

    /// Operation is part of the interface but not supported by this index
    #[error("Operation '{operation}' is not supported: {reason}")]
    Unsupported {
        operation: &'static str,
        reason: &'static str,
    },
}

impl HierarchyError {
    /// Create a duplicate id error
    pub fn duplicate_id(tenant: TenantId, id: impl Into<String>) -> Self {
        Self::DuplicateId {
            tenant,
            id: id.into(),
        }
    }

    /// Create a parent not found error
    pub fn parent_not_found(tenant: TenantId, parent_id: impl Into<String>) -> Self {
        Self::ParentNotFound {
            tenant,
            parent_id: parent_id.into(),
        }
    }

    /// Create a node not found error
    pub fn not_found(tenant: TenantId, id: impl Into<String>) -> Self {
        Self::NotFound {
            tenant,
            id: id.into(),
        }
    }

    /// Create a not indexed error
    pub fn not_indexed(tenant: TenantId, unindexed: i64) -> Self {
        Self::NotIndexed { tenant, unindexed }
    }

    /// Create a concurrency conflict error
    pub fn concurrency_conflict(tenant: TenantId, context: impl Into<String>) -> Self {
        Self::ConcurrencyConflict {
            tenant,
            context: context.into(),
        }
    }

    /// Create a corruption error
    pub fn corruption(tenant: TenantId, detail: impl Into<String>) -> Self {
        Self::CorruptionDetected {
            tenant,
            detail: detail.into(),
        }
    }

    /// Create a corruption error from an interval invariant violation
    pub fn violation(tenant: TenantId, violation: &Violation) -> Self {
        Self::corruption(tenant, violation.to_string())
    }

    /// Create a deadline exceeded error
    pub fn deadline_exceeded(operation: &'static str, timeout_ms: u64) -> Self {
        Self::DeadlineExceeded {
            operation,
            timeout_ms,
        }
    }

    /// Create an unsupported operation error
    pub fn unsupported(operation: &'static str, reason: &'static str) -> Self {
        Self::Unsupported { operation, reason }
    }

    /// Map a storage error, turning SQLite lock contention into a retryable conflict
    pub fn from_storage(tenant: TenantId, err: DatabaseError) -> Self {
        if err.is_busy() {
            Self::concurrency_conflict(tenant, err.to_string())
        } else {
            Self::StorageFailure(err)
        }
    }

    /// Whether the caller should retry the operation unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }

    /// Whether the tenant's index is damaged and needs operator attention
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::CorruptionDetected { .. })
    }
}

/// Attach the tenant to storage errors so lock contention surfaces as a conflict
pub trait StorageResultExt<T> {
    fn storage(self, tenant: TenantId) -> Result<T, HierarchyError>;
}

impl<T> StorageResultExt<T> for Result<T, DatabaseError> {
    fn storage(self, tenant: TenantId) -> Result<T, HierarchyError> {
        self.map_err(|e| HierarchyError::from_storage(tenant, e))
    }
}
