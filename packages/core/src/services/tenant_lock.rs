//! Per-Tenant Mutation Token
//!
//! Structural mutations (rebuild, insert, delete) shift whole ranges of
//! bounds, and two interleaved shift sequences on the same tenant corrupt each
//! other. Every structural mutation therefore holds a [`MutationToken`] for
//! its tenant from before the first read of bounds until after commit or
//! rollback.
//!
//! # Architecture
//!
//! - **One async mutex per tenant**, created lazily and shared through `Arc`
//! - **Owned guards**: the token owns its lock, so it can outlive the borrow of
//!   [`TenantLocks`] and is released on drop, including when the operation's
//!   future is cancelled
//! - **Bounded wait**: acquisition gives up after the configured timeout and
//!   reports a retryable [`HierarchyError::ConcurrencyConflict`]
//!
//! Different tenants never contend. `BEGIN IMMEDIATE` still serializes writers
//! at the SQLite level for processes that share the database file.

use crate::models::TenantId;
use crate::services::error::HierarchyError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Registry of per-tenant mutation locks
#[derive(Debug, Default)]
pub struct TenantLocks {
    locks: Mutex<HashMap<TenantId, Arc<AsyncMutex<()>>>>,
}

/// Exclusive right to mutate one tenant's interval space
///
/// Dropping the token releases the tenant.
#[derive(Debug)]
pub struct MutationToken {
    tenant: TenantId,
    acquired_at: Instant,
    _guard: OwnedMutexGuard<()>,
}

impl MutationToken {
    pub fn tenant(&self) -> TenantId {
        self.tenant
    }
}

impl Drop for MutationToken {
    fn drop(&mut self) {
        tracing::debug!(
            "Released mutation token for tenant {} after {:?}",
            self.tenant,
            self.acquired_at.elapsed()
        );
    }
}

impl TenantLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, tenant: TenantId) -> Arc<AsyncMutex<()>> {
        // A poisoned map only means another thread panicked while inserting;
        // the map itself is still usable.
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(tenant)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Wait up to `timeout` for exclusive mutation rights on `tenant`
    ///
    /// # Errors
    ///
    /// `ConcurrencyConflict` if another mutation still holds the tenant when
    /// the timeout expires.
    pub async fn acquire(
        &self,
        tenant: TenantId,
        timeout: Duration,
    ) -> Result<MutationToken, HierarchyError> {
        let lock = self.lock_for(tenant);
        let started = Instant::now();

        let guard = tokio::time::timeout(timeout, lock.lock_owned())
            .await
            .map_err(|_| {
                tracing::warn!(
                    "Timed out after {:?} waiting for mutation token of tenant {}",
                    timeout,
                    tenant
                );
                HierarchyError::concurrency_conflict(
                    tenant,
                    format!(
                        "another structural mutation held the tenant for more than {}ms",
                        timeout.as_millis()
                    ),
                )
            })?;

        tracing::debug!(
            "Acquired mutation token for tenant {} (waited {:?})",
            tenant,
            started.elapsed()
        );

        Ok(MutationToken {
            tenant,
            acquired_at: Instant::now(),
            _guard: guard,
        })
    }

    /// Take the token only if the tenant is free right now
    pub fn try_acquire(&self, tenant: TenantId) -> Option<MutationToken> {
        let guard = self.lock_for(tenant).try_lock_owned().ok()?;
        Some(MutationToken {
            tenant,
            acquired_at: Instant::now(),
            _guard: guard,
        })
    }

    /// Number of tenants that have been locked at least once
    pub fn tenant_count(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}
