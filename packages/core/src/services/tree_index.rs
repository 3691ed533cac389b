//! Tree Index - Incremental Nested-Set Mutations
//!
//! Insert and delete keep the tenant's bounds consistent by shifting every
//! interval to the right of the change, inside one write transaction.
//!
//! # Mutation protocol
//!
//! 1. Validate arguments (no lock, no connection)
//! 2. Acquire the tenant's [`MutationToken`](crate::services::MutationToken)
//! 3. `BEGIN IMMEDIATE` on a fresh connection
//! 4. Read the bounds the shift depends on, shift, write the row
//! 5. Optionally verify the whole tenant against the uncommitted state
//! 6. `COMMIT`, or `ROLLBACK` on any error; the token drops afterwards
//!
//! Reading bounds only after step 2 is what keeps two inserts from shifting
//! against the same stale right bound.
//!
//! # Insert
//!
//! With `R` the parent's right bound: `rgt >= R` moves by 2, `lft > R` moves
//! by 2, and the new node takes `(R, R + 1)` as the parent's last child. A new
//! root is appended after the tenant's largest right bound and moves nothing.
//!
//! # Delete
//!
//! With `(L, R)` the node's bounds and `W = R - L + 1`: every row inside
//! `[L, R]` is removed, then `lft > R` and `rgt > R` contract by `W`.

use crate::db::{DatabaseService, DbInsertNodeParams, ShiftCounts};
use crate::models::{normalize_parent, validate_id, Bounds, DeleteResult, Node, TenantId};
use crate::services::config::HierarchyConfig;
use crate::services::error::{HierarchyError, StorageResultExt};
use crate::services::query_service::{ensure_indexed, verify_tenant};
use crate::services::tenant_lock::TenantLocks;
use libsql::Connection;
use std::sync::Arc;

/// Incremental mutator for an indexed tenant
#[derive(Debug, Clone)]
pub struct TreeIndex {
    db: Arc<DatabaseService>,
    locks: Arc<TenantLocks>,
    config: HierarchyConfig,
}

impl TreeIndex {
    pub fn new(db: Arc<DatabaseService>, locks: Arc<TenantLocks>, config: HierarchyConfig) -> Self {
        Self { db, locks, config }
    }

    /// Insert `id` as the last child of `parent_id`, or as the rightmost root
    ///
    /// An empty `parent_id` means "no parent".
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for an empty or malformed id
    /// - `DuplicateId` if `id` already exists in the tenant
    /// - `ParentNotFound` if `parent_id` does not exist in the tenant
    /// - `NotIndexed` if the tenant has rows without bounds
    /// - `ConcurrencyConflict` if the tenant stays locked past the lock timeout
    pub async fn insert(
        &self,
        tenant: TenantId,
        id: &str,
        title: &str,
        parent_id: Option<&str>,
    ) -> Result<Node, HierarchyError> {
        validate_id(id, self.config.max_id_len)?;
        let parent_id = normalize_parent(parent_id);
        if let Some(parent) = parent_id {
            validate_id(parent, self.config.max_id_len)?;
        }

        let _token = self
            .locks
            .acquire(tenant, self.config.lock_timeout())
            .await?;
        let conn = self.db.connect_with_timeout().await.storage(tenant)?;
        self.db.begin_write(&conn).await.storage(tenant)?;

        let result = self.insert_in_txn(&conn, tenant, id, title, parent_id).await;
        let (node, shifted) = self
            .db
            .finish(&conn, result, |e| HierarchyError::from_storage(tenant, e))
            .await?;

        tracing::info!(
            "Inserted node '{}' into tenant {} at {} ({} right / {} left bound(s) shifted)",
            node.id,
            tenant,
            node.bounds,
            shifted.rights_moved,
            shifted.lefts_moved
        );
        Ok(node)
    }

    pub(crate) async fn insert_in_txn(
        &self,
        conn: &Connection,
        tenant: TenantId,
        id: &str,
        title: &str,
        parent_id: Option<&str>,
    ) -> Result<(Node, ShiftCounts), HierarchyError> {
        ensure_indexed(&self.db, conn, tenant).await?;

        if self
            .db
            .db_get_node(conn, tenant, id)
            .await
            .storage(tenant)?
            .is_some()
        {
            return Err(HierarchyError::duplicate_id(tenant, id));
        }

        let (bounds, shifted) = match parent_id {
            None => {
                let max_right = self.db.db_max_right(conn, tenant).await.storage(tenant)?;
                (Bounds::leaf(max_right + 1), ShiftCounts::default())
            }
            Some(parent) => {
                let parent_row = self
                    .db
                    .db_get_node(conn, tenant, parent)
                    .await
                    .storage(tenant)?
                    .ok_or_else(|| HierarchyError::parent_not_found(tenant, parent))?;
                let anchor = parent_row
                    .bounds
                    .ok_or_else(|| HierarchyError::not_indexed(tenant, 1))?
                    .right;

                let shifted = self
                    .db
                    .db_shift_for_insert(conn, tenant, anchor)
                    .await
                    .storage(tenant)?;
                // The parent's own right bound always matches `rgt >= anchor`
                if shifted.rights_moved == 0 {
                    return Err(HierarchyError::corruption(
                        tenant,
                        format!(
                            "insert under '{}' moved no right bounds at anchor {}",
                            parent, anchor
                        ),
                    ));
                }
                tracing::debug!(
                    "Opened gap at {} under '{}' in tenant {}: {:?}",
                    anchor,
                    parent,
                    tenant,
                    shifted
                );
                (Bounds::leaf(anchor), shifted)
            }
        };

        self.db
            .db_insert_node(
                conn,
                DbInsertNodeParams {
                    tenant,
                    id,
                    title,
                    parent_id,
                    bounds: Some(bounds),
                },
            )
            .await
            .storage(tenant)?;

        if self.config.verify_after_mutation {
            verify_tenant(&self.db, conn, tenant).await?;
        }

        let node = self
            .db
            .db_get_node(conn, tenant, id)
            .await
            .storage(tenant)?
            .and_then(|row| row.into_indexed())
            .ok_or_else(|| {
                HierarchyError::corruption(tenant, format!("inserted node '{}' not readable", id))
            })?;
        Ok((node, shifted))
    }

    /// Delete `id` and its entire subtree, closing the gap it leaves
    ///
    /// # Errors
    ///
    /// - `NotFound` if `id` does not exist in the tenant
    /// - `NotIndexed` if the tenant has rows without bounds
    pub async fn delete(&self, tenant: TenantId, id: &str) -> Result<DeleteResult, HierarchyError> {
        validate_id(id, self.config.max_id_len)?;

        let _token = self
            .locks
            .acquire(tenant, self.config.lock_timeout())
            .await?;
        let conn = self.db.connect_with_timeout().await.storage(tenant)?;
        self.db.begin_write(&conn).await.storage(tenant)?;

        let result = self.delete_in_txn(&conn, tenant, id).await;
        let (deleted, shifted) = self
            .db
            .finish(&conn, result, |e| HierarchyError::from_storage(tenant, e))
            .await?;

        tracing::info!(
            "Deleted node '{}' and {} descendant(s) from tenant {} ({} right / {} left bound(s) contracted)",
            id,
            deleted.deleted_count.saturating_sub(1),
            tenant,
            shifted.rights_moved,
            shifted.lefts_moved
        );
        Ok(deleted)
    }

    pub(crate) async fn delete_in_txn(
        &self,
        conn: &Connection,
        tenant: TenantId,
        id: &str,
    ) -> Result<(DeleteResult, ShiftCounts), HierarchyError> {
        ensure_indexed(&self.db, conn, tenant).await?;

        let removed = self
            .db
            .db_get_node(conn, tenant, id)
            .await
            .storage(tenant)?
            .ok_or_else(|| HierarchyError::not_found(tenant, id))?
            .bounds
            .ok_or_else(|| HierarchyError::not_indexed(tenant, 1))?;

        let deleted_count = self
            .db
            .db_delete_range(conn, tenant, removed)
            .await
            .storage(tenant)?;
        let shifted = self
            .db
            .db_shift_for_delete(conn, tenant, removed)
            .await
            .storage(tenant)?;
        tracing::debug!(
            "Closed gap {} (width {}) in tenant {}: {:?}",
            removed,
            removed.width(),
            tenant,
            shifted
        );

        if self.config.verify_after_mutation {
            verify_tenant(&self.db, conn, tenant).await?;
        }

        Ok((
            DeleteResult {
                deleted_count,
                removed,
            },
            shifted,
        ))
    }

    /// Replace the title of `id`; bounds are never touched
    ///
    /// Payload-only, so it does not take the tenant's mutation token.
    pub async fn update(
        &self,
        tenant: TenantId,
        id: &str,
        title: &str,
    ) -> Result<Node, HierarchyError> {
        validate_id(id, self.config.max_id_len)?;

        let conn = self.db.connect_with_timeout().await.storage(tenant)?;
        self.db.begin_write(&conn).await.storage(tenant)?;
        let result = self.update_in_txn(&conn, tenant, id, title).await;
        let node = self
            .db
            .finish(&conn, result, |e| HierarchyError::from_storage(tenant, e))
            .await?;

        tracing::debug!("Updated title of node '{}' in tenant {}", id, tenant);
        Ok(node)
    }

    async fn update_in_txn(
        &self,
        conn: &Connection,
        tenant: TenantId,
        id: &str,
        title: &str,
    ) -> Result<Node, HierarchyError> {
        let updated = self
            .db
            .db_update_title(conn, tenant, id, title)
            .await
            .storage(tenant)?;
        if updated == 0 {
            return Err(HierarchyError::not_found(tenant, id));
        }

        self.db
            .db_get_node(conn, tenant, id)
            .await
            .storage(tenant)?
            .ok_or_else(|| HierarchyError::not_found(tenant, id))?
            .into_indexed()
            .ok_or_else(|| HierarchyError::not_indexed(tenant, 1))
    }

    /// Reparent `id` under `new_parent_id`
    ///
    /// Not supported by this index: delete the subtree and insert it again
    /// under the new parent instead.
    pub async fn move_node(
        &self,
        _tenant: TenantId,
        id: &str,
        new_parent_id: Option<&str>,
    ) -> Result<Node, HierarchyError> {
        validate_id(id, self.config.max_id_len)?;
        if let Some(parent) = normalize_parent(new_parent_id) {
            validate_id(parent, self.config.max_id_len)?;
        }
        Err(HierarchyError::unsupported(
            "move",
            "reparenting is expressed as delete followed by insert under the new parent",
        ))
    }
}
