//! Query Engine - Read-Only Nested-Set Queries
//!
//! Every query is an interval comparison against the tenant's bounds; no
//! query walks parent pointers.
//!
//! # Architecture
//!
//! - **Snapshot reads**: each call opens its own connection and a deferred
//!   read transaction, so multi-statement queries never observe a mutation
//!   half-applied. Under WAL, readers never block each other or writers.
//! - **Tenant-scoped**: every statement filters on `tenant`; no query accepts
//!   or returns another tenant's rows
//! - **NotIndexed guard**: a tenant that still has rows without bounds
//!   answers `NotIndexed` instead of silently omitting them
//!
//! # Query Pattern Examples
//!
//! - Ancestors: `p.lft < n.lft AND n.rgt < p.rgt ORDER BY p.lft`
//! - Descendants: `d.lft > n.lft AND d.rgt < n.rgt ORDER BY d.lft`
//! - Children: descendants with no descendant in between
//!
//! # Examples
//!
//! ```rust,no_run
//! use nodespace_hierarchy::db::DatabaseService;
//! use nodespace_hierarchy::services::QueryEngine;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let db = Arc::new(DatabaseService::new("./data/hierarchy.db".into()).await?);
//! let queries = QueryEngine::new(db);
//!
//! for parent in queries.get_parents(1, "8").await? {
//!     println!("{}", parent.title);
//! }
//! # Ok(())
//! # }
//! ```

use crate::db::{DatabaseService, StoredNode};
use crate::models::{
    normalize_parent, preorder_depths, validate_id, verify_forest, Bounds, IndexedEntry, Node,
    TenantId, TreeEntry,
};
use crate::services::config::DEFAULT_MAX_ID_LEN;
use crate::services::error::{HierarchyError, StorageResultExt};
use libsql::Connection;
use std::sync::Arc;

#[cfg(test)]
mod query_service_test;

/// Fail with `NotIndexed` if any row of the tenant is still missing bounds
pub(crate) async fn ensure_indexed(
    db: &DatabaseService,
    conn: &Connection,
    tenant: TenantId,
) -> Result<(), HierarchyError> {
    let unindexed = db.db_count_unindexed(conn, tenant).await.storage(tenant)?;
    if unindexed > 0 {
        return Err(HierarchyError::not_indexed(tenant, unindexed));
    }
    Ok(())
}

/// Check invariants 1-3 and parent pointers for the whole tenant
///
/// Runs on the caller's connection so mutations can check their own
/// uncommitted state before commit. Returns the number of rows checked.
pub(crate) async fn verify_tenant(
    db: &DatabaseService,
    conn: &Connection,
    tenant: TenantId,
) -> Result<usize, HierarchyError> {
    ensure_indexed(db, conn, tenant).await?;
    let rows = db.db_indexed_nodes(conn, tenant).await.storage(tenant)?;

    let entries: Vec<IndexedEntry<'_>> = rows
        .iter()
        .filter_map(|row| {
            row.bounds.map(|bounds| IndexedEntry {
                id: &row.id,
                parent_id: normalize_parent(row.parent_id.as_deref()),
                bounds,
            })
        })
        .collect();

    verify_forest(&entries).map_err(|violation| {
        tracing::error!("Tenant {} failed verification: {}", tenant, violation);
        HierarchyError::violation(tenant, &violation)
    })?;

    Ok(entries.len())
}

#[derive(Debug, Clone, Copy)]
enum Related {
    Ancestors,
    Children,
    Descendants,
}

fn indexed(rows: Vec<StoredNode>) -> Vec<Node> {
    rows.into_iter().filter_map(StoredNode::into_indexed).collect()
}

/// Read-only queries over a tenant's nested-set index
#[derive(Debug, Clone)]
pub struct QueryEngine {
    db: Arc<DatabaseService>,
    max_id_len: usize,
}

impl QueryEngine {
    pub fn new(db: Arc<DatabaseService>) -> Self {
        Self {
            db,
            max_id_len: DEFAULT_MAX_ID_LEN,
        }
    }

    /// Override the id length accepted by lookups
    pub fn with_max_id_len(mut self, max_id_len: usize) -> Self {
        self.max_id_len = max_id_len;
        self
    }

    async fn open_read(&self, tenant: TenantId) -> Result<Connection, HierarchyError> {
        let conn = self.db.connect_with_timeout().await.storage(tenant)?;
        self.db.begin_read(&conn).await.storage(tenant)?;
        Ok(conn)
    }

    /// Load one indexed node or fail with `NotFound`
    async fn locate(
        &self,
        conn: &Connection,
        tenant: TenantId,
        id: &str,
    ) -> Result<Node, HierarchyError> {
        validate_id(id, self.max_id_len)?;
        ensure_indexed(&self.db, conn, tenant).await?;
        let row = self
            .db
            .db_get_node(conn, tenant, id)
            .await
            .storage(tenant)?
            .ok_or_else(|| HierarchyError::not_found(tenant, id))?;
        row.into_indexed()
            .ok_or_else(|| HierarchyError::not_indexed(tenant, 1))
    }

    /// Fetch a single node
    ///
    /// # Errors
    ///
    /// `NotFound` if `id` does not exist in `tenant`.
    pub async fn get_node(&self, tenant: TenantId, id: &str) -> Result<Node, HierarchyError> {
        let conn = self.open_read(tenant).await?;
        let result = self.locate(&conn, tenant, id).await;
        self
            .db
            .finish(&conn, result, |e| HierarchyError::from_storage(tenant, e))
            .await
    }

    /// Ancestors of `id`, root first, immediate parent last
    ///
    /// Empty for a root.
    pub async fn get_parents(
        &self,
        tenant: TenantId,
        id: &str,
    ) -> Result<Vec<Node>, HierarchyError> {
        let conn = self.open_read(tenant).await?;
        let result = self.related_in(&conn, tenant, id, Related::Ancestors).await;
        self
            .db
            .finish(&conn, result, |e| HierarchyError::from_storage(tenant, e))
            .await
    }

    /// Nodes exactly one level below `id`, in sibling order
    pub async fn get_children(
        &self,
        tenant: TenantId,
        id: &str,
    ) -> Result<Vec<Node>, HierarchyError> {
        let conn = self.open_read(tenant).await?;
        let result = self.related_in(&conn, tenant, id, Related::Children).await;
        self
            .db
            .finish(&conn, result, |e| HierarchyError::from_storage(tenant, e))
            .await
    }

    /// The whole subtree below `id` (excluding `id`), in preorder
    pub async fn get_descendants(
        &self,
        tenant: TenantId,
        id: &str,
    ) -> Result<Vec<Node>, HierarchyError> {
        let conn = self.open_read(tenant).await?;
        let result = self
            .related_in(&conn, tenant, id, Related::Descendants)
            .await;
        self
            .db
            .finish(&conn, result, |e| HierarchyError::from_storage(tenant, e))
            .await
    }

    async fn related_in(
        &self,
        conn: &Connection,
        tenant: TenantId,
        id: &str,
        related: Related,
    ) -> Result<Vec<Node>, HierarchyError> {
        let node = self.locate(conn, tenant, id).await?;
        let rows = match related {
            Related::Ancestors => self.db.db_ancestors(conn, tenant, node.bounds).await,
            // A leaf's interval has no room for anything inside it
            Related::Children | Related::Descendants if node.bounds.is_leaf() => {
                return Ok(Vec::new())
            }
            Related::Children => self.db.db_children(conn, tenant, node.bounds).await,
            Related::Descendants => self.db.db_descendants(conn, tenant, node.bounds).await,
        }
        .storage(tenant)?;
        Ok(indexed(rows))
    }

    /// Top-level nodes of the tenant's forest, left to right
    pub async fn get_roots(&self, tenant: TenantId) -> Result<Vec<Node>, HierarchyError> {
        let conn = self.open_read(tenant).await?;
        let result = self.roots_in(&conn, tenant).await;
        self
            .db
            .finish(&conn, result, |e| HierarchyError::from_storage(tenant, e))
            .await
    }

    async fn roots_in(
        &self,
        conn: &Connection,
        tenant: TenantId,
    ) -> Result<Vec<Node>, HierarchyError> {
        ensure_indexed(&self.db, conn, tenant).await?;
        let rows = self.db.db_roots(conn, tenant).await.storage(tenant)?;
        Ok(indexed(rows))
    }

    /// Depth-annotated preorder listing of the whole tenant
    ///
    /// Roots have depth 0. The sequence reconstructs the tree shape.
    pub async fn list_tree(&self, tenant: TenantId) -> Result<Vec<TreeEntry>, HierarchyError> {
        let conn = self.open_read(tenant).await?;
        let result = self.preorder_in(&conn, tenant).await;
        let nodes = self
            .db
            .finish(&conn, result, |e| HierarchyError::from_storage(tenant, e))
            .await?;

        let bounds: Vec<Bounds> = nodes.iter().map(|n| n.bounds).collect();
        let depths = preorder_depths(&bounds);
        Ok(depths
            .into_iter()
            .zip(nodes)
            .map(|(depth, node)| TreeEntry { depth, node })
            .collect())
    }

    async fn preorder_in(
        &self,
        conn: &Connection,
        tenant: TenantId,
    ) -> Result<Vec<Node>, HierarchyError> {
        ensure_indexed(&self.db, conn, tenant).await?;
        let rows = self
            .db
            .db_indexed_nodes(conn, tenant)
            .await
            .storage(tenant)?;
        Ok(indexed(rows))
    }

    /// Check the tenant's index and report the number of nodes checked
    ///
    /// # Errors
    ///
    /// `CorruptionDetected` describing the first violation found. Nothing is
    /// repaired.
    pub async fn verify(&self, tenant: TenantId) -> Result<usize, HierarchyError> {
        let conn = self.open_read(tenant).await?;
        let result = verify_tenant(&self.db, &conn, tenant).await;
        self
            .db
            .finish(&conn, result, |e| HierarchyError::from_storage(tenant, e))
            .await
    }
}
