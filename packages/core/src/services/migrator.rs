//! Tree Migrator - Bulk Rebuild of Nested-Set Bounds
//!
//! Converts a tenant's adjacency list (`parent_id` pointers) into fresh,
//! gap-free bounds. Used once per tenant on cold start, after
//! [`TreeMigrator::import_legacy`], and by operators to re-derive a damaged
//! index from parent pointers.
//!
//! # Numbering
//!
//! Depth-first walk with pre/post numbering. The walk is iterative: an
//! explicit stack of enter/exit frames and a single accumulator, so deep
//! trees cannot overflow the call stack. Roots are numbered one after another
//! in sibling order, so a forest gets disjoint, ordered top-level intervals.
//!
//! # Sibling order
//!
//! Children of one parent are numbered by `created_at` ascending, then by
//! insertion sequence. Both are stored columns, so the order is the same on
//! every run and every platform.
//!
//! # Atomicity
//!
//! The whole tenant is numbered in memory first. Orphans and cycles are
//! rejected before any row is written; the writes then run inside one
//! `BEGIN IMMEDIATE` transaction, so readers see either the old bounds or the
//! new ones.

use crate::db::{DatabaseService, DbInsertNodeParams, StoredNode};
use crate::models::{normalize_parent, validate_id, Bounds, LegacyNode, TenantId};
use crate::services::config::HierarchyConfig;
use crate::services::error::{HierarchyError, StorageResultExt};
use crate::services::query_service::verify_tenant;
use crate::services::tenant_lock::TenantLocks;
use libsql::Connection;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

/// One adjacency-list row handed to [`number_forest`]
#[derive(Debug, Clone, Copy)]
pub struct AdjacencyRow<'a> {
    pub id: &'a str,
    pub parent_id: Option<&'a str>,
}

/// Why an adjacency list cannot be numbered
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NumberingError {
    #[error("id '{0}' appears more than once")]
    DuplicateId(String),

    #[error("node '{id}' references missing parent '{parent_id}'")]
    Orphan { id: String, parent_id: String },

    #[error("{} node(s) unreachable from any root (parent cycle), e.g. '{}'", .ids.len(), .ids.first().map(String::as_str).unwrap_or(""))]
    Cycle { ids: Vec<String> },
}

/// Outcome of a successful rebuild
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildReport {
    pub tenant: TenantId,
    /// Rows numbered
    pub nodes: usize,
    /// Rows without a parent
    pub roots: usize,
    /// Rows whose stored bounds actually changed
    pub rewritten: usize,
    /// Largest right bound after the rebuild (`2 * nodes`)
    pub max_right: i64,
}

enum Frame {
    Enter(usize),
    Exit { index: usize, left: i64 },
}

/// Assign pre/post-order bounds to every row
///
/// `rows` must already be in sibling order; children keep their relative
/// input order. Returns one `Bounds` per input row, at the same index.
///
/// # Errors
///
/// - `DuplicateId` if an id occurs twice
/// - `Orphan` if a parent id names no row
/// - `Cycle` if some rows cannot be reached from any root
pub fn number_forest(rows: &[AdjacencyRow<'_>]) -> Result<Vec<Bounds>, NumberingError> {
    let mut position: HashMap<&str, usize> = HashMap::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        if position.insert(row.id, i).is_some() {
            return Err(NumberingError::DuplicateId(row.id.to_string()));
        }
    }

    let mut roots = Vec::new();
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); rows.len()];
    for (i, row) in rows.iter().enumerate() {
        match row.parent_id {
            None => roots.push(i),
            Some(parent) => match position.get(parent) {
                Some(&p) => children[p].push(i),
                None => {
                    return Err(NumberingError::Orphan {
                        id: row.id.to_string(),
                        parent_id: parent.to_string(),
                    })
                }
            },
        }
    }

    let mut bounds: Vec<Option<Bounds>> = vec![None; rows.len()];
    let mut counter: i64 = 0;
    let mut stack: Vec<Frame> = roots.iter().rev().map(|&r| Frame::Enter(r)).collect();

    while let Some(frame) = stack.pop() {
        match frame {
            Frame::Enter(i) => {
                counter += 1;
                stack.push(Frame::Exit {
                    index: i,
                    left: counter,
                });
                stack.extend(children[i].iter().rev().map(|&c| Frame::Enter(c)));
            }
            Frame::Exit { index, left } => {
                counter += 1;
                bounds[index] = Some(Bounds::new(left, counter));
            }
        }
    }

    let unreachable: Vec<String> = rows
        .iter()
        .zip(&bounds)
        .filter(|(_, b)| b.is_none())
        .map(|(row, _)| row.id.to_string())
        .collect();
    if !unreachable.is_empty() {
        return Err(NumberingError::Cycle { ids: unreachable });
    }

    Ok(bounds.into_iter().flatten().collect())
}

/// Rebuilds nested-set bounds from parent pointers
#[derive(Debug, Clone)]
pub struct TreeMigrator {
    db: Arc<DatabaseService>,
    locks: Arc<TenantLocks>,
    config: HierarchyConfig,
}

impl TreeMigrator {
    pub fn new(db: Arc<DatabaseService>, locks: Arc<TenantLocks>, config: HierarchyConfig) -> Self {
        Self { db, locks, config }
    }

    /// Re-derive every bound of `tenant` from its parent pointers
    ///
    /// Existing bounds are overwritten, never merged. An empty tenant is a
    /// no-op that reports zero nodes.
    ///
    /// # Errors
    ///
    /// - `CorruptionDetected` for orphans, cycles, or (with
    ///   `verify_after_mutation`) a failed post-check; nothing is written
    /// - `ConcurrencyConflict` if another mutation holds the tenant
    /// - `StorageFailure` on backend errors; the transaction is rolled back
    pub async fn rebuild(&self, tenant: TenantId) -> Result<RebuildReport, HierarchyError> {
        let _token = self
            .locks
            .acquire(tenant, self.config.lock_timeout())
            .await?;
        let conn = self.db.connect_with_timeout().await.storage(tenant)?;
        self.db.begin_write(&conn).await.storage(tenant)?;

        let result = self.rebuild_in_txn(&conn, tenant).await;
        let report = self
            .db
            .finish(&conn, result, |e| HierarchyError::from_storage(tenant, e))
            .await?;

        tracing::info!(
            "Rebuilt tenant {}: {} node(s), {} root(s), {} rewritten, max right {}",
            report.tenant,
            report.nodes,
            report.roots,
            report.rewritten,
            report.max_right
        );
        Ok(report)
    }

    async fn rebuild_in_txn(
        &self,
        conn: &Connection,
        tenant: TenantId,
    ) -> Result<RebuildReport, HierarchyError> {
        let rows: Vec<StoredNode> = self.db.db_load_tenant(conn, tenant).await.storage(tenant)?;

        let adjacency: Vec<AdjacencyRow<'_>> = rows
            .iter()
            .map(|row| AdjacencyRow {
                id: &row.id,
                parent_id: normalize_parent(row.parent_id.as_deref()),
            })
            .collect();

        let numbered = number_forest(&adjacency).map_err(|e| {
            tracing::error!("Refusing to rebuild tenant {}: {}", tenant, e);
            HierarchyError::corruption(tenant, e.to_string())
        })?;

        let mut rewritten = 0;
        for (row, bounds) in rows.iter().zip(&numbered) {
            if row.bounds == Some(*bounds) {
                continue;
            }
            self.db
                .db_set_bounds(conn, row.seq, *bounds)
                .await
                .storage(tenant)?;
            rewritten += 1;
        }
        tracing::debug!(
            "Tenant {}: wrote bounds for {} of {} row(s)",
            tenant,
            rewritten,
            rows.len()
        );

        if self.config.verify_after_mutation {
            verify_tenant(&self.db, conn, tenant).await?;
        }

        Ok(RebuildReport {
            tenant,
            nodes: rows.len(),
            roots: adjacency.iter().filter(|r| r.parent_id.is_none()).count(),
            rewritten,
            max_right: numbered.iter().map(|b| b.right).max().unwrap_or(0),
        })
    }

    /// Store adjacency-list rows without bounds, all or nothing
    ///
    /// Rows keep the batch order as their sibling order. The tenant reports
    /// `NotIndexed` until [`TreeMigrator::rebuild`] runs.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for a malformed id or parent id
    /// - `DuplicateId` if an id already exists or repeats within the batch
    pub async fn import_legacy(
        &self,
        tenant: TenantId,
        nodes: Vec<LegacyNode>,
    ) -> Result<usize, HierarchyError> {
        for node in &nodes {
            validate_id(&node.id, self.config.max_id_len)?;
            if let Some(parent) = normalize_parent(node.parent_id.as_deref()) {
                validate_id(parent, self.config.max_id_len)?;
            }
        }

        let _token = self
            .locks
            .acquire(tenant, self.config.lock_timeout())
            .await?;
        let conn = self.db.connect_with_timeout().await.storage(tenant)?;
        self.db.begin_write(&conn).await.storage(tenant)?;

        let result = self.import_in_txn(&conn, tenant, &nodes).await;
        let imported = self
            .db
            .finish(&conn, result, |e| HierarchyError::from_storage(tenant, e))
            .await?;

        tracing::info!(
            "Imported {} legacy node(s) into tenant {}",
            imported,
            tenant
        );
        Ok(imported)
    }

    async fn import_in_txn(
        &self,
        conn: &Connection,
        tenant: TenantId,
        nodes: &[LegacyNode],
    ) -> Result<usize, HierarchyError> {
        let mut batch_ids = HashSet::with_capacity(nodes.len());
        for node in nodes {
            if !batch_ids.insert(node.id.as_str())
                || self
                    .db
                    .db_get_node(conn, tenant, &node.id)
                    .await
                    .storage(tenant)?
                    .is_some()
            {
                return Err(HierarchyError::duplicate_id(tenant, node.id.clone()));
            }

            self.db
                .db_insert_node(
                    conn,
                    DbInsertNodeParams {
                        tenant,
                        id: &node.id,
                        title: &node.title,
                        parent_id: normalize_parent(node.parent_id.as_deref()),
                        bounds: None,
                    },
                )
                .await
                .storage(tenant)?;
        }
        Ok(nodes.len())
    }
}
