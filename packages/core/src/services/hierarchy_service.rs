//! Hierarchy Service - Entry Point for the Owning Service
//!
//! Bundles [`TreeMigrator`], [`TreeIndex`] and [`QueryEngine`] over one
//! database and one set of tenant locks, and puts every public operation
//! under the configured deadline.
//!
//! # Deadlines
//!
//! An operation that runs past `operation_timeout_ms` is dropped. Dropping
//! it drops its connection, which rolls back any open transaction, and its
//! mutation token, which frees the tenant. The caller gets
//! `DeadlineExceeded`; the bounds stay at their last committed state.
//!
//! # Examples
//!
//! ```rust,no_run
//! use nodespace_hierarchy::services::{HierarchyConfig, HierarchyService};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let service = HierarchyService::new("./data/hierarchy.db".into(), HierarchyConfig::default()).await?;
//!
//! let tv = service.insert(1, "2", "TELEVISIONS", Some("1")).await?;
//! for entry in service.list_tree(1).await? {
//!     println!("{}", entry.label());
//! }
//! # Ok(())
//! # }
//! ```

use crate::db::DatabaseService;
use crate::models::{DeleteResult, LegacyNode, Node, TenantId, TreeEntry};
use crate::services::config::HierarchyConfig;
use crate::services::error::HierarchyError;
use crate::services::migrator::{RebuildReport, TreeMigrator};
use crate::services::query_service::QueryEngine;
use crate::services::tenant_lock::TenantLocks;
use crate::services::tree_index::TreeIndex;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

/// Nested-set index operations for all tenants of one database
#[derive(Debug, Clone)]
pub struct HierarchyService {
    db: Arc<DatabaseService>,
    locks: Arc<TenantLocks>,
    migrator: TreeMigrator,
    index: TreeIndex,
    queries: QueryEngine,
    config: HierarchyConfig,
}

impl HierarchyService {
    /// Open (or create) the database at `db_path` and build the service
    pub async fn new(db_path: PathBuf, config: HierarchyConfig) -> Result<Self, HierarchyError> {
        let db = DatabaseService::with_busy_timeout(db_path, config.busy_timeout_ms).await?;
        Ok(Self::with_database(Arc::new(db), config))
    }

    /// Build the service over an already-open database
    pub fn with_database(db: Arc<DatabaseService>, config: HierarchyConfig) -> Self {
        let locks = Arc::new(TenantLocks::new());
        Self {
            migrator: TreeMigrator::new(Arc::clone(&db), Arc::clone(&locks), config.clone()),
            index: TreeIndex::new(Arc::clone(&db), Arc::clone(&locks), config.clone()),
            queries: QueryEngine::new(Arc::clone(&db)).with_max_id_len(config.max_id_len),
            db,
            locks,
            config,
        }
    }

    pub fn config(&self) -> &HierarchyConfig {
        &self.config
    }

    /// Underlying database, for diagnostics and tests
    pub fn database(&self) -> &Arc<DatabaseService> {
        &self.db
    }

    async fn with_deadline<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T, HierarchyError>>,
    ) -> Result<T, HierarchyError> {
        match tokio::time::timeout(self.config.operation_timeout(), fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    "Operation '{}' exceeded {}ms and was rolled back",
                    operation,
                    self.config.operation_timeout_ms
                );
                Err(HierarchyError::deadline_exceeded(
                    operation,
                    self.config.operation_timeout_ms,
                ))
            }
        }
    }

    //
    // MUTATIONS
    //

    /// See [`TreeMigrator::rebuild`]
    pub async fn rebuild(&self, tenant: TenantId) -> Result<RebuildReport, HierarchyError> {
        self.with_deadline("rebuild", self.migrator.rebuild(tenant))
            .await
    }

    /// See [`TreeMigrator::import_legacy`]
    pub async fn import_legacy(
        &self,
        tenant: TenantId,
        nodes: Vec<LegacyNode>,
    ) -> Result<usize, HierarchyError> {
        self.with_deadline("import_legacy", self.migrator.import_legacy(tenant, nodes))
            .await
    }

    /// See [`TreeIndex::insert`]
    pub async fn insert(
        &self,
        tenant: TenantId,
        id: &str,
        title: &str,
        parent_id: Option<&str>,
    ) -> Result<Node, HierarchyError> {
        self.with_deadline("insert", self.index.insert(tenant, id, title, parent_id))
            .await
    }

    /// See [`TreeIndex::delete`]
    pub async fn delete(&self, tenant: TenantId, id: &str) -> Result<DeleteResult, HierarchyError> {
        self.with_deadline("delete", self.index.delete(tenant, id))
            .await
    }

    /// See [`TreeIndex::update`]
    pub async fn update(
        &self,
        tenant: TenantId,
        id: &str,
        title: &str,
    ) -> Result<Node, HierarchyError> {
        self.with_deadline("update", self.index.update(tenant, id, title))
            .await
    }

    /// Always `Unsupported`; see [`TreeIndex::move_node`]
    pub async fn move_node(
        &self,
        tenant: TenantId,
        id: &str,
        new_parent_id: Option<&str>,
    ) -> Result<Node, HierarchyError> {
        self.with_deadline("move", self.index.move_node(tenant, id, new_parent_id))
            .await
    }

    //
    // QUERIES
    //

    pub async fn get_node(&self, tenant: TenantId, id: &str) -> Result<Node, HierarchyError> {
        self.with_deadline("get_node", self.queries.get_node(tenant, id))
            .await
    }

    pub async fn get_parents(
        &self,
        tenant: TenantId,
        id: &str,
    ) -> Result<Vec<Node>, HierarchyError> {
        self.with_deadline("get_parents", self.queries.get_parents(tenant, id))
            .await
    }

    pub async fn get_children(
        &self,
        tenant: TenantId,
        id: &str,
    ) -> Result<Vec<Node>, HierarchyError> {
        self.with_deadline("get_children", self.queries.get_children(tenant, id))
            .await
    }

    pub async fn get_descendants(
        &self,
        tenant: TenantId,
        id: &str,
    ) -> Result<Vec<Node>, HierarchyError> {
        self.with_deadline("get_descendants", self.queries.get_descendants(tenant, id))
            .await
    }

    pub async fn get_roots(&self, tenant: TenantId) -> Result<Vec<Node>, HierarchyError> {
        self.with_deadline("get_roots", self.queries.get_roots(tenant))
            .await
    }

    pub async fn list_tree(&self, tenant: TenantId) -> Result<Vec<TreeEntry>, HierarchyError> {
        self.with_deadline("list_tree", self.queries.list_tree(tenant))
            .await
    }

    /// See [`QueryEngine::verify`]
    pub async fn verify(&self, tenant: TenantId) -> Result<usize, HierarchyError> {
        self.with_deadline("verify", self.queries.verify(tenant))
            .await
    }
}
