//! Business Services
//!
//! This module contains the nested-set maintenance services:
//!
//! - `TreeMigrator` - Bulk rebuild of bounds from parent pointers, legacy import
//! - `TreeIndex` - Incremental insert/delete/update with per-tenant serialization
//! - `QueryEngine` - Ancestor, child, descendant and preorder queries
//! - `HierarchyService` - Facade applying the operation deadline to all of the above
//!
//! Services coordinate between the database layer and the interval algebra in
//! `models`, holding tenant locks and transaction boundaries.

pub mod config;
pub mod error;
pub mod hierarchy_service;
pub mod migrator;
pub mod query_service;
pub mod tenant_lock;
pub mod tree_index;

pub use config::HierarchyConfig;
pub use error::{HierarchyError, StorageResultExt};
pub use hierarchy_service::HierarchyService;
pub use migrator::{number_forest, AdjacencyRow, NumberingError, RebuildReport, TreeMigrator};
pub use query_service::QueryEngine;
pub use tenant_lock::{MutationToken, TenantLocks};
pub use tree_index::TreeIndex;
