//! NodeSpace Hierarchy - Nested-Set Index
//!
//! This crate maintains a nested-set (MPTT) index over tenant-scoped
//! hierarchies so ancestor, descendant and subtree queries are interval
//! comparisons instead of recursive traversals.
//!
//! # Architecture
//!
//! - **Interval algebra**: pure bounds arithmetic and invariant checks, no I/O
//! - **libsql/Turso**: embedded SQLite-compatible storage, one transaction per operation
//! - **Per-tenant serialization**: structural mutations hold an exclusive tenant token
//! - **Rebuildable**: parent pointers are stored next to the bounds, so the
//!   index can always be re-derived
//!
//! # Modules
//!
//! - [`models`] - Data structures (Bounds, Node, TreeEntry) and the interval algebra
//! - [`services`] - TreeMigrator, TreeIndex, QueryEngine and the HierarchyService facade
//! - [`db`] - Database layer with libsql integration

pub mod db;
pub mod models;
pub mod services;

// Re-export commonly used types
pub use models::*;
pub use services::*;
