//! Data Models
//!
//! This module contains the data structures used by the nested-set index:
//!
//! - `Bounds` - Left/right interval plus the pure interval algebra
//! - `Node` - One tenant-scoped node with its bounds
//! - `LegacyNode` - Adjacency-list input for cold-start rebuilds
//! - `TreeEntry` - Depth-annotated preorder listing row

pub mod bounds;
mod node;

pub use bounds::{
    depth_of, parent_candidate, preorder_depths, verify_forest, Bounds, IndexedEntry, Relation,
    Violation,
};
pub use node::{
    normalize_parent, validate_id, DeleteResult, LegacyNode, Node, TenantId, TreeEntry,
    ValidationError,
};
