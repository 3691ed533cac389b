//! Node Data Structures
//!
//! This module defines the `Node` struct stored in the nested-set index and
//! the small value types that travel with it.
//!
//! # Architecture
//!
//! - **Tenant-scoped**: every node belongs to exactly one tenant; ids are unique
//!   only within that tenant
//! - **Dual representation**: `parent_id` (adjacency list) is kept alongside the
//!   `bounds` (nested set) so the index can be rebuilt from parent pointers at any time
//! - **Opaque payload**: `title` is never interpreted by the tree engine
//!
//! # Examples
//!
//! ```rust
//! use nodespace_hierarchy::models::{Bounds, LegacyNode};
//!
//! let legacy = LegacyNode::new("8", "FLASH", Some("7"));
//! assert_eq!(legacy.parent_id.as_deref(), Some("7"));
//!
//! let flash = Bounds::new(12, 13);
//! assert!(Bounds::new(11, 14).is_ancestor_of(&flash));
//! ```

use crate::models::Bounds;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tenant (organization) identifier partitioning the whole tree space
pub type TenantId = i64;

/// Validation errors for node identifiers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid node ID format: {0}")]
    InvalidId(String),
}

/// One node of a tenant's hierarchy with its nested-set bounds
///
/// # Fields
///
/// - `tenant`: Organization scope
/// - `id`: Stable external identifier, unique within `tenant`
/// - `title`: Opaque payload
/// - `parent_id`: Adjacency-list pointer (`None` for roots)
/// - `bounds`: Nested-set interval; `left < right` always
/// - `created_at`: Timestamp when node was created
/// - `modified_at`: Timestamp when node was last modified
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub tenant: TenantId,
    pub id: String,
    pub title: String,
    pub parent_id: Option<String>,
    pub bounds: Bounds,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Node {
    pub fn left(&self) -> i64 {
        self.bounds.left
    }

    pub fn right(&self) -> i64 {
        self.bounds.right
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// `self` is a strict ancestor of `other` (same tenant only)
    pub fn is_ancestor_of(&self, other: &Node) -> bool {
        self.tenant == other.tenant && self.bounds.is_ancestor_of(&other.bounds)
    }
}

/// Adjacency-list row without bounds, the input to a cold-start rebuild
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyNode {
    pub id: String,
    pub title: String,
    pub parent_id: Option<String>,
}

impl LegacyNode {
    pub fn new(id: impl Into<String>, title: impl Into<String>, parent_id: Option<&str>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            parent_id: parent_id.map(str::to_string),
        }
    }
}

/// One line of the preorder listing produced by `list_tree`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeEntry {
    /// Number of ancestors (roots have depth 0)
    pub depth: usize,
    pub node: Node,
}

impl TreeEntry {
    pub fn title(&self) -> &str {
        &self.node.title
    }

    /// `"<depth>-<title>"`, the compact form used by diagnostics and tests
    pub fn label(&self) -> String {
        format!("{}-{}", self.depth, self.node.title)
    }
}

/// Outcome of deleting a node and its subtree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResult {
    /// Number of rows removed (the node plus all descendants)
    pub deleted_count: u64,
    /// Bounds the removed subtree occupied before the delete
    pub removed: Bounds,
}

/// Validate an external node id
///
/// Ids must be non-empty, free of surrounding whitespace, and at most
/// `max_len` bytes long.
pub fn validate_id(id: &str, max_len: usize) -> Result<(), ValidationError> {
    if id.is_empty() {
        return Err(ValidationError::MissingField("id".to_string()));
    }
    if id.trim() != id {
        return Err(ValidationError::InvalidId(format!(
            "'{}' has leading or trailing whitespace",
            id
        )));
    }
    if id.len() > max_len {
        return Err(ValidationError::InvalidId(format!(
            "'{}' exceeds {} bytes",
            id, max_len
        )));
    }
    if id.chars().any(char::is_control) {
        return Err(ValidationError::InvalidId(format!(
            "'{}' contains control characters",
            id.escape_debug()
        )));
    }
    Ok(())
}

/// Treat an empty parent id as "no parent"
pub fn normalize_parent(parent_id: Option<&str>) -> Option<&str> {
    parent_id.filter(|p| !p.is_empty())
}
