//! Database Connection Management
//!
//! This module provides the database connection, schema initialization, and
//! every SQL statement the nested-set index runs, using libsql/Turso.
//!
//! # Architecture
//!
//! - **Path-agnostic**: Accepts any valid PathBuf
//! - **WAL mode**: Readers never block each other and see committed snapshots
//! - **Single table**: `tree_nodes` holds both the adjacency list (`parent_id`)
//!   and the nested set (`lft`/`rgt`)
//! - **Connection per operation**: every public operation opens its own
//!   connection, so dropping an operation's future drops the connection and
//!   SQLite rolls back whatever transaction it had open
//!
//! # Database Connection Patterns
//!
//! **ALWAYS use `connect_with_timeout()` in async functions** so concurrent
//! writers wait for the busy timeout instead of failing with `SQLITE_BUSY`.
//!
//! The `db_*` methods take a `&libsql::Connection` and never open or close
//! transactions themselves. Services bracket them with
//! [`DatabaseService::begin_write`] / [`DatabaseService::begin_read`] and
//! [`DatabaseService::finish`].

use crate::db::error::DatabaseError;
use crate::models::{Bounds, Node, TenantId};
use chrono::{DateTime, NaiveDateTime, Utc};
use libsql::{Builder, Connection, Database, Row, Rows};
use std::path::PathBuf;
use std::sync::Arc;

/// Default SQLite busy timeout (milliseconds)
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

/// Database service for managing libsql connection and schema
///
/// # Examples
///
/// ```no_run
/// use nodespace_hierarchy::db::DatabaseService;
/// use std::path::PathBuf;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let db_path = PathBuf::from("/path/to/hierarchy.db");
///     let db_service = DatabaseService::new(db_path).await?;
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct DatabaseService {
    /// libsql database handle (wrapped in Arc for sharing)
    pub db: Arc<Database>,

    /// Path to the database file
    pub db_path: PathBuf,

    busy_timeout_ms: u64,
}

/// A `tree_nodes` row as stored
///
/// Bounds are optional: rows imported from a legacy adjacency list carry no
/// bounds until the tenant is rebuilt.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredNode {
    /// Insertion sequence; tie-breaker for sibling order during rebuild
    pub seq: i64,
    pub tenant: TenantId,
    pub id: String,
    pub title: String,
    pub parent_id: Option<String>,
    pub bounds: Option<Bounds>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl StoredNode {
    /// Convert into an indexed `Node`, or `None` if the row has no bounds yet
    pub fn into_indexed(self) -> Option<Node> {
        let bounds = self.bounds?;
        Some(Node {
            tenant: self.tenant,
            id: self.id,
            title: self.title,
            parent_id: self.parent_id,
            bounds,
            created_at: self.created_at,
            modified_at: self.modified_at,
        })
    }
}

/// Parameters for node insertion (avoids too-many-arguments lint)
pub struct DbInsertNodeParams<'a> {
    pub tenant: TenantId,
    pub id: &'a str,
    pub title: &'a str,
    pub parent_id: Option<&'a str>,
    pub bounds: Option<Bounds>,
}

/// Rows touched by one shift (insert or delete)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShiftCounts {
    pub rights_moved: u64,
    pub lefts_moved: u64,
}

/// Column list shared by every node query, optionally alias-qualified
fn node_columns(alias: &str) -> String {
    [
        "seq",
        "tenant",
        "id",
        "title",
        "parent_id",
        "lft",
        "rgt",
        "created_at",
        "modified_at",
    ]
    .iter()
    .map(|c| format!("{}.{}", alias, c))
    .collect::<Vec<_>>()
    .join(", ")
}

impl DatabaseService {
    /// Create a new DatabaseService with the specified database path
    ///
    /// This will:
    /// 1. Ensure the parent directory exists (create if needed)
    /// 2. Open/create the database file
    /// 3. Initialize the schema (CREATE TABLE IF NOT EXISTS)
    /// 4. Enable WAL mode and the busy timeout
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if:
    /// - Parent directory cannot be created
    /// - Database connection fails
    /// - Schema initialization fails
    pub async fn new(db_path: PathBuf) -> Result<Self, DatabaseError> {
        Self::with_busy_timeout(db_path, DEFAULT_BUSY_TIMEOUT_MS).await
    }

    /// Same as [`DatabaseService::new`] with an explicit busy timeout
    pub async fn with_busy_timeout(
        db_path: PathBuf,
        busy_timeout_ms: u64,
    ) -> Result<Self, DatabaseError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::PermissionDenied {
                        DatabaseError::permission_denied(db_path.clone())
                    } else {
                        DatabaseError::DirectoryCreationFailed(e)
                    }
                })?;
            }
        }

        let db = Builder::new_local(&db_path)
            .build()
            .await
            .map_err(|e| DatabaseError::connection_failed(db_path.clone(), e))?;

        let service = Self {
            db: Arc::new(db),
            db_path,
            busy_timeout_ms,
        };

        service.initialize_schema().await?;

        Ok(service)
    }

    /// Execute a PRAGMA statement
    ///
    /// PRAGMA statements return rows, so we must use query() instead of execute().
    async fn execute_pragma(&self, conn: &Connection, pragma: &str) -> Result<(), DatabaseError> {
        let mut stmt = conn.prepare(pragma).await.map_err(|e| {
            DatabaseError::initialization_failed(format!("Failed to prepare '{}': {}", pragma, e))
        })?;
        let _ = stmt.query(()).await.map_err(|e| {
            DatabaseError::initialization_failed(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        Ok(())
    }

    /// Initialize database schema and configuration
    ///
    /// Idempotent: safe to call on an existing database.
    ///
    /// # Schema
    ///
    /// - `tree_nodes`: one row per node, unique on `(tenant, id)`
    /// - Indexes on `(tenant, lft)`, `(tenant, rgt)`, `(tenant, parent_id)`
    ///
    /// `lft`/`rgt` are deliberately not unique: the shift statements move
    /// many rows at once and would trip a uniqueness check mid-statement.
    async fn initialize_schema(&self) -> Result<(), DatabaseError> {
        let conn = self.connect_with_timeout().await?;

        self.execute_pragma(&conn, "PRAGMA journal_mode = WAL")
            .await?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS tree_nodes (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                tenant INTEGER NOT NULL,
                id TEXT NOT NULL,
                title TEXT NOT NULL,
                parent_id TEXT,
                lft INTEGER,
                rgt INTEGER,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                modified_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE (tenant, id),
                CHECK (lft IS NULL OR rgt IS NULL OR lft < rgt)
            )",
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::initialization_failed(format!(
                "Failed to create tree_nodes table: {}",
                e
            ))
        })?;

        for (name, columns) in [
            ("idx_tree_nodes_lft", "tenant, lft"),
            ("idx_tree_nodes_rgt", "tenant, rgt"),
            ("idx_tree_nodes_parent", "tenant, parent_id"),
        ] {
            conn.execute(
                &format!(
                    "CREATE INDEX IF NOT EXISTS {} ON tree_nodes({})",
                    name, columns
                ),
                (),
            )
            .await
            .map_err(|e| {
                DatabaseError::initialization_failed(format!(
                    "Failed to create index '{}': {}",
                    name, e
                ))
            })?;
        }

        Ok(())
    }

    /// Get a raw connection to the database
    ///
    /// **⚠️ WARNING**: prefer `connect_with_timeout()`; a connection without a
    /// busy timeout fails immediately when another writer holds the lock.
    pub fn connect(&self) -> Result<Connection, DatabaseError> {
        self.db.connect().map_err(DatabaseError::LibsqlError)
    }

    /// Get a connection with the busy timeout configured
    ///
    /// **✅ RECOMMENDED**: Use this for all async functions.
    pub async fn connect_with_timeout(&self) -> Result<Connection, DatabaseError> {
        let conn = self.connect()?;
        self.execute_pragma(&conn, &format!("PRAGMA busy_timeout = {}", self.busy_timeout_ms))
            .await?;
        Ok(conn)
    }

    //
    // TRANSACTION BRACKETS
    //

    /// Start a write transaction that takes the database write lock immediately
    ///
    /// `IMMEDIATE` means a second writer blocks (up to the busy timeout) at
    /// `BEGIN` instead of failing halfway through its shift statements.
    pub async fn begin_write(&self, conn: &Connection) -> Result<(), DatabaseError> {
        conn.execute("BEGIN IMMEDIATE", ())
            .await
            .map_err(|e| DatabaseError::query("Failed to begin write transaction", e))?;
        Ok(())
    }

    /// Start a read transaction so multi-statement reads share one snapshot
    pub async fn begin_read(&self, conn: &Connection) -> Result<(), DatabaseError> {
        conn.execute("BEGIN DEFERRED", ())
            .await
            .map_err(|e| DatabaseError::query("Failed to begin read transaction", e))?;
        Ok(())
    }

    /// Commit on success, roll back on failure
    ///
    /// The only exit from a bracketed operation. A failed commit is rolled
    /// back and handed to `on_commit_error`, so callers map it the same way
    /// as every other statement (busy stays busy). A failed rollback is
    /// logged and the original error wins.
    pub async fn finish<T, E>(
        &self,
        conn: &Connection,
        result: Result<T, E>,
        on_commit_error: impl FnOnce(DatabaseError) -> E,
    ) -> Result<T, E> {
        match result {
            Ok(value) => {
                if let Err(e) = conn.execute("COMMIT", ()).await {
                    let _rollback = conn.execute("ROLLBACK", ()).await;
                    return Err(on_commit_error(DatabaseError::query(
                        "Failed to commit transaction",
                        e,
                    )));
                }
                Ok(value)
            }
            Err(err) => {
                if let Err(e) = conn.execute("ROLLBACK", ()).await {
                    tracing::warn!("Rollback failed after error: {}", e);
                }
                Err(err)
            }
        }
    }

    //
    // ROW MAPPING
    //

    /// Parse timestamp from database - handles both SQLite and RFC3339 formats
    ///
    /// SQLite CURRENT_TIMESTAMP returns: "YYYY-MM-DD HH:MM:SS"
    fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
            return Ok(naive.and_utc());
        }

        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Ok(dt.with_timezone(&Utc));
        }

        Err(DatabaseError::row_mapping(format!(
            "Unable to parse timestamp '{}' as SQLite or RFC3339 format",
            s
        )))
    }

    /// Convert a row selected with [`node_columns`] into a `StoredNode`
    fn row_to_node(row: &Row) -> Result<StoredNode, DatabaseError> {
        let column = |name: &str, e: libsql::Error| {
            DatabaseError::row_mapping(format!("Failed to get {}: {}", name, e))
        };

        let seq: i64 = row.get(0).map_err(|e| column("seq", e))?;
        let tenant: i64 = row.get(1).map_err(|e| column("tenant", e))?;
        let id: String = row.get(2).map_err(|e| column("id", e))?;
        let title: String = row.get(3).map_err(|e| column("title", e))?;
        let parent_id: Option<String> = row.get(4).map_err(|e| column("parent_id", e))?;
        let lft: Option<i64> = row.get(5).map_err(|e| column("lft", e))?;
        let rgt: Option<i64> = row.get(6).map_err(|e| column("rgt", e))?;
        let created_at: String = row.get(7).map_err(|e| column("created_at", e))?;
        let modified_at: String = row.get(8).map_err(|e| column("modified_at", e))?;

        let bounds = match (lft, rgt) {
            (Some(left), Some(right)) => Some(Bounds::new(left, right)),
            _ => None,
        };

        Ok(StoredNode {
            seq,
            tenant,
            id,
            title,
            parent_id,
            bounds,
            created_at: Self::parse_timestamp(&created_at)?,
            modified_at: Self::parse_timestamp(&modified_at)?,
        })
    }

    async fn collect_nodes(mut rows: Rows) -> Result<Vec<StoredNode>, DatabaseError> {
        let mut nodes = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::query("Failed to fetch row", e))?
        {
            nodes.push(Self::row_to_node(&row)?);
        }
        Ok(nodes)
    }

    async fn query_scalar(
        conn: &Connection,
        context: &str,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<i64, DatabaseError> {
        let mut rows = conn
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::query(context, e))?;
        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::query(context, e))?
            .ok_or_else(|| DatabaseError::row_mapping(format!("{}: no row returned", context)))?;
        row.get::<i64>(0)
            .map_err(|e| DatabaseError::query(context, e))
    }

    //
    // NODE STORE OPERATIONS
    // All of these run on a connection the caller has already bracketed.
    //

    /// Retrieve a single node by tenant and id
    pub async fn db_get_node(
        &self,
        conn: &Connection,
        tenant: TenantId,
        id: &str,
    ) -> Result<Option<StoredNode>, DatabaseError> {
        let rows = conn
            .query(
                &format!(
                    "SELECT {} FROM tree_nodes AS n WHERE n.tenant = ? AND n.id = ?",
                    node_columns("n")
                ),
                (tenant, id),
            )
            .await
            .map_err(|e| DatabaseError::query("Failed to execute get_node query", e))?;

        Ok(Self::collect_nodes(rows).await?.into_iter().next())
    }

    /// Number of rows in the tenant that have no bounds yet
    pub async fn db_count_unindexed(
        &self,
        conn: &Connection,
        tenant: TenantId,
    ) -> Result<i64, DatabaseError> {
        Self::query_scalar(
            conn,
            "Failed to count unindexed nodes",
            "SELECT COUNT(*) FROM tree_nodes WHERE tenant = ? AND (lft IS NULL OR rgt IS NULL)",
            [tenant],
        )
        .await
    }

    /// Largest right bound in the tenant (0 when the tenant is empty)
    pub async fn db_max_right(
        &self,
        conn: &Connection,
        tenant: TenantId,
    ) -> Result<i64, DatabaseError> {
        Self::query_scalar(
            conn,
            "Failed to read max right bound",
            "SELECT COALESCE(MAX(rgt), 0) FROM tree_nodes WHERE tenant = ?",
            [tenant],
        )
        .await
    }

    /// Open a two-slot gap at `anchor` (the parent's current right bound)
    ///
    /// SQL form of [`Bounds::shifted_for_insert`].
    pub async fn db_shift_for_insert(
        &self,
        conn: &Connection,
        tenant: TenantId,
        anchor: i64,
    ) -> Result<ShiftCounts, DatabaseError> {
        // Rights first, for the same lft < rgt reason as the delete shift.
        let rights_moved = conn
            .execute(
                "UPDATE tree_nodes SET rgt = rgt + 2 WHERE tenant = ? AND rgt >= ?",
                (tenant, anchor),
            )
            .await
            .map_err(|e| DatabaseError::query("Failed to shift right bounds", e))?;

        let lefts_moved = conn
            .execute(
                "UPDATE tree_nodes SET lft = lft + 2 WHERE tenant = ? AND lft > ?",
                (tenant, anchor),
            )
            .await
            .map_err(|e| DatabaseError::query("Failed to shift left bounds", e))?;

        Ok(ShiftCounts {
            rights_moved,
            lefts_moved,
        })
    }

    /// Close the gap left by a removed subtree
    ///
    /// SQL form of [`Bounds::shifted_for_delete`].
    pub async fn db_shift_for_delete(
        &self,
        conn: &Connection,
        tenant: TenantId,
        removed: Bounds,
    ) -> Result<ShiftCounts, DatabaseError> {
        let width = removed.width();

        // Lefts first: contracting a right bound before its left would
        // briefly violate the lft < rgt check.
        let lefts_moved = conn
            .execute(
                "UPDATE tree_nodes SET lft = lft - ? WHERE tenant = ? AND lft > ?",
                (width, tenant, removed.right),
            )
            .await
            .map_err(|e| DatabaseError::query("Failed to contract left bounds", e))?;

        let rights_moved = conn
            .execute(
                "UPDATE tree_nodes SET rgt = rgt - ? WHERE tenant = ? AND rgt > ?",
                (width, tenant, removed.right),
            )
            .await
            .map_err(|e| DatabaseError::query("Failed to contract right bounds", e))?;

        Ok(ShiftCounts {
            rights_moved,
            lefts_moved,
        })
    }

    /// Insert one row; bounds may be absent for legacy imports
    pub async fn db_insert_node(
        &self,
        conn: &Connection,
        params: DbInsertNodeParams<'_>,
    ) -> Result<(), DatabaseError> {
        conn.execute(
            "INSERT INTO tree_nodes (tenant, id, title, parent_id, lft, rgt)
             VALUES (?, ?, ?, ?, ?, ?)",
            (
                params.tenant,
                params.id,
                params.title,
                params.parent_id,
                params.bounds.map(|b| b.left),
                params.bounds.map(|b| b.right),
            ),
        )
        .await
        .map_err(|e| DatabaseError::query(format!("Failed to insert node {}", params.id), e))?;
        Ok(())
    }

    /// Delete every row whose interval lies inside `bounds` (inclusive)
    pub async fn db_delete_range(
        &self,
        conn: &Connection,
        tenant: TenantId,
        bounds: Bounds,
    ) -> Result<u64, DatabaseError> {
        conn.execute(
            "DELETE FROM tree_nodes WHERE tenant = ? AND lft >= ? AND rgt <= ?",
            (tenant, bounds.left, bounds.right),
        )
        .await
        .map_err(|e| DatabaseError::query("Failed to delete subtree", e))
    }

    /// Replace a node's title; bounds are never touched here
    pub async fn db_update_title(
        &self,
        conn: &Connection,
        tenant: TenantId,
        id: &str,
        title: &str,
    ) -> Result<u64, DatabaseError> {
        conn.execute(
            "UPDATE tree_nodes SET title = ?, modified_at = CURRENT_TIMESTAMP
             WHERE tenant = ? AND id = ?",
            (title, tenant, id),
        )
        .await
        .map_err(|e| DatabaseError::query(format!("Failed to update node {}", id), e))
    }

    /// Overwrite the bounds of the row with insertion sequence `seq`
    pub async fn db_set_bounds(
        &self,
        conn: &Connection,
        seq: i64,
        bounds: Bounds,
    ) -> Result<(), DatabaseError> {
        conn.execute(
            "UPDATE tree_nodes SET lft = ?, rgt = ? WHERE seq = ?",
            (bounds.left, bounds.right, seq),
        )
        .await
        .map_err(|e| DatabaseError::query(format!("Failed to write bounds for row {}", seq), e))?;
        Ok(())
    }

    /// Every row of the tenant in rebuild order: creation time, then insertion sequence
    pub async fn db_load_tenant(
        &self,
        conn: &Connection,
        tenant: TenantId,
    ) -> Result<Vec<StoredNode>, DatabaseError> {
        let rows = conn
            .query(
                &format!(
                    "SELECT {} FROM tree_nodes AS n WHERE n.tenant = ?
                     ORDER BY n.created_at ASC, n.seq ASC",
                    node_columns("n")
                ),
                [tenant],
            )
            .await
            .map_err(|e| DatabaseError::query("Failed to load tenant", e))?;
        Self::collect_nodes(rows).await
    }

    /// Every indexed row of the tenant in preorder (left bound ascending)
    pub async fn db_indexed_nodes(
        &self,
        conn: &Connection,
        tenant: TenantId,
    ) -> Result<Vec<StoredNode>, DatabaseError> {
        let rows = conn
            .query(
                &format!(
                    "SELECT {} FROM tree_nodes AS n
                     WHERE n.tenant = ? AND n.lft IS NOT NULL AND n.rgt IS NOT NULL
                     ORDER BY n.lft ASC",
                    node_columns("n")
                ),
                [tenant],
            )
            .await
            .map_err(|e| DatabaseError::query("Failed to list tenant tree", e))?;
        Self::collect_nodes(rows).await
    }

    /// Nodes whose interval strictly contains `bounds`, outermost first
    pub async fn db_ancestors(
        &self,
        conn: &Connection,
        tenant: TenantId,
        bounds: Bounds,
    ) -> Result<Vec<StoredNode>, DatabaseError> {
        let rows = conn
            .query(
                &format!(
                    "SELECT {} FROM tree_nodes AS p
                     WHERE p.tenant = ? AND p.lft < ? AND ? < p.rgt
                     ORDER BY p.lft ASC",
                    node_columns("p")
                ),
                (tenant, bounds.left, bounds.right),
            )
            .await
            .map_err(|e| DatabaseError::query("Failed to execute ancestors query", e))?;
        Self::collect_nodes(rows).await
    }

    /// Nodes strictly inside `bounds`, in preorder
    pub async fn db_descendants(
        &self,
        conn: &Connection,
        tenant: TenantId,
        bounds: Bounds,
    ) -> Result<Vec<StoredNode>, DatabaseError> {
        let rows = conn
            .query(
                &format!(
                    "SELECT {} FROM tree_nodes AS d
                     WHERE d.tenant = ? AND d.lft > ? AND d.rgt < ?
                     ORDER BY d.lft ASC",
                    node_columns("d")
                ),
                (tenant, bounds.left, bounds.right),
            )
            .await
            .map_err(|e| DatabaseError::query("Failed to execute descendants query", e))?;
        Self::collect_nodes(rows).await
    }

    /// Nodes exactly one level below `bounds`
    ///
    /// A descendant `c` is a child when no other descendant `m` sits between
    /// them (`m` contains `c`).
    pub async fn db_children(
        &self,
        conn: &Connection,
        tenant: TenantId,
        bounds: Bounds,
    ) -> Result<Vec<StoredNode>, DatabaseError> {
        let rows = conn
            .query(
                &format!(
                    "SELECT {} FROM tree_nodes AS c
                     WHERE c.tenant = ?1 AND c.lft > ?2 AND c.rgt < ?3
                       AND NOT EXISTS (
                         SELECT 1 FROM tree_nodes AS m
                         WHERE m.tenant = ?1 AND m.lft > ?2 AND m.rgt < ?3
                           AND m.lft < c.lft AND c.rgt < m.rgt
                       )
                     ORDER BY c.lft ASC",
                    node_columns("c")
                ),
                (tenant, bounds.left, bounds.right),
            )
            .await
            .map_err(|e| DatabaseError::query("Failed to execute children query", e))?;
        Self::collect_nodes(rows).await
    }

    /// Indexed nodes that no other interval contains (the tenant's roots)
    pub async fn db_roots(
        &self,
        conn: &Connection,
        tenant: TenantId,
    ) -> Result<Vec<StoredNode>, DatabaseError> {
        let rows = conn
            .query(
                &format!(
                    "SELECT {} FROM tree_nodes AS r
                     WHERE r.tenant = ?1 AND r.lft IS NOT NULL
                       AND NOT EXISTS (
                         SELECT 1 FROM tree_nodes AS m
                         WHERE m.tenant = ?1 AND m.lft < r.lft AND r.rgt < m.rgt
                       )
                     ORDER BY r.lft ASC",
                    node_columns("r")
                ),
                [tenant],
            )
            .await
            .map_err(|e| DatabaseError::query("Failed to execute roots query", e))?;
        Self::collect_nodes(rows).await
    }
}
