//! Database Layer
//!
//! This module handles all database interactions using libsql (Turso embedded):
//!
//! - Database initialization and connection management
//! - Write/read transaction brackets
//! - The SQL behind every nested-set operation (shifts, range deletes,
//!   containment queries)
//!
//! Nothing here knows about tenant locks, validation, or corruption checks;
//! that lives in the service layer.

mod database;
mod error;

pub use database::{
    DatabaseService, DbInsertNodeParams, ShiftCounts, StoredNode, DEFAULT_BUSY_TIMEOUT_MS,
};
pub use error::DatabaseError;
