//! SQLite reference implementation of the inventory ledger.

mod dispatches;
mod lots;
mod schema;

pub use dispatches::*;
pub use lots::*;
pub use schema::*;

use rusqlite::Connection;
use std::path::Path;
use thiserror::Error;

use crate::config::EngineConfig;

/// Database errors.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Line {line_id} of prescription {prescription_id} dispatched {dispatched} of {required}")]
    OverDispatched {
        prescription_id: String,
        line_id: String,
        required: u32,
        dispatched: u64,
    },

    #[error("Insufficient stock in lot {lot_id}: {requested} requested, {available} available")]
    InsufficientStock {
        lot_id: String,
        requested: u32,
        available: u32,
    },
}

pub type DbResult<T> = Result<T, DbError>;

/// Database connection wrapper.
pub struct Database {
    conn: Connection,
    config: EngineConfig,
}

impl Database {
    /// Open database at path, creating if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn, EngineConfig::default())
    }

    /// Open the database named by a configuration.
    pub fn from_config(config: &EngineConfig) -> DbResult<Self> {
        let conn = Connection::open(&config.database_path)?;
        Self::with_connection(conn, config.clone())
    }

    /// Create in-memory database (for testing).
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, EngineConfig::default())
    }

    fn with_connection(conn: Connection, config: EngineConfig) -> DbResult<Self> {
        let db = Self { conn, config };
        db.initialize()?;
        Ok(db)
    }

    /// Initialize schema.
    fn initialize(&self) -> DbResult<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Get raw connection (for advanced queries).
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
