//! Local database schema and connection management.

use crate::{DatabaseError, Result, VaultError};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

/// Current schema version. Incremented when the schema changes.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Local database connection and schema manager
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) a database at the specified path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path).map_err(DatabaseError::Sqlite)?;
        Self::from_connection(conn)
    }

    /// Create a new in-memory database for testing
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(DatabaseError::Sqlite)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let db = Self { conn };
        db.initialize_schema()?;
        db.validate_schema_version()?;
        Ok(db)
    }

    /// Create tables if they do not exist yet
    pub fn initialize_schema(&self) -> Result<()> {
        let now = Utc::now().timestamp();
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS db_metadata (
                    id INTEGER PRIMARY KEY CHECK (id = 1),
                    version INTEGER NOT NULL,
                    created_at INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS local_settings (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at INTEGER NOT NULL
                );",
            )
            .map_err(DatabaseError::Sqlite)?;

        self.conn
            .execute(
                "INSERT OR IGNORE INTO db_metadata (id, version, created_at) VALUES (1, ?1, ?2)",
                (CURRENT_SCHEMA_VERSION, now),
            )
            .map_err(DatabaseError::Sqlite)?;

        Ok(())
    }

    /// Refuse to work with a store written by a newer schema
    pub fn validate_schema_version(&self) -> Result<()> {
        let version: Option<i32> = self
            .conn
            .query_row("SELECT version FROM db_metadata WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()
            .map_err(DatabaseError::Sqlite)?;

        match version {
            Some(CURRENT_SCHEMA_VERSION) => Ok(()),
            Some(found) => Err(VaultError::from(DatabaseError::SchemaMismatch {
                expected: CURRENT_SCHEMA_VERSION,
                found,
            })),
            None => Err(VaultError::from(DatabaseError::MissingSchemaMetadata)),
        }
    }

    /// Get a reference to the underlying connection
    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}
