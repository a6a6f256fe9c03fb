//! Reconciled release records and the nuke ledger.
//!
//! Every network relays the same announcements with different completeness,
//! so writes are fill-only merges: the first sighting creates the row and
//! later reports may only supply fields that are still missing. All
//! read-decide-write sequences run under one shared connection lock; that
//! lock is the sole guard against lost updates from concurrent sessions and
//! is never held across an await.

mod nuke;
mod release;

pub use nuke::{NukeLedger, NukeOutcome, NukeRecord};
pub use release::{
    AddoldOutcome, GenreOutcome, InfoOutcome, PreOutcome, ReleaseRecord, ReleaseStore,
};

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Open the database, creating tables if needed. The returned handle is
/// shared by [`ReleaseStore`] and [`NukeLedger`] so both write under the
/// same critical section.
pub fn open(path: &Path) -> Result<Arc<Mutex<Connection>>, StoreError> {
    let conn = Connection::open(path).map_err(|e| StoreError::Database(e.to_string()))?;
    initialize_schema(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// In-memory database (useful for testing).
pub fn open_in_memory() -> Result<Arc<Mutex<Connection>>, StoreError> {
    let conn = Connection::open_in_memory().map_err(|e| StoreError::Database(e.to_string()))?;
    initialize_schema(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        -- One row per release name; type records how the row was first created
        CREATE TABLE IF NOT EXISTS pre (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            release TEXT NOT NULL UNIQUE,
            type TEXT NOT NULL,
            section TEXT,
            size INTEGER,
            files INTEGER,
            genre TEXT,
            source TEXT,
            timestamp INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_pre_release ON pre(release);

        -- Nuke history; one row per unique (release, type, reason)
        CREATE TABLE IF NOT EXISTS nuke (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            release TEXT NOT NULL,
            type TEXT NOT NULL,
            reason TEXT,
            nukenet TEXT,
            source TEXT,
            timestamp INTEGER,
            UNIQUE(release, type, reason)
        );

        CREATE INDEX IF NOT EXISTS idx_nuke_release ON nuke(release);
        "#,
    )
    .map_err(|e| StoreError::Database(e.to_string()))?;

    Ok(())
}
