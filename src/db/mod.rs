// src/db/mod.rs

//! Sqlite forms of the metadata documents
//!
//! Each finished XML document can be turned into an equivalent database
//! with a fixed schema, for clients that prefer querying over parsing.

pub mod ingest;
pub mod schema;

pub use ingest::build_database;
pub use schema::DB_VERSION;

use crate::error::Result;
use rusqlite::Connection;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Create an empty database at `db_path`, replacing any existing file
pub fn create(db_path: &Path) -> Result<Connection> {
    debug!("Creating database at: {}", db_path.display());

    if db_path.exists() {
        fs::remove_file(db_path)?;
    }

    let conn = Connection::open(db_path)?;

    // The file is rebuilt from scratch on every run
    conn.execute_batch(
        "
        PRAGMA synchronous = OFF;
        PRAGMA journal_mode = MEMORY;
        ",
    )?;

    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_replaces_existing_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("primary.sqlite");
        fs::write(&path, b"not a database").unwrap();

        let conn = create(&path).unwrap();
        conn.execute_batch("CREATE TABLE t (x INTEGER)").unwrap();
        drop(conn);

        assert!(path.exists());
    }
}
