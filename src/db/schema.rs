// src/db/schema.rs

//! Table layouts of the three sqlite metadata databases
//!
//! The layouts are a compatibility surface read by package managers, so
//! table and column names must not change without bumping `DB_VERSION`.

use crate::error::Result;
use crate::metadata::DocumentKind;
use rusqlite::Connection;
use tracing::debug;

/// Schema version recorded in `db_info` and in the catalog
pub const DB_VERSION: u32 = 10;

/// Create the tables, indexes and triggers for `kind`
pub fn create(conn: &Connection, kind: DocumentKind) -> Result<()> {
    debug!("Creating {} database schema", kind.data_type());
    match kind {
        DocumentKind::Primary => create_primary(conn),
        DocumentKind::Filelists => create_filelists(conn),
        DocumentKind::Other => create_other(conn),
    }
}

fn create_primary(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE db_info (dbversion INTEGER, checksum TEXT);

        CREATE TABLE packages (
            pkgKey INTEGER PRIMARY KEY,
            pkgId TEXT,
            name TEXT,
            arch TEXT,
            version TEXT,
            epoch TEXT,
            release TEXT,
            summary TEXT,
            description TEXT,
            url TEXT,
            time_file INTEGER,
            time_build INTEGER,
            rpm_license TEXT,
            rpm_vendor TEXT,
            rpm_group TEXT,
            rpm_buildhost TEXT,
            rpm_sourcerpm TEXT,
            rpm_header_start INTEGER,
            rpm_header_end INTEGER,
            rpm_packager TEXT,
            size_package INTEGER,
            size_installed INTEGER,
            size_archive INTEGER,
            location_href TEXT,
            location_base TEXT,
            checksum_type TEXT
        );

        CREATE TABLE files (name TEXT, type TEXT, pkgKey INTEGER);

        CREATE TABLE requires (
            name TEXT,
            flags TEXT,
            epoch TEXT,
            version TEXT,
            release TEXT,
            pkgKey INTEGER,
            pre BOOLEAN DEFAULT FALSE
        );

        CREATE TABLE provides (
            name TEXT,
            flags TEXT,
            epoch TEXT,
            version TEXT,
            release TEXT,
            pkgKey INTEGER
        );

        CREATE TABLE conflicts (
            name TEXT,
            flags TEXT,
            epoch TEXT,
            version TEXT,
            release TEXT,
            pkgKey INTEGER
        );

        CREATE TABLE obsoletes (
            name TEXT,
            flags TEXT,
            epoch TEXT,
            version TEXT,
            release TEXT,
            pkgKey INTEGER
        );

        CREATE INDEX packagename ON packages (name);
        CREATE INDEX packageId ON packages (pkgId);
        CREATE INDEX filenames ON files (name);
        CREATE INDEX pkgfiles ON files (pkgKey);
        CREATE INDEX pkgprovides ON provides (pkgKey);
        CREATE INDEX providesname ON provides (name);
        CREATE INDEX pkgrequires ON requires (pkgKey);
        CREATE INDEX requiresname ON requires (name);
        CREATE INDEX pkgconflicts ON conflicts (pkgKey);
        CREATE INDEX pkgobsoletes ON obsoletes (pkgKey);

        CREATE TRIGGER removals AFTER DELETE ON packages
        BEGIN
            DELETE FROM files WHERE pkgKey = old.pkgKey;
            DELETE FROM requires WHERE pkgKey = old.pkgKey;
            DELETE FROM provides WHERE pkgKey = old.pkgKey;
            DELETE FROM conflicts WHERE pkgKey = old.pkgKey;
            DELETE FROM obsoletes WHERE pkgKey = old.pkgKey;
        END;
        ",
    )?;
    Ok(())
}

fn create_filelists(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE db_info (dbversion INTEGER, checksum TEXT);

        CREATE TABLE packages (pkgKey INTEGER PRIMARY KEY, pkgId TEXT);

        CREATE TABLE filelist (
            pkgKey INTEGER,
            dirname TEXT,
            filenames TEXT,
            filetypes TEXT
        );

        CREATE INDEX keyfile ON filelist (pkgKey);
        CREATE INDEX pkgId ON packages (pkgId);
        CREATE INDEX dirnames ON filelist (dirname);

        CREATE TRIGGER remove_filelist AFTER DELETE ON packages
        BEGIN
            DELETE FROM filelist WHERE pkgKey = old.pkgKey;
        END;
        ",
    )?;
    Ok(())
}

fn create_other(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE db_info (dbversion INTEGER, checksum TEXT);

        CREATE TABLE packages (pkgKey INTEGER PRIMARY KEY, pkgId TEXT);

        CREATE TABLE changelog (
            pkgKey INTEGER,
            author TEXT,
            date INTEGER,
            changelog TEXT
        );

        CREATE INDEX keychange ON changelog (pkgKey);
        CREATE INDEX pkgId ON packages (pkgId);

        CREATE TRIGGER remove_changelogs AFTER DELETE ON packages
        BEGIN
            DELETE FROM changelog WHERE pkgKey = old.pkgKey;
        END;
        ",
    )?;
    Ok(())
}
