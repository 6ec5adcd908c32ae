// src/db/ingest.rs

//! Loading finished metadata documents into their sqlite forms

use crate::db::schema::{self, DB_VERSION};
use crate::error::Result;
use crate::metadata::reader::{package_fragments, parse_keyed, parse_primary, KeyedPackage};
use crate::metadata::DocumentKind;
use crate::packages::record::{FileKind, Relation};
use crate::packages::PackageRecord;
use rusqlite::{params, Transaction};
use std::path::Path;
use tracing::{debug, info};

/// Build the database for one finished document
///
/// `checksum` is the digest of the uncompressed document, recorded in
/// `db_info` so clients can match the database to its source.
pub fn build_database(
    kind: DocumentKind,
    document: &str,
    checksum: &str,
    db_path: &Path,
) -> Result<()> {
    let mut conn = super::create(db_path)?;
    schema::create(&conn, kind)?;

    let tx = conn.transaction()?;
    let mut count = 0usize;
    for fragment in package_fragments(document)? {
        match kind {
            DocumentKind::Primary => insert_primary(&tx, &parse_primary(fragment)?)?,
            DocumentKind::Filelists => insert_filelists(&tx, &parse_keyed(fragment)?)?,
            DocumentKind::Other => insert_other(&tx, &parse_keyed(fragment)?)?,
        }
        count += 1;
    }
    tx.execute(
        "INSERT INTO db_info (dbversion, checksum) VALUES (?1, ?2)",
        params![DB_VERSION, checksum],
    )?;
    tx.commit()?;

    info!(
        "Built {} database with {} packages",
        kind.data_type(),
        count
    );
    Ok(())
}

fn insert_primary(tx: &Transaction<'_>, record: &PackageRecord) -> Result<()> {
    tx.execute(
        "INSERT INTO packages (
            pkgId, name, arch, version, epoch, release, summary, description, url,
            time_file, time_build, rpm_license, rpm_vendor, rpm_group, rpm_buildhost,
            rpm_sourcerpm, rpm_header_start, rpm_header_end, rpm_packager,
            size_package, size_installed, size_archive, location_href, location_base,
            checksum_type
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
            ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25
        )",
        params![
            record.pkgid(),
            &record.name,
            &record.arch,
            &record.version,
            &record.epoch,
            &record.release,
            &record.summary,
            &record.description,
            &record.url,
            record.file_time as i64,
            record.build_time as i64,
            &record.license,
            &record.vendor,
            &record.group,
            &record.build_host,
            &record.source_rpm,
            record.header_range.start as i64,
            record.header_range.end as i64,
            &record.packager,
            record.package_size as i64,
            record.installed_size as i64,
            record.archive_size as i64,
            &record.location.href,
            &record.location.base,
            record.checksum.kind.as_str(),
        ],
    )?;
    let key = tx.last_insert_rowid();

    for (kind, path) in record.files.iter() {
        tx.execute(
            "INSERT INTO files (name, type, pkgKey) VALUES (?1, ?2, ?3)",
            params![path, kind.as_str(), key],
        )?;
    }

    for relation in &record.requires {
        tx.execute(
            "INSERT INTO requires (name, flags, epoch, version, release, pkgKey, pre)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                &relation.name,
                relation.flags.map(|f| f.as_str()),
                &relation.evr.epoch,
                &relation.evr.version,
                &relation.evr.release,
                key,
                relation.pre,
            ],
        )?;
    }

    for (table, relations) in [
        ("provides", &record.provides),
        ("conflicts", &record.conflicts),
        ("obsoletes", &record.obsoletes),
    ] {
        insert_relations(tx, table, relations, key)?;
    }

    debug!("Inserted {} as pkgKey {}", record.nevra(), key);
    Ok(())
}

fn insert_relations(
    tx: &Transaction<'_>,
    table: &str,
    relations: &[Relation],
    key: i64,
) -> Result<()> {
    let sql = format!(
        "INSERT INTO {} (name, flags, epoch, version, release, pkgKey)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        table
    );
    let mut stmt = tx.prepare_cached(&sql)?;
    for relation in relations {
        stmt.execute(params![
            &relation.name,
            relation.flags.map(|f| f.as_str()),
            &relation.evr.epoch,
            &relation.evr.version,
            &relation.evr.release,
            key,
        ])?;
    }
    Ok(())
}

fn insert_package_key(tx: &Transaction<'_>, pkgid: &str) -> Result<i64> {
    tx.execute("INSERT INTO packages (pkgId) VALUES (?1)", params![pkgid])?;
    Ok(tx.last_insert_rowid())
}

/// Group a manifest by directory, keeping first-seen directory order
///
/// Returns `(dirname, '/'-joined basenames, type codes)` rows.
pub fn group_by_directory<'a>(
    entries: impl Iterator<Item = (FileKind, &'a str)>,
) -> Vec<(String, String, String)> {
    let mut rows: Vec<(String, Vec<&str>, String)> = Vec::new();
    for (kind, path) in entries {
        let (dir, base) = match path.rfind('/') {
            Some(0) => ("/", &path[1..]),
            Some(i) => (&path[..i], &path[i + 1..]),
            None => ("", path),
        };
        match rows.iter_mut().find(|(d, _, _)| d == dir) {
            Some((_, names, types)) => {
                names.push(base);
                types.push(kind.code());
            }
            None => rows.push((dir.to_string(), vec![base], kind.code().to_string())),
        }
    }
    rows.into_iter()
        .map(|(dir, names, types)| (dir, names.join("/"), types))
        .collect()
}

fn insert_filelists(tx: &Transaction<'_>, package: &KeyedPackage) -> Result<()> {
    let key = insert_package_key(tx, &package.pkgid)?;
    let mut stmt = tx.prepare_cached(
        "INSERT INTO filelist (pkgKey, dirname, filenames, filetypes) VALUES (?1, ?2, ?3, ?4)",
    )?;
    for (dirname, filenames, filetypes) in group_by_directory(package.files.iter()) {
        stmt.execute(params![key, dirname, filenames, filetypes])?;
    }
    Ok(())
}

fn insert_other(tx: &Transaction<'_>, package: &KeyedPackage) -> Result<()> {
    let key = insert_package_key(tx, &package.pkgid)?;
    let mut stmt = tx.prepare_cached(
        "INSERT INTO changelog (pkgKey, author, date, changelog) VALUES (?1, ?2, ?3, ?4)",
    )?;
    for entry in &package.changelog {
        stmt.execute(params![key, &entry.author, entry.time as i64, &entry.text])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractOptions;
    use crate::metadata::xml::tests::sample_record;
    use rusqlite::Connection;
    use tempfile::TempDir;

    fn document(kind: DocumentKind) -> String {
        let filter = ExtractOptions::default().primary_filter().unwrap();
        let record = sample_record();
        format!(
            "{}{}\n{}",
            kind.preamble(1),
            kind.render(&record, &filter),
            kind.closer()
        )
    }

    fn build(kind: DocumentKind) -> (TempDir, Connection) {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(format!("{}.sqlite", kind.data_type()));
        build_database(kind, &document(kind), "feed", &path).unwrap();
        let conn = Connection::open(&path).unwrap();
        (temp, conn)
    }

    #[test]
    fn test_primary_database() {
        let (_temp, conn) = build(DocumentKind::Primary);

        let (name, href, start): (String, String, i64) = conn
            .query_row(
                "SELECT name, location_href, rpm_header_start FROM packages WHERE pkgId = 'abc123'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(name, "tool");
        assert_eq!(href, "Packages/tool-1.2-3.x86_64.rpm");
        assert_eq!(start, 280);

        // rpmlib requirements never reach the primary document
        let requires: Vec<(String, bool)> = conn
            .prepare("SELECT name, pre FROM requires ORDER BY rowid")
            .unwrap()
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert_eq!(
            requires,
            vec![("/bin/sh".to_string(), true), ("libc.so.6".to_string(), false)]
        );

        let (version, checksum): (u32, String) = conn
            .query_row("SELECT dbversion, checksum FROM db_info", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(version, DB_VERSION);
        assert_eq!(checksum, "feed");
    }

    #[test]
    fn test_filelists_database_groups_by_directory() {
        let (_temp, conn) = build(DocumentKind::Filelists);

        let rows: Vec<(String, String, String)> = conn
            .prepare("SELECT dirname, filenames, filetypes FROM filelist ORDER BY rowid")
            .unwrap()
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert_eq!(
            rows,
            vec![
                ("/usr/bin".to_string(), "tool".to_string(), "f".to_string()),
                ("/usr/share/doc/tool".to_string(), "README".to_string(), "f".to_string()),
                ("/etc".to_string(), "tool".to_string(), "d".to_string()),
                ("/usr/share".to_string(), "tool".to_string(), "d".to_string()),
                ("/etc/tool".to_string(), "state".to_string(), "g".to_string()),
            ]
        );
    }

    #[test]
    fn test_other_database() {
        let (_temp, conn) = build(DocumentKind::Other);
        let (author, date): (String, i64) = conn
            .query_row("SELECT author, date FROM changelog", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(author, "Dev <dev@example.com> - 1.2-3");
        assert_eq!(date, 1_680_000_000);
    }

    #[test]
    fn test_group_by_directory_merges_siblings() {
        let entries = vec![
            (FileKind::File, "/usr/bin/a"),
            (FileKind::File, "/usr/bin/b"),
            (FileKind::Dir, "/opt"),
        ];
        assert_eq!(
            group_by_directory(entries.into_iter()),
            vec![
                ("/usr/bin".to_string(), "a/b".to_string(), "ff".to_string()),
                ("/".to_string(), "opt".to_string(), "d".to_string()),
            ]
        );
    }
}
