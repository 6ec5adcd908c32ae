// src/metadata/reader.rs

//! Parsing of previously written primary, filelists and other documents
//!
//! Documents are split into the exact byte slices of their top-level
//! `<package>` elements, so a fragment can be re-emitted verbatim, and each
//! fragment can be parsed back into structured data.

use crate::checksum::{Checksum, ChecksumType};
use crate::error::{Error, Result};
use crate::packages::header::HeaderRange;
use crate::packages::record::{
    ChangelogEntry, Comparison, Evr, FileKind, FileManifest, PackageRecord, Relation,
};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

fn xml_error(context: &str, err: impl std::fmt::Display) -> Error {
    Error::Xml(format!("{}: {}", context, err))
}

/// Value of attribute `key`, unescaped
fn attribute(e: &BytesStart<'_>, key: &str) -> Result<Option<String>> {
    match e
        .try_get_attribute(key)
        .map_err(|err| xml_error("bad attribute", err))?
    {
        Some(attr) => Ok(Some(
            attr.unescape_value()
                .map_err(|err| xml_error("bad attribute value", err))?
                .into_owned(),
        )),
        None => Ok(None),
    }
}

fn number(e: &BytesStart<'_>, key: &str) -> Result<Option<u64>> {
    attribute(e, key)?
        .map(|v| {
            v.parse::<u64>()
                .map_err(|err| xml_error(&format!("bad {} value '{}'", key, v), err))
        })
        .transpose()
}

/// Offset of the `<` opening the tag read from `pos`
///
/// The reader may already have consumed the `<` when it stopped after a
/// text event.
fn tag_start(document: &str, pos: usize) -> usize {
    if document[pos..].starts_with('<') {
        pos
    } else {
        document[..pos].rfind('<').unwrap_or(pos)
    }
}

/// Byte slices of every top-level `<package>` element, in document order
pub fn package_fragments(document: &str) -> Result<Vec<&str>> {
    let mut reader = Reader::from_str(document);
    reader.trim_text(false);

    let mut fragments = Vec::new();
    let mut depth = 0usize;
    let mut start = None;

    loop {
        let before = reader.buffer_position() as usize;
        match reader
            .read_event()
            .map_err(|e| xml_error("malformed metadata document", e))?
        {
            Event::Start(e) => {
                depth += 1;
                if depth == 2 && e.local_name().as_ref() == b"package" {
                    start = Some(tag_start(document, before));
                }
            }
            Event::End(e) => {
                if depth == 2 && e.local_name().as_ref() == b"package" {
                    if let Some(begin) = start.take() {
                        let end = reader.buffer_position() as usize;
                        fragments.push(&document[begin..end]);
                    }
                }
                depth = depth.saturating_sub(1);
            }
            Event::Empty(e) => {
                if depth == 1 && e.local_name().as_ref() == b"package" {
                    let end = reader.buffer_position() as usize;
                    fragments.push(&document[tag_start(document, before)..end]);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(fragments)
}

/// `pkgid` attribute of a filelists or other fragment
pub fn fragment_pkgid(fragment: &str) -> Result<Option<String>> {
    let mut reader = Reader::from_str(fragment);
    loop {
        match reader
            .read_event()
            .map_err(|e| xml_error("malformed package fragment", e))?
        {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"package" => {
                return attribute(&e, "pkgid");
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
    }
}

/// Rewrite the `<location/>` of a primary fragment to carry `xml:base`
///
/// Everything outside the location element is returned untouched.
pub fn relocate(fragment: &str, base: &str) -> Result<String> {
    let mut reader = Reader::from_str(fragment);
    loop {
        let before = reader.buffer_position() as usize;
        match reader
            .read_event()
            .map_err(|e| xml_error("malformed package fragment", e))?
        {
            Event::Empty(e) if e.local_name().as_ref() == b"location" => {
                let start = tag_start(fragment, before);
                let end = reader.buffer_position() as usize;
                let href = attribute(&e, "href")?.unwrap_or_default();
                return Ok(format!(
                    "{}{}{}",
                    &fragment[..start],
                    crate::metadata::xml::location_element(&href, Some(base)),
                    &fragment[end..]
                ));
            }
            Event::Eof => return Ok(fragment.to_string()),
            _ => {}
        }
    }
}

fn relation(e: &BytesStart<'_>) -> Result<Relation> {
    let name = attribute(e, "name")?.unwrap_or_default();
    let flags = attribute(e, "flags")?
        .map(|f| f.parse::<Comparison>().map_err(Error::Xml))
        .transpose()?;
    let evr = Evr {
        epoch: attribute(e, "epoch")?,
        version: attribute(e, "ver")?,
        release: attribute(e, "rel")?,
    };
    let mut relation = Relation::new(name, flags, evr);
    relation.pre = attribute(e, "pre")?.as_deref() == Some("1");
    Ok(relation)
}

fn file_kind(e: &BytesStart<'_>) -> Result<FileKind> {
    Ok(match attribute(e, "type")?.as_deref() {
        Some("dir") => FileKind::Dir,
        Some("ghost") => FileKind::Ghost,
        _ => FileKind::File,
    })
}

fn version_attrs(e: &BytesStart<'_>) -> Result<(String, String, String)> {
    Ok((
        attribute(e, "epoch")?.unwrap_or_else(|| "0".to_string()),
        attribute(e, "ver")?.unwrap_or_default(),
        attribute(e, "rel")?.unwrap_or_default(),
    ))
}

#[derive(Clone, Copy)]
enum Section {
    Provides,
    Requires,
    Conflicts,
    Obsoletes,
}

/// Parse a primary `<package>` fragment back into a record
///
/// The file manifest only holds what the primary document lists. Fails
/// when the checksum, location, file time or package size is missing.
pub fn parse_primary(fragment: &str) -> Result<PackageRecord> {
    let mut reader = Reader::from_str(fragment);
    reader.trim_text(false);

    let mut record = PackageRecord::default();
    let mut section = None;
    let mut leaf: Option<Vec<u8>> = None;
    let mut file: Option<FileKind> = None;
    let mut text = String::new();
    let (mut has_checksum, mut has_time, mut has_size) = (false, false, false);

    loop {
        match reader
            .read_event()
            .map_err(|e| xml_error("malformed primary fragment", e))?
        {
            Event::Start(e) => {
                let name = e.local_name().as_ref().to_vec();
                match name.as_slice() {
                    b"package" | b"format" => {}
                    b"provides" => section = Some(Section::Provides),
                    b"requires" => section = Some(Section::Requires),
                    b"conflicts" => section = Some(Section::Conflicts),
                    b"obsoletes" => section = Some(Section::Obsoletes),
                    _ => {
                        if name == b"file" {
                            file = Some(file_kind(&e)?);
                        } else if name == b"checksum" {
                            let kind = attribute(&e, "type")?.unwrap_or_default();
                            record.checksum.kind =
                                kind.parse::<ChecksumType>().map_err(Error::Xml)?;
                            has_checksum = true;
                        }
                        leaf = Some(name);
                        text.clear();
                    }
                }
            }
            Event::Text(t) => {
                if leaf.is_some() {
                    text.push_str(&t.unescape().map_err(|e| xml_error("bad text", e))?);
                }
            }
            Event::End(e) => {
                let name = e.local_name();
                match name.as_ref() {
                    b"provides" | b"requires" | b"conflicts" | b"obsoletes" => section = None,
                    _ if leaf.as_deref() == Some(name.as_ref()) => {
                        let value = std::mem::take(&mut text);
                        match name.as_ref() {
                            b"name" => record.name = value,
                            b"arch" => record.arch = value,
                            b"checksum" => record.checksum.value = value,
                            b"summary" => record.summary = value,
                            b"description" => record.description = value,
                            b"packager" => record.packager = value,
                            b"url" => record.url = value,
                            b"license" => record.license = value,
                            b"vendor" => record.vendor = value,
                            b"group" => record.group = value,
                            b"buildhost" => record.build_host = value,
                            b"sourcerpm" => record.source_rpm = Some(value),
                            b"file" => {
                                if let Some(kind) = file.take() {
                                    record.files.push(kind, value);
                                }
                            }
                            _ => {}
                        }
                        leaf = None;
                    }
                    _ => {}
                }
            }
            Event::Empty(e) => match e.local_name().as_ref() {
                b"version" => {
                    let (epoch, version, release) = version_attrs(&e)?;
                    record.epoch = epoch;
                    record.version = version;
                    record.release = release;
                }
                b"time" => {
                    if let Some(file_time) = number(&e, "file")? {
                        record.file_time = file_time;
                        has_time = true;
                    }
                    record.build_time = number(&e, "build")?.unwrap_or(0);
                }
                b"size" => {
                    if let Some(package) = number(&e, "package")? {
                        record.package_size = package;
                        has_size = true;
                    }
                    record.installed_size = number(&e, "installed")?.unwrap_or(0);
                    record.archive_size = number(&e, "archive")?.unwrap_or(0);
                }
                b"location" => {
                    record.location.href = attribute(&e, "href")?.unwrap_or_default();
                    record.location.base = attribute(&e, "xml:base")?;
                }
                b"header-range" => {
                    record.header_range = HeaderRange {
                        start: number(&e, "start")?.unwrap_or(0),
                        end: number(&e, "end")?.unwrap_or(0),
                    };
                }
                b"entry" => {
                    let relation = relation(&e)?;
                    match section {
                        Some(Section::Provides) => record.provides.push(relation),
                        Some(Section::Requires) => record.requires.push(relation),
                        Some(Section::Conflicts) => record.conflicts.push(relation),
                        Some(Section::Obsoletes) => record.obsoletes.push(relation),
                        None => {}
                    }
                }
                b"sourcerpm" => record.source_rpm = Some(String::new()),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    if record.location.href.is_empty() {
        return Err(Error::Xml("package without location".to_string()));
    }
    let missing = [
        (has_checksum && !record.checksum.value.is_empty(), "pkgid"),
        (has_time, "file time"),
        (has_size, "package size"),
    ];
    if let Some((_, what)) = missing.iter().find(|(present, _)| !present) {
        return Err(Error::Xml(format!(
            "{} missing for {}",
            what, record.location.href
        )));
    }

    Ok(record)
}

/// A filelists or other `<package>` element
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyedPackage {
    pub pkgid: String,
    pub name: String,
    pub arch: String,
    pub epoch: String,
    pub version: String,
    pub release: String,
    pub files: FileManifest,
    pub changelog: Vec<ChangelogEntry>,
}

/// Parse a filelists or other fragment
pub fn parse_keyed(fragment: &str) -> Result<KeyedPackage> {
    let mut reader = Reader::from_str(fragment);
    reader.trim_text(false);

    let mut package = KeyedPackage::default();
    let mut file: Option<FileKind> = None;
    let mut changelog: Option<(String, u64)> = None;
    let mut text = String::new();

    loop {
        match reader
            .read_event()
            .map_err(|e| xml_error("malformed package fragment", e))?
        {
            Event::Start(e) => match e.local_name().as_ref() {
                b"package" => {
                    package.pkgid = attribute(&e, "pkgid")?.unwrap_or_default();
                    package.name = attribute(&e, "name")?.unwrap_or_default();
                    package.arch = attribute(&e, "arch")?.unwrap_or_default();
                }
                b"file" => {
                    file = Some(file_kind(&e)?);
                    text.clear();
                }
                b"changelog" => {
                    let author = attribute(&e, "author")?.unwrap_or_default();
                    let date = number(&e, "date")?.unwrap_or(0);
                    changelog = Some((author, date));
                    text.clear();
                }
                _ => {}
            },
            Event::Text(t) => {
                if file.is_some() || changelog.is_some() {
                    text.push_str(&t.unescape().map_err(|e| xml_error("bad text", e))?);
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"file" => {
                    if let Some(kind) = file.take() {
                        package.files.push(kind, std::mem::take(&mut text));
                    }
                }
                b"changelog" => {
                    if let Some((author, time)) = changelog.take() {
                        package.changelog.push(ChangelogEntry {
                            time,
                            author,
                            text: std::mem::take(&mut text),
                        });
                    }
                }
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"version" => {
                    let (epoch, version, release) = version_attrs(&e)?;
                    package.epoch = epoch;
                    package.version = version;
                    package.release = release;
                }
                b"changelog" => package.changelog.push(ChangelogEntry {
                    time: number(&e, "date")?.unwrap_or(0),
                    author: attribute(&e, "author")?.unwrap_or_default(),
                    text: String::new(),
                }),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    if package.pkgid.is_empty() {
        return Err(Error::Xml(format!("pkgid missing for {}", package.name)));
    }
    Ok(package)
}

impl KeyedPackage {
    pub fn checksum(&self, kind: ChecksumType) -> Checksum {
        Checksum::new(kind, self.pkgid.clone())
    }
}
