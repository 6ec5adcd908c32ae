// src/repository/catalog.rs

//! The `repomd.xml` catalog
//!
//! Lists every artifact of a run with its location, digests, sizes and
//! timestamp, plus free-text revision and tags. There is at most one entry
//! per data type.

use crate::checksum::{Checksum, ChecksumType};
use crate::config::RepoTags;
use crate::error::{Error, Result};
use crate::metadata::xml::{REPO_NS, RPM_NS};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::fs;
use std::path::Path;
use tracing::debug;

/// One `<data>` element
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogEntry {
    pub data_type: String,
    /// Location relative to the repository root, e.g. `repodata/primary.xml.gz`
    pub href: String,
    pub base: Option<String>,
    pub checksum: Checksum,
    /// Digest of the uncompressed form, when the artifact is compressed
    pub open_checksum: Option<Checksum>,
    pub timestamp: u64,
    pub size: Option<u64>,
    pub open_size: Option<u64>,
    pub database_version: Option<u32>,
}

impl CatalogEntry {
    /// File name part of the location
    pub fn file_name(&self) -> &str {
        self.href.rsplit('/').next().unwrap_or(&self.href)
    }
}

/// Parsed or freshly built catalog
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    pub revision: String,
    pub tags: RepoTags,
    pub entries: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn new(revision: impl Into<String>, tags: RepoTags) -> Self {
        Self {
            revision: revision.into(),
            tags,
            entries: Vec::new(),
        }
    }

    pub fn entry(&self, data_type: &str) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| e.data_type == data_type)
    }

    /// Insert `entry`, replacing any entry of the same type in place
    ///
    /// Returns the replaced entry.
    pub fn replace(&mut self, entry: CatalogEntry) -> Option<CatalogEntry> {
        match self
            .entries
            .iter_mut()
            .find(|e| e.data_type == entry.data_type)
        {
            Some(slot) => Some(std::mem::replace(slot, entry)),
            None => {
                self.entries.push(entry);
                None
            }
        }
    }

    pub fn remove(&mut self, data_type: &str) -> Option<CatalogEntry> {
        let index = self.entries.iter().position(|e| e.data_type == data_type)?;
        Some(self.entries.remove(index))
    }

    /// Load `repomd.xml` from disk
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::document(path, e))?;
        Self::parse(&content)
    }

    /// Write `repomd.xml` to disk
    pub fn save(&self, path: &Path) -> Result<()> {
        let xml = self.to_xml()?;
        fs::write(path, xml).map_err(|e| Error::document(path, e))?;
        debug!("Wrote catalog {}", path.display());
        Ok(())
    }

    /// Serialize the catalog document
    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

        let mut root = BytesStart::new("repomd");
        root.push_attribute(("xmlns", REPO_NS));
        root.push_attribute(("xmlns:rpm", RPM_NS));
        writer.write_event(Event::Start(root))?;

        text_element(&mut writer, "revision", &self.revision, None)?;

        if !self.tags.is_empty() {
            writer.write_event(Event::Start(BytesStart::new("tags")))?;
            for content in &self.tags.content {
                text_element(&mut writer, "content", content, None)?;
            }
            for repo in &self.tags.repo {
                text_element(&mut writer, "repo", repo, None)?;
            }
            for (cpeid, name) in &self.tags.distro {
                let attr = cpeid.as_deref().map(|c| ("cpeid", c));
                text_element(&mut writer, "distro", name, attr)?;
            }
            writer.write_event(Event::End(BytesEnd::new("tags")))?;
        }

        for entry in &self.entries {
            write_entry(&mut writer, entry)?;
        }

        writer.write_event(Event::End(BytesEnd::new("repomd")))?;

        let body = String::from_utf8(writer.into_inner())
            .map_err(|e| Error::Xml(format!("catalog is not UTF-8: {}", e)))?;
        Ok(format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{}\n",
            body
        ))
    }

    /// Parse a catalog document
    pub fn parse(content: &str) -> Result<Self> {
        let mut reader = Reader::from_str(content);
        reader.trim_text(true);

        let mut catalog = Catalog::default();
        let mut current: Option<CatalogEntry> = None;
        let mut tag = String::new();
        let mut checksum_type = ChecksumType::default();
        let mut cpeid: Option<String> = None;

        loop {
            match reader.read_event()? {
                Event::Start(e) => {
                    tag = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                    match tag.as_str() {
                        "data" => {
                            current = Some(CatalogEntry {
                                data_type: attribute(&e, "type")?.unwrap_or_default(),
                                ..CatalogEntry::default()
                            });
                        }
                        "checksum" | "open-checksum" => {
                            checksum_type = match attribute(&e, "type")? {
                                Some(kind) => kind.parse().map_err(Error::Xml)?,
                                None => ChecksumType::default(),
                            };
                        }
                        "distro" => cpeid = attribute(&e, "cpeid")?,
                        "location" => {
                            if let Some(entry) = current.as_mut() {
                                read_location(&e, entry)?;
                            }
                        }
                        _ => {}
                    }
                }
                Event::Empty(e) => {
                    if e.local_name().as_ref() == b"location" {
                        if let Some(entry) = current.as_mut() {
                            read_location(&e, entry)?;
                        }
                    }
                }
                Event::Text(t) => {
                    let text = t
                        .unescape()
                        .map_err(|e| Error::Xml(format!("bad catalog text: {}", e)))?
                        .into_owned();
                    let number = || {
                        text.parse::<u64>()
                            .map_err(|e| Error::Xml(format!("bad {} '{}': {}", tag, text, e)))
                    };
                    match (tag.as_str(), current.as_mut()) {
                        ("revision", _) => catalog.revision = text.clone(),
                        ("content", None) => catalog.tags.content.push(text.clone()),
                        ("repo", None) => catalog.tags.repo.push(text.clone()),
                        ("distro", None) => catalog.tags.distro.push((cpeid.take(), text.clone())),
                        ("checksum", Some(entry)) => {
                            entry.checksum = Checksum::new(checksum_type, text.clone())
                        }
                        ("open-checksum", Some(entry)) => {
                            entry.open_checksum = Some(Checksum::new(checksum_type, text.clone()))
                        }
                        ("timestamp", Some(entry)) => {
                            // Older generators wrote fractional timestamps
                            let whole = text.split('.').next().unwrap_or("");
                            entry.timestamp = whole.parse::<u64>().map_err(|e| {
                                Error::Xml(format!("bad timestamp '{}': {}", text, e))
                            })?;
                        }
                        ("size", Some(entry)) => entry.size = Some(number()?),
                        ("open-size", Some(entry)) => entry.open_size = Some(number()?),
                        ("database_version", Some(entry)) => {
                            let version = u32::try_from(number()?).map_err(|e| {
                                Error::Xml(format!("bad database_version '{}': {}", text, e))
                            })?;
                            entry.database_version = Some(version)
                        }
                        _ => {}
                    }
                }
                Event::End(e) => {
                    if e.local_name().as_ref() == b"data" {
                        if let Some(entry) = current.take() {
                            catalog.entries.push(entry);
                        }
                    }
                    tag.clear();
                }
                Event::Eof => break,
                _ => {}
            }
        }

        Ok(catalog)
    }
}

fn attribute(e: &BytesStart<'_>, key: &str) -> Result<Option<String>> {
    match e
        .try_get_attribute(key)
        .map_err(|err| Error::Xml(format!("bad attribute: {}", err)))?
    {
        Some(attr) => Ok(Some(attr.unescape_value()?.into_owned())),
        None => Ok(None),
    }
}

fn read_location(e: &BytesStart<'_>, entry: &mut CatalogEntry) -> Result<()> {
    entry.href = attribute(e, "href")?.unwrap_or_default();
    entry.base = attribute(e, "xml:base")?;
    Ok(())
}

fn text_element(
    writer: &mut Writer<Vec<u8>>,
    name: &str,
    text: &str,
    attr: Option<(&str, &str)>,
) -> Result<()> {
    let mut start = BytesStart::new(name);
    if let Some(attr) = attr {
        start.push_attribute(attr);
    }
    writer.write_event(Event::Start(start))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn write_entry(writer: &mut Writer<Vec<u8>>, entry: &CatalogEntry) -> Result<()> {
    let mut data = BytesStart::new("data");
    data.push_attribute(("type", entry.data_type.as_str()));
    writer.write_event(Event::Start(data))?;

    text_element(
        writer,
        "checksum",
        &entry.checksum.value,
        Some(("type", entry.checksum.kind.as_str())),
    )?;
    if let Some(open) = &entry.open_checksum {
        text_element(
            writer,
            "open-checksum",
            &open.value,
            Some(("type", open.kind.as_str())),
        )?;
    }

    let mut location = BytesStart::new("location");
    if let Some(base) = &entry.base {
        location.push_attribute(("xml:base", base.as_str()));
    }
    location.push_attribute(("href", entry.href.as_str()));
    writer.write_event(Event::Empty(location))?;

    text_element(writer, "timestamp", &entry.timestamp.to_string(), None)?;
    if let Some(size) = entry.size {
        text_element(writer, "size", &size.to_string(), None)?;
    }
    if let Some(open_size) = entry.open_size {
        text_element(writer, "open-size", &open_size.to_string(), None)?;
    }
    if let Some(version) = entry.database_version {
        text_element(writer, "database_version", &version.to_string(), None)?;
    }

    writer.write_event(Event::End(BytesEnd::new("data")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DB_VERSION;

    fn entry(data_type: &str, href: &str) -> CatalogEntry {
        CatalogEntry {
            data_type: data_type.to_string(),
            href: href.to_string(),
            base: None,
            checksum: Checksum::new(ChecksumType::Sha256, "c0ffee"),
            open_checksum: Some(Checksum::new(ChecksumType::Sha256, "beef")),
            timestamp: 1_700_000_000,
            size: Some(123),
            open_size: Some(456),
            database_version: None,
        }
    }

    #[test]
    fn test_catalog_document_shape() {
        let mut catalog = Catalog::new("42", RepoTags::default());
        catalog.replace(entry("primary", "repodata/primary.xml.gz"));

        let xml = catalog.to_xml().unwrap();
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<repomd xmlns=\"http://linux.duke.edu/metadata/repo\" xmlns:rpm=\"http://linux.duke.edu/metadata/rpm\">"));
        assert!(xml.contains("<revision>42</revision>"));
        assert!(xml.contains("<data type=\"primary\">"));
        assert!(xml.contains("<checksum type=\"sha256\">c0ffee</checksum>"));
        assert!(xml.contains("<open-checksum type=\"sha256\">beef</open-checksum>"));
        assert!(xml.contains("<location href=\"repodata/primary.xml.gz\"/>"));
        assert!(xml.contains("<open-size>456</open-size>"));
        assert!(!xml.contains("<tags>"));
    }

    #[test]
    fn test_parse_what_was_written() {
        let tags = RepoTags {
            content: vec!["binary-x86_64".to_string()],
            repo: vec!["updates".to_string()],
            distro: vec![(Some("cpe:/o:example:os:1".to_string()), "Example OS 1".to_string())],
        };
        let mut catalog = Catalog::new("1700000000", tags);
        catalog.replace(entry("primary", "repodata/primary.xml.gz"));
        let mut db = entry("primary_db", "repodata/primary.sqlite.bz2");
        db.database_version = Some(DB_VERSION);
        db.base = Some("http://mirror/".to_string());
        catalog.replace(db);

        let parsed = Catalog::parse(&catalog.to_xml().unwrap()).unwrap();
        assert_eq!(parsed, catalog);
    }

    #[test]
    fn test_one_entry_per_type() {
        let mut catalog = Catalog::new("1", RepoTags::default());
        assert!(catalog.replace(entry("updateinfo", "repodata/a-updateinfo.xml.gz")).is_none());
        let old = catalog
            .replace(entry("updateinfo", "repodata/b-updateinfo.xml.gz"))
            .unwrap();

        assert_eq!(old.file_name(), "a-updateinfo.xml.gz");
        assert_eq!(catalog.entries.len(), 1);
        assert!(catalog.remove("updateinfo").is_some());
        assert!(catalog.entry("updateinfo").is_none());
    }

    #[test]
    fn test_parse_legacy_catalog() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<repomd xmlns="http://linux.duke.edu/metadata/repo">
  <data type="other">
    <location href="repodata/other.xml.gz"/>
    <checksum type="sha">aa</checksum>
    <timestamp>1199999999.5</timestamp>
    <open-checksum type="sha">bb</open-checksum>
  </data>
</repomd>"#;
        let catalog = Catalog::parse(xml).unwrap();
        let other = catalog.entry("other").unwrap();
        assert_eq!(other.href, "repodata/other.xml.gz");
        assert_eq!(other.timestamp, 1_199_999_999);
        assert_eq!(other.size, None);
        assert_eq!(other.checksum, Checksum::new(ChecksumType::Sha1, "aa"));
        assert_eq!(
            other.open_checksum,
            Some(Checksum::new(ChecksumType::Sha1, "bb"))
        );
    }

    #[test]
    fn test_database_version_out_of_range() {
        let xml = r#"<repomd xmlns="http://linux.duke.edu/metadata/repo">
  <data type="primary_db">
    <location href="repodata/primary.sqlite.bz2"/>
    <database_version>4294967296</database_version>
  </data>
</repomd>"#;
        assert!(matches!(Catalog::parse(xml), Err(Error::Xml(_))));
    }
}
