// src/metadata/xml.rs

//! Rendering of the primary, filelists and other documents
//!
//! Every package becomes one self-contained `<package>` fragment per
//! document. Fragments are plain strings so that the reuse index can hand
//! back previously written ones verbatim.

use crate::config::PrimaryFilter;
use crate::packages::record::{FileKind, PackageRecord, Relation};
use quick_xml::escape::{escape, partial_escape};
use std::fmt::Write;

pub const COMMON_NS: &str = "http://linux.duke.edu/metadata/common";
pub const RPM_NS: &str = "http://linux.duke.edu/metadata/rpm";
pub const FILELISTS_NS: &str = "http://linux.duke.edu/metadata/filelists";
pub const OTHER_NS: &str = "http://linux.duke.edu/metadata/other";
pub const REPO_NS: &str = "http://linux.duke.edu/metadata/repo";

const XML_DECL: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";

/// One of the three per-package documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    Primary,
    Filelists,
    Other,
}

impl DocumentKind {
    pub const ALL: [DocumentKind; 3] = [
        DocumentKind::Primary,
        DocumentKind::Filelists,
        DocumentKind::Other,
    ];

    /// Catalog data type, also the file stem
    pub fn data_type(&self) -> &'static str {
        match self {
            DocumentKind::Primary => "primary",
            DocumentKind::Filelists => "filelists",
            DocumentKind::Other => "other",
        }
    }

    /// Uncompressed file name, e.g. `primary.xml`
    pub fn xml_name(&self) -> String {
        format!("{}.xml", self.data_type())
    }

    fn root(&self) -> &'static str {
        match self {
            DocumentKind::Primary => "metadata",
            DocumentKind::Filelists => "filelists",
            DocumentKind::Other => "otherdata",
        }
    }

    /// XML declaration and opening root element carrying the package count
    pub fn preamble(&self, packages: usize) -> String {
        let ns = match self {
            DocumentKind::Primary => {
                format!("xmlns=\"{}\" xmlns:rpm=\"{}\"", COMMON_NS, RPM_NS)
            }
            DocumentKind::Filelists => format!("xmlns=\"{}\"", FILELISTS_NS),
            DocumentKind::Other => format!("xmlns=\"{}\"", OTHER_NS),
        };
        format!("{}<{} {} packages=\"{}\">\n", XML_DECL, self.root(), ns, packages)
    }

    /// Closing root element
    pub fn closer(&self) -> String {
        format!("</{}>\n", self.root())
    }

    /// Render the fragment for `record` in this document's dialect
    pub fn render(&self, record: &PackageRecord, filter: &PrimaryFilter) -> String {
        match self {
            DocumentKind::Primary => render_primary(record, filter),
            DocumentKind::Filelists => render_filelists(record),
            DocumentKind::Other => render_other(record),
        }
    }
}

/// The three fragments of one package, in document order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragments {
    pub primary: String,
    pub filelists: String,
    pub other: String,
}

impl Fragments {
    pub fn render(record: &PackageRecord, filter: &PrimaryFilter) -> Self {
        Self {
            primary: render_primary(record, filter),
            filelists: render_filelists(record),
            other: render_other(record),
        }
    }

    pub fn get(&self, kind: DocumentKind) -> &str {
        match kind {
            DocumentKind::Primary => &self.primary,
            DocumentKind::Filelists => &self.filelists,
            DocumentKind::Other => &self.other,
        }
    }
}

/// Element text: trailing whitespace dropped, markup characters escaped
fn text(value: &str) -> std::borrow::Cow<'_, str> {
    partial_escape(value.trim_end())
}

/// `<tag>text</tag>`, or `<tag/>` when empty
fn optional_element(out: &mut String, indent: &str, tag: &str, value: &str) {
    let value = text(value);
    if value.is_empty() {
        let _ = writeln!(out, "{}<{}/>", indent, tag);
    } else {
        let _ = writeln!(out, "{}<{}>{}</{}>", indent, tag, value, tag);
    }
}

/// `<location xml:base="..." href="..."/>`
pub fn location_element(href: &str, base: Option<&str>) -> String {
    match base {
        Some(base) => format!(
            "<location xml:base=\"{}\" href=\"{}\"/>",
            escape(base),
            escape(href)
        ),
        None => format!("<location href=\"{}\"/>", escape(href)),
    }
}

fn version_element(record: &PackageRecord) -> String {
    format!(
        "<version epoch=\"{}\" ver=\"{}\" rel=\"{}\"/>",
        escape(&record.epoch),
        escape(&record.version),
        escape(&record.release)
    )
}

fn relation_entry(out: &mut String, relation: &Relation, with_pre: bool) {
    let _ = write!(out, "      <rpm:entry name=\"{}\"", escape(&relation.name));
    if let Some(flags) = relation.flags {
        let _ = write!(out, " flags=\"{}\"", flags);
        let evr = &relation.evr;
        for (attr, value) in [
            ("epoch", &evr.epoch),
            ("ver", &evr.version),
            ("rel", &evr.release),
        ] {
            if let Some(value) = value {
                let _ = write!(out, " {}=\"{}\"", attr, escape(value));
            }
        }
    }
    if with_pre && relation.pre {
        out.push_str(" pre=\"1\"");
    }
    out.push_str("/>\n");
}

fn relation_block<'a>(
    out: &mut String,
    tag: &str,
    relations: impl Iterator<Item = &'a Relation>,
    with_pre: bool,
) {
    let mut relations = relations.peekable();
    if relations.peek().is_none() {
        return;
    }
    let _ = writeln!(out, "    <rpm:{}>", tag);
    for relation in relations {
        relation_entry(out, relation, with_pre);
    }
    let _ = writeln!(out, "    </rpm:{}>", tag);
}

fn file_element(out: &mut String, indent: &str, kind: FileKind, path: &str) {
    match kind.type_attr() {
        Some(attr) => {
            let _ = writeln!(out, "{}<file type=\"{}\">{}</file>", indent, attr, text(path));
        }
        None => {
            let _ = writeln!(out, "{}<file>{}</file>", indent, text(path));
        }
    }
}

/// `<package type="rpm">` fragment for the primary document
pub fn render_primary(record: &PackageRecord, filter: &PrimaryFilter) -> String {
    let mut out = String::with_capacity(2048);

    out.push_str("<package type=\"rpm\">\n");
    let _ = writeln!(out, "  <name>{}</name>", text(&record.name));
    let _ = writeln!(out, "  <arch>{}</arch>", text(&record.arch));
    let _ = writeln!(out, "  {}", version_element(record));
    let _ = writeln!(
        out,
        "  <checksum type=\"{}\" pkgid=\"YES\">{}</checksum>",
        record.checksum.kind,
        record.checksum.value
    );
    let _ = writeln!(out, "  <summary>{}</summary>", text(&record.summary));
    let _ = writeln!(out, "  <description>{}</description>", text(&record.description));
    let _ = writeln!(out, "  <packager>{}</packager>", text(&record.packager));
    let _ = writeln!(out, "  <url>{}</url>", text(&record.url));
    let _ = writeln!(
        out,
        "  <time file=\"{}\" build=\"{}\"/>",
        record.file_time, record.build_time
    );
    let _ = writeln!(
        out,
        "  <size package=\"{}\" installed=\"{}\" archive=\"{}\"/>",
        record.package_size, record.installed_size, record.archive_size
    );
    let _ = writeln!(
        out,
        "  {}",
        location_element(&record.location.href, record.location.base.as_deref())
    );

    out.push_str("  <format>\n");
    optional_element(&mut out, "    ", "rpm:license", &record.license);
    optional_element(&mut out, "    ", "rpm:vendor", &record.vendor);
    optional_element(&mut out, "    ", "rpm:group", &record.group);
    optional_element(&mut out, "    ", "rpm:buildhost", &record.build_host);
    if let Some(source_rpm) = &record.source_rpm {
        let _ = writeln!(out, "    <rpm:sourcerpm>{}</rpm:sourcerpm>", text(source_rpm));
    }
    let _ = writeln!(
        out,
        "    <rpm:header-range start=\"{}\" end=\"{}\"/>",
        record.header_range.start, record.header_range.end
    );

    relation_block(&mut out, "provides", record.provides.iter(), false);
    relation_block(
        &mut out,
        "requires",
        record.requires.iter().filter(|r| !r.is_rpmlib()),
        true,
    );
    relation_block(&mut out, "conflicts", record.conflicts.iter(), false);
    relation_block(&mut out, "obsoletes", record.obsoletes.iter(), false);

    for (kind, path) in record.files.iter() {
        let keep = match kind {
            FileKind::Dir => filter.keep_dir(path),
            FileKind::File | FileKind::Ghost => filter.keep_file(path),
        };
        if keep {
            file_element(&mut out, "    ", kind, path);
        }
    }
    out.push_str("  </format>\n");
    out.push_str("</package>");
    out
}

fn keyed_package_open(out: &mut String, record: &PackageRecord) {
    let _ = writeln!(
        out,
        "<package pkgid=\"{}\" name=\"{}\" arch=\"{}\">",
        escape(record.pkgid()),
        escape(&record.name),
        escape(&record.arch)
    );
    let _ = writeln!(out, "  {}", version_element(record));
}

/// `<package pkgid=...>` fragment for the filelists document
pub fn render_filelists(record: &PackageRecord) -> String {
    let mut out = String::with_capacity(256 + record.files.len() * 64);
    keyed_package_open(&mut out, record);
    for (kind, path) in record.files.iter() {
        file_element(&mut out, "  ", kind, path);
    }
    out.push_str("</package>");
    out
}

/// `<package pkgid=...>` fragment for the other document
pub fn render_other(record: &PackageRecord) -> String {
    let mut out = String::with_capacity(256);
    keyed_package_open(&mut out, record);
    for entry in &record.changelog {
        let _ = writeln!(
            out,
            "  <changelog author=\"{}\" date=\"{}\">{}</changelog>",
            escape(&entry.author),
            entry.time,
            partial_escape(&entry.text)
        );
    }
    out.push_str("</package>");
    out
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::checksum::{Checksum, ChecksumType};
    use crate::config::ExtractOptions;
    use crate::packages::header::HeaderRange;
    use crate::packages::record::{ChangelogEntry, Comparison, Evr, FileManifest, Location};
    use pretty_assertions::assert_eq;

    pub(crate) fn sample_record() -> PackageRecord {
        let mut files = FileManifest::default();
        files.push(FileKind::File, "/usr/bin/tool".to_string());
        files.push(FileKind::File, "/usr/share/doc/tool/README".to_string());
        files.push(FileKind::Dir, "/etc/tool".to_string());
        files.push(FileKind::Dir, "/usr/share/tool".to_string());
        files.push(FileKind::Ghost, "/etc/tool/state".to_string());

        let mut pre = Relation::new("/bin/sh", None, Evr::default());
        pre.pre = true;

        PackageRecord {
            name: "tool".to_string(),
            arch: "x86_64".to_string(),
            epoch: "0".to_string(),
            version: "1.2".to_string(),
            release: "3".to_string(),
            checksum: Checksum::new(ChecksumType::Sha256, "abc123"),
            summary: "A <useful> tool  ".to_string(),
            description: "Does things & stuff".to_string(),
            packager: String::new(),
            url: "https://example.com".to_string(),
            license: "MIT".to_string(),
            vendor: String::new(),
            group: "Applications/System".to_string(),
            build_host: "builder".to_string(),
            source_rpm: Some("tool-1.2-3.src.rpm".to_string()),
            file_time: 1_700_000_000,
            build_time: 1_690_000_000,
            package_size: 4096,
            installed_size: 10240,
            archive_size: 10500,
            header_range: HeaderRange { start: 280, end: 2048 },
            location: Location {
                href: "Packages/tool-1.2-3.x86_64.rpm".to_string(),
                base: None,
            },
            provides: vec![Relation::new(
                "tool",
                Some(Comparison::Eq),
                Evr::parse("0:1.2-3"),
            )],
            requires: vec![
                Relation::new("rpmlib(PayloadIsXz)", Some(Comparison::Le), Evr::parse("5.2-1")),
                pre,
                Relation::new("libc.so.6", None, Evr::default()),
            ],
            conflicts: Vec::new(),
            obsoletes: Vec::new(),
            files,
            changelog: vec![ChangelogEntry {
                time: 1_680_000_000,
                author: "Dev <dev@example.com> - 1.2-3".to_string(),
                text: "- fix <bug>".to_string(),
            }],
        }
    }

    #[test]
    fn test_primary_fragment_layout() {
        let filter = ExtractOptions::default().primary_filter().unwrap();
        let xml = render_primary(&sample_record(), &filter);

        let expected = r#"<package type="rpm">
  <name>tool</name>
  <arch>x86_64</arch>
  <version epoch="0" ver="1.2" rel="3"/>
  <checksum type="sha256" pkgid="YES">abc123</checksum>
  <summary>A &lt;useful&gt; tool</summary>
  <description>Does things &amp; stuff</description>
  <packager></packager>
  <url>https://example.com</url>
  <time file="1700000000" build="1690000000"/>
  <size package="4096" installed="10240" archive="10500"/>
  <location href="Packages/tool-1.2-3.x86_64.rpm"/>
  <format>
    <rpm:license>MIT</rpm:license>
    <rpm:vendor/>
    <rpm:group>Applications/System</rpm:group>
    <rpm:buildhost>builder</rpm:buildhost>
    <rpm:sourcerpm>tool-1.2-3.src.rpm</rpm:sourcerpm>
    <rpm:header-range start="280" end="2048"/>
    <rpm:provides>
      <rpm:entry name="tool" flags="EQ" epoch="0" ver="1.2" rel="3"/>
    </rpm:provides>
    <rpm:requires>
      <rpm:entry name="/bin/sh" pre="1"/>
      <rpm:entry name="libc.so.6"/>
    </rpm:requires>
    <file>/usr/bin/tool</file>
    <file type="dir">/etc/tool</file>
    <file type="ghost">/etc/tool/state</file>
  </format>
</package>"#;
        assert_eq!(xml, expected);
    }

    #[test]
    fn test_filelists_fragment_has_full_manifest() {
        let xml = render_filelists(&sample_record());
        let expected = r#"<package pkgid="abc123" name="tool" arch="x86_64">
  <version epoch="0" ver="1.2" rel="3"/>
  <file>/usr/bin/tool</file>
  <file>/usr/share/doc/tool/README</file>
  <file type="dir">/etc/tool</file>
  <file type="dir">/usr/share/tool</file>
  <file type="ghost">/etc/tool/state</file>
</package>"#;
        assert_eq!(xml, expected);
    }

    #[test]
    fn test_other_fragment_carries_changelog() {
        let xml = render_other(&sample_record());
        let expected = r#"<package pkgid="abc123" name="tool" arch="x86_64">
  <version epoch="0" ver="1.2" rel="3"/>
  <changelog author="Dev &lt;dev@example.com&gt; - 1.2-3" date="1680000000">- fix &lt;bug&gt;</changelog>
</package>"#;
        assert_eq!(xml, expected);
    }

    #[test]
    fn test_location_with_base() {
        assert_eq!(
            location_element("a b.rpm", Some("http://x/?a=1&b=2")),
            r#"<location xml:base="http://x/?a=1&amp;b=2" href="a b.rpm"/>"#
        );
    }

    #[test]
    fn test_preambles() {
        assert_eq!(
            DocumentKind::Primary.preamble(2),
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<metadata xmlns=\"http://linux.duke.edu/metadata/common\" xmlns:rpm=\"http://linux.duke.edu/metadata/rpm\" packages=\"2\">\n"
        );
        assert!(DocumentKind::Other.preamble(0).contains("<otherdata xmlns=\"http://linux.duke.edu/metadata/other\" packages=\"0\">"));
        assert_eq!(DocumentKind::Filelists.closer(), "</filelists>\n");
    }
}
