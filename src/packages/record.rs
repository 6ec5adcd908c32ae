// src/packages/record.rs

//! Canonical in-memory package metadata

use crate::checksum::Checksum;
use crate::packages::header::HeaderRange;
use std::fmt;
use std::str::FromStr;

/// Flag mask selecting the comparison sense of a dependency
pub const RPMSENSE_SENSEMASK: u32 = 0x0f;
pub const RPMSENSE_LESS: u32 = 1 << 1;
pub const RPMSENSE_GREATER: u32 = 1 << 2;
pub const RPMSENSE_EQUAL: u32 = 1 << 3;

/// Flags marking a requirement as needed before installation
pub const RPMSENSE_PREREQ: u32 = 1 << 6;
pub const RPMSENSE_SCRIPT_PRE: u32 = 1 << 9;
pub const RPMSENSE_SCRIPT_POST: u32 = 1 << 10;

/// File flag for entries that are declared but not shipped
pub const RPMFILE_GHOST: u32 = 1 << 6;

const S_IFMT: u32 = 0o170000;
const S_IFDIR: u32 = 0o040000;

/// Prefix of the package manager's internal capability namespace
pub const RPMLIB_PREFIX: &str = "rpmlib(";

/// Version comparison operator of a relation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Comparison {
    Lt,
    Gt,
    Eq,
    Le,
    Ge,
}

impl Comparison {
    /// Decode the sense bits of an RPM dependency flag word
    ///
    /// Returns `None` for unversioned relations.
    pub fn from_flags(flags: u32) -> Option<Self> {
        match flags & RPMSENSE_SENSEMASK {
            f if f == RPMSENSE_LESS => Some(Comparison::Lt),
            f if f == RPMSENSE_GREATER => Some(Comparison::Gt),
            f if f == RPMSENSE_EQUAL => Some(Comparison::Eq),
            f if f == RPMSENSE_LESS | RPMSENSE_EQUAL => Some(Comparison::Le),
            f if f == RPMSENSE_GREATER | RPMSENSE_EQUAL => Some(Comparison::Ge),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Comparison::Lt => "LT",
            Comparison::Gt => "GT",
            Comparison::Eq => "EQ",
            Comparison::Le => "LE",
            Comparison::Ge => "GE",
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Comparison {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "LT" => Ok(Comparison::Lt),
            "GT" => Ok(Comparison::Gt),
            "EQ" => Ok(Comparison::Eq),
            "LE" => Ok(Comparison::Le),
            "GE" => Ok(Comparison::Ge),
            _ => Err(format!("Invalid comparison flag: {}", s)),
        }
    }
}

/// Epoch/version/release triple; absent parts stay `None`
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Evr {
    pub epoch: Option<String>,
    pub version: Option<String>,
    pub release: Option<String>,
}

impl Evr {
    /// Split an `[epoch:]version[-release]` string
    ///
    /// An empty string yields an empty triple. A present version without an
    /// explicit epoch gets epoch `0`; an unparsable epoch also becomes `0`.
    pub fn parse(s: &str) -> Self {
        if s.is_empty() {
            return Self::default();
        }

        let (epoch, rest) = match s.find(':') {
            Some(i) => {
                let epoch = s[..i]
                    .parse::<u64>()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|_| "0".to_string());
                (epoch, &s[i + 1..])
            }
            None => ("0".to_string(), s),
        };

        let (version, release) = match rest.find('-') {
            Some(j) => (&rest[..j], Some(rest[j + 1..].to_string())),
            None => (rest, None),
        };

        Self {
            epoch: Some(epoch),
            version: (!version.is_empty()).then(|| version.to_string()),
            release,
        }
    }
}

/// One provides/requires/conflicts/obsoletes entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Relation {
    pub name: String,
    pub flags: Option<Comparison>,
    pub evr: Evr,
    /// Requirement must be satisfied before installation (requires only)
    pub pre: bool,
}

impl Relation {
    pub fn new(name: impl Into<String>, flags: Option<Comparison>, evr: Evr) -> Self {
        Self {
            name: name.into(),
            flags,
            evr,
            pre: false,
        }
    }

    /// Build a relation from the raw header triple
    pub fn from_raw(name: &str, flags: u32, version: &str) -> Self {
        Self {
            name: name.to_string(),
            flags: Comparison::from_flags(flags),
            evr: Evr::parse(version),
            pre: flags & (RPMSENSE_PREREQ | RPMSENSE_SCRIPT_PRE | RPMSENSE_SCRIPT_POST) != 0,
        }
    }

    /// Whether the name lives in the internal `rpmlib(...)` namespace
    pub fn is_rpmlib(&self) -> bool {
        self.name.starts_with(RPMLIB_PREFIX)
    }
}

/// Remove exact duplicates, keeping the first occurrence of each
pub fn dedup_relations(relations: Vec<Relation>) -> Vec<Relation> {
    let mut seen = std::collections::HashSet::new();
    relations
        .into_iter()
        .filter(|r| seen.insert(r.clone()))
        .collect()
}

/// Classification of a manifest entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    File,
    Dir,
    Ghost,
}

impl FileKind {
    /// Classify using the file mode and file flags from the header
    ///
    /// Ghost takes precedence over the mode.
    pub fn classify(mode: u32, flags: u32) -> Self {
        if flags & RPMFILE_GHOST != 0 {
            FileKind::Ghost
        } else if mode & S_IFMT == S_IFDIR {
            FileKind::Dir
        } else {
            FileKind::File
        }
    }

    /// Value of the `type` attribute; regular files carry none
    pub fn type_attr(&self) -> Option<&'static str> {
        match self {
            FileKind::File => None,
            FileKind::Dir => Some("dir"),
            FileKind::Ghost => Some("ghost"),
        }
    }

    /// Single-letter code used in the filelists database
    pub fn code(&self) -> char {
        match self {
            FileKind::File => 'f',
            FileKind::Dir => 'd',
            FileKind::Ghost => 'g',
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::File => "file",
            FileKind::Dir => "dir",
            FileKind::Ghost => "ghost",
        }
    }
}

/// A package's file list partitioned into regular files, directories and
/// ghosts, each in header order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileManifest {
    pub files: Vec<String>,
    pub dirs: Vec<String>,
    pub ghosts: Vec<String>,
}

impl FileManifest {
    pub fn push(&mut self, kind: FileKind, path: String) {
        match kind {
            FileKind::File => self.files.push(path),
            FileKind::Dir => self.dirs.push(path),
            FileKind::Ghost => self.ghosts.push(path),
        }
    }

    /// All entries, files first, then directories, then ghosts
    pub fn iter(&self) -> impl Iterator<Item = (FileKind, &str)> {
        self.files
            .iter()
            .map(|f| (FileKind::File, f.as_str()))
            .chain(self.dirs.iter().map(|d| (FileKind::Dir, d.as_str())))
            .chain(self.ghosts.iter().map(|g| (FileKind::Ghost, g.as_str())))
    }

    pub fn len(&self) -> usize {
        self.files.len() + self.dirs.len() + self.ghosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One changelog entry
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ChangelogEntry {
    pub time: u64,
    pub author: String,
    pub text: String,
}

/// Order newest first and keep at most `limit` entries
///
/// A limit of zero means no limit.
pub fn recent_changelog(mut entries: Vec<ChangelogEntry>, limit: Option<usize>) -> Vec<ChangelogEntry> {
    entries.sort_by(|a, b| b.cmp(a));
    if let Some(limit) = limit.filter(|&l| l > 0) {
        entries.truncate(limit);
    }
    entries
}

/// Where clients fetch the package from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    pub href: String,
    pub base: Option<String>,
}

/// One package's canonical metadata
///
/// Produced once per package file by the extractor (or parsed back out of
/// a primary document) and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageRecord {
    pub name: String,
    pub arch: String,
    pub epoch: String,
    pub version: String,
    pub release: String,
    pub checksum: Checksum,
    pub summary: String,
    pub description: String,
    pub packager: String,
    pub url: String,
    pub license: String,
    pub vendor: String,
    pub group: String,
    pub build_host: String,
    pub source_rpm: Option<String>,
    /// Package file modification time (unix seconds)
    pub file_time: u64,
    pub build_time: u64,
    /// Package file size
    pub package_size: u64,
    pub installed_size: u64,
    pub archive_size: u64,
    pub header_range: HeaderRange,
    pub location: Location,
    pub provides: Vec<Relation>,
    pub requires: Vec<Relation>,
    pub conflicts: Vec<Relation>,
    pub obsoletes: Vec<Relation>,
    pub files: FileManifest,
    /// Newest first, already truncated to the configured limit
    pub changelog: Vec<ChangelogEntry>,
}

impl PackageRecord {
    /// `name-[epoch:]version-release.arch`
    pub fn nevra(&self) -> String {
        if self.epoch.is_empty() || self.epoch == "0" {
            format!("{}-{}-{}.{}", self.name, self.version, self.release, self.arch)
        } else {
            format!(
                "{}-{}:{}-{}.{}",
                self.name, self.epoch, self.version, self.release, self.arch
            )
        }
    }

    pub fn pkgid(&self) -> &str {
        &self.checksum.value
    }
}
