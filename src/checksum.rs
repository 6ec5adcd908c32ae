// src/checksum.rs

//! Digest helpers shared by the extractor, the checksum cache and the
//! catalog builder

use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

/// Checksum algorithm type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumType {
    /// SHA-1, written as `sha` like older createrepo releases did
    #[serde(alias = "sha")]
    Sha1,

    Sha224,

    /// SHA-256 (default)
    #[default]
    Sha256,

    Sha384,

    /// SHA-512
    Sha512,
}

fn hex_digest<D: Digest + io::Write, R: Read>(reader: &mut R) -> io::Result<String> {
    let mut hasher = D::new();
    io::copy(reader, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

impl ChecksumType {
    /// Name used in `type="..."` attributes
    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumType::Sha1 => "sha",
            ChecksumType::Sha224 => "sha224",
            ChecksumType::Sha256 => "sha256",
            ChecksumType::Sha384 => "sha384",
            ChecksumType::Sha512 => "sha512",
        }
    }

    /// Length of a hex digest of this type
    pub fn hex_len(&self) -> usize {
        match self {
            ChecksumType::Sha1 => 40,
            ChecksumType::Sha224 => 56,
            ChecksumType::Sha256 => 64,
            ChecksumType::Sha384 => 96,
            ChecksumType::Sha512 => 128,
        }
    }

    /// Whether `value` looks like a complete hex digest of this type
    pub fn is_digest(&self, value: &str) -> bool {
        value.len() == self.hex_len() && value.bytes().all(|b| b.is_ascii_hexdigit())
    }

    /// Hex digest of everything `reader` yields
    pub fn digest_reader<R: Read>(&self, reader: &mut R) -> io::Result<String> {
        match self {
            ChecksumType::Sha1 => hex_digest::<Sha1, R>(reader),
            ChecksumType::Sha224 => hex_digest::<Sha224, R>(reader),
            ChecksumType::Sha256 => hex_digest::<Sha256, R>(reader),
            ChecksumType::Sha384 => hex_digest::<Sha384, R>(reader),
            ChecksumType::Sha512 => hex_digest::<Sha512, R>(reader),
        }
    }

    /// Hex digest of everything `reader` yields, plus the byte count
    pub fn digest_counted<R: Read>(&self, reader: &mut R) -> io::Result<(String, u64)> {
        let mut counted = Counted { inner: reader, count: 0 };
        let digest = self.digest_reader(&mut counted)?;
        Ok((digest, counted.count))
    }

    /// Hex digest of a byte slice
    pub fn digest_bytes(&self, data: &[u8]) -> String {
        match self {
            ChecksumType::Sha1 => hex::encode(Sha1::digest(data)),
            ChecksumType::Sha224 => hex::encode(Sha224::digest(data)),
            ChecksumType::Sha256 => hex::encode(Sha256::digest(data)),
            ChecksumType::Sha384 => hex::encode(Sha384::digest(data)),
            ChecksumType::Sha512 => hex::encode(Sha512::digest(data)),
        }
    }

    /// Hex digest of a whole file
    pub fn digest_file(&self, path: &Path) -> io::Result<String> {
        let mut file = File::open(path)?;
        self.digest_reader(&mut file)
    }
}

impl fmt::Display for ChecksumType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChecksumType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "sha" | "sha1" => Ok(ChecksumType::Sha1),
            "sha224" => Ok(ChecksumType::Sha224),
            "sha256" => Ok(ChecksumType::Sha256),
            "sha384" => Ok(ChecksumType::Sha384),
            "sha512" => Ok(ChecksumType::Sha512),
            _ => Err(format!("Unsupported checksum type: {}", s)),
        }
    }
}

/// An algorithm-tagged digest
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum {
    pub kind: ChecksumType,
    pub value: String,
}

impl Checksum {
    pub fn new(kind: ChecksumType, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}

/// Reader adapter counting the bytes passed through
struct Counted<R> {
    inner: R,
    count: u64,
}

impl<R: Read> Read for Counted<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}
