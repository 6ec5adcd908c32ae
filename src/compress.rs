// src/compress.rs

//! Compression envelopes for metadata documents
//!
//! Every format is written at its highest level. Gzip output carries a
//! fixed zero mtime so that identical documents compress to identical bytes.

use bzip2::read::MultiBzDecoder;
use bzip2::write::BzEncoder;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::GzBuilder;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::Path;
use std::str::FromStr;
use xz2::read::XzDecoder;
use xz2::write::XzEncoder;

/// A supported compression format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// Gzip (.gz)
    #[default]
    Gzip,
    /// Bzip2 (.bz2)
    Bzip2,
    /// XZ/LZMA (.xz)
    Xz,
    /// Zstandard (.zst)
    Zstd,
}

impl Compression {
    /// File extension without the leading dot
    pub fn extension(&self) -> &'static str {
        match self {
            Compression::Gzip => "gz",
            Compression::Bzip2 => "bz2",
            Compression::Xz => "xz",
            Compression::Zstd => "zst",
        }
    }

    /// Detect the envelope from a file name's extension
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "gz" => Some(Compression::Gzip),
            "bz2" => Some(Compression::Bzip2),
            "xz" => Some(Compression::Xz),
            "zst" => Some(Compression::Zstd),
            _ => None,
        }
    }

    /// Wrap `inner` in an encoder
    ///
    /// `name` is the uncompressed file name recorded in the gzip header.
    pub fn wrap_writer<W: Write>(&self, inner: W, name: &str) -> io::Result<CompressedWriter<W>> {
        Ok(match self {
            Compression::Gzip => CompressedWriter::Gzip(
                GzBuilder::new()
                    .filename(name)
                    .mtime(0)
                    .write(inner, flate2::Compression::best()),
            ),
            Compression::Bzip2 => {
                CompressedWriter::Bzip2(BzEncoder::new(inner, bzip2::Compression::best()))
            }
            Compression::Xz => CompressedWriter::Xz(XzEncoder::new(inner, 9)),
            Compression::Zstd => CompressedWriter::Zstd(zstd::stream::write::Encoder::new(inner, 19)?),
        })
    }

    /// Wrap `inner` in a decoder
    pub fn wrap_reader<'r, R: Read + 'r>(&self, inner: R) -> io::Result<Box<dyn Read + 'r>> {
        Ok(match self {
            Compression::Gzip => Box::new(MultiGzDecoder::new(inner)),
            Compression::Bzip2 => Box::new(MultiBzDecoder::new(inner)),
            Compression::Xz => Box::new(XzDecoder::new(inner)),
            Compression::Zstd => Box::new(zstd::stream::read::Decoder::new(inner)?),
        })
    }

    /// Compress `source` into `dest`
    pub fn compress_file(&self, source: &Path, dest: &Path) -> io::Result<()> {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut input = BufReader::new(File::open(source)?);
        let mut writer = self.wrap_writer(File::create(dest)?, &name)?;
        io::copy(&mut input, &mut writer)?;
        writer.finish()?.sync_all()
    }
}

impl FromStr for Compression {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "gz" | "gzip" => Ok(Compression::Gzip),
            "bz2" | "bzip2" => Ok(Compression::Bzip2),
            "xz" => Ok(Compression::Xz),
            "zst" | "zstd" => Ok(Compression::Zstd),
            _ => Err(format!("Unsupported compression type: {}", s)),
        }
    }
}

/// Open a file for reading, transparently decompressing it when its
/// extension names a known envelope
pub fn open_maybe_compressed(path: &Path) -> io::Result<Box<dyn Read>> {
    let file = BufReader::new(File::open(path)?);
    match Compression::from_path(path) {
        Some(compression) => compression.wrap_reader(file),
        None => Ok(Box::new(file)),
    }
}

/// Read a whole (possibly compressed) document into a string
pub fn read_to_string(path: &Path) -> io::Result<String> {
    let mut reader = open_maybe_compressed(path)?;
    let mut content = String::new();
    reader.read_to_string(&mut content)?;
    Ok(content)
}

/// Streaming encoder for one of the supported envelopes
pub enum CompressedWriter<W: Write> {
    Gzip(GzEncoder<W>),
    Bzip2(BzEncoder<W>),
    Xz(XzEncoder<W>),
    Zstd(zstd::stream::write::Encoder<'static, W>),
}

impl<W: Write> CompressedWriter<W> {
    /// Flush the trailer and hand back the inner writer
    pub fn finish(self) -> io::Result<W> {
        match self {
            CompressedWriter::Gzip(w) => w.finish(),
            CompressedWriter::Bzip2(w) => w.finish(),
            CompressedWriter::Xz(w) => w.finish(),
            CompressedWriter::Zstd(w) => w.finish(),
        }
    }
}

impl<W: Write> Write for CompressedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            CompressedWriter::Gzip(w) => w.write(buf),
            CompressedWriter::Bzip2(w) => w.write(buf),
            CompressedWriter::Xz(w) => w.write(buf),
            CompressedWriter::Zstd(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            CompressedWriter::Gzip(w) => w.flush(),
            CompressedWriter::Bzip2(w) => w.flush(),
            CompressedWriter::Xz(w) => w.flush(),
            CompressedWriter::Zstd(w) => w.flush(),
        }
    }
}
