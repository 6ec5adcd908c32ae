// src/packages/header.rs

//! Location of the main header inside an RPM archive
//!
//! Clients use `<rpm:header-range>` to fetch just the header bytes of a
//! package, so the arithmetic here has to match what every other
//! repository generator produces.
//!
//! Layout: lead (96 bytes), then the signature header (8 bytes of magic and
//! reserved, a 4-byte index count, a 4-byte data length, 16 bytes per
//! index entry, then the data), padded to an 8-byte boundary, then the main
//! header with the same intro.

use std::io::{self, Read, Seek, SeekFrom};

/// Size of the package lead
pub const LEAD_SIZE: u64 = 96;

/// Header magic plus reserved bytes
const HEADER_INTRO: u64 = 8;

/// Size of one index entry (tag, type, offset, count)
const INDEX_ENTRY_SIZE: u64 = 16;

/// Offset where signature data starts: lead, intro and the two counts
const SIGNATURE_DATA_START: u64 = LEAD_SIZE + HEADER_INTRO + 8;

/// Byte range `[start, end)` of the main header
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct HeaderRange {
    pub start: u64,
    pub end: u64,
}

impl HeaderRange {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

fn read_counts<R: Read>(reader: &mut R) -> io::Result<(u64, u64)> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    let index = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as u64;
    let data = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]) as u64;
    Ok((index, data))
}

/// Compute the header byte range of the archive behind `reader`
///
/// Fails with `InvalidData` when the computed range does not fit inside
/// the archive.
pub fn read_header_range<R: Read + Seek>(reader: &mut R) -> io::Result<HeaderRange> {
    let file_size = reader.seek(SeekFrom::End(0))?;

    reader.seek(SeekFrom::Start(LEAD_SIZE + HEADER_INTRO))?;
    let (sig_index, sig_data) = read_counts(reader)?;

    // Signature header is padded out to an 8-byte boundary
    let sig_size = sig_data + sig_index * INDEX_ENTRY_SIZE;
    let padding = (8 - sig_size % 8) % 8;
    let start = SIGNATURE_DATA_START + sig_size + padding;

    reader.seek(SeekFrom::Start(start + HEADER_INTRO))?;
    let (hdr_index, hdr_data) = read_counts(reader)?;

    // The extra 16 bytes cover the header's own intro and counts
    let end = start + hdr_data + hdr_index * INDEX_ENTRY_SIZE + 16;

    if end > file_size {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "header range {}..{} exceeds file size {}",
                start, end, file_size
            ),
        ));
    }

    Ok(HeaderRange { start, end })
}
