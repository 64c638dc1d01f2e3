//! Log entry framing (magic + id + length + crc32c).
//!
//! Every flushed pending buffer becomes one entry: a fixed header followed
//! by the body bytes. The header carries two checksums so a reader can tell
//! a damaged header from a damaged body.

use std::io::{self, Read};

use crc32c::crc32c;
use thiserror::Error;

pub const ENTRY_MAGIC: u32 = 0x454E_5452; // "ENTR"
pub const ENTRY_HEADER_LEN: usize = 24;

// header layout: magic u32 | entry_id u64 | body_len u32 | body_crc u32 |
// header_crc u32 (crc32c over the first 20 bytes)
const HEADER_CRC_OFFSET: usize = 20;

/// One framed entry read back from a segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    pub entry_id: u64,
    pub body: Vec<u8>,
}

impl LogEntry {
    pub fn frame_len(&self) -> usize {
        ENTRY_HEADER_LEN + self.body.len()
    }
}

/// Why an entry failed to parse. Tail-feasible kinds are repaired by
/// replay; the same kinds mid-stream are fatal.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum EntryCorruptKind {
    #[error("truncated entry header")]
    TruncatedHeader,
    #[error("bad entry magic")]
    BadMagic,
    #[error("entry header checksum mismatch")]
    HeaderCrcMismatch,
    #[error("truncated entry body")]
    TruncatedBody,
    #[error("entry body checksum mismatch")]
    BodyCrcMismatch,
}

#[derive(Debug)]
pub enum EntryOutcome {
    Entry(LogEntry),
    Eof,
    Corrupt(EntryCorruptKind),
}

/// Reserves header space at the front of a fresh pending buffer.
pub fn begin_entry(buf: &mut Vec<u8>) {
    debug_assert!(buf.is_empty());
    buf.resize(ENTRY_HEADER_LEN, 0);
}

/// Seals a pending buffer in place: fills the header with the body length
/// and both checksums. The buffer must start with the reserved header.
pub fn seal_entry(buf: &mut [u8], entry_id: u64) {
    debug_assert!(buf.len() >= ENTRY_HEADER_LEN);
    let body_len = (buf.len() - ENTRY_HEADER_LEN) as u32;
    let body_crc = crc32c(&buf[ENTRY_HEADER_LEN..]);

    buf[0..4].copy_from_slice(&ENTRY_MAGIC.to_le_bytes());
    buf[4..12].copy_from_slice(&entry_id.to_le_bytes());
    buf[12..16].copy_from_slice(&body_len.to_le_bytes());
    buf[16..20].copy_from_slice(&body_crc.to_le_bytes());
    let header_crc = crc32c(&buf[..HEADER_CRC_OFFSET]);
    buf[20..24].copy_from_slice(&header_crc.to_le_bytes());
}

/// Reads the next framed entry. `Eof` only when the stream ends exactly on
/// an entry boundary; anything else that fails to parse is `Corrupt`.
pub fn read_entry<R: Read>(reader: &mut R) -> io::Result<EntryOutcome> {
    let mut header = [0u8; ENTRY_HEADER_LEN];
    let got = read_fully(reader, &mut header)?;
    if got == 0 {
        return Ok(EntryOutcome::Eof);
    }
    if got < ENTRY_HEADER_LEN {
        return Ok(EntryOutcome::Corrupt(EntryCorruptKind::TruncatedHeader));
    }

    let expected_header_crc = u32::from_le_bytes([header[20], header[21], header[22], header[23]]);
    if crc32c(&header[..HEADER_CRC_OFFSET]) != expected_header_crc {
        return Ok(EntryOutcome::Corrupt(EntryCorruptKind::HeaderCrcMismatch));
    }

    let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    if magic != ENTRY_MAGIC {
        return Ok(EntryOutcome::Corrupt(EntryCorruptKind::BadMagic));
    }

    let entry_id = u64::from_le_bytes([
        header[4], header[5], header[6], header[7], header[8], header[9], header[10], header[11],
    ]);
    let body_len = u32::from_le_bytes([header[12], header[13], header[14], header[15]]) as usize;
    let expected_body_crc = u32::from_le_bytes([header[16], header[17], header[18], header[19]]);

    let mut body = vec![0u8; body_len];
    let got = read_fully(reader, &mut body)?;
    if got < body_len {
        return Ok(EntryOutcome::Corrupt(EntryCorruptKind::TruncatedBody));
    }

    if crc32c(&body) != expected_body_crc {
        return Ok(EntryOutcome::Corrupt(EntryCorruptKind::BodyCrcMismatch));
    }

    Ok(EntryOutcome::Entry(LogEntry { entry_id, body }))
}

fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut read = 0usize;
    while read < buf.len() {
        let n = reader.read(&mut buf[read..])?;
        if n == 0 {
            break;
        }
        read += n;
    }
    Ok(read)
}
