//! Core identifiers, mutation records and little-endian cursor helpers.

use std::fmt;

use bytes::Bytes;
use thiserror::Error;

/// Monotonically increasing sequence number of a replicated mutation
/// within one partition.
pub type Decree = i64;

/// Primary-election epoch; a higher ballot wins.
pub type Ballot = i64;

/// Address of a replica process.
pub type NodeId = std::net::SocketAddr;

/// Global partition id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Gpid {
    pub app_id: i32,
    pub partition_index: i32,
}

impl Gpid {
    pub fn new(app_id: i32, partition_index: i32) -> Self {
        Self {
            app_id,
            partition_index,
        }
    }
}

impl fmt::Display for Gpid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.app_id, self.partition_index)
    }
}

/// Role of one replica of one partition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplicaStatus {
    Inactive,
    Error,
    Primary,
    Secondary,
    PotentialSecondary,
}

impl ReplicaStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReplicaStatus::Inactive => "inactive",
            ReplicaStatus::Error => "error",
            ReplicaStatus::Primary => "primary",
            ReplicaStatus::Secondary => "secondary",
            ReplicaStatus::PotentialSecondary => "potential-secondary",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "inactive" => Some(ReplicaStatus::Inactive),
            "error" => Some(ReplicaStatus::Error),
            "primary" => Some(ReplicaStatus::Primary),
            "secondary" => Some(ReplicaStatus::Secondary),
            "potential-secondary" => Some(ReplicaStatus::PotentialSecondary),
            _ => None,
        }
    }
}

impl fmt::Display for ReplicaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One replica's view of the partition configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionConfig {
    pub gpid: Gpid,
    pub ballot: Ballot,
    pub primary: Option<NodeId>,
    pub status: ReplicaStatus,
}

/// Fixed-size prefix of a serialized mutation record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MutationHeader {
    pub gpid: Gpid,
    pub ballot: Ballot,
    pub decree: Decree,
    pub log_offset: i64,
}

pub const MUTATION_FIXED_LEN: usize = 4 + 4 + 8 + 8 + 8 + 4;

/// One logical write: header plus opaque payload.
///
/// `log_offset` is the absolute byte offset at which the mutation's
/// serialized form begins in the global log stream, assigned by the
/// mutation log at append time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mutation {
    pub header: MutationHeader,
    pub payload: Bytes,
    logged: bool,
}

impl Mutation {
    pub fn new(gpid: Gpid, ballot: Ballot, decree: Decree, payload: Bytes) -> Self {
        Self {
            header: MutationHeader {
                gpid,
                ballot,
                decree,
                log_offset: 0,
            },
            payload,
            logged: false,
        }
    }

    pub fn is_logged(&self) -> bool {
        self.logged
    }

    pub fn set_logged(&mut self) {
        self.logged = true;
    }

    pub fn serialized_len(&self) -> usize {
        MUTATION_FIXED_LEN + self.payload.len()
    }

    pub fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.header.gpid.app_id.to_le_bytes());
        buf.extend_from_slice(&self.header.gpid.partition_index.to_le_bytes());
        buf.extend_from_slice(&self.header.ballot.to_le_bytes());
        buf.extend_from_slice(&self.header.decree.to_le_bytes());
        buf.extend_from_slice(&self.header.log_offset.to_le_bytes());
        buf.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.payload);
    }

    pub fn read_from(cursor: &mut Cursor<'_>) -> Result<Self, RecordDecodeError> {
        let app_id = cursor.read_i32_le()?;
        let partition_index = cursor.read_i32_le()?;
        let ballot = cursor.read_i64_le()?;
        let decree = cursor.read_i64_le()?;
        let log_offset = cursor.read_i64_le()?;
        let payload_len = cursor.read_u32_le()? as usize;
        let payload = Bytes::copy_from_slice(cursor.take(payload_len)?);
        Ok(Self {
            header: MutationHeader {
                gpid: Gpid::new(app_id, partition_index),
                ballot,
                decree,
                log_offset,
            },
            payload,
            logged: false,
        })
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RecordDecodeError {
    #[error("record truncated: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },
}

/// Bounds-checked little-endian reader over a byte slice.
#[derive(Debug)]
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_eof(&self) -> bool {
        self.pos == self.buf.len()
    }

    pub fn take(&mut self, len: usize) -> Result<&'a [u8], RecordDecodeError> {
        if len > self.remaining() {
            return Err(RecordDecodeError::Truncated {
                needed: len,
                remaining: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_u32_le(&mut self) -> Result<u32, RecordDecodeError> {
        let slice = self.take(4)?;
        Ok(u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
    }

    pub fn read_i32_le(&mut self) -> Result<i32, RecordDecodeError> {
        let slice = self.take(4)?;
        Ok(i32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
    }

    pub fn read_i64_le(&mut self) -> Result<i64, RecordDecodeError> {
        let slice = self.take(8)?;
        Ok(i64::from_le_bytes([
            slice[0], slice[1], slice[2], slice[3], slice[4], slice[5], slice[6], slice[7],
        ]))
    }

    pub fn read_u64_le(&mut self) -> Result<u64, RecordDecodeError> {
        let slice = self.take(8)?;
        Ok(u64::from_le_bytes([
            slice[0], slice[1], slice[2], slice[3], slice[4], slice[5], slice[6], slice[7],
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutation_roundtrip() {
        let mut mu = Mutation::new(Gpid::new(1, 3), 7, 42, Bytes::from_static(b"payload"));
        mu.header.log_offset = 1024;

        let mut buf = Vec::new();
        mu.write_to(&mut buf);
        assert_eq!(buf.len(), mu.serialized_len());

        let mut cursor = Cursor::new(&buf);
        let decoded = Mutation::read_from(&mut cursor).unwrap();
        assert!(cursor.is_eof());
        assert_eq!(decoded.header, mu.header);
        assert_eq!(decoded.payload, mu.payload);
        assert!(!decoded.is_logged());
    }

    #[test]
    fn truncated_record_fails() {
        let mu = Mutation::new(Gpid::new(1, 0), 1, 1, Bytes::from_static(b"abcdef"));
        let mut buf = Vec::new();
        mu.write_to(&mut buf);
        buf.truncate(buf.len() - 3);

        let mut cursor = Cursor::new(&buf);
        let err = Mutation::read_from(&mut cursor).unwrap_err();
        assert!(matches!(err, RecordDecodeError::Truncated { .. }));
    }

    #[test]
    fn cursor_take_past_end_fails() {
        let mut cursor = Cursor::new(b"abc");
        assert_eq!(cursor.take(2).unwrap(), b"ab");
        assert!(cursor.take(2).is_err());
    }
}
