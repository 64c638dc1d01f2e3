//! One append-only log segment: `log.<index>.<start_offset>`.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::core::{Cursor, Decree, Gpid};
use crate::sync::{Permit, Semaphore};

use super::frame::{self, EntryOutcome};
use super::{LogError, LogResult};

pub const SEGMENT_MAGIC: u32 = 0xDEAD_BEEF;
pub const SEGMENT_VERSION: u32 = 1;

const SEGMENT_HEADER_FIXED_LEN: usize = 4 + 4 + 8 + 4 + 4;
const DECREE_MAP_ENTRY_LEN: usize = 4 + 4 + 8;

/// Body of the first entry of every segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SegmentHeader {
    pub start_global_offset: i64,
    pub log_buffer_size_bytes: i32,
    pub max_staleness_for_commit: i32,
}

impl SegmentHeader {
    fn encode_into(&self, buf: &mut Vec<u8>, decrees: &BTreeMap<Gpid, Decree>) -> usize {
        let before = buf.len();
        buf.extend_from_slice(&SEGMENT_MAGIC.to_le_bytes());
        buf.extend_from_slice(&SEGMENT_VERSION.to_le_bytes());
        buf.extend_from_slice(&self.start_global_offset.to_le_bytes());
        buf.extend_from_slice(&self.log_buffer_size_bytes.to_le_bytes());
        buf.extend_from_slice(&self.max_staleness_for_commit.to_le_bytes());
        buf.extend_from_slice(&(decrees.len() as i32).to_le_bytes());
        for (gpid, decree) in decrees {
            buf.extend_from_slice(&gpid.app_id.to_le_bytes());
            buf.extend_from_slice(&gpid.partition_index.to_le_bytes());
            buf.extend_from_slice(&decree.to_le_bytes());
        }
        buf.len() - before
    }
}

pub(crate) struct SegmentWrite {
    pub index: u32,
    pub file: Arc<File>,
    pub rel_offset: u64,
    pub permit: Permit,
    pub broken: Arc<AtomicBool>,
}

enum Mode {
    Read,
    Write { inflight: Arc<Semaphore> },
}

/// One segment file. Single-writer while writable; sequential reader
/// during replay.
pub struct LogSegment {
    index: u32,
    start_offset: i64,
    end_offset: i64,
    path: PathBuf,
    file: Arc<File>,
    mode: Mode,
    header: Option<SegmentHeader>,
    init_prepared_decrees: BTreeMap<Gpid, Decree>,
    broken: Arc<AtomicBool>,
    closed: bool,
}

pub fn segment_file_name(index: u32, start_offset: i64) -> String {
    format!("log.{index}.{start_offset}")
}

/// Parses `log.<index>.<start_offset>`; `None` for anything else,
/// including `.removed`-suffixed leftovers.
pub fn parse_segment_file_name(name: &str) -> Option<(u32, i64)> {
    if name.ends_with(".removed") {
        return None;
    }
    let rest = name.strip_prefix("log.")?;
    let (index, start_offset) = rest.split_once('.')?;
    let index: u32 = index.parse().ok()?;
    if index == 0 {
        // segment numbering is 1-based
        return None;
    }
    let start_offset: i64 = start_offset.parse().ok()?;
    Some((index, start_offset))
}

impl LogSegment {
    /// Opens an existing segment read-only. Returns `None` when the file
    /// name is not a live segment name.
    pub fn open_for_read(path: &Path) -> LogResult<Option<Self>> {
        let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
            return Ok(None);
        };
        let Some((index, start_offset)) = parse_segment_file_name(name) else {
            return Ok(None);
        };

        let file = File::open(path).map_err(|source| LogError::Io {
            path: Some(path.to_path_buf()),
            source,
        })?;
        let file_len = file
            .metadata()
            .map_err(|source| LogError::Io {
                path: Some(path.to_path_buf()),
                source,
            })?
            .len();

        Ok(Some(Self {
            index,
            start_offset,
            end_offset: start_offset + file_len as i64,
            path: path.to_path_buf(),
            file: Arc::new(file),
            mode: Mode::Read,
            header: None,
            init_prepared_decrees: BTreeMap::new(),
            broken: Arc::new(AtomicBool::new(false)),
            closed: false,
        }))
    }

    /// Creates a fresh writable segment at `dir/log.<index>.<start_offset>`.
    pub fn create_for_write(
        dir: &Path,
        index: u32,
        start_offset: i64,
        max_staleness_for_commit: i32,
        write_task_cap: usize,
    ) -> LogResult<Self> {
        let path = dir.join(segment_file_name(index, start_offset));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|source| LogError::Io {
                path: Some(path.clone()),
                source,
            })?;

        Ok(Self {
            index,
            start_offset,
            end_offset: start_offset,
            path,
            file: Arc::new(file),
            mode: Mode::Write {
                inflight: Semaphore::new(write_task_cap),
            },
            header: Some(SegmentHeader {
                start_global_offset: start_offset,
                log_buffer_size_bytes: 0,
                max_staleness_for_commit,
            }),
            init_prepared_decrees: BTreeMap::new(),
            broken: Arc::new(AtomicBool::new(false)),
            closed: false,
        })
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn start_offset(&self) -> i64 {
        self.start_offset
    }

    pub fn end_offset(&self) -> i64 {
        self.end_offset
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> Option<&SegmentHeader> {
        self.header.as_ref()
    }

    pub fn init_prepared_decrees(&self) -> &BTreeMap<Gpid, Decree> {
        &self.init_prepared_decrees
    }

    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }

    /// Appends the segment header record body (header + decree map) to a
    /// pending buffer. Must produce the first body bytes of the segment.
    pub fn write_header(
        &mut self,
        buf: &mut Vec<u8>,
        init_prepared_decrees: &BTreeMap<Gpid, Decree>,
        log_buffer_size_bytes: i32,
    ) -> usize {
        let staleness = self
            .header
            .map(|h| h.max_staleness_for_commit)
            .unwrap_or_default();
        let header = SegmentHeader {
            start_global_offset: self.start_offset,
            log_buffer_size_bytes,
            max_staleness_for_commit: staleness,
        };
        self.init_prepared_decrees = init_prepared_decrees.clone();
        self.header = Some(header);
        header.encode_into(buf, init_prepared_decrees)
    }

    /// Parses the segment header from the first entry's body; returns the
    /// number of body bytes consumed.
    pub fn read_header(&mut self, cursor: &mut Cursor<'_>) -> LogResult<usize> {
        let invalid = |reason: &str| LogError::SegmentHeaderInvalid {
            path: self.path.clone(),
            reason: reason.to_string(),
        };

        let before = cursor.remaining();
        let magic = cursor
            .read_u32_le()
            .map_err(|_| invalid("truncated segment header"))?;
        if magic != SEGMENT_MAGIC {
            return Err(invalid("segment magic mismatch"));
        }
        let version = cursor
            .read_u32_le()
            .map_err(|_| invalid("truncated segment header"))?;
        if version != SEGMENT_VERSION {
            return Err(invalid("unsupported segment version"));
        }
        let start_global_offset = cursor
            .read_i64_le()
            .map_err(|_| invalid("truncated segment header"))?;
        let log_buffer_size_bytes = cursor
            .read_i32_le()
            .map_err(|_| invalid("truncated segment header"))?;
        let max_staleness_for_commit = cursor
            .read_i32_le()
            .map_err(|_| invalid("truncated segment header"))?;

        let count = cursor
            .read_i32_le()
            .map_err(|_| invalid("truncated decree map"))?;
        if count < 0 {
            return Err(invalid("negative decree map count"));
        }
        let mut decrees = BTreeMap::new();
        for _ in 0..count {
            let app_id = cursor
                .read_i32_le()
                .map_err(|_| invalid("truncated decree map"))?;
            let partition_index = cursor
                .read_i32_le()
                .map_err(|_| invalid("truncated decree map"))?;
            let decree = cursor
                .read_i64_le()
                .map_err(|_| invalid("truncated decree map"))?;
            decrees.insert(Gpid::new(app_id, partition_index), decree);
        }

        self.header = Some(SegmentHeader {
            start_global_offset,
            log_buffer_size_bytes,
            max_staleness_for_commit,
        });
        self.init_prepared_decrees = decrees;

        debug_assert_eq!(
            before - cursor.remaining(),
            SEGMENT_HEADER_FIXED_LEN + 4 + DECREE_MAP_ENTRY_LEN * count as usize
        );
        Ok(before - cursor.remaining())
    }

    /// Reads the next framed entry sequentially (read mode only).
    pub fn read_next_entry(&mut self) -> LogResult<EntryOutcome> {
        assert!(
            matches!(self.mode, Mode::Read),
            "read_next_entry on writable segment {}",
            self.index
        );
        let mut reader = &*self.file;
        frame::read_entry(&mut reader).map_err(|source| LogError::Io {
            path: Some(self.path.clone()),
            source,
        })
    }

    /// Registers a write of `len` bytes starting at absolute `offset`,
    /// which must equal the current end offset. Returns the pieces the
    /// writer thread needs; acquiring the write slot may briefly block
    /// when `write_task_max_count` writes are already in flight.
    pub(crate) fn begin_write(&mut self, offset: i64, len: usize) -> LogResult<SegmentWrite> {
        let Mode::Write { inflight } = &self.mode else {
            panic!("begin_write on read-only segment {}", self.index);
        };
        if self.is_broken() {
            return Err(LogError::SegmentBroken { index: self.index });
        }
        assert_eq!(
            offset, self.end_offset,
            "segment write must continue at end offset"
        );

        let permit = inflight.acquire();
        self.end_offset = offset + len as i64;
        Ok(SegmentWrite {
            index: self.index,
            file: Arc::clone(&self.file),
            rel_offset: (offset - self.start_offset) as u64,
            permit,
            broken: Arc::clone(&self.broken),
        })
    }

    /// Truncates the file to `rel_len` bytes and rewinds the in-memory end
    /// offset; used by replay's tail repair.
    pub(crate) fn truncate_to(&mut self, rel_len: u64) -> LogResult<()> {
        let file = OpenOptions::new()
            .write(true)
            .open(&self.path)
            .map_err(|source| LogError::Io {
                path: Some(self.path.clone()),
                source,
            })?;
        file.set_len(rel_len).map_err(|source| LogError::Io {
            path: Some(self.path.clone()),
            source,
        })?;
        file.sync_all().map_err(|source| LogError::Io {
            path: Some(self.path.clone()),
            source,
        })?;
        self.end_offset = self.start_offset + rel_len as i64;
        Ok(())
    }

    /// Waits for outstanding writes and closes the handle. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        if let Mode::Write { inflight } = &self.mode {
            inflight.wait_idle();
            if let Err(err) = self.file.sync_all() {
                tracing::warn!(segment = self.index, "sync on close failed: {err}");
            }
        }
        self.closed = true;
    }
}

impl Drop for LogSegment {
    fn drop(&mut self) {
        self.close();
    }
}
