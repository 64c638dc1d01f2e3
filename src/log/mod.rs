//! Segmented, crash-safe mutation log.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub mod frame;
pub mod mutation_log;
pub mod segment;
pub(crate) mod writer;

pub use frame::{EntryCorruptKind, LogEntry, ENTRY_HEADER_LEN};
pub use mutation_log::{MutationLog, SegmentInfo};
pub use segment::{LogSegment, SegmentHeader, SEGMENT_MAGIC, SEGMENT_VERSION};
pub use writer::AppendCallback;

pub type LogResult<T> = Result<T, LogError>;

#[derive(Debug, Error)]
pub enum LogError {
    #[error("io error at {path:?}: {source}")]
    Io {
        path: Option<PathBuf>,
        #[source]
        source: io::Error,
    },
    #[error("log segment missing: expected index {index}")]
    MissingSegment { index: u32 },
    #[error("duplicate log segment index {index}")]
    DuplicateSegment { index: u32 },
    #[error("log offset mismatch: expected {expected}, got {got}")]
    OffsetMismatch { expected: i64, got: i64 },
    #[error("log entry checksum mismatch at offset {offset}")]
    WrongChecksum { offset: i64 },
    #[error("invalid log data at offset {offset}: {kind}")]
    InvalidData { offset: i64, kind: EntryCorruptKind },
    #[error("segment header invalid at {path:?}: {reason}")]
    SegmentHeaderInvalid { path: PathBuf, reason: String },
    #[error("write to segment {index} failed: {kind:?}")]
    WriteFailed { index: u32, kind: io::ErrorKind },
    #[error("log segment {index} is broken after a failed write")]
    SegmentBroken { index: u32 },
    #[error("log is not writable")]
    NotWritable,
}
