//! The mutation log: an ordered set of segments with pending-buffer
//! batching, ordered replay and decree-aware garbage collection.
//!
//! Appends serialize into one in-memory pending buffer per flush. A flush
//! is triggered by a non-batched append, the pending timer, the buffer
//! crossing `log_buffer_size_bytes`, or `close`. The sealed buffer is
//! handed to the writer thread, which fans completion out to every
//! registered callback in append order.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Sender};

use crate::config::LogConfig;
use crate::core::{Cursor, Decree, Gpid, Mutation};

use super::frame::{self, EntryCorruptKind, EntryOutcome, ENTRY_HEADER_LEN};
use super::segment::LogSegment;
use super::writer::{self, AppendCallback, FlushJob, TimerMsg, WriterMsg};
use super::{LogError, LogResult};

/// Snapshot of one segment, for observability and tests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SegmentInfo {
    pub index: u32,
    pub start_offset: i64,
    pub end_offset: i64,
    pub path: PathBuf,
}

struct PendingBuffer {
    entry_id: u64,
    start_offset: i64,
    buf: Vec<u8>,
    callbacks: Vec<AppendCallback>,
}

struct LogState {
    dir: PathBuf,
    segments: BTreeMap<u32, LogSegment>,
    current: Option<u32>,
    last_segment_index: u32,
    global_start_offset: i64,
    global_end_offset: i64,
    init_prepared_decrees: BTreeMap<Gpid, Decree>,
    max_staleness_for_commit: i32,
    pending: Option<PendingBuffer>,
    next_entry_id: u64,
}

impl LogState {
    fn new() -> Self {
        Self {
            dir: PathBuf::new(),
            segments: BTreeMap::new(),
            current: None,
            last_segment_index: 0,
            global_start_offset: 0,
            global_end_offset: 0,
            init_prepared_decrees: BTreeMap::new(),
            max_staleness_for_commit: 0,
            pending: None,
            next_entry_id: 1,
        }
    }
}

struct LogShared {
    config: LogConfig,
    state: Mutex<LogState>,
    writer_tx: Sender<WriterMsg>,
    timer_tx: Sender<TimerMsg>,
}

/// Callbacks rescued from a flush whose write could not be issued; they
/// are notified outside the log lock.
struct FailedFlush {
    index: u32,
    callbacks: Vec<AppendCallback>,
}

impl FailedFlush {
    fn notify(self) {
        for callback in self.callbacks {
            callback(Err(LogError::WriteFailed {
                index: self.index,
                kind: io::ErrorKind::Other,
            }));
        }
    }
}

impl LogShared {
    fn lock(&self) -> std::sync::MutexGuard<'_, LogState> {
        self.state.lock().expect("mutation log poisoned")
    }

    fn create_new_pending_buffer(&self, st: &mut LogState) {
        debug_assert!(st.pending.is_none());
        let entry_id = st.next_entry_id;
        st.next_entry_id += 1;

        let mut buf = Vec::new();
        frame::begin_entry(&mut buf);
        st.pending = Some(PendingBuffer {
            entry_id,
            start_offset: st.global_end_offset,
            buf,
            callbacks: Vec::new(),
        });
        st.global_end_offset += ENTRY_HEADER_LEN as i64;

        if self.config.batch_write {
            let deadline = Instant::now() + Duration::from_millis(self.config.log_pending_max_ms);
            let _ = self.timer_tx.send(TimerMsg::Arm { entry_id, deadline });
        }
    }

    fn write_pending_mutations(
        &self,
        st: &mut LogState,
        allow_rollover: bool,
    ) -> Option<FailedFlush> {
        let mut pending = st.pending.take().expect("pending buffer");
        frame::seal_entry(&mut pending.buf, pending.entry_id);

        let current = st.current.expect("writable segment");
        let segment_len = {
            let seg = st.segments.get_mut(&current).expect("current segment");
            let write = match seg.begin_write(pending.start_offset, pending.buf.len()) {
                Ok(write) => write,
                Err(err) => {
                    tracing::error!(segment = current, "cannot issue log write: {err}");
                    return Some(FailedFlush {
                        index: current,
                        callbacks: pending.callbacks,
                    });
                }
            };
            debug_assert_eq!(st.global_end_offset, seg.end_offset());

            let job = FlushJob {
                segment_index: write.index,
                file: write.file,
                rel_offset: write.rel_offset,
                buf: pending.buf,
                callbacks: pending.callbacks,
                permit: write.permit,
                broken: write.broken,
            };
            if let Err(err) = self.writer_tx.send(WriterMsg::Flush(job)) {
                let WriterMsg::Flush(job) = err.0 else {
                    unreachable!()
                };
                return Some(FailedFlush {
                    index: current,
                    callbacks: job.callbacks,
                });
            }
            seg.end_offset() - seg.start_offset()
        };

        if allow_rollover && segment_len >= self.config.max_log_file_bytes() {
            if let Err(err) = self.create_new_log_file(st) {
                tracing::error!("create new log segment failed: {err}");
            }
        }
        None
    }

    fn create_new_log_file(&self, st: &mut LogState) -> LogResult<()> {
        if let Some(current) = st.current {
            debug_assert_eq!(st.segments[&current].end_offset(), st.global_end_offset);
        }

        let index = st.last_segment_index + 1;
        let segment = LogSegment::create_for_write(
            &st.dir,
            index,
            st.global_end_offset,
            st.max_staleness_for_commit,
            self.config.write_task_max_count,
        )?;
        tracing::info!(segment = index, path = %segment.path().display(), "created log segment");

        st.last_segment_index = index;
        debug_assert!(!st.segments.contains_key(&index));
        st.segments.insert(index, segment);
        st.current = Some(index);

        self.create_new_pending_buffer(st);

        // the segment header becomes the first body bytes of the segment
        let LogState {
            segments,
            pending,
            init_prepared_decrees,
            global_end_offset,
            ..
        } = st;
        let seg = segments.get_mut(&index).expect("fresh segment");
        let p = pending.as_mut().expect("fresh pending buffer");
        let header_len = seg.write_header(
            &mut p.buf,
            init_prepared_decrees,
            self.config.log_buffer_size_bytes() as i32,
        );
        *global_end_offset += header_len as i64;

        debug_assert_eq!(p.buf.len(), header_len + ENTRY_HEADER_LEN);
        Ok(())
    }

    fn on_pending_timer(&self, entry_id: u64) {
        let failed = {
            let mut st = self.lock();
            let live = st
                .pending
                .as_ref()
                .is_some_and(|p| p.entry_id == entry_id);
            if live {
                self.write_pending_mutations(&mut st, true)
            } else {
                // the buffer was flushed (or replaced) before the timer
                // fired; stale firings are no-ops
                None
            }
        };
        if let Some(failed) = failed {
            failed.notify();
        }
    }
}

/// Process-wide mutation log for all partitions of one node.
pub struct MutationLog {
    shared: Arc<LogShared>,
    writer: Option<JoinHandle<()>>,
    timer: Option<JoinHandle<()>>,
}

impl MutationLog {
    pub fn new(config: LogConfig) -> Self {
        let (writer_tx, writer_rx) = unbounded();
        let (timer_tx, timer_rx) = unbounded();

        let shared = Arc::new(LogShared {
            config,
            state: Mutex::new(LogState::new()),
            writer_tx,
            timer_tx,
        });

        let writer = writer::spawn_writer(writer_rx);
        let weak = Arc::downgrade(&shared);
        let timer = writer::spawn_timer(timer_rx, move |entry_id| {
            if let Some(shared) = weak.upgrade() {
                shared.on_pending_timer(entry_id);
            }
        });

        Self {
            shared,
            writer: Some(writer),
            timer: Some(timer),
        }
    }

    /// Scans `dir` for segments and enters read-only replay mode. Segment
    /// indices must be contiguous from the lowest present.
    pub fn initialize(&self, dir: &Path) -> LogResult<()> {
        let mut st = self.shared.lock();
        let st = &mut *st;

        fs::create_dir_all(dir).map_err(|source| LogError::Io {
            path: Some(dir.to_path_buf()),
            source,
        })?;
        st.dir = dir.to_path_buf();
        st.segments.clear();
        st.current = None;
        st.last_segment_index = 0;
        st.global_start_offset = 0;
        st.global_end_offset = 0;
        debug_assert!(st.pending.is_none());

        let entries = fs::read_dir(dir).map_err(|source| LogError::Io {
            path: Some(dir.to_path_buf()),
            source,
        })?;
        for entry in entries {
            let entry = entry.map_err(|source| LogError::Io {
                path: Some(dir.to_path_buf()),
                source,
            })?;
            let path = entry.path();
            match LogSegment::open_for_read(&path)? {
                Some(segment) => {
                    let index = segment.index();
                    if st.segments.insert(index, segment).is_some() {
                        return Err(LogError::DuplicateSegment { index });
                    }
                }
                None => {
                    tracing::warn!(path = %path.display(), "skipping non-segment file during log init");
                }
            }
        }

        if let Some((first_index, first)) = st.segments.iter().next() {
            st.last_segment_index = first_index - 1;
            st.global_start_offset = first.start_offset();
        }

        let mut expected = st.last_segment_index;
        let mut end = st.global_start_offset;
        for (index, segment) in st.segments.iter() {
            expected += 1;
            if *index != expected {
                return Err(LogError::MissingSegment { index: expected });
            }
            end = segment.end_offset();
        }
        st.last_segment_index = expected;
        st.global_end_offset = end;
        Ok(())
    }

    /// Seeds the next segment header and creates the first writable
    /// segment. Must follow `initialize` (and `replay`, when recovering).
    pub fn start_write_service(
        &self,
        init_max_decrees: BTreeMap<Gpid, Decree>,
        max_staleness_for_commit: i32,
    ) -> LogResult<()> {
        let mut st = self.shared.lock();
        let st = &mut *st;
        assert!(st.current.is_none(), "write service already started");
        st.init_prepared_decrees = init_max_decrees;
        st.max_staleness_for_commit = max_staleness_for_commit;
        self.shared.create_new_log_file(st)
    }

    /// Assigns the mutation's log offset, buffers its serialized form and
    /// registers `callback` for the flush completion.
    pub fn append(&self, mutation: &mut Mutation, callback: AppendCallback) -> LogResult<()> {
        let failed = {
            let mut st = self.shared.lock();
            let st = &mut *st;
            if st.current.is_none() {
                return Err(LogError::NotWritable);
            }

            let max = st
                .init_prepared_decrees
                .entry(mutation.header.gpid)
                .or_insert(mutation.header.decree);
            if *max < mutation.header.decree {
                *max = mutation.header.decree;
            }

            if st.pending.is_none() {
                self.shared.create_new_pending_buffer(st);
            }

            mutation.header.log_offset = st.global_end_offset;
            let pending = st.pending.as_mut().expect("pending buffer");
            let before = pending.buf.len();
            mutation.write_to(&mut pending.buf);
            st.global_end_offset += (pending.buf.len() - before) as i64;
            pending.callbacks.push(callback);
            let pending_len = pending.buf.len();

            if !self.shared.config.batch_write {
                self.shared.write_pending_mutations(st, true)
            } else if pending_len >= self.shared.config.log_buffer_size_bytes() {
                // the armed timer becomes stale once this buffer is gone
                self.shared.write_pending_mutations(st, true)
            } else {
                None
            }
        };
        if let Some(failed) = failed {
            failed.notify();
        }
        Ok(())
    }

    /// Streams every logged mutation back in append order.
    ///
    /// A corrupt entry at the tail of the last segment, within one flush
    /// window of the end, is partially written data from a crash: the log
    /// rewinds `global_end_offset`, truncates the file to the valid
    /// prefix, and still returns the error so the caller can note
    /// potential data loss. Corruption anywhere else is fatal.
    pub fn replay(&self, mut callback: impl FnMut(Mutation)) -> LogResult<()> {
        let mut st = self.shared.lock();
        let st = &mut *st;

        let mut offset = st.global_start_offset;
        let mut corrupt: Option<(i64, EntryCorruptKind)> = None;
        let mut tail_window = self.shared.config.log_buffer_size_bytes() as i64;
        let last_index = st.segments.keys().next_back().copied();

        'segments: for (index, segment) in st.segments.iter_mut() {
            if segment.start_offset() != offset {
                return Err(LogError::OffsetMismatch {
                    expected: offset,
                    got: segment.start_offset(),
                });
            }

            let mut first_entry = true;
            loop {
                match segment.read_next_entry()? {
                    EntryOutcome::Eof => break,
                    EntryOutcome::Corrupt(kind) => {
                        if Some(*index) != last_index {
                            return Err(fatal_corruption(offset, kind));
                        }
                        corrupt = Some((offset, kind));
                        break 'segments;
                    }
                    EntryOutcome::Entry(entry) => {
                        offset += ENTRY_HEADER_LEN as i64;
                        let mut cursor = Cursor::new(&entry.body);
                        if first_entry {
                            first_entry = false;
                            offset += segment.read_header(&mut cursor)? as i64;
                            if Some(*index) == last_index {
                                if let Some(header) = segment.header() {
                                    if header.log_buffer_size_bytes > 0 {
                                        tail_window = header.log_buffer_size_bytes as i64;
                                    }
                                }
                            }
                        }

                        while !cursor.is_eof() {
                            let before = cursor.remaining();
                            let Ok(mut mutation) = Mutation::read_from(&mut cursor) else {
                                return Err(LogError::InvalidData {
                                    offset,
                                    kind: EntryCorruptKind::TruncatedBody,
                                });
                            };
                            if mutation.header.log_offset != offset {
                                return Err(LogError::OffsetMismatch {
                                    expected: offset,
                                    got: mutation.header.log_offset,
                                });
                            }
                            mutation.set_logged();
                            let consumed = before - cursor.remaining();
                            callback(mutation);
                            offset += consumed as i64;
                        }
                    }
                }
            }
        }

        if let Some((corrupt_offset, kind)) = corrupt {
            if corrupt_offset + tail_window >= st.global_end_offset {
                let last = last_index.expect("corruption implies a segment");
                let segment = st.segments.get_mut(&last).expect("last segment");
                let keep = (corrupt_offset - segment.start_offset()) as u64;
                tracing::warn!(
                    segment = last,
                    offset = corrupt_offset,
                    "truncating corrupt log tail: {kind}"
                );
                segment.truncate_to(keep)?;
                st.global_end_offset = corrupt_offset;
                return Err(LogError::InvalidData {
                    offset: corrupt_offset,
                    kind,
                });
            }
            return Err(fatal_corruption(corrupt_offset, kind));
        }

        debug_assert_eq!(offset, st.global_end_offset);
        Ok(())
    }

    /// Removes every segment strictly older than the newest one whose
    /// initial prepared decrees are all durable. Returns the number of
    /// removed files. The current writable segment is never removed.
    pub fn garbage_collection(&self, durable_decrees: &BTreeMap<Gpid, Decree>) -> usize {
        let candidates: Vec<(u32, PathBuf, BTreeMap<Gpid, Decree>)> = {
            let st = self.shared.lock();
            st.segments
                .iter()
                .filter(|(index, _)| Some(**index) != st.current)
                .map(|(index, seg)| {
                    (
                        *index,
                        seg.path().to_path_buf(),
                        seg.init_prepared_decrees().clone(),
                    )
                })
                .collect()
        };

        let mut cutoff = None;
        for (index, _, inits) in candidates.iter().rev() {
            let all_durable = durable_decrees.iter().all(|(gpid, durable)| {
                match inits.get(gpid) {
                    // partition unknown to this segment: nothing to keep
                    None => true,
                    Some(init_prepared) => durable >= init_prepared,
                }
            });
            if all_durable {
                cutoff = Some(*index);
                break;
            }
        }
        let Some(cutoff) = cutoff else {
            return 0;
        };

        let mut removed = 0;
        for (index, path, _) in &candidates {
            if *index >= cutoff {
                continue;
            }
            {
                let mut st = self.shared.lock();
                if let Some(mut segment) = st.segments.remove(index) {
                    segment.close();
                }
            }
            match fs::remove_file(path) {
                Ok(()) => {
                    tracing::info!(segment = index, path = %path.display(), "removed log segment");
                    removed += 1;
                }
                Err(err) => {
                    tracing::warn!(segment = index, path = %path.display(), "segment removal failed: {err}");
                }
            }
        }
        removed
    }

    /// Flushes any pending buffer, drains in-flight writes and closes the
    /// segments. Idempotent; the log is no longer writable afterwards.
    pub fn close(&self) {
        let failed = {
            let mut st = self.shared.lock();
            let st = &mut *st;
            let failed = if st.pending.is_some() && st.current.is_some() {
                self.shared.write_pending_mutations(st, false)
            } else {
                None
            };
            st.current = None;
            for segment in st.segments.values_mut() {
                segment.close();
            }
            failed
        };
        if let Some(failed) = failed {
            failed.notify();
        }
    }

    /// Forgets a removed partition so future segment headers stop carrying
    /// its decree.
    pub fn on_partition_removed(&self, gpid: Gpid) {
        let mut st = self.shared.lock();
        st.init_prepared_decrees.remove(&gpid);
    }

    /// Drops all in-memory segment state.
    pub fn reset(&self) {
        let mut st = self.shared.lock();
        debug_assert!(st.pending.is_none());
        st.segments.clear();
        st.current = None;
        st.last_segment_index = 0;
        st.global_start_offset = 0;
        st.global_end_offset = 0;
    }

    pub fn start_offset(&self) -> i64 {
        self.shared.lock().global_start_offset
    }

    pub fn end_offset(&self) -> i64 {
        self.shared.lock().global_end_offset
    }

    pub fn max_staleness_for_commit(&self) -> i32 {
        self.shared.lock().max_staleness_for_commit
    }

    pub fn segments(&self) -> Vec<SegmentInfo> {
        self.shared
            .lock()
            .segments
            .values()
            .map(|seg| SegmentInfo {
                index: seg.index(),
                start_offset: seg.start_offset(),
                end_offset: seg.end_offset(),
                path: seg.path().to_path_buf(),
            })
            .collect()
    }

    #[cfg(test)]
    fn pending_bytes(&self) -> Option<usize> {
        self.shared.lock().pending.as_ref().map(|p| p.buf.len())
    }
}

impl Drop for MutationLog {
    fn drop(&mut self) {
        self.close();
        let _ = self.shared.writer_tx.send(WriterMsg::Shutdown);
        let _ = self.shared.timer_tx.send(TimerMsg::Shutdown);
        if let Some(handle) = self.writer.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.timer.take() {
            let _ = handle.join();
        }
    }
}

fn fatal_corruption(offset: i64, kind: EntryCorruptKind) -> LogError {
    match kind {
        EntryCorruptKind::BodyCrcMismatch => LogError::WrongChecksum { offset },
        _ => LogError::InvalidData { offset, kind },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use crossbeam::channel::{bounded, Receiver};
    use tempfile::TempDir;

    fn test_log(batch: bool) -> MutationLog {
        MutationLog::new(LogConfig {
            batch_write: batch,
            log_pending_max_ms: 50,
            ..LogConfig::default()
        })
    }

    fn mutation(decree: Decree, payload_len: usize) -> Mutation {
        Mutation::new(
            Gpid::new(1, 0),
            1,
            decree,
            Bytes::from(vec![0xAB; payload_len]),
        )
    }

    fn append(log: &MutationLog, mu: &mut Mutation) -> Receiver<Result<u32, LogError>> {
        let (tx, rx) = bounded(1);
        log.append(
            mu,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        )
        .unwrap();
        rx
    }

    fn wait_write(rx: &Receiver<Result<u32, LogError>>) -> u32 {
        rx.recv_timeout(Duration::from_secs(5))
            .expect("write completion")
            .expect("write ok")
    }

    #[test]
    fn non_batch_appends_flush_immediately() {
        let temp = TempDir::new().unwrap();
        let log = test_log(false);
        log.initialize(temp.path()).unwrap();
        log.start_write_service(BTreeMap::new(), 0).unwrap();

        let mut mu = mutation(1, 16);
        let rx = append(&log, &mut mu);
        wait_write(&rx);
        assert!(mu.header.log_offset > 0);
        assert!(log.pending_bytes().is_none());
        assert_eq!(
            log.end_offset(),
            mu.header.log_offset + mu.serialized_len() as i64
        );
    }

    #[test]
    fn batched_appends_flush_on_timer() {
        let temp = TempDir::new().unwrap();
        let log = test_log(true);
        log.initialize(temp.path()).unwrap();
        log.start_write_service(BTreeMap::new(), 0).unwrap();

        let mut mu = mutation(1, 16);
        let rx = append(&log, &mut mu);
        assert!(log.pending_bytes().is_some());
        wait_write(&rx);
        assert!(log.pending_bytes().is_none());
    }

    #[test]
    fn buffer_at_threshold_flushes_one_under_waits() {
        let temp = TempDir::new().unwrap();
        // pending deadline far away so only the size threshold can flush
        let log = MutationLog::new(LogConfig {
            batch_write: true,
            log_pending_max_ms: 60_000,
            ..LogConfig::default()
        });
        log.initialize(temp.path()).unwrap();
        log.start_write_service(BTreeMap::new(), 0).unwrap();

        let threshold = log.shared.config.log_buffer_size_bytes();
        let header_body = log.pending_bytes().unwrap() - ENTRY_HEADER_LEN;
        let overhead = ENTRY_HEADER_LEN + header_body + crate::core::MUTATION_FIXED_LEN;

        // one byte under the threshold: still pending
        let mut mu = mutation(1, threshold - 1 - overhead);
        let _rx = append(&log, &mut mu);
        assert_eq!(log.pending_bytes(), Some(threshold - 1));

        // pushing past the threshold flushes
        let mut mu2 = mutation(2, 0);
        let rx2 = append(&log, &mut mu2);
        wait_write(&rx2);
        assert!(log.pending_bytes().is_none());

        // a buffer landing exactly on the threshold flushes as well
        let temp2 = TempDir::new().unwrap();
        let log2 = MutationLog::new(LogConfig {
            batch_write: true,
            log_pending_max_ms: 60_000,
            ..LogConfig::default()
        });
        log2.initialize(temp2.path()).unwrap();
        log2.start_write_service(BTreeMap::new(), 0).unwrap();
        let mut mu3 = mutation(1, threshold - overhead);
        let rx3 = append(&log2, &mut mu3);
        wait_write(&rx3);
        assert!(log2.pending_bytes().is_none());
    }

    #[test]
    fn segment_at_rollover_threshold_rolls_over() {
        let temp = TempDir::new().unwrap();
        let log = MutationLog::new(LogConfig {
            batch_write: false,
            max_log_file_mb: 1,
            ..LogConfig::default()
        });
        log.initialize(temp.path()).unwrap();
        log.start_write_service(BTreeMap::new(), 0).unwrap();

        let header_body = log.pending_bytes().unwrap() - ENTRY_HEADER_LEN;
        let max_file = log.shared.config.max_log_file_bytes() as usize;

        // size the payload so the first flush lands exactly on the limit
        let payload =
            max_file - ENTRY_HEADER_LEN - header_body - crate::core::MUTATION_FIXED_LEN;
        let mut mu = mutation(1, payload);
        let rx = append(&log, &mut mu);
        wait_write(&rx);

        let segments = log.segments();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].end_offset, segments[1].start_offset);

        let mut mu2 = mutation(2, 8);
        let rx2 = append(&log, &mut mu2);
        wait_write(&rx2);
        assert!(mu2.header.log_offset >= segments[1].start_offset);
    }

    #[test]
    fn append_without_write_service_is_rejected() {
        let temp = TempDir::new().unwrap();
        let log = test_log(true);
        log.initialize(temp.path()).unwrap();

        let mut mu = mutation(1, 4);
        let err = log
            .append(&mut mu, Box::new(|_| panic!("no completion expected")))
            .unwrap_err();
        assert!(matches!(err, LogError::NotWritable));
    }

    #[test]
    fn initialize_rejects_gap_in_indices() {
        let temp = TempDir::new().unwrap();
        {
            let log = test_log(false);
            log.initialize(temp.path()).unwrap();
            log.start_write_service(BTreeMap::new(), 0).unwrap();
            let mut mu = mutation(1, 8);
            wait_write(&append(&log, &mut mu));
            log.close();
        }
        // fabricate a gap: index 3 without index 2
        let first = temp.path().join("log.1.0");
        let end = fs::metadata(&first).unwrap().len() as i64;
        fs::write(temp.path().join(format!("log.3.{end}")), b"").unwrap();

        let log = test_log(false);
        let err = log.initialize(temp.path()).unwrap_err();
        assert!(matches!(err, LogError::MissingSegment { index: 2 }));
    }

    #[test]
    fn close_flushes_pending() {
        let temp = TempDir::new().unwrap();
        let log = MutationLog::new(LogConfig {
            batch_write: true,
            log_pending_max_ms: 60_000,
            ..LogConfig::default()
        });
        log.initialize(temp.path()).unwrap();
        log.start_write_service(BTreeMap::new(), 0).unwrap();

        let mut mu = mutation(1, 16);
        let rx = append(&log, &mut mu);
        assert!(log.pending_bytes().is_some());
        log.close();
        wait_write(&rx);

        let mut err = log
            .append(&mut mutation(2, 4), Box::new(|_| {}))
            .unwrap_err();
        assert!(matches!(err, LogError::NotWritable));
        // idempotent
        log.close();
        err = log
            .append(&mut mutation(3, 4), Box::new(|_| {}))
            .unwrap_err();
        assert!(matches!(err, LogError::NotWritable));
    }
}
