//! Checkpoint file staging.
//!
//! The replication core only ever asks for "copy these checkpoint files
//! under the learner's staging directory and tell me when you are done";
//! the transfer mechanism is pluggable. `LocalCopier` is the same-host
//! implementation: a bounded worker pool copying block-wise with a shared
//! cap on concurrent local writes.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{unbounded, Sender};
use thiserror::Error;

use crate::config::ReplicationConfig;
use crate::core::NodeId;
use crate::sync::Semaphore;

/// Cooperative cancellation for one copy request. The requester keeps a
/// clone and cancels it when the transfer's result can no longer be used;
/// the copier checks it between blocks and gives up early.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    canceled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }
}

#[derive(Debug, Error)]
pub enum CopyError {
    #[error("io error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("source file missing: {path:?}")]
    SourceMissing { path: PathBuf },
    #[error("destination exists and overwrite is off: {path:?}")]
    DestinationExists { path: PathBuf },
    #[error("copy canceled")]
    Canceled,
}

pub type CopyCallback = Box<dyn FnOnce(Result<u64, CopyError>) + Send>;

/// Stages a set of dir-relative files from a source node under a local
/// destination directory. Completion is reported exactly once; a canceled
/// request completes with `CopyError::Canceled` without finishing the
/// transfer.
pub trait RemoteFileCopier: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    fn copy_remote_files(
        &self,
        source: NodeId,
        source_dir: PathBuf,
        files: Vec<String>,
        dest_dir: PathBuf,
        overwrite: bool,
        cancel: CancelToken,
        on_done: CopyCallback,
    );
}

struct CopyRequest {
    source_dir: PathBuf,
    files: Vec<String>,
    dest_dir: PathBuf,
    overwrite: bool,
    cancel: CancelToken,
    on_done: CopyCallback,
}

enum CopierMsg {
    Copy(CopyRequest),
    Shutdown,
}

/// Same-host copier: the "remote" directory is reachable through the
/// local filesystem, as it is in tests and single-box deployments.
pub struct LocalCopier {
    tx: Sender<CopierMsg>,
    workers: Vec<JoinHandle<()>>,
}

impl LocalCopier {
    pub fn new(config: &ReplicationConfig) -> Self {
        let (tx, rx) = unbounded::<CopierMsg>();
        let write_permits = Semaphore::new(config.max_concurrent_local_writes);
        let block_bytes = config.nfs_copy_block_bytes.max(4096);

        let mut workers = Vec::new();
        for i in 0..config.max_concurrent_remote_copy_requests.max(1) {
            let rx = rx.clone();
            let permits = Arc::clone(&write_permits);
            let worker = thread::Builder::new()
                .name(format!("copy-worker-{i}"))
                .spawn(move || {
                    while let Ok(msg) = rx.recv() {
                        match msg {
                            CopierMsg::Copy(request) => run_copy(request, &permits, block_bytes),
                            CopierMsg::Shutdown => break,
                        }
                    }
                })
                .expect("spawn copy worker");
            workers.push(worker);
        }

        Self { tx, workers }
    }
}

impl RemoteFileCopier for LocalCopier {
    fn copy_remote_files(
        &self,
        _source: NodeId,
        source_dir: PathBuf,
        files: Vec<String>,
        dest_dir: PathBuf,
        overwrite: bool,
        cancel: CancelToken,
        on_done: CopyCallback,
    ) {
        let request = CopyRequest {
            source_dir,
            files,
            dest_dir,
            overwrite,
            cancel,
            on_done,
        };
        if let Err(err) = self.tx.send(CopierMsg::Copy(request)) {
            let CopierMsg::Copy(request) = err.0 else {
                unreachable!()
            };
            (request.on_done)(Err(CopyError::Canceled));
        }
    }
}

impl Drop for LocalCopier {
    fn drop(&mut self) {
        for _ in &self.workers {
            let _ = self.tx.send(CopierMsg::Shutdown);
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn run_copy(request: CopyRequest, permits: &Arc<Semaphore>, block_bytes: usize) {
    let mut total = 0u64;
    let mut outcome = Ok(());
    for file in &request.files {
        if request.cancel.is_canceled() {
            outcome = Err(CopyError::Canceled);
            break;
        }
        let src = request.source_dir.join(file);
        let dst = request.dest_dir.join(file);
        match copy_one_file(
            &src,
            &dst,
            request.overwrite,
            &request.cancel,
            permits,
            block_bytes,
        ) {
            Ok(bytes) => total += bytes,
            Err(CopyError::Canceled) => {
                tracing::debug!(file = %file, "checkpoint copy canceled");
                outcome = Err(CopyError::Canceled);
                break;
            }
            Err(err) => {
                tracing::error!(file = %file, "checkpoint copy failed: {err}");
                outcome = Err(err);
                break;
            }
        }
    }
    (request.on_done)(outcome.map(|()| total));
}

fn copy_one_file(
    src: &Path,
    dst: &Path,
    overwrite: bool,
    cancel: &CancelToken,
    permits: &Arc<Semaphore>,
    block_bytes: usize,
) -> Result<u64, CopyError> {
    let mut reader = match File::open(src) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(CopyError::SourceMissing {
                path: src.to_path_buf(),
            });
        }
        Err(source) => {
            return Err(CopyError::Io {
                path: src.to_path_buf(),
                source,
            });
        }
    };

    if !overwrite && dst.exists() {
        return Err(CopyError::DestinationExists {
            path: dst.to_path_buf(),
        });
    }
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).map_err(|source| CopyError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let mut writer = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(dst)
        .map_err(|source| CopyError::Io {
            path: dst.to_path_buf(),
            source,
        })?;

    let mut block = vec![0u8; block_bytes];
    let mut copied = 0u64;
    loop {
        if cancel.is_canceled() {
            return Err(CopyError::Canceled);
        }
        let read = reader.read(&mut block).map_err(|source| CopyError::Io {
            path: src.to_path_buf(),
            source,
        })?;
        if read == 0 {
            break;
        }
        // each block write holds one local-write permit, so a burst of
        // copy requests cannot saturate the disk
        let _permit = permits.acquire();
        writer
            .write_all(&block[..read])
            .map_err(|source| CopyError::Io {
                path: dst.to_path_buf(),
                source,
            })?;
        copied += read as u64;
    }
    writer.sync_all().map_err(|source| CopyError::Io {
        path: dst.to_path_buf(),
        source,
    })?;
    Ok(copied)
}
