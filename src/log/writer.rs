//! Writer and flush-timer threads for the mutation log.
//!
//! One writer thread performs every segment write, so completion callbacks
//! fire in issue order. The timer thread turns `log_pending_max_ms` into
//! flush attempts matched against the live pending buffer's entry id.

use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam::channel::Receiver;

use crate::sync::Permit;

use super::LogError;

/// Completion of one `append`: bytes written or the write error.
pub type AppendCallback = Box<dyn FnOnce(Result<u32, LogError>) + Send>;

pub(crate) enum WriterMsg {
    Flush(FlushJob),
    Shutdown,
}

pub(crate) struct FlushJob {
    pub segment_index: u32,
    pub file: Arc<File>,
    pub rel_offset: u64,
    pub buf: Vec<u8>,
    pub callbacks: Vec<AppendCallback>,
    pub permit: Permit,
    pub broken: Arc<std::sync::atomic::AtomicBool>,
}

pub(crate) fn spawn_writer(rx: Receiver<WriterMsg>) -> JoinHandle<()> {
    thread::Builder::new()
        .name("mutation-log-writer".to_string())
        .spawn(move || {
            while let Ok(msg) = rx.recv() {
                match msg {
                    WriterMsg::Flush(job) => run_flush(job),
                    WriterMsg::Shutdown => break,
                }
            }
        })
        .expect("spawn mutation log writer")
}

fn run_flush(job: FlushJob) {
    let result = write_buffer(&job.file, job.rel_offset, &job.buf);
    // Release the write slot before callbacks run: a callback may append
    // again and must not deadlock against its own flush.
    drop(job.permit);

    match result {
        Ok(()) => {
            let len = job.buf.len() as u32;
            for callback in job.callbacks {
                callback(Ok(len));
            }
        }
        Err(err) => {
            job.broken.store(true, Ordering::Release);
            tracing::error!(
                segment = job.segment_index,
                offset = job.rel_offset,
                "segment write failed: {err}"
            );
            let kind = err.kind();
            for callback in job.callbacks {
                callback(Err(LogError::WriteFailed {
                    index: job.segment_index,
                    kind,
                }));
            }
        }
    }
}

fn write_buffer(file: &File, rel_offset: u64, buf: &[u8]) -> io::Result<()> {
    file.write_all_at(buf, rel_offset)?;
    file.sync_data()
}

pub(crate) enum TimerMsg {
    Arm { entry_id: u64, deadline: Instant },
    Shutdown,
}

pub(crate) fn spawn_timer(
    rx: Receiver<TimerMsg>,
    on_fire: impl Fn(u64) + Send + 'static,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name("mutation-log-timer".to_string())
        .spawn(move || {
            while let Ok(msg) = rx.recv() {
                match msg {
                    TimerMsg::Arm { entry_id, deadline } => {
                        let now = Instant::now();
                        if deadline > now {
                            thread::sleep(deadline - now);
                        }
                        on_fire(entry_id);
                    }
                    TimerMsg::Shutdown => break,
                }
            }
        })
        .expect("spawn mutation log timer")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::unbounded;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::sync::Semaphore;
    use tempfile::TempDir;

    #[test]
    fn flush_writes_and_notifies_in_order() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("log.1.0");
        let file = Arc::new(
            std::fs::OpenOptions::new()
                .read(true)
                .write(true)
                .create_new(true)
                .open(&path)
                .unwrap(),
        );

        let (tx, rx) = unbounded();
        let handle = spawn_writer(rx);
        let sem = Semaphore::new(2);
        let order: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));

        for (i, payload) in [b"aaaa".to_vec(), b"bbbb".to_vec()].into_iter().enumerate() {
            let order = Arc::clone(&order);
            let tag = i as u32;
            tx.send(WriterMsg::Flush(FlushJob {
                segment_index: 1,
                file: Arc::clone(&file),
                rel_offset: (i * 4) as u64,
                buf: payload,
                callbacks: vec![Box::new(move |result| {
                    assert_eq!(result.unwrap(), 4);
                    order.lock().unwrap().push(tag);
                })],
                permit: sem.acquire(),
                broken: Arc::new(AtomicBool::new(false)),
            }))
            .unwrap();
        }
        tx.send(WriterMsg::Shutdown).unwrap();
        handle.join().unwrap();

        assert_eq!(*order.lock().unwrap(), vec![0, 1]);
        assert_eq!(std::fs::read(&path).unwrap(), b"aaaabbbb");
        sem.wait_idle();
    }

    #[test]
    fn timer_fires_after_deadline() {
        let (tx, rx) = unbounded();
        let fired: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&fired);
        let handle = spawn_timer(rx, move |id| sink.lock().unwrap().push(id));

        tx.send(TimerMsg::Arm {
            entry_id: 5,
            deadline: Instant::now() + Duration::from_millis(10),
        })
        .unwrap();
        tx.send(TimerMsg::Shutdown).unwrap();
        handle.join().unwrap();

        assert_eq!(*fired.lock().unwrap(), vec![5]);
    }
}
