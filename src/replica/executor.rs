//! Hash-pinned partition executor.
//!
//! Every replica is owned by exactly one worker thread, chosen by gpid
//! hash; all handlers for a partition run on that worker, so
//! same-partition handlers cannot race by construction.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{bounded, unbounded, Receiver, Sender};

use crate::core::Gpid;

use super::{Replica, ReplicaCtx};

pub type ReplicaTask = Box<dyn FnOnce(&mut Replica, &ReplicaCtx) + Send>;

enum WorkerMsg {
    Add(Box<Replica>),
    Run(Gpid, ReplicaTask),
    Shutdown,
}

thread_local! {
    static WORKER_INDEX: std::cell::Cell<Option<usize>> = const { std::cell::Cell::new(None) };
}

/// Index of the executor worker running the current thread, if any.
pub(crate) fn current_worker() -> Option<usize> {
    WORKER_INDEX.with(|cell| cell.get())
}

/// Cheap handle for submitting tasks into the executor.
#[derive(Clone)]
pub struct ExecutorHandle {
    txs: Arc<Vec<Sender<WorkerMsg>>>,
}

impl ExecutorHandle {
    fn worker_for(&self, gpid: Gpid) -> usize {
        let mut hasher = DefaultHasher::new();
        gpid.hash(&mut hasher);
        (hasher.finish() % self.txs.len() as u64) as usize
    }

    /// Enqueues a task on the partition's worker. Returns false when the
    /// executor has shut down.
    pub fn submit(&self, gpid: Gpid, task: ReplicaTask) -> bool {
        let index = self.worker_for(gpid);
        self.txs[index].send(WorkerMsg::Run(gpid, task)).is_ok()
    }

    /// Runs a closure against the replica on its worker and waits for the
    /// result; `None` when the replica does not exist or the executor has
    /// shut down.
    pub fn with_replica<T, F>(&self, gpid: Gpid, f: F) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Replica, &ReplicaCtx) -> T + Send + 'static,
    {
        let (tx, rx) = bounded(1);
        let submitted = self.submit(
            gpid,
            Box::new(move |replica, ctx| {
                let _ = tx.send(f(replica, ctx));
            }),
        );
        if !submitted {
            return None;
        }
        rx.recv().ok()
    }
}

/// Owns the worker threads and the replicas arena'd inside them.
pub struct PartitionExecutor {
    handle: ExecutorHandle,
    workers: Vec<JoinHandle<()>>,
}

impl PartitionExecutor {
    pub fn new(
        config: crate::config::ReplicationConfig,
        transport: Arc<dyn super::LearnTransport>,
        copier: Arc<dyn crate::learn::RemoteFileCopier>,
    ) -> Self {
        let threads = config.executor_threads.max(1);
        let mut txs = Vec::with_capacity(threads);
        let mut rxs: Vec<Receiver<WorkerMsg>> = Vec::with_capacity(threads);
        for _ in 0..threads {
            let (tx, rx) = unbounded();
            txs.push(tx);
            rxs.push(rx);
        }
        let handle = ExecutorHandle { txs: Arc::new(txs) };
        let ctx = Arc::new(ReplicaCtx {
            executor: handle.clone(),
            transport,
            copier,
            config,
        });

        let workers = rxs
            .into_iter()
            .enumerate()
            .map(|(index, rx)| {
                let ctx = Arc::clone(&ctx);
                thread::Builder::new()
                    .name(format!("partition-worker-{index}"))
                    .spawn(move || run_worker(index, rx, &ctx))
                    .expect("spawn partition worker")
            })
            .collect();

        Self { handle, workers }
    }

    pub fn handle(&self) -> ExecutorHandle {
        self.handle.clone()
    }

    /// Hands a replica to its worker. Tasks submitted for its gpid run
    /// afterwards in submission order.
    pub fn add_replica(&self, replica: Replica) {
        let gpid = replica.gpid();
        let index = self.handle.worker_for(gpid);
        let _ = self.handle.txs[index].send(WorkerMsg::Add(Box::new(replica)));
    }
}

impl Drop for PartitionExecutor {
    fn drop(&mut self) {
        for tx in self.handle.txs.iter() {
            let _ = tx.send(WorkerMsg::Shutdown);
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn run_worker(index: usize, rx: Receiver<WorkerMsg>, ctx: &ReplicaCtx) {
    WORKER_INDEX.with(|cell| cell.set(Some(index)));
    let mut replicas: HashMap<Gpid, Box<Replica>> = HashMap::new();

    while let Ok(msg) = rx.recv() {
        match msg {
            WorkerMsg::Add(mut replica) => {
                replica.pinned_worker = Some(index);
                let gpid = replica.gpid();
                if replicas.insert(gpid, replica).is_some() {
                    tracing::warn!(replica = %gpid, "replaced existing replica in executor");
                }
            }
            WorkerMsg::Run(gpid, task) => match replicas.get_mut(&gpid) {
                Some(replica) => task(replica, ctx),
                None => {
                    tracing::warn!(replica = %gpid, "dropping task for unknown replica");
                }
            },
            WorkerMsg::Shutdown => break,
        }
    }
}
