//! End-to-end learning scenarios: checkpoint catch-up with live-prepare
//! attach, and signature invalidation of in-flight rounds.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;

use decree::core::{Decree, Gpid, Mutation, NodeId, PartitionConfig, ReplicaStatus};
use decree::learn::proto::{
    decode_completion_report, decode_learn_request, decode_learn_response,
    encode_completion_report, encode_learn_request, encode_learn_response, AddLearnerRequest,
    LearnCompletionReport, LearnRequest, LearnResponse, LearnState,
};
use decree::learn::{LearnError, LearningStatus, LocalCopier};
use decree::replica::{
    ExecutorHandle, LearnReplyCallback, LearnTransport, PartitionExecutor, Replica,
};
use decree::{AppError, ReplicaApp, ReplicationConfig};
use tempfile::TempDir;

const GPID: Gpid = Gpid {
    app_id: 1,
    partition_index: 0,
};

fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if cond() {
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
    panic!("timed out waiting for {what}");
}

struct MockApp {
    committed: Decree,
    durable: Decree,
    data_dir: PathBuf,
    learn_dir: PathBuf,
    checkpoint_files: Vec<String>,
}

impl MockApp {
    fn new(committed: Decree, dir: &Path) -> Self {
        let data_dir = dir.join("data");
        let learn_dir = dir.join("learn");
        fs::create_dir_all(&data_dir).unwrap();
        fs::create_dir_all(&learn_dir).unwrap();
        Self {
            committed,
            durable: committed,
            data_dir,
            learn_dir,
            checkpoint_files: Vec::new(),
        }
    }

    /// Gives the app a checkpoint file to serve to learners.
    fn with_checkpoint(mut self, name: &str, bytes: &[u8]) -> Self {
        let path = self.data_dir.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, bytes).unwrap();
        self.checkpoint_files
            .push(path.to_string_lossy().into_owned());
        self
    }
}

impl ReplicaApp for MockApp {
    fn last_committed_decree(&self) -> Decree {
        self.committed
    }

    fn last_durable_decree(&self) -> Decree {
        self.durable
    }

    fn commit(&mut self, mutation: &Mutation) {
        assert_eq!(mutation.header.decree, self.committed + 1);
        self.committed += 1;
    }

    fn get_learn_state(&self, _start_decree: Decree, _request: &[u8]) -> Result<LearnState, AppError> {
        Ok(LearnState {
            meta: Bytes::copy_from_slice(&self.committed.to_le_bytes()),
            files: self.checkpoint_files.clone(),
        })
    }

    fn apply_learn_state(&mut self, state: &LearnState) -> Result<(), AppError> {
        for file in &state.files {
            if !Path::new(file).is_file() {
                return Err(AppError::new(format!("missing staged file {file}")));
            }
        }
        if state.meta.len() == 8 {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&state.meta);
            self.committed = Decree::from_le_bytes(raw);
        }
        Ok(())
    }

    fn flush(&mut self, _force: bool) -> Result<(), AppError> {
        self.durable = self.committed;
        Ok(())
    }

    fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn learn_dir(&self) -> &Path {
        &self.learn_dir
    }
}

/// Routes learn RPCs between executors through the CBOR wire encoding.
struct LoopbackTransport {
    routes: Mutex<HashMap<NodeId, ExecutorHandle>>,
}

impl LoopbackTransport {
    fn new() -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
        }
    }

    fn register(&self, node: NodeId, handle: ExecutorHandle) {
        self.routes.lock().unwrap().insert(node, handle);
    }
}

impl LearnTransport for LoopbackTransport {
    fn call_learn(&self, primary: NodeId, request: LearnRequest, on_reply: LearnReplyCallback) {
        let Some(handle) = self.routes.lock().unwrap().get(&primary).cloned() else {
            on_reply(Err(LearnError::Rpc {
                reason: format!("no route to {primary}"),
            }));
            return;
        };
        let wire = encode_learn_request(&request).unwrap();
        let request = decode_learn_request(&wire).unwrap();
        handle.submit(
            request.gpid,
            Box::new(move |replica, ctx| {
                let response = replica.on_learn(&request, ctx);
                let wire = encode_learn_response(&response).unwrap();
                on_reply(decode_learn_response(&wire).map_err(LearnError::from));
            }),
        );
    }

    fn notify_learn_completion(&self, primary: NodeId, report: LearnCompletionReport) {
        let Some(handle) = self.routes.lock().unwrap().get(&primary).cloned() else {
            return;
        };
        let wire = encode_completion_report(&report).unwrap();
        let report = decode_completion_report(&wire).unwrap();
        handle.submit(
            report.gpid,
            Box::new(move |replica, _ctx| {
                replica.on_learn_completion_notification(report);
            }),
        );
    }
}

fn partition_config(ballot: i64, primary: NodeId, status: ReplicaStatus) -> PartitionConfig {
    PartitionConfig {
        gpid: GPID,
        ballot,
        primary: Some(primary),
        status,
    }
}

#[test]
fn learner_attaches_catches_up_and_succeeds() {
    let config = ReplicationConfig::default();
    let transport = Arc::new(LoopbackTransport::new());
    let copier = Arc::new(LocalCopier::new(&config));

    let primary_exec =
        PartitionExecutor::new(config.clone(), transport.clone(), copier.clone());
    let learner_exec =
        PartitionExecutor::new(config.clone(), transport.clone(), copier.clone());

    let primary_node: NodeId = "127.0.0.1:34801".parse().unwrap();
    let learner_node: NodeId = "127.0.0.1:34802".parse().unwrap();
    transport.register(primary_node, primary_exec.handle());
    transport.register(learner_node, learner_exec.handle());

    let primary_dir = TempDir::new().unwrap();
    let learner_dir = TempDir::new().unwrap();

    // primary committed through 500 with a served checkpoint
    let primary_app =
        MockApp::new(500, primary_dir.path()).with_checkpoint("checkpoint/ckpt.bin", &[0xCD; 4096]);
    let primary = Replica::new(
        primary_node,
        Box::new(primary_app),
        partition_config(1, primary_node, ReplicaStatus::Primary),
        &config,
    );
    primary_exec.add_replica(primary);
    primary_exec
        .handle()
        .with_replica(GPID, move |replica, _ctx| {
            replica.add_potential_secondary(learner_node, 7);
        })
        .unwrap();

    // learner is 5 decrees behind: within the staleness window of 10
    let learner_app = MockApp::new(495, learner_dir.path());
    let learn_dir = learner_app.learn_dir().to_path_buf();
    let learner = Replica::new(
        learner_node,
        Box::new(learner_app),
        partition_config(1, primary_node, ReplicaStatus::PotentialSecondary),
        &config,
    );
    learner_exec.add_replica(learner);
    learner_exec.handle().submit(
        GPID,
        Box::new(|replica, ctx| {
            replica.init_learn(7, ctx);
        }),
    );

    let learner_handle = learner_exec.handle();
    wait_until("learning to succeed", || {
        learner_handle
            .with_replica(GPID, |replica, _ctx| {
                replica
                    .learning_session()
                    .map(|s| s.status == LearningStatus::Succeeded)
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    });

    // the learner attached to live prepares at 501 and flushed through 500
    let (list_committed, app_committed, app_durable) = learner_handle
        .with_replica(GPID, |replica, _ctx| {
            (
                replica.last_committed_decree(),
                replica.app().last_committed_decree(),
                replica.app().last_durable_decree(),
            )
        })
        .unwrap();
    assert_eq!(list_committed, 500);
    assert_eq!(app_committed, 500);
    assert_eq!(app_durable, 500);

    // checkpoint files were staged under the learner's learn dir
    let staged = learn_dir.join("checkpoint/ckpt.bin");
    assert_eq!(fs::read(&staged).unwrap(), vec![0xCD; 4096]);

    // the completion notification upgraded the learner on the primary
    let primary_handle = primary_exec.handle();
    wait_until("primary to upgrade the learner", || {
        primary_handle
            .with_replica(GPID, move |replica, _ctx| {
                replica.primary_state().secondaries.contains(&learner_node)
                    && !replica.primary_state().learners.contains_key(&learner_node)
            })
            .unwrap_or(false)
    });
}

/// Transport that parks learn calls so the test can release replies in a
/// chosen order.
struct ManualTransport {
    calls: Mutex<Vec<(LearnRequest, Option<LearnReplyCallback>)>>,
    notifications: Mutex<Vec<LearnCompletionReport>>,
}

impl ManualTransport {
    fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            notifications: Mutex::new(Vec::new()),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn release(&self, index: usize, prepare_start_decree: Option<Decree>) {
        let (request, callback) = {
            let mut calls = self.calls.lock().unwrap();
            let entry = &mut calls[index];
            (entry.0.clone(), entry.1.take().expect("reply already released"))
        };
        let response = decode_learn_response(
            &encode_learn_response(&LearnResponse {
                error: None,
                config: PartitionConfig {
                    gpid: request.gpid,
                    ballot: 1,
                    primary: Some("127.0.0.1:34801".parse().unwrap()),
                    status: ReplicaStatus::PotentialSecondary,
                },
                prepare_start_decree,
                commit_decree: 0,
                state: LearnState::default(),
                base_local_dir: String::new(),
            })
            .unwrap(),
        )
        .unwrap();
        callback(Ok(response));
    }
}

impl LearnTransport for ManualTransport {
    fn call_learn(&self, _primary: NodeId, request: LearnRequest, on_reply: LearnReplyCallback) {
        self.calls.lock().unwrap().push((request, Some(on_reply)));
    }

    fn notify_learn_completion(&self, _primary: NodeId, report: LearnCompletionReport) {
        self.notifications.lock().unwrap().push(report);
    }
}

#[test]
fn new_signature_invalidates_in_flight_round() {
    let config = ReplicationConfig::default();
    let transport = Arc::new(ManualTransport::new());
    let copier = Arc::new(LocalCopier::new(&config));
    let executor = PartitionExecutor::new(config.clone(), transport.clone(), copier);

    let primary_node: NodeId = "127.0.0.1:34801".parse().unwrap();
    let learner_node: NodeId = "127.0.0.1:34802".parse().unwrap();
    let dir = TempDir::new().unwrap();

    let replica = Replica::new(
        learner_node,
        Box::new(MockApp::new(0, dir.path())),
        partition_config(1, primary_node, ReplicaStatus::PotentialSecondary),
        &config,
    );
    executor.add_replica(replica);
    let handle = executor.handle();

    // round in flight for signature 1
    handle.submit(
        GPID,
        Box::new(|replica, ctx| {
            replica.init_learn(1, ctx);
        }),
    );
    wait_until("first learn call", || transport.call_count() == 1);

    // a new signature arrives while the round is still running
    handle.submit(
        GPID,
        Box::new(move |replica, ctx| {
            replica.on_add_learner(
                AddLearnerRequest {
                    config: partition_config(
                        1,
                        primary_node,
                        ReplicaStatus::PotentialSecondary,
                    ),
                    learner_signature: 2,
                },
                ctx,
            );
        }),
    );
    wait_until("second learn call for the new signature", || {
        transport.call_count() == 2
    });

    // the stale reply for signature 1 is discarded on arrival
    transport.release(0, Some(1));
    thread::sleep(Duration::from_millis(50));
    let (signature, status, round_running) = handle
        .with_replica(GPID, |replica, _ctx| {
            let session = replica.learning_session().unwrap();
            (session.signature, session.status, session.round_running)
        })
        .unwrap();
    assert_eq!(signature, 2);
    assert_eq!(status, LearningStatus::WithoutPrepare);
    assert!(round_running, "fresh round must still be in flight");

    // the live reply for signature 2 drives the session to success
    transport.release(1, Some(1));
    wait_until("second round to succeed", || {
        handle
            .with_replica(GPID, |replica, _ctx| {
                replica
                    .learning_session()
                    .map(|s| s.status == LearningStatus::Succeeded)
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    });

    let reports = transport.notifications.lock().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].learner_signature, 2);
    assert_eq!(reports[0].status, LearningStatus::Succeeded);
}
