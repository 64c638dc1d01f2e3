//! Replica coordinator: role state, the prepare list and the learning
//! protocol, serialized per partition by the executor.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;

use crate::config::ReplicationConfig;
use crate::core::{Decree, Gpid, Mutation, NodeId, PartitionConfig, ReplicaStatus};
use crate::learn::proto::{
    AddLearnerRequest, LearnCompletionReport, LearnRequest, LearnResponse, LearnRpcError,
    LearnState,
};
use crate::learn::{
    CancelToken, CopyError, LearnError, LearningSession, LearningStatus, RemoteFileCopier,
};
use crate::prepare::{PrepareError, PrepareList};

mod executor;

pub use executor::{ExecutorHandle, PartitionExecutor, ReplicaTask};

/// Failure reported by the partition application.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct AppError(pub String);

impl AppError {
    pub fn new(reason: impl fmt::Display) -> Self {
        Self(reason.to_string())
    }
}

/// The per-partition application state machine, as seen by the
/// replication core.
pub trait ReplicaApp: Send {
    fn last_committed_decree(&self) -> Decree;
    fn last_durable_decree(&self) -> Decree;
    fn commit(&mut self, mutation: &Mutation);
    /// Opaque payload forwarded to the primary's `get_learn_state`.
    fn prepare_learning_request(&self) -> Bytes {
        Bytes::new()
    }
    fn get_learn_state(&self, start_decree: Decree, request: &[u8])
        -> Result<LearnState, AppError>;
    fn apply_learn_state(&mut self, state: &LearnState) -> Result<(), AppError>;
    fn flush(&mut self, force: bool) -> Result<(), AppError>;
    fn data_dir(&self) -> &Path;
    fn learn_dir(&self) -> &Path;
}

pub type LearnReplyCallback = Box<dyn FnOnce(Result<LearnResponse, LearnError>) + Send>;

/// RPC surface the learning protocol needs from the transport.
pub trait LearnTransport: Send + Sync {
    fn call_learn(&self, primary: NodeId, request: LearnRequest, on_reply: LearnReplyCallback);
    fn notify_learn_completion(&self, primary: NodeId, report: LearnCompletionReport);
}

/// Shared collaborators handed to every replica handler.
pub struct ReplicaCtx {
    pub executor: ExecutorHandle,
    pub transport: Arc<dyn LearnTransport>,
    pub copier: Arc<dyn RemoteFileCopier>,
    pub config: ReplicationConfig,
}

/// Primary's record for one learner; `prepare_start_decree` stays unset
/// until the learner attaches to live prepares.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LearnerRecord {
    pub signature: u64,
    pub prepare_start_decree: Option<Decree>,
}

#[derive(Default)]
pub struct PrimaryState {
    pub secondaries: Vec<NodeId>,
    pub learners: BTreeMap<NodeId, LearnerRecord>,
}

/// One replica of one partition. All mutation goes through its pinned
/// executor worker.
pub struct Replica {
    node: NodeId,
    config: PartitionConfig,
    app: Box<dyn ReplicaApp>,
    prepare_list: PrepareList,
    learner: Option<LearningSession>,
    primary_state: PrimaryState,
    pub(crate) pinned_worker: Option<usize>,
}

impl Replica {
    pub fn new(
        node: NodeId,
        app: Box<dyn ReplicaApp>,
        config: PartitionConfig,
        options: &ReplicationConfig,
    ) -> Self {
        let prepare_list = PrepareList::new(
            app.last_committed_decree(),
            options.prepare_list_max_count,
            options.allow_prepare_ack_before_logging,
        );
        Self {
            node,
            config,
            app,
            prepare_list,
            learner: None,
            primary_state: PrimaryState::default(),
            pinned_worker: None,
        }
    }

    pub fn gpid(&self) -> Gpid {
        self.config.gpid
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn status(&self) -> ReplicaStatus {
        self.config.status
    }

    pub fn ballot(&self) -> crate::core::Ballot {
        self.config.ballot
    }

    pub fn last_committed_decree(&self) -> Decree {
        self.prepare_list.last_committed_decree()
    }

    pub fn app(&self) -> &dyn ReplicaApp {
        self.app.as_ref()
    }

    pub fn prepare_list(&self) -> &PrepareList {
        &self.prepare_list
    }

    pub fn learning_session(&self) -> Option<&LearningSession> {
        self.learner.as_ref()
    }

    pub fn primary_state(&self) -> &PrimaryState {
        &self.primary_state
    }

    /// Handlers must run on the worker that owns this replica.
    pub fn check_access(&self) {
        debug_assert!(
            self.pinned_worker.is_none() || executor::current_worker() == self.pinned_worker,
            "replica {} accessed off its pinned worker",
            self.config.gpid
        );
    }

    /// Stores a prepared mutation in the window.
    pub fn on_prepare(&mut self, mutation: Mutation) -> Result<(), PrepareError> {
        self.check_access();
        self.prepare_list.prepare(mutation, self.status())
    }

    /// Commits through `decree`, applying each mutation to the app.
    pub fn commit_through(&mut self, decree: Decree, force: bool) -> bool {
        self.check_access();
        let Replica {
            prepare_list, app, ..
        } = self;
        prepare_list.commit(decree, force, &mut |mutation| app.commit(&mutation))
    }

    /// Registers a learner on the primary; learning starts when the
    /// learner's own `init_learn` round arrives.
    pub fn add_potential_secondary(&mut self, node: NodeId, signature: u64) {
        self.check_access();
        debug_assert_eq!(self.status(), ReplicaStatus::Primary);
        self.primary_state.learners.insert(
            node,
            LearnerRecord {
                signature,
                prepare_start_decree: None,
            },
        );
        tracing::info!(replica = %self.config.gpid, %node, signature, "registered learner");
    }

    /// Adopts a configuration with an equal or newer ballot.
    pub fn update_local_configuration(&mut self, config: PartitionConfig) {
        debug_assert_eq!(config.gpid, self.config.gpid);
        debug_assert!(config.ballot >= self.config.ballot);
        let old_status = self.status();
        self.config = config;
        if old_status != self.status() {
            tracing::info!(
                replica = %self.config.gpid,
                ballot = self.config.ballot,
                from = %old_status,
                to = %self.status(),
                "replica status changed"
            );
        }
        match self.status() {
            // leaving the learning path tears the session down, canceling
            // any checkpoint transfer still in flight; Error keeps it so a
            // re-added learner with the same signature retries
            ReplicaStatus::Primary | ReplicaStatus::Secondary | ReplicaStatus::Inactive => {
                if let Some(mut session) = self.learner.take() {
                    session.cancel_tasks();
                }
            }
            ReplicaStatus::PotentialSecondary | ReplicaStatus::Error => {}
        }
    }

    pub fn update_local_configuration_with_no_ballot_change(&mut self, status: ReplicaStatus) {
        let old_status = self.status();
        self.config.status = status;
        if old_status != status {
            tracing::info!(
                replica = %self.config.gpid,
                ballot = self.config.ballot,
                from = %old_status,
                to = %status,
                "replica status changed"
            );
        }
    }

    // ------------------------------------------------------------------
    // learner side
    // ------------------------------------------------------------------

    /// Drives one learning round for `signature`. Re-entrant: called by
    /// `on_add_learner` and again after each completed round.
    pub fn init_learn(&mut self, signature: u64, ctx: &ReplicaCtx) {
        self.check_access();
        if self.status() != ReplicaStatus::PotentialSecondary {
            tracing::warn!(
                replica = %self.config.gpid,
                status = %self.status(),
                "init_learn outside potential-secondary; ignored"
            );
            return;
        }
        if self.learner.is_none() {
            self.learner = Some(LearningSession::new(0));
        }

        {
            let session = self.learner.as_ref().expect("session");
            if session.round_running || signature == 0 {
                return;
            }
        }

        if signature != self.learner.as_ref().expect("session").signature {
            // a fresh signature restarts the whole session
            if let Some(mut old) = self.learner.take() {
                old.cancel_tasks();
            }
            self.learner = Some(LearningSession::new(signature));
            let init_decree = self.app.last_committed_decree();
            self.prepare_list.reset(init_decree);
        } else {
            match self.learner.as_ref().expect("session").status {
                LearningStatus::Succeeded => {
                    self.notify_learn_completion(ctx);
                    return;
                }
                LearningStatus::Failed => {}
                LearningStatus::WithPrepare => {
                    if self.app.last_durable_decree() >= self.last_committed_decree() {
                        self.learner.as_mut().expect("session").status =
                            LearningStatus::Succeeded;
                        self.notify_learn_completion(ctx);
                        return;
                    }
                }
                LearningStatus::WithoutPrepare => {}
            }
        }

        let request = LearnRequest {
            gpid: self.config.gpid,
            last_committed_decree_in_app: self.app.last_committed_decree(),
            last_committed_decree_in_prepare_list: self.last_committed_decree(),
            learner: self.node,
            signature,
            app_specific_request: self.app.prepare_learning_request(),
        };
        let Some(primary) = self.config.primary else {
            self.handle_learning_error(LearnError::Rpc {
                reason: "no primary in configuration".to_string(),
            });
            return;
        };

        let session = self.learner.as_mut().expect("session");
        session.round_running = true;
        tracing::debug!(
            replica = %self.config.gpid,
            signature,
            app_committed = request.last_committed_decree_in_app,
            app_durable = self.app.last_durable_decree(),
            list_committed = request.last_committed_decree_in_prepare_list,
            status = %session.status,
            "starting learn round"
        );

        let gpid = self.config.gpid;
        let executor = ctx.executor.clone();
        let reply_request = request.clone();
        ctx.transport.call_learn(
            primary,
            request,
            Box::new(move |result| {
                let delivered = executor.submit(
                    gpid,
                    Box::new(move |replica, ctx| {
                        replica.on_learn_reply(result, reply_request, ctx);
                    }),
                );
                if !delivered {
                    tracing::warn!(replica = %gpid, "learn reply dropped; executor gone");
                }
            }),
        );
    }

    pub fn on_learn_reply(
        &mut self,
        result: Result<LearnResponse, LearnError>,
        request: LearnRequest,
        ctx: &ReplicaCtx,
    ) {
        self.check_access();
        if self.status() != ReplicaStatus::PotentialSecondary {
            return;
        }
        let Some(session) = self.learner.as_ref() else {
            return;
        };
        if session.signature != request.signature {
            tracing::debug!(
                replica = %self.config.gpid,
                stale = request.signature,
                current = session.signature,
                "discarding learn reply for stale signature"
            );
            return;
        }

        let response = match result {
            Ok(response) => response,
            Err(err) => {
                self.handle_learning_error(err);
                return;
            }
        };
        if let Some(code) = response.error {
            self.handle_learning_error(code.into());
            return;
        }

        tracing::debug!(
            replica = %self.config.gpid,
            prepare_start = ?response.prepare_start_decree,
            commit_decree = response.commit_decree,
            files = response.state.files.len(),
            "learn reply received"
        );

        if response.config.ballot > self.ballot() {
            self.update_local_configuration(response.config.clone());
        }
        if self.status() != ReplicaStatus::PotentialSecondary {
            // the new configuration moved us off the learning path
            return;
        }

        if let Some(prepare_start) = response.prepare_start_decree {
            let session = self.learner.as_mut().expect("session");
            if session.status == LearningStatus::WithoutPrepare {
                session.status = LearningStatus::WithPrepare;
                self.prepare_list.reset(prepare_start - 1);
            }
        }

        let signature = request.signature;
        let gpid = self.config.gpid;
        let executor = ctx.executor.clone();
        if response.state.files.is_empty() {
            let delivered = executor.submit(
                gpid,
                Box::new(move |replica, ctx| {
                    replica.on_copy_remote_state_completed(signature, Ok(0), response, ctx);
                }),
            );
            if !delivered {
                tracing::warn!(replica = %gpid, "learn completion dropped; executor gone");
            }
            return;
        }

        let Some(source) = response.config.primary else {
            self.handle_learning_error(LearnError::Rpc {
                reason: "learn response has no primary address".to_string(),
            });
            return;
        };
        // a checkpoint path that is absolute or climbs out of the staging
        // directory must never reach the copier
        if let Some(bad) = response
            .state
            .files
            .iter()
            .find(|file| !is_safe_relative(Path::new(file.as_str())))
        {
            self.handle_learning_error(LearnError::GetLearnStateFailed {
                reason: format!("checkpoint path {bad:?} escapes the staging directory"),
            });
            return;
        }
        let source_dir = PathBuf::from(&response.base_local_dir);
        let files = response.state.files.clone();
        let dest_dir = self.app.learn_dir().to_path_buf();
        let cancel = CancelToken::new();
        self.learner
            .as_mut()
            .expect("session")
            .track_remote_files_task(cancel.clone());
        ctx.copier.copy_remote_files(
            source,
            source_dir,
            files,
            dest_dir,
            true,
            cancel,
            Box::new(move |copy_result| {
                let delivered = executor.submit(
                    gpid,
                    Box::new(move |replica, ctx| {
                        replica.on_copy_remote_state_completed(
                            signature,
                            copy_result,
                            response,
                            ctx,
                        );
                    }),
                );
                if !delivered {
                    tracing::warn!(replica = %gpid, "copy completion dropped; executor gone");
                }
            }),
        );
    }

    pub fn on_copy_remote_state_completed(
        &mut self,
        signature: u64,
        copy_result: Result<u64, CopyError>,
        response: LearnResponse,
        ctx: &ReplicaCtx,
    ) {
        self.check_access();
        if self.status() != ReplicaStatus::PotentialSecondary {
            return;
        }
        if self.learner.as_ref().map(|s| s.signature) != Some(signature) {
            return;
        }
        self.learner
            .as_mut()
            .expect("session")
            .clear_remote_files_task();

        let outcome = match copy_result {
            Ok(_bytes) => self.stage_and_apply(&response),
            Err(err) => {
                tracing::error!(
                    replica = %self.config.gpid,
                    files = response.state.files.len(),
                    "checkpoint transfer failed: {err}"
                );
                Err(LearnError::Copy(err))
            }
        };
        self.on_learn_remote_state_completed(outcome, ctx);
    }

    fn stage_and_apply(&mut self, response: &LearnResponse) -> Result<(), LearnError> {
        let staging = self.app.learn_dir().to_path_buf();
        let mut local_files = Vec::with_capacity(response.state.files.len());
        for file in &response.state.files {
            let path = Path::new(file.as_str());
            if !is_safe_relative(path) {
                return Err(LearnError::GetLearnStateFailed {
                    reason: format!("checkpoint path {file:?} escapes the staging directory"),
                });
            }
            local_files.push(staging.join(path).to_string_lossy().into_owned());
        }
        let local_state = LearnState {
            meta: response.state.meta.clone(),
            files: local_files,
        };

        let old_committed = self.app.last_committed_decree();
        self.app
            .apply_learn_state(&local_state)
            .map_err(|err| LearnError::LocalAppFailure {
                reason: err.to_string(),
            })?;

        tracing::debug!(
            replica = %self.config.gpid,
            files = local_state.files.len(),
            app_committed_before = old_committed,
            app_committed = self.app.last_committed_decree(),
            app_durable = self.app.last_durable_decree(),
            remote_commit = response.commit_decree,
            "applied learn state"
        );

        if self.app.last_committed_decree() >= response.commit_decree {
            self.app
                .flush(true)
                .map_err(|err| LearnError::LocalAppFailure {
                    reason: err.to_string(),
                })?;
            debug_assert_eq!(
                self.app.last_committed_decree(),
                self.app.last_durable_decree()
            );
        }
        Ok(())
    }

    pub fn on_learn_remote_state_completed(
        &mut self,
        result: Result<(), LearnError>,
        ctx: &ReplicaCtx,
    ) {
        self.check_access();
        if self.status() != ReplicaStatus::PotentialSecondary {
            return;
        }
        let Some(session) = self.learner.as_mut() else {
            return;
        };
        session.round_running = false;
        let signature = session.signature;

        match result {
            Err(err) => self.handle_learning_error(err),
            Ok(()) => self.init_learn(signature, ctx),
        }
    }

    pub fn handle_learning_error(&mut self, err: LearnError) {
        self.check_access();
        tracing::warn!(
            replica = %self.config.gpid,
            app_committed = self.app.last_committed_decree(),
            "learning failed: {err}"
        );
        if let Some(session) = self.learner.as_mut() {
            session.cancel_tasks();
            session.round_running = false;
            session.status = LearningStatus::Failed;
        }
        self.update_local_configuration_with_no_ballot_change(ReplicaStatus::Error);
    }

    fn notify_learn_completion(&self, ctx: &ReplicaCtx) {
        let Some(session) = self.learner.as_ref() else {
            return;
        };
        let Some(primary) = self.config.primary else {
            tracing::warn!(replica = %self.config.gpid, "no primary to notify of learn completion");
            return;
        };
        let report = LearnCompletionReport {
            gpid: self.config.gpid,
            last_committed_decree_in_app: self.app.last_committed_decree(),
            last_committed_decree_in_prepare_list: self.last_committed_decree(),
            learner_signature: session.signature,
            status: session.status,
            node: self.node,
        };
        ctx.transport.notify_learn_completion(primary, report);
    }

    /// Configuration push that turns this replica into a learner and
    /// kicks off (or restarts) learning.
    pub fn on_add_learner(&mut self, request: AddLearnerRequest, ctx: &ReplicaCtx) {
        self.check_access();
        if request.config.ballot < self.ballot() {
            tracing::debug!(
                replica = %self.config.gpid,
                stale = request.config.ballot,
                current = self.ballot(),
                "dropping add-learner with stale ballot"
            );
            return;
        }
        let allowed = request.config.ballot > self.ballot()
            || same_ballot_change_allowed(self.status(), request.config.status);
        if !allowed {
            return;
        }

        // a different signature invalidates any in-flight round: its copy
        // is canceled here and its reply fails the signature check on
        // arrival
        let stale = self
            .learner
            .as_ref()
            .is_some_and(|session| session.signature != request.learner_signature);
        if stale {
            if let Some(mut session) = self.learner.take() {
                session.cancel_tasks();
            }
        }

        self.update_local_configuration(request.config.clone());
        debug_assert_eq!(self.status(), ReplicaStatus::PotentialSecondary);
        self.init_learn(request.learner_signature, ctx);
    }

    // ------------------------------------------------------------------
    // primary side
    // ------------------------------------------------------------------

    pub fn on_learn(&mut self, request: &LearnRequest, ctx: &ReplicaCtx) -> LearnResponse {
        self.check_access();
        let learner_config = self.replica_config_for(request.learner);
        if self.status() != ReplicaStatus::Primary {
            return error_response(learner_config, LearnRpcError::InvalidState);
        }

        let local_committed = self.last_committed_decree();
        // a learner claiming to be ahead of the primary has lost its
        // state (duplicated data disaster); treat it as empty
        let effective_app_committed = if request.last_committed_decree_in_app > local_committed {
            tracing::warn!(
                replica = %self.config.gpid,
                learner = %request.learner,
                claimed = request.last_committed_decree_in_app,
                local = local_committed,
                "learner state presumed lost; learning from scratch"
            );
            0
        } else {
            request.last_committed_decree_in_app
        };

        match self.primary_state.learners.get(&request.learner) {
            None => {
                let error = if learner_config.status == ReplicaStatus::Secondary {
                    None
                } else {
                    Some(LearnRpcError::ObjectNotFound)
                };
                let mut response = error_response(learner_config, LearnRpcError::ObjectNotFound);
                response.error = error;
                response.commit_decree = local_committed;
                return response;
            }
            Some(record) if record.signature != request.signature => {
                return error_response(learner_config, LearnRpcError::ObjectNotFound);
            }
            Some(_) => {}
        }

        tracing::debug!(
            replica = %self.config.gpid,
            learner = %request.learner,
            app_committed = request.last_committed_decree_in_app,
            local_committed,
            "serving learn request"
        );

        let staleness = ctx
            .config
            .staleness_for_start_prepare_for_potential_secondary;
        let mut attach_now = false;
        let prepare_start_decree = {
            let record = self
                .primary_state
                .learners
                .get_mut(&request.learner)
                .expect("checked above");
            if effective_app_committed + staleness >= local_committed {
                if record.prepare_start_decree.is_none() {
                    record.prepare_start_decree = Some(local_committed + 1);
                    attach_now = true;
                }
                record.prepare_start_decree
            } else {
                record.prepare_start_decree = None;
                None
            }
        };
        if attach_now {
            tracing::debug!(
                replica = %self.config.gpid,
                learner = %request.learner,
                prepare_start = local_committed + 1,
                "attaching learner to live prepares"
            );
            self.replay_prepare_list();
        }

        let mut response = LearnResponse {
            error: None,
            config: learner_config,
            prepare_start_decree,
            commit_decree: local_committed,
            state: LearnState::default(),
            base_local_dir: self.app.data_dir().to_string_lossy().into_owned(),
        };

        match self
            .app
            .get_learn_state(effective_app_committed + 1, &request.app_specific_request)
        {
            // ship dir-relative paths; the learner re-roots them under its
            // own staging directory
            Ok(state) => match relativize_learn_files(self.app.data_dir(), state) {
                Ok(state) => response.state = state,
                Err(file) => {
                    tracing::error!(
                        replica = %self.config.gpid,
                        file = %file,
                        "learn state file escapes the data directory"
                    );
                    response.error = Some(LearnRpcError::GetLearnStateFailed);
                }
            },
            Err(err) => {
                tracing::error!(
                    replica = %self.config.gpid,
                    start_decree = effective_app_committed + 1,
                    "get learn state failed: {err}"
                );
                response.error = Some(LearnRpcError::GetLearnStateFailed);
            }
        }
        response
    }

    pub fn on_learn_completion_notification(&mut self, report: LearnCompletionReport) {
        self.check_access();
        if self.status() != ReplicaStatus::Primary {
            return;
        }
        if report.status == LearningStatus::Succeeded {
            self.handle_learning_succeeded_on_primary(report.node, report.learner_signature);
        }
    }

    fn handle_learning_succeeded_on_primary(&mut self, node: NodeId, signature: u64) {
        let matched = self
            .primary_state
            .learners
            .get(&node)
            .is_some_and(|record| record.signature == signature);
        if matched {
            self.upgrade_to_secondary_on_primary(node);
        }
    }

    fn upgrade_to_secondary_on_primary(&mut self, node: NodeId) {
        self.primary_state.learners.remove(&node);
        if !self.primary_state.secondaries.contains(&node) {
            self.primary_state.secondaries.push(node);
        }
        tracing::info!(replica = %self.config.gpid, %node, "learner upgraded to secondary");
    }

    fn replica_config_for(&self, node: NodeId) -> PartitionConfig {
        let status = if self.primary_state.secondaries.contains(&node) {
            ReplicaStatus::Secondary
        } else if self.primary_state.learners.contains_key(&node) {
            ReplicaStatus::PotentialSecondary
        } else {
            ReplicaStatus::Inactive
        };
        PartitionConfig {
            gpid: self.config.gpid,
            ballot: self.config.ballot,
            primary: Some(self.node),
            status,
        }
    }

    /// Re-dispatch of pending prepares to a newly attached learner is the
    /// prepare path's job; here we only surface how much it will resend.
    fn replay_prepare_list(&mut self) {
        let last_committed = self.last_committed_decree();
        let pending = self.prepare_list.mutations_after(last_committed).count();
        tracing::debug!(
            replica = %self.config.gpid,
            pending,
            "prepare list will replay to attached learner"
        );
    }
}

/// True only for non-empty paths made of plain name components: no root,
/// no `..`, no `.`. Anything else could land a join outside its base
/// directory.
fn is_safe_relative(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
}

/// Rewrites learn-state file paths relative to the serving app's data
/// directory; a path that does not reduce to a safe relative path is
/// returned as the error.
fn relativize_learn_files(base: &Path, mut state: LearnState) -> Result<LearnState, String> {
    for file in &mut state.files {
        let relative = {
            let path = Path::new(file.as_str());
            let stripped = path.strip_prefix(base).unwrap_or(path);
            if is_safe_relative(stripped) {
                Some(stripped.to_string_lossy().into_owned())
            } else {
                None
            }
        };
        match relative {
            Some(relative) => *file = relative,
            None => return Err(std::mem::take(file)),
        }
    }
    Ok(state)
}

fn error_response(config: PartitionConfig, error: LearnRpcError) -> LearnResponse {
    LearnResponse {
        error: Some(error),
        config,
        prepare_start_decree: None,
        commit_decree: 0,
        state: LearnState::default(),
        base_local_dir: String::new(),
    }
}

fn same_ballot_change_allowed(current: ReplicaStatus, next: ReplicaStatus) -> bool {
    next == ReplicaStatus::PotentialSecondary
        && matches!(
            current,
            ReplicaStatus::Inactive | ReplicaStatus::PotentialSecondary | ReplicaStatus::Error
        )
}
