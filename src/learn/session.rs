//! Per-learner session state on a potential secondary.

use std::fmt;

use super::copy::CancelToken;

/// Learning progress; `Succeeded` and `Failed` are terminal for one
/// signature.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LearningStatus {
    WithoutPrepare,
    WithPrepare,
    Succeeded,
    Failed,
}

impl LearningStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LearningStatus::WithoutPrepare => "without-prepare",
            LearningStatus::WithPrepare => "with-prepare",
            LearningStatus::Succeeded => "succeeded",
            LearningStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "without-prepare" => Some(LearningStatus::WithoutPrepare),
            "with-prepare" => Some(LearningStatus::WithPrepare),
            "succeeded" => Some(LearningStatus::Succeeded),
            "failed" => Some(LearningStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for LearningStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One learning attempt, identified by its signature. Replies carrying a
/// different signature are stale and must be discarded; tearing the
/// session down cancels whatever transfer is still in flight.
#[derive(Clone, Debug)]
pub struct LearningSession {
    pub signature: u64,
    pub status: LearningStatus,
    pub round_running: bool,
    remote_files_task: Option<CancelToken>,
}

impl LearningSession {
    pub fn new(signature: u64) -> Self {
        Self {
            signature,
            status: LearningStatus::WithoutPrepare,
            round_running: false,
            remote_files_task: None,
        }
    }

    /// Registers this round's checkpoint transfer so it can be canceled.
    pub fn track_remote_files_task(&mut self, token: CancelToken) {
        debug_assert!(self.remote_files_task.is_none());
        self.remote_files_task = Some(token);
    }

    /// Forgets a transfer that completed and delivered its result.
    pub fn clear_remote_files_task(&mut self) {
        self.remote_files_task = None;
    }

    /// Cancels any in-flight transfer of this session.
    pub fn cancel_tasks(&mut self) {
        if let Some(task) = self.remote_files_task.take() {
            task.cancel();
        }
    }
}
