//! Learner catch-up protocol: wire messages, session state and
//! checkpoint staging.

use thiserror::Error;

pub mod copy;
pub mod proto;
mod session;

pub use copy::{CancelToken, CopyCallback, CopyError, LocalCopier, RemoteFileCopier};
pub use proto::{
    AddLearnerRequest, LearnCompletionReport, LearnRequest, LearnResponse, LearnRpcError,
    LearnState, ProtoDecodeError, ProtoEncodeError,
};
pub use session::{LearningSession, LearningStatus};

#[derive(Debug, Error)]
pub enum LearnError {
    #[error("replica is not in a state that can serve this learn request")]
    InvalidState,
    #[error("learner unknown to the primary or signature mismatch")]
    ObjectNotFound,
    #[error("get learn state failed: {reason}")]
    GetLearnStateFailed { reason: String },
    #[error("local app failure: {reason}")]
    LocalAppFailure { reason: String },
    #[error("checkpoint copy failed: {0}")]
    Copy(#[from] CopyError),
    #[error("learn rpc failed: {reason}")]
    Rpc { reason: String },
    #[error("learn message decode failed: {0}")]
    Decode(#[from] ProtoDecodeError),
}

impl From<LearnRpcError> for LearnError {
    fn from(err: LearnRpcError) -> Self {
        match err {
            LearnRpcError::InvalidState => LearnError::InvalidState,
            LearnRpcError::ObjectNotFound => LearnError::ObjectNotFound,
            LearnRpcError::GetLearnStateFailed => LearnError::GetLearnStateFailed {
                reason: "primary could not build learn state".to_string(),
            },
        }
    }
}
