#![forbid(unsafe_code)]

pub mod config;
pub mod core;
pub mod learn;
pub mod log;
pub mod prepare;
pub mod replica;
pub(crate) mod sync;
pub mod telemetry;

pub use crate::config::{LogConfig, ReplicationConfig};
pub use crate::core::{
    Ballot, Decree, Gpid, Mutation, MutationHeader, NodeId, PartitionConfig, ReplicaStatus,
};
pub use crate::learn::{LearnError, LearningStatus};
pub use crate::log::{AppendCallback, LogError, MutationLog};
pub use crate::prepare::{PrepareError, PrepareList};
pub use crate::replica::{
    AppError, ExecutorHandle, LearnTransport, PartitionExecutor, Replica, ReplicaApp, ReplicaCtx,
};
