//! Constructor-injected configuration for the replication core.

use serde::{Deserialize, Serialize};

use crate::core::Decree;

const MB: u64 = 1024 * 1024;

/// Mutation log tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Per-pending-buffer flush threshold, in megabytes.
    pub log_buffer_size_mb: u32,
    /// Batched flush deadline, in milliseconds.
    pub log_pending_max_ms: u64,
    /// Segment rollover threshold, in megabytes.
    pub max_log_file_mb: u32,
    /// Enables timer-based batching; when off every append flushes.
    pub batch_write: bool,
    /// Per-segment in-flight write slot count.
    pub write_task_max_count: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_buffer_size_mb: 1,
            log_pending_max_ms: 100,
            max_log_file_mb: 32,
            batch_write: true,
            write_task_max_count: 2,
        }
    }
}

impl LogConfig {
    pub fn log_buffer_size_bytes(&self) -> usize {
        (self.log_buffer_size_mb as u64 * MB) as usize
    }

    pub fn max_log_file_bytes(&self) -> i64 {
        (self.max_log_file_mb as u64 * MB) as i64
    }
}

/// Replication core configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    pub log: LogConfig,
    /// Decree gap under which a learner may attach to live prepares.
    pub staleness_for_start_prepare_for_potential_secondary: Decree,
    /// Prepare list window size, in mutations.
    pub prepare_list_max_count: usize,
    /// Permits committing mutations that are not yet durable in the log.
    pub allow_prepare_ack_before_logging: bool,
    /// Concurrent checkpoint-copy requests per copier.
    pub max_concurrent_remote_copy_requests: usize,
    /// Concurrent local file writes across all copy requests.
    pub max_concurrent_local_writes: usize,
    /// Block size for bulk checkpoint transfer.
    pub nfs_copy_block_bytes: usize,
    /// Worker threads in the partition executor.
    pub executor_threads: usize,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            log: LogConfig::default(),
            staleness_for_start_prepare_for_potential_secondary: 10,
            prepare_list_max_count: 250,
            allow_prepare_ack_before_logging: false,
            max_concurrent_remote_copy_requests: 8,
            max_concurrent_local_writes: 4,
            nfs_copy_block_bytes: 4 * MB as usize,
            executor_threads: 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = ReplicationConfig::default();
        assert_eq!(config.log.log_buffer_size_bytes(), 1024 * 1024);
        assert_eq!(config.log.max_log_file_bytes(), 32 * 1024 * 1024);
        assert!(config.log.batch_write);
        assert_eq!(config.staleness_for_start_prepare_for_potential_secondary, 10);
    }

    #[test]
    fn overrides_keep_remaining_defaults() {
        let config = ReplicationConfig {
            log: LogConfig {
                batch_write: false,
                ..LogConfig::default()
            },
            ..ReplicationConfig::default()
        };
        assert!(!config.log.batch_write);
        assert_eq!(config.log.log_pending_max_ms, 100);
    }
}
