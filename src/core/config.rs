//! Caller-supplied job configuration (spec §6.3).

use crate::core::model::Candidate;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CHUNK_SIZE: u64 = 512 * 1024;
pub const MIN_CHUNK_SIZE: u64 = 64 * 1024;
pub const MAX_CHUNK_SIZE: u64 = 4 * 1024 * 1024;
pub const DEFAULT_VERIFICATION_PREFIX_BYTES: usize = 32 * 1024;
pub const DEFAULT_PER_CHUNK_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_SLOW_DURATION: Duration = Duration::from_secs(8);
pub const DEFAULT_SLOW_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 3;
pub const DEFAULT_MAX_RETRY_ROUNDS: u32 = 5;
pub const DEFAULT_MAX_ZERO_PROGRESS_ROUNDS: u32 = 3;
pub const DEFAULT_MIN_SOURCE_FLOOR_BPS: f64 = 5.0 * 1024.0;
pub const DEFAULT_VERIFICATION_PARALLELISM: usize = 8;
pub const DEFAULT_VERIFICATION_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_MIN_VERIFIED_GROUP_SIZE: usize = 1;

/// One engine invocation (spec §6.3), enumerated exhaustively.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub target_filename: String,
    pub target_path: PathBuf,
    pub total_size: u64,
    pub chunk_size: u64,
    pub sources: Vec<Candidate>,
    pub skip_verification: bool,
    pub verification_prefix_bytes: usize,
    pub verification_parallelism: usize,
    pub verification_timeout: Duration,
    pub min_verified_group_size: usize,
    pub per_chunk_timeout: Duration,
    pub slow_duration: Duration,
    pub slow_timeout: Duration,
    pub max_consecutive_failures: u32,
    pub max_retry_rounds: u32,
    pub max_zero_progress_rounds: u32,
    pub min_source_floor_bps: f64,
}

impl DownloadRequest {
    pub fn new(
        target_filename: impl Into<String>,
        target_path: PathBuf,
        total_size: u64,
        sources: Vec<Candidate>,
    ) -> Self {
        Self {
            target_filename: target_filename.into(),
            target_path,
            total_size,
            chunk_size: DEFAULT_CHUNK_SIZE,
            sources,
            skip_verification: false,
            verification_prefix_bytes: DEFAULT_VERIFICATION_PREFIX_BYTES,
            verification_parallelism: DEFAULT_VERIFICATION_PARALLELISM,
            verification_timeout: DEFAULT_VERIFICATION_TIMEOUT,
            min_verified_group_size: DEFAULT_MIN_VERIFIED_GROUP_SIZE,
            per_chunk_timeout: DEFAULT_PER_CHUNK_TIMEOUT,
            slow_duration: DEFAULT_SLOW_DURATION,
            slow_timeout: DEFAULT_SLOW_TIMEOUT,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            max_retry_rounds: DEFAULT_MAX_RETRY_ROUNDS,
            max_zero_progress_rounds: DEFAULT_MAX_ZERO_PROGRESS_ROUNDS,
            min_source_floor_bps: DEFAULT_MIN_SOURCE_FLOOR_BPS,
        }
    }

    pub fn validate(&self) -> crate::utils::error::Result<()> {
        use crate::utils::error::SwarmError;
        if self.total_size == 0 {
            return Err(SwarmError::invalid_config("total_size must be positive"));
        }
        if self.chunk_size < MIN_CHUNK_SIZE || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(SwarmError::invalid_config(format!(
                "chunk_size {} out of allowed range [{}, {}]",
                self.chunk_size, MIN_CHUNK_SIZE, MAX_CHUNK_SIZE
            )));
        }
        if self.sources.is_empty() {
            return Err(SwarmError::invalid_config("sources must be non-empty"));
        }
        Ok(())
    }
}
