use crate::utils::error::Result;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt};

pub struct LoggingConfig {
    pub level: String,
    pub console_output: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console_output: true,
        }
    }
}

pub fn init_logging(config: LoggingConfig) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    info!("logging initialized");
    Ok(())
}

pub fn log_round_start(job_tag: &str, round: u32, active_sources: usize, missing: usize) {
    info!(
        job = job_tag,
        round = round,
        active_sources = active_sources,
        missing = missing,
        "retry round started"
    );
}

pub fn log_chunk_ok(job_tag: &str, index: usize, peer: &str, bytes: u64, ttfb_ms: u64, transfer_ms: u64) {
    debug!(
        job = job_tag,
        chunk = index,
        peer = peer,
        bytes = bytes,
        ttfb_ms = ttfb_ms,
        transfer_ms = transfer_ms,
        "chunk completed"
    );
}

pub fn log_chunk_fail(job_tag: &str, index: usize, peer: &str, reason: &str) {
    warn!(job = job_tag, chunk = index, peer = peer, reason = reason, "chunk failed");
}

pub fn log_peer_timed_out(job_tag: &str, peer: &str, until_secs: u64) {
    warn!(job = job_tag, peer = peer, timeout_secs = until_secs, "peer timed out");
}

pub fn log_desperation(job_tag: &str, zero_progress_rounds: u32) {
    warn!(job = job_tag, rounds = zero_progress_rounds, "entering desperation mode");
}

pub fn log_job_error(job_tag: &str, err: &crate::utils::error::SwarmError) {
    error!(job = job_tag, error = %err, "job failed");
}

pub fn log_job_success(job_tag: &str, elapsed_ms: u64, total_bytes: u64) {
    info!(
        job = job_tag,
        elapsed_ms = elapsed_ms,
        total_bytes = total_bytes,
        "job completed"
    );
}
