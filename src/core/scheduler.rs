//! Component I (Scheduler / Supervisor) — spec §4.I. The heart of the
//! engine. Runs as a single logical execution context driven by one event
//! stream (worker events + a periodic tick); every other shared structure
//! (`Job`, `PeerMetricsRegistry`, the work queue) is owned and mutated
//! exclusively from here.

use crate::core::assembler::assemble;
use crate::core::chunk_plan::plan_chunks;
use crate::core::config::DownloadRequest;
use crate::core::metrics::PeerMetricsRegistry;
use crate::core::model::{Chunk, ChunkResult, VerifiedSource};
use crate::core::queue::WorkQueue;
use crate::core::transport::TransportAdapter;
use crate::core::worker::{spawn_worker, WorkerEvent, WorkerHandle};
use crate::utils::error::{Result, SwarmError};
use crate::utils::logging::{log_chunk_fail, log_chunk_ok, log_desperation, log_peer_timed_out, log_round_start};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::info;

/// Per-chunk telemetry handed back to the caller alongside the summary.
#[derive(Debug, Clone)]
pub struct ChunkTelemetry {
    pub index: usize,
    pub peer: String,
    pub bytes: u64,
    pub ttfb_ms: u64,
    pub transfer_ms: u64,
}

/// What a successful job returns (spec §6.3 "Result to caller").
#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    pub output_path: PathBuf,
    pub elapsed_ms: u64,
    pub chunks_per_source: HashMap<String, u32>,
    pub total_bytes: u64,
    pub telemetry: Vec<ChunkTelemetry>,
    pub verified_digest: String,
    /// Set by the caller when a Hash Oracle lookup (component, spec §6.2)
    /// returned a digest for this content key that disagrees with
    /// `verified_digest`. The Scheduler itself is oracle-agnostic; this
    /// field is always `None` coming out of `run_scheduler` and is filled
    /// in by the public API after the oracle lookup.
    pub oracle_mismatch: Option<String>,
}

const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// The Scheduler's view of the job (spec §3 `Job`). Owned exclusively by
/// `run_scheduler`; nothing outside this module ever mutates it.
struct Job {
    target_path: PathBuf,
    tmp_dir: PathBuf,
    chunks: Arc<Vec<Chunk>>,
    completed: HashMap<usize, ChunkResult>,
    in_flight: HashMap<usize, String>,
    round_number: u32,
    peer_remote_paths: HashMap<String, String>,
}

impl Job {
    fn remember_sources(&mut self, sources: &[VerifiedSource]) {
        for v in sources {
            self.peer_remote_paths
                .entry(v.source.peer_id.clone())
                .or_insert_with(|| v.source.remote_path.clone());
        }
    }
}

impl Job {
    fn missing_indices(&self) -> Vec<usize> {
        (0..self.chunks.len())
            .filter(|i| !self.completed.contains_key(i))
            .collect()
    }

    fn is_done(&self) -> bool {
        self.completed.len() == self.chunks.len()
    }
}

/// Drives chunked download of one job across `verified` sources, from the
/// initial pass through retry rounds and desperation mode, to a completed
/// `DownloadOutcome` or a fatal `SwarmError`.
pub async fn run_scheduler(
    request: &DownloadRequest,
    verified: Vec<VerifiedSource>,
    verified_digest: String,
    transport: Arc<dyn TransportAdapter>,
) -> Result<DownloadOutcome> {
    if verified.is_empty() {
        return Err(SwarmError::InsufficientVerifiedSources {
            candidates: request.sources.len(),
            largest: 0,
        });
    }

    let start = Instant::now();
    let job_tag = request.target_filename.clone();

    let tmp_dir = request
        .target_path
        .parent()
        .unwrap_or_else(|| std::path::Path::new("."))
        .join(".tmp");
    tokio::fs::create_dir_all(&tmp_dir)
        .await
        .map_err(SwarmError::from)?;

    let chunks = Arc::new(plan_chunks(request.total_size, request.chunk_size));
    let queue = Arc::new(WorkQueue::new(0..chunks.len()));
    let mut job = Job {
        target_path: request.target_path.clone(),
        tmp_dir: tmp_dir.clone(),
        chunks: chunks.clone(),
        completed: HashMap::new(),
        in_flight: HashMap::new(),
        round_number: 0,
        peer_remote_paths: HashMap::new(),
    };
    job.remember_sources(&verified);

    let mut metrics = PeerMetricsRegistry::new();
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<WorkerEvent>();
    let mut workers: HashMap<String, WorkerHandle> = HashMap::new();

    let spawn_set = |peers: &[VerifiedSource],
                     workers: &mut HashMap<String, WorkerHandle>,
                     queue: &Arc<WorkQueue>,
                     chunks: &Arc<Vec<Chunk>>| {
        for source in peers {
            if workers.contains_key(&source.source.peer_id) {
                continue;
            }
            let handle = spawn_worker(
                source.source.clone(),
                transport.clone(),
                queue.clone(),
                chunks.clone(),
                tmp_dir.clone(),
                request.per_chunk_timeout,
                request.max_consecutive_failures,
                events_tx.clone(),
            );
            workers.insert(source.source.peer_id.clone(), handle);
        }
    };

    spawn_set(&verified, &mut workers, &queue, &chunks);

    let outcome = run_event_loop(
        request,
        &mut job,
        &mut metrics,
        &queue,
        &mut workers,
        &mut events_rx,
        &verified,
        transport.clone(),
        events_tx.clone(),
        &job_tag,
    )
    .await;

    // Terminal: close the queue and drain every worker so no orphaned
    // task survives past this function (I3, I6).
    queue.close();
    for (_, handle) in workers.drain() {
        handle.cancel.cancel();
        let _ = handle.join.await;
    }
    // Drain any trailing events emitted while workers were shutting down.
    while events_rx.try_recv().is_ok() {}

    match outcome {
        Ok(()) => {
            let (chunks_per_source, telemetry, total_bytes) = summarize(&job);
            let output_path = match assemble(&job.chunks, &job.completed, &job.target_path).await {
                Ok(path) => path,
                Err(e) => {
                    cleanup_temp_dir(&tmp_dir).await;
                    crate::utils::logging::log_job_error(&job_tag, &e);
                    return Err(e);
                }
            };
            let elapsed_ms = start.elapsed().as_millis() as u64;
            crate::utils::logging::log_job_success(&job_tag, elapsed_ms, total_bytes);
            let _ = tokio::fs::remove_dir(&tmp_dir).await;
            Ok(DownloadOutcome {
                output_path,
                elapsed_ms,
                chunks_per_source,
                total_bytes,
                telemetry,
                verified_digest,
                oracle_mismatch: None,
            })
        }
        Err(e) => {
            cleanup_temp_dir(&tmp_dir).await;
            crate::utils::logging::log_job_error(&job_tag, &e);
            Err(e)
        }
    }
}

fn summarize(job: &Job) -> (HashMap<String, u32>, Vec<ChunkTelemetry>, u64) {
    let mut chunks_per_source: HashMap<String, u32> = HashMap::new();
    let mut telemetry = Vec::with_capacity(job.completed.len());
    let mut total_bytes = 0u64;
    let mut ordered: Vec<&ChunkResult> = job.completed.values().collect();
    ordered.sort_by_key(|c| c.index);
    for result in ordered {
        *chunks_per_source.entry(result.served_by.peer_id.clone()).or_insert(0) += 1;
        total_bytes += result.bytes;
        telemetry.push(ChunkTelemetry {
            index: result.index,
            peer: result.served_by.peer_id.clone(),
            bytes: result.bytes,
            ttfb_ms: result.ttfb_ms,
            transfer_ms: result.transfer_ms,
        });
    }
    (chunks_per_source, telemetry, total_bytes)
}

async fn cleanup_temp_dir(tmp_dir: &PathBuf) {
    if let Ok(mut dir) = tokio::fs::read_dir(tmp_dir).await {
        while let Ok(Some(entry)) = dir.next_entry().await {
            let _ = tokio::fs::remove_file(entry.path()).await;
        }
    }
    let _ = tokio::fs::remove_dir(tmp_dir).await;
}

#[allow(clippy::too_many_arguments)]
async fn run_event_loop(
    request: &DownloadRequest,
    job: &mut Job,
    metrics: &mut PeerMetricsRegistry,
    queue: &Arc<WorkQueue>,
    workers: &mut HashMap<String, WorkerHandle>,
    events_rx: &mut mpsc::UnboundedReceiver<WorkerEvent>,
    original_verified: &[VerifiedSource],
    transport: Arc<dyn TransportAdapter>,
    events_tx: mpsc::UnboundedSender<WorkerEvent>,
    job_tag: &str,
) -> Result<()> {
    let mut zero_progress_rounds = 0u32;
    let mut previous_missing_len: Option<usize> = None;
    let mut tick = tokio::time::interval(TICK_INTERVAL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        if job.is_done() {
            return Ok(());
        }

        tokio::select! {
            event = events_rx.recv() => {
                match event {
                    Some(event) => handle_event(job, metrics, workers, job_tag, event),
                    None => break,
                }
            }
            _ = tick.tick() => {
                apply_slow_peer_policy(request, job, metrics, workers, job_tag).await;
            }
        }

        if job.is_done() {
            return Ok(());
        }

        // Round boundary: no in-flight work and the queue is drained, but
        // chunks remain missing. This is when a retry round (or
        // desperation) kicks in.
        if job.in_flight.is_empty() && queue.len().await == 0 && !job.is_done() {
            let missing = job.missing_indices();
            if missing.is_empty() {
                return Ok(());
            }

            let progress_made = previous_missing_len.map_or(true, |prev| missing.len() < prev);
            if progress_made {
                zero_progress_rounds = 0;
            } else {
                zero_progress_rounds += 1;
            }
            previous_missing_len = Some(missing.len());

            if zero_progress_rounds >= request.max_zero_progress_rounds {
                log_desperation(job_tag, zero_progress_rounds);
                let recovered = run_desperation_round(
                    request, job, metrics, queue, workers, events_rx, original_verified,
                    transport.clone(), events_tx.clone(), job_tag,
                )
                .await?;
                if !recovered {
                    return Err(SwarmError::Stuck {
                        rounds: zero_progress_rounds,
                        missing: job.missing_indices().len(),
                    });
                }
                return Ok(());
            }

            if job.round_number >= request.max_retry_rounds {
                return Err(SwarmError::Stuck {
                    rounds: zero_progress_rounds,
                    missing: missing.len(),
                });
            }

            job.round_number += 1;
            let proven: Vec<VerifiedSource> = original_verified
                .iter()
                .filter(|v| metrics.is_proven(&v.source.peer_id))
                .cloned()
                .collect();
            if proven.is_empty() {
                return Err(SwarmError::Stuck {
                    rounds: zero_progress_rounds,
                    missing: missing.len(),
                });
            }
            log_round_start(job_tag, job.round_number, proven.len(), missing.len());
            job.remember_sources(&proven);
            for v in &proven {
                metrics.clear_timeout(&v.source.peer_id);
            }
            for index in &missing {
                queue.push_back(*index).await;
            }
            spawn_missing_workers(&proven, workers, queue, job, request, &transport, &events_tx);
        }
    }

    if job.is_done() {
        Ok(())
    } else {
        Err(SwarmError::Stuck {
            rounds: zero_progress_rounds,
            missing: job.missing_indices().len(),
        })
    }
}

#[allow(clippy::too_many_arguments)]
fn spawn_missing_workers(
    proven: &[VerifiedSource],
    workers: &mut HashMap<String, WorkerHandle>,
    queue: &Arc<WorkQueue>,
    job: &Job,
    request: &DownloadRequest,
    transport: &Arc<dyn TransportAdapter>,
    events_tx: &mpsc::UnboundedSender<WorkerEvent>,
) {
    for source in proven {
        if workers.contains_key(&source.source.peer_id) {
            continue;
        }
        let handle = spawn_worker(
            source.source.clone(),
            transport.clone(),
            queue.clone(),
            job.chunks.clone(),
            job.tmp_dir.clone(),
            request.per_chunk_timeout,
            request.max_consecutive_failures,
            events_tx.clone(),
        );
        workers.insert(source.source.peer_id.clone(), handle);
    }
}

fn handle_event(
    job: &mut Job,
    metrics: &mut PeerMetricsRegistry,
    workers: &mut HashMap<String, WorkerHandle>,
    job_tag: &str,
    event: WorkerEvent,
) {
    match event {
        WorkerEvent::ChunkStarted { index, peer } => {
            job.in_flight.insert(index, peer);
        }
        WorkerEvent::ChunkOk {
            index,
            temp_path,
            peer,
            bytes,
            ttfb_ms,
            transfer_ms,
        } => {
            job.in_flight.remove(&index);
            let now = Instant::now();
            metrics.record_success(&peer, bytes, transfer_ms, now);
            log_chunk_ok(job_tag, index, &peer, bytes, ttfb_ms, transfer_ms);
            let remote_path = job
                .peer_remote_paths
                .get(&peer)
                .cloned()
                .unwrap_or_default();
            match job.completed.entry(index) {
                std::collections::hash_map::Entry::Occupied(_) => {
                    // Speculative parallelism: another attempt already won
                    // this index. This one loses; delete its temp file.
                    let temp_path = temp_path.clone();
                    tokio::spawn(async move {
                        let _ = tokio::fs::remove_file(temp_path).await;
                    });
                }
                std::collections::hash_map::Entry::Vacant(entry) => {
                    entry.insert(ChunkResult {
                        index,
                        temp_path,
                        served_by: crate::core::model::SourceRef::new(peer, remote_path),
                        bytes,
                        ttfb_ms,
                        transfer_ms,
                    });
                }
            }
        }
        WorkerEvent::ChunkFail { index, peer, reason } => {
            job.in_flight.remove(&index);
            metrics.record_failure(&peer);
            log_chunk_fail(job_tag, index, &peer, &reason);
        }
        WorkerEvent::PeerDoesNotSupportRanged { peer } => {
            metrics.record_failure(&peer);
        }
        WorkerEvent::WorkerExited { peer } => {
            job.in_flight.retain(|_, p| p != &peer);
            // The worker task is already gone; drop its stale handle so a
            // later retry round or desperation can respawn this peer.
            workers.remove(&peer);
        }
    }
}

async fn apply_slow_peer_policy(
    request: &DownloadRequest,
    job: &Job,
    metrics: &mut PeerMetricsRegistry,
    workers: &mut HashMap<String, WorkerHandle>,
    job_tag: &str,
) {
    if workers.len() <= 1 {
        // B3: never cancel the last active worker on slow-peer grounds —
        // doing so risks livelock with no one left to make progress.
        return;
    }

    let min_acceptable = metrics.min_acceptable_speed(request.min_source_floor_bps);
    let now = Instant::now();

    for (index, peer) in job.in_flight.clone() {
        let Some(state) = metrics.get(&peer) else { continue };
        let is_slow = state.rolling_bytes_per_sec < min_acceptable;
        let Some(slow_elapsed) = metrics.note_slow_check(&peer, is_slow, now) else { continue };
        if slow_elapsed < request.slow_duration {
            continue;
        }
        if workers.len() <= 1 {
            break;
        }
        if let Some(handle) = workers.remove(&peer) {
            handle.cancel.cancel();
            let _ = handle.join.await;
            metrics.set_timeout_until(&peer, now + request.slow_timeout);
            log_peer_timed_out(job_tag, &peer, request.slow_timeout.as_secs());
            let _ = index;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_desperation_round(
    request: &DownloadRequest,
    job: &mut Job,
    metrics: &mut PeerMetricsRegistry,
    queue: &Arc<WorkQueue>,
    workers: &mut HashMap<String, WorkerHandle>,
    events_rx: &mut mpsc::UnboundedReceiver<WorkerEvent>,
    original_verified: &[VerifiedSource],
    transport: Arc<dyn TransportAdapter>,
    events_tx: mpsc::UnboundedSender<WorkerEvent>,
    job_tag: &str,
) -> Result<bool> {
    metrics.clear_all_timeouts();
    job.remember_sources(original_verified);
    let missing = job.missing_indices();
    for index in &missing {
        queue.push_back(*index).await;
    }
    spawn_missing_workers(original_verified, workers, queue, job, request, &transport, &events_tx);
    info!(job = job_tag, sources = original_verified.len(), "desperation round: all sources re-admitted");

    let deadline = tokio::time::sleep(request.per_chunk_timeout * (job.chunks.len() as u32).max(1));
    tokio::pin!(deadline);

    loop {
        if job.is_done() {
            return Ok(true);
        }
        tokio::select! {
            event = events_rx.recv() => {
                match event {
                    Some(event) => handle_event(job, metrics, workers, job_tag, event),
                    None => return Ok(job.is_done()),
                }
            }
            _ = &mut deadline => {
                return Ok(job.is_done());
            }
        }
        if job.in_flight.is_empty() && queue.len().await == 0 && !job.is_done() {
            return Ok(false);
        }
    }
}
