//! The single public entry point (spec.md §5/§6): verify → plan → run the
//! Scheduler → assemble, returning a `DownloadOutcome` or a fatal
//! `SwarmError`. Mirrors the shape of the teacher's `commands::app`
//! orchestration entry point over its `core` modules, minus any GUI/IPC
//! surface.

use crate::core::config::DownloadRequest;
use crate::core::oracle::HashOracle;
use crate::core::scheduler::{run_scheduler, DownloadOutcome};
use crate::core::transport::TransportAdapter;
use crate::core::verification::{build_verified_pool, skip_verification_pool};
use crate::utils::error::Result;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A running job. Dropping this without calling `cancel()` does not stop
/// the job — only `cancel()` or natural completion does.
pub struct JobHandle {
    cancel: CancellationToken,
    join: JoinHandle<Result<DownloadOutcome>>,
}

impl JobHandle {
    /// Requests cancellation (spec §7 `Cancelled`). The job observes this
    /// at its next chunk-attempt boundary and unwinds cleanly; it does not
    /// interrupt an in-flight `download()` call immediately.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn join(self) -> std::result::Result<Result<DownloadOutcome>, tokio::task::JoinError> {
        self.join.await
    }
}

/// Runs one download to completion, driving it inline on the caller's task.
/// Use [`spawn_download`] instead if the caller needs to cancel a job that
/// is still in progress.
///
/// When `oracle` is given, its content key is `request.target_filename`:
/// before verification, a prior published digest (if any) is looked up so a
/// mismatch against this run's verified digest can be surfaced on the
/// returned `DownloadOutcome`; after a successful job, this run's digest is
/// published back, best-effort, so later lookups see it.
pub async fn run_download(
    request: DownloadRequest,
    transport: Arc<dyn TransportAdapter>,
    oracle: Option<Arc<dyn HashOracle>>,
) -> Result<DownloadOutcome> {
    request.validate()?;

    let content_key = request.target_filename.clone();
    let known_digest = match &oracle {
        Some(oracle) => oracle.lookup(&content_key).await,
        None => None,
    };

    let outcome = if request.skip_verification {
        skip_verification_pool(&request)
    } else {
        build_verified_pool(transport.clone(), &request).await?
    };

    info!(
        job = %request.target_filename,
        verified_sources = outcome.verified.len(),
        digest = %outcome.digest,
        "verification pool built"
    );

    // `skip_verification` mode never produces a trustworthy digest, so it
    // can never disagree with the Oracle (spec §6.2: mismatch detection is
    // only meaningful against a verified digest).
    let oracle_mismatch = known_digest.filter(|known| {
        !request.skip_verification && *known != outcome.digest
    });
    if let Some(known) = &oracle_mismatch {
        warn!(
            job = %request.target_filename,
            oracle_digest = %known,
            verified_digest = %outcome.digest,
            "hash oracle digest mismatch"
        );
    }

    let verified_digest = outcome.digest.clone();
    let result = run_scheduler(&request, outcome.verified, outcome.digest, transport).await;

    if let (Ok(_), Some(oracle)) = (&result, &oracle) {
        let oracle = oracle.clone();
        tokio::spawn(async move {
            oracle.publish(&content_key, &verified_digest).await;
        });
    }

    result.map(|scheduled| DownloadOutcome { oracle_mismatch, ..scheduled })
}

/// Same as [`run_download`], but spawned on its own task and returned as a
/// [`JobHandle`] so the caller can cancel it mid-flight (spec §5 "caller
/// cancellation").
pub fn spawn_download(
    request: DownloadRequest,
    transport: Arc<dyn TransportAdapter>,
    oracle: Option<Arc<dyn HashOracle>>,
) -> JobHandle {
    let cancel = CancellationToken::new();
    let task_cancel = cancel.clone();

    let join = tokio::spawn(async move {
        if task_cancel.is_cancelled() {
            return Err(crate::utils::error::SwarmError::Cancelled);
        }

        tokio::select! {
            result = run_download(request, transport, oracle) => result,
            _ = task_cancel.cancelled() => Err(crate::utils::error::SwarmError::Cancelled),
        }
    });

    JobHandle { cancel, join }
}
