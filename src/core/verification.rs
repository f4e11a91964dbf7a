//! Component D (Verification Pool Builder) — spec §4.D.
//!
//! Two files can share a size but differ in bytes (different masters,
//! re-encodes, tag layouts). Mixing chunks across differing byte streams
//! produces undetectable corruption at chunk boundaries, so every source is
//! digested on its first `verification_prefix_bytes` before any chunk
//! scheduling begins.

use crate::core::config::DownloadRequest;
use crate::core::model::{Candidate, VerifiedSource};
use crate::core::transport::TransportAdapter;
use crate::utils::error::SwarmError;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub struct VerificationOutcome {
    pub verified: Vec<VerifiedSource>,
    pub digest: String,
}

/// Digests every candidate (bounded by `request.verification_parallelism`,
/// each capped at `request.verification_timeout`), groups by digest, and
/// returns the largest group. Individual digest failures are logged and
/// the candidate dropped; only a total failure to form any group of at
/// least `min_verified_group_size` is fatal.
pub async fn build_verified_pool(
    transport: Arc<dyn TransportAdapter>,
    request: &DownloadRequest,
) -> Result<VerificationOutcome, SwarmError> {
    let semaphore = Arc::new(Semaphore::new(request.verification_parallelism.max(1)));
    let prefix_len = request.verification_prefix_bytes;
    let timeout = request.verification_timeout;

    let digest_tasks = request.sources.iter().map(|candidate: &Candidate| {
        let semaphore = semaphore.clone();
        let transport = transport.clone();
        let source = candidate.source.clone();
        async move {
            let _permit = semaphore
                .acquire()
                .await
                .expect("verification semaphore never closed");
            let cancel = CancellationToken::new();
            let digest_future =
                crate::core::digest::digest_prefix(transport.as_ref(), &source, prefix_len, cancel.clone());
            match tokio::time::timeout(timeout, digest_future).await {
                Ok(Ok(digest)) => Some((source, digest)),
                Ok(Err(e)) => {
                    warn!(peer = %source.peer_id, error = %e, "prefix digest failed, dropping candidate");
                    None
                }
                Err(_) => {
                    cancel.cancel();
                    warn!(peer = %source.peer_id, "prefix digest timed out, dropping candidate");
                    None
                }
            }
        }
    });

    // join_all preserves input order even though permits bound concurrency,
    // which keeps group formation deterministic (R2) regardless of which
    // digest happens to finish first.
    let results = futures::future::join_all(digest_tasks).await;

    let mut groups: Vec<(String, Vec<VerifiedSource>)> = Vec::new();
    let now = Utc::now();
    for entry in results.into_iter().flatten() {
        let (source, digest) = entry;
        let verified = VerifiedSource {
            source,
            prefix_digest: digest.clone(),
            observed_at: now,
        };
        if let Some((_, members)) = groups.iter_mut().find(|(d, _)| *d == digest) {
            members.push(verified);
        } else {
            groups.push((digest, vec![verified]));
        }
    }

    let mut best_index: Option<usize> = None;
    for (i, (_, members)) in groups.iter().enumerate() {
        let is_better = match best_index {
            None => true,
            Some(b) => members.len() > groups[b].1.len(),
        };
        if is_better {
            best_index = Some(i);
        }
    }

    let largest = best_index.map(|i| groups[i].1.len()).unwrap_or(0);
    if largest < request.min_verified_group_size {
        return Err(SwarmError::InsufficientVerifiedSources {
            candidates: request.sources.len(),
            largest,
        });
    }

    let (digest, verified) = groups.swap_remove(best_index.unwrap());
    Ok(VerificationOutcome { verified, digest })
}

/// Treats every candidate as verified without digesting anything
/// (`skip_verification = true`). Unsafe: if candidates with the same
/// advertised size actually differ in bytes, chunks from different files
/// will be interleaved into one corrupted output (spec §8 S6).
pub fn skip_verification_pool(request: &DownloadRequest) -> VerificationOutcome {
    let now = Utc::now();
    let verified = request
        .sources
        .iter()
        .map(|c| VerifiedSource {
            source: c.source.clone(),
            prefix_digest: "unverified".to_string(),
            observed_at: now,
        })
        .collect();
    VerificationOutcome {
        verified,
        digest: "unverified".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::Candidate;
    use crate::core::transport::{ChunkSink, TransferReport, TransportError};
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct PerPeerContentTransport {
        content_by_peer: HashMap<String, Vec<u8>>,
    }

    #[async_trait]
    impl TransportAdapter for PerPeerContentTransport {
        async fn download(
            &self,
            peer: &str,
            _remote_path: &str,
            _start_offset: u64,
            sink: &mut ChunkSink,
            _cancel: CancellationToken,
        ) -> Result<TransferReport, TransportError> {
            let content = self
                .content_by_peer
                .get(peer)
                .ok_or(TransportError::PeerOffline)?;
            let _ = sink.accept(content).await;
            Ok(TransferReport {
                bytes_written: sink.written(),
                ttfb_ms: 1,
            })
        }
    }

    fn candidate(peer: &str) -> Candidate {
        Candidate {
            source: crate::core::model::SourceRef::new(peer, "/a.flac"),
            advertised_size: 1_000_000,
        }
    }

    #[tokio::test]
    async fn imposter_is_filtered_by_prefix_mismatch() {
        let mut content_by_peer = HashMap::new();
        content_by_peer.insert("peer-a".to_string(), vec![1u8; 64 * 1024]);
        content_by_peer.insert("peer-b".to_string(), vec![1u8; 64 * 1024]);
        content_by_peer.insert("peer-c".to_string(), vec![2u8; 64 * 1024]);
        let transport: Arc<dyn TransportAdapter> =
            Arc::new(PerPeerContentTransport { content_by_peer });

        let mut request = DownloadRequest::new(
            "a.flac",
            std::path::PathBuf::from("/tmp/a.flac"),
            1_000_000,
            vec![candidate("peer-a"), candidate("peer-b"), candidate("peer-c")],
        );
        request.verification_prefix_bytes = 1024;

        let outcome = build_verified_pool(transport, &request).await.unwrap();
        assert_eq!(outcome.verified.len(), 2);
        let peers: Vec<_> = outcome.verified.iter().map(|v| v.source.peer_id.clone()).collect();
        assert!(peers.contains(&"peer-a".to_string()));
        assert!(peers.contains(&"peer-b".to_string()));
        assert!(!peers.contains(&"peer-c".to_string()));
    }

    #[tokio::test]
    async fn total_failure_is_insufficient_verified_sources() {
        let transport: Arc<dyn TransportAdapter> = Arc::new(PerPeerContentTransport {
            content_by_peer: HashMap::new(),
        });
        let request = DownloadRequest::new(
            "a.flac",
            std::path::PathBuf::from("/tmp/a.flac"),
            1_000_000,
            vec![candidate("peer-a")],
        );
        let err = build_verified_pool(transport, &request).await.unwrap_err();
        assert!(matches!(err, SwarmError::InsufficientVerifiedSources { .. }));
    }
}
