//! Crate-level integration tests exercising the end-to-end scenarios of
//! spec.md §8, driven through the public `swarmget::run_download` entry
//! point with hand-written `TransportAdapter` fakes.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use swarmget::core::transport::{ChunkSink, SinkOutcome, TransferReport, TransportAdapter, TransportError};
use swarmget::core::{Candidate, HashOracle, SourceRef};
use swarmget::{run_download, DownloadRequest, SwarmError};

/// Every peer serves identical bytes from one shared buffer, optionally
/// failing or throttling per peer. Good enough to drive every scenario
/// below without standing up a real network.
struct FakeSwarm {
    content_by_peer: StdMutex<HashMap<String, Vec<u8>>>,
    speed_bps: StdMutex<HashMap<String, f64>>,
    fail_always: StdMutex<std::collections::HashSet<String>>,
    attempts: StdMutex<HashMap<String, u32>>,
}

impl FakeSwarm {
    fn new() -> Self {
        Self {
            content_by_peer: StdMutex::new(HashMap::new()),
            speed_bps: StdMutex::new(HashMap::new()),
            fail_always: StdMutex::new(std::collections::HashSet::new()),
            attempts: StdMutex::new(HashMap::new()),
        }
    }

    fn with_content(self, peer: &str, content: Vec<u8>) -> Self {
        self.content_by_peer.lock().unwrap().insert(peer.to_string(), content);
        self
    }

    fn with_speed(self, peer: &str, bytes_per_sec: f64) -> Self {
        self.speed_bps.lock().unwrap().insert(peer.to_string(), bytes_per_sec);
        self
    }

    fn attempts_for(&self, peer: &str) -> u32 {
        *self.attempts.lock().unwrap().get(peer).unwrap_or(&0)
    }
}

#[async_trait]
impl TransportAdapter for FakeSwarm {
    async fn download(
        &self,
        peer: &str,
        _remote_path: &str,
        start_offset: u64,
        sink: &mut ChunkSink,
        _cancel: tokio_util::sync::CancellationToken,
    ) -> Result<TransferReport, TransportError> {
        *self.attempts.lock().unwrap().entry(peer.to_string()).or_insert(0) += 1;

        if self.fail_always.lock().unwrap().contains(peer) {
            return Err(TransportError::PeerOffline);
        }

        let content = self
            .content_by_peer
            .lock()
            .unwrap()
            .get(peer)
            .cloned()
            .ok_or(TransportError::PeerOffline)?;
        let start = start_offset as usize;
        if start > content.len() {
            return Err(TransportError::Other("offset beyond EOF".into()));
        }

        let speed = *self.speed_bps.lock().unwrap().get(peer).unwrap_or(&(4.0 * 1024.0 * 1024.0));
        let outcome = sink
            .accept(&content[start..])
            .await
            .map_err(|e| TransportError::Other(e.to_string()))?;
        let bytes_sent = sink.written();
        let duration_secs = bytes_sent as f64 / speed.max(1.0);
        tokio::time::sleep(std::time::Duration::from_secs_f64(duration_secs)).await;
        debug_assert_eq!(outcome, SinkOutcome::Done);

        Ok(TransferReport {
            bytes_written: bytes_sent,
            ttfb_ms: 1,
        })
    }
}

fn candidate(peer: &str, size: u64) -> Candidate {
    Candidate {
        source: SourceRef::new(peer, "/album/track.flac"),
        advertised_size: size,
    }
}

fn small_request(name: &str, dir: &tempfile::TempDir, total_size: u64, chunk_size: u64, sources: Vec<Candidate>) -> DownloadRequest {
    let mut request = DownloadRequest::new(name, dir.path().join(name), total_size, sources);
    request.chunk_size = chunk_size;
    request
}

// S1
#[tokio::test]
async fn happy_path_four_sources_serve_one_chunk_each() {
    let dir = tempfile::tempdir().unwrap();
    let total_size = 2_097_152u64;
    let chunk_size = 524_288u64;
    let content = vec![0x5Au8; total_size as usize];

    let transport: Arc<dyn TransportAdapter> = Arc::new(
        FakeSwarm::new()
            .with_content("p1", content.clone())
            .with_content("p2", content.clone())
            .with_content("p3", content.clone())
            .with_content("p4", content),
    );

    let request = small_request(
        "album.flac",
        &dir,
        total_size,
        chunk_size,
        vec![
            candidate("p1", total_size),
            candidate("p2", total_size),
            candidate("p3", total_size),
            candidate("p4", total_size),
        ],
    );

    let outcome = run_download(request, transport, None).await.unwrap();
    assert_eq!(outcome.total_bytes, total_size);
    assert_eq!(outcome.chunks_per_source.values().sum::<u32>(), 4);
    let written = tokio::fs::metadata(&outcome.output_path).await.unwrap().len();
    assert_eq!(written, total_size);
}

// S2
#[tokio::test]
async fn imposter_source_is_filtered_and_never_spawned() {
    let dir = tempfile::tempdir().unwrap();
    let total_size = 1_000_000u64;
    let genuine = vec![0x11u8; total_size as usize];
    let mut imposter = genuine.clone();
    imposter[0] = 0xFF; // differs within the verification prefix

    let transport = Arc::new(
        FakeSwarm::new()
            .with_content("peer-a", genuine.clone())
            .with_content("peer-b", genuine)
            .with_content("peer-c", imposter),
    );

    let mut request = small_request(
        "song.flac",
        &dir,
        total_size,
        262_144,
        vec![
            candidate("peer-a", total_size),
            candidate("peer-b", total_size),
            candidate("peer-c", total_size),
        ],
    );
    request.verification_prefix_bytes = 4096;

    let transport_dyn: Arc<dyn TransportAdapter> = transport.clone();
    let outcome = run_download(request, transport_dyn, None).await.unwrap();

    assert!(!outcome.chunks_per_source.contains_key("peer-c"));
    assert_eq!(transport.attempts_for("peer-c"), 0, "imposter's worker must never be spawned");
    assert_eq!(outcome.total_bytes, total_size);
}

// S4
#[tokio::test]
async fn retry_round_recovers_chunks_after_transient_failures() {
    let dir = tempfile::tempdir().unwrap();
    let total_size = 10 * 131_072u64;
    let chunk_size = 131_072u64;
    let content = vec![0x22u8; total_size as usize];

    let transport = Arc::new(
        FakeSwarm::new()
            .with_content("p1", content.clone())
            .with_content("p2", content.clone())
            .with_content("p3", content.clone())
            .with_content("p4", content.clone())
            .with_content("p5", content),
    );
    // p4 and p5 each succeed once, then fail for the rest of the job —
    // simulated by capping their total successful attempts at 1 via a
    // thin wrapper that flips to PeerOffline after the first call.
    let transport: Arc<dyn TransportAdapter> = Arc::new(FlakyAfterFirstSuccess::new(transport, vec!["p4", "p5"]));

    let mut request = small_request(
        "multi.flac",
        &dir,
        total_size,
        chunk_size,
        vec![
            candidate("p1", total_size),
            candidate("p2", total_size),
            candidate("p3", total_size),
            candidate("p4", total_size),
            candidate("p5", total_size),
        ],
    );
    request.max_consecutive_failures = 0;

    let outcome = run_download(request, transport, None).await.unwrap();
    assert_eq!(outcome.total_bytes, total_size);
    assert_eq!(outcome.chunks_per_source.values().sum::<u32>(), 10);
}

struct FlakyAfterFirstSuccess {
    inner: Arc<dyn TransportAdapter>,
    flaky_peers: std::collections::HashSet<String>,
    succeeded_once: StdMutex<std::collections::HashSet<String>>,
}

impl FlakyAfterFirstSuccess {
    fn new(inner: Arc<dyn TransportAdapter>, flaky: Vec<&str>) -> Self {
        Self {
            inner,
            flaky_peers: flaky.into_iter().map(|s| s.to_string()).collect(),
            succeeded_once: StdMutex::new(std::collections::HashSet::new()),
        }
    }
}

#[async_trait]
impl TransportAdapter for FlakyAfterFirstSuccess {
    async fn download(
        &self,
        peer: &str,
        remote_path: &str,
        start_offset: u64,
        sink: &mut ChunkSink,
        cancel: tokio_util::sync::CancellationToken,
    ) -> Result<TransferReport, TransportError> {
        if self.flaky_peers.contains(peer) && self.succeeded_once.lock().unwrap().contains(peer) {
            return Err(TransportError::PeerOffline);
        }
        let result = self.inner.download(peer, remote_path, start_offset, sink, cancel).await;
        if result.is_ok() && self.flaky_peers.contains(peer) {
            self.succeeded_once.lock().unwrap().insert(peer.to_string());
        }
        result
    }
}

// S6
#[tokio::test]
async fn skip_verification_lets_mismatched_sources_through() {
    let dir = tempfile::tempdir().unwrap();
    let total_size = 262_144u64;
    let content_a = vec![0xAAu8; total_size as usize];
    let content_b = vec![0xBBu8; total_size as usize];

    let transport: Arc<dyn TransportAdapter> = Arc::new(
        FakeSwarm::new()
            .with_content("peer-a", content_a.clone())
            .with_content("peer-b", content_b),
    );

    let mut request = small_request(
        "mismatched.bin",
        &dir,
        total_size,
        131_072,
        vec![candidate("peer-a", total_size), candidate("peer-b", total_size)],
    );
    request.skip_verification = true;

    // No fatal error — this is the point of S6: the engine trusts the
    // caller's opt-in and produces output even though bytes may be mixed
    // from two different underlying files.
    let outcome = run_download(request, transport, None).await.unwrap();
    assert_eq!(outcome.total_bytes, total_size);
    assert_eq!(outcome.verified_digest, "unverified");
}

#[tokio::test]
async fn zero_candidates_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let transport: Arc<dyn TransportAdapter> = Arc::new(FakeSwarm::new());
    let request = small_request("x.bin", &dir, 100, 50, vec![]);
    let err = run_download(request, transport, None).await.unwrap_err();
    assert!(matches!(err, SwarmError::InvalidConfig { .. }));
}

/// An in-memory `HashOracle`, independent of `oracle.rs`'s own test double,
/// so this test exercises the contract rather than sharing an
/// implementation with the unit-test suite.
struct RecordingOracle {
    index: StdMutex<HashMap<String, String>>,
}

impl RecordingOracle {
    fn new() -> Self {
        Self { index: StdMutex::new(HashMap::new()) }
    }

    fn seed(&self, content_key: &str, digest: &str) {
        self.index.lock().unwrap().insert(content_key.to_string(), digest.to_string());
    }

    fn published_digest(&self, content_key: &str) -> Option<String> {
        self.index.lock().unwrap().get(content_key).cloned()
    }
}

#[async_trait]
impl HashOracle for RecordingOracle {
    async fn lookup(&self, content_key: &str) -> Option<String> {
        self.index.lock().unwrap().get(content_key).cloned()
    }

    async fn publish(&self, content_key: &str, digest: &str) {
        self.index.lock().unwrap().insert(content_key.to_string(), digest.to_string());
    }
}

#[tokio::test]
async fn oracle_lookup_disagreeing_with_the_verified_digest_is_reported_as_a_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let total_size = 65_536u64;
    let content = vec![0x33u8; total_size as usize];

    let transport: Arc<dyn TransportAdapter> = Arc::new(FakeSwarm::new().with_content("p1", content));
    let request = small_request("track.flac", &dir, total_size, 65_536, vec![candidate("p1", total_size)]);

    let oracle = Arc::new(RecordingOracle::new());
    oracle.seed("track.flac", "stale-digest-from-a-previous-publisher");
    let oracle_dyn: Arc<dyn HashOracle> = oracle;

    let outcome = run_download(request, transport, Some(oracle_dyn)).await.unwrap();
    assert_eq!(
        outcome.oracle_mismatch.as_deref(),
        Some("stale-digest-from-a-previous-publisher")
    );
}

#[tokio::test]
async fn successful_job_publishes_its_verified_digest_to_the_oracle() {
    let dir = tempfile::tempdir().unwrap();
    let total_size = 65_536u64;
    let content = vec![0x44u8; total_size as usize];

    let transport: Arc<dyn TransportAdapter> = Arc::new(FakeSwarm::new().with_content("p1", content));
    let request = small_request("rescue.flac", &dir, total_size, 65_536, vec![candidate("p1", total_size)]);

    let oracle = Arc::new(RecordingOracle::new());
    let oracle_dyn: Arc<dyn HashOracle> = oracle.clone();

    let outcome = run_download(request, transport, Some(oracle_dyn)).await.unwrap();
    assert!(outcome.oracle_mismatch.is_none(), "no prior digest was seeded, so there is nothing to disagree with");

    // Publishing happens on a spawned task; give it a moment to land.
    for _ in 0..50 {
        if oracle.published_digest("rescue.flac").is_some() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(oracle.published_digest("rescue.flac"), Some(outcome.verified_digest));
}
