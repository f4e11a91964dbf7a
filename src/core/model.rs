//! Value types shared across the engine (spec §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// `{peer-identity, remote-path}`. Immutable; created by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRef {
    pub peer_id: String,
    pub remote_path: String,
}

impl SourceRef {
    pub fn new(peer_id: impl Into<String>, remote_path: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            remote_path: remote_path.into(),
        }
    }
}

impl std::fmt::Display for SourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.peer_id, self.remote_path)
    }
}

/// A candidate source, as supplied by the caller. `advertised_size` is a
/// grouping hint only — the job's configured `total_size` is authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub source: SourceRef,
    pub advertised_size: u64,
}

/// Produced by the Verification Pool Builder (component D). Invariant: all
/// `VerifiedSource`s in one job share the same `prefix_digest`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifiedSource {
    pub source: SourceRef,
    pub prefix_digest: String,
    pub observed_at: DateTime<Utc>,
}

/// `{index, offset, length}` with `offset = index * chunk_size` and
/// `length = min(chunk_size, total_size - offset)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub index: usize,
    pub offset: u64,
    pub length: u64,
}

/// Produced once per successfully downloaded chunk. Owned by the Scheduler;
/// consumed by the Assembler or discarded if it loses a speculative race.
#[derive(Debug, Clone)]
pub struct ChunkResult {
    pub index: usize,
    pub temp_path: PathBuf,
    pub served_by: SourceRef,
    pub bytes: u64,
    pub ttfb_ms: u64,
    pub transfer_ms: u64,
}
