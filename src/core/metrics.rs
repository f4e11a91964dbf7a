//! Component F (Peer Metrics Registry) — spec §4.F.
//!
//! Owned and mutated exclusively by the Scheduler (spec §3, §5); workers
//! only ever publish events, never touch this state directly.

use std::collections::HashMap;
use std::time::Instant;

/// EWMA smoothing factor. Chosen so that roughly the last 3 successful
/// chunks dominate the rolling average, as spec §4.F recommends.
const SPEED_EWMA_ALPHA: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct PeerState {
    pub rolling_bytes_per_sec: f64,
    pub consecutive_failures: u32,
    pub timeout_until: Option<Instant>,
    pub successful_chunks: u32,
    pub first_success: Option<Instant>,
    /// When this peer's rolling speed first dropped below the current
    /// min-acceptable-speed threshold, cleared the moment it recovers
    /// above it. Distinct from `first_success`: a peer that started slow
    /// and later sped up must not be judged by how long ago it first
    /// succeeded (I5, B-series slow-peer retirement).
    pub slow_since: Option<Instant>,
}

impl Default for PeerState {
    fn default() -> Self {
        Self {
            rolling_bytes_per_sec: 0.0,
            consecutive_failures: 0,
            timeout_until: None,
            successful_chunks: 0,
            first_success: None,
            slow_since: None,
        }
    }
}

impl PeerState {
    pub fn is_timed_out(&self, now: Instant) -> bool {
        self.timeout_until.map_or(false, |until| now < until)
    }
}

/// Per-job registry, keyed by peer identity (spec §4.F, §9 "no global
/// mutable state" — this is never a process-wide cache).
#[derive(Debug, Default)]
pub struct PeerMetricsRegistry {
    peers: HashMap<String, PeerState>,
}

impl PeerMetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&mut self, peer: &str) -> &mut PeerState {
        self.peers.entry(peer.to_string()).or_default()
    }

    pub fn get(&self, peer: &str) -> Option<&PeerState> {
        self.peers.get(peer)
    }

    /// A `ChunkOK` resets `consecutive_failures` to 0 and folds the
    /// observed rate into the rolling EWMA (I4).
    pub fn record_success(&mut self, peer: &str, bytes: u64, transfer_ms: u64, now: Instant) {
        let state = self.entry(peer);
        let rate = if transfer_ms == 0 {
            bytes as f64 * 1000.0
        } else {
            bytes as f64 / (transfer_ms as f64 / 1000.0)
        };
        state.rolling_bytes_per_sec = if state.successful_chunks == 0 {
            rate
        } else {
            SPEED_EWMA_ALPHA * rate + (1.0 - SPEED_EWMA_ALPHA) * state.rolling_bytes_per_sec
        };
        state.consecutive_failures = 0;
        state.successful_chunks += 1;
        state.first_success.get_or_insert(now);
    }

    /// A `ChunkFail` event increments `consecutive_failures`; never resets
    /// `successful_chunks` or the rolling speed.
    pub fn record_failure(&mut self, peer: &str) -> u32 {
        let state = self.entry(peer);
        state.consecutive_failures += 1;
        state.consecutive_failures
    }

    pub fn set_timeout_until(&mut self, peer: &str, until: Instant) {
        self.entry(peer).timeout_until = Some(until);
    }

    pub fn clear_timeout(&mut self, peer: &str) {
        self.entry(peer).timeout_until = None;
    }

    pub fn clear_all_timeouts(&mut self) {
        for state in self.peers.values_mut() {
            state.timeout_until = None;
        }
    }

    pub fn is_proven(&self, peer: &str) -> bool {
        self.peers
            .get(peer)
            .map_or(false, |s| s.successful_chunks >= 1)
    }

    /// `best-observed-speed`: the max rolling speed across all peers seen
    /// so far in the job (spec §4.I dynamic speed threshold).
    pub fn best_observed_speed(&self) -> f64 {
        self.peers
            .values()
            .map(|s| s.rolling_bytes_per_sec)
            .fold(0.0, f64::max)
    }

    /// `min-acceptable-speed = max(15% x best-observed-speed, floor)` (I5).
    pub fn min_acceptable_speed(&self, floor_bps: f64) -> f64 {
        (0.15 * self.best_observed_speed()).max(floor_bps)
    }

    pub fn successful_chunks(&self, peer: &str) -> u32 {
        self.peers.get(peer).map_or(0, |s| s.successful_chunks)
    }

    /// Updates `slow_since` for `peer` given whether it is currently below
    /// the speed threshold, and returns how long it has been continuously
    /// slow (`None` if it isn't slow right now).
    pub fn note_slow_check(&mut self, peer: &str, is_slow: bool, now: Instant) -> Option<std::time::Duration> {
        let state = self.entry(peer);
        if is_slow {
            let since = *state.slow_since.get_or_insert(now);
            Some(now.duration_since(since))
        } else {
            state.slow_since = None;
            None
        }
    }
}
