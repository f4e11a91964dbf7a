//! Component A (Transport Adapter) and component B (Chunk Sink) — spec §4.A/§4.B.
//!
//! The engine never speaks the host file-sharing protocol itself; it only
//! depends on this trait. `libp2p_transport` ships one concrete
//! implementation as the default/reference adapter.

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

/// Transport-level failures (spec §4.A). `PeerRejected` on a non-zero
/// start offset is the signal the Worker uses to retire a peer that does
/// not support ranged reads.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("peer rejected the request")]
    PeerRejected,
    #[error("peer unreachable")]
    PeerOffline,
    #[error("timed out waiting for progress")]
    Timeout,
    #[error("cancelled")]
    Cancelled,
    #[error("transport error: {0}")]
    Other(String),
}

/// What the Transport Adapter reports back on success.
#[derive(Debug, Clone, Copy)]
pub struct TransferReport {
    pub bytes_written: u64,
    pub ttfb_ms: u64,
}

/// `Download(peer, remote-path, start-offset, sink, ctx) -> {bytes-written, ttfb, error}`.
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    async fn download(
        &self,
        peer: &str,
        remote_path: &str,
        start_offset: u64,
        sink: &mut ChunkSink,
        cancel: CancellationToken,
    ) -> Result<TransferReport, TransportError>;
}

/// Whether the sink wants more bytes or has what it needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkOutcome {
    Continue,
    Done,
}

/// Component B. Wraps a destination file opened for write and a target
/// byte length; accepts at most that many bytes, discards the rest, and
/// tells the caller (the Transport Adapter) once it is satisfied so the
/// adapter can cancel the upstream transfer at the wire.
pub struct ChunkSink {
    file: tokio::fs::File,
    remaining: u64,
    written: u64,
}

impl ChunkSink {
    pub fn new(file: tokio::fs::File, length: u64) -> Self {
        Self {
            file,
            remaining: length,
            written: 0,
        }
    }

    /// Accepts up to `self.remaining` bytes of `data`, in order. Bytes past
    /// the target length are silently discarded, matching hosts that will
    /// not honor an out-of-band byte-length but will happily stream the
    /// whole file.
    pub async fn accept(&mut self, data: &[u8]) -> std::io::Result<SinkOutcome> {
        if self.remaining == 0 {
            return Ok(SinkOutcome::Done);
        }
        let take = (data.len() as u64).min(self.remaining) as usize;
        self.file.write_all(&data[..take]).await?;
        self.written += take as u64;
        self.remaining -= take as u64;
        if self.remaining == 0 {
            self.file.flush().await?;
            Ok(SinkOutcome::Done)
        } else {
            Ok(SinkOutcome::Continue)
        }
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn is_done(&self) -> bool {
        self.remaining == 0
    }
}
