//! Component H (Worker) — spec §4.H.
//!
//! One worker per active source. Never touches `PeerState` directly and
//! never mutates the final target file; it only ever writes to its own
//! uniquely-named temp file and reports outcomes to the Scheduler over
//! `events_tx`.

use crate::core::model::{Chunk, SourceRef};
use crate::core::queue::WorkQueue;
use crate::core::transport::{ChunkSink, TransportAdapter, TransportError};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug)]
pub enum WorkerEvent {
    ChunkStarted {
        index: usize,
        peer: String,
    },
    ChunkOk {
        index: usize,
        temp_path: PathBuf,
        peer: String,
        bytes: u64,
        ttfb_ms: u64,
        transfer_ms: u64,
    },
    ChunkFail {
        index: usize,
        peer: String,
        reason: String,
    },
    PeerDoesNotSupportRanged {
        peer: String,
    },
    WorkerExited {
        peer: String,
    },
}

pub struct WorkerHandle {
    pub cancel: CancellationToken,
    pub join: JoinHandle<()>,
}

#[allow(clippy::too_many_arguments)]
pub fn spawn_worker(
    source: SourceRef,
    transport: Arc<dyn TransportAdapter>,
    queue: Arc<WorkQueue>,
    chunks: Arc<Vec<Chunk>>,
    tmp_dir: PathBuf,
    per_chunk_timeout: Duration,
    max_consecutive_failures: u32,
    events_tx: mpsc::UnboundedSender<WorkerEvent>,
) -> WorkerHandle {
    let worker_cancel = CancellationToken::new();
    let task_cancel = worker_cancel.clone();

    let join = tokio::spawn(async move {
        let peer = source.peer_id.clone();
        let mut consecutive_failures = 0u32;

        loop {
            if task_cancel.is_cancelled() {
                break;
            }
            let index = match queue.pop().await {
                Some(index) => index,
                None => break,
            };
            if task_cancel.is_cancelled() {
                queue.push_back(index).await;
                break;
            }
            let _ = events_tx.send(WorkerEvent::ChunkStarted {
                index,
                peer: peer.clone(),
            });

            let chunk = chunks[index];
            let temp_path = tmp_dir.join(format!("chunk-{}-{}.part", index, Uuid::new_v4()));
            let file = match tokio::fs::File::create(&temp_path).await {
                Ok(file) => file,
                Err(e) => {
                    queue.push_back(index).await;
                    let _ = events_tx.send(WorkerEvent::ChunkFail {
                        index,
                        peer: peer.clone(),
                        reason: format!("failed to create temp file: {e}"),
                    });
                    consecutive_failures += 1;
                    if consecutive_failures > max_consecutive_failures {
                        break;
                    }
                    continue;
                }
            };
            let mut sink = ChunkSink::new(file, chunk.length);

            let attempt_cancel = task_cancel.child_token();
            let timer_cancel = attempt_cancel.clone();
            let timer = tokio::spawn(async move {
                tokio::time::sleep(per_chunk_timeout).await;
                timer_cancel.cancel();
            });

            let start = Instant::now();
            let result = transport
                .download(
                    &source.peer_id,
                    &source.remote_path,
                    chunk.offset,
                    &mut sink,
                    attempt_cancel,
                )
                .await;
            timer.abort();

            if task_cancel.is_cancelled() {
                let _ = tokio::fs::remove_file(&temp_path).await;
                queue.push_back(index).await;
                break;
            }

            match result {
                Ok(report) => {
                    let transfer_ms = start.elapsed().as_millis() as u64;
                    consecutive_failures = 0;
                    let _ = events_tx.send(WorkerEvent::ChunkOk {
                        index,
                        temp_path,
                        peer: peer.clone(),
                        bytes: report.bytes_written,
                        ttfb_ms: report.ttfb_ms,
                        transfer_ms,
                    });
                }
                Err(TransportError::PeerRejected) if chunk.offset > 0 => {
                    let _ = tokio::fs::remove_file(&temp_path).await;
                    queue.push_back(index).await;
                    let _ = events_tx.send(WorkerEvent::PeerDoesNotSupportRanged { peer: peer.clone() });
                    break;
                }
                Err(e) => {
                    let _ = tokio::fs::remove_file(&temp_path).await;
                    queue.push_back(index).await;
                    let _ = events_tx.send(WorkerEvent::ChunkFail {
                        index,
                        peer: peer.clone(),
                        reason: e.to_string(),
                    });
                    consecutive_failures += 1;
                    if consecutive_failures > max_consecutive_failures {
                        break;
                    }
                }
            }
        }

        let _ = events_tx.send(WorkerEvent::WorkerExited { peer });
    });

    WorkerHandle {
        cancel: worker_cancel,
        join,
    }
}
