//! Component C (Prefix Digester) — spec §4.C.

use crate::core::model::SourceRef;
use crate::core::transport::{ChunkSink, TransportAdapter, TransportError};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Downloads exactly the first `prefix_len` bytes of `source` and returns a
/// hex SHA-256 digest over those raw bytes. Uses components A and B
/// internally; the caller (component D) is responsible for enforcing a
/// per-source timeout around this call.
pub async fn digest_prefix(
    transport: &dyn TransportAdapter,
    source: &SourceRef,
    prefix_len: usize,
    cancel: CancellationToken,
) -> Result<String, TransportError> {
    let tmp_path = std::env::temp_dir().join(format!("swarmget-prefix-{}.part", Uuid::new_v4()));
    let file = tokio::fs::File::create(&tmp_path)
        .await
        .map_err(|e| TransportError::Other(e.to_string()))?;
    let mut sink = ChunkSink::new(file, prefix_len as u64);

    let download_result = transport
        .download(&source.peer_id, &source.remote_path, 0, &mut sink, cancel)
        .await;
    let bytes_written = sink.written();
    drop(sink);

    let read_result = tokio::fs::read(&tmp_path).await;
    let _ = tokio::fs::remove_file(&tmp_path).await;

    download_result?;
    let bytes = read_result.map_err(|e| TransportError::Other(e.to_string()))?;
    if bytes.len() as u64 != bytes_written {
        return Err(TransportError::Other(
            "short read while digesting prefix".into(),
        ));
    }

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}
