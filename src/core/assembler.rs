//! Component J (Assembler) — spec §4.J.
//!
//! Runs once, after every chunk has a `ChunkResult`. Appends each chunk's
//! temp file to the target file in index order, fsyncs, and only then
//! removes the temp files. A failure partway through deletes the
//! partially-written target file and every temp file already consumed, so
//! no defective output or dangling temp file survives a failed assembly.

use crate::core::model::{Chunk, ChunkResult};
use crate::utils::error::{Result, SwarmError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Appends `completed[0..chunks.len()]` to `target_path` in chunk-index
/// order and removes their temp files on success. Sequential, not
/// parallel: spec §4.J requires a single well-ordered pass so a partial
/// write never interleaves bytes from two chunks.
pub async fn assemble(
    chunks: &[Chunk],
    completed: &HashMap<usize, ChunkResult>,
    target_path: &Path,
) -> Result<PathBuf> {
    if completed.len() != chunks.len() {
        return Err(SwarmError::assembly_io(format!(
            "refusing to assemble: {} of {} chunks present",
            completed.len(),
            chunks.len()
        )));
    }

    if let Some(parent) = target_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| SwarmError::assembly_io(format!("failed to create output dir: {e}")))?;
    }

    let mut out = tokio::fs::File::create(target_path)
        .await
        .map_err(|e| SwarmError::assembly_io(format!("failed to create output file: {e}")))?;

    let mut consumed_temp_paths = Vec::with_capacity(chunks.len());
    let result = append_chunks(&mut out, chunks, completed, &mut consumed_temp_paths).await;

    if let Err(e) = result {
        drop(out);
        let _ = tokio::fs::remove_file(target_path).await;
        for temp_path in consumed_temp_paths {
            let _ = tokio::fs::remove_file(temp_path).await;
        }
        return Err(e);
    }

    for temp_path in consumed_temp_paths {
        let _ = tokio::fs::remove_file(temp_path).await;
    }

    Ok(target_path.to_path_buf())
}

/// Appends every chunk's bytes to `out` in index order, fsyncing once at
/// the end. Tracks which temp files it already consumed in
/// `consumed_temp_paths` so the caller can clean those up too if a later
/// chunk fails partway through.
async fn append_chunks(
    out: &mut tokio::fs::File,
    chunks: &[Chunk],
    completed: &HashMap<usize, ChunkResult>,
    consumed_temp_paths: &mut Vec<PathBuf>,
) -> Result<()> {
    for chunk in chunks {
        let result = completed.get(&chunk.index).ok_or_else(|| {
            SwarmError::assembly_io(format!("missing chunk {} during assembly", chunk.index))
        })?;

        let mut buf = Vec::with_capacity(chunk.length as usize);
        let mut temp_file = tokio::fs::File::open(&result.temp_path)
            .await
            .map_err(|e| {
                SwarmError::assembly_io(format!(
                    "failed to open temp file for chunk {}: {e}",
                    chunk.index
                ))
            })?;
        temp_file.read_to_end(&mut buf).await.map_err(|e| {
            SwarmError::assembly_io(format!("failed to read chunk {}: {e}", chunk.index))
        })?;

        if buf.len() as u64 != chunk.length {
            return Err(SwarmError::assembly_io(format!(
                "chunk {} has {} bytes, expected {}",
                chunk.index,
                buf.len(),
                chunk.length
            )));
        }

        out.write_all(&buf)
            .await
            .map_err(|e| SwarmError::assembly_io(format!("failed to append chunk {}: {e}", chunk.index)))?;
        consumed_temp_paths.push(result.temp_path.clone());
    }

    out.flush()
        .await
        .map_err(|e| SwarmError::assembly_io(format!("failed to flush output file: {e}")))?;
    out.sync_all()
        .await
        .map_err(|e| SwarmError::assembly_io(format!("failed to fsync output file: {e}")))?;

    Ok(())
}
