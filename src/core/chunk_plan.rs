//! Component E (Chunk Plan) — spec §4.E. Pure; no I/O.

use crate::core::model::Chunk;

/// Partitions `[0, total_size)` into `ceil(total_size / chunk_size)`
/// contiguous chunks. The final chunk may be shorter than `chunk_size`.
pub fn plan_chunks(total_size: u64, chunk_size: u64) -> Vec<Chunk> {
    assert!(total_size > 0, "total_size must be positive");
    assert!(chunk_size > 0, "chunk_size must be positive");

    let count = total_size.div_ceil(chunk_size) as usize;
    let mut chunks = Vec::with_capacity(count);
    for index in 0..count {
        let offset = index as u64 * chunk_size;
        let length = chunk_size.min(total_size - offset);
        chunks.push(Chunk { index, offset, length });
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partitions_contiguously_with_no_gaps() {
        let chunks = plan_chunks(2_097_152, 524_288);
        assert_eq!(chunks.len(), 4);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert_eq!(chunk.offset, i as u64 * 524_288);
            assert_eq!(chunk.length, 524_288);
        }
    }

    // B1
    #[test]
    fn short_final_chunk_when_not_a_multiple() {
        let chunks = plan_chunks(1_000_000, 524_288);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].length, 524_288);
        assert_eq!(chunks[1].offset, 524_288);
        assert_eq!(chunks[1].length, 1_000_000 - 524_288);

        let total: u64 = chunks.iter().map(|c| c.length).sum();
        assert_eq!(total, 1_000_000);
    }

    // B2
    #[test]
    fn single_chunk_when_total_size_at_most_chunk_size() {
        let chunks = plan_chunks(300_000, 524_288);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], Chunk { index: 0, offset: 0, length: 300_000 });

        let chunks = plan_chunks(524_288, 524_288);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].length, 524_288);
    }

    #[test]
    fn every_chunk_has_positive_length() {
        for total in [1u64, 7, 524_288, 524_289, 10_000_000] {
            for chunk in plan_chunks(total, 524_288) {
                assert!(chunk.length > 0);
            }
        }
    }
}
