//! Run-length coding of chunk voxels.
//!
//! Format: repeating `[block: u8][run: u8]` pairs. A run of zero is legal and
//! contributes nothing.

use voxsync_core::{BlockId, CHUNK_VOLUME};

/// Longest run a single pair can express.
pub const MAX_RUN: usize = u8::MAX as usize;

/// Why a run-length stream could not be expanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunError {
    /// Stream ends in the middle of a pair.
    OddLength(usize),
    /// Stream expands to the wrong number of voxels.
    Count(usize),
}

/// Run-length encode a voxel sequence.
pub fn encode_runs(blocks: &[BlockId]) -> Vec<u8> {
    let mut encoded = Vec::new();
    let mut i = 0;

    while i < blocks.len() {
        let current = blocks[i];
        let mut run = 1;
        while i + run < blocks.len() && blocks[i + run] == current && run < MAX_RUN {
            run += 1;
        }
        encoded.push(current);
        encoded.push(run as u8);
        i += run;
    }

    encoded
}

/// Expand a stream into exactly `expected` voxels.
///
/// Expansion stops as soon as the count passes `expected`, so a hostile
/// stream can never allocate more than one chunk.
pub fn decode_runs(stream: &[u8], expected: usize) -> Result<Vec<BlockId>, RunError> {
    if stream.len() % 2 != 0 {
        return Err(RunError::OddLength(stream.len()));
    }

    let mut blocks = Vec::with_capacity(expected.min(CHUNK_VOLUME));
    for pair in stream.chunks_exact(2) {
        let (block, run) = (pair[0], pair[1] as usize);
        if blocks.len() + run > expected {
            return Err(RunError::Count(blocks.len() + run));
        }
        blocks.extend(std::iter::repeat(block).take(run));
    }

    if blocks.len() != expected {
        return Err(RunError::Count(blocks.len()));
    }
    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_splits_long_runs() {
        let blocks = vec![3u8; 600];
        let encoded = encode_runs(&blocks);
        assert_eq!(encoded, vec![3, 255, 3, 255, 3, 90]);
    }

    #[test]
    fn decode_exact_volume() {
        let decoded = decode_runs(&[0, 2, 7, 3], 5).unwrap();
        assert_eq!(decoded, vec![0, 0, 7, 7, 7]);
    }

    #[test]
    fn zero_runs_are_skipped() {
        let decoded = decode_runs(&[1, 0, 2, 2], 2).unwrap();
        assert_eq!(decoded, vec![2, 2]);
    }

    #[test]
    fn decode_rejects_short_stream() {
        assert_eq!(decode_runs(&[0, 4], 5), Err(RunError::Count(4)));
    }

    #[test]
    fn decode_rejects_overflow_early() {
        let stream: Vec<u8> = [0u8, 255].repeat(1000);
        assert_eq!(decode_runs(&stream, 300), Err(RunError::Count(510)));
    }

    #[test]
    fn decode_rejects_odd_length() {
        assert_eq!(decode_runs(&[0, 4, 1], 4), Err(RunError::OddLength(3)));
    }
}
