use thiserror::Error;
use voxsync_core::ChunkCoord;

/// Failures while decompressing or editing a chunk.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkError {
    /// The payload does not describe exactly one chunk of voxels.
    #[error("chunk {coord}: payload expands to {actual} voxels, expected {expected}")]
    VoxelCount {
        /// Chunk the payload belongs to.
        coord: ChunkCoord,
        /// Voxels per chunk.
        expected: usize,
        /// Voxels counted before the stream ended or overflowed.
        actual: usize,
    },
    /// A `(block, run)` pair is missing its run byte.
    #[error("chunk {coord}: run-length stream has odd length {len}")]
    TruncatedRun {
        /// Chunk the payload belongs to.
        coord: ChunkCoord,
        /// Stream length in bytes.
        len: usize,
    },
    /// Decompression was requested a second time.
    #[error("chunk {coord} is already uncompressed")]
    AlreadyUncompressed {
        /// Chunk concerned.
        coord: ChunkCoord,
    },
    /// The dense voxel array does not exist yet.
    #[error("chunk {coord} has no voxel data yet")]
    NotReady {
        /// Chunk concerned.
        coord: ChunkCoord,
    },
}

/// Failures installing super-chunk data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SuperChunkError {
    /// The payload is shorter than one aggregate.
    #[error("super-chunk {origin}: payload is {actual} bytes, expected {expected}")]
    ShortPayload {
        /// Origin of the aggregate.
        origin: ChunkCoord,
        /// Required size in bytes.
        expected: usize,
        /// Received size in bytes.
        actual: usize,
    },
}
