//! Client-side voxel world state kept in sync with the server.

mod chunk_blocks;
mod error;
mod jelly;
pub mod rle;
mod store;
mod super_chunk;

pub use chunk_blocks::{ChunkBlocks, ChunkFlags, GameMode, StoneReskin, Viewer};
pub use error::{ChunkError, SuperChunkError};
pub use jelly::{JellyTimer, JellyTimers};
pub use store::{ChunkEntry, ChunkState, ChunkStore, EditOutcome, FinishOutcome, Processed};
pub use super_chunk::{
    ChunkInfo, ChunkInfoFlags, SuperChunkAggregate, SuperChunkManager, AGGREGATE_BYTES,
    CHUNK_INFO_BYTES,
};

/// Checksum the server advertises for a chunk: CRC32 of its wire payload.
pub fn payload_checksum(payload: &[u8]) -> u32 {
    crc32fast::hash(payload)
}
