#![warn(missing_docs)]
//! Core primitives shared across the workspace.

pub mod block;
pub mod coords;

pub use block::{
    BlockCatalog, BlockFlags, BlockId, BLOCK_AIR, BLOCK_BRICK, BLOCK_GLASS, BLOCK_HEDGE,
    BLOCK_LADDER, BLOCK_LAMP, BLOCK_LINK, BLOCK_SAND, BLOCK_SOIL, BLOCK_STONE, BLOCK_STONE_VARIANT,
    BLOCK_TELEPORT, BLOCK_TEXT, BLOCK_TOP_SOIL, BLOCK_TREE, BLOCK_TRIGGER, BLOCK_WATER,
    BLOCK_WINDOW, BLOCK_WOOD,
};
pub use coords::{
    truncate_to_super_chunk, ChunkCoord, Face, LocalPos, CHUNK_SIZE, CHUNK_VOLUME, SCH_SIZE,
    SCH_VOLUME,
};

/// Identifier of a player or territory owner as sent by the server.
pub type OwnerId = u32;

/// Owner value reserved for unclaimed chunks.
pub const OWNER_UNCLAIMED: OwnerId = 1;
