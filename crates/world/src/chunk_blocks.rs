//! Voxel data of a single chunk as received from the server.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::trace;
use voxsync_core::{
    BlockCatalog, BlockId, ChunkCoord, LocalPos, OwnerId, BLOCK_AIR, BLOCK_STONE,
    BLOCK_STONE_VARIANT, BLOCK_TELEPORT, CHUNK_VOLUME, OWNER_UNCLAIMED,
};

use crate::error::ChunkError;
use crate::jelly::{JellyTimer, JellyTimers};
use crate::rle::{decode_runs, RunError};

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    /// Flags carried by a chunk answer.
    pub struct ChunkFlags: u32 {
        /// Payload is a run-length stream rather than a raw voxel array.
        const COMPRESSED = 0x0000_0001;
    }
}

/// Cosmetic replacement of some stone voxels by the stone variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoneReskin {
    /// Keep stone as sent.
    #[default]
    Disabled,
    /// Re-skin roughly one stone voxel in `n`.
    OneIn(u32),
}

impl StoneReskin {
    /// Policy from a ratio setting where 0 disables re-skinning.
    pub fn from_ratio(one_in: u32) -> Self {
        match one_in {
            0 => StoneReskin::Disabled,
            n => StoneReskin::OneIn(n),
        }
    }

    /// Block to store at `index` for a received `block`.
    ///
    /// Depends only on the voxel index, so decoding the same payload twice
    /// gives the same result.
    #[inline]
    pub fn apply(self, index: usize, block: BlockId) -> BlockId {
        match self {
            StoneReskin::OneIn(n) if block == BLOCK_STONE && voxel_hash(index) % n == 0 => {
                BLOCK_STONE_VARIANT
            }
            _ => block,
        }
    }
}

fn voxel_hash(index: usize) -> u32 {
    let mut h = (index as u32).wrapping_mul(0x9E37_79B9);
    h ^= h >> 16;
    h = h.wrapping_mul(0x85EB_CA6B);
    h ^= h >> 13;
    h
}

/// Game mode of the local player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GameMode {
    /// Regular play.
    #[default]
    Normal,
    /// Building on one's own territory.
    Construction,
}

/// The player a visibility query is made for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewer {
    /// Player id as used for chunk ownership.
    pub player: OwnerId,
    /// Admin and test accounts see through everything.
    pub privileged: bool,
    /// Current mode.
    pub mode: GameMode,
}

/// One chunk's voxels, owned by whoever currently holds the value.
///
/// Created holding the wire payload only. The dense array appears after a
/// successful [`ChunkBlocks::uncompress`] and is never reset afterwards; a
/// fresh server answer produces a new value instead.
pub struct ChunkBlocks {
    coord: ChunkCoord,
    flags: ChunkFlags,
    checksum: u32,
    payload_checksum: u32,
    owner: OwnerId,
    serial: u64,
    compressed: Option<Vec<u8>>,
    voxels: Option<Box<[BlockId]>>,
    jelly: JellyTimers,
}

impl ChunkBlocks {
    /// Wrap a chunk answer payload.
    pub fn new(
        coord: ChunkCoord,
        flags: ChunkFlags,
        checksum: u32,
        owner: OwnerId,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            coord,
            flags,
            checksum,
            payload_checksum: crate::payload_checksum(&payload),
            owner,
            serial: 0,
            compressed: Some(payload),
            voxels: None,
            jelly: JellyTimers::new(),
        }
    }

    #[inline]
    pub fn coord(&self) -> ChunkCoord {
        self.coord
    }

    #[inline]
    pub fn flags(&self) -> ChunkFlags {
        self.flags
    }

    /// Checksum the server advertised for this chunk.
    #[inline]
    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    /// Checksum computed over the payload that actually arrived.
    #[inline]
    pub fn payload_checksum(&self) -> u32 {
        self.payload_checksum
    }

    #[inline]
    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    /// Returns true when no territory owns this chunk.
    pub fn is_unclaimed(&self) -> bool {
        self.owner == OWNER_UNCLAIMED
    }

    /// Handoff number assigned by the chunk store.
    #[inline]
    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub(crate) fn assign_serial(&mut self, serial: u64) {
        self.serial = serial;
    }

    /// Size of the wire payload still held, zero once uncompressed.
    pub fn compressed_len(&self) -> usize {
        self.compressed.as_ref().map_or(0, Vec::len)
    }

    /// Returns true once the dense voxel array exists.
    pub fn is_uncompressed(&self) -> bool {
        self.voxels.is_some()
    }

    /// Expand the payload into the dense voxel array.
    ///
    /// The payload must account for exactly one chunk of voxels. On error
    /// nothing is installed and the payload is kept. Cost is proportional to
    /// the chunk volume, so callers run this on a worker.
    pub fn uncompress(&mut self, reskin: StoneReskin) -> Result<(), ChunkError> {
        let coord = self.coord;
        if self.voxels.is_some() {
            return Err(ChunkError::AlreadyUncompressed { coord });
        }
        let payload = self.compressed.as_deref().unwrap_or_default();

        let mut voxels = if self.flags.contains(ChunkFlags::COMPRESSED) {
            decode_runs(payload, CHUNK_VOLUME).map_err(|err| match err {
                RunError::OddLength(len) => ChunkError::TruncatedRun { coord, len },
                RunError::Count(actual) => ChunkError::VoxelCount {
                    coord,
                    expected: CHUNK_VOLUME,
                    actual,
                },
            })?
        } else if payload.len() == CHUNK_VOLUME {
            payload.to_vec()
        } else {
            return Err(ChunkError::VoxelCount {
                coord,
                expected: CHUNK_VOLUME,
                actual: payload.len(),
            });
        };

        if reskin != StoneReskin::Disabled {
            for (index, block) in voxels.iter_mut().enumerate() {
                *block = reskin.apply(index, *block);
            }
        }

        trace!(%coord, bytes = payload.len(), "chunk uncompressed");
        self.voxels = Some(voxels.into_boxed_slice());
        self.compressed = None;
        Ok(())
    }

    /// Dense voxel array, once uncompressed.
    pub fn voxels(&self) -> Option<&[BlockId]> {
        self.voxels.as_deref()
    }

    /// Block at `pos`, once uncompressed.
    pub fn block(&self, pos: LocalPos) -> Option<BlockId> {
        self.voxels.as_ref().map(|voxels| voxels[pos.index()])
    }

    /// Overwrite one voxel, returning the previous block.
    pub fn set_block(&mut self, pos: LocalPos, block: BlockId) -> Result<BlockId, ChunkError> {
        let coord = self.coord;
        let voxels = self
            .voxels
            .as_mut()
            .ok_or(ChunkError::NotReady { coord })?;
        Ok(std::mem::replace(&mut voxels[pos.index()], block))
    }

    /// Place a teleport marker at `pos` if the voxel is air.
    ///
    /// Returns true when the marker was written. Solid content is never
    /// overwritten and repeated calls are no-ops.
    pub fn set_teleport(&mut self, pos: LocalPos) -> Result<bool, ChunkError> {
        match self.block(pos) {
            None => Err(ChunkError::NotReady { coord: self.coord }),
            Some(BLOCK_AIR) => {
                self.set_block(pos, BLOCK_TELEPORT)?;
                Ok(true)
            }
            Some(_) => Ok(false),
        }
    }

    /// Remember the current block at `pos` for restoration after `delta`.
    pub fn add_jelly_timer(
        &mut self,
        pos: LocalPos,
        delta: Duration,
        now: Instant,
    ) -> Result<(), ChunkError> {
        let original = self
            .block(pos)
            .ok_or(ChunkError::NotReady { coord: self.coord })?;
        self.jelly.schedule(JellyTimer {
            pos,
            original,
            expires_at: now + delta,
        });
        Ok(())
    }

    /// Remove and return timers due at `now` (all of them with `force_all`).
    ///
    /// Restoring the voxels is left to the caller so neighbours can be
    /// notified.
    pub fn expire_jelly_timers(&mut self, now: Instant, force_all: bool) -> Vec<JellyTimer> {
        self.jelly.pop_expired(now, force_all)
    }

    /// Pending jelly timers.
    pub fn jelly_timers(&self) -> &JellyTimers {
        &self.jelly
    }

    /// Whether `block` leaves neighbouring faces visible.
    pub fn block_is_semi_transparent(catalog: &BlockCatalog, block: BlockId) -> bool {
        catalog.is_semi_transparent(block)
    }

    /// Whether `block` is invisible when seen by `viewer` in this chunk.
    ///
    /// Scaffolding in somebody else's territory renders solid while the
    /// viewer is in construction mode: only air counts as transparent then.
    pub fn block_is_fully_transparent(
        &self,
        catalog: &BlockCatalog,
        block: BlockId,
        viewer: &Viewer,
    ) -> bool {
        if self.owner != viewer.player
            && !viewer.privileged
            && viewer.mode == GameMode::Construction
        {
            return block == BLOCK_AIR;
        }
        catalog.is_fully_transparent(block)
    }

    /// Whether `block` collides.
    pub fn rigid(catalog: &BlockCatalog, block: BlockId) -> bool {
        catalog.is_rigid(block)
    }

    /// Whether `block` may be built with.
    pub fn plastic(catalog: &BlockCatalog, block: BlockId) -> bool {
        catalog.is_plastic(block)
    }
}

impl fmt::Debug for ChunkBlocks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkBlocks")
            .field("coord", &self.coord)
            .field("flags", &self.flags)
            .field("checksum", &format_args!("{:08x}", self.checksum))
            .field("owner", &self.owner)
            .field("serial", &self.serial)
            .field("compressed_len", &self.compressed_len())
            .field("uncompressed", &self.is_uncompressed())
            .field("jelly_timers", &self.jelly.len())
            .finish()
    }
}
