//! Client-side synchronization state mutated by incoming commands.

use std::time::Instant;

use tracing::{debug, info, warn};
use voxsync_core::{BlockCatalog, BlockId, ChunkCoord, LocalPos};
use voxsync_net::ClientCommand;
use voxsync_world::{
    ChunkBlocks, ChunkEntry, ChunkState, ChunkStore, FinishOutcome, Processed, SuperChunkManager,
    Viewer,
};

use crate::config::SyncConfig;

/// Things the embedding application reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEvent {
    /// A chunk finished decompressing and can be rendered.
    ChunkReady(ChunkCoord),
    /// A chunk payload failed integrity checks; the previous data, if any, stays.
    ChunkRejected(ChunkCoord),
    /// A text block changed.
    TextBlock {
        coord: ChunkCoord,
        pos: LocalPos,
        /// The voxel is the one the player was waiting on an activator message for.
        activated: bool,
    },
}

/// Chunk and super-chunk state plus everything queued for the outside world.
pub struct ChunkSync {
    store: ChunkStore,
    super_chunks: SuperChunkManager,
    catalog: BlockCatalog,
    viewer: Viewer,
    reference: ChunkCoord,
    pending_activator: Option<(ChunkCoord, LocalPos)>,
    submissions: Vec<ChunkBlocks>,
    outgoing: Vec<ClientCommand>,
    events: Vec<SyncEvent>,
}

impl ChunkSync {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            store: ChunkStore::new(config.chunk_capacity, config.checksum_timeout())
                .with_payload_verification(config.verify_payload_checksum),
            super_chunks: SuperChunkManager::new(
                config.super_chunk_capacity,
                config.checksum_timeout(),
            ),
            catalog: BlockCatalog::new(),
            viewer: config.viewer(),
            reference: ChunkCoord::default(),
            pending_activator: None,
            submissions: Vec::new(),
            outgoing: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ChunkStore {
        &mut self.store
    }

    pub fn super_chunks(&self) -> &SuperChunkManager {
        &self.super_chunks
    }

    pub fn super_chunks_mut(&mut self) -> &mut SuperChunkManager {
        &mut self.super_chunks
    }

    pub fn catalog(&self) -> &BlockCatalog {
        &self.catalog
    }

    /// Chunk the player is in; low-byte coordinates are resolved against it.
    pub fn reference(&self) -> ChunkCoord {
        self.reference
    }

    pub fn set_reference(&mut self, coord: ChunkCoord) {
        if coord != self.reference {
            debug!(from = %self.reference, to = %coord, "reference chunk moved");
            self.reference = coord;
        }
    }

    pub fn viewer(&self) -> Viewer {
        self.viewer
    }

    pub fn set_viewer(&mut self, viewer: Viewer) {
        self.viewer = viewer;
    }

    /// Remember the voxel whose activator message the player is waiting for.
    pub fn set_pending_activator(&mut self, coord: ChunkCoord, pos: LocalPos) {
        self.pending_activator = Some((coord, pos));
    }

    pub fn pending_activator(&self) -> Option<(ChunkCoord, LocalPos)> {
        self.pending_activator
    }

    /// Whether the voxel at `pos` is see-through for the local player.
    ///
    /// `None` when the chunk has no voxels yet.
    pub fn is_transparent(&self, coord: ChunkCoord, pos: LocalPos) -> Option<bool> {
        let blocks = self.store.get(coord)?.blocks()?;
        let block = blocks.block(pos)?;
        Some(blocks.block_is_fully_transparent(&self.catalog, block, &self.viewer))
    }

    pub(crate) fn text_block_changed(&mut self, coord: ChunkCoord, pos: LocalPos) {
        let activated = self.pending_activator == Some((coord, pos));
        if activated {
            self.pending_activator = None;
        }
        self.events.push(SyncEvent::TextBlock {
            coord,
            pos,
            activated,
        });
    }

    /// Queue a chunk answer for decompression.
    pub(crate) fn accept_answer(&mut self, blocks: ChunkBlocks) {
        if let Some(blocks) = self.store.begin_answer(blocks) {
            self.submissions.push(blocks);
        }
    }

    /// Take back a finished decompression.
    pub fn complete(&mut self, processed: Processed, now: Instant) {
        match self.store.finish(processed, now) {
            FinishOutcome::Installed(coord) => {
                self.events.push(SyncEvent::ChunkReady(coord));
                if let Some(checksum) = self.suspect_checksum(coord) {
                    self.outgoing.push(ClientCommand::RequestChunk { coord, checksum });
                }
                self.verify_against_summary(coord, now);
                self.apply_teleport(coord);
            }
            FinishOutcome::Rejected(coord) => {
                self.events.push(SyncEvent::ChunkRejected(coord));
                // Ask again; the server resends the whole chunk.
                self.outgoing.push(ClientCommand::RequestChunk { coord, checksum: 0 });
            }
            FinishOutcome::Resubmit(blocks) => self.submissions.push(blocks),
            FinishOutcome::Dropped => {}
        }
    }

    /// Compare every loaded chunk of a freshly installed super-chunk with it.
    pub(crate) fn recheck_super_chunk(&mut self, origin: ChunkCoord, now: Instant) {
        let members: Vec<ChunkCoord> = self
            .store
            .iter_coords()
            .filter(|coord| coord.super_chunk_origin() == origin && self.store.is_loaded(*coord))
            .collect();
        for coord in members {
            self.verify_against_summary(coord, now);
            self.apply_teleport(coord);
        }
    }

    fn verify_against_summary(&mut self, coord: ChunkCoord, now: Instant) {
        let Some(expected) = self.super_chunks.chunk_checksum(coord) else {
            return;
        };
        let Some(blocks) = self.store.get(coord).and_then(ChunkEntry::blocks) else {
            return;
        };
        let held = blocks.checksum();
        let header_ok = !self.store.verifies_payload() || blocks.payload_checksum() == held;

        if expected == held && header_ok {
            if self.store.state(coord) == Some(ChunkState::ChecksumSuspect) {
                info!(%coord, "chunk checksum confirmed");
            }
            self.store.confirm_checksum(coord);
        } else if self.store.mark_checksum_suspect(coord, now) {
            warn!(%coord, expected, held, "chunk disagrees with super-chunk summary");
            self.outgoing.push(ClientCommand::RequestChunk {
                coord,
                checksum: held,
            });
        }
    }

    fn suspect_checksum(&self, coord: ChunkCoord) -> Option<u32> {
        let entry = self.store.get(coord)?;
        if entry.state() != ChunkState::ChecksumSuspect {
            return None;
        }
        entry.blocks().map(ChunkBlocks::checksum)
    }

    fn apply_teleport(&mut self, coord: ChunkCoord) {
        let Some(pos) = self.super_chunks.get_teleport(coord) else {
            return;
        };
        let written = self
            .store
            .find(coord, false)
            .and_then(|entry| entry.blocks_mut())
            .map(|blocks| blocks.set_teleport(pos));
        match written {
            Some(Ok(true)) => {
                debug!(%coord, %pos, "teleport marker placed");
                self.store.mark_dirty(coord);
            }
            Some(Err(err)) => warn!(%err, "teleport marker not placed"),
            _ => {}
        }
    }

    /// Re-send requests for suspect chunks and super-chunk summaries whose
    /// answer timed out.
    pub fn request_due_checksums(&mut self, now: Instant) {
        for (coord, checksum) in self.store.due_checksum_requests(now) {
            debug!(%coord, "re-requesting suspect chunk");
            self.outgoing.push(ClientCommand::RequestChunk { coord, checksum });
        }
        for origin in self.super_chunks.due_requests(now) {
            debug!(%origin, "re-requesting super-chunk summary");
            self.outgoing.push(ClientCommand::verify_super_chunk(origin));
        }
    }

    /// Chunks waiting to be handed to the processor.
    pub fn take_submissions(&mut self) -> Vec<ChunkBlocks> {
        std::mem::take(&mut self.submissions)
    }

    /// Commands to send, super-chunk verification requests included.
    pub fn take_outgoing(&mut self) -> Vec<ClientCommand> {
        let mut outgoing = std::mem::take(&mut self.outgoing);
        outgoing.extend(
            self.super_chunks
                .take_requests()
                .into_iter()
                .map(ClientCommand::verify_super_chunk),
        );
        outgoing
    }

    pub fn take_events(&mut self) -> Vec<SyncEvent> {
        std::mem::take(&mut self.events)
    }

    /// Chunks needing a mesh rebuild.
    pub fn take_dirty(&mut self) -> Vec<ChunkCoord> {
        self.store.take_dirty()
    }

    /// Block at `pos` of a ready chunk.
    pub fn block(&self, coord: ChunkCoord, pos: LocalPos) -> Option<BlockId> {
        self.store.get(coord)?.blocks()?.block(pos)
    }
}
