//! Resident chunks and their synchronization state.
//!
//! Every mutation of installed voxels goes through this container so that
//! dirty flags reach the chunks whose visible surface may have changed.

use std::collections::{BTreeMap, BTreeSet};
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use tracing::{debug, error, warn};
use voxsync_core::{BlockId, ChunkCoord, LocalPos, BLOCK_AIR};

use crate::chunk_blocks::ChunkBlocks;
use crate::error::ChunkError;

/// Where a chunk is in its synchronization lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    /// Known to the client but without any voxel data.
    Requested,
    /// A payload is being decompressed off the main thread.
    CompressedPending,
    /// Voxels are installed and can be queried and rendered.
    Ready,
    /// Installed, but the checksum disagrees with the server and a
    /// re-verification is in flight.
    ChecksumSuspect,
}

/// Result of a decompression job, sent back to the main thread.
#[derive(Debug)]
pub struct Processed {
    pub coord: ChunkCoord,
    pub serial: u64,
    pub outcome: Result<ChunkBlocks, ChunkError>,
}

impl Processed {
    /// Run the decompression for `blocks`.
    pub fn run(mut blocks: ChunkBlocks, reskin: crate::StoneReskin) -> Self {
        let coord = blocks.coord();
        let serial = blocks.serial();
        let outcome = blocks.uncompress(reskin).map(|()| blocks);
        Self {
            coord,
            serial,
            outcome,
        }
    }
}

/// What [`ChunkStore::finish`] did with a completed job.
#[derive(Debug)]
pub enum FinishOutcome {
    /// Voxels installed and the chunk marked dirty.
    Installed(ChunkCoord),
    /// Payload failed integrity checks and was discarded.
    Rejected(ChunkCoord),
    /// A newer answer was waiting; it must be submitted next.
    Resubmit(ChunkBlocks),
    /// Result no longer wanted (evicted or superseded).
    Dropped,
}

/// What happened to an edit received from the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    /// Written to the installed voxels.
    Applied,
    /// Queued until the pending decompression completes.
    Deferred,
    /// No voxels to edit; the next chunk answer carries the change.
    Dropped,
}

#[derive(Debug, Clone, Copy)]
enum DeferredEdit {
    Block {
        pos: LocalPos,
        block: BlockId,
    },
    Jelly {
        pos: LocalPos,
        delta: Duration,
        received: Instant,
    },
}

/// One resident chunk.
#[derive(Debug)]
pub struct ChunkEntry {
    coord: ChunkCoord,
    blocks: Option<ChunkBlocks>,
    in_flight: Option<u64>,
    held_answer: Option<ChunkBlocks>,
    deferred: Vec<DeferredEdit>,
    checksum_deadline: Option<Instant>,
}

impl ChunkEntry {
    fn new(coord: ChunkCoord) -> Self {
        Self {
            coord,
            blocks: None,
            in_flight: None,
            held_answer: None,
            deferred: Vec::new(),
            checksum_deadline: None,
        }
    }

    #[inline]
    pub fn coord(&self) -> ChunkCoord {
        self.coord
    }

    pub fn state(&self) -> ChunkState {
        match (&self.blocks, self.in_flight, self.checksum_deadline) {
            (_, Some(_), _) => ChunkState::CompressedPending,
            (None, None, _) => ChunkState::Requested,
            (Some(_), None, Some(_)) => ChunkState::ChecksumSuspect,
            (Some(_), None, None) => ChunkState::Ready,
        }
    }

    /// Installed voxels. Absent until the first decompression completes.
    pub fn blocks(&self) -> Option<&ChunkBlocks> {
        self.blocks.as_ref()
    }

    pub fn blocks_mut(&mut self) -> Option<&mut ChunkBlocks> {
        self.blocks.as_mut()
    }

    /// Edits waiting for the pending decompression.
    pub fn deferred_edits(&self) -> usize {
        self.deferred.len()
    }
}

/// In-memory chunk container with an LRU eviction policy.
/// Uses BTreeMap for deterministic iteration order.
pub struct ChunkStore {
    chunks: BTreeMap<ChunkCoord, ChunkEntry>,
    lru: LruCache<ChunkCoord, ()>,
    capacity: usize,
    dirty: BTreeSet<ChunkCoord>,
    next_serial: u64,
    checksum_timeout: Duration,
    verify_payload: bool,
}

impl ChunkStore {
    /// Create a store holding at most `capacity` chunks.
    pub fn new(capacity: usize, checksum_timeout: Duration) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        let capacity = cap.get();
        Self {
            chunks: BTreeMap::new(),
            lru: LruCache::new(cap),
            capacity,
            dirty: BTreeSet::new(),
            next_serial: 1,
            checksum_timeout,
            verify_payload: false,
        }
    }

    /// Also suspect chunks whose header checksum is not the CRC32 of their
    /// wire payload. Only meaningful for servers that checksum that way.
    pub fn with_payload_verification(mut self, enabled: bool) -> Self {
        self.verify_payload = enabled;
        self
    }

    pub fn verifies_payload(&self) -> bool {
        self.verify_payload
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Look a chunk up, creating an empty entry when asked to.
    pub fn find(&mut self, coord: ChunkCoord, create_if_absent: bool) -> Option<&mut ChunkEntry> {
        if !self.chunks.contains_key(&coord) {
            if !create_if_absent {
                return None;
            }
            self.evict_if_needed();
            self.chunks.insert(coord, ChunkEntry::new(coord));
        }
        self.lru.put(coord, ());
        self.chunks.get_mut(&coord)
    }

    /// Fetch a chunk without touching its recency.
    pub fn get(&self, coord: ChunkCoord) -> Option<&ChunkEntry> {
        self.chunks.get(&coord)
    }

    /// Lifecycle state of `coord`, `None` when not resident.
    pub fn state(&self, coord: ChunkCoord) -> Option<ChunkState> {
        self.chunks.get(&coord).map(ChunkEntry::state)
    }

    /// Returns true when `coord` has installed voxels.
    pub fn is_loaded(&self, coord: ChunkCoord) -> bool {
        self.chunks
            .get(&coord)
            .is_some_and(|entry| entry.blocks.is_some())
    }

    /// Iterate over resident chunk coordinates.
    pub fn iter_coords(&self) -> impl Iterator<Item = ChunkCoord> + '_ {
        self.chunks.keys().copied()
    }

    /// Accept a fresh chunk answer.
    ///
    /// Returns the blocks to hand to the processing queue, or `None` when a
    /// decompression for this coordinate is already running. In that case the
    /// answer is held and comes back from [`ChunkStore::finish`].
    pub fn begin_answer(&mut self, mut blocks: ChunkBlocks) -> Option<ChunkBlocks> {
        let coord = blocks.coord();
        let serial = self.next_serial;
        self.next_serial += 1;

        let entry = self.find(coord, true)?;
        if entry.in_flight.is_some() {
            if entry.held_answer.replace(blocks).is_some() {
                debug!(%coord, "newer chunk answer replaces held one");
            }
            return None;
        }
        blocks.assign_serial(serial);
        entry.in_flight = Some(serial);
        Some(blocks)
    }

    /// Take back a completed decompression.
    pub fn finish(&mut self, processed: Processed, now: Instant) -> FinishOutcome {
        let Processed {
            coord,
            serial,
            outcome,
        } = processed;
        let Some(entry) = self.chunks.get_mut(&coord) else {
            debug!(%coord, "chunk evicted while decompressing");
            return FinishOutcome::Dropped;
        };
        if entry.in_flight != Some(serial) {
            debug!(%coord, serial, "stale decompression result");
            return FinishOutcome::Dropped;
        }
        entry.in_flight = None;

        if let Some(mut next) = entry.held_answer.take() {
            let serial = self.next_serial;
            self.next_serial += 1;
            next.assign_serial(serial);
            entry.in_flight = Some(serial);
            debug!(%coord, "decompressed chunk superseded by newer answer");
            return FinishOutcome::Resubmit(next);
        }

        match outcome {
            Ok(blocks) => {
                entry.checksum_deadline = (self.verify_payload
                    && blocks.payload_checksum() != blocks.checksum())
                .then(|| now + self.checksum_timeout);
                if entry.checksum_deadline.is_some() {
                    warn!(
                        %coord,
                        advertised = blocks.checksum(),
                        received = blocks.payload_checksum(),
                        "chunk payload checksum mismatch"
                    );
                }
                entry.blocks = Some(blocks);
                let deferred = std::mem::take(&mut entry.deferred);
                self.mark_dirty(coord);
                for edit in deferred {
                    match edit {
                        DeferredEdit::Block { pos, block } => {
                            self.write_voxel(coord, pos, block);
                        }
                        DeferredEdit::Jelly {
                            pos,
                            delta,
                            received,
                        } => {
                            self.add_jelly_block(coord, pos, delta, received);
                        }
                    }
                }
                FinishOutcome::Installed(coord)
            }
            Err(err) => {
                error!(%coord, %err, "rejecting chunk payload");
                if !entry.deferred.is_empty() {
                    warn!(%coord, edits = entry.deferred.len(), "dropping edits for rejected chunk");
                    entry.deferred.clear();
                }
                FinishOutcome::Rejected(coord)
            }
        }
    }

    /// Write one voxel as instructed by the server.
    ///
    /// A voxel on a chunk face also dirties the loaded neighbour across that
    /// face, since its visible surface may have changed.
    pub fn command_block_update(
        &mut self,
        coord: ChunkCoord,
        pos: LocalPos,
        block: BlockId,
    ) -> EditOutcome {
        let outcome = self.write_voxel(coord, pos, block);
        if outcome == EditOutcome::Applied {
            self.mark_dirty(coord);
        }
        outcome
    }

    /// Hide the voxel at `pos` now and schedule it to reappear after `delta`.
    pub fn add_jelly_block(
        &mut self,
        coord: ChunkCoord,
        pos: LocalPos,
        delta: Duration,
        now: Instant,
    ) -> EditOutcome {
        let Some(entry) = self.chunks.get_mut(&coord) else {
            debug!(%coord, %pos, "jelly block for unknown chunk dropped");
            return EditOutcome::Dropped;
        };
        if entry.in_flight.is_some() {
            entry.deferred.push(DeferredEdit::Jelly {
                pos,
                delta,
                received: now,
            });
            return EditOutcome::Deferred;
        }
        let Some(blocks) = entry.blocks.as_mut() else {
            debug!(%coord, %pos, "jelly block for chunk without data dropped");
            return EditOutcome::Dropped;
        };
        if let Err(err) = blocks.add_jelly_timer(pos, delta, now) {
            warn!(%err, "jelly timer not scheduled");
            return EditOutcome::Dropped;
        }
        self.command_block_update(coord, pos, BLOCK_AIR)
    }

    /// Restore expired jelly blocks of one chunk.
    ///
    /// Returns the number restored. The chunk is marked dirty once if any
    /// fired, not once per voxel.
    pub fn test_jelly_block_timeout(
        &mut self,
        coord: ChunkCoord,
        now: Instant,
        force_all: bool,
    ) -> usize {
        let expired = match self.chunks.get_mut(&coord) {
            Some(ChunkEntry {
                blocks: Some(blocks),
                in_flight: None,
                ..
            }) => blocks.expire_jelly_timers(now, force_all),
            _ => return 0,
        };
        if expired.is_empty() {
            return 0;
        }
        for timer in &expired {
            self.write_voxel(coord, timer.pos, timer.original);
        }
        self.mark_dirty(coord);
        debug!(%coord, restored = expired.len(), "jelly blocks restored");
        expired.len()
    }

    /// Restore expired jelly blocks everywhere.
    pub fn test_all_jelly_timeouts(&mut self, now: Instant, force_all: bool) -> usize {
        let due: Vec<ChunkCoord> = self
            .chunks
            .values()
            .filter(|entry| {
                entry.in_flight.is_none()
                    && entry.blocks.as_ref().is_some_and(|blocks| {
                        blocks
                            .jelly_timers()
                            .next_expiry()
                            .is_some_and(|at| force_all || at <= now)
                    })
            })
            .map(|entry| entry.coord)
            .collect();
        due.into_iter()
            .map(|coord| self.test_jelly_block_timeout(coord, now, force_all))
            .sum()
    }

    /// Flag `coord` for a mesh rebuild.
    pub fn mark_dirty(&mut self, coord: ChunkCoord) {
        self.dirty.insert(coord);
    }

    pub fn is_dirty(&self, coord: ChunkCoord) -> bool {
        self.dirty.contains(&coord)
    }

    /// Consume the set of chunks needing a rebuild, in coordinate order.
    pub fn take_dirty(&mut self) -> Vec<ChunkCoord> {
        std::mem::take(&mut self.dirty).into_iter().collect()
    }

    /// Record that `coord` disagrees with the server.
    ///
    /// Returns true if the chunk was not already suspect, in which case the
    /// caller should ask the server right away.
    pub fn mark_checksum_suspect(&mut self, coord: ChunkCoord, now: Instant) -> bool {
        let timeout = self.checksum_timeout;
        match self.chunks.get_mut(&coord) {
            Some(entry) if entry.blocks.is_some() && entry.checksum_deadline.is_none() => {
                entry.checksum_deadline = Some(now + timeout);
                true
            }
            _ => false,
        }
    }

    /// Clear a suspicion once the server's summary agrees again.
    pub fn confirm_checksum(&mut self, coord: ChunkCoord) {
        if let Some(entry) = self.chunks.get_mut(&coord) {
            entry.checksum_deadline = None;
        }
    }

    /// Suspect chunks whose verification timed out, with their current
    /// checksum. Their deadline is re-armed, so each is reported once per
    /// timeout.
    pub fn due_checksum_requests(&mut self, now: Instant) -> Vec<(ChunkCoord, u32)> {
        let timeout = self.checksum_timeout;
        self.chunks
            .values_mut()
            .filter(|entry| entry.checksum_deadline.is_some_and(|at| at <= now))
            .map(|entry| {
                entry.checksum_deadline = Some(now + timeout);
                let checksum = entry.blocks.as_ref().map_or(0, ChunkBlocks::checksum);
                (entry.coord, checksum)
            })
            .collect()
    }

    fn write_voxel(&mut self, coord: ChunkCoord, pos: LocalPos, block: BlockId) -> EditOutcome {
        let Some(entry) = self.chunks.get_mut(&coord) else {
            debug!(%coord, %pos, "block update for unknown chunk dropped");
            return EditOutcome::Dropped;
        };
        if entry.in_flight.is_some() {
            entry.deferred.push(DeferredEdit::Block { pos, block });
            return EditOutcome::Deferred;
        }
        let Some(blocks) = entry.blocks.as_mut() else {
            debug!(%coord, %pos, "block update for chunk without data dropped");
            return EditOutcome::Dropped;
        };
        if let Err(err) = blocks.set_block(pos, block) {
            warn!(%err, "block update not applied");
            return EditOutcome::Dropped;
        }

        for face in pos.boundary_faces() {
            let neighbor = coord.neighbor(face);
            if self.is_loaded(neighbor) {
                self.mark_dirty(neighbor);
            }
        }
        EditOutcome::Applied
    }

    fn evict_if_needed(&mut self) {
        while self.chunks.len() >= self.capacity {
            if let Some((oldest, _)) = self.lru.pop_lru() {
                debug!(coord = %oldest, "evicting chunk");
                self.chunks.remove(&oldest);
                self.dirty.remove(&oldest);
            } else {
                break;
            }
        }
    }
}
