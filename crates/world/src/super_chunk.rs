//! Cache of per-chunk summaries, fetched one super-chunk at a time.
//!
//! Answers "does this chunk hold a teleport, and where" and "what checksum
//! should this chunk have" without a round trip per chunk.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use tracing::debug;
use voxsync_core::{ChunkCoord, LocalPos, SCH_VOLUME};

use crate::error::SuperChunkError;

/// Encoded size of one [`ChunkInfo`].
pub const CHUNK_INFO_BYTES: usize = 8;
/// Encoded size of a full aggregate payload.
pub const AGGREGATE_BYTES: usize = 4 + SCH_VOLUME * CHUNK_INFO_BYTES;

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    /// Per-chunk summary flags.
    pub struct ChunkInfoFlags: u8 {
        /// The chunk contains a teleport target.
        const TELEPORT = 0b0000_0001;
    }
}

/// Summary of one chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkInfo {
    /// Checksum of the chunk's current payload.
    pub checksum: u32,
    /// Local voxel of the teleport target, valid with [`ChunkInfoFlags::TELEPORT`].
    pub teleport: [u8; 3],
    pub flags: ChunkInfoFlags,
}

impl ChunkInfo {
    fn read(bytes: &[u8]) -> Self {
        Self {
            checksum: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            teleport: [bytes[4], bytes[5], bytes[6]],
            flags: ChunkInfoFlags::from_bits_retain(bytes[7]),
        }
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.checksum.to_le_bytes());
        out.extend_from_slice(&self.teleport);
        out.push(self.flags.bits());
    }

    /// Teleport target, if flagged and inside the chunk.
    pub fn teleport_target(&self) -> Option<LocalPos> {
        if !self.flags.contains(ChunkInfoFlags::TELEPORT) {
            return None;
        }
        let [x, y, z] = self.teleport;
        LocalPos::new(x, y, z)
    }
}

/// Summaries of all chunks in one super-chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuperChunkAggregate {
    origin: ChunkCoord,
    checksum: u32,
    entries: Vec<ChunkInfo>,
    update_requested: bool,
}

impl SuperChunkAggregate {
    /// Zero-filled aggregate waiting for the server's answer.
    pub fn placeholder(origin: ChunkCoord) -> Self {
        Self {
            origin,
            checksum: 0,
            entries: vec![ChunkInfo::default(); SCH_VOLUME],
            update_requested: true,
        }
    }

    /// Confirmed aggregate built from entries, mostly useful to tests and tools.
    pub fn from_entries(origin: ChunkCoord, checksum: u32, entries: Vec<ChunkInfo>) -> Self {
        let mut entries = entries;
        entries.resize(SCH_VOLUME, ChunkInfo::default());
        Self {
            origin,
            checksum,
            entries,
            update_requested: false,
        }
    }

    pub fn origin(&self) -> ChunkCoord {
        self.origin
    }

    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    /// True while the server has not answered for this aggregate.
    pub fn update_requested(&self) -> bool {
        self.update_requested
    }

    /// Summary of `chunk`, which must lie in this super-chunk.
    pub fn entry(&self, chunk: ChunkCoord) -> &ChunkInfo {
        debug_assert_eq!(chunk.super_chunk_origin(), self.origin);
        &self.entries[chunk.super_chunk_index()]
    }

    /// Overwrite this aggregate with a validated wire payload.
    fn load(&mut self, bytes: &[u8]) {
        self.checksum = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        for (entry, raw) in self
            .entries
            .iter_mut()
            .zip(bytes[4..AGGREGATE_BYTES].chunks_exact(CHUNK_INFO_BYTES))
        {
            *entry = ChunkInfo::read(raw);
        }
        self.update_requested = false;
    }

    /// Wire encoding, the inverse of what [`SuperChunkManager::data`] accepts.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(AGGREGATE_BYTES);
        out.extend_from_slice(&self.checksum.to_le_bytes());
        for entry in &self.entries {
            entry.write(&mut out);
        }
        out
    }
}

/// Keyed cache of super-chunk aggregates, bounded by least recent use.
#[derive(Debug)]
pub struct SuperChunkManager {
    aggregates: LruCache<ChunkCoord, SuperChunkAggregate>,
    requests: Vec<ChunkCoord>,
    retry_deadlines: HashMap<ChunkCoord, Instant>,
    request_timeout: Duration,
}

impl SuperChunkManager {
    /// Cache at most `capacity` aggregates, re-requesting unanswered
    /// placeholders every `request_timeout`.
    pub fn new(capacity: usize, request_timeout: Duration) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            aggregates: LruCache::new(cap),
            requests: Vec::new(),
            retry_deadlines: HashMap::new(),
            request_timeout,
        }
    }

    /// Number of cached aggregates, placeholders included.
    pub fn len(&self) -> usize {
        self.aggregates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aggregates.is_empty()
    }

    /// Aggregate covering `chunk`, never blocking.
    ///
    /// On a miss a placeholder is cached right away and one verification
    /// request is queued, so repeated lookups don't ask twice.
    pub fn find(&mut self, chunk: ChunkCoord) -> &SuperChunkAggregate {
        let origin = chunk.super_chunk_origin();
        if !self.aggregates.contains(&origin) {
            debug!(%origin, "super-chunk miss, requesting verification");
            self.requests.push(origin);
            self.insert_placeholder(origin);
        }
        self.aggregates
            .get_or_insert(origin, || SuperChunkAggregate::placeholder(origin))
    }

    fn insert_placeholder(&mut self, origin: ChunkCoord) {
        if let Some((old, _)) = self
            .aggregates
            .push(origin, SuperChunkAggregate::placeholder(origin))
        {
            debug!(origin = %old, "evicting super-chunk");
            self.retry_deadlines.remove(&old);
        }
    }

    /// Cached aggregate covering `chunk`, without requesting anything.
    pub fn get(&self, chunk: ChunkCoord) -> Option<&SuperChunkAggregate> {
        self.aggregates.peek(&chunk.super_chunk_origin())
    }

    /// Teleport target inside `chunk`, if the summary has one.
    ///
    /// Placeholders report no teleport.
    pub fn get_teleport(&mut self, chunk: ChunkCoord) -> Option<LocalPos> {
        self.find(chunk).entry(chunk).teleport_target()
    }

    /// Server-confirmed checksum of `chunk`, if known.
    pub fn chunk_checksum(&self, chunk: ChunkCoord) -> Option<u32> {
        self.get(chunk)
            .filter(|aggregate| !aggregate.update_requested)
            .map(|aggregate| aggregate.entry(chunk).checksum)
    }

    /// Install the server's aggregate for the super-chunk at `origin`.
    ///
    /// Replaces any placeholder; the only way `update_requested` clears.
    pub fn data(&mut self, origin: ChunkCoord, bytes: &[u8]) -> Result<(), SuperChunkError> {
        let origin = origin.super_chunk_origin();
        if bytes.len() < AGGREGATE_BYTES {
            return Err(SuperChunkError::ShortPayload {
                origin,
                expected: AGGREGATE_BYTES,
                actual: bytes.len(),
            });
        }
        if !self.aggregates.contains(&origin) {
            self.insert_placeholder(origin);
        }
        let aggregate = self
            .aggregates
            .get_or_insert_mut(origin, || SuperChunkAggregate::placeholder(origin));
        aggregate.load(bytes);
        debug!(%origin, checksum = aggregate.checksum, "super-chunk installed");
        self.retry_deadlines.remove(&origin);
        Ok(())
    }

    /// Origins that need a verification request sent.
    pub fn take_requests(&mut self) -> Vec<ChunkCoord> {
        std::mem::take(&mut self.requests)
    }

    /// Origins whose verification request went unanswered for a full timeout.
    ///
    /// A placeholder's clock starts at the first call after its request was
    /// queued. Each origin is re-queued at most once per timeout and only
    /// while no request for it is already waiting to be sent.
    pub fn due_requests(&mut self, now: Instant) -> Vec<ChunkCoord> {
        let timeout = self.request_timeout;
        let mut due = Vec::new();
        for (origin, aggregate) in self.aggregates.iter() {
            if !aggregate.update_requested || self.requests.contains(origin) {
                continue;
            }
            let deadline = self
                .retry_deadlines
                .entry(*origin)
                .or_insert(now + timeout);
            if *deadline <= now {
                *deadline = now + timeout;
                due.push(*origin);
            }
        }
        if !due.is_empty() {
            debug!(count = due.len(), "re-requesting unanswered super-chunks");
        }
        due
    }
}
