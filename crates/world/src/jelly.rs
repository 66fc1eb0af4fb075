//! Pending reversions of temporarily hidden ("jelly") blocks.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::time::Instant;

use voxsync_core::{BlockId, LocalPos};

/// A voxel that must be restored to `original` at `expires_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JellyTimer {
    /// Voxel inside the owning chunk.
    pub pos: LocalPos,
    /// Block type to restore.
    pub original: BlockId,
    /// When the block reappears.
    pub expires_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Scheduled {
    expires_at: Instant,
    sequence: u64,
    pos: LocalPos,
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering: earliest expiry (then earliest insertion) on top
        other
            .expires_at
            .cmp(&self.expires_at)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Timers of one chunk, ordered by expiry regardless of insertion order.
///
/// Rescheduling a voxel leaves its old heap entry behind; entries whose
/// sequence no longer matches `pending` are skipped when they surface. The
/// heap top is always live.
#[derive(Debug, Clone, Default)]
pub struct JellyTimers {
    heap: BinaryHeap<Scheduled>,
    pending: HashMap<LocalPos, (JellyTimer, u64)>,
    next_sequence: u64,
}

impl JellyTimers {
    /// Empty timer list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pending timers.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns true when nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Expiry of the next timer due.
    pub fn next_expiry(&self) -> Option<Instant> {
        self.heap.peek().map(|s| s.expires_at)
    }

    /// Pending timer for `pos`, if any.
    pub fn pending_at(&self, pos: LocalPos) -> Option<&JellyTimer> {
        self.pending.get(&pos).map(|(timer, _)| timer)
    }

    /// Schedule a reversion.
    ///
    /// A voxel holds at most one timer. Re-hiding a voxel that is already
    /// hidden keeps the block type saved first and the later expiry.
    pub fn schedule(&mut self, timer: JellyTimer) {
        let mut timer = timer;
        if let Some((existing, _)) = self.pending.get(&timer.pos) {
            timer.original = existing.original;
            timer.expires_at = timer.expires_at.max(existing.expires_at);
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.pending.insert(timer.pos, (timer, sequence));
        self.heap.push(Scheduled {
            expires_at: timer.expires_at,
            sequence,
            pos: timer.pos,
        });

        self.discard_stale_top();
        if self.heap.len() > 2 * self.pending.len() + 64 {
            let pending = &self.pending;
            self.heap
                .retain(|s| pending.get(&s.pos).is_some_and(|(_, seq)| *seq == s.sequence));
        }
    }

    /// Remove and return every timer due at `now`, earliest first.
    ///
    /// With `force_all` every pending timer is returned.
    pub fn pop_expired(&mut self, now: Instant, force_all: bool) -> Vec<JellyTimer> {
        let mut expired = Vec::new();
        while let Some(next) = self.heap.peek() {
            if !force_all && next.expires_at > now {
                break;
            }
            let Some(scheduled) = self.heap.pop() else {
                break;
            };
            if let Some((timer, _)) = self.take_live(&scheduled) {
                expired.push(timer);
            }
            self.discard_stale_top();
        }
        expired
    }

    fn is_live(&self, scheduled: &Scheduled) -> bool {
        self.pending
            .get(&scheduled.pos)
            .is_some_and(|(_, seq)| *seq == scheduled.sequence)
    }

    fn take_live(&mut self, scheduled: &Scheduled) -> Option<(JellyTimer, u64)> {
        if self.is_live(scheduled) {
            self.pending.remove(&scheduled.pos)
        } else {
            None
        }
    }

    fn discard_stale_top(&mut self) {
        while let Some(top) = self.heap.peek() {
            if self.is_live(top) {
                break;
            }
            self.heap.pop();
        }
    }
}
