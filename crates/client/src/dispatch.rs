//! Applies decoded server commands to the synchronization state.

use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};
use voxsync_core::{ChunkCoord, BLOCK_TEXT};
use voxsync_net::{BlockUpdate, ChunkAnswer, Frame, JellyBlocks, ServerCommand, SuperChunkAnswer};
use voxsync_world::{ChunkBlocks, ChunkFlags, EditOutcome};

use crate::sync::ChunkSync;

/// Apply one complete frame.
///
/// Never fails: unknown commands and malformed payloads are logged and
/// dropped, and the connection stays up.
pub fn parse(frame: &Frame, sync: &mut ChunkSync, now: Instant) {
    let command = match ServerCommand::decode(frame) {
        Ok(command) => command,
        Err(err) => {
            warn!(%err, len = frame.payload.len(), "dropping malformed message");
            return;
        }
    };

    match command {
        ServerCommand::ChunkAnswer(answer) => chunk_answer(answer, sync),
        ServerCommand::ReportCoordinate { x, y, z } => {
            sync.set_reference(ChunkCoord::from_block(x, y, z));
        }
        ServerCommand::BlockUpdate(update) => block_update(update, sync),
        ServerCommand::JellyBlocks(jelly) => jelly_blocks(jelly, sync, now),
        ServerCommand::SuperChunkAnswer(answer) => super_chunk_answer(answer, sync, now),
        ServerCommand::Unknown(id) => {
            warn!(command = id, len = frame.payload.len(), "ignoring unknown command");
        }
    }
}

fn chunk_answer(answer: ChunkAnswer, sync: &mut ChunkSync) {
    let ChunkAnswer {
        flags,
        checksum,
        owner,
        coord,
        stream,
    } = answer;
    trace!(%coord, bytes = stream.len(), "chunk answer");
    let blocks = ChunkBlocks::new(
        coord,
        ChunkFlags::from_bits_retain(flags),
        checksum,
        owner,
        stream,
    );
    sync.accept_answer(blocks);
}

fn block_update(update: BlockUpdate, sync: &mut ChunkSync) {
    let coord = update.coord;
    for change in update.changes {
        let outcome = sync
            .store_mut()
            .command_block_update(coord, change.pos, change.block);
        if outcome == EditOutcome::Dropped {
            continue;
        }
        if change.block == BLOCK_TEXT {
            sync.text_block_changed(coord, change.pos);
        }
    }
}

fn jelly_blocks(jelly: JellyBlocks, sync: &mut ChunkSync, now: Instant) {
    let [x, y, z] = jelly.lsb;
    let coord = sync.reference().update_lsb(x, y, z);
    let delta = Duration::from_secs(u64::from(jelly.timeout_secs));
    let store = sync.store_mut();

    let hidden = jelly
        .positions
        .into_iter()
        .filter(|&pos| store.add_jelly_block(coord, pos, delta, now) != EditOutcome::Dropped)
        .count();
    debug!(%coord, hidden, flags = jelly.flags, timeout = jelly.timeout_secs, "jelly blocks");
}

fn super_chunk_answer(answer: SuperChunkAnswer, sync: &mut ChunkSync, now: Instant) {
    let [x, y, z] = answer.lsb;
    let origin = sync.reference().update_lsb(x, y, z).super_chunk_origin();
    if let Err(err) = sync.super_chunks_mut().data(origin, &answer.aggregate) {
        warn!(%err, "dropping super-chunk answer");
        return;
    }
    sync.recheck_super_chunk(origin, now);
}
