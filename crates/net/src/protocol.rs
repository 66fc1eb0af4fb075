//! Typed chunk synchronization commands.

use thiserror::Error;
use voxsync_core::{BlockId, ChunkCoord, LocalPos};

use crate::framing::{encode_frame, Frame};
use crate::wire::{WireError, WireReader, WireWriter};

/// Command ids shared with the server.
pub mod command {
    /// Server to client: full chunk contents.
    pub const CHUNK_ANSWER: u8 = 2;
    /// Client to server: ask for a chunk, with the checksum held locally.
    pub const REQ_CHUNK: u8 = 3;
    /// Server to client: the player's world position.
    pub const REPORT_COORDINATE: u8 = 4;
    /// Server to client: individual voxel changes in one chunk.
    pub const BLOCK_UPDATE: u8 = 7;
    /// Server to client: voxels to hide temporarily.
    pub const JELLY_BLOCKS: u8 = 31;
    /// Server to client: super-chunk summary.
    pub const SUPERCHUNK_ANSWER: u8 = 32;
    /// Client to server: request a super-chunk summary.
    pub const VERIFY_SUPERCHUNK_CS: u8 = 33;
}

/// Malformed command payloads.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// A field ran past the end of the payload.
    #[error("command {command}: {source}")]
    Truncated {
        /// Command id.
        command: u8,
        /// Underlying read failure.
        #[source]
        source: WireError,
    },
    /// A repeated record was cut off.
    #[error("command {command}: {len} trailing bytes do not form a {record}-byte record")]
    PartialRecord {
        /// Command id.
        command: u8,
        /// Leftover byte count.
        len: usize,
        /// Size of one record.
        record: usize,
    },
    /// A local voxel offset lies outside the chunk.
    #[error("command {command}: local offset {offset:?} outside chunk")]
    OffsetOutOfRange {
        /// Command id.
        command: u8,
        /// Offending offset.
        offset: [u8; 3],
    },
    /// The frame could not be encoded.
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Header and run stream of a chunk answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkAnswer {
    /// Raw flag bits, see the world crate's chunk flags.
    pub flags: u32,
    /// Checksum the server holds for this chunk.
    pub checksum: u32,
    /// Owning player or territory.
    pub owner: u32,
    /// Absolute chunk coordinate.
    pub coord: ChunkCoord,
    /// Voxel stream, run-length encoded when flagged.
    pub stream: Vec<u8>,
}

/// One voxel change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockChange {
    /// Voxel inside the chunk.
    pub pos: LocalPos,
    /// New block type.
    pub block: BlockId,
}

/// Voxel changes for one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockUpdate {
    /// Absolute chunk coordinate.
    pub coord: ChunkCoord,
    /// Changes in arrival order.
    pub changes: Vec<BlockChange>,
}

/// Voxels of one chunk to hide for a while.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JellyBlocks {
    /// Unused by the client, kept for logging.
    pub flags: u8,
    /// Seconds until the voxels reappear.
    pub timeout_secs: u8,
    /// Low bytes of the chunk coordinate.
    pub lsb: [u8; 3],
    /// Voxels to hide.
    pub positions: Vec<LocalPos>,
}

/// Summary of one super-chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuperChunkAnswer {
    /// Low bytes of the super-chunk's origin chunk.
    pub lsb: [u8; 3],
    /// Aggregate checksum followed by the per-chunk records.
    pub aggregate: Vec<u8>,
}

/// Messages from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerCommand {
    /// Full chunk contents.
    ChunkAnswer(ChunkAnswer),
    /// World block position of the player.
    ReportCoordinate {
        /// Block x.
        x: i32,
        /// Block y.
        y: i32,
        /// Block z.
        z: i32,
    },
    /// Individual voxel changes.
    BlockUpdate(BlockUpdate),
    /// Temporarily hidden voxels.
    JellyBlocks(JellyBlocks),
    /// Super-chunk summary.
    SuperChunkAnswer(SuperChunkAnswer),
    /// Any command this client does not handle.
    Unknown(u8),
}

impl ServerCommand {
    /// Decode a frame received from the server.
    ///
    /// Every command id decodes; ids outside the chunk protocol come back as
    /// [`ServerCommand::Unknown`].
    pub fn decode(frame: &Frame) -> Result<Self, ProtocolError> {
        let cmd = frame.command;
        let truncated = |source| ProtocolError::Truncated {
            command: cmd,
            source,
        };
        let mut reader = WireReader::new(&frame.payload);

        let decoded = match cmd {
            command::CHUNK_ANSWER => {
                let flags = reader.u32().map_err(truncated)?;
                let checksum = reader.u32().map_err(truncated)?;
                let owner = reader.u32().map_err(truncated)?;
                let coord = read_coord(&mut reader).map_err(truncated)?;
                ServerCommand::ChunkAnswer(ChunkAnswer {
                    flags,
                    checksum,
                    owner,
                    coord,
                    stream: reader.rest().to_vec(),
                })
            }
            command::REPORT_COORDINATE => {
                let x = reader.i32().map_err(truncated)?;
                let y = reader.i32().map_err(truncated)?;
                let z = reader.i32().map_err(truncated)?;
                ServerCommand::ReportCoordinate { x, y, z }
            }
            command::BLOCK_UPDATE => {
                let coord = read_coord(&mut reader).map_err(truncated)?;
                let changes = records::<4>(cmd, reader.rest())?
                    .map(|[x, y, z, block]| {
                        local(cmd, [x, y, z]).map(|pos| BlockChange { pos, block })
                    })
                    .collect::<Result<_, _>>()?;
                ServerCommand::BlockUpdate(BlockUpdate { coord, changes })
            }
            command::JELLY_BLOCKS => {
                let flags = reader.u8().map_err(truncated)?;
                let timeout_secs = reader.u8().map_err(truncated)?;
                let lsb = [
                    reader.u8().map_err(truncated)?,
                    reader.u8().map_err(truncated)?,
                    reader.u8().map_err(truncated)?,
                ];
                let positions = records::<3>(cmd, reader.rest())?
                    .map(|offset| local(cmd, offset))
                    .collect::<Result<_, _>>()?;
                ServerCommand::JellyBlocks(JellyBlocks {
                    flags,
                    timeout_secs,
                    lsb,
                    positions,
                })
            }
            command::SUPERCHUNK_ANSWER => {
                let lsb = [
                    reader.u8().map_err(truncated)?,
                    reader.u8().map_err(truncated)?,
                    reader.u8().map_err(truncated)?,
                ];
                ServerCommand::SuperChunkAnswer(SuperChunkAnswer {
                    lsb,
                    aggregate: reader.rest().to_vec(),
                })
            }
            other => ServerCommand::Unknown(other),
        };
        Ok(decoded)
    }

    /// Command id of this message.
    pub fn id(&self) -> u8 {
        match self {
            ServerCommand::ChunkAnswer(_) => command::CHUNK_ANSWER,
            ServerCommand::ReportCoordinate { .. } => command::REPORT_COORDINATE,
            ServerCommand::BlockUpdate(_) => command::BLOCK_UPDATE,
            ServerCommand::JellyBlocks(_) => command::JELLY_BLOCKS,
            ServerCommand::SuperChunkAnswer(_) => command::SUPERCHUNK_ANSWER,
            ServerCommand::Unknown(id) => *id,
        }
    }

    /// Encode as the server would. Used by replay tooling and tests.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut w = WireWriter::new();
        match self {
            ServerCommand::ChunkAnswer(answer) => {
                w.u32(answer.flags).u32(answer.checksum).u32(answer.owner);
                write_coord(&mut w, answer.coord);
                w.bytes(&answer.stream);
            }
            ServerCommand::ReportCoordinate { x, y, z } => {
                w.i32(*x).i32(*y).i32(*z);
            }
            ServerCommand::BlockUpdate(update) => {
                write_coord(&mut w, update.coord);
                for change in &update.changes {
                    w.u8(change.pos.x).u8(change.pos.y).u8(change.pos.z).u8(change.block);
                }
            }
            ServerCommand::JellyBlocks(jelly) => {
                w.u8(jelly.flags).u8(jelly.timeout_secs).bytes(&jelly.lsb);
                for pos in &jelly.positions {
                    w.u8(pos.x).u8(pos.y).u8(pos.z);
                }
            }
            ServerCommand::SuperChunkAnswer(answer) => {
                w.bytes(&answer.lsb).bytes(&answer.aggregate);
            }
            ServerCommand::Unknown(_) => {}
        }
        Ok(encode_frame(self.id(), &w.into_inner())?)
    }
}

/// Messages to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCommand {
    /// Ask for a chunk, telling the server which checksum we hold.
    RequestChunk {
        /// Absolute chunk coordinate.
        coord: ChunkCoord,
        /// Checksum of the local copy, zero if none.
        checksum: u32,
    },
    /// Ask for the summary of the super-chunk whose origin has these low bytes.
    VerifySuperChunk {
        /// Low bytes of the origin chunk coordinate.
        lsb: [u8; 3],
    },
}

impl ClientCommand {
    /// Request for the super-chunk starting at `origin`.
    pub fn verify_super_chunk(origin: ChunkCoord) -> Self {
        let (x, y, z) = origin.lsb();
        ClientCommand::VerifySuperChunk { lsb: [x, y, z] }
    }

    /// Command id of this message.
    pub fn id(&self) -> u8 {
        match self {
            ClientCommand::RequestChunk { .. } => command::REQ_CHUNK,
            ClientCommand::VerifySuperChunk { .. } => command::VERIFY_SUPERCHUNK_CS,
        }
    }

    /// Encode into a frame.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut w = WireWriter::with_capacity(16);
        match self {
            ClientCommand::RequestChunk { coord, checksum } => {
                w.i32(coord.x).i32(coord.y).i32(coord.z).u32(*checksum);
            }
            ClientCommand::VerifySuperChunk { lsb } => {
                // The checksum slot is always sent zeroed.
                w.bytes(lsb).u32(0);
            }
        }
        Ok(encode_frame(self.id(), &w.into_inner())?)
    }

    /// Decode a frame the client sent. Used by test servers.
    pub fn decode(frame: &Frame) -> Result<Option<Self>, ProtocolError> {
        let cmd = frame.command;
        let truncated = |source| ProtocolError::Truncated {
            command: cmd,
            source,
        };
        let mut reader = WireReader::new(&frame.payload);
        let decoded = match cmd {
            command::REQ_CHUNK => {
                let coord = read_coord(&mut reader).map_err(truncated)?;
                let checksum = reader.u32().map_err(truncated)?;
                Some(ClientCommand::RequestChunk { coord, checksum })
            }
            command::VERIFY_SUPERCHUNK_CS => {
                let lsb = reader.bytes(3).map_err(truncated)?;
                reader.u32().map_err(truncated)?;
                Some(ClientCommand::VerifySuperChunk {
                    lsb: [lsb[0], lsb[1], lsb[2]],
                })
            }
            _ => None,
        };
        Ok(decoded)
    }
}

fn read_coord(reader: &mut WireReader<'_>) -> Result<ChunkCoord, WireError> {
    Ok(ChunkCoord::new(reader.i32()?, reader.i32()?, reader.i32()?))
}

fn write_coord(w: &mut WireWriter, coord: ChunkCoord) {
    w.i32(coord.x).i32(coord.y).i32(coord.z);
}

fn records<const N: usize>(
    command: u8,
    bytes: &[u8],
) -> Result<impl Iterator<Item = [u8; N]> + '_, ProtocolError> {
    let chunks = bytes.chunks_exact(N);
    if !chunks.remainder().is_empty() {
        return Err(ProtocolError::PartialRecord {
            command,
            len: chunks.remainder().len(),
            record: N,
        });
    }
    Ok(chunks.map(|record| {
        let mut out = [0u8; N];
        out.copy_from_slice(record);
        out
    }))
}

fn local(command: u8, offset: [u8; 3]) -> Result<LocalPos, ProtocolError> {
    let [x, y, z] = offset;
    LocalPos::new(x, y, z).ok_or(ProtocolError::OffsetOutOfRange { command, offset })
}
