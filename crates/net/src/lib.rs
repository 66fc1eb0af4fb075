#![warn(missing_docs)]
//! Wire format of the chunk synchronization protocol.
//!
//! Messages travel over a plain byte stream as length-prefixed frames. This
//! crate turns bytes into typed commands and back; applying them to world
//! state is the client's job.

mod framing;
mod protocol;
mod wire;

pub use framing::{encode_frame, Frame, FrameEvent, FrameReader, FRAME_HEADER_LEN, MAX_FRAME_LEN};
pub use protocol::{
    command, BlockChange, BlockUpdate, ChunkAnswer, ClientCommand, JellyBlocks, ProtocolError,
    ServerCommand, SuperChunkAnswer,
};
pub use wire::{WireError, WireReader, WireWriter};
