//! Chunk synchronization client: keeps a local voxel world in step with the server.

mod config;
pub mod dispatch;
mod processing;
mod session;
mod sync;

pub use config::SyncConfig;
pub use processing::{ChunkProcessor, InlineProcessor, WorkerQueue};
pub use session::{ClientSession, SessionStatus};
pub use sync::{ChunkSync, SyncEvent};
