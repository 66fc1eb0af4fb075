//! Per-frame driver tying the socket, the dispatcher, and the processor together.

use std::io::{ErrorKind, Read, Write};
use std::time::Instant;

use anyhow::Result;
use tracing::{debug, info, warn};
use voxsync_core::ChunkCoord;
use voxsync_net::{FrameEvent, FrameReader};
use voxsync_world::{ChunkStore, SuperChunkManager};

use crate::config::SyncConfig;
use crate::dispatch;
use crate::processing::{ChunkProcessor, InlineProcessor, WorkerQueue};
use crate::sync::{ChunkSync, SyncEvent};

/// Connection state reported by [`ClientSession::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Connected,
    /// The server went away. The world stays as last synchronized.
    Disconnected,
}

/// Synchronization session over one server connection.
pub struct ClientSession<S> {
    reader: FrameReader<S>,
    sync: ChunkSync,
    processor: Box<dyn ChunkProcessor>,
    pending_write: Vec<u8>,
    status: SessionStatus,
}

impl<S: Read + Write> ClientSession<S> {
    /// Session decompressing on a background worker.
    pub fn connect(stream: S, config: &SyncConfig) -> Result<Self> {
        let worker = WorkerQueue::spawn(config.reskin())?;
        Ok(Self::with_processor(stream, config, Box::new(worker)))
    }

    /// Session decompressing on the calling thread.
    pub fn inline(stream: S, config: &SyncConfig) -> Self {
        Self::with_processor(stream, config, Box::new(InlineProcessor::new(config.reskin())))
    }

    pub fn with_processor(
        stream: S,
        config: &SyncConfig,
        processor: Box<dyn ChunkProcessor>,
    ) -> Self {
        Self {
            reader: FrameReader::new(stream),
            sync: ChunkSync::new(config),
            processor,
            pending_write: Vec::new(),
            status: SessionStatus::Connected,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Run one frame's worth of synchronization work. Never blocks.
    pub fn tick(&mut self, now: Instant) -> SessionStatus {
        if self.status == SessionStatus::Disconnected {
            return self.status;
        }

        self.read_messages(now);
        self.submit_pending();

        for processed in self.processor.drain_completed() {
            self.sync.complete(processed, now);
        }
        self.submit_pending();

        let restored = self.sync.store_mut().test_all_jelly_timeouts(now, false);
        if restored > 0 {
            debug!(restored, "jelly blocks reappeared");
        }

        self.sync.request_due_checksums(now);
        self.flush_outgoing();
        self.status
    }

    fn read_messages(&mut self, now: Instant) {
        while let Some(event) = self.reader.poll() {
            match event {
                FrameEvent::Message(frame) => dispatch::parse(&frame, &mut self.sync, now),
                FrameEvent::Closed => {
                    self.disconnect();
                    break;
                }
            }
        }
    }

    fn submit_pending(&mut self) {
        for blocks in self.sync.take_submissions() {
            self.processor.submit(blocks);
        }
    }

    fn flush_outgoing(&mut self) {
        for command in self.sync.take_outgoing() {
            match command.encode() {
                Ok(bytes) => self.pending_write.extend(bytes),
                Err(err) => warn!(%err, "dropping outgoing command"),
            }
        }

        while !self.pending_write.is_empty() && self.status == SessionStatus::Connected {
            match self.reader.get_mut().write(&self.pending_write) {
                Ok(0) => self.disconnect(),
                Ok(n) => {
                    self.pending_write.drain(..n);
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!(%err, "connection write failed");
                    self.disconnect();
                }
            }
        }
        if self.status == SessionStatus::Connected {
            if let Err(err) = self.reader.get_mut().flush() {
                if err.kind() != ErrorKind::WouldBlock {
                    warn!(%err, "connection flush failed");
                    self.disconnect();
                }
            }
        }
    }

    fn disconnect(&mut self) {
        if self.status == SessionStatus::Connected {
            info!(resident = self.sync.store().len(), "disconnected from server");
            self.status = SessionStatus::Disconnected;
        }
    }

    /// Bytes queued but not yet accepted by the socket.
    pub fn pending_write_len(&self) -> usize {
        self.pending_write.len()
    }

    /// Chunks needing a mesh rebuild since the last call.
    pub fn take_dirty(&mut self) -> Vec<ChunkCoord> {
        self.sync.take_dirty()
    }

    pub fn take_events(&mut self) -> Vec<SyncEvent> {
        self.sync.take_events()
    }

    pub fn store(&self) -> &ChunkStore {
        self.sync.store()
    }

    pub fn super_chunks(&self) -> &SuperChunkManager {
        self.sync.super_chunks()
    }

    pub fn sync(&self) -> &ChunkSync {
        &self.sync
    }

    pub fn sync_mut(&mut self) -> &mut ChunkSync {
        &mut self.sync
    }

    /// Underlying stream.
    pub fn stream(&self) -> &S {
        self.reader.get_ref()
    }
}
