//! Off-thread chunk decompression.
//!
//! Chunk answers move by value into the processor and come back as
//! [`Processed`] results, so the main thread never sees a half-built voxel
//! array.

use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error};
use voxsync_world::{ChunkBlocks, Processed, StoneReskin};

/// Runs [`ChunkBlocks::uncompress`] at most once per submitted chunk.
pub trait ChunkProcessor {
    /// Hand a chunk over for decompression.
    fn submit(&mut self, blocks: ChunkBlocks);

    /// Results finished since the last call. Never blocks.
    fn drain_completed(&mut self) -> Vec<Processed>;
}

/// Decompresses on the calling thread during `submit`.
#[derive(Debug, Default)]
pub struct InlineProcessor {
    reskin: StoneReskin,
    completed: Vec<Processed>,
}

impl InlineProcessor {
    pub fn new(reskin: StoneReskin) -> Self {
        Self {
            reskin,
            completed: Vec::new(),
        }
    }
}

impl ChunkProcessor for InlineProcessor {
    fn submit(&mut self, blocks: ChunkBlocks) {
        self.completed.push(Processed::run(blocks, self.reskin));
    }

    fn drain_completed(&mut self) -> Vec<Processed> {
        std::mem::take(&mut self.completed)
    }
}

/// Single background worker fed over channels.
pub struct WorkerQueue {
    jobs: Option<UnboundedSender<ChunkBlocks>>,
    results: UnboundedReceiver<Processed>,
    worker: Option<JoinHandle<()>>,
    in_flight: usize,
}

impl WorkerQueue {
    /// Start the worker thread.
    pub fn spawn(reskin: StoneReskin) -> Result<Self> {
        let (job_tx, mut job_rx) = mpsc::unbounded_channel::<ChunkBlocks>();
        let (result_tx, result_rx) = mpsc::unbounded_channel();

        let worker = thread::Builder::new()
            .name("chunk-decompress".into())
            .spawn(move || {
                while let Some(blocks) = job_rx.blocking_recv() {
                    if result_tx.send(Processed::run(blocks, reskin)).is_err() {
                        break;
                    }
                }
                debug!("chunk worker stopped");
            })
            .context("Failed to spawn chunk worker")?;

        Ok(Self {
            jobs: Some(job_tx),
            results: result_rx,
            worker: Some(worker),
            in_flight: 0,
        })
    }

    /// Chunks submitted whose result has not been drained yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Stop accepting work and wait for the worker to exit.
    pub fn shutdown(&mut self) {
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("chunk worker panicked");
            }
        }
    }
}

impl ChunkProcessor for WorkerQueue {
    fn submit(&mut self, blocks: ChunkBlocks) {
        let coord = blocks.coord();
        match &self.jobs {
            Some(jobs) if jobs.send(blocks).is_ok() => self.in_flight += 1,
            _ => error!(%coord, "chunk worker gone, dropping chunk"),
        }
    }

    fn drain_completed(&mut self) -> Vec<Processed> {
        let mut completed = Vec::new();
        while let Ok(processed) = self.results.try_recv() {
            completed.push(processed);
        }
        self.in_flight -= completed.len();
        completed
    }
}

impl Drop for WorkerQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}
