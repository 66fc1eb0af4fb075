//! voxsync - chunk synchronization client for a networked voxel world
//!
//! Connects to a server (or replays a captured byte stream) and keeps the
//! local chunk set in step, logging what changes.

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info, trace};
use voxsync_client::{ClientSession, SessionStatus, SyncConfig, SyncEvent};

#[derive(Parser, Debug)]
#[command(author, version, about = "Voxel world chunk synchronization client", long_about = None)]
struct Args {
    /// Server address, e.g. 127.0.0.1:57712
    #[arg(long, conflicts_with = "frames", required_unless_present = "frames")]
    server: Option<String>,
    /// Replay a captured server byte stream instead of connecting
    #[arg(long)]
    frames: Option<PathBuf>,
    /// Sync configuration file
    #[arg(long, default_value = "config/sync.toml")]
    config: PathBuf,
    /// Milliseconds between ticks
    #[arg(long, default_value_t = 16)]
    tick_ms: u64,
}

/// Capture file posing as a connection; outgoing bytes are discarded.
struct Replay {
    input: BufReader<File>,
    sent: usize,
}

impl Read for Replay {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for Replay {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sent += buf.len();
        trace!(bytes = buf.len(), "discarding outgoing bytes");
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    info!("Starting voxsync v{}", env!("CARGO_PKG_VERSION"));
    let config = SyncConfig::load_from_path(&args.config);
    let tick = Duration::from_millis(args.tick_ms);

    if let Some(path) = &args.frames {
        let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let replay = Replay {
            input: BufReader::new(file),
            sent: 0,
        };
        let session = run(ClientSession::inline(replay, &config), Duration::ZERO);
        info!(sent_bytes = session.stream().sent, "replay finished");
        return Ok(());
    }

    let addr = args.server.as_deref().context("--server or --frames is required")?;
    let stream = TcpStream::connect(addr).with_context(|| format!("Failed to connect to {addr}"))?;
    stream.set_nodelay(true)?;
    stream.set_nonblocking(true)?;
    info!(%addr, "connected");

    run(ClientSession::connect(stream, &config)?, tick);
    Ok(())
}

fn run<S: Read + Write>(mut session: ClientSession<S>, tick: Duration) -> ClientSession<S> {
    loop {
        let status = session.tick(Instant::now());

        let dirty = session.take_dirty();
        if !dirty.is_empty() {
            debug!(chunks = dirty.len(), "mesh rebuild needed");
        }
        for event in session.take_events() {
            match event {
                SyncEvent::ChunkReady(coord) => debug!(%coord, "chunk ready"),
                SyncEvent::ChunkRejected(coord) => info!(%coord, "chunk rejected"),
                SyncEvent::TextBlock {
                    coord,
                    pos,
                    activated,
                } => info!(%coord, %pos, activated, "text block changed"),
            }
        }

        if status == SessionStatus::Disconnected {
            break;
        }
        if !tick.is_zero() {
            thread::sleep(tick);
        }
    }

    info!(
        resident = session.store().len(),
        super_chunks = session.super_chunks().len(),
        "session ended"
    );
    session
}
