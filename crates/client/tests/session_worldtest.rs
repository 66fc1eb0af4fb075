//! End-to-end synchronization over a scripted connection.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};
use std::rc::Rc;
use std::time::{Duration, Instant};

use voxsync_client::{ClientSession, SessionStatus, SyncConfig, SyncEvent};
use voxsync_core::{
    ChunkCoord, LocalPos, BLOCK_AIR, BLOCK_STONE, BLOCK_TELEPORT, CHUNK_VOLUME, SCH_VOLUME,
};
use voxsync_net::{
    ChunkAnswer, ClientCommand, FrameEvent, FrameReader, JellyBlocks, ServerCommand,
    SuperChunkAnswer, FRAME_HEADER_LEN, MAX_FRAME_LEN,
};
use voxsync_world::rle::encode_runs;
use voxsync_world::{
    payload_checksum, ChunkFlags, ChunkInfo, ChunkInfoFlags, ChunkState, SuperChunkAggregate,
};

#[derive(Default)]
struct Wire {
    incoming: VecDeque<u8>,
    written: Vec<u8>,
    closed: bool,
}

/// Non-blocking socket stand-in; the test keeps a second handle to feed it.
#[derive(Clone, Default)]
struct FakeSocket(Rc<RefCell<Wire>>);

impl FakeSocket {
    fn send(&self, command: &ServerCommand) {
        let bytes = command.encode().unwrap();
        self.0.borrow_mut().incoming.extend(bytes);
    }

    fn close(&self) {
        self.0.borrow_mut().closed = true;
    }

    fn sent_commands(&self) -> Vec<ClientCommand> {
        let written = std::mem::take(&mut self.0.borrow_mut().written);
        let mut reader = FrameReader::new(written.as_slice());
        let mut commands = Vec::new();
        while let Some(FrameEvent::Message(frame)) = reader.poll() {
            commands.extend(ClientCommand::decode(&frame).unwrap());
        }
        commands
    }
}

impl Read for FakeSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut wire = self.0.borrow_mut();
        if wire.incoming.is_empty() {
            return if wire.closed {
                Ok(0)
            } else {
                Err(ErrorKind::WouldBlock.into())
            };
        }
        let n = buf.len().min(wire.incoming.len());
        for (slot, byte) in buf.iter_mut().zip(wire.incoming.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for FakeSocket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn chunk_answer(coord: ChunkCoord, voxels: &[u8], checksum: Option<u32>) -> ServerCommand {
    let stream = encode_runs(voxels);
    ServerCommand::ChunkAnswer(ChunkAnswer {
        flags: ChunkFlags::COMPRESSED.bits(),
        checksum: checksum.unwrap_or_else(|| payload_checksum(&stream)),
        owner: 1,
        coord,
        stream,
    })
}

fn tick_until<S: Read + Write>(
    session: &mut ClientSession<S>,
    now: Instant,
    mut done: impl FnMut(&mut ClientSession<S>) -> bool,
) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        session.tick(now);
        if done(session) {
            return;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    panic!("condition not reached");
}

#[test]
fn chunk_answer_to_teleport_marker() {
    let socket = FakeSocket::default();
    let config = SyncConfig::default();
    let mut session = ClientSession::connect(socket.clone(), &config).unwrap();
    let now = Instant::now();
    let coord = ChunkCoord::new(2, 3, -1);

    let mut voxels = vec![BLOCK_STONE; CHUNK_VOLUME];
    voxels[..10].fill(BLOCK_AIR);
    socket.send(&chunk_answer(coord, &voxels, None));

    let mut events = Vec::new();
    tick_until(&mut session, now, |s| {
        events.extend(s.take_events());
        s.store().state(coord) == Some(ChunkState::Ready)
    });
    assert_eq!(events, vec![SyncEvent::ChunkReady(coord)]);
    assert_eq!(session.take_dirty(), vec![coord]);
    assert!(session.take_dirty().is_empty());

    let origin = coord.super_chunk_origin();
    assert_eq!(
        socket.sent_commands(),
        vec![ClientCommand::verify_super_chunk(origin)]
    );

    let checksum = session.store().get(coord).unwrap().blocks().unwrap().checksum();
    let mut entries = vec![ChunkInfo::default(); SCH_VOLUME];
    entries[coord.super_chunk_index()] = ChunkInfo {
        checksum,
        teleport: [0, 0, 5],
        flags: ChunkInfoFlags::TELEPORT,
    };
    let (x, y, z) = origin.lsb();
    socket.send(&ServerCommand::SuperChunkAnswer(SuperChunkAnswer {
        lsb: [x, y, z],
        aggregate: SuperChunkAggregate::from_entries(origin, 1, entries).to_bytes(),
    }));
    session.tick(now);

    let teleport = LocalPos::new(0, 0, 5).unwrap();
    assert_eq!(session.sync().block(coord, teleport), Some(BLOCK_TELEPORT));
    assert_eq!(session.take_dirty(), vec![coord]);
    assert!(!session.super_chunks().get(coord).unwrap().update_requested());
    assert!(socket.sent_commands().is_empty());
}

#[test]
fn suspect_chunk_is_requested_until_confirmed() {
    let socket = FakeSocket::default();
    let config = SyncConfig {
        checksum_timeout_ms: 100,
        verify_payload_checksum: true,
        ..SyncConfig::default()
    };
    let mut session = ClientSession::inline(socket.clone(), &config);
    let start = Instant::now();
    let coord = ChunkCoord::new(-3, 0, 0);
    let voxels = vec![BLOCK_AIR; CHUNK_VOLUME];

    socket.send(&chunk_answer(coord, &voxels, Some(0xDEAD)));
    session.tick(start);
    assert_eq!(session.store().state(coord), Some(ChunkState::ChecksumSuspect));
    let sent = socket.sent_commands();
    assert!(sent.contains(&ClientCommand::RequestChunk {
        coord,
        checksum: 0xDEAD
    }));

    session.tick(start + Duration::from_millis(50));
    assert!(socket.sent_commands().is_empty());

    session.tick(start + Duration::from_millis(100));
    assert_eq!(
        socket.sent_commands(),
        vec![ClientCommand::RequestChunk {
            coord,
            checksum: 0xDEAD
        }]
    );

    socket.send(&chunk_answer(coord, &voxels, None));
    session.tick(start + Duration::from_millis(120));
    assert_eq!(session.store().state(coord), Some(ChunkState::Ready));

    session.tick(start + Duration::from_secs(5));
    assert!(!socket
        .sent_commands()
        .iter()
        .any(|command| matches!(command, ClientCommand::RequestChunk { .. })));
}

#[test]
fn unanswered_super_chunk_request_is_repeated() {
    let socket = FakeSocket::default();
    let config = SyncConfig {
        checksum_timeout_ms: 100,
        ..SyncConfig::default()
    };
    let mut session = ClientSession::inline(socket.clone(), &config);
    let start = Instant::now();
    let coord = ChunkCoord::new(1, 1, 1);
    let origin = coord.super_chunk_origin();
    let verify = ClientCommand::verify_super_chunk(origin);

    socket.send(&chunk_answer(coord, &vec![BLOCK_AIR; CHUNK_VOLUME], None));
    session.tick(start);
    assert_eq!(socket.sent_commands(), vec![verify]);

    let mut resent = 0;
    for step in 1..=50u64 {
        session.tick(start + Duration::from_millis(step * 100));
        resent += socket
            .sent_commands()
            .iter()
            .filter(|command| **command == verify)
            .count();
    }
    assert!(resent >= 40, "only {resent} retries over 50 timeouts");
    assert!(session.super_chunks().get(coord).unwrap().update_requested());

    let checksum = session.store().get(coord).unwrap().blocks().unwrap().checksum();
    let mut entries = vec![ChunkInfo::default(); SCH_VOLUME];
    entries[coord.super_chunk_index()].checksum = checksum;
    let (x, y, z) = origin.lsb();
    socket.send(&ServerCommand::SuperChunkAnswer(SuperChunkAnswer {
        lsb: [x, y, z],
        aggregate: SuperChunkAggregate::from_entries(origin, 1, entries).to_bytes(),
    }));
    session.tick(start + Duration::from_secs(6));
    socket.sent_commands();
    session.tick(start + Duration::from_secs(60));
    assert!(socket.sent_commands().is_empty());
}

#[test]
fn chunk_at_coordinate_limits_installs() {
    let socket = FakeSocket::default();
    let mut session = ClientSession::inline(socket.clone(), &SyncConfig::default());
    let now = Instant::now();
    let low = ChunkCoord::new(i32::MIN, i32::MIN + 7, 0);
    let high = ChunkCoord::new(i32::MAX, 0, i32::MIN);

    socket.send(&chunk_answer(low, &vec![BLOCK_STONE; CHUNK_VOLUME], None));
    socket.send(&chunk_answer(high, &vec![BLOCK_STONE; CHUNK_VOLUME], None));
    assert_eq!(session.tick(now), SessionStatus::Connected);

    assert_eq!(session.store().state(low), Some(ChunkState::Ready));
    assert_eq!(session.store().state(high), Some(ChunkState::Ready));
    assert!(session.super_chunks().get(low).is_some());
}

#[test]
fn large_jelly_message_is_applied_in_one_tick() {
    let socket = FakeSocket::default();
    let config = SyncConfig {
        stone_variant_one_in: 0,
        ..SyncConfig::default()
    };
    let mut session = ClientSession::inline(socket.clone(), &config);
    let now = Instant::now();
    let coord = ChunkCoord::new(0, 0, 0);
    socket.send(&chunk_answer(coord, &vec![BLOCK_STONE; CHUNK_VOLUME], None));
    session.tick(now);

    // As many triples as fit in one frame.
    let count = (MAX_FRAME_LEN - FRAME_HEADER_LEN - 5) / 3;
    let positions: Vec<LocalPos> = (0..count).filter_map(LocalPos::from_index).collect();
    let (x, y, z) = coord.lsb();
    socket.send(&ServerCommand::JellyBlocks(JellyBlocks {
        flags: 0,
        timeout_secs: 1,
        lsb: [x, y, z],
        positions: positions.clone(),
    }));

    let started = Instant::now();
    session.tick(now);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(positions
        .iter()
        .all(|&pos| session.sync().block(coord, pos) == Some(BLOCK_AIR)));

    session.tick(now + Duration::from_secs(1));
    assert!(positions
        .iter()
        .all(|&pos| session.sync().block(coord, pos) == Some(BLOCK_STONE)));
}

#[test]
fn closed_connection_keeps_world() {
    let socket = FakeSocket::default();
    let mut session = ClientSession::inline(socket.clone(), &SyncConfig::default());
    let now = Instant::now();
    let coord = ChunkCoord::new(0, 0, 0);

    socket.send(&chunk_answer(coord, &vec![BLOCK_STONE; CHUNK_VOLUME], None));
    socket.send(&ServerCommand::Unknown(200));
    socket.close();

    assert_eq!(session.tick(now), SessionStatus::Disconnected);
    assert_eq!(session.status(), SessionStatus::Disconnected);
    assert_eq!(session.store().state(coord), Some(ChunkState::Ready));
    assert_eq!(session.tick(now), SessionStatus::Disconnected);
}
