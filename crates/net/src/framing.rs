//! Length-prefixed framing over a non-blocking byte stream.
//!
//! Frame format: `[total_len: u16][command: u8][payload]`, where `total_len`
//! counts the length field and the command byte too.

use std::io::{ErrorKind, Read};

use tracing::{debug, warn};

use crate::wire::WireError;

/// Length field plus command byte.
pub const FRAME_HEADER_LEN: usize = 3;
/// Largest frame the length prefix can describe.
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

const READ_CHUNK: usize = 4096;

/// One complete message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Command id.
    pub command: u8,
    /// Bytes following the command id.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Build a frame from its parts.
    pub fn new(command: u8, payload: Vec<u8>) -> Self {
        Self { command, payload }
    }

    /// Wire encoding of this frame.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        encode_frame(self.command, &self.payload)
    }
}

/// Encode one frame.
pub fn encode_frame(command: u8, payload: &[u8]) -> Result<Vec<u8>, WireError> {
    let len = FRAME_HEADER_LEN + payload.len();
    let total = u16::try_from(len).map_err(|_| WireError::FrameTooLarge {
        len,
        max: MAX_FRAME_LEN,
    })?;

    let mut frame = Vec::with_capacity(len);
    frame.extend_from_slice(&total.to_le_bytes());
    frame.push(command);
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// What [`FrameReader::poll`] found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    /// A complete message.
    Message(Frame),
    /// The peer went away or the transport failed.
    Closed,
}

/// Splits an incoming byte stream into frames.
///
/// The source is read opportunistically: a `WouldBlock` simply means no
/// complete frame yet. Frames already buffered are still delivered after the
/// stream closes.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    buffer: Vec<u8>,
    closed: bool,
}

impl<R: Read> FrameReader<R> {
    /// Wrap a byte source, usually a non-blocking socket.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
            closed: false,
        }
    }

    /// Returns true once the stream reported end of data or failed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Bytes received but not yet framed.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Underlying byte source.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Underlying byte source, mutably. Used to write on the same socket.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Next complete frame, `Closed` on connection loss, `None` if more
    /// bytes are needed.
    pub fn poll(&mut self) -> Option<FrameEvent> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(frame) = self.take_buffered() {
                return Some(FrameEvent::Message(frame));
            }
            if self.closed {
                return Some(FrameEvent::Closed);
            }
            match self.inner.read(&mut chunk) {
                Ok(0) => {
                    debug!(pending = self.buffer.len(), "connection closed by peer");
                    self.closed = true;
                }
                Ok(n) => self.buffer.extend_from_slice(&chunk[..n]),
                Err(err) if err.kind() == ErrorKind::WouldBlock => return None,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!(%err, "connection read failed");
                    self.closed = true;
                }
            }
        }
    }

    fn take_buffered(&mut self) -> Option<Frame> {
        while self.buffer.len() >= 2 {
            let total = u16::from_le_bytes([self.buffer[0], self.buffer[1]]) as usize;
            if total < FRAME_HEADER_LEN {
                warn!(total, "malformed frame length, skipping");
                self.buffer.drain(..2);
                continue;
            }
            if self.buffer.len() < total {
                return None;
            }
            let command = self.buffer[2];
            let payload = self.buffer[FRAME_HEADER_LEN..total].to_vec();
            self.buffer.drain(..total);
            return Some(Frame { command, payload });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;

    /// Yields scripted reads, then would-block forever.
    struct Scripted {
        reads: VecDeque<io::Result<Vec<u8>>>,
    }

    impl Scripted {
        fn new(reads: Vec<io::Result<Vec<u8>>>) -> Self {
            Self {
                reads: reads.into(),
            }
        }
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.reads.pop_front() {
                Some(Ok(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                Some(Err(err)) => Err(err),
                None => Err(io::Error::from(ErrorKind::WouldBlock)),
            }
        }
    }

    #[test]
    fn encode_counts_header() {
        let frame = encode_frame(7, &[1, 2, 3]).unwrap();
        assert_eq!(frame, vec![6, 0, 7, 1, 2, 3]);
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let err = encode_frame(2, &vec![0; MAX_FRAME_LEN]).unwrap_err();
        assert!(matches!(err, WireError::FrameTooLarge { .. }));
    }

    #[test]
    fn reassembles_split_frames() {
        let frame = encode_frame(32, &[9; 10]).unwrap();
        let mut reader = FrameReader::new(Scripted::new(vec![
            Ok(frame[..1].to_vec()),
            Ok(frame[1..5].to_vec()),
        ]));
        assert_eq!(reader.poll(), None);
        assert_eq!(reader.buffered(), 5);

        reader.get_mut().reads.push_back(Ok(frame[5..].to_vec()));
        assert_eq!(
            reader.poll(),
            Some(FrameEvent::Message(Frame::new(32, vec![9; 10])))
        );
        assert_eq!(reader.poll(), None);
    }

    #[test]
    fn several_frames_in_one_read() {
        let mut bytes = encode_frame(4, &[1]).unwrap();
        bytes.extend(encode_frame(7, &[]).unwrap());
        let mut reader = FrameReader::new(Scripted::new(vec![Ok(bytes)]));

        assert_eq!(reader.poll(), Some(FrameEvent::Message(Frame::new(4, vec![1]))));
        assert_eq!(reader.poll(), Some(FrameEvent::Message(Frame::new(7, vec![]))));
        assert_eq!(reader.poll(), None);
    }

    #[test]
    fn zero_read_closes_after_buffered_frames() {
        let bytes = encode_frame(2, &[5]).unwrap();
        let mut reader = FrameReader::new(bytes.as_slice());

        assert_eq!(reader.poll(), Some(FrameEvent::Message(Frame::new(2, vec![5]))));
        assert_eq!(reader.poll(), Some(FrameEvent::Closed));
        assert!(reader.is_closed());
        assert_eq!(reader.poll(), Some(FrameEvent::Closed));
    }

    #[test]
    fn read_error_is_connection_loss() {
        let mut reader = FrameReader::new(Scripted::new(vec![Err(io::Error::from(
            ErrorKind::ConnectionReset,
        ))]));
        assert_eq!(reader.poll(), Some(FrameEvent::Closed));
    }

    #[test]
    fn malformed_length_is_skipped() {
        let mut bytes = vec![1, 0];
        bytes.extend(encode_frame(7, &[3]).unwrap());
        let mut reader = FrameReader::new(Scripted::new(vec![Ok(bytes)]));

        assert_eq!(reader.poll(), Some(FrameEvent::Message(Frame::new(7, vec![3]))));
        assert!(!reader.is_closed());
    }
}
