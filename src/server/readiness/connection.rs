//! Per-connection read and write state for the readiness server.
//!
//! The reader loop owns every `ReadState`, the writer loop owns every
//! `WriteState`. Worker threads only ever hand over finished responses.

use crate::protocol::{
    decode_payload, encode, parse_header, Message, ProtocolError, HEADER_SIZE, PARTIAL_HEADER,
    SHORT_BODY,
};
use bytes::{Buf, Bytes};
use std::collections::VecDeque;
use std::io::{self, Read, Write};

/// Where a connection is in the current frame.
#[derive(Debug)]
pub(super) enum ReadState {
    /// Collecting the 4-byte length prefix.
    AwaitingHeader {
        header: [u8; HEADER_SIZE],
        filled: usize,
    },
    /// Collecting a payload of known size.
    AwaitingBody { body: Vec<u8>, filled: usize },
}

/// Result of draining a readable socket.
#[derive(Debug)]
pub(super) enum ReadOutcome {
    /// A complete frame was decoded. More may follow.
    Frame(Message),
    /// The socket has no more bytes right now.
    WouldBlock,
    /// The peer closed cleanly between frames.
    Closed,
}

impl ReadState {
    pub fn new() -> Self {
        ReadState::AwaitingHeader {
            header: [0; HEADER_SIZE],
            filled: 0,
        }
    }

    /// Read until a frame completes, the socket would block, or it closes.
    ///
    /// End-of-stream in the middle of a frame is a framing error.
    pub fn read_from<R: Read>(&mut self, reader: &mut R) -> Result<ReadOutcome, ProtocolError> {
        loop {
            let result = match self {
                ReadState::AwaitingHeader { header, filled } => reader.read(&mut header[*filled..]),
                ReadState::AwaitingBody { body, filled } => reader.read(&mut body[*filled..]),
            };

            let n = match result {
                Ok(0) => {
                    return match self {
                        ReadState::AwaitingHeader { filled: 0, .. } => Ok(ReadOutcome::Closed),
                        ReadState::AwaitingHeader { .. } => Err(ProtocolError::Framing(PARTIAL_HEADER)),
                        ReadState::AwaitingBody { .. } => Err(ProtocolError::Framing(SHORT_BODY)),
                    };
                }
                Ok(n) => n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(ReadOutcome::WouldBlock)
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };

            if let Some(message) = self.advance(n)? {
                return Ok(ReadOutcome::Frame(message));
            }
        }
    }

    /// Account for `n` new bytes and move to the next stage when full.
    fn advance(&mut self, n: usize) -> Result<Option<Message>, ProtocolError> {
        match self {
            ReadState::AwaitingHeader { header, filled } => {
                *filled += n;
                if *filled < HEADER_SIZE {
                    return Ok(None);
                }
                let len = parse_header(*header)?;
                *self = ReadState::AwaitingBody {
                    body: vec![0; len],
                    filled: 0,
                };
                if len == 0 {
                    return self.advance(0);
                }
                Ok(None)
            }
            ReadState::AwaitingBody { body, filled } => {
                *filled += n;
                if *filled < body.len() {
                    return Ok(None);
                }
                let message = decode_payload(body)?;
                *self = ReadState::new();
                Ok(Some(message))
            }
        }
    }
}

/// Outcome of flushing a connection's pending responses.
#[derive(Debug, PartialEq, Eq)]
pub(super) enum WriteOutcome {
    /// Everything queued has been written.
    Flushed,
    /// The socket is full; wait for the next writable event.
    WouldBlock,
}

/// Responses waiting to be written to one connection, oldest first.
pub(super) struct WriteState {
    queue: VecDeque<Message>,
    pending: Option<Bytes>,
}

impl WriteState {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            pending: None,
        }
    }

    pub fn push(&mut self, response: Message) {
        self.queue.push_back(response);
    }

    /// Write as much as the socket takes.
    ///
    /// A response is serialized only when the writer first gets to it.
    pub fn write_to<W: Write>(&mut self, writer: &mut W) -> Result<WriteOutcome, ProtocolError> {
        loop {
            if self.pending.as_ref().map_or(true, Bytes::is_empty) {
                match self.queue.pop_front() {
                    Some(response) => self.pending = Some(encode(&response)?),
                    None => {
                        self.pending = None;
                        return Ok(WriteOutcome::Flushed);
                    }
                }
            }
            let Some(buf) = self.pending.as_mut() else {
                continue;
            };

            match writer.write(buf) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0").into())
                }
                Ok(n) => buf.advance(n),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(WriteOutcome::WouldBlock)
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}
