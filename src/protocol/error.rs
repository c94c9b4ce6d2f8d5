use std::io;
use thiserror::Error;

/// Errors raised while reading or writing frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Fewer header or body bytes arrived than the frame requires.
    #[error("framing error: {0}")]
    Framing(&'static str),

    /// Declared payload length exceeds the frame limit.
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),

    /// Payload bytes are not a valid message.
    #[error("codec error: {0}")]
    Codec(#[from] rmp_serde::decode::Error),

    /// Message could not be serialized.
    #[error("encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// Socket-level failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ProtocolError {
    /// True when the peer simply went away: a clean close between frames
    /// or a reset. Callers log these at a lower level than real faults.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ProtocolError::Framing(reason) => *reason == SHORT_HEADER,
            ProtocolError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::NotConnected
            ),
            _ => false,
        }
    }
}

/// EOF before any header byte: the peer closed between frames.
pub(crate) const SHORT_HEADER: &str = "short header read";
/// EOF after some but not all header bytes.
pub(crate) const PARTIAL_HEADER: &str = "partial header read";
pub(crate) const SHORT_BODY: &str = "short body read";
