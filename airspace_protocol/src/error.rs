// Errors raised while encoding or decoding control-socket traffic.
//
// Everything in here is a ProtocolError from the server's point of view: the
// connection that produced it is no longer in a known framing state and gets
// closed. `is_eof` lets receive loops tell an orderly close apart from a
// corrupt stream.

use std::io;

use thiserror::Error;

use crate::framing::MAX_FRAME_LEN;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame too long: {0} bytes (max {MAX_FRAME_LEN})")]
    TooLong(usize),
    #[error("frame is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    #[error("malformed frame text at byte {offset}: {reason}")]
    Malformed { offset: usize, reason: &'static str },
    #[error("unrecognized control frame: {0}")]
    UnknownShape(String),
    #[error("invalid value for `{0}`")]
    InvalidValue(&'static str),
    #[error("file body truncated: expected {expected} bytes, copied {copied}")]
    BodyLength { expected: u64, copied: u64 },
    #[error("decoder is awaiting a {0}-byte file body")]
    AwaitingBody(u64),
    #[error("decoder is not awaiting a file body")]
    NoBodyPending,
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl FrameError {
    /// The peer closed the stream at a frame boundary (or mid-frame).
    pub fn is_eof(&self) -> bool {
        matches!(self, FrameError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }
}
