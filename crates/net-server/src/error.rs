use std::io;

use mio::Token;
use thiserror::Error;

/// Crate-wide error currency. Every module that can fail reports through
/// this type so callers can match on the original cause rather than a
/// stringified message.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Peer closed the socket, or a read returned 0 bytes. Not logged above
    /// `debug` — this is the normal way a connection ends.
    #[error("end of stream")]
    EndOfStream,

    /// Unexpected socket error surfaced by the OS.
    #[error("io failure")]
    IoFailure(#[from] io::Error),

    /// Header declared a body size above the configured maximum.
    #[error("malformed frame: declared body size {declared} exceeds max {max}")]
    MalformedFrame { declared: u32, max: u32 },

    /// The codec rejected the body bytes for a frame.
    #[error("codec rejected frame body")]
    CodecError(#[from] Box<dyn std::error::Error + Send + Sync>),

    /// A synchronous handler panicked.
    #[error("handler panicked for connection {token:?}")]
    HandlerFailure { token: Token },

    /// An async job's result arrived with an error, or its sender was
    /// dropped without ever sending — the reaper cannot make progress on
    /// that job.
    #[error("async handler failed for connection {token:?}")]
    AsyncFailure { token: Token },

    /// The selector could not be created, or failed to close cleanly.
    #[error("fatal reactor failure")]
    Fatal(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, ServerError>;
