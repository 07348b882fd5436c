// Centralized error handling for the tracker and peer agents

use crate::protocol::codes::{OpCode, ReturnCode};
use thiserror::Error;

/// Errors raised at the decode/encode boundary of a frame
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Frame of {size} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("Empty frame")]
    EmptyFrame,

    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unknown operation code: {0}")]
    UnknownOpCode(i32),

    #[error("Unknown return code: {0}")]
    UnknownReturnCode(i32),

    #[error("Operation {0} is not valid on this endpoint")]
    UnexpectedOperation(OpCode),
}

/// Errors raised while moving a frame across a socket
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timed out after {0} ms")]
    Timeout(u64),

    #[error("Connection closed before a complete frame arrived ({received} bytes)")]
    Incomplete { received: usize },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Errors surfaced by a peer agent to its caller
#[derive(Error, Debug)]
pub enum PeerError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Tracker rejected {op}: {code}")]
    Rejected { op: OpCode, code: ReturnCode },

    #[error("Peer answered {op} with {code}")]
    PeerRefused { op: OpCode, code: ReturnCode },

    #[error("Invalid role transition: {0}")]
    InvalidState(String),

    #[error("Chunk {index} is outside a store of capacity {capacity}")]
    ChunkOutOfRange { index: usize, capacity: usize },

    #[error("Download of torrent {torrent_id} incomplete: {missing} chunks unresolved")]
    DownloadIncomplete { torrent_id: u32, missing: usize },

    #[error("File error on {path}: {source}")]
    File {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl PeerError {
    /// Whether this error means the tracker itself is unreachable
    pub fn is_transport(&self) -> bool {
        matches!(self, PeerError::Transport(_))
    }
}
