use crate::core::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper bound on a single frame (a base64 chunk plus its envelope)
pub const READ_SIZE: usize = 24576;

/// Raw bytes per chunk; base64 of this stays under `READ_SIZE`
pub const CHUNK_SIZE: usize = 16384;

/// Op codes above this value belong to the peer-to-server category
pub const CATEGORY_THRESHOLD: i32 = 9;

/// Which side of the network an operation code is addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCategory {
    PeerToServer,
    PeerToPeer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum OpCode {
    // peer to peer
    StatusInterested,
    StatusUninterested,
    StatusChoked,
    StatusUnchoked,
    GetPeers,
    GetChunk,
    // peer to server
    GetList,
    GetTorrent,
    StartSeed,
    StopSeed,
    UploadFile,
}

impl OpCode {
    pub fn code(self) -> i32 {
        match self {
            OpCode::StatusInterested => 1,
            OpCode::StatusUninterested => 2,
            OpCode::StatusChoked => 3,
            OpCode::StatusUnchoked => 4,
            OpCode::GetPeers => 5,
            OpCode::GetChunk => 6,
            OpCode::GetList => 10,
            OpCode::GetTorrent => 11,
            OpCode::StartSeed => 12,
            OpCode::StopSeed => 13,
            OpCode::UploadFile => 14,
        }
    }

    /// Dispatch by magnitude, no explicit type tag on the wire
    pub fn category(self) -> OpCategory {
        category_of(self.code())
    }
}

pub fn category_of(code: i32) -> OpCategory {
    if code > CATEGORY_THRESHOLD {
        OpCategory::PeerToServer
    } else {
        OpCategory::PeerToPeer
    }
}

impl TryFrom<i32> for OpCode {
    type Error = ProtocolError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        let op = match value {
            1 => OpCode::StatusInterested,
            2 => OpCode::StatusUninterested,
            3 => OpCode::StatusChoked,
            4 => OpCode::StatusUnchoked,
            5 => OpCode::GetPeers,
            6 => OpCode::GetChunk,
            10 => OpCode::GetList,
            11 => OpCode::GetTorrent,
            12 => OpCode::StartSeed,
            13 => OpCode::StopSeed,
            14 => OpCode::UploadFile,
            other => return Err(ProtocolError::UnknownOpCode(other)),
        };
        Ok(op)
    }
}

impl From<OpCode> for i32 {
    fn from(op: OpCode) -> Self {
        op.code()
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OpCode::StatusInterested => "STATUS_INTERESTED",
            OpCode::StatusUninterested => "STATUS_UNINTERESTED",
            OpCode::StatusChoked => "STATUS_CHOKED",
            OpCode::StatusUnchoked => "STATUS_UNCHOKED",
            OpCode::GetPeers => "GET_PEERS",
            OpCode::GetChunk => "GET_CHUNK",
            OpCode::GetList => "GET_LIST",
            OpCode::GetTorrent => "GET_TORRENT",
            OpCode::StartSeed => "START_SEED",
            OpCode::StopSeed => "STOP_SEED",
            OpCode::UploadFile => "UPLOAD_FILE",
        };
        write!(f, "{}({})", name, self.code())
    }
}

/// Application-level outcome carried in every response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum ReturnCode {
    Success,
    FinishedDownload,
    FinishedSeeding,
    Fail,
    AlreadySeeding,
    NoAvailableTorrents,
    TorrentDoesNotExist,
}

impl ReturnCode {
    pub fn code(self) -> i32 {
        match self {
            ReturnCode::Success => 0,
            ReturnCode::FinishedDownload => 1,
            ReturnCode::FinishedSeeding => 2,
            ReturnCode::Fail => -1,
            ReturnCode::AlreadySeeding => -2,
            ReturnCode::NoAvailableTorrents => -3,
            ReturnCode::TorrentDoesNotExist => -4,
        }
    }

    pub fn is_error(self) -> bool {
        self.code() < 0
    }
}

impl TryFrom<i32> for ReturnCode {
    type Error = ProtocolError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        let ret = match value {
            0 => ReturnCode::Success,
            1 => ReturnCode::FinishedDownload,
            2 => ReturnCode::FinishedSeeding,
            -1 => ReturnCode::Fail,
            -2 => ReturnCode::AlreadySeeding,
            -3 => ReturnCode::NoAvailableTorrents,
            -4 => ReturnCode::TorrentDoesNotExist,
            other => return Err(ProtocolError::UnknownReturnCode(other)),
        };
        Ok(ret)
    }
}

impl From<ReturnCode> for i32 {
    fn from(ret: ReturnCode) -> Self {
        ret.code()
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ReturnCode::Success => "success",
            ReturnCode::FinishedDownload => "finished download",
            ReturnCode::FinishedSeeding => "finished seeding",
            ReturnCode::Fail => "request failed",
            ReturnCode::AlreadySeeding => "already seeding a file",
            ReturnCode::NoAvailableTorrents => "no torrents available",
            ReturnCode::TorrentDoesNotExist => "torrent id does not exist",
        };
        f.write_str(text)
    }
}
