use crate::core::error::ProtocolError;
use crate::models::peer::{PeerAddr, PeerIdentity};
use crate::models::torrent::Torrent;
use crate::protocol::codes::{category_of, OpCategory, OpCode, ReturnCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Torrent as it travels in GET_LIST and GET_TORRENT responses
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TorrentSnapshot {
    #[serde(rename = "TORRENT_ID")]
    pub id: u32,
    #[serde(rename = "FILE_NAME")]
    pub filename: String,
    #[serde(rename = "NUM_OF_CHUNKS")]
    pub chunk_count: u32,
    #[serde(rename = "SEEDER_LIST")]
    pub seeders: BTreeMap<String, PeerAddr>,
    #[serde(rename = "LEECHER_LIST")]
    pub leechers: BTreeMap<String, PeerAddr>,
}

impl From<&Torrent> for TorrentSnapshot {
    fn from(torrent: &Torrent) -> Self {
        Self {
            id: torrent.id,
            filename: torrent.filename.clone(),
            chunk_count: torrent.chunk_count,
            seeders: torrent.seeders.clone(),
            leechers: torrent.leechers.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TorrentRequest {
    #[serde(rename = "TORRENT_ID")]
    pub torrent_id: u32,
    #[serde(flatten)]
    pub peer: PeerIdentity,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UploadRequest {
    #[serde(rename = "FILE_NAME")]
    pub file_name: String,
    #[serde(rename = "NUM_OF_CHUNKS")]
    pub chunk_count: u32,
    #[serde(flatten)]
    pub peer: PeerIdentity,
}

/// Peer-to-server requests (op codes 10-14)
#[derive(Clone, Debug, PartialEq)]
pub enum TrackerRequest {
    GetList(PeerIdentity),
    GetTorrent(TorrentRequest),
    StartSeed(TorrentRequest),
    StopSeed(TorrentRequest),
    UploadFile(UploadRequest),
}

impl TrackerRequest {
    pub fn op(&self) -> OpCode {
        match self {
            TrackerRequest::GetList(_) => OpCode::GetList,
            TrackerRequest::GetTorrent(_) => OpCode::GetTorrent,
            TrackerRequest::StartSeed(_) => OpCode::StartSeed,
            TrackerRequest::StopSeed(_) => OpCode::StopSeed,
            TrackerRequest::UploadFile(_) => OpCode::UploadFile,
        }
    }

    pub fn peer(&self) -> &PeerIdentity {
        match self {
            TrackerRequest::GetList(peer) => peer,
            TrackerRequest::GetTorrent(req)
            | TrackerRequest::StartSeed(req)
            | TrackerRequest::StopSeed(req) => &req.peer,
            TrackerRequest::UploadFile(req) => &req.peer,
        }
    }

    pub(crate) fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let op = self.op();
        match self {
            TrackerRequest::GetList(peer) => envelope(op, peer),
            TrackerRequest::GetTorrent(req)
            | TrackerRequest::StartSeed(req)
            | TrackerRequest::StopSeed(req) => envelope(op, req),
            TrackerRequest::UploadFile(req) => envelope(op, req),
        }
    }

    fn decode(op: OpCode, frame: &[u8]) -> Result<Self, ProtocolError> {
        let request = match op {
            OpCode::GetList => TrackerRequest::GetList(body(frame)?),
            OpCode::GetTorrent => TrackerRequest::GetTorrent(body(frame)?),
            OpCode::StartSeed => TrackerRequest::StartSeed(body(frame)?),
            OpCode::StopSeed => TrackerRequest::StopSeed(body(frame)?),
            OpCode::UploadFile => TrackerRequest::UploadFile(body(frame)?),
            other => return Err(ProtocolError::UnexpectedOperation(other)),
        };
        Ok(request)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ListResponse {
    #[serde(rename = "RET")]
    pub ret: ReturnCode,
    #[serde(rename = "TORRENT_LIST", default, skip_serializing_if = "Option::is_none")]
    pub torrents: Option<Vec<TorrentSnapshot>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TorrentResponse {
    #[serde(rename = "RET")]
    pub ret: ReturnCode,
    #[serde(rename = "TORRENT_OBJ", default, skip_serializing_if = "Option::is_none")]
    pub torrent: Option<TorrentSnapshot>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeedResponse {
    #[serde(rename = "RET")]
    pub ret: ReturnCode,
    #[serde(rename = "TORRENT_ID", default, skip_serializing_if = "Option::is_none")]
    pub torrent_id: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(rename = "RET")]
    pub ret: ReturnCode,
}

/// Peer-to-server responses, one variant per request
#[derive(Clone, Debug, PartialEq)]
pub enum TrackerResponse {
    GetList(ListResponse),
    GetTorrent(TorrentResponse),
    StartSeed(SeedResponse),
    StopSeed(StatusResponse),
    UploadFile(SeedResponse),
}

impl TrackerResponse {
    pub fn op(&self) -> OpCode {
        match self {
            TrackerResponse::GetList(_) => OpCode::GetList,
            TrackerResponse::GetTorrent(_) => OpCode::GetTorrent,
            TrackerResponse::StartSeed(_) => OpCode::StartSeed,
            TrackerResponse::StopSeed(_) => OpCode::StopSeed,
            TrackerResponse::UploadFile(_) => OpCode::UploadFile,
        }
    }

    pub fn ret(&self) -> ReturnCode {
        match self {
            TrackerResponse::GetList(res) => res.ret,
            TrackerResponse::GetTorrent(res) => res.ret,
            TrackerResponse::StartSeed(res) | TrackerResponse::UploadFile(res) => res.ret,
            TrackerResponse::StopSeed(res) => res.ret,
        }
    }

    pub(crate) fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let op = self.op();
        match self {
            TrackerResponse::GetList(res) => envelope(op, res),
            TrackerResponse::GetTorrent(res) => envelope(op, res),
            TrackerResponse::StartSeed(res) | TrackerResponse::UploadFile(res) => envelope(op, res),
            TrackerResponse::StopSeed(res) => envelope(op, res),
        }
    }

    fn decode(op: OpCode, frame: &[u8]) -> Result<Self, ProtocolError> {
        let response = match op {
            OpCode::GetList => TrackerResponse::GetList(body(frame)?),
            OpCode::GetTorrent => TrackerResponse::GetTorrent(body(frame)?),
            OpCode::StartSeed => TrackerResponse::StartSeed(body(frame)?),
            OpCode::StopSeed => TrackerResponse::StopSeed(body(frame)?),
            OpCode::UploadFile => TrackerResponse::UploadFile(body(frame)?),
            other => return Err(ProtocolError::UnexpectedOperation(other)),
        };
        Ok(response)
    }
}

/// Choke/interest notifications (op codes 1-4)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusKind {
    Interested,
    Uninterested,
    Choked,
    Unchoked,
}

impl StatusKind {
    pub fn op(self) -> OpCode {
        match self {
            StatusKind::Interested => OpCode::StatusInterested,
            StatusKind::Uninterested => OpCode::StatusUninterested,
            StatusKind::Choked => OpCode::StatusChoked,
            StatusKind::Unchoked => OpCode::StatusUnchoked,
        }
    }

    fn from_op(op: OpCode) -> Option<Self> {
        match op {
            OpCode::StatusInterested => Some(StatusKind::Interested),
            OpCode::StatusUninterested => Some(StatusKind::Uninterested),
            OpCode::StatusChoked => Some(StatusKind::Choked),
            OpCode::StatusUnchoked => Some(StatusKind::Unchoked),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkRequest {
    #[serde(flatten)]
    pub from: PeerAddr,
    #[serde(rename = "CHUNK_IDX")]
    pub index: usize,
}

/// Peer-to-peer requests (op codes 1-6)
#[derive(Clone, Debug, PartialEq)]
pub enum PeerRequest {
    Status(StatusKind, PeerAddr),
    GetPeers(PeerAddr),
    GetChunk(ChunkRequest),
}

impl PeerRequest {
    pub fn op(&self) -> OpCode {
        match self {
            PeerRequest::Status(kind, _) => kind.op(),
            PeerRequest::GetPeers(_) => OpCode::GetPeers,
            PeerRequest::GetChunk(_) => OpCode::GetChunk,
        }
    }

    pub fn from_addr(&self) -> &PeerAddr {
        match self {
            PeerRequest::Status(_, from) | PeerRequest::GetPeers(from) => from,
            PeerRequest::GetChunk(req) => &req.from,
        }
    }

    pub(crate) fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let op = self.op();
        match self {
            PeerRequest::Status(_, from) | PeerRequest::GetPeers(from) => envelope(op, from),
            PeerRequest::GetChunk(req) => envelope(op, req),
        }
    }

    fn decode(op: OpCode, frame: &[u8]) -> Result<Self, ProtocolError> {
        if let Some(kind) = StatusKind::from_op(op) {
            return Ok(PeerRequest::Status(kind, body(frame)?));
        }
        let request = match op {
            OpCode::GetPeers => PeerRequest::GetPeers(body(frame)?),
            OpCode::GetChunk => PeerRequest::GetChunk(body(frame)?),
            other => return Err(ProtocolError::UnexpectedOperation(other)),
        };
        Ok(request)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PeerListResponse {
    #[serde(rename = "RET")]
    pub ret: ReturnCode,
    #[serde(rename = "PEER_LIST", default)]
    pub peers: BTreeMap<String, PeerAddr>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkResponse {
    #[serde(rename = "RET")]
    pub ret: ReturnCode,
    #[serde(rename = "CHUNK_IDX")]
    pub index: usize,
    #[serde(
        rename = "CHUNK_DATA",
        default,
        with = "chunk_data",
        skip_serializing_if = "Option::is_none"
    )]
    pub data: Option<Vec<u8>>,
}

/// Peer-to-peer responses
#[derive(Clone, Debug, PartialEq)]
pub enum PeerResponse {
    Status(StatusKind, StatusResponse),
    GetPeers(PeerListResponse),
    GetChunk(ChunkResponse),
}

impl PeerResponse {
    pub fn op(&self) -> OpCode {
        match self {
            PeerResponse::Status(kind, _) => kind.op(),
            PeerResponse::GetPeers(_) => OpCode::GetPeers,
            PeerResponse::GetChunk(_) => OpCode::GetChunk,
        }
    }

    pub fn ret(&self) -> ReturnCode {
        match self {
            PeerResponse::Status(_, res) => res.ret,
            PeerResponse::GetPeers(res) => res.ret,
            PeerResponse::GetChunk(res) => res.ret,
        }
    }

    pub(crate) fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let op = self.op();
        match self {
            PeerResponse::Status(_, res) => envelope(op, res),
            PeerResponse::GetPeers(res) => envelope(op, res),
            PeerResponse::GetChunk(res) => envelope(op, res),
        }
    }

    fn decode(op: OpCode, frame: &[u8]) -> Result<Self, ProtocolError> {
        if let Some(kind) = StatusKind::from_op(op) {
            return Ok(PeerResponse::Status(kind, body(frame)?));
        }
        let response = match op {
            OpCode::GetPeers => PeerResponse::GetPeers(body(frame)?),
            OpCode::GetChunk => PeerResponse::GetChunk(body(frame)?),
            other => return Err(ProtocolError::UnexpectedOperation(other)),
        };
        Ok(response)
    }
}

/// Any request, routed by op code magnitude
#[derive(Clone, Debug, PartialEq)]
pub enum Request {
    Tracker(TrackerRequest),
    Peer(PeerRequest),
}

impl Request {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        match self {
            Request::Tracker(req) => req.encode(),
            Request::Peer(req) => req.encode(),
        }
    }

    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        let (code, op) = read_op(frame)?;
        match category_of(code) {
            OpCategory::PeerToServer => Ok(Request::Tracker(TrackerRequest::decode(op, frame)?)),
            OpCategory::PeerToPeer => Ok(Request::Peer(PeerRequest::decode(op, frame)?)),
        }
    }
}

/// Any response, routed by op code magnitude
#[derive(Clone, Debug, PartialEq)]
pub enum Response {
    Tracker(TrackerResponse),
    Peer(PeerResponse),
}

impl Response {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        match self {
            Response::Tracker(res) => res.encode(),
            Response::Peer(res) => res.encode(),
        }
    }

    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        let (code, op) = read_op(frame)?;
        match category_of(code) {
            OpCategory::PeerToServer => Ok(Response::Tracker(TrackerResponse::decode(op, frame)?)),
            OpCategory::PeerToPeer => Ok(Response::Peer(PeerResponse::decode(op, frame)?)),
        }
    }
}

#[derive(Serialize)]
struct Envelope<'a, B: Serialize> {
    #[serde(rename = "OPC")]
    op: OpCode,
    #[serde(flatten)]
    body: &'a B,
}

#[derive(Deserialize)]
struct Header {
    #[serde(rename = "OPC")]
    op: i32,
}

fn envelope<B: Serialize>(op: OpCode, body: &B) -> Result<Vec<u8>, ProtocolError> {
    Ok(serde_json::to_vec(&Envelope { op, body })?)
}

fn body<B: DeserializeOwned>(frame: &[u8]) -> Result<B, ProtocolError> {
    Ok(serde_json::from_slice(frame)?)
}

fn read_op(frame: &[u8]) -> Result<(i32, OpCode), ProtocolError> {
    if frame.is_empty() {
        return Err(ProtocolError::EmptyFrame);
    }
    let header: Header = serde_json::from_slice(frame)?;
    Ok((header.op, OpCode::try_from(header.op)?))
}

/// Base64 text on the wire, raw bytes in memory
mod chunk_data {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match data {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|text| STANDARD.decode(text.as_bytes()).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> PeerIdentity {
        PeerIdentity::new("127.0.0.1", 9001)
    }

    fn snapshot() -> TorrentSnapshot {
        let owner = identity();
        TorrentSnapshot::from(&Torrent::new(0, "a.bin".to_string(), 10, &owner))
    }

    fn roundtrip_request(request: Request) {
        let frame = request.encode().unwrap();
        assert_eq!(Request::decode(&frame).unwrap(), request);
    }

    fn roundtrip_response(response: Response) {
        let frame = response.encode().unwrap();
        assert_eq!(Response::decode(&frame).unwrap(), response);
    }

    #[test]
    fn test_tracker_requests_roundtrip() {
        let peer = identity();
        let by_id = TorrentRequest { torrent_id: 4, peer: peer.clone() };

        roundtrip_request(Request::Tracker(TrackerRequest::GetList(peer.clone())));
        roundtrip_request(Request::Tracker(TrackerRequest::GetTorrent(by_id.clone())));
        roundtrip_request(Request::Tracker(TrackerRequest::StartSeed(by_id.clone())));
        roundtrip_request(Request::Tracker(TrackerRequest::StopSeed(by_id)));
        roundtrip_request(Request::Tracker(TrackerRequest::UploadFile(UploadRequest {
            file_name: "a.bin".to_string(),
            chunk_count: 10,
            peer,
        })));
    }

    #[test]
    fn test_tracker_responses_roundtrip() {
        roundtrip_response(Response::Tracker(TrackerResponse::GetList(ListResponse {
            ret: ReturnCode::Success,
            torrents: Some(vec![snapshot()]),
        })));
        roundtrip_response(Response::Tracker(TrackerResponse::GetList(ListResponse {
            ret: ReturnCode::NoAvailableTorrents,
            torrents: None,
        })));
        roundtrip_response(Response::Tracker(TrackerResponse::GetTorrent(TorrentResponse {
            ret: ReturnCode::Success,
            torrent: Some(snapshot()),
        })));
        roundtrip_response(Response::Tracker(TrackerResponse::StartSeed(SeedResponse {
            ret: ReturnCode::Success,
            torrent_id: Some(0),
        })));
        roundtrip_response(Response::Tracker(TrackerResponse::StopSeed(StatusResponse {
            ret: ReturnCode::Success,
        })));
        roundtrip_response(Response::Tracker(TrackerResponse::UploadFile(SeedResponse {
            ret: ReturnCode::AlreadySeeding,
            torrent_id: None,
        })));
    }

    #[test]
    fn test_peer_messages_roundtrip() {
        let from = PeerAddr::new("127.0.0.1", 9002);
        let mut peers = BTreeMap::new();
        peers.insert(identity().id, identity().addr());

        roundtrip_request(Request::Peer(PeerRequest::GetPeers(from.clone())));
        roundtrip_request(Request::Peer(PeerRequest::GetChunk(ChunkRequest {
            from: from.clone(),
            index: 7,
        })));
        roundtrip_request(Request::Peer(PeerRequest::Status(StatusKind::Choked, from)));

        roundtrip_response(Response::Peer(PeerResponse::GetPeers(PeerListResponse {
            ret: ReturnCode::Success,
            peers,
        })));
        roundtrip_response(Response::Peer(PeerResponse::GetChunk(ChunkResponse {
            ret: ReturnCode::Success,
            index: 7,
            data: Some(vec![0, 1, 2, 255, 254]),
        })));
        roundtrip_response(Response::Peer(PeerResponse::GetChunk(ChunkResponse {
            ret: ReturnCode::Fail,
            index: 7,
            data: None,
        })));
    }

    #[test]
    fn test_wire_layout_uses_field_names() {
        let request = Request::Peer(PeerRequest::GetChunk(ChunkRequest {
            from: PeerAddr::new("127.0.0.1", 9002),
            index: 3,
        }));
        let value: serde_json::Value = serde_json::from_slice(&request.encode().unwrap()).unwrap();
        assert_eq!(value["OPC"], 6);
        assert_eq!(value["IP_ADDRESS"], "127.0.0.1");
        assert_eq!(value["PORT"], 9002);
        assert_eq!(value["CHUNK_IDX"], 3);
    }

    #[test]
    fn test_chunk_data_is_base64_text() {
        let response = Response::Peer(PeerResponse::GetChunk(ChunkResponse {
            ret: ReturnCode::Success,
            index: 0,
            data: Some(b"hello".to_vec()),
        }));
        let value: serde_json::Value = serde_json::from_slice(&response.encode().unwrap()).unwrap();
        assert_eq!(value["CHUNK_DATA"], "aGVsbG8=");
        assert_eq!(value["RET"], 0);
    }

    #[test]
    fn test_decode_accepts_external_encoding() {
        let frame = br#"{"OPC": 14, "PEER_ID": "abc", "IP_ADDRESS": "10.0.0.1",
            "PORT": 7000, "FILE_NAME": "x.txt", "NUM_OF_CHUNKS": 3}"#;
        match Request::decode(frame).unwrap() {
            Request::Tracker(TrackerRequest::UploadFile(req)) => {
                assert_eq!(req.file_name, "x.txt");
                assert_eq!(req.chunk_count, 3);
                assert_eq!(req.peer.id, "abc");
            }
            other => panic!("unexpected decode: {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_bad_frames() {
        assert!(matches!(Request::decode(b""), Err(ProtocolError::EmptyFrame)));
        assert!(matches!(
            Request::decode(br#"{"OPC": 8}"#),
            Err(ProtocolError::UnknownOpCode(8))
        ));
        // missing TORRENT_ID
        assert!(matches!(
            Request::decode(br#"{"OPC": 11, "PEER_ID": "a", "IP_ADDRESS": "x", "PORT": 1}"#),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            Response::decode(br#"{"OPC": 6, "RET": 0, "CHUNK_IDX": 1, "CHUNK_DATA": "***"}"#),
            Err(ProtocolError::Malformed(_))
        ));
    }
}
