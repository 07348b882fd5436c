use crate::core::error::TransportError;
use crate::core::listener::Service;
use crate::models::peer::{PeerAddr, PeerIdentity};
use crate::protocol::codes::ReturnCode;
use crate::protocol::message::{
    ChunkResponse, PeerListResponse, PeerRequest, PeerResponse, StatusKind, StatusResponse,
};
use crate::stores::chunk_store::SharedChunkStore;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, instrument};

/// Answer one peer-to-peer request from local state
///
/// GET_PEERS returns the cached seeder list. GET_CHUNK succeeds only for
/// chunks present in `store`. Status notices are acknowledged.
pub fn handle_peer_request(
    request: &PeerRequest,
    seeders: &BTreeMap<String, PeerAddr>,
    store: &SharedChunkStore,
) -> PeerResponse {
    match request {
        PeerRequest::Status(kind, _) => PeerResponse::Status(
            *kind,
            StatusResponse {
                ret: ReturnCode::Success,
            },
        ),
        PeerRequest::GetPeers(_) => PeerResponse::GetPeers(PeerListResponse {
            ret: ReturnCode::Success,
            peers: seeders.clone(),
        }),
        PeerRequest::GetChunk(req) => match store.get(req.index) {
            Some(data) => PeerResponse::GetChunk(ChunkResponse {
                ret: ReturnCode::Success,
                index: req.index,
                data: Some(data),
            }),
            None => PeerResponse::GetChunk(ChunkResponse {
                ret: ReturnCode::Fail,
                index: req.index,
                data: None,
            }),
        },
    }
}

/// State a peer shares between its inbound server and its client side
pub struct PeerContext {
    pub identity: PeerIdentity,
    pub store: SharedChunkStore,
    seeders: RwLock<BTreeMap<String, PeerAddr>>,
    remote_status: DashMap<String, StatusKind>,
}

impl PeerContext {
    pub fn new(identity: PeerIdentity) -> Self {
        Self {
            identity,
            store: SharedChunkStore::new(),
            seeders: RwLock::new(BTreeMap::new()),
            remote_status: DashMap::new(),
        }
    }

    /// Copy of the cached seeder list
    pub fn seeders(&self) -> BTreeMap<String, PeerAddr> {
        self.seeders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Cached seeders other than this peer, in id order
    pub fn seeder_addrs(&self) -> Vec<PeerAddr> {
        self.seeders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(id, _)| **id != self.identity.id)
            .map(|(_, addr)| addr.clone())
            .collect()
    }

    pub fn set_seeders(&self, seeders: BTreeMap<String, PeerAddr>) {
        *self.seeders.write().unwrap_or_else(PoisonError::into_inner) = seeders;
    }

    /// Add newly learned seeders; returns how many were unknown
    pub fn merge_seeders(&self, seeders: BTreeMap<String, PeerAddr>) -> usize {
        let mut cached = self.seeders.write().unwrap_or_else(PoisonError::into_inner);
        let before = cached.len();
        for (id, addr) in seeders {
            if id != self.identity.id {
                cached.entry(id).or_insert(addr);
            }
        }
        cached.len() - before
    }

    /// Last status notice received from `remote`
    pub fn remote_status(&self, remote: &PeerAddr) -> Option<StatusKind> {
        self.remote_status.get(&remote.to_string()).map(|entry| *entry.value())
    }
}

/// Inbound side of a peer agent
pub struct PeerService {
    context: Arc<PeerContext>,
}

impl PeerService {
    pub fn new(context: Arc<PeerContext>) -> Self {
        Self { context }
    }
}

impl Service for PeerService {
    type Request = PeerRequest;
    type Response = PeerResponse;

    #[instrument(skip_all, fields(op = %request.op(), from = %request.from_addr()))]
    fn call(&self, request: PeerRequest, _remote: SocketAddr) -> PeerResponse {
        if let PeerRequest::Status(kind, from) = &request {
            debug!(?kind, "Status notice");
            self.context.remote_status.insert(from.to_string(), *kind);
        }

        let seeders = self.context.seeders();
        let response = handle_peer_request(&request, &seeders, &self.context.store);
        debug!(ret = %response.ret(), "Answered peer");
        response
    }

    fn on_dropped(&self, remote: SocketAddr, error: &TransportError) {
        debug!(%remote, %error, "Peer connection dropped");
    }
}
