use crate::core::error::{PeerError, ProtocolError, TransportError};
use crate::handlers::peer::PeerContext;
use crate::models::peer::PeerAddr;
use crate::protocol::codec::{exchange, WireSettings};
use crate::protocol::codes::ReturnCode;
use crate::protocol::message::{ChunkRequest, ChunkResponse, PeerListResponse, PeerRequest, PeerResponse};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

/// Source of chunk data from remote peers
pub trait ChunkFetcher: Send + Sync + 'static {
    fn fetch_chunk(
        &self,
        peer: &PeerAddr,
        index: usize,
    ) -> impl Future<Output = Result<Vec<u8>, PeerError>> + Send;

    /// Seeders known to `peer`; peers that cannot answer return none
    fn fetch_peers(
        &self,
        _peer: &PeerAddr,
    ) -> impl Future<Output = Result<BTreeMap<String, PeerAddr>, PeerError>> + Send {
        async { Ok(BTreeMap::new()) }
    }
}

/// Pass budget for a download
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Fixed pause between passes
    pub retry_delay: Duration,
    /// Fetches in flight at once within a pass
    pub max_parallel: usize,
}

/// Fetches chunks over TCP, one connection per request
pub struct TcpChunkFetcher {
    from: PeerAddr,
    settings: WireSettings,
}

impl TcpChunkFetcher {
    pub fn new(from: PeerAddr, settings: WireSettings) -> Self {
        Self { from, settings }
    }
}

impl ChunkFetcher for TcpChunkFetcher {
    async fn fetch_chunk(&self, peer: &PeerAddr, index: usize) -> Result<Vec<u8>, PeerError> {
        let request = PeerRequest::GetChunk(ChunkRequest {
            from: self.from.clone(),
            index,
        });
        let response: PeerResponse = exchange(&peer.socket_addr(), &request, &self.settings).await?;

        match response {
            PeerResponse::GetChunk(ChunkResponse {
                ret: ReturnCode::Success,
                index: got,
                data: Some(data),
            }) if got == index => Ok(data),
            PeerResponse::GetChunk(ChunkResponse { ret, .. }) => Err(PeerError::PeerRefused {
                op: request.op(),
                code: if ret == ReturnCode::Success { ReturnCode::Fail } else { ret },
            }),
            other => Err(TransportError::from(ProtocolError::UnexpectedOperation(other.op())).into()),
        }
    }

    async fn fetch_peers(&self, peer: &PeerAddr) -> Result<BTreeMap<String, PeerAddr>, PeerError> {
        let request = PeerRequest::GetPeers(self.from.clone());
        let response: PeerResponse = exchange(&peer.socket_addr(), &request, &self.settings).await?;

        match response {
            PeerResponse::GetPeers(PeerListResponse {
                ret: ReturnCode::Success,
                peers,
            }) => Ok(peers),
            other => Err(PeerError::PeerRefused {
                op: request.op(),
                code: other.ret(),
            }),
        }
    }
}

/// Fetch chunks `0..num_chunks` into the context's store, retrying failures
///
/// Each pass sends every unresolved index to seeder `index % peer_count`
/// from the current cache. A chunk counts as obtained only once it is in
/// the store. Between passes the seeder cache is topped up from a peer and
/// the task sleeps for the fixed delay. Returns false if any index is
/// still unresolved after `max_retries` passes.
#[instrument(skip(context, fetcher, policy), fields(max_retries = policy.max_retries))]
pub async fn split_chunks_between_peers<F: ChunkFetcher>(
    num_chunks: usize,
    policy: &RetryPolicy,
    context: &PeerContext,
    fetcher: Arc<F>,
) -> bool {
    let mut failed: BTreeSet<usize> = (0..num_chunks).collect();
    let limiter = Arc::new(Semaphore::new(policy.max_parallel.max(1)));

    for pass in 1..=policy.max_retries {
        if failed.is_empty() {
            break;
        }

        let peers = context.seeder_addrs();
        if peers.is_empty() {
            warn!(remaining = failed.len(), "No seeders to download from");
            return false;
        }

        let mut fetches = JoinSet::new();
        for &index in &failed {
            let peer = peers[index % peers.len()].clone();
            let fetcher = Arc::clone(&fetcher);
            let limiter = Arc::clone(&limiter);
            fetches.spawn(async move {
                let _permit = limiter.acquire_owned().await;
                let result = fetcher.fetch_chunk(&peer, index).await;
                (index, peer, result)
            });
        }

        while let Some(joined) = fetches.join_next().await {
            let (index, peer, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(error = %e, "Chunk fetch task failed");
                    continue;
                }
            };

            match result {
                Ok(data) => {
                    if context.store.put(index, data).is_ok() && context.store.has(index) {
                        failed.remove(&index);
                    }
                }
                Err(e) => debug!(index, %peer, error = %e, "Chunk fetch failed"),
            }
        }

        if failed.is_empty() {
            debug!(pass, "All chunks obtained");
            break;
        }

        info!(pass, remaining = failed.len(), "Pass finished with missing chunks");

        if pass < policy.max_retries {
            refresh_seeders(context, fetcher.as_ref(), &peers, pass).await;
            tokio::time::sleep(policy.retry_delay).await;
        }
    }

    failed.is_empty()
}

/// Best effort: learn seeders that joined after the torrent lookup
async fn refresh_seeders<F: ChunkFetcher>(
    context: &PeerContext,
    fetcher: &F,
    peers: &[PeerAddr],
    pass: u32,
) {
    let source = &peers[pass as usize % peers.len()];
    match fetcher.fetch_peers(source).await {
        Ok(learned) => {
            let added = context.merge_seeders(learned);
            if added > 0 {
                info!(added, %source, "Learned new seeders");
            }
        }
        Err(e) => debug!(%source, error = %e, "Seeder refresh failed"),
    }
}
