use crate::core::error::{PeerError, ProtocolError, TransportError};
use crate::models::peer::PeerIdentity;
use crate::protocol::codec::{exchange, WireSettings};
use crate::protocol::codes::ReturnCode;
use crate::protocol::message::{
    ListResponse, SeedResponse, TorrentRequest, TorrentResponse, TorrentSnapshot, TrackerRequest,
    TrackerResponse, UploadRequest,
};
use tracing::debug;

/// Client for the tracker, one connection per call
pub struct TrackerClient {
    addr: String,
    identity: PeerIdentity,
    settings: WireSettings,
}

impl TrackerClient {
    pub fn new(addr: impl Into<String>, identity: PeerIdentity, settings: WireSettings) -> Self {
        Self {
            addr: addr.into(),
            identity,
            settings,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn torrent_request(&self, torrent_id: u32) -> TorrentRequest {
        TorrentRequest {
            torrent_id,
            peer: self.identity.clone(),
        }
    }

    /// Send one request; any non-success return code becomes `Rejected`
    async fn send(&self, request: TrackerRequest) -> Result<TrackerResponse, PeerError> {
        let op = request.op();
        let response: TrackerResponse = exchange(&self.addr, &request, &self.settings).await?;

        if response.op() != op {
            return Err(TransportError::from(ProtocolError::UnexpectedOperation(response.op())).into());
        }

        let code = response.ret();
        debug!(%op, %code, "Tracker replied");
        if code != ReturnCode::Success {
            return Err(PeerError::Rejected { op, code });
        }
        Ok(response)
    }

    /// All torrents; `Rejected` with `NoAvailableTorrents` when there are none
    pub async fn list(&self) -> Result<Vec<TorrentSnapshot>, PeerError> {
        match self.send(TrackerRequest::GetList(self.identity.clone())).await? {
            TrackerResponse::GetList(ListResponse { torrents, .. }) => Ok(torrents.unwrap_or_default()),
            other => Err(unexpected(&other)),
        }
    }

    /// Look up a torrent, which also registers this peer as a leecher
    pub async fn get_torrent(&self, torrent_id: u32) -> Result<TorrentSnapshot, PeerError> {
        let request = TrackerRequest::GetTorrent(self.torrent_request(torrent_id));
        match self.send(request).await? {
            TrackerResponse::GetTorrent(TorrentResponse {
                torrent: Some(torrent),
                ..
            }) => Ok(torrent),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn start_seed(&self, torrent_id: u32) -> Result<(), PeerError> {
        self.send(TrackerRequest::StartSeed(self.torrent_request(torrent_id)))
            .await
            .map(|_| ())
    }

    pub async fn stop_seed(&self, torrent_id: u32) -> Result<(), PeerError> {
        self.send(TrackerRequest::StopSeed(self.torrent_request(torrent_id)))
            .await
            .map(|_| ())
    }

    /// Register a new torrent seeded by this peer; returns its id
    pub async fn upload(&self, file_name: &str, chunk_count: u32) -> Result<u32, PeerError> {
        let request = TrackerRequest::UploadFile(UploadRequest {
            file_name: file_name.to_string(),
            chunk_count,
            peer: self.identity.clone(),
        });
        match self.send(request).await? {
            TrackerResponse::UploadFile(SeedResponse {
                torrent_id: Some(torrent_id),
                ..
            }) => Ok(torrent_id),
            other => Err(unexpected(&other)),
        }
    }
}

fn unexpected(response: &TrackerResponse) -> PeerError {
    TransportError::from(ProtocolError::UnexpectedOperation(response.op())).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;
    use crate::core::listener::{spawn_server, ServerHandle};
    use crate::core::state::TrackerState;
    use crate::handlers::tracker::TrackerService;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    async fn tracker() -> ServerHandle {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let service = Arc::new(TrackerService::new(TrackerState::new(Config::default())));
        spawn_server(listener, service, 8, WireSettings::default()).unwrap()
    }

    fn client(handle: &ServerHandle, port: u16) -> TrackerClient {
        TrackerClient::new(
            handle.local_addr().to_string(),
            PeerIdentity::new("127.0.0.1", port),
            WireSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_upload_list_lookup_over_tcp() {
        let handle = tracker().await;
        let seeder = client(&handle, 9001);
        let leecher = client(&handle, 9002);

        let err = seeder.list().await.unwrap_err();
        assert!(matches!(
            err,
            PeerError::Rejected {
                code: ReturnCode::NoAvailableTorrents,
                ..
            }
        ));

        let id = seeder.upload("a.bin", 10).await.unwrap();
        assert_eq!(id, 0);

        let listed = leecher.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].filename, "a.bin");

        let torrent = leecher.get_torrent(id).await.unwrap();
        assert_eq!(torrent.chunk_count, 10);
        assert_eq!(torrent.leechers.len(), 1);

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_rejections_carry_codes() {
        let handle = tracker().await;
        let seeder = client(&handle, 9001);

        let err = seeder.get_torrent(4).await.unwrap_err();
        assert!(matches!(
            err,
            PeerError::Rejected {
                code: ReturnCode::TorrentDoesNotExist,
                ..
            }
        ));

        seeder.upload("a.bin", 1).await.unwrap();
        let err = seeder.upload("b.bin", 1).await.unwrap_err();
        assert!(matches!(
            err,
            PeerError::Rejected {
                code: ReturnCode::AlreadySeeding,
                ..
            }
        ));

        assert!(seeder.start_seed(9).await.is_err());
        seeder.stop_seed(0).await.unwrap();
        assert!(seeder.stop_seed(0).await.is_err());

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_unreachable_tracker_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let client = TrackerClient::new(addr, PeerIdentity::new("127.0.0.1", 1), WireSettings::default());
        let err = client.list().await.unwrap_err();
        assert!(err.is_transport());
    }
}
