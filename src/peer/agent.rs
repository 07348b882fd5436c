use crate::core::config::Config;
use crate::core::error::{PeerError, TransportError};
use crate::core::listener::{spawn_server, ServerHandle};
use crate::handlers::peer::{PeerContext, PeerService};
use crate::models::peer::PeerIdentity;
use crate::peer::download::{split_chunks_between_peers, RetryPolicy, TcpChunkFetcher};
use crate::peer::tracker_client::TrackerClient;
use crate::protocol::codec::WireSettings;
use crate::protocol::message::TorrentSnapshot;
use crate::utils::files::{combine_chunks, output_path, split_file, strip_filename};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, instrument, warn};

/// What the agent is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Idle,
    Leeching,
    Seeding,
}

/// Role flags plus the torrent being served
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionState {
    pub seeding: bool,
    pub leeching: bool,
    pub torrent_id: Option<u32>,
}

impl ConnectionState {
    pub fn role(&self) -> Role {
        if self.seeding {
            Role::Seeding
        } else if self.leeching {
            Role::Leeching
        } else {
            Role::Idle
        }
    }
}

/// A participant that both serves and fetches chunks
pub struct PeerAgent {
    context: Arc<PeerContext>,
    tracker: TrackerClient,
    state: ConnectionState,
    listener: Option<TcpListener>,
    server: Option<ServerHandle>,
    settings: WireSettings,
    policy: RetryPolicy,
    max_inbound: usize,
    chunk_size: usize,
    output_dir: PathBuf,
}

impl PeerAgent {
    /// Reserve the inbound port and derive the peer id from it
    ///
    /// Port 0 picks a free port. The tracker is not contacted here.
    pub async fn bind(ip: &str, port: u16, config: &Config) -> Result<Self, PeerError> {
        let listener = TcpListener::bind((ip, port)).await.map_err(TransportError::from)?;
        let port = listener.local_addr().map_err(TransportError::from)?.port();
        let identity = PeerIdentity::new(ip, port);
        let settings = WireSettings::from(&config.network);

        info!(peer_id = %identity.id, %ip, port, "Peer agent bound");

        Ok(Self {
            tracker: TrackerClient::new(config.peer.tracker_addr(), identity.clone(), settings),
            context: Arc::new(PeerContext::new(identity)),
            state: ConnectionState::default(),
            listener: Some(listener),
            server: None,
            settings,
            policy: RetryPolicy {
                max_retries: config.peer.max_retries,
                retry_delay: config.peer.retry_delay(),
                max_parallel: config.peer.max_parallel_fetches,
            },
            max_inbound: config.peer.max_inbound_connections,
            chunk_size: config.peer.chunk_size,
            output_dir: config.peer.output_dir.clone(),
        })
    }

    pub fn identity(&self) -> &PeerIdentity {
        &self.context.identity
    }

    pub fn context(&self) -> &Arc<PeerContext> {
        &self.context
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn role(&self) -> Role {
        self.state.role()
    }

    pub fn tracker(&self) -> &TrackerClient {
        &self.tracker
    }

    pub fn is_serving(&self) -> bool {
        self.server.is_some()
    }

    fn require_idle(&self, action: &str) -> Result<(), PeerError> {
        match self.role() {
            Role::Idle => Ok(()),
            role => Err(PeerError::InvalidState(format!("cannot {action} while {role:?}"))),
        }
    }

    pub async fn list_torrents(&self) -> Result<Vec<TorrentSnapshot>, PeerError> {
        self.tracker.list().await
    }

    /// Split a local file, register it and start serving its chunks
    #[instrument(skip(self), fields(peer_id = %self.identity().id))]
    pub async fn share_file(&mut self, path: &Path) -> Result<u32, PeerError> {
        self.require_idle("share a file")?;

        let chunks = split_file(path, self.chunk_size).await?;
        let chunk_count = chunks.len() as u32;
        let file_name = strip_filename(&path.to_string_lossy());

        self.context.store.fill(chunks);
        let torrent_id = match self.tracker.upload(&file_name, chunk_count).await {
            Ok(id) => id,
            Err(e) => {
                self.context.store.clear();
                return Err(e);
            }
        };

        // the tracker already lists us, so undo the upload if we cannot serve
        if let Err(e) = self.start_server().await {
            if let Err(stop) = self.tracker.stop_seed(torrent_id).await {
                warn!(torrent_id, error = %stop, "Could not withdraw upload");
            }
            self.context.store.clear();
            return Err(e);
        }
        self.state = ConnectionState {
            seeding: true,
            leeching: false,
            torrent_id: Some(torrent_id),
        };

        info!(torrent_id, %file_name, chunk_count, "Seeding shared file");
        Ok(torrent_id)
    }

    /// Fetch a torrent from its seeders, write it out, then seed it
    ///
    /// Returns where the file was written. Nothing is written unless every
    /// chunk arrived.
    #[instrument(skip(self), fields(peer_id = %self.identity().id))]
    pub async fn download(&mut self, torrent_id: u32) -> Result<PathBuf, PeerError> {
        self.require_idle("download")?;

        let torrent = self.tracker.get_torrent(torrent_id).await?;
        let chunk_count = torrent.chunk_count as usize;

        self.state.leeching = true;
        self.context.set_seeders(torrent.seeders.clone());
        self.context.store.initialize(chunk_count);

        info!(
            torrent_id,
            file_name = %torrent.filename,
            chunk_count,
            seeders = torrent.seeders.len(),
            "Downloading"
        );

        let fetcher = Arc::new(TcpChunkFetcher::new(self.identity().addr(), self.settings));
        let complete =
            split_chunks_between_peers(chunk_count, &self.policy, &self.context, fetcher).await;

        if !complete {
            let missing = self.context.store.missing_indices().len();
            self.abandon_download();
            return Err(PeerError::DownloadIncomplete { torrent_id, missing });
        }

        self.context.store.wait_complete().await;
        let Some(chunks) = self.context.store.chunks() else {
            let missing = self.context.store.missing_indices().len();
            self.abandon_download();
            return Err(PeerError::DownloadIncomplete { torrent_id, missing });
        };

        let path = output_path(&self.output_dir, &self.identity().id, &torrent.filename);
        if let Err(e) = combine_chunks(&chunks, &path).await {
            self.abandon_download();
            return Err(e);
        }
        info!(torrent_id, path = %path.display(), "File downloaded");

        if let Err(e) = self.start_server().await {
            self.abandon_download();
            return Err(e);
        }
        if let Err(e) = self.tracker.start_seed(torrent_id).await {
            self.stop_server().await;
            self.abandon_download();
            return Err(e);
        }
        self.state = ConnectionState {
            seeding: true,
            leeching: false,
            torrent_id: Some(torrent_id),
        };

        info!(torrent_id, "Seeding downloaded file");
        Ok(path)
    }

    fn abandon_download(&mut self) {
        self.context.store.clear();
        self.state = ConnectionState::default();
    }

    /// Leave the swarm for the current torrent and go idle
    ///
    /// Local teardown happens even when the tracker cannot be reached.
    #[instrument(skip(self), fields(peer_id = %self.identity().id))]
    pub async fn stop_seeding(&mut self) -> Result<(), PeerError> {
        let Some(torrent_id) = self.state.torrent_id.filter(|_| self.state.seeding) else {
            return Err(PeerError::InvalidState("not seeding".to_string()));
        };

        let result = self.tracker.stop_seed(torrent_id).await;
        if let Err(e) = &result {
            warn!(torrent_id, error = %e, "Tracker did not confirm stop");
        }

        self.stop_server().await;
        self.context.store.clear();
        self.state = ConnectionState::default();

        info!(torrent_id, "Stopped seeding");
        result
    }

    /// Stop seeding if needed and release the inbound port
    pub async fn shutdown(&mut self) -> Result<(), PeerError> {
        let result = if self.state.seeding {
            self.stop_seeding().await
        } else {
            Ok(())
        };
        self.stop_server().await;
        self.listener = None;
        result
    }

    async fn start_server(&mut self) -> Result<(), PeerError> {
        if self.server.is_some() {
            return Ok(());
        }

        let listener = match self.listener.take() {
            Some(listener) => listener,
            None => TcpListener::bind(self.identity().addr().socket_addr())
                .await
                .map_err(TransportError::from)?,
        };

        let service = Arc::new(PeerService::new(Arc::clone(&self.context)));
        let handle = spawn_server(listener, service, self.max_inbound, self.settings)
            .map_err(TransportError::from)?;

        info!(addr = %handle.local_addr(), "Serving chunks");
        self.server = Some(handle);
        Ok(())
    }

    async fn stop_server(&mut self) {
        if let Some(handle) = self.server.take() {
            handle.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::listener::Service;
    use crate::core::state::TrackerState;
    use crate::handlers::tracker::TrackerService;
    use crate::protocol::codes::ReturnCode;
    use crate::protocol::message::{SeedResponse, TrackerRequest, TrackerResponse};
    use std::net::SocketAddr;
    use tempfile::tempdir;

    /// Tracker that refuses every START_SEED
    struct RefusingStartSeed(TrackerService);

    impl Service for RefusingStartSeed {
        type Request = TrackerRequest;
        type Response = TrackerResponse;

        fn call(&self, request: TrackerRequest, remote: SocketAddr) -> TrackerResponse {
            match request {
                TrackerRequest::StartSeed(_) => TrackerResponse::StartSeed(SeedResponse {
                    ret: ReturnCode::Fail,
                    torrent_id: None,
                }),
                other => self.0.call(other, remote),
            }
        }
    }

    async fn tracker_with<S, F>(wrap: F) -> (ServerHandle, Config)
    where
        S: Service,
        F: FnOnce(TrackerService) -> S,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = Config::default();
        config.peer.tracker_port = listener.local_addr().unwrap().port();
        config.peer.retry_delay_ms = 10;
        config.peer.max_retries = 3;

        let service = wrap(TrackerService::new(TrackerState::new(config.clone())));
        let handle = spawn_server(listener, Arc::new(service), 16, WireSettings::default()).unwrap();
        (handle, config)
    }

    async fn tracker() -> (ServerHandle, Config) {
        tracker_with(|service| service).await
    }

    /// Tracker whose registry the test can inspect
    async fn swarm_tracker(output_dir: &Path) -> (ServerHandle, TrackerState, Config) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = Config::default();
        config.peer.tracker_port = listener.local_addr().unwrap().port();
        config.peer.output_dir = output_dir.to_path_buf();
        config.peer.max_retries = 3;
        config.peer.retry_delay_ms = 20;

        let state = TrackerState::new(config.clone());
        let service = Arc::new(TrackerService::new(state.clone()));
        let handle = spawn_server(listener, service, 64, WireSettings::default()).unwrap();
        (handle, state, config)
    }

    #[test]
    fn test_role_from_flags() {
        let mut state = ConnectionState::default();
        assert_eq!(state.role(), Role::Idle);

        state.leeching = true;
        assert_eq!(state.role(), Role::Leeching);

        state.seeding = true;
        assert_eq!(state.role(), Role::Seeding);
    }

    #[tokio::test]
    async fn test_share_then_stop() {
        let (tracker, config) = tracker().await;
        let dir = tempdir().unwrap();
        let file = dir.path().join("notes.txt");
        std::fs::write(&file, vec![b'x'; 40_000]).unwrap();

        let mut agent = PeerAgent::bind("127.0.0.1", 0, &config).await.unwrap();
        let torrent_id = agent.share_file(&file).await.unwrap();

        assert_eq!(agent.role(), Role::Seeding);
        assert_eq!(agent.state().torrent_id, Some(torrent_id));
        assert!(agent.is_serving());
        assert_eq!(agent.context().store.capacity(), 3);

        let listed = agent.list_torrents().await.unwrap();
        assert_eq!(listed[0].filename, "notes.txt");

        agent.stop_seeding().await.unwrap();
        assert_eq!(agent.role(), Role::Idle);
        assert!(!agent.is_serving());
        assert!(agent.list_torrents().await.is_err());

        tracker.stop().await;
    }

    #[tokio::test]
    async fn test_invalid_transitions_are_refused() {
        let (tracker, config) = tracker().await;
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.bin");
        std::fs::write(&file, b"abc").unwrap();

        let mut agent = PeerAgent::bind("127.0.0.1", 0, &config).await.unwrap();
        assert!(matches!(agent.stop_seeding().await, Err(PeerError::InvalidState(_))));

        agent.share_file(&file).await.unwrap();
        assert!(matches!(agent.share_file(&file).await, Err(PeerError::InvalidState(_))));
        assert!(matches!(agent.download(0).await, Err(PeerError::InvalidState(_))));

        agent.shutdown().await.unwrap();
        tracker.stop().await;
    }

    #[tokio::test]
    async fn test_download_of_unknown_torrent_leaves_agent_idle() {
        let (tracker, config) = tracker().await;
        let mut agent = PeerAgent::bind("127.0.0.1", 0, &config).await.unwrap();

        let err = agent.download(42).await.unwrap_err();
        assert!(matches!(err, PeerError::Rejected { .. }));
        assert_eq!(agent.role(), Role::Idle);

        tracker.stop().await;
    }

    #[tokio::test]
    async fn test_share_is_withdrawn_when_server_cannot_start() {
        let (tracker, config) = tracker().await;
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.bin");
        std::fs::write(&file, b"abc").unwrap();

        let mut agent = PeerAgent::bind("127.0.0.1", 0, &config).await.unwrap();
        // keep the reserved port busy so the server cannot bind it
        let held = agent.listener.take().unwrap();

        let err = agent.share_file(&file).await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(agent.role(), Role::Idle);
        assert!(!agent.is_serving());
        assert_eq!(agent.context().store.capacity(), 0);
        assert!(matches!(
            agent.list_torrents().await,
            Err(PeerError::Rejected {
                code: ReturnCode::NoAvailableTorrents,
                ..
            })
        ));

        // the tracker forgot the upload, so sharing again is accepted
        agent.listener = Some(held);
        assert_eq!(agent.share_file(&file).await.unwrap(), 0);

        agent.shutdown().await.unwrap();
        tracker.stop().await;
    }

    #[tokio::test]
    async fn test_refused_start_seed_rolls_back_download() {
        let (tracker, mut config) = tracker_with(RefusingStartSeed).await;
        let dir = tempdir().unwrap();
        config.peer.output_dir = dir.path().join("output");
        let file = dir.path().join("a.bin");
        std::fs::write(&file, vec![7u8; 20_000]).unwrap();

        let mut seeder = PeerAgent::bind("127.0.0.1", 0, &config).await.unwrap();
        let mut leecher = PeerAgent::bind("127.0.0.1", 0, &config).await.unwrap();
        let torrent_id = seeder.share_file(&file).await.unwrap();

        let err = leecher.download(torrent_id).await.unwrap_err();
        assert!(matches!(
            err,
            PeerError::Rejected {
                code: ReturnCode::Fail,
                ..
            }
        ));
        assert_eq!(leecher.state(), ConnectionState::default());
        assert!(!leecher.is_serving());
        assert_eq!(leecher.context().store.capacity(), 0);
        assert_eq!(seeder.role(), Role::Seeding);

        seeder.shutdown().await.unwrap();
        leecher.shutdown().await.unwrap();
        tracker.stop().await;
    }

    #[tokio::test]
    async fn test_share_download_seed_stop() {
        let dir = tempdir().unwrap();
        let (tracker, state, config) = swarm_tracker(&dir.path().join("output")).await;

        let source = dir.path().join("payload.bin");
        let data: Vec<u8> = (0..100_000u32).map(|i| (i * 7 % 256) as u8).collect();
        std::fs::write(&source, &data).unwrap();

        let mut seeder = PeerAgent::bind("127.0.0.1", 0, &config).await.unwrap();
        let mut leecher = PeerAgent::bind("127.0.0.1", 0, &config).await.unwrap();

        let torrent_id = seeder.share_file(&source).await.unwrap();
        assert_eq!(torrent_id, 0);

        let listed = leecher.list_torrents().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].filename, "payload.bin");
        assert_eq!(listed[0].chunk_count, 7);

        let path = leecher.download(torrent_id).await.unwrap();
        assert_eq!(
            path,
            dir.path()
                .join("output")
                .join(format!("{}_payload.bin", leecher.identity().id))
        );
        assert_eq!(std::fs::read(&path).unwrap(), data);
        assert_eq!(leecher.role(), Role::Seeding);

        let torrent = state.registry.list().remove(0);
        assert!(torrent.is_seeded_by(&seeder.identity().id));
        assert!(torrent.is_seeded_by(&leecher.identity().id));
        assert!(torrent.leechers.is_empty());

        // the original seeder leaves; the torrent survives on the new one
        seeder.stop_seeding().await.unwrap();
        assert!(state.registry.contains(torrent_id));

        leecher.shutdown().await.unwrap();
        assert!(!state.registry.contains(torrent_id));
        assert!(matches!(
            seeder.list_torrents().await,
            Err(PeerError::Rejected {
                code: ReturnCode::NoAvailableTorrents,
                ..
            })
        ));

        seeder.shutdown().await.unwrap();
        tracker.stop().await;
    }

    #[tokio::test]
    async fn test_third_peer_downloads_from_two_seeders() {
        let dir = tempdir().unwrap();
        let (tracker, state, config) = swarm_tracker(&dir.path().join("output")).await;

        let source = dir.path().join("doc.txt");
        let data = b"swarm ".repeat(10_000);
        std::fs::write(&source, &data).unwrap();

        let mut first = PeerAgent::bind("127.0.0.1", 0, &config).await.unwrap();
        let mut second = PeerAgent::bind("127.0.0.1", 0, &config).await.unwrap();
        let mut third = PeerAgent::bind("127.0.0.1", 0, &config).await.unwrap();

        let torrent_id = first.share_file(&source).await.unwrap();
        second.download(torrent_id).await.unwrap();

        let path = third.download(torrent_id).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), data);
        assert_eq!(state.registry.list()[0].seeders.len(), 3);

        for agent in [&mut first, &mut second, &mut third] {
            agent.shutdown().await.unwrap();
        }
        assert!(state.registry.is_empty());
        tracker.stop().await;
    }

    #[tokio::test]
    async fn test_unreachable_seeder_fails_without_writing() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("output");
        let (tracker, _state, config) = swarm_tracker(&output).await;

        // register a torrent whose only seeder is not listening
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let ghost_port = closed.local_addr().unwrap().port();
        drop(closed);

        let ghost = TrackerClient::new(
            config.peer.tracker_addr(),
            PeerIdentity::new("127.0.0.1", ghost_port),
            WireSettings::default(),
        );
        let torrent_id = ghost.upload("ghost.bin", 4).await.unwrap();

        let mut leecher = PeerAgent::bind("127.0.0.1", 0, &config).await.unwrap();
        let err = leecher.download(torrent_id).await.unwrap_err();

        assert!(matches!(err, PeerError::DownloadIncomplete { missing: 4, .. }));
        assert_eq!(leecher.role(), Role::Idle);
        assert!(!output.exists());

        tracker.stop().await;
    }
}
