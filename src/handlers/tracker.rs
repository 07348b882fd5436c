use crate::core::error::TransportError;
use crate::core::listener::Service;
use crate::core::state::TrackerState;
use crate::protocol::codes::ReturnCode;
use crate::protocol::message::{
    ListResponse, SeedResponse, StatusResponse, TorrentRequest, TorrentResponse, TorrentSnapshot,
    TrackerRequest, TrackerResponse, UploadRequest,
};
use crate::stores::torrent_registry::{Demotion, UploadRejection};
use std::net::SocketAddr;
use tracing::{debug, info, instrument, warn};

/// Tracker request handler
///
/// Maps each request to exactly one response against the shared registry.
/// Failures travel back as return codes, never as errors.
pub struct TrackerService {
    state: TrackerState,
}

impl TrackerService {
    pub fn new(state: TrackerState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &TrackerState {
        &self.state
    }

    #[instrument(skip_all, fields(op = %request.op(), peer = %request.peer().id))]
    pub fn handle(&self, request: TrackerRequest) -> TrackerResponse {
        let op = request.op();
        let response = match request {
            TrackerRequest::GetList(_) => self.list_torrents(),
            TrackerRequest::GetTorrent(req) => self.get_torrent(&req),
            TrackerRequest::StartSeed(req) => self.start_seed(&req),
            TrackerRequest::StopSeed(req) => self.stop_seed(&req),
            TrackerRequest::UploadFile(req) => self.upload_file(&req),
        };

        let ret = response.ret();
        self.state.metrics.record(op, !ret.is_error());
        debug!(%ret, "Request handled");
        response
    }

    fn list_torrents(&self) -> TrackerResponse {
        let torrents = self.state.registry.list();
        if torrents.is_empty() {
            return TrackerResponse::GetList(ListResponse {
                ret: ReturnCode::NoAvailableTorrents,
                torrents: None,
            });
        }

        TrackerResponse::GetList(ListResponse {
            ret: ReturnCode::Success,
            torrents: Some(torrents.iter().map(TorrentSnapshot::from).collect()),
        })
    }

    fn get_torrent(&self, req: &TorrentRequest) -> TrackerResponse {
        match self.state.registry.get_torrent(&req.peer, req.torrent_id) {
            Some(torrent) => TrackerResponse::GetTorrent(TorrentResponse {
                ret: ReturnCode::Success,
                torrent: Some(TorrentSnapshot::from(&torrent)),
            }),
            None => {
                debug!(torrent_id = req.torrent_id, "Unknown torrent requested");
                TrackerResponse::GetTorrent(TorrentResponse {
                    ret: ReturnCode::TorrentDoesNotExist,
                    torrent: None,
                })
            }
        }
    }

    fn start_seed(&self, req: &TorrentRequest) -> TrackerResponse {
        let ret = if self.state.registry.promote(&req.peer, req.torrent_id) {
            info!(torrent_id = req.torrent_id, "Peer promoted to seeder");
            ReturnCode::Success
        } else {
            warn!(torrent_id = req.torrent_id, "Cannot seed unknown torrent");
            ReturnCode::Fail
        };

        TrackerResponse::StartSeed(SeedResponse {
            ret,
            torrent_id: Some(req.torrent_id),
        })
    }

    fn stop_seed(&self, req: &TorrentRequest) -> TrackerResponse {
        let ret = match self.state.registry.demote(&req.peer.id, req.torrent_id) {
            Some(Demotion::Retained) => {
                info!(torrent_id = req.torrent_id, "Seeder removed");
                ReturnCode::Success
            }
            Some(Demotion::Removed { reclaimed_id }) => {
                info!(
                    torrent_id = req.torrent_id,
                    reclaimed_id,
                    "Last seeder left, torrent removed"
                );
                ReturnCode::Success
            }
            None => {
                warn!(torrent_id = req.torrent_id, "Cannot stop seeding unknown torrent");
                ReturnCode::Fail
            }
        };

        TrackerResponse::StopSeed(StatusResponse { ret })
    }

    fn upload_file(&self, req: &UploadRequest) -> TrackerResponse {
        match self
            .state
            .registry
            .register_upload(&req.peer, &req.file_name, req.chunk_count)
        {
            Ok(torrent_id) => {
                info!(
                    torrent_id,
                    file_name = %req.file_name,
                    chunk_count = req.chunk_count,
                    "Torrent registered"
                );
                TrackerResponse::UploadFile(SeedResponse {
                    ret: ReturnCode::Success,
                    torrent_id: Some(torrent_id),
                })
            }
            Err(UploadRejection::AlreadySeeding(existing)) => {
                warn!(existing, file_name = %req.file_name, "Peer already seeding a file");
                TrackerResponse::UploadFile(SeedResponse {
                    ret: ReturnCode::AlreadySeeding,
                    torrent_id: None,
                })
            }
        }
    }
}

impl Service for TrackerService {
    type Request = TrackerRequest;
    type Response = TrackerResponse;

    fn call(&self, request: TrackerRequest, _remote: SocketAddr) -> TrackerResponse {
        self.handle(request)
    }

    fn on_dropped(&self, _remote: SocketAddr, _error: &TransportError) {
        self.state.metrics.increment_dropped();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;
    use crate::models::peer::PeerIdentity;
    use std::sync::atomic::Ordering;

    fn service() -> TrackerService {
        TrackerService::new(TrackerState::new(Config::default()))
    }

    fn peer(port: u16) -> PeerIdentity {
        PeerIdentity::new("127.0.0.1", port)
    }

    fn torrent_req(peer: &PeerIdentity, torrent_id: u32) -> TorrentRequest {
        TorrentRequest {
            torrent_id,
            peer: peer.clone(),
        }
    }

    fn upload(service: &TrackerService, peer: &PeerIdentity, name: &str, chunks: u32) -> TrackerResponse {
        service.handle(TrackerRequest::UploadFile(UploadRequest {
            file_name: name.to_string(),
            chunk_count: chunks,
            peer: peer.clone(),
        }))
    }

    #[test]
    fn test_empty_list_has_explicit_code() {
        let service = service();
        let response = service.handle(TrackerRequest::GetList(peer(9001)));

        assert_eq!(
            response,
            TrackerResponse::GetList(ListResponse {
                ret: ReturnCode::NoAvailableTorrents,
                torrents: None,
            })
        );
    }

    #[test]
    fn test_full_lifecycle() {
        let service = service();
        let (p1, p2) = (peer(9001), peer(9002));

        // upload
        let response = upload(&service, &p1, "a.bin", 10);
        assert_eq!(
            response,
            TrackerResponse::UploadFile(SeedResponse {
                ret: ReturnCode::Success,
                torrent_id: Some(0),
            })
        );

        // list
        match service.handle(TrackerRequest::GetList(p2.clone())) {
            TrackerResponse::GetList(ListResponse { ret, torrents: Some(list) }) => {
                assert_eq!(ret, ReturnCode::Success);
                assert_eq!(list.len(), 1);
                assert_eq!(list[0].chunk_count, 10);
            }
            other => panic!("unexpected response: {other:?}"),
        }

        // lookup registers the leecher
        match service.handle(TrackerRequest::GetTorrent(torrent_req(&p2, 0))) {
            TrackerResponse::GetTorrent(TorrentResponse { ret, torrent: Some(t) }) => {
                assert_eq!(ret, ReturnCode::Success);
                assert!(t.seeders.contains_key(&p1.id));
                assert!(t.leechers.contains_key(&p2.id));
            }
            other => panic!("unexpected response: {other:?}"),
        }

        // promotion
        let response = service.handle(TrackerRequest::StartSeed(torrent_req(&p2, 0)));
        assert_eq!(response.ret(), ReturnCode::Success);
        let listed = service.state().registry.list();
        assert_eq!(listed[0].seeders.len(), 2);
        assert!(listed[0].leechers.is_empty());

        // both seeders leave
        assert_eq!(
            service.handle(TrackerRequest::StopSeed(torrent_req(&p1, 0))).ret(),
            ReturnCode::Success
        );
        assert_eq!(
            service.handle(TrackerRequest::StopSeed(torrent_req(&p2, 0))).ret(),
            ReturnCode::Success
        );

        let response = service.handle(TrackerRequest::GetTorrent(torrent_req(&p2, 0)));
        assert_eq!(
            response,
            TrackerResponse::GetTorrent(TorrentResponse {
                ret: ReturnCode::TorrentDoesNotExist,
                torrent: None,
            })
        );
    }

    #[test]
    fn test_second_upload_is_already_seeding() {
        let service = service();
        let p1 = peer(9001);

        upload(&service, &p1, "a.bin", 10);
        let response = upload(&service, &p1, "b.bin", 2);

        assert_eq!(response.ret(), ReturnCode::AlreadySeeding);
        assert_eq!(service.state().registry.len(), 1);
    }

    #[test]
    fn test_unknown_torrent_operations_fail() {
        let service = service();
        let p1 = peer(9001);

        assert_eq!(
            service.handle(TrackerRequest::StartSeed(torrent_req(&p1, 5))).ret(),
            ReturnCode::Fail
        );
        assert_eq!(
            service.handle(TrackerRequest::StopSeed(torrent_req(&p1, 5))).ret(),
            ReturnCode::Fail
        );
    }

    #[test]
    fn test_metrics_follow_return_codes() {
        let service = service();
        let p1 = peer(9001);

        upload(&service, &p1, "a.bin", 1);
        upload(&service, &p1, "a.bin", 1);
        service.handle(TrackerRequest::GetList(p1.clone()));

        let metrics = &service.state().metrics;
        assert_eq!(metrics.total_requests.load(Ordering::Relaxed), 3);
        assert_eq!(metrics.failed_requests.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.uploads.load(Ordering::Relaxed), 1);
    }
}
