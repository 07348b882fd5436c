use crate::models::peer::{PeerAddr, PeerIdentity};
use std::collections::BTreeMap;

/// Tracker-side record of one shared file
///
/// A peer id lives in at most one of `seeders` and `leechers`.
#[derive(Clone, Debug, PartialEq)]
pub struct Torrent {
    /// Tracker-assigned id
    pub id: u32,
    pub filename: String,
    /// Fixed at creation
    pub chunk_count: u32,
    pub seeders: BTreeMap<String, PeerAddr>,
    pub leechers: BTreeMap<String, PeerAddr>,
}

impl Torrent {
    /// New torrent with `owner` as its sole seeder
    pub fn new(id: u32, filename: String, chunk_count: u32, owner: &PeerIdentity) -> Self {
        let mut torrent = Self {
            id,
            filename,
            chunk_count,
            seeders: BTreeMap::new(),
            leechers: BTreeMap::new(),
        };
        torrent.add_seeder(owner);
        torrent
    }

    pub fn add_seeder(&mut self, peer: &PeerIdentity) {
        self.leechers.remove(&peer.id);
        self.seeders.insert(peer.id.clone(), peer.addr());
    }

    /// Seeders stay seeders; the request is a no-op for them
    pub fn add_leecher(&mut self, peer: &PeerIdentity) -> bool {
        if self.seeders.contains_key(&peer.id) {
            return false;
        }
        self.leechers.insert(peer.id.clone(), peer.addr());
        true
    }

    pub fn remove_seeder(&mut self, peer_id: &str) -> bool {
        self.seeders.remove(peer_id).is_some()
    }

    pub fn remove_leecher(&mut self, peer_id: &str) -> bool {
        self.leechers.remove(peer_id).is_some()
    }

    pub fn is_seeded_by(&self, peer_id: &str) -> bool {
        self.seeders.contains_key(peer_id)
    }

    pub fn has_seeders(&self) -> bool {
        !self.seeders.is_empty()
    }
}
