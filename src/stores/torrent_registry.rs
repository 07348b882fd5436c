use crate::models::peer::PeerIdentity;
use crate::models::torrent::Torrent;
use dashmap::DashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Why an upload was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadRejection {
    /// The peer already seeds the torrent with this id
    AlreadySeeding(u32),
}

/// Outcome of removing a seeder from a known torrent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Demotion {
    /// Other seeders remain
    Retained,
    /// The last seeder left and the torrent was dropped
    Removed { reclaimed_id: bool },
}

/// Tracker-side registry of every shared file
///
/// Each torrent sits behind its own shard lock. Operations that create or
/// delete torrents also take the allocator lock so id issuance and
/// reclamation stay ordered.
pub struct TorrentRegistry {
    torrents: DashMap<u32, Torrent>,
    next_id: Mutex<u32>,
}

impl TorrentRegistry {
    pub fn new() -> Self {
        Self {
            torrents: DashMap::new(),
            next_id: Mutex::new(0),
        }
    }

    fn allocator(&self) -> MutexGuard<'_, u32> {
        self.next_id.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a torrent seeded by `peer`
    ///
    /// A peer seeds at most one file at a time.
    pub fn register_upload(
        &self,
        peer: &PeerIdentity,
        filename: &str,
        chunk_count: u32,
    ) -> Result<u32, UploadRejection> {
        let mut next_id = self.allocator();

        if let Some(existing) = self.seeding_torrent(&peer.id) {
            return Err(UploadRejection::AlreadySeeding(existing));
        }

        // live ids are always below next_id, so this cannot collide
        let id = *next_id;
        self.torrents
            .insert(id, Torrent::new(id, filename.to_string(), chunk_count, peer));
        *next_id += 1;
        Ok(id)
    }

    /// Snapshot of all torrents ordered by id
    pub fn list(&self) -> Vec<Torrent> {
        let mut torrents: Vec<Torrent> = self
            .torrents
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        torrents.sort_by_key(|torrent| torrent.id);
        torrents
    }

    /// Look up a torrent, registering `peer` as a leecher on the way
    pub fn get_torrent(&self, peer: &PeerIdentity, torrent_id: u32) -> Option<Torrent> {
        let mut torrent = self.torrents.get_mut(&torrent_id)?;
        torrent.add_leecher(peer);
        Some(torrent.clone())
    }

    /// Move `peer` into the seeder set; false when the id is unknown
    pub fn promote(&self, peer: &PeerIdentity, torrent_id: u32) -> bool {
        match self.torrents.get_mut(&torrent_id) {
            Some(mut torrent) => {
                torrent.add_seeder(peer);
                true
            }
            None => false,
        }
    }

    /// Remove `peer` from the seeder set; `None` when the id is unknown
    ///
    /// A torrent left without seeders is deleted. Its id is handed out
    /// again only if it was the most recently issued one.
    pub fn demote(&self, peer_id: &str, torrent_id: u32) -> Option<Demotion> {
        let mut next_id = self.allocator();

        {
            let mut torrent = self.torrents.get_mut(&torrent_id)?;
            torrent.remove_seeder(peer_id);
            if torrent.has_seeders() {
                return Some(Demotion::Retained);
            }
        }

        // a START_SEED may have landed since the shard guard was released
        if self
            .torrents
            .remove_if(&torrent_id, |_, torrent| !torrent.has_seeders())
            .is_none()
        {
            return Some(Demotion::Retained);
        }

        let reclaimed_id = torrent_id + 1 == *next_id;
        if reclaimed_id {
            *next_id -= 1;
        }
        Some(Demotion::Removed { reclaimed_id })
    }

    /// Id of the torrent `peer_id` currently seeds, if any
    pub fn seeding_torrent(&self, peer_id: &str) -> Option<u32> {
        self.torrents
            .iter()
            .find(|entry| entry.value().is_seeded_by(peer_id))
            .map(|entry| *entry.key())
    }

    pub fn contains(&self, torrent_id: u32) -> bool {
        self.torrents.contains_key(&torrent_id)
    }

    pub fn len(&self) -> usize {
        self.torrents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.torrents.is_empty()
    }

    /// Seeder and leecher totals across all torrents
    pub fn peer_counts(&self) -> (usize, usize) {
        self.torrents.iter().fold((0, 0), |(seeders, leechers), entry| {
            (
                seeders + entry.value().seeders.len(),
                leechers + entry.value().leechers.len(),
            )
        })
    }
}

impl Default for TorrentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
