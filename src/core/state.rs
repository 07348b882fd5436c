// Tracker state shared by every connection handler

use crate::core::config::Config;
use crate::metrics::collector::Metrics;
use crate::stores::torrent_registry::TorrentRegistry;
use std::sync::Arc;

/// Shared tracker state
///
/// Owned by the tracker service and cloned into each connection task.
/// All fields are wrapped in Arc for cheap cloning across tasks.
#[derive(Clone)]
pub struct TrackerState {
    /// Authoritative torrent membership
    pub registry: Arc<TorrentRegistry>,

    /// Request counters
    pub metrics: Arc<Metrics>,

    /// Configuration
    pub config: Arc<Config>,
}

impl TrackerState {
    pub fn new(config: Config) -> Self {
        Self {
            registry: Arc::new(TorrentRegistry::new()),
            metrics: Arc::new(Metrics::new()),
            config: Arc::new(config),
        }
    }
}
