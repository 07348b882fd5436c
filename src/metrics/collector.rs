use crate::protocol::codes::OpCode;
use crate::stores::torrent_registry::TorrentRegistry;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

pub struct Metrics {
    pub total_requests: AtomicU64,
    pub successful_requests: AtomicU64,
    pub failed_requests: AtomicU64,
    pub dropped_connections: AtomicU64,
    pub uploads: AtomicU64,
    pub lookups: AtomicU64,
    pub start_time: Instant,
}

#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub success_rate: f64,
    pub dropped_connections: u64,
    pub uploads: u64,
    pub lookups: u64,
    pub torrents: usize,
    pub seeders: usize,
    pub leechers: usize,
    pub uptime_seconds: u64,
    pub requests_per_second: f64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            successful_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            dropped_connections: AtomicU64::new(0),
            uploads: AtomicU64::new(0),
            lookups: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Count one served request by operation and outcome
    pub fn record(&self, op: OpCode, success: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }

        match op {
            OpCode::UploadFile if success => {
                self.uploads.fetch_add(1, Ordering::Relaxed);
            }
            OpCode::GetTorrent if success => {
                self.lookups.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    /// Connection closed before a request could be decoded
    pub fn increment_dropped(&self) {
        self.dropped_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Counters plus registry totals, with success rate and request rate derived
    pub fn get_snapshot(&self, registry: &TorrentRegistry) -> MetricsSnapshot {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let successful_requests = self.successful_requests.load(Ordering::Relaxed);
        let failed_requests = self.failed_requests.load(Ordering::Relaxed);

        let success_rate = if total_requests > 0 {
            (successful_requests as f64 / total_requests as f64) * 100.0
        } else {
            0.0
        };

        let uptime_seconds = self.start_time.elapsed().as_secs();

        let requests_per_second = if uptime_seconds > 0 {
            total_requests as f64 / uptime_seconds as f64
        } else {
            0.0
        };

        let (seeders, leechers) = registry.peer_counts();

        MetricsSnapshot {
            total_requests,
            successful_requests,
            failed_requests,
            success_rate,
            dropped_connections: self.dropped_connections.load(Ordering::Relaxed),
            uploads: self.uploads.load(Ordering::Relaxed),
            lookups: self.lookups.load(Ordering::Relaxed),
            torrents: registry.len(),
            seeders,
            leechers,
            uptime_seconds,
            requests_per_second,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
