pub mod core {
    pub mod config;
    pub mod error;
    pub mod listener;
    pub mod state;
    pub mod tracing_init;
}

pub mod protocol {
    pub mod codec;
    pub mod codes;
    pub mod message;
}

pub mod models {
    pub mod peer;
    pub mod torrent;
}

pub mod stores {
    pub mod chunk_store;
    pub mod torrent_registry;
}

pub mod handlers {
    pub mod peer;
    pub mod tracker;
}

pub mod metrics {
    pub mod collector;
}

pub mod peer {
    pub mod agent;
    pub mod download;
    pub mod tracker_client;
}

pub mod utils {
    pub mod files;
}
