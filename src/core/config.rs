use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an alternate config file
pub const CONFIG_ENV: &str = "SWARMSHARE_CONFIG";

/// Config file picked up from the working directory when present
pub const DEFAULT_CONFIG_FILE: &str = "swarmshare.toml";

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub peer: PeerConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_num_threads")]
    pub num_threads: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_tracker_port")]
    pub port: u16,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_stats_interval")]
    pub stats_interval: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PeerConfig {
    #[serde(default = "default_tracker_ip")]
    pub tracker_ip: String,
    #[serde(default = "default_tracker_port")]
    pub tracker_port: u16,
    #[serde(default = "default_max_inbound_connections")]
    pub max_inbound_connections: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_max_parallel_fetches")]
    pub max_parallel_fetches: usize,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_read_attempts")]
    pub read_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default = "default_console")]
    pub console: bool,
}

// Default value functions
fn default_num_threads() -> usize {
    num_cpus::get()
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_tracker_port() -> u16 {
    8888
}

fn default_max_connections() -> usize {
    1024
}

fn default_stats_interval() -> u64 {
    60
}

fn default_tracker_ip() -> String {
    "127.0.0.1".to_string()
}

fn default_max_inbound_connections() -> usize {
    32
}

fn default_max_retries() -> u32 {
    10
}

fn default_retry_delay_ms() -> u64 {
    200
}

fn default_max_parallel_fetches() -> usize {
    16
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_chunk_size() -> usize {
    crate::protocol::codes::CHUNK_SIZE
}

fn default_io_timeout_ms() -> u64 {
    5000
}

fn default_connect_timeout_ms() -> u64 {
    3000
}

fn default_read_attempts() -> u32 {
    16
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_console() -> bool {
    false
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            num_threads: default_num_threads(),
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_tracker_port(),
            max_connections: default_max_connections(),
            stats_interval: default_stats_interval(),
        }
    }
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            tracker_ip: default_tracker_ip(),
            tracker_port: default_tracker_port(),
            max_inbound_connections: default_max_inbound_connections(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            max_parallel_fetches: default_max_parallel_fetches(),
            output_dir: default_output_dir(),
            chunk_size: default_chunk_size(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            io_timeout_ms: default_io_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            read_attempts: default_read_attempts(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            console: default_console(),
        }
    }
}

impl PeerConfig {
    pub fn tracker_addr(&self) -> String {
        format!("{}:{}", self.tracker_ip, self.tracker_port)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .context("Failed to parse config file")?;

        config.validate()?;

        Ok(config)
    }

    /// Resolve the config file from `SWARMSHARE_CONFIG` or the working
    /// directory, falling back to built-in defaults when neither exists
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::from_file(Path::new(&path));
        }

        let local = Path::new(DEFAULT_CONFIG_FILE);
        if local.exists() {
            return Self::from_file(local);
        }

        let config = Config::default();
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.server.num_threads == 0 {
            bail!("num_threads must be greater than 0");
        }

        if self.tracker.max_connections == 0 {
            bail!("tracker max_connections must be greater than 0");
        }

        if self.tracker.stats_interval == 0 {
            bail!("stats_interval must be greater than 0");
        }

        if self.peer.max_inbound_connections == 0 {
            bail!("max_inbound_connections must be greater than 0");
        }

        if self.peer.max_retries == 0 {
            bail!("max_retries must be greater than 0");
        }

        if self.peer.max_parallel_fetches == 0 {
            bail!("max_parallel_fetches must be greater than 0");
        }

        // base64 expansion is 4/3; leave room for the JSON envelope
        let max_chunk = crate::protocol::codes::READ_SIZE / 4 * 3 - 512;
        if self.peer.chunk_size == 0 || self.peer.chunk_size > max_chunk {
            bail!(
                "chunk_size ({}) must be between 1 and {} to fit in a single frame",
                self.peer.chunk_size,
                max_chunk
            );
        }

        if self.network.io_timeout_ms == 0 || self.network.connect_timeout_ms == 0 {
            bail!("network timeouts must be greater than 0");
        }

        if self.network.read_attempts == 0 {
            bail!("read_attempts must be greater than 0");
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            bail!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.logging.level
            );
        }

        let valid_formats = ["json", "console"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            bail!(
                "Invalid log format '{}'. Must be one of: json, console",
                self.logging.format
            );
        }

        Ok(())
    }
}
