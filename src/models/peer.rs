use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;

/// Network endpoint of a peer as it appears in seeder/leecher lists
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddr {
    #[serde(rename = "IP_ADDRESS")]
    pub ip: String,
    #[serde(rename = "PORT")]
    pub port: u16,
}

impl PeerAddr {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self { ip: ip.into(), port }
    }

    /// `ip:port` form accepted by `TcpStream::connect`
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Identity a peer presents to the tracker
///
/// The id is a hash of ip and port, so re-registering from the same
/// endpoint always yields the same identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerIdentity {
    #[serde(rename = "PEER_ID")]
    pub id: String,
    #[serde(rename = "IP_ADDRESS")]
    pub ip: String,
    #[serde(rename = "PORT")]
    pub port: u16,
}

impl PeerIdentity {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        let ip = ip.into();
        Self {
            id: generate_id(&ip, port),
            ip,
            port,
        }
    }

    pub fn addr(&self) -> PeerAddr {
        PeerAddr::new(self.ip.clone(), self.port)
    }
}

/// Hex SHA-1 of the concatenated ip and port
pub fn generate_id(ip: &str, port: u16) -> String {
    let mut hasher = Sha1::new();
    hasher.update(ip.as_bytes());
    hasher.update(port.to_string().as_bytes());
    hex::encode(hasher.finalize())
}
