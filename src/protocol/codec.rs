use crate::core::config::NetworkConfig;
use crate::core::error::{ProtocolError, TransportError};
use crate::protocol::codes::{OpCode, READ_SIZE};
use crate::protocol::message::{PeerRequest, PeerResponse, Request, Response, TrackerRequest, TrackerResponse};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// Deadlines and read budget applied to every socket operation
#[derive(Debug, Clone, Copy)]
pub struct WireSettings {
    pub io_timeout: Duration,
    pub connect_timeout: Duration,
    pub read_attempts: u32,
}

impl Default for WireSettings {
    fn default() -> Self {
        Self::from(&NetworkConfig::default())
    }
}

impl From<&NetworkConfig> for WireSettings {
    fn from(config: &NetworkConfig) -> Self {
        Self {
            io_timeout: Duration::from_millis(config.io_timeout_ms),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            read_attempts: config.read_attempts,
        }
    }
}

/// A message that travels as exactly one frame
pub trait WireMessage: Sized + Send + Sync {
    fn op(&self) -> OpCode;
    fn to_frame(&self) -> Result<Vec<u8>, ProtocolError>;
    fn from_frame(frame: &[u8]) -> Result<Self, ProtocolError>;
}

impl WireMessage for TrackerRequest {
    fn op(&self) -> OpCode {
        TrackerRequest::op(self)
    }

    fn to_frame(&self) -> Result<Vec<u8>, ProtocolError> {
        self.encode()
    }

    fn from_frame(frame: &[u8]) -> Result<Self, ProtocolError> {
        match Request::decode(frame)? {
            Request::Tracker(request) => Ok(request),
            Request::Peer(request) => Err(ProtocolError::UnexpectedOperation(request.op())),
        }
    }
}

impl WireMessage for TrackerResponse {
    fn op(&self) -> OpCode {
        TrackerResponse::op(self)
    }

    fn to_frame(&self) -> Result<Vec<u8>, ProtocolError> {
        self.encode()
    }

    fn from_frame(frame: &[u8]) -> Result<Self, ProtocolError> {
        match Response::decode(frame)? {
            Response::Tracker(response) => Ok(response),
            Response::Peer(response) => Err(ProtocolError::UnexpectedOperation(response.op())),
        }
    }
}

impl WireMessage for PeerRequest {
    fn op(&self) -> OpCode {
        PeerRequest::op(self)
    }

    fn to_frame(&self) -> Result<Vec<u8>, ProtocolError> {
        self.encode()
    }

    fn from_frame(frame: &[u8]) -> Result<Self, ProtocolError> {
        match Request::decode(frame)? {
            Request::Peer(request) => Ok(request),
            Request::Tracker(request) => Err(ProtocolError::UnexpectedOperation(request.op())),
        }
    }
}

impl WireMessage for PeerResponse {
    fn op(&self) -> OpCode {
        PeerResponse::op(self)
    }

    fn to_frame(&self) -> Result<Vec<u8>, ProtocolError> {
        self.encode()
    }

    fn from_frame(frame: &[u8]) -> Result<Self, ProtocolError> {
        match Response::decode(frame)? {
            Response::Peer(response) => Ok(response),
            Response::Tracker(response) => Err(ProtocolError::UnexpectedOperation(response.op())),
        }
    }
}

/// Serialize a message and check it fits in one frame
pub fn encode_frame<M: WireMessage>(message: &M) -> Result<Vec<u8>, ProtocolError> {
    let frame = message.to_frame()?;
    if frame.len() > READ_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: frame.len(),
            limit: READ_SIZE,
        });
    }
    Ok(frame)
}

/// The frame is valid so far and more bytes may complete it
fn is_partial(err: &ProtocolError) -> bool {
    matches!(err, ProtocolError::Malformed(inner) if inner.is_eof())
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

/// Read one message with bounded reads
///
/// Bytes accumulate until the frame decodes, the sender closes, the
/// read budget runs out, or `READ_SIZE` is reached. Each read is under
/// the I/O deadline.
pub async fn read_message<M, R>(reader: &mut R, settings: &WireSettings) -> Result<M, TransportError>
where
    M: WireMessage,
    R: AsyncRead + Unpin,
{
    let mut frame: Vec<u8> = Vec::with_capacity(1024);
    let mut buf = vec![0u8; READ_SIZE];
    let mut attempts = 0u32;

    loop {
        let room = READ_SIZE - frame.len();
        let n = timeout(settings.io_timeout, reader.read(&mut buf[..room]))
            .await
            .map_err(|_| TransportError::Timeout(millis(settings.io_timeout)))??;
        attempts += 1;

        if n == 0 {
            if frame.is_empty() {
                return Err(TransportError::Incomplete { received: 0 });
            }
            return M::from_frame(&frame).map_err(|e| {
                if is_partial(&e) {
                    TransportError::Incomplete { received: frame.len() }
                } else {
                    e.into()
                }
            });
        }

        frame.extend_from_slice(&buf[..n]);

        match M::from_frame(&frame) {
            Ok(message) => {
                debug!(op = %message.op(), bytes = frame.len(), "Received message");
                return Ok(message);
            }
            Err(e) if is_partial(&e) => {
                if frame.len() >= READ_SIZE {
                    return Err(ProtocolError::FrameTooLarge {
                        size: frame.len(),
                        limit: READ_SIZE,
                    }
                    .into());
                }
                if attempts >= settings.read_attempts {
                    return Err(TransportError::Incomplete { received: frame.len() });
                }
                debug!(
                    received = frame.len(),
                    attempt = attempts,
                    "Partial frame, reading again"
                );
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Write one message as a single frame under the I/O deadline
pub async fn write_message<M, W>(writer: &mut W, message: &M, settings: &WireSettings) -> Result<(), TransportError>
where
    M: WireMessage,
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(message)?;
    let write = async {
        writer.write_all(&frame).await?;
        writer.flush().await
    };
    timeout(settings.io_timeout, write)
        .await
        .map_err(|_| TransportError::Timeout(millis(settings.io_timeout)))??;
    debug!(op = %message.op(), bytes = frame.len(), "Sent message");
    Ok(())
}

/// One request, one response, then close
pub async fn exchange<Req, Resp>(addr: &str, request: &Req, settings: &WireSettings) -> Result<Resp, TransportError>
where
    Req: WireMessage,
    Resp: WireMessage,
{
    let mut stream = timeout(settings.connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| TransportError::Timeout(millis(settings.connect_timeout)))?
        .map_err(|source| TransportError::Connect {
            addr: addr.to_string(),
            source,
        })?;

    write_message(&mut stream, request, settings).await?;
    let response = read_message(&mut stream, settings).await?;
    // best effort, the server closes its side after replying
    let _ = stream.shutdown().await;
    Ok(response)
}
