use crate::core::error::TransportError;
use crate::protocol::codec::{read_message, write_message, WireMessage, WireSettings};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, instrument, warn};

/// Request handler bound to one listener
///
/// Every connection carries exactly one request and one response.
/// Handlers never block on I/O.
pub trait Service: Send + Sync + 'static {
    type Request: WireMessage + 'static;
    type Response: WireMessage + 'static;

    fn call(&self, request: Self::Request, remote: SocketAddr) -> Self::Response;

    /// Called when a connection closes without a readable request
    fn on_dropped(&self, _remote: SocketAddr, _error: &TransportError) {}
}

/// Running accept loop
///
/// Dropping the handle also stops the server.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, abort in-flight connections and wait for the loop
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Server task ended abnormally");
        }
    }
}

/// Serve `listener` on a background task
///
/// At most `max_connections` connections are accepted at once; extra
/// clients stay in the listen backlog until a slot frees up.
pub fn spawn_server<S: Service>(
    listener: TcpListener,
    service: Arc<S>,
    max_connections: usize,
    settings: WireSettings,
) -> std::io::Result<ServerHandle> {
    let local_addr = listener.local_addr()?;
    let (shutdown, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(accept_loop(listener, service, max_connections, settings, shutdown_rx));

    Ok(ServerHandle {
        local_addr,
        shutdown,
        task,
    })
}

#[instrument(skip_all, fields(addr = ?listener.local_addr().ok()))]
async fn accept_loop<S: Service>(
    listener: TcpListener,
    service: Arc<S>,
    max_connections: usize,
    settings: WireSettings,
    mut shutdown: watch::Receiver<bool>,
) {
    let limiter = Arc::new(Semaphore::new(max_connections));
    let mut connections = JoinSet::new();

    info!(max_connections, "Listening");

    loop {
        // reap finished connection tasks
        while connections.try_join_next().is_some() {}

        // hold a slot before accepting so excess clients wait in the backlog
        let permit = tokio::select! {
            _ = shutdown.changed() => break,
            permit = Arc::clone(&limiter).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => {
                let (stream, remote) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                        continue;
                    }
                };

                let service = Arc::clone(&service);
                connections.spawn(async move {
                    let _permit = permit;
                    serve_connection(stream, remote, service.as_ref(), &settings).await;
                });
            }
        }
    }

    let in_flight = connections.len();
    connections.shutdown().await;
    info!(in_flight, "Listener stopped");
}

#[instrument(skip_all, fields(remote = %remote))]
async fn serve_connection<S: Service>(
    mut stream: TcpStream,
    remote: SocketAddr,
    service: &S,
    settings: &WireSettings,
) {
    let request: S::Request = match read_message(&mut stream, settings).await {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "Dropping connection without a readable request");
            service.on_dropped(remote, &e);
            return;
        }
    };

    let op = request.op();
    let response = service.call(request, remote);
    debug!(%op, "Handled request");

    if let Err(e) = write_message(&mut stream, &response, settings).await {
        warn!(%op, error = %e, "Failed to send response");
    }
    let _ = stream.shutdown().await;
}
