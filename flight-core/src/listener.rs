//! Listener service: one server socket per node answering one line per connection.

use std::net::Ipv4Addr;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::state::Session;
use crate::wire::{self, ProtocolError};

/// Pause after a failed accept (e.g. out of file descriptors) before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

struct Running {
    port: u16,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Owns the listening socket while running. Stopped until [`ListenerService::start`].
pub struct ListenerService {
    session: Session,
    read_timeout: Option<Duration>,
    running: Option<Running>,
}

impl ListenerService {
    pub fn new(session: Session, read_timeout: Option<Duration>) -> Self {
        Self {
            session,
            read_timeout,
            running: None,
        }
    }

    /// Bind on all interfaces and start accepting. Port 0 asks the OS for a free port.
    /// Returns the bound port.
    pub async fn start(&mut self, port: u16) -> Result<u16, BindError> {
        if let Some(running) = &self.running {
            return Err(BindError::AlreadyRunning { port: running.port });
        }
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map_err(|source| BindError::Bind { port, source })?;
        let bound = listener
            .local_addr()
            .map_err(|source| BindError::Bind { port, source })?
            .port();

        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(accept_loop(
            listener,
            self.session.clone(),
            self.read_timeout,
            shutdown_rx,
        ));
        tracing::info!(port = bound, "listener accepting");
        self.running = Some(Running {
            port: bound,
            shutdown,
            task,
        });
        Ok(bound)
    }

    /// Close the socket and wait for the accept loop to exit. No-op when stopped.
    /// Handlers already running finish their exchange.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        let _ = running.shutdown.send(());
        if let Err(e) = running.task.await {
            tracing::warn!(error = %e, "accept loop ended abnormally");
        }
        tracing::info!(port = running.port, "listener stopped");
    }

    pub fn port(&self) -> Option<u16> {
        self.running.as_ref().map(|r| r.port)
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }
}

async fn accept_loop(
    listener: TcpListener,
    session: Session,
    read_timeout: Option<Duration>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            // Also fires if the service is dropped without stop().
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let session = session.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, session, read_timeout).await {
                            tracing::warn!(%peer, error = %e, "request handler failed");
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }
    // Dropping the listener here closes the socket.
}

/// Read one request line, publish it, answer with the acknowledgment, close.
async fn handle_connection(
    stream: TcpStream,
    session: Session,
    read_timeout: Option<Duration>,
) -> Result<(), ProtocolError> {
    let peer = stream.peer_addr().ok();
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let message = wire::read_line_within(&mut reader, read_timeout)
        .await?
        .ok_or(ProtocolError::MissingLine)?;
    tracing::debug!(peer = ?peer, len = message.len(), "request received");

    session.update(|s| s.last_received_message = message);
    let service_name = session.read(|s| s.identity.derived_service_name().to_string());

    wire::write_line(&mut writer, &wire::acknowledgment(&service_name)).await?;
    writer.shutdown().await?;
    Ok(())
}

/// Listener could not be started.
#[derive(Debug, thiserror::Error)]
pub enum BindError {
    #[error("cannot bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("listener already running on port {port}")]
    AlreadyRunning { port: u16 },
}
