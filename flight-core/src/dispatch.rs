//! Dispatcher: fan one message out to every tracked peer and collect their reply lines.

use std::net::SocketAddr;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::directory::PeerRecord;
use crate::state::Session;
use crate::wire::{self, ProtocolError, NO_RESPONSE};

/// Outcome counts for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
}

impl BatchReport {
    fn record(&mut self, delivered: bool) {
        self.attempted += 1;
        if delivered {
            self.delivered += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// Sends batches on behalf of one session. Cheap to clone into a task.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    session: Session,
    connect_timeout: Duration,
    read_timeout: Option<Duration>,
    concurrency: usize,
}

impl Dispatcher {
    pub fn new(
        session: Session,
        connect_timeout: Duration,
        read_timeout: Option<Duration>,
        concurrency: usize,
    ) -> Self {
        Self {
            session,
            connect_timeout,
            read_timeout,
            concurrency: concurrency.max(1),
        }
    }

    /// Send `message` to every peer in `peers` and record each reply by peer name.
    ///
    /// A message that cannot be framed as one line is rejected before any peer is contacted.
    /// A failing peer is logged and skipped; the batch always runs to the end. With concurrency 1
    /// peers are visited one after another in snapshot order. Afterwards the pending message is
    /// cleared and no peer is left marked connected. An empty message sends nothing.
    pub async fn broadcast_message(&self, message: &str, peers: Vec<PeerRecord>) -> BatchReport {
        if message.is_empty() {
            tracing::debug!("empty message, nothing to send");
            return BatchReport::default();
        }
        if let Err(e) = wire::encode_line(message) {
            tracing::warn!(error = %e, "message cannot be framed, nothing sent");
            return BatchReport::default();
        }

        let mut report = BatchReport::default();
        if self.concurrency == 1 {
            for peer in &peers {
                report.record(self.exchange(peer, message).await);
            }
        } else {
            let mut results = stream::iter(peers)
                .map(|peer| {
                    let this = self.clone();
                    let message = message.to_string();
                    async move { this.exchange(&peer, &message).await }
                })
                .buffer_unordered(self.concurrency);
            while let Some(delivered) = results.next().await {
                report.record(delivered);
            }
        }

        self.session.update(|s| {
            s.pending_outbound_message.clear();
            s.peers.reset_connected();
        });
        tracing::info!(
            attempted = report.attempted,
            delivered = report.delivered,
            failed = report.failed,
            "batch complete"
        );
        report
    }

    /// One peer: connect, send, read the reply, close. Returns whether a reply was recorded.
    async fn exchange(&self, peer: &PeerRecord, message: &str) -> bool {
        let addr = SocketAddr::new(peer.address, peer.port);
        let stream = match self.connect(addr).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(peer = %peer.name, %addr, error = %e, "dispatch failed");
                return false;
            }
        };
        self.session.modify(|s| s.peers.mark_connected(&peer.name, true));

        let result = self.converse(stream, message).await;

        self.session.update(|s| {
            if let Ok(reply) = &result {
                s.peers.record_reply(&peer.name, reply);
            }
            s.peers.mark_connected(&peer.name, false);
        });
        match result {
            Ok(reply) => {
                tracing::debug!(peer = %peer.name, %addr, reply = %reply, "reply recorded");
                true
            }
            Err(e) => {
                tracing::warn!(peer = %peer.name, %addr, error = %e, "dispatch failed");
                false
            }
        }
    }

    async fn connect(&self, addr: SocketAddr) -> Result<TcpStream, DispatchError> {
        match tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(source)) => Err(DispatchError::Connect { addr, source }),
            Err(_) => Err(DispatchError::ConnectTimeout { addr }),
        }
    }

    /// The socket is dropped, and so closed, on return.
    async fn converse(&self, stream: TcpStream, message: &str) -> Result<String, DispatchError> {
        let (reader, mut writer) = stream.into_split();
        wire::write_line(&mut writer, message).await?;
        let mut reader = BufReader::new(reader);
        let reply = wire::read_line_within(&mut reader, self.read_timeout).await?;
        let _ = writer.shutdown().await;
        Ok(reply.unwrap_or_else(|| NO_RESPONSE.to_string()))
    }
}

/// Per-peer failure. Logged by the dispatcher, never returned to callers.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("connect to {addr} timed out")]
    ConnectTimeout { addr: SocketAddr },
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
