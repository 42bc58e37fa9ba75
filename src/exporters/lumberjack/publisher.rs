// SPDX-License-Identifier: Apache-2.0

use std::error::Error;
use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;
use rand::Rng;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::bounded_channel::{BoundedReceiver, BoundedSender};
use crate::exporters::lumberjack::codec::{self, ACK_LEN};
use crate::exporters::lumberjack::config::{PublisherConfig, ServerAddr};
use crate::exporters::lumberjack::connector::Connector;
use crate::exporters::lumberjack::errors::PublisherError;
use crate::receivers::file::FileEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Handshaking,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Handshaking => "handshaking",
            ConnectionState::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// Sends spooled batches to one collector at a time and passes each batch
/// to the registrar once the collector has acknowledged it.
///
/// A batch is retried, reconnecting as needed, until it is acknowledged.
/// The next batch is not read before that.
pub struct Publisher<C: Connector, R: Rng> {
    config: PublisherConfig,
    servers: Vec<ServerAddr>,
    connector: C,
    rng: R,
    batches_rx: BoundedReceiver<Vec<FileEvent>>,
    acked_tx: BoundedSender<Vec<FileEvent>>,
    conn: Option<C::Stream>,
    state: ConnectionState,
    next_seq: u32,
}

impl<C, R> Publisher<C, R>
where
    C: Connector,
    R: Rng + Send,
{
    pub fn new(
        config: PublisherConfig,
        connector: C,
        rng: R,
        batches_rx: BoundedReceiver<Vec<FileEvent>>,
        acked_tx: BoundedSender<Vec<FileEvent>>,
    ) -> Result<Self, PublisherError> {
        let servers = config.server_addrs()?;

        Ok(Self {
            config,
            servers,
            connector,
            rng,
            batches_rx,
            acked_tx,
            conn: None,
            state: ConnectionState::Disconnected,
            next_seq: 1,
        })
    }

    pub async fn run(mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        info!(
            servers = ?self.config.servers,
            timeout = ?self.config.timeout,
            "Publisher started."
        );

        while let Some(batch) = self.batches_rx.next().await {
            if batch.is_empty() {
                continue;
            }
            self.publish(&batch).await?;
            self.acked_tx.send(batch).await?;
        }

        debug!("Batch queue closed, stopping publisher.");
        Ok(())
    }

    /// Deliver one batch, returning once it is acknowledged. Only fails if
    /// the batch cannot be encoded.
    pub async fn publish(&mut self, batch: &[FileEvent]) -> Result<(), PublisherError> {
        let first_seq = self.next_seq;
        let payload = codec::encode_batch(batch, &self.config.hostname, &mut self.next_seq)?;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let mut stream = match self.conn.take() {
                Some(s) => s,
                None => self.connect().await,
            };

            match send(&mut stream, &payload, self.config.timeout).await {
                Ok(()) => {
                    debug!(
                        events = batch.len(),
                        first_seq,
                        payload_size = payload.len(),
                        attempt,
                        "Batch acknowledged."
                    );
                    self.conn = Some(stream);
                    return Ok(());
                }
                Err(e) => {
                    warn!(error = %e, events = batch.len(), attempt, "Failed to publish batch, reconnecting.");
                    drop(stream);
                    self.state = ConnectionState::Disconnected;
                    tokio::time::sleep(self.config.reconnect_backoff).await;
                }
            }
        }
    }

    // Retries until a connection is established.
    async fn connect(&mut self) -> C::Stream {
        loop {
            match self.try_connect().await {
                Ok(stream) => return stream,
                Err(e) => {
                    warn!(error = %e, state = %self.state, "Failed to connect, will retry.");
                    self.state = ConnectionState::Disconnected;
                    tokio::time::sleep(self.config.reconnect_backoff).await;
                }
            }
        }
    }

    async fn try_connect(&mut self) -> Result<C::Stream, PublisherError> {
        let server = self.servers[self.rng.gen_range(0..self.servers.len())].clone();
        self.state = ConnectionState::Connecting;
        debug!(server = %server, state = %self.state, "Connecting to collector.");

        let addr = self.resolve(&server).await?;
        let transport = self.connector.open(addr, self.config.timeout).await?;

        self.state = ConnectionState::Handshaking;
        debug!(server = %server, address = %addr, state = %self.state, "Securing connection to collector.");
        let stream = self
            .connector
            .handshake(&server.host, transport, self.config.timeout)
            .await?;

        self.state = ConnectionState::Connected;
        info!(server = %server, address = %addr, "Connected to collector.");
        Ok(stream)
    }

    async fn resolve(&mut self, server: &ServerAddr) -> Result<SocketAddr, PublisherError> {
        let lookup = tokio::net::lookup_host((server.host.as_str(), server.port));
        let addrs: Vec<SocketAddr> = timeout(self.config.timeout, lookup)
            .await
            .map_err(|_| PublisherError::Timeout("name resolution"))?
            .map_err(|e| PublisherError::Resolve(format!("{}: {}", server, e)))?
            .collect();

        if addrs.is_empty() {
            return Err(PublisherError::Resolve(format!("{}: no addresses", server)));
        }
        Ok(addrs[self.rng.gen_range(0..addrs.len())])
    }
}

async fn send<S>(stream: &mut S, payload: &Bytes, deadline: Duration) -> Result<(), PublisherError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let exchange = async {
        stream.write_all(payload).await?;
        stream.flush().await?;

        let mut ack = [0u8; ACK_LEN];
        stream.read_exact(&mut ack).await?;
        Ok::<_, PublisherError>(())
    };

    timeout(deadline, exchange)
        .await
        .map_err(|_| PublisherError::Timeout("send and acknowledgement"))?
}
