//! Inbound TCP server.
//!
//! Accepts peer connections on the configured bind address and runs one task
//! per connection: a read loop that grows a buffer, drains complete frames
//! through the [`FrameDecoder`], and hands each envelope to the dispatcher.
//! A paired writer task flushes session replies, so handlers never block on
//! the remote socket.
//!
//! Decode errors are protocol violations: the connection is closed and the
//! sender's liveness is not refreshed for the offending frame.

use crate::proto::dispatcher::{Dispatcher, Session};
use crate::proto::framing::{DecodeOutcome, FrameDecoder};
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};

/// Inbound server configuration.
#[derive(Debug, Clone)]
pub struct InboundServerConfig {
    /// Bind host.
    pub host: String,

    /// Bind port; 0 lets the OS pick (tests).
    pub port: u16,

    /// Maximum accepted frame size.
    pub max_frame_size: usize,

    /// TCP keepalive for accepted sockets.
    pub keepalive: Option<Duration>,

    /// Disable Nagle's algorithm on accepted sockets.
    pub nodelay: bool,
}

impl Default for InboundServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            max_frame_size: 1024 * 1024,
            keepalive: Some(Duration::from_secs(60)),
            nodelay: true,
        }
    }
}

/// Inbound connection counters.
#[derive(Debug, Default)]
pub struct ServerMetrics {
    /// Connections accepted over the server's lifetime.
    pub connections_accepted: AtomicU64,

    /// Frames decoded and dispatched.
    pub frames_dispatched: AtomicU64,

    /// Connections closed due to a protocol violation.
    pub protocol_errors: AtomicU64,
}

/// Inbound TCP server.
pub struct InboundServer {
    config: InboundServerConfig,
    dispatcher: Arc<Dispatcher>,
    shutdown_rx: watch::Receiver<bool>,
    metrics: Arc<ServerMetrics>,
}

impl InboundServer {
    /// Create a server feeding the given dispatcher.
    pub fn new(
        config: InboundServerConfig,
        dispatcher: Arc<Dispatcher>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            dispatcher,
            shutdown_rx,
            metrics: Arc::new(ServerMetrics::default()),
        }
    }

    /// Shared counters.
    pub fn metrics(&self) -> Arc<ServerMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Bind the listening socket; returns it so the caller can learn the
    /// resolved address before the accept loop starts.
    pub async fn bind(&self) -> std::io::Result<TcpListener> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        tracing::info!(local_addr = %listener.local_addr()?, "peer listener bound");
        Ok(listener)
    }

    /// Accept loop; exits when the shutdown signal fires.
    pub async fn run(self, listener: TcpListener) {
        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            let accepted = tokio::select! {
                _ = shutdown_rx.changed() => break,
                accepted = listener.accept() => accepted,
            };
            if *shutdown_rx.borrow() {
                break;
            }

            match accepted {
                Ok((stream, remote_addr)) => {
                    self.metrics
                        .connections_accepted
                        .fetch_add(1, Ordering::Relaxed);
                    super::apply_socket_options(
                        &stream,
                        self.config.nodelay,
                        self.config.keepalive,
                    );

                    let conn = ConnectionTask {
                        remote_addr,
                        dispatcher: Arc::clone(&self.dispatcher),
                        max_frame_size: self.config.max_frame_size,
                        shutdown_rx: self.shutdown_rx.clone(),
                        metrics: Arc::clone(&self.metrics),
                    };
                    tokio::spawn(conn.run(stream));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    // Brief pause keeps a hot error (EMFILE and friends)
                    // from spinning the accept loop.
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }

        tracing::debug!("accept loop exiting");
    }
}

struct ConnectionTask {
    remote_addr: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    max_frame_size: usize,
    shutdown_rx: watch::Receiver<bool>,
    metrics: Arc<ServerMetrics>,
}

impl ConnectionTask {
    async fn run(mut self, stream: TcpStream) {
        tracing::debug!(remote = %self.remote_addr, "peer connected");

        let (mut read_half, mut write_half) = stream.into_split();

        // Writer side: session replies are queued here and flushed in order.
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<Bytes>();
        let writer = tokio::spawn(async move {
            while let Some(frame) = reply_rx.recv().await {
                if write_half.write_all(&frame).await.is_err() {
                    break;
                }
            }
        });

        let session = Session::new(self.remote_addr, self.max_frame_size, reply_tx);
        let decoder = FrameDecoder::new(self.max_frame_size);
        let mut buffer = BytesMut::with_capacity(8 * 1024);
        let mut chunk = [0u8; 16 * 1024];

        'conn: loop {
            let read = tokio::select! {
                _ = self.shutdown_rx.changed() => break 'conn,
                read = read_half.read(&mut chunk) => read,
            };

            let n = match read {
                Ok(0) => {
                    tracing::debug!(remote = %self.remote_addr, "peer closed connection");
                    break 'conn;
                }
                Ok(n) => n,
                Err(e) => {
                    tracing::debug!(remote = %self.remote_addr, error = %e, "read failed");
                    break 'conn;
                }
            };
            buffer.extend_from_slice(&chunk[..n]);

            loop {
                match decoder.decode(&mut buffer) {
                    DecodeOutcome::Complete(envelope) => {
                        self.metrics.frames_dispatched.fetch_add(1, Ordering::Relaxed);
                        self.dispatcher.dispatch(&envelope, &session);
                    }
                    DecodeOutcome::Incomplete => break,
                    DecodeOutcome::Invalid(detail) => {
                        self.metrics.protocol_errors.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(
                            remote = %self.remote_addr,
                            kind = "frame_decode",
                            detail = %detail,
                            "closing connection on protocol violation"
                        );
                        break 'conn;
                    }
                }
            }
        }

        // Dropping the session ends the writer's channel; the writer then
        // drains any queued replies before the socket halves are dropped.
        drop(session);
        let _ = writer.await;
        tracing::debug!(remote = %self.remote_addr, "session closed");
    }
}
