//! Outbound connection manager.
//!
//! One worker per known peer, keyed by node id. Each worker owns a FIFO
//! queue of serialised frames and a single persistent TCP connection to the
//! peer's advertised address, moving through a small state machine:
//!
//! ```text
//! Disconnected --backoff expired--> Connecting --ok--> Connected
//!      ^                               |                  |
//!      +----------- failure ----------+                  |
//!      +----------- send error / remote close -----------+
//! ```
//!
//! Reconnection backoff doubles from 500 ms to a 10 s cap and resets on a
//! successful connect. Enqueues never block: when a queue exceeds its bound
//! the oldest frames are dropped, which is safe under LWW because the next
//! publish cycle re-broadcasts the newest value per key.
//!
//! Outbound links are full protocol sessions, not write-only pipes: a peer
//! answers JOIN_REQUEST with PEER_LIST (and PING with PONG) on the same
//! connection, so each worker also decodes inbound frames and hands them to
//! the dispatcher once one is attached.

use crate::core::error::{HubError, HubResult};
use crate::proto::dispatcher::{Dispatcher, Session};
use crate::proto::framing::{encode_frame, DecodeOutcome, FrameDecoder};
use crate::proto::message::Envelope;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Notify};

/// Outbound client configuration.
#[derive(Debug, Clone)]
pub struct OutboundConfig {
    /// TCP connect timeout.
    pub connect_timeout: Duration,

    /// Per-peer queue bound; oldest frames drop beyond it.
    pub queue_bound: usize,

    /// Maximum frame size accepted for enqueue.
    pub max_frame_size: usize,

    /// First reconnect delay.
    pub backoff_initial: Duration,

    /// Reconnect delay cap.
    pub backoff_max: Duration,

    /// TCP keepalive probe interval; detects silent remote failures.
    pub keepalive: Option<Duration>,

    /// Disable Nagle's algorithm.
    pub nodelay: bool,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            queue_bound: 1024,
            max_frame_size: 1024 * 1024,
            backoff_initial: Duration::from_millis(500),
            backoff_max: Duration::from_secs(10),
            keepalive: Some(Duration::from_secs(60)),
            nodelay: true,
        }
    }
}

/// Exponential reconnect backoff.
///
/// Consecutive failures yield 0.5, 1, 2, 4, 8, 10, 10, ... seconds under the
/// defaults; a successful connect resets the sequence.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    next: Duration,
}

impl Backoff {
    /// Create a backoff sequence starting at `initial`, capped at `max`.
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            next: initial,
        }
    }

    /// The delay to sleep before the next attempt; advances the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (delay * 2).min(self.max);
        delay
    }

    /// Reset after a successful connect.
    pub fn reset(&mut self) {
        self.next = self.initial;
    }
}

/// Bounded FIFO of serialised frames with drop-oldest overflow.
struct SendQueue {
    frames: Mutex<VecDeque<Bytes>>,
    bound: usize,
    dropped: AtomicU64,
    notify: Notify,
}

impl SendQueue {
    fn new(bound: usize) -> Self {
        Self {
            frames: Mutex::new(VecDeque::new()),
            bound,
            dropped: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    /// Enqueue a frame, dropping from the head on overflow.
    ///
    /// Returns the number of frames dropped to make room.
    fn push(&self, frame: Bytes) -> u64 {
        let mut dropped = 0;
        {
            let mut frames = self.frames.lock();
            while frames.len() >= self.bound {
                frames.pop_front();
                dropped += 1;
            }
            frames.push_back(frame);
        }
        if dropped > 0 {
            self.dropped.fetch_add(dropped, Ordering::Relaxed);
        }
        self.notify.notify_one();
        dropped
    }

    fn pop(&self) -> Option<Bytes> {
        self.frames.lock().pop_front()
    }

    fn len(&self) -> usize {
        self.frames.lock().len()
    }

    fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    async fn wait(&self) {
        self.notify.notified().await;
    }
}

struct PeerWorker {
    host: String,
    port: u16,
    queue: Arc<SendQueue>,
    stop_tx: watch::Sender<bool>,
}

/// Outbound connection manager: one worker and queue per peer.
pub struct OutboundClient {
    config: OutboundConfig,
    workers: Mutex<HashMap<String, PeerWorker>>,
    dispatcher: Arc<Mutex<Option<Arc<Dispatcher>>>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl OutboundClient {
    /// Create a client tied to the process shutdown signal.
    pub fn new(config: OutboundConfig, shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            config,
            workers: Mutex::new(HashMap::new()),
            dispatcher: Arc::new(Mutex::new(None)),
            shutdown_rx,
        }
    }

    /// Attach the dispatcher that inbound frames on outbound links feed.
    ///
    /// Wired after construction because the dispatcher's handlers themselves
    /// hold this client. Frames arriving before attachment are discarded.
    pub fn set_dispatcher(&self, dispatcher: Arc<Dispatcher>) {
        *self.dispatcher.lock() = Some(dispatcher);
    }

    /// Start a worker for `worker_id` unless one already exists.
    ///
    /// Returns true when a new worker was spawned. Must be called from
    /// within the tokio runtime.
    pub fn ensure_worker(&self, worker_id: &str, host: &str, port: u16) -> bool {
        let mut workers = self.workers.lock();
        if workers.contains_key(worker_id) {
            return false;
        }

        let queue = Arc::new(SendQueue::new(self.config.queue_bound));
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = WorkerTask {
            worker_id: worker_id.to_string(),
            host: host.to_string(),
            port,
            queue: Arc::clone(&queue),
            config: self.config.clone(),
            dispatcher: Arc::clone(&self.dispatcher),
            shutdown_rx: self.shutdown_rx.clone(),
            stop_rx,
        };
        tokio::spawn(task.run());

        workers.insert(
            worker_id.to_string(),
            PeerWorker {
                host: host.to_string(),
                port,
                queue,
                stop_tx,
            },
        );
        tracing::debug!(peer = worker_id, %host, port, "outbound worker started");
        true
    }

    /// Whether a worker exists for `worker_id`.
    pub fn has_worker(&self, worker_id: &str) -> bool {
        self.workers.lock().contains_key(worker_id)
    }

    /// Non-blocking enqueue of an envelope to one peer.
    pub fn send(&self, worker_id: &str, envelope: &Envelope) -> HubResult<()> {
        let frame = encode_frame(envelope, self.config.max_frame_size)?;
        let (queue, dropped) = {
            let workers = self.workers.lock();
            let worker = workers.get(worker_id).ok_or_else(|| HubError::SendFailed {
                peer_id: worker_id.to_string(),
                detail: "no outbound worker for peer".to_string(),
            })?;
            (Arc::clone(&worker.queue), worker.queue.push(frame))
        };
        if dropped > 0 {
            tracing::warn!(
                peer = worker_id,
                dropped,
                queued = queue.len(),
                "send queue overflow, oldest frames dropped"
            );
        }
        Ok(())
    }

    /// Enqueue an envelope to every known worker. Returns the fan-out count.
    pub fn broadcast(&self, envelope: &Envelope) -> usize {
        let frame = match encode_frame(envelope, self.config.max_frame_size) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "broadcast frame rejected");
                return 0;
            }
        };

        let workers = self.workers.lock();
        for (worker_id, worker) in workers.iter() {
            let dropped = worker.queue.push(frame.clone());
            if dropped > 0 {
                tracing::warn!(peer = %worker_id, dropped, "send queue overflow during broadcast");
            }
        }
        workers.len()
    }

    /// Total frames dropped to queue overflow across all peers.
    pub fn dropped_total(&self) -> u64 {
        self.workers
            .lock()
            .values()
            .map(|w| w.queue.dropped())
            .sum()
    }

    /// Number of active workers.
    pub fn worker_count(&self) -> usize {
        self.workers.lock().len()
    }

    /// Advertised address of a worker, for wiring checks.
    pub fn worker_addr(&self, worker_id: &str) -> Option<(String, u16)> {
        self.workers
            .lock()
            .get(worker_id)
            .map(|w| (w.host.clone(), w.port))
    }

    /// Stop every worker. Idempotent; queued frames are dropped.
    pub fn stop(&self) {
        let workers = std::mem::take(&mut *self.workers.lock());
        for (worker_id, worker) in workers {
            let _ = worker.stop_tx.send(true);
            tracing::debug!(peer = %worker_id, "outbound worker stopped");
        }
    }
}

struct WorkerTask {
    worker_id: String,
    host: String,
    port: u16,
    queue: Arc<SendQueue>,
    config: OutboundConfig,
    dispatcher: Arc<Mutex<Option<Arc<Dispatcher>>>>,
    shutdown_rx: watch::Receiver<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl WorkerTask {
    fn should_stop(&self) -> bool {
        *self.shutdown_rx.borrow() || *self.stop_rx.borrow()
    }

    async fn run(mut self) {
        let mut backoff = Backoff::new(self.config.backoff_initial, self.config.backoff_max);

        while !self.should_stop() {
            // Connecting
            let stream = match self.connect().await {
                Some(Ok(stream)) => stream,
                Some(Err(e)) => {
                    let delay = backoff.next_delay();
                    tracing::debug!(
                        peer = %self.worker_id,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "connect failed"
                    );
                    if !self.sleep(delay).await {
                        break;
                    }
                    continue;
                }
                // Stop requested mid-connect.
                None => break,
            };

            tracing::debug!(peer = %self.worker_id, host = %self.host, port = self.port, "connected");
            backoff.reset();

            // Connected: drain the queue until the link breaks.
            if !self.serve(stream).await {
                break;
            }
            tracing::debug!(peer = %self.worker_id, "connection lost");

            // Back to Disconnected: reset-then-grow, so a flapping remote
            // still costs the initial delay before each reconnect.
            backoff.reset();
            if !self.sleep(backoff.next_delay()).await {
                break;
            }
        }

        tracing::debug!(peer = %self.worker_id, "outbound worker exiting");
    }

    async fn connect(&mut self) -> Option<HubResult<TcpStream>> {
        let addr = format!("{}:{}", self.host, self.port);
        let attempt = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(&addr));

        let result = tokio::select! {
            _ = self.shutdown_rx.changed() => return None,
            _ = self.stop_rx.changed() => return None,
            result = attempt => result,
        };

        let to_err = |detail: String| HubError::ConnectFailed {
            addr: addr.clone(),
            detail,
        };
        match result {
            Ok(Ok(stream)) => {
                super::apply_socket_options(&stream, self.config.nodelay, self.config.keepalive);
                Some(Ok(stream))
            }
            Ok(Err(e)) => Some(Err(to_err(e.to_string()))),
            Err(_) => Some(Err(to_err("connect timed out".to_string()))),
        }
    }

    /// Returns false when a stop was requested, true to reconnect.
    async fn serve(&mut self, stream: TcpStream) -> bool {
        let remote_addr = match stream.peer_addr() {
            Ok(addr) => addr,
            Err(_) => return true,
        };
        let (mut read_half, mut write_half) = stream.into_split();

        // The peer answers on this connection (PEER_LIST to our JOIN, PONG
        // to our PING), so the link doubles as a session: decoded frames go
        // to the dispatcher, and handler replies are written back here.
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<Bytes>();
        let session = Session::new(remote_addr, self.config.max_frame_size, reply_tx);
        let decoder = FrameDecoder::new(self.config.max_frame_size);
        let mut buffer = BytesMut::with_capacity(8 * 1024);
        let mut chunk = [0u8; 16 * 1024];

        loop {
            if self.should_stop() {
                return false;
            }

            if let Some(frame) = self.queue.pop() {
                if let Err(e) = write_half.write_all(&frame).await {
                    tracing::debug!(peer = %self.worker_id, error = %e, "send failed");
                    return true;
                }
                continue;
            }

            tokio::select! {
                _ = self.shutdown_rx.changed() => return false,
                _ = self.stop_rx.changed() => return false,
                _ = self.queue.wait() => {}
                reply = reply_rx.recv() => {
                    if let Some(frame) = reply {
                        if write_half.write_all(&frame).await.is_err() {
                            return true;
                        }
                    }
                }
                read = read_half.read(&mut chunk) => {
                    let n = match read {
                        Ok(0) | Err(_) => return true,
                        Ok(n) => n,
                    };
                    buffer.extend_from_slice(&chunk[..n]);
                    if !self.drain_frames(&decoder, &mut buffer, &session) {
                        return true;
                    }
                }
            }
        }
    }

    /// Decode and dispatch buffered frames; false on a protocol violation.
    fn drain_frames(
        &self,
        decoder: &FrameDecoder,
        buffer: &mut BytesMut,
        session: &Session,
    ) -> bool {
        loop {
            match decoder.decode(buffer) {
                DecodeOutcome::Complete(envelope) => {
                    let dispatcher = self.dispatcher.lock().clone();
                    match dispatcher {
                        Some(d) => d.dispatch(&envelope, session),
                        None => tracing::debug!(
                            peer = %self.worker_id,
                            msg_type = %envelope.msg_type,
                            "frame discarded: no dispatcher attached"
                        ),
                    }
                }
                DecodeOutcome::Incomplete => return true,
                DecodeOutcome::Invalid(detail) => {
                    tracing::warn!(
                        peer = %self.worker_id,
                        kind = "frame_decode",
                        detail = %detail,
                        "closing outbound link on protocol violation"
                    );
                    return false;
                }
            }
        }
    }

    /// Interruptible sleep; returns false when stopped.
    async fn sleep(&mut self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.shutdown_rx.changed() => false,
            _ = self.stop_rx.changed() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}
