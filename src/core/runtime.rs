//! Runtime orchestration.
//!
//! The runtime owns component lifecycle:
//! - Start order: state engine → dispatcher → inbound listener → membership
//!   bootstrap → sensors → replication publisher → HTTP API.
//! - Shutdown: a single watch signal fans out to every task; the listener
//!   stops accepting, connection read loops observe the signal or EOF,
//!   outbound workers finish their current attempt, the publisher skips its
//!   next tick, and producers stop sampling. Shutdown is idempotent.
//!
//! The listener is bound before handlers are wired so that the advertised
//! port is the resolved one even when the configuration asked for port 0
//! (ephemeral, used by tests).

use crate::api::http::{self, ApiState};
use crate::core::config::Config;
use crate::membership::handlers::SelfIdentity;
use crate::membership::PeerTable;
use crate::net::{InboundServer, InboundServerConfig, OutboundClient, OutboundConfig};
use crate::proto::handlers::build_dispatcher;
use crate::proto::message::Envelope;
use crate::sensors::SensorManager;
use crate::state::{ReplicationPublisher, StateEngine};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Grace period for tasks to observe shutdown and exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Sensorhub node runtime holding all component handles.
pub struct Runtime {
    config: Arc<Config>,
    engine: Arc<StateEngine>,
    peers: Arc<PeerTable>,
    outbound: Arc<OutboundClient>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    sensors: Option<SensorManager>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    listen_addr: Option<SocketAddr>,
    api_addr: Option<SocketAddr>,
    running: Arc<AtomicBool>,
}

impl Runtime {
    /// Create a runtime from a validated configuration.
    pub fn new(config: Config) -> Result<Self> {
        config.validate().context("invalid configuration")?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let engine = Arc::new(StateEngine::new(config.node_id.clone()));
        let peers = Arc::new(PeerTable::new(config.node_id.clone()));
        let outbound = Arc::new(OutboundClient::new(
            OutboundConfig {
                connect_timeout: config.connect_timeout,
                queue_bound: config.send_queue_bound,
                max_frame_size: config.max_frame_size,
                ..OutboundConfig::default()
            },
            shutdown_rx.clone(),
        ));

        Ok(Self {
            config: Arc::new(config),
            engine,
            peers,
            outbound,
            shutdown_tx,
            shutdown_rx,
            sensors: None,
            tasks: Vec::new(),
            listen_addr: None,
            api_addr: None,
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The loaded configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The state engine (test hook and API wiring).
    pub fn engine(&self) -> Arc<StateEngine> {
        Arc::clone(&self.engine)
    }

    /// The peer table (test hook).
    pub fn peers(&self) -> Arc<PeerTable> {
        Arc::clone(&self.peers)
    }

    /// The outbound client (test hook).
    pub fn outbound(&self) -> Arc<OutboundClient> {
        Arc::clone(&self.outbound)
    }

    /// Resolved peer listener address, once started.
    pub fn listen_addr(&self) -> Option<SocketAddr> {
        self.listen_addr
    }

    /// Resolved HTTP API address, once started.
    pub fn api_addr(&self) -> Option<SocketAddr> {
        self.api_addr
    }

    /// Whether the runtime started and has not stopped.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Start every component.
    pub async fn start(&mut self) -> Result<()> {
        tracing::info!(
            node_id = %self.config.node_id,
            host = %self.config.host,
            port = self.config.port,
            "starting sensorhub node"
        );

        // 1. Peer listener, bound first so handlers advertise the resolved
        // port even when the configuration asked for an ephemeral one.
        let listener =
            tokio::net::TcpListener::bind((self.config.host.as_str(), self.config.port))
                .await
                .context("failed to bind peer listener")?;
        let listen_addr = listener.local_addr().context("peer listener address")?;
        self.listen_addr = Some(listen_addr);

        let dispatcher = Arc::new(build_dispatcher(
            SelfIdentity {
                node_id: self.config.node_id.clone(),
                host: self.config.host.clone(),
                port: listen_addr.port(),
            },
            Arc::clone(&self.peers),
            Arc::clone(&self.engine),
            Arc::clone(&self.outbound),
        )?);
        // Outbound links double as sessions; replies arriving on them must
        // route through the same dispatcher.
        self.outbound.set_dispatcher(Arc::clone(&dispatcher));
        let server = InboundServer::new(
            InboundServerConfig {
                host: self.config.host.clone(),
                port: listen_addr.port(),
                max_frame_size: self.config.max_frame_size,
                ..InboundServerConfig::default()
            },
            dispatcher,
            self.shutdown_rx.clone(),
        );
        tracing::info!(local_addr = %listen_addr, "peer listener bound");
        self.tasks.push(("inbound-server", tokio::spawn(server.run(listener))));

        // 2. Membership bootstrap: dial each configured seed and ask to join.
        self.bootstrap(listen_addr.port());

        // 3. Sensor producers.
        let mut sensors = SensorManager::new(
            self.config.node_id.clone(),
            Arc::clone(&self.engine),
            self.shutdown_rx.clone(),
        );
        sensors.start(&self.config.sensors);
        tracing::info!(count = sensors.len(), "sensors started");
        self.sensors = Some(sensors);

        // 4. Replication publisher.
        let publisher = ReplicationPublisher::new(
            self.config.node_id.clone(),
            Arc::clone(&self.engine),
            Arc::clone(&self.outbound),
            self.config.publish_period,
            self.shutdown_rx.clone(),
        );
        self.tasks.push(("publisher", publisher.spawn()));

        // 5. HTTP read API.
        let api_listener = tokio::net::TcpListener::bind((
            self.config.host.as_str(),
            self.config.web_api_port,
        ))
        .await
        .context("failed to bind HTTP API")?;
        let api_addr = api_listener.local_addr().context("HTTP API address")?;
        self.api_addr = Some(api_addr);
        let api_state = ApiState::new(Arc::clone(&self.engine));
        let api_shutdown = self.shutdown_rx.clone();
        self.tasks.push((
            "http-api",
            tokio::spawn(async move {
                if let Err(e) = http::serve(api_listener, api_state, api_shutdown).await {
                    tracing::error!(error = %e, "HTTP API server failed");
                }
            }),
        ));
        tracing::info!(api_addr = %api_addr, "HTTP API listening");

        self.running.store(true, Ordering::Release);
        tracing::info!(listen_addr = %listen_addr, "sensorhub node started");
        Ok(())
    }

    /// Dial every configured bootstrap address and enqueue a JOIN_REQUEST.
    ///
    /// Seeds are addressed by a synthetic worker id until their real node id
    /// is learned from a PEER_LIST exchange; synthetic ids never enter the
    /// peer table.
    fn bootstrap(&self, advertised_port: u16) {
        if self.config.bootstrap_peers.is_empty() {
            tracing::info!("no bootstrap peers configured");
            return;
        }

        let join = Envelope::join_request(
            &self.config.node_id,
            &self.config.host,
            advertised_port,
        );
        for (host, port) in &self.config.bootstrap_peers {
            let worker_id = format!("bootstrap@{host}:{port}");
            self.outbound.ensure_worker(&worker_id, host, *port);
            match self.outbound.send(&worker_id, &join) {
                Ok(()) => tracing::info!(%host, port, "JOIN_REQUEST queued to bootstrap peer"),
                Err(e) => tracing::warn!(%host, port, error = %e, "bootstrap JOIN_REQUEST failed"),
            }
        }
    }

    /// Run until Ctrl-C or a programmatic shutdown, then stop.
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;

        let mut shutdown_rx = self.shutdown_rx.clone();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received (SIGINT)");
            }
            _ = async {
                while !*shutdown_rx.borrow() {
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
            } => {
                tracing::info!("shutdown requested");
            }
        }

        self.stop().await;
        Ok(())
    }

    /// Request shutdown without waiting.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Stop every component within the grace period. Idempotent.
    pub async fn stop(&mut self) {
        tracing::info!("stopping sensorhub node");
        self.running.store(false, Ordering::Release);
        let _ = self.shutdown_tx.send(true);

        if let Some(mut sensors) = self.sensors.take() {
            sensors.join().await;
        }
        self.outbound.stop();

        for (name, handle) in self.tasks.drain(..) {
            match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
                Ok(Ok(())) => tracing::debug!(task = name, "task stopped"),
                Ok(Err(e)) => tracing::warn!(task = name, error = %e, "task panicked"),
                Err(_) => tracing::warn!(task = name, "task stop timed out"),
            }
        }

        self.engine.debug_dump();
        tracing::info!("sensorhub node stopped");
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        // Tasks hold clones of the watch receiver; make sure none outlives
        // the runtime silently when stop() was skipped.
        let _ = self.shutdown_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_start_resolves_ephemeral_ports() {
        let mut runtime = Runtime::new(Config::for_tests("rt-a")).unwrap();
        runtime.start().await.unwrap();

        let listen = runtime.listen_addr().unwrap();
        let api = runtime.api_addr().unwrap();
        assert!(listen.port() > 0);
        assert!(api.port() > 0);
        assert!(runtime.is_running());

        runtime.stop().await;
        assert!(!runtime.is_running());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let mut runtime = Runtime::new(Config::for_tests("rt-b")).unwrap();
        runtime.start().await.unwrap();
        runtime.stop().await;
        runtime.stop().await;
    }

    #[tokio::test]
    async fn test_bootstrap_spawns_synthetic_workers() {
        let mut config = Config::for_tests("rt-c");
        config.bootstrap_peers = vec![("127.0.0.1".to_string(), 1)];
        let mut runtime = Runtime::new(config).unwrap();
        runtime.start().await.unwrap();

        assert!(runtime.outbound().has_worker("bootstrap@127.0.0.1:1"));
        // Synthetic ids stay out of the peer table.
        assert!(runtime.peers().is_empty());

        runtime.stop().await;
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = Config::for_tests("rt-d");
        config.node_id = "a:b".to_string();
        assert!(Runtime::new(config).is_err());
    }
}
