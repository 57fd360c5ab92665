//! Common test utilities.
//!
//! Shared helpers for integration tests; import with `mod common;`.
#![allow(dead_code)]

use sensorhub::{Config, Runtime};
use std::future::Future;
use std::time::Duration;

/// Start a node on ephemeral ports with the given bootstrap seeds.
pub async fn start_node(node_id: &str, bootstrap: Vec<(String, u16)>) -> Runtime {
    let mut config = Config::for_tests(node_id);
    config.bootstrap_peers = bootstrap;
    let mut runtime = Runtime::new(config).expect("config should be valid");
    runtime.start().await.expect("node should start");
    runtime
}

/// The listen port of a started node, as a bootstrap seed entry.
pub fn seed(runtime: &Runtime) -> (String, u16) {
    let addr = runtime.listen_addr().expect("node not started");
    ("127.0.0.1".to_string(), addr.port())
}

/// Poll `condition` every 25 ms until it holds or `timeout` elapses.
pub async fn wait_until<F, Fut>(timeout: Duration, condition: F) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
