//! Peer networking.
//!
//! [`server`] accepts inbound connections and feeds decoded frames to the
//! dispatcher; [`client`] maintains one outbound worker per known peer.

pub mod client;
pub mod server;

pub use client::{Backoff, OutboundClient, OutboundConfig};
pub use server::{InboundServer, InboundServerConfig};

use std::time::Duration;
use tokio::net::TcpStream;

/// Apply per-socket options shared by both directions.
///
/// Keepalive makes the OS surface silent remote failures on otherwise idle
/// links; nodelay keeps small frames from batching behind Nagle.
pub(crate) fn apply_socket_options(
    stream: &TcpStream,
    nodelay: bool,
    keepalive: Option<Duration>,
) {
    if nodelay {
        let _ = stream.set_nodelay(true);
    }
    if let Some(interval) = keepalive {
        let sock = socket2::SockRef::from(stream);
        let params = socket2::TcpKeepalive::new()
            .with_time(interval)
            .with_interval(interval);
        if let Err(e) = sock.set_tcp_keepalive(&params) {
            tracing::debug!(error = %e, "failed to enable TCP keepalive");
        }
    }
}
