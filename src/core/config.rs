//! Configuration parsing and validation.
//!
//! Sensorhub configuration is loaded from environment variables at startup
//! and is immutable afterwards. Startup fails with a non-zero exit on any
//! missing or malformed value.
//!
//! Recognized variables:
//! - `NODE_ID` (required): this node's identity, the LWW tie-breaker.
//! - `HOST`, `PORT` (required): peer TCP listener bind; `PORT` is also
//!   advertised in JOIN_REQUEST payloads.
//! - `BOOTSTRAP_PEERS`: comma-separated `host:port` list.
//! - `WEB_API_PORT`: HTTP API port (default `PORT + 1000`).
//! - `LOG_LEVEL` (required), `LOG_FILE`, `CLEAR_LOG`: logging sinks.
//! - `SENSORS` plus `SENSOR_<i>_*`: synthetic producer definitions.

use crate::sensors::SensorSpec;
use anyhow::{bail, Context, Result};
use std::env;
use std::time::Duration;

const ALLOWED_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Default cap on wire frame size.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Default per-peer send queue bound.
pub const DEFAULT_SEND_QUEUE_BOUND: usize = 1024;

/// Default replication publish period.
pub const DEFAULT_PUBLISH_PERIOD: Duration = Duration::from_millis(200);

/// Default outbound connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Top-level node configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// This node's identity; unique across the cluster.
    pub node_id: String,

    /// Peer TCP listener bind host.
    pub host: String,

    /// Peer TCP listener bind port, also advertised to peers.
    pub port: u16,

    /// Static bootstrap addresses contacted at startup.
    pub bootstrap_peers: Vec<(String, u16)>,

    /// HTTP read API port.
    pub web_api_port: u16,

    /// Log level name (validated against the allowed set).
    pub log_level: String,

    /// Optional log file; stderr when absent.
    pub log_file: Option<String>,

    /// Truncate the log file before logging starts.
    pub clear_log: bool,

    /// Synthetic sensor definitions.
    pub sensors: Vec<SensorSpec>,

    /// Maximum accepted/emitted frame size in bytes.
    pub max_frame_size: usize,

    /// Per-peer outbound queue bound; oldest entries drop on overflow.
    pub send_queue_bound: usize,

    /// Replication publisher tick period.
    pub publish_period: Duration,

    /// Outbound TCP connect timeout.
    pub connect_timeout: Duration,
}

fn require_env(name: &str) -> Result<String> {
    match env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => bail!("missing required env var: {name}"),
    }
}

fn parse_port(raw: &str) -> Result<u16> {
    let port: u32 = raw
        .trim()
        .parse()
        .with_context(|| format!("port must be an integer, got: {raw}"))?;
    if port == 0 || port > 65535 {
        bail!("invalid port value: {port}");
    }
    Ok(port as u16)
}

fn parse_bootstrap_peers(raw: &str) -> Result<Vec<(String, u16)>> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut peers = Vec::new();
    for item in raw.split(',') {
        let item = item.trim();
        let (host, port) = item
            .rsplit_once(':')
            .with_context(|| format!("invalid peer format: {item} (expected host:port)"))?;
        if host.is_empty() {
            bail!("invalid peer format: {item} (empty host)");
        }
        peers.push((host.to_string(), parse_port(port)?));
    }
    Ok(peers)
}

impl Config {
    /// Load and validate the full configuration from the environment.
    pub fn from_env() -> Result<Self> {
        let node_id = require_env("NODE_ID")?;
        let host = require_env("HOST")?;
        let port = parse_port(&require_env("PORT")?).context("PORT")?;

        let log_level = require_env("LOG_LEVEL")?.to_lowercase();
        if !ALLOWED_LOG_LEVELS.contains(&log_level.as_str()) {
            bail!(
                "invalid LOG_LEVEL: {log_level} (allowed: {})",
                ALLOWED_LOG_LEVELS.join(", ")
            );
        }

        let log_file = env::var("LOG_FILE").ok().filter(|v| !v.trim().is_empty());
        let clear_log = env::var("CLEAR_LOG")
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let bootstrap_peers =
            parse_bootstrap_peers(&env::var("BOOTSTRAP_PEERS").unwrap_or_default())
                .context("BOOTSTRAP_PEERS")?;

        let web_api_port = match env::var("WEB_API_PORT") {
            Ok(raw) => parse_port(&raw).context("WEB_API_PORT")?,
            Err(_) => port
                .checked_add(1000)
                .context("PORT + 1000 exceeds the valid port range; set WEB_API_PORT")?,
        };

        let sensor_count: usize = env::var("SENSORS")
            .unwrap_or_else(|_| "0".to_string())
            .trim()
            .parse()
            .context("SENSORS must be an integer")?;

        let mut sensors = Vec::with_capacity(sensor_count);
        for i in 0..sensor_count {
            sensors.push(SensorSpec::from_env(i)?);
        }

        let config = Self {
            node_id,
            host,
            port,
            bootstrap_peers,
            web_api_port,
            log_level,
            log_file,
            clear_log,
            sensors,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            send_queue_bound: DEFAULT_SEND_QUEUE_BOUND,
            publish_period: DEFAULT_PUBLISH_PERIOD,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.node_id.contains(':') {
            bail!("NODE_ID must not contain ':' (reserved as the key separator)");
        }
        if self.max_frame_size == 0 {
            bail!("max_frame_size must be > 0");
        }
        if self.send_queue_bound == 0 {
            bail!("send_queue_bound must be > 0");
        }
        if self.publish_period.is_zero() {
            bail!("publish_period must be > 0");
        }
        let mut names: Vec<&str> = self.sensors.iter().map(|s| s.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        if names.len() != self.sensors.len() {
            bail!("sensor names must be unique");
        }
        Ok(())
    }

    /// Minimal config for tests; binds ephemeral ports and logs to stderr.
    pub fn for_tests(node_id: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            host: "127.0.0.1".to_string(),
            port: 0,
            bootstrap_peers: Vec::new(),
            web_api_port: 0,
            log_level: "debug".to_string(),
            log_file: None,
            clear_log: false,
            sensors: Vec::new(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            send_queue_bound: DEFAULT_SEND_QUEUE_BOUND,
            publish_period: Duration::from_millis(50),
            connect_timeout: Duration::from_secs(2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_port_bounds() {
        assert_eq!(parse_port("7000").unwrap(), 7000);
        assert_eq!(parse_port(" 1 ").unwrap(), 1);
        assert!(parse_port("0").is_err());
        assert!(parse_port("65536").is_err());
        assert!(parse_port("seven").is_err());
        assert!(parse_port("-1").is_err());
    }

    #[test]
    fn test_parse_bootstrap_peers() {
        let peers = parse_bootstrap_peers("node-b:7000, node-c:7001").unwrap();
        assert_eq!(
            peers,
            vec![
                ("node-b".to_string(), 7000),
                ("node-c".to_string(), 7001)
            ]
        );

        assert!(parse_bootstrap_peers("").unwrap().is_empty());
        assert!(parse_bootstrap_peers("   ").unwrap().is_empty());
        assert!(parse_bootstrap_peers("no-port").is_err());
        assert!(parse_bootstrap_peers("h:0").is_err());
        assert!(parse_bootstrap_peers(":7000").is_err());
    }

    #[test]
    fn test_validate_rejects_colon_in_node_id() {
        let mut config = Config::for_tests("n1");
        config.node_id = "n:1".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_sensor_names() {
        let mut config = Config::for_tests("n1");
        let spec = SensorSpec {
            name: "temp".to_string(),
            period_ms: 100,
            params: crate::sensors::SensorParams::Noise {
                base: 0.0,
                noise: 1.0,
            },
        };
        config.sensors = vec![spec.clone(), spec];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_test_config_is_valid() {
        assert!(Config::for_tests("n1").validate().is_ok());
    }
}
