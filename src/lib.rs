//! Sensorhub - peer-to-peer sensor cluster with LWW-replicated state.
//!
//! Sensorhub nodes are homogeneous peers. Each produces synthetic sensor
//! readings and replicates them to every other node, so all nodes converge
//! on a single global view of the sensor space. There is no coordinator:
//! nodes join by contacting any existing member, and membership spreads by
//! transitive JOIN_REQUEST / PEER_LIST gossip. Conflicts are resolved by a
//! last-write-wins register map keyed on `(ts_ms, origin)`, trading strong
//! consistency for availability and partition tolerance.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   apply_local    ┌─────────────────────────────┐
//! │   Sensors    ├─────────────────►│        State engine         │
//! └──────────────┘                  │  LWW map │ UI buf │ repl buf│
//! ┌──────────────┐   apply_remote   └───────┬──────────────┬──────┘
//! │  Dispatcher  ├──────────────────────────┘              │ drain
//! └──────┬───────┘                                         ▼
//!        │ frames                  ┌──────────────┐  ┌───────────┐
//! ┌──────┴───────┐                 │   HTTP API   │  │ Publisher │
//! │Inbound server│                 └──────────────┘  └─────┬─────┘
//! └──────────────┘                                         │ broadcast
//!        ▲              ┌─────────────────────┐            ▼
//!   peer frames         │     Peer table      │   ┌────────────────┐
//!        └──────────────┤ JOIN/PEER_LIST glue ├──►│Outbound workers│
//!                       └─────────────────────┘   └────────────────┘
//! ```
//!
//! # Module Organization
//!
//! ## Core
//! - [`core::config`] - Environment configuration and validation
//! - [`core::runtime`] - Component lifecycle orchestration
//! - [`core::error`] - Error taxonomy and wire error kinds
//! - [`core::logging`] - tracing subscriber setup
//! - [`core::time`] - Wall-clock millisecond helpers
//!
//! ## Protocol
//! - [`proto::message`] - Envelope and payload schemas
//! - [`proto::framing`] - 4-byte big-endian length-prefixed framing
//! - [`proto::dispatcher`] - MessageType -> handler routing
//! - [`proto::handlers`] - Non-membership handlers and registry wiring
//!
//! ## State
//! - [`state::engine`] - LWW register map with two clear-on-read buffers
//! - [`state::publisher`] - Periodic replication broadcast
//!
//! ## Membership
//! - [`membership::table`] - Thread-safe peer registry
//! - [`membership::handlers`] - Transitive-closure join gossip
//!
//! ## Networking
//! - [`net::server`] - Inbound listener and per-connection read loops
//! - [`net::client`] - Per-peer outbound workers with queues and backoff
//!
//! ## Edges
//! - [`sensors`] - Synthetic producers feeding the engine
//! - [`api`] - Read-only HTTP view of the engine
//!
//! # Key Invariants
//!
//! - **LWW-ORDER**: a stored entry is replaced only by a strictly greater
//!   `(ts_ms, origin)` tuple; merges commute, associate, and are idempotent.
//! - **ORIGIN-SCOPE**: a key `"o:s"` only ever stores entries whose origin
//!   is `o`; mismatches are rejected before the merge.
//! - **NO-ECHO**: remote updates never enter the replication buffer, so no
//!   update loops between nodes.
//! - **PER-PEER-FIFO**: frames enqueued to one peer are delivered in order,
//!   modulo reconnects; no cross-peer ordering exists.

// Core infrastructure
pub mod core;

// Wire protocol
pub mod proto;

// LWW state
pub mod state;

// Cluster membership
pub mod membership;

// Networking
pub mod net;

// Synthetic producers
pub mod sensors;

// HTTP read API
pub mod api;

// Re-exports for convenience
pub use crate::core::config::Config;
pub use crate::core::error::{HubError, HubResult};
pub use crate::core::runtime::Runtime;
pub use membership::{Peer, PeerStatus, PeerTable};
pub use proto::{Dispatcher, Envelope, MessageType};
pub use state::{SensorEntry, StateEngine};
