//! Read-only HTTP API over the state engine.

pub mod http;

pub use http::{ApiState, router};
