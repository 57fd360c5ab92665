//! LWW state engine and the replication publisher that drains it.

pub mod engine;
pub mod publisher;

pub use engine::{group_by_origin, EntryMeta, EntryView, GroupedState, SensorEntry, StateEngine};
pub use publisher::ReplicationPublisher;
