//! Core building blocks for resumable streaming sessions.
//!
//! This crate provides:
//! - `InMemoryEventStore` - Bounded per-stream event log with replay
//! - `EventStore` - The persistence hook a transport calls for every outbound message
//! - Event id helpers (`"{stream}_{sequence}"`)
//! - `ResumeConfig` - Retention limits shared by server components

pub mod config;
pub mod event_id;
pub mod event_store;
pub mod traits;

pub use config::{ConfigError, ResumeConfig};
pub use event_id::{format_event_id, stream_id_from_event_id};
pub use event_store::InMemoryEventStore;
pub use traits::{
    EventId, EventStore, ReplayError, STANDALONE_STREAM_ID, StoredEvent, StreamId,
};
