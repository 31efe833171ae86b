//! Core types and the event persistence hook used by transports.

use std::time::SystemTime;

use serde_json::Value;
use thiserror::Error;

/// Identifier of one logical push channel within a session.
pub type StreamId = String;

/// Composite event identifier, `"{StreamId}_{sequence}"`.
pub type EventId = String;

/// Stream key reserved for the standalone (GET-opened) push channel.
pub const STANDALONE_STREAM_ID: &str = "_GET_stream";

/// An outbound message recorded for later replay.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    /// Globally unique event id.
    pub event_id: EventId,
    /// Stream the event was emitted on.
    pub stream_id: StreamId,
    /// Opaque JSON-RPC payload.
    pub message: Value,
    /// When the event was stored.
    pub timestamp: SystemTime,
}

/// Replay error.
///
/// Every variant means the client's resumption marker can no longer be
/// honored; the caller must fall back to a fresh stream.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReplayError {
    #[error("Unknown event id: {0}")]
    UnknownEventId(EventId),
    #[error("Stream not found: {0}")]
    UnknownStream(StreamId),
    #[error("Event {event_id} is not part of stream {stream_id}")]
    EventNotInStream {
        event_id: EventId,
        stream_id: StreamId,
    },
}

/// Event persistence hook.
///
/// Implemented by this crate, invoked by the transport: once per outbound
/// message in emission order, and once per resume request.
pub trait EventStore: Send + Sync {
    /// Record an outbound message and return its event id.
    fn store_event(&self, stream_id: &str, message: Value) -> EventId;

    /// Map an event id back to its stream.
    ///
    /// Works for evicted events too, as long as the id is well formed.
    fn stream_id_for_event_id(&self, event_id: &str) -> Option<StreamId>;

    /// Hand every event stored after `last_event_id` to `sink`, in order.
    ///
    /// `last_event_id` itself is not re-delivered.
    ///
    /// # Errors
    /// Returns a [`ReplayError`] if the marker cannot be resolved.
    fn replay_events_after(
        &self,
        last_event_id: &str,
        sink: &mut dyn FnMut(&StoredEvent),
    ) -> Result<StreamId, ReplayError>;
}
