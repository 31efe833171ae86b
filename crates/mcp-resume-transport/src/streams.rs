//! Per-session stream state: the event log plus the open channels.

use std::sync::{Mutex, PoisonError};

use mcp_resume_core::{
    EventId, EventStore, InMemoryEventStore, ReplayError, ResumeConfig, STANDALONE_STREAM_ID,
    StoredEvent, StreamId,
};
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
    protocol::is_response_value,
    registry::{EventReceiver, OutboundEvent, RegistryError, StreamRegistry},
};

/// Resume failure.
#[derive(Debug, thiserror::Error)]
pub enum ResumeError {
    #[error(transparent)]
    Replay(#[from] ReplayError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Everything a session needs to emit and replay events.
pub struct SessionStreams {
    events: InMemoryEventStore,
    registry: StreamRegistry,
    /// Serializes "store + deliver" against "replay + register" so a live
    /// event can never fall between a replay and its channel registration.
    io: Mutex<()>,
}

impl SessionStreams {
    /// Create empty stream state with the given retention limits.
    #[must_use]
    pub fn new(config: &ResumeConfig) -> Self {
        Self {
            events: InMemoryEventStore::from_config(config),
            registry: StreamRegistry::new(),
            io: Mutex::new(()),
        }
    }

    #[must_use]
    pub const fn events(&self) -> &InMemoryEventStore {
        &self.events
    }

    #[must_use]
    pub const fn registry(&self) -> &StreamRegistry {
        &self.registry
    }

    /// Record `message` on `stream_id` and deliver it if a channel is open.
    ///
    /// The event is stored even when nobody is listening, so a later resume
    /// can pick it up.
    pub fn emit(&self, stream_id: &str, message: Value) -> EventId {
        let _io = self.io.lock().unwrap_or_else(PoisonError::into_inner);
        let event_id = self.events.store_event(stream_id, message.clone());
        let delivered = self.registry.send(
            stream_id,
            OutboundEvent {
                event_id: event_id.clone(),
                message,
            },
        );
        tracing::trace!(stream_id, event_id = %event_id, delivered, "Event emitted");
        event_id
    }

    /// Open a channel for a new request.
    ///
    /// # Errors
    /// Returns [`RegistryError::Conflict`] on a stream id collision.
    pub fn open_request_stream(&self) -> Result<(StreamId, EventReceiver), RegistryError> {
        let stream_id = Uuid::new_v4().simple().to_string();
        let rx = self.registry.open(&stream_id)?;
        Ok((stream_id, rx))
    }

    /// Open the standalone push channel.
    ///
    /// # Errors
    /// Returns [`RegistryError::Conflict`] if it is already open.
    pub fn open_standalone(&self) -> Result<EventReceiver, RegistryError> {
        self.registry.open(STANDALONE_STREAM_ID)
    }

    /// Replay the stream `last_event_id` belongs to, then keep it open for
    /// live events.
    ///
    /// A request stream whose response has already been emitted is finished:
    /// its replay is delivered and the channel ends there.
    ///
    /// # Errors
    /// Returns a [`ReplayError`] if the marker cannot be honored, or a
    /// [`RegistryError::Conflict`] if the stream is still registered.
    pub fn resume(&self, last_event_id: &str) -> Result<(StreamId, EventReceiver), ResumeError> {
        let _io = self.io.lock().unwrap_or_else(PoisonError::into_inner);
        let (tx, rx) = mpsc::unbounded_channel();

        let stream_id = self
            .events
            .replay_events_after(last_event_id, &mut |event: &StoredEvent| {
                let _ = tx.send(OutboundEvent {
                    event_id: event.event_id.clone(),
                    message: event.message.clone(),
                });
            })?;

        if self.is_finished(&stream_id) {
            tracing::debug!(stream_id = %stream_id, "Replayed a finished stream");
        } else {
            self.registry.register(&stream_id, tx)?;
        }
        Ok((stream_id, rx))
    }

    /// Close the channel of a request stream once its response is out.
    pub fn finish(&self, stream_id: &str) {
        if let Err(e) = self.registry.cleanup(stream_id) {
            tracing::debug!(stream_id, "Stream finished without a listener: {e}");
        }
    }

    /// Close every channel and drop the event log.
    pub fn close(&self) {
        self.registry.close_all();
        self.events.clear();
    }

    fn is_finished(&self, stream_id: &str) -> bool {
        stream_id != STANDALONE_STREAM_ID
            && self
                .events
                .events_in_stream(stream_id)
                .iter()
                .any(|event| is_response_value(&event.message))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn streams() -> SessionStreams {
        SessionStreams::new(&ResumeConfig::default())
    }

    fn drain(rx: &mut EventReceiver) -> Vec<EventId> {
        let mut ids = Vec::new();
        while let Ok(event) = rx.try_recv() {
            ids.push(event.event_id);
        }
        ids
    }

    #[test]
    fn test_emit_without_listener_is_kept_for_replay() {
        let streams = streams();
        let first = streams.emit(STANDALONE_STREAM_ID, json!({"n": 1}));
        streams.emit(STANDALONE_STREAM_ID, json!({"n": 2}));

        let (stream_id, mut rx) = streams.resume(&first).unwrap();
        assert_eq!(stream_id, STANDALONE_STREAM_ID);
        assert_eq!(drain(&mut rx), ["_GET_stream_2"]);

        // Still open for live events.
        streams.emit(STANDALONE_STREAM_ID, json!({"n": 3}));
        assert_eq!(drain(&mut rx), ["_GET_stream_3"]);
    }

    #[test]
    fn test_finished_request_stream_ends_after_replay() {
        let streams = streams();
        let (stream_id, rx) = streams.open_request_stream().unwrap();
        drop(rx);

        let progress = streams.emit(&stream_id, json!({"method": "notifications/progress"}));
        streams.emit(&stream_id, json!({"jsonrpc": "2.0", "id": 1, "result": {}}));

        // The dead channel is still registered until something cleans it up.
        assert!(streams.registry().contains(&stream_id));
        streams.finish(&stream_id);

        let (_, mut rx) = streams.resume(&progress).unwrap();
        assert_eq!(drain(&mut rx), [format!("{stream_id}_2")]);
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_resume_conflicts_with_registered_stream() {
        let streams = streams();
        let _live = streams.open_standalone().unwrap();
        let id = streams.emit(STANDALONE_STREAM_ID, json!({}));

        assert!(matches!(
            streams.resume(&id),
            Err(ResumeError::Registry(RegistryError::Conflict(_)))
        ));
    }

    #[test]
    fn test_resume_unknown_stream() {
        let streams = streams();
        assert!(matches!(
            streams.resume("gone_3"),
            Err(ResumeError::Replay(ReplayError::UnknownStream(_)))
        ));
    }

    #[test]
    fn test_close_drops_everything() {
        let streams = streams();
        let mut rx = streams.open_standalone().unwrap();
        streams.emit(STANDALONE_STREAM_ID, json!({}));
        streams.close();

        assert_eq!(drain(&mut rx), ["_GET_stream_1"]);
        assert!(streams.registry().is_empty());
        assert_eq!(streams.events().stream_count(), 0);
    }
}
