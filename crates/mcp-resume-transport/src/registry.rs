//! Open SSE channels of one session, keyed by stream id.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use mcp_resume_core::{EventId, StreamId};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

/// A message on its way to one SSE channel.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundEvent {
    pub event_id: EventId,
    pub message: Value,
}

pub type EventSender = mpsc::UnboundedSender<OutboundEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<OutboundEvent>;

/// Registry error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Stream already open: {0}")]
    Conflict(StreamId),
    #[error("Stream not registered: {0}")]
    NotRegistered(StreamId),
    #[error("Stream already closed: {0}")]
    AlreadyClosed(StreamId),
}

/// One registered SSE channel.
#[derive(Debug)]
pub struct StreamEntry {
    sender: EventSender,
}

impl StreamEntry {
    /// Whether the receiving side (the HTTP response body) is gone.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Stream id -> open channel.
///
/// A channel whose client went away without a clean close stays registered
/// until a write to it fails. Registering a stream id that is still present is
/// a conflict, even when the old channel is already dead.
#[derive(Debug, Default)]
pub struct StreamRegistry {
    entries: Mutex<HashMap<StreamId, StreamEntry>>,
}

impl StreamRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<StreamId, StreamEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a channel for `stream_id`.
    ///
    /// # Errors
    /// Returns [`RegistryError::Conflict`] if the stream id is already registered.
    pub fn register(&self, stream_id: &str, sender: EventSender) -> Result<(), RegistryError> {
        let mut entries = self.lock();
        if entries.contains_key(stream_id) {
            return Err(RegistryError::Conflict(stream_id.to_string()));
        }
        entries.insert(stream_id.to_string(), StreamEntry { sender });
        tracing::debug!(stream_id, "Stream registered");
        Ok(())
    }

    /// Create a channel and register it under `stream_id`.
    ///
    /// # Errors
    /// Returns [`RegistryError::Conflict`] if the stream id is already registered.
    pub fn open(&self, stream_id: &str) -> Result<EventReceiver, RegistryError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.register(stream_id, tx)?;
        Ok(rx)
    }

    /// Whether `stream_id` has a registered channel.
    #[must_use]
    pub fn contains(&self, stream_id: &str) -> bool {
        self.lock().contains_key(stream_id)
    }

    /// Whether the channel for `stream_id` is registered but its client is gone.
    #[must_use]
    pub fn is_stale(&self, stream_id: &str) -> bool {
        self.lock().get(stream_id).is_some_and(StreamEntry::is_closed)
    }

    /// Number of registered channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no channel is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Deliver `event` to the channel registered for `stream_id`.
    ///
    /// Returns whether a live channel accepted it. A channel whose receiver is
    /// gone is unregistered on the spot.
    pub fn send(&self, stream_id: &str, event: OutboundEvent) -> bool {
        let mut entries = self.lock();
        let Some(entry) = entries.get(stream_id) else {
            return false;
        };
        if entry.sender.send(event).is_ok() {
            return true;
        }
        entries.remove(stream_id);
        tracing::debug!(stream_id, "Dropped channel after failed write");
        false
    }

    /// Unregister and close the channel for `stream_id`.
    ///
    /// The entry is removed in every case.
    ///
    /// # Errors
    /// Returns [`RegistryError::NotRegistered`] if nothing was registered, or
    /// [`RegistryError::AlreadyClosed`] if the client had already gone away.
    pub fn cleanup(&self, stream_id: &str) -> Result<(), RegistryError> {
        let entry = self
            .lock()
            .remove(stream_id)
            .ok_or_else(|| RegistryError::NotRegistered(stream_id.to_string()))?;
        if entry.is_closed() {
            return Err(RegistryError::AlreadyClosed(stream_id.to_string()));
        }
        tracing::debug!(stream_id, "Stream closed");
        Ok(())
    }

    /// Close every channel.
    pub fn close_all(&self) {
        let closed = std::mem::take(&mut *self.lock());
        if !closed.is_empty() {
            tracing::debug!(streams = closed.len(), "Closed all streams");
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    use super::*;

    fn event(id: &str) -> OutboundEvent {
        OutboundEvent {
            event_id: id.to_string(),
            message: json!({"n": id}),
        }
    }

    #[test]
    fn test_conflict_on_duplicate_stream() {
        let registry = StreamRegistry::new();
        let _rx = assert_ok!(registry.open("s1"));
        assert_eq!(
            registry.open("s1").unwrap_err(),
            RegistryError::Conflict("s1".into())
        );
    }

    #[test]
    fn test_dead_channel_still_conflicts_until_cleanup() {
        let registry = StreamRegistry::new();
        drop(registry.open("s1").unwrap());

        assert!(registry.is_stale("s1"));
        assert_err!(registry.open("s1"));

        assert_eq!(
            registry.cleanup("s1"),
            Err(RegistryError::AlreadyClosed("s1".into()))
        );
        assert!(!registry.contains("s1"));
        let _rx = assert_ok!(registry.open("s1"));
    }

    #[test]
    fn test_send_delivers_and_drops_dead_channels() {
        let registry = StreamRegistry::new();
        let mut rx = registry.open("s1").unwrap();

        assert!(registry.send("s1", event("s1_1")));
        assert_eq!(rx.try_recv().unwrap(), event("s1_1"));

        drop(rx);
        assert!(!registry.send("s1", event("s1_2")));
        assert!(!registry.contains("s1"));
        assert!(!registry.send("missing", event("x_1")));
    }

    #[test]
    fn test_cleanup_closes_the_receiver() {
        let registry = StreamRegistry::new();
        let mut rx = registry.open("s1").unwrap();

        assert_ok!(registry.cleanup("s1"));
        assert!(rx.try_recv().is_err());
        assert_eq!(
            registry.cleanup("s1"),
            Err(RegistryError::NotRegistered("s1".into()))
        );
    }

    #[test]
    fn test_close_all() {
        let registry = StreamRegistry::new();
        let _a = registry.open("a").unwrap();
        let _b = registry.open("b").unwrap();
        registry.close_all();
        assert!(registry.is_empty());
    }
}
