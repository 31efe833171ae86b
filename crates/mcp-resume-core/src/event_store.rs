//! Bounded in-memory event store with per-stream replay.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::SystemTime,
};

use serde_json::Value;

use crate::{
    ResumeConfig,
    config::{DEFAULT_MAX_EVENTS_PER_STREAM, DEFAULT_MAX_STREAMS},
    event_id::{format_event_id, stream_id_from_event_id},
    traits::{EventId, EventStore, ReplayError, StoredEvent, StreamId},
};

#[derive(Default)]
struct Inner {
    /// Ordered events per stream.
    streams: HashMap<StreamId, VecDeque<Arc<StoredEvent>>>,
    /// Streams in first-insertion order, oldest first.
    stream_order: VecDeque<StreamId>,
    /// Flat id -> event index.
    index: HashMap<EventId, Arc<StoredEvent>>,
    /// Last sequence handed out per stream.
    counters: HashMap<StreamId, u64>,
}

impl Inner {
    fn resolve_stream_id(&self, event_id: &str) -> Option<StreamId> {
        self.index.get(event_id).map_or_else(
            || stream_id_from_event_id(event_id).map(ToOwned::to_owned),
            |event| Some(event.stream_id.clone()),
        )
    }

    fn evict_stream(&mut self, stream_id: &str) {
        if let Some(events) = self.streams.remove(stream_id) {
            for event in &events {
                self.index.remove(&event.event_id);
            }
            tracing::debug!(
                stream_id,
                dropped_events = events.len(),
                "Evicted oldest stream"
            );
        }
        self.counters.remove(stream_id);
    }
}

/// Event store with two independent bounds.
///
/// Each stream keeps at most `max_events_per_stream` events (oldest dropped
/// first), and at most `max_streams` streams are tracked. When the stream
/// limit is exceeded, the stream inserted first is dropped wholesale.
/// Eviction follows insertion order, not access order, so recently opened
/// streams (the ones a reconnecting client is most likely to ask for) survive.
pub struct InMemoryEventStore {
    inner: Mutex<Inner>,
    max_events_per_stream: usize,
    max_streams: usize,
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventStore {
    /// Create a store with the default limits (500 events, 100 streams).
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_EVENTS_PER_STREAM, DEFAULT_MAX_STREAMS)
    }

    /// Create a store with explicit limits. Zero limits are raised to one.
    #[must_use]
    pub fn with_limits(max_events_per_stream: usize, max_streams: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_events_per_stream: max_events_per_stream.max(1),
            max_streams: max_streams.max(1),
        }
    }

    /// Create a store from shared configuration.
    #[must_use]
    pub fn from_config(config: &ResumeConfig) -> Self {
        Self::with_limits(config.max_events_per_stream, config.max_streams)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of streams currently tracked.
    #[must_use]
    pub fn stream_count(&self) -> usize {
        self.lock().streams.len()
    }

    /// Whether events for `stream_id` are still held.
    #[must_use]
    pub fn contains_stream(&self, stream_id: &str) -> bool {
        self.lock().streams.contains_key(stream_id)
    }

    /// Snapshot of a stream's retained events, oldest first.
    #[must_use]
    pub fn events_in_stream(&self, stream_id: &str) -> Vec<Arc<StoredEvent>> {
        self.lock()
            .streams
            .get(stream_id)
            .map(|events| events.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Look up a retained event by id.
    #[must_use]
    pub fn get_event(&self, event_id: &str) -> Option<Arc<StoredEvent>> {
        self.lock().index.get(event_id).cloned()
    }

    /// Drop everything.
    pub fn clear(&self) {
        *self.lock() = Inner::default();
    }
}

impl EventStore for InMemoryEventStore {
    fn store_event(&self, stream_id: &str, message: Value) -> EventId {
        let mut guard = self.lock();
        let inner = &mut *guard;

        let counter = inner.counters.entry(stream_id.to_owned()).or_insert(0);
        *counter += 1;
        let event_id = format_event_id(stream_id, *counter);

        let event = Arc::new(StoredEvent {
            event_id: event_id.clone(),
            stream_id: stream_id.to_owned(),
            message,
            timestamp: SystemTime::now(),
        });

        if !inner.streams.contains_key(stream_id) {
            inner.stream_order.push_back(stream_id.to_owned());
        }
        let events = inner.streams.entry(stream_id.to_owned()).or_default();
        events.push_back(Arc::clone(&event));
        inner.index.insert(event_id.clone(), event);

        while events.len() > self.max_events_per_stream {
            if let Some(oldest) = events.pop_front() {
                inner.index.remove(&oldest.event_id);
            }
        }

        while inner.stream_order.len() > self.max_streams {
            let Some(oldest) = inner.stream_order.pop_front() else {
                break;
            };
            inner.evict_stream(&oldest);
        }

        event_id
    }

    fn stream_id_for_event_id(&self, event_id: &str) -> Option<StreamId> {
        self.lock().resolve_stream_id(event_id)
    }

    fn replay_events_after(
        &self,
        last_event_id: &str,
        sink: &mut dyn FnMut(&StoredEvent),
    ) -> Result<StreamId, ReplayError> {
        // Collect under the lock, deliver outside it so the sink may store events.
        let (stream_id, pending) = {
            let inner = self.lock();
            let stream_id = inner
                .resolve_stream_id(last_event_id)
                .ok_or_else(|| ReplayError::UnknownEventId(last_event_id.to_owned()))?;
            let events = inner
                .streams
                .get(&stream_id)
                .ok_or_else(|| ReplayError::UnknownStream(stream_id.clone()))?;
            let position = events
                .iter()
                .position(|event| event.event_id == last_event_id)
                .ok_or_else(|| ReplayError::EventNotInStream {
                    event_id: last_event_id.to_owned(),
                    stream_id: stream_id.clone(),
                })?;
            let pending: Vec<Arc<StoredEvent>> =
                events.iter().skip(position + 1).cloned().collect();
            (stream_id, pending)
        };

        tracing::debug!(
            stream_id = %stream_id,
            last_event_id,
            replayed = pending.len(),
            "Replaying events"
        );
        for event in &pending {
            sink(event);
        }

        Ok(stream_id)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    use super::*;

    fn replay(store: &InMemoryEventStore, last: &str) -> Result<Vec<EventId>, ReplayError> {
        let mut seen = Vec::new();
        store.replay_events_after(last, &mut |event| seen.push(event.event_id.clone()))?;
        Ok(seen)
    }

    #[test]
    fn test_sequences_start_at_one_without_gaps() {
        let store = InMemoryEventStore::new();
        let a: Vec<_> = (0..3).map(|i| store.store_event("a", json!(i))).collect();
        let b = store.store_event("b", json!("x"));
        let a4 = store.store_event("a", json!(3));

        assert_eq!(a, vec!["a_1", "a_2", "a_3"]);
        assert_eq!(b, "b_1");
        assert_eq!(a4, "a_4");
    }

    #[test]
    fn test_replay_after_returns_later_events_in_order() {
        let store = InMemoryEventStore::new();
        for i in 1..=5 {
            store.store_event("s1", json!({ "n": i }));
        }
        store.store_event("s2", json!("other stream"));

        let mut messages = Vec::new();
        let stream = assert_ok!(store.replay_events_after("s1_2", &mut |event| {
            messages.push((event.event_id.clone(), event.message.clone()));
        }));

        assert_eq!(stream, "s1");
        assert_eq!(
            messages,
            vec![
                ("s1_3".to_string(), json!({ "n": 3 })),
                ("s1_4".to_string(), json!({ "n": 4 })),
                ("s1_5".to_string(), json!({ "n": 5 })),
            ]
        );
    }

    #[test]
    fn test_replay_after_last_event_is_empty() {
        let store = InMemoryEventStore::new();
        store.store_event("s1", json!(1));
        let last = store.store_event("s1", json!(2));
        assert_eq!(replay(&store, &last).unwrap(), Vec::<EventId>::new());
    }

    #[test]
    fn test_per_stream_eviction_keeps_most_recent() {
        let store = InMemoryEventStore::with_limits(500, 100);
        for i in 0..507 {
            store.store_event("busy", json!(i));
        }

        let events = store.events_in_stream("busy");
        assert_eq!(events.len(), 500);
        assert_eq!(events[0].event_id, "busy_8");
        assert_eq!(events[499].event_id, "busy_507");
        assert!(store.get_event("busy_7").is_none());
        assert!(store.get_event("busy_8").is_some());
    }

    #[test]
    fn test_global_eviction_drops_oldest_stream_wholesale() {
        let store = InMemoryEventStore::with_limits(10, 100);
        for stream in 0..=100 {
            store.store_event(&format!("stream-{stream}"), json!("first"));
            store.store_event(&format!("stream-{stream}"), json!("second"));
        }

        assert_eq!(store.stream_count(), 100);
        assert!(!store.contains_stream("stream-0"));
        assert!(store.get_event("stream-0_1").is_none());
        assert!(store.get_event("stream-0_2").is_none());
        for stream in 1..=100 {
            assert_eq!(store.events_in_stream(&format!("stream-{stream}")).len(), 2);
        }
    }

    #[test]
    fn test_eviction_follows_insertion_not_access() {
        let store = InMemoryEventStore::with_limits(10, 2);
        store.store_event("old", json!(1));
        store.store_event("young", json!(1));
        // Writing to "old" again does not refresh its position.
        store.store_event("old", json!(2));
        store.store_event("newest", json!(1));

        assert!(!store.contains_stream("old"));
        assert!(store.contains_stream("young"));
        assert!(store.contains_stream("newest"));
    }

    #[test]
    fn test_stream_id_lookup_falls_back_to_parsing() {
        let store = InMemoryEventStore::with_limits(1, 10);
        store.store_event("req_7", json!(1));
        store.store_event("req_7", json!(2));

        // req_7_1 was evicted from the index but still maps to its stream.
        assert!(store.get_event("req_7_1").is_none());
        assert_eq!(store.stream_id_for_event_id("req_7_1").as_deref(), Some("req_7"));
        assert_eq!(store.stream_id_for_event_id("garbage"), None);
    }

    #[test]
    fn test_replay_errors() {
        let store = InMemoryEventStore::with_limits(2, 1);

        let err = assert_err!(replay(&store, "garbage"));
        assert_eq!(err, ReplayError::UnknownEventId("garbage".into()));

        let err = assert_err!(replay(&store, "missing_4"));
        assert_eq!(err, ReplayError::UnknownStream("missing".into()));

        for i in 0..3 {
            store.store_event("s", json!(i));
        }
        // s_1 aged out of the stream window.
        let err = assert_err!(replay(&store, "s_1"));
        assert!(matches!(err, ReplayError::EventNotInStream { .. }));
    }

    #[test]
    fn test_recreated_stream_rejects_stale_marker() {
        let store = InMemoryEventStore::with_limits(10, 1);
        for _ in 0..3 {
            store.store_event("s", json!("gen1"));
        }
        store.store_event("t", json!("pushes s out"));
        store.store_event("s", json!("gen2"));

        // Sequence restarted, so s_3 from the first generation is unknown.
        assert_eq!(store.events_in_stream("s")[0].event_id, "s_1");
        let err = assert_err!(replay(&store, "s_3"));
        assert_eq!(
            err,
            ReplayError::EventNotInStream {
                event_id: "s_3".into(),
                stream_id: "s".into(),
            }
        );
    }

    #[test]
    fn test_sink_may_store_events() {
        let store = InMemoryEventStore::new();
        store.store_event("s", json!(1));
        store.store_event("s", json!(2));

        let mut copied = 0;
        assert_ok!(store.replay_events_after("s_1", &mut |event| {
            store.store_event("copy", event.message.clone());
            copied += 1;
        }));
        assert_eq!(copied, 1);
        assert_eq!(store.events_in_stream("copy").len(), 1);
    }

    #[test]
    fn test_clear() {
        let store = InMemoryEventStore::new();
        store.store_event("s", json!(1));
        store.clear();
        assert_eq!(store.stream_count(), 0);
        assert_eq!(store.store_event("s", json!(1)), "s_1");
    }
}
