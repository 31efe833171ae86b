//! Connection status and observer lists.

use std::{
    fmt,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use serde::Serialize;
use serde_json::Value;

/// Where the client is in its connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    /// Waiting for the user to finish an authorization redirect.
    Authorizing,
    Reconnecting,
    Connected,
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authorizing => "authorizing",
            Self::Reconnecting => "reconnecting",
            Self::Connected => "connected",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Something the user should see.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientNotification {
    /// A notification pushed by the server.
    Server(Value),
    /// A response replayed after a reconnect. The request that produced it
    /// belonged to the previous connection, so nobody is waiting for it.
    Replayed(Value),
}

/// Handle returned by `subscribe`; pass it back to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// An explicit list of callbacks.
pub struct Observers<T> {
    next_id: AtomicU64,
    callbacks: Mutex<Vec<(u64, Callback<T>)>>,
}

impl<T> Default for Observers<T> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            callbacks: Mutex::new(Vec::new()),
        }
    }
}

impl<T> Observers<T> {
    /// Create an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn callbacks(&self) -> MutexGuard<'_, Vec<(u64, Callback<T>)>> {
        self.callbacks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a callback.
    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks().push((id, Arc::new(callback)));
        Subscription(id)
    }

    /// Remove a callback. Returns whether it was still registered.
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        let mut callbacks = self.callbacks();
        let before = callbacks.len();
        callbacks.retain(|(id, _)| *id != subscription.0);
        callbacks.len() != before
    }

    /// Call every callback with `value`.
    ///
    /// Callbacks run outside the lock, so they may subscribe or unsubscribe.
    pub fn emit(&self, value: &T) {
        let callbacks: Vec<Callback<T>> = self
            .callbacks()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in callbacks {
            callback(value);
        }
    }

    /// Number of callbacks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.callbacks().len()
    }

    /// Whether there are no callbacks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.callbacks().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let observers = Observers::<ConnectionStatus>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let sub = observers.subscribe(move |status| sink.lock().unwrap().push(*status));
        observers.emit(&ConnectionStatus::Connecting);

        assert!(observers.unsubscribe(sub));
        assert!(!observers.unsubscribe(sub));
        observers.emit(&ConnectionStatus::Connected);

        assert_eq!(*seen.lock().unwrap(), vec![ConnectionStatus::Connecting]);
        assert!(observers.is_empty());
    }

    #[test]
    fn test_callback_may_unsubscribe_itself() {
        let observers = Arc::new(Observers::<u32>::new());
        let slot = Arc::new(Mutex::new(None));

        let list = Arc::clone(&observers);
        let own = Arc::clone(&slot);
        let sub = observers.subscribe(move |_| {
            if let Some(sub) = own.lock().unwrap().take() {
                list.unsubscribe(sub);
            }
        });
        *slot.lock().unwrap() = Some(sub);

        observers.emit(&1);
        assert_eq!(observers.len(), 0);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ConnectionStatus::Reconnecting.to_string(), "reconnecting");
    }
}
