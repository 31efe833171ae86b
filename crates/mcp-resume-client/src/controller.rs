//! Client reconnection controller.
//!
//! Persists `{sessionId, lastEventId, serverUrl}` while connected, and on
//! reconnect rejoins the old session and resumes after the last event seen.
//! Responses replayed during a resume belong to requests of the previous
//! connection; they are surfaced to the user as notifications.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{Value, json};

use crate::{
    auth::{Authorization, Authorizer, Grant},
    error::ClientError,
    status::{ClientNotification, ConnectionStatus, Observers, Subscription},
    storage::{LAST_EVENT_ID_KEY, ReconnectStorage, SERVER_URL_KEY, SESSION_ID_KEY, SavedSession},
    transport::{ClientTransport, IncomingMessage, TransportFactory},
};

/// Outcome of [`ReconnectionController::connect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected { session_id: String },
    /// The user must complete authorization at this URL, then call `connect` again.
    Redirect(String),
}

/// State shared with the transport callbacks.
struct Shared {
    storage: Arc<dyn ReconnectStorage>,
    status: Mutex<ConnectionStatus>,
    last_error: Mutex<Option<String>>,
    status_observers: Observers<ConnectionStatus>,
    notification_observers: Observers<ClientNotification>,
}

impl Shared {
    fn set_status(&self, status: ConnectionStatus) {
        {
            let mut current = self.status.lock().unwrap_or_else(PoisonError::into_inner);
            if *current == status {
                return;
            }
            *current = status;
        }
        tracing::debug!(%status, "Connection status changed");
        self.status_observers.emit(&status);
    }

    fn fail(&self, err: &ClientError) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(err.to_string());
        self.set_status(ConnectionStatus::Error);
    }

    fn persist(&self, key: &str, value: &str) {
        if let Err(e) = self.storage.set(key, value) {
            tracing::warn!(key, "Failed to persist reconnection state: {e}");
        }
    }

    fn forget(&self, keys: &[&str]) {
        for key in keys {
            if let Err(e) = self.storage.remove(key) {
                tracing::warn!(key, "Failed to clear reconnection state: {e}");
            }
        }
    }

    fn handle_message(&self, incoming: &IncomingMessage) {
        if incoming.is_notification() {
            self.notification_observers
                .emit(&ClientNotification::Server(incoming.message.clone()));
        } else {
            tracing::debug!(
                event_id = incoming.event_id.as_deref().unwrap_or_default(),
                "Ignoring message with no pending request"
            );
        }
    }
}

/// Drives connect, reconnect, and teardown for one client.
pub struct ReconnectionController {
    shared: Arc<Shared>,
    authorizer: Arc<dyn Authorizer>,
    factory: Arc<dyn TransportFactory>,
    transport: Mutex<Option<Arc<dyn ClientTransport>>>,
}

impl ReconnectionController {
    /// Create a disconnected controller.
    #[must_use]
    pub fn new(
        storage: Arc<dyn ReconnectStorage>,
        authorizer: Arc<dyn Authorizer>,
        factory: Arc<dyn TransportFactory>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                storage,
                status: Mutex::new(ConnectionStatus::Disconnected),
                last_error: Mutex::new(None),
                status_observers: Observers::new(),
                notification_observers: Observers::new(),
            }),
            authorizer,
            factory,
            transport: Mutex::new(None),
        }
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        *self.shared.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Message of the failure that put the controller into `Error`.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.shared
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// What is persisted right now.
    #[must_use]
    pub fn saved_session(&self) -> SavedSession {
        SavedSession::load(self.shared.storage.as_ref())
    }

    /// Watch status changes.
    pub fn subscribe_status(
        &self,
        callback: impl Fn(&ConnectionStatus) + Send + Sync + 'static,
    ) -> Subscription {
        self.shared.status_observers.subscribe(callback)
    }

    /// Stop watching status changes.
    pub fn unsubscribe_status(&self, subscription: Subscription) -> bool {
        self.shared.status_observers.unsubscribe(subscription)
    }

    /// Watch user-visible notifications.
    pub fn subscribe_notifications(
        &self,
        callback: impl Fn(&ClientNotification) + Send + Sync + 'static,
    ) -> Subscription {
        self.shared.notification_observers.subscribe(callback)
    }

    /// Stop watching notifications.
    pub fn unsubscribe_notifications(&self, subscription: Subscription) -> bool {
        self.shared.notification_observers.unsubscribe(subscription)
    }

    fn lock_transport(&self) -> MutexGuard<'_, Option<Arc<dyn ClientTransport>>> {
        self.transport.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_transport(&self) -> Option<Arc<dyn ClientTransport>> {
        self.lock_transport().clone()
    }

    async fn replace_transport(&self, next: Option<Arc<dyn ClientTransport>>) {
        let previous = std::mem::replace(&mut *self.lock_transport(), next);
        if let Some(previous) = previous {
            previous.close().await;
        }
    }

    /// Wire the transport's callbacks into this controller.
    ///
    /// With `intercept_results`, every message carrying both `result` and
    /// `id` is also re-emitted as a notification before normal handling.
    fn install_handlers(&self, transport: &dyn ClientTransport, intercept_results: bool) {
        let shared = Arc::clone(&self.shared);
        transport.set_resumption_token_handler(Arc::new(move |event_id: &str| {
            shared.persist(LAST_EVENT_ID_KEY, event_id);
        }));

        let shared = Arc::clone(&self.shared);
        transport.set_message_handler(Arc::new(move |incoming: IncomingMessage| {
            if intercept_results && incoming.is_result() {
                shared
                    .notification_observers
                    .emit(&ClientNotification::Replayed(incoming.message.clone()));
            }
            shared.handle_message(&incoming);
        }));
    }

    async fn grant(&self, server_url: &str) -> Result<Authorization, ClientError> {
        if let Some(grant) = self.authorizer.stored_grant(server_url) {
            return Ok(Authorization::Authorized(grant));
        }
        self.authorizer.authorize(server_url).await
    }

    /// Open a fresh session.
    ///
    /// # Errors
    /// Returns error if authorization or the handshake fails; the status is
    /// then `Error`.
    pub async fn connect(&self, server_url: &str) -> Result<ConnectOutcome, ClientError> {
        self.shared.set_status(ConnectionStatus::Connecting);
        self.replace_transport(None).await;

        let grant = match self.grant(server_url).await {
            Ok(Authorization::Authorized(grant)) => grant,
            Ok(Authorization::Redirect(url)) => {
                tracing::info!(server_url, "Authorization requires a redirect");
                self.shared.set_status(ConnectionStatus::Authorizing);
                return Ok(ConnectOutcome::Redirect(url));
            }
            Err(e) => {
                self.shared.fail(&e);
                return Err(e);
            }
        };

        match self.open_session(server_url, &grant).await {
            Ok(session_id) => {
                self.shared.set_status(ConnectionStatus::Connected);
                tracing::info!(server_url, session_id = %session_id, "Connected");
                Ok(ConnectOutcome::Connected { session_id })
            }
            Err(e) => {
                self.replace_transport(None).await;
                self.shared.fail(&e);
                Err(e)
            }
        }
    }

    async fn open_session(&self, server_url: &str, grant: &Grant) -> Result<String, ClientError> {
        let transport = self.factory.create(server_url, None, grant);
        self.install_handlers(transport.as_ref(), false);
        self.replace_transport(Some(Arc::clone(&transport))).await;
        // A fresh session starts a fresh event sequence.
        self.shared.forget(&[LAST_EVENT_ID_KEY]);

        transport.initialize().await?;
        let session_id = transport.session_id().ok_or(ClientError::MissingSessionId)?;
        transport.notify("notifications/initialized", None).await?;
        transport.open_standalone().await?;

        self.shared.persist(SESSION_ID_KEY, &session_id);
        self.shared.persist(SERVER_URL_KEY, server_url);
        Ok(session_id)
    }

    /// Rejoin `saved.session_id` on `server_url` and resume after
    /// `saved.last_event_id`.
    ///
    /// Returns `false` immediately when there is no session to rejoin. Any
    /// failure clears every persisted reconnection key, sets `Error`, and
    /// returns `false`. The caller must start over with `connect`.
    pub async fn reconnect(&self, server_url: &str, saved: &SavedSession) -> bool {
        let Some(session_id) = saved.session_id.clone() else {
            return false;
        };
        self.shared.set_status(ConnectionStatus::Reconnecting);
        self.replace_transport(None).await;

        match self
            .resume_session(server_url, session_id.clone(), saved.last_event_id.as_deref())
            .await
        {
            Ok(()) => {
                self.shared.persist(SERVER_URL_KEY, server_url);
                self.shared.set_status(ConnectionStatus::Connected);
                tracing::info!(server_url, session_id = %session_id, "Reconnected");
                true
            }
            Err(e) => {
                tracing::warn!(server_url, session_id = %session_id, "Reconnect failed: {e}");
                self.replace_transport(None).await;
                self.shared
                    .forget(&[SESSION_ID_KEY, LAST_EVENT_ID_KEY, SERVER_URL_KEY]);
                self.shared.fail(&e);
                false
            }
        }
    }

    async fn resume_session(
        &self,
        server_url: &str,
        session_id: String,
        last_event_id: Option<&str>,
    ) -> Result<(), ClientError> {
        let grant = match self.grant(server_url).await? {
            Authorization::Authorized(grant) => grant,
            Authorization::Redirect(url) => return Err(ClientError::RedirectRequired(url)),
        };

        let transport = self.factory.create(server_url, Some(session_id), &grant);
        self.install_handlers(transport.as_ref(), true);
        self.replace_transport(Some(Arc::clone(&transport))).await;
        match last_event_id {
            Some(last_event_id) => transport.resume(last_event_id).await,
            None => transport.open_standalone().await,
        }
    }

    /// Reconnect using whatever is persisted.
    pub async fn reconnect_saved(&self) -> bool {
        let saved = self.saved_session();
        let Some(server_url) = saved.server_url.clone() else {
            return false;
        };
        self.reconnect(&server_url, &saved).await
    }

    /// Send a request on the current connection.
    ///
    /// # Errors
    /// Returns [`ClientError::NotConnected`] without a connection, otherwise
    /// whatever the transport returns.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, ClientError> {
        let transport = self.current_transport().ok_or(ClientError::NotConnected)?;
        transport.request(method, params).await
    }

    /// List the tools the session currently exposes.
    ///
    /// # Errors
    /// Returns error if not connected or the request fails.
    pub async fn list_tools(&self) -> Result<Value, ClientError> {
        self.request("tools/list", None).await
    }

    /// Call a tool.
    ///
    /// # Errors
    /// Returns error if not connected or the request fails.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, ClientError> {
        self.request(
            "tools/call",
            Some(json!({ "name": name, "arguments": arguments })),
        )
        .await
    }

    /// The connection dropped on its own. Reconnection state is kept.
    pub async fn connection_lost(&self) {
        self.replace_transport(None).await;
        self.shared.set_status(ConnectionStatus::Disconnected);
    }

    /// Leave the session on purpose. Reconnection state is cleared.
    pub async fn disconnect(&self) {
        if let Some(transport) = self.current_transport() {
            if let Err(e) = transport.terminate().await {
                tracing::debug!("Session teardown failed: {e}");
            }
        }
        self.replace_transport(None).await;
        self.shared.forget(&[SESSION_ID_KEY, LAST_EVENT_ID_KEY]);
        self.shared.set_status(ConnectionStatus::Disconnected);
    }

    /// Disconnect and forget the server and its grant.
    pub async fn logout(&self) {
        let server_url = self.shared.storage.get(SERVER_URL_KEY);
        self.disconnect().await;
        if let Some(server_url) = server_url {
            self.authorizer.clear(&server_url);
        }
        self.shared.forget(&[SERVER_URL_KEY]);
    }
}
