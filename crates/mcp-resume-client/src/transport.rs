//! What the reconnection controller needs from a wire transport.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::{auth::Grant, error::ClientError};

/// A message that arrived on a push stream.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingMessage {
    /// Event id the server assigned, if any.
    pub event_id: Option<String>,
    pub message: Value,
}

impl IncomingMessage {
    /// A response carries both an `id` and a `result`.
    #[must_use]
    pub fn is_result(&self) -> bool {
        self.message.get("id").is_some() && self.message.get("result").is_some()
    }

    /// A notification carries a `method` and no `id`.
    #[must_use]
    pub fn is_notification(&self) -> bool {
        self.message.get("method").is_some() && self.message.get("id").is_none()
    }
}

/// Receives every pushed message that no pending request claimed.
pub type MessageHandler = Arc<dyn Fn(IncomingMessage) + Send + Sync>;

/// Receives every event id as it arrives, on any stream.
pub type ResumptionTokenHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// A client connection to one server.
#[async_trait]
pub trait ClientTransport: Send + Sync {
    /// Session id, once known.
    fn session_id(&self) -> Option<String>;

    /// Install the handler for unclaimed messages.
    fn set_message_handler(&self, handler: MessageHandler);

    /// Install the handler for event ids.
    fn set_resumption_token_handler(&self, handler: ResumptionTokenHandler);

    /// Run the `initialize` handshake and learn the session id.
    ///
    /// # Errors
    /// Returns error if the server rejects the handshake.
    async fn initialize(&self) -> Result<Value, ClientError>;

    /// Send a request and wait for its response.
    ///
    /// # Errors
    /// Returns error on transport failure or a JSON-RPC error response.
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, ClientError>;

    /// Send a notification.
    ///
    /// # Errors
    /// Returns error if the server does not accept it.
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), ClientError>;

    /// Open the standalone push stream.
    ///
    /// # Errors
    /// Returns error if the server refuses the stream.
    async fn open_standalone(&self) -> Result<(), ClientError>;

    /// Resume the stream `last_event_id` belongs to, after that event.
    ///
    /// # Errors
    /// Returns [`ClientError::ResumeRejected`] if the server cannot replay.
    async fn resume(&self, last_event_id: &str) -> Result<(), ClientError>;

    /// End the session on the server.
    ///
    /// # Errors
    /// Returns error if the server could not be reached.
    async fn terminate(&self) -> Result<(), ClientError>;

    /// Stop all streams. Closing twice is fine.
    async fn close(&self);
}

/// Creates transports for the controller.
pub trait TransportFactory: Send + Sync {
    /// A transport for `server_url`.
    ///
    /// With `session_id` set, the transport joins that session and skips the
    /// `initialize` handshake.
    fn create(
        &self,
        server_url: &str,
        session_id: Option<String>,
        grant: &Grant,
    ) -> Arc<dyn ClientTransport>;
}
