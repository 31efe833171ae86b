//! Client side of resumable sessions.
//!
//! [`ReconnectionController`] keeps `{sessionId, lastEventId, serverUrl}` in a
//! [`ReconnectStorage`] and uses it to rejoin a session after the connection
//! drops, replaying whatever was missed. [`HttpTransport`] speaks Streamable
//! HTTP to the server.

pub mod auth;
pub mod controller;
pub mod error;
pub mod http;
pub mod status;
pub mod storage;
pub mod transport;

pub use auth::{Authorization, Authorizer, Grant, StaticAuthorizer};
pub use controller::{ConnectOutcome, ReconnectionController};
pub use error::{ClientError, StorageError};
pub use http::{HttpTransport, HttpTransportFactory};
pub use status::{ClientNotification, ConnectionStatus, Observers, Subscription};
pub use storage::{
    FileStorage, LAST_EVENT_ID_KEY, MemoryStorage, ReconnectStorage, SERVER_URL_KEY,
    SESSION_ID_KEY, SavedSession,
};
pub use transport::{
    ClientTransport, IncomingMessage, MessageHandler, ResumptionTokenHandler, TransportFactory,
};
