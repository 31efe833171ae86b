//! Streamable HTTP transport over reqwest.

use std::sync::{
    Arc, Mutex, PoisonError, RwLock,
    atomic::{AtomicBool, AtomicI64, Ordering},
};

use async_trait::async_trait;
use eventsource_stream::{Event, Eventsource};
use futures::StreamExt;
use reqwest::{
    Method, RequestBuilder, Response, StatusCode,
    header::{ACCEPT, CONTENT_TYPE},
};
use serde_json::{Value, json};
use tokio::task::JoinHandle;

use crate::{
    auth::Grant,
    error::ClientError,
    transport::{
        ClientTransport, IncomingMessage, MessageHandler, ResumptionTokenHandler,
        TransportFactory,
    },
};

const SESSION_ID_HEADER: &str = "mcp-session-id";
const LAST_EVENT_ID_HEADER: &str = "last-event-id";
const PROTOCOL_VERSION: &str = "2025-03-26";
const EVENT_STREAM: &str = "text/event-stream";

#[derive(Default)]
struct Handlers {
    message: RwLock<Option<MessageHandler>>,
    token: RwLock<Option<ResumptionTokenHandler>>,
}

struct Inner {
    client: reqwest::Client,
    endpoint: String,
    bearer: Option<String>,
    session_id: RwLock<Option<String>>,
    handlers: Handlers,
    closed: AtomicBool,
}

impl Inner {
    fn session_id(&self) -> Option<String> {
        self.session_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn builder(&self, method: Method, accept: &str) -> RequestBuilder {
        let mut builder = self
            .client
            .request(method, &self.endpoint)
            .header(ACCEPT, accept);
        if let Some(token) = &self.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(session_id) = self.session_id() {
            builder = builder.header(SESSION_ID_HEADER, session_id);
        }
        builder
    }

    async fn post(&self, body: &Value) -> Result<Response, ClientError> {
        let response = self
            .builder(Method::POST, "application/json, text/event-stream")
            .json(body)
            .send()
            .await?;
        check_status(response).await
    }

    async fn open_get(&self, last_event_id: Option<&str>) -> Result<Response, ClientError> {
        let mut builder = self.builder(Method::GET, EVENT_STREAM);
        if let Some(last_event_id) = last_event_id {
            builder = builder.header(LAST_EVENT_ID_HEADER, last_event_id);
        }
        let response = builder.send().await?;
        if last_event_id.is_some() && response.status() == StatusCode::NOT_FOUND {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::ResumeRejected(body));
        }
        check_status(response).await
    }

    fn deliver(&self, incoming: IncomingMessage) {
        let handler = self
            .handlers
            .message
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match handler {
            Some(handler) => handler(incoming),
            None => tracing::debug!("Dropping pushed message, no handler installed"),
        }
    }

    /// Decode one SSE event, reporting its id first.
    fn decode(&self, event: Event) -> Option<IncomingMessage> {
        if event.data.is_empty() {
            return None;
        }
        let event_id = (!event.id.is_empty()).then_some(event.id);
        if let Some(event_id) = &event_id {
            let handler = self
                .handlers
                .token
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            if let Some(handler) = handler {
                handler(event_id);
            }
        }
        match serde_json::from_str(&event.data) {
            Ok(message) => Some(IncomingMessage { event_id, message }),
            Err(e) => {
                tracing::warn!("Ignoring undecodable event: {e}");
                None
            }
        }
    }

    /// Read a POST response until the answer to `id` arrives.
    async fn await_response(&self, response: Response, id: i64) -> Result<Value, ClientError> {
        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("application/json"));
        if is_json {
            let message: Value = response.json().await?;
            return into_result(message);
        }

        let mut events = response.bytes_stream().eventsource();
        while let Some(event) = events.next().await {
            let event = event.map_err(|e| ClientError::Sse(e.to_string()))?;
            let Some(incoming) = self.decode(event) else {
                continue;
            };
            let answers_us = incoming.message.get("id").and_then(Value::as_i64) == Some(id)
                && incoming.message.get("method").is_none();
            if answers_us {
                return into_result(incoming.message);
            }
            self.deliver(incoming);
        }
        Err(ClientError::StreamClosed)
    }

    async fn consume(&self, response: Response) -> Result<(), ClientError> {
        let mut events = response.bytes_stream().eventsource();
        while let Some(event) = events.next().await {
            let event = event.map_err(|e| ClientError::Sse(e.to_string()))?;
            if let Some(incoming) = self.decode(event) {
                self.deliver(incoming);
            }
        }
        Ok(())
    }
}

async fn check_status(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Status {
        status: status.as_u16(),
        body,
    })
}

fn into_result(message: Value) -> Result<Value, ClientError> {
    if let Some(error) = message.get("error") {
        return Err(ClientError::Rpc {
            code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
            message: error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        });
    }
    Ok(message.get("result").cloned().unwrap_or(Value::Null))
}

/// Read a push stream. After a resumed stream ends, fall back to the
/// standalone stream so server pushes keep arriving.
async fn listen(inner: Arc<Inner>, mut response: Response, mut resumed: bool) {
    loop {
        match inner.consume(response).await {
            Ok(()) => tracing::debug!(resumed, "Push stream ended"),
            Err(e) => tracing::warn!(resumed, "Push stream failed: {e}"),
        }
        if !resumed || inner.is_closed() {
            break;
        }
        resumed = false;
        match inner.open_get(None).await {
            Ok(next) => response = next,
            Err(e) => {
                tracing::warn!("Could not reopen the standalone stream: {e}");
                break;
            }
        }
    }
}

/// Client side of the Streamable HTTP transport.
pub struct HttpTransport {
    inner: Arc<Inner>,
    next_id: AtomicI64,
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

impl HttpTransport {
    /// Create a transport for `endpoint`, optionally joining an existing session.
    #[must_use]
    pub fn new(endpoint: &str, session_id: Option<String>, bearer: Option<String>) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint, session_id, bearer)
    }

    /// Same as [`HttpTransport::new`] with a shared client.
    #[must_use]
    pub fn with_client(
        client: reqwest::Client,
        endpoint: &str,
        session_id: Option<String>,
        bearer: Option<String>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                endpoint: endpoint.to_string(),
                bearer,
                session_id: RwLock::new(session_id),
                handlers: Handlers::default(),
                closed: AtomicBool::new(false),
            }),
            next_id: AtomicI64::new(1),
            listeners: Mutex::new(Vec::new()),
        }
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn spawn_listener(&self, response: Response, resumed: bool) {
        let handle = tokio::spawn(listen(Arc::clone(&self.inner), response, resumed));
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }
}

impl Drop for HttpTransport {
    fn drop(&mut self) {
        for handle in self
            .listeners
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            handle.abort();
        }
    }
}

#[async_trait]
impl ClientTransport for HttpTransport {
    fn session_id(&self) -> Option<String> {
        self.inner.session_id()
    }

    fn set_message_handler(&self, handler: MessageHandler) {
        *self
            .inner
            .handlers
            .message
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    fn set_resumption_token_handler(&self, handler: ResumptionTokenHandler) {
        *self
            .inner
            .handlers
            .token
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    async fn initialize(&self) -> Result<Value, ClientError> {
        let id = self.next_id();
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "initialize",
            "params": {
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION"),
                },
            },
        });
        let response = self.inner.post(&body).await?;
        let session_id = response
            .headers()
            .get(SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(ToOwned::to_owned)
            .ok_or(ClientError::MissingSessionId)?;
        *self
            .inner
            .session_id
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(session_id.clone());
        tracing::debug!(session_id = %session_id, "Session initialized");

        self.inner.await_response(response, id).await
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, ClientError> {
        let id = self.next_id();
        let mut body = json!({ "jsonrpc": "2.0", "id": id, "method": method });
        if let Some(params) = params {
            body["params"] = params;
        }
        let response = self.inner.post(&body).await?;
        self.inner.await_response(response, id).await
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), ClientError> {
        let mut body = json!({ "jsonrpc": "2.0", "method": method });
        if let Some(params) = params {
            body["params"] = params;
        }
        self.inner.post(&body).await?;
        Ok(())
    }

    async fn open_standalone(&self) -> Result<(), ClientError> {
        let response = self.inner.open_get(None).await?;
        self.spawn_listener(response, false);
        Ok(())
    }

    async fn resume(&self, last_event_id: &str) -> Result<(), ClientError> {
        let response = self.inner.open_get(Some(last_event_id)).await?;
        self.spawn_listener(response, true);
        Ok(())
    }

    async fn terminate(&self) -> Result<(), ClientError> {
        if self.inner.session_id().is_some() {
            let response = self
                .inner
                .builder(Method::DELETE, "application/json")
                .send()
                .await?;
            if response.status() != StatusCode::NOT_FOUND {
                check_status(response).await?;
            }
        }
        self.close().await;
        Ok(())
    }

    async fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let listeners: Vec<JoinHandle<()>> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in listeners {
            handle.abort();
        }
    }
}

/// Creates [`HttpTransport`]s sharing one connection pool.
#[derive(Debug, Clone, Default)]
pub struct HttpTransportFactory {
    client: reqwest::Client,
}

impl HttpTransportFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl TransportFactory for HttpTransportFactory {
    fn create(
        &self,
        server_url: &str,
        session_id: Option<String>,
        grant: &Grant,
    ) -> Arc<dyn ClientTransport> {
        Arc::new(HttpTransport::with_client(
            self.client.clone(),
            server_url,
            session_id,
            Some(grant.access_token.clone()),
        ))
    }
}
