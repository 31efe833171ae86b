//! Streamable HTTP endpoint.
//!
//! One path serves the whole protocol:
//! - `POST` carries a JSON-RPC message; requests are answered on their own
//!   SSE stream, notifications with `202 Accepted`.
//! - `GET` opens the standalone push stream, or resumes a stream after the
//!   event named in `Last-Event-ID`.
//! - `DELETE` ends the session.
//!
//! `PUT {path}/credentials/{provider}` attaches provider credentials to a
//! session and rebuilds its tools.

use std::{
    collections::HashMap,
    convert::Infallible,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{post, put},
};
use futures::{Stream, StreamExt};
use mcp_resume_core::{EventId, STANDALONE_STREAM_ID, StreamId};
use mcp_resume_session::{
    AuthContextStore, CapabilityBuilder, ManagerError, ProviderAuthInfo, SessionId,
    SessionManager, ToolError, ToolServer, UpstreamClient,
};
use serde_json::{Value, json};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tower_http::trace::TraceLayer;

use crate::{
    config::ServerConfig,
    error::TransportError,
    protocol::{
        self, JSONRPC_VERSION, JsonRpcMessage, LAST_EVENT_ID_HEADER, PROTOCOL_VERSION,
        SESSION_ID_HEADER, codes, methods,
    },
    reconcile::cleanup_stale_stream_mappings,
    registry::EventReceiver,
    streams::SessionStreams,
};

/// A JSON-RPC error on its way into a response.
#[derive(Debug)]
struct RpcError {
    code: i64,
    message: String,
    data: Option<Value>,
}

impl RpcError {
    fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

impl From<ToolError> for RpcError {
    fn from(err: ToolError) -> Self {
        let message = err.to_string();
        match err {
            ToolError::NotFound(_) | ToolError::InvalidArguments(_) => {
                Self::new(codes::INVALID_PARAMS, message)
            }
            ToolError::Auth(_) => Self::new(codes::REAUTH_REQUIRED, message),
            ToolError::MissingProvider(provider) | ToolError::ReauthRequired { provider } => Self {
                code: codes::REAUTH_REQUIRED,
                message,
                data: Some(json!({ "provider": provider })),
            },
            ToolError::Upstream(_) => Self::new(codes::INTERNAL_ERROR, message),
        }
    }
}

impl From<ManagerError> for RpcError {
    fn from(err: ManagerError) -> Self {
        Self::new(codes::NOT_FOUND, err.to_string())
    }
}

/// Server state shared by every request.
pub struct McpService {
    config: ServerConfig,
    sessions: SessionManager,
    streams: RwLock<HashMap<SessionId, Arc<SessionStreams>>>,
}

impl McpService {
    /// Create a service with the standard tool groups backed by `upstream`.
    #[must_use]
    pub fn new(config: ServerConfig, upstream: Arc<dyn UpstreamClient>) -> Self {
        let auth_store = Arc::new(AuthContextStore::from_config(&config.resume));
        let sessions = SessionManager::new(auth_store, CapabilityBuilder::new(upstream));
        Self::with_sessions(config, sessions)
    }

    /// Create a service around an existing session manager.
    #[must_use]
    pub fn with_sessions(config: ServerConfig, sessions: SessionManager) -> Self {
        Self {
            config,
            sessions,
            streams: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    #[must_use]
    pub const fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    fn read_streams(&self) -> RwLockReadGuard<'_, HashMap<SessionId, Arc<SessionStreams>>> {
        self.streams.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_streams(&self) -> RwLockWriteGuard<'_, HashMap<SessionId, Arc<SessionStreams>>> {
        self.streams.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stream state of a live session.
    #[must_use]
    pub fn session_streams(&self, session_id: &str) -> Option<Arc<SessionStreams>> {
        self.read_streams().get(session_id).cloned()
    }

    fn require_streams(&self, session_id: &str) -> Result<Arc<SessionStreams>, TransportError> {
        self.session_streams(session_id)
            .ok_or_else(|| TransportError::SessionNotFound(session_id.to_string()))
    }

    /// Start a session.
    pub async fn create_session(&self) -> SessionId {
        let session_id = self.sessions.create_session().await;
        self.write_streams().insert(
            session_id.clone(),
            Arc::new(SessionStreams::new(&self.config.resume)),
        );
        session_id
    }

    /// End a session: close its streams, drop its events and credentials.
    ///
    /// # Errors
    /// Returns error if the session does not exist.
    pub async fn close_session(&self, session_id: &str) -> Result<(), TransportError> {
        let streams = self.write_streams().remove(session_id);
        let existed = self.sessions.teardown(session_id).await;

        match streams {
            Some(streams) => {
                streams.close();
                Ok(())
            }
            None if existed => Ok(()),
            None => Err(TransportError::SessionNotFound(session_id.to_string())),
        }
    }

    /// Push a notification on the session's standalone stream.
    ///
    /// Returns `None` if the session does not exist. The event is recorded
    /// even if no standalone stream is open.
    pub fn notify(&self, session_id: &str, method: &str, params: Value) -> Option<EventId> {
        let streams = self.session_streams(session_id)?;
        Some(streams.emit(
            STANDALONE_STREAM_ID,
            protocol::notification(method, params),
        ))
    }

    /// Attach or refresh one provider's credentials and announce the new tool list.
    ///
    /// # Errors
    /// Returns error if the session does not exist.
    pub async fn attach_provider(
        &self,
        session_id: &str,
        provider: &str,
        info: ProviderAuthInfo,
    ) -> Result<Arc<ToolServer>, TransportError> {
        let server = self
            .sessions
            .attach_provider(session_id, provider, info)
            .await?;
        self.notify(session_id, methods::TOOLS_LIST_CHANGED, json!({}));
        tracing::info!(session_id, provider, groups = ?server.groups(), "Provider attached");
        Ok(server)
    }

    /// Register a stream for `request` and answer it in the background.
    fn open_request(
        self: &Arc<Self>,
        session_id: SessionId,
        streams: Arc<SessionStreams>,
        request: JsonRpcMessage,
    ) -> Result<Response, TransportError> {
        let (stream_id, rx) = streams.open_request_stream()?;
        tokio::spawn(Arc::clone(self).respond(session_id, streams, stream_id, request));
        Ok(sse(rx).into_response())
    }

    async fn respond(
        self: Arc<Self>,
        session_id: SessionId,
        streams: Arc<SessionStreams>,
        stream_id: StreamId,
        request: JsonRpcMessage,
    ) {
        let id = request.id.clone().unwrap_or(Value::Null);
        let reply = match self
            .dispatch(&session_id, &streams, &stream_id, &request)
            .await
        {
            Ok(result) => protocol::success(id, result),
            Err(e) => {
                tracing::debug!(
                    session_id = %session_id,
                    method = request.method.as_deref().unwrap_or_default(),
                    code = e.code,
                    "Request failed: {}",
                    e.message
                );
                protocol::error(Some(id), e.code, e.message, e.data)
            }
        };
        streams.emit(&stream_id, reply);
        streams.finish(&stream_id);
    }

    async fn dispatch(
        &self,
        session_id: &str,
        streams: &SessionStreams,
        stream_id: &str,
        request: &JsonRpcMessage,
    ) -> Result<Value, RpcError> {
        match request.method.as_deref().unwrap_or_default() {
            methods::INITIALIZE => Ok(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": { "listChanged": true } },
                "serverInfo": {
                    "name": self.config.server_name,
                    "version": env!("CARGO_PKG_VERSION"),
                },
            })),
            methods::PING => Ok(json!({})),
            methods::TOOLS_LIST => {
                let server = self.sessions.server(session_id).await?;
                Ok(json!({ "tools": server.list_tools() }))
            }
            methods::TOOLS_CALL => {
                self.call_tool(session_id, streams, stream_id, request.params.as_ref())
                    .await
            }
            other => Err(RpcError::new(
                codes::METHOD_NOT_FOUND,
                format!("Method not found: {other}"),
            )),
        }
    }

    async fn call_tool(
        &self,
        session_id: &str,
        streams: &SessionStreams,
        stream_id: &str,
        params: Option<&Value>,
    ) -> Result<Value, RpcError> {
        let params = params.ok_or_else(|| RpcError::new(codes::INVALID_PARAMS, "Missing params"))?;
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::new(codes::INVALID_PARAMS, "Missing tool name"))?;
        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

        if let Some(token) = params.pointer("/_meta/progressToken") {
            streams.emit(
                stream_id,
                protocol::notification(
                    methods::PROGRESS,
                    json!({ "progressToken": token, "progress": 0, "message": format!("Calling {name}") }),
                ),
            );
        }

        let server = self.sessions.server(session_id).await?;
        let ctx = self.sessions.tool_context(session_id);
        match server.call_tool(name, arguments, &ctx).await {
            Ok(value) => {
                let text = value.to_string();
                Ok(json!({
                    "content": [{ "type": "text", "text": text }],
                    "structuredContent": value,
                    "isError": false,
                }))
            }
            // Tool-level failures are results the model can read, not protocol errors.
            Err(ToolError::Upstream(message)) => Ok(json!({
                "content": [{ "type": "text", "text": message }],
                "isError": true,
            })),
            Err(e) => Err(e.into()),
        }
    }
}

/// Build the router for `service`.
///
/// # Example
/// ```ignore
/// let service = Arc::new(McpService::new(ServerConfig::from_env()?, upstream));
/// axum::serve(listener, router(service)).await?;
/// ```
#[must_use]
pub fn router(service: Arc<McpService>) -> Router {
    let path = service.config().endpoint_path.clone();
    Router::new()
        .route(
            &path,
            post(handle_post).get(handle_get).delete(handle_delete),
        )
        .route(
            &format!("{path}/credentials/{{provider}}"),
            put(handle_credentials),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

async fn handle_post(
    State(service): State<Arc<McpService>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, TransportError> {
    let message = parse_message(&body)?;
    let session_header = header_value(&headers, SESSION_ID_HEADER);

    if message.method.as_deref() == Some(methods::INITIALIZE) && session_header.is_none() {
        let session_id = service.create_session().await;
        let streams = service.require_streams(&session_id)?;
        let value = HeaderValue::from_str(&session_id)
            .map_err(|e| TransportError::BadRequest(e.to_string()))?;
        let mut response = service.open_request(session_id, streams, message)?;
        response
            .headers_mut()
            .insert(HeaderName::from_static(SESSION_ID_HEADER), value);
        return Ok(response);
    }

    let session_id = session_header.ok_or(TransportError::MissingSessionId)?;
    let streams = service.require_streams(&session_id)?;

    if !message.is_request() {
        if let Some(method) = message.method.as_deref() {
            tracing::debug!(session_id = %session_id, method, "Notification received");
        }
        return Ok(StatusCode::ACCEPTED.into_response());
    }

    service.open_request(session_id, streams, message)
}

async fn handle_get(
    State(service): State<Arc<McpService>>,
    headers: HeaderMap,
) -> Result<Response, TransportError> {
    let session_id = header_value(&headers, SESSION_ID_HEADER).ok_or(TransportError::MissingSessionId)?;
    let streams = service.require_streams(&session_id)?;
    let last_event_id = header_value(&headers, LAST_EVENT_ID_HEADER);

    cleanup_stale_stream_mappings(streams.registry(), last_event_id.as_deref());

    let rx = if let Some(last_event_id) = last_event_id {
        let (stream_id, rx) = streams.resume(&last_event_id)?;
        tracing::info!(
            session_id = %session_id,
            stream_id = %stream_id,
            last_event_id = %last_event_id,
            "Resumed stream"
        );
        rx
    } else {
        let rx = streams.open_standalone()?;
        tracing::debug!(session_id = %session_id, "Opened standalone stream");
        rx
    };

    Ok(sse(rx).into_response())
}

async fn handle_delete(
    State(service): State<Arc<McpService>>,
    headers: HeaderMap,
) -> Result<StatusCode, TransportError> {
    let session_id = header_value(&headers, SESSION_ID_HEADER).ok_or(TransportError::MissingSessionId)?;
    service.close_session(&session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_credentials(
    State(service): State<Arc<McpService>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    Json(info): Json<ProviderAuthInfo>,
) -> Result<Json<Value>, TransportError> {
    let session_id = header_value(&headers, SESSION_ID_HEADER).ok_or(TransportError::MissingSessionId)?;
    let server = service.attach_provider(&session_id, &provider, info).await?;
    let tools: Vec<String> = server.list_tools().into_iter().map(|tool| tool.name).collect();

    Ok(Json(json!({
        "provider": provider,
        "groups": server.groups(),
        "tools": tools,
    })))
}

fn parse_message(body: &[u8]) -> Result<JsonRpcMessage, TransportError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| TransportError::Parse(e.to_string()))?;
    if value.is_array() {
        return Err(TransportError::BadRequest(
            "batch requests are not supported".to_string(),
        ));
    }
    let message: JsonRpcMessage =
        serde_json::from_value(value).map_err(|e| TransportError::BadRequest(e.to_string()))?;
    if message.jsonrpc != JSONRPC_VERSION {
        return Err(TransportError::BadRequest(format!(
            "unsupported jsonrpc version {:?}",
            message.jsonrpc
        )));
    }
    Ok(message)
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

fn sse(rx: EventReceiver) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = UnboundedReceiverStream::new(rx).map(|event| {
        Ok(Event::default()
            .event("message")
            .id(event.event_id)
            .data(event.message.to_string()))
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}
