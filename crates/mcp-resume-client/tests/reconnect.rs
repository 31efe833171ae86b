use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use mcp_resume_client::{
    ClientNotification, ConnectOutcome, ConnectionStatus, HttpTransportFactory, LAST_EVENT_ID_KEY,
    MemoryStorage, ReconnectStorage, ReconnectionController, SESSION_ID_KEY, SavedSession,
    StaticAuthorizer,
};
use mcp_resume_core::ResumeConfig;
use mcp_resume_session::{UpstreamClient, UpstreamError, UpstreamRequest};
use mcp_resume_transport::{McpService, ServerConfig, router};
use serde_json::{Value, json};
use tokio::sync::mpsc;

struct Echo;

#[async_trait]
impl UpstreamClient for Echo {
    async fn invoke(&self, request: UpstreamRequest<'_>) -> Result<Value, UpstreamError> {
        Ok(request.arguments.clone())
    }
}

async fn spawn_server(resume: ResumeConfig) -> (Arc<McpService>, String) {
    let config = ServerConfig {
        resume,
        ..ServerConfig::default()
    };
    let service = Arc::new(McpService::new(config, Arc::new(Echo)));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/mcp", listener.local_addr().unwrap());
    let app = router(Arc::clone(&service));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (service, url)
}

fn controller(storage: &Arc<MemoryStorage>) -> ReconnectionController {
    ReconnectionController::new(
        Arc::clone(storage) as Arc<dyn ReconnectStorage>,
        Arc::new(StaticAuthorizer::new("test-token")),
        Arc::new(HttpTransportFactory::new()),
    )
}

fn notifications(controller: &ReconnectionController) -> mpsc::UnboundedReceiver<ClientNotification> {
    let (tx, rx) = mpsc::unbounded_channel();
    controller.subscribe_notifications(move |n| {
        let _ = tx.send(n.clone());
    });
    rx
}

/// Wait for a server notification whose params carry `n`.
async fn expect_pushed(rx: &mut mpsc::UnboundedReceiver<ClientNotification>, n: i64) {
    let wait = async {
        while let Some(notification) = rx.recv().await {
            let matches = match &notification {
                ClientNotification::Server(message) => {
                    message.pointer("/params/n").and_then(Value::as_i64) == Some(n)
                }
                ClientNotification::Replayed(_) => false,
            };
            if matches {
                return;
            }
        }
        panic!("notification stream ended");
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .unwrap_or_else(|_| panic!("no notification with n={n}"));
}

async fn connect(controller: &ReconnectionController, url: &str) -> String {
    match controller.connect(url).await.unwrap() {
        ConnectOutcome::Connected { session_id } => session_id,
        ConnectOutcome::Redirect(url) => panic!("unexpected redirect to {url}"),
    }
}

#[tokio::test]
async fn test_missed_notifications_are_replayed_after_reconnect() {
    let (service, url) = spawn_server(ResumeConfig::default()).await;
    let storage = Arc::new(MemoryStorage::new());

    let first = controller(&storage);
    let mut seen = notifications(&first);
    let session_id = connect(&first, &url).await;
    assert_eq!(first.status(), ConnectionStatus::Connected);
    assert_eq!(first.request("ping", None).await.unwrap(), json!({}));

    service
        .notify(&session_id, "notifications/message", json!({ "n": 1 }))
        .unwrap();
    expect_pushed(&mut seen, 1).await;
    let marker = storage.get(LAST_EVENT_ID_KEY).unwrap();
    assert!(marker.starts_with("_GET_stream_"), "{marker}");

    first.connection_lost().await;
    assert_eq!(first.status(), ConnectionStatus::Disconnected);
    service
        .notify(&session_id, "notifications/message", json!({ "n": 2 }))
        .unwrap();

    let second = controller(&storage);
    let mut seen = notifications(&second);
    assert!(second.reconnect_saved().await);
    assert_eq!(second.status(), ConnectionStatus::Connected);
    expect_pushed(&mut seen, 2).await;

    // The resumed stream is live again.
    service
        .notify(&session_id, "notifications/message", json!({ "n": 3 }))
        .unwrap();
    expect_pushed(&mut seen, 3).await;
    assert_eq!(storage.get(SESSION_ID_KEY).as_deref(), Some(session_id.as_str()));

    let tools = second.list_tools().await.unwrap();
    assert!(tools["tools"].is_array());

    second.disconnect().await;
    assert!(service.session_streams(&session_id).is_none());
    assert_eq!(storage.get(SESSION_ID_KEY), None);
}

#[tokio::test]
async fn test_reconnect_to_evicted_stream_fails_cleanly() {
    let (_service, url) = spawn_server(ResumeConfig {
        max_streams: 2,
        ..ResumeConfig::default()
    })
    .await;
    let storage = Arc::new(MemoryStorage::new());

    let first = controller(&storage);
    connect(&first, &url).await;
    // The initialize response is the first recorded event.
    let initialize_marker = storage.get(LAST_EVENT_ID_KEY).unwrap();

    // Two more request streams push the initialize stream out.
    first.request("ping", None).await.unwrap();
    first.request("ping", None).await.unwrap();
    storage.set(LAST_EVENT_ID_KEY, &initialize_marker).unwrap();
    first.connection_lost().await;

    let second = controller(&storage);
    assert!(!second.reconnect_saved().await);
    assert_eq!(second.status(), ConnectionStatus::Error);
    assert!(second.last_error().is_some());
    assert_eq!(second.saved_session(), SavedSession::default());

    // A fresh connect still works.
    connect(&second, &url).await;
    assert_eq!(second.status(), ConnectionStatus::Connected);
}
