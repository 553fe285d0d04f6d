use futures_util::SinkExt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use bridgeview::core::{Action, AgentStatus, ConnectionState, Credential, ReconnectConfig};
use bridgeview::sync::{ActionDispatcher, AgentWatch};
use bridgeview::{BridgeClient, Config, RealtimeChannel, Reconciler, SessionContext};

const POLL: Duration = Duration::from_millis(200);

fn agent_body(status: &str) -> serde_json::Value {
    serde_json::json!({
        "status": "success",
        "data": {"agent": {
            "id": "a1",
            "name": "Build bot",
            "status": status,
            "last_active": "2025-03-01T10:00:00",
            "current_task": null,
            "meta": {"model": "gemini"}
        }}
    })
}

async fn serve_agent(server: &MockServer, status: &str) {
    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/agents/a1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(agent_body(status)))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/agents/a1/logs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "success",
            "data": {"logs": [
                {"timestamp": "2025-03-01T10:00:00", "level": "user", "message": "[You]: hello"},
                {"timestamp": "2025-03-01T10:00:01", "level": "system", "message": "started"}
            ]}
        })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/agents/a1/start"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "success",
            "message": "Agent started"
        })))
        .mount(server)
        .await;
}

async fn agent_fetches(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|request| request.url.path() == "/agents/a1")
        .count()
}

async fn wait_for(what: &str, mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {}", what));
}

/// One-connection push server. Returns its address, a sender for frames and
/// the request URI it saw.
async fn push_server() -> (String, mpsc::UnboundedSender<String>, Arc<Mutex<Option<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<String>();
    let seen_uri = Arc::new(Mutex::new(None));

    let uri_slot = seen_uri.clone();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_hdr_async(
            stream,
            |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                *uri_slot.lock().unwrap() = Some(request.uri().to_string());
                Ok(response)
            },
        )
        .await
        .unwrap();
        while let Some(frame) = frame_rx.recv().await {
            if ws.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    (addr, frame_tx, seen_uri)
}

#[tokio::test]
async fn test_start_push_and_poll_against_live_servers() {
    let api = MockServer::start().await;
    serve_agent(&api, "stopped").await;
    let (ws_addr, frames, seen_uri) = push_server().await;

    let mut config = Config::default();
    config.server.api_url = api.uri();
    config.server.realtime_url = format!("ws://{}/ws/realtime", ws_addr);
    config.sync.poll_interval_ms = POLL.as_millis() as u64;
    let reconnect = ReconnectConfig {
        enabled: false,
        ..ReconnectConfig::default()
    };

    let context = SessionContext::new(&config, Credential::new("tok-1")).unwrap();
    let client = Arc::new(BridgeClient::new(&context, &config).unwrap());
    let reconciler = Reconciler::new(client, config.sync.apply_policy);
    let dispatcher = ActionDispatcher::new(reconciler.clone());

    let channel = RealtimeChannel::open(&context, reconnect);
    let watch = AgentWatch::activate(reconciler.clone(), channel, "a1", config.sync.poll_interval());

    let state = watch.watch_connection();
    wait_for("the push channel to open", || {
        *state.borrow() == ConnectionState::Open
    })
    .await;
    assert_eq!(
        seen_uri.lock().unwrap().as_deref(),
        Some("/ws/realtime?token=tok-1")
    );

    let mut status = None;
    for _ in 0..100 {
        status = reconciler.status("a1").await;
        if status.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(status, Some(AgentStatus::Stopped));
    assert!(!watch.is_polling());
    let view = watch.view().await;
    assert_eq!(view.transcript.len(), 2);

    // Start: the forced refresh already sees the bridge's new status
    serve_agent(&api, "starting").await;
    dispatcher.dispatch("a1", Action::Start).await.unwrap();
    assert_eq!(reconciler.status("a1").await, Some(AgentStatus::Starting));

    tokio::time::sleep(POLL * 3).await;
    assert_eq!(agent_fetches(&api).await, 1);
    assert!(!watch.is_polling());

    // A malformed frame is dropped; the next one triggers a refresh
    serve_agent(&api, "running").await;
    frames.send("not json".to_string()).unwrap();
    frames
        .send(r#"{"event_type":"status_change","agent_id":"a1","payload":{}}"#.to_string())
        .unwrap();
    wait_for("polling to start", || watch.is_polling()).await;
    assert_eq!(reconciler.status("a1").await, Some(AgentStatus::Running));

    let before = agent_fetches(&api).await;
    tokio::time::sleep(POLL * 3 + POLL / 2).await;
    assert!(agent_fetches(&api).await >= before + 2);

    // Once the agent stops, polling ends within one tick
    serve_agent(&api, "stopped").await;
    wait_for("polling to stop", || !watch.is_polling()).await;
    tokio::time::sleep(POLL).await;
    let settled = agent_fetches(&api).await;
    tokio::time::sleep(POLL * 3).await;
    assert_eq!(agent_fetches(&api).await, settled);

    watch.deactivate().await;
    assert!(reconciler.view("a1").await.is_none());
}
