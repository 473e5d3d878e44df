//! In-process dashboard stand-in: a push WebSocket plus the REST list
//! endpoints used for re-fetches.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use deskpulse_client::{RealtimeConfig, RealtimeHub};
use deskpulse_protocol::{ChangeKind, ServerFrame};
use serde_json::Value;
use tokio::sync::broadcast;

#[derive(Debug, Clone)]
pub enum Push {
    Text(String),
    Close(u16),
    /// Drop the TCP connection without a close frame
    Abort,
}

#[derive(Default)]
pub struct Counters {
    pub opened: AtomicUsize,
    pub live: AtomicUsize,
    pub fetches: AtomicUsize,
}

struct MockState {
    push: broadcast::Sender<Push>,
    counters: Arc<Counters>,
    collections: Mutex<HashMap<String, Value>>,
    channels_seen: Mutex<Vec<String>>,
    fetch_queries: Mutex<Vec<String>>,
}

pub struct MockServer {
    pub base: String,
    state: Arc<MockState>,
}

impl MockServer {
    pub async fn start() -> Self {
        let (push, _) = broadcast::channel(64);
        let state = Arc::new(MockState {
            push,
            counters: Arc::new(Counters::default()),
            collections: Mutex::new(HashMap::new()),
            channels_seen: Mutex::new(Vec::new()),
            fetch_queries: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/ws", get(ws_handler))
            .route("/api/{resource}", get(collection_handler))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base: format!("http://127.0.0.1:{}", port),
            state,
        }
    }

    /// Hub pointed at this server with short delays.
    pub fn hub(&self) -> RealtimeHub {
        let config = RealtimeConfig::new(self.base.clone())
            .with_reconnect_delay(Duration::from_millis(100))
            .with_refetch_timeout(Duration::from_secs(2));
        RealtimeHub::new(config).unwrap()
    }

    pub fn set_collection(&self, resource: &str, body: Value) {
        self.state
            .collections
            .lock()
            .unwrap()
            .insert(resource.to_string(), body);
    }

    /// Subsequent fetches of `resource` answer 404.
    pub fn clear_collection(&self, resource: &str) {
        self.state.collections.lock().unwrap().remove(resource);
    }

    pub fn push(&self, push: Push) {
        let _ = self.state.push.send(push);
    }

    pub fn push_json(&self, frame: Value) {
        self.push(Push::Text(frame.to_string()));
    }

    pub fn push_change(&self, kind: ChangeKind, data: Value) {
        self.push(Push::Text(ServerFrame::new(kind, data).to_json()));
    }

    pub fn opened(&self) -> usize {
        self.state.counters.opened.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.state.counters.live.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.state.counters.fetches.load(Ordering::SeqCst)
    }

    pub fn channels_seen(&self) -> Vec<String> {
        self.state.channels_seen.lock().unwrap().clone()
    }

    pub fn fetch_queries(&self) -> Vec<String> {
        self.state.fetch_queries.lock().unwrap().clone()
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<Arc<MockState>>,
) -> impl IntoResponse {
    if let Some(channel) = params.get("channel") {
        state.channels_seen.lock().unwrap().push(channel.clone());
    }
    // Subscribe before the upgrade so nothing pushed after the client sees
    // the connection as open can be missed.
    let rx = state.push.subscribe();
    let counters = state.counters.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, rx, counters))
}

async fn handle_socket(
    mut socket: WebSocket,
    mut rx: broadcast::Receiver<Push>,
    counters: Arc<Counters>,
) {
    counters.opened.fetch_add(1, Ordering::SeqCst);
    counters.live.fetch_add(1, Ordering::SeqCst);

    loop {
        tokio::select! {
            push = rx.recv() => match push {
                Ok(Push::Text(text)) => {
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Ok(Push::Close(code)) => {
                    let frame = CloseFrame {
                        code,
                        reason: Utf8Bytes::from_static(""),
                    };
                    let _ = socket.send(Message::Close(Some(frame))).await;
                    break;
                }
                Ok(Push::Abort) | Err(_) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    counters.live.fetch_sub(1, Ordering::SeqCst);
}

async fn collection_handler(
    Path(resource): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<Arc<MockState>>,
) -> Result<Json<Value>, StatusCode> {
    state.counters.fetches.fetch_add(1, Ordering::SeqCst);

    let mut query: Vec<String> = params.iter().map(|(k, v)| format!("{k}={v}")).collect();
    query.sort();
    state
        .fetch_queries
        .lock()
        .unwrap()
        .push(format!("{resource}?{}", query.join("&")));

    state
        .collections
        .lock()
        .unwrap()
        .get(&resource)
        .cloned()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

/// Poll until `check` passes or five seconds elapse.
pub async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..250 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
