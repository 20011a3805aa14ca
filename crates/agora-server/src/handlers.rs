//! Connection handlers for the Agora server.
//!
//! This module handles the connection lifecycle: upgrade, registration,
//! the session loop, and teardown.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use agora_core::{ClientType, ConnectParams, Hub, LogSink, Outbound};
use agora_protocol::Envelope;

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};

/// Shared server state.
pub struct AppState {
    /// The message bus.
    pub hub: Arc<Hub>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Build the hub from the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the history store or authorizer cannot be built.
    pub fn new(config: Config) -> Result<Self> {
        let store = config.build_store()?;
        let authorizer = Arc::new(config.authorizer()?);
        let hub = Arc::new(Hub::new(
            config.hub_config(),
            store,
            authorizer,
            Arc::new(LogSink),
        ));

        Ok(Self { hub, config })
    }
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone())?);

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
        let hub = Arc::clone(&state.hub);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(10));
            loop {
                tick.tick().await;
                metrics::sync_hub_gauges(&hub.counts());
            }
        });
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Agora server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    axum::serve(listener, app(state)).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let counts = state.hub.counts();
    axum::Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "clients": counts.clients,
        "history_available": counts.history_available,
    }))
}

/// Connection parameters carried in the upgrade query string.
#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    pub client_id: Option<String>,
    pub client_type: Option<String>,
    pub screen_name: Option<String>,
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<SessionQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, query, state))
}

/// Handle one WebSocket session from registration to teardown.
async fn handle_socket(socket: WebSocket, query: SessionQuery, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();
    let (mut sender, mut receiver) = socket.split();

    let client_type = match query.client_type.as_deref() {
        None => ClientType::default(),
        Some(raw) => match ClientType::parse(raw) {
            Some(client_type) => client_type,
            None => {
                let reply = Envelope::error_reply(
                    None,
                    "INVALID_ARGS",
                    &format!("unknown client_type: {raw}"),
                );
                send_envelope(&mut sender, &reply).await;
                let _ = sender.close().await;
                return;
            }
        },
    };

    let metadata = match query.screen_name {
        Some(name) => json!({ "screen_name": name }),
        None => serde_json::Value::Null,
    };

    let handle = match state.hub.connect(ConnectParams {
        client_id: query.client_id,
        client_type,
        metadata,
    }) {
        Ok(handle) => handle,
        Err(e) => {
            warn!(code = e.code(), error = %e, "Connection rejected");
            let reply = Envelope::error_reply(None, e.code(), &e.to_string());
            send_envelope(&mut sender, &reply).await;
            let _ = sender.close().await;
            return;
        }
    };
    let client_id = handle.id().to_string();
    debug!(client = %client_id, client_type = client_type.as_str(), "WebSocket connected");

    let heartbeat_every = Duration::from_millis(state.config.heartbeat.interval_ms.max(1));
    let idle_timeout = Duration::from_millis(state.config.heartbeat.timeout_ms);
    let mut heartbeat = tokio::time::interval_at(
        tokio::time::Instant::now() + heartbeat_every,
        heartbeat_every,
    );

    let mut close_reason = "socket closed";

    loop {
        tokio::select! {
            biased;

            // Drain the send queue ahead of new inbound work
            outbound = handle.queue().next() => {
                match outbound {
                    Some(Outbound::Frame(frame)) => {
                        metrics::record_envelope(frame.len(), "outbound");
                        let Ok(text) = String::from_utf8(frame.to_vec()) else {
                            continue;
                        };
                        if sender.send(Message::Text(text)).await.is_err() {
                            close_reason = "send failed";
                            break;
                        }
                    }
                    Some(Outbound::Close(reason)) => {
                        debug!(client = %client_id, reason = %reason, "Closing session");
                        let frame = CloseFrame {
                            code: close_code::POLICY,
                            reason: reason.into(),
                        };
                        let _ = sender.send(Message::Close(Some(frame))).await;
                        close_reason = "server closed";
                        break;
                    }
                    None => {
                        close_reason = "queue terminated";
                        break;
                    }
                }
            }

            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        metrics::record_envelope(text.len(), "inbound");
                        let start = Instant::now();
                        state.hub.handle_inbound(&client_id, text.as_bytes()).await;
                        metrics::record_dispatch_latency(start.elapsed().as_secs_f64());
                    }
                    Some(Ok(Message::Binary(data))) => {
                        metrics::record_envelope(data.len(), "inbound");
                        let start = Instant::now();
                        state.hub.handle_inbound(&client_id, &data).await;
                        metrics::record_dispatch_latency(start.elapsed().as_secs_f64());
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            close_reason = "send failed";
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        handle.touch();
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(client = %client_id, "Received close frame");
                        close_reason = "client closed";
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(client = %client_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        close_reason = "socket error";
                        break;
                    }
                    None => {
                        close_reason = "stream ended";
                        break;
                    }
                }
            }

            _ = heartbeat.tick() => {
                if handle.idle_for() >= idle_timeout {
                    debug!(client = %client_id, "Idle timeout");
                    let frame = CloseFrame {
                        code: close_code::AWAY,
                        reason: "idle timeout".into(),
                    };
                    let _ = sender.send(Message::Close(Some(frame))).await;
                    close_reason = "idle timeout";
                    break;
                }
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    close_reason = "send failed";
                    break;
                }
            }
        }
    }

    state.hub.disconnect(&client_id, close_reason);
    debug!(client = %client_id, reason = close_reason, "WebSocket disconnected");
}

/// Send one envelope directly, outside the queue path.
async fn send_envelope(sender: &mut SplitSink<WebSocket, Message>, envelope: &Envelope) {
    if let Ok(text) = serde_json::to_string(envelope) {
        metrics::record_envelope(text.len(), "outbound");
        let _ = sender.send(Message::Text(text)).await;
    }
}
