//! Connection handlers for the roost server.
//!
//! This module handles the connection lifecycle and frame processing. Each
//! socket gets a writer queue; core services enqueue outbound frames and this
//! loop drains them, so no registry lock is ever held across socket I/O.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use bytes::BytesMut;
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use roost_core::{
    generate_connection_id, EventSender, MessageDispatcher, PresenceFanout, SessionRegistry,
};
use roost_protocol::{codec, codes, ClientFrame, Presence, ServerFrame, UserId, PROTOCOL_VERSION};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Shared server state, constructed and injected at startup.
pub struct AppState {
    /// The session registry.
    pub registry: Arc<SessionRegistry>,
    /// Presence fan-out and status protocol.
    pub fanout: Arc<PresenceFanout>,
    /// Message dispatch.
    pub dispatcher: Arc<MessageDispatcher>,
    /// Server configuration.
    pub config: Config,
}

/// Identity of an already-authenticated connection.
///
/// Produced by the external auth collaborator (the gateway validates the
/// session token and rewrites the query string) before this core is invoked.
#[derive(Debug, Deserialize)]
struct ConnectIdentity {
    user_id: UserId,
    display_name: String,
}

/// Run the HTTP/WebSocket server until the shutdown signal fires.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(state: Arc<AppState>) -> Result<()> {
    let config = state.config.clone();

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            warn!("Failed to start metrics server: {}", e);
        }
    }

    // Build router
    let app = Router::new()
        .route(&config.ws_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("roost server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}{}", addr, config.ws_path);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(identity): Query<ConnectIdentity>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state, identity))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, identity: ConnectIdentity) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    let connection_id = generate_connection_id();
    let user_id = identity.user_id;

    debug!(connection = %connection_id, user = user_id, "WebSocket connected");

    // Split the WebSocket
    let (mut sender, mut receiver) = socket.split();

    // Writer queue: core services enqueue, this task drains.
    let (outbox, mut outbox_rx) = mpsc::unbounded_channel();

    let came_online = state.registry.add_session(
        user_id,
        connection_id.clone(),
        identity.display_name.clone(),
        outbox.clone(),
    );

    // First frame: who you are and which buddies are reachable right now.
    let reachable_buddies = match state.fanout.roster(user_id).await {
        Ok(roster) => roster,
        Err(e) => {
            warn!(user = user_id, error = %e, "Roster lookup failed");
            let _ = outbox.send(e.to_frame());
            Vec::new()
        }
    };
    let hello = ServerFrame::ConnectionEstablished {
        user_id,
        reachable_buddies,
        heartbeat_ms: state.config.heartbeat.interval_ms,
        protocol: PROTOCOL_VERSION,
    };
    if send_frame(&mut sender, &hello).await.is_err() {
        warn!(connection = %connection_id, "Failed to send connection-established");
        remove_and_announce(&state, &connection_id).await;
        return;
    }

    // 0->1 edge: durable Online write, backlog flush, buddy fan-out. The
    // flushed frames are already queued on the outbox, behind nothing, so
    // the client sees them right after connection-established.
    match state
        .fanout
        .session_connected(user_id, &identity.display_name, came_online)
        .await
    {
        Ok(flushed) if flushed > 0 => metrics::record_backlog_flush(flushed),
        Ok(_) => {}
        Err(e) => {
            warn!(user = user_id, error = %e, "Connect edge failed");
            metrics::record_error("connect");
            let _ = outbox.send(e.to_frame());
        }
    }

    // Read buffer for partial frames
    let mut read_buffer = BytesMut::with_capacity(4096);

    // Frame processing loop
    'conn: loop {
        tokio::select! {
            biased;

            // Drain outbound frames queued by core services
            Some(frame) = outbox_rx.recv() => {
                if send_frame(&mut sender, &frame).await.is_err() {
                    break 'conn;
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        if data.len() > state.config.limits.max_frame_bytes {
                            warn!(
                                connection = %connection_id,
                                bytes = data.len(),
                                "Inbound frame over size limit"
                            );
                            metrics::record_error("protocol");
                            let frame = ServerFrame::error(codes::PROTOCOL, "frame too large");
                            let _ = send_frame(&mut sender, &frame).await;
                            break 'conn;
                        }

                        let start = Instant::now();
                        metrics::record_message(data.len(), "inbound");
                        read_buffer.extend_from_slice(&data);

                        loop {
                            match codec::decode_from::<ClientFrame>(&mut read_buffer) {
                                Ok(Some(frame)) => {
                                    state.registry.touch_activity(&connection_id);
                                    handle_frame(frame, user_id, &outbox, &state).await;
                                }
                                Ok(None) => break,
                                Err(e) => {
                                    // Length-prefixed framing cannot resync
                                    // after a bad prefix; drop the connection.
                                    warn!(connection = %connection_id, error = %e, "Frame decode error");
                                    metrics::record_error("protocol");
                                    let frame =
                                        ServerFrame::error(codes::PROTOCOL, e.to_string());
                                    let _ = send_frame(&mut sender, &frame).await;
                                    break 'conn;
                                }
                            }
                        }

                        metrics::record_frame_latency(start.elapsed().as_secs_f64());
                    }
                    Some(Ok(Message::Text(text))) => {
                        // Treat text as binary
                        read_buffer.extend_from_slice(text.as_bytes());
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break 'conn;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        // Ignore pongs
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break 'conn;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break 'conn;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break 'conn;
                    }
                }
            }
        }
    }

    remove_and_announce(&state, &connection_id).await;
    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Remove the session and, on the user's last session, run the offline edge.
async fn remove_and_announce(state: &Arc<AppState>, connection_id: &str) {
    // Unknown connection ids are cleanup races, silently ignored.
    let Some(removed) = state.registry.remove_session(connection_id) else {
        return;
    };
    debug!(
        user = removed.user_id,
        sessions = state.registry.stats().session_count,
        "Session removed"
    );
    if let Err(e) = state
        .fanout
        .session_disconnected(removed.user_id, removed.went_offline)
        .await
    {
        warn!(user = removed.user_id, error = %e, "Disconnect fan-out failed");
        metrics::record_error("disconnect");
    }
}

/// Handle a decoded client frame.
///
/// Errors are translated to error frames on this connection's outbox only;
/// they never reach another user and never tear down the registry.
async fn handle_frame(
    frame: ClientFrame,
    user_id: UserId,
    outbox: &EventSender,
    state: &Arc<AppState>,
) {
    debug!(user = user_id, frame = frame.name(), "Client frame");

    match frame {
        ClientFrame::StatusChange { status, away_text } => {
            let Ok(target) = status.parse::<Presence>() else {
                // Rejected to the requesting socket only, never broadcast.
                metrics::record_error("status");
                let _ = outbox.send(ServerFrame::error(
                    codes::INVALID_STATUS,
                    format!("Invalid status value: {status}"),
                ));
                return;
            };
            match state.fanout.set_status(user_id, target, away_text).await {
                Ok(()) => metrics::record_presence_change(),
                Err(e) => {
                    warn!(user = user_id, error = %e, "Status change failed");
                    metrics::record_error("status");
                    let _ = outbox.send(e.to_frame());
                }
            }
        }

        ClientFrame::SendMessage { to, content } => {
            match state.dispatcher.send_message(user_id, to, &content).await {
                Ok(outcome) => {
                    if !outcome.delivered {
                        metrics::record_queued_message();
                    }
                }
                Err(e) => {
                    debug!(user = user_id, error = %e, "Send rejected");
                    metrics::record_error("dispatch");
                    let _ = outbox.send(e.to_frame());
                }
            }
        }

        ClientFrame::MarkRead { from } => {
            if let Err(e) = state.dispatcher.mark_read(user_id, from).await {
                warn!(user = user_id, error = %e, "Mark read failed");
                metrics::record_error("dispatch");
                let _ = outbox.send(e.to_frame());
            }
        }

        ClientFrame::Typing { to, is_typing } => {
            state.dispatcher.typing(user_id, to, is_typing);
        }

        ClientFrame::Heartbeat => {
            let _ = outbox.send(ServerFrame::HeartbeatAck);
        }
    }
}

/// Send a frame to the WebSocket.
async fn send_frame(
    sender: &mut SplitSink<WebSocket, Message>,
    frame: &ServerFrame,
) -> Result<()> {
    let data = codec::encode(frame)?;
    metrics::record_message(data.len(), "outbound");
    sender.send(Message::Binary(data.to_vec())).await?;
    Ok(())
}
