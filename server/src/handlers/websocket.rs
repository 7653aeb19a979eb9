//! WebSocket handler for live dashboards.
//!
//! Handles WebSocket connections, answers refresh requests, and relies on
//! the event bridge to push engine events to every connection.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use dashsync_engine::SyncEngine;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::websocket::{ClientMessage, ConnectionManager, ServerMessage};
use crate::AppState;

use super::{handle_flush, handle_retry, handle_sync_all, handle_sync_module};

/// Query parameters accepted on `/ws`.
#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    /// Optional label identifying the dashboard instance
    pub client: Option<String>,
}

/// GET /ws - Upgrade to a WebSocket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
) -> Response {
    ws.on_upgrade(move |socket| {
        handle_websocket_connection(socket, state.engine, state.conn_manager, params.client)
    })
}

/// Handle an established WebSocket connection.
///
/// This function:
/// 1. Registers the connection with the manager
/// 2. Sends the current cache and connectivity so the client starts in sync
/// 3. Spawns a task to forward outgoing messages
/// 4. Processes incoming messages in a loop
/// 5. Cleans up on disconnect
pub async fn handle_websocket_connection(
    socket: WebSocket,
    engine: SyncEngine,
    conn_manager: Arc<ConnectionManager>,
    client: Option<String>,
) {
    // Split the socket into sender and receiver
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Create channel for sending messages to this connection
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    for message in initial_messages(&engine) {
        let _ = tx.send(message);
    }

    // Register with connection manager
    let conn_id = conn_manager.register(client.clone(), tx);

    tracing::info!(
        conn_id = %conn_id,
        client = ?client,
        "WebSocket client connected"
    );

    // Spawn task to forward messages from channel to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(text) => {
                    if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                        tracing::warn!("Failed to send WebSocket message: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to serialize WebSocket message: {}", e);
                }
            }
        }
    });

    // Process incoming messages
    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let response = process_message(&text, &engine).await;
                conn_manager.send_to(&conn_id, response);
            }
            Ok(Message::Binary(_)) => {
                tracing::warn!("Binary messages not supported");
            }
            Ok(Message::Ping(data)) => {
                tracing::trace!("Received ping: {} bytes", data.len());
            }
            Ok(Message::Pong(_)) => {
                tracing::trace!("Received pong");
            }
            Ok(Message::Close(_)) => {
                tracing::info!(conn_id = %conn_id, "WebSocket close frame received");
                break;
            }
            Err(e) => {
                tracing::warn!(conn_id = %conn_id, "WebSocket error: {}", e);
                break;
            }
        }
    }

    // Clean up
    conn_manager.unregister(&conn_id);
    send_task.abort();

    tracing::info!(
        conn_id = %conn_id,
        active_connections = conn_manager.connection_count(),
        "WebSocket client disconnected"
    );
}

/// Current cache and connectivity, framed like the live events.
pub fn initial_messages(engine: &SyncEngine) -> Vec<ServerMessage> {
    let mut messages = Vec::with_capacity(2);

    match serde_json::to_value(&*engine.cache()) {
        Ok(cache) => messages.push(ServerMessage::event("data_refresh", cache)),
        Err(e) => tracing::error!("Failed to serialize cache: {}", e),
    }
    messages.push(ServerMessage::event(
        "connectivity_changed",
        serde_json::to_value(engine.connectivity()).unwrap_or_default(),
    ));

    messages
}

/// Process a client message and return a server response.
pub async fn process_message(text: &str, engine: &SyncEngine) -> ServerMessage {
    let client_msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            return ServerMessage::error(format!("Invalid message format: {}", e), None);
        }
    };

    match client_msg {
        ClientMessage::Sync { request_id } => ServerMessage::SyncResult {
            report: handle_sync_all(engine).await,
            request_id,
        },

        ClientMessage::SyncModule {
            entity_type,
            user_id,
            request_id,
        } => match handle_sync_module(engine, &entity_type, user_id.as_deref()).await {
            Ok(outcome) => ServerMessage::ModuleResult {
                outcome,
                request_id,
            },
            Err(e) => ServerMessage::error(e.to_string(), request_id),
        },

        ClientMessage::Retry { request_id } => ServerMessage::SyncResult {
            report: handle_retry(engine).await,
            request_id,
        },

        ClientMessage::Flush { request_id } => match handle_flush(engine).await {
            Ok(drained) => ServerMessage::FlushResult {
                drained,
                request_id,
            },
            Err(e) => ServerMessage::error(e.to_string(), request_id),
        },

        ClientMessage::Ping => ServerMessage::Pong,
    }
}
