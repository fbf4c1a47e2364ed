use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::Response,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::auth;
use crate::gateway::{ConnCtx, Gateway};
use crate::models::{ClientEvent, RoomBroadcast, ServerEvent, SyncError};

type SharedSender = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// WebSocket handler
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    State(gateway): State<Arc<Gateway>>,
) -> Response {
    info!("New WebSocket connection attempt");
    let token = auth::get_ws_auth_token(&params, &headers);
    ws.on_upgrade(move |socket| handle_socket(socket, token, gateway))
}

/// Handle one WebSocket connection for its whole lifetime.
async fn handle_socket(socket: WebSocket, token: Option<String>, gateway: Arc<Gateway>) {
    gateway.connection_opened();

    // Generate unique connection ID to identify this client
    let conn_id = Uuid::new_v4().to_string();
    info!("WebSocket connection established with connection_id: {}", conn_id);

    // Split the socket into sender and receiver; the sender is shared
    // between this task and the room-forward task.
    let (sender, mut receiver) = socket.split();
    let sender: SharedSender = Arc::new(Mutex::new(sender));

    // Resolve the auth token before any room interaction.
    let user = match gateway.accept(token.as_deref()).await {
        Ok(user) => user,
        Err(e) => {
            error!("Rejecting connection {}: {}", conn_id, e);
            send_error(&sender, &e).await;
            gateway.connection_closed();
            return;
        }
    };
    let mut ctx = ConnCtx::new(conn_id, user.id.clone());
    let mut forward_task: Option<JoinHandle<()>> = None;

    // Listen for incoming messages; only text frames carry protocol events.
    while let Some(Ok(Message::Text(msg))) = receiver.next().await {
        let event: ClientEvent = match serde_json::from_str(&msg) {
            Ok(event) => event,
            Err(e) => {
                error!("Failed to parse message from {}: {}", ctx.conn_id, e);
                continue;
            }
        };

        // Every handler failure becomes one error frame on this
        // connection; nothing may escape the socket task.
        match event {
            ClientEvent::JoinRoom(payload) => {
                match gateway.join(&mut ctx, payload.room_id).await {
                    Ok(rx) => {
                        forward_task =
                            Some(spawn_forward_task(rx, sender.clone(), ctx.conn_id.clone()));
                    }
                    Err(e) => send_error(&sender, &e).await,
                }
            }
            ClientEvent::Message(payload) => {
                if let Err(e) = gateway.on_edit(&ctx, &payload).await {
                    send_error(&sender, &e).await;
                }
            }
            ClientEvent::VisibleFiles(payload) => {
                if let Err(e) = gateway.on_visible_files(&ctx, &payload).await {
                    send_error(&sender, &e).await;
                }
            }
        }
    }

    // Socket is gone: stop forwarding, then release presence.
    if let Some(task) = forward_task {
        task.abort();
    }
    if let Err(e) = gateway.on_disconnect(&ctx).await {
        error!("Disconnect cleanup failed for {}: {}", ctx.conn_id, e);
    }
    gateway.connection_closed();
    info!("WebSocket connection terminated for {}", ctx.conn_id);
}

/// Forward the room's broadcasts to this client, skipping its own events.
fn spawn_forward_task(
    mut rx: broadcast::Receiver<RoomBroadcast>,
    sender: SharedSender,
    conn_id: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(broadcast_msg) => {
                    // Skip messages from this connection to prevent echo.
                    if broadcast_msg.origin == conn_id {
                        continue;
                    }
                    let frame = match serde_json::to_string(&broadcast_msg.event) {
                        Ok(frame) => frame,
                        Err(e) => {
                            error!("Failed to serialize broadcast for {}: {}", conn_id, e);
                            continue;
                        }
                    };
                    if sender.lock().await.send(Message::Text(frame)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Connection {} lagged, skipped {} broadcast(s)", conn_id, n)
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

async fn send_error(sender: &SharedSender, err: &SyncError) {
    let event = ServerEvent::Error {
        message: err.client_message().to_string(),
    };
    match serde_json::to_string(&event) {
        Ok(frame) => {
            if sender.lock().await.send(Message::Text(frame)).await.is_err() {
                warn!("Client went away before the error frame was sent");
            }
        }
        Err(e) => error!("Failed to serialize error frame: {}", e),
    }
}
