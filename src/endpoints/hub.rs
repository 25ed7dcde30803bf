use axum::body::Body;
use axum::debug_handler;
use axum::extract::ws::{self, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::Response;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{Span, instrument};

use crate::hub::protocol::ClientMessage;
use crate::hub::registry::ConnectionRegistry;
use crate::hub::{BroadcastMessage, CONNECTED_EVENT, ConnectionId, Frame};
use crate::state::SharedState;

#[debug_handler]
#[instrument(skip_all)]
pub async fn websocket(
    State(state): State<SharedState>,
    websocket_upgrade: WebSocketUpgrade,
) -> Response<Body> {
    websocket_upgrade.on_upgrade(|socket| serve_connection(state, socket))
}

#[instrument(skip_all, fields(connection.id = tracing::field::Empty))]
async fn serve_connection(state: SharedState, socket: WebSocket) {
    let (frame_tx, mut frame_rx) = mpsc::channel::<Frame>(state.connection_buffer.get());
    let welcome_tx = frame_tx.clone();
    let Ok(id) = state
        .registry
        .register(frame_tx)
        .await
        .inspect_err(|error| tracing::warn!(?error, "Refusing websocket connection"))
    else {
        return;
    };
    Span::current().record("connection.id", id.get());

    let welcome = BroadcastMessage::new(CONNECTED_EVENT, json!({ "connectionId": id }));
    if let Ok(frame) = welcome.to_frame() {
        let _ = welcome_tx.send(frame).await;
    }
    drop(welcome_tx);

    let (mut websocket_tx, mut websocket_rx) = socket.split();

    // Ends when the registry drops this connection's sender or the socket fails.
    let mut forwarder = tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            match websocket_tx.send(ws::Message::Text(frame)).await {
                Ok(()) => tracing::trace!("Websocket TX ok"),
                Err(error) => {
                    tracing::warn!(?error, "Websocket TX failed (likely disconnect)");
                    break;
                }
            }
        }
        let _ = websocket_tx.close().await;
    });

    let registry = &state.registry;
    let receive = async {
        while let Some(Ok(message)) = websocket_rx.next().await {
            match message {
                ws::Message::Text(text) => handle_client_frame(registry, id, text.as_str()).await,
                ws::Message::Close(_) => break,
                _ => tracing::trace!("Ignoring non-text frame"),
            }
        }
    };

    tokio::select! {
        () = receive => tracing::debug!("Client closed the connection"),
        _ = &mut forwarder => tracing::debug!("Outbound stream ended"),
    }

    forwarder.abort();
    registry.unregister(id).await;
}

async fn handle_client_frame(registry: &ConnectionRegistry, id: ConnectionId, text: &str) {
    tracing::trace!(data = text, "RECV on websocket");
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Join { group }) => {
            registry.join_group(id, &group).await;
        }
        Ok(ClientMessage::Leave { group }) => {
            registry.leave_group(id, &group).await;
        }
        Err(error) => tracing::debug!(?error, "Ignoring malformed client frame"),
    }
}
