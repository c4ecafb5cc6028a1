//! WebSocket bridge between a client socket and its voice session

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use super::ApiState;
use crate::session::{Inbound, Outbound, run_session};

/// Client frames buffered ahead of the session loop
const INBOUND_CAPACITY: usize = 64;

/// Session frames buffered ahead of the socket writer
const OUTBOUND_CAPACITY: usize = 256;

/// Build WebSocket router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .with_state(state)
}

async fn ws_upgrade(State(state): State<Arc<ApiState>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

fn encode(frame: Outbound) -> Option<Message> {
    match frame {
        Outbound::Message(message) => match serde_json::to_string(&message) {
            Ok(text) => Some(Message::Text(text.into())),
            Err(e) => {
                tracing::warn!(error = %e, "cannot encode server message");
                None
            }
        },
        Outbound::Audio(data) => Some(Message::Binary(data.into())),
        Outbound::Close => Some(Message::Close(None)),
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<ApiState>) {
    let _guard = state.track_session();
    let (mut sender, mut receiver) = socket.split();
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Outbound>(OUTBOUND_CAPACITY);

    tracing::info!(sessions = state.active_sessions(), "WebSocket connected");

    let send_task = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let closing = matches!(frame, Outbound::Close);
            let Some(message) = encode(frame) else {
                continue;
            };
            if sender.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            let frame = match message {
                Message::Text(text) => Inbound::Text(text.as_str().to_owned()),
                Message::Binary(data) => Inbound::Binary(data.to_vec()),
                Message::Close(_) => break,
                Message::Ping(_) | Message::Pong(_) => continue,
            };
            if inbound_tx.send(frame).await.is_err() {
                break;
            }
        }
    });

    run_session(state.deps.clone(), inbound_rx, outbound_tx).await;

    // Let queued frames (and a close) reach the client before tearing down
    let _ = send_task.await;
    recv_task.abort();

    tracing::info!("WebSocket disconnected");
}
