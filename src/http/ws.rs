// src/http/ws.rs
// /hubs/chat, /hubs/command (§4.9, §6): upgrade, then a send task draining
// hub broadcasts into the socket and a receive task handling client frames,
// raced with `tokio::select!` so either side closing ends the connection.

use super::AppState;
use crate::auth::AuthenticatedUser;
use crate::error::AppError;
use crate::hubs::{ChatHub, HubEvent};
use crate::models::Id;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::debug;

pub async fn chat_hub(ws: WebSocketUpgrade, State(state): State<AppState>, current: AuthenticatedUser) -> Result<impl IntoResponse, AppError> {
    Ok(ws.on_upgrade(move |socket| handle_chat(socket, state, current)))
}

pub async fn command_hub(ws: WebSocketUpgrade, State(state): State<AppState>, current: AuthenticatedUser) -> Result<impl IntoResponse, AppError> {
    Ok(ws.on_upgrade(move |socket| handle_command(socket, state, current)))
}

#[derive(Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
enum ChatClientMessage {
    Join { session_id: Id },
    Leave { session_id: Id },
    SendMessage { session_id: Id, content: String },
}

async fn handle_chat(socket: WebSocket, state: AppState, current: AuthenticatedUser) {
    let (mut sender, mut receiver) = socket.split();
    let mut hub = ChatHub::new(state.hubs.clone(), current.user_id, current.organization_id);

    let (out_tx, mut out_rx) = tokio::sync::mpsc::unbounded_channel::<HubEvent>();
    forward_broadcast(out_tx.clone(), hub.user_group_receiver());

    let send_task = async {
        while let Some(event) = out_rx.recv().await {
            let Ok(text) = serde_json::to_string(&event) else { continue };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    };

    let receive_task = async {
        while let Some(Ok(message)) = receiver.next().await {
            match message {
                Message::Text(text) => {
                    let Ok(parsed) = serde_json::from_str::<ChatClientMessage>(&text) else { continue };
                    match parsed {
                        ChatClientMessage::Join { session_id } => match hub.join_session(&state.db, session_id) {
                            Ok(rx) => forward_broadcast(out_tx.clone(), rx),
                            Err(_) => debug!(%session_id, "rejected join for session not owned by caller"),
                        },
                        ChatClientMessage::Leave { session_id } => hub.leave_session(session_id),
                        ChatClientMessage::SendMessage { session_id, content } => hub.send_message(session_id, &content),
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    };

    tokio::select! {
        _ = send_task => {}
        _ = receive_task => {}
    }
}

/// Bridges a hub broadcast group into the connection's single outgoing
/// queue so joining a new session doesn't require restructuring the send loop.
fn forward_broadcast(out_tx: tokio::sync::mpsc::UnboundedSender<HubEvent>, mut rx: tokio::sync::broadcast::Receiver<HubEvent>) {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if out_tx.send(event).is_err() {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

async fn handle_command(socket: WebSocket, state: AppState, current: AuthenticatedUser) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.hubs.subscribe(&format!("user_{}", current.user_id));

    let send_task = async {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let Ok(text) = serde_json::to_string(&event) else { continue };
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    let receive_task = async {
        while let Some(Ok(message)) = receiver.next().await {
            if matches!(message, Message::Close(_)) {
                break;
            }
        }
    };

    tokio::select! {
        _ = send_task => {}
        _ = receive_task => {}
    }
}
