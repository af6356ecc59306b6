use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use toolgraph_core::events::{EventKind, LifecycleEvent};

use crate::config::AppState;

/// Messages pushed to editor clients, in the shape the editor listens for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    /// A node started, finished or failed
    NodeProcessing {
        #[serde(rename = "nodeId")]
        node_id: String,
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        /// Tells concurrent runs apart; older editors ignore it
        #[serde(rename = "runId", default, skip_serializing_if = "Option::is_none")]
        run_id: Option<String>,
    },
    /// The run finished; carries the final output
    ExecutionComplete {
        result: String,
        #[serde(rename = "runId", default, skip_serializing_if = "Option::is_none")]
        run_id: Option<String>,
    },
}

impl From<&LifecycleEvent> for WsMessage {
    fn from(event: &LifecycleEvent) -> Self {
        let run_id = Some(event.run_id.to_string());
        match &event.kind {
            EventKind::ExecutionComplete { result } => WsMessage::ExecutionComplete {
                result: result.clone(),
                run_id,
            },
            EventKind::Error { node_id, reason } => WsMessage::NodeProcessing {
                node_id: node_id.to_string(),
                status: event.kind.status().to_string(),
                reason: Some(reason.clone()),
                run_id,
            },
            EventKind::Processing { node_id } | EventKind::Completed { node_id } => {
                WsMessage::NodeProcessing {
                    node_id: node_id.to_string(),
                    status: event.kind.status().to_string(),
                    reason: None,
                    run_id,
                }
            }
        }
    }
}

/// WebSocket handler for lifecycle events
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Forward every lifecycle event to one client until either side goes away
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.events.subscribe();
    tracing::info!("WebSocket client connected");

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(event) => {
                    let message = WsMessage::from(&event);
                    let json = match serde_json::to_string(&message) {
                        Ok(json) => json,
                        Err(e) => {
                            tracing::warn!("Failed to encode event: {}", e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("WebSocket client lagged, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                // Pings are answered by the socket itself
                Some(Ok(_)) => {}
            },
        }
    }

    tracing::info!("WebSocket client disconnected");
}
