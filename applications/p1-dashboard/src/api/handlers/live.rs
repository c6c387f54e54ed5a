use crate::api::AppState;
use crate::dashboard::LiveUpdate;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, info, warn};

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Frames sent to live subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LiveFrame {
    Sample(LiveUpdate),
    /// The client fell behind and `skipped` updates were dropped.
    Lagged { skipped: u64 },
}

pub async fn live_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let client_id = NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed);
    let updates = state.dashboard.subscribe();
    ws.on_upgrade(move |socket| handle_connection(socket, updates, client_id))
}

async fn handle_connection(
    socket: WebSocket,
    mut updates: broadcast::Receiver<LiveUpdate>,
    client_id: u64,
) {
    info!(client_id, "live client connected");
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        loop {
            let frame = match updates.recv().await {
                Ok(update) => LiveFrame::Sample(update),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(client_id, skipped, "live client lagging");
                    LiveFrame::Lagged { skipped }
                }
                Err(RecvError::Closed) => break,
            };

            let json = match serde_json::to_string(&frame) {
                Ok(j) => j,
                Err(e) => {
                    error!(error = %e, "failed to serialize live frame");
                    continue;
                }
            };

            if let Err(e) = ws_sender.send(Message::Text(json.into())).await {
                debug!(client_id, error = %e, "live send failed");
                break;
            }
        }
    });

    // The stream is one-way; inbound frames only matter for detecting a close.
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => break,
                Ok(Message::Text(_)) | Ok(Message::Binary(_)) => {
                    debug!(client_id, "ignoring inbound live frame");
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(client_id, error = %e, "live socket error");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!(client_id, "live client disconnected");
}
