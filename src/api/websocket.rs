use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use crate::api::state::AppState;
use crate::coordinator::{AgentMessage, ObserverEvent};

/// GET /ws/agent/:agent_id -- control channel of one field agent
pub async fn agent_ws_handler(
    ws: WebSocketUpgrade,
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_agent_socket(socket, agent_id, state))
}

/// GET /ws/observe -- read-only stream of reports and directory changes
pub async fn observer_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_observer_socket(socket, state))
}

async fn handle_agent_socket(socket: WebSocket, agent_id: String, state: AppState) {
    let (conn_id, mut rx) = match state.coordinator.connect(&agent_id).await {
        Ok(conn) => conn,
        Err(e) => {
            error!(agent_id = %agent_id, error = %e, "coordinator refused agent connection");
            return;
        }
    };
    info!(agent_id = %agent_id, %conn_id, "agent connected");

    let (mut sender, mut receiver) = socket.split();
    let mut shutdown_rx = state.shutdown_tx.subscribe();

    // Ends when the coordinator drops this link (replaced or expired)
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize coordinator message: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<AgentMessage>(&text) {
                            Ok(message) => {
                                if state.coordinator.agent_message(&agent_id, message).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(agent_id = %agent_id, error = %e, "unparseable agent message");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // Axum answers pings itself
                    Some(Ok(_)) => {}
                }
            }
            _ = &mut send_task => {
                debug!(agent_id = %agent_id, %conn_id, "agent link closed by coordinator");
                break;
            }
            _ = shutdown_rx.recv() => break,
        }
    }

    send_task.abort();
    let _ = state.coordinator.disconnect(&agent_id, conn_id).await;

    info!(agent_id = %agent_id, %conn_id, "agent connection closed");
}

async fn handle_observer_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before the snapshot so no change slips between the two
    let mut rx = state.coordinator.subscribe();

    if let Ok(agents) = state.coordinator.snapshot().await {
        let initial = ObserverEvent::DirectoryChanged { agents };
        if let Ok(json) = serde_json::to_string(&initial) {
            if sender.send(Message::Text(json)).await.is_err() {
                return;
            }
        }
    }

    let send_task = tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "observer lagging; events skipped");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize observer event: {}", e);
                    continue;
                }
            };

            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let mut shutdown_rx = state.shutdown_tx.subscribe();
    loop {
        tokio::select! {
            msg = receiver.next() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            _ = shutdown_rx.recv() => break,
        }
    }

    send_task.abort();

    info!("observer connection closed");
}
