// ABOUTME: Chat WebSocket endpoint and conversation replay route.
// ABOUTME: Reader forwards turns and stops to the coordinator; writer drains the outbound queue.

use super::error::ApiResult;
use crate::server::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
    Json,
};
use futures_util::{SinkExt, StreamExt};
use newhorse_core::wire::ControlAction;
use newhorse_core::{reject_busy, InboundMessage, OutboundMessage};
use serde::Deserialize;

const MAX_REPLAY: usize = 1000;

#[derive(Debug, Deserialize)]
pub struct ReplayQuery {
    pub limit: Option<usize>,
}

/// GET /api/chat/{project_id}/messages - newest messages, oldest first
pub async fn replay(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Query(query): Query<ReplayQuery>,
) -> ApiResult<Json<Vec<OutboundMessage>>> {
    let limit = query
        .limit
        .unwrap_or(state.config.chat.replay_limit)
        .min(MAX_REPLAY);
    let messages = state.store.recent_messages(&project_id, limit)?;
    Ok(Json(messages.into_iter().map(OutboundMessage::from).collect()))
}

/// GET /api/chat/{project_id} - WebSocket upgrade
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(project_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, project_id, state))
}

async fn handle_socket(socket: WebSocket, project_id: String, state: AppState) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let (connection_id, mut outbound) = state
        .connections
        .connect(&project_id, state.config.chat.outbound_buffer);

    // Writer task: sends queued messages to the client
    let mut writer_task = tokio::spawn(async move {
        while let Some(msg) = outbound.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to serialize outbound message");
                    continue;
                }
            };
            if ws_sink.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // Reader task: turns and stop requests from the client
    let reader_state = state.clone();
    let reader_project = project_id.clone();
    let mut reader_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_stream.next().await {
            match msg {
                Message::Text(text) => {
                    let Some(inbound) = InboundMessage::parse(&text) else {
                        continue;
                    };
                    match inbound {
                        InboundMessage::Control {
                            action: ControlAction::Stop,
                        } => {
                            reader_state.coordinator.stop(&reader_project);
                        }
                        InboundMessage::Chat(request) => {
                            tracing::info!(
                                project_id = %reader_project,
                                content_len = request.content.len(),
                                model = ?request.model,
                                "Chat turn received"
                            );
                            let coordinator = reader_state.coordinator.clone();
                            let sink = reader_state.connections.sink(&reader_project);
                            let project_id = reader_project.clone();
                            // Claim before spawning so frames are served in arrival order
                            // and a following stop always finds this turn
                            match coordinator.try_begin(&project_id) {
                                Ok(run) => {
                                    tokio::spawn(async move {
                                        let outcome = coordinator
                                            .handle_claimed(run, &project_id, request, &sink)
                                            .await;
                                        tracing::info!(project_id = %project_id, state = ?outcome, "Chat turn finished");
                                    });
                                }
                                Err(_) => {
                                    tokio::spawn(async move {
                                        reject_busy(&project_id, &sink).await;
                                    });
                                }
                            }
                        }
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut writer_task => reader_task.abort(),
        _ = &mut reader_task => writer_task.abort(),
    }

    let remaining = state.connections.disconnect(&project_id, connection_id);
    if remaining == 0 && state.coordinator.stop(&project_id) {
        tracing::info!(project_id = %project_id, "Last client left, in-flight request cancelled");
    }
}
