//! WebSocket transport for the real-time channel.

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::response::Response;
use courier_core::Topic;
use courier_realtime::{Frame, Session};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, trace, warn};

use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    user_id: Option<String>,
}

/// WebSocket upgrade handler.
///
/// With `user_id` the connection joins that user's personal topic. The id
/// is checked before upgrading so a bad one is a plain 400.
pub async fn ws_handler(
    State(state): State<AppState>,
    query: Result<Query<ConnectQuery>, QueryRejection>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let Query(query) = query?;
    let user = match query.user_id {
        Some(user_id) => {
            let topic = Topic::prefixed(&state.realtime.user_topic_prefix, &user_id)?;
            Some((user_id, topic))
        }
        None => None,
    };
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, user)))
}

async fn handle_socket(socket: WebSocket, state: AppState, user: Option<(String, Topic)>) {
    let (conn_id, mut rx) = state.registry.register().await;
    let session = Session::new(conn_id, state.broadcaster.clone())
        .with_reserved_prefix(state.realtime.user_topic_prefix.as_str());
    info!(conn_id = %conn_id, "WebSocket connected");

    let (mut sink, mut stream) = socket.split();

    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let (message, last) = match frame {
                Frame::Text(text) => (Message::Text(text.to_string().into()), false),
                Frame::Ping => (Message::Ping(Bytes::new()), false),
                Frame::Close => (Message::Close(None), true),
            };
            if sink.send(message).await.is_err() {
                debug!(conn_id = %conn_id, "WebSocket sink closed");
                break;
            }
            if last {
                break;
            }
        }
    });

    if let Some((user_id, topic)) = &user {
        if let Err(e) = session.join_user_topic(topic, user_id).await {
            warn!(conn_id = %conn_id, error = %e, "Failed to join user topic");
        }
    }

    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if let Err(e) = session.handle_text(text.as_str()).await {
                    debug!(conn_id = %conn_id, error = %e, "Connection no longer registered");
                    break;
                }
            }
            Ok(Message::Binary(_)) => {
                debug!(conn_id = %conn_id, "Ignoring binary frame");
            }
            Ok(Message::Pong(_)) => {
                trace!(conn_id = %conn_id, "Pong received");
            }
            Ok(Message::Ping(_)) => {}
            Ok(Message::Close(_)) => break,
            Err(e) => {
                debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    session.close().await;
    send_task.abort();
    info!(conn_id = %conn_id, "WebSocket disconnected");
}
