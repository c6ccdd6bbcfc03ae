//! Administrative real-time endpoints.

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::routing::{get, post};
use axum::{Json, Router};
use courier_core::Topic;
use courier_realtime::RegistryStats;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::AppState;
use crate::auth::Admin;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/broadcast", post(broadcast))
        .route("/stats", get(stats))
}

/// Target of a broadcast: a topic, one user's topic, or everyone when
/// neither is given.
#[derive(Debug, Deserialize)]
struct BroadcastRequest {
    topic: Option<Topic>,
    user_id: Option<String>,
    message: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct BroadcastResponse {
    recipients: usize,
}

async fn broadcast(
    _admin: Admin,
    State(state): State<AppState>,
    body: Result<Json<BroadcastRequest>, JsonRejection>,
) -> Result<Json<BroadcastResponse>, ApiError> {
    let Json(req) = body?;
    let recipients = match (req.topic, req.user_id) {
        (Some(_), Some(_)) => {
            return Err(ApiError::BadRequest(
                "give either topic or user_id, not both".to_string(),
            ));
        }
        (Some(topic), None) => {
            state
                .broadcaster
                .broadcast_notification(&topic, req.message)
                .await
        }
        (None, Some(user_id)) => {
            let topic = Topic::prefixed(&state.realtime.user_topic_prefix, &user_id)?;
            state
                .broadcaster
                .broadcast_notification(&topic, req.message)
                .await
        }
        (None, None) => state.broadcaster.broadcast_all(req.message).await,
    };
    info!(recipients, "Admin broadcast sent");
    Ok(Json(BroadcastResponse { recipients }))
}

async fn stats(_admin: Admin, State(state): State<AppState>) -> Json<RegistryStats> {
    Json(state.registry.stats().await)
}
