//! Job queue endpoints.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use courier_core::{Job, JobId, JobState, Outcome, SubscriptionId};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

const DEFAULT_LIST_LIMIT: i64 = 50;
const MAX_LIST_LIMIT: i64 = 500;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/subscriptions/{subscription}/jobs",
            get(list_jobs).post(enqueue_job),
        )
        .route("/subscriptions/{subscription}/jobs/pending", get(pending))
        .route("/subscriptions/{subscription}/jobs/claim", post(claim_job))
        .route("/jobs/{id}", get(get_job))
        .route("/jobs/{id}/outcome", post(report_outcome))
}

fn subscription(raw: &str) -> Result<SubscriptionId, ApiError> {
    Ok(raw.parse::<SubscriptionId>()?)
}

fn job_id(raw: &str) -> Result<JobId, ApiError> {
    raw.parse::<JobId>()
        .map_err(|_| ApiError::BadRequest(format!("invalid job id: {}", raw)))
}

#[derive(Debug, Deserialize)]
struct EnqueueRequest {
    payload: serde_json::Value,
}

async fn enqueue_job(
    State(state): State<AppState>,
    Path(sub): Path<String>,
    body: Result<Json<EnqueueRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Job>), ApiError> {
    let sub = subscription(&sub)?;
    let Json(req) = body?;
    let job = state.engine.enqueue(sub, req.payload).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    state: Option<String>,
    limit: Option<i64>,
}

async fn list_jobs(
    State(state): State<AppState>,
    Path(sub): Path<String>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<Vec<Job>>, ApiError> {
    let sub = subscription(&sub)?;
    let Query(query) = query?;
    let filter = query
        .state
        .as_deref()
        .map(str::parse::<JobState>)
        .transpose()?;
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    if !(1..=MAX_LIST_LIMIT).contains(&limit) {
        return Err(ApiError::BadRequest(format!(
            "limit must be between 1 and {}",
            MAX_LIST_LIMIT
        )));
    }
    let jobs = state.engine.list(&sub, filter, limit).await?;
    Ok(Json(jobs))
}

#[derive(Debug, Serialize)]
struct PendingResponse {
    subscription_id: SubscriptionId,
    pending: i64,
}

async fn pending(
    State(state): State<AppState>,
    Path(sub): Path<String>,
) -> Result<Json<PendingResponse>, ApiError> {
    let sub = subscription(&sub)?;
    let pending = state.engine.pending_count(&sub).await?;
    Ok(Json(PendingResponse {
        subscription_id: sub,
        pending,
    }))
}

#[derive(Debug, Deserialize)]
struct ClaimRequest {
    agent: String,
}

/// `200` with the claimed job, or `204` when nothing is available.
async fn claim_job(
    State(state): State<AppState>,
    Path(sub): Path<String>,
    body: Result<Json<ClaimRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let sub = subscription(&sub)?;
    let Json(req) = body?;
    match state.engine.claim_oldest(&sub, &req.agent).await? {
        Some(job) => Ok(Json(job).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    let job = state.engine.get(job_id(&id)?).await?;
    Ok(Json(job))
}

#[derive(Debug, Deserialize)]
struct OutcomeRequest {
    outcome: Outcome,
    #[serde(default)]
    error: Option<String>,
}

async fn report_outcome(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<OutcomeRequest>, JsonRejection>,
) -> Result<Json<Job>, ApiError> {
    let id = job_id(&id)?;
    let Json(req) = body?;
    let job = state
        .engine
        .report_outcome(id, req.outcome, req.error)
        .await?;
    Ok(Json(job))
}
