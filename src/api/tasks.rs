//! Stateless decomposition and shrink endpoints.
//!
//! These do not touch the user's focus session; a client that keeps its own
//! flow state can use them directly.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Extension, Json};

use super::auth::AuthUser;
use super::routes::AppState;
use super::types::{
    api_error, ApiError, BreakTasksResponse, DumpRequest, JsonBody, ShrinkRequest, ShrinkResponse,
};
use crate::focus::Task;

pub async fn break_tasks(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    body: Result<JsonBody<DumpRequest>, ApiError>,
) -> Result<Json<BreakTasksResponse>, ApiError> {
    let source = state.keyed_task_source(user.id).await?;
    let JsonBody(req) = body?;
    let dump = req
        .dump
        .filter(|d| !d.trim().is_empty())
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "Brain dump text is required"))?;

    let proposals = source.decompose(&dump).await.map_err(|e| {
        tracing::error!(user = %user.id, "Error breaking tasks: {}", e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;

    Ok(Json(BreakTasksResponse {
        success: true,
        tasks: proposals.into_iter().map(Task::from_proposal).collect(),
    }))
}

pub async fn shrink(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    body: Result<JsonBody<ShrinkRequest>, ApiError>,
) -> Result<Json<ShrinkResponse>, ApiError> {
    let source = state.keyed_task_source(user.id).await?;
    let JsonBody(req) = body?;
    let task = req
        .task
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "Task text is required"))?;

    let task = source.shrink(&task).await.map_err(|e| {
        tracing::error!(user = %user.id, "Error shrinking task: {}", e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;

    Ok(Json(ShrinkResponse {
        success: true,
        task,
    }))
}
