//! Past focus sessions of the signed-in user.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Extension, Json,
};

use super::auth::AuthUser;
use super::routes::AppState;
use super::types::{api_error, ApiError, HistoryQuery, HistoryResponse};

const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 100;

pub async fn list_history(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let sessions = state
        .history
        .list_sessions(&user.id.to_string(), limit)
        .await
        .map_err(|e| {
            tracing::error!(user = %user.id, "Failed to list history: {}", e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, e)
        })?;
    Ok(Json(HistoryResponse { sessions }))
}
