//! Account settings.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Extension, Json};

use super::auth::{validate_openrouter_key, AuthUser};
use super::routes::AppState;
use super::types::{api_error, ApiError, JsonBody, SuccessResponse, UpdateKeyRequest};

/// Replace the stored OpenRouter key. A live focus session keeps its state
/// and uses the new key from its next AI call on.
pub async fn update_key(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    JsonBody(req): JsonBody<UpdateKeyRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let key = validate_openrouter_key(req.open_router_key)?;

    let updated = state
        .users
        .set_openrouter_key(user.id, &key)
        .await
        .map_err(|e| {
            tracing::error!(user = %user.id, "Failed to store API key: {}", e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;
    if !updated {
        return Err(api_error(StatusCode::UNAUTHORIZED, "Unauthorized"));
    }

    state.rebind_flow(user.id, &key).await;

    tracing::info!(user = %user.id, "OpenRouter key updated");
    Ok(Json(SuccessResponse { success: true }))
}
