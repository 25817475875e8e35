//! Focus flow endpoints. Every call answers with the session snapshot.
//!
//! A rejected intent is a 409 carrying the reason; a blank dump is a 400.
//! A failed decomposition is not an HTTP error: the snapshot carries it.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Extension, Json};

use super::auth::AuthUser;
use super::routes::AppState;
use super::types::{api_error, ApiError, DumpRequest, JsonBody};
use crate::focus::{Event, FocusSnapshot, TransitionError};

fn rejection(err: TransitionError) -> ApiError {
    let status = match err {
        TransitionError::EmptyDump => StatusCode::BAD_REQUEST,
        _ => StatusCode::CONFLICT,
    };
    api_error(status, err.to_string())
}

async fn dispatch(state: &AppState, user: &AuthUser, event: Event) -> Result<Json<FocusSnapshot>, ApiError> {
    let flow = state.flow_for(user.id).await?;
    let mut flow = flow.lock().await;
    flow.dispatch(event).await.map(Json).map_err(|e| {
        tracing::debug!(user = %user.id, "Focus intent rejected: {}", e);
        rejection(e)
    })
}

pub async fn get_focus(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<FocusSnapshot>, ApiError> {
    let flow = state.flow_for(user.id).await?;
    let snapshot = flow.lock().await.snapshot();
    Ok(Json(snapshot))
}

pub async fn submit_dump(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    JsonBody(req): JsonBody<DumpRequest>,
) -> Result<Json<FocusSnapshot>, ApiError> {
    dispatch(&state, &user, Event::SubmitDump(req.dump.unwrap_or_default())).await
}

pub async fn mark_done(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<FocusSnapshot>, ApiError> {
    dispatch(&state, &user, Event::MarkCurrentDone).await
}

pub async fn stuck(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<FocusSnapshot>, ApiError> {
    dispatch(&state, &user, Event::RequestStuck).await
}

pub async fn continue_session(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<FocusSnapshot>, ApiError> {
    dispatch(&state, &user, Event::ContinueFromInterstitial).await
}

pub async fn start_fresh(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<FocusSnapshot>, ApiError> {
    dispatch(&state, &user, Event::StartFresh).await
}

pub async fn escape(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<FocusSnapshot>, ApiError> {
    dispatch(&state, &user, Event::AttemptEscape).await
}

pub async fn escape_continue(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<FocusSnapshot>, ApiError> {
    dispatch(&state, &user, Event::ConfirmContinueSession).await
}

pub async fn escape_leave(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<FocusSnapshot>, ApiError> {
    dispatch(&state, &user, Event::ConfirmLeaveAnyway).await
}

pub async fn dismiss_error(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<FocusSnapshot>, ApiError> {
    dispatch(&state, &user, Event::DismissError).await
}
