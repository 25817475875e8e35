//! API request and response types.

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, Request},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::accounts::User;
use crate::focus::{ProposedTask, Task};
use crate::history::HistorySession;

/// Body of every error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Handler error: status plus `{"error": ...}` body.
pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

/// JSON request body whose rejections use the `{"error": ...}` shape.
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for JsonBody<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(api_error(rejection.status(), rejection.body_text())),
        }
    }
}

/// Health check response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub dev_mode: bool,
    /// Whether focus history survives a restart
    pub history_persistent: bool,
}

/// Sign-up form. Fields are optional so missing ones get a readable error.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SignupRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub name: Option<String>,
    pub open_router_key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Returned by signup and login; the token is also set as a cookie.
#[derive(Debug, Clone, Serialize)]
pub struct AuthResponse {
    pub success: bool,
    pub user: User,
    pub token: String,
    /// Expiry, unix seconds
    pub exp: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionResponse {
    pub user: User,
}

#[derive(Debug, Clone, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DumpRequest {
    pub dump: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakTasksResponse {
    pub success: bool,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ShrinkRequest {
    pub task: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShrinkResponse {
    pub success: bool,
    pub task: ProposedTask,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryResponse {
    pub sessions: Vec<HistorySession>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateKeyRequest {
    pub open_router_key: Option<String>,
}
