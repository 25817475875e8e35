//! Email/password auth with JWT session tokens.
//!
//! - `/api/auth/signup` and `/api/auth/login` return a JWT and set it as the
//!   `whatnow.session_token` cookie
//! - Protected endpoints accept the cookie (also under its `__Secure-` name)
//!   or `Authorization: Bearer <jwt>`
//! - The token's `sub` is the user id; a token for a deleted user is rejected

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use super::routes::AppState;
use super::types::{
    api_error, ApiError, AuthResponse, JsonBody, LoginRequest, SessionResponse, SignupRequest,
    SuccessResponse,
};
use crate::accounts::{AccountError, User};
use crate::config::AuthConfig;

pub const SESSION_COOKIE: &str = "whatnow.session_token";
const SECURE_SESSION_COOKIE: &str = "__Secure-whatnow.session_token";

/// Shortest OpenRouter key accepted at signup or key update.
pub const MIN_KEY_LENGTH: usize = 5;

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct Claims {
    /// User id
    sub: String,
    /// Issued-at unix seconds
    iat: i64,
    /// Expiration unix seconds
    exp: i64,
}

/// The signed-in user, inserted into request extensions by [`require_auth`].
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
}

impl From<User> for AuthUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            name: user.name,
        }
    }
}

impl From<&AuthUser> for User {
    fn from(user: &AuthUser) -> Self {
        User {
            id: user.id,
            email: user.email.clone(),
            name: user.name.clone(),
        }
    }
}

fn issue_jwt(secret: &str, ttl_days: i64, user_id: Uuid) -> anyhow::Result<(String, i64)> {
    let now = Utc::now();
    let exp = now + Duration::days(ttl_days.max(1));
    let claims = Claims {
        sub: user_id.to_string(),
        iat: now.timestamp(),
        exp: exp.timestamp(),
    };
    let token = jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;
    Ok((token, claims.exp))
}

fn verify_jwt(token: &str, secret: &str) -> anyhow::Result<Claims> {
    let token_data = jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

/// Session token from the `Authorization` header or the session cookie.
fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer ").or_else(|| h.strip_prefix("bearer ")))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|h| h.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| {
            (*name == SESSION_COOKIE || *name == SECURE_SESSION_COOKIE) && !value.is_empty()
        })
        .map(|(_, value)| value.to_string())
}

fn session_cookie(auth: &AuthConfig, token: &str) -> String {
    let mut cookie = format!(
        "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}",
        SESSION_COOKIE,
        token,
        auth.jwt_ttl_days * 24 * 60 * 60
    );
    if auth.cookie_secure {
        cookie.push_str("; Secure");
    }
    cookie
}

fn cleared_cookie(auth: &AuthConfig) -> String {
    let mut cookie = format!("{}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0", SESSION_COOKIE);
    if auth.cookie_secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Issue a token for `user` and build the success response with its cookie.
fn signed_in(state: &AppState, user: User) -> Result<Response, ApiError> {
    let auth = &state.config.auth;
    let (token, exp) = issue_jwt(&auth.jwt_secret, auth.jwt_ttl_days, user.id)
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let cookie = session_cookie(auth, &token);
    let body = AuthResponse {
        success: true,
        user,
        token,
        exp,
    };
    Ok(([(header::SET_COOKIE, cookie)], Json(body)).into_response())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Shared validation for a submitted OpenRouter key.
pub fn validate_openrouter_key(key: Option<String>) -> Result<String, ApiError> {
    let key = non_blank(key).ok_or_else(|| {
        api_error(StatusCode::BAD_REQUEST, "OpenRouter API key is required")
    })?;
    let key = key.trim().to_string();
    if key.chars().count() < MIN_KEY_LENGTH {
        return Err(api_error(StatusCode::BAD_REQUEST, "API key seems too short"));
    }
    Ok(key)
}

pub async fn signup(
    State(state): State<Arc<AppState>>,
    JsonBody(req): JsonBody<SignupRequest>,
) -> Result<Response, ApiError> {
    let (Some(email), Some(password)) = (non_blank(req.email), non_blank(req.password)) else {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "Email and password are required",
        ));
    };
    let key = validate_openrouter_key(req.open_router_key)?;

    let user = state
        .users
        .create_user(&email, &password, req.name.as_deref(), &key)
        .await
        .map_err(|e| match e {
            AccountError::DuplicateEmail => {
                api_error(StatusCode::CONFLICT, AccountError::DuplicateEmail.to_string())
            }
            other => {
                tracing::error!("Signup error: {}", other);
                api_error(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
            }
        })?;

    signed_in(&state, user)
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    JsonBody(req): JsonBody<LoginRequest>,
) -> Result<Response, ApiError> {
    let (Some(email), Some(password)) = (non_blank(req.email), non_blank(req.password)) else {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "Email and password are required",
        ));
    };

    let user = match state.users.authenticate(&email, &password).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            return Err(api_error(StatusCode::UNAUTHORIZED, "Invalid email or password"));
        }
        Err(e) => {
            tracing::error!("Login error: {}", e);
            return Err(api_error(StatusCode::UNAUTHORIZED, "Invalid email or password"));
        }
    };

    signed_in(&state, user)
}

pub async fn logout(State(state): State<Arc<AppState>>) -> Response {
    (
        [(header::SET_COOKIE, cleared_cookie(&state.config.auth))],
        Json(SuccessResponse { success: true }),
    )
        .into_response()
}

pub async fn session(Extension(user): Extension<AuthUser>) -> Json<SessionResponse> {
    Json(SessionResponse {
        user: User::from(&user),
    })
}

pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let unauthorized = || api_error(StatusCode::UNAUTHORIZED, "Unauthorized").into_response();

    let Some(token) = token_from_headers(req.headers()) else {
        return unauthorized();
    };
    let Ok(claims) = verify_jwt(&token, &state.config.auth.jwt_secret) else {
        return unauthorized();
    };
    let Ok(user_id) = Uuid::parse_str(&claims.sub) else {
        return unauthorized();
    };

    match state.users.get(user_id).await {
        Ok(Some(user)) => {
            req.extensions_mut().insert(AuthUser::from(user));
            next.run(req).await
        }
        Ok(None) => unauthorized(),
        Err(e) => {
            tracing::error!("Failed to load session user: {}", e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
