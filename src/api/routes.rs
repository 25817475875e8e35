//! HTTP routing, shared state and server startup.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::middleware;
use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post, put},
    Router,
};
use tokio::sync::{Mutex, RwLock};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::accounts::UserStore;
use crate::config::Config;
use crate::crypto::load_or_create_private_key;
use crate::focus::FlowController;
use crate::history::{create_history_store, HistoryStore};
use crate::task_source::{OpenRouterTaskSourceFactory, TaskSource, TaskSourceFactory};

use super::account;
use super::auth;
use super::focus;
use super::history;
use super::tasks;
use super::types::{api_error, ApiError, HealthResponse};

/// Flows idle this long in the dump or finish view are dropped.
pub const FLOW_IDLE_TTL: Duration = Duration::from_secs(30 * 60);
const FLOW_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub users: Arc<UserStore>,
    pub history: Arc<dyn HistoryStore>,
    pub task_sources: Arc<dyn TaskSourceFactory>,
    /// One focus flow per user. The inner mutex serializes a user's intents.
    pub flows: RwLock<HashMap<Uuid, Arc<Mutex<FlowController>>>>,
}

impl AppState {
    pub fn new(
        config: Config,
        users: Arc<UserStore>,
        history: Arc<dyn HistoryStore>,
        task_sources: Arc<dyn TaskSourceFactory>,
    ) -> Self {
        Self {
            config,
            users,
            history,
            task_sources,
            flows: RwLock::new(HashMap::new()),
        }
    }

    /// Open the stores and the OpenRouter client described by `config`.
    pub async fn init(config: Config) -> anyhow::Result<Self> {
        let key =
            load_or_create_private_key(config.private_key.as_deref(), &config.private_key_path())
                .await?;

        let users = UserStore::open(config.database_path.clone(), Some(key)).await?;
        tracing::info!("Accounts database at {}", config.database_path.display());

        let history = create_history_store(config.history_store, &config.data_dir)
            .await
            .map_err(anyhow::Error::msg)?;
        if history.is_persistent() {
            tracing::info!("Focus history stored in {}", config.data_dir.display());
        } else {
            tracing::warn!("Focus history is in memory and will be lost on restart");
        }

        let task_sources = OpenRouterTaskSourceFactory::from_config(&config)?;
        tracing::info!(
            "Using model {} via {}",
            config.default_model,
            config.openrouter_base_url
        );

        Ok(Self::new(
            config,
            Arc::new(users),
            Arc::from(history),
            Arc::new(task_sources),
        ))
    }

    /// Task source bound to the user's stored key. No key is a 401.
    pub async fn keyed_task_source(&self, user_id: Uuid) -> Result<Arc<dyn TaskSource>, ApiError> {
        let key = self.users.openrouter_key(user_id).await.map_err(|e| {
            tracing::error!(user = %user_id, "Failed to load API key: {}", e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;
        match key {
            Some(key) => Ok(self.task_sources.for_key(&key)),
            None => Err(api_error(
                StatusCode::UNAUTHORIZED,
                "OpenRouter API key not found.",
            )),
        }
    }

    /// The user's focus flow, created on first use.
    ///
    /// A user without a stored key still gets a flow; its AI calls then fail
    /// fast with the missing-key message.
    pub async fn flow_for(&self, user_id: Uuid) -> Result<Arc<Mutex<FlowController>>, ApiError> {
        if let Some(flow) = self.flows.read().await.get(&user_id) {
            return Ok(Arc::clone(flow));
        }

        // Key is read under the write lock: a concurrent key update either
        // lands before the read or finds the inserted flow in `rebind_flow`.
        let mut flows = self.flows.write().await;
        if let Some(flow) = flows.get(&user_id) {
            return Ok(Arc::clone(flow));
        }
        let key = self.users.openrouter_key(user_id).await.map_err(|e| {
            tracing::error!(user = %user_id, "Failed to load API key: {}", e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;
        let source = self.task_sources.for_key(key.as_deref().unwrap_or(""));

        tracing::debug!(user = %user_id, "Creating focus flow");
        let flow = Arc::new(Mutex::new(FlowController::new(
            user_id.to_string(),
            source,
            Some(Arc::clone(&self.history)),
        )));
        flows.insert(user_id, Arc::clone(&flow));
        Ok(flow)
    }

    /// Point the user's live flow, if any, at a source for `key`.
    pub async fn rebind_flow(&self, user_id: Uuid, key: &str) {
        let flow = self.flows.read().await.get(&user_id).cloned();
        if let Some(flow) = flow {
            flow.lock().await.set_source(self.task_sources.for_key(key));
        }
    }

    /// Drop flows idle for `ttl` in the dump or finish view. Flows held by a
    /// request are kept. Returns the number evicted.
    pub async fn evict_idle_flows(&self, ttl: Duration) -> usize {
        let mut flows = self.flows.write().await;
        let before = flows.len();
        // Under the write lock no new handles can be taken, so a count of 1
        // means only the map holds the flow.
        flows.retain(|_, flow| {
            if Arc::strong_count(flow) > 1 {
                return true;
            }
            let idle = match flow.try_lock() {
                Ok(guard) => guard.is_idle(ttl),
                Err(_) => false,
            };
            !idle
        });
        before - flows.len()
    }
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    let public_routes = Router::new()
        .route("/api/health", get(health))
        .route("/api/auth/signup", post(auth::signup))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout));

    let protected_routes = Router::new()
        .route("/api/auth/session", get(auth::session))
        // Stateless AI helpers
        .route("/api/breaktasks", post(tasks::break_tasks))
        .route("/api/shrink", post(tasks::shrink))
        // Focus flow
        .route("/api/focus", get(focus::get_focus))
        .route("/api/focus/dump", post(focus::submit_dump))
        .route("/api/focus/done", post(focus::mark_done))
        .route("/api/focus/stuck", post(focus::stuck))
        .route("/api/focus/continue", post(focus::continue_session))
        .route("/api/focus/fresh", post(focus::start_fresh))
        .route("/api/focus/escape", post(focus::escape))
        .route("/api/focus/escape/continue", post(focus::escape_continue))
        .route("/api/focus/escape/leave", post(focus::escape_leave))
        .route("/api/focus/error/dismiss", post(focus::dismiss_error))
        // History and account
        .route("/api/history", get(history::list_history))
        .route("/api/account/key", put(account::update_key))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::require_auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(AppState::init(config).await?);

    let sweeper = Arc::clone(&state);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(FLOW_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            let evicted = sweeper.evict_idle_flows(FLOW_IDLE_TTL).await;
            if evicted > 0 {
                tracing::debug!("Evicted {} idle focus flows", evicted);
            }
        }
    });

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, stopping server");
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        dev_mode: state.config.dev_mode,
        history_persistent: state.history.is_persistent(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::generate_private_key;
    use crate::focus::ProposedTask;
    use crate::history::InMemoryHistoryStore;
    use crate::task_source::testing::{ScriptedFactory, ScriptedTaskSource};
    use crate::task_source::TaskSourceError;
    use crate::test_support::spawn_stub;
    use reqwest::header::{COOKIE, SET_COOKIE};
    use serde_json::{json, Value};

    struct TestApp {
        base: String,
        client: reqwest::Client,
        source: Arc<ScriptedTaskSource>,
        factory: Arc<ScriptedFactory>,
        state: Arc<AppState>,
        _dir: tempfile::TempDir,
    }

    impl TestApp {
        async fn spawn() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let config = Config::for_tests(dir.path().to_path_buf());
            let users = UserStore::open_in_memory(Some(generate_private_key())).unwrap();
            let source = Arc::new(ScriptedTaskSource::new());
            let factory = Arc::new(ScriptedFactory::new(Arc::clone(&source)));
            let state = Arc::new(AppState::new(
                config,
                Arc::new(users),
                Arc::new(InMemoryHistoryStore::new()),
                Arc::clone(&factory) as Arc<dyn TaskSourceFactory>,
            ));
            let base = spawn_stub(router(Arc::clone(&state))).await;
            Self {
                base,
                client: reqwest::Client::new(),
                source,
                factory,
                state,
                _dir: dir,
            }
        }

        fn url(&self, path: &str) -> String {
            format!("{}{}", self.base, path)
        }

        /// Sign up and return the session cookie pair.
        async fn signup(&self, email: &str) -> String {
            let resp = self
                .client
                .post(self.url("/api/auth/signup"))
                .json(&json!({
                    "email": email,
                    "password": "hunter22",
                    "name": "Ada",
                    "openRouterKey": "sk-or-v1-test"
                }))
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
            let cookie = resp.headers()[SET_COOKIE].to_str().unwrap();
            assert!(cookie.contains("HttpOnly"));
            cookie.split(';').next().unwrap().to_string()
        }

        async fn post(&self, cookie: &str, path: &str, body: Value) -> (StatusCode, Value) {
            let resp = self
                .client
                .post(self.url(path))
                .header(COOKIE, cookie)
                .json(&body)
                .send()
                .await
                .unwrap();
            (resp.status(), resp.json().await.unwrap())
        }

        async fn get(&self, cookie: &str, path: &str) -> (StatusCode, Value) {
            let resp = self
                .client
                .get(self.url(path))
                .header(COOKIE, cookie)
                .send()
                .await
                .unwrap();
            (resp.status(), resp.json().await.unwrap())
        }
    }

    #[tokio::test]
    async fn health_is_public() {
        let app = TestApp::spawn().await;
        let body: Value = app
            .client
            .get(app.url("/api/health"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["historyPersistent"], false);
    }

    #[tokio::test]
    async fn protected_routes_need_a_session() {
        let app = TestApp::spawn().await;
        let resp = app.client.get(app.url("/api/focus")).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "Unauthorized");

        let (status, _) = app
            .get("whatnow.session_token=not-a-jwt", "/api/focus")
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn signup_validation() {
        let app = TestApp::spawn().await;
        let cases = [
            (json!({"password": "pw"}), StatusCode::BAD_REQUEST, "Email and password are required"),
            (json!({"email": "a@b.c", "password": "pw"}), StatusCode::BAD_REQUEST, "OpenRouter API key is required"),
            (json!({"email": "a@b.c", "password": "pw", "openRouterKey": "sk"}), StatusCode::BAD_REQUEST, "API key seems too short"),
        ];
        for (body, status, message) in cases {
            let (got, body) = app.post("", "/api/auth/signup", body).await;
            assert_eq!(got, status);
            assert_eq!(body["error"], message);
        }

        app.signup("ada@example.com").await;
        let (status, body) = app
            .post(
                "",
                "/api/auth/signup",
                json!({"email": "ADA@example.com", "password": "pw", "openRouterKey": "sk-or-v1-x"}),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "An account with this email already exists");
    }

    #[tokio::test]
    async fn login_and_bearer_auth() {
        let app = TestApp::spawn().await;
        app.signup("ada@example.com").await;

        let (status, body) = app
            .post("", "/api/auth/login", json!({"email": "ada@example.com", "password": "nope"}))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Invalid email or password");

        let (status, body) = app
            .post("", "/api/auth/login", json!({"email": "ada@example.com", "password": "hunter22"}))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        let token = body["token"].as_str().unwrap().to_string();

        let session: Value = app
            .client
            .get(app.url("/api/auth/session"))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(session["user"]["email"], "ada@example.com");
        assert_eq!(session["user"]["name"], "Ada");

        let resp = app.client.post(app.url("/api/auth/logout")).send().await.unwrap();
        assert!(resp.headers()[SET_COOKIE].to_str().unwrap().contains("Max-Age=0"));
    }

    #[tokio::test]
    async fn focus_session_end_to_end() {
        let app = TestApp::spawn().await;
        let cookie = app.signup("ada@example.com").await;
        app.source.push_decompose(Ok(vec![
            ProposedTask::new("Email Bob about the report", 5),
            ProposedTask::new("Clear off your desk surface", 10),
        ]));

        let (status, snap) = app.get(&cookie, "/api/focus").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(snap["view"], "dump");

        let (status, body) = app.post(&cookie, "/api/focus/dump", json!({"dump": "  "})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Brain dump text is required");
        assert_eq!(app.source.decompose_calls(), 0);

        let (status, _) = app.post(&cookie, "/api/focus/done", json!({})).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, snap) = app
            .post(&cookie, "/api/focus/dump", json!({"dump": "email Bob, clean desk"}))
            .await;
        assert_eq!(snap["view"], "now");
        assert_eq!(snap["currentIndex"], 0);
        assert_eq!(snap["currentTask"]["action"], "Email Bob about the report");
        assert_eq!(snap["busy"], false);
        assert_eq!(app.factory.keys(), vec!["sk-or-v1-test".to_string()]);

        let (_, snap) = app.post(&cookie, "/api/focus/done", json!({})).await;
        assert_eq!(snap["view"], "interstitial");
        assert_eq!(snap["tasks"][0]["status"], "done");
        let (_, snap) = app.post(&cookie, "/api/focus/continue", json!({})).await;
        assert_eq!(snap["view"], "now");
        assert_eq!(snap["currentIndex"], 1);
        app.post(&cookie, "/api/focus/done", json!({})).await;
        let (_, snap) = app.post(&cookie, "/api/focus/continue", json!({})).await;
        assert_eq!(snap["view"], "finish");

        let (status, history) = app.get(&cookie, "/api/history").await;
        assert_eq!(status, StatusCode::OK);
        let sessions = history["sessions"].as_array().unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0]["status"], "completed");
        assert_eq!(sessions[0]["rawDump"], "email Bob, clean desk");
    }

    #[tokio::test]
    async fn escape_strikes_over_http() {
        let app = TestApp::spawn().await;
        let cookie = app.signup("ada@example.com").await;
        app.source
            .push_decompose(Ok(vec![ProposedTask::new("Start the washer", 5)]));
        app.post(&cookie, "/api/focus/dump", json!({"dump": "laundry"}))
            .await;

        let (_, snap) = app.post(&cookie, "/api/focus/escape", json!({})).await;
        assert_eq!(snap["warning"]["strike"], 1);
        let (status, _) = app.post(&cookie, "/api/focus/escape", json!({})).await;
        assert_eq!(status, StatusCode::CONFLICT);
        let (_, snap) = app
            .post(&cookie, "/api/focus/escape/continue", json!({}))
            .await;
        assert_eq!(snap["escapeStrikes"], 1);
        assert!(snap["warning"].is_null());

        app.post(&cookie, "/api/focus/escape", json!({})).await;
        app.post(&cookie, "/api/focus/escape/continue", json!({}))
            .await;
        let (_, snap) = app.post(&cookie, "/api/focus/escape", json!({})).await;
        assert_eq!(snap["view"], "finish");
        assert_eq!(snap["escapeStrikes"], 0);

        let (_, snap) = app.post(&cookie, "/api/focus/fresh", json!({})).await;
        assert_eq!(snap["view"], "dump");
        assert!(snap["tasks"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_decomposition_is_part_of_the_snapshot() {
        let app = TestApp::spawn().await;
        let cookie = app.signup("ada@example.com").await;
        app.source.push_decompose(Err(TaskSourceError::Parse(
            "Failed to parse tasks from AI response".to_string(),
        )));

        let (status, snap) = app
            .post(&cookie, "/api/focus/dump", json!({"dump": "everything"}))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(snap["view"], "dump");
        assert_eq!(snap["error"], "Failed to parse tasks from AI response");

        let (_, snap) = app
            .post(&cookie, "/api/focus/error/dismiss", json!({}))
            .await;
        assert!(snap["error"].is_null());
    }

    #[tokio::test]
    async fn stateless_break_and_shrink() {
        let app = TestApp::spawn().await;
        let cookie = app.signup("ada@example.com").await;
        app.source.push_decompose(Ok(vec![ProposedTask::new("Call the dentist", 5)]));
        app.source
            .push_shrink(Ok(ProposedTask::new("Find the dentist's number", 2)));

        let (status, body) = app
            .post(&cookie, "/api/breaktasks", json!({"dump": "teeth"}))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["tasks"][0]["action"], "Call the dentist");
        assert_eq!(body["tasks"][0]["status"], "pending");
        assert!(body["tasks"][0]["id"].is_string());

        let (status, body) = app
            .post(&cookie, "/api/shrink", json!({"task": "Call the dentist"}))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["task"]["durationMinutes"], 2);

        let (status, body) = app.post(&cookie, "/api/breaktasks", json!({"dump": ""})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Brain dump text is required");
        let (status, body) = app.post(&cookie, "/api/shrink", json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Task text is required");

        // Unscripted call: the upstream failure comes back as a 500.
        let (status, body) = app
            .post(&cookie, "/api/breaktasks", json!({"dump": "more"}))
            .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "unscripted decompose");
    }

    #[tokio::test]
    async fn key_update_reaches_the_live_flow() {
        let app = TestApp::spawn().await;
        let cookie = app.signup("ada@example.com").await;
        app.get(&cookie, "/api/focus").await;

        let resp = app
            .client
            .put(app.url("/api/account/key"))
            .header(COOKIE, &cookie)
            .json(&json!({"openRouterKey": "abc"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = app
            .client
            .put(app.url("/api/account/key"))
            .header(COOKIE, &cookie)
            .json(&json!({"openRouterKey": "sk-or-v1-rotated"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            app.factory.keys(),
            vec!["sk-or-v1-test".to_string(), "sk-or-v1-rotated".to_string()]
        );
    }

    #[tokio::test]
    async fn init_creates_key_and_database() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::for_tests(dir.path().to_path_buf());
        let key_path = config.private_key_path();
        let db_path = config.database_path.clone();

        let state = AppState::init(config).await.unwrap();
        assert!(key_path.exists());
        assert!(db_path.exists());
        assert!(!state.history.is_persistent());
    }

    async fn raw_post(app: &TestApp, cookie: &str, path: &str, content_type: &str, body: &str) -> reqwest::Response {
        app.client
            .post(app.url(path))
            .header(COOKIE, cookie)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body.to_string())
            .send()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn malformed_bodies_get_json_errors() {
        let app = TestApp::spawn().await;
        let cookie = app.signup("ada@example.com").await;

        let resp = raw_post(&app, &cookie, "/api/focus/dump", "application/json", "{not json").await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = resp.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains("JSON"));

        let resp = raw_post(
            &app,
            &cookie,
            "/api/breaktasks",
            "application/x-www-form-urlencoded",
            "dump=x",
        )
        .await;
        assert_eq!(resp.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        let body: Value = resp.json().await.unwrap();
        assert!(body["error"].is_string());

        let resp = raw_post(&app, "", "/api/auth/login", "application/json", "\"ada\"").await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = resp.json().await.unwrap();
        assert!(body["error"].is_string());
        assert_eq!(app.source.decompose_calls(), 0);
    }

    #[tokio::test]
    async fn missing_key_is_reported_before_the_body() {
        let app = TestApp::spawn().await;
        app.state
            .users
            .create_user("nokey@example.com", "hunter22", None, "")
            .await
            .unwrap();
        let (status, body) = app
            .post("", "/api/auth/login", json!({"email": "nokey@example.com", "password": "hunter22"}))
            .await;
        assert_eq!(status, StatusCode::OK);
        let token = body["token"].as_str().unwrap().to_string();

        let resp = app
            .client
            .post(app.url("/api/breaktasks"))
            .bearer_auth(&token)
            .body("dump=x")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "OpenRouter API key not found.");
    }

    #[tokio::test]
    async fn dropped_stuck_request_does_not_block_the_session() {
        let app = TestApp::spawn().await;
        let cookie = app.signup("ada@example.com").await;
        app.source
            .push_decompose(Ok(vec![ProposedTask::new("Write the report", 15)]));
        app.post(&cookie, "/api/focus/dump", json!({"dump": "report"}))
            .await;

        app.source.hang_shrink();
        let dropped = app
            .client
            .post(app.url("/api/focus/stuck"))
            .header(COOKIE, &cookie)
            .timeout(std::time::Duration::from_millis(300))
            .send()
            .await;
        assert!(dropped.is_err());

        // The server notices the closed connection shortly after the client gives up.
        let mut released = false;
        for _ in 0..40 {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            let snap = app
                .client
                .get(app.url("/api/focus"))
                .header(COOKIE, &cookie)
                .timeout(std::time::Duration::from_millis(200))
                .send()
                .await;
            if let Ok(resp) = snap {
                let snap: Value = resp.json().await.unwrap();
                if snap["busy"] == false {
                    released = true;
                    break;
                }
            }
        }
        assert!(released);

        let (status, snap) = app.post(&cookie, "/api/focus/done", json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(snap["view"], "interstitial");
        assert_eq!(snap["tasks"][0]["action"], "Write the report");
    }

    #[tokio::test]
    async fn idle_flows_are_evicted() {
        let app = TestApp::spawn().await;
        let idle = app.signup("idle@example.com").await;
        let busy = app.signup("busy@example.com").await;
        app.source.push_decompose(Ok(vec![ProposedTask::new("a", 5)]));
        app.get(&idle, "/api/focus").await;
        app.post(&busy, "/api/focus/dump", json!({"dump": "a"})).await;

        assert_eq!(app.state.evict_idle_flows(FLOW_IDLE_TTL).await, 0);
        assert_eq!(app.state.evict_idle_flows(Duration::ZERO).await, 1);
        assert_eq!(app.state.flows.read().await.len(), 1);

        let (_, snap) = app.get(&busy, "/api/focus").await;
        assert_eq!(snap["view"], "now");
        let (_, snap) = app.get(&idle, "/api/focus").await;
        assert_eq!(snap["view"], "dump");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn key_rotation_racing_flow_creation_ends_on_new_key() {
        let app = TestApp::spawn().await;
        let user = app
            .state
            .users
            .create_user("ada@example.com", "hunter22", None, "sk-or-v1-old")
            .await
            .unwrap();

        let create = {
            let state = Arc::clone(&app.state);
            tokio::spawn(async move { state.flow_for(user.id).await.map(|_| ()) })
        };
        let rotate = {
            let state = Arc::clone(&app.state);
            tokio::spawn(async move {
                state.users.set_openrouter_key(user.id, "sk-or-v1-new").await.unwrap();
                state.rebind_flow(user.id, "sk-or-v1-new").await;
            })
        };
        create.await.unwrap().unwrap();
        rotate.await.unwrap();

        assert_eq!(app.factory.keys().last().map(String::as_str), Some("sk-or-v1-new"));
    }
}
