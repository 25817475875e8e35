//! HTTP API for What Now.
//!
//! ## Endpoints
//!
//! - `GET /api/health` - Health check
//! - `POST /api/auth/signup` - Create an account (email, password, OpenRouter key)
//! - `POST /api/auth/login` - Sign in
//! - `POST /api/auth/logout` - Clear the session cookie
//! - `GET /api/auth/session` - Current user
//! - `POST /api/breaktasks` - Break a brain dump into tasks
//! - `POST /api/shrink` - Suggest a smaller version of one task
//! - `GET /api/focus` - Current focus session snapshot
//! - `POST /api/focus/dump` - Submit a brain dump
//! - `POST /api/focus/done` - Mark the current task done
//! - `POST /api/focus/stuck` - Replace the current task with a smaller one
//! - `POST /api/focus/continue` - Move on from the "nice work" screen
//! - `POST /api/focus/fresh` - Drop the session and start over
//! - `POST /api/focus/escape` - Try to leave the session
//! - `POST /api/focus/escape/continue` - Answer an escape warning: stay
//! - `POST /api/focus/escape/leave` - Answer an escape warning: leave
//! - `POST /api/focus/error/dismiss` - Clear the error message
//! - `GET /api/history?limit=N` - Past focus sessions, newest first
//! - `PUT /api/account/key` - Replace the stored OpenRouter key

mod account;
pub mod auth;
mod focus;
mod history;
mod routes;
mod tasks;
pub mod types;

pub use routes::{router, serve, AppState};
