//! Cartgate storefront library.
//!
//! Session-token authorization for the storefront API, guest and user carts,
//! and the background claim that merges a guest cart into the user's cart
//! after login. The binary in `main.rs` wires this to `PostgreSQL`; tests wire
//! it to the in-memory stores.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;

use axum::{Router, middleware::from_fn};
use tower_sessions::SessionStore;

use middleware::{create_session_layer, request_id_middleware};
use state::AppState;

/// Assemble the application router with its per-request layers.
///
/// Sentry and HTTP tracing layers are added by the binary so tests can run
/// the router without a subscriber or Sentry client.
pub fn app<S>(state: AppState, session_store: S, rate_limited: bool) -> Router
where
    S: SessionStore + Clone,
{
    let secure = state.config().secure_cookies();

    routes::routes(rate_limited)
        .layer(create_session_layer(session_store, secure))
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}
