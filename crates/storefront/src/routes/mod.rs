//! HTTP route handlers for storefront.
//!
//! # Route Structure
//!
//! ```text
//! GET    /health                    - Liveness
//! GET    /health/ready              - Readiness (database reachable)
//!
//! # Auth
//! POST   /auth/login                - Email/password login, issues token
//! POST   /auth/logout               - Clears the token cookie
//!
//! # Cart (guest or user)
//! GET    /cart                      - Current cart
//! POST   /cart/add                  - Add a variant
//! POST   /cart/update               - Set a variant's quantity (0 removes)
//! POST   /cart/remove               - Remove a variant
//!
//! # Account (any authenticated role)
//! GET    /account                   - Session summary and capabilities
//!
//! # Back office
//! GET    /admin/carts/{user_id}     - View a customer cart (view_customer_carts)
//! DELETE /admin/carts/{user_id}     - Empty a customer cart (admin + manage_customer_carts)
//! GET    /admin/permissions/{role}  - Role capabilities (super_admin)
//! ```

pub mod account;
pub mod admin;
pub mod auth;
pub mod cart;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};

use crate::middleware::login_rate_limiter;
use crate::state::AppState;

/// Create the auth routes router.
///
/// With `rate_limited`, login is limited per client IP.
pub fn auth_routes(rate_limited: bool) -> Router<AppState> {
    let login = Router::new().route("/login", post(auth::login));
    let login = if rate_limited {
        login.layer(login_rate_limiter())
    } else {
        login
    };

    login.route("/logout", post(auth::logout))
}

/// Create the cart routes router.
pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(cart::show))
        .route("/add", post(cart::add))
        .route("/update", post(cart::update))
        .route("/remove", post(cart::remove))
}

/// Create the back-office routes router.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/carts/{user_id}",
            get(admin::show_cart).delete(admin::clear_cart),
        )
        .route("/permissions/{role}", get(admin::role_permissions))
}

/// Create all routes for the storefront.
pub fn routes(rate_limited: bool) -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .nest("/auth", auth_routes(rate_limited))
        .nest("/cart", cart_routes())
        .route("/account", get(account::index))
        .nest("/admin", admin_routes())
}

/// Liveness health check endpoint.
///
/// Returns "ok" if the server is running. Does not check dependencies.
async fn health() -> &'static str {
    "ok"
}

/// Readiness health check endpoint.
///
/// Verifies database connectivity before returning OK.
/// Returns 503 Service Unavailable if the database is not reachable.
async fn readiness(State(state): State<AppState>) -> StatusCode {
    let Some(pool) = state.pool() else {
        return StatusCode::SERVICE_UNAVAILABLE;
    };
    match sqlx::query("SELECT 1").fetch_one(pool).await {
        Ok(_) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}
