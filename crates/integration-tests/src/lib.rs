//! Integration tests for Cartgate.
//!
//! # Running Tests
//!
//! ```bash
//! # In-process tests (in-memory stores, no server needed)
//! cargo test -p cartgate-integration-tests
//!
//! # Including the PostgreSQL store tests
//! STOREFRONT_DATABASE_URL=postgres://... cargo test -p cartgate-integration-tests -- --ignored
//! ```
//!
//! # Test Categories
//!
//! - `claim_flow` - Guest cart claiming through login
//! - `gate` - Token validation and role/permission checks
//! - `guest_session` - Guest session lifecycle
//! - `postgres_store` - `PgCartStore` against a live database
//!
//! [`TestApp`] drives the storefront router with `tower::ServiceExt::oneshot`
//! over in-memory stores, so every request runs the same extractors, session
//! layer and claim worker as production.

#![allow(clippy::missing_panics_doc, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, Response, StatusCode, header};
use chrono::Utc;
use secrecy::SecretString;
use serde_json::{Value, json};
use tower::ServiceExt;
use tower_sessions::MemoryStore;

use cartgate_core::{Email, PermissionMatrix, Role, UserId};
use cartgate_storefront::config::{ClaimConfig, StorefrontConfig, TokenConfig};
use cartgate_storefront::db::{CartStore, MemoryCartStore, MemoryUserStore};
use cartgate_storefront::models::User;
use cartgate_storefront::services::auth::hash_password;
use cartgate_storefront::state::AppState;

/// Password given to every user created by [`TestApp::create_user`].
pub const PASSWORD: &str = "correct horse battery";

/// Token key used by test apps.
pub const TOKEN_SECRET: &str = "k8#Qz!v2Lw9@Xr4$Tn6^Bp1&Hm3*Jd5%";

/// Storefront configuration that needs no environment.
#[must_use]
pub fn test_config() -> StorefrontConfig {
    StorefrontConfig {
        database_url: SecretString::from("postgres://localhost/cartgate_test"),
        host: "127.0.0.1".parse().unwrap(),
        port: 3000,
        base_url: "http://localhost:3000".to_string(),
        token: TokenConfig {
            secret: SecretString::from(TOKEN_SECRET),
            ttl: chrono::Duration::hours(1),
        },
        permissions: PermissionMatrix::default(),
        claims: ClaimConfig {
            store_timeout: Duration::from_secs(2),
            queue_capacity: 64,
        },
        sentry_dsn: None,
        sentry_environment: None,
        sentry_traces_sample_rate: 0.0,
    }
}

/// A running storefront router over in-memory stores.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub sessions: MemoryStore,
    pub users: Arc<MemoryUserStore>,
    next_user_id: std::sync::atomic::AtomicI32,
}

impl TestApp {
    /// Storefront over a fresh [`MemoryCartStore`].
    pub fn new() -> Self {
        Self::with_cart_store(Arc::new(MemoryCartStore::new()))
    }

    /// Storefront over the given cart store, with the claim worker running.
    pub fn with_cart_store(carts: Arc<dyn CartStore>) -> Self {
        let users = Arc::new(MemoryUserStore::new());
        let (state, worker) = AppState::new(test_config(), None, carts, users.clone()).unwrap();
        tokio::spawn(worker.run());

        let sessions = MemoryStore::default();
        let router = cartgate_storefront::app(state.clone(), sessions.clone(), false);

        Self {
            router,
            state,
            sessions,
            users,
            next_user_id: std::sync::atomic::AtomicI32::new(1),
        }
    }

    /// Register a user with [`PASSWORD`].
    pub async fn create_user(&self, email: &str, role: Role) -> User {
        let id = self
            .next_user_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let user = User {
            id: UserId::new(id),
            email: Email::parse(email).unwrap(),
            role,
            created_at: Utc::now(),
        };
        self.users
            .insert(user.clone(), hash_password(PASSWORD).unwrap())
            .await;
        user
    }

    /// A valid token for `user` without going through login.
    pub fn token_for(&self, user: &User) -> String {
        self.state.tokens().issue(user.id, user.role).token
    }

    /// Send one request through the router.
    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Log in, carrying `session_cookie` if given. Returns the response.
    pub async fn login(&self, email: &str, session_cookie: Option<&str>) -> Response<Body> {
        let mut request = Request::post("/auth/login").header(header::CONTENT_TYPE, "application/json");
        if let Some(cookie) = session_cookie {
            request = request.header(header::COOKIE, cookie);
        }
        let body = json!({ "email": email, "password": PASSWORD }).to_string();
        self.send(request.body(Body::from(body)).unwrap()).await
    }

    /// Log in and return the issued token.
    pub async fn login_token(&self, email: &str, session_cookie: Option<&str>) -> String {
        let response = self.login(email, session_cookie).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        body["token"].as_str().unwrap().to_string()
    }

    /// Add `quantity` of `variant_id` to the cart identified by `auth`.
    pub async fn add_to_cart(&self, auth: &Auth<'_>, variant_id: i32, quantity: u32) -> Response<Body> {
        let body = json!({ "variant_id": variant_id, "quantity": quantity }).to_string();
        let request = auth
            .apply(Request::post("/cart/add"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap();
        self.send(request).await
    }

    /// Remove the line for `variant_id` from the cart identified by `auth`.
    pub async fn remove_from_cart(&self, auth: &Auth<'_>, variant_id: i32) -> Response<Body> {
        let body = json!({ "variant_id": variant_id }).to_string();
        let request = auth
            .apply(Request::post("/cart/remove"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap();
        self.send(request).await
    }

    /// Fetch the cart identified by `auth` as JSON.
    pub async fn cart(&self, auth: &Auth<'_>) -> Value {
        let request = auth.apply(Request::get("/cart")).body(Body::empty()).unwrap();
        let response = self.send(request).await;
        assert_eq!(response.status(), StatusCode::OK);
        json_body(response).await
    }

    /// Poll the user's cart until `predicate` holds or the deadline passes.
    pub async fn wait_for_cart(&self, token: &str, predicate: impl Fn(&Value) -> bool) -> Value {
        let auth = Auth::Bearer(token);
        for _ in 0..200 {
            let cart = self.cart(&auth).await;
            if predicate(&cart) {
                return cart;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.cart(&auth).await
    }
}

impl Default for TestApp {
    fn default() -> Self {
        Self::new()
    }
}

/// How a test request identifies its caller.
pub enum Auth<'a> {
    /// No credential and no session.
    Anonymous,
    /// A `cartgate_session=...` cookie pair.
    Session(&'a str),
    /// `Authorization: Bearer <token>`.
    Bearer(&'a str),
}

impl Auth<'_> {
    fn apply(&self, request: axum::http::request::Builder) -> axum::http::request::Builder {
        match self {
            Self::Anonymous => request,
            Self::Session(cookie) => request.header(header::COOKIE, *cookie),
            Self::Bearer(token) => request.header(header::AUTHORIZATION, format!("Bearer {token}")),
        }
    }
}

/// Read a JSON response body.
pub async fn json_body(response: Response<Body>) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// The `name=value` pair of the `Set-Cookie` header for cookie `name`.
pub fn set_cookie(response: &Response<Body>, name: &str) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with(&format!("{name}=")))
        .map(|v| v.split(';').next().unwrap_or(v).to_string())
}

/// The full `Set-Cookie` header for cookie `name`.
pub fn set_cookie_header(response: &Response<Body>, name: &str) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with(&format!("{name}=")))
        .map(ToString::to_string)
}

/// `(variant_id, quantity)` pairs of a cart view, in cart order.
pub fn lines(cart: &Value) -> Vec<(i64, i64)> {
    cart["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|item| {
            (
                item["variant_id"].as_i64().unwrap(),
                item["quantity"].as_i64().unwrap(),
            )
        })
        .collect()
}
