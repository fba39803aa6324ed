//! Token validation and role/permission checks at the HTTP surface.

#![allow(clippy::unwrap_used)]

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use chrono::Utc;

use cartgate_core::Role;
use cartgate_integration_tests::{Auth, TestApp, json_body, set_cookie, set_cookie_header};

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut request = Request::get(uri);
    if let Some(token) = token {
        request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    request.body(Body::empty()).unwrap()
}

fn delete(uri: &str, token: &str) -> Request<Body> {
    Request::delete(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

async fn body_text(response: axum::http::Response<Body>) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

// ============================================================================
// Authentication
// ============================================================================

#[tokio::test]
async fn test_missing_credential_is_unauthorized() {
    let app = TestApp::new();

    let response = app.send(get("/account", None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_text(response).await, "Unauthorized");
}

#[tokio::test]
async fn test_expired_token_is_unauthorized() {
    let app = TestApp::new();
    let user = app.create_user("late@example.com", Role::Customer).await;
    let stale = app
        .state
        .tokens()
        .issue_at(user.id, user.role, Utc::now() - chrono::Duration::hours(2))
        .token;

    let response = app.send(get("/account", Some(&stale))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_tampered_token_is_unauthorized() {
    let app = TestApp::new();
    let user = app.create_user("tamper@example.com", Role::Customer).await;
    let token = app.token_for(&user);
    let (payload, signature) = token.split_once('.').unwrap();
    let mut signature = signature.to_string();
    let last = if signature.ends_with('A') { "B" } else { "A" };
    signature.replace_range(signature.len() - 1.., last);

    let response = app
        .send(get("/account", Some(&format!("{payload}.{signature}"))))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_token_cookie_authenticates() {
    let app = TestApp::new();
    let user = app.create_user("cookie@example.com", Role::Customer).await;
    let token = app.token_for(&user);

    let request = Request::get("/account")
        .header(header::COOKIE, format!("cartgate_token={token}"))
        .body(Body::empty())
        .unwrap();
    let response = app.send(request).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["user_id"], user.id.as_i32());
    assert_eq!(body["role"], "customer");
    assert_eq!(body["capabilities"]["manage_own_cart"], true);
    assert_eq!(body["capabilities"]["view_customer_carts"], false);
}

#[tokio::test]
async fn test_wrong_password_is_unauthorized() {
    let app = TestApp::new();
    app.create_user("guess@example.com", Role::Customer).await;

    let request = Request::post("/auth/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            r#"{"email":"guess@example.com","password":"not the password"}"#,
        ))
        .unwrap();
    let response = app.send(request).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.login("nobody@example.com", None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_clears_token_cookie() {
    let app = TestApp::new();

    let request = Request::post("/auth/logout").body(Body::empty()).unwrap();
    let response = app.send(request).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let cookie = set_cookie_header(&response, "cartgate_token").unwrap();
    assert!(cookie.starts_with("cartgate_token=;"));
    assert!(cookie.contains("Max-Age=0"));
}

// ============================================================================
// Roles and permissions
// ============================================================================

#[tokio::test]
async fn test_viewer_can_read_but_not_clear_customer_carts() {
    let app = TestApp::new();
    let customer = app.create_user("buyer@example.com", Role::Customer).await;
    let viewer = app.create_user("support@example.com", Role::Viewer).await;
    let customer_token = app.token_for(&customer);
    app.add_to_cart(&Auth::Bearer(&customer_token), 4, 2).await;
    let viewer_token = app.token_for(&viewer);
    let uri = format!("/admin/carts/{}", customer.id);

    let response = app.send(get(&uri, Some(&viewer_token))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["item_count"], 2);

    let response = app.send(delete(&uri, &viewer_token)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_text(response).await, "Forbidden");
}

#[tokio::test]
async fn test_admin_clears_customer_cart() {
    let app = TestApp::new();
    let customer = app.create_user("cleared@example.com", Role::Customer).await;
    let admin = app.create_user("ops@example.com", Role::Admin).await;
    let customer_token = app.token_for(&customer);
    app.add_to_cart(&Auth::Bearer(&customer_token), 4, 2).await;

    let uri = format!("/admin/carts/{}", customer.id);
    let response = app.send(delete(&uri, &app.token_for(&admin))).await;
    assert_eq!(response.status(), StatusCode::OK);

    let cart = app.cart(&Auth::Bearer(&customer_token)).await;
    assert_eq!(cart["item_count"], 0);
}

#[tokio::test]
async fn test_customer_cannot_reach_back_office() {
    let app = TestApp::new();
    let customer = app.create_user("curious@example.com", Role::Customer).await;
    let token = app.token_for(&customer);

    let response = app.send(get("/admin/carts/1", Some(&token))).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_permission_matrix_is_super_admin_only() {
    let app = TestApp::new();
    let admin = app.create_user("admin@example.com", Role::Admin).await;
    let owner = app.create_user("owner@example.com", Role::SuperAdmin).await;

    let response = app
        .send(get("/admin/permissions/viewer", Some(&app.token_for(&admin))))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let owner_token = app.token_for(&owner);
    let response = app
        .send(get("/admin/permissions/viewer", Some(&owner_token)))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let capabilities = json_body(response).await;
    assert_eq!(capabilities["view_customer_carts"], true);
    assert_eq!(capabilities["manage_customer_carts"], false);

    let response = app
        .send(get("/admin/permissions/owner", Some(&owner_token)))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_role_without_own_cart_permission_cannot_shop() {
    let app = TestApp::new();
    let viewer = app.create_user("window@example.com", Role::Viewer).await;
    let token = app.token_for(&viewer);

    let response = app.add_to_cart(&Auth::Bearer(&token), 1, 1).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_viewer_cannot_read_own_cart() {
    let app = TestApp::new();
    let viewer = app.create_user("browse@example.com", Role::Viewer).await;
    let token = app.token_for(&viewer);

    let response = app.send(get("/cart", Some(&token))).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_bad_token_on_cart_is_unauthorized_not_guest() {
    let app = TestApp::new();
    let user = app.create_user("cartlate@example.com", Role::Customer).await;
    let expired = app
        .state
        .tokens()
        .issue_at(user.id, user.role, Utc::now() - chrono::Duration::hours(2))
        .token;

    let response = app.send(get("/cart", Some("not.a-token"))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // A rejected write must not mint a guest session or cart.
    let response = app.add_to_cart(&Auth::Bearer(&expired), 1, 1).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(set_cookie(&response, "cartgate_session").is_none());
}

#[tokio::test]
async fn test_no_credential_on_cart_is_guest() {
    let app = TestApp::new();

    let cart = app.cart(&Auth::Anonymous).await;
    assert_eq!(cart["owner"], "guest");
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn test_health_endpoints() {
    let app = TestApp::new();

    let response = app.send(get("/health", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "ok");

    // No database behind the in-memory stores.
    let response = app.send(get("/health/ready", None)).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
