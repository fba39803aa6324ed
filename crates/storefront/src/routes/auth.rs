//! Authentication route handlers.
//!
//! Login issues a signed session token (JSON body and `cartgate_token`
//! cookie) and hands any guest cart in the visitor's session to the claim
//! worker. Logout clears the cookie; tokens are stateless, so there is nothing
//! to revoke server-side.

use axum::{
    Json,
    extract::State,
    http::{StatusCode, header::SET_COOKIE},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use tower_sessions::cookie::{Cookie, SameSite, time};
use tracing::{info, instrument, warn};

use cartgate_core::{Role, UserId};

use crate::error::{AppError, clear_sentry_user, set_sentry_user};
use crate::middleware::TOKEN_COOKIE;
use crate::middleware::session::take_guest_session_id;
use crate::services::claims::ClaimEvent;
use crate::state::AppState;

/// Login request body.
#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Login response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user_id: UserId,
    pub role: Role,
    pub expires_at: DateTime<Utc>,
}

/// Authenticate with email and password.
///
/// Responds as soon as the token is issued; the guest cart claim runs in the
/// background and its outcome never changes this response.
#[instrument(skip(state, session, request), fields(user_id))]
pub async fn login(
    State(state): State<AppState>,
    session: Session,
    Json(request): Json<LoginRequest>,
) -> Result<Response, AppError> {
    let user = state
        .auth()
        .login_with_password(&request.email, &request.password)
        .await?;
    tracing::Span::current().record("user_id", user.id.as_i32());

    let issued = state.tokens().issue(user.id, user.role);

    match take_guest_session_id(&session).await {
        Ok(Some(guest)) => {
            state
                .claims()
                .dispatch(ClaimEvent::now(guest, user.id))
                .await;
        }
        Ok(None) => {}
        Err(e) => warn!(error = %e, "Could not read guest session, skipping cart claim"),
    }

    set_sentry_user(&user.id, Some(user.email.as_str()));
    info!(role = %user.role, "User logged in");

    let cookie = token_cookie(
        &issued.token,
        state.tokens().ttl(),
        state.config().secure_cookies(),
    );
    let body = LoginResponse {
        token: issued.token,
        user_id: issued.claim.user_id(),
        role: issued.claim.role(),
        expires_at: issued.claim.expires_at(),
    };

    Ok(([(SET_COOKIE, cookie)], Json(body)).into_response())
}

/// Clear the token cookie.
#[instrument(skip(state))]
pub async fn logout(State(state): State<AppState>) -> Response {
    clear_sentry_user();

    (
        StatusCode::NO_CONTENT,
        [(SET_COOKIE, cleared_token_cookie(state.config().secure_cookies()))],
    )
        .into_response()
}

fn token_cookie(token: &str, ttl: chrono::Duration, secure: bool) -> String {
    Cookie::build((TOKEN_COOKIE, token.to_owned()))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::seconds(ttl.num_seconds()))
        .build()
        .to_string()
}

fn cleared_token_cookie(secure: bool) -> String {
    Cookie::build((TOKEN_COOKIE, ""))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::ZERO)
        .build()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_cookie_attributes() {
        let cookie = token_cookie("abc.def", chrono::Duration::seconds(60), true);
        assert!(cookie.starts_with("cartgate_token=abc.def"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Secure"));
        assert!(cookie.contains("Max-Age=60"));
    }

    #[test]
    fn test_cleared_cookie_expires_immediately() {
        let cookie = cleared_token_cookie(false);
        assert!(cookie.starts_with("cartgate_token=;"));
        assert!(cookie.contains("Max-Age=0"));
        assert!(!cookie.contains("Secure"));
    }
}
