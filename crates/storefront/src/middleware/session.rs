//! Anonymous session configuration.
//!
//! The `tower-sessions` session only carries the guest session ID; identity
//! comes from the signed token, never from session state.

use tower_sessions::{Expiry, Session, SessionManagerLayer, SessionStore};

use cartgate_core::GuestSessionId;

use crate::models::session_keys;

/// Session cookie name.
pub const SESSION_COOKIE_NAME: &str = "cartgate_session";

/// Session expiry time in seconds (30 days of inactivity).
const SESSION_EXPIRY_SECONDS: i64 = 30 * 24 * 60 * 60;

/// Create the session layer over any session store.
///
/// The binary passes a `PostgresStore`; tests pass a `MemoryStore`.
#[must_use]
pub fn create_session_layer<S: SessionStore + Clone>(
    store: S,
    secure: bool,
) -> SessionManagerLayer<S> {
    SessionManagerLayer::new(store)
        .with_name(SESSION_COOKIE_NAME)
        .with_expiry(Expiry::OnInactivity(
            tower_sessions::cookie::time::Duration::seconds(SESSION_EXPIRY_SECONDS),
        ))
        .with_secure(secure)
        .with_same_site(tower_sessions::cookie::SameSite::Lax)
        .with_http_only(true)
        .with_path("/")
}

/// The guest session ID stored in this session, if any.
///
/// # Errors
///
/// Returns an error if the session store fails.
pub async fn guest_session_id(
    session: &Session,
) -> Result<Option<GuestSessionId>, tower_sessions::session::Error> {
    session.get(session_keys::GUEST_SESSION_ID).await
}

/// The guest session ID, minting and storing one if the session has none.
///
/// # Errors
///
/// Returns an error if the session store fails.
pub async fn ensure_guest_session_id(
    session: &Session,
) -> Result<GuestSessionId, tower_sessions::session::Error> {
    if let Some(id) = guest_session_id(session).await? {
        return Ok(id);
    }
    rotate_guest_session_id(session).await
}

/// Replace the guest session ID with a fresh one.
///
/// # Errors
///
/// Returns an error if the session store fails.
pub async fn rotate_guest_session_id(
    session: &Session,
) -> Result<GuestSessionId, tower_sessions::session::Error> {
    let id = GuestSessionId::generate();
    session.insert(session_keys::GUEST_SESSION_ID, id).await?;
    Ok(id)
}

/// Remove and return the guest session ID (on login).
///
/// # Errors
///
/// Returns an error if the session store fails.
pub async fn take_guest_session_id(
    session: &Session,
) -> Result<Option<GuestSessionId>, tower_sessions::session::Error> {
    session.remove(session_keys::GUEST_SESSION_ID).await
}
