//! Account route handlers.
//!
//! These routes require authentication.

use axum::{Json, extract::State};
use chrono::{DateTime, Utc};
use serde::Serialize;

use cartgate_core::{Capabilities, Role, UserId};

use crate::middleware::{AnyRole, Authorized};
use crate::state::AppState;

/// Summary of the caller's session.
#[derive(Debug, Serialize)]
pub struct AccountSummary {
    pub user_id: UserId,
    pub role: Role,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub capabilities: Capabilities,
}

/// Show who the caller is and what they may do.
pub async fn index(
    State(state): State<AppState>,
    caller: Authorized<AnyRole>,
) -> Json<AccountSummary> {
    let claim = caller.claim();
    Json(AccountSummary {
        user_id: claim.user_id(),
        role: claim.role(),
        issued_at: claim.issued_at(),
        expires_at: claim.expires_at(),
        capabilities: state
            .permissions()
            .capabilities(claim.role())
            .copied()
            .unwrap_or_default(),
    })
}
