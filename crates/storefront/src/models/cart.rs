//! Cart domain types.
//!
//! Both cart kinds carry a `version` that increases by one on every write. The
//! first persisted version is 1; version 0 stands for "no row yet" in
//! compare-and-swap writes.

use chrono::{DateTime, Utc};
use serde::Serialize;

use cartgate_core::{CartItem, GuestSessionId, UserId};

/// Cart owned by an anonymous session until it is claimed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuestCart {
    pub guest_session_id: GuestSessionId,
    pub items: Vec<CartItem>,
    pub version: i64,
    pub last_modified_at: DateTime<Utc>,
}

/// Cart owned by an authenticated user; persists across sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserCart {
    pub user_id: UserId,
    pub items: Vec<CartItem>,
    pub version: i64,
    pub last_modified_at: DateTime<Utc>,
}

impl UserCart {
    /// The state of a user who has never had a cart row.
    #[must_use]
    pub fn empty(user_id: UserId) -> Self {
        Self {
            user_id,
            items: Vec::new(),
            version: 0,
            last_modified_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

/// Durable witness that a guest cart was merged into a user cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimRecord {
    pub guest_session_id: GuestSessionId,
    pub user_id: UserId,
    pub claimed_at: DateTime<Utc>,
}

/// A triggered claim that has not committed yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingClaim {
    pub guest_session_id: GuestSessionId,
    pub user_id: UserId,
    pub parked_at: DateTime<Utc>,
}

/// Everything the store needs to apply one claim atomically.
#[derive(Debug, Clone)]
pub struct ClaimCommit {
    pub guest_session_id: GuestSessionId,
    pub user_id: UserId,
    /// User cart contents after the merge.
    pub merged_items: Vec<CartItem>,
    /// Guest cart version the merge was computed from.
    pub guest_version: i64,
    /// User cart version the merge was computed from (0 if it had no row).
    pub user_version: i64,
}

/// Result of a claim commit that did not hit a version conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimCommitted {
    /// Claim record written, guest cart removed, user cart updated.
    Committed {
        record: ClaimRecord,
        cart: UserCart,
    },
    /// A claim record for the pair already existed; nothing changed.
    AlreadyClaimed,
}
