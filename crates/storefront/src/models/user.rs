//! User domain types.

use chrono::{DateTime, Utc};

use cartgate_core::{Email, Role, UserId};

/// A storefront user (domain type).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Unique user ID.
    pub id: UserId,
    /// User's email address.
    pub email: Email,
    /// Role embedded in every session token issued to this user.
    pub role: Role,
    /// When the user was created.
    pub created_at: DateTime<Utc>,
}
