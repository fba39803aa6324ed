//! Persistence for the storefront.
//!
//! # Database: `cartgate_storefront`
//!
//! ## Tables (schema `storefront`)
//!
//! - `user` - Site users with their role
//! - `user_password` - Argon2 password hashes
//! - `guest_cart` - Carts of anonymous sessions, keyed by guest session ID
//! - `user_cart` - Carts of authenticated users, keyed by user ID
//! - `cart_claim` - One row per reconciled (guest session, user) pair
//! - `pending_claim` - Claims triggered but not yet committed
//! - `tower_sessions.session` - Anonymous session storage
//!
//! Access goes through the [`CartStore`] and [`UserStore`] traits so the claim
//! protocol can run against `PostgreSQL` in production and the in-memory
//! implementations in tests.
//!
//! # Migrations
//!
//! Migrations are stored in `crates/storefront/migrations/` and run via:
//! ```bash
//! cargo run -p cartgate-cli -- migrate
//! ```

pub mod carts;
pub mod memory;
pub mod users;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use cartgate_core::{CartItem, Email, GuestSessionId, UserId};

use crate::models::{
    ClaimCommit, ClaimCommitted, ClaimRecord, GuestCart, PendingClaim, User, UserCart,
};

pub use carts::PgCartStore;
pub use memory::{MemoryCartStore, MemoryUserStore};
pub use users::PgUserStore;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// A compare-and-swap write lost against a concurrent writer, or a
    /// uniqueness constraint was violated.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The guest session has already been claimed and may not get a new cart.
    #[error("guest session already claimed")]
    GuestSessionClaimed,

    /// The store did not answer in time.
    #[error("store operation timed out")]
    Timeout,
}

impl RepositoryError {
    /// Whether retrying the same operation later may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Database(e) => !matches!(
                e,
                sqlx::Error::ColumnDecode { .. }
                    | sqlx::Error::Decode(_)
                    | sqlx::Error::TypeNotFound { .. }
                    | sqlx::Error::ColumnNotFound(_)
            ),
            Self::Conflict(_) | Self::Timeout => true,
            Self::DataCorruption(_) | Self::NotFound | Self::GuestSessionClaimed => false,
        }
    }
}

/// Persisted cart state for guest sessions and users, plus claim records.
///
/// Writes take an `expected_version`: `None` is last-write-wins, `Some(v)` only
/// succeeds if the row is currently at version `v` (`Some(0)`: row must not
/// exist) and otherwise fails with [`RepositoryError::Conflict`].
#[async_trait]
pub trait CartStore: Send + Sync {
    /// Fetch a guest cart, or `NotFound`.
    async fn get_guest_cart(&self, guest: GuestSessionId) -> Result<GuestCart, RepositoryError>;

    /// Fetch a user cart, or `NotFound`.
    async fn get_user_cart(&self, user: UserId) -> Result<UserCart, RepositoryError>;

    /// Create or replace a guest cart.
    ///
    /// Creating a cart for a guest session that already has a claim record fails
    /// with [`RepositoryError::GuestSessionClaimed`].
    async fn upsert_guest_cart(
        &self,
        guest: GuestSessionId,
        items: &[CartItem],
        expected_version: Option<i64>,
    ) -> Result<GuestCart, RepositoryError>;

    /// Create or replace a user cart.
    async fn upsert_user_cart(
        &self,
        user: UserId,
        items: &[CartItem],
        expected_version: Option<i64>,
    ) -> Result<UserCart, RepositoryError>;

    /// Look up the claim record for a pair.
    async fn find_claim(
        &self,
        guest: GuestSessionId,
        user: UserId,
    ) -> Result<Option<ClaimRecord>, RepositoryError>;

    /// Apply a claim as one atomic unit.
    ///
    /// Inserts the claim record (test-and-set on the pair), deletes the guest
    /// cart at `guest_version` and writes the user cart at `user_version`. If the
    /// pair is already claimed nothing changes and `AlreadyClaimed` is returned;
    /// if either version moved, nothing changes and `Conflict` is returned.
    /// A committed claim also releases the pair's pending row.
    async fn commit_claim(&self, commit: ClaimCommit) -> Result<ClaimCommitted, RepositoryError>;

    /// Record that a claim for the pair was triggered. Parking a pair twice
    /// keeps the first row; parking a pair that is already claimed does nothing.
    async fn park_claim(
        &self,
        guest: GuestSessionId,
        user: UserId,
        parked_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    /// Pending claims for `user`, oldest first.
    async fn parked_claims(&self, user: UserId) -> Result<Vec<PendingClaim>, RepositoryError>;

    /// Drop the pending row for the pair, if any.
    async fn release_claim(
        &self,
        guest: GuestSessionId,
        user: UserId,
    ) -> Result<(), RepositoryError>;
}

/// Credential lookup for password login.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fetch a user together with their password hash.
    ///
    /// Returns `None` if the user doesn't exist or has no password set.
    async fn find_with_password(
        &self,
        email: &Email,
    ) -> Result<Option<(User, String)>, RepositoryError>;
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Arguments
///
/// * `database_url` - `PostgreSQL` connection string (wrapped in `SecretString`)
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

/// Map a unique violation to `Conflict`, anything else to `Database`.
fn map_unique_violation(e: sqlx::Error, what: &str) -> RepositoryError {
    if let sqlx::Error::Database(ref db_err) = e
        && db_err.is_unique_violation()
    {
        return RepositoryError::Conflict(format!("{what} already exists"));
    }
    RepositoryError::Database(e)
}
