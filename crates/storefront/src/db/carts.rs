//! Cart repository for `PostgreSQL`.
//!
//! Queries are built at runtime with `sqlx::query_as` so the crate compiles
//! without a live database or an offline query cache.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use cartgate_core::{CartItem, GuestSessionId, UserId};

use super::{CartStore, RepositoryError};
use crate::models::{
    ClaimCommit, ClaimCommitted, ClaimRecord, GuestCart, PendingClaim, UserCart,
};

#[derive(sqlx::FromRow)]
struct GuestCartRow {
    guest_session_id: Uuid,
    items: Json<Vec<CartItem>>,
    version: i64,
    last_modified_at: DateTime<Utc>,
}

impl From<GuestCartRow> for GuestCart {
    fn from(row: GuestCartRow) -> Self {
        Self {
            guest_session_id: GuestSessionId::from_uuid(row.guest_session_id),
            items: row.items.0,
            version: row.version,
            last_modified_at: row.last_modified_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct UserCartRow {
    user_id: i32,
    items: Json<Vec<CartItem>>,
    version: i64,
    last_modified_at: DateTime<Utc>,
}

impl From<UserCartRow> for UserCart {
    fn from(row: UserCartRow) -> Self {
        Self {
            user_id: UserId::new(row.user_id),
            items: row.items.0,
            version: row.version,
            last_modified_at: row.last_modified_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ClaimRow {
    guest_session_id: Uuid,
    user_id: i32,
    claimed_at: DateTime<Utc>,
}

impl From<ClaimRow> for ClaimRecord {
    fn from(row: ClaimRow) -> Self {
        Self {
            guest_session_id: GuestSessionId::from_uuid(row.guest_session_id),
            user_id: UserId::new(row.user_id),
            claimed_at: row.claimed_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PendingClaimRow {
    guest_session_id: Uuid,
    user_id: i32,
    parked_at: DateTime<Utc>,
}

impl From<PendingClaimRow> for PendingClaim {
    fn from(row: PendingClaimRow) -> Self {
        Self {
            guest_session_id: GuestSessionId::from_uuid(row.guest_session_id),
            user_id: UserId::new(row.user_id),
            parked_at: row.parked_at,
        }
    }
}

/// Cart store backed by the `storefront` schema.
#[derive(Clone)]
pub struct PgCartStore {
    pool: PgPool,
}

impl PgCartStore {
    /// Create a new cart store.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Delete guest carts untouched for longer than `older_than`.
    ///
    /// Carts with a pending claim are kept. Returns the number of carts removed.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn purge_stale_guest_carts(
        &self,
        older_than: chrono::Duration,
    ) -> Result<u64, RepositoryError> {
        let cutoff = Utc::now() - older_than;
        let result = sqlx::query(
            r"
            DELETE FROM storefront.guest_cart g
            WHERE g.last_modified_at < $1
              AND NOT EXISTS (
                  SELECT 1 FROM storefront.pending_claim p
                  WHERE p.guest_session_id = g.guest_session_id
              )
            ",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

/// Write a user cart inside `tx` at the expected version.
///
/// Version 0 inserts a fresh row; anything else updates only if the row is
/// still at that version. Either miss is a `Conflict`.
async fn write_user_cart_at(
    tx: &mut Transaction<'_, Postgres>,
    user: UserId,
    items: &[CartItem],
    expected_version: i64,
) -> Result<UserCart, RepositoryError> {
    let row = if expected_version == 0 {
        sqlx::query_as::<_, UserCartRow>(
            r"
            INSERT INTO storefront.user_cart (user_id, items, version, last_modified_at)
            VALUES ($1, $2, 1, now())
            ON CONFLICT (user_id) DO NOTHING
            RETURNING user_id, items, version, last_modified_at
            ",
        )
        .bind(user)
        .bind(Json(items))
        .fetch_optional(&mut **tx)
        .await?
    } else {
        sqlx::query_as::<_, UserCartRow>(
            r"
            UPDATE storefront.user_cart
            SET items = $2, version = version + 1, last_modified_at = now()
            WHERE user_id = $1 AND version = $3
            RETURNING user_id, items, version, last_modified_at
            ",
        )
        .bind(user)
        .bind(Json(items))
        .bind(expected_version)
        .fetch_optional(&mut **tx)
        .await?
    };

    row.map(UserCart::from)
        .ok_or_else(|| RepositoryError::Conflict("user cart version moved".to_owned()))
}

#[async_trait]
impl CartStore for PgCartStore {
    async fn get_guest_cart(&self, guest: GuestSessionId) -> Result<GuestCart, RepositoryError> {
        sqlx::query_as::<_, GuestCartRow>(
            r"
            SELECT guest_session_id, items, version, last_modified_at
            FROM storefront.guest_cart
            WHERE guest_session_id = $1
            ",
        )
        .bind(guest.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .map(GuestCart::from)
        .ok_or(RepositoryError::NotFound)
    }

    async fn get_user_cart(&self, user: UserId) -> Result<UserCart, RepositoryError> {
        sqlx::query_as::<_, UserCartRow>(
            r"
            SELECT user_id, items, version, last_modified_at
            FROM storefront.user_cart
            WHERE user_id = $1
            ",
        )
        .bind(user)
        .fetch_optional(&self.pool)
        .await?
        .map(UserCart::from)
        .ok_or(RepositoryError::NotFound)
    }

    async fn upsert_guest_cart(
        &self,
        guest: GuestSessionId,
        items: &[CartItem],
        expected_version: Option<i64>,
    ) -> Result<GuestCart, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let current: Option<i64> = sqlx::query_scalar(
            "SELECT version FROM storefront.guest_cart WHERE guest_session_id = $1 FOR UPDATE",
        )
        .bind(guest.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(expected) = expected_version
            && expected != current.unwrap_or(0)
        {
            return Err(RepositoryError::Conflict("guest cart version moved".to_owned()));
        }

        if current.is_none() {
            let claimed: bool = sqlx::query_scalar(
                "SELECT EXISTS (SELECT 1 FROM storefront.cart_claim WHERE guest_session_id = $1)",
            )
            .bind(guest.as_uuid())
            .fetch_one(&mut *tx)
            .await?;
            if claimed {
                return Err(RepositoryError::GuestSessionClaimed);
            }
        }

        let row = match (current, expected_version) {
            // Row is locked by the SELECT above.
            (Some(_), _) => {
                sqlx::query_as::<_, GuestCartRow>(
                    r"
                    UPDATE storefront.guest_cart
                    SET items = $2, version = version + 1, last_modified_at = now()
                    WHERE guest_session_id = $1
                    RETURNING guest_session_id, items, version, last_modified_at
                    ",
                )
                .bind(guest.as_uuid())
                .bind(Json(items))
                .fetch_one(&mut *tx)
                .await?
            }
            // First write under compare-and-swap: a concurrent creator wins.
            (None, Some(_)) => sqlx::query_as::<_, GuestCartRow>(
                r"
                INSERT INTO storefront.guest_cart (guest_session_id, items, version, last_modified_at)
                VALUES ($1, $2, 1, now())
                ON CONFLICT (guest_session_id) DO NOTHING
                RETURNING guest_session_id, items, version, last_modified_at
                ",
            )
            .bind(guest.as_uuid())
            .bind(Json(items))
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| RepositoryError::Conflict("guest cart created concurrently".to_owned()))?,
            (None, None) => sqlx::query_as::<_, GuestCartRow>(
                r"
                INSERT INTO storefront.guest_cart (guest_session_id, items, version, last_modified_at)
                VALUES ($1, $2, 1, now())
                ON CONFLICT (guest_session_id) DO UPDATE
                SET items = EXCLUDED.items,
                    version = storefront.guest_cart.version + 1,
                    last_modified_at = now()
                RETURNING guest_session_id, items, version, last_modified_at
                ",
            )
            .bind(guest.as_uuid())
            .bind(Json(items))
            .fetch_one(&mut *tx)
            .await?,
        };

        tx.commit().await?;
        Ok(row.into())
    }

    async fn upsert_user_cart(
        &self,
        user: UserId,
        items: &[CartItem],
        expected_version: Option<i64>,
    ) -> Result<UserCart, RepositoryError> {
        if let Some(expected) = expected_version {
            let mut tx = self.pool.begin().await?;
            let cart = write_user_cart_at(&mut tx, user, items, expected).await?;
            tx.commit().await?;
            return Ok(cart);
        }

        let row = sqlx::query_as::<_, UserCartRow>(
            r"
            INSERT INTO storefront.user_cart (user_id, items, version, last_modified_at)
            VALUES ($1, $2, 1, now())
            ON CONFLICT (user_id) DO UPDATE
            SET items = EXCLUDED.items,
                version = storefront.user_cart.version + 1,
                last_modified_at = now()
            RETURNING user_id, items, version, last_modified_at
            ",
        )
        .bind(user)
        .bind(Json(items))
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn find_claim(
        &self,
        guest: GuestSessionId,
        user: UserId,
    ) -> Result<Option<ClaimRecord>, RepositoryError> {
        let row = sqlx::query_as::<_, ClaimRow>(
            r"
            SELECT guest_session_id, user_id, claimed_at
            FROM storefront.cart_claim
            WHERE guest_session_id = $1 AND user_id = $2
            ",
        )
        .bind(guest.as_uuid())
        .bind(user)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ClaimRecord::from))
    }

    async fn commit_claim(&self, commit: ClaimCommit) -> Result<ClaimCommitted, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let record = sqlx::query_as::<_, ClaimRow>(
            r"
            INSERT INTO storefront.cart_claim (guest_session_id, user_id, claimed_at)
            VALUES ($1, $2, now())
            ON CONFLICT (guest_session_id, user_id) DO NOTHING
            RETURNING guest_session_id, user_id, claimed_at
            ",
        )
        .bind(commit.guest_session_id.as_uuid())
        .bind(commit.user_id)
        .fetch_optional(&mut *tx)
        .await?;

        // Dropping `tx` without commit rolls back.
        let Some(record) = record else {
            return Ok(ClaimCommitted::AlreadyClaimed);
        };

        let deleted = sqlx::query(
            "DELETE FROM storefront.guest_cart WHERE guest_session_id = $1 AND version = $2",
        )
        .bind(commit.guest_session_id.as_uuid())
        .bind(commit.guest_version)
        .execute(&mut *tx)
        .await?;

        if deleted.rows_affected() == 0 {
            return Err(RepositoryError::Conflict("guest cart version moved".to_owned()));
        }

        let cart = write_user_cart_at(
            &mut tx,
            commit.user_id,
            &commit.merged_items,
            commit.user_version,
        )
        .await?;

        sqlx::query(
            "DELETE FROM storefront.pending_claim WHERE guest_session_id = $1 AND user_id = $2",
        )
        .bind(commit.guest_session_id.as_uuid())
        .bind(commit.user_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(ClaimCommitted::Committed {
            record: record.into(),
            cart,
        })
    }

    async fn park_claim(
        &self,
        guest: GuestSessionId,
        user: UserId,
        parked_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO storefront.pending_claim (guest_session_id, user_id, parked_at)
            SELECT $1, $2, $3
            WHERE NOT EXISTS (
                SELECT 1 FROM storefront.cart_claim
                WHERE guest_session_id = $1 AND user_id = $2
            )
            ON CONFLICT (guest_session_id, user_id) DO NOTHING
            ",
        )
        .bind(guest.as_uuid())
        .bind(user)
        .bind(parked_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn parked_claims(&self, user: UserId) -> Result<Vec<PendingClaim>, RepositoryError> {
        let rows = sqlx::query_as::<_, PendingClaimRow>(
            r"
            SELECT guest_session_id, user_id, parked_at
            FROM storefront.pending_claim
            WHERE user_id = $1
            ORDER BY parked_at
            ",
        )
        .bind(user)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(PendingClaim::from).collect())
    }

    async fn release_claim(
        &self,
        guest: GuestSessionId,
        user: UserId,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "DELETE FROM storefront.pending_claim WHERE guest_session_id = $1 AND user_id = $2",
        )
        .bind(guest.as_uuid())
        .bind(user)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
