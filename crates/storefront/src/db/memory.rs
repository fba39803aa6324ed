//! In-memory stores.
//!
//! Every operation runs inside one critical section over all rows, which gives
//! `commit_claim` the same all-or-nothing behaviour the `PostgreSQL` store gets
//! from a transaction.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use cartgate_core::{CartItem, Email, GuestSessionId, UserId};

use super::{CartStore, RepositoryError, UserStore};
use crate::models::{
    ClaimCommit, ClaimCommitted, ClaimRecord, GuestCart, PendingClaim, User, UserCart,
};

#[derive(Default)]
struct CartRows {
    guest_carts: HashMap<GuestSessionId, GuestCart>,
    user_carts: HashMap<UserId, UserCart>,
    claims: HashMap<(GuestSessionId, UserId), ClaimRecord>,
    pending: HashMap<(GuestSessionId, UserId), PendingClaim>,
}

impl CartRows {
    fn guest_session_claimed(&self, guest: GuestSessionId) -> bool {
        self.claims.keys().any(|(g, _)| *g == guest)
    }
}

/// Cart store backed by process memory.
#[derive(Default)]
pub struct MemoryCartStore {
    rows: Mutex<CartRows>,
}

impl MemoryCartStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of claim records, for assertions in tests.
    pub async fn claim_count(&self) -> usize {
        self.rows.lock().await.claims.len()
    }
}

/// Check a compare-and-swap expectation against the current row version.
fn check_version(current: Option<i64>, expected: Option<i64>, what: &str) -> Result<(), RepositoryError> {
    match expected {
        Some(expected) if expected != current.unwrap_or(0) => Err(RepositoryError::Conflict(
            format!("{what} version moved"),
        )),
        _ => Ok(()),
    }
}

#[async_trait]
impl CartStore for MemoryCartStore {
    async fn get_guest_cart(&self, guest: GuestSessionId) -> Result<GuestCart, RepositoryError> {
        self.rows
            .lock()
            .await
            .guest_carts
            .get(&guest)
            .cloned()
            .ok_or(RepositoryError::NotFound)
    }

    async fn get_user_cart(&self, user: UserId) -> Result<UserCart, RepositoryError> {
        self.rows
            .lock()
            .await
            .user_carts
            .get(&user)
            .cloned()
            .ok_or(RepositoryError::NotFound)
    }

    async fn upsert_guest_cart(
        &self,
        guest: GuestSessionId,
        items: &[CartItem],
        expected_version: Option<i64>,
    ) -> Result<GuestCart, RepositoryError> {
        let mut rows = self.rows.lock().await;
        let current = rows.guest_carts.get(&guest).map(|c| c.version);
        check_version(current, expected_version, "guest cart")?;

        if current.is_none() && rows.guest_session_claimed(guest) {
            return Err(RepositoryError::GuestSessionClaimed);
        }

        let cart = GuestCart {
            guest_session_id: guest,
            items: items.to_vec(),
            version: current.unwrap_or(0) + 1,
            last_modified_at: Utc::now(),
        };
        rows.guest_carts.insert(guest, cart.clone());
        Ok(cart)
    }

    async fn upsert_user_cart(
        &self,
        user: UserId,
        items: &[CartItem],
        expected_version: Option<i64>,
    ) -> Result<UserCart, RepositoryError> {
        let mut rows = self.rows.lock().await;
        let current = rows.user_carts.get(&user).map(|c| c.version);
        check_version(current, expected_version, "user cart")?;

        let cart = UserCart {
            user_id: user,
            items: items.to_vec(),
            version: current.unwrap_or(0) + 1,
            last_modified_at: Utc::now(),
        };
        rows.user_carts.insert(user, cart.clone());
        Ok(cart)
    }

    async fn find_claim(
        &self,
        guest: GuestSessionId,
        user: UserId,
    ) -> Result<Option<ClaimRecord>, RepositoryError> {
        Ok(self.rows.lock().await.claims.get(&(guest, user)).cloned())
    }

    async fn commit_claim(&self, commit: ClaimCommit) -> Result<ClaimCommitted, RepositoryError> {
        let mut rows = self.rows.lock().await;
        let key = (commit.guest_session_id, commit.user_id);

        if rows.claims.contains_key(&key) {
            return Ok(ClaimCommitted::AlreadyClaimed);
        }

        let guest_version = rows.guest_carts.get(&commit.guest_session_id).map(|c| c.version);
        if guest_version != Some(commit.guest_version) {
            return Err(RepositoryError::Conflict("guest cart version moved".to_owned()));
        }
        let user_version = rows.user_carts.get(&commit.user_id).map(|c| c.version);
        check_version(user_version, Some(commit.user_version), "user cart")?;

        let now = Utc::now();
        let record = ClaimRecord {
            guest_session_id: commit.guest_session_id,
            user_id: commit.user_id,
            claimed_at: now,
        };
        let cart = UserCart {
            user_id: commit.user_id,
            items: commit.merged_items,
            version: commit.user_version + 1,
            last_modified_at: now,
        };

        rows.guest_carts.remove(&commit.guest_session_id);
        rows.user_carts.insert(commit.user_id, cart.clone());
        rows.claims.insert(key, record.clone());
        rows.pending.remove(&key);

        Ok(ClaimCommitted::Committed { record, cart })
    }

    async fn park_claim(
        &self,
        guest: GuestSessionId,
        user: UserId,
        parked_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut rows = self.rows.lock().await;
        if rows.claims.contains_key(&(guest, user)) {
            return Ok(());
        }
        rows.pending
            .entry((guest, user))
            .or_insert(PendingClaim {
                guest_session_id: guest,
                user_id: user,
                parked_at,
            });
        Ok(())
    }

    async fn parked_claims(&self, user: UserId) -> Result<Vec<PendingClaim>, RepositoryError> {
        let rows = self.rows.lock().await;
        let mut parked: Vec<_> = rows
            .pending
            .values()
            .filter(|p| p.user_id == user)
            .cloned()
            .collect();
        parked.sort_by_key(|p| p.parked_at);
        Ok(parked)
    }

    async fn release_claim(
        &self,
        guest: GuestSessionId,
        user: UserId,
    ) -> Result<(), RepositoryError> {
        self.rows.lock().await.pending.remove(&(guest, user));
        Ok(())
    }
}

/// User store backed by process memory.
#[derive(Default)]
pub struct MemoryUserStore {
    users: Mutex<HashMap<Email, (User, String)>>,
}

impl MemoryUserStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user with an already hashed password.
    pub async fn insert(&self, user: User, password_hash: String) {
        self.users
            .lock()
            .await
            .insert(user.email.clone(), (user, password_hash));
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_with_password(
        &self,
        email: &Email,
    ) -> Result<Option<(User, String)>, RepositoryError> {
        Ok(self.users.lock().await.get(email).cloned())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use cartgate_core::VariantId;

    use super::*;

    fn items(pairs: &[(i32, u32)]) -> Vec<CartItem> {
        pairs
            .iter()
            .map(|(v, q)| CartItem::new(VariantId::new(*v), *q))
            .collect()
    }

    #[tokio::test]
    async fn test_missing_carts_are_not_found() {
        let store = MemoryCartStore::new();
        assert!(matches!(
            store.get_guest_cart(GuestSessionId::generate()).await,
            Err(RepositoryError::NotFound)
        ));
        assert!(matches!(
            store.get_user_cart(UserId::new(1)).await,
            Err(RepositoryError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_upsert_versions_and_cas() {
        let store = MemoryCartStore::new();
        let user = UserId::new(7);

        let first = store.upsert_user_cart(user, &items(&[(1, 1)]), Some(0)).await.unwrap();
        assert_eq!(first.version, 1);

        let stale = store.upsert_user_cart(user, &items(&[(1, 5)]), Some(0)).await;
        assert!(matches!(stale, Err(RepositoryError::Conflict(_))));

        let lww = store.upsert_user_cart(user, &items(&[(2, 2)]), None).await.unwrap();
        assert_eq!(lww.version, 2);
        assert_eq!(store.get_user_cart(user).await.unwrap().items, items(&[(2, 2)]));
    }

    #[tokio::test]
    async fn test_commit_claim_is_test_and_set() {
        let store = MemoryCartStore::new();
        let guest = GuestSessionId::generate();
        let user = UserId::new(3);
        store.upsert_guest_cart(guest, &items(&[(1, 2)]), Some(0)).await.unwrap();

        let commit = ClaimCommit {
            guest_session_id: guest,
            user_id: user,
            merged_items: items(&[(1, 2)]),
            guest_version: 1,
            user_version: 0,
        };
        let first = store.commit_claim(commit.clone()).await.unwrap();
        assert!(matches!(first, ClaimCommitted::Committed { .. }));

        let second = store.commit_claim(commit).await.unwrap();
        assert_eq!(second, ClaimCommitted::AlreadyClaimed);
        assert_eq!(store.claim_count().await, 1);
        assert!(store.get_guest_cart(guest).await.is_err());
    }

    #[tokio::test]
    async fn test_commit_claim_rejects_moved_versions_without_side_effects() {
        let store = MemoryCartStore::new();
        let guest = GuestSessionId::generate();
        let user = UserId::new(3);
        store.upsert_guest_cart(guest, &items(&[(1, 2)]), Some(0)).await.unwrap();
        store.upsert_guest_cart(guest, &items(&[(1, 3)]), Some(1)).await.unwrap();

        let result = store
            .commit_claim(ClaimCommit {
                guest_session_id: guest,
                user_id: user,
                merged_items: items(&[(1, 2)]),
                guest_version: 1,
                user_version: 0,
            })
            .await;

        assert!(matches!(result, Err(RepositoryError::Conflict(_))));
        assert_eq!(store.claim_count().await, 0);
        assert_eq!(store.get_guest_cart(guest).await.unwrap().version, 2);
        assert!(store.get_user_cart(user).await.is_err());
    }

    #[tokio::test]
    async fn test_pending_claim_released_by_commit() {
        let store = MemoryCartStore::new();
        let guest = GuestSessionId::generate();
        let user = UserId::new(4);
        store.upsert_guest_cart(guest, &items(&[(2, 1)]), Some(0)).await.unwrap();

        let at = Utc::now();
        store.park_claim(guest, user, at).await.unwrap();
        store.park_claim(guest, user, at + chrono::Duration::seconds(5)).await.unwrap();
        let parked = store.parked_claims(user).await.unwrap();
        assert_eq!(parked.len(), 1);
        assert_eq!(parked[0].parked_at, at);
        assert!(store.parked_claims(UserId::new(5)).await.unwrap().is_empty());

        store
            .commit_claim(ClaimCommit {
                guest_session_id: guest,
                user_id: user,
                merged_items: items(&[(2, 1)]),
                guest_version: 1,
                user_version: 0,
            })
            .await
            .unwrap();
        assert!(store.parked_claims(user).await.unwrap().is_empty());

        store.park_claim(guest, user, Utc::now()).await.unwrap();
        assert!(store.parked_claims(user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_claimed_guest_session_cannot_get_new_cart() {
        let store = MemoryCartStore::new();
        let guest = GuestSessionId::generate();
        store.upsert_guest_cart(guest, &items(&[(1, 1)]), Some(0)).await.unwrap();
        store
            .commit_claim(ClaimCommit {
                guest_session_id: guest,
                user_id: UserId::new(1),
                merged_items: items(&[(1, 1)]),
                guest_version: 1,
                user_version: 0,
            })
            .await
            .unwrap();

        let result = store.upsert_guest_cart(guest, &items(&[(2, 1)]), Some(0)).await;
        assert!(matches!(result, Err(RepositoryError::GuestSessionClaimed)));
    }
}
