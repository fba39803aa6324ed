//! Claim protocol against a [`CartStore`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use thiserror::Error;
use tracing::{debug, info, instrument};

use cartgate_core::{GuestSessionId, UserId, merge_items};

use crate::db::{CartStore, RepositoryError};
use crate::models::{ClaimCommit, ClaimCommitted, PendingClaim, UserCart};

/// Attempts before a claim that keeps losing version races gives up.
const MAX_ATTEMPTS: u32 = 8;

/// Base delay in milliseconds between conflicting attempts; grows linearly, plus jitter.
const BACKOFF_STEP_MS: u64 = 5;

/// How a claim ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The pair was claimed before; nothing changed.
    AlreadyClaimed,
    /// The guest session has no cart; nothing changed and no claim was recorded.
    NoGuestCart,
    /// The guest cart was merged into the user cart and removed.
    Merged { cart: UserCart },
}

impl ClaimOutcome {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AlreadyClaimed => "already_claimed",
            Self::NoGuestCart => "no_guest_cart",
            Self::Merged { .. } => "merged",
        }
    }
}

/// A claim that could not complete.
#[derive(Debug, Error)]
pub enum ClaimError {
    #[error("cart store error: {0}")]
    Store(#[from] RepositoryError),

    #[error("cart store did not answer within {0:?}")]
    Timeout(Duration),

    #[error("claim lost {0} consecutive version races")]
    Contention(u32),
}

impl ClaimError {
    /// Whether the claim may succeed if triggered again later.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::Timeout(_) | Self::Contention(_) => true,
        }
    }
}

/// Coarse position in the claim protocol, recorded on the tracing span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClaimState {
    NoGuestCart,
    GuestCartPresent,
    Claiming,
    Claimed,
    AlreadyClaimed,
}

impl ClaimState {
    const fn as_str(self) -> &'static str {
        match self {
            Self::NoGuestCart => "no_guest_cart",
            Self::GuestCartPresent => "guest_cart_present",
            Self::Claiming => "claiming",
            Self::Claimed => "claimed",
            Self::AlreadyClaimed => "already_claimed",
        }
    }
}

/// Runs the claim protocol for one (guest session, user) pair at a time.
///
/// Safe to call concurrently for the same or different pairs; the store's
/// atomic commit is the only serialization point.
pub struct ClaimCoordinator {
    store: Arc<dyn CartStore>,
    store_timeout: Duration,
}

impl ClaimCoordinator {
    #[must_use]
    pub fn new(store: Arc<dyn CartStore>, store_timeout: Duration) -> Self {
        Self {
            store,
            store_timeout,
        }
    }

    /// Merge the guest session's cart into the user's cart, at most once.
    ///
    /// # Errors
    ///
    /// Returns `ClaimError::Timeout` if a store call exceeds the configured
    /// bound, `ClaimError::Contention` if every attempt lost a version race,
    /// and `ClaimError::Store` for any other store failure. After an error the
    /// stored state is exactly as before the call.
    #[instrument(
        skip(self),
        fields(guest_session_id = %guest, user_id = %user, outcome)
    )]
    pub async fn claim(
        &self,
        guest: GuestSessionId,
        user: UserId,
    ) -> Result<ClaimOutcome, ClaimError> {
        for attempt in 1..=MAX_ATTEMPTS {
            if let Some(outcome) = self.attempt(guest, user).await? {
                tracing::Span::current().record("outcome", outcome.as_str());
                info!(attempt, outcome = outcome.as_str(), "Guest cart claim finished");
                return Ok(outcome);
            }

            debug!(attempt, "Claim commit lost a version race, re-reading carts");
            tokio::time::sleep(backoff(attempt)).await;
        }

        Err(ClaimError::Contention(MAX_ATTEMPTS))
    }

    /// Durably record that a claim for the pair was triggered.
    ///
    /// # Errors
    ///
    /// Returns `ClaimError` if the store fails or times out.
    pub async fn park(
        &self,
        guest: GuestSessionId,
        user: UserId,
        parked_at: DateTime<Utc>,
    ) -> Result<(), ClaimError> {
        self.bounded(self.store.park_claim(guest, user, parked_at)).await
    }

    /// Claims recorded by [`Self::park`] that have not committed yet.
    ///
    /// # Errors
    ///
    /// Returns `ClaimError` if the store fails or times out.
    pub async fn parked(&self, user: UserId) -> Result<Vec<PendingClaim>, ClaimError> {
        self.bounded(self.store.parked_claims(user)).await
    }

    /// Forget a parked claim that needs no further attempts.
    ///
    /// # Errors
    ///
    /// Returns `ClaimError` if the store fails or times out.
    pub async fn release(&self, guest: GuestSessionId, user: UserId) -> Result<(), ClaimError> {
        self.bounded(self.store.release_claim(guest, user)).await
    }

    /// One read-merge-commit pass. `None` means a version conflict.
    async fn attempt(
        &self,
        guest: GuestSessionId,
        user: UserId,
    ) -> Result<Option<ClaimOutcome>, ClaimError> {
        if self.bounded(self.store.find_claim(guest, user)).await?.is_some() {
            debug!(state = ClaimState::AlreadyClaimed.as_str());
            return Ok(Some(ClaimOutcome::AlreadyClaimed));
        }

        let guest_cart = match self.bounded(self.store.get_guest_cart(guest)).await {
            Ok(cart) => cart,
            Err(ClaimError::Store(RepositoryError::NotFound)) => {
                debug!(state = ClaimState::NoGuestCart.as_str());
                return Ok(Some(ClaimOutcome::NoGuestCart));
            }
            Err(e) => return Err(e),
        };
        debug!(
            state = ClaimState::GuestCartPresent.as_str(),
            guest_version = guest_cart.version
        );

        let user_cart = match self.bounded(self.store.get_user_cart(user)).await {
            Ok(cart) => cart,
            Err(ClaimError::Store(RepositoryError::NotFound)) => UserCart::empty(user),
            Err(e) => return Err(e),
        };

        let commit = ClaimCommit {
            guest_session_id: guest,
            user_id: user,
            merged_items: merge_items(&user_cart.items, &guest_cart.items),
            guest_version: guest_cart.version,
            user_version: user_cart.version,
        };
        debug!(
            state = ClaimState::Claiming.as_str(),
            user_version = user_cart.version
        );

        match self.bounded(self.store.commit_claim(commit)).await {
            Ok(ClaimCommitted::Committed { cart, .. }) => {
                debug!(state = ClaimState::Claimed.as_str(), user_version = cart.version);
                Ok(Some(ClaimOutcome::Merged { cart }))
            }
            Ok(ClaimCommitted::AlreadyClaimed) => {
                debug!(state = ClaimState::AlreadyClaimed.as_str());
                Ok(Some(ClaimOutcome::AlreadyClaimed))
            }
            Err(ClaimError::Store(RepositoryError::Conflict(_))) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, RepositoryError>>,
    ) -> Result<T, ClaimError> {
        tokio::time::timeout(self.store_timeout, call)
            .await
            .map_err(|_| ClaimError::Timeout(self.store_timeout))?
            .map_err(ClaimError::Store)
    }
}

fn backoff(attempt: u32) -> Duration {
    let jitter = rand::rng().random_range(0..=BACKOFF_STEP_MS);
    Duration::from_millis(BACKOFF_STEP_MS * u64::from(attempt) + jitter)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use cartgate_core::{CartItem, VariantId};

    use super::*;
    use crate::db::MemoryCartStore;
    use crate::models::{ClaimRecord, GuestCart, PendingClaim};

    fn items(pairs: &[(i32, u32)]) -> Vec<CartItem> {
        pairs
            .iter()
            .map(|(v, q)| CartItem::new(VariantId::new(*v), *q))
            .collect()
    }

    fn coordinator(store: &Arc<MemoryCartStore>) -> ClaimCoordinator {
        ClaimCoordinator::new(store.clone(), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_guest_cart_merges_into_empty_user_cart() {
        let store = Arc::new(MemoryCartStore::new());
        let guest = GuestSessionId::generate();
        let user = UserId::new(1);
        store.upsert_guest_cart(guest, &items(&[(1, 2), (2, 1)]), None).await.unwrap();

        let outcome = coordinator(&store).claim(guest, user).await.unwrap();

        let ClaimOutcome::Merged { cart } = outcome else {
            panic!("expected merge, got {outcome:?}");
        };
        assert_eq!(cart.items, items(&[(1, 2), (2, 1)]));
        assert!(store.get_guest_cart(guest).await.is_err());
    }

    #[tokio::test]
    async fn test_guest_cart_sums_into_existing_user_cart() {
        let store = Arc::new(MemoryCartStore::new());
        let guest = GuestSessionId::generate();
        let user = UserId::new(1);
        store.upsert_user_cart(user, &items(&[(1, 1), (3, 3)]), None).await.unwrap();
        store.upsert_guest_cart(guest, &items(&[(1, 1)]), None).await.unwrap();

        coordinator(&store).claim(guest, user).await.unwrap();

        let cart = store.get_user_cart(user).await.unwrap();
        assert_eq!(cart.items, items(&[(1, 2), (3, 3)]));
    }

    #[tokio::test]
    async fn test_second_claim_is_a_no_op() {
        let store = Arc::new(MemoryCartStore::new());
        let guest = GuestSessionId::generate();
        let user = UserId::new(1);
        store.upsert_guest_cart(guest, &items(&[(1, 2)]), None).await.unwrap();
        let coordinator = coordinator(&store);

        coordinator.claim(guest, user).await.unwrap();
        let before = store.get_user_cart(user).await.unwrap();
        let outcome = coordinator.claim(guest, user).await.unwrap();

        assert_eq!(outcome, ClaimOutcome::AlreadyClaimed);
        assert_eq!(store.get_user_cart(user).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_no_guest_cart_records_nothing() {
        let store = Arc::new(MemoryCartStore::new());
        let guest = GuestSessionId::generate();
        let user = UserId::new(1);
        store.upsert_user_cart(user, &items(&[(4, 1)]), None).await.unwrap();

        let outcome = coordinator(&store).claim(guest, user).await.unwrap();

        assert_eq!(outcome, ClaimOutcome::NoGuestCart);
        assert_eq!(store.claim_count().await, 0);
        assert_eq!(store.get_user_cart(user).await.unwrap().items, items(&[(4, 1)]));
    }

    #[tokio::test]
    async fn test_concurrent_claims_of_one_pair_merge_once() {
        let store = Arc::new(MemoryCartStore::new());
        let guest = GuestSessionId::generate();
        let user = UserId::new(1);
        store.upsert_guest_cart(guest, &items(&[(1, 1)]), None).await.unwrap();
        let coordinator = Arc::new(coordinator(&store));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move { coordinator.claim(guest, user).await })
            })
            .collect();

        let mut merged = 0;
        for handle in handles {
            if let ClaimOutcome::Merged { .. } = handle.await.unwrap().unwrap() {
                merged += 1;
            }
        }

        assert_eq!(merged, 1);
        assert_eq!(store.claim_count().await, 1);
        assert_eq!(store.get_user_cart(user).await.unwrap().items, items(&[(1, 1)]));
    }

    #[tokio::test]
    async fn test_claim_order_does_not_change_result() {
        let mut results = Vec::new();
        for order in [[0, 1], [1, 0]] {
            let store = Arc::new(MemoryCartStore::new());
            let user = UserId::new(1);
            store.upsert_user_cart(user, &items(&[(2, 1)]), None).await.unwrap();
            let guests = [GuestSessionId::generate(), GuestSessionId::generate()];
            store.upsert_guest_cart(guests[0], &items(&[(3, 2), (2, 1)]), None).await.unwrap();
            store.upsert_guest_cart(guests[1], &items(&[(1, 4), (3, 1)]), None).await.unwrap();

            let coordinator = coordinator(&store);
            for i in order {
                coordinator.claim(guests[i], user).await.unwrap();
            }
            results.push(store.get_user_cart(user).await.unwrap().items);
        }

        assert_eq!(results[0], results[1]);
        assert_eq!(results[0], items(&[(1, 4), (2, 2), (3, 3)]));
    }

    /// Adds a line to the guest cart right before the first claim commit, as a
    /// concurrent request on the guest session would.
    struct LateGuestWrite {
        inner: MemoryCartStore,
        late: CartItem,
        fired: AtomicBool,
    }

    #[async_trait]
    impl CartStore for LateGuestWrite {
        async fn get_guest_cart(&self, guest: GuestSessionId) -> Result<GuestCart, RepositoryError> {
            self.inner.get_guest_cart(guest).await
        }

        async fn get_user_cart(&self, user: UserId) -> Result<UserCart, RepositoryError> {
            self.inner.get_user_cart(user).await
        }

        async fn upsert_guest_cart(
            &self,
            guest: GuestSessionId,
            items: &[CartItem],
            expected_version: Option<i64>,
        ) -> Result<GuestCart, RepositoryError> {
            self.inner.upsert_guest_cart(guest, items, expected_version).await
        }

        async fn upsert_user_cart(
            &self,
            user: UserId,
            items: &[CartItem],
            expected_version: Option<i64>,
        ) -> Result<UserCart, RepositoryError> {
            self.inner.upsert_user_cart(user, items, expected_version).await
        }

        async fn find_claim(
            &self,
            guest: GuestSessionId,
            user: UserId,
        ) -> Result<Option<ClaimRecord>, RepositoryError> {
            self.inner.find_claim(guest, user).await
        }

        async fn commit_claim(&self, commit: ClaimCommit) -> Result<ClaimCommitted, RepositoryError> {
            if !self.fired.swap(true, Ordering::SeqCst) {
                let mut guest = self.inner.get_guest_cart(commit.guest_session_id).await?;
                guest.items.push(self.late);
                self.inner
                    .upsert_guest_cart(commit.guest_session_id, &guest.items, Some(guest.version))
                    .await?;
            }
            self.inner.commit_claim(commit).await
        }

        async fn park_claim(
            &self,
            guest: GuestSessionId,
            user: UserId,
            parked_at: DateTime<Utc>,
        ) -> Result<(), RepositoryError> {
            self.inner.park_claim(guest, user, parked_at).await
        }

        async fn parked_claims(&self, user: UserId) -> Result<Vec<PendingClaim>, RepositoryError> {
            self.inner.parked_claims(user).await
        }

        async fn release_claim(
            &self,
            guest: GuestSessionId,
            user: UserId,
        ) -> Result<(), RepositoryError> {
            self.inner.release_claim(guest, user).await
        }
    }

    #[tokio::test]
    async fn test_guest_write_during_claim_is_not_lost() {
        let store = Arc::new(LateGuestWrite {
            inner: MemoryCartStore::new(),
            late: CartItem::new(VariantId::new(8), 1),
            fired: AtomicBool::new(false),
        });
        let guest = GuestSessionId::generate();
        let user = UserId::new(1);
        store.upsert_guest_cart(guest, &items(&[(1, 1)]), None).await.unwrap();

        let outcome = ClaimCoordinator::new(store.clone(), Duration::from_secs(1))
            .claim(guest, user)
            .await
            .unwrap();

        let ClaimOutcome::Merged { cart } = outcome else {
            panic!("expected merge, got {outcome:?}");
        };
        assert_eq!(cart.items, items(&[(1, 1), (8, 1)]));
        assert_eq!(cart.version, 1);
        assert!(store.fired.load(Ordering::SeqCst));
        assert_eq!(store.inner.claim_count().await, 1);
    }

    #[test]
    fn test_error_classification() {
        assert!(ClaimError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(ClaimError::Contention(MAX_ATTEMPTS).is_transient());
        assert!(!ClaimError::Store(RepositoryError::DataCorruption("x".into())).is_transient());
    }
}
