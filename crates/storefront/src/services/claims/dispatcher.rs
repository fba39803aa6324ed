//! Claim event queue and background worker.
//!
//! Every claim the worker picks up is first parked in the cart store, and the
//! row stays until the claim commits or turns out to need nothing. A claim that
//! fails transiently is therefore retried by the user's next cart request even
//! if the process restarted in between. The moka cache only holds claims that
//! could not be parked in the store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::future::Cache;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};

use cartgate_core::{GuestSessionId, UserId};

use super::coordinator::{ClaimCoordinator, ClaimOutcome};

/// How long a claim parked only in memory waits for a retry trigger.
const PENDING_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Upper bound on claims parked only in memory.
const PENDING_CAPACITY: u64 = 100_000;

/// A visitor holding a guest session just authenticated as `user_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimEvent {
    pub guest_session_id: GuestSessionId,
    pub user_id: UserId,
    pub authenticated_at: DateTime<Utc>,
}

impl ClaimEvent {
    #[must_use]
    pub fn now(guest_session_id: GuestSessionId, user_id: UserId) -> Self {
        Self {
            guest_session_id,
            user_id,
            authenticated_at: Utc::now(),
        }
    }
}

type PendingClaims = Cache<(GuestSessionId, UserId), DateTime<Utc>>;

/// Handle used by request handlers to trigger claims.
///
/// Dispatching never waits on the store: events go onto a bounded queue, and
/// when the queue is full they are parked for retry on the user's next cart
/// request.
#[derive(Clone)]
pub struct ClaimDispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    tx: mpsc::Sender<ClaimEvent>,
    pending: PendingClaims,
    coordinator: Arc<ClaimCoordinator>,
}

/// Drains the claim queue, running each claim on its own task.
pub struct ClaimWorker {
    rx: mpsc::Receiver<ClaimEvent>,
    coordinator: Arc<ClaimCoordinator>,
    pending: PendingClaims,
}

impl ClaimDispatcher {
    /// Create a dispatcher and the worker that serves it.
    ///
    /// The worker does nothing until [`ClaimWorker::run`] is spawned.
    #[must_use]
    pub fn new(coordinator: Arc<ClaimCoordinator>, queue_capacity: usize) -> (Self, ClaimWorker) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let pending = Cache::builder()
            .max_capacity(PENDING_CAPACITY)
            .time_to_live(PENDING_TTL)
            .build();

        let dispatcher = Self {
            inner: Arc::new(DispatcherInner {
                tx,
                pending: pending.clone(),
                coordinator: coordinator.clone(),
            }),
        };
        let worker = ClaimWorker {
            rx,
            coordinator,
            pending,
        };

        (dispatcher, worker)
    }

    /// Enqueue a claim without waiting for it.
    pub async fn dispatch(&self, event: ClaimEvent) {
        match self.inner.tx.try_send(event) {
            Ok(()) => debug!(
                guest_session_id = %event.guest_session_id,
                user_id = %event.user_id,
                "Claim event queued"
            ),
            Err(TrySendError::Full(event) | TrySendError::Closed(event)) => {
                warn!(
                    guest_session_id = %event.guest_session_id,
                    user_id = %event.user_id,
                    "Claim queue unavailable, parking claim for retry"
                );
                self.inner
                    .pending
                    .insert(
                        (event.guest_session_id, event.user_id),
                        event.authenticated_at,
                    )
                    .await;

                let coordinator = self.inner.coordinator.clone();
                tokio::spawn(async move {
                    park(&coordinator, event).await;
                });
            }
        }
    }

    /// Re-dispatch every parked claim for `user`, from the store and from
    /// memory.
    ///
    /// Returns how many claims were re-dispatched.
    pub async fn retry_pending(&self, user: UserId) -> usize {
        let mut parked: HashMap<GuestSessionId, DateTime<Utc>> = HashMap::new();

        let in_memory: Vec<_> = self
            .inner
            .pending
            .iter()
            .filter(|(key, _)| key.1 == user)
            .map(|(key, authenticated_at)| (*key, authenticated_at))
            .collect();
        for (key, authenticated_at) in in_memory {
            self.inner.pending.invalidate(&key).await;
            parked.insert(key.0, authenticated_at);
        }

        match self.inner.coordinator.parked(user).await {
            Ok(rows) => {
                for row in rows {
                    parked.entry(row.guest_session_id).or_insert(row.parked_at);
                }
            }
            Err(e) => warn!(error = %e, user_id = %user, "Could not read parked claims"),
        }

        for (guest_session_id, authenticated_at) in &parked {
            self.dispatch(ClaimEvent {
                guest_session_id: *guest_session_id,
                user_id: user,
                authenticated_at: *authenticated_at,
            })
            .await;
        }

        if !parked.is_empty() {
            info!(user_id = %user, count = parked.len(), "Re-dispatched parked claims");
        }
        parked.len()
    }

    /// Whether a claim for the pair is parked in memory awaiting retry.
    #[must_use]
    pub fn is_pending(&self, guest: GuestSessionId, user: UserId) -> bool {
        self.inner.pending.contains_key(&(guest, user))
    }
}

impl ClaimWorker {
    /// Process events until every dispatcher handle is dropped.
    pub async fn run(mut self) {
        while let Some(event) = self.rx.recv().await {
            let coordinator = self.coordinator.clone();
            let pending = self.pending.clone();
            tokio::spawn(process(coordinator, pending, event));
        }
        info!("Claim queue closed, worker exiting");
    }
}

/// Park `event` in the store. Returns whether the row was written.
async fn park(coordinator: &ClaimCoordinator, event: ClaimEvent) -> bool {
    match coordinator
        .park(event.guest_session_id, event.user_id, event.authenticated_at)
        .await
    {
        Ok(()) => true,
        Err(e) => {
            warn!(
                error = %e,
                guest_session_id = %event.guest_session_id,
                user_id = %event.user_id,
                "Could not park claim in the store"
            );
            false
        }
    }
}

async fn release(coordinator: &ClaimCoordinator, event: ClaimEvent) {
    if let Err(e) = coordinator
        .release(event.guest_session_id, event.user_id)
        .await
    {
        // The next retry finds nothing to do and releases it then.
        warn!(
            error = %e,
            guest_session_id = %event.guest_session_id,
            user_id = %event.user_id,
            "Could not release parked claim"
        );
    }
}

async fn process(coordinator: Arc<ClaimCoordinator>, pending: PendingClaims, event: ClaimEvent) {
    let key = (event.guest_session_id, event.user_id);
    let durable = park(&coordinator, event).await;

    match coordinator.claim(event.guest_session_id, event.user_id).await {
        // The commit released the parked row.
        Ok(ClaimOutcome::Merged { .. }) => {}
        Ok(ClaimOutcome::AlreadyClaimed | ClaimOutcome::NoGuestCart) => {
            release(&coordinator, event).await;
        }
        Err(e) if e.is_transient() => {
            warn!(
                error = %e,
                guest_session_id = %event.guest_session_id,
                user_id = %event.user_id,
                durable,
                "Claim failed, parked for retry"
            );
            if !durable {
                pending.insert(key, event.authenticated_at).await;
            }
        }
        Err(e) => {
            let event_id = sentry::capture_error(&e);
            error!(
                error = %e,
                guest_session_id = %event.guest_session_id,
                user_id = %event.user_id,
                sentry_event_id = %event_id,
                "Claim failed permanently"
            );
            release(&coordinator, event).await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use cartgate_core::{CartItem, VariantId};

    use super::*;
    use crate::db::{CartStore, MemoryCartStore};

    fn setup(capacity: usize) -> (Arc<MemoryCartStore>, ClaimDispatcher, ClaimWorker) {
        let store = Arc::new(MemoryCartStore::new());
        let coordinator = Arc::new(ClaimCoordinator::new(store.clone(), Duration::from_secs(1)));
        let (dispatcher, worker) = ClaimDispatcher::new(coordinator, capacity);
        (store, dispatcher, worker)
    }

    #[tokio::test]
    async fn test_worker_runs_dispatched_claim() {
        let (store, dispatcher, worker) = setup(4);
        let guest = GuestSessionId::generate();
        let user = UserId::new(9);
        store
            .upsert_guest_cart(guest, &[CartItem::new(VariantId::new(1), 1)], None)
            .await
            .unwrap();
        tokio::spawn(worker.run());

        dispatcher.dispatch(ClaimEvent::now(guest, user)).await;

        let mut claimed = false;
        for _ in 0..100 {
            if store.find_claim(guest, user).await.unwrap().is_some() {
                claimed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(claimed);
    }

    #[tokio::test]
    async fn test_full_queue_parks_event() {
        let (_store, dispatcher, _worker) = setup(1);
        let user = UserId::new(1);
        let first = GuestSessionId::generate();
        let second = GuestSessionId::generate();

        dispatcher.dispatch(ClaimEvent::now(first, user)).await;
        dispatcher.dispatch(ClaimEvent::now(second, user)).await;

        assert!(!dispatcher.is_pending(first, user));
        assert!(dispatcher.is_pending(second, user));
    }

    #[tokio::test]
    async fn test_retry_pending_only_touches_that_user() {
        let (_store, dispatcher, _worker) = setup(1);
        let guest = GuestSessionId::generate();
        let other = GuestSessionId::generate();
        dispatcher.dispatch(ClaimEvent::now(GuestSessionId::generate(), UserId::new(3))).await;
        dispatcher.dispatch(ClaimEvent::now(guest, UserId::new(1))).await;
        dispatcher.dispatch(ClaimEvent::now(other, UserId::new(2))).await;

        // Queue is still full, so the retried event is parked again.
        assert_eq!(dispatcher.retry_pending(UserId::new(1)).await, 1);
        assert!(dispatcher.is_pending(guest, UserId::new(1)));
        assert!(dispatcher.is_pending(other, UserId::new(2)));
    }

    #[tokio::test]
    async fn test_claim_parked_by_earlier_process_is_retried() {
        let (store, dispatcher, worker) = setup(4);
        let guest = GuestSessionId::generate();
        let user = UserId::new(4);
        store
            .upsert_guest_cart(guest, &[CartItem::new(VariantId::new(2), 3)], None)
            .await
            .unwrap();
        // Left behind by a process that stopped before the claim committed.
        store.park_claim(guest, user, Utc::now()).await.unwrap();
        tokio::spawn(worker.run());

        assert_eq!(dispatcher.retry_pending(user).await, 1);

        let mut claimed = false;
        for _ in 0..100 {
            if store.find_claim(guest, user).await.unwrap().is_some() {
                claimed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(claimed);
        assert!(store.parked_claims(user).await.unwrap().is_empty());
        assert_eq!(
            store.get_user_cart(user).await.unwrap().items,
            vec![CartItem::new(VariantId::new(2), 3)]
        );
    }

    #[tokio::test]
    async fn test_claim_without_guest_cart_releases_parked_row() {
        let (store, dispatcher, worker) = setup(4);
        let guest = GuestSessionId::generate();
        let user = UserId::new(6);
        store.park_claim(guest, user, Utc::now()).await.unwrap();
        tokio::spawn(worker.run());

        dispatcher.dispatch(ClaimEvent::now(guest, user)).await;

        let mut released = false;
        for _ in 0..100 {
            if store.parked_claims(user).await.unwrap().is_empty() {
                released = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(released);
        assert_eq!(store.claim_count().await, 0);
    }
}
