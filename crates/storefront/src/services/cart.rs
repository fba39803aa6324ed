//! Cart reads and writes for guests and users.
//!
//! Every mutation is a read-modify-write guarded by the row version, so two
//! tabs adding items at once both land instead of one overwriting the other.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, instrument};

use cartgate_core::{CartItem, GuestSessionId, UserId, VariantId, add_quantity, item_count, set_quantity};

use crate::db::{CartStore, RepositoryError};

/// Attempts for one cart mutation before reporting the conflict.
const MAX_WRITE_ATTEMPTS: u32 = 5;

/// Whose cart a request operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CartOwner {
    Guest(GuestSessionId),
    User(UserId),
}

impl CartOwner {
    const fn kind(self) -> &'static str {
        match self {
            Self::Guest(_) => "guest",
            Self::User(_) => "user",
        }
    }
}

/// Cart as returned to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CartView {
    pub owner: &'static str,
    pub items: Vec<CartItem>,
    pub item_count: u64,
    pub version: i64,
}

impl CartView {
    /// Cart of a visitor who has not added anything yet.
    #[must_use]
    pub const fn empty_guest() -> Self {
        Self {
            owner: "guest",
            items: Vec::new(),
            item_count: 0,
            version: 0,
        }
    }

    fn new(owner: CartOwner, items: Vec<CartItem>, version: i64) -> Self {
        Self {
            owner: owner.kind(),
            item_count: item_count(&items),
            items,
            version,
        }
    }
}

/// Cart operations over a [`CartStore`].
#[derive(Clone)]
pub struct CartService {
    store: Arc<dyn CartStore>,
}

impl CartService {
    #[must_use]
    pub fn new(store: Arc<dyn CartStore>) -> Self {
        Self { store }
    }

    /// Current cart; an owner without a row has an empty cart at version 0.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the store fails.
    pub async fn get(&self, owner: CartOwner) -> Result<CartView, RepositoryError> {
        let (items, version) = self.load(owner).await?;
        Ok(CartView::new(owner, items, version))
    }

    /// Add `quantity` units of a variant.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::GuestSessionClaimed` if a guest session that
    /// was already claimed tries to start a new cart, `Conflict` if every
    /// attempt lost a version race, or any other store error.
    #[instrument(skip(self))]
    pub async fn add(
        &self,
        owner: CartOwner,
        variant_id: VariantId,
        quantity: u32,
    ) -> Result<CartView, RepositoryError> {
        self.modify(owner, |items| add_quantity(items, variant_id, quantity))
            .await
    }

    /// Set the quantity of a variant; zero removes it.
    ///
    /// # Errors
    ///
    /// Same as [`CartService::add`].
    #[instrument(skip(self))]
    pub async fn set(
        &self,
        owner: CartOwner,
        variant_id: VariantId,
        quantity: u32,
    ) -> Result<CartView, RepositoryError> {
        self.modify(owner, |items| set_quantity(items, variant_id, quantity))
            .await
    }

    /// Remove a variant entirely.
    ///
    /// # Errors
    ///
    /// Same as [`CartService::add`].
    pub async fn remove(
        &self,
        owner: CartOwner,
        variant_id: VariantId,
    ) -> Result<CartView, RepositoryError> {
        self.set(owner, variant_id, 0).await
    }

    /// Empty a user's cart regardless of its version.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the store fails.
    #[instrument(skip(self))]
    pub async fn clear_user_cart(&self, user: UserId) -> Result<CartView, RepositoryError> {
        let cart = self.store.upsert_user_cart(user, &[], None).await?;
        Ok(CartView::new(CartOwner::User(user), cart.items, cart.version))
    }

    async fn load(&self, owner: CartOwner) -> Result<(Vec<CartItem>, i64), RepositoryError> {
        let loaded = match owner {
            CartOwner::Guest(guest) => self
                .store
                .get_guest_cart(guest)
                .await
                .map(|cart| (cart.items, cart.version)),
            CartOwner::User(user) => self
                .store
                .get_user_cart(user)
                .await
                .map(|cart| (cart.items, cart.version)),
        };

        match loaded {
            Err(RepositoryError::NotFound) => Ok((Vec::new(), 0)),
            other => other,
        }
    }

    async fn modify(
        &self,
        owner: CartOwner,
        change: impl Fn(&[CartItem]) -> Vec<CartItem> + Send,
    ) -> Result<CartView, RepositoryError> {
        let mut attempt = 1;
        loop {
            let (items, version) = self.load(owner).await?;
            let updated = change(&items);

            let written = match owner {
                CartOwner::Guest(guest) => self
                    .store
                    .upsert_guest_cart(guest, &updated, Some(version))
                    .await
                    .map(|cart| (cart.items, cart.version)),
                CartOwner::User(user) => self
                    .store
                    .upsert_user_cart(user, &updated, Some(version))
                    .await
                    .map(|cart| (cart.items, cart.version)),
            };

            match written {
                Ok((items, version)) => return Ok(CartView::new(owner, items, version)),
                Err(RepositoryError::Conflict(reason)) if attempt < MAX_WRITE_ATTEMPTS => {
                    debug!(attempt, %reason, "Cart write lost a version race, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::MemoryCartStore;

    fn item(variant: i32, quantity: u32) -> CartItem {
        CartItem::new(VariantId::new(variant), quantity)
    }

    #[tokio::test]
    async fn test_missing_cart_is_empty() {
        let service = CartService::new(Arc::new(MemoryCartStore::new()));
        let view = service.get(CartOwner::User(UserId::new(1))).await.unwrap();
        assert!(view.items.is_empty());
        assert_eq!(view.version, 0);
        assert_eq!(view.owner, "user");
    }

    #[tokio::test]
    async fn test_add_set_remove() {
        let service = CartService::new(Arc::new(MemoryCartStore::new()));
        let owner = CartOwner::Guest(GuestSessionId::generate());

        service.add(owner, VariantId::new(1), 2).await.unwrap();
        let view = service.add(owner, VariantId::new(1), 1).await.unwrap();
        assert_eq!(view.items, vec![item(1, 3)]);

        let view = service.set(owner, VariantId::new(2), 4).await.unwrap();
        assert_eq!(view.items, vec![item(1, 3), item(2, 4)]);
        assert_eq!(view.item_count, 7);

        let view = service.remove(owner, VariantId::new(1)).await.unwrap();
        assert_eq!(view.items, vec![item(2, 4)]);
        assert_eq!(view.version, 4);
    }

    #[tokio::test]
    async fn test_concurrent_adds_all_land() {
        let service = CartService::new(Arc::new(MemoryCartStore::new()));
        let owner = CartOwner::User(UserId::new(2));

        let handles: Vec<_> = (1..=4)
            .map(|variant| {
                let service = service.clone();
                tokio::spawn(async move { service.add(owner, VariantId::new(variant), 1).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let view = service.get(owner).await.unwrap();
        assert_eq!(view.item_count, 4);
    }

    #[tokio::test]
    async fn test_clear_user_cart() {
        let service = CartService::new(Arc::new(MemoryCartStore::new()));
        let user = UserId::new(3);
        service.add(CartOwner::User(user), VariantId::new(1), 5).await.unwrap();

        let view = service.clear_user_cart(user).await.unwrap();
        assert!(view.items.is_empty());
    }
}
