//! Application state shared across handlers.

use std::sync::Arc;

use sqlx::PgPool;

use cartgate_core::PermissionMatrix;

use crate::config::{ConfigError, StorefrontConfig};
use crate::db::{CartStore, UserStore};
use crate::services::auth::AuthService;
use crate::services::cart::CartService;
use crate::services::claims::{ClaimCoordinator, ClaimDispatcher, ClaimWorker};
use crate::services::token::TokenCodec;

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc`. The permission matrix and the
/// token codec are built once here and only read afterwards.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: StorefrontConfig,
    pool: Option<PgPool>,
    tokens: TokenCodec,
    auth: AuthService,
    carts: CartService,
    claims: ClaimDispatcher,
}

impl AppState {
    /// Create a new application state.
    ///
    /// Returns the state together with the claim worker, which the caller must
    /// spawn for claims to run.
    ///
    /// # Arguments
    ///
    /// * `config` - Storefront configuration
    /// * `pool` - `PostgreSQL` pool for readiness checks (`None` in tests)
    /// * `cart_store` - Cart persistence
    /// * `user_store` - Credential lookup for login
    ///
    /// # Errors
    ///
    /// Returns an error if the token key cannot be used.
    pub fn new(
        config: StorefrontConfig,
        pool: Option<PgPool>,
        cart_store: Arc<dyn CartStore>,
        user_store: Arc<dyn UserStore>,
    ) -> Result<(Self, ClaimWorker), ConfigError> {
        let tokens = TokenCodec::new(&config.token)?;
        let coordinator = Arc::new(ClaimCoordinator::new(
            cart_store.clone(),
            config.claims.store_timeout,
        ));
        let (claims, worker) = ClaimDispatcher::new(coordinator, config.claims.queue_capacity);

        let state = Self {
            inner: Arc::new(AppStateInner {
                config,
                pool,
                tokens,
                auth: AuthService::new(user_store),
                carts: CartService::new(cart_store),
                claims,
            }),
        };

        Ok((state, worker))
    }

    /// Get a reference to the storefront configuration.
    #[must_use]
    pub fn config(&self) -> &StorefrontConfig {
        &self.inner.config
    }

    /// Get a reference to the database connection pool, if one is attached.
    #[must_use]
    pub fn pool(&self) -> Option<&PgPool> {
        self.inner.pool.as_ref()
    }

    #[must_use]
    pub fn permissions(&self) -> &PermissionMatrix {
        &self.inner.config.permissions
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenCodec {
        &self.inner.tokens
    }

    #[must_use]
    pub fn auth(&self) -> &AuthService {
        &self.inner.auth
    }

    #[must_use]
    pub fn carts(&self) -> &CartService {
        &self.inner.carts
    }

    #[must_use]
    pub fn claims(&self) -> &ClaimDispatcher {
        &self.inner.claims
    }
}
