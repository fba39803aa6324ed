//! Cart route handlers.
//!
//! Anonymous visitors get a guest cart keyed by the guest session ID in their
//! session cookie, minted on the first mutation. Authenticated callers work on
//! their user cart and need `manage_own_cart`, checked by the
//! [`OptionalSession`] extractor; each of their cart requests also re-dispatches
//! any claim that previously failed transiently.

use axum::{Json, extract::State};
use serde::Deserialize;
use tower_sessions::Session;
use tracing::{info, instrument};

use cartgate_core::{Permission, VariantId};

use crate::db::RepositoryError;
use crate::error::{AppError, Result};
use crate::middleware::{OptionalSession, PermissionRequirement};
use crate::middleware::session::{
    ensure_guest_session_id, guest_session_id, rotate_guest_session_id,
};
use crate::services::cart::{CartOwner, CartView};
use crate::services::token::SessionClaim;
use crate::state::AppState;

/// Largest quantity a single request may add or set.
const MAX_LINE_QUANTITY: u32 = 999;

/// Add to cart request.
#[derive(Debug, Deserialize)]
pub struct AddToCartRequest {
    pub variant_id: VariantId,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

const fn default_quantity() -> u32 {
    1
}

/// Update quantity request; zero removes the line.
#[derive(Debug, Deserialize)]
pub struct UpdateCartRequest {
    pub variant_id: VariantId,
    pub quantity: u32,
}

/// Remove from cart request.
#[derive(Debug, Deserialize)]
pub struct RemoveFromCartRequest {
    pub variant_id: VariantId,
}

/// Permission an authenticated caller needs to use the cart routes.
pub struct OwnCart;

impl PermissionRequirement for OwnCart {
    const PERMISSIONS: &'static [Permission] = &[Permission::ManageOwnCart];
}

type Caller = OptionalSession<OwnCart>;

#[derive(Debug, Clone, Copy)]
enum CartChange {
    Add(VariantId, u32),
    Set(VariantId, u32),
    Remove(VariantId),
}

/// Show the caller's cart.
#[instrument(skip(state, session, caller))]
pub async fn show(
    State(state): State<AppState>,
    caller: Caller,
    session: Session,
) -> Result<Json<CartView>> {
    if let Some(claim) = caller.claim() {
        let owner = user_owner(&state, claim).await;
        return Ok(Json(state.carts().get(owner).await?));
    }

    match guest_session_id(&session).await? {
        Some(guest) => Ok(Json(state.carts().get(CartOwner::Guest(guest)).await?)),
        None => Ok(Json(CartView::empty_guest())),
    }
}

/// Add items to the cart.
#[instrument(skip(state, session, caller))]
pub async fn add(
    State(state): State<AppState>,
    caller: Caller,
    session: Session,
    Json(request): Json<AddToCartRequest>,
) -> Result<Json<CartView>> {
    if request.quantity == 0 {
        return Err(AppError::BadRequest("quantity must be at least 1".to_string()));
    }
    check_quantity(request.quantity)?;

    mutate(
        &state,
        caller.into_claim(),
        &session,
        CartChange::Add(request.variant_id, request.quantity),
    )
    .await
}

/// Set the quantity of a cart line.
#[instrument(skip(state, session, caller))]
pub async fn update(
    State(state): State<AppState>,
    caller: Caller,
    session: Session,
    Json(request): Json<UpdateCartRequest>,
) -> Result<Json<CartView>> {
    check_quantity(request.quantity)?;

    mutate(
        &state,
        caller.into_claim(),
        &session,
        CartChange::Set(request.variant_id, request.quantity),
    )
    .await
}

/// Remove a cart line.
#[instrument(skip(state, session, caller))]
pub async fn remove(
    State(state): State<AppState>,
    caller: Caller,
    session: Session,
    Json(request): Json<RemoveFromCartRequest>,
) -> Result<Json<CartView>> {
    mutate(
        &state,
        caller.into_claim(),
        &session,
        CartChange::Remove(request.variant_id),
    )
    .await
}

fn check_quantity(quantity: u32) -> Result<()> {
    if quantity > MAX_LINE_QUANTITY {
        return Err(AppError::BadRequest(format!(
            "quantity must be at most {MAX_LINE_QUANTITY}"
        )));
    }
    Ok(())
}

/// Resolve an authenticated caller's cart, re-dispatching parked claims.
async fn user_owner(state: &AppState, claim: &SessionClaim) -> CartOwner {
    state.claims().retry_pending(claim.user_id()).await;
    CartOwner::User(claim.user_id())
}

async fn apply(
    state: &AppState,
    owner: CartOwner,
    change: CartChange,
) -> std::result::Result<CartView, RepositoryError> {
    match change {
        CartChange::Add(variant_id, quantity) => {
            state.carts().add(owner, variant_id, quantity).await
        }
        CartChange::Set(variant_id, quantity) => {
            state.carts().set(owner, variant_id, quantity).await
        }
        CartChange::Remove(variant_id) => state.carts().remove(owner, variant_id).await,
    }
}

async fn mutate(
    state: &AppState,
    claim: Option<SessionClaim>,
    session: &Session,
    change: CartChange,
) -> Result<Json<CartView>> {
    if let Some(claim) = claim {
        let owner = user_owner(state, &claim).await;
        return Ok(Json(apply(state, owner, change).await?));
    }

    let guest = ensure_guest_session_id(session).await?;
    match apply(state, CartOwner::Guest(guest), change).await {
        // The session's guest cart was claimed by a login elsewhere; continue
        // under a fresh guest session instead of resurrecting the old one.
        Err(RepositoryError::GuestSessionClaimed) => {
            let fresh = rotate_guest_session_id(session).await?;
            info!(
                claimed_guest_session_id = %guest,
                guest_session_id = %fresh,
                "Guest session already claimed, rotated"
            );
            Ok(Json(apply(state, CartOwner::Guest(fresh), change).await?))
        }
        other => Ok(Json(other?)),
    }
}
