//! Back-office route handlers for customer carts and the permission matrix.

use axum::{
    Json,
    extract::{Path, State},
};
use tracing::{info, instrument};

use cartgate_core::{Capabilities, Permission, Role, UserId};

use crate::error::{AppError, Result};
use crate::middleware::{AdminOnly, Authorized, Gated, PermissionRequirement, Permitted, SuperAdminOnly};
use crate::services::cart::{CartOwner, CartView};
use crate::state::AppState;

/// Read any customer's cart.
pub struct ViewCustomerCarts;

impl PermissionRequirement for ViewCustomerCarts {
    const PERMISSIONS: &'static [Permission] = &[Permission::ViewCustomerCarts];
}

/// Change any customer's cart.
pub struct ManageCustomerCarts;

impl PermissionRequirement for ManageCustomerCarts {
    const PERMISSIONS: &'static [Permission] = &[Permission::ManageCustomerCarts];
}

/// Show a customer's cart.
#[instrument(skip(state, caller))]
pub async fn show_cart(
    State(state): State<AppState>,
    caller: Permitted<ViewCustomerCarts>,
    Path(user_id): Path<i32>,
) -> Result<Json<CartView>> {
    let view = state.carts().get(CartOwner::User(UserId::new(user_id))).await?;
    info!(actor = %caller.claim().user_id(), "Viewed customer cart");
    Ok(Json(view))
}

/// Empty a customer's cart.
#[instrument(skip(state, caller))]
pub async fn clear_cart(
    State(state): State<AppState>,
    caller: Gated<AdminOnly, ManageCustomerCarts>,
    Path(user_id): Path<i32>,
) -> Result<Json<CartView>> {
    let view = state.carts().clear_user_cart(UserId::new(user_id)).await?;
    info!(actor = %caller.claim().user_id(), "Cleared customer cart");
    Ok(Json(view))
}

/// Show the capabilities granted to a role.
pub async fn role_permissions(
    State(state): State<AppState>,
    _caller: Authorized<SuperAdminOnly>,
    Path(role): Path<String>,
) -> Result<Json<Capabilities>> {
    let role: Role = role
        .parse()
        .map_err(|e: cartgate_core::RoleParseError| AppError::BadRequest(e.to_string()))?;

    Ok(Json(
        state
            .permissions()
            .capabilities(role)
            .copied()
            .unwrap_or_default(),
    ))
}
