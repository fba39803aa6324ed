//! Authorization gate extractors.
//!
//! A handler gets a [`SessionClaim`] only through one of these extractors, so
//! declaring the extractor is declaring the access rule:
//!
//! ```rust,ignore
//! async fn show_cart(
//!     caller: Permitted<ViewCustomerCarts>,
//!     Path(user_id): Path<i32>,
//! ) -> impl IntoResponse {
//!     let actor = caller.claim().user_id();
//!     ...
//! }
//! ```
//!
//! The credential is read from `Authorization: Bearer <token>`, falling back to
//! the [`TOKEN_COOKIE`] cookie. A missing, invalid or expired credential is a
//! 401; an authenticated caller without the required role or permissions is a
//! 403. The reason is logged at debug and never sent to the client.
//!
//! Routes open to anonymous visitors use [`OptionalSession`]: only the absence
//! of a credential makes the caller anonymous, a bad one is still a 401.

use std::marker::PhantomData;

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
};
use tower_sessions::cookie::Cookie;
use tracing::debug;

use cartgate_core::{Mode, Permission, Role};

use crate::services::token::SessionClaim;
use crate::state::AppState;

/// Cookie carrying the session token for browser clients.
pub const TOKEN_COOKIE: &str = "cartgate_token";

/// Roles allowed through an [`Authorized`] or [`Gated`] extractor.
///
/// An empty list admits any authenticated role.
pub trait RoleRequirement: Send + Sync + 'static {
    const ROLES: &'static [Role];
}

/// Permissions checked by a [`Permitted`] or [`Gated`] extractor.
pub trait PermissionRequirement: Send + Sync + 'static {
    const PERMISSIONS: &'static [Permission];
    const MODE: Mode = Mode::All;
}

/// Any authenticated caller.
pub struct AnyRole;

impl RoleRequirement for AnyRole {
    const ROLES: &'static [Role] = &[];
}

/// Staff with back-office access.
pub struct BackOffice;

impl RoleRequirement for BackOffice {
    const ROLES: &'static [Role] = &[Role::SuperAdmin, Role::Admin, Role::Viewer];
}

/// Staff who can change store data.
pub struct AdminOnly;

impl RoleRequirement for AdminOnly {
    const ROLES: &'static [Role] = &[Role::SuperAdmin, Role::Admin];
}

pub struct SuperAdminOnly;

impl RoleRequirement for SuperAdminOnly {
    const ROLES: &'static [Role] = &[Role::SuperAdmin];
}

/// Why the gate turned a request away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateRejection {
    /// No usable credential.
    Unauthorized,
    /// Authenticated, but not allowed.
    Forbidden,
}

impl IntoResponse for GateRejection {
    fn into_response(self) -> Response {
        match self {
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized").into_response(),
            Self::Forbidden => (StatusCode::FORBIDDEN, "Forbidden").into_response(),
        }
    }
}

/// Requires a valid session whose role is in `R::ROLES`.
pub struct Authorized<R: RoleRequirement = AnyRole>(pub SessionClaim, PhantomData<R>);

/// Requires a valid session whose role grants `P::PERMISSIONS` under `P::MODE`.
pub struct Permitted<P: PermissionRequirement>(pub SessionClaim, PhantomData<P>);

/// Requires both a role in `R::ROLES` and the permissions in `P`.
pub struct Gated<R: RoleRequirement, P: PermissionRequirement>(pub SessionClaim, PhantomData<(R, P)>);

/// Anonymous if no credential was presented; otherwise a valid session whose
/// role grants `P::PERMISSIONS` under `P::MODE`.
pub struct OptionalSession<P: PermissionRequirement>(Option<SessionClaim>, PhantomData<P>);

impl<R: RoleRequirement> Authorized<R> {
    #[must_use]
    pub const fn claim(&self) -> &SessionClaim {
        &self.0
    }
}

impl<P: PermissionRequirement> Permitted<P> {
    #[must_use]
    pub const fn claim(&self) -> &SessionClaim {
        &self.0
    }
}

impl<R: RoleRequirement, P: PermissionRequirement> Gated<R, P> {
    #[must_use]
    pub const fn claim(&self) -> &SessionClaim {
        &self.0
    }
}

impl<P: PermissionRequirement> OptionalSession<P> {
    /// The checked session, or `None` for an anonymous caller.
    #[must_use]
    pub const fn claim(&self) -> Option<&SessionClaim> {
        self.0.as_ref()
    }

    #[must_use]
    pub fn into_claim(self) -> Option<SessionClaim> {
        self.0
    }
}

/// Pull the raw credential from the request, header first.
fn credential(parts: &Parts) -> Option<String> {
    let bearer = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            let (scheme, token) = v.split_once(' ')?;
            scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
        })
        .filter(|token| !token.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    parts
        .headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(Cookie::split_parse)
        .filter_map(Result::ok)
        .find(|cookie| cookie.name() == TOKEN_COOKIE && !cookie.value().is_empty())
        .map(|cookie| cookie.value().to_string())
}

fn authenticate(parts: &Parts, state: &AppState) -> Result<SessionClaim, GateRejection> {
    let Some(token) = credential(parts) else {
        debug!(path = %parts.uri.path(), "Gate: no credential presented");
        return Err(GateRejection::Unauthorized);
    };

    state.tokens().validate(&token).map_err(|reason| {
        debug!(path = %parts.uri.path(), %reason, "Gate: credential rejected");
        GateRejection::Unauthorized
    })
}

fn require_role(claim: &SessionClaim, roles: &[Role]) -> Result<(), GateRejection> {
    if roles.is_empty() || roles.contains(&claim.role()) {
        return Ok(());
    }
    debug!(user_id = %claim.user_id(), role = %claim.role(), ?roles, "Gate: role not allowed");
    Err(GateRejection::Forbidden)
}

fn require_permissions<P: PermissionRequirement>(
    claim: &SessionClaim,
    state: &AppState,
) -> Result<(), GateRejection> {
    if state
        .permissions()
        .authorize(Some(claim.role()), P::PERMISSIONS, P::MODE)
    {
        return Ok(());
    }
    debug!(
        user_id = %claim.user_id(),
        role = %claim.role(),
        permissions = ?P::PERMISSIONS,
        mode = ?P::MODE,
        "Gate: permissions not granted"
    );
    Err(GateRejection::Forbidden)
}

fn record_user(claim: &SessionClaim) {
    tracing::Span::current().record("user_id", claim.user_id().as_i32());
}

impl<S, R> FromRequestParts<S> for Authorized<R>
where
    AppState: FromRef<S>,
    S: Send + Sync,
    R: RoleRequirement,
{
    type Rejection = GateRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        let claim = authenticate(parts, &state)?;
        require_role(&claim, R::ROLES)?;
        record_user(&claim);
        Ok(Self(claim, PhantomData))
    }
}

impl<S, P> FromRequestParts<S> for Permitted<P>
where
    AppState: FromRef<S>,
    S: Send + Sync,
    P: PermissionRequirement,
{
    type Rejection = GateRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        let claim = authenticate(parts, &state)?;
        require_permissions::<P>(&claim, &state)?;
        record_user(&claim);
        Ok(Self(claim, PhantomData))
    }
}

impl<S, R, P> FromRequestParts<S> for Gated<R, P>
where
    AppState: FromRef<S>,
    S: Send + Sync,
    R: RoleRequirement,
    P: PermissionRequirement,
{
    type Rejection = GateRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        let claim = authenticate(parts, &state)?;
        require_role(&claim, R::ROLES)?;
        require_permissions::<P>(&claim, &state)?;
        record_user(&claim);
        Ok(Self(claim, PhantomData))
    }
}

impl<S, P> FromRequestParts<S> for OptionalSession<P>
where
    AppState: FromRef<S>,
    S: Send + Sync,
    P: PermissionRequirement,
{
    type Rejection = GateRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if credential(parts).is_none() {
            return Ok(Self(None, PhantomData));
        }

        let state = AppState::from_ref(state);
        let claim = authenticate(parts, &state)?;
        require_permissions::<P>(&claim, &state)?;
        record_user(&claim);
        Ok(Self(Some(claim), PhantomData))
    }
}
