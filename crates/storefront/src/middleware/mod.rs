//! HTTP middleware stack for storefront.
//!
//! # Middleware Order (outermost first)
//!
//! 1. Sentry layers (hub per request, transactions)
//! 2. `TraceLayer` (request span with `request_id` and `user_id` fields)
//! 3. Request ID
//! 4. Session layer (tower-sessions; guest session ID only)
//! 5. Rate limiting on `/auth/login` (governor)
//!
//! Authorization is not a layer: handlers declare it through the extractors
//! in [`gate`].

pub mod gate;
pub mod rate_limit;
pub mod request_id;
pub mod session;

pub use gate::{
    AdminOnly, AnyRole, Authorized, BackOffice, GateRejection, Gated, OptionalSession,
    PermissionRequirement, Permitted, RoleRequirement, SuperAdminOnly, TOKEN_COOKIE,
};
pub use rate_limit::login_rate_limiter;
pub use request_id::request_id_middleware;
pub use session::create_session_layer;
