//! Domain models for the storefront.
//!
//! These are validated domain types, separate from database row types.

pub mod cart;
pub mod session;
pub mod user;

pub use cart::{ClaimCommit, ClaimCommitted, ClaimRecord, GuestCart, PendingClaim, UserCart};
pub use session::keys as session_keys;
pub use user::User;
