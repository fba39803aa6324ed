//! Guest cart claiming.
//!
//! When a visitor authenticates, the cart they built as a guest is merged into
//! their user cart exactly once. Login only enqueues a [`ClaimEvent`]; the
//! [`ClaimWorker`] runs each claim on its own task so a slow or failing store
//! never delays the login response.
//!
//! # Claim states
//!
//! ```text
//! NoGuestCart ────────────────────────────────▶ (no-op, claimable later)
//! GuestCartPresent ──▶ Claiming ──▶ Claimed
//!                          │
//!                          └─ version conflict ──▶ re-read, retry
//! AlreadyClaimed (terminal, no-op)
//! ```

mod coordinator;
mod dispatcher;

pub use coordinator::{ClaimCoordinator, ClaimError, ClaimOutcome};
pub use dispatcher::{ClaimDispatcher, ClaimEvent, ClaimWorker};
