//! Anonymous session state.
//!
//! Authentication itself is carried by the stateless session token; the
//! tower-sessions session only remembers which guest cart belongs to an
//! anonymous visitor.

/// Session keys.
pub mod keys {
    /// Key for the anonymous visitor's guest session ID.
    pub const GUEST_SESSION_ID: &str = "guest_session_id";
}
