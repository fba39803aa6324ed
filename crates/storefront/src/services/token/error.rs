//! Session token error types.

use thiserror::Error;

/// Why a presented session token was rejected.
///
/// The distinction is for logs only; every variant becomes the same 401.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    /// Not a token at all: wrong shape, undecodable payload, unknown role, or
    /// an expiry that is not after the issue time.
    #[error("invalid token")]
    InvalidToken,

    /// Well-formed and authentic, but past its expiry.
    #[error("token expired")]
    Expired,

    /// The signature segment does not decode or does not match the payload.
    #[error("malformed token signature")]
    MalformedSignature,
}
