//! Signed session tokens.
//!
//! A token is two unpadded base64url segments joined by a dot:
//!
//! ```text
//! base64url({"sub":42,"role":"customer","iat":1760000000,"exp":1760604800})
//!   "." base64url(HMAC-SHA256(secret, <first segment>))
//! ```
//!
//! Validation is stateless. The only way to obtain a [`SessionClaim`] is to
//! issue or validate a token through [`TokenCodec`].

mod error;

pub use error::TokenError;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use cartgate_core::{Role, UserId};

use crate::config::{ConfigError, TokenConfig};

type HmacSha256 = Hmac<Sha256>;

/// Authenticated identity decoded from a valid token.
///
/// Fields are private so handlers cannot fabricate one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionClaim {
    user_id: UserId,
    role: Role,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl SessionClaim {
    #[must_use]
    pub const fn user_id(&self) -> UserId {
        self.user_id
    }

    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub const fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    #[must_use]
    pub const fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

/// A freshly minted token and the claim it encodes.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claim: SessionClaim,
}

#[derive(Serialize, Deserialize)]
struct Payload {
    sub: i32,
    role: Role,
    iat: i64,
    exp: i64,
}

/// Issues and validates session tokens with one HMAC key.
#[derive(Clone)]
pub struct TokenCodec {
    mac: HmacSha256,
    ttl: chrono::Duration,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("mac", &"[REDACTED]")
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl TokenCodec {
    /// Build a codec from the token configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InsecureSecret` if the key cannot be used for HMAC.
    pub fn new(config: &TokenConfig) -> Result<Self, ConfigError> {
        let mac = HmacSha256::new_from_slice(config.secret.expose_secret().as_bytes())
            .map_err(|e| {
                ConfigError::InsecureSecret("STOREFRONT_TOKEN_SECRET".to_string(), e.to_string())
            })?;

        Ok(Self {
            mac,
            ttl: config.ttl,
        })
    }

    /// Lifetime of issued tokens.
    #[must_use]
    pub const fn ttl(&self) -> chrono::Duration {
        self.ttl
    }

    /// Mint a token for `user` valid from now for the configured lifetime.
    #[must_use]
    pub fn issue(&self, user: UserId, role: Role) -> IssuedToken {
        self.issue_at(user, role, Utc::now())
    }

    /// Mint a token as of `now` (truncated to whole seconds).
    #[must_use]
    pub fn issue_at(&self, user: UserId, role: Role, now: DateTime<Utc>) -> IssuedToken {
        let iat = now.timestamp();
        let exp = iat.saturating_add(self.ttl.num_seconds());

        let payload = Payload {
            sub: user.as_i32(),
            role,
            iat,
            exp,
        };
        // Serializing a struct of integers and a unit enum cannot fail.
        let json = serde_json::to_vec(&payload).unwrap_or_default();
        let payload_b64 = URL_SAFE_NO_PAD.encode(json);
        let token = format!("{payload_b64}.{}", self.sign(&payload_b64));

        let issued_at = DateTime::from_timestamp(iat, 0).unwrap_or(now);
        let expires_at = DateTime::from_timestamp(exp, 0).unwrap_or(DateTime::<Utc>::MAX_UTC);

        IssuedToken {
            token,
            claim: SessionClaim {
                user_id: user,
                role,
                issued_at,
                expires_at,
            },
        }
    }

    /// Validate a token against the wall clock.
    ///
    /// # Errors
    ///
    /// See [`TokenCodec::validate_at`].
    pub fn validate(&self, token: &str) -> Result<SessionClaim, TokenError> {
        self.validate_at(token, Utc::now())
    }

    /// Validate a token as of `now`.
    ///
    /// # Errors
    ///
    /// - `InvalidToken` for an empty or misshapen token, an undecodable payload,
    ///   an unknown role, or `exp <= iat`.
    /// - `MalformedSignature` if the signature does not decode or match.
    /// - `Expired` if `exp <= now`.
    pub fn validate_at(&self, token: &str, now: DateTime<Utc>) -> Result<SessionClaim, TokenError> {
        let mut segments = token.split('.');
        let (Some(payload_b64), Some(signature_b64), None) =
            (segments.next(), segments.next(), segments.next())
        else {
            return Err(TokenError::InvalidToken);
        };
        if payload_b64.is_empty() || signature_b64.is_empty() {
            return Err(TokenError::InvalidToken);
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| TokenError::MalformedSignature)?;
        let mut mac = self.mac.clone();
        mac.update(payload_b64.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::MalformedSignature)?;

        let json = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| TokenError::InvalidToken)?;
        let payload: Payload =
            serde_json::from_slice(&json).map_err(|_| TokenError::InvalidToken)?;

        if payload.exp <= payload.iat {
            return Err(TokenError::InvalidToken);
        }
        let issued_at = DateTime::from_timestamp(payload.iat, 0).ok_or(TokenError::InvalidToken)?;
        let expires_at = DateTime::from_timestamp(payload.exp, 0).ok_or(TokenError::InvalidToken)?;

        if payload.exp <= now.timestamp() {
            return Err(TokenError::Expired);
        }

        Ok(SessionClaim {
            user_id: UserId::new(payload.sub),
            role: payload.role,
            issued_at,
            expires_at,
        })
    }

    fn sign(&self, payload_b64: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(payload_b64.as_bytes());
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }
}
