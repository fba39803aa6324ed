//! Authentication service.
//!
//! Email and password login against argon2 hashes held by a [`UserStore`].

mod error;

pub use error::AuthError;

use std::sync::Arc;

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use tracing::instrument;

use cartgate_core::Email;

use crate::db::UserStore;
use crate::models::User;

/// Minimum password length.
const MIN_PASSWORD_LENGTH: usize = 8;

/// Authentication service.
#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserStore>,
}

impl AuthService {
    /// Create a new authentication service.
    #[must_use]
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self { users }
    }

    /// Login with email and password.
    ///
    /// A malformed email, an unknown user and a wrong password are
    /// indistinguishable to the caller.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidCredentials` if the email/password is wrong.
    /// Returns `AuthError::Repository` if the user lookup fails.
    #[instrument(skip(self, password))]
    pub async fn login_with_password(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let email = Email::parse(email).map_err(|_| AuthError::InvalidCredentials)?;

        let (user, password_hash) = self
            .users
            .find_with_password(&email)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        verify_password(password, &password_hash)?;

        Ok(user)
    }
}

/// Validate password meets requirements.
///
/// # Errors
///
/// Returns `AuthError::WeakPassword` if the password is too short.
pub fn validate_password(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AuthError::WeakPassword(format!(
            "password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }

    Ok(())
}

/// Hash a password using Argon2id.
///
/// # Errors
///
/// Returns `AuthError::PasswordHash` if hashing fails.
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| AuthError::PasswordHash)
}

/// Verify a password against a hash.
fn verify_password(password: &str, hash: &str) -> Result<(), AuthError> {
    let parsed_hash = PasswordHash::new(hash).map_err(|_| AuthError::InvalidCredentials)?;
    let argon2 = Argon2::default();

    argon2
        .verify_password(password.as_bytes(), &parsed_hash)
        .map_err(|_| AuthError::InvalidCredentials)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;

    use cartgate_core::{Role, UserId};

    use super::*;
    use crate::db::MemoryUserStore;

    async fn service_with(email: &str, password: &str) -> AuthService {
        let store = MemoryUserStore::new();
        store
            .insert(
                User {
                    id: UserId::new(5),
                    email: Email::parse(email).unwrap(),
                    role: Role::Customer,
                    created_at: Utc::now(),
                },
                hash_password(password).unwrap(),
            )
            .await;
        AuthService::new(Arc::new(store))
    }

    #[test]
    fn test_validate_password_length() {
        assert!(matches!(
            validate_password("short"),
            Err(AuthError::WeakPassword(_))
        ));
        assert!(validate_password("long enough").is_ok());
    }

    #[tokio::test]
    async fn test_login_with_correct_password() {
        let auth = service_with("shopper@example.com", "correct horse").await;
        let user = auth
            .login_with_password("Shopper@Example.com", "correct horse")
            .await
            .unwrap();
        assert_eq!(user.id, UserId::new(5));
    }

    #[tokio::test]
    async fn test_login_failures_are_indistinguishable() {
        let auth = service_with("shopper@example.com", "correct horse").await;

        for (email, password) in [
            ("shopper@example.com", "wrong horse"),
            ("nobody@example.com", "correct horse"),
            ("not an email", "correct horse"),
        ] {
            assert!(matches!(
                auth.login_with_password(email, password).await,
                Err(AuthError::InvalidCredentials)
            ));
        }
    }
}
