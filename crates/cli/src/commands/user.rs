//! User management commands.
//!
//! # Environment Variables
//!
//! - `STOREFRONT_DATABASE_URL` - `PostgreSQL` connection string for storefront

use cartgate_core::{Email, Role, UserId};
use cartgate_storefront::db::PgUserStore;
use cartgate_storefront::services::auth::{hash_password, validate_password};

use super::{CliError, connect};

/// Create a user with a role and password.
///
/// # Returns
///
/// The ID of the created user.
///
/// # Errors
///
/// Returns an error for an invalid role, email or password, or if a user
/// with the email already exists.
pub async fn create_user(email: &str, role: &str, password: &str) -> Result<UserId, CliError> {
    let role: Role = role
        .parse()
        .map_err(|_| CliError::InvalidRole(role.to_owned()))?;
    let email = Email::parse(email).map_err(|e| CliError::InvalidEmail(e.to_string()))?;
    validate_password(password)?;
    let password_hash = hash_password(password)?;

    let pool = connect().await?;
    let store = PgUserStore::new(pool);

    tracing::info!("Creating user: {} ({})", email, role);
    let user = store.create_user(&email, role, &password_hash).await?;

    tracing::info!(user_id = %user.id, "User created");
    Ok(user.id)
}
