//! Session token commands.
//!
//! # Environment Variables
//!
//! - `STOREFRONT_TOKEN_SECRET` - HMAC key shared with the storefront
//! - `STOREFRONT_TOKEN_TTL_SECONDS` - Token lifetime (default 7 days)

use cartgate_core::{Role, UserId};
use cartgate_storefront::config::TokenConfig;
use cartgate_storefront::services::token::TokenCodec;

use super::CliError;

/// Issue a token for `user_id` and print it to stdout.
///
/// The user is not looked up; this is for exercising the API by hand.
///
/// # Errors
///
/// Returns an error for an invalid role or token configuration.
pub fn issue(user_id: i32, role: &str) -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let role: Role = role
        .parse()
        .map_err(|_| CliError::InvalidRole(role.to_owned()))?;
    let codec = TokenCodec::new(&TokenConfig::from_env()?)?;
    let issued = codec.issue(UserId::new(user_id), role);

    tracing::info!(
        user_id,
        %role,
        expires_at = %issued.claim.expires_at(),
        "Token issued"
    );

    #[allow(clippy::print_stdout)]
    {
        println!("{}", issued.token);
    }
    Ok(())
}
