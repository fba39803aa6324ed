//! CLI subcommands.

pub mod carts;
pub mod migrate;
pub mod token;
pub mod user;

use cartgate_storefront::config::{self, ConfigError};
use cartgate_storefront::db::{self, RepositoryError};
use cartgate_storefront::services::auth::AuthError;
use sqlx::PgPool;
use thiserror::Error;

/// Errors that can occur while running a command.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("{0}")]
    Auth(#[from] AuthError),

    #[error("Invalid role: {0}. Valid roles: super_admin, admin, viewer, customer")]
    InvalidRole(String),

    #[error("Invalid email: {0}")]
    InvalidEmail(String),
}

/// Connect to the storefront database named by `STOREFRONT_DATABASE_URL`.
async fn connect() -> Result<PgPool, CliError> {
    dotenvy::dotenv().ok();

    let database_url = config::get_database_url("STOREFRONT_DATABASE_URL")?;
    tracing::info!("Connecting to storefront database...");
    Ok(db::create_pool(&database_url).await?)
}
