//! Cart maintenance commands.

use cartgate_storefront::db::PgCartStore;

use super::{CliError, connect};

/// Delete guest carts whose last modification is older than `days`.
///
/// Unclaimed guest carts are otherwise kept forever.
///
/// # Errors
///
/// Returns an error if the connection or delete fails.
pub async fn purge(days: u32) -> Result<u64, CliError> {
    let pool = connect().await?;
    let store = PgCartStore::new(pool);

    let deleted = store
        .purge_stale_guest_carts(chrono::Duration::days(i64::from(days)))
        .await?;

    tracing::info!(deleted, older_than_days = days, "Stale guest carts purged");
    Ok(deleted)
}
