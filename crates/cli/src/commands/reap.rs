//! One-off cart reaping, for cron jobs or when the server's reaper is off.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use larder_storefront::db::{self, PgStore, RepositoryError};
use larder_storefront::services::ExpiryReaper;

use super::{CommandError, database_url};

#[derive(Debug, thiserror::Error)]
pub enum ReapError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Delete expired guest carts once. Returns how many were removed.
///
/// # Errors
///
/// Returns `ReapError` if the database is unreachable or the delete fails.
pub async fn sweep() -> Result<u64, ReapError> {
    let database_url = database_url()?;
    let pool = db::create_pool(&database_url).await?;

    // The interval only matters for the spawned loop.
    let reaper = ExpiryReaper::new(Arc::new(PgStore::new(pool)), Duration::ZERO);
    let removed = reaper.sweep(Utc::now()).await?;

    tracing::info!(removed, "Expired guest carts deleted");
    Ok(removed)
}
