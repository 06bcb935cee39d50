// =====================================================================================
// File: core-store/src/postgres.rs
// Description: PostgreSQL connection pool setup
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

use crate::{StoreError, StoreResult};
use core_config::DatabaseConfig;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::info;

/// Open the PostgreSQL pool the platform runs on.
///
/// Sizing and timeouts come from [`DatabaseConfig`]. The pool is probed with
/// one round-trip before it is handed out, so the migration runner never
/// starts against an unreachable database.
pub async fn create_pool(config: &DatabaseConfig) -> StoreResult<PgPool> {
    let pool = PgPoolOptions::new()
        .min_connections(config.min_connections)
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout))
        .idle_timeout(Duration::from_secs(config.idle_timeout))
        .max_lifetime(Duration::from_secs(config.max_lifetime))
        .connect(&config.url)
        .await
        .map_err(|e| StoreError::Connection(format!("database unreachable: {}", e)))?;

    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .map_err(|e| StoreError::Connection(format!("connection probe failed: {}", e)))?;

    info!(
        "Database pool ready ({}..{} connections)",
        config.min_connections, config.max_connections
    );
    Ok(pool)
}
