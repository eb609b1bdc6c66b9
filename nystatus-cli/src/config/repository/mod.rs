//! Repository layer for database operations
//!
//! One module per record kind. Functions take a `&mut SqliteConnection` so the
//! sync engines can run a whole operation inside a single transaction.

pub mod errors;
pub mod instances;
pub mod migrations;
pub mod online_products;
pub mod portals;
pub mod products;
pub mod releases;

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

/// Open (creating if needed) the database file and bring its schema up to date
pub async fn connect(path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory: {}", parent.display())
            })?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open database: {}", path.display()))?;

    migrations::run(&pool).await?;
    log::debug!("Database ready at {}", path.display());

    Ok(pool)
}

/// Fresh, migrated in-memory database
///
/// Limited to one connection since every in-memory connection is its own database.
pub async fn memory_pool() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .context("Failed to parse in-memory database url")?
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .context("Failed to open in-memory database")?;

    migrations::run(&pool).await?;

    Ok(pool)
}
