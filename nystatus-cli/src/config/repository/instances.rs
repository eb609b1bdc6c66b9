//! Monitored instance repository

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use crate::models::Instance;

const COLUMNS: &str = "id, name, url, private_key, revisit, status, up_to_date, no_products, \
                       date_added, date_checked";

/// Fields needed to register an instance
#[derive(Debug, Clone)]
pub struct NewInstance {
    pub name: String,
    pub url: String,
    pub private_key: String,
    pub revisit: bool,
}

fn from_row(row: &SqliteRow) -> Result<Instance> {
    Ok(Instance {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        url: row.try_get("url")?,
        private_key: row.try_get("private_key")?,
        revisit: row.try_get("revisit")?,
        status: row.try_get("status")?,
        up_to_date: row.try_get("up_to_date")?,
        no_products: row.try_get("no_products")?,
        date_added: row.try_get("date_added")?,
        date_checked: row.try_get("date_checked")?,
    })
}

/// Register a new instance
pub async fn create(conn: &mut SqliteConnection, new: &NewInstance) -> Result<Instance> {
    let row = sqlx::query(&format!(
        "INSERT INTO instances (name, url, private_key, revisit, date_added)
         VALUES (?, ?, ?, ?, ?)
         RETURNING {}",
        COLUMNS
    ))
    .bind(&new.name)
    .bind(&new.url)
    .bind(&new.private_key)
    .bind(new.revisit)
    .bind(Utc::now())
    .fetch_one(&mut *conn)
    .await
    .with_context(|| format!("Failed to create instance '{}'", new.name))?;

    from_row(&row)
}

pub async fn get(conn: &mut SqliteConnection, id: i64) -> Result<Option<Instance>> {
    let row = sqlx::query(&format!("SELECT {} FROM instances WHERE id = ?", COLUMNS))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to get instance")?;

    row.as_ref().map(from_row).transpose()
}

pub async fn find_by_name(conn: &mut SqliteConnection, name: &str) -> Result<Option<Instance>> {
    let row = sqlx::query(&format!("SELECT {} FROM instances WHERE name = ?", COLUMNS))
        .bind(name)
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to find instance by name")?;

    row.as_ref().map(from_row).transpose()
}

/// All instances, ordered by name
pub async fn list(conn: &mut SqliteConnection) -> Result<Vec<Instance>> {
    let rows = sqlx::query(&format!("SELECT {} FROM instances ORDER BY name", COLUMNS))
        .fetch_all(&mut *conn)
        .await
        .context("Failed to list instances")?;

    rows.iter().map(from_row).collect()
}

/// Instances flagged to be polled by "check all"
pub async fn list_revisit(conn: &mut SqliteConnection) -> Result<Vec<Instance>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM instances WHERE revisit = 1 ORDER BY name",
        COLUMNS
    ))
    .fetch_all(&mut *conn)
    .await
    .context("Failed to list instances to revisit")?;

    rows.iter().map(from_row).collect()
}

/// Record the outcome of a successful product sync
pub async fn record_sync(
    conn: &mut SqliteConnection,
    id: i64,
    no_products: i64,
    checked_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "UPDATE instances
         SET no_products = ?, up_to_date = 1, status = ?, date_checked = ?
         WHERE id = ?",
    )
    .bind(no_products)
    .bind(crate::models::STATUS_OK)
    .bind(checked_at)
    .bind(id)
    .execute(&mut *conn)
    .await
    .context("Failed to record instance sync")?;

    Ok(())
}

/// Overwrite the status text, leaving everything else as it was
pub async fn set_status(
    conn: &mut SqliteConnection,
    id: i64,
    status: &str,
    checked_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE instances SET status = ?, date_checked = ? WHERE id = ?")
        .bind(status)
        .bind(checked_at)
        .bind(id)
        .execute(&mut *conn)
        .await
        .context("Failed to set instance status")?;

    Ok(())
}

pub async fn set_revisit(conn: &mut SqliteConnection, id: i64, revisit: bool) -> Result<()> {
    sqlx::query("UPDATE instances SET revisit = ? WHERE id = ?")
        .bind(revisit)
        .bind(id)
        .execute(&mut *conn)
        .await
        .context("Failed to set instance revisit flag")?;

    Ok(())
}
