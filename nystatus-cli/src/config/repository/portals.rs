//! Portal repository

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use crate::models::Portal;

const COLUMNS: &str = "id, instance_id, portal_name, url, no_errors, status, date_checked";

fn from_row(row: &SqliteRow) -> Result<Portal> {
    Ok(Portal {
        id: row.try_get("id")?,
        instance_id: row.try_get("instance_id")?,
        portal_name: row.try_get("portal_name")?,
        url: row.try_get("url")?,
        no_errors: row.try_get("no_errors")?,
        status: row.try_get("status")?,
        date_checked: row.try_get("date_checked")?,
    })
}

/// Portals of an instance, by name
pub async fn list_for_instance(conn: &mut SqliteConnection, instance_id: i64) -> Result<Vec<Portal>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM portals WHERE instance_id = ? ORDER BY portal_name",
        COLUMNS
    ))
    .bind(instance_id)
    .fetch_all(&mut *conn)
    .await
    .context("Failed to list portals")?;

    rows.iter().map(from_row).collect()
}

pub async fn find(
    conn: &mut SqliteConnection,
    instance_id: i64,
    portal_name: &str,
) -> Result<Option<Portal>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM portals WHERE instance_id = ? AND portal_name = ?",
        COLUMNS
    ))
    .bind(instance_id)
    .bind(portal_name)
    .fetch_optional(&mut *conn)
    .await
    .context("Failed to find portal")?;

    row.as_ref().map(from_row).transpose()
}

pub async fn create(
    conn: &mut SqliteConnection,
    instance_id: i64,
    portal_name: &str,
    url: &str,
    checked_at: DateTime<Utc>,
) -> Result<Portal> {
    let row = sqlx::query(&format!(
        "INSERT INTO portals (instance_id, portal_name, url, status, date_checked)
         VALUES (?, ?, ?, ?, ?)
         RETURNING {}",
        COLUMNS
    ))
    .bind(instance_id)
    .bind(portal_name)
    .bind(url)
    .bind(crate::models::STATUS_OK)
    .bind(checked_at)
    .fetch_one(&mut *conn)
    .await
    .with_context(|| format!("Failed to create portal '{}'", portal_name))?;

    from_row(&row)
}

pub async fn touch(
    conn: &mut SqliteConnection,
    id: i64,
    url: &str,
    checked_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE portals SET url = ?, date_checked = ? WHERE id = ?")
        .bind(url)
        .bind(checked_at)
        .bind(id)
        .execute(&mut *conn)
        .await
        .context("Failed to update portal")?;

    Ok(())
}

/// Store the recomputed error count and the status derived from it
pub async fn set_error_summary(
    conn: &mut SqliteConnection,
    id: i64,
    no_errors: i64,
    status: &str,
    checked_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE portals SET no_errors = ?, status = ?, date_checked = ? WHERE id = ?")
        .bind(no_errors)
        .bind(status)
        .bind(checked_at)
        .bind(id)
        .execute(&mut *conn)
        .await
        .context("Failed to update portal error summary")?;

    Ok(())
}

pub async fn set_status(
    conn: &mut SqliteConnection,
    id: i64,
    status: &str,
    checked_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE portals SET status = ?, date_checked = ? WHERE id = ?")
        .bind(status)
        .bind(checked_at)
        .bind(id)
        .execute(&mut *conn)
        .await
        .context("Failed to set portal status")?;

    Ok(())
}

/// Remove a portal together with its errors
pub async fn delete(conn: &mut SqliteConnection, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM portals WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await
        .context("Failed to delete portal")?;

    Ok(())
}
