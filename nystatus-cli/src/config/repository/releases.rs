//! Product release repository

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use crate::models::{Release, ReleaseFields, ReleaseNumber};

const COLUMNS: &str = "id, product_id, version, datev, number, author, message, changelog, obs, \
                       update_info, requires_update, doc_update, datec";

fn from_row(row: &SqliteRow) -> Result<Release> {
    let number: Option<String> = row.try_get("number")?;
    let number = number
        .as_deref()
        .map(ReleaseNumber::parse)
        .transpose()
        .context("Stored release has an invalid number")?;

    Ok(Release {
        id: row.try_get("id")?,
        product_id: row.try_get("product_id")?,
        version: row.try_get("version")?,
        datev: row.try_get("datev")?,
        number,
        author: row.try_get("author")?,
        message: row.try_get("message")?,
        changelog: row.try_get("changelog")?,
        obs: row.try_get("obs")?,
        update_info: row.try_get("update_info")?,
        requires_update: row.try_get("requires_update")?,
        doc_update: row.try_get("doc_update")?,
        datec: row.try_get("datec")?,
    })
}

/// Releases of a product, newest release date first with the pending one on top
pub async fn list_for_product(conn: &mut SqliteConnection, product_id: i64) -> Result<Vec<Release>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM releases
         WHERE product_id = ?
         ORDER BY datev IS NOT NULL, datev DESC, id DESC",
        COLUMNS
    ))
    .bind(product_id)
    .fetch_all(&mut *conn)
    .await
    .context("Failed to list releases")?;

    rows.iter().map(from_row).collect()
}

pub async fn find(
    conn: &mut SqliteConnection,
    product_id: i64,
    version: &str,
) -> Result<Option<Release>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM releases WHERE product_id = ? AND version = ?",
        COLUMNS
    ))
    .bind(product_id)
    .bind(version)
    .fetch_optional(&mut *conn)
    .await
    .context("Failed to find release")?;

    row.as_ref().map(from_row).transpose()
}

/// Releases without a release date
pub async fn list_pending(conn: &mut SqliteConnection, product_id: i64) -> Result<Vec<Release>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM releases WHERE product_id = ? AND datev IS NULL ORDER BY id",
        COLUMNS
    ))
    .bind(product_id)
    .fetch_all(&mut *conn)
    .await
    .context("Failed to list pending releases")?;

    rows.iter().map(from_row).collect()
}

pub async fn create(
    conn: &mut SqliteConnection,
    product_id: i64,
    version: &str,
    fields: &ReleaseFields,
) -> Result<Release> {
    let row = sqlx::query(&format!(
        "INSERT INTO releases (product_id, version, datev, number, author, message, changelog, datec)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)
         RETURNING {}",
        COLUMNS
    ))
    .bind(product_id)
    .bind(version)
    .bind(fields.datev)
    .bind(fields.number.as_ref().map(ReleaseNumber::as_str))
    .bind(&fields.author)
    .bind(&fields.message)
    .bind(&fields.changelog)
    .bind(Utc::now())
    .fetch_one(&mut *conn)
    .await
    .with_context(|| format!("Failed to create release {}", version))?;

    from_row(&row)
}

/// Overwrite the changelog-derived fields; notes and flags stay as they are
pub async fn update_parsed(
    conn: &mut SqliteConnection,
    id: i64,
    fields: &ReleaseFields,
) -> Result<()> {
    sqlx::query(
        "UPDATE releases
         SET datev = ?, number = ?, author = ?, message = ?, changelog = ?
         WHERE id = ?",
    )
    .bind(fields.datev)
    .bind(fields.number.as_ref().map(ReleaseNumber::as_str))
    .bind(&fields.author)
    .bind(&fields.message)
    .bind(&fields.changelog)
    .bind(id)
    .execute(&mut *conn)
    .await
    .context("Failed to update release")?;

    Ok(())
}

/// Give a release row a new version string, keeping its id and notes
pub async fn rename(conn: &mut SqliteConnection, id: i64, version: &str) -> Result<()> {
    sqlx::query("UPDATE releases SET version = ? WHERE id = ?")
        .bind(version)
        .bind(id)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("Failed to rename release to {}", version))?;

    Ok(())
}

pub async fn set_obs(conn: &mut SqliteConnection, id: i64, obs: &str) -> Result<()> {
    sqlx::query("UPDATE releases SET obs = ? WHERE id = ?")
        .bind(obs)
        .bind(id)
        .execute(&mut *conn)
        .await
        .context("Failed to set release notes")?;

    Ok(())
}

pub async fn set_update_info(conn: &mut SqliteConnection, id: i64, update_info: &str) -> Result<()> {
    sqlx::query("UPDATE releases SET update_info = ? WHERE id = ?")
        .bind(update_info)
        .bind(id)
        .execute(&mut *conn)
        .await
        .context("Failed to set release update info")?;

    Ok(())
}

pub async fn set_flags(
    conn: &mut SqliteConnection,
    id: i64,
    requires_update: bool,
    doc_update: bool,
) -> Result<()> {
    sqlx::query("UPDATE releases SET requires_update = ?, doc_update = ? WHERE id = ?")
        .bind(requires_update)
        .bind(doc_update)
        .bind(id)
        .execute(&mut *conn)
        .await
        .context("Failed to set release flags")?;

    Ok(())
}

/// Set the revision number from user input.
///
/// Fails with [`crate::models::ValidationError`] before touching the database
/// when `raw` is not an `r<digits>` revision.
pub async fn set_number(conn: &mut SqliteConnection, id: i64, raw: &str) -> Result<ReleaseNumber> {
    let number = ReleaseNumber::parse(raw)?;

    sqlx::query("UPDATE releases SET number = ? WHERE id = ?")
        .bind(number.as_str())
        .bind(id)
        .execute(&mut *conn)
        .await
        .context("Failed to set release number")?;

    Ok(number)
}

pub async fn delete(conn: &mut SqliteConnection, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM releases WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await
        .context("Failed to delete release")?;

    Ok(())
}
