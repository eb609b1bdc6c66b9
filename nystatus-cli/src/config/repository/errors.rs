//! Portal error repository

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use crate::models::ErrorRecord;

const COLUMNS: &str = "id, portal_id, error_type, error_name, url, traceback, count, solved, date, \
                       reported_at";

/// Natural key of an error within its portal
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ErrorKey {
    pub error_type: String,
    pub error_name: String,
    pub url: String,
}

fn from_row(row: &SqliteRow) -> Result<ErrorRecord> {
    Ok(ErrorRecord {
        id: row.try_get("id")?,
        portal_id: row.try_get("portal_id")?,
        error_type: row.try_get("error_type")?,
        error_name: row.try_get("error_name")?,
        url: row.try_get("url")?,
        traceback: row.try_get("traceback")?,
        count: row.try_get("count")?,
        solved: row.try_get("solved")?,
        date: row.try_get("date")?,
        reported_at: row.try_get("reported_at")?,
    })
}

pub async fn find(
    conn: &mut SqliteConnection,
    portal_id: i64,
    key: &ErrorKey,
) -> Result<Option<ErrorRecord>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM errors
         WHERE portal_id = ? AND error_type = ? AND error_name = ? AND url = ?",
        COLUMNS
    ))
    .bind(portal_id)
    .bind(&key.error_type)
    .bind(&key.error_name)
    .bind(&key.url)
    .fetch_optional(&mut *conn)
    .await
    .context("Failed to find error")?;

    row.as_ref().map(from_row).transpose()
}

/// Record a first occurrence (`count` 1, unsolved)
///
/// `reported_at` is the remote timestamp, if the instance sent one.
pub async fn create(
    conn: &mut SqliteConnection,
    portal_id: i64,
    key: &ErrorKey,
    traceback: &str,
    date: DateTime<Utc>,
    reported_at: Option<DateTime<Utc>>,
) -> Result<ErrorRecord> {
    let row = sqlx::query(&format!(
        "INSERT INTO errors
             (portal_id, error_type, error_name, url, traceback, count, solved, date, reported_at)
         VALUES (?, ?, ?, ?, ?, 1, 0, ?, ?)
         RETURNING {}",
        COLUMNS
    ))
    .bind(portal_id)
    .bind(&key.error_type)
    .bind(&key.error_name)
    .bind(&key.url)
    .bind(traceback)
    .bind(date)
    .bind(reported_at)
    .fetch_one(&mut *conn)
    .await
    .context("Failed to create error")?;

    from_row(&row)
}

/// Count one more occurrence and move the last-seen date forward
///
/// An occurrence without a remote timestamp leaves `reported_at` as it was.
pub async fn record_occurrence(
    conn: &mut SqliteConnection,
    id: i64,
    traceback: &str,
    date: DateTime<Utc>,
    reported_at: Option<DateTime<Utc>>,
) -> Result<()> {
    sqlx::query(
        "UPDATE errors
         SET count = count + 1, traceback = ?, date = ?, reported_at = COALESCE(?, reported_at)
         WHERE id = ?",
    )
    .bind(traceback)
    .bind(date)
    .bind(reported_at)
    .bind(id)
    .execute(&mut *conn)
    .await
    .context("Failed to record error occurrence")?;

    Ok(())
}

/// Errors of a portal, most recent first
pub async fn list_for_portal(conn: &mut SqliteConnection, portal_id: i64) -> Result<Vec<ErrorRecord>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM errors WHERE portal_id = ? ORDER BY date DESC, id",
        COLUMNS
    ))
    .bind(portal_id)
    .fetch_all(&mut *conn)
    .await
    .context("Failed to list errors")?;

    rows.iter().map(from_row).collect()
}

/// Errors across every portal of an instance
pub async fn list_for_instance(
    conn: &mut SqliteConnection,
    instance_id: i64,
) -> Result<Vec<ErrorRecord>> {
    let rows = sqlx::query(
        "SELECT e.id, e.portal_id, e.error_type, e.error_name, e.url, e.traceback,
                e.count, e.solved, e.date, e.reported_at
         FROM errors e
         JOIN portals p ON p.id = e.portal_id
         WHERE p.instance_id = ?
         ORDER BY e.date DESC, e.id",
    )
    .bind(instance_id)
    .fetch_all(&mut *conn)
    .await
    .context("Failed to list instance errors")?;

    rows.iter().map(from_row).collect()
}

pub async fn count_unsolved(conn: &mut SqliteConnection, portal_id: i64) -> Result<i64> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM errors WHERE portal_id = ? AND solved = 0")
            .bind(portal_id)
            .fetch_one(&mut *conn)
            .await
            .context("Failed to count unsolved errors")?;

    Ok(count)
}

pub async fn set_solved(conn: &mut SqliteConnection, id: i64, solved: bool) -> Result<bool> {
    let result = sqlx::query("UPDATE errors SET solved = ? WHERE id = ?")
        .bind(solved)
        .bind(id)
        .execute(&mut *conn)
        .await
        .context("Failed to set error solved flag")?;

    Ok(result.rows_affected() > 0)
}
