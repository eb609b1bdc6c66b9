//! Instance <-> product link repository

use anyhow::{Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use crate::models::OnlineProduct;

/// A link together with the name of the product it points at
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceProduct {
    pub link: OnlineProduct,
    pub product_name: String,
}

fn from_row(row: &SqliteRow) -> Result<OnlineProduct> {
    Ok(OnlineProduct {
        id: row.try_get("id")?,
        instance_id: row.try_get("instance_id")?,
        product_id: row.try_get("product_id")?,
        version: row.try_get("version")?,
        latest_version: row.try_get("latest_version")?,
    })
}

/// Links of an instance, ordered by product name
pub async fn list_for_instance(
    conn: &mut SqliteConnection,
    instance_id: i64,
) -> Result<Vec<InstanceProduct>> {
    let rows = sqlx::query(
        "SELECT op.id, op.instance_id, op.product_id, op.version, op.latest_version,
                p.name AS product_name
         FROM online_products op
         JOIN products p ON p.id = op.product_id
         WHERE op.instance_id = ?
         ORDER BY p.name",
    )
    .bind(instance_id)
    .fetch_all(&mut *conn)
    .await
    .context("Failed to list instance products")?;

    rows.iter()
        .map(|row| {
            Ok(InstanceProduct {
                link: from_row(row)?,
                product_name: row.try_get("product_name")?,
            })
        })
        .collect()
}

pub async fn find(
    conn: &mut SqliteConnection,
    instance_id: i64,
    product_id: i64,
) -> Result<Option<OnlineProduct>> {
    let row = sqlx::query(
        "SELECT id, instance_id, product_id, version, latest_version
         FROM online_products
         WHERE instance_id = ? AND product_id = ?",
    )
    .bind(instance_id)
    .bind(product_id)
    .fetch_optional(&mut *conn)
    .await
    .context("Failed to find online product")?;

    row.as_ref().map(from_row).transpose()
}

pub async fn create(
    conn: &mut SqliteConnection,
    instance_id: i64,
    product_id: i64,
    version: &str,
) -> Result<OnlineProduct> {
    let row = sqlx::query(
        "INSERT INTO online_products (instance_id, product_id, version)
         VALUES (?, ?, ?)
         RETURNING id, instance_id, product_id, version, latest_version",
    )
    .bind(instance_id)
    .bind(product_id)
    .bind(version)
    .fetch_one(&mut *conn)
    .await
    .context("Failed to create online product")?;

    from_row(&row)
}

pub async fn set_version(conn: &mut SqliteConnection, id: i64, version: &str) -> Result<()> {
    sqlx::query("UPDATE online_products SET version = ? WHERE id = ?")
        .bind(version)
        .bind(id)
        .execute(&mut *conn)
        .await
        .context("Failed to set online product version")?;

    Ok(())
}

/// Copy a product's latest version onto every link that references it
pub async fn refresh_latest_version(
    conn: &mut SqliteConnection,
    product_id: i64,
    latest_version: &str,
) -> Result<()> {
    sqlx::query("UPDATE online_products SET latest_version = ? WHERE product_id = ?")
        .bind(latest_version)
        .bind(product_id)
        .execute(&mut *conn)
        .await
        .context("Failed to refresh cached latest version")?;

    Ok(())
}

pub async fn delete(conn: &mut SqliteConnection, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM online_products WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await
        .context("Failed to delete online product")?;

    Ok(())
}

/// Number of instances linked to a product
#[cfg(test)]
pub async fn count_for_product(conn: &mut SqliteConnection, product_id: i64) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM online_products WHERE product_id = ?")
        .bind(product_id)
        .fetch_one(&mut *conn)
        .await
        .context("Failed to count online products")?;

    Ok(count)
}
