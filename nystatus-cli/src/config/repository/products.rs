//! Product repository

use anyhow::{Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use crate::models::Product;

const COLUMNS: &str = "id, name, origin, latest_found_version, use_count, changelog_url, notes";

/// Fields needed to create a product
#[derive(Debug, Clone)]
pub struct NewProduct {
    pub name: String,
    pub origin: String,
    pub changelog_url: Option<String>,
}

fn from_row(row: &SqliteRow) -> Result<Product> {
    Ok(Product {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        origin: row.try_get("origin")?,
        latest_found_version: row.try_get("latest_found_version")?,
        use_count: row.try_get("use_count")?,
        changelog_url: row.try_get("changelog_url")?,
        notes: row.try_get("notes")?,
    })
}

pub async fn create(conn: &mut SqliteConnection, new: &NewProduct) -> Result<Product> {
    let row = sqlx::query(&format!(
        "INSERT INTO products (name, origin, changelog_url) VALUES (?, ?, ?) RETURNING {}",
        COLUMNS
    ))
    .bind(&new.name)
    .bind(&new.origin)
    .bind(&new.changelog_url)
    .fetch_one(&mut *conn)
    .await
    .with_context(|| format!("Failed to create product '{}'", new.name))?;

    from_row(&row)
}

pub async fn find_by_name(conn: &mut SqliteConnection, name: &str) -> Result<Option<Product>> {
    let row = sqlx::query(&format!("SELECT {} FROM products WHERE name = ?", COLUMNS))
        .bind(name)
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to find product by name")?;

    row.as_ref().map(from_row).transpose()
}

/// All products, by name
pub async fn list(conn: &mut SqliteConnection) -> Result<Vec<Product>> {
    let rows = sqlx::query(&format!("SELECT {} FROM products ORDER BY name", COLUMNS))
        .fetch_all(&mut *conn)
        .await
        .context("Failed to list products")?;

    rows.iter().map(from_row).collect()
}

/// Shift the usage counter by `delta`, never going below zero
pub async fn adjust_use_count(conn: &mut SqliteConnection, id: i64, delta: i64) -> Result<()> {
    sqlx::query("UPDATE products SET use_count = MAX(use_count + ?, 0) WHERE id = ?")
        .bind(delta)
        .bind(id)
        .execute(&mut *conn)
        .await
        .context("Failed to adjust product use count")?;

    Ok(())
}

pub async fn set_latest_found_version(
    conn: &mut SqliteConnection,
    id: i64,
    version: &str,
) -> Result<()> {
    sqlx::query("UPDATE products SET latest_found_version = ? WHERE id = ?")
        .bind(version)
        .bind(id)
        .execute(&mut *conn)
        .await
        .context("Failed to set latest found version")?;

    Ok(())
}

pub async fn set_changelog_url(
    conn: &mut SqliteConnection,
    id: i64,
    changelog_url: Option<&str>,
) -> Result<()> {
    sqlx::query("UPDATE products SET changelog_url = ? WHERE id = ?")
        .bind(changelog_url)
        .bind(id)
        .execute(&mut *conn)
        .await
        .context("Failed to set product changelog url")?;

    Ok(())
}

pub async fn set_notes(conn: &mut SqliteConnection, id: i64, notes: &str) -> Result<()> {
    sqlx::query("UPDATE products SET notes = ? WHERE id = ?")
        .bind(notes)
        .bind(id)
        .execute(&mut *conn)
        .await
        .context("Failed to set product notes")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::repository::memory_pool;

    #[tokio::test]
    async fn test_use_count_never_negative() {
        let pool = memory_pool().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();

        let product = create(
            &mut conn,
            &NewProduct {
                name: "Products.Naaya".to_string(),
                origin: "n".to_string(),
                changelog_url: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(product.use_count, 0);

        adjust_use_count(&mut conn, product.id, 2).await.unwrap();
        adjust_use_count(&mut conn, product.id, -5).await.unwrap();

        let reloaded = find_by_name(&mut conn, "Products.Naaya").await.unwrap().unwrap();
        assert_eq!(reloaded.use_count, 0);
    }
}
