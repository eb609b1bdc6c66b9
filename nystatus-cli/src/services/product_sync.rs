//! Product reconciliation for a single instance
//!
//! Brings the stored instance <-> product links in line with the product list an
//! instance just reported:
//! - links for products no longer reported are removed and the product's usage
//!   count drops
//! - unknown products are created (origin "unknown"), new links bump the count
//! - each product's latest found version moves forward with [`later`]
//!
//! Running the same report twice leaves the store unchanged.

use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};

use super::version::later;
use crate::api::{FetchFailure, ReportedProduct};
use crate::config::repository::products::NewProduct;
use crate::config::repository::{instances, online_products, products};
use crate::models::{Instance, UNKNOWN_ORIGIN, connection_failure_status};

/// What a product sync changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductSyncReport {
    pub products_created: usize,
    pub links_created: usize,
    pub links_removed: usize,
    pub versions_changed: usize,
    pub no_products: usize,
}

/// Outcome of feeding a fetch result into the product sync
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProductSyncOutcome {
    Synced(ProductSyncReport),
    /// The instance could not be read; only its status text was updated
    Unreachable(String),
}

/// Reconcile an instance's products with `reported` in one transaction
pub async fn update_products(
    pool: &SqlitePool,
    instance: &Instance,
    reported: &[ReportedProduct],
) -> Result<ProductSyncReport> {
    let mut tx = pool.begin().await.context("Failed to start transaction")?;
    let report = sync_products(&mut tx, instance, reported).await?;
    tx.commit().await.context("Failed to commit product sync")?;

    log::info!(
        "Synced {} products for '{}' ({} new links, {} removed, {} version changes)",
        report.no_products,
        instance.name,
        report.links_created,
        report.links_removed,
        report.versions_changed
    );

    Ok(report)
}

/// Apply a fetch result: sync on success, record "Can not connect" on failure
pub async fn apply_fetch_result(
    pool: &SqlitePool,
    instance: &Instance,
    fetched: Result<Vec<ReportedProduct>, FetchFailure>,
) -> Result<ProductSyncOutcome> {
    match fetched {
        Ok(reported) => Ok(ProductSyncOutcome::Synced(
            update_products(pool, instance, &reported).await?,
        )),
        Err(failure) => {
            let status = record_fetch_failure(pool, instance, &failure).await?;
            Ok(ProductSyncOutcome::Unreachable(status))
        }
    }
}

/// Mark an instance as unreachable without touching its products
pub async fn record_fetch_failure(
    pool: &SqlitePool,
    instance: &Instance,
    failure: &FetchFailure,
) -> Result<String> {
    let status = connection_failure_status(&failure.to_string());
    log::warn!("Instance '{}': {}", instance.name, status);

    let mut conn = pool.acquire().await.context("Failed to acquire connection")?;
    instances::set_status(&mut conn, instance.id, &status, Utc::now()).await?;

    Ok(status)
}

/// Product sync against an open connection or transaction
pub async fn sync_products(
    conn: &mut SqliteConnection,
    instance: &Instance,
    reported: &[ReportedProduct],
) -> Result<ProductSyncReport> {
    let reported = dedupe(reported);
    let reported_names: HashSet<&str> = reported.iter().map(|p| p.name.as_str()).collect();
    let mut report = ProductSyncReport {
        no_products: reported.len(),
        ..Default::default()
    };

    // Drop links for products the instance stopped reporting
    for existing in online_products::list_for_instance(conn, instance.id).await? {
        if !reported_names.contains(existing.product_name.as_str()) {
            log::debug!(
                "'{}' no longer reports '{}'",
                instance.name,
                existing.product_name
            );
            online_products::delete(conn, existing.link.id).await?;
            products::adjust_use_count(conn, existing.link.product_id, -1).await?;
            report.links_removed += 1;
        }
    }

    for item in &reported {
        let product = match products::find_by_name(conn, &item.name).await? {
            Some(product) => product,
            None => {
                report.products_created += 1;
                products::create(
                    conn,
                    &NewProduct {
                        name: item.name.clone(),
                        origin: UNKNOWN_ORIGIN.to_string(),
                        changelog_url: None,
                    },
                )
                .await?
            }
        };

        match online_products::find(conn, instance.id, product.id).await? {
            Some(link) => {
                if link.version != item.version {
                    online_products::set_version(conn, link.id, &item.version).await?;
                    report.versions_changed += 1;
                }
            }
            None => {
                online_products::create(conn, instance.id, product.id, &item.version).await?;
                products::adjust_use_count(conn, product.id, 1).await?;
                report.links_created += 1;
            }
        }

        let latest = match product.latest_found_version.as_deref() {
            Some(current) => later(current, &item.version).to_string(),
            None => item.version.clone(),
        };
        if product.latest_found_version.as_deref() != Some(latest.as_str()) {
            log::debug!("Latest version of '{}' is now {}", product.name, latest);
            products::set_latest_found_version(conn, product.id, &latest).await?;
        }
        online_products::refresh_latest_version(conn, product.id, &latest).await?;
    }

    instances::record_sync(conn, instance.id, report.no_products as i64, Utc::now()).await?;

    Ok(report)
}

// One entry per product name, first-seen order, last reported version wins.
fn dedupe(reported: &[ReportedProduct]) -> Vec<ReportedProduct> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut unique: Vec<ReportedProduct> = Vec::new();

    for item in reported {
        match index.get(item.name.as_str()) {
            Some(&i) => unique[i].version = item.version.clone(),
            None => {
                index.insert(item.name.as_str(), unique.len());
                unique.push(item.clone());
            }
        }
    }

    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::repository::instances::NewInstance;
    use crate::config::repository::memory_pool;
    use crate::models::Product;

    const FOUR_PRODUCTS: &str = r#"[
        {"version": "0.0.0-1", "name": "Fictional prod 0"},
        {"version": "1.0.1-2", "name": "Fictional prod 1"},
        {"version": "2.0.2-3", "name": "Fictional prod 2"},
        {"version": "3.0.3-4", "name": "Fictional prod 3"}
    ]"#;

    async fn setup() -> (SqlitePool, Instance) {
        let pool = memory_pool().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        let instance = instances::create(
            &mut conn,
            &NewInstance {
                name: "xxxTesting Instancexxx".to_string(),
                url: "http://testing.test".to_string(),
                private_key: String::new(),
                revisit: true,
            },
        )
        .await
        .unwrap();
        drop(conn);
        (pool, instance)
    }

    fn reported(json: &str) -> Vec<ReportedProduct> {
        crate::api::models::parse_products(json).unwrap()
    }

    async fn all_products(pool: &SqlitePool) -> Vec<Product> {
        let mut conn = pool.acquire().await.unwrap();
        products::list(&mut conn).await.unwrap()
    }

    async fn reload(pool: &SqlitePool, instance: &Instance) -> Instance {
        let mut conn = pool.acquire().await.unwrap();
        instances::get(&mut conn, instance.id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_first_sync_creates_products_and_links() {
        let (pool, instance) = setup().await;

        let report = update_products(&pool, &instance, &reported(FOUR_PRODUCTS))
            .await
            .unwrap();
        assert_eq!(report.products_created, 4);
        assert_eq!(report.links_created, 4);

        let instance = reload(&pool, &instance).await;
        assert!(instance.up_to_date);
        assert_eq!(instance.status, "OK");
        assert_eq!(instance.no_products, 4);
        assert!(instance.date_checked.is_some());

        let products = all_products(&pool).await;
        assert_eq!(products.len(), 4);
        assert!(products.iter().all(|p| p.use_count == 1));
        assert!(products.iter().all(|p| p.origin == "unknown"));
        assert_eq!(products[0].latest_found_version.as_deref(), Some("0.0.0-1"));
    }

    #[tokio::test]
    async fn test_resync_same_report_is_idempotent() {
        let (pool, instance) = setup().await;
        update_products(&pool, &instance, &reported(FOUR_PRODUCTS))
            .await
            .unwrap();
        let before = all_products(&pool).await;

        let report = update_products(&pool, &instance, &reported(FOUR_PRODUCTS))
            .await
            .unwrap();
        assert_eq!(
            report,
            ProductSyncReport {
                no_products: 4,
                ..Default::default()
            }
        );
        assert_eq!(all_products(&pool).await, before);

        let mut conn = pool.acquire().await.unwrap();
        let links = online_products::list_for_instance(&mut conn, instance.id)
            .await
            .unwrap();
        assert_eq!(links.len(), 4);
    }

    #[tokio::test]
    async fn test_sync_down_to_one_product() {
        let (pool, instance) = setup().await;
        update_products(&pool, &instance, &reported(FOUR_PRODUCTS))
            .await
            .unwrap();

        let report = update_products(
            &pool,
            &instance,
            &reported(r#"[{"version": "0.0.0-2", "name": "Fictional prod 0"}]"#),
        )
        .await
        .unwrap();
        assert_eq!(report.links_removed, 3);
        assert_eq!(report.versions_changed, 1);

        assert_eq!(reload(&pool, &instance).await.no_products, 1);

        let products = all_products(&pool).await;
        assert_eq!(products.len(), 4);
        assert_eq!(products[0].latest_found_version.as_deref(), Some("0.0.0-2"));
        assert_eq!(products[0].use_count, 1);
        for dropped in &products[1..] {
            assert_eq!(dropped.use_count, 0);
        }

        let mut conn = pool.acquire().await.unwrap();
        let links = online_products::list_for_instance(&mut conn, instance.id)
            .await
            .unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].link.version, "0.0.0-2");
        assert_eq!(links[0].link.latest_version.as_deref(), Some("0.0.0-2"));
    }

    #[tokio::test]
    async fn test_use_count_matches_links_across_instances() {
        let (pool, first) = setup().await;
        let second = {
            let mut conn = pool.acquire().await.unwrap();
            instances::create(
                &mut conn,
                &NewInstance {
                    name: "second".to_string(),
                    url: "http://second.test".to_string(),
                    private_key: String::new(),
                    revisit: true,
                },
            )
            .await
            .unwrap()
        };

        update_products(&pool, &first, &reported(FOUR_PRODUCTS))
            .await
            .unwrap();
        update_products(
            &pool,
            &second,
            &reported(r#"[{"version": "0.1", "name": "Fictional prod 0"}]"#),
        )
        .await
        .unwrap();
        update_products(&pool, &first, &[]).await.unwrap();

        let mut conn = pool.acquire().await.unwrap();
        for product in products::list(&mut conn).await.unwrap() {
            let links = online_products::count_for_product(&mut conn, product.id)
                .await
                .unwrap();
            assert_eq!(product.use_count, links, "{}", product.name);
        }
        let prod0 = products::find_by_name(&mut conn, "Fictional prod 0")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(prod0.use_count, 1);
        assert_eq!(prod0.latest_found_version.as_deref(), Some("0.1"));
    }

    #[tokio::test]
    async fn test_older_report_keeps_latest_version() {
        let (pool, instance) = setup().await;
        update_products(
            &pool,
            &instance,
            &reported(r#"[{"version": "22.34", "name": "Fictional prod 0"}]"#),
        )
        .await
        .unwrap();
        update_products(
            &pool,
            &instance,
            &reported(r#"[{"version": "22", "name": "Fictional prod 0"}]"#),
        )
        .await
        .unwrap();

        let products = all_products(&pool).await;
        assert_eq!(products[0].latest_found_version.as_deref(), Some("22.34"));
    }

    #[tokio::test]
    async fn test_duplicate_names_count_once() {
        let (pool, instance) = setup().await;
        let report = update_products(
            &pool,
            &instance,
            &[
                ReportedProduct::new("Fictional prod 0", "1.0"),
                ReportedProduct::new("Fictional prod 0", "1.1"),
            ],
        )
        .await
        .unwrap();
        assert_eq!(report.no_products, 1);
        assert_eq!(report.links_created, 1);

        let products = all_products(&pool).await;
        assert_eq!(products[0].use_count, 1);
        assert_eq!(products[0].latest_found_version.as_deref(), Some("1.1"));
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_products_untouched() {
        let (pool, instance) = setup().await;
        update_products(&pool, &instance, &reported(FOUR_PRODUCTS))
            .await
            .unwrap();
        let before = all_products(&pool).await;

        let outcome = apply_fetch_result(
            &pool,
            &instance,
            Err(FetchFailure::Transport {
                url: "http://testing.test/getProducts".to_string(),
                reason: "connection refused".to_string(),
            }),
        )
        .await
        .unwrap();
        assert!(matches!(outcome, ProductSyncOutcome::Unreachable(_)));

        let instance = reload(&pool, &instance).await;
        assert_eq!(instance.status.find("Can not connect"), Some(0));
        assert_eq!(instance.no_products, 4);
        assert_eq!(all_products(&pool).await, before);
    }
}
