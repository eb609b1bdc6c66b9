//! Admin triggers: "check instance now" and "sync changelog now"

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use super::changelog::{ChangelogImportReport, update_changelog};
use super::portal_sync::{
    ErrorSyncReport, PortalSyncReport, record_portal_failure, update_errors, update_portals,
};
use super::product_sync::{ProductSyncOutcome, apply_fetch_result};
use crate::api::{ChangelogSource, InstanceFetcher};
use crate::config::repository::{instances, portals};
use crate::models::{Instance, Product};

/// Everything one poll of an instance did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckReport {
    pub instance: String,
    pub products: ProductSyncOutcome,
    /// `None` when the portal list was not read
    pub portals: Option<PortalSyncReport>,
    pub errors: Vec<PortalCheck>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalCheck {
    pub portal: String,
    pub outcome: PortalOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortalOutcome {
    Synced(ErrorSyncReport),
    Unreachable(String),
}

impl CheckReport {
    pub fn is_reachable(&self) -> bool {
        matches!(self.products, ProductSyncOutcome::Synced(_))
    }
}

/// Poll one instance: products first, then portals and their error logs
///
/// An unreachable instance only gets its status updated.
pub async fn check_instance(
    pool: &SqlitePool,
    fetcher: &dyn InstanceFetcher,
    instance: &Instance,
) -> Result<CheckReport> {
    log::info!("Checking instance '{}' at {}", instance.name, instance.url);

    let fetched = fetcher.fetch_products(instance).await;
    let products = apply_fetch_result(pool, instance, fetched).await?;
    let mut report = CheckReport {
        instance: instance.name.clone(),
        products,
        portals: None,
        errors: Vec::new(),
    };
    if !report.is_reachable() {
        return Ok(report);
    }

    match fetcher.fetch_portals(instance).await {
        Ok(names) => report.portals = Some(update_portals(pool, instance, &names).await?),
        Err(failure) => {
            log::warn!("Could not read portals of '{}': {}", instance.name, failure);
        }
    }

    let stored = {
        let mut conn = pool.acquire().await.context("Failed to acquire connection")?;
        portals::list_for_instance(&mut conn, instance.id).await?
    };

    for portal in stored {
        let outcome = match fetcher.fetch_errors(instance, &portal).await {
            Ok(reported) => {
                PortalOutcome::Synced(update_errors(pool, instance, &portal, &reported).await?)
            }
            Err(failure) => {
                PortalOutcome::Unreachable(record_portal_failure(pool, &portal, &failure).await?)
            }
        };
        report.errors.push(PortalCheck {
            portal: portal.portal_name,
            outcome,
        });
    }

    Ok(report)
}

/// Check every instance marked for revisiting, in name order
pub async fn check_all(
    pool: &SqlitePool,
    fetcher: &dyn InstanceFetcher,
) -> Result<Vec<CheckReport>> {
    let targets = {
        let mut conn = pool.acquire().await.context("Failed to acquire connection")?;
        instances::list_revisit(&mut conn).await?
    };

    let mut reports = Vec::with_capacity(targets.len());
    for instance in &targets {
        reports.push(check_instance(pool, fetcher, instance).await?);
    }

    let reachable = reports.iter().filter(|r| r.is_reachable()).count();
    log::info!("Checked {} instances, {} reachable", reports.len(), reachable);

    Ok(reports)
}

/// Fetch a product's changelog and import it
pub async fn sync_changelog(
    pool: &SqlitePool,
    source: &dyn ChangelogSource,
    product: &Product,
) -> Result<ChangelogImportReport> {
    let text = source
        .fetch_changelog(product)
        .await
        .with_context(|| format!("Failed to fetch changelog of '{}'", product.name))?;

    update_changelog(pool, product, &text).await
}
