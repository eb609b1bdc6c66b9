//! "check instance now"

use anyhow::{Context, Result};
use clap::Args;
use colored::*;
use sqlx::SqlitePool;

use crate::api::HttpFetcher;
use crate::cli::acquire;
use crate::config::Config;
use crate::config::repository::instances;
use crate::services::check::{CheckReport, PortalOutcome, check_all, check_instance};
use crate::services::product_sync::ProductSyncOutcome;

#[derive(Args)]
pub struct CheckArgs {
    /// Instance to check
    #[arg(required_unless_present = "all", conflicts_with = "all")]
    pub name: Option<String>,

    /// Check every instance marked for revisiting
    #[arg(long)]
    pub all: bool,
}

pub async fn handle_check_command(pool: &SqlitePool, config: &Config, args: CheckArgs) -> Result<()> {
    let fetcher = HttpFetcher::new(&config.fetch, &config.endpoints)?;

    let reports = match args.name {
        Some(name) => {
            let instance = {
                let mut conn = acquire(pool).await?;
                instances::find_by_name(&mut conn, &name)
                    .await?
                    .with_context(|| format!("Unknown instance '{}'", name))?
            };
            vec![check_instance(pool, &fetcher, &instance).await?]
        }
        None => check_all(pool, &fetcher).await?,
    };

    for report in &reports {
        print_report(report);
    }

    Ok(())
}

fn print_report(report: &CheckReport) {
    match &report.products {
        ProductSyncOutcome::Synced(sync) => println!(
            "{} {}: {} products ({} new links, {} removed, {} version changes)",
            "✓".green(),
            report.instance.bold(),
            sync.no_products,
            sync.links_created,
            sync.links_removed,
            sync.versions_changed
        ),
        ProductSyncOutcome::Unreachable(status) => {
            println!("{} {}: {}", "✗".red(), report.instance.bold(), status.red());
            return;
        }
    }

    if let Some(portals) = &report.portals {
        println!(
            "  portals: {} new, {} removed, {} kept",
            portals.created, portals.removed, portals.kept
        );
    }

    for check in &report.errors {
        match &check.outcome {
            PortalOutcome::Synced(errors) if errors.unsolved == 0 => {
                println!("  {} {}", check.portal, "OK".green());
            }
            PortalOutcome::Synced(errors) => println!(
                "  {} {} ({} new, {} recurring)",
                check.portal,
                format!("{} unsolved", errors.unsolved).yellow(),
                errors.created,
                errors.recurring
            ),
            PortalOutcome::Unreachable(status) => {
                println!("  {} {}", check.portal, status.red());
            }
        }
    }
}
