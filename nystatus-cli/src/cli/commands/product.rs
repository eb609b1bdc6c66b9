//! Product registration, notes and "sync changelog now"

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use sqlx::SqlitePool;

use crate::api::HttpFetcher;
use crate::cli::{acquire, require_product};
use crate::config::Config;
use crate::config::repository::products::{self, NewProduct};
use crate::services::changelog::{ChangelogImportReport, update_changelog};
use crate::services::check::sync_changelog;

#[derive(Subcommand)]
pub enum ProductCommands {
    /// Register a product
    Add {
        name: String,
        /// Where the product comes from
        #[arg(long, default_value = crate::models::UNKNOWN_ORIGIN)]
        origin: String,
        /// URL of the plain text changelog
        #[arg(long)]
        changelog_url: Option<String>,
    },

    /// List products with their latest deployed version
    List,

    /// Set or clear the changelog URL
    SetChangelogUrl {
        name: String,
        /// Omit to clear
        url: Option<String>,
    },

    /// Replace the free-form notes of a product
    Notes { name: String, text: String },

    /// Import the changelog of a product
    SyncChangelog {
        name: String,
        /// Read the changelog from a local file instead of its URL
        #[arg(long, value_name = "PATH")]
        file: Option<PathBuf>,
    },
}

pub async fn handle_product_command(
    pool: &SqlitePool,
    config: &Config,
    cmd: ProductCommands,
) -> Result<()> {
    match cmd {
        ProductCommands::Add {
            name,
            origin,
            changelog_url,
        } => {
            let mut conn = acquire(pool).await?;
            if products::find_by_name(&mut conn, &name).await?.is_some() {
                anyhow::bail!("Product '{}' already exists", name);
            }
            let product = products::create(
                &mut conn,
                &NewProduct {
                    name,
                    origin,
                    changelog_url,
                },
            )
            .await?;
            println!("Added product {}", product.name.green().bold());
        }
        ProductCommands::List => {
            let mut conn = acquire(pool).await?;
            let all = products::list(&mut conn).await?;
            if all.is_empty() {
                println!("{}", "No products known".dimmed());
            }
            for product in &all {
                println!(
                    "{:<40} {:<12} used by {:>3}  {}",
                    product.name.bold(),
                    product.latest_found_version.as_deref().unwrap_or("-"),
                    product.use_count,
                    product.origin.dimmed()
                );
            }
        }
        ProductCommands::SetChangelogUrl { name, url } => {
            let mut conn = acquire(pool).await?;
            let product = require_product(&mut conn, &name).await?;
            products::set_changelog_url(&mut conn, product.id, url.as_deref()).await?;
            println!("Updated changelog URL of {}", product.name.bold());
        }
        ProductCommands::Notes { name, text } => {
            let mut conn = acquire(pool).await?;
            let product = require_product(&mut conn, &name).await?;
            products::set_notes(&mut conn, product.id, &text).await?;
            println!("Updated notes of {}", product.name.bold());
        }
        ProductCommands::SyncChangelog { name, file } => {
            let product = {
                let mut conn = acquire(pool).await?;
                require_product(&mut conn, &name).await?
            };

            let report = match file {
                Some(path) => {
                    let text = fs::read_to_string(&path).with_context(|| {
                        format!("Failed to read changelog file: {}", path.display())
                    })?;
                    update_changelog(pool, &product, &text).await?
                }
                None => {
                    let fetcher = HttpFetcher::new(&config.fetch, &config.endpoints)?;
                    sync_changelog(pool, &fetcher, &product).await?
                }
            };
            print_import(&product.name, &report);
        }
    }

    Ok(())
}

fn print_import(product: &str, report: &ChangelogImportReport) {
    println!(
        "{} {}: {} new, {} updated, {} unchanged",
        "✓".green(),
        product.bold(),
        report.created,
        report.updated,
        report.unchanged
    );
    if let Some((from, to)) = &report.promoted {
        println!("  pending {} is now {}", from, to.cyan());
    }
    if let Some(pending) = &report.pending {
        println!("  unreleased: {}", pending.yellow());
    }
}
