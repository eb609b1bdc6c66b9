//! Command line interface

pub mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use sqlx::{SqliteConnection, SqlitePool};

use crate::config::{Config, default_config_path};
use crate::config::repository::{self, products, releases};
use crate::models::{Product, Release};
use commands::check::CheckArgs;
use commands::error::ErrorCommands;
use commands::instance::InstanceCommands;
use commands::product::ProductCommands;
use commands::release::ReleaseCommands;

#[derive(Parser)]
#[command(name = "nystatus")]
#[command(about = "Track deployed product versions and portal errors across instances", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Configuration file [default: ~/.config/nystatus/config.toml]
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Register and list monitored instances
    #[command(subcommand)]
    Instance(InstanceCommands),

    /// Poll instances for their products, portals and errors
    Check(CheckArgs),

    /// Manage products and import their changelogs
    #[command(subcommand)]
    Product(ProductCommands),

    /// Inspect and annotate product releases
    #[command(subcommand)]
    Release(ReleaseCommands),

    /// Inspect portal errors
    #[command(subcommand)]
    Error(ErrorCommands),

    /// Write a config file with the default settings
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub async fn run(cli: Cli) -> Result<()> {
    if cli.no_color {
        colored::control::set_override(false);
    }

    if let Commands::InitConfig { force } = cli.command {
        return init_config(cli.config, force);
    }

    let config = Config::load(cli.config.as_deref())?;
    log::debug!("Using database {}", config.database_path.display());
    let pool = repository::connect(&config.database_path).await?;

    match cli.command {
        Commands::Instance(cmd) => commands::instance::handle_instance_command(&pool, cmd).await,
        Commands::Check(args) => commands::check::handle_check_command(&pool, &config, args).await,
        Commands::Product(cmd) => {
            commands::product::handle_product_command(&pool, &config, cmd).await
        }
        Commands::Release(cmd) => commands::release::handle_release_command(&pool, cmd).await,
        Commands::Error(cmd) => commands::error::handle_error_command(&pool, cmd).await,
        Commands::InitConfig { .. } => Ok(()),
    }
}

fn init_config(path: Option<PathBuf>, force: bool) -> Result<()> {
    let path = path.unwrap_or_else(default_config_path);
    if path.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {} (use --force to overwrite)",
            path.display()
        );
    }

    Config::default().save(&path)?;
    println!("Wrote {}", path.display().to_string().green());
    Ok(())
}

async fn acquire(pool: &SqlitePool) -> Result<sqlx::pool::PoolConnection<sqlx::Sqlite>> {
    pool.acquire().await.context("Failed to acquire connection")
}

async fn require_product(conn: &mut SqliteConnection, name: &str) -> Result<Product> {
    products::find_by_name(conn, name)
        .await?
        .with_context(|| format!("Unknown product '{}'", name))
}

async fn require_release(
    conn: &mut SqliteConnection,
    product: &str,
    version: &str,
) -> Result<Release> {
    let product = require_product(conn, product).await?;
    releases::find(conn, product.id, version)
        .await?
        .with_context(|| format!("Product '{}' has no release {}", product.name, version))
}
