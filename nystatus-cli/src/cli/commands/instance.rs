//! Instance registration and listing

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use sqlx::SqlitePool;

use crate::cli::acquire;
use crate::config::repository::instances::{self, NewInstance};
use crate::models::{Instance, STATUS_OK};

#[derive(Subcommand)]
pub enum InstanceCommands {
    /// Register an instance to monitor
    Add {
        /// Unique instance name
        name: String,
        /// Base URL the remote methods are appended to
        url: String,
        /// Credential sent as the `key` parameter
        #[arg(long, default_value = "")]
        key: String,
        /// Leave the instance out of `check --all`
        #[arg(long)]
        no_revisit: bool,
    },

    /// List registered instances
    List,

    /// Include or exclude an instance from `check --all`
    Revisit {
        name: String,
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },
}

pub async fn handle_instance_command(pool: &SqlitePool, cmd: InstanceCommands) -> Result<()> {
    let mut conn = acquire(pool).await?;

    match cmd {
        InstanceCommands::Add {
            name,
            url,
            key,
            no_revisit,
        } => {
            if instances::find_by_name(&mut conn, &name).await?.is_some() {
                anyhow::bail!("Instance '{}' already exists", name);
            }
            let instance = instances::create(
                &mut conn,
                &NewInstance {
                    name,
                    url,
                    private_key: key,
                    revisit: !no_revisit,
                },
            )
            .await?;
            println!("Added instance {} ({})", instance.name.green().bold(), instance.url);
        }
        InstanceCommands::List => {
            let all = instances::list(&mut conn).await?;
            if all.is_empty() {
                println!("{}", "No instances registered".dimmed());
            }
            for instance in &all {
                print_instance(instance);
            }
        }
        InstanceCommands::Revisit { name, enabled } => {
            let instance = instances::find_by_name(&mut conn, &name)
                .await?
                .with_context(|| format!("Unknown instance '{}'", name))?;
            instances::set_revisit(&mut conn, instance.id, enabled).await?;
            println!(
                "{} will {}be revisited",
                instance.name.bold(),
                if enabled { "" } else { "not " }
            );
        }
    }

    Ok(())
}

fn print_instance(instance: &Instance) {
    let status = if instance.status == STATUS_OK {
        instance.status.green()
    } else {
        instance.status.red()
    };
    let checked = instance
        .date_checked
        .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "never".to_string());

    println!(
        "{:<24} {:<40} {:>3} products  checked {}  {}{}",
        instance.name.bold(),
        instance.url,
        instance.no_products,
        checked.dimmed(),
        status,
        if instance.revisit { "" } else { "  (no revisit)" }
    );
}
