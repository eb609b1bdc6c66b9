//! Portal error listing

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use sqlx::SqlitePool;

use crate::cli::acquire;
use crate::config::repository::{errors, instances, portals};
use crate::models::ErrorRecord;

#[derive(Subcommand)]
pub enum ErrorCommands {
    /// List errors recorded for an instance
    List {
        instance: String,
        /// Only errors of this portal
        #[arg(long)]
        portal: Option<String>,
        /// Include solved errors
        #[arg(long)]
        all: bool,
        /// Print tracebacks
        #[arg(short, long)]
        verbose: bool,
    },

    /// Mark an error as solved (or unsolved again)
    Solve {
        id: i64,
        #[arg(long)]
        reopen: bool,
    },
}

pub async fn handle_error_command(pool: &SqlitePool, cmd: ErrorCommands) -> Result<()> {
    let mut conn = acquire(pool).await?;

    match cmd {
        ErrorCommands::List {
            instance,
            portal,
            all,
            verbose,
        } => {
            let instance = instances::find_by_name(&mut conn, &instance)
                .await?
                .with_context(|| format!("Unknown instance '{}'", instance))?;
            let records = match portal {
                Some(name) => {
                    let portal = portals::find(&mut conn, instance.id, &name)
                        .await?
                        .with_context(|| format!("Unknown portal '{}'", name))?;
                    errors::list_for_portal(&mut conn, portal.id).await?
                }
                None => errors::list_for_instance(&mut conn, instance.id).await?,
            };

            let shown: Vec<_> = records.iter().filter(|e| all || !e.solved).collect();
            if shown.is_empty() {
                println!("{}", "No errors".green());
            }
            for error in shown {
                print_error(error, verbose);
            }
        }
        ErrorCommands::Solve { id, reopen } => {
            if !errors::set_solved(&mut conn, id, !reopen).await? {
                anyhow::bail!("No error with id {}", id);
            }
            println!("Error {} marked {}", id, if reopen { "unsolved" } else { "solved" });
        }
    }

    Ok(())
}

fn print_error(error: &ErrorRecord, verbose: bool) {
    let marker = if error.solved { "solved".green() } else { "open".red() };
    println!(
        "#{:<5} {} {}: {} x{}  {}  {}",
        error.id,
        marker,
        error.error_type.bold(),
        error.error_name,
        error.count,
        error.url.dimmed(),
        error.date.format("%Y-%m-%d %H:%M")
    );
    if verbose && !error.traceback.is_empty() {
        for line in error.traceback.lines() {
            println!("    {}", line);
        }
    }
}
