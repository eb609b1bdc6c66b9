//! Release listing and annotation

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use sqlx::SqlitePool;

use crate::cli::{acquire, require_product, require_release};
use crate::config::repository::releases;
use crate::models::Release;

#[derive(Subcommand)]
pub enum ReleaseCommands {
    /// List the releases of a product, unreleased first
    List {
        product: String,
        /// Include changelog bodies
        #[arg(short, long)]
        verbose: bool,
    },

    /// Replace the notes of a release; they survive changelog re-imports
    Note {
        product: String,
        version: String,
        text: String,
    },

    /// Set the update flags of a release
    Flags {
        product: String,
        version: String,
        #[arg(long, action = clap::ArgAction::Set)]
        requires_update: Option<bool>,
        #[arg(long, action = clap::ArgAction::Set)]
        doc_update: Option<bool>,
    },

    /// Replace the update instructions of a release
    UpdateInfo {
        product: String,
        version: String,
        text: String,
    },

    /// Set the revision number (r<digits>) of a release
    SetNumber {
        product: String,
        version: String,
        number: String,
    },
}

pub async fn handle_release_command(pool: &SqlitePool, cmd: ReleaseCommands) -> Result<()> {
    let mut conn = acquire(pool).await?;

    match cmd {
        ReleaseCommands::List { product, verbose } => {
            let product = require_product(&mut conn, &product).await?;
            let all = releases::list_for_product(&mut conn, product.id).await?;
            if all.is_empty() {
                println!("{}", "No releases imported".dimmed());
            }
            for release in &all {
                print_release(release, verbose);
            }
        }
        ReleaseCommands::Note {
            product,
            version,
            text,
        } => {
            let release = require_release(&mut conn, &product, &version).await?;
            releases::set_obs(&mut conn, release.id, &text).await?;
            println!("Updated notes of {} {}", product.bold(), version);
        }
        ReleaseCommands::Flags {
            product,
            version,
            requires_update,
            doc_update,
        } => {
            let release = require_release(&mut conn, &product, &version).await?;
            let requires_update = requires_update.unwrap_or(release.requires_update);
            let doc_update = doc_update.unwrap_or(release.doc_update);
            releases::set_flags(&mut conn, release.id, requires_update, doc_update).await?;
            println!(
                "{} {}: requires update {}, doc update {}",
                product.bold(),
                version,
                requires_update,
                doc_update
            );
        }
        ReleaseCommands::UpdateInfo {
            product,
            version,
            text,
        } => {
            let release = require_release(&mut conn, &product, &version).await?;
            releases::set_update_info(&mut conn, release.id, &text).await?;
            println!("Updated update info of {} {}", product.bold(), version);
        }
        ReleaseCommands::SetNumber {
            product,
            version,
            number,
        } => {
            let release = require_release(&mut conn, &product, &version).await?;
            let number = releases::set_number(&mut conn, release.id, &number).await?;
            println!("{} {} is {}", product.bold(), version, number.to_string().cyan());
        }
    }

    Ok(())
}

fn print_release(release: &Release, verbose: bool) {
    let date = match release.datev {
        Some(date) => date.to_string(),
        None => "unreleased".yellow().to_string(),
    };
    let mut flags = Vec::new();
    if release.requires_update {
        flags.push("requires update");
    }
    if release.doc_update {
        flags.push("doc update");
    }

    println!(
        "{:<12} {:<12} {:<8} {:<12} {}",
        release.version.bold(),
        date,
        release.number.as_ref().map(|n| n.as_str()).unwrap_or("-"),
        release.author.as_deref().unwrap_or("-"),
        release.message.as_deref().unwrap_or("").dimmed()
    );
    if !flags.is_empty() {
        println!("  [{}]", flags.join(", ").magenta());
    }
    if !release.obs.is_empty() {
        println!("  notes: {}", release.obs);
    }
    if !release.update_info.is_empty() {
        println!("  update: {}", release.update_info);
    }
    if verbose && !release.changelog.is_empty() {
        for line in release.changelog.lines() {
            println!("    {}", line);
        }
    }
}
