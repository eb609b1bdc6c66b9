//! Changelog import into stored releases
//!
//! Every parsed segment is upserted by (product, version). Parsed fields are
//! overwritten, notes and flags never are. A stored pending release whose
//! version disappeared from the changelog is carried over to the release it
//! turned into (the oldest newly seen version above it), so notes written
//! while it was unreleased stay attached.

use std::cmp::Ordering;
use std::collections::HashSet;

use anyhow::{Context, Result};
use sqlx::{SqliteConnection, SqlitePool};

use super::parser::{ChangelogParser, ChangelogSegment};
use crate::config::repository::releases;
use crate::models::{Product, Release};
use crate::services::version::compare_versions;

/// What a changelog import changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangelogImportReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Stale pending version and the version it was renamed to
    pub promoted: Option<(String, String)>,
    /// Pending version after the import
    pub pending: Option<String>,
}

/// Parse `raw_text` and import it for `product` in one transaction
///
/// A malformed changelog is rejected before anything is written.
pub async fn update_changelog(
    pool: &SqlitePool,
    product: &Product,
    raw_text: &str,
) -> Result<ChangelogImportReport> {
    let segments = ChangelogParser::new(raw_text)
        .parse_all()
        .with_context(|| format!("Changelog of '{}' rejected", product.name))?;

    let mut tx = pool.begin().await.context("Failed to start transaction")?;
    let report = import_segments(&mut tx, product, &segments).await?;
    tx.commit().await.context("Failed to commit changelog import")?;

    log::info!(
        "Imported changelog of '{}': {} new, {} updated, {} unchanged",
        product.name,
        report.created,
        report.updated,
        report.unchanged
    );
    if let Some((from, to)) = &report.promoted {
        log::info!("Pending release {} of '{}' became {}", from, product.name, to);
    }

    Ok(report)
}

/// Import already parsed segments against an open connection or transaction
pub async fn import_segments(
    conn: &mut SqliteConnection,
    product: &Product,
    segments: &[ChangelogSegment],
) -> Result<ChangelogImportReport> {
    let mut report = ChangelogImportReport {
        pending: segments
            .iter()
            .find(|s| s.is_pending())
            .map(|s| s.version.clone()),
        ..Default::default()
    };

    hand_over_pending(conn, product, segments, &mut report).await?;

    for segment in segments {
        let fields = segment.release_fields();
        match releases::find(conn, product.id, &segment.version).await? {
            Some(existing) if existing.parsed_fields() == fields => {
                report.unchanged += 1;
            }
            Some(existing) => {
                log::debug!("Updating release {} of '{}'", segment.version, product.name);
                releases::update_parsed(conn, existing.id, &fields).await?;
                report.updated += 1;
            }
            None => {
                log::debug!("New release {} of '{}'", segment.version, product.name);
                releases::create(conn, product.id, &segment.version, &fields).await?;
                report.created += 1;
            }
        }
    }

    Ok(report)
}

/// Resolve stored pending releases whose version is no longer in the changelog
async fn hand_over_pending(
    conn: &mut SqliteConnection,
    product: &Product,
    segments: &[ChangelogSegment],
    report: &mut ChangelogImportReport,
) -> Result<()> {
    let parsed: HashSet<&str> = segments.iter().map(|s| s.version.as_str()).collect();
    let stale: Vec<Release> = releases::list_pending(conn, product.id)
        .await?
        .into_iter()
        .filter(|r| !parsed.contains(r.version.as_str()))
        .collect();
    if stale.is_empty() {
        return Ok(());
    }

    let mut unknown = Vec::new();
    for segment in segments {
        if releases::find(conn, product.id, &segment.version).await?.is_none() {
            unknown.push(segment.version.as_str());
        }
    }

    for release in stale {
        if let Some(target) = take_successor(&mut unknown, &release.version) {
            log::debug!(
                "Renaming pending release {} of '{}' to {}",
                release.version,
                product.name,
                target
            );
            releases::rename(conn, release.id, target).await?;
            report.promoted = Some((release.version, target.to_string()));
            continue;
        }

        let Some(pending) = report.pending.as_deref() else {
            log::debug!(
                "Keeping pending release {} of '{}'",
                release.version,
                product.name
            );
            continue;
        };

        let Some(current) = releases::find(conn, product.id, pending).await? else {
            continue;
        };
        log::debug!(
            "Merging pending release {} of '{}' into {}",
            release.version,
            product.name,
            pending
        );
        let obs = merge_notes(&current.obs, &release.obs);
        releases::set_obs(conn, current.id, &obs).await?;
        releases::delete(conn, release.id).await?;
    }

    Ok(())
}

/// Remove and return the oldest version newer than `pending`
fn take_successor<'a>(unknown: &mut Vec<&'a str>, pending: &str) -> Option<&'a str> {
    let index = unknown
        .iter()
        .enumerate()
        .filter(|(_, v)| compare_versions(v, pending) == Ordering::Greater)
        .min_by(|(_, a), (_, b)| compare_versions(a, b))
        .map(|(i, _)| i)?;
    Some(unknown.swap_remove(index))
}

fn merge_notes(kept: &str, merged: &str) -> String {
    match (kept.trim().is_empty(), merged.trim().is_empty()) {
        (_, true) => kept.to_string(),
        (true, false) => merged.to_string(),
        (false, false) => format!("{}\n{}", kept, merged),
    }
}
