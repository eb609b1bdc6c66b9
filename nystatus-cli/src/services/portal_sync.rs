//! Portal and portal error reconciliation
//!
//! Portals follow the instance's portal list exactly: new names are created,
//! missing ones removed (with their errors). Errors are never removed by a sync;
//! a re-seen error bumps its counter, a new one starts at one.

use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};

use crate::api::client::method_url;
use crate::api::{FetchFailure, ReportedError};
use crate::config::repository::errors::ErrorKey;
use crate::config::repository::{errors, portals};
use crate::models::{Instance, Portal, connection_failure_status, portal_status};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortalSyncReport {
    pub created: usize,
    pub removed: usize,
    pub kept: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorSyncReport {
    pub created: usize,
    pub recurring: usize,
    /// Entries already counted by an earlier sync
    pub already_seen: usize,
    pub unsolved: i64,
}

/// Make the instance's stored portals match `names`
pub async fn update_portals(
    pool: &SqlitePool,
    instance: &Instance,
    names: &[String],
) -> Result<PortalSyncReport> {
    let mut tx = pool.begin().await.context("Failed to start transaction")?;
    let report = sync_portals(&mut tx, instance, names).await?;
    tx.commit().await.context("Failed to commit portal sync")?;

    log::info!(
        "Synced portals for '{}' ({} new, {} removed, {} kept)",
        instance.name,
        report.created,
        report.removed,
        report.kept
    );

    Ok(report)
}

pub async fn sync_portals(
    conn: &mut SqliteConnection,
    instance: &Instance,
    names: &[String],
) -> Result<PortalSyncReport> {
    let now = Utc::now();
    let wanted: HashSet<&str> = names.iter().map(String::as_str).collect();
    let mut report = PortalSyncReport::default();

    for portal in portals::list_for_instance(conn, instance.id).await? {
        if !wanted.contains(portal.portal_name.as_str()) {
            log::debug!("'{}' no longer hosts portal '{}'", instance.name, portal.portal_name);
            portals::delete(conn, portal.id).await?;
            report.removed += 1;
        }
    }

    let mut seen: HashSet<&str> = HashSet::new();
    for name in names {
        if !seen.insert(name.as_str()) {
            continue;
        }
        let url = method_url(&instance.url, name);
        match portals::find(conn, instance.id, name).await? {
            Some(portal) => {
                portals::touch(conn, portal.id, &url, now).await?;
                report.kept += 1;
            }
            None => {
                portals::create(conn, instance.id, name, &url, now).await?;
                report.created += 1;
            }
        }
    }

    Ok(report)
}

/// Merge a portal's reported errors into the stored error log
pub async fn update_errors(
    pool: &SqlitePool,
    instance: &Instance,
    portal: &Portal,
    reported: &[ReportedError],
) -> Result<ErrorSyncReport> {
    let mut tx = pool.begin().await.context("Failed to start transaction")?;
    let report = sync_errors(&mut tx, portal, reported).await?;
    tx.commit().await.context("Failed to commit error sync")?;

    log::info!(
        "Synced errors for '{}/{}' ({} new, {} recurring, {} unsolved)",
        instance.name,
        portal.portal_name,
        report.created,
        report.recurring,
        report.unsolved
    );

    Ok(report)
}

pub async fn sync_errors(
    conn: &mut SqliteConnection,
    portal: &Portal,
    reported: &[ReportedError],
) -> Result<ErrorSyncReport> {
    let now = Utc::now();
    let mut report = ErrorSyncReport::default();

    for (key, entry) in collapse(reported) {
        let date = entry.time.unwrap_or(now);

        match errors::find(conn, portal.id, &key).await? {
            None => {
                errors::create(conn, portal.id, &key, &entry.traceback, date, entry.time).await?;
                report.created += 1;
            }
            // Only remote timestamps are comparable; our own clock is not
            Some(existing)
                if entry
                    .time
                    .zip(existing.reported_at)
                    .is_some_and(|(time, seen)| time <= seen) =>
            {
                report.already_seen += 1;
            }
            Some(existing) => {
                errors::record_occurrence(conn, existing.id, &entry.traceback, date, entry.time)
                    .await?;
                report.recurring += 1;
            }
        }
    }

    report.unsolved = errors::count_unsolved(conn, portal.id).await?;
    portals::set_error_summary(
        conn,
        portal.id,
        report.unsolved,
        &portal_status(report.unsolved),
        now,
    )
    .await?;

    Ok(report)
}

/// Mark a portal whose error log could not be read
pub async fn record_portal_failure(
    pool: &SqlitePool,
    portal: &Portal,
    failure: &FetchFailure,
) -> Result<String> {
    let status = connection_failure_status(&failure.to_string());
    log::warn!("Portal '{}': {}", portal.portal_name, status);

    let mut conn = pool.acquire().await.context("Failed to acquire connection")?;
    portals::set_status(&mut conn, portal.id, &status, Utc::now()).await?;

    Ok(status)
}

/// Latest occurrence of an error in a batch
#[derive(Debug, Clone)]
struct BatchEntry {
    traceback: String,
    time: Option<DateTime<Utc>>,
}

// One entry per key, in first-seen order; the newest timestamp and its traceback win.
fn collapse(reported: &[ReportedError]) -> Vec<(ErrorKey, BatchEntry)> {
    let mut index: HashMap<ErrorKey, usize> = HashMap::new();
    let mut entries: Vec<(ErrorKey, BatchEntry)> = Vec::new();

    for error in reported {
        let key = ErrorKey {
            error_type: error.error_type.clone(),
            error_name: error.error_name.clone(),
            url: error.url.clone(),
        };
        let entry = BatchEntry {
            traceback: error.traceback.clone(),
            time: error.time,
        };

        match index.get(&key) {
            Some(&i) => {
                if entry.time >= entries[i].1.time {
                    entries[i].1 = entry;
                }
            }
            None => {
                index.insert(key.clone(), entries.len());
                entries.push((key, entry));
            }
        }
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::parse_errors;
    use crate::config::repository::instances::{self, NewInstance};
    use crate::config::repository::memory_pool;

    const JSON_ERRORS: &str = include_str!("../../testdata/json_errors.json");

    fn portal_names() -> Vec<String> {
        (0..4).map(|i| format!("fake_portal{}", i)).collect()
    }

    async fn setup() -> (SqlitePool, Instance) {
        let pool = memory_pool().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        let instance = instances::create(
            &mut conn,
            &NewInstance {
                name: "xxxTesting Instancexxx".to_string(),
                url: "http://testing.test/".to_string(),
                private_key: String::new(),
                revisit: true,
            },
        )
        .await
        .unwrap();
        drop(conn);
        (pool, instance)
    }

    async fn stored_portals(pool: &SqlitePool, instance: &Instance) -> Vec<Portal> {
        let mut conn = pool.acquire().await.unwrap();
        portals::list_for_instance(&mut conn, instance.id).await.unwrap()
    }

    #[tokio::test]
    async fn test_portals_follow_reported_list() {
        let (pool, instance) = setup().await;

        let report = update_portals(&pool, &instance, &portal_names()).await.unwrap();
        assert_eq!(report.created, 4);
        let portals = stored_portals(&pool, &instance).await;
        assert_eq!(portals.len(), 4);
        assert_eq!(portals[0].url, "http://testing.test/fake_portal0");

        let report = update_portals(&pool, &instance, &portal_names()).await.unwrap();
        assert_eq!(report, PortalSyncReport { created: 0, removed: 0, kept: 4 });

        let report = update_portals(&pool, &instance, &["fake_portal2".to_string()])
            .await
            .unwrap();
        assert_eq!(report.removed, 3);
        let portals = stored_portals(&pool, &instance).await;
        assert_eq!(portals.len(), 1);
        assert_eq!(portals[0].portal_name, "fake_portal2");
    }

    #[tokio::test]
    async fn test_errors_are_deduplicated() {
        let (pool, instance) = setup().await;
        update_portals(&pool, &instance, &portal_names()).await.unwrap();
        let portal = stored_portals(&pool, &instance).await.remove(0);
        let reported = parse_errors(JSON_ERRORS).unwrap();

        let first = update_errors(&pool, &instance, &portal, &reported).await.unwrap();
        assert_eq!(first.created, 4);
        assert_eq!(first.unsolved, 4);

        let second = update_errors(&pool, &instance, &portal, &reported).await.unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.already_seen, 4);

        let mut conn = pool.acquire().await.unwrap();
        let stored = errors::list_for_instance(&mut conn, instance.id).await.unwrap();
        assert_eq!(stored.len(), 4);
        assert!(stored.iter().all(|e| e.count == 1 && !e.solved));

        let portal = portals::find(&mut conn, instance.id, "fake_portal0")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(portal.no_errors, 4);
        assert_eq!(portal.status, "4 unsolved errors");
    }

    #[tokio::test]
    async fn test_recurring_error_increments_count() {
        let (pool, instance) = setup().await;
        update_portals(&pool, &instance, &portal_names()).await.unwrap();
        let portal = stored_portals(&pool, &instance).await.remove(0);

        let early = parse_errors(
            r#"[{"type": "KeyError", "value": "'x'", "url": "http://a/b",
                 "time": "2011-09-28 10:00:00"}]"#,
        )
        .unwrap();
        let later = parse_errors(
            r#"[{"type": "KeyError", "value": "'x'", "url": "http://a/b",
                 "time": "2011-09-29 10:00:00", "tb_text": "newer"},
                {"type": "KeyError", "value": "'x'", "url": "http://a/b",
                 "time": "2011-09-29 09:00:00", "tb_text": "older"}]"#,
        )
        .unwrap();

        update_errors(&pool, &instance, &portal, &early).await.unwrap();
        let report = update_errors(&pool, &instance, &portal, &later).await.unwrap();
        assert_eq!(report.recurring, 1);

        let mut conn = pool.acquire().await.unwrap();
        let stored = errors::list_for_portal(&mut conn, portal.id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].count, 2);
        assert_eq!(stored[0].traceback, "newer");
        assert_eq!(stored[0].date.to_rfc3339(), "2011-09-29T10:00:00+00:00");
    }

    #[tokio::test]
    async fn test_untimed_error_counts_once_per_call() {
        let (pool, instance) = setup().await;
        update_portals(&pool, &instance, &portal_names()).await.unwrap();
        let portal = stored_portals(&pool, &instance).await.remove(0);
        let reported = parse_errors(
            r#"[{"type": "NotFound", "value": "a.gif", "url": "http://a/a.gif"},
                {"type": "NotFound", "value": "a.gif", "url": "http://a/a.gif"}]"#,
        )
        .unwrap();

        let first = update_errors(&pool, &instance, &portal, &reported).await.unwrap();
        assert_eq!(first.created, 1);
        let second = update_errors(&pool, &instance, &portal, &reported).await.unwrap();
        assert_eq!(second.recurring, 1);

        let mut conn = pool.acquire().await.unwrap();
        let stored = errors::list_for_portal(&mut conn, portal.id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].count, 2);
    }

    #[tokio::test]
    async fn test_timed_report_after_untimed_first_sighting_counts() {
        let (pool, instance) = setup().await;
        update_portals(&pool, &instance, &portal_names()).await.unwrap();
        let portal = stored_portals(&pool, &instance).await.remove(0);
        let untimed = parse_errors(
            r#"[{"type": "KeyError", "value": "'x'", "url": "http://a/b"}]"#,
        )
        .unwrap();
        let timed = parse_errors(
            r#"[{"type": "KeyError", "value": "'x'", "url": "http://a/b",
                 "time": "2011-09-29 10:00:00"}]"#,
        )
        .unwrap();

        update_errors(&pool, &instance, &portal, &untimed).await.unwrap();
        let report = update_errors(&pool, &instance, &portal, &timed).await.unwrap();
        assert_eq!(report.recurring, 1);
        assert_eq!(report.already_seen, 0);

        let again = update_errors(&pool, &instance, &portal, &timed).await.unwrap();
        assert_eq!(again.already_seen, 1);

        let mut conn = pool.acquire().await.unwrap();
        let stored = errors::list_for_portal(&mut conn, portal.id).await.unwrap();
        assert_eq!(stored[0].count, 2);
        assert_eq!(
            stored[0].reported_at.map(|t| t.to_rfc3339()).as_deref(),
            Some("2011-09-29T10:00:00+00:00")
        );
    }

    #[tokio::test]
    async fn test_solved_flag_survives_sync() {
        let (pool, instance) = setup().await;
        update_portals(&pool, &instance, &portal_names()).await.unwrap();
        let portal = stored_portals(&pool, &instance).await.remove(0);
        let reported = parse_errors(JSON_ERRORS).unwrap();
        update_errors(&pool, &instance, &portal, &reported).await.unwrap();

        {
            let mut conn = pool.acquire().await.unwrap();
            let stored = errors::list_for_portal(&mut conn, portal.id).await.unwrap();
            errors::set_solved(&mut conn, stored[0].id, true).await.unwrap();
        }

        let report = update_errors(&pool, &instance, &portal, &reported).await.unwrap();
        assert_eq!(report.unsolved, 3);

        let mut conn = pool.acquire().await.unwrap();
        let solved = errors::list_for_portal(&mut conn, portal.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.solved)
            .count();
        assert_eq!(solved, 1);
    }

    #[tokio::test]
    async fn test_removing_portal_drops_its_errors() {
        let (pool, instance) = setup().await;
        update_portals(&pool, &instance, &portal_names()).await.unwrap();
        let portal = stored_portals(&pool, &instance).await.remove(0);
        update_errors(&pool, &instance, &portal, &parse_errors(JSON_ERRORS).unwrap())
            .await
            .unwrap();

        update_portals(&pool, &instance, &[]).await.unwrap();

        let mut conn = pool.acquire().await.unwrap();
        assert!(errors::list_for_instance(&mut conn, instance.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_portal_failure_status() {
        let (pool, instance) = setup().await;
        update_portals(&pool, &instance, &portal_names()).await.unwrap();
        let portal = stored_portals(&pool, &instance).await.remove(0);

        let status = record_portal_failure(
            &pool,
            &portal,
            &FetchFailure::Status {
                url: "http://testing.test/getErrors".to_string(),
                status: 500,
            },
        )
        .await
        .unwrap();
        assert!(status.starts_with("Can not connect"));
        assert_eq!(stored_portals(&pool, &instance).await[0].status, status);
    }
}
