//! Database statistics and health overview.
//!
//! A quick summary of what the store holds: registered documents and
//! versions, the master catalogue, detected links split by context quality,
//! and the audit log. Used by `trh stats` to check that ingests and master
//! imports landed.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;

/// Counts printed by `trh stats`.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StoreStats {
    pub documents: i64,
    pub filenames: i64,
    pub master_requirements: i64,
    pub links_valid: i64,
    pub links_weak: i64,
    pub orphan_links: i64,
    pub audit_events: i64,
    pub last_event_ts: Option<i64>,
}

pub async fn collect(pool: &SqlitePool) -> Result<StoreStats, sqlx::Error> {
    let docs = sqlx::query("SELECT COUNT(*) AS n, COUNT(DISTINCT filename) AS names FROM documents")
        .fetch_one(pool)
        .await?;

    let master_requirements: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM master_requirements")
        .fetch_one(pool)
        .await?;

    let links = sqlx::query(
        r#"
        SELECT
            COALESCE(SUM(CASE WHEN valid_context THEN 1 ELSE 0 END), 0) AS valid,
            COALESCE(SUM(CASE WHEN valid_context THEN 0 ELSE 1 END), 0) AS weak
        FROM detected_links
        "#,
    )
    .fetch_one(pool)
    .await?;

    let orphan_links: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM detected_links l
        WHERE NOT EXISTS (SELECT 1 FROM master_requirements m WHERE m.req_id = l.req_id)
        "#,
    )
    .fetch_one(pool)
    .await?;

    let audit = sqlx::query("SELECT COUNT(*) AS n, MAX(timestamp) AS last FROM action_audit")
        .fetch_one(pool)
        .await?;

    Ok(StoreStats {
        documents: docs.get("n"),
        filenames: docs.get("names"),
        master_requirements,
        links_valid: links.get("valid"),
        links_weak: links.get("weak"),
        orphan_links,
        audit_events: audit.get("n"),
        last_event_ts: audit.get("last"),
    })
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let stats = collect(&pool).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Trace Harness: Database Stats");
    println!("=============================");
    println!();
    println!("  Database:      {}", config.db.path.display());
    println!("  Size:          {}", format_bytes(db_size));
    println!();
    println!(
        "  Documents:     {} ({} distinct filenames)",
        stats.documents, stats.filenames
    );
    println!("  Requirements:  {}", stats.master_requirements);
    println!(
        "  Links:         {} valid, {} weak",
        stats.links_valid, stats.links_weak
    );
    println!("  Orphan links:  {}", stats.orphan_links);
    println!(
        "  Audit events:  {} (last: {})",
        stats.audit_events,
        stats
            .last_event_ts
            .map(format_ts_relative)
            .unwrap_or_else(|| "never".to_string())
    );
    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
pub fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

pub fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link_extract::FoundLink;
    use crate::links::{LinkIndex, RequirementMaster};
    use crate::models::{ActionType, AuditStatus, MasterRequirement};
    use crate::registry::Registry;
    use crate::{db, migrate};
    use tempfile::TempDir;

    #[test]
    fn bytes_are_human_readable() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn recent_timestamps_are_relative() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 7200), "2 hours ago");
        assert_eq!(format_ts_iso(0), "1970-01-01 00:00");
    }

    #[tokio::test]
    async fn collect_counts_every_table() {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect_path(&tmp.path().join("s.sqlite")).await.unwrap();
        migrate::apply_schema(&pool).await.unwrap();

        let empty = collect(&pool).await.unwrap();
        assert_eq!(empty, StoreStats::default());

        let registry = Registry::new(pool.clone());
        let path = tmp.path().join("a.txt");
        std::fs::write(&path, "one").unwrap();
        let (hash, _) = registry.register(&path, "a.txt").await.unwrap();
        std::fs::write(&path, "two").unwrap();
        registry.register(&path, "a.txt").await.unwrap();

        RequirementMaster::new(pool.clone())
            .add(&[MasterRequirement::new("REQ-1", "brakes")])
            .await
            .unwrap();

        let index = LinkIndex::new(pool.clone());
        for (id, valid) in [("REQ-1", true), ("BUG-7", false)] {
            index
                .record(
                    &hash,
                    &FoundLink {
                        req_id: id.to_string(),
                        context: format!("context for {}", id),
                        valid_context: valid,
                        confidence: 0.5,
                    },
                )
                .await
                .unwrap();
        }
        registry
            .log_action(ActionType::Query, "stats", AuditStatus::Success, "")
            .await;

        let stats = collect(&pool).await.unwrap();
        assert_eq!(stats.documents, 2);
        assert_eq!(stats.filenames, 1);
        assert_eq!(stats.master_requirements, 1);
        assert_eq!(stats.links_valid, 1);
        assert_eq!(stats.links_weak, 1);
        assert_eq!(stats.orphan_links, 1);
        assert_eq!(stats.audit_events, 1);
        assert!(stats.last_event_ts.is_some());
    }
}
