use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create the database (if needed) and apply the schema.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Idempotent schema creation on an open pool.
pub async fn apply_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    // Content-addressed document ledger. One row per distinct byte content.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            content_hash TEXT PRIMARY KEY,
            filename TEXT NOT NULL,
            registered_at INTEGER NOT NULL,
            size_bytes INTEGER NOT NULL,
            version INTEGER NOT NULL DEFAULT 1,
            UNIQUE(filename, version)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS master_requirements (
            req_id TEXT PRIMARY KEY,
            description TEXT NOT NULL DEFAULT '',
            category TEXT NOT NULL DEFAULT 'Gen',
            status TEXT NOT NULL DEFAULT 'Active'
        )
        "#,
    )
    .execute(pool)
    .await?;

    // snippet_prefix carries the dedupe key so the insert can be a single
    // ON CONFLICT DO NOTHING statement.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS detected_links (
            link_id INTEGER PRIMARY KEY AUTOINCREMENT,
            content_hash TEXT NOT NULL,
            req_id TEXT NOT NULL,
            context_snippet TEXT NOT NULL,
            snippet_prefix TEXT NOT NULL,
            confidence REAL NOT NULL,
            valid_context INTEGER NOT NULL,
            UNIQUE(content_hash, req_id, snippet_prefix),
            FOREIGN KEY (content_hash) REFERENCES documents(content_hash)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS action_audit (
            audit_id INTEGER PRIMARY KEY AUTOINCREMENT,
            action_type TEXT NOT NULL,
            target TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('SUCCESS', 'FAILED')),
            timestamp INTEGER NOT NULL,
            details TEXT NOT NULL DEFAULT ''
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_filename ON documents(filename)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_detected_links_req_id ON detected_links(req_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_action_audit_timestamp ON action_audit(timestamp DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn schema_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect_path(&tmp.path().join("t.sqlite")).await.unwrap();
        apply_schema(&pool).await.unwrap();
        apply_schema(&pool).await.unwrap();

        let tables: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN \
             ('documents', 'master_requirements', 'detected_links', 'action_audit')",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(tables, 4);
    }
}
