//! Document registry: content-hash identity, versions, and the audit log.
//!
//! A file's identity is the SHA-256 of its bytes. Registering identical
//! bytes twice is a no-op; a filename registered with new bytes gets the
//! next version number for that filename.

use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::path::Path;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use crate::error::IngestError;
use crate::models::{ActionType, AuditEvent, AuditStatus, Document};

/// Fixed read size for hashing, so memory stays flat for any file size.
const HASH_BLOCK_SIZE: usize = 64 * 1024;

#[derive(Clone)]
pub struct Registry {
    pool: SqlitePool,
}

impl Registry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Hash `path` and record it under `filename`.
    ///
    /// Returns the content hash and whether a new row was written. An
    /// unreadable file yields [`IngestError::Io`] and the caller skips it.
    pub async fn register(&self, path: &Path, filename: &str) -> Result<(String, bool), IngestError> {
        let (hash, size) = hash_file(path).await.map_err(|source| IngestError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        // Version allocation and the insert are one statement, so two
        // writers cannot both claim the same (filename, version).
        let inserted = sqlx::query(
            r#"
            INSERT INTO documents (content_hash, filename, registered_at, size_bytes, version)
            SELECT ?, ?, ?, ?, COALESCE(MAX(version), 0) + 1
            FROM documents WHERE filename = ?
            ON CONFLICT(content_hash) DO NOTHING
            "#,
        )
        .bind(&hash)
        .bind(filename)
        .bind(chrono::Utc::now().timestamp())
        .bind(size as i64)
        .bind(filename)
        .execute(&self.pool)
        .await?
        .rows_affected()
            == 1;

        debug!(file = filename, hash = %hash, is_new = inserted, "registered document");
        Ok((hash, inserted))
    }

    pub async fn get_metadata(&self, content_hash: &str) -> Result<Option<Document>, sqlx::Error> {
        sqlx::query_as::<_, Document>(
            "SELECT content_hash, filename, registered_at, size_bytes, version \
             FROM documents WHERE content_hash = ?",
        )
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await
    }

    /// All versions registered under `filename`, newest first.
    pub async fn list_versions(&self, filename: &str) -> Result<Vec<Document>, sqlx::Error> {
        sqlx::query_as::<_, Document>(
            "SELECT content_hash, filename, registered_at, size_bytes, version \
             FROM documents WHERE filename = ? ORDER BY version DESC",
        )
        .bind(filename)
        .fetch_all(&self.pool)
        .await
    }

    /// Append an audit event. Best-effort: a storage failure is logged and
    /// swallowed so it never aborts the operation being audited.
    pub async fn log_action(
        &self,
        action: ActionType,
        target: &str,
        status: AuditStatus,
        details: &str,
    ) {
        let result = sqlx::query(
            "INSERT INTO action_audit (action_type, target, status, timestamp, details) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(action.as_str())
        .bind(target)
        .bind(status.as_str())
        .bind(chrono::Utc::now().timestamp())
        .bind(details)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            warn!(action = action.as_str(), target, error = %e, "failed to append audit event");
        }
    }

    pub async fn recent_actions(&self, limit: i64) -> Result<Vec<AuditEvent>, sqlx::Error> {
        sqlx::query_as::<_, AuditEvent>(
            "SELECT audit_id, action_type, target, status, timestamp, details \
             FROM action_audit ORDER BY audit_id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }
}

/// Streaming SHA-256 of a file. Returns the hex digest and byte count.
pub async fn hash_file(path: &Path) -> std::io::Result<(String, u64)> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BLOCK_SIZE];
    let mut total = 0u64;
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((format!("{:x}", hasher.finalize()), total))
}
