//! Detected links and the master requirement catalogue.
//!
//! [`LinkIndex`] persists every identifier found during ingestion, valid or
//! weak. Rows are keyed on (document hash, requirement id, first
//! [`SNIPPET_PREFIX_CHARS`] characters of the context), so re-scanning
//! unchanged content inserts nothing.
//!
//! [`RequirementMaster`] holds the canonical catalogue the auditor compares
//! against. It is loaded in bulk from CSV and never written by ingestion.

use sqlx::SqlitePool;
use std::path::Path;
use tracing::info;

use crate::error::MasterImportError;
use crate::link_extract::FoundLink;
use crate::models::{ActionType, AuditStatus, DetectedLink, MasterRequirement};
use crate::registry::Registry;

/// Length of the context prefix that participates in link deduplication.
pub const SNIPPET_PREFIX_CHARS: usize = 50;

/// A detected link joined with the filename of the document it came from.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct LinkRow {
    pub req_id: String,
    pub filename: String,
    pub context_snippet: String,
    pub valid_context: bool,
}

#[derive(Clone)]
pub struct LinkIndex {
    pool: SqlitePool,
}

impl LinkIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist one link for `content_hash`. Returns `false` when an
    /// equivalent row already exists.
    pub async fn record(&self, content_hash: &str, link: &FoundLink) -> Result<bool, sqlx::Error> {
        let prefix: String = link.context.chars().take(SNIPPET_PREFIX_CHARS).collect();
        let result = sqlx::query(
            r#"
            INSERT INTO detected_links
                (content_hash, req_id, context_snippet, snippet_prefix, confidence, valid_context)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(content_hash, req_id, snippet_prefix) DO NOTHING
            "#,
        )
        .bind(content_hash)
        .bind(&link.req_id)
        .bind(&link.context)
        .bind(prefix)
        .bind(link.confidence)
        .bind(link.valid_context)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn links_for_document(&self, content_hash: &str) -> Result<Vec<DetectedLink>, sqlx::Error> {
        sqlx::query_as::<_, DetectedLink>(
            "SELECT link_id, content_hash, req_id, context_snippet, confidence, valid_context \
             FROM detected_links WHERE content_hash = ? ORDER BY link_id",
        )
        .bind(content_hash)
        .fetch_all(&self.pool)
        .await
    }

    /// Every link with its document's filename, in insertion order.
    pub async fn audit_rows(&self) -> Result<Vec<LinkRow>, sqlx::Error> {
        sqlx::query_as::<_, LinkRow>(
            r#"
            SELECT l.req_id, d.filename, l.context_snippet, l.valid_context
            FROM detected_links l
            JOIN documents d ON d.content_hash = l.content_hash
            ORDER BY l.link_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
    }
}

#[derive(Clone)]
pub struct RequirementMaster {
    pool: SqlitePool,
}

impl RequirementMaster {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or replace by `req_id`, in one transaction.
    pub async fn add(&self, requirements: &[MasterRequirement]) -> Result<usize, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        for req in requirements {
            sqlx::query(
                "INSERT OR REPLACE INTO master_requirements (req_id, description, category, status) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(&req.req_id)
            .bind(&req.description)
            .bind(&req.category)
            .bind(&req.status)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(requirements.len())
    }

    /// The whole catalogue, ordered by id.
    pub async fn all(&self) -> Result<Vec<MasterRequirement>, sqlx::Error> {
        sqlx::query_as::<_, MasterRequirement>(
            "SELECT req_id, description, category, status FROM master_requirements ORDER BY req_id",
        )
        .fetch_all(&self.pool)
        .await
    }

    /// Load a `req_id,description[,category]` CSV with a header row.
    /// Success and failure are both written to the audit log.
    pub async fn import_csv(&self, path: &Path, registry: &Registry) -> Result<usize, MasterImportError> {
        let target = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let result = match parse_master_csv(path) {
            Ok(requirements) => self.add(&requirements).await.map_err(MasterImportError::from),
            Err(e) => Err(MasterImportError::from(e)),
        };

        match &result {
            Ok(count) => {
                info!(file = %target, count, "imported master requirements");
                registry
                    .log_action(
                        ActionType::MasterUpload,
                        &target,
                        AuditStatus::Success,
                        &format!("imported {} requirements", count),
                    )
                    .await;
            }
            Err(e) => {
                registry
                    .log_action(
                        ActionType::MasterUpload,
                        &target,
                        AuditStatus::Failed,
                        &e.to_string(),
                    )
                    .await;
            }
        }
        result
    }
}

/// Rows with fewer than two columns or a blank id are ignored.
fn parse_master_csv(path: &Path) -> Result<Vec<MasterRequirement>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;

    let mut out = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.len() < 2 {
            continue;
        }
        let mut req = MasterRequirement::new(&record[0], &record[1]);
        if req.req_id.is_empty() {
            continue;
        }
        if let Some(category) = record.get(2).map(str::trim).filter(|c| !c.is_empty()) {
            req.category = category.to_string();
        }
        out.push(req);
    }
    Ok(out)
}
