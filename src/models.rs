//! Core data models.
//!
//! Persisted rows ([`Document`], [`MasterRequirement`], [`DetectedLink`],
//! [`AuditEvent`]) and the transient values that flow through one ingest
//! pass ([`TextUnit`], [`Chunk`]).

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Content-addressed document identity. `content_hash` is the SHA-256 of
/// the full byte content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Document {
    pub content_hash: String,
    pub filename: String,
    pub registered_at: i64,
    pub size_bytes: i64,
    pub version: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct MasterRequirement {
    pub req_id: String,
    pub description: String,
    pub category: String,
    pub status: String,
}

impl MasterRequirement {
    pub fn new(req_id: &str, description: &str) -> Self {
        Self {
            req_id: req_id.trim().to_uppercase(),
            description: description.trim().to_string(),
            category: "Gen".to_string(),
            status: "Active".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct DetectedLink {
    pub link_id: i64,
    pub content_hash: String,
    pub req_id: String,
    pub context_snippet: String,
    pub confidence: f64,
    pub valid_context: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct AuditEvent {
    pub audit_id: i64,
    pub action_type: String,
    pub target: String,
    pub status: String,
    pub timestamp: i64,
    pub details: String,
}

/// Audit log vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionType {
    /// A file was registered (or failed to be).
    Upload,
    /// A directory scan started or finished.
    Refresh,
    /// The master requirement catalogue was imported.
    MasterUpload,
    /// A downstream consumer queried the index.
    Query,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Upload => "UPLOAD",
            ActionType::Refresh => "REFRESH",
            ActionType::MasterUpload => "MASTER_UPLOAD",
            ActionType::Query => "QUERY",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditStatus {
    Success,
    Failed,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Success => "SUCCESS",
            AuditStatus::Failed => "FAILED",
        }
    }
}

/// How a unit's text was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// PDF page with usable embedded text.
    Digital,
    /// PDF page whose text came from OCR.
    Scanned,
    Slide,
    Document,
    Image,
    Text,
    Table,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Digital => "digital",
            SourceType::Scanned => "scanned",
            SourceType::Slide => "slide",
            SourceType::Document => "document",
            SourceType::Image => "image",
            SourceType::Text => "text",
            SourceType::Table => "table",
        }
    }
}

pub const PAGE_KEY: &str = "page";
pub const FILE_HASH_KEY: &str = "file_hash";
pub const FOUND_LINKS_KEY: &str = "found_links";

/// Provenance attached to a text unit and inherited by its chunks.
///
/// `source` and `source_type` are always present. Optional fields live in
/// the string-keyed `extra` map and are flattened on serialization, so a
/// consumer sees `{"source": .., "type": .., "page": .., ...}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitMetadata {
    pub source: String,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl UnitMetadata {
    pub fn new(source: impl Into<String>, source_type: SourceType) -> Self {
        Self {
            source: source.into(),
            source_type,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_page(mut self, page: usize) -> Self {
        self.extra.insert(PAGE_KEY.to_string(), Value::from(page as u64));
        self
    }

    pub fn with_file_hash(mut self, hash: &str) -> Self {
        self.extra
            .insert(FILE_HASH_KEY.to_string(), Value::from(hash.to_string()));
        self
    }

    /// Any other optional field, e.g. `row` or `sheet` for tabular units.
    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }

    /// Stores identifiers as one comma-separated string, which keeps the
    /// metadata flat for vector stores that only accept scalar values.
    pub fn set_found_links(&mut self, ids: &[String]) {
        if ids.is_empty() {
            self.extra.remove(FOUND_LINKS_KEY);
        } else {
            self.extra
                .insert(FOUND_LINKS_KEY.to_string(), Value::from(ids.join(",")));
        }
    }

    pub fn page(&self) -> Option<u64> {
        self.extra.get(PAGE_KEY).and_then(Value::as_u64)
    }

    pub fn file_hash(&self) -> Option<&str> {
        self.extra.get(FILE_HASH_KEY).and_then(Value::as_str)
    }

    pub fn found_links(&self) -> Vec<&str> {
        self.extra
            .get(FOUND_LINKS_KEY)
            .and_then(Value::as_str)
            .map(|s| s.split(',').filter(|id| !id.is_empty()).collect())
            .unwrap_or_default()
    }
}

/// Text of one logical subdivision of a file: a PDF page, a slide, a
/// spreadsheet row, or a whole document.
#[derive(Debug, Clone, PartialEq)]
pub struct TextUnit {
    pub text: String,
    pub metadata: UnitMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkMetadata {
    #[serde(flatten)]
    pub unit: UnitMetadata,
    pub chunk_hash: String,
    pub chunk_index: usize,
}

/// A chunk handed to the downstream indexer. Never persisted here.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chunk {
    pub page_content: String,
    pub metadata: ChunkMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_serializes_flat() {
        let mut meta = UnitMetadata::new("/docs/a.pdf", SourceType::Scanned)
            .with_page(2)
            .with_file_hash("abc");
        meta.set_found_links(&["REQ-1".to_string(), "BUG-7".to_string()]);

        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["source"], "/docs/a.pdf");
        assert_eq!(json["type"], "scanned");
        assert_eq!(json["page"], 2);
        assert_eq!(json["file_hash"], "abc");
        assert_eq!(json["found_links"], "REQ-1,BUG-7");
    }

    #[test]
    fn typed_accessors_read_extension_map() {
        let mut meta = UnitMetadata::new("x.txt", SourceType::Text).with_page(1);
        assert_eq!(meta.page(), Some(1));
        assert_eq!(meta.file_hash(), None);
        assert!(meta.found_links().is_empty());

        meta.set_found_links(&["SPEC-3".to_string()]);
        assert_eq!(meta.found_links(), vec!["SPEC-3"]);
        meta.set_found_links(&[]);
        assert!(!meta.extra.contains_key(FOUND_LINKS_KEY));
    }

    #[test]
    fn master_requirement_ids_are_normalized() {
        let req = MasterRequirement::new(" req-12 ", " Brakes engage ");
        assert_eq!(req.req_id, "REQ-12");
        assert_eq!(req.description, "Brakes engage");
        assert_eq!(req.category, "Gen");
        assert_eq!(req.status, "Active");
    }
}
