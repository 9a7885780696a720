//! Error taxonomy for extraction and ingestion.
//!
//! Nothing in this module aborts a scan. The ingestion driver catches every
//! [`IngestError`], counts it in the [`ScanReport`](crate::ingest::ScanReport)
//! and moves on:
//!
//! | Variant | Effect |
//! |---------|--------|
//! | `Io` | file skipped |
//! | `Rejected` | file skipped before hashing |
//! | `Format` | unit (page, slide, row) or file skipped |
//! | `OcrUnavailable` | OCR'd units degrade to empty text |
//! | `MemoryPressure` | rest of the current batch skipped |
//! | `Store` | link or audit row lost, scan continues |

use std::path::PathBuf;
use thiserror::Error;

/// Failure of a single extraction capability call.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),

    #[error("tabular extraction failed: {0}")]
    Tabular(String),

    #[error("image decode failed: {0}")]
    Image(String),

    #[error("page render failed: {0}")]
    Render(String),

    #[error("OCR failed: {0}")]
    Ocr(String),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} rejected: {reason}", path.display())]
    Rejected { path: PathBuf, reason: String },

    #[error("{} unit {unit}: {message}", path.display())]
    Format {
        path: PathBuf,
        unit: usize,
        message: String,
    },

    #[error("OCR unavailable: {0}")]
    OcrUnavailable(String),

    #[error("memory pressure at {percent:.1}% in {}, {skipped} page(s) skipped", path.display())]
    MemoryPressure {
        path: PathBuf,
        percent: f64,
        skipped: usize,
    },

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}

/// Failure of a master catalogue import. The import is all-or-nothing.
#[derive(Debug, Error)]
pub enum MasterImportError {
    #[error("cannot parse master CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}

impl IngestError {
    pub fn format(path: impl Into<PathBuf>, unit: usize, err: impl std::fmt::Display) -> Self {
        IngestError::Format {
            path: path.into(),
            unit,
            message: err.to_string(),
        }
    }
}
