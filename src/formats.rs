//! Closed set of input formats and the extension mapping.

use std::path::Path;

use crate::models::SourceType;

/// Every format the ingestion driver knows how to split into units.
/// Anything else maps to `None` and the file is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupportedFormat {
    /// One unit per page, hybrid digital/OCR.
    Pdf,
    /// One unit per slide.
    SlideDeck,
    /// One unit for the whole document.
    WordDocument,
    /// One OCR'd unit per image.
    Image,
    /// One unit for the whole file.
    PlainText,
    /// One unit per data row.
    Csv,
    /// One unit per data row, across all sheets.
    Spreadsheet,
}

impl SupportedFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(SupportedFormat::Pdf),
            "pptx" => Some(SupportedFormat::SlideDeck),
            "docx" => Some(SupportedFormat::WordDocument),
            "png" | "jpg" | "jpeg" => Some(SupportedFormat::Image),
            "txt" | "md" => Some(SupportedFormat::PlainText),
            "csv" => Some(SupportedFormat::Csv),
            "xlsx" => Some(SupportedFormat::Spreadsheet),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// Label given to units of this format. PDF pages are relabeled
    /// `scanned` when OCR text wins.
    pub fn source_type(&self) -> SourceType {
        match self {
            SupportedFormat::Pdf => SourceType::Digital,
            SupportedFormat::SlideDeck => SourceType::Slide,
            SupportedFormat::WordDocument => SourceType::Document,
            SupportedFormat::Image => SourceType::Image,
            SupportedFormat::PlainText => SourceType::Text,
            SupportedFormat::Csv | SupportedFormat::Spreadsheet => SourceType::Table,
        }
    }
}
