//! Per-format text extraction.
//!
//! Every function here produces text for one *logical unit* or a list of
//! per-unit results, so a bad page, slide, sheet or row can be skipped
//! without losing the rest of the file:
//!
//! | Format | Unit | Entry point |
//! |--------|------|-------------|
//! | PDF | page | [`PdfOpener`] + [`extract_pdf_page`] |
//! | PPTX | slide | [`extract_pptx_slides`] |
//! | DOCX | whole document | [`extract_docx`] |
//! | XLSX | data row | [`extract_xlsx_sheets`] + [`render_sheet`] |
//! | CSV | data row | [`CsvRows`] |
//! | TXT / MD | whole file | [`read_plain_text`] |
//! | PNG / JPEG | whole image | [`open_image`], then OCR |
//!
//! OOXML containers are read with bounded ZIP entry reads so a crafted
//! archive cannot inflate without limit.

use image::DynamicImage;
use lopdf::content::Content;
use lopdf::ObjectId;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;
use tracing::{debug, warn};
use zip::ZipArchive;

use crate::config::OcrConfig;
use crate::error::ExtractError;
use crate::models::SourceType;
use crate::ocr::{ImageSource, OcrService, RasterRenderer};

/// Maximum sheets to process in an xlsx.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum rows to keep per sheet.
const XLSX_MAX_ROWS_PER_SHEET: usize = 100_000;
/// Column index cap (XFD, the last Excel column).
const XLSX_MAX_COLUMNS: usize = 16_384;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

const DOCX_BODY: &str = "word/document.xml";
const PPTX_SLIDE_PREFIX: &str = "ppt/slides/slide";
const XLSX_SHEET_PREFIX: &str = "xl/worksheets/sheet";
const XLSX_SHARED_STRINGS: &str = "xl/sharedStrings.xml";

// ---------------------------------------------------------------------------
// PDF
// ---------------------------------------------------------------------------

/// An opened PDF. Pages are 1-based.
pub trait PagedDocument: Send {
    fn page_count(&self) -> usize;

    /// Embedded text of one page.
    fn page_text(&self, page: usize) -> Result<String, ExtractError>;

    /// Number of text objects on the page, when the backend can tell.
    fn text_block_count(&self, _page: usize) -> Option<usize> {
        None
    }
}

pub trait PdfOpener: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn PagedDocument>, ExtractError>;
}

/// [`PdfOpener`] backed by lopdf.
pub struct LopdfOpener;

impl PdfOpener for LopdfOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn PagedDocument>, ExtractError> {
        let doc = lopdf::Document::load(path).map_err(|e| ExtractError::Pdf(e.to_string()))?;
        let pages = doc.get_pages().into_iter().collect();
        Ok(Box::new(LopdfDocument { doc, pages }))
    }
}

pub struct LopdfDocument {
    doc: lopdf::Document,
    /// (page number, page object), in page order.
    pages: Vec<(u32, ObjectId)>,
}

impl LopdfDocument {
    fn page_entry(&self, page: usize) -> Result<(u32, ObjectId), ExtractError> {
        page.checked_sub(1)
            .and_then(|i| self.pages.get(i))
            .copied()
            .ok_or_else(|| ExtractError::Pdf(format!("page {} out of range", page)))
    }
}

impl PagedDocument for LopdfDocument {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn page_text(&self, page: usize) -> Result<String, ExtractError> {
        let (number, _) = self.page_entry(page)?;
        self.doc
            .extract_text(&[number])
            .map_err(|e| ExtractError::Pdf(e.to_string()))
    }

    /// Counts `BT` operators in the decoded content stream.
    fn text_block_count(&self, page: usize) -> Option<usize> {
        let (_, id) = self.page_entry(page).ok()?;
        let raw = self.doc.get_page_content(id).ok()?;
        let content = Content::decode(&raw).ok()?;
        Some(
            content
                .operations
                .iter()
                .filter(|op| op.operator == "BT")
                .count(),
        )
    }
}

/// Whether a page's embedded text is too thin to trust.
pub fn needs_ocr(text: &str, text_blocks: Option<usize>, config: &OcrConfig) -> bool {
    let sparse_text = text.trim().chars().count() < config.min_text_chars;
    let sparse_blocks = text_blocks.is_some_and(|n| n < config.sparse_block_threshold);
    sparse_text || sparse_blocks
}

/// OCR wins only when it recovered strictly more text.
pub fn choose_page_text(direct: String, ocr: String) -> (String, SourceType) {
    if ocr.trim().chars().count() > direct.trim().chars().count() {
        (ocr, SourceType::Scanned)
    } else {
        (direct, SourceType::Digital)
    }
}

/// Capabilities needed for the scanned-page fallback.
pub struct OcrFallback<'a> {
    pub renderer: &'a dyn RasterRenderer,
    pub ocr: &'a OcrService,
    pub config: &'a OcrConfig,
}

/// Text of one PDF page with the hybrid digital/OCR decision applied.
///
/// Rendering and OCR failures fall back to the embedded text; only a page
/// that yields neither is an error.
pub fn extract_pdf_page(
    doc: &dyn PagedDocument,
    path: &Path,
    page: usize,
    fallback: &OcrFallback<'_>,
) -> Result<(String, SourceType), ExtractError> {
    let direct = match doc.page_text(page) {
        Ok(text) => text,
        Err(e) if fallback.ocr.is_available() => {
            debug!(file = %path.display(), page, error = %e, "embedded text unreadable, trying OCR");
            String::new()
        }
        Err(e) => return Err(e),
    };

    if !fallback.ocr.is_available()
        || !needs_ocr(&direct, doc.text_block_count(page), fallback.config)
    {
        return Ok((direct, SourceType::Digital));
    }

    let raster = match fallback
        .renderer
        .render_page(path, page, fallback.config.render_scale)
    {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(file = %path.display(), page, error = %e, "page render failed, keeping embedded text");
            return Ok((direct, SourceType::Digital));
        }
    };

    match fallback.ocr.recognize(ImageSource::RawBytes(raster)) {
        Ok(recognized) => Ok(choose_page_text(direct, recognized)),
        Err(e) => {
            warn!(file = %path.display(), page, error = %e, "OCR failed, keeping embedded text");
            Ok((direct, SourceType::Digital))
        }
    }
}

// ---------------------------------------------------------------------------
// OOXML
// ---------------------------------------------------------------------------

fn open_zip(path: &Path) -> Result<ZipArchive<File>, ExtractError> {
    let file = File::open(path)?;
    ZipArchive::new(file).map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn read_zip_entry_bounded<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

/// Entries named `<prefix><n>.xml`, sorted by `n`.
fn numbered_entries<R: Read + Seek>(archive: &ZipArchive<R>, prefix: &str) -> Vec<(usize, String)> {
    let mut names: Vec<(usize, String)> = archive
        .file_names()
        .filter(|n| n.starts_with(prefix) && n.ends_with(".xml"))
        .filter_map(|n| {
            n.trim_start_matches(prefix)
                .trim_end_matches(".xml")
                .parse::<usize>()
                .ok()
                .map(|number| (number, n.to_string()))
        })
        .collect();
    names.sort();
    names
}

/// Paragraph text of a WordprocessingML or DrawingML part: `t` runs
/// concatenated, one line per paragraph, tabs as spaces.
fn paragraph_text(xml: &[u8]) -> Result<String, ExtractError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut lines = Vec::new();
    let mut line = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                let text = te.unescape().map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                line.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" | b"br" => flush_line(&mut line, &mut lines),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => line.push(' '),
                b"br" | b"cr" => flush_line(&mut line, &mut lines),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    flush_line(&mut line, &mut lines);
    Ok(lines.join("\n"))
}

fn flush_line(line: &mut String, lines: &mut Vec<String>) {
    let trimmed = line.trim();
    if !trimmed.is_empty() {
        lines.push(trimmed.to_string());
    }
    line.clear();
}

/// Whole-document text of a .docx.
pub fn extract_docx(path: &Path) -> Result<String, ExtractError> {
    let mut archive = open_zip(path)?;
    if !archive.file_names().any(|n| n == DOCX_BODY) {
        return Err(ExtractError::Ooxml(format!("{} not found", DOCX_BODY)));
    }
    let xml = read_zip_entry_bounded(&mut archive, DOCX_BODY, MAX_XML_ENTRY_BYTES)?;
    paragraph_text(&xml)
}

/// Per-slide text of a .pptx in slide-number order. The outer error means
/// the container itself is unreadable; a bad slide only fails its own entry.
pub fn extract_pptx_slides(
    path: &Path,
) -> Result<Vec<(usize, Result<String, ExtractError>)>, ExtractError> {
    let mut archive = open_zip(path)?;
    let slides = numbered_entries(&archive, PPTX_SLIDE_PREFIX);
    Ok(slides
        .into_iter()
        .map(|(number, name)| {
            let text = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)
                .and_then(|xml| paragraph_text(&xml));
            (number, text)
        })
        .collect())
}

/// Raw cell grid of one worksheet. The first row is the header.
pub struct SheetRows {
    pub name: String,
    pub rows: Vec<Vec<String>>,
}

/// Every worksheet of a .xlsx, in sheet-number order.
pub fn extract_xlsx_sheets(
    path: &Path,
) -> Result<Vec<Result<SheetRows, ExtractError>>, ExtractError> {
    let mut archive = open_zip(path)?;
    let shared_strings = read_shared_strings(&mut archive)?;
    let sheets = numbered_entries(&archive, XLSX_SHEET_PREFIX);

    Ok(sheets
        .into_iter()
        .take(XLSX_MAX_SHEETS)
        .map(|(number, entry)| {
            let xml = read_zip_entry_bounded(&mut archive, &entry, MAX_XML_ENTRY_BYTES)?;
            Ok(SheetRows {
                name: format!("sheet{}", number),
                rows: parse_sheet_rows(&xml, &shared_strings)?,
            })
        })
        .collect())
}

/// One string per `<si>`, rich-text runs concatenated, phonetic hints dropped.
fn read_shared_strings<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
) -> Result<Vec<String>, ExtractError> {
    if !archive.file_names().any(|n| n == XLSX_SHARED_STRINGS) {
        return Ok(Vec::new());
    }
    let xml = read_zip_entry_bounded(archive, XLSX_SHARED_STRINGS, MAX_XML_ENTRY_BYTES)?;
    let mut reader = Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut in_phonetic = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current.clear(),
                b"rPh" => in_phonetic = true,
                b"t" => in_text = !in_phonetic,
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te.unescape().map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                current.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => strings.push(std::mem::take(&mut current)),
                b"rPh" => in_phonetic = false,
                b"t" => in_text = false,
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

enum CellKind {
    Shared,
    Boolean,
    Literal,
}

struct PendingCell {
    column: usize,
    kind: CellKind,
    value: String,
}

impl PendingCell {
    fn from_start(e: &BytesStart<'_>, next_column: usize) -> Self {
        let mut column = next_column;
        let mut kind = CellKind::Literal;
        for attr in e.attributes().flatten() {
            match attr.key.as_ref() {
                b"r" => {
                    if let Some(c) = column_index(&attr.value) {
                        column = c;
                    }
                }
                b"t" => {
                    kind = match attr.value.as_ref() {
                        b"s" => CellKind::Shared,
                        b"b" => CellKind::Boolean,
                        _ => CellKind::Literal,
                    }
                }
                _ => {}
            }
        }
        Self {
            column,
            kind,
            value: String::new(),
        }
    }

    fn resolve(self, shared_strings: &[String]) -> String {
        let raw = self.value.trim();
        match self.kind {
            CellKind::Shared => raw
                .parse::<usize>()
                .ok()
                .and_then(|i| shared_strings.get(i))
                .cloned()
                .unwrap_or_default(),
            CellKind::Boolean => match raw {
                "1" => "TRUE".to_string(),
                "0" => "FALSE".to_string(),
                other => other.to_string(),
            },
            CellKind::Literal => raw.to_string(),
        }
    }
}

/// Zero-based column of an A1-style reference ("C7" is 2).
fn column_index(cell_ref: &[u8]) -> Option<usize> {
    let letters: Vec<u8> = cell_ref
        .iter()
        .take_while(|b| b.is_ascii_alphabetic())
        .map(|b| b.to_ascii_uppercase())
        .collect();
    if letters.is_empty() || letters.len() > 3 {
        return None;
    }
    let index = letters
        .iter()
        .fold(0usize, |acc, b| acc * 26 + (b - b'A' + 1) as usize);
    (index <= XLSX_MAX_COLUMNS).then(|| index - 1)
}

fn parse_sheet_rows(xml: &[u8], shared_strings: &[String]) -> Result<Vec<Vec<String>>, ExtractError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut cell: Option<PendingCell> = None;
    let mut in_value = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => row.clear(),
                b"c" => cell = Some(PendingCell::from_start(&e, row.len())),
                // <v> for stored values, <is><t> for inline strings.
                b"v" | b"t" => in_value = cell.is_some(),
                _ => {}
            },
            Ok(Event::Text(te)) if in_value => {
                let text = te.unescape().map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                if let Some(c) = cell.as_mut() {
                    c.value.push_str(&text);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    if let Some(c) = cell.take() {
                        let column = c.column;
                        let value = c.resolve(shared_strings);
                        if row.len() <= column {
                            row.resize(column + 1, String::new());
                        }
                        row[column] = value;
                    }
                }
                b"row" => {
                    while row.last().is_some_and(|v| v.is_empty()) {
                        row.pop();
                    }
                    rows.push(std::mem::take(&mut row));
                    if rows.len() >= XLSX_MAX_ROWS_PER_SHEET {
                        break;
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Tabular rendering
// ---------------------------------------------------------------------------

/// Normalized header names: trimmed, blanks become `column_<n>`.
pub fn header_names(raw: &[String]) -> Vec<String> {
    raw.iter()
        .enumerate()
        .map(|(i, h)| {
            let h = h.trim();
            if h.is_empty() {
                format!("column_{}", i + 1)
            } else {
                h.to_string()
            }
        })
        .collect()
}

/// `"col: value, col: value"`, skipping empty cells. Cells past the header
/// are named `column_<n>`.
pub fn render_row(headers: &[String], cells: &[String]) -> String {
    cells
        .iter()
        .enumerate()
        .filter_map(|(i, value)| {
            let value = value.trim();
            if value.is_empty() {
                return None;
            }
            let name = headers
                .get(i)
                .cloned()
                .unwrap_or_else(|| format!("column_{}", i + 1));
            Some(format!("{}: {}", name, value))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Render a sheet's data rows (1-based, header excluded).
pub fn render_sheet(rows: &[Vec<String>]) -> Vec<(usize, String)> {
    let Some((header, data)) = rows.split_first() else {
        return Vec::new();
    };
    let headers = header_names(header);
    data.iter()
        .enumerate()
        .map(|(i, cells)| (i + 1, render_row(&headers, cells)))
        .collect()
}

/// Lazily rendered CSV data rows. The first record is the header.
///
/// Yields `(row_number, text)` with 1-based data row numbers. A malformed
/// row yields an error and iteration continues; an I/O error ends it.
pub struct CsvRows {
    reader: csv::Reader<File>,
    headers: Vec<String>,
    record: csv::StringRecord,
    row: usize,
    done: bool,
}

impl CsvRows {
    pub fn open(path: &Path) -> Result<Self, ExtractError> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .has_headers(true)
            .from_path(path)
            .map_err(|e| ExtractError::Tabular(e.to_string()))?;
        let raw: Vec<String> = reader
            .headers()
            .map_err(|e| ExtractError::Tabular(e.to_string()))?
            .iter()
            .map(str::to_string)
            .collect();
        Ok(Self {
            reader,
            headers: header_names(&raw),
            record: csv::StringRecord::new(),
            row: 0,
            done: false,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }
}

impl Iterator for CsvRows {
    type Item = (usize, Result<String, ExtractError>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        self.row += 1;
        match self.reader.read_record(&mut self.record) {
            Ok(false) => {
                self.done = true;
                None
            }
            Ok(true) => {
                let cells: Vec<String> = self.record.iter().map(str::to_string).collect();
                Some((self.row, Ok(render_row(&self.headers, &cells))))
            }
            Err(e) => {
                self.done = e.is_io_error();
                Some((self.row, Err(ExtractError::Tabular(e.to_string()))))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Plain text and images
// ---------------------------------------------------------------------------

/// Whole file as text; invalid UTF-8 is replaced, not rejected.
pub fn read_plain_text(path: &Path) -> Result<String, ExtractError> {
    let bytes = std::fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

pub fn open_image(path: &Path) -> Result<DynamicImage, ExtractError> {
    image::open(path).map_err(|e| ExtractError::Image(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::OcrEngine;
    use std::io::{Cursor, Write};
    use tempfile::TempDir;

    fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
            for (name, body) in entries {
                zip.start_file(*name, zip::write::SimpleFileOptions::default())
                    .unwrap();
                zip.write_all(body.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        std::fs::write(path, buf).unwrap();
    }

    fn slide(text: &str) -> String {
        format!(
            "<p:sld xmlns:a=\"a\" xmlns:p=\"p\"><p:cSld><p:spTree><p:sp><p:txBody>\
             <a:p><a:r><a:t>{}</a:t></a:r></a:p></p:txBody></p:sp></p:spTree></p:cSld></p:sld>",
            text
        )
    }

    #[test]
    fn docx_paragraphs_become_lines() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("plan.docx");
        write_zip(
            &path,
            &[(
                DOCX_BODY,
                "<w:document xmlns:w=\"w\"><w:body>\
                 <w:p><w:r><w:t xml:space=\"preserve\">The brake </w:t></w:r><w:r><w:t>shall engage</w:t></w:r></w:p>\
                 <w:p><w:r><w:t>per REQ-12</w:t><w:tab/><w:t>&amp; REQ-13</w:t></w:r></w:p>\
                 </w:body></w:document>",
            )],
        );
        let text = extract_docx(&path).unwrap();
        assert_eq!(text, "The brake shall engage\nper REQ-12 & REQ-13");
    }

    #[test]
    fn docx_without_body_is_ooxml_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("empty.docx");
        write_zip(&path, &[("docProps/app.xml", "<x/>")]);
        assert!(matches!(extract_docx(&path), Err(ExtractError::Ooxml(_))));
    }

    #[test]
    fn not_a_zip_is_ooxml_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("fake.pptx");
        std::fs::write(&path, "not a zip").unwrap();
        assert!(matches!(extract_pptx_slides(&path), Err(ExtractError::Ooxml(_))));
    }

    #[test]
    fn pptx_slides_in_numeric_order_with_bad_slide_isolated() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("deck.pptx");
        let s1 = slide("Intro REQ-1");
        let s2 = slide("Second");
        let s10 = slide("Tenth");
        write_zip(
            &path,
            &[
                ("ppt/slides/slide10.xml", s10.as_str()),
                ("ppt/slides/slide2.xml", s2.as_str()),
                ("ppt/slides/slide1.xml", s1.as_str()),
                ("ppt/slides/slide3.xml", "<p:sld><a:t>unclosed</p:sld>"),
                ("ppt/slides/_rels/slide1.xml.rels", "<Relationships/>"),
            ],
        );

        let slides = extract_pptx_slides(&path).unwrap();
        let numbers: Vec<usize> = slides.iter().map(|(n, _)| *n).collect();
        assert_eq!(numbers, vec![1, 2, 3, 10]);
        assert_eq!(slides[0].1.as_ref().unwrap(), "Intro REQ-1");
        assert_eq!(slides[1].1.as_ref().unwrap(), "Second");
        assert!(slides[2].1.is_err());
        assert_eq!(slides[3].1.as_ref().unwrap(), "Tenth");
    }

    #[test]
    fn xlsx_rows_resolve_shared_inline_and_numeric_cells() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("trace.xlsx");
        write_zip(
            &path,
            &[
                (
                    XLSX_SHARED_STRINGS,
                    "<sst><si><t>Req</t></si><si><t>Notes</t></si>\
                     <si><r><t>Brake </t></r><r><t>test</t></r><rPh><t>x</t></rPh></si></sst>",
                ),
                (
                    "xl/worksheets/sheet1.xml",
                    "<worksheet><sheetData>\
                     <row r=\"1\"><c r=\"A1\" t=\"s\"><v>0</v></c><c r=\"B1\" t=\"s\"><v>1</v></c><c r=\"C1\"><v>7</v></c></row>\
                     <row r=\"2\"><c r=\"A2\" t=\"inlineStr\"><is><t>REQ-1</t></is></c><c r=\"C2\"><v>42</v></c></row>\
                     <row r=\"3\"><c r=\"B3\" t=\"s\"><v>2</v></c><c r=\"D3\" t=\"b\"><v>1</v></c></row>\
                     </sheetData></worksheet>",
                ),
            ],
        );

        let sheets = extract_xlsx_sheets(&path).unwrap();
        assert_eq!(sheets.len(), 1);
        let sheet = sheets[0].as_ref().unwrap();
        assert_eq!(sheet.name, "sheet1");
        assert_eq!(sheet.rows[0], vec!["Req", "Notes", "7"]);
        assert_eq!(sheet.rows[1], vec!["REQ-1", "", "42"]);
        assert_eq!(sheet.rows[2], vec!["", "Brake test", "", "TRUE"]);

        let rendered = render_sheet(&sheet.rows);
        assert_eq!(
            rendered,
            vec![
                (1, "Req: REQ-1, 7: 42".to_string()),
                (2, "Notes: Brake test, column_4: TRUE".to_string()),
            ]
        );
    }

    #[test]
    fn xlsx_without_shared_strings_is_fine() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nums.xlsx");
        write_zip(
            &path,
            &[(
                "xl/worksheets/sheet1.xml",
                "<worksheet><sheetData><row><c><v>1</v></c><c><v>2</v></c></row></sheetData></worksheet>",
            )],
        );
        let sheets = extract_xlsx_sheets(&path).unwrap();
        assert_eq!(sheets[0].as_ref().unwrap().rows, vec![vec!["1", "2"]]);
    }

    #[test]
    fn column_letters_map_to_indices() {
        assert_eq!(column_index(b"A1"), Some(0));
        assert_eq!(column_index(b"c7"), Some(2));
        assert_eq!(column_index(b"AA10"), Some(26));
        assert_eq!(column_index(b"XFD1"), Some(16_383));
        assert_eq!(column_index(b"XFE1"), None);
        assert_eq!(column_index(b"12"), None);
    }

    #[test]
    fn render_row_skips_empty_cells() {
        let headers = header_names(&["id".to_string(), " ".to_string(), "status".to_string()]);
        assert_eq!(headers, vec!["id", "column_2", "status"]);
        let cells: Vec<String> = ["REQ-4", "", "open", "extra"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            render_row(&headers, &cells),
            "id: REQ-4, status: open, column_4: extra"
        );
        assert_eq!(render_row(&headers, &[String::new()]), "");
    }

    #[test]
    fn csv_rows_are_lazy_and_flexible() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("links.csv");
        std::fs::write(
            &path,
            "req,owner,note\nREQ-1,ana,ok\nREQ-2,,\nREQ-3,bo,late,overflow\n",
        )
        .unwrap();

        let mut rows = CsvRows::open(&path).unwrap();
        assert_eq!(rows.headers(), ["req", "owner", "note"]);
        let (n, text) = rows.next().unwrap();
        assert_eq!((n, text.unwrap().as_str()), (1, "req: REQ-1, owner: ana, note: ok"));
        let (_, text) = rows.next().unwrap();
        assert_eq!(text.unwrap(), "req: REQ-2");
        let (n, text) = rows.next().unwrap();
        assert_eq!(n, 3);
        assert_eq!(text.unwrap(), "req: REQ-3, owner: bo, note: late, column_4: overflow");
        assert!(rows.next().is_none());
        assert!(rows.next().is_none());
    }

    #[test]
    fn plain_text_tolerates_invalid_utf8() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("notes.txt");
        std::fs::write(&path, b"REQ-1 ok \xff\xfe done").unwrap();
        let text = read_plain_text(&path).unwrap();
        assert!(text.starts_with("REQ-1 ok "));
        assert!(text.ends_with(" done"));
    }

    #[test]
    fn invalid_pdf_is_pdf_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad.pdf");
        std::fs::write(&path, "not a pdf").unwrap();
        assert!(matches!(LopdfOpener.open(&path), Err(ExtractError::Pdf(_))));
    }

    #[test]
    fn lopdf_reads_pages_and_text_blocks() {
        use lopdf::content::Operation;
        use lopdf::{dictionary, Object, Stream};

        let mut doc = lopdf::Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![100.into(), 700.into()]),
                Operation::new("Tj", vec![Object::string_literal("brake test phrase")]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("one.pdf");
        doc.save(&path).unwrap();

        let opened = LopdfOpener.open(&path).unwrap();
        assert_eq!(opened.page_count(), 1);
        assert!(opened.page_text(1).unwrap().contains("brake test phrase"));
        assert_eq!(opened.text_block_count(1), Some(1));
        assert!(opened.page_text(2).is_err());
    }

    #[test]
    fn ocr_candidate_by_length_or_blocks() {
        let cfg = OcrConfig::default();
        assert!(needs_ocr("short", None, &cfg));
        assert!(needs_ocr(&"x".repeat(49), Some(3), &cfg));
        assert!(!needs_ocr(&"x".repeat(50), None, &cfg));
        assert!(needs_ocr(&"x".repeat(80), Some(0), &cfg));
        assert!(!needs_ocr(&"x".repeat(80), Some(1), &cfg));
    }

    #[test]
    fn longer_text_wins() {
        let (text, kind) = choose_page_text("abc".into(), "abcdef".into());
        assert_eq!((text.as_str(), kind), ("abcdef", SourceType::Scanned));
        let (text, kind) = choose_page_text("abcdef".into(), "abc".into());
        assert_eq!((text.as_str(), kind), ("abcdef", SourceType::Digital));
        let (_, kind) = choose_page_text("same".into(), "same".into());
        assert_eq!(kind, SourceType::Digital);
    }

    // --- hybrid decision with fake capabilities ---

    struct FakePdf {
        pages: Vec<String>,
    }

    impl FakePdf {
        fn new(pages: &[&str]) -> Self {
            Self {
                pages: pages.iter().map(|p| p.to_string()).collect(),
            }
        }
    }

    impl PagedDocument for FakePdf {
        fn page_count(&self) -> usize {
            self.pages.len()
        }
        fn page_text(&self, page: usize) -> Result<String, ExtractError> {
            Ok(self.pages[page - 1].clone())
        }
    }

    struct TinyPngRenderer;

    impl RasterRenderer for TinyPngRenderer {
        fn render_page(&self, _: &Path, _: usize, _: f32) -> Result<Vec<u8>, ExtractError> {
            let mut out = Cursor::new(Vec::new());
            DynamicImage::new_luma8(4, 4)
                .write_to(&mut out, image::ImageFormat::Png)
                .unwrap();
            Ok(out.into_inner())
        }
    }

    struct FailingRenderer;

    impl RasterRenderer for FailingRenderer {
        fn render_page(&self, _: &Path, _: usize, _: f32) -> Result<Vec<u8>, ExtractError> {
            Err(ExtractError::Render("no pdftoppm".into()))
        }
    }

    struct UnreachableRenderer;

    impl RasterRenderer for UnreachableRenderer {
        fn render_page(&self, _: &Path, _: usize, _: f32) -> Result<Vec<u8>, ExtractError> {
            panic!("renderer must not be called");
        }
    }

    struct FixedOcr(&'static str);

    impl OcrEngine for FixedOcr {
        fn recognize(&self, _: &Path) -> Result<Vec<String>, ExtractError> {
            Ok(vec![self.0.to_string()])
        }
    }

    #[test]
    fn mixed_document_labels_each_page() {
        let dense = "D".repeat(800);
        let doc = FakePdf::new(&[dense.as_str(), "tiny text!"]);
        let ocr = OcrService::new(Box::new(FixedOcr("recovered by ocr, much longer text")), 64);
        let cfg = OcrConfig::default();
        let fallback = OcrFallback {
            renderer: &TinyPngRenderer,
            ocr: &ocr,
            config: &cfg,
        };
        let path = Path::new("/docs/mixed.pdf");

        let (p1, k1) = extract_pdf_page(&doc, path, 1, &fallback).unwrap();
        assert_eq!(k1, SourceType::Digital);
        assert_eq!(p1.len(), 800);

        let (p2, k2) = extract_pdf_page(&doc, path, 2, &fallback).unwrap();
        assert_eq!(k2, SourceType::Scanned);
        assert_eq!(p2, "recovered by ocr, much longer text");
    }

    #[test]
    fn render_failure_keeps_embedded_text() {
        let doc = FakePdf::new(&["tiny"]);
        let ocr = OcrService::new(Box::new(FixedOcr("never used")), 64);
        let cfg = OcrConfig::default();
        let fallback = OcrFallback {
            renderer: &FailingRenderer,
            ocr: &ocr,
            config: &cfg,
        };
        let (text, kind) = extract_pdf_page(&doc, Path::new("x.pdf"), 1, &fallback).unwrap();
        assert_eq!((text.as_str(), kind), ("tiny", SourceType::Digital));
    }

    #[test]
    fn unavailable_ocr_skips_rendering() {
        let doc = FakePdf::new(&["tiny"]);
        let ocr = OcrService::unavailable("absent");
        let cfg = OcrConfig::default();
        let fallback = OcrFallback {
            renderer: &UnreachableRenderer,
            ocr: &ocr,
            config: &cfg,
        };
        let (text, kind) = extract_pdf_page(&doc, Path::new("x.pdf"), 1, &fallback).unwrap();
        assert_eq!((text.as_str(), kind), ("tiny", SourceType::Digital));
    }
}
