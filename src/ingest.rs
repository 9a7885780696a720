//! Directory ingestion driver.
//!
//! Coordinates one pass over a documents directory: discover → register
//! (dedup/version) → extract units → record links → chunk → emit. The pass
//! is pull-based: [`Scan::next_chunk`] does only as much work as needed to
//! produce the next chunk, so at most one unit's chunks are buffered and a
//! large PDF is never held as text all at once. [`Scan::into_stream`] wraps
//! the same loop as a `futures::Stream` and hands the report back through a
//! oneshot channel.
//!
//! Nothing here aborts the pass. Per-file and per-unit failures are counted
//! in the [`ScanReport`] and the scan moves on.

use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::chunk::Chunker;
use crate::config::{Config, IngestConfig, OcrConfig};
use crate::error::{ExtractError, IngestError};
use crate::extract::{
    self, CsvRows, LopdfOpener, OcrFallback, PagedDocument, PdfOpener,
};
use crate::formats::SupportedFormat;
use crate::governor::{self, GovernorDecision, MemoryGovernor, MemoryProbe, SystemMemoryProbe};
use crate::link_extract::LinkExtractor;
use crate::links::LinkIndex;
use crate::models::{ActionType, AuditStatus, Chunk, TextUnit, UnitMetadata};
use crate::ocr::{ImageSource, OcrService, PdftoppmRenderer, RasterRenderer};
use crate::progress::{IngestProgressEvent, IngestProgressReporter, NoProgress};
use crate::registry::Registry;

/// Error messages kept verbatim in a report; the count stays exact.
const MAX_KEPT_ERRORS: usize = 100;

/// External capabilities the driver consumes. Swappable for tests.
pub struct Capabilities {
    pub pdf: Box<dyn PdfOpener>,
    pub renderer: Box<dyn RasterRenderer>,
    pub ocr: OcrService,
    pub memory: Box<dyn MemoryProbe>,
}

impl Capabilities {
    /// lopdf, pdftoppm, tesseract and system memory, as configured.
    pub fn from_config(config: &Config) -> Self {
        Self {
            pdf: Box::new(LopdfOpener),
            renderer: Box::new(PdftoppmRenderer::new(&config.ocr.pdftoppm_cmd)),
            ocr: OcrService::from_config(&config.ocr),
            memory: Box::new(SystemMemoryProbe::new()),
        }
    }
}

/// Aggregate outcome of one scan.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct ScanReport {
    pub files_seen: usize,
    pub files_new: usize,
    pub files_unchanged: usize,
    pub files_unsupported: usize,
    pub files_skipped: usize,
    pub units_emitted: usize,
    pub units_skipped: usize,
    pub chunks_emitted: usize,
    pub links_recorded: usize,
    pub batches_truncated: usize,
    pub error_count: usize,
    pub errors: Vec<String>,
}

impl ScanReport {
    pub fn record_error(&mut self, err: &IngestError) {
        self.error_count += 1;
        if self.errors.len() < MAX_KEPT_ERRORS {
            self.errors.push(err.to_string());
        }
    }
}

/// A configured pipeline. [`Ingestor::scan`] starts a single pass.
pub struct Ingestor {
    ingest: IngestConfig,
    ocr_config: OcrConfig,
    registry: Registry,
    links: LinkIndex,
    chunker: Chunker,
    extractor: LinkExtractor,
    governor: MemoryGovernor,
    pdf: Box<dyn PdfOpener>,
    renderer: Box<dyn RasterRenderer>,
    ocr: OcrService,
    progress: Box<dyn IngestProgressReporter>,
}

impl Ingestor {
    pub fn new(config: &Config, pool: SqlitePool, capabilities: Capabilities) -> Result<Self, regex::Error> {
        Ok(Self {
            ingest: config.ingest.clone(),
            ocr_config: config.ocr.clone(),
            registry: Registry::new(pool.clone()),
            links: LinkIndex::new(pool),
            chunker: Chunker::new(&config.chunking),
            extractor: LinkExtractor::new(&config.links)?,
            governor: MemoryGovernor::new(&config.memory, capabilities.memory),
            pdf: capabilities.pdf,
            renderer: capabilities.renderer,
            ocr: capabilities.ocr,
            progress: Box::new(NoProgress),
        })
    }

    pub fn with_progress(mut self, progress: Box<dyn IngestProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// List `dir` (flat, sorted by name) and return the pass over it. A
    /// missing directory is created and yields an empty pass.
    pub async fn scan(self, dir: &Path) -> Scan {
        let mut scan = Scan {
            pipeline: self,
            dir: dir.to_path_buf(),
            files: VecDeque::new(),
            total_files: 0,
            current: None,
            pending: VecDeque::new(),
            report: ScanReport::default(),
            ocr_noted: false,
            finished: false,
        };
        scan.discover().await;
        scan
    }
}

enum UnitSource {
    Eager(VecDeque<Result<TextUnit, IngestError>>),
    Csv(CsvRows),
    Paged(PagedCursor),
}

struct PagedCursor {
    doc: Box<dyn PagedDocument>,
    next_page: usize,
    total: usize,
    batch_size: usize,
    started: Instant,
}

struct FileCursor {
    path: PathBuf,
    name: String,
    base: UnitMetadata,
    units: UnitSource,
}

impl FileCursor {
    fn unit(&self, text: String) -> TextUnit {
        TextUnit {
            text,
            metadata: self.base.clone(),
        }
    }
}

/// One finite, single-pass scan of a directory.
pub struct Scan {
    pipeline: Ingestor,
    dir: PathBuf,
    files: VecDeque<PathBuf>,
    total_files: usize,
    current: Option<FileCursor>,
    pending: VecDeque<Chunk>,
    report: ScanReport,
    ocr_noted: bool,
    finished: bool,
}

impl Scan {
    pub fn report(&self) -> &ScanReport {
        &self.report
    }

    /// Next chunk, or `None` once every file is exhausted.
    pub async fn next_chunk(&mut self) -> Option<Chunk> {
        loop {
            if let Some(chunk) = self.pending.pop_front() {
                self.report.chunks_emitted += 1;
                return Some(chunk);
            }

            if self.current.is_some() {
                match self.next_unit().await {
                    Some(Ok(unit)) => self.process_unit(unit).await,
                    Some(Err(e)) => {
                        warn!(error = %e, "unit skipped");
                        self.report.units_skipped += 1;
                        self.report.record_error(&e);
                    }
                    None => self.current = None,
                }
                continue;
            }

            match self.files.pop_front() {
                Some(path) => self.open_file(path).await,
                None => {
                    self.finish().await;
                    return None;
                }
            }
        }
    }

    /// Drain the pass as a stream. The receiver resolves with the final
    /// report once the stream has ended; dropping the stream early drops
    /// the sender.
    pub fn into_stream(self) -> (impl futures::Stream<Item = Chunk> + Send, oneshot::Receiver<ScanReport>) {
        let (report_tx, report_rx) = oneshot::channel();
        let stream = futures::stream::unfold((self, Some(report_tx)), |(mut scan, mut report_tx)| async move {
            match scan.next_chunk().await {
                Some(chunk) => Some((chunk, (scan, report_tx))),
                None => {
                    if let Some(tx) = report_tx.take() {
                        let _ = tx.send(std::mem::take(&mut scan.report));
                    }
                    None
                }
            }
        });
        (stream, report_rx)
    }

    async fn discover(&mut self) {
        let dir_label = self.dir.display().to_string();
        self.pipeline.progress.report(IngestProgressEvent::Discovering {
            dir: dir_label.clone(),
        });
        self.pipeline
            .registry
            .log_action(ActionType::Refresh, &dir_label, AuditStatus::Success, "scan started")
            .await;

        if !self.dir.exists() {
            match std::fs::create_dir_all(&self.dir) {
                Ok(()) => info!(dir = %dir_label, "created documents directory; add files to it"),
                Err(source) => self.report.record_error(&IngestError::Io {
                    path: self.dir.clone(),
                    source,
                }),
            }
            return;
        }

        for entry in WalkDir::new(&self.dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            match entry {
                Ok(e) if e.file_type().is_file() => self.files.push_back(e.into_path()),
                Ok(_) => {}
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| self.dir.clone());
                    self.report.record_error(&IngestError::Io {
                        path,
                        source: e.into(),
                    });
                }
            }
        }
        self.total_files = self.files.len();
        debug!(dir = %dir_label, files = self.total_files, "discovered files");
    }

    async fn open_file(&mut self, path: PathBuf) {
        self.report.files_seen += 1;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.pipeline.progress.report(IngestProgressEvent::File {
            n: self.report.files_seen as u64,
            total: self.total_files as u64,
            name: name.clone(),
        });

        let Some(format) = self.supported_format(&path) else {
            debug!(file = %name, "unsupported extension, skipped");
            self.report.files_unsupported += 1;
            return;
        };

        let size = match std::fs::metadata(&path) {
            Ok(m) => m.len(),
            Err(source) => {
                self.skip_file(&name, IngestError::Io { path, source }).await;
                return;
            }
        };
        if size > self.pipeline.ingest.max_file_size_bytes {
            let reason = format!(
                "{} bytes exceeds the {} byte limit",
                size, self.pipeline.ingest.max_file_size_bytes
            );
            self.skip_file(&name, IngestError::Rejected { path, reason }).await;
            return;
        }

        let hash = match self.pipeline.registry.register(&path, &name).await {
            Ok((hash, is_new)) => {
                if is_new {
                    self.report.files_new += 1;
                    self.pipeline
                        .registry
                        .log_action(ActionType::Upload, &name, AuditStatus::Success, &hash)
                        .await;
                } else {
                    self.report.files_unchanged += 1;
                }
                hash
            }
            Err(e) => {
                self.skip_file(&name, e).await;
                return;
            }
        };

        let base = UnitMetadata::new(path.display().to_string(), format.source_type())
            .with_file_hash(&hash);
        match self.open_units(&path, format, size, &base) {
            Ok(units) => {
                debug!(file = %name, ?format, "extracting");
                self.current = Some(FileCursor {
                    path,
                    name,
                    base,
                    units,
                });
            }
            Err(e) => {
                let err = IngestError::format(&path, 0, e);
                warn!(file = %name, error = %err, "file could not be opened for extraction");
                self.report.files_skipped += 1;
                self.report.record_error(&err);
            }
        }
    }

    fn supported_format(&self, path: &Path) -> Option<SupportedFormat> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        let allowed = self
            .pipeline
            .ingest
            .allowed_extensions
            .iter()
            .any(|a| a.eq_ignore_ascii_case(&ext));
        if !allowed {
            return None;
        }
        SupportedFormat::from_extension(&ext)
    }

    async fn skip_file(&mut self, name: &str, err: IngestError) {
        warn!(file = %name, error = %err, "file skipped");
        self.report.files_skipped += 1;
        self.report.record_error(&err);
        self.pipeline
            .registry
            .log_action(ActionType::Upload, name, AuditStatus::Failed, &err.to_string())
            .await;
    }

    /// Records the missing engine once, the first time a page or image
    /// needs it. OCR switched off in the configuration is not an error.
    fn note_ocr_unavailable(&mut self) {
        if self.ocr_noted || self.pipeline.ocr.is_disabled() {
            return;
        }
        if let Some(reason) = self.pipeline.ocr.unavailable_reason() {
            self.ocr_noted = true;
            let err = IngestError::OcrUnavailable(reason.to_string());
            warn!(error = %err, "scanned pages and images will yield no OCR text");
            self.report.record_error(&err);
        }
    }

    fn open_units(
        &mut self,
        path: &Path,
        format: SupportedFormat,
        size: u64,
        base: &UnitMetadata,
    ) -> Result<UnitSource, ExtractError> {
        let unit = |text: String, meta: UnitMetadata| TextUnit { text, metadata: meta };

        let units = match format {
            SupportedFormat::Pdf => {
                let doc = self.pipeline.pdf.open(path)?;
                let total = doc.page_count();
                return Ok(UnitSource::Paged(PagedCursor {
                    doc,
                    next_page: 1,
                    total,
                    batch_size: governor::batch_size_for(size),
                    started: Instant::now(),
                }));
            }
            SupportedFormat::Csv => return Ok(UnitSource::Csv(CsvRows::open(path)?)),
            SupportedFormat::SlideDeck => extract::extract_pptx_slides(path)?
                .into_iter()
                .map(|(number, text)| {
                    text.map(|t| unit(t, base.clone().with_page(number)))
                        .map_err(|e| IngestError::format(path, number, e))
                })
                .collect::<VecDeque<_>>(),
            SupportedFormat::Spreadsheet => {
                let mut units = VecDeque::new();
                for sheet in extract::extract_xlsx_sheets(path)? {
                    match sheet {
                        Ok(sheet) => {
                            for (row, text) in extract::render_sheet(&sheet.rows) {
                                let meta = base
                                    .clone()
                                    .with_field("sheet", sheet.name.as_str())
                                    .with_field("row", row);
                                units.push_back(Ok(unit(text, meta)));
                            }
                        }
                        Err(e) => units.push_back(Err(IngestError::format(path, 0, e))),
                    }
                }
                units
            }
            SupportedFormat::WordDocument => {
                VecDeque::from([Ok(unit(extract::extract_docx(path)?, base.clone()))])
            }
            SupportedFormat::PlainText => {
                VecDeque::from([Ok(unit(extract::read_plain_text(path)?, base.clone()))])
            }
            SupportedFormat::Image => {
                if !self.pipeline.ocr.is_available() {
                    self.note_ocr_unavailable();
                    VecDeque::from([Ok(unit(String::new(), base.clone()))])
                } else {
                    let text = extract::open_image(path)
                        .and_then(|img| self.pipeline.ocr.recognize(ImageSource::Decoded(img)));
                    VecDeque::from([text
                        .map(|t| unit(t, base.clone()))
                        .map_err(|e| IngestError::format(path, 1, e))])
                }
            }
        };
        Ok(UnitSource::Eager(units))
    }

    async fn next_unit(&mut self) -> Option<Result<TextUnit, IngestError>> {
        let cursor = self.current.as_mut()?;
        match &mut cursor.units {
            UnitSource::Eager(units) => units.pop_front(),
            UnitSource::Csv(rows) => {
                let (row, text) = rows.next()?;
                Some(
                    text.map(|t| TextUnit {
                        text: t,
                        metadata: cursor.base.clone().with_field("row", row),
                    })
                    .map_err(|e| IngestError::format(&cursor.path, row, e)),
                )
            }
            UnitSource::Paged(paged) => loop {
                if paged.next_page > paged.total {
                    return None;
                }
                let page = paged.next_page;
                let offset = (page - 1) % paged.batch_size;

                if self.pipeline.governor.should_sample(offset) {
                    if let GovernorDecision::SkipBatch { percent } = self.pipeline.governor.check().await {
                        let batch_end = (page - offset + paged.batch_size - 1).min(paged.total);
                        let skipped = batch_end + 1 - page;
                        let err = IngestError::MemoryPressure {
                            path: cursor.path.clone(),
                            percent,
                            skipped,
                        };
                        warn!(file = %cursor.name, page, error = %err, "batch truncated");
                        self.report.batches_truncated += 1;
                        self.report.units_skipped += skipped;
                        self.report.record_error(&err);
                        paged.next_page = batch_end + 1;
                        continue;
                    }
                }

                let fallback = OcrFallback {
                    renderer: self.pipeline.renderer.as_ref(),
                    ocr: &self.pipeline.ocr,
                    config: &self.pipeline.ocr_config,
                };
                let result = extract::extract_pdf_page(paged.doc.as_ref(), &cursor.path, page, &fallback);
                let missed_ocr = !self.pipeline.ocr.is_available()
                    && match &result {
                        Ok((text, _)) => extract::needs_ocr(
                            text,
                            paged.doc.text_block_count(page),
                            &self.pipeline.ocr_config,
                        ),
                        Err(_) => true,
                    };
                paged.next_page += 1;

                if page % paged.batch_size == 0 || page == paged.total {
                    let elapsed = paged.started.elapsed();
                    self.pipeline.progress.report(IngestProgressEvent::Pages {
                        name: cursor.name.clone(),
                        done: page as u64,
                        total: paged.total as u64,
                        eta: governor::eta(elapsed, page, paged.total),
                    });
                }

                let item = match result {
                    Ok((text, source_type)) => {
                        let mut unit = cursor.unit(text);
                        unit.metadata.source_type = source_type;
                        unit.metadata = unit.metadata.with_page(page);
                        Ok(unit)
                    }
                    Err(e) => Err(IngestError::format(&cursor.path, page, e)),
                };
                if missed_ocr {
                    self.note_ocr_unavailable();
                }
                return Some(item);
            },
        }
    }

    /// Links first, then chunks. Empty units produce nothing.
    async fn process_unit(&mut self, mut unit: TextUnit) {
        if unit.text.trim().is_empty() {
            self.report.units_skipped += 1;
            return;
        }

        let hash = unit.metadata.file_hash().unwrap_or_default().to_string();
        let mut valid_ids = Vec::new();
        for link in self.pipeline.extractor.extract(&unit.text) {
            match self.pipeline.links.record(&hash, &link).await {
                Ok(true) => self.report.links_recorded += 1,
                Ok(false) => {}
                Err(e) => {
                    let err = IngestError::Store(e);
                    warn!(req_id = %link.req_id, error = %err, "link not recorded");
                    self.report.record_error(&err);
                }
            }
            if link.valid_context {
                valid_ids.push(link.req_id);
            }
        }
        unit.metadata.set_found_links(&valid_ids);

        let chunks = self.pipeline.chunker.split_unit(&unit);
        self.report.units_emitted += 1;
        self.pending.extend(chunks);
    }

    async fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        let r = &self.report;
        info!(
            files = r.files_seen,
            new = r.files_new,
            units = r.units_emitted,
            chunks = r.chunks_emitted,
            links = r.links_recorded,
            errors = r.error_count,
            "scan finished"
        );
        let details = format!(
            "files={} new={} unchanged={} skipped={} chunks={} links={} errors={}",
            r.files_seen,
            r.files_new,
            r.files_unchanged,
            r.files_skipped,
            r.chunks_emitted,
            r.links_recorded,
            r.error_count
        );
        self.pipeline
            .registry
            .log_action(
                ActionType::Refresh,
                &self.dir.display().to_string(),
                AuditStatus::Success,
                &details,
            )
            .await;
    }
}
