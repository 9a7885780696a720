//! TOML configuration.
//!
//! Every section except `[db]` is optional and falls back to the defaults
//! below. [`load_config`] parses and validates; [`Config::minimal`] builds an
//! all-defaults configuration for tests and one-off runs.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub links: LinksConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_documents_dir")]
    pub documents_dir: PathBuf,
    /// Larger files are skipped. PDFs over 500 MiB get smaller page batches,
    /// so those batch sizes only apply once this limit is raised.
    #[serde(default = "default_max_file_size")]
    pub max_file_size_bytes: u64,
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            documents_dir: default_documents_dir(),
            max_file_size_bytes: default_max_file_size(),
            allowed_extensions: default_allowed_extensions(),
        }
    }
}

fn default_documents_dir() -> PathBuf {
    PathBuf::from("./documents")
}
fn default_max_file_size() -> u64 {
    500 * 1024 * 1024
}
fn default_allowed_extensions() -> Vec<String> {
    [
        "pdf", "txt", "md", "csv", "xlsx", "png", "jpg", "jpeg", "docx", "pptx",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Overlapping-window chunker settings. Sizes are in characters.
#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    /// Split boundaries, coarsest first. An empty string means "any character".
    #[serde(default = "default_separators")]
    pub separators: Vec<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            separators: default_separators(),
        }
    }
}

fn default_chunk_size() -> usize {
    500
}
fn default_chunk_overlap() -> usize {
    50
}
fn default_separators() -> Vec<String> {
    ["\n\n", "\n", ". ", " ", ""]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct OcrConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Pages whose embedded text is shorter than this are OCR candidates.
    #[serde(default = "default_min_text_chars")]
    pub min_text_chars: usize,
    /// Pages with fewer text blocks than this are OCR candidates. 0 disables the signal.
    #[serde(default = "default_sparse_block_threshold")]
    pub sparse_block_threshold: usize,
    #[serde(default = "default_render_scale")]
    pub render_scale: f32,
    #[serde(default = "default_max_image_dimension")]
    pub max_image_dimension: u32,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_tesseract_cmd")]
    pub tesseract_cmd: String,
    #[serde(default = "default_pdftoppm_cmd")]
    pub pdftoppm_cmd: String,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_text_chars: default_min_text_chars(),
            sparse_block_threshold: default_sparse_block_threshold(),
            render_scale: default_render_scale(),
            max_image_dimension: default_max_image_dimension(),
            language: default_language(),
            tesseract_cmd: default_tesseract_cmd(),
            pdftoppm_cmd: default_pdftoppm_cmd(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_min_text_chars() -> usize {
    50
}
fn default_sparse_block_threshold() -> usize {
    1
}
fn default_render_scale() -> f32 {
    2.0
}
fn default_max_image_dimension() -> u32 {
    2048
}
fn default_language() -> String {
    "eng".to_string()
}
fn default_tesseract_cmd() -> String {
    "tesseract".to_string()
}
fn default_pdftoppm_cmd() -> String {
    "pdftoppm".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct MemoryConfig {
    #[serde(default = "default_high_water")]
    pub high_water_percent: f64,
    #[serde(default = "default_critical")]
    pub critical_percent: f64,
    #[serde(default = "default_pause_ms")]
    pub pause_ms: u64,
    #[serde(default = "default_sample_every")]
    pub sample_every_pages: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            high_water_percent: default_high_water(),
            critical_percent: default_critical(),
            pause_ms: default_pause_ms(),
            sample_every_pages: default_sample_every(),
        }
    }
}

fn default_high_water() -> f64 {
    90.0
}
fn default_critical() -> f64 {
    95.0
}
fn default_pause_ms() -> u64 {
    500
}
fn default_sample_every() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct LinksConfig {
    #[serde(default = "default_prefixes")]
    pub prefixes: Vec<String>,
    #[serde(default = "default_context_radius")]
    pub context_radius: usize,
    #[serde(default = "default_min_context_words")]
    pub min_context_words: usize,
}

impl Default for LinksConfig {
    fn default() -> Self {
        Self {
            prefixes: default_prefixes(),
            context_radius: default_context_radius(),
            min_context_words: default_min_context_words(),
        }
    }
}

fn default_prefixes() -> Vec<String> {
    ["REQ", "TEST", "SPEC", "BUG"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_context_radius() -> usize {
    50
}
fn default_min_context_words() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuditConfig {
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Count only links whose context passed the word-count check as coverage.
    #[serde(default)]
    pub require_valid_context: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            require_valid_context: false,
        }
    }
}

fn default_page_size() -> usize {
    50
}

impl Config {
    /// All-defaults configuration with the database at `./data/trh.sqlite`.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/trh.sqlite"),
            },
            ingest: IngestConfig::default(),
            chunking: ChunkingConfig::default(),
            ocr: OcrConfig::default(),
            memory: MemoryConfig::default(),
            links: LinksConfig::default(),
            audit: AuditConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            bail!("chunking.chunk_size must be > 0");
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            bail!("chunking.chunk_overlap must be smaller than chunking.chunk_size");
        }
        if self.chunking.separators.is_empty() {
            bail!("chunking.separators must not be empty");
        }

        let mem = &self.memory;
        if !(mem.high_water_percent > 0.0
            && mem.high_water_percent <= mem.critical_percent
            && mem.critical_percent <= 100.0)
        {
            bail!("memory thresholds must satisfy 0 < high_water_percent <= critical_percent <= 100");
        }
        if mem.sample_every_pages == 0 {
            bail!("memory.sample_every_pages must be >= 1");
        }

        if self.ocr.render_scale <= 0.0 {
            bail!("ocr.render_scale must be > 0");
        }
        if self.ocr.max_image_dimension == 0 {
            bail!("ocr.max_image_dimension must be > 0");
        }

        if self.links.prefixes.is_empty() {
            bail!("links.prefixes must not be empty");
        }
        if let Some(bad) = self
            .links
            .prefixes
            .iter()
            .find(|p| p.is_empty() || !p.chars().all(|c| c.is_ascii_alphanumeric()))
        {
            bail!("links.prefixes entry '{}' must be non-empty ASCII alphanumeric", bad);
        }

        if self.audit.page_size == 0 {
            bail!("audit.page_size must be >= 1");
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}
