//! OCR and page-rendering capabilities.
//!
//! [`OcrService`] is built once per process. If the engine cannot be
//! started it records why and every later call returns empty text instead
//! of failing; call sites check [`OcrService::is_available`] before doing
//! any expensive work (rendering, decoding) on its behalf.
//!
//! Raster input is normalized in exactly one place,
//! [`ImageSource::into_png`]: decode if needed, downscale to the configured
//! bounding box, re-encode as PNG. The PNG is written to a named temp file
//! for the engine and removed when the handle drops, on success and on
//! every error path.

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use std::io::{Cursor, Write};
use std::path::Path;
use std::process::Command;
use tracing::{debug, warn};

use crate::config::OcrConfig;
use crate::error::ExtractError;

/// Recognizes text in an image file.
pub trait OcrEngine: Send + Sync {
    /// Recognized lines, top to bottom.
    fn recognize(&self, image_path: &Path) -> Result<Vec<String>, ExtractError>;
}

/// Rasterizes one PDF page.
pub trait RasterRenderer: Send + Sync {
    /// Encoded image bytes for the 1-based `page`.
    fn render_page(&self, pdf_path: &Path, page: usize, scale: f32) -> Result<Vec<u8>, ExtractError>;
}

/// Image input for OCR: encoded bytes (e.g. a rendered page) or an
/// already-decoded image (e.g. a scanned photo opened from disk).
pub enum ImageSource {
    RawBytes(Vec<u8>),
    Decoded(DynamicImage),
}

impl ImageSource {
    /// The single conversion point to engine input.
    pub fn into_png(self, max_dimension: u32) -> Result<Vec<u8>, ExtractError> {
        let image = match self {
            ImageSource::RawBytes(bytes) => {
                image::load_from_memory(&bytes).map_err(|e| ExtractError::Image(e.to_string()))?
            }
            ImageSource::Decoded(image) => image,
        };
        let image = downscale(image, max_dimension);
        let mut out = Cursor::new(Vec::new());
        image
            .write_to(&mut out, ImageFormat::Png)
            .map_err(|e| ExtractError::Image(e.to_string()))?;
        Ok(out.into_inner())
    }
}

/// Shrink so neither side exceeds `max_dimension`, keeping aspect ratio.
pub fn downscale(image: DynamicImage, max_dimension: u32) -> DynamicImage {
    if image.width() <= max_dimension && image.height() <= max_dimension {
        image
    } else {
        image.resize(max_dimension, max_dimension, FilterType::Triangle)
    }
}

enum OcrState {
    Available(Box<dyn OcrEngine>),
    Unavailable(String),
    /// Turned off with `ocr.enabled = false`.
    Disabled,
}

pub struct OcrService {
    state: OcrState,
    max_dimension: u32,
}

impl OcrService {
    pub fn new(engine: Box<dyn OcrEngine>, max_dimension: u32) -> Self {
        Self {
            state: OcrState::Available(engine),
            max_dimension,
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            state: OcrState::Unavailable(reason.into()),
            max_dimension: OcrConfig::default().max_image_dimension,
        }
    }

    pub fn disabled() -> Self {
        Self {
            state: OcrState::Disabled,
            max_dimension: OcrConfig::default().max_image_dimension,
        }
    }

    /// Probe the configured tesseract binary. Never fails: a missing or
    /// broken engine yields an unavailable service.
    pub fn from_config(config: &OcrConfig) -> Self {
        if !config.enabled {
            return Self::disabled();
        }
        match TesseractEngine::probe(&config.tesseract_cmd, &config.language) {
            Ok(engine) => Self::new(Box::new(engine), config.max_image_dimension),
            Err(reason) => {
                warn!(%reason, "OCR engine unavailable; scanned content will be skipped");
                Self::unavailable(reason)
            }
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self.state, OcrState::Available(_))
    }

    /// True only when OCR was switched off in the configuration.
    pub fn is_disabled(&self) -> bool {
        matches!(self.state, OcrState::Disabled)
    }

    pub fn unavailable_reason(&self) -> Option<&str> {
        match &self.state {
            OcrState::Available(_) => None,
            OcrState::Unavailable(reason) => Some(reason),
            OcrState::Disabled => Some("disabled by configuration"),
        }
    }

    /// Recognize `source` and return its lines joined by newlines. Empty
    /// when the service is unavailable.
    pub fn recognize(&self, source: ImageSource) -> Result<String, ExtractError> {
        let engine = match &self.state {
            OcrState::Available(engine) => engine,
            OcrState::Unavailable(_) | OcrState::Disabled => return Ok(String::new()),
        };

        let png = source.into_png(self.max_dimension)?;
        let mut file = tempfile::Builder::new()
            .prefix("trh-ocr-")
            .suffix(".png")
            .tempfile()?;
        file.write_all(&png)?;
        file.flush()?;
        drop(png);

        let lines = engine.recognize(file.path())?;
        debug!(lines = lines.len(), "OCR finished");
        Ok(lines.join("\n"))
    }
}

/// `tesseract <image> stdout -l <lang>`.
pub struct TesseractEngine {
    cmd: String,
    language: String,
}

impl TesseractEngine {
    pub fn probe(cmd: &str, language: &str) -> Result<Self, String> {
        let output = Command::new(cmd)
            .arg("--version")
            .output()
            .map_err(|e| format!("{} is not runnable: {}", cmd, e))?;
        if !output.status.success() {
            return Err(format!("{} --version exited with {}", cmd, output.status));
        }
        Ok(Self {
            cmd: cmd.to_string(),
            language: language.to_string(),
        })
    }
}

impl OcrEngine for TesseractEngine {
    fn recognize(&self, image_path: &Path) -> Result<Vec<String>, ExtractError> {
        let output = Command::new(&self.cmd)
            .arg(image_path)
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .output()
            .map_err(|e| ExtractError::Ocr(format!("failed to run {}: {}", self.cmd, e)))?;
        if !output.status.success() {
            return Err(ExtractError::Ocr(format!(
                "{} exited with {}: {}",
                self.cmd,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}

/// `pdftoppm -png -r <dpi> -f N -l N -singlefile` into a scratch directory.
pub struct PdftoppmRenderer {
    cmd: String,
}

impl PdftoppmRenderer {
    pub fn new(cmd: &str) -> Self {
        Self {
            cmd: cmd.to_string(),
        }
    }
}

impl RasterRenderer for PdftoppmRenderer {
    fn render_page(&self, pdf_path: &Path, page: usize, scale: f32) -> Result<Vec<u8>, ExtractError> {
        let dir = tempfile::Builder::new().prefix("trh-render-").tempdir()?;
        let prefix = dir.path().join("page");
        let dpi = (72.0 * scale).round().max(1.0) as u32;

        let output = Command::new(&self.cmd)
            .arg("-png")
            .arg("-r")
            .arg(dpi.to_string())
            .arg("-f")
            .arg(page.to_string())
            .arg("-l")
            .arg(page.to_string())
            .arg("-singlefile")
            .arg(pdf_path)
            .arg(&prefix)
            .output()
            .map_err(|e| ExtractError::Render(format!("failed to run {}: {}", self.cmd, e)))?;
        if !output.status.success() {
            return Err(ExtractError::Render(format!(
                "{} exited with {}: {}",
                self.cmd,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        std::fs::read(prefix.with_extension("png")).map_err(|e| ExtractError::Render(e.to_string()))
    }
}
