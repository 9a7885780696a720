//! Ingest progress reporting.
//!
//! Reports what `trh ingest` is doing: the directory being scanned, which
//! file out of how many, and page progress with an ETA for paged files.
//! Progress is emitted on **stderr** so stdout stays parseable when chunks
//! are streamed with `--emit`.

use std::io::Write;
use std::time::Duration;

/// A single progress event for ingestion.
#[derive(Clone, Debug, PartialEq)]
pub enum IngestProgressEvent {
    /// Listing the documents directory (no total yet).
    Discovering { dir: String },
    /// Starting file `n` of `total`.
    File { n: u64, total: u64, name: String },
    /// Page progress inside a paged file, reported after each batch.
    Pages {
        name: String,
        done: u64,
        total: u64,
        eta: Option<Duration>,
    },
}

/// Reports ingest progress. Implementations write to stderr (human or JSON).
pub trait IngestProgressReporter: Send + Sync {
    fn report(&self, event: IngestProgressEvent);
}

/// Human-friendly progress on stderr: "ingest  big.pdf  pages 100 / 1,250  eta 42s".
pub struct StderrProgress;

impl IngestProgressReporter for StderrProgress {
    fn report(&self, event: IngestProgressEvent) {
        let line = match &event {
            IngestProgressEvent::Discovering { dir } => {
                format!("ingest {}  discovering...\n", dir)
            }
            IngestProgressEvent::File { n, total, name } => format!(
                "ingest  file {} / {}  {}\n",
                format_number(*n),
                format_number(*total),
                name
            ),
            IngestProgressEvent::Pages {
                name,
                done,
                total,
                eta,
            } => {
                let eta = eta
                    .map(|d| format!("  eta {}s", d.as_secs()))
                    .unwrap_or_default();
                format!(
                    "ingest  {}  pages {} / {}{}\n",
                    name,
                    format_number(*done),
                    format_number(*total),
                    eta
                )
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IngestProgressReporter for JsonProgress {
    fn report(&self, event: IngestProgressEvent) {
        if let Ok(line) = serde_json::to_string(&event_json(&event)) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

fn event_json(event: &IngestProgressEvent) -> serde_json::Value {
    match event {
        IngestProgressEvent::Discovering { dir } => serde_json::json!({
            "event": "progress",
            "phase": "discovering",
            "dir": dir
        }),
        IngestProgressEvent::File { n, total, name } => serde_json::json!({
            "event": "progress",
            "phase": "file",
            "n": n,
            "total": total,
            "name": name
        }),
        IngestProgressEvent::Pages {
            name,
            done,
            total,
            eta,
        } => serde_json::json!({
            "event": "progress",
            "phase": "pages",
            "name": name,
            "done": done,
            "total": total,
            "eta_secs": eta.map(|d| d.as_secs())
        }),
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl IngestProgressReporter for NoProgress {
    fn report(&self, _event: IngestProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn IngestProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn pages_event_json_carries_eta() {
        let v = event_json(&IngestProgressEvent::Pages {
            name: "big.pdf".into(),
            done: 50,
            total: 200,
            eta: Some(Duration::from_secs(12)),
        });
        assert_eq!(v["phase"], "pages");
        assert_eq!(v["done"], 50);
        assert_eq!(v["eta_secs"], 12);

        let v = event_json(&IngestProgressEvent::File {
            n: 1,
            total: 3,
            name: "a.txt".into(),
        });
        assert_eq!(v["phase"], "file");
        assert_eq!(v["total"], 3);
    }
}
