//! Requirement identifier scanning.
//!
//! Finds tokens such as `REQ-001`, `test_42` or `SPEC:7a` in unit text,
//! keeps the first occurrence of each distinct id, and grades it by the
//! amount of prose around it. Ids sitting in tables of contents, headers
//! and other boilerplate usually have few surrounding words and are marked
//! weak.

use regex::Regex;
use std::collections::HashSet;

use crate::config::LinksConfig;

pub const VALID_CONFIDENCE: f64 = 0.9;
pub const WEAK_CONFIDENCE: f64 = 0.3;

/// One distinct identifier found in a unit.
#[derive(Debug, Clone, PartialEq)]
pub struct FoundLink {
    /// Upper-cased identifier.
    pub req_id: String,
    /// Whitespace-collapsed window around the first occurrence.
    pub context: String,
    pub valid_context: bool,
    pub confidence: f64,
}

pub struct LinkExtractor {
    pattern: Regex,
    radius: usize,
    min_words: usize,
}

impl LinkExtractor {
    pub fn new(config: &LinksConfig) -> Result<Self, regex::Error> {
        let prefixes = config
            .prefixes
            .iter()
            .map(|p| regex::escape(p))
            .collect::<Vec<_>>()
            .join("|");
        // The prefix is followed either by a separator or directly by a
        // digit, and the suffix must carry a digit. Words that merely start
        // with a prefix ("requirements", "Requirement1") never match.
        let pattern = Regex::new(&format!(
            r"(?i)\b(?:{})(?:[-_:][A-Z0-9]*[0-9][A-Z0-9]*|[0-9][A-Z0-9]*)\b",
            prefixes
        ))?;
        Ok(Self {
            pattern,
            radius: config.context_radius,
            min_words: config.min_context_words,
        })
    }

    pub fn extract(&self, text: &str) -> Vec<FoundLink> {
        let mut seen = HashSet::new();
        let mut found = Vec::new();

        for m in self.pattern.find_iter(text) {
            let req_id = m.as_str().to_uppercase();
            if !seen.insert(req_id.clone()) {
                continue;
            }

            let window = context_window(text, m.start(), m.end(), self.radius);
            let context = window.split_whitespace().collect::<Vec<_>>().join(" ");
            let valid_context = context.split_whitespace().count() > self.min_words;

            found.push(FoundLink {
                req_id,
                context,
                valid_context,
                confidence: if valid_context {
                    VALID_CONFIDENCE
                } else {
                    WEAK_CONFIDENCE
                },
            });
        }

        found
    }
}

/// Slice of `text` spanning up to `radius` characters either side of the
/// byte range `start..end`. Always on char boundaries.
pub fn context_window(text: &str, start: usize, end: usize, radius: usize) -> &str {
    let from = if radius == 0 {
        start
    } else {
        text[..start]
            .char_indices()
            .rev()
            .nth(radius - 1)
            .map(|(i, _)| i)
            .unwrap_or(0)
    };
    let to = text[end..]
        .char_indices()
        .nth(radius)
        .map(|(i, _)| end + i)
        .unwrap_or(text.len());
    &text[from..to]
}
