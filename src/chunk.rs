//! Overlapping-window text chunker.
//!
//! Splits a [`TextUnit`] into [`Chunk`]s of at most `chunk_size` characters.
//! Boundaries are tried coarsest-first from the configured separator list
//! (paragraph, line, sentence, word, character by default). Pieces that fit
//! are merged greedily into windows; consecutive windows share up to
//! `chunk_overlap` characters of trailing pieces.
//!
//! Each chunk carries a SHA-256 of its text and inherits the unit's
//! metadata. Chunking is deterministic: the same text and configuration
//! always produce the same chunk texts and hashes.
//!
//! # Algorithm
//!
//! 1. Text that already fits is returned as one chunk.
//! 2. Otherwise pick the first separator present in the text and split on
//!    it, keeping the separator attached to the preceding piece.
//! 3. Pieces that fit are collected; an oversized piece flushes the
//!    collection and is split recursively with the remaining separators.
//! 4. Collected pieces are merged into windows, dropping pieces from the
//!    front after each flush until at most `chunk_overlap` characters remain.

use sha2::{Digest, Sha256};
use std::collections::VecDeque;

use crate::config::ChunkingConfig;
use crate::models::{Chunk, ChunkMetadata, TextUnit};

#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
    separators: Vec<String>,
}

impl Chunker {
    pub fn new(config: &ChunkingConfig) -> Self {
        Self {
            chunk_size: config.chunk_size.max(1),
            overlap: config.chunk_overlap.min(config.chunk_size.saturating_sub(1)),
            separators: config.separators.clone(),
        }
    }

    /// Split a unit into chunks that inherit its metadata.
    pub fn split_unit(&self, unit: &TextUnit) -> Vec<Chunk> {
        self.split_text(&unit.text)
            .into_iter()
            .enumerate()
            .map(|(index, text)| make_chunk(unit, index, text))
            .collect()
    }

    /// Split raw text. Returns no pieces for blank input; never returns an
    /// empty piece.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }
        if char_len(trimmed) <= self.chunk_size {
            return vec![trimmed.to_string()];
        }
        let mut out = Vec::new();
        self.split_recursive(trimmed, &self.separators, &mut out);
        out
    }

    fn split_recursive(&self, text: &str, separators: &[String], out: &mut Vec<String>) {
        let position = separators
            .iter()
            .position(|s| s.is_empty() || text.contains(s.as_str()));
        let (separator, rest): (&str, &[String]) = match position {
            Some(i) => (separators[i].as_str(), &separators[i + 1..]),
            // Nothing in the list applies: fall back to characters.
            None => ("", &[]),
        };

        let pieces = split_keeping_separator(text, separator);
        let mut fitting: Vec<&str> = Vec::new();
        for piece in pieces {
            if char_len(piece) <= self.chunk_size {
                fitting.push(piece);
                continue;
            }
            if !fitting.is_empty() {
                self.merge(&fitting, out);
                fitting.clear();
            }
            if rest.is_empty() {
                self.merge(&split_keeping_separator(piece, ""), out);
            } else {
                self.split_recursive(piece, rest, out);
            }
        }
        if !fitting.is_empty() {
            self.merge(&fitting, out);
        }
    }

    fn merge(&self, pieces: &[&str], out: &mut Vec<String>) {
        let mut window: VecDeque<(&str, usize)> = VecDeque::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = char_len(piece);
            if total + len > self.chunk_size && !window.is_empty() {
                push_window(&window, out);
                while total > self.overlap || (total > 0 && total + len > self.chunk_size) {
                    match window.pop_front() {
                        Some((_, dropped)) => total -= dropped,
                        None => break,
                    }
                }
            }
            window.push_back((piece, len));
            total += len;
        }

        if !window.is_empty() {
            push_window(&window, out);
        }
    }
}

fn push_window(window: &VecDeque<(&str, usize)>, out: &mut Vec<String>) {
    let joined: String = window.iter().map(|(piece, _)| *piece).collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }
    text.split_inclusive(separator).collect()
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// SHA-256 hex digest of a chunk's text.
pub fn chunk_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn make_chunk(unit: &TextUnit, index: usize, text: String) -> Chunk {
    Chunk {
        metadata: ChunkMetadata {
            unit: unit.metadata.clone(),
            chunk_hash: chunk_hash(&text),
            chunk_index: index,
        },
        page_content: text,
    }
}
