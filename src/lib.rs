//! # Trace Harness
//!
//! A local-first document ingestion and requirement traceability engine.
//!
//! Trace Harness scans a directory of heterogeneous documents (PDF, Office,
//! images, text, tables), turns each file into provenance-tagged text units
//! and chunks for a downstream retrieval index, and records every
//! requirement identifier it finds. A master catalogue of requirements is
//! then audited against those detections: what is covered, what is missing,
//! and which identifiers are orphans.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────┐   ┌──────────────┐
//! │ documents/  │──▶│ Extract + OCR    │──▶│ Chunks (out) │
//! │ pdf/docx/.. │   │ Links + Chunking │   └──────────────┘
//! └─────────────┘   └────────┬─────────┘
//!                            ▼
//!                     ┌────────────┐     ┌──────────────┐
//!                     │   SQLite   │◀────│ master.csv   │
//!                     │ docs/links │     └──────────────┘
//!                     └─────┬──────┘
//!                           ▼
//!                     ┌────────────┐
//!                     │ Gap report │
//!                     └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! trh init                          # create database
//! trh import-master master.csv      # load the requirement catalogue
//! trh ingest --progress human       # scan ./documents
//! trh audit --page 1                # gap report as JSON
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Extraction, ingest and import error types |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`models`] | Stored rows and transient unit/chunk types |
//! | [`registry`] | Content-hash identity, versions, audit log |
//! | [`links`] | Detected link persistence and master catalogue |
//! | [`formats`] | Supported formats and extension mapping |
//! | [`extract`] | Per-format text extraction |
//! | [`ocr`] | OCR engine and page rasterization |
//! | [`governor`] | Memory-pressure control for paged files |
//! | [`progress`] | Ingest progress reporting |
//! | [`chunk`] | Recursive text chunking |
//! | [`link_extract`] | Requirement identifier detection |
//! | [`ingest`] | Directory scan driver |
//! | [`audit`] | Traceability gap report |
//! | [`stats`] | Store summary |

pub mod audit;
pub mod chunk;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod formats;
pub mod governor;
pub mod ingest;
pub mod link_extract;
pub mod links;
pub mod migrate;
pub mod models;
pub mod ocr;
pub mod progress;
pub mod registry;
pub mod stats;
