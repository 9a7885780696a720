//! Traceability audit: master catalogue vs. detected links.
//!
//! Each master requirement is either COVERED (at least one link to it,
//! with the distinct filenames it was found in) or MISSING. Links to ids
//! outside the catalogue are orphans, reported one per link row.
//!
//! The three lists are paginated independently with the same page and page
//! size. `meta.total_pages` is the largest of the three per-list page
//! counts, so paging up to it exhausts every list.

use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::config::AuditConfig;
use crate::links::{LinkIndex, LinkRow, RequirementMaster};
use crate::models::MasterRequirement;

pub const STATUS_MISSING: &str = "MISSING";
pub const STATUS_COVERED: &str = "COVERED";

/// Orphan contexts are cut to this many characters.
const ORPHAN_CONTEXT_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditReport {
    pub meta: ReportMeta,
    pub gaps: Vec<GapEntry>,
    pub orphans: Vec<OrphanEntry>,
    pub coverage: Vec<CoverageEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportMeta {
    pub page: usize,
    pub total_pages: usize,
    pub traceability_score: f64,
    pub total_master: usize,
    pub gaps_pages: usize,
    pub orphans_pages: usize,
    pub coverage_pages: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GapEntry {
    pub req_id: String,
    pub description: String,
    pub status: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrphanEntry {
    pub req_id: String,
    pub found_in: String,
    pub context: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageEntry {
    pub req_id: String,
    pub found_in: Vec<String>,
    pub status: &'static str,
}

/// Build a report page from already-loaded data. `page` is 1-based; 0 is
/// treated as 1.
pub fn build_report(
    master: &[MasterRequirement],
    links: &[LinkRow],
    page: usize,
    page_size: usize,
    require_valid_context: bool,
) -> AuditReport {
    let page = page.max(1);
    let page_size = page_size.max(1);
    let master_ids: HashSet<&str> = master.iter().map(|m| m.req_id.as_str()).collect();

    let mut found_in: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    let mut orphans = Vec::new();
    for link in links {
        if !master_ids.contains(link.req_id.as_str()) {
            orphans.push(OrphanEntry {
                req_id: link.req_id.clone(),
                found_in: link.filename.clone(),
                context: truncate_context(&link.context_snippet),
            });
        } else if link.valid_context || !require_valid_context {
            found_in
                .entry(link.req_id.as_str())
                .or_default()
                .insert(link.filename.as_str());
        }
    }

    let mut gaps = Vec::new();
    let mut coverage = Vec::new();
    for req in master {
        match found_in.get(req.req_id.as_str()) {
            Some(files) => coverage.push(CoverageEntry {
                req_id: req.req_id.clone(),
                found_in: files.iter().map(|f| f.to_string()).collect(),
                status: STATUS_COVERED,
            }),
            None => gaps.push(GapEntry {
                req_id: req.req_id.clone(),
                description: req.description.clone(),
                status: STATUS_MISSING,
            }),
        }
    }

    let total_master = master.len();
    let gaps_pages = page_count(gaps.len(), page_size);
    let orphans_pages = page_count(orphans.len(), page_size);
    let coverage_pages = page_count(coverage.len(), page_size);

    AuditReport {
        meta: ReportMeta {
            page,
            total_pages: gaps_pages.max(orphans_pages).max(coverage_pages).max(1),
            traceability_score: score(coverage.len(), total_master),
            total_master,
            gaps_pages,
            orphans_pages,
            coverage_pages,
            generated_at: None,
        },
        gaps: paginate(gaps, page, page_size),
        orphans: paginate(orphans, page, page_size),
        coverage: paginate(coverage, page, page_size),
    }
}

/// Percentage of covered requirements, two decimals. 0 for an empty catalogue.
pub fn score(covered: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let raw = covered as f64 / total as f64 * 100.0;
    (raw * 100.0).round() / 100.0
}

fn page_count(len: usize, page_size: usize) -> usize {
    len.div_ceil(page_size)
}

fn paginate<T>(items: Vec<T>, page: usize, page_size: usize) -> Vec<T> {
    items
        .into_iter()
        .skip((page - 1).saturating_mul(page_size))
        .take(page_size)
        .collect()
}

fn truncate_context(context: &str) -> String {
    let mut out: String = context.chars().take(ORPHAN_CONTEXT_CHARS).collect();
    out.push_str("...");
    out
}

/// Reads the catalogue and link tables and builds reports on demand.
pub struct TraceabilityAuditor {
    master: RequirementMaster,
    links: LinkIndex,
    require_valid_context: bool,
}

impl TraceabilityAuditor {
    pub fn new(pool: SqlitePool, config: &AuditConfig) -> Self {
        Self {
            master: RequirementMaster::new(pool.clone()),
            links: LinkIndex::new(pool),
            require_valid_context: config.require_valid_context,
        }
    }

    pub async fn generate_gap_report(&self, page: usize, page_size: usize) -> Result<AuditReport, sqlx::Error> {
        let master = self.master.all().await?;
        let links = self.links.audit_rows().await?;
        let mut report = build_report(&master, &links, page, page_size, self.require_valid_context);
        report.meta.generated_at = Some(chrono::Utc::now().to_rfc3339());
        Ok(report)
    }
}
