//! Memory-pressure governor for paged extraction.
//!
//! Large PDFs are processed in batches of pages whose size depends on the
//! file size ([`batch_size_for`]). Within a batch the governor samples
//! memory usage at the first page and then every `sample_every_pages`:
//!
//! - below `high_water_percent`: continue;
//! - at or above it: ask the probe to reclaim, pause for `pause_ms`, sample
//!   again;
//! - still at or above `critical_percent`: the rest of the batch is skipped
//!   ([`GovernorDecision::SkipBatch`]). Units already emitted stay valid.

use std::collections::VecDeque;
use std::time::Duration;
use sysinfo::System;
use tracing::{debug, warn};

use crate::config::MemoryConfig;

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// Source of memory-usage samples.
pub trait MemoryProbe: Send {
    /// Used memory as a percentage of total, or `None` when unknown.
    fn usage_percent(&mut self) -> Option<f64>;

    /// Give memory back if the backend can. No-op by default.
    fn reclaim(&mut self) {}
}

/// System-wide memory usage via sysinfo.
pub struct SystemMemoryProbe {
    system: System,
}

impl SystemMemoryProbe {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for SystemMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SystemMemoryProbe {
    fn usage_percent(&mut self) -> Option<f64> {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        if total == 0 {
            return None;
        }
        Some(self.system.used_memory() as f64 / total as f64 * 100.0)
    }
}

/// Replays a fixed sequence of readings, then repeats the last one.
/// Used to drive pressure scenarios deterministically.
pub struct ScriptedProbe {
    readings: VecDeque<f64>,
    last: Option<f64>,
    reclaims: usize,
}

impl ScriptedProbe {
    pub fn new(readings: impl IntoIterator<Item = f64>) -> Self {
        Self {
            readings: readings.into_iter().collect(),
            last: None,
            reclaims: 0,
        }
    }

    pub fn reclaims(&self) -> usize {
        self.reclaims
    }
}

impl MemoryProbe for ScriptedProbe {
    fn usage_percent(&mut self) -> Option<f64> {
        if let Some(next) = self.readings.pop_front() {
            self.last = Some(next);
        }
        self.last
    }

    fn reclaim(&mut self) {
        self.reclaims += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GovernorDecision {
    Continue,
    /// Usage stayed at `percent` after reclaiming; stop the current batch.
    SkipBatch { percent: f64 },
}

pub struct MemoryGovernor {
    probe: Box<dyn MemoryProbe>,
    high_water: f64,
    critical: f64,
    pause: Duration,
    sample_every: usize,
}

impl MemoryGovernor {
    pub fn new(config: &MemoryConfig, probe: Box<dyn MemoryProbe>) -> Self {
        Self {
            probe,
            high_water: config.high_water_percent,
            critical: config.critical_percent,
            pause: Duration::from_millis(config.pause_ms),
            sample_every: config.sample_every_pages.max(1),
        }
    }

    /// Whether the page at `offset` within the current batch is a sampling point.
    pub fn should_sample(&self, offset: usize) -> bool {
        offset % self.sample_every == 0
    }

    /// Sample, and under pressure reclaim, pause and re-sample.
    pub async fn check(&mut self) -> GovernorDecision {
        let Some(percent) = self.probe.usage_percent() else {
            return GovernorDecision::Continue;
        };
        if percent < self.high_water {
            return GovernorDecision::Continue;
        }

        warn!(percent, "memory above high-water mark, reclaiming");
        self.probe.reclaim();
        if !self.pause.is_zero() {
            tokio::time::sleep(self.pause).await;
        }

        match self.probe.usage_percent() {
            Some(after) if after >= self.critical => GovernorDecision::SkipBatch { percent: after },
            after => {
                debug!(?after, "memory recovered after pause");
                GovernorDecision::Continue
            }
        }
    }
}

/// Pages per batch for a PDF of `file_size` bytes.
pub fn batch_size_for(file_size: u64) -> usize {
    if file_size > GIB {
        10
    } else if file_size > 500 * MIB {
        20
    } else {
        50
    }
}

/// Remaining time extrapolated from the average time per completed unit.
pub fn eta(elapsed: Duration, done: usize, total: usize) -> Option<Duration> {
    if done == 0 || done > total {
        return None;
    }
    Some(elapsed.mul_f64((total - done) as f64 / done as f64))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> MemoryConfig {
        MemoryConfig {
            pause_ms: 0,
            ..MemoryConfig::default()
        }
    }

    #[test]
    fn batch_tiers() {
        assert_eq!(batch_size_for(0), 50);
        assert_eq!(batch_size_for(500 * MIB), 50);
        assert_eq!(batch_size_for(500 * MIB + 1), 20);
        assert_eq!(batch_size_for(GIB), 20);
        assert_eq!(batch_size_for(GIB + 1), 10);
    }

    #[test]
    fn eta_extrapolates_linearly() {
        assert_eq!(eta(Duration::from_secs(10), 0, 100), None);
        assert_eq!(eta(Duration::from_secs(10), 25, 100), Some(Duration::from_secs(30)));
        assert_eq!(eta(Duration::from_secs(10), 100, 100), Some(Duration::ZERO));
    }

    #[test]
    fn samples_first_page_then_every_n() {
        let gov = MemoryGovernor::new(&config(), Box::new(ScriptedProbe::new([])));
        let points: Vec<usize> = (0..25).filter(|&i| gov.should_sample(i)).collect();
        assert_eq!(points, vec![0, 10, 20]);
    }

    #[tokio::test]
    async fn below_high_water_continues() {
        let mut gov = MemoryGovernor::new(&config(), Box::new(ScriptedProbe::new([60.0])));
        assert_eq!(gov.check().await, GovernorDecision::Continue);
    }

    #[tokio::test]
    async fn recovered_after_reclaim_continues() {
        let mut gov = MemoryGovernor::new(&config(), Box::new(ScriptedProbe::new([92.0, 80.0])));
        assert_eq!(gov.check().await, GovernorDecision::Continue);
    }

    #[tokio::test]
    async fn between_marks_after_reclaim_continues() {
        let mut gov = MemoryGovernor::new(&config(), Box::new(ScriptedProbe::new([96.0, 93.0])));
        assert_eq!(gov.check().await, GovernorDecision::Continue);
    }

    #[tokio::test]
    async fn critical_after_reclaim_skips() {
        let mut gov = MemoryGovernor::new(&config(), Box::new(ScriptedProbe::new([96.0])));
        assert_eq!(
            gov.check().await,
            GovernorDecision::SkipBatch { percent: 96.0 }
        );
    }

    #[tokio::test]
    async fn unknown_usage_never_blocks() {
        struct Blind;
        impl MemoryProbe for Blind {
            fn usage_percent(&mut self) -> Option<f64> {
                None
            }
        }
        let mut gov = MemoryGovernor::new(&config(), Box::new(Blind));
        assert_eq!(gov.check().await, GovernorDecision::Continue);
    }

    #[test]
    fn scripted_probe_repeats_last_reading() {
        let mut probe = ScriptedProbe::new([10.0, 20.0]);
        assert_eq!(probe.usage_percent(), Some(10.0));
        assert_eq!(probe.usage_percent(), Some(20.0));
        assert_eq!(probe.usage_percent(), Some(20.0));
        probe.reclaim();
        assert_eq!(probe.reclaims(), 1);
    }

    #[test]
    fn system_probe_reports_a_percentage() {
        if let Some(p) = SystemMemoryProbe::new().usage_percent() {
            assert!((0.0..=100.0).contains(&p));
        }
    }
}
