//! Bounded ring buffer of recent health samples.

use std::collections::VecDeque;
use std::sync::Mutex;

use modelgrid_core::{HealthSample, SampleSource};
use serde::{Deserialize, Serialize};

/// Aggregate over one side of the traffic split.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct SideStats {
    pub samples: usize,
    pub mean_error_rate: f64,
    pub max_error_rate: f64,
    pub mean_latency_p95: f64,
}

impl SideStats {
    pub fn from_samples<'a>(samples: impl IntoIterator<Item = &'a HealthSample>) -> Self {
        let mut stats = SideStats::default();
        let (mut err_sum, mut lat_sum) = (0.0, 0.0);
        for s in samples {
            stats.samples += 1;
            err_sum += s.error_rate;
            lat_sum += s.latency_p95;
            stats.max_error_rate = stats.max_error_rate.max(s.error_rate);
        }
        if stats.samples > 0 {
            stats.mean_error_rate = err_sum / stats.samples as f64;
            stats.mean_latency_p95 = lat_sum / stats.samples as f64;
        }
        stats
    }
}

/// Champion and candidate aggregates since a point in time.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct WindowSummary {
    pub since: u64,
    pub champion: SideStats,
    pub candidate: SideStats,
}

#[derive(Debug, Default)]
struct Inner {
    samples: VecDeque<HealthSample>,
    /// Newest timestamp ingested per side; survives `clear`.
    champion_mark: Option<u64>,
    candidate_mark: Option<u64>,
}

/// Last `capacity` health samples of one service.
///
/// Written by the ingestion task, read by the canary decision loop and the
/// status endpoints.
#[derive(Debug)]
pub struct HealthWindow {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl HealthWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a sample, evicting the oldest one when full.
    pub fn push(&self, sample: HealthSample) {
        let mut inner = self.lock();
        if inner.samples.len() == self.capacity {
            inner.samples.pop_front();
        }
        let mark = match sample.source {
            SampleSource::Champion => &mut inner.champion_mark,
            SampleSource::Candidate => &mut inner.candidate_mark,
        };
        *mark = Some(mark.map_or(sample.timestamp, |m| m.max(sample.timestamp)));
        inner.samples.push_back(sample);
    }

    /// Append the samples of one poll, skipping any a previous poll already
    /// delivered (timestamp at or below that side's newest ingested one).
    /// Returns how many samples were added.
    pub fn ingest(&self, batch: &[HealthSample]) -> usize {
        let (champion_mark, candidate_mark) = {
            let inner = self.lock();
            (inner.champion_mark, inner.candidate_mark)
        };
        let mut added = 0;
        for sample in batch {
            let mark = match sample.source {
                SampleSource::Champion => champion_mark,
                SampleSource::Candidate => candidate_mark,
            };
            if mark.is_some_and(|m| sample.timestamp <= m) {
                continue;
            }
            self.push(*sample);
            added += 1;
        }
        added
    }

    /// Samples with `timestamp >= since`, oldest first.
    pub fn since(&self, since: u64) -> Vec<HealthSample> {
        self.lock()
            .samples
            .iter()
            .filter(|s| s.timestamp >= since)
            .copied()
            .collect()
    }

    pub fn summary(&self, since: u64) -> WindowSummary {
        let samples = self.since(since);
        WindowSummary {
            since,
            champion: SideStats::from_samples(
                samples.iter().filter(|s| s.source == SampleSource::Champion),
            ),
            candidate: SideStats::from_samples(
                samples.iter().filter(|s| s.source == SampleSource::Candidate),
            ),
        }
    }

    /// Drop every buffered sample. Dedup marks are kept so a later poll
    /// cannot re-deliver what was already seen.
    pub fn clear(&self) {
        self.lock().samples.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
