//! Stage gate — decides whether a canary stage advances, holds or rolls back.
//!
//! Pure function of the configuration, the health samples collected since
//! the stage was entered and the time spent in the stage. The async
//! controller calls it on every poll.

use std::time::Duration;

use modelgrid_core::{HealthSample, SampleSource};
use modelgrid_health::SideStats;
use tracing::debug;

use crate::strategy::CanaryConfig;

/// Outcome of one stage evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum StageDecision {
    /// Healthy for the whole dwell; move to the next stage.
    Advance,
    /// Keep observing.
    Hold,
    /// Send all traffic back to the champion.
    Rollback(String),
}

/// Evaluate a non-final stage.
pub fn evaluate_stage(
    cfg: &CanaryConfig,
    samples: &[HealthSample],
    in_stage: Duration,
) -> StageDecision {
    let by_source = |source: SampleSource| {
        samples
            .iter()
            .filter(move |s: &&HealthSample| s.source == source)
    };
    let champion = SideStats::from_samples(by_source(SampleSource::Champion));
    let candidate = SideStats::from_samples(by_source(SampleSource::Candidate));

    // Fast-fail: one bad candidate sample is enough, dwell or not.
    for sample in by_source(SampleSource::Candidate) {
        if sample.error_rate > cfg.error_ceiling_abs {
            return StageDecision::Rollback(format!(
                "candidate error rate {:.4} above absolute ceiling {}",
                sample.error_rate, cfg.error_ceiling_abs
            ));
        }
        if champion.mean_error_rate > 0.0
            && sample.error_rate > cfg.error_ceiling_ratio * champion.mean_error_rate
        {
            return StageDecision::Rollback(format!(
                "candidate error rate {:.4} above {}x champion mean {:.4}",
                sample.error_rate, cfg.error_ceiling_ratio, champion.mean_error_rate
            ));
        }
    }

    if in_stage < cfg.dwell.as_duration() {
        return StageDecision::Hold;
    }

    // Zero samples on a side is never conclusive, whatever min_samples says.
    let need = cfg.min_samples.max(1);
    if candidate.samples < need || champion.samples < need {
        if in_stage >= cfg.dwell_timeout.as_duration() {
            return StageDecision::Rollback(format!(
                "inconclusive after {}s: {} candidate / {} champion samples, need {}",
                in_stage.as_secs(),
                candidate.samples,
                champion.samples,
                need
            ));
        }
        debug!(
            candidate = candidate.samples,
            champion = champion.samples,
            need,
            "dwell elapsed, waiting for samples"
        );
        return StageDecision::Hold;
    }

    if candidate.mean_error_rate > champion.mean_error_rate + cfg.error_rate_tolerance {
        return StageDecision::Rollback(format!(
            "error rate regression: candidate {:.4} vs champion {:.4} (+{} allowed)",
            candidate.mean_error_rate, champion.mean_error_rate, cfg.error_rate_tolerance
        ));
    }
    if candidate.mean_latency_p95 > champion.mean_latency_p95 * cfg.latency_ratio {
        return StageDecision::Rollback(format!(
            "latency regression: candidate p95 {:.1}ms vs champion {:.1}ms (x{} allowed)",
            candidate.mean_latency_p95, champion.mean_latency_p95, cfg.latency_ratio
        ));
    }

    StageDecision::Advance
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: Duration = Duration::from_secs(60);

    fn samples(n: usize, champion: (f64, f64), candidate: (f64, f64)) -> Vec<HealthSample> {
        (0..n as u64)
            .flat_map(|ts| {
                [
                    HealthSample {
                        timestamp: ts,
                        error_rate: champion.0,
                        latency_p95: champion.1,
                        source: SampleSource::Champion,
                    },
                    HealthSample {
                        timestamp: ts,
                        error_rate: candidate.0,
                        latency_p95: candidate.1,
                        source: SampleSource::Candidate,
                    },
                ]
            })
            .collect()
    }

    fn healthy(n: usize) -> Vec<HealthSample> {
        samples(n, (0.01, 100.0), (0.011, 105.0))
    }

    #[test]
    fn holds_during_dwell() {
        let cfg = CanaryConfig::default();
        assert_eq!(evaluate_stage(&cfg, &healthy(30), 5 * MIN), StageDecision::Hold);
    }

    #[test]
    fn advances_after_healthy_dwell() {
        let cfg = CanaryConfig::default();
        assert_eq!(evaluate_stage(&cfg, &healthy(30), 10 * MIN), StageDecision::Advance);
    }

    #[test]
    fn error_spike_fails_fast_mid_dwell() {
        let cfg = CanaryConfig::default();
        let mut s = healthy(10);
        s.push(HealthSample {
            timestamp: 11,
            error_rate: 0.03,
            latency_p95: 100.0,
            source: SampleSource::Candidate,
        });
        match evaluate_stage(&cfg, &s, MIN) {
            StageDecision::Rollback(reason) => assert!(reason.contains("2x champion")),
            other => panic!("expected rollback, got {other:?}"),
        }
    }

    #[test]
    fn absolute_ceiling_applies_with_zero_champion_errors() {
        let cfg = CanaryConfig::default();
        let s = samples(3, (0.0, 100.0), (0.06, 100.0));
        match evaluate_stage(&cfg, &s, Duration::ZERO) {
            StageDecision::Rollback(reason) => assert!(reason.contains("absolute ceiling")),
            other => panic!("expected rollback, got {other:?}"),
        }
    }

    #[test]
    fn inconclusive_holds_until_timeout() {
        let cfg = CanaryConfig::default();
        assert_eq!(evaluate_stage(&cfg, &healthy(5), 12 * MIN), StageDecision::Hold);
        assert!(matches!(
            evaluate_stage(&cfg, &[], 30 * MIN),
            StageDecision::Rollback(reason) if reason.contains("inconclusive")
        ));
    }

    #[test]
    fn empty_window_never_advances_even_without_min_samples() {
        let cfg = CanaryConfig {
            min_samples: 0,
            ..Default::default()
        };
        assert_eq!(evaluate_stage(&cfg, &[], 10 * MIN), StageDecision::Hold);
        assert!(matches!(
            evaluate_stage(&cfg, &[], 30 * MIN),
            StageDecision::Rollback(reason) if reason.contains("inconclusive")
        ));
        // One side alone is not enough either.
        let champion_only: Vec<HealthSample> = healthy(30)
            .into_iter()
            .filter(|s| s.source == SampleSource::Champion)
            .collect();
        assert_eq!(evaluate_stage(&cfg, &champion_only, 10 * MIN), StageDecision::Hold);
    }

    #[test]
    fn error_regression_at_end_of_dwell() {
        let cfg = CanaryConfig::default();
        // Within the fast-fail ceilings, but beyond the tolerance.
        let s = samples(30, (0.01, 100.0), (0.018, 100.0));
        assert_eq!(evaluate_stage(&cfg, &s, 5 * MIN), StageDecision::Hold);
        assert!(matches!(
            evaluate_stage(&cfg, &s, 10 * MIN),
            StageDecision::Rollback(reason) if reason.contains("error rate regression")
        ));
    }

    #[test]
    fn latency_regression_at_end_of_dwell() {
        let cfg = CanaryConfig::default();
        let s = samples(30, (0.01, 100.0), (0.01, 130.0));
        assert!(matches!(
            evaluate_stage(&cfg, &s, 10 * MIN),
            StageDecision::Rollback(reason) if reason.contains("latency regression")
        ));
    }
}
