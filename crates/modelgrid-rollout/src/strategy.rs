//! Canary rollout configuration.

use modelgrid_core::HumanDuration;
use serde::{Deserialize, Serialize};

use crate::error::{RolloutError, RolloutResult};

/// Configuration for a staged canary rollout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CanaryConfig {
    /// Candidate traffic percentage per stage. Strictly increasing, at most
    /// three entries, ending at 100.
    pub stages: Vec<u32>,
    /// Minimum observation time at each non-final stage.
    pub dwell: HumanDuration,
    /// Roll back if a stage is still inconclusive after this long.
    pub dwell_timeout: HumanDuration,
    /// How often the decision loop reads the health window.
    pub poll_interval: HumanDuration,
    /// Samples required on each side before a stage can advance.
    pub min_samples: usize,
    /// Candidate mean error rate may exceed the champion's by this much.
    pub error_rate_tolerance: f64,
    /// Candidate mean p95 latency may be at most this multiple of the champion's.
    pub latency_ratio: f64,
    /// Immediate rollback when a candidate sample's error rate exceeds this
    /// multiple of the champion mean.
    pub error_ceiling_ratio: f64,
    /// Immediate rollback when a candidate sample's error rate exceeds this.
    pub error_ceiling_abs: f64,
    /// Health samples kept in the ring buffer.
    pub window_capacity: usize,
    /// How often health samples are pulled from the backend.
    pub ingest_interval: HumanDuration,
}

impl Default for CanaryConfig {
    fn default() -> Self {
        Self {
            stages: vec![10, 50, 100],
            dwell: HumanDuration::from_secs(10 * 60),
            dwell_timeout: HumanDuration::from_secs(30 * 60),
            poll_interval: HumanDuration::from_secs(30),
            min_samples: 20,
            error_rate_tolerance: 0.005,
            latency_ratio: 1.2,
            error_ceiling_ratio: 2.0,
            error_ceiling_abs: 0.05,
            window_capacity: 512,
            ingest_interval: HumanDuration::from_secs(15),
        }
    }
}

impl CanaryConfig {
    pub fn validate(&self) -> RolloutResult<()> {
        let invalid = |msg: String| Err(RolloutError::InvalidConfig(msg));

        if self.stages.is_empty() || self.stages.len() > 3 {
            return invalid(format!("expected 1 to 3 stages, got {}", self.stages.len()));
        }
        if self.stages.windows(2).any(|w| w[0] >= w[1]) {
            return invalid(format!("stage weights must increase: {:?}", self.stages));
        }
        if self.stages[0] == 0 {
            return invalid("first stage must route some traffic".into());
        }
        if self.stages.last() != Some(&100) {
            return invalid(format!("last stage must be 100, got {:?}", self.stages.last()));
        }
        if self.dwell_timeout < self.dwell {
            return invalid(format!(
                "dwell_timeout ({}) shorter than dwell ({})",
                self.dwell_timeout, self.dwell
            ));
        }
        if self.poll_interval.as_duration().is_zero() || self.ingest_interval.as_duration().is_zero() {
            return invalid("poll and ingest intervals must be > 0".into());
        }
        if self.min_samples == 0 {
            return invalid("min_samples must be >= 1".into());
        }
        let floats = [
            ("error_rate_tolerance", self.error_rate_tolerance),
            ("latency_ratio", self.latency_ratio),
            ("error_ceiling_ratio", self.error_ceiling_ratio),
            ("error_ceiling_abs", self.error_ceiling_abs),
        ];
        if let Some((name, v)) = floats.iter().find(|(_, v)| !v.is_finite()) {
            return invalid(format!("{name} must be finite, got {v}"));
        }
        if self.error_rate_tolerance < 0.0 || self.latency_ratio <= 0.0 {
            return invalid("tolerance must be >= 0 and latency_ratio > 0".into());
        }
        if self.error_ceiling_ratio <= 0.0 || self.error_ceiling_abs <= 0.0 {
            return invalid("error ceilings must be > 0".into());
        }
        Ok(())
    }

    /// Candidate weight at a stage index.
    pub fn weight(&self, index: usize) -> Option<u32> {
        self.stages.get(index).copied()
    }

    pub fn is_final(&self, index: usize) -> bool {
        index + 1 >= self.stages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = CanaryConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.weight(0), Some(10));
        assert!(cfg.is_final(2));
        assert!(!cfg.is_final(1));
    }

    #[test]
    fn rejects_bad_stages() {
        for stages in [vec![], vec![50, 10, 100], vec![10, 50], vec![10, 20, 50, 100], vec![0, 100]] {
            let cfg = CanaryConfig {
                stages: stages.clone(),
                ..Default::default()
            };
            assert!(cfg.validate().is_err(), "{stages:?} accepted");
        }
    }

    #[test]
    fn single_stage_is_allowed() {
        let cfg = CanaryConfig {
            stages: vec![100],
            ..Default::default()
        };
        assert!(cfg.validate().is_ok());
        assert!(cfg.is_final(0));
    }

    #[test]
    fn rejects_timeout_below_dwell() {
        let cfg = CanaryConfig {
            dwell: HumanDuration::from_secs(600),
            dwell_timeout: HumanDuration::from_secs(60),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_min_samples_and_non_finite_bounds() {
        let cfg = CanaryConfig {
            min_samples: 0,
            ..Default::default()
        };
        assert!(cfg.validate().unwrap_err().to_string().contains("min_samples"));

        for cfg in [
            CanaryConfig { error_rate_tolerance: f64::NAN, ..Default::default() },
            CanaryConfig { latency_ratio: f64::NAN, ..Default::default() },
            CanaryConfig { error_ceiling_ratio: f64::INFINITY, ..Default::default() },
            CanaryConfig { error_ceiling_abs: f64::NAN, ..Default::default() },
        ] {
            assert!(cfg.validate().unwrap_err().to_string().contains("finite"));
        }
    }

    #[test]
    fn parses_human_durations() {
        let cfg: CanaryConfig = serde_json::from_str(
            r#"{"stages": [25, 100], "dwell": "2m", "dwell_timeout": "5m", "poll_interval": "10s"}"#,
        )
        .unwrap();
        assert_eq!(cfg.stages, vec![25, 100]);
        assert_eq!(cfg.dwell, HumanDuration::from_secs(120));
        assert_eq!(cfg.min_samples, 20);
        assert!(cfg.validate().is_ok());
    }
}
