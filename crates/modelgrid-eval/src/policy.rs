//! Promotion policy: candidate scorecard vs champion scorecard.

use std::fmt;

use modelgrid_core::{ChampionRecord, ModelScorecard, PromotionDecision, Verdict};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{EvalError, EvalResult};
use crate::evaluator::{ACCURACY, LATENCY_P95};

/// A single promotion rule.
///
/// In TOML: `{ rule = "not_worse_than", metric = "accuracy", epsilon = 0.01 }`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Rule {
    /// candidate ≥ champion − epsilon
    NotWorseThan { metric: String, epsilon: f64 },
    /// candidate ≤ champion × ratio
    RatioAtMost { metric: String, ratio: f64 },
    /// candidate ≥ min
    AtLeast { metric: String, min: f64 },
    /// candidate ≤ max
    AtMost { metric: String, max: f64 },
}

impl Rule {
    pub fn metric(&self) -> &str {
        match self {
            Rule::NotWorseThan { metric, .. }
            | Rule::RatioAtMost { metric, .. }
            | Rule::AtLeast { metric, .. }
            | Rule::AtMost { metric, .. } => metric,
        }
    }

    /// Relative rules need a champion scorecard to compare against.
    pub fn is_relative(&self) -> bool {
        matches!(self, Rule::NotWorseThan { .. } | Rule::RatioAtMost { .. })
    }

    /// Check the rule, returning a description of the failure.
    pub fn check(
        &self,
        candidate: &ModelScorecard,
        champion: Option<&ModelScorecard>,
    ) -> Result<(), String> {
        let metric = self.metric();
        let value = candidate
            .metric(metric)
            .ok_or_else(|| format!("{self}: candidate has no {metric} metric"))?;

        let (passed, bound) = match self {
            Rule::AtLeast { min, .. } => (value >= *min, *min),
            Rule::AtMost { max, .. } => (value <= *max, *max),
            Rule::NotWorseThan { epsilon, .. } | Rule::RatioAtMost { ratio: epsilon, .. } => {
                let reference = champion
                    .and_then(|c| c.metric(metric))
                    .ok_or_else(|| format!("{self}: champion has no {metric} metric"))?;
                match self {
                    Rule::NotWorseThan { .. } => {
                        let bound = reference - epsilon;
                        (value >= bound, bound)
                    }
                    _ => {
                        let bound = reference * epsilon;
                        (value <= bound, bound)
                    }
                }
            }
        };

        if passed {
            Ok(())
        } else {
            Err(format!("{self}: candidate {value:.4} vs bound {bound:.4}"))
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::NotWorseThan { metric, epsilon } => {
                write!(f, "{metric} >= champion - {epsilon}")
            }
            Rule::RatioAtMost { metric, ratio } => write!(f, "{metric} <= champion * {ratio}"),
            Rule::AtLeast { metric, min } => write!(f, "{metric} >= {min}"),
            Rule::AtMost { metric, max } => write!(f, "{metric} <= {max}"),
        }
    }
}

/// Rules a candidate must pass to be promoted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PromotionPolicy {
    /// Checked only when a champion scorecard exists.
    pub require: Vec<Rule>,
    /// Absolute bars, always checked.
    pub minimum: Vec<Rule>,
}

impl Default for PromotionPolicy {
    fn default() -> Self {
        Self {
            require: vec![
                Rule::NotWorseThan {
                    metric: ACCURACY.to_string(),
                    epsilon: 0.01,
                },
                Rule::RatioAtMost {
                    metric: LATENCY_P95.to_string(),
                    ratio: 1.2,
                },
            ],
            minimum: vec![Rule::AtLeast {
                metric: ACCURACY.to_string(),
                min: 0.5,
            }],
        }
    }
}

impl PromotionPolicy {
    pub fn validate(&self) -> EvalResult<()> {
        if let Some(rule) = self.minimum.iter().find(|r| r.is_relative()) {
            return Err(EvalError::InvalidPolicy(format!(
                "minimum rule `{rule}` compares against the champion; move it to `require`"
            )));
        }
        for rule in self.require.iter().chain(&self.minimum) {
            let ok = match rule {
                Rule::NotWorseThan { epsilon, .. } => epsilon.is_finite() && *epsilon >= 0.0,
                Rule::RatioAtMost { ratio, .. } => ratio.is_finite() && *ratio > 0.0,
                Rule::AtLeast { min: v, .. } | Rule::AtMost { max: v, .. } => v.is_finite(),
            };
            if !ok || rule.metric().is_empty() {
                return Err(EvalError::InvalidPolicy(format!("rule `{rule}` is malformed")));
            }
        }
        Ok(())
    }
}

/// Compare a candidate against the current champion.
///
/// With no champion (first deployment) only the `minimum` rules apply. A
/// champion without a stored scorecard is treated the same way, since
/// there is nothing to compare against.
pub fn compare(
    service: &str,
    candidate: &ModelScorecard,
    champion: Option<&ChampionRecord>,
    policy: &PromotionPolicy,
    compared_at: u64,
) -> PromotionDecision {
    let champion_card = champion.and_then(|c| c.scorecard.as_ref());
    if let Some(c) = champion
        && c.scorecard.is_none()
    {
        warn!(
            service,
            champion = %c.model_id,
            "champion has no scorecard, relative rules skipped"
        );
    }

    let mut rules: Vec<&Rule> = Vec::new();
    if champion_card.is_some() {
        rules.extend(&policy.require);
    }
    rules.extend(&policy.minimum);

    let failed_rules: Vec<String> = rules
        .iter()
        .filter_map(|rule| rule.check(candidate, champion_card).err())
        .collect();

    let (verdict, reason) = if failed_rules.is_empty() {
        let reason = match champion {
            Some(c) => format!("passed {} rules against champion {}", rules.len(), c.model_id),
            None => format!("first deployment, passed {} minimum rules", rules.len()),
        };
        (Verdict::Promote, reason)
    } else {
        (
            Verdict::Reject,
            format!("failed {} rules: {}", failed_rules.len(), failed_rules.join("; ")),
        )
    };

    info!(
        service,
        candidate = %candidate.model_id,
        verdict = ?verdict,
        reason = %reason,
        "promotion decision"
    );

    PromotionDecision {
        service: service.to_string(),
        candidate_id: candidate.model_id.clone(),
        champion_id: champion.map(|c| c.model_id.clone()),
        verdict,
        reason,
        failed_rules,
        compared_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn card(id: &str, metrics: &[(&str, f64)]) -> ModelScorecard {
        ModelScorecard {
            model_id: id.to_string(),
            metrics: metrics
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect::<BTreeMap<_, _>>(),
            computed_at: 0,
            sample_count: 100,
        }
    }

    fn champion(metrics: &[(&str, f64)]) -> ChampionRecord {
        ChampionRecord {
            service: "qa".to_string(),
            model_id: "qa-v1".to_string(),
            scorecard: Some(card("qa-v1", metrics)),
            promoted_at: 0,
        }
    }

    fn accuracy_only() -> PromotionPolicy {
        PromotionPolicy {
            require: vec![Rule::NotWorseThan {
                metric: ACCURACY.to_string(),
                epsilon: 0.01,
            }],
            minimum: vec![],
        }
    }

    #[test]
    fn slightly_better_candidate_is_promoted() {
        let champ = champion(&[("accuracy", 0.90)]);
        let decision = compare(
            "qa",
            &card("qa-v2", &[("accuracy", 0.91)]),
            Some(&champ),
            &accuracy_only(),
            10,
        );
        assert_eq!(decision.verdict, Verdict::Promote);
        assert!(decision.failed_rules.is_empty());
        assert_eq!(decision.champion_id.as_deref(), Some("qa-v1"));
        assert_eq!(decision.compared_at, 10);
    }

    #[test]
    fn worse_candidate_is_rejected_citing_rule() {
        let champ = champion(&[("accuracy", 0.90)]);
        let decision = compare(
            "qa",
            &card("qa-v2", &[("accuracy", 0.80)]),
            Some(&champ),
            &accuracy_only(),
            10,
        );
        assert_eq!(decision.verdict, Verdict::Reject);
        assert_eq!(decision.failed_rules.len(), 1);
        assert!(decision.failed_rules[0].contains("accuracy"));
        assert!(decision.reason.contains("accuracy >= champion - 0.01"));
    }

    #[test]
    fn within_epsilon_still_passes() {
        let champ = champion(&[("accuracy", 0.90)]);
        let decision = compare(
            "qa",
            &card("qa-v2", &[("accuracy", 0.895)]),
            Some(&champ),
            &accuracy_only(),
            0,
        );
        assert!(decision.is_promote());
    }

    #[test]
    fn first_deployment_uses_minimum_bar() {
        let policy = PromotionPolicy::default();
        let good = compare("qa", &card("qa-v1", &[("accuracy", 0.7)]), None, &policy, 0);
        assert!(good.is_promote());
        assert!(good.champion_id.is_none());

        let bad = compare("qa", &card("qa-v1", &[("accuracy", 0.3)]), None, &policy, 0);
        assert_eq!(bad.verdict, Verdict::Reject);
        assert!(bad.failed_rules[0].contains("accuracy >= 0.5"));
    }

    #[test]
    fn minimum_applies_even_with_champion() {
        let champ = champion(&[("accuracy", 0.2), ("latency_p95", 100.0)]);
        let decision = compare(
            "qa",
            &card("qa-v2", &[("accuracy", 0.4), ("latency_p95", 90.0)]),
            Some(&champ),
            &PromotionPolicy::default(),
            0,
        );
        assert_eq!(decision.verdict, Verdict::Reject);
        assert_eq!(decision.failed_rules.len(), 1);
    }

    #[test]
    fn latency_ratio_rule() {
        let champ = champion(&[("accuracy", 0.9), ("latency_p95", 100.0)]);
        let slow = compare(
            "qa",
            &card("qa-v2", &[("accuracy", 0.9), ("latency_p95", 130.0)]),
            Some(&champ),
            &PromotionPolicy::default(),
            0,
        );
        assert_eq!(slow.verdict, Verdict::Reject);
        assert!(slow.failed_rules[0].contains("latency_p95"));

        let fine = compare(
            "qa",
            &card("qa-v2", &[("accuracy", 0.9), ("latency_p95", 115.0)]),
            Some(&champ),
            &PromotionPolicy::default(),
            0,
        );
        assert!(fine.is_promote());
    }

    #[test]
    fn missing_metric_fails_its_rule() {
        let champ = champion(&[("accuracy", 0.9)]);
        let decision = compare(
            "qa",
            &card("qa-v2", &[("accuracy", 0.95), ("latency_p95", 10.0)]),
            Some(&champ),
            &PromotionPolicy::default(),
            0,
        );
        assert_eq!(decision.verdict, Verdict::Reject);
        assert!(decision.failed_rules[0].contains("champion has no latency_p95"));
    }

    #[test]
    fn champion_without_scorecard_skips_relative_rules() {
        let champ = ChampionRecord {
            scorecard: None,
            ..champion(&[])
        };
        let decision = compare(
            "qa",
            &card("qa-v2", &[("accuracy", 0.6)]),
            Some(&champ),
            &PromotionPolicy::default(),
            0,
        );
        assert!(decision.is_promote());
        assert_eq!(decision.champion_id.as_deref(), Some("qa-v1"));
    }

    #[test]
    fn policy_from_toml() {
        let policy: PromotionPolicy = toml::from_str(
            r#"
            require = [
                { rule = "not_worse_than", metric = "f1", epsilon = 0.02 },
            ]
            minimum = [
                { rule = "at_most", metric = "latency_p95", max = 250.0 },
            ]
            "#,
        )
        .unwrap();
        assert_eq!(
            policy.require[0],
            Rule::NotWorseThan {
                metric: "f1".into(),
                epsilon: 0.02
            }
        );
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn relative_minimum_rule_is_invalid() {
        let policy = PromotionPolicy {
            require: vec![],
            minimum: vec![Rule::RatioAtMost {
                metric: "latency_p95".into(),
                ratio: 1.1,
            }],
        };
        assert!(matches!(policy.validate(), Err(EvalError::InvalidPolicy(_))));
        assert!(PromotionPolicy::default().validate().is_ok());
    }

    #[test]
    fn decision_serializes_verdict_snake_case() {
        let decision = compare(
            "qa",
            &card("qa-v1", &[("accuracy", 0.9)]),
            None,
            &PromotionPolicy::default(),
            0,
        );
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["verdict"], "promote");
    }
}
