//! Scorecard computation.
//!
//! The model is queried once per held-out example, in dataset order, so a
//! deterministic model and a fixed dataset always yield the same scorecard.

use std::collections::{BTreeMap, BTreeSet};

use modelgrid_core::{Dataset, ModelHandle, ModelScorecard};
use tracing::debug;

use crate::error::{EvalError, EvalResult};

pub const ACCURACY: &str = "accuracy";
pub const PRECISION: &str = "precision";
pub const RECALL: &str = "recall";
pub const F1: &str = "f1";
pub const LATENCY_P95: &str = "latency_p95";

/// Score `model` on `dataset`.
pub async fn evaluate(
    model: &dyn ModelHandle,
    dataset: &Dataset,
    computed_at: u64,
) -> EvalResult<ModelScorecard> {
    if dataset.is_empty() {
        return Err(EvalError::EmptyDataset);
    }

    let mut pairs = Vec::with_capacity(dataset.len());
    let mut latencies = Vec::with_capacity(dataset.len());
    for example in &dataset.examples {
        let prediction = model
            .predict(&example.text)
            .await
            .map_err(|e| EvalError::Prediction {
                model: model.id().to_string(),
                reason: e.to_string(),
            })?;
        pairs.push((example.label, prediction.label));
        latencies.push(prediction.latency_ms);
    }

    let mut metrics = classification_metrics(&pairs);
    metrics.insert(LATENCY_P95.to_string(), percentile(&latencies, 0.95));

    debug!(
        model = model.id(),
        samples = dataset.len(),
        accuracy = metrics.get(ACCURACY).copied().unwrap_or_default(),
        "model evaluated"
    );

    Ok(ModelScorecard {
        model_id: model.id().to_string(),
        metrics,
        computed_at,
        sample_count: dataset.len(),
    })
}

/// Accuracy plus macro-averaged precision, recall and F1 over every label
/// seen either as ground truth or as a prediction.
pub fn classification_metrics(pairs: &[(u32, u32)]) -> BTreeMap<String, f64> {
    let mut metrics = BTreeMap::new();
    if pairs.is_empty() {
        return metrics;
    }

    let correct = pairs.iter().filter(|(truth, pred)| truth == pred).count();
    metrics.insert(ACCURACY.to_string(), correct as f64 / pairs.len() as f64);

    let labels: BTreeSet<u32> = pairs.iter().flat_map(|&(t, p)| [t, p]).collect();
    let (mut precision_sum, mut recall_sum, mut f1_sum) = (0.0, 0.0, 0.0);
    for &label in &labels {
        let tp = pairs.iter().filter(|&&(t, p)| t == label && p == label).count() as f64;
        let fp = pairs.iter().filter(|&&(t, p)| t != label && p == label).count() as f64;
        let fn_ = pairs.iter().filter(|&&(t, p)| t == label && p != label).count() as f64;

        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        precision_sum += precision;
        recall_sum += recall;
        f1_sum += ratio(2.0 * precision * recall, precision + recall);
    }

    let n = labels.len() as f64;
    metrics.insert(PRECISION.to_string(), precision_sum / n);
    metrics.insert(RECALL.to_string(), recall_sum / n);
    metrics.insert(F1.to_string(), f1_sum / n);
    metrics
}

/// Nearest-rank percentile; 0 for an empty slice.
pub fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let rank = (q * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

fn ratio(num: f64, den: f64) -> f64 {
    if den == 0.0 { 0.0 } else { num / den }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelgrid_core::testing::{labelled, FakeModel};
    use modelgrid_core::{BoxFuture, CollabResult, CollaboratorError, Prediction};

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn perfect_predictions() {
        let m = classification_metrics(&[(0, 0), (1, 1), (2, 2), (1, 1)]);
        for name in [ACCURACY, PRECISION, RECALL, F1] {
            assert!(close(m[name], 1.0), "{name} = {}", m[name]);
        }
    }

    #[test]
    fn macro_averages_over_labels() {
        // label 0: tp=1 fp=1 fn=1; label 1: tp=1 fp=1 fn=1
        let m = classification_metrics(&[(0, 0), (0, 1), (1, 1), (1, 0)]);
        assert!(close(m[ACCURACY], 0.5));
        assert!(close(m[PRECISION], 0.5));
        assert!(close(m[RECALL], 0.5));
        assert!(close(m[F1], 0.5));
    }

    #[test]
    fn label_only_predicted_counts_against_precision() {
        // Label 2 is never true, so its precision and recall are 0.
        let m = classification_metrics(&[(0, 0), (1, 2)]);
        assert!(close(m[ACCURACY], 0.5));
        assert!(close(m[PRECISION], 1.0 / 3.0));
        assert!(close(m[RECALL], 1.0 / 3.0));
    }

    #[test]
    fn nearest_rank_p95() {
        let values: Vec<f64> = (1..=100).map(f64::from).collect();
        assert_eq!(percentile(&values, 0.95), 95.0);
        assert_eq!(percentile(&[7.0], 0.95), 7.0);
        assert_eq!(percentile(&[3.0, 1.0, 2.0], 0.95), 3.0);
        assert_eq!(percentile(&[], 0.95), 0.0);
    }

    #[tokio::test]
    async fn evaluate_builds_scorecard() {
        let dataset = Dataset::new(labelled("x", 10));
        let model = FakeModel::perfect("m1", &dataset, 12.5);
        let card = evaluate(&model, &dataset, 99).await.unwrap();
        assert_eq!(card.model_id, "m1");
        assert_eq!(card.sample_count, 10);
        assert_eq!(card.computed_at, 99);
        assert!(close(card.metric(ACCURACY).unwrap(), 1.0));
        assert!(close(card.metric(LATENCY_P95).unwrap(), 12.5));
    }

    #[tokio::test]
    async fn single_miss_costs_one_example() {
        let dataset = Dataset::new(labelled("x", 10));
        // x-3 is truly label 1.
        let model = FakeModel::perfect("m2", &dataset, 8.0).with_label("x-3", 0);
        let card = evaluate(&model, &dataset, 1).await.unwrap();
        assert!(close(card.metric(ACCURACY).unwrap(), 0.9));
        assert!(card.metric(RECALL).unwrap() < 1.0);
    }

    #[tokio::test]
    async fn evaluate_is_deterministic() {
        let dataset = Dataset::new(labelled("x", 20));
        // Always predicts 0, so half the alternating labels are wrong.
        let model = FakeModel::new("m0", 0, 5.0);
        let a = evaluate(&model, &dataset, 1).await.unwrap();
        let b = evaluate(&model, &dataset, 1).await.unwrap();
        assert_eq!(a, b);
        assert!(close(a.metric(ACCURACY).unwrap(), 0.5));
    }

    #[tokio::test]
    async fn empty_dataset_is_rejected() {
        let model = FakeModel::new("m0", 0, 5.0);
        let err = evaluate(&model, &Dataset::default(), 0).await.unwrap_err();
        assert!(matches!(err, EvalError::EmptyDataset));
    }

    struct BrokenModel;

    impl ModelHandle for BrokenModel {
        fn id(&self) -> &str {
            "broken"
        }

        fn predict<'a>(&'a self, _text: &'a str) -> BoxFuture<'a, CollabResult<Prediction>> {
            Box::pin(async { Err(CollaboratorError::PredictionFailed("oom".into())) })
        }
    }

    #[tokio::test]
    async fn prediction_failure_is_reported() {
        let dataset = Dataset::new(labelled("x", 3));
        let err = evaluate(&BrokenModel, &dataset, 0).await.unwrap_err();
        assert!(matches!(err, EvalError::Prediction { ref model, .. } if model == "broken"));
    }
}
