use modelgrid_api::ServiceSummary;
use modelgrid_core::{DriftReport, PromotionDecision};
use serde_json::Value;

use super::{label, table, Format};
use crate::client::ApiClient;

pub async fn services(api: &ApiClient, format: Format) -> anyhow::Result<String> {
    let services: Vec<ServiceSummary> = api.get("/services").await?;
    if format == Format::Json {
        return Ok(serde_json::to_string_pretty(&services)?);
    }
    if services.is_empty() {
        return Ok("no services configured".to_string());
    }
    let rows: Vec<Vec<String>> = services
        .iter()
        .map(|s| {
            vec![
                s.name.clone(),
                s.champion.clone().unwrap_or_else(|| "-".into()),
                format!("{} ({}%)", label(&s.stage), s.traffic_weight),
                label(&s.retrain_phase),
                match s.last_drift_score {
                    Some(score) if s.drift_degraded => format!("{score:.4} (degraded)"),
                    Some(score) => format!("{score:.4}"),
                    None if s.drift_degraded => "- (degraded)".into(),
                    None => "-".into(),
                },
            ]
        })
        .collect();
    Ok(table(&["NAME", "CHAMPION", "ROLLOUT", "RETRAIN", "DRIFT"], &rows))
}

/// Always JSON: the status document is nested.
pub async fn status(api: &ApiClient, name: &str) -> anyhow::Result<String> {
    let status: Value = api.get(&format!("/services/{name}")).await?;
    Ok(serde_json::to_string_pretty(&status)?)
}

pub async fn drift(
    api: &ApiClient,
    name: &str,
    limit: usize,
    format: Format,
) -> anyhow::Result<String> {
    let reports: Vec<DriftReport> = api
        .get(&format!("/services/{name}/drift?limit={limit}"))
        .await?;
    if format == Format::Json {
        return Ok(serde_json::to_string_pretty(&reports)?);
    }
    let rows: Vec<Vec<String>> = reports
        .iter()
        .map(|r| {
            vec![
                r.timestamp.to_string(),
                format!("{:.4}", r.score),
                format!("{:.4}", r.threshold),
                r.sample_count.to_string(),
                if r.exceeded_threshold { "ALERT" } else { "ok" }.to_string(),
            ]
        })
        .collect();
    Ok(table(&["TIMESTAMP", "SCORE", "THRESHOLD", "SAMPLES", ""], &rows))
}

pub async fn decisions(
    api: &ApiClient,
    name: &str,
    limit: usize,
    format: Format,
) -> anyhow::Result<String> {
    let decisions: Vec<PromotionDecision> = api
        .get(&format!("/services/{name}/decisions?limit={limit}"))
        .await?;
    if format == Format::Json {
        return Ok(serde_json::to_string_pretty(&decisions)?);
    }
    let rows: Vec<Vec<String>> = decisions
        .iter()
        .map(|d| {
            vec![
                d.compared_at.to_string(),
                d.candidate_id.clone(),
                d.champion_id.clone().unwrap_or_else(|| "-".into()),
                label(&d.verdict),
                d.reason.clone(),
            ]
        })
        .collect();
    Ok(table(&["TIMESTAMP", "CANDIDATE", "CHAMPION", "VERDICT", "REASON"], &rows))
}
