use std::path::Path;

use anyhow::Context;
use modelgrid_api::{BaselineInfo, BaselineRequest, RetrainResponse};
use modelgrid_core::CanaryState;

use super::{label, Format};
use crate::client::ApiClient;

pub async fn rollback(api: &ApiClient, name: &str, format: Format) -> anyhow::Result<String> {
    let state: CanaryState = api.post(&format!("/services/{name}/rollback")).await?;
    if format == Format::Json {
        return Ok(serde_json::to_string_pretty(&state)?);
    }
    let mut out = format!("{name}: rollout {}", label(&state.stage));
    if let Some(candidate) = &state.candidate_id {
        out.push_str(&format!(" (candidate {candidate})"));
    }
    if let Some(reason) = &state.last_reason {
        out.push_str(&format!(": {reason}"));
    }
    Ok(out)
}

pub async fn retrain(api: &ApiClient, name: &str, format: Format) -> anyhow::Result<String> {
    let resp: RetrainResponse = api.post(&format!("/services/{name}/retrain")).await?;
    if format == Format::Json {
        return Ok(serde_json::to_string_pretty(&resp)?);
    }
    Ok(if resp.started {
        format!("{name}: retrain cycle started")
    } else {
        format!(
            "{name}: a retrain cycle is already running ({})",
            label(&resp.phase)
        )
    })
}

/// Seed the drift baseline from a file with one reference text per line.
pub async fn baseline(
    api: &ApiClient,
    name: &str,
    file: &Path,
    format: Format,
) -> anyhow::Result<String> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let texts: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();
    if texts.is_empty() {
        anyhow::bail!("{} has no reference texts", file.display());
    }
    let req = BaselineRequest { texts };
    let info: BaselineInfo = api
        .post_body(&format!("/services/{name}/baseline"), &req)
        .await?;
    if format == Format::Json {
        return Ok(serde_json::to_string_pretty(&info)?);
    }
    Ok(format!(
        "{name}: baseline installed from {} texts",
        info.sample_count
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::server;

    #[tokio::test]
    async fn rollback_of_idle_service() {
        let s = server().await;
        let out = rollback(&s.api, "qa", Format::Text).await.unwrap();
        assert_eq!(out, "qa: rollout idle");
    }

    #[tokio::test]
    async fn baseline_from_file() {
        let s = server().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reference.txt");
        std::fs::write(&path, "where is my order\n\nrefund please\nchange address\n").unwrap();

        let out = baseline(&s.api, "qa", &path, Format::Text).await.unwrap();
        assert_eq!(out, "qa: baseline installed from 3 texts");
        let qa = s.registry.get("qa").unwrap();
        assert_eq!(qa.drift().baseline().unwrap().sample_count, 3);

        let empty = dir.path().join("empty.txt");
        std::fs::write(&empty, "\n  \n").unwrap();
        let err = baseline(&s.api, "qa", &empty, Format::Text).await.unwrap_err();
        assert!(err.to_string().contains("no reference texts"));

        let missing = dir.path().join("missing.txt");
        assert!(baseline(&s.api, "qa", &missing, Format::Text).await.is_err());
        let err = baseline(&s.api, "nope", &path, Format::Text).await.unwrap_err();
        assert!(err.to_string().contains("unknown service"));
    }

    #[tokio::test]
    async fn retrain_reports_running_cycle() {
        let s = server().await;
        let first = retrain(&s.api, "qa", Format::Text).await.unwrap();
        assert_eq!(first, "qa: retrain cycle started");
        let second = retrain(&s.api, "qa", Format::Text).await.unwrap();
        assert!(second.contains("already running"));
    }
}
