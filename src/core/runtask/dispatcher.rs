use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::archive::inspect_archive_blocking;
use super::client::RunTaskPlatform;
use super::plan::PlanSummary;
use super::{AccessToken, RunTaskPayload, Stage, TaskResult, TaskStatus, archive_path};
use crate::core::config::ReceiverConfig;

/// What a stage produced before the result was reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageArtifact {
    Configuration { path: PathBuf, bytes: u64 },
    Plan(PlanSummary),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Registration probe; the acknowledgment alone answers it.
    CapabilityProbe,
    Ignored {
        stage: String,
    },
    Reported {
        stage: Stage,
        status: TaskStatus,
        delivered: bool,
        artifact: StageArtifact,
    },
}

/// Post-acknowledgment handling of a verified run task payload.
#[async_trait]
pub trait RunTaskDispatcher: Send + Sync {
    async fn dispatch(&self, payload: RunTaskPayload) -> Result<DispatchOutcome>;
}

pub struct StageDispatcher {
    platform: Arc<dyn RunTaskPlatform>,
    download_dir: PathBuf,
    result_message: String,
    result_url: String,
}

impl StageDispatcher {
    pub fn new(platform: Arc<dyn RunTaskPlatform>, config: &ReceiverConfig) -> Self {
        Self {
            platform,
            download_dir: config.download_dir.clone(),
            result_message: config.result_message.clone(),
            result_url: config.result_url.clone(),
        }
    }

    async fn run_pre_plan(
        &self,
        payload: &RunTaskPayload,
        token: &AccessToken,
    ) -> Result<StageArtifact> {
        let url = required(
            &payload.configuration_version_download_url,
            "configuration_version_download_url",
        )?;
        let dest = archive_path(&self.download_dir, payload.run_id.as_deref());

        let bytes = self
            .platform
            .download_configuration(url, token, &dest)
            .await
            .context("configuration download failed")?;

        info!(
            organization = payload.organization_label(),
            workspace = payload.workspace_label(),
            run_id = payload.run_label(),
            path = %dest.display(),
            bytes,
            "configuration version saved"
        );

        match inspect_archive_blocking(dest.clone()).await {
            Ok(summary) => info!(
                entries = summary.entries,
                unpacked_bytes = summary.unpacked_bytes,
                "configuration archive contents"
            ),
            Err(err) => warn!(error = %format!("{err:#}"), "could not inspect configuration archive"),
        }

        Ok(StageArtifact::Configuration { path: dest, bytes })
    }

    async fn run_post_plan(
        &self,
        payload: &RunTaskPayload,
        token: &AccessToken,
    ) -> Result<StageArtifact> {
        let url = required(&payload.plan_json_api_url, "plan_json_api_url")?;

        let plan = self
            .platform
            .fetch_plan(url, token)
            .await
            .context("plan download failed")?;

        let summary = PlanSummary::from_plan(&plan);
        info!(
            run_id = payload.run_label(),
            format_version = summary.format_version.as_deref().unwrap_or("-"),
            terraform_version = summary.terraform_version.as_deref().unwrap_or("-"),
            create = summary.create,
            update = summary.update,
            delete = summary.delete,
            replace = summary.replace,
            read = summary.read,
            no_op = summary.no_op,
            total_changes = summary.total_changes(),
            "plan retrieved"
        );
        debug!(plan = %plan, "plan document");

        Ok(StageArtifact::Plan(summary))
    }

    /// Best effort: a failed delivery is logged and reported back as `false`.
    async fn report(&self, url: &str, token: &AccessToken, result: &TaskResult) -> bool {
        match self.platform.send_task_result(url, token, result).await {
            Ok(()) => {
                info!(status = %result.status, "task result delivered");
                true
            }
            Err(err) => {
                warn!(status = %result.status, error = %err, "task result delivery failed");
                false
            }
        }
    }
}

fn required<'a>(value: &'a Option<String>, field: &str) -> Result<&'a str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| anyhow!("payload is missing {field}"))
}

#[async_trait]
impl RunTaskDispatcher for StageDispatcher {
    async fn dispatch(&self, payload: RunTaskPayload) -> Result<DispatchOutcome> {
        if payload.is_capability_probe() {
            info!("capability probe acknowledged");
            return Ok(DispatchOutcome::CapabilityProbe);
        }

        let stage = payload.stage();
        if stage == Stage::Other {
            info!(stage = payload.stage_label(), "ignoring unsupported stage");
            return Ok(DispatchOutcome::Ignored {
                stage: payload.stage_label().to_string(),
            });
        }

        let token = payload
            .access_token
            .as_ref()
            .ok_or_else(|| anyhow!("payload is missing access_token"))?;
        let callback_url = required(&payload.task_result_callback_url, "task_result_callback_url")?;

        let work = if stage == Stage::PrePlan {
            self.run_pre_plan(&payload, token).await
        } else {
            self.run_post_plan(&payload, token).await
        };

        match work {
            Ok(artifact) => {
                let result = TaskResult::new(
                    TaskStatus::Passed,
                    self.result_message.clone(),
                    self.result_url.clone(),
                );
                let delivered = self.report(callback_url, token, &result).await;
                Ok(DispatchOutcome::Reported {
                    stage,
                    status: TaskStatus::Passed,
                    delivered,
                    artifact,
                })
            }
            Err(err) => {
                let result = TaskResult::new(
                    TaskStatus::Failed,
                    format!("{stage} processing failed: {err:#}"),
                    self.result_url.clone(),
                );
                self.report(callback_url, token, &result).await;
                Err(err.context(format!("{stage} stage failed")))
            }
        }
    }
}

/// Runs `dispatch` as a detached task and logs its result. The caller has
/// already been answered, so nothing is propagated back.
pub fn spawn_dispatch(
    dispatcher: Arc<dyn RunTaskDispatcher>,
    payload: RunTaskPayload,
) -> JoinHandle<()> {
    let span = info_span!(
        "dispatch",
        run_id = payload.run_label(),
        stage = payload.stage_label()
    );
    tokio::spawn(
        async move {
            match dispatcher.dispatch(payload).await {
                Ok(outcome) => info!(?outcome, "run task processed"),
                Err(err) => error!(error = %format!("{err:#}"), "run task processing failed"),
            }
        }
        .instrument(span),
    )
}
