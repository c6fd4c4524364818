//! Run task payloads, result reports, and the stage pipeline built on them.

pub mod archive;
pub mod client;
pub mod dispatcher;
pub mod plan;

#[cfg(test)]
pub(crate) mod testing;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// `access_token` value sent when the integration is registered.
pub const CAPABILITY_PROBE_TOKEN: &str = "test-token";
pub const VND_API_JSON: &str = "application/vnd.api+json";
pub const ARCHIVE_FILE_NAME: &str = "config.tar.gz";

/// Bearer credential issued for one run. Never printed in full.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    PrePlan,
    PostPlan,
    Other,
}

impl Stage {
    pub fn from_wire(value: &str) -> Self {
        match value {
            "pre_plan" => Stage::PrePlan,
            "post_plan" => Stage::PostPlan,
            _ => Stage::Other,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::PrePlan => "pre_plan",
            Stage::PostPlan => "post_plan",
            Stage::Other => "other",
        })
    }
}

/// Inbound run task event. Every field is optional: the platform's payload
/// is not assumed to be complete, and unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunTaskPayload {
    pub payload_version: Option<u64>,
    pub access_token: Option<AccessToken>,
    pub stage: Option<String>,
    pub is_speculative: Option<bool>,
    pub task_result_id: Option<String>,
    pub task_result_enforcement_level: Option<String>,
    pub task_result_callback_url: Option<String>,
    pub run_app_url: Option<String>,
    pub run_id: Option<String>,
    pub run_message: Option<String>,
    pub run_created_at: Option<String>,
    pub run_created_by: Option<String>,
    pub workspace_id: Option<String>,
    pub workspace_name: Option<String>,
    pub workspace_app_url: Option<String>,
    pub workspace_working_directory: Option<String>,
    pub organization_name: Option<String>,
    pub vcs_repo_url: Option<String>,
    pub vcs_branch: Option<String>,
    pub vcs_commit_url: Option<String>,
    pub configuration_version_id: Option<String>,
    pub configuration_version_download_url: Option<String>,
    pub plan_json_api_url: Option<String>,
}

impl RunTaskPayload {
    pub fn is_capability_probe(&self) -> bool {
        self.access_token
            .as_ref()
            .is_some_and(|t| t.expose() == CAPABILITY_PROBE_TOKEN)
    }

    pub fn stage(&self) -> Stage {
        self.stage.as_deref().map(Stage::from_wire).unwrap_or(Stage::Other)
    }

    pub fn stage_label(&self) -> &str {
        self.stage.as_deref().unwrap_or("-")
    }

    pub fn run_label(&self) -> &str {
        self.run_id.as_deref().unwrap_or("-")
    }

    pub fn organization_label(&self) -> &str {
        self.organization_name.as_deref().unwrap_or("-")
    }

    pub fn workspace_label(&self) -> &str {
        self.workspace_name
            .as_deref()
            .or(self.workspace_id.as_deref())
            .unwrap_or("-")
    }
}

/// Where the configuration archive for a run is written.
///
/// Runs with a usable id get their own subdirectory; anything else falls back
/// to the shared file directly under `download_dir`.
pub fn archive_path(download_dir: &Path, run_id: Option<&str>) -> PathBuf {
    let run_dir = run_id
        .map(str::trim)
        .filter(|id| {
            !id.is_empty()
                && id
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        });
    match run_dir {
        Some(id) => download_dir.join(id).join(ARCHIVE_FILE_NAME),
        None => download_dir.join(ARCHIVE_FILE_NAME),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Passed,
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TaskStatus::Passed => "passed",
            TaskStatus::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskResult {
    pub status: TaskStatus,
    pub message: String,
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct TaskResultEnvelope<'a> {
    data: TaskResultData<'a>,
}

#[derive(Debug, Serialize)]
struct TaskResultData<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    attributes: &'a TaskResult,
}

impl TaskResult {
    pub fn new(status: TaskStatus, message: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            url: url.into(),
        }
    }

    /// JSON:API document sent as the callback body.
    pub fn envelope(&self) -> TaskResultEnvelope<'_> {
        TaskResultEnvelope {
            data: TaskResultData {
                kind: "task-results",
                attributes: self,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pre_plan_payload() {
        let body = r#"{"access_token":"tok","stage":"pre_plan","configuration_version_download_url":"https://x/cfg","organization_name":"acme","workspace_name":"prod","run_id":"run-1","task_result_callback_url":"https://x/cb","payload_version":1,"is_speculative":false}"#;
        let payload: RunTaskPayload = serde_json::from_str(body).unwrap();

        assert_eq!(payload.stage(), Stage::PrePlan);
        assert!(!payload.is_capability_probe());
        assert_eq!(payload.run_label(), "run-1");
        assert_eq!(payload.workspace_label(), "prod");
        assert_eq!(
            payload.configuration_version_download_url.as_deref(),
            Some("https://x/cfg")
        );
        assert_eq!(payload.access_token.unwrap().expose(), "tok");
    }

    #[test]
    fn sparse_payload_parses() {
        let payload: RunTaskPayload = serde_json::from_str(r#"{"extra":{"nested":true}}"#).unwrap();
        assert_eq!(payload.stage(), Stage::Other);
        assert_eq!(payload.stage_label(), "-");
        assert!(!payload.is_capability_probe());
    }

    #[test]
    fn unknown_stage_maps_to_other() {
        let payload: RunTaskPayload =
            serde_json::from_str(r#"{"stage":"unknown_stage"}"#).unwrap();
        assert_eq!(payload.stage(), Stage::Other);
        assert_eq!(payload.stage_label(), "unknown_stage");
    }

    #[test]
    fn probe_token_is_detected() {
        let payload: RunTaskPayload =
            serde_json::from_str(r#"{"access_token":"test-token","stage":"post_plan"}"#).unwrap();
        assert!(payload.is_capability_probe());
    }

    #[test]
    fn access_token_debug_is_redacted() {
        let token = AccessToken::new("super-secret");
        assert_eq!(format!("{token:?}"), "AccessToken(***)");
    }

    #[test]
    fn envelope_has_fixed_shape() {
        let result = TaskResult::new(
            TaskStatus::Passed,
            "Hello World",
            "http://example.com/runtask/QxZyl",
        );
        assert_eq!(
            serde_json::to_string(&result.envelope()).unwrap(),
            r#"{"data":{"type":"task-results","attributes":{"status":"passed","message":"Hello World","url":"http://example.com/runtask/QxZyl"}}}"#
        );
    }

    #[test]
    fn archive_path_is_namespaced_by_run() {
        let dir = Path::new("/srv/archives");
        assert_eq!(
            archive_path(dir, Some("run-abc_1")),
            PathBuf::from("/srv/archives/run-abc_1/config.tar.gz")
        );
        assert_eq!(
            archive_path(dir, None),
            PathBuf::from("/srv/archives/config.tar.gz")
        );
    }

    #[test]
    fn archive_path_rejects_traversal() {
        let dir = Path::new("/srv/archives");
        assert_eq!(
            archive_path(dir, Some("../etc")),
            PathBuf::from("/srv/archives/config.tar.gz")
        );
        assert_eq!(
            archive_path(dir, Some("")),
            PathBuf::from("/srv/archives/config.tar.gz")
        );
    }
}
