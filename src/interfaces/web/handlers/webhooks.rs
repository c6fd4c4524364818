use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
};
use bytes::Bytes;
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use super::super::AppState;
use crate::core::runtask::RunTaskPayload;
use crate::core::runtask::dispatcher::spawn_dispatch;
use crate::core::signature::{SIGNATURE_HEADER, SignatureError, verify_signature};

// === Incoming Run Task Endpoint ===

/// Verifies the request signature over the raw body, acknowledges, and hands
/// the payload to the dispatcher in the background.
pub async fn receive_run_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let span = info_span!("run_task", request_id = %Uuid::new_v4());
    span.in_scope(|| accept(&state, &headers, &body))
}

fn accept(state: &AppState, headers: &HeaderMap, body: &[u8]) -> StatusCode {
    let provided = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    if let Err(err) = verify_signature(state.hmac_key.as_bytes(), body, provided) {
        match &err {
            SignatureError::Mismatch { expected, received } => warn!(
                %expected,
                %received,
                "rejecting run task request: signature mismatch"
            ),
            other => warn!(error = %other, "rejecting run task request"),
        }
        return StatusCode::UNAUTHORIZED;
    }

    let payload: RunTaskPayload = match serde_json::from_slice(body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "signed body is not a run task payload; acknowledging without dispatch");
            return StatusCode::OK;
        }
    };

    info!(
        stage = payload.stage_label(),
        run_id = payload.run_label(),
        organization = payload.organization_label(),
        workspace = payload.workspace_label(),
        "run task request verified"
    );
    debug!(
        payload_version = ?payload.payload_version,
        speculative = ?payload.is_speculative,
        task_result_id = ?payload.task_result_id,
        enforcement_level = ?payload.task_result_enforcement_level,
        run_url = ?payload.run_app_url,
        run_message = ?payload.run_message,
        created_at = ?payload.run_created_at,
        created_by = ?payload.run_created_by,
        workspace_url = ?payload.workspace_app_url,
        working_directory = ?payload.workspace_working_directory,
        vcs_repo = ?payload.vcs_repo_url,
        vcs_branch = ?payload.vcs_branch,
        vcs_commit = ?payload.vcs_commit_url,
        configuration_version = ?payload.configuration_version_id,
        "run task details"
    );

    // Fire and forget: the platform only learns the outcome via the callback.
    spawn_dispatch(state.dispatcher.clone(), payload);
    StatusCode::OK
}
