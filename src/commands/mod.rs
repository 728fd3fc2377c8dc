//! Request handlers behind the HTTP routes.
//!
//! Each command takes already-extracted inputs (raw JSON body, query values,
//! caller identity) and returns a status code plus JSON body, so the pipeline
//! can be driven without a running server.

pub mod guest;
pub mod pms;
pub mod staff;

use axum::http::StatusCode;
use serde_json::{json, Value};
use tracing::{error, info};

use crate::error::PipelineError;

pub type CommandResponse = (StatusCode, Value);

/// Response for a failed guest-facing call. Detail stays in the logs.
pub(crate) fn guest_error(err: &PipelineError) -> CommandResponse {
    let status = err.status_code();
    if status.is_server_error() {
        error!(error = %err, "guest request failed");
    } else {
        info!(error = %err, "guest request rejected");
    }
    (
        status,
        json!({ "success": false, "error": err.guest_message() }),
    )
}

/// Response for a failed internal (staff or scheduler) call, with detail.
pub(crate) fn internal_error(err: &PipelineError) -> CommandResponse {
    let status = err.status_code();
    if status.is_server_error() {
        error!(error = %err, "internal request failed");
    } else {
        info!(error = %err, "internal request rejected");
    }
    (status, json!({ "success": false, "error": err.to_string() }))
}

/// Run a blocking pipeline call off the async workers.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, PipelineError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, PipelineError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PipelineError::Unexpected(format!("blocking task failed: {e}")))?
}
