use axum::http::StatusCode;
use chrono::{DateTime, FixedOffset};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

use super::{internal_error, CommandResponse};
use crate::audit::{list_sync_attempts, SyncAuditLog, SyncType};
use crate::db::{run_blocking, DbState};
use crate::error::PipelineError;
use crate::pms::PmsClient;
use crate::pms_sync::{
    MinibarSyncReport, MinibarSyncRequest, PmsSyncExecutor, RoomStatusSyncRequest,
};
use crate::value_str;

const DEFAULT_SYNC_LOG_LIMIT: i64 = 50;

/// Parse a PMS request body. A body that does not fit the request shape is
/// still audited, with whatever hotel id can be recovered from the raw JSON.
fn parse_or_audit<T, C, A>(
    executor: &PmsSyncExecutor<C, A>,
    sync_type: SyncType,
    body: Value,
    initiated_by: Option<&str>,
) -> Result<T, CommandResponse>
where
    T: serde::de::DeserializeOwned,
    C: PmsClient,
    A: SyncAuditLog,
{
    match serde_json::from_value::<T>(body.clone()) {
        Ok(request) => Ok(request),
        Err(e) => {
            let err = PipelineError::invalid_input(format!("Invalid request body: {e}"));
            let hotel_id = value_str(&body, &["hotelId", "hotel_id"]);
            warn!(
                sync_type = sync_type.as_str(),
                hotel_id = ?hotel_id,
                error = %e,
                "PMS sync request did not parse"
            );
            executor.record_rejected(
                sync_type,
                hotel_id.as_deref(),
                body,
                &err.to_string(),
                initiated_by,
            );
            Err(internal_error(&err))
        }
    }
}

fn minibar_response(result: Result<MinibarSyncReport, PipelineError>) -> CommandResponse {
    match result {
        Ok(report) => {
            let status = if report.success {
                StatusCode::OK
            } else {
                StatusCode::BAD_GATEWAY
            };
            (
                status,
                json!({
                    "success": report.success,
                    "status": report.status,
                    "message": report.message,
                    "results": report.results,
                }),
            )
        }
        Err(e) => internal_error(&e),
    }
}

/// `POST /api/pms/minibar`
pub async fn pms_sync_minibar<C: PmsClient, A: SyncAuditLog>(
    executor: &PmsSyncExecutor<C, A>,
    body: Value,
    initiated_by: Option<&str>,
) -> CommandResponse {
    let request: MinibarSyncRequest =
        match parse_or_audit(executor, SyncType::Minibar, body, initiated_by) {
            Ok(request) => request,
            Err(response) => return response,
        };
    minibar_response(executor.sync_minibar(&request, initiated_by).await)
}

/// `POST /api/pms/rooms/{room_id}/minibar`
pub async fn pms_push_room_usage<C: PmsClient, A: SyncAuditLog>(
    executor: &PmsSyncExecutor<C, A>,
    room_id: &str,
    now: DateTime<FixedOffset>,
    initiated_by: Option<&str>,
) -> CommandResponse {
    minibar_response(executor.push_room_usage(room_id, now, initiated_by).await)
}

/// `POST /api/pms/room-status`
pub async fn pms_sync_room_status<C: PmsClient, A: SyncAuditLog>(
    executor: &PmsSyncExecutor<C, A>,
    body: Value,
    initiated_by: Option<&str>,
) -> CommandResponse {
    let request: RoomStatusSyncRequest =
        match parse_or_audit(executor, SyncType::StatusUpdate, body, initiated_by) {
            Ok(request) => request,
            Err(response) => return response,
        };

    match executor.sync_room_status(&request, initiated_by).await {
        Ok(report) => {
            let status = if report.success {
                StatusCode::OK
            } else {
                StatusCode::BAD_GATEWAY
            };
            (
                status,
                json!({
                    "success": report.success,
                    "status": report.status,
                    "message": report.message,
                    "data": report.data,
                }),
            )
        }
        Err(e) => internal_error(&e),
    }
}

/// `GET /api/pms/sync-log?hotelId=&limit=`
pub async fn pms_sync_log(
    db: Arc<DbState>,
    hotel_id: Option<String>,
    limit: Option<i64>,
) -> CommandResponse {
    let hotel_id = hotel_id
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty());
    let limit = limit.unwrap_or(DEFAULT_SYNC_LOG_LIMIT);

    match run_blocking(db, move |conn| {
        list_sync_attempts(conn, hotel_id.as_deref(), limit)
    })
    .await
    {
        Ok(attempts) => (
            StatusCode::OK,
            json!({ "success": true, "count": attempts.len(), "attempts": attempts }),
        ),
        Err(e) => internal_error(&e),
    }
}
