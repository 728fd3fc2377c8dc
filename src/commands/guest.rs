use axum::http::StatusCode;
use chrono::{DateTime, FixedOffset};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

use super::{blocking, guest_error, CommandResponse};
use crate::catalog::assemble_catalog;
use crate::db::DbState;
use crate::error::PipelineError;
use crate::rooms::{resolve_room_token, Room};
use crate::usage::{ingest_guest_usage_at, GuestUsageLine};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GuestUsagePayload {
    #[serde(default, alias = "room_token", alias = "token")]
    room_token: Option<String>,
    #[serde(default)]
    items: Vec<GuestUsageLine>,
}

fn required_token(token: Option<String>) -> Result<String, PipelineError> {
    token
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| PipelineError::invalid_input("Missing room token"))
}

async fn resolve_room(db: &Arc<DbState>, token: String) -> Result<Room, PipelineError> {
    let db = db.clone();
    blocking(move || resolve_room_token(&db, &token)).await
}

/// `GET /api/guest/minibar?roomToken=`
pub async fn guest_get_catalog(
    db: Arc<DbState>,
    room_token: Option<String>,
    now: DateTime<FixedOffset>,
) -> CommandResponse {
    let result = async {
        let token = required_token(room_token)?;
        let room = resolve_room(&db, token).await?;
        let catalog = assemble_catalog(db, room, now).await?;
        serde_json::to_value(&catalog)
            .map_err(|e| PipelineError::Unexpected(format!("serialize catalog: {e}")))
    }
    .await;

    match result {
        Ok(mut body) => {
            body["success"] = json!(true);
            (StatusCode::OK, body)
        }
        Err(e) => guest_error(&e),
    }
}

/// `POST /api/guest/minibar/usage`
pub async fn guest_submit_usage(
    db: Arc<DbState>,
    body: Value,
    now: DateTime<FixedOffset>,
) -> CommandResponse {
    let result = async {
        let payload: GuestUsagePayload = serde_json::from_value(body).map_err(|e| {
            debug!(error = %e, "guest usage payload did not parse");
            PipelineError::invalid_input("Invalid request body")
        })?;
        let token = required_token(payload.room_token)?;
        let room = resolve_room(&db, token).await?;
        let lines = payload.items;
        blocking(move || ingest_guest_usage_at(&db, &room, &lines, &now)).await
    }
    .await;

    match result {
        Ok(outcome) => (
            StatusCode::OK,
            json!({
                "success": true,
                "inserted": outcome.inserted_count,
                "skipped": outcome.skipped_count,
                "room_number": outcome.room_number,
            }),
        ),
        Err(e) => guest_error(&e),
    }
}
