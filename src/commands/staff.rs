use axum::http::StatusCode;
use chrono::{DateTime, FixedOffset};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{blocking, internal_error, CommandResponse};
use crate::db::DbState;
use crate::error::PipelineError;
use crate::usage::record_staff_usage_at;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StaffUsagePayload {
    #[serde(alias = "minibar_item_id", alias = "item_id")]
    minibar_item_id: String,
    quantity: i64,
}

/// `POST /api/staff/rooms/{room_id}/minibar/usage`
pub async fn staff_record_usage(
    db: Arc<DbState>,
    room_id: String,
    body: Value,
    staff_id: Option<String>,
    now: DateTime<FixedOffset>,
) -> CommandResponse {
    let result = async {
        let staff_id = staff_id
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| PipelineError::invalid_input("Missing staff identity"))?;
        let payload: StaffUsagePayload = serde_json::from_value(body)
            .map_err(|e| PipelineError::invalid_input(format!("Invalid request body: {e}")))?;
        blocking(move || {
            record_staff_usage_at(
                &db,
                &room_id,
                &payload.minibar_item_id,
                payload.quantity,
                &staff_id,
                &now,
            )
        })
        .await
    }
    .await;

    match result {
        Ok(outcome) => (
            StatusCode::OK,
            json!({ "success": true, "outcome": outcome }),
        ),
        Err(e) => internal_error(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_test_db;
    use crate::test_fixtures::{count_usage_rows, seed_hotel};
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_staff_entry_then_correction() {
        let db = Arc::new(open_test_db());
        seed_hotel(&db);
        let now = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2026, 10, 17, 9, 0, 0)
            .unwrap();
        let body = json!({ "minibarItemId": "I2", "quantity": 1 });

        let (status, first) =
            staff_record_usage(db.clone(), "r1".into(), body, Some("staff-4".into()), now).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["outcome"], "inserted");

        let (_, second) = staff_record_usage(
            db.clone(),
            "r1".into(),
            json!({ "minibar_item_id": "I2", "quantity": 3 }),
            Some("staff-4".into()),
            now,
        )
        .await;
        assert_eq!(second["outcome"], "corrected");
        assert_eq!(count_usage_rows(&db, "r1"), 1);
    }

    #[tokio::test]
    async fn test_staff_entry_requires_identity() {
        let db = Arc::new(open_test_db());
        seed_hotel(&db);
        let now = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2026, 10, 17, 9, 0, 0)
            .unwrap();

        let (status, _) = staff_record_usage(
            db,
            "r1".into(),
            json!({ "minibar_item_id": "I2", "quantity": 1 }),
            None,
            now,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
