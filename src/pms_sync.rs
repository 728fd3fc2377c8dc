//! PMS sync executor.
//!
//! Pushes minibar consumption and room status changes to the external PMS.
//! Minibar items go out one call at a time, in order: the PMS interface is
//! per-item and rate-sensitive, and sequential calls keep error attribution
//! unambiguous. A failing item never aborts its siblings. Each call runs
//! under its own timeout, and a timeout is just another per-item error.
//!
//! Every attempt, including ones rejected before any remote call, is appended
//! to the sync audit log.

use chrono::{DateTime, FixedOffset, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::audit::{record_best_effort, SyncAttempt, SyncAuditLog, SyncStatus, SyncType};
use crate::db::DbState;
use crate::error::PipelineError;
use crate::pms::{
    resolve_credentials, MinibarChargeRequest, PmsAck, PmsClient, PmsCredentials, PmsRoomStatus,
    RoomStatusRequest,
};
use crate::rooms::get_room_by_id;
use crate::usage::{format_timestamp, DayWindow};

/// Default bound for a single outbound PMS call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(15);

// ---------------------------------------------------------------------------
// Room status vocabulary
// ---------------------------------------------------------------------------

/// Internal housekeeping status of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Clean,
    Dirty,
    InProgress,
    Maintenance,
    OutOfOrder,
}

impl RoomStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "clean" => Some(RoomStatus::Clean),
            "dirty" => Some(RoomStatus::Dirty),
            "in_progress" => Some(RoomStatus::InProgress),
            "maintenance" => Some(RoomStatus::Maintenance),
            "out_of_order" => Some(RoomStatus::OutOfOrder),
            _ => None,
        }
    }
}

/// Map an internal status string to the PMS vocabulary.
///
/// Only a room known to be clean is reported clean. Everything else,
/// including statuses we do not recognise, is reported dirty.
pub fn map_room_status(raw: &str) -> PmsRoomStatus {
    match RoomStatus::parse(raw) {
        Some(RoomStatus::Clean) => PmsRoomStatus::Clean,
        Some(RoomStatus::Dirty) | Some(RoomStatus::InProgress) => PmsRoomStatus::Dirty,
        Some(_) => PmsRoomStatus::Dirty,
        None => {
            warn!(status = %raw, "unknown room status, reporting dirty to PMS");
            PmsRoomStatus::Dirty
        }
    }
}

// ---------------------------------------------------------------------------
// Requests and results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinibarSyncItem {
    #[serde(alias = "itemName", alias = "name")]
    pub item_name: String,
    pub quantity: i64,
    #[serde(default, alias = "unit_price", alias = "unitPrice")]
    pub price: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinibarSyncRequest {
    #[serde(alias = "hotel_id")]
    pub hotel_id: String,
    #[serde(alias = "room_number")]
    pub room_number: String,
    pub items: Vec<MinibarSyncItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStatusSyncRequest {
    #[serde(alias = "hotel_id")]
    pub hotel_id: String,
    #[serde(alias = "room_number")]
    pub room_number: String,
    pub status: String,
    #[serde(default, alias = "assignment_id")]
    pub assignment_id: Option<String>,
}

/// Outcome of pushing one minibar item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Updated,
    Failed(String),
}

/// Aggregate of a minibar push, built by folding item outcomes in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MinibarSyncResults {
    pub total: usize,
    pub updated: usize,
    pub errors: Vec<String>,
}

impl MinibarSyncResults {
    pub fn from_outcomes(outcomes: impl IntoIterator<Item = ItemOutcome>) -> Self {
        outcomes
            .into_iter()
            .fold(MinibarSyncResults::default(), MinibarSyncResults::with)
    }

    fn with(self, outcome: ItemOutcome) -> Self {
        match outcome {
            ItemOutcome::Updated => MinibarSyncResults {
                total: self.total + 1,
                updated: self.updated + 1,
                errors: self.errors,
            },
            ItemOutcome::Failed(message) => {
                let mut errors = self.errors;
                errors.push(message);
                MinibarSyncResults {
                    total: self.total + 1,
                    updated: self.updated,
                    errors,
                }
            }
        }
    }

    pub fn status(&self) -> SyncStatus {
        if self.errors.is_empty() {
            SyncStatus::Success
        } else if self.updated > 0 {
            SyncStatus::Partial
        } else {
            SyncStatus::Failed
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MinibarSyncReport {
    /// True when the PMS accepted at least one item. `status` carries the
    /// precise outcome.
    pub success: bool,
    pub status: SyncStatus,
    pub message: String,
    pub results: MinibarSyncResults,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomStatusSyncReport {
    pub success: bool,
    pub status: SyncStatus,
    pub message: String,
    pub data: Value,
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

pub struct PmsSyncExecutor<C, A> {
    db: Arc<DbState>,
    client: C,
    audit: A,
    call_timeout: Duration,
}

impl<C: PmsClient, A: SyncAuditLog> PmsSyncExecutor<C, A> {
    pub fn new(db: Arc<DbState>, client: C, audit: A) -> Self {
        PmsSyncExecutor {
            db,
            client,
            audit,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn db(&self) -> &Arc<DbState> {
        &self.db
    }

    /// Record an attempt that failed before the executor could run, e.g. a
    /// request body that did not parse.
    pub fn record_rejected(
        &self,
        sync_type: SyncType,
        hotel_id: Option<&str>,
        payload: Value,
        error: &str,
        initiated_by: Option<&str>,
    ) {
        let attempt = SyncAttempt::new(
            sync_type,
            hotel_id,
            payload,
            vec![error.to_string()],
            SyncStatus::Failed,
            initiated_by,
        );
        record_best_effort(&self.audit, &attempt);
    }

    fn credentials_for(&self, hotel_id: &str) -> Result<PmsCredentials, PipelineError> {
        let conn = self
            .db
            .conn
            .lock()
            .map_err(|e| PipelineError::Storage(format!("db lock poisoned: {e}")))?;
        resolve_credentials(&conn, hotel_id)
    }

    async fn call_with_timeout<F>(&self, call: F) -> Result<PmsAck, String>
    where
        F: Future<Output = Result<PmsAck, String>>,
    {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(format!(
                "PMS call timed out after {} ms",
                self.call_timeout.as_millis()
            )),
        }
    }

    // -- minibar ------------------------------------------------------------

    /// Push minibar consumption for one room, item by item.
    pub async fn sync_minibar(
        &self,
        request: &MinibarSyncRequest,
        initiated_by: Option<&str>,
    ) -> Result<MinibarSyncReport, PipelineError> {
        let payload = minibar_payload_summary(request);

        let results = match self.run_minibar(request).await {
            Ok(results) => results,
            Err(e) => {
                warn!(hotel_id = %request.hotel_id, error = %e, "PMS minibar sync rejected");
                self.record_rejected(
                    SyncType::Minibar,
                    Some(&request.hotel_id),
                    payload,
                    &e.to_string(),
                    initiated_by,
                );
                return Err(e);
            }
        };

        let status = results.status();
        let attempt = SyncAttempt::new(
            SyncType::Minibar,
            Some(&request.hotel_id),
            payload,
            results.errors.clone(),
            status,
            initiated_by,
        );
        record_best_effort(&self.audit, &attempt);

        info!(
            hotel_id = %request.hotel_id,
            room_number = %request.room_number,
            total = results.total,
            updated = results.updated,
            failed = results.errors.len(),
            status = status.as_str(),
            "PMS minibar sync finished"
        );

        Ok(MinibarSyncReport {
            success: results.updated > 0 || status == SyncStatus::Success,
            status,
            message: format!(
                "Synced {} of {} minibar items to PMS",
                results.updated, results.total
            ),
            results,
        })
    }

    async fn run_minibar(
        &self,
        request: &MinibarSyncRequest,
    ) -> Result<MinibarSyncResults, PipelineError> {
        if request.hotel_id.trim().is_empty() {
            return Err(PipelineError::invalid_input("Missing hotelId"));
        }
        if request.room_number.trim().is_empty() {
            return Err(PipelineError::invalid_input("Missing roomNumber"));
        }
        if request.items.is_empty() {
            return Err(PipelineError::invalid_input("No items to sync"));
        }

        let credentials = self.credentials_for(&request.hotel_id)?;
        let posted_at = format_timestamp(&Utc::now());

        let mut outcomes = Vec::with_capacity(request.items.len());
        for (idx, item) in request.items.iter().enumerate() {
            outcomes.push(
                self.push_minibar_item(&credentials, request, idx, item, &posted_at)
                    .await,
            );
        }
        Ok(MinibarSyncResults::from_outcomes(outcomes))
    }

    async fn push_minibar_item(
        &self,
        credentials: &PmsCredentials,
        request: &MinibarSyncRequest,
        idx: usize,
        item: &MinibarSyncItem,
        posted_at: &str,
    ) -> ItemOutcome {
        let label = format!("Item {} ({})", idx + 1, item.item_name.trim());

        let charge = match build_charge_request(credentials, request, item, posted_at) {
            Ok(charge) => charge,
            Err(e) => {
                warn!(room_number = %request.room_number, item = %label, error = %e, "PMS minibar item not sent");
                return ItemOutcome::Failed(format!("{label}: {e}"));
            }
        };

        match self
            .call_with_timeout(self.client.post_minibar_charge(credentials, &charge))
            .await
        {
            Ok(ack) => {
                debug!(
                    room_number = %request.room_number,
                    item = %label,
                    reference = ?ack.reference,
                    "PMS minibar item posted"
                );
                ItemOutcome::Updated
            }
            Err(e) => {
                warn!(
                    hotel_id = %request.hotel_id,
                    room_number = %request.room_number,
                    item = %label,
                    error = %e,
                    "PMS minibar item failed"
                );
                ItemOutcome::Failed(format!("{label}: {e}"))
            }
        }
    }

    /// Push today's active usage for a room, aggregated per item.
    pub async fn push_room_usage(
        &self,
        room_id: &str,
        now: DateTime<FixedOffset>,
        initiated_by: Option<&str>,
    ) -> Result<MinibarSyncReport, PipelineError> {
        let request = match self.room_usage_request(room_id, &now) {
            Ok(request) if request.items.is_empty() => {
                let err = PipelineError::invalid_input("No active minibar usage for this room today");
                self.reject_room_usage(room_id, Some(&request), &err, initiated_by);
                return Err(err);
            }
            Ok(request) => request,
            Err(e) => {
                self.reject_room_usage(room_id, None, &e, initiated_by);
                return Err(e);
            }
        };
        self.sync_minibar(&request, initiated_by).await
    }

    fn reject_room_usage(
        &self,
        room_id: &str,
        request: Option<&MinibarSyncRequest>,
        error: &PipelineError,
        initiated_by: Option<&str>,
    ) {
        warn!(room_id = %room_id, error = %error, "PMS room usage push rejected");
        let payload = serde_json::json!({
            "roomId": room_id,
            "roomNumber": request.map(|r| r.room_number.as_str()),
            "itemCount": request.map_or(0, |r| r.items.len()),
        });
        self.record_rejected(
            SyncType::Minibar,
            request.map(|r| r.hotel_id.as_str()),
            payload,
            &error.to_string(),
            initiated_by,
        );
    }

    fn room_usage_request(
        &self,
        room_id: &str,
        now: &DateTime<FixedOffset>,
    ) -> Result<MinibarSyncRequest, PipelineError> {
        let conn = self
            .db
            .conn
            .lock()
            .map_err(|e| PipelineError::Storage(format!("db lock poisoned: {e}")))?;
        let room = get_room_by_id(&conn, room_id)?
            .ok_or_else(|| PipelineError::invalid_input(format!("Unknown room {room_id}")))?;
        let items = load_room_usage_items(&conn, &room.id, &DayWindow::containing(now))?;
        Ok(MinibarSyncRequest {
            hotel_id: room.hotel_id,
            room_number: room.room_number,
            items,
        })
    }

    // -- room status --------------------------------------------------------

    /// Push a room status change, mapped to the PMS vocabulary.
    pub async fn sync_room_status(
        &self,
        request: &RoomStatusSyncRequest,
        initiated_by: Option<&str>,
    ) -> Result<RoomStatusSyncReport, PipelineError> {
        let pms_status = map_room_status(&request.status);
        let payload = serde_json::json!({
            "roomNumber": request.room_number,
            "status": request.status,
            "pmsStatus": pms_status,
            "assignmentId": request.assignment_id,
        });

        let outcome = match self.run_room_status(request, pms_status).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(hotel_id = %request.hotel_id, error = %e, "PMS status sync rejected");
                self.record_rejected(
                    SyncType::StatusUpdate,
                    Some(&request.hotel_id),
                    payload,
                    &e.to_string(),
                    initiated_by,
                );
                return Err(e);
            }
        };

        let (status, errors) = match &outcome {
            Ok(_) => (SyncStatus::Success, Vec::new()),
            Err(e) => (SyncStatus::Failed, vec![e.clone()]),
        };
        let attempt = SyncAttempt::new(
            SyncType::StatusUpdate,
            Some(&request.hotel_id),
            payload,
            errors,
            status,
            initiated_by,
        );
        record_best_effort(&self.audit, &attempt);

        let data = serde_json::json!({
            "roomNumber": request.room_number.trim(),
            "pmsStatus": pms_status.as_str(),
            "assignmentId": request.assignment_id,
        });

        Ok(match outcome {
            Ok(ack) => {
                info!(
                    hotel_id = %request.hotel_id,
                    room_number = %request.room_number,
                    pms_status = pms_status.as_str(),
                    "PMS room status updated"
                );
                let mut data = data;
                data["reference"] = serde_json::json!(ack.reference);
                RoomStatusSyncReport {
                    success: true,
                    status,
                    message: format!("Room status synced to PMS as {}", pms_status.as_str()),
                    data,
                }
            }
            Err(e) => {
                warn!(
                    hotel_id = %request.hotel_id,
                    room_number = %request.room_number,
                    error = %e,
                    "PMS room status update failed"
                );
                RoomStatusSyncReport {
                    success: false,
                    status,
                    message: format!("PMS room status update failed: {e}"),
                    data,
                }
            }
        })
    }

    /// Outer error: request rejected before the call. Inner error: the call
    /// itself failed.
    async fn run_room_status(
        &self,
        request: &RoomStatusSyncRequest,
        pms_status: PmsRoomStatus,
    ) -> Result<Result<PmsAck, String>, PipelineError> {
        if request.hotel_id.trim().is_empty() {
            return Err(PipelineError::invalid_input("Missing hotelId"));
        }
        if request.room_number.trim().is_empty() {
            return Err(PipelineError::invalid_input("Missing roomNumber"));
        }
        if request.status.trim().is_empty() {
            return Err(PipelineError::invalid_input("Missing status"));
        }

        let credentials = self.credentials_for(&request.hotel_id)?;
        let status_request = RoomStatusRequest {
            property_id: credentials.property_id.clone(),
            room_number: request.room_number.trim().to_string(),
            status: pms_status,
            assignment_id: request
                .assignment_id
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        };

        Ok(self
            .call_with_timeout(self.client.post_room_status(&credentials, &status_request))
            .await)
    }
}

fn build_charge_request(
    credentials: &PmsCredentials,
    request: &MinibarSyncRequest,
    item: &MinibarSyncItem,
    posted_at: &str,
) -> Result<MinibarChargeRequest, String> {
    let item_name = item.item_name.trim();
    if item_name.is_empty() {
        return Err("missing item_name".to_string());
    }
    if item.quantity < 1 {
        return Err(format!("invalid quantity {}", item.quantity));
    }
    if let Some(price) = item.price {
        if !price.is_finite() || price < 0.0 {
            return Err(format!("invalid price {price}"));
        }
    }
    Ok(MinibarChargeRequest {
        property_id: credentials.property_id.clone(),
        room_number: request.room_number.trim().to_string(),
        item_name: item_name.to_string(),
        quantity: item.quantity,
        unit_price: item.price,
        posted_at: posted_at.to_string(),
    })
}

fn minibar_payload_summary(request: &MinibarSyncRequest) -> Value {
    serde_json::json!({
        "roomNumber": request.room_number,
        "itemCount": request.items.len(),
        "items": request.items,
    })
}

fn load_room_usage_items(
    conn: &Connection,
    room_id: &str,
    window: &DayWindow,
) -> Result<Vec<MinibarSyncItem>, PipelineError> {
    let mut stmt = conn.prepare(
        "SELECT i.name, SUM(u.quantity), i.price
         FROM minibar_usage u
         JOIN minibar_items i ON i.id = u.minibar_item_id
         WHERE u.room_id = ?1 AND u.is_cleared = 0
           AND u.usage_day = ?2
         GROUP BY u.minibar_item_id
         ORDER BY i.name",
    )?;
    let rows = stmt.query_map(params![room_id, window.day_key()], |row| {
        Ok(MinibarSyncItem {
            item_name: row.get(0)?,
            quantity: row.get(1)?,
            price: row.get(2)?,
        })
    })?;
    let items = rows.collect::<Result<Vec<_>, _>>()?;
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{list_sync_attempts, SqliteAuditLog};
    use crate::db::open_test_db;
    use crate::test_fixtures::{insert_usage_row, seed_hotel, seed_pms_settings, FakePms};
    use chrono::TimeZone;
    use serial_test::serial;

    struct BrokenLog;

    impl SyncAuditLog for BrokenLog {
        fn append(&self, _attempt: &SyncAttempt) -> Result<(), PipelineError> {
            Err(PipelineError::Storage("disk full".into()))
        }
    }

    fn setup(pms: FakePms) -> PmsSyncExecutor<FakePms, SqliteAuditLog> {
        let db = Arc::new(open_test_db());
        seed_hotel(&db);
        seed_pms_settings(&db, "h1", "https://pms.example");
        PmsSyncExecutor::new(db.clone(), pms, SqliteAuditLog::new(db))
    }

    fn five_items() -> MinibarSyncRequest {
        MinibarSyncRequest {
            hotel_id: "h1".to_string(),
            room_number: "R1".to_string(),
            items: ["Soda", "Chips", "Water", "Nuts", "Juice"]
                .iter()
                .map(|name| MinibarSyncItem {
                    item_name: name.to_string(),
                    quantity: 1,
                    price: Some(2.5),
                })
                .collect(),
        }
    }

    fn audit_rows(executor: &PmsSyncExecutor<FakePms, SqliteAuditLog>) -> Vec<SyncAttempt> {
        let conn = executor.db().conn.lock().unwrap();
        list_sync_attempts(&conn, None, 50).unwrap()
    }

    #[test]
    fn test_results_fold_and_status() {
        let results = MinibarSyncResults::from_outcomes(vec![
            ItemOutcome::Updated,
            ItemOutcome::Failed("a".into()),
            ItemOutcome::Updated,
        ]);
        assert_eq!(results.total, 3);
        assert_eq!(results.updated, 2);
        assert_eq!(results.errors, vec!["a".to_string()]);
        assert_eq!(results.status(), SyncStatus::Partial);

        let none_updated = MinibarSyncResults::from_outcomes(vec![ItemOutcome::Failed("b".into())]);
        assert_eq!(none_updated.status(), SyncStatus::Failed);
        assert_eq!(
            MinibarSyncResults::from_outcomes(vec![ItemOutcome::Updated]).status(),
            SyncStatus::Success
        );
    }

    #[test]
    fn test_status_mapping_is_total() {
        assert_eq!(map_room_status("clean"), PmsRoomStatus::Clean);
        assert_eq!(map_room_status(" CLEAN "), PmsRoomStatus::Clean);
        assert_eq!(map_room_status("dirty"), PmsRoomStatus::Dirty);
        assert_eq!(map_room_status("in_progress"), PmsRoomStatus::Dirty);
        assert_eq!(map_room_status("in-progress"), PmsRoomStatus::Dirty);
        assert_eq!(map_room_status("maintenance"), PmsRoomStatus::Dirty);
        assert_eq!(map_room_status("foo"), PmsRoomStatus::Dirty);
        assert_eq!(map_room_status(""), PmsRoomStatus::Dirty);
    }

    #[tokio::test]
    #[serial]
    async fn test_partial_failure_is_isolated_per_item() {
        let executor = setup(FakePms::failing(&["Chips", "Nuts"]));

        let report = executor
            .sync_minibar(&five_items(), Some("staff-9"))
            .await
            .unwrap();
        assert!(report.success);
        assert_eq!(report.status, SyncStatus::Partial);
        assert_eq!(report.results.total, 5);
        assert_eq!(report.results.updated, 3);
        assert_eq!(report.results.errors.len(), 2);
        assert!(report.results.errors[0].starts_with("Item 2 (Chips)"));
        assert!(report.results.errors[1].starts_with("Item 4 (Nuts)"));

        // Sequential, in submission order, nothing skipped after a failure.
        assert_eq!(
            executor.client.charged_items(),
            vec!["Soda", "Chips", "Water", "Nuts", "Juice"]
        );

        let rows = audit_rows(&executor);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].sync_type, SyncType::Minibar);
        assert_eq!(rows[0].status, SyncStatus::Partial);
        assert_eq!(rows[0].errors.len(), 2);
        assert_eq!(rows[0].hotel_id.as_deref(), Some("h1"));
        assert_eq!(rows[0].initiated_by.as_deref(), Some("staff-9"));
    }

    #[tokio::test]
    #[serial]
    async fn test_total_failure_is_not_success() {
        let executor = setup(FakePms::failing(&["Soda", "Chips", "Water", "Nuts", "Juice"]));

        let report = executor.sync_minibar(&five_items(), None).await.unwrap();
        assert!(!report.success);
        assert_eq!(report.status, SyncStatus::Failed);
        assert_eq!(report.results.updated, 0);
        assert_eq!(audit_rows(&executor)[0].status, SyncStatus::Failed);
    }

    #[tokio::test]
    #[serial]
    async fn test_unbuildable_item_is_a_per_item_error() {
        let executor = setup(FakePms::default());
        let mut request = five_items();
        request.items[1].quantity = 0;
        request.items[3].price = Some(-1.0);

        let report = executor.sync_minibar(&request, None).await.unwrap();
        assert_eq!(report.results.updated, 3);
        assert_eq!(report.results.errors.len(), 2);
        assert_eq!(executor.client.charged_items(), vec!["Soda", "Water", "Juice"]);
    }

    #[tokio::test]
    #[serial]
    async fn test_timeout_becomes_item_error() {
        let pms = FakePms {
            slow_items: ["Water".to_string()].into_iter().collect(),
            ..Default::default()
        };
        let executor = setup(pms).with_call_timeout(Duration::from_millis(50));

        let report = executor.sync_minibar(&five_items(), None).await.unwrap();
        assert_eq!(report.results.updated, 4);
        assert_eq!(report.results.errors.len(), 1);
        assert!(report.results.errors[0].contains("timed out"));
    }

    #[tokio::test]
    #[serial]
    async fn test_missing_credentials_fail_before_any_call() {
        let db = Arc::new(open_test_db());
        seed_hotel(&db);
        let executor = PmsSyncExecutor::new(db.clone(), FakePms::default(), SqliteAuditLog::new(db));

        let err = executor.sync_minibar(&five_items(), None).await.unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
        assert!(executor.client.charged_items().is_empty());

        let rows = audit_rows(&executor);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, SyncStatus::Failed);
        assert!(rows[0].errors[0].contains("PMS not configured"));
    }

    #[tokio::test]
    #[serial]
    async fn test_empty_batch_is_rejected_and_audited() {
        let executor = setup(FakePms::default());
        let request = MinibarSyncRequest {
            hotel_id: "h1".to_string(),
            room_number: "R1".to_string(),
            items: vec![],
        };

        let err = executor.sync_minibar(&request, None).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
        assert_eq!(audit_rows(&executor)[0].status, SyncStatus::Failed);
    }

    #[tokio::test]
    #[serial]
    async fn test_audit_failure_does_not_mask_outcome() {
        let db = Arc::new(open_test_db());
        seed_hotel(&db);
        seed_pms_settings(&db, "h1", "https://pms.example");
        let executor = PmsSyncExecutor::new(db, FakePms::failing(&["Chips"]), BrokenLog);

        let report = executor.sync_minibar(&five_items(), None).await.unwrap();
        assert_eq!(report.status, SyncStatus::Partial);
        assert_eq!(report.results.updated, 4);
    }

    #[tokio::test]
    #[serial]
    async fn test_room_status_sends_mapped_value() {
        let executor = setup(FakePms::default());
        let request = RoomStatusSyncRequest {
            hotel_id: "h1".to_string(),
            room_number: "R1".to_string(),
            status: "foo".to_string(),
            assignment_id: Some("as-7".to_string()),
        };

        let report = executor.sync_room_status(&request, Some("staff-2")).await.unwrap();
        assert!(report.success);
        assert_eq!(report.data["pmsStatus"], "dirty");
        assert_eq!(report.data["reference"], "st-1");

        let sent = executor.client.statuses.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].status, PmsRoomStatus::Dirty);
        assert_eq!(sent[0].assignment_id.as_deref(), Some("as-7"));

        let rows = audit_rows(&executor);
        assert_eq!(rows[0].sync_type, SyncType::StatusUpdate);
        assert_eq!(rows[0].status, SyncStatus::Success);
    }

    #[tokio::test]
    #[serial]
    async fn test_room_status_call_failure_is_reported_and_audited() {
        let executor = setup(FakePms {
            fail_status: true,
            ..Default::default()
        });
        let request = RoomStatusSyncRequest {
            hotel_id: "h1".to_string(),
            room_number: "R1".to_string(),
            status: "clean".to_string(),
            assignment_id: None,
        };

        let report = executor.sync_room_status(&request, None).await.unwrap();
        assert!(!report.success);
        assert_eq!(report.status, SyncStatus::Failed);

        let rows = audit_rows(&executor);
        assert_eq!(rows[0].status, SyncStatus::Failed);
        assert!(rows[0].errors[0].contains("Cannot reach PMS"));
    }

    #[tokio::test]
    #[serial]
    async fn test_push_room_usage_aggregates_today() {
        let executor = setup(FakePms::default());
        let now = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2026, 10, 17, 12, 0, 0)
            .unwrap();
        insert_usage_row(executor.db(), "u1", "r1", "I1", 2, "guest", "2026-10-17T08:00:00.000Z", "2026-10-17");
        insert_usage_row(executor.db(), "u2", "r1", "I2", 1, "staff", "2026-10-17T09:00:00.000Z", "2026-10-17");
        insert_usage_row(executor.db(), "u3", "r1", "I3", 1, "staff", "2026-10-16T09:00:00.000Z", "2026-10-16");

        let report = executor.push_room_usage("r1", now, Some("scheduler")).await.unwrap();
        assert_eq!(report.status, SyncStatus::Success);
        assert_eq!(report.results.total, 2);

        let charges = executor.client.charges.lock().unwrap().clone();
        assert_eq!(charges[0].item_name, "Chips");
        assert_eq!(charges[1].item_name, "Soda");
        assert_eq!(charges[1].quantity, 2);
        assert_eq!(charges[1].unit_price, Some(3.5));
        assert_eq!(charges[1].room_number, "R1");

        let nothing = executor.push_room_usage("r2", now, None).await.unwrap_err();
        assert!(matches!(nothing, PipelineError::InvalidInput(_)));
        let unknown = executor.push_room_usage("r404", now, Some("staff-4")).await.unwrap_err();
        assert!(matches!(unknown, PipelineError::InvalidInput(_)));

        // Newest first: r404, then r2, then the successful push.
        let rows = audit_rows(&executor);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].status, SyncStatus::Failed);
        assert_eq!(rows[0].sync_type, SyncType::Minibar);
        assert!(rows[0].hotel_id.is_none());
        assert_eq!(rows[0].payload["roomId"], "r404");
        assert_eq!(rows[0].initiated_by.as_deref(), Some("staff-4"));
        assert_eq!(rows[1].status, SyncStatus::Failed);
        assert_eq!(rows[1].hotel_id.as_deref(), Some("h1"));
        assert_eq!(rows[1].payload["roomId"], "r2");
        assert!(rows[1].errors[0].contains("No active minibar usage"));
        assert_eq!(rows[2].status, SyncStatus::Success);
    }

    #[tokio::test]
    #[serial]
    async fn test_push_room_usage_on_fall_back_day_includes_early_charge() {
        let executor = setup(FakePms::default());
        // 00:30 at +02:00 on the 25th; the push runs after clocks went back.
        insert_usage_row(executor.db(), "u1", "r1", "I1", 1, "guest", "2026-10-24T22:30:00.000Z", "2026-10-25");
        let now = FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2026, 10, 25, 10, 0, 0)
            .unwrap();

        let report = executor.push_room_usage("r1", now, None).await.unwrap();
        assert_eq!(report.results.total, 1);
        assert_eq!(executor.client.charged_items(), vec!["Soda"]);
    }
}
