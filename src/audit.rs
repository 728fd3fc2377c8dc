//! Append-only history of PMS sync attempts.
//!
//! Every sync call writes exactly one row describing what was sent, what came
//! back per item, and the aggregate outcome. Writing is best-effort: a failed
//! audit insert is logged and never changes the result returned to the caller.

use chrono::Utc;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, warn};
use uuid::Uuid;

use crate::db::DbState;
use crate::error::PipelineError;
use crate::usage::format_timestamp;

pub const SYNC_DIRECTION_TO_PMS: &str = "to_pms";
const MAX_LIST_LIMIT: i64 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncType {
    Minibar,
    StatusUpdate,
}

impl SyncType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncType::Minibar => "minibar",
            SyncType::StatusUpdate => "status_update",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "minibar" => Some(SyncType::Minibar),
            "status_update" => Some(SyncType::StatusUpdate),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Success,
    Partial,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Success => "success",
            SyncStatus::Partial => "partial",
            SyncStatus::Failed => "failed",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "success" => Some(SyncStatus::Success),
            "partial" => Some(SyncStatus::Partial),
            "failed" => Some(SyncStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncAttempt {
    pub id: String,
    pub sync_type: SyncType,
    pub direction: String,
    pub hotel_id: Option<String>,
    pub payload: Value,
    pub errors: Vec<String>,
    pub status: SyncStatus,
    pub initiated_by: Option<String>,
    pub created_at: String,
}

impl SyncAttempt {
    pub fn new(
        sync_type: SyncType,
        hotel_id: Option<&str>,
        payload: Value,
        errors: Vec<String>,
        status: SyncStatus,
        initiated_by: Option<&str>,
    ) -> Self {
        SyncAttempt {
            id: Uuid::new_v4().to_string(),
            sync_type,
            direction: SYNC_DIRECTION_TO_PMS.to_string(),
            hotel_id: hotel_id
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            payload,
            errors,
            status,
            initiated_by: initiated_by
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            created_at: format_timestamp(&Utc::now()),
        }
    }
}

/// Destination for sync attempt records.
pub trait SyncAuditLog: Send + Sync {
    fn append(&self, attempt: &SyncAttempt) -> Result<(), PipelineError>;
}

/// Append `attempt`, logging (never propagating) a failure.
pub fn record_best_effort<A: SyncAuditLog + ?Sized>(audit: &A, attempt: &SyncAttempt) {
    if let Err(e) = audit.append(attempt) {
        error!(
            attempt_id = %attempt.id,
            sync_type = attempt.sync_type.as_str(),
            status = attempt.status.as_str(),
            error = %e,
            "failed to write PMS sync audit record"
        );
    }
}

/// Audit log backed by the `pms_sync_log` table.
#[derive(Clone)]
pub struct SqliteAuditLog {
    db: Arc<DbState>,
}

impl SqliteAuditLog {
    pub fn new(db: Arc<DbState>) -> Self {
        SqliteAuditLog { db }
    }
}

impl SyncAuditLog for SqliteAuditLog {
    fn append(&self, attempt: &SyncAttempt) -> Result<(), PipelineError> {
        let conn = self
            .db
            .conn
            .lock()
            .map_err(|e| PipelineError::Storage(format!("db lock poisoned: {e}")))?;
        insert_attempt(&conn, attempt)
    }
}

fn insert_attempt(conn: &Connection, attempt: &SyncAttempt) -> Result<(), PipelineError> {
    let errors = serde_json::to_string(&attempt.errors)
        .map_err(|e| PipelineError::Unexpected(format!("serialize errors: {e}")))?;
    conn.execute(
        "INSERT INTO pms_sync_log (id, sync_type, direction, hotel_id, payload, errors,
                                   status, initiated_by, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            attempt.id,
            attempt.sync_type.as_str(),
            attempt.direction,
            attempt.hotel_id,
            attempt.payload.to_string(),
            errors,
            attempt.status.as_str(),
            attempt.initiated_by,
            attempt.created_at,
        ],
    )?;
    Ok(())
}

/// Newest-first sync history, optionally for a single hotel.
pub fn list_sync_attempts(
    conn: &Connection,
    hotel_id: Option<&str>,
    limit: i64,
) -> Result<Vec<SyncAttempt>, PipelineError> {
    let limit = limit.clamp(1, MAX_LIST_LIMIT);
    let mut stmt = conn.prepare(
        "SELECT id, sync_type, direction, hotel_id, payload, errors, status, initiated_by, created_at
         FROM pms_sync_log
         WHERE (?1 IS NULL OR hotel_id = ?1)
         ORDER BY created_at DESC, rowid DESC
         LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![hotel_id, limit], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, Option<String>>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, String>(5)?,
            row.get::<_, String>(6)?,
            row.get::<_, Option<String>>(7)?,
            row.get::<_, String>(8)?,
        ))
    })?;

    let mut attempts = Vec::new();
    for row in rows {
        let (id, sync_type, direction, hotel_id, payload, errors, status, initiated_by, created_at) =
            row?;
        let (Some(sync_type), Some(status)) = (SyncType::parse(&sync_type), SyncStatus::parse(&status))
        else {
            warn!(attempt_id = %id, "skipping sync log row with unknown type or status");
            continue;
        };
        attempts.push(SyncAttempt {
            id,
            sync_type,
            direction,
            hotel_id,
            payload: serde_json::from_str(&payload).unwrap_or(Value::Null),
            errors: serde_json::from_str(&errors).unwrap_or_default(),
            status,
            initiated_by,
            created_at,
        });
    }
    Ok(attempts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_test_db;

    #[test]
    fn test_append_and_list_newest_first() {
        let db = Arc::new(open_test_db());
        let audit = SqliteAuditLog::new(db.clone());

        let mut first = SyncAttempt::new(
            SyncType::Minibar,
            Some("h1"),
            serde_json::json!({ "roomNumber": "R1", "items": 5 }),
            vec!["Item 2 (Chips): PMS server error (HTTP 500)".to_string()],
            SyncStatus::Partial,
            Some("staff-1"),
        );
        first.created_at = "2026-10-17T08:00:00.000Z".to_string();
        let mut second = SyncAttempt::new(
            SyncType::StatusUpdate,
            Some("h2"),
            serde_json::json!({ "status": "clean" }),
            vec![],
            SyncStatus::Success,
            None,
        );
        second.created_at = "2026-10-17T09:00:00.000Z".to_string();

        audit.append(&first).unwrap();
        audit.append(&second).unwrap();

        let conn = db.conn.lock().unwrap();
        let all = list_sync_attempts(&conn, None, 50).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, second.id);
        assert_eq!(all[1], first);

        let h1 = list_sync_attempts(&conn, Some("h1"), 50).unwrap();
        assert_eq!(h1.len(), 1);
        assert_eq!(h1[0].status, SyncStatus::Partial);
        assert_eq!(h1[0].direction, "to_pms");
    }

    #[test]
    fn test_blank_identity_and_hotel_are_stored_as_null() {
        let attempt = SyncAttempt::new(
            SyncType::Minibar,
            Some("  "),
            Value::Null,
            vec![],
            SyncStatus::Failed,
            Some(""),
        );
        assert!(attempt.hotel_id.is_none());
        assert!(attempt.initiated_by.is_none());
    }

    struct BrokenLog;

    impl SyncAuditLog for BrokenLog {
        fn append(&self, _attempt: &SyncAttempt) -> Result<(), PipelineError> {
            Err(PipelineError::Storage("disk full".into()))
        }
    }

    #[test]
    fn test_best_effort_swallows_write_failures() {
        let attempt = SyncAttempt::new(
            SyncType::Minibar,
            None,
            Value::Null,
            vec![],
            SyncStatus::Failed,
            None,
        );
        record_best_effort(&BrokenLog, &attempt);
    }
}
